//! Image references: resolve, copy into the shared namespace, rewrite.
//!
//! Every image a page's text references is copied into the run-wide
//! `images/` directory under the key `p{page}_{basename}`, and the link is
//! rewritten to `images/{key}`. Prefixing by page keeps two pages that both
//! emit `fig1.png` from overwriting each other. A key that already exists is
//! never overwritten.
//!
//! References are resolved against an [`AssetSource`]: either the entries of
//! the engine's bundle ([`ZipAssets`]) or files on disk ([`DirAssets`]).
//! Resolution tries the path relative to the text artifact's directory
//! first, then falls back to a search by basename. A reference that still
//! does not resolve is left exactly as written.

use crate::pipeline::{relative_slash_path, walk_files};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zip::ZipArchive;

/// `![alt](target)`
static IMAGE_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]+)\)").expect("static regex"));

/// Somewhere referenced images can be read from.
pub trait AssetSource {
    /// Locate `reference` (as written in the text). Returns an opaque handle
    /// understood by [`AssetSource::copy_to`].
    fn resolve(&mut self, reference: &str) -> Option<String>;

    /// Copy the resolved asset to `dest`.
    fn copy_to(&mut self, handle: &str, dest: &Path) -> io::Result<()>;
}

/// Result of rewriting one page's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewritten {
    pub text: String,
    /// Assets newly copied into the namespace.
    pub copied: usize,
    /// References left unchanged because they did not resolve.
    pub unresolved: usize,
}

/// `p{page}_{basename}` for a reference.
pub fn asset_key(page_number: usize, reference: &str) -> String {
    let normalized = normalize_separators(reference);
    let base = normalized.rsplit('/').next().unwrap_or(&normalized);
    format!("p{page_number}_{base}")
}

/// Rewrite every image link in `text`, copying resolved assets into
/// `images_dir`.
pub fn rewrite_image_links(
    text: &str,
    page_number: usize,
    source: &mut dyn AssetSource,
    images_dir: &Path,
) -> Rewritten {
    let mut copied = 0;
    let mut unresolved = 0;

    let rewritten = IMAGE_LINK.replace_all(text, |caps: &Captures| {
        let whole = caps[0].to_string();
        let alt = &caps[1];
        let reference = caps[2].trim();

        if is_external(reference) {
            return whole;
        }
        let Some(handle) = source.resolve(reference) else {
            debug!("Page {}: image '{}' did not resolve", page_number, reference);
            unresolved += 1;
            return whole;
        };

        let key = asset_key(page_number, reference);
        let dest = images_dir.join(&key);
        if !dest.exists() {
            let copy = std::fs::create_dir_all(images_dir)
                .and_then(|_| source.copy_to(&handle, &dest));
            if let Err(e) = copy {
                warn!("Page {}: failed to copy image '{}': {}", page_number, reference, e);
                unresolved += 1;
                return whole;
            }
            copied += 1;
        }
        format!("![{alt}](images/{key})")
    });

    Rewritten {
        text: rewritten.into_owned(),
        copied,
        unresolved,
    }
}

fn is_external(reference: &str) -> bool {
    reference.contains("://") || reference.starts_with("data:")
}

fn normalize_separators(s: &str) -> String {
    s.replace('\\', "/")
}

/// Join `rel` onto `base` (both `/`-separated), folding `.` and `..`.
fn join_normalized(base: &str, rel: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in base.split('/').chain(rel.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

fn is_regular_file(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|m| m.file_type().is_file())
        .unwrap_or(false)
}

fn basename_lower(reference: &str) -> Option<String> {
    let normalized = normalize_separators(reference);
    let base = normalized.rsplit('/').next()?.to_lowercase();
    (!base.is_empty()).then_some(base)
}

// ── Bundle source ────────────────────────────────────────────────────────

/// Assets read straight out of a zip bundle.
pub struct ZipAssets<R: Read + Seek> {
    archive: ZipArchive<R>,
    /// Directory of the text entry inside the archive, `/`-separated.
    base_dir: String,
    /// Entry names in archive order, directories excluded.
    names: Vec<String>,
    /// Lower-cased normalised name → entry name.
    by_lower: HashMap<String, String>,
}

impl<R: Read + Seek> ZipAssets<R> {
    pub fn new(mut archive: ZipArchive<R>, base_dir: &str) -> Self {
        let mut names = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            if let Ok(entry) = archive.by_index(i) {
                if !entry.is_dir() {
                    names.push(entry.name().to_string());
                }
            }
        }
        let by_lower = names
            .iter()
            .map(|n| (join_normalized("", &normalize_separators(n)).to_lowercase(), n.clone()))
            .collect();
        Self {
            archive,
            base_dir: join_normalized("", &normalize_separators(base_dir)),
            names,
            by_lower,
        }
    }
}

impl<R: Read + Seek> AssetSource for ZipAssets<R> {
    fn resolve(&mut self, reference: &str) -> Option<String> {
        let candidate = join_normalized(&self.base_dir, &normalize_separators(reference));
        if let Some(entry) = self.by_lower.get(&candidate.to_lowercase()) {
            return Some(entry.clone());
        }
        let base = basename_lower(reference)?;
        self.names
            .iter()
            .find(|n| {
                normalize_separators(n)
                    .rsplit('/')
                    .next()
                    .map(|b| b.to_lowercase() == base)
                    .unwrap_or(false)
            })
            .cloned()
    }

    fn copy_to(&mut self, handle: &str, dest: &Path) -> io::Result<()> {
        let mut entry = self
            .archive
            .by_name(handle)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut out = File::create(dest)?;
        io::copy(&mut entry, &mut out)?;
        Ok(())
    }
}

// ── Directory source ─────────────────────────────────────────────────────

/// Assets on disk, relative to the directory holding the text artifact.
///
/// Resolution never leaves `root`: `..` segments are folded the same way
/// as for bundle entries, and symlinks are not followed.
#[derive(Debug, Clone)]
pub struct DirAssets {
    root: PathBuf,
    base_dir: PathBuf,
}

impl DirAssets {
    /// `root` is the engine output being searched; `base_dir` lies inside it.
    pub fn new(root: impl Into<PathBuf>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            base_dir: base_dir.into(),
        }
    }
}

impl AssetSource for DirAssets {
    fn resolve(&mut self, reference: &str) -> Option<String> {
        let base_rel = relative_slash_path(&self.root, &self.base_dir).unwrap_or_default();
        let candidate = join_normalized(&base_rel, &normalize_separators(reference));
        if !candidate.is_empty() {
            let direct = self.root.join(&candidate);
            if is_regular_file(&direct) {
                return Some(direct.to_string_lossy().into_owned());
            }
        }
        let base = basename_lower(reference)?;
        walk_files(&self.base_dir)
            .ok()?
            .into_iter()
            .find(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().to_lowercase() == base)
                    .unwrap_or(false)
            })
            .map(|p| p.to_string_lossy().into_owned())
    }

    fn copy_to(&mut self, handle: &str, dest: &Path) -> io::Result<()> {
        std::fs::copy(handle, dest).map(|_| ())
    }
}

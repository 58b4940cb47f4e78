//! Text extraction from engine output.
//!
//! Two strategies, tried in order:
//!
//! 1. **Bundle** (fast path): read the best-ranked text entry and its
//!    images straight out of the engine's zip, without unpacking.
//! 2. **Unpacked** (fallback): unpack the bundle to scratch, or search the
//!    engine's loose output when there is no bundle, and pick the most
//!    recently modified text artifact. A plain-text artifact is accepted
//!    when no text artifact exists and is copied to the text extension.
//!
//! The fallback runs only when the fast path reports that the bundle holds
//! no text entry. A bundle that cannot be read at all is a page error.

use crate::config::TextLocator;
use crate::error::PageError;
use crate::output::ExtractionPath;
use crate::pipeline::assets::{rewrite_image_links, DirAssets, ZipAssets};
use crate::pipeline::engine::EngineOutcome;
use crate::pipeline::walk_files;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};
use zip::ZipArchive;

/// Page text with its image links already rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub text: String,
    pub assets_copied: usize,
    pub unresolved_assets: usize,
    pub path: ExtractionPath,
}

/// Outcome of the fast path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FastPath {
    Found(Extracted),
    /// The bundle is readable but holds no text entry.
    NotFound,
}

/// Where one page's extraction reads from and writes to.
#[derive(Debug, Clone, Copy)]
pub struct ExtractContext<'a> {
    pub page_number: usize,
    pub locator: &'a TextLocator,
    /// The shared image namespace.
    pub images_dir: &'a Path,
}

/// Run both strategies for one page. `Ok(None)` means no text artifact was
/// found anywhere.
pub fn extract_page(
    outcome: &EngineOutcome,
    output_area: &Path,
    unpack_dir: &Path,
    ctx: ExtractContext<'_>,
) -> Result<Option<Extracted>, PageError> {
    match outcome.bundle {
        Some(ref bundle) => match extract_from_bundle(bundle, ctx)? {
            FastPath::Found(extracted) => Ok(Some(extracted)),
            FastPath::NotFound => {
                info!(
                    "Page {}: no text entry in bundle, unpacking",
                    ctx.page_number
                );
                unpack(bundle, unpack_dir, ctx.page_number)?;
                extract_from_dir(unpack_dir, ctx)
            }
        },
        None => extract_from_dir(output_area, ctx),
    }
}

/// Fast path: read the text entry and its images straight from the bundle.
pub fn extract_from_bundle(bundle: &Path, ctx: ExtractContext<'_>) -> Result<FastPath, PageError> {
    let page = ctx.page_number;
    let mut archive = open_bundle(bundle, page)?;

    let mut best: Option<(u8, usize, String)> = None;
    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(|e| unreadable(page, e))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let Some(rank) = ctx.locator.rank(&name.replace('\\', "/")) else {
            continue;
        };
        let candidate = (rank, name.len(), name);
        if best.as_ref().map(|b| candidate < *b).unwrap_or(true) {
            best = Some(candidate);
        }
    }
    let Some((_, _, entry_name)) = best else {
        return Ok(FastPath::NotFound);
    };
    debug!("Page {}: text entry '{}'", page, entry_name);

    let raw = {
        let mut entry = archive
            .by_name(&entry_name)
            .map_err(|e| unreadable(page, e))?;
        let mut buf = Vec::new();
        entry
            .read_to_end(&mut buf)
            .map_err(|e| unreadable(page, e))?;
        String::from_utf8_lossy(&buf).into_owned()
    };

    let normalized = entry_name.replace('\\', "/");
    let base_dir = normalized.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
    let mut source = ZipAssets::new(archive, base_dir);
    let rewritten = rewrite_image_links(&raw, page, &mut source, ctx.images_dir);

    Ok(FastPath::Found(Extracted {
        text: rewritten.text,
        assets_copied: rewritten.copied,
        unresolved_assets: rewritten.unresolved,
        path: ExtractionPath::Bundle,
    }))
}

/// Unpack the whole bundle into `dest`.
pub fn unpack(bundle: &Path, dest: &Path, page_number: usize) -> Result<(), PageError> {
    let mut archive = open_bundle(bundle, page_number)?;
    std::fs::create_dir_all(dest).map_err(|e| io_error(page_number, e))?;
    archive
        .extract(dest)
        .map_err(|e| unreadable(page_number, e))
}

/// Fallback: find the text artifact under `dir` and rewrite its images
/// from the surrounding files.
pub fn extract_from_dir(dir: &Path, ctx: ExtractContext<'_>) -> Result<Option<Extracted>, PageError> {
    let page = ctx.page_number;
    let Some(artifact) = find_text_artifact(dir, ctx.locator).map_err(|e| io_error(page, e))? else {
        return Ok(None);
    };
    debug!("Page {}: text artifact {}", page, artifact.display());

    let bytes = std::fs::read(&artifact).map_err(|e| io_error(page, e))?;
    let raw = String::from_utf8_lossy(&bytes);
    let base_dir = artifact.parent().unwrap_or(dir);
    let mut source = DirAssets::new(dir, base_dir);
    let rewritten = rewrite_image_links(&raw, page, &mut source, ctx.images_dir);

    Ok(Some(Extracted {
        text: rewritten.text,
        assets_copied: rewritten.copied,
        unresolved_assets: rewritten.unresolved,
        path: ExtractionPath::Unpacked,
    }))
}

/// Pick the text artifact under `dir`, most recently modified first:
///
/// 1. a file named like the preferred artifact,
/// 2. any file with the text extension,
/// 3. a plain-text file, copied alongside itself with the text extension.
pub fn find_text_artifact(dir: &Path, locator: &TextLocator) -> io::Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let files = walk_files(dir)?;

    let preferred = files.iter().filter(|p| {
        p.file_name()
            .map(|n| locator.is_preferred_name(&n.to_string_lossy()))
            .unwrap_or(false)
    });
    if let Some(p) = latest(preferred) {
        return Ok(Some(p));
    }

    let text = files
        .iter()
        .filter(|p| locator.has_text_extension(&p.to_string_lossy()));
    if let Some(p) = latest(text) {
        return Ok(Some(p));
    }

    let plain = files
        .iter()
        .filter(|p| locator.has_plain_extension(&p.to_string_lossy()));
    if let Some(p) = latest(plain) {
        let converted = p.with_extension(&locator.text_extension);
        std::fs::copy(&p, &converted)?;
        return Ok(Some(converted));
    }

    Ok(None)
}

fn latest<'a>(paths: impl Iterator<Item = &'a PathBuf>) -> Option<PathBuf> {
    paths
        .max_by_key(|p| {
            std::fs::metadata(p)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH)
        })
        .cloned()
}

fn open_bundle(bundle: &Path, page: usize) -> Result<ZipArchive<BufReader<File>>, PageError> {
    let file = File::open(bundle).map_err(|e| io_error(page, e))?;
    ZipArchive::new(BufReader::new(file)).map_err(|e| unreadable(page, e))
}

fn unreadable(page: usize, e: impl std::fmt::Display) -> PageError {
    PageError::BundleUnreadable {
        page,
        detail: e.to_string(),
    }
}

fn io_error(page: usize, e: io::Error) -> PageError {
    PageError::Io {
        page,
        detail: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::assets::tests::zip_bytes;
    use std::fs;
    use std::time::Duration;

    struct Fixture {
        _tmp: tempfile::TempDir,
        root: PathBuf,
        locator: TextLocator,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let root = tmp.path().to_path_buf();
            Self {
                _tmp: tmp,
                root,
                locator: TextLocator::default(),
            }
        }

        fn ctx<'a>(&'a self, images_dir: &'a Path) -> ExtractContext<'a> {
            ExtractContext {
                page_number: 1,
                locator: &self.locator,
                images_dir,
            }
        }

        fn bundle(&self, entries: &[(&str, &str)]) -> PathBuf {
            let path = self.root.join("out/bundle_archive.zip");
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, zip_bytes(entries)).unwrap();
            path
        }
    }

    fn set_mtime(path: &Path, secs_after_epoch: u64) {
        let f = fs::File::options().write(true).open(path).unwrap();
        f.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs_after_epoch))
            .unwrap();
    }

    #[test]
    fn fast_path_prefers_nested_preferred_entry() {
        let fx = Fixture::new();
        let bundle = fx.bundle(&[
            ("doc/notes.md", "notes"),
            ("doc/upload.md", "outer"),
            ("doc/ocr/upload.md", "inner ![f](images/a.png)"),
            ("doc/ocr/images/a.png", "A"),
        ]);
        let images = fx.root.join("images");
        let ctx = fx.ctx(&images);
        let FastPath::Found(out) = extract_from_bundle(&bundle, ctx).unwrap() else {
            panic!("expected text");
        };
        assert_eq!(out.text, "inner ![f](images/p1_a.png)");
        assert_eq!(out.path, ExtractionPath::Bundle);
        assert!(images.join("p1_a.png").is_file());
    }

    #[test]
    fn fast_path_ties_go_to_shortest_path() {
        let fx = Fixture::new();
        let bundle = fx.bundle(&[("long/path/x.md", "long"), ("y.md", "short")]);
        let images_ctx = fx.root.join("images");
        let ctx = fx.ctx(&images_ctx);
        let FastPath::Found(out) = extract_from_bundle(&bundle, ctx).unwrap() else {
            panic!("expected text");
        };
        assert_eq!(out.text, "short");
    }

    #[test]
    fn bundle_without_text_entry_is_not_found() {
        let fx = Fixture::new();
        let bundle = fx.bundle(&[("doc/layout.json", "{}")]);
        let images_ctx = fx.root.join("images");
        let ctx = fx.ctx(&images_ctx);
        assert_eq!(extract_from_bundle(&bundle, ctx).unwrap(), FastPath::NotFound);
    }

    #[test]
    fn corrupt_bundle_is_a_page_error() {
        let fx = Fixture::new();
        let path = fx.root.join("broken.zip");
        fs::write(&path, b"definitely not a zip").unwrap();
        let images_ctx = fx.root.join("images");
        let ctx = fx.ctx(&images_ctx);
        assert!(matches!(
            extract_from_bundle(&path, ctx),
            Err(PageError::BundleUnreadable { page: 1, .. })
        ));
    }

    #[test]
    fn fast_and_fallback_paths_agree() {
        let fx = Fixture::new();
        let bundle = fx.bundle(&[
            ("doc/ocr/upload.md", "Text\n\n![x](images/fig.png)"),
            ("doc/ocr/images/fig.png", "PNG"),
        ]);

        let images_fast_ctx = fx.root.join("images_fast");
        let fast_ctx = fx.ctx(&images_fast_ctx);
        let FastPath::Found(fast) = extract_from_bundle(&bundle, fast_ctx).unwrap() else {
            panic!("expected text");
        };

        let unpack_dir = fx.root.join("unpacked");
        unpack(&bundle, &unpack_dir, 1).unwrap();
        let slow_images = fx.root.join("images_slow");
        let slow_ctx = fx.ctx(&slow_images);
        let slow = extract_from_dir(&unpack_dir, slow_ctx).unwrap().unwrap();

        assert_eq!(fast.text, slow.text);
        assert_eq!(slow.path, ExtractionPath::Unpacked);
        assert_eq!(fs::read(slow_images.join("p1_fig.png")).unwrap(), b"PNG");
    }

    #[test]
    fn fallback_runs_when_bundle_has_only_plain_text() {
        let fx = Fixture::new();
        let bundle = fx.bundle(&[("doc/result.txt", "plain words")]);
        let images_ctx = fx.root.join("images");
        let ctx = fx.ctx(&images_ctx);
        let outcome = EngineOutcome {
            bundle: Some(bundle),
        };
        let unpack_dir = fx.root.join("zip_pages/p0001");
        let out = extract_page(&outcome, &fx.root.join("out"), &unpack_dir, ctx)
            .unwrap()
            .unwrap();
        assert_eq!(out.text, "plain words");
        assert!(unpack_dir.join("doc/result.md").is_file());
    }

    #[test]
    fn loose_output_is_searched_without_a_bundle() {
        let fx = Fixture::new();
        let out_dir = fx.root.join("out/auto");
        fs::create_dir_all(&out_dir).unwrap();
        fs::write(out_dir.join("page.md"), "loose").unwrap();
        let images_ctx = fx.root.join("images");
        let ctx = fx.ctx(&images_ctx);
        let outcome = EngineOutcome { bundle: None };
        let out = extract_page(&outcome, &fx.root.join("out"), &fx.root.join("unused"), ctx)
            .unwrap()
            .unwrap();
        assert_eq!(out.text, "loose");
    }

    #[test]
    fn preferred_artifact_wins_by_latest_mtime() {
        let fx = Fixture::new();
        let dir = fx.root.join("tree");
        fs::create_dir_all(dir.join("a")).unwrap();
        fs::create_dir_all(dir.join("b")).unwrap();
        fs::write(dir.join("a/upload.md"), "old").unwrap();
        fs::write(dir.join("b/upload.md"), "new").unwrap();
        fs::write(dir.join("newest.md"), "other").unwrap();
        set_mtime(&dir.join("a/upload.md"), 1_000);
        set_mtime(&dir.join("b/upload.md"), 2_000);
        set_mtime(&dir.join("newest.md"), 3_000);

        let picked = find_text_artifact(&dir, &fx.locator).unwrap().unwrap();
        assert_eq!(picked, dir.join("b/upload.md"));
    }

    #[test]
    fn nothing_found_is_none() {
        let fx = Fixture::new();
        let dir = fx.root.join("empty");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("layout.json"), "{}").unwrap();
        assert_eq!(find_text_artifact(&dir, &fx.locator).unwrap(), None);
        assert_eq!(
            find_text_artifact(&fx.root.join("missing"), &fx.locator).unwrap(),
            None
        );
    }
}

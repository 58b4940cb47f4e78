//! Pipeline stages for page-wise OCR.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ split ──▶ admission ──▶ dispatch ──▶ page ──▶ assemble
//! (path/URL) (lopdf)   (budget)     (bounded)     │        (merge + zip)
//!                                                 ├─ engine   (external OCR)
//!                                                 ├─ extract  (bundle / unpacked)
//!                                                 ├─ assets   (image namespace)
//!                                                 └─ annotate (anchors)
//! ```
//!
//! 1. [`input`]     — read the path or download the URL into a `Document`
//! 2. [`split`]     — one single-page PDF per page, in `spawn_blocking`
//! 3. [`admission`] — worker count from the resource budget, or rejection
//! 4. [`dispatch`]  — run pages on the blocking pool, at most N in flight
//! 5. [`page`]      — one page end to end; never fails the run
//! 6. [`assemble`]  — order, merge, and package the consolidated tree

pub mod admission;
pub mod annotate;
pub mod assemble;
pub mod assets;
pub mod dispatch;
pub mod engine;
pub mod extract;
pub mod input;
pub mod page;
pub mod split;

use std::io;
use std::path::{Path, PathBuf};

/// Every regular file under `root`, depth-first.
///
/// At each level subdirectories come first, then files, both in lexical
/// order, so the listing is stable across runs and platforms.
pub(crate) fn walk_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    walk_into(root, &mut out)?;
    Ok(out)
}

fn walk_into(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            dirs.push(entry.path());
        } else if file_type.is_file() {
            files.push(entry.path());
        }
    }
    dirs.sort();
    files.sort();
    for d in dirs {
        walk_into(&d, out)?;
    }
    out.extend(files);
    Ok(())
}

/// `/`-separated path of `path` relative to `root`.
pub(crate) fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

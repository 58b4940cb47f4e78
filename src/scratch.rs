//! Per-run scratch storage.
//!
//! A [`ScratchArena`] owns one temporary directory for the lifetime of a
//! run. Workers hold it through an `Arc`, so the directory is removed only
//! after the run *and* every in-flight page worker have let go of it, even
//! if the run itself is dropped early.
//!
//! ```text
//! <tmp>/
//!  ├─ pages_src/page_0001.pdf     single-page inputs
//!  ├─ pages_out/p0001/            engine output area per page
//!  ├─ zip_pages/p0001/            unpacked bundles (fallback path)
//!  └─ final/                      consolidated tree that gets packaged
//!      ├─ upload.md
//!      ├─ images/p1_fig1.png
//!      └─ pages/page_0001.zip
//! ```

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

/// Name of the shared image directory inside the consolidated tree.
pub const IMAGES_DIR: &str = "images";

/// Name of the per-page bundle directory inside the consolidated tree.
pub const PAGE_BUNDLES_DIR: &str = "pages";

#[derive(Debug)]
pub struct ScratchArena {
    root: TempDir,
}

impl ScratchArena {
    /// Allocate a fresh arena with its fixed layout created.
    pub fn new() -> io::Result<Self> {
        let root = tempfile::Builder::new().prefix("pagewise_").tempdir()?;
        let arena = Self { root };
        std::fs::create_dir_all(arena.pages_src())?;
        std::fs::create_dir_all(arena.final_root())?;
        debug!("Scratch arena at {}", arena.path().display());
        Ok(arena)
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn pages_src(&self) -> PathBuf {
        self.path().join("pages_src")
    }

    /// Engine output area for one page.
    pub fn page_output(&self, page_number: usize) -> PathBuf {
        self.path()
            .join("pages_out")
            .join(format!("p{page_number:04}"))
    }

    /// Where a page's bundle is unpacked on the fallback path.
    pub fn page_unpack(&self, page_number: usize) -> PathBuf {
        self.path()
            .join("zip_pages")
            .join(format!("p{page_number:04}"))
    }

    pub fn final_root(&self) -> PathBuf {
        self.path().join("final")
    }

    /// The shared asset namespace.
    pub fn images_dir(&self) -> PathBuf {
        self.final_root().join(IMAGES_DIR)
    }

    pub fn page_bundles_dir(&self) -> PathBuf {
        self.final_root().join(PAGE_BUNDLES_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn layout_is_created_and_reclaimed() {
        let arena = ScratchArena::new().unwrap();
        let root = arena.path().to_path_buf();
        assert!(arena.pages_src().is_dir());
        assert!(arena.final_root().is_dir());
        assert!(arena.page_output(3).ends_with("pages_out/p0003"));
        drop(arena);
        assert!(!root.exists());
    }

    #[test]
    fn shared_arena_outlives_the_run_handle() {
        let arena = Arc::new(ScratchArena::new().unwrap());
        let root = arena.path().to_path_buf();
        let worker = Arc::clone(&arena);
        drop(arena);
        assert!(root.exists(), "worker still holds the arena");
        drop(worker);
        assert!(!root.exists());
    }
}

//! Assembly: merge page texts and package the consolidated tree.
//!
//! Results are ordered by page number, whatever order workers finished in.
//! Pages without text are skipped silently; a run where no page produced
//! text still assembles, into an empty merged document.
//!
//! Archives are written with a stable member order (subdirectories before
//! files at each level, both lexical) and a fixed timestamp, so identical
//! trees yield identical member listings.

use crate::error::PipelineError;
use crate::output::PageResult;
use crate::pipeline::{relative_slash_path, walk_files};
use std::io::{self, Cursor, Write};
use std::path::Path;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Separator between consecutive pages in the merged document.
pub const PAGE_SEPARATOR: &str = "\n\n";

/// The merged document and its packaged tree.
#[derive(Debug, Clone)]
pub struct Consolidated {
    pub markdown: String,
    pub archive: Vec<u8>,
    /// Page results, ascending by page number.
    pub pages: Vec<PageResult>,
}

/// Join the annotated texts of `pages` in page order.
///
/// Sorts `pages` in place.
pub fn merge_pages(pages: &mut [PageResult]) -> String {
    pages.sort_by_key(|p| p.page_number);
    pages
        .iter()
        .filter_map(|p| p.annotated_text.as_deref())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR)
}

/// Merge, write the merged file into `final_root`, and package the tree.
pub fn assemble(
    mut pages: Vec<PageResult>,
    final_root: &Path,
    merged_name: &str,
) -> Result<Consolidated, PipelineError> {
    let markdown = merge_pages(&mut pages);

    std::fs::create_dir_all(final_root).map_err(assembly_error)?;
    std::fs::write(final_root.join(merged_name), &markdown).map_err(assembly_error)?;

    let archive = zip_tree(final_root).map_err(assembly_error)?;
    info!(
        "Assembled {} page(s) into {} bytes of text, {} byte archive",
        pages.len(),
        markdown.len(),
        archive.len()
    );

    Ok(Consolidated {
        markdown,
        archive,
        pages,
    })
}

/// Package every file under `root` into an in-memory zip.
pub fn zip_tree(root: &Path) -> io::Result<Vec<u8>> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for path in walk_files(root)? {
        let Some(name) = relative_slash_path(root, &path) else {
            continue;
        };
        writer.start_file(name.as_str(), options).map_err(io::Error::other)?;
        writer.write_all(&std::fs::read(&path)?)?;
        debug!("Packed {}", name);
    }
    Ok(writer.finish().map_err(io::Error::other)?.into_inner())
}

/// Package `root` into a zip file at `dest`.
pub fn write_zip_tree(root: &Path, dest: &Path) -> io::Result<()> {
    let bytes = zip_tree(root)?;
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(dest, bytes)
}

fn assembly_error(e: io::Error) -> PipelineError {
    PipelineError::Assembly {
        detail: e.to_string(),
    }
}

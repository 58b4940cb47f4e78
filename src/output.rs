//! Data carried through and out of a run.

use crate::error::PageError;
use serde::{Deserialize, Serialize};

/// File name used when the caller did not declare a usable one.
pub const DEFAULT_DOCUMENT_NAME: &str = "upload.pdf";

/// The original input of one run.
#[derive(Debug, Clone)]
pub struct Document {
    pub bytes: Vec<u8>,
    pub filename: Option<String>,
}

impl Document {
    pub fn new(bytes: Vec<u8>, filename: Option<String>) -> Self {
        Self { bytes, filename }
    }

    /// The name this document is known by inside the run.
    ///
    /// A declared name is kept (without any directory part) only when it
    /// ends in `.pdf`; anything else becomes [`DEFAULT_DOCUMENT_NAME`].
    pub fn display_name(&self) -> String {
        self.filename
            .as_deref()
            .and_then(|f| f.rsplit(['/', '\\']).next())
            .filter(|f| f.to_lowercase().ends_with(".pdf") && f.len() > 4)
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_DOCUMENT_NAME.to_string())
    }
}

/// One page of the input as a standalone single-page PDF.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageUnit {
    /// 1-based, contiguous, assigned at split time.
    pub page_number: usize,
    pub content: Vec<u8>,
}

impl PageUnit {
    /// `page_0001.pdf`, the scratch file name of this page.
    pub fn file_name(&self) -> String {
        format!("page_{:04}.pdf", self.page_number)
    }
}

/// Which extraction strategy produced a page's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionPath {
    /// Text and images read straight out of the engine bundle.
    Bundle,
    /// Bundle unpacked to scratch (or loose files searched) first.
    Unpacked,
}

/// Outcome of processing one page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResult {
    /// 1-indexed page number.
    pub page_number: usize,
    /// Annotated page text; `None` means the page contributes nothing.
    pub annotated_text: Option<String>,
    /// Which extraction path produced the text.
    pub extraction: Option<ExtractionPath>,
    /// Images copied into the shared namespace.
    pub assets_copied: usize,
    /// Image references left as written because they did not resolve.
    pub unresolved_assets: usize,
    /// Wall-clock time for this page.
    pub duration_ms: u64,
    /// Why the page has no text, when that was a failure.
    pub error: Option<PageError>,
}

impl PageResult {
    /// A page that produced nothing, optionally because of `error`.
    pub fn empty(page_number: usize, error: Option<PageError>) -> Self {
        Self {
            page_number,
            annotated_text: None,
            extraction: None,
            assets_copied: 0,
            unresolved_assets: 0,
            duration_ms: 0,
            error,
        }
    }
}

/// Statistics for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub document_name: String,
    pub page_count: usize,
    pub admitted_workers: usize,
    pub pages_with_text: usize,
    pub failed_pages: usize,
    pub assets_copied: usize,
    pub unresolved_assets: usize,
    pub input_bytes: u64,
    pub archive_bytes: u64,
    pub split_duration_ms: u64,
    pub ocr_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Everything a successful run produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    /// The packaged consolidated tree (zip).
    #[serde(skip)]
    pub archive: Vec<u8>,
    /// The merged text, as written into the archive.
    pub markdown: String,
    /// Per-page outcomes, ascending by page number.
    pub pages: Vec<PageResult>,
    pub stats: RunStats,
}

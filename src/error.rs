//! Error types for the pagewise-ocr library.
//!
//! Two distinct error types reflect two distinct failure scopes:
//!
//! * [`PipelineError`] — **Fatal**: the run cannot produce an archive at all
//!   (bad input, unparseable PDF, budget too small for one worker, the
//!   consolidated archive cannot be written). Returned as
//!   `Err(PipelineError)` from the top-level `convert*` functions.
//!
//! * [`PageError`] — **Page-scoped**: one page's engine call or extraction
//!   failed. Stored inside [`crate::output::PageResult`]; the page simply
//!   contributes no text to the consolidated document.
//!
//! Unresolved image references are narrower still: they are logged and
//! counted on the page, and the reference is left as written.

use std::path::PathBuf;
use thiserror::Error;

/// HTTP-style status class of a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ErrorClass {
    /// The caller sent something unusable (missing input, budget too small).
    Client,
    /// The pipeline itself failed (split, engine availability, assembly).
    Server,
}

/// Rejection from resource-budget admission.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// `total_budget / per_worker_cost` funds zero workers.
    #[error(
        "insufficient budget: {total_budget} cannot fund one worker costing {per_worker_cost}"
    )]
    InsufficientBudget {
        total_budget: u64,
        per_worker_cost: u64,
    },

    /// The request itself is malformed (zero cost or zero concurrency).
    #[error("invalid budget request: {0}")]
    InvalidBudget(String),
}

/// All fatal errors returned by the pagewise-ocr library.
///
/// Page-level failures use [`PageError`] and are stored in
/// [`crate::output::PageResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// No document bytes were received.
    #[error("No document received")]
    EmptyInput,

    /// The bytes do not start with the PDF magic.
    #[error("'{name}' is not a PDF (first bytes: {magic:?})")]
    NotAPdf { name: String, magic: Vec<u8> },

    // ── Split errors ──────────────────────────────────────────────────────
    /// The document could not be parsed as a paginated PDF.
    #[error("Failed to split '{name}' into pages: {detail}")]
    Split { name: String, detail: String },

    /// The document parsed but has no pages.
    #[error("'{name}' produced no pages to process")]
    NoPages { name: String },

    // ── Admission errors ──────────────────────────────────────────────────
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    // ── Engine errors ─────────────────────────────────────────────────────
    /// The OCR engine could not be resolved before any page was dispatched.
    #[error("OCR engine unavailable: {detail}")]
    EngineUnavailable { detail: String },

    // ── Assembly errors ───────────────────────────────────────────────────
    /// The consolidated tree or archive could not be built.
    #[error("Failed to assemble the consolidated archive: {detail}")]
    Assembly { detail: String },

    /// Could not create or write the output archive file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Which side of a request/response boundary is to blame.
    pub fn status_class(&self) -> ErrorClass {
        match self {
            PipelineError::FileNotFound { .. }
            | PipelineError::PermissionDenied { .. }
            | PipelineError::InvalidInput { .. }
            | PipelineError::DownloadFailed { .. }
            | PipelineError::DownloadTimeout { .. }
            | PipelineError::EmptyInput
            | PipelineError::NotAPdf { .. }
            | PipelineError::Admission(_)
            | PipelineError::InvalidConfig(_) => ErrorClass::Client,
            PipelineError::Split { .. }
            | PipelineError::NoPages { .. }
            | PipelineError::EngineUnavailable { .. }
            | PipelineError::Assembly { .. }
            | PipelineError::OutputWriteFailed { .. }
            | PipelineError::Internal(_) => ErrorClass::Server,
        }
    }

    /// 400 for client-class errors, 500 for server-class errors.
    pub fn http_status(&self) -> u16 {
        match self.status_class() {
            ErrorClass::Client => 400,
            ErrorClass::Server => 500,
        }
    }
}

/// A non-fatal error for a single page.
///
/// Stored alongside [`crate::output::PageResult`] when a page fails.
/// The run continues and the page contributes no text.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The engine exited unsuccessfully.
    #[error("Page {page}: OCR engine failed: {diagnostics}")]
    EngineFailed { page: usize, diagnostics: String },

    /// Neither the fast nor the fallback path found a text artifact.
    #[error("Page {page}: no text artifact in engine output")]
    ExtractionMiss { page: usize },

    /// The engine's bundle exists but is not a readable archive.
    #[error("Page {page}: unreadable engine bundle: {detail}")]
    BundleUnreadable { page: usize, detail: String },

    /// Scratch I/O failed while handling this page.
    #[error("Page {page}: I/O error: {detail}")]
    Io { page: usize, detail: String },

    /// The worker running this page panicked.
    #[error("Page {page}: worker panicked: {detail}")]
    WorkerPanicked { page: usize, detail: String },
}

impl PageError {
    /// The 1-based page this error belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageError::EngineFailed { page, .. }
            | PageError::ExtractionMiss { page }
            | PageError::BundleUnreadable { page, .. }
            | PageError::Io { page, .. }
            | PageError::WorkerPanicked { page, .. } => *page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_budget_is_client_error() {
        let e = PipelineError::from(AdmissionError::InsufficientBudget {
            total_budget: 100,
            per_worker_cost: 768,
        });
        assert_eq!(e.status_class(), ErrorClass::Client);
        assert_eq!(e.http_status(), 400);
        assert!(e.to_string().contains("insufficient budget"), "got: {e}");
    }

    #[test]
    fn split_failure_is_server_error() {
        let e = PipelineError::Split {
            name: "upload.pdf".into(),
            detail: "bad xref".into(),
        };
        assert_eq!(e.status_class(), ErrorClass::Server);
        assert_eq!(e.http_status(), 500);
    }

    #[test]
    fn missing_input_is_client_error() {
        assert_eq!(PipelineError::EmptyInput.http_status(), 400);
    }

    #[test]
    fn engine_failed_display_carries_diagnostics() {
        let e = PageError::EngineFailed {
            page: 3,
            diagnostics: "CUDA out of memory".into(),
        };
        assert!(e.to_string().contains("Page 3"));
        assert!(e.to_string().contains("CUDA out of memory"));
        assert_eq!(e.page(), 3);
    }
}

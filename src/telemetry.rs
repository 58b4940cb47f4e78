//! Telemetry collaborator for runs and pages.
//!
//! Inject an `Arc<dyn TelemetrySink>` via
//! [`crate::config::PipelineConfigBuilder::telemetry`]. The pipeline calls it
//! at run start, around every page, and once per run with a [`RunRecord`],
//! whether the run succeeded or not.
//!
//! Sinks are called from blocking worker threads concurrently and must be
//! `Send + Sync`. A sink that panics is isolated: the panic is logged and
//! the run's result is unaffected.
//!
//! # Example
//!
//! ```rust
//! use pagewise_ocr::{GaugeTelemetry, PipelineConfig, TelemetrySink};
//! use std::sync::Arc;
//!
//! let gauges = Arc::new(GaugeTelemetry::new());
//! let config = PipelineConfig::builder()
//!     .telemetry(gauges.clone() as Arc<dyn TelemetrySink>)
//!     .build()
//!     .unwrap();
//! assert_eq!(gauges.snapshot().inflight_runs, 0);
//! # drop(config);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};

/// Per-run record emitted after every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub document_name: String,
    pub page_count: usize,
    pub processed_at: DateTime<Utc>,
    pub total_budget_mb: u64,
    pub concurrency: usize,
    pub admitted_workers: usize,
    pub duration_ms: u64,
    pub input_bytes: u64,
    pub archive_bytes: u64,
    /// Whether `on_run_start` was emitted for this run. False for requests
    /// rejected before dispatch (bad input, budget, engine).
    pub started: bool,
    pub succeeded: bool,
}

/// Receives telemetry from the pipeline. All methods default to no-ops.
pub trait TelemetrySink: Send + Sync {
    /// Called once the page count and worker count are known.
    fn on_run_start(&self, document_name: &str, page_count: usize, workers: usize) {
        let _ = (document_name, page_count, workers);
    }

    /// Called when a worker slot is acquired for a page.
    fn on_page_start(&self, page_number: usize, total_pages: usize) {
        let _ = (page_number, total_pages);
    }

    /// Called when a page finishes without a page-scoped error.
    fn on_page_complete(&self, page_number: usize, total_pages: usize, text_len: usize) {
        let _ = (page_number, total_pages, text_len);
    }

    /// Called when a page fails with a page-scoped error.
    fn on_page_error(&self, page_number: usize, total_pages: usize, error: &str) {
        let _ = (page_number, total_pages, error);
    }

    /// Called once per run, success or failure.
    fn on_run_complete(&self, record: &RunRecord) {
        let _ = record;
    }
}

/// The default sink: ignores everything.
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {}

/// Run `emit` against the sink, swallowing any panic it raises.
pub(crate) fn emit(sink: &dyn TelemetrySink, what: &str, call: impl FnOnce(&dyn TelemetrySink)) {
    if panic::catch_unwind(AssertUnwindSafe(|| call(sink))).is_err() {
        warn!("Telemetry sink panicked during {}; ignoring", what);
    }
}

/// Point-in-time view of a [`GaugeTelemetry`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GaugeSnapshot {
    pub inflight_runs: usize,
    pub pages_in_progress: usize,
    pub bytes_uploaded_total: u64,
    pub runs_total: u64,
    pub runs_failed_total: u64,
    pub last_document: Option<RunRecord>,
}

/// In-process gauges for an OCR service.
///
/// Constructed once at process start and shared with every run through the
/// config; nothing here is global.
#[derive(Debug, Default)]
pub struct GaugeTelemetry {
    inflight_runs: AtomicUsize,
    pages_in_progress: AtomicUsize,
    bytes_uploaded_total: AtomicU64,
    runs_total: AtomicU64,
    runs_failed_total: AtomicU64,
    last_document: Mutex<Option<RunRecord>>,
}

impl GaugeTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> GaugeSnapshot {
        GaugeSnapshot {
            inflight_runs: self.inflight_runs.load(Ordering::SeqCst),
            pages_in_progress: self.pages_in_progress.load(Ordering::SeqCst),
            bytes_uploaded_total: self.bytes_uploaded_total.load(Ordering::SeqCst),
            runs_total: self.runs_total.load(Ordering::SeqCst),
            runs_failed_total: self.runs_failed_total.load(Ordering::SeqCst),
            last_document: self
                .last_document
                .lock()
                .map(|g| g.clone())
                .unwrap_or_default(),
        }
    }

    fn page_done(&self) {
        let _ = self
            .pages_in_progress
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

impl TelemetrySink for GaugeTelemetry {
    fn on_run_start(&self, _document_name: &str, _page_count: usize, _workers: usize) {
        self.inflight_runs.fetch_add(1, Ordering::SeqCst);
    }

    fn on_page_start(&self, _page_number: usize, _total_pages: usize) {
        self.pages_in_progress.fetch_add(1, Ordering::SeqCst);
    }

    fn on_page_complete(&self, _page_number: usize, _total_pages: usize, _text_len: usize) {
        self.page_done();
    }

    fn on_page_error(&self, _page_number: usize, _total_pages: usize, _error: &str) {
        self.page_done();
    }

    fn on_run_complete(&self, record: &RunRecord) {
        // Runs rejected before `on_run_start` never incremented the gauge.
        if record.started {
            let _ = self
                .inflight_runs
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        }
        self.bytes_uploaded_total
            .fetch_add(record.input_bytes, Ordering::SeqCst);
        self.runs_total.fetch_add(1, Ordering::SeqCst);
        if !record.succeeded {
            self.runs_failed_total.fetch_add(1, Ordering::SeqCst);
        }
        info!(
            document = %record.document_name,
            pages = record.page_count,
            budget_mb = record.total_budget_mb,
            concurrency = record.concurrency,
            duration_ms = record.duration_ms,
            succeeded = record.succeeded,
            "Document processed"
        );
        if let Ok(mut last) = self.last_document.lock() {
            *last = Some(record.clone());
        }
    }
}

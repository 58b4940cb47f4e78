//! # pagewise-ocr
//!
//! Page-wise OCR of PDF documents through an external OCR engine.
//!
//! A document is split into single-page PDFs, each page is handed to the
//! engine (MinerU by default) on a bounded worker pool sized from a
//! resource budget, the engine's output is mined for the page text and its
//! images, and everything is merged back into one annotated Markdown file
//! with a shared image directory, packaged as a zip archive.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input     read a local file or download from URL
//!  ├─ 2. Split     one single-page PDF per page (lopdf, spawn_blocking)
//!  ├─ 3. Admit     workers = min(concurrency, budget / per-worker cost)
//!  ├─ 4. Dispatch  at most N engine calls in flight
//!  ├─ 5. Page      engine → bundle/unpacked extraction → image keys → anchors
//!  └─ 6. Assemble  merged upload.md + images/ + pages/ → zip
//! ```
//!
//! A page that fails never fails the run: it is recorded in its
//! [`PageResult`] and simply contributes no text.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pagewise_ocr::{convert_to_file, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .total_budget_mb(8192)
//!         .concurrency(4)
//!         .build()?;
//!     let output = convert_to_file("scan.pdf", "scan_ocr.zip", &config).await?;
//!     eprintln!("{}/{} pages with text",
//!         output.stats.pages_with_text,
//!         output.stats.page_count);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pagewise` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! pagewise-ocr = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod scratch;
pub mod telemetry;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    AdmissionPolicy, EngineSettings, PipelineConfig, PipelineConfigBuilder, TextLocator,
};
pub use convert::{convert_document, convert_file, convert_sync, convert_to_file};
pub use error::{AdmissionError, ErrorClass, PageError, PipelineError};
pub use output::{Document, ExtractionPath, PageResult, PageUnit, RunOutput, RunStats};
pub use pipeline::engine::{EngineFailure, EngineRequest, MineruCli, OcrEngine};
pub use telemetry::{GaugeSnapshot, GaugeTelemetry, NoopTelemetry, RunRecord, TelemetrySink};

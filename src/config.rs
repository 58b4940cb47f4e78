//! Configuration types for a page-wise OCR run.
//!
//! All run behaviour is controlled through [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. Environment variables are read only by the CLI
//! (through clap's `env` attributes); the library never consults the process
//! environment for configuration.

use crate::error::PipelineError;
use crate::pipeline::engine::OcrEngine;
use crate::telemetry::{NoopTelemetry, TelemetrySink};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default accelerator memory one engine worker needs, in MB.
pub const DEFAULT_PER_WORKER_MB: u64 = 768;

/// Floor applied to per-worker costs coming from deployment defaults.
pub const MIN_PER_WORKER_MB: u64 = 256;

/// Configuration for one page-wise OCR run.
///
/// # Example
/// ```rust
/// use pagewise_ocr::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .total_budget_mb(4096)
///     .concurrency(4)
///     .per_worker_mb(1024)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 4);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Total accelerator memory granted to this run, in MB. Default: 768.
    ///
    /// Passed to the engine as its resource hint unchanged; the engine does
    /// its own internal batching against the whole budget.
    pub total_budget_mb: u64,

    /// Requested number of pages in flight. Default: 1.
    pub concurrency: usize,

    /// Cost of one engine worker, in MB. Default: 768.
    pub per_worker_mb: u64,

    /// Whether admission divides the budget among workers. Default: Budgeted.
    pub admission_policy: AdmissionPolicy,

    /// How the external engine is launched.
    pub engine: EngineSettings,

    /// Pre-constructed engine. Takes precedence over `engine.program`.
    pub engine_override: Option<Arc<dyn OcrEngine>>,

    /// Where to look for a page's text artifact in the engine output.
    pub text_locator: TextLocator,

    /// File name of the merged text inside the archive. Default: `upload.md`.
    pub merged_name: String,

    /// Word used in each page heading. Default: `Page`.
    pub heading_label: String,

    /// Keep each page's engine bundle under `pages/` in the archive. Default: true.
    pub keep_page_bundles: bool,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Receives per-run and per-page telemetry. Default: [`NoopTelemetry`].
    pub telemetry: Arc<dyn TelemetrySink>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            total_budget_mb: DEFAULT_PER_WORKER_MB,
            concurrency: 1,
            per_worker_mb: DEFAULT_PER_WORKER_MB,
            admission_policy: AdmissionPolicy::default(),
            engine: EngineSettings::default(),
            engine_override: None,
            text_locator: TextLocator::default(),
            merged_name: "upload.md".to_string(),
            heading_label: "Page".to_string(),
            keep_page_bundles: true,
            download_timeout_secs: 120,
            telemetry: Arc::new(NoopTelemetry),
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("total_budget_mb", &self.total_budget_mb)
            .field("concurrency", &self.concurrency)
            .field("per_worker_mb", &self.per_worker_mb)
            .field("admission_policy", &self.admission_policy)
            .field("engine", &self.engine)
            .field(
                "engine_override",
                &self.engine_override.as_ref().map(|_| "<dyn OcrEngine>"),
            )
            .field("text_locator", &self.text_locator)
            .field("merged_name", &self.merged_name)
            .field("heading_label", &self.heading_label)
            .field("keep_page_bundles", &self.keep_page_bundles)
            .field("telemetry", &"<dyn TelemetrySink>")
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn total_budget_mb(mut self, mb: u64) -> Self {
        self.config.total_budget_mb = mb;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    /// Explicit per-worker cost. Not floored: an explicit value is trusted.
    pub fn per_worker_mb(mut self, mb: u64) -> Self {
        self.config.per_worker_mb = mb;
        self
    }

    /// Per-worker cost taken from a deployment default, floored at
    /// [`MIN_PER_WORKER_MB`].
    pub fn default_per_worker_mb(mut self, mb: u64) -> Self {
        self.config.per_worker_mb = mb.max(MIN_PER_WORKER_MB);
        self
    }

    pub fn admission_policy(mut self, policy: AdmissionPolicy) -> Self {
        self.config.admission_policy = policy;
        self
    }

    pub fn engine(mut self, settings: EngineSettings) -> Self {
        self.config.engine = settings;
        self
    }

    pub fn engine_override(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.config.engine_override = Some(engine);
        self
    }

    pub fn text_locator(mut self, locator: TextLocator) -> Self {
        self.config.text_locator = locator;
        self
    }

    pub fn merged_name(mut self, name: impl Into<String>) -> Self {
        self.config.merged_name = name.into();
        self
    }

    pub fn heading_label(mut self, label: impl Into<String>) -> Self {
        self.config.heading_label = label.into();
        self
    }

    pub fn keep_page_bundles(mut self, v: bool) -> Self {
        self.config.keep_page_bundles = v;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.config.telemetry = sink;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.per_worker_mb == 0 {
            return Err(PipelineError::InvalidConfig(
                "Per-worker cost must be ≥ 1".into(),
            ));
        }
        let name = c.merged_name.trim();
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return Err(PipelineError::InvalidConfig(format!(
                "Merged file name must be a bare file name, got '{}'",
                c.merged_name
            )));
        }
        if c.text_locator.text_extension.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "Text extension must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums and nested settings ────────────────────────────────────────────

/// Whether the resource budget limits the worker count.
///
/// | Policy | Worker count |
/// |--------|--------------|
/// | `Budgeted` | `min(concurrency, budget / per_worker)`; rejected when that is 0 |
/// | `Unbudgeted` | `concurrency`, no accounting at all |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AdmissionPolicy {
    #[default]
    Budgeted,
    Unbudgeted,
}

/// How the external OCR engine is launched for each page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Explicit engine executable. When `None`, `mineru` is looked up on
    /// `PATH`, falling back to `python3 -m mineru.cli.client`.
    pub program: Option<std::path::PathBuf>,
    /// Run on the accelerator (`device`) rather than the CPU. Default: true.
    pub use_accelerator: bool,
    /// Accelerator device selector. Default: `cuda`.
    pub device: String,
    /// Engine backend selector. Default: `pipeline`.
    pub backend: String,
    /// Engine parse method. Default: `ocr`.
    pub method: String,
    /// OCR language hint. Default: `latin`.
    pub language: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            program: None,
            use_accelerator: true,
            device: "cuda".to_string(),
            backend: "pipeline".to_string(),
            method: "ocr".to_string(),
            language: "latin".to_string(),
        }
    }
}

/// Names used to find a page's text artifact inside engine output.
///
/// Ranking, best first:
/// 1. `…/{preferred_dir}/{preferred_name}`
/// 2. `…/{preferred_name}`
/// 3. anything ending in `.{text_extension}`
///
/// Ties go to the shortest path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextLocator {
    pub preferred_name: String,
    pub preferred_dir: String,
    pub text_extension: String,
    pub plain_extension: String,
}

impl Default for TextLocator {
    fn default() -> Self {
        Self {
            preferred_name: "upload.md".to_string(),
            preferred_dir: "ocr".to_string(),
            text_extension: "md".to_string(),
            plain_extension: "txt".to_string(),
        }
    }
}

impl TextLocator {
    /// Rank a `/`-separated path; `None` means it is not a text artifact.
    ///
    /// Lower is better. Comparison is case-insensitive.
    pub fn rank(&self, path: &str) -> Option<u8> {
        let lower = path.to_lowercase();
        let name = self.preferred_name.to_lowercase();
        let nested = format!("/{}/{}", self.preferred_dir.to_lowercase(), name);
        if lower.ends_with(&nested) || lower == nested[1..] {
            Some(0)
        } else if lower == name || lower.ends_with(&format!("/{name}")) {
            Some(1)
        } else if self.has_text_extension(&lower) {
            Some(2)
        } else {
            None
        }
    }

    pub fn has_text_extension(&self, path: &str) -> bool {
        has_extension(path, &self.text_extension)
    }

    pub fn has_plain_extension(&self, path: &str) -> bool {
        has_extension(path, &self.plain_extension)
    }

    /// Whether a bare file name is exactly the preferred artifact name.
    pub fn is_preferred_name(&self, file_name: &str) -> bool {
        file_name.eq_ignore_ascii_case(&self.preferred_name)
    }
}

fn has_extension(path: &str, ext: &str) -> bool {
    path.to_lowercase()
        .ends_with(&format!(".{}", ext.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_clamps_concurrency() {
        let c = PipelineConfig::builder().concurrency(0).build().unwrap();
        assert_eq!(c.concurrency, 1);
    }

    #[test]
    fn default_per_worker_is_floored() {
        let c = PipelineConfig::builder()
            .default_per_worker_mb(100)
            .build()
            .unwrap();
        assert_eq!(c.per_worker_mb, MIN_PER_WORKER_MB);
    }

    #[test]
    fn explicit_per_worker_is_trusted() {
        let c = PipelineConfig::builder().per_worker_mb(100).build().unwrap();
        assert_eq!(c.per_worker_mb, 100);
    }

    #[test]
    fn zero_per_worker_is_rejected() {
        assert!(PipelineConfig::builder().per_worker_mb(0).build().is_err());
    }

    #[test]
    fn merged_name_must_be_bare() {
        assert!(PipelineConfig::builder()
            .merged_name("out/doc.md")
            .build()
            .is_err());
    }

    #[test]
    fn default_sink_accepts_every_event() {
        let c = PipelineConfig::default();
        c.telemetry.on_run_start("a.pdf", 1, 1);
        c.telemetry.on_page_start(1, 1);
        c.telemetry.on_page_error(1, 1, "boom");
        assert!(format!("{c:?}").contains("<dyn TelemetrySink>"));
    }

    #[test]
    fn locator_ranking() {
        let l = TextLocator::default();
        assert_eq!(l.rank("page_0001/ocr/upload.md"), Some(0));
        assert_eq!(l.rank("ocr/upload.md"), Some(0));
        assert_eq!(l.rank("page_0001/UPLOAD.MD"), Some(1));
        assert_eq!(l.rank("upload.md"), Some(1));
        assert_eq!(l.rank("page_0001/ocr/page_0001.md"), Some(2));
        assert_eq!(l.rank("page_0001/ocr/layout.json"), None);
    }
}

//! Run orchestration: the `convert*` entry points.
//!
//! A run is split → admit → resolve engine → dispatch pages → assemble. Only
//! input, split, admission, engine resolution, and assembly failures abort
//! the run; everything that goes wrong inside a page is recorded on that
//! page's [`PageResult`].
//!
//! Every request, successful or not, ends with exactly one
//! [`crate::telemetry::TelemetrySink::on_run_complete`] call carrying a
//! [`RunRecord`], including requests whose input could not be read.

use crate::config::PipelineConfig;
use crate::error::{PageError, PipelineError};
use crate::output::{Document, PageResult, PageUnit, RunOutput, RunStats};
use crate::pipeline::admission::{admit, ResourceBudget};
use crate::pipeline::annotate::PageAnnotator;
use crate::pipeline::assemble::{assemble, Consolidated};
use crate::pipeline::dispatch::run_bounded;
use crate::pipeline::engine::{MineruCli, OcrEngine};
use crate::pipeline::page::{process_page, PageContext};
use crate::pipeline::{input, split};
use crate::scratch::ScratchArena;
use crate::telemetry::{emit, RunRecord};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What is known about a run so far; feeds the [`RunRecord`].
#[derive(Debug, Default)]
struct RunProgress {
    page_count: usize,
    admitted_workers: usize,
    archive_bytes: u64,
    started: bool,
}

/// Run the pipeline over an in-memory document.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(RunOutput)` on success, even if some pages failed
/// (check `output.stats.failed_pages`) or no page produced text.
///
/// # Errors
/// Returns `Err(PipelineError)` only for fatal errors:
/// - empty input / not a PDF
/// - the document cannot be split or has no pages
/// - the budget cannot fund one worker
/// - the engine cannot be resolved
/// - the consolidated archive cannot be built
///
/// # Example
/// ```rust,no_run
/// use pagewise_ocr::{convert_document, Document, PipelineConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes = std::fs::read("scan.pdf")?;
/// let config = PipelineConfig::builder()
///     .total_budget_mb(4096)
///     .concurrency(4)
///     .build()?;
/// let output = convert_document(Document::new(bytes, Some("scan.pdf".into())), &config).await?;
/// std::fs::write("scan_ocr.zip", &output.archive)?;
/// # Ok(())
/// # }
/// ```
pub async fn convert_document(
    document: Document,
    config: &PipelineConfig,
) -> Result<RunOutput, PipelineError> {
    let started = Instant::now();
    let name = document.display_name();
    let input_bytes = document.bytes.len() as u64;
    let mut progress = RunProgress::default();

    let result = run(document, &name, config, &mut progress, started).await;
    finish_run(config, name, input_bytes, &progress, started, result.as_ref().err());
    result
}

/// Emit the run's [`RunRecord`], whatever the outcome.
fn finish_run(
    config: &PipelineConfig,
    document_name: String,
    input_bytes: u64,
    progress: &RunProgress,
    started: Instant,
    error: Option<&PipelineError>,
) {
    let record = RunRecord {
        document_name,
        page_count: progress.page_count,
        processed_at: Utc::now(),
        total_budget_mb: config.total_budget_mb,
        concurrency: config.concurrency,
        admitted_workers: progress.admitted_workers,
        duration_ms: started.elapsed().as_millis() as u64,
        input_bytes,
        archive_bytes: progress.archive_bytes,
        started: progress.started,
        succeeded: error.is_none(),
    };
    if let Some(e) = error {
        warn!("Run for '{}' failed: {}", record.document_name, e);
    }
    emit(config.telemetry.as_ref(), "run complete", |s| s.on_run_complete(&record));
}

/// Convert a PDF file or URL.
pub async fn convert_file(
    input_str: impl AsRef<str>,
    config: &PipelineConfig,
) -> Result<RunOutput, PipelineError> {
    let input_str = input_str.as_ref();
    info!("Starting run: {}", input_str);
    let started = Instant::now();
    match input::resolve_input(input_str, config.download_timeout_secs).await {
        Ok(document) => convert_document(document, config).await,
        Err(e) => {
            // The request never became a document; record it under its
            // declared name.
            let name = Document::new(Vec::new(), Some(input_str.to_string())).display_name();
            finish_run(config, name, 0, &RunProgress::default(), started, Some(&e));
            Err(e)
        }
    }
}

/// Convert a PDF and write the archive directly to a file.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn convert_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<RunOutput, PipelineError> {
    let output = convert_file(input_str, config).await?;
    let path = output_path.as_ref();
    let write_failed = |e: std::io::Error| PipelineError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(write_failed)?;
        }
    }

    let tmp_path = path.with_extension("zip.tmp");
    tokio::fs::write(&tmp_path, &output.archive)
        .await
        .map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(write_failed)?;

    info!("Wrote {} ({} bytes)", path.display(), output.archive.len());
    Ok(output)
}

/// Synchronous wrapper around [`convert_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input_str: impl AsRef<str>,
    config: &PipelineConfig,
) -> Result<RunOutput, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_file(input_str, config))
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn run(
    document: Document,
    name: &str,
    config: &PipelineConfig,
    progress: &mut RunProgress,
    started: Instant,
) -> Result<RunOutput, PipelineError> {
    input::validate(&document)?;
    let input_bytes = document.bytes.len() as u64;

    // ── Step 1: Split ────────────────────────────────────────────────────
    let split_start = Instant::now();
    let units = split::split_pages(document.bytes, name).await?;
    let split_duration_ms = split_start.elapsed().as_millis() as u64;
    if units.is_empty() {
        return Err(PipelineError::NoPages {
            name: name.to_string(),
        });
    }
    progress.page_count = units.len();
    info!("Split '{}' into {} pages in {}ms", name, units.len(), split_duration_ms);

    // ── Step 2: Admit ────────────────────────────────────────────────────
    let workers = admit(&ResourceBudget::from_config(config), config.admission_policy)?;
    progress.admitted_workers = workers;

    // ── Step 3: Resolve engine ───────────────────────────────────────────
    let engine = resolve_engine(config)?;

    let arena = Arc::new(
        ScratchArena::new()
            .map_err(|e| PipelineError::Internal(format!("scratch directory: {e}")))?,
    );
    let total_pages = units.len();
    emit(config.telemetry.as_ref(), "run start", |s| {
        s.on_run_start(name, total_pages, workers)
    });
    progress.started = true;

    // ── Step 4: Dispatch pages ───────────────────────────────────────────
    let ocr_start = Instant::now();
    let pages = dispatch_pages(units, workers, engine, Arc::clone(&arena), config).await;
    let ocr_duration_ms = ocr_start.elapsed().as_millis() as u64;

    // ── Step 5: Assemble ─────────────────────────────────────────────────
    let final_root = arena.final_root();
    let merged_name = config.merged_name.clone();
    let Consolidated {
        markdown,
        archive,
        pages,
    } = tokio::task::spawn_blocking(move || assemble(pages, &final_root, &merged_name))
        .await
        .map_err(|e| PipelineError::Internal(format!("Assembly task panicked: {}", e)))??;
    progress.archive_bytes = archive.len() as u64;

    let stats = RunStats {
        document_name: name.to_string(),
        page_count: total_pages,
        admitted_workers: workers,
        pages_with_text: pages.iter().filter(|p| p.annotated_text.is_some()).count(),
        failed_pages: pages.iter().filter(|p| p.error.is_some()).count(),
        assets_copied: pages.iter().map(|p| p.assets_copied).sum(),
        unresolved_assets: pages.iter().map(|p| p.unresolved_assets).sum(),
        input_bytes,
        archive_bytes: archive.len() as u64,
        split_duration_ms,
        ocr_duration_ms,
        total_duration_ms: started.elapsed().as_millis() as u64,
    };

    info!(
        "Run complete: {}/{} pages with text, {} failed, {}ms total",
        stats.pages_with_text, stats.page_count, stats.failed_pages, stats.total_duration_ms
    );

    Ok(RunOutput {
        archive,
        markdown,
        pages,
        stats,
    })
}

/// The configured engine, or the MinerU CLI found on this host.
fn resolve_engine(config: &PipelineConfig) -> Result<Arc<dyn OcrEngine>, PipelineError> {
    if let Some(ref engine) = config.engine_override {
        return Ok(Arc::clone(engine));
    }
    let cli = MineruCli::resolve(&config.engine)?;
    debug!("Engine program: {}", cli.program().display());
    Ok(Arc::new(cli))
}

async fn dispatch_pages(
    units: Vec<PageUnit>,
    workers: usize,
    engine: Arc<dyn OcrEngine>,
    arena: Arc<ScratchArena>,
    config: &PipelineConfig,
) -> Vec<PageResult> {
    let page_numbers: Vec<usize> = units.iter().map(|u| u.page_number).collect();
    let total_pages = units.len();
    let ctx = Arc::new(PageContext {
        engine,
        arena,
        settings: config.engine.clone(),
        resource_hint_mb: config.total_budget_mb,
        locator: config.text_locator.clone(),
        annotator: PageAnnotator::new(config.heading_label.clone()),
        keep_page_bundles: config.keep_page_bundles,
        total_pages,
        telemetry: config.telemetry.clone(),
    });

    let outcomes = run_bounded(units, workers, move |unit| process_page(&ctx, unit)).await;

    outcomes
        .into_iter()
        .zip(page_numbers)
        .map(|(outcome, page)| {
            outcome.unwrap_or_else(|detail| {
                let error = PageError::WorkerPanicked { page, detail };
                let msg = error.to_string();
                emit(config.telemetry.as_ref(), "page error", |s| {
                    s.on_page_error(page, total_pages, &msg)
                });
                PageResult::empty(page, Some(error))
            })
        })
        .collect()
}

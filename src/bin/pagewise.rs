//! CLI binary for pagewise-ocr.
//!
//! A thin shim over the library crate that maps CLI flags (and the
//! deployment's environment variables) to `PipelineConfig` and prints
//! results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pagewise_ocr::{
    convert_to_file, AdmissionPolicy, EngineSettings, PipelineConfig, RunRecord, TelemetrySink,
};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI telemetry sink using indicatif ───────────────────────────────────────

/// Terminal progress: a live bar plus one log line per page. Pages complete
/// out of order, so start times are tracked per page.
struct CliTelemetry {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliTelemetry {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Splitting PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("OCR");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self, page: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl TelemetrySink for CliTelemetry {
    fn on_run_start(&self, document_name: &str, page_count: usize, workers: usize) {
        self.activate_bar(page_count);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "{document_name}: {page_count} pages on {workers} worker(s)…"
            ))
        ));
    }

    fn on_page_start(&self, page_number: usize, _total_pages: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page_number, Instant::now());
        }
        self.bar.set_message(format!("page {page_number}"));
    }

    fn on_page_complete(&self, page_number: usize, total_pages: usize, text_len: usize) {
        let secs = self.elapsed_secs(page_number);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<8}  {}",
            green("✓"),
            page_number,
            total_pages,
            dim(&format!("{text_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_number: usize, total_pages: usize, error: &str) {
        let secs = self.elapsed_secs(page_number);
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Engine diagnostics can be long; keep one line per page.
        let first_line = error.lines().next().unwrap_or_default();
        let msg: String = if first_line.chars().count() > 80 {
            first_line.chars().take(79).chain(['…']).collect()
        } else {
            first_line.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page_number,
            total_pages,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, record: &RunRecord) {
        self.bar.finish_and_clear();
        if !record.succeeded {
            return;
        }
        let failed = self.errors.load(Ordering::SeqCst);
        let ok = record.page_count.saturating_sub(failed);
        if failed == 0 {
            eprintln!("{} {} pages processed", green("✔"), bold(&ok.to_string()));
        } else {
            eprintln!(
                "{} {}/{} pages processed  ({} failed)",
                if failed == record.page_count {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&ok.to_string()),
                record.page_count,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r###"EXAMPLES:
  # 8 GB of accelerator memory, up to 4 pages in flight
  pagewise scan.pdf --vram-limit 8192 --concurrency 4

  # Explicit output path and per-worker cost
  pagewise scan.pdf --vram-limit 4096 --concurrency 8 --per-worker-mb 1024 -o out.zip

  # CPU only (no budget accounting)
  pagewise scan.pdf --cpu --concurrency 2

  # From a URL, with a JSON run summary on stdout
  pagewise https://example.com/report.pdf --vram-limit 4096 --concurrency 2 --json

OUTPUT ARCHIVE:
  upload.md             all pages, in order, with "## Page N" headings and anchors
  images/pN_<name>      every referenced image, prefixed by its page
  pages/page_NNNN.zip   the engine's own bundle per page (unless --no-page-bundles)

ENVIRONMENT VARIABLES:
  GPU_ENABLED                  Run the engine on the accelerator (default true)
  GPU_DEVICE                   Accelerator device (default cuda)
  GPU_BACKEND                  Engine backend (default pipeline)
  MINERU_VRAM_PER_WORKER_MB    Default per-worker cost in MB (default 768, min 256)
  MINERU_BIN                   Path to the engine executable
  RUST_LOG                     Log filter override
"###;

/// Page-wise OCR of PDF files through MinerU.
#[derive(Parser, Debug)]
#[command(
    name = "pagewise",
    version,
    about = "Page-wise OCR of PDF files and URLs through MinerU",
    long_about = "Split a PDF into pages, OCR each page with MinerU on a worker pool sized \
from an accelerator-memory budget, and merge the results into one annotated Markdown \
document with its images, packaged as a zip archive.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Write the archive here. Default: `<input stem>_ocr.zip`.
    #[arg(short, long, env = "PAGEWISE_OUTPUT")]
    output: Option<PathBuf>,

    /// Total accelerator memory granted to this run, in MB.
    #[arg(long, env = "PAGEWISE_VRAM_LIMIT_MB", default_value_t = 768,
          value_parser = clap::value_parser!(u64).range(256..))]
    vram_limit: u64,

    /// Requested number of pages in flight.
    #[arg(short, long, env = "PAGEWISE_CONCURRENCY", default_value_t = 1,
          value_parser = clap::value_parser!(u64).range(1..))]
    concurrency: u64,

    /// Cost of one engine worker in MB (overrides the deployment default).
    #[arg(long, value_parser = clap::value_parser!(u64).range(256..))]
    per_worker_mb: Option<u64>,

    /// Deployment default for the per-worker cost, floored at 256.
    #[arg(long, env = "MINERU_VRAM_PER_WORKER_MB", default_value_t = 768)]
    default_per_worker_mb: u64,

    /// Run the engine on the accelerator.
    #[arg(long, env = "GPU_ENABLED", default_value_t = true, action = clap::ArgAction::Set)]
    gpu_enabled: bool,

    /// Shorthand for `--gpu-enabled false`: CPU engine, no budget accounting.
    #[arg(long)]
    cpu: bool,

    /// Accelerator device passed to the engine.
    #[arg(long, env = "GPU_DEVICE", default_value = "cuda")]
    device: String,

    /// Engine backend.
    #[arg(long, env = "GPU_BACKEND", default_value = "pipeline")]
    backend: String,

    /// OCR language hint.
    #[arg(long, env = "PAGEWISE_LANGUAGE", default_value = "latin")]
    language: String,

    /// Engine executable (default: `mineru` on PATH, then `python3 -m mineru.cli.client`).
    #[arg(long, env = "MINERU_BIN")]
    engine: Option<PathBuf>,

    /// Word used in each page heading.
    #[arg(long, env = "PAGEWISE_HEADING_LABEL", default_value = "Page")]
    heading_label: String,

    /// Do not keep each page's engine bundle under `pages/`.
    #[arg(long)]
    no_page_bundles: bool,

    /// Print the run summary (RunOutput without the archive) as JSON on stdout.
    #[arg(long, env = "PAGEWISE_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PAGEWISE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PAGEWISE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PAGEWISE_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PAGEWISE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level logs while it is active.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let telemetry: Option<Arc<dyn TelemetrySink>> = if show_progress {
        Some(CliTelemetry::new() as Arc<dyn TelemetrySink>)
    } else {
        None
    };
    let config = build_config(&cli, telemetry)?;
    let output_path = cli
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&cli.input));

    // ── Run ──────────────────────────────────────────────────────────────
    let output = convert_to_file(&cli.input, &output_path, &config)
        .await
        .with_context(|| format!("OCR of '{}' failed", cli.input))?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    }

    if !cli.quiet {
        let stats = &output.stats;
        eprintln!(
            "{}  {}/{} pages with text  {}ms  →  {}",
            if stats.failed_pages == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            stats.pages_with_text,
            stats.page_count,
            stats.total_duration_ms,
            bold(&output_path.display().to_string()),
        );
        if stats.unresolved_assets > 0 {
            eprintln!(
                "   {}",
                dim(&format!(
                    "{} image reference(s) could not be resolved",
                    stats.unresolved_assets
                ))
            );
        }
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, telemetry: Option<Arc<dyn TelemetrySink>>) -> Result<PipelineConfig> {
    let use_accelerator = cli.gpu_enabled && !cli.cpu;
    let engine = EngineSettings {
        program: cli.engine.clone(),
        use_accelerator,
        device: cli.device.clone(),
        backend: cli.backend.clone(),
        language: cli.language.clone(),
        ..EngineSettings::default()
    };

    let concurrency = usize::try_from(cli.concurrency).context("Concurrency out of range")?;
    let mut builder = PipelineConfig::builder()
        .total_budget_mb(cli.vram_limit)
        .concurrency(concurrency)
        .default_per_worker_mb(cli.default_per_worker_mb)
        .admission_policy(if use_accelerator {
            AdmissionPolicy::Budgeted
        } else {
            AdmissionPolicy::Unbudgeted
        })
        .engine(engine)
        .heading_label(cli.heading_label.clone())
        .keep_page_bundles(!cli.no_page_bundles)
        .download_timeout_secs(cli.download_timeout);

    if let Some(mb) = cli.per_worker_mb {
        builder = builder.per_worker_mb(mb);
    }
    if let Some(sink) = telemetry {
        builder = builder.telemetry(sink);
    }

    builder.build().context("Invalid configuration")
}

/// `<stem>_ocr.zip` in the current directory.
fn default_output_path(input: &str) -> PathBuf {
    let last = input
        .trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let last = last.split(['?', '#']).next().unwrap_or_default();
    let stem = Path::new(last)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "upload".to_string());
    PathBuf::from(format!("{stem}_ocr.zip"))
}

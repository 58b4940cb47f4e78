//! OCR engine abstraction and the MinerU command-line adapter.
//!
//! The engine is an external, black-box program: it is given one
//! single-page PDF and an output directory, and it leaves a bundle (a zip
//! archive) and/or loose files behind. [`OcrEngine`] is the seam; the
//! pipeline only ever talks to `dyn OcrEngine`, so tests substitute an
//! in-process fake and deployments can wrap a different executable.
//!
//! Engine calls are synchronous and run on the blocking pool.

use crate::config::EngineSettings;
use crate::error::PipelineError;
use crate::pipeline::walk_files;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info, warn};

/// One engine invocation for one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRequest {
    /// 1-based page number, for diagnostics.
    pub page_number: usize,
    /// The single-page PDF.
    pub input_page: PathBuf,
    /// Directory the engine writes into. Created before the call.
    pub output_area: PathBuf,
    /// Run on the accelerator rather than the CPU.
    pub use_accelerator: bool,
    pub device: String,
    /// Total run budget in MB, passed through unchanged.
    pub resource_hint_mb: u64,
    pub backend: String,
    pub method: String,
    pub language: String,
}

/// The engine exited unsuccessfully or could not be launched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{diagnostics}")]
pub struct EngineFailure {
    /// Combined stdout/stderr, or a description of the launch failure.
    pub diagnostics: String,
}

impl EngineFailure {
    pub fn new(diagnostics: impl Into<String>) -> Self {
        Self {
            diagnostics: diagnostics.into(),
        }
    }
}

/// An external OCR engine.
///
/// Implementations must be callable from several blocking threads at once.
pub trait OcrEngine: Send + Sync {
    /// Process `request.input_page`, writing results under
    /// `request.output_area`.
    fn run(&self, request: &EngineRequest) -> Result<(), EngineFailure>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "ocr-engine"
    }
}

/// What an engine call left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutcome {
    /// The engine's bundle, when it produced one.
    pub bundle: Option<PathBuf>,
}

/// Run the engine for one page and locate its bundle.
pub fn invoke(engine: &dyn OcrEngine, request: &EngineRequest) -> Result<EngineOutcome, EngineFailure> {
    std::fs::create_dir_all(&request.output_area).map_err(|e| {
        EngineFailure::new(format!(
            "cannot create output area {}: {}",
            request.output_area.display(),
            e
        ))
    })?;

    debug!(
        "Page {}: running {} on {}",
        request.page_number,
        engine.name(),
        request.input_page.display()
    );
    engine.run(request)?;

    let bundle = find_bundle(&request.output_area);
    match &bundle {
        Some(path) => debug!("Page {}: bundle {}", request.page_number, path.display()),
        None => debug!("Page {}: engine left no bundle", request.page_number),
    }
    Ok(EngineOutcome { bundle })
}

/// First `*.zip` under `dir`, preferring names that contain "archive".
pub fn find_bundle(dir: &Path) -> Option<PathBuf> {
    let zips: Vec<PathBuf> = walk_files(dir)
        .ok()?
        .into_iter()
        .filter(|p| {
            p.extension()
                .map(|e| e.eq_ignore_ascii_case("zip"))
                .unwrap_or(false)
        })
        .collect();

    let is_archive = |p: &PathBuf| {
        p.file_name()
            .map(|n| n.to_string_lossy().to_lowercase().contains("archive"))
            .unwrap_or(false)
    };
    zips.iter()
        .find(|p| is_archive(p))
        .or_else(|| zips.first())
        .cloned()
}

// ── MinerU adapter ───────────────────────────────────────────────────────

/// Launches the MinerU CLI as a subprocess.
///
/// ```text
/// mineru -p <page.pdf> -o <out> -m ocr -b <backend> -l <lang> -d <device> --vram <MB>
/// mineru -p <page.pdf> -o <out> -m ocr -b <backend> -l <lang> -d cpu
/// ```
#[derive(Debug, Clone)]
pub struct MineruCli {
    program: PathBuf,
    /// Arguments placed before the engine's own (e.g. `-m mineru.cli.client`).
    prefix_args: Vec<String>,
}

impl MineruCli {
    /// Use an explicit executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    /// Locate the engine from `settings`.
    ///
    /// An explicit `program` must resolve to an executable. Otherwise
    /// `mineru` is looked up on `PATH`, then `python3 -m mineru.cli.client`.
    pub fn resolve(settings: &EngineSettings) -> Result<Self, PipelineError> {
        if let Some(ref program) = settings.program {
            let found = which::which(program).map_err(|e| PipelineError::EngineUnavailable {
                detail: format!("'{}': {}", program.display(), e),
            })?;
            return Ok(Self::with_program(found));
        }

        if let Ok(found) = which::which("mineru") {
            info!("Using MinerU CLI at {}", found.display());
            return Ok(Self::with_program(found));
        }

        match which::which("python3") {
            Ok(python) => {
                warn!("'mineru' not on PATH; falling back to python3 -m mineru.cli.client");
                Ok(Self {
                    program: python,
                    prefix_args: vec!["-m".into(), "mineru.cli.client".into()],
                })
            }
            Err(e) => Err(PipelineError::EngineUnavailable {
                detail: format!("neither 'mineru' nor 'python3' found on PATH: {e}"),
            }),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// The full argument list for `request`, excluding the program.
    pub fn args(&self, request: &EngineRequest) -> Vec<String> {
        let mut args = self.prefix_args.clone();
        args.extend([
            "-p".to_string(),
            request.input_page.to_string_lossy().into_owned(),
            "-o".to_string(),
            request.output_area.to_string_lossy().into_owned(),
            "-m".to_string(),
            request.method.clone(),
            "-b".to_string(),
            request.backend.clone(),
            "-l".to_string(),
            request.language.clone(),
        ]);
        if request.use_accelerator {
            args.extend([
                "-d".to_string(),
                request.device.clone(),
                "--vram".to_string(),
                request.resource_hint_mb.to_string(),
            ]);
        } else {
            args.extend(["-d".to_string(), "cpu".to_string()]);
        }
        args
    }
}

impl OcrEngine for MineruCli {
    fn run(&self, request: &EngineRequest) -> Result<(), EngineFailure> {
        let output = Command::new(&self.program)
            .args(self.args(request))
            .output()
            .map_err(|e| {
                EngineFailure::new(format!("failed to launch {}: {}", self.program.display(), e))
            })?;

        if output.status.success() {
            return Ok(());
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = combined.trim();
        Err(EngineFailure::new(if combined.is_empty() {
            format!("MinerU CLI error ({})", output.status)
        } else {
            combined.to_string()
        }))
    }

    fn name(&self) -> &str {
        "mineru"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn request(dir: &Path, accelerated: bool) -> EngineRequest {
        EngineRequest {
            page_number: 1,
            input_page: dir.join("page_0001.pdf"),
            output_area: dir.join("out"),
            use_accelerator: accelerated,
            device: "cuda".into(),
            resource_hint_mb: 4096,
            backend: "pipeline".into(),
            method: "ocr".into(),
            language: "latin".into(),
        }
    }

    #[test]
    fn accelerated_command_line_carries_budget() {
        let cli = MineruCli::with_program("mineru");
        let args = cli.args(&request(Path::new("/w"), true));
        assert_eq!(
            args,
            vec![
                "-p", "/w/page_0001.pdf", "-o", "/w/out", "-m", "ocr", "-b", "pipeline", "-l",
                "latin", "-d", "cuda", "--vram", "4096"
            ]
        );
    }

    #[test]
    fn cpu_command_line_has_no_budget() {
        let cli = MineruCli {
            program: "python3".into(),
            prefix_args: vec!["-m".into(), "mineru.cli.client".into()],
        };
        let args = cli.args(&request(Path::new("/w"), false));
        assert_eq!(&args[..2], &["-m", "mineru.cli.client"]);
        assert_eq!(&args[args.len() - 2..], &["-d", "cpu"]);
        assert!(!args.iter().any(|a| a == "--vram"));
    }

    #[test]
    fn bundle_prefers_archive_names() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("a")).unwrap();
        fs::write(tmp.path().join("a/result.zip"), b"").unwrap();
        fs::write(tmp.path().join("z_archive.zip"), b"").unwrap();
        assert_eq!(
            find_bundle(tmp.path()).unwrap(),
            tmp.path().join("z_archive.zip")
        );
    }

    #[test]
    fn bundle_falls_back_to_first_zip() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("b.zip"), b"").unwrap();
        fs::write(tmp.path().join("a.ZIP"), b"").unwrap();
        fs::write(tmp.path().join("notes.md"), b"").unwrap();
        assert_eq!(find_bundle(tmp.path()).unwrap(), tmp.path().join("a.ZIP"));
    }

    #[test]
    fn no_bundle_when_engine_leaves_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(find_bundle(tmp.path()), None);
    }

    struct Writes;

    impl OcrEngine for Writes {
        fn run(&self, request: &EngineRequest) -> Result<(), EngineFailure> {
            fs::write(request.output_area.join("upload_archive.zip"), b"PK")
                .map_err(|e| EngineFailure::new(e.to_string()))
        }
    }

    struct Fails;

    impl OcrEngine for Fails {
        fn run(&self, _request: &EngineRequest) -> Result<(), EngineFailure> {
            Err(EngineFailure::new("CUDA out of memory"))
        }
    }

    #[test]
    fn invoke_creates_output_area_and_finds_bundle() {
        let tmp = tempfile::tempdir().unwrap();
        let req = request(tmp.path(), true);
        let outcome = invoke(&Writes, &req).unwrap();
        assert_eq!(outcome.bundle, Some(req.output_area.join("upload_archive.zip")));
    }

    #[test]
    fn invoke_surfaces_engine_diagnostics() {
        let tmp = tempfile::tempdir().unwrap();
        let err = invoke(&Fails, &request(tmp.path(), true)).unwrap_err();
        assert_eq!(err.diagnostics, "CUDA out of memory");
    }

    #[cfg(unix)]
    #[test]
    fn failing_executable_is_an_engine_failure() {
        let Ok(program) = which::which("false") else {
            return;
        };
        let tmp = tempfile::tempdir().unwrap();
        let err = MineruCli::with_program(program)
            .run(&request(tmp.path(), false))
            .unwrap_err();
        assert!(err.diagnostics.contains("MinerU CLI error"), "{}", err.diagnostics);
    }

    #[test]
    fn explicit_missing_program_is_unavailable() {
        let settings = EngineSettings {
            program: Some("/nonexistent/bin/mineru".into()),
            ..EngineSettings::default()
        };
        assert!(matches!(
            MineruCli::resolve(&settings),
            Err(PipelineError::EngineUnavailable { .. })
        ));
    }
}

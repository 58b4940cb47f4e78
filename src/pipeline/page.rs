//! One page, end to end: engine → extraction → annotation.
//!
//! [`process_page`] never fails the run. Every failure is folded into the
//! returned [`PageResult`] as a [`PageError`], and the page contributes no
//! text.

use crate::config::{EngineSettings, TextLocator};
use crate::error::PageError;
use crate::output::{PageResult, PageUnit};
use crate::pipeline::annotate::PageAnnotator;
use crate::pipeline::assemble::write_zip_tree;
use crate::pipeline::engine::{invoke, EngineOutcome, EngineRequest, OcrEngine};
use crate::pipeline::extract::{extract_page, ExtractContext};
use crate::scratch::ScratchArena;
use crate::telemetry::{emit, TelemetrySink};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Everything a worker needs, shared across all pages of a run.
pub struct PageContext {
    pub engine: Arc<dyn OcrEngine>,
    pub arena: Arc<ScratchArena>,
    pub settings: EngineSettings,
    /// Passed to the engine unchanged.
    pub resource_hint_mb: u64,
    pub locator: TextLocator,
    pub annotator: PageAnnotator,
    pub keep_page_bundles: bool,
    pub total_pages: usize,
    pub telemetry: Arc<dyn TelemetrySink>,
}

/// Process one page and report it to telemetry.
pub fn process_page(ctx: &PageContext, unit: PageUnit) -> PageResult {
    let page = unit.page_number;
    let total = ctx.total_pages;
    emit(ctx.telemetry.as_ref(), "page start", |s| s.on_page_start(page, total));

    let start = Instant::now();
    let mut result = match run_page(ctx, &unit) {
        Ok(r) => r,
        Err(e) => {
            warn!("{}", e);
            PageResult::empty(page, Some(e))
        }
    };
    result.duration_ms = start.elapsed().as_millis() as u64;

    let sink = ctx.telemetry.as_ref();
    match (&result.error, &result.annotated_text) {
        (Some(e), _) => {
            let msg = e.to_string();
            emit(sink, "page error", |s| s.on_page_error(page, total, &msg));
        }
        (None, text) => {
            let len = text.as_ref().map(String::len).unwrap_or(0);
            emit(sink, "page complete", |s| s.on_page_complete(page, total, len));
        }
    }
    result
}

fn run_page(ctx: &PageContext, unit: &PageUnit) -> Result<PageResult, PageError> {
    let page = unit.page_number;
    let arena = &ctx.arena;

    let input_page = arena.pages_src().join(unit.file_name());
    std::fs::write(&input_page, &unit.content).map_err(|e| PageError::Io {
        page,
        detail: format!("writing {}: {}", input_page.display(), e),
    })?;

    let output_area = arena.page_output(page);
    let request = EngineRequest {
        page_number: page,
        input_page,
        output_area: output_area.clone(),
        use_accelerator: ctx.settings.use_accelerator,
        device: ctx.settings.device.clone(),
        resource_hint_mb: ctx.resource_hint_mb,
        backend: ctx.settings.backend.clone(),
        method: ctx.settings.method.clone(),
        language: ctx.settings.language.clone(),
    };
    let outcome = invoke(ctx.engine.as_ref(), &request).map_err(|e| PageError::EngineFailed {
        page,
        diagnostics: e.diagnostics,
    })?;

    if ctx.keep_page_bundles {
        keep_page_bundle(&outcome, &output_area, arena, page);
    }

    let images_dir = arena.images_dir();
    let extract_ctx = ExtractContext {
        page_number: page,
        locator: &ctx.locator,
        images_dir: &images_dir,
    };
    let extracted = extract_page(&outcome, &output_area, &arena.page_unpack(page), extract_ctx)?
        .ok_or(PageError::ExtractionMiss { page })?;

    if extracted.unresolved_assets > 0 {
        warn!(
            "Page {}: {} image reference(s) left unresolved",
            page, extracted.unresolved_assets
        );
    }
    debug!(
        "Page {}: {} chars via {:?}, {} image(s) copied",
        page,
        extracted.text.len(),
        extracted.path,
        extracted.assets_copied
    );

    Ok(PageResult {
        page_number: page,
        annotated_text: Some(ctx.annotator.annotate(&extracted.text, page)),
        extraction: Some(extracted.path),
        assets_copied: extracted.assets_copied,
        unresolved_assets: extracted.unresolved_assets,
        duration_ms: 0,
        error: None,
    })
}

/// Save the engine's bundle (or a zip of its output) under `pages/`.
fn keep_page_bundle(outcome: &EngineOutcome, output_area: &Path, arena: &ScratchArena, page: usize) {
    let dest = arena.page_bundles_dir().join(format!("page_{page:04}.zip"));
    let saved = std::fs::create_dir_all(arena.page_bundles_dir()).and_then(|_| match outcome.bundle {
        Some(ref bundle) => std::fs::copy(bundle, &dest).map(|_| ()),
        None => write_zip_tree(output_area, &dest),
    });
    if let Err(e) = saved {
        warn!("Page {}: could not keep page bundle: {}", page, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::assets::tests::zip_bytes;
    use crate::pipeline::engine::EngineFailure;
    use crate::telemetry::{NoopTelemetry, RunRecord};
    use std::sync::Mutex;

    struct BundleEngine(&'static str);

    impl OcrEngine for BundleEngine {
        fn run(&self, req: &EngineRequest) -> Result<(), EngineFailure> {
            let bytes = zip_bytes(&[
                ("page/ocr/upload.md", self.0),
                ("page/ocr/images/fig.png", "PNG"),
            ]);
            std::fs::write(req.output_area.join("page_archive.zip"), bytes)
                .map_err(|e| EngineFailure::new(e.to_string()))
        }
    }

    struct LooseEngine;

    impl OcrEngine for LooseEngine {
        fn run(&self, req: &EngineRequest) -> Result<(), EngineFailure> {
            let dir = req.output_area.join("auto");
            std::fs::create_dir_all(&dir).map_err(|e| EngineFailure::new(e.to_string()))?;
            std::fs::write(dir.join("result.md"), "loose text")
                .map_err(|e| EngineFailure::new(e.to_string()))
        }
    }

    struct SilentEngine;

    impl OcrEngine for SilentEngine {
        fn run(&self, _req: &EngineRequest) -> Result<(), EngineFailure> {
            Ok(())
        }
    }

    struct BrokenEngine;

    impl OcrEngine for BrokenEngine {
        fn run(&self, _req: &EngineRequest) -> Result<(), EngineFailure> {
            Err(EngineFailure::new("segfault in layout model"))
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl TelemetrySink for Recorder {
        fn on_page_start(&self, page: usize, _total: usize) {
            self.0.lock().unwrap().push(format!("start {page}"));
        }
        fn on_page_complete(&self, page: usize, _total: usize, _len: usize) {
            self.0.lock().unwrap().push(format!("done {page}"));
        }
        fn on_page_error(&self, page: usize, _total: usize, _error: &str) {
            self.0.lock().unwrap().push(format!("error {page}"));
        }
        fn on_run_complete(&self, _record: &RunRecord) {}
    }

    fn context(engine: Arc<dyn OcrEngine>, telemetry: Option<Arc<dyn TelemetrySink>>) -> PageContext {
        PageContext {
            engine,
            arena: Arc::new(ScratchArena::new().unwrap()),
            settings: EngineSettings::default(),
            resource_hint_mb: 4096,
            locator: TextLocator::default(),
            annotator: PageAnnotator::default(),
            keep_page_bundles: true,
            total_pages: 2,
            telemetry: telemetry.unwrap_or_else(|| Arc::new(NoopTelemetry)),
        }
    }

    fn unit(n: usize) -> PageUnit {
        PageUnit {
            page_number: n,
            content: b"%PDF-1.5 single page".to_vec(),
        }
    }

    #[test]
    fn bundle_page_is_annotated_and_kept() {
        let ctx = context(Arc::new(BundleEngine("Hello ![f](images/fig.png)")), None);
        let r = process_page(&ctx, unit(2));
        assert!(r.error.is_none(), "{:?}", r.error);
        let text = r.annotated_text.unwrap();
        assert!(text.starts_with("## Page 2 <a id=\"p2\"></a>"));
        assert!(text.contains("Hello ![f](images/p2_fig.png)\n [p2](#p2)"));
        assert_eq!(r.assets_copied, 1);
        assert!(ctx.arena.images_dir().join("p2_fig.png").is_file());
        assert!(ctx.arena.page_bundles_dir().join("page_0002.zip").is_file());
    }

    #[test]
    fn loose_output_is_zipped_as_page_bundle() {
        let ctx = context(Arc::new(LooseEngine), None);
        let r = process_page(&ctx, unit(1));
        assert!(r.annotated_text.unwrap().contains("loose text"));
        assert!(ctx.arena.page_bundles_dir().join("page_0001.zip").is_file());
    }

    #[test]
    fn engine_failure_is_page_scoped() {
        let recorder = Arc::new(Recorder::default());
        let ctx = context(Arc::new(BrokenEngine), Some(recorder.clone() as Arc<dyn TelemetrySink>));
        let r = process_page(&ctx, unit(1));
        assert!(r.annotated_text.is_none());
        match r.error {
            Some(PageError::EngineFailed { page, diagnostics }) => {
                assert_eq!(page, 1);
                assert_eq!(diagnostics, "segfault in layout model");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(*recorder.0.lock().unwrap(), vec!["start 1", "error 1"]);
    }

    #[test]
    fn no_artifact_is_an_extraction_miss() {
        let ctx = context(Arc::new(SilentEngine), None);
        let r = process_page(&ctx, unit(1));
        assert!(matches!(r.error, Some(PageError::ExtractionMiss { page: 1 })));
    }

    #[test]
    fn success_reports_completion() {
        let recorder = Arc::new(Recorder::default());
        let ctx = context(Arc::new(BundleEngine("x")), Some(recorder.clone() as Arc<dyn TelemetrySink>));
        process_page(&ctx, unit(2));
        assert_eq!(*recorder.0.lock().unwrap(), vec!["start 2", "done 2"]);
    }
}

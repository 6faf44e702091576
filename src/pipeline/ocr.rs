//! OCR dispatch: one engine invocation per non-blank page.
//!
//! Two strategies produce the per-page text-layer PDF:
//!
//! * **Direct** — the engine writes a text-bearing PDF itself. Engines with
//!   the `textonly_pdf` capability emit text-only pages; older ones embed
//!   their own copy of the raster, which is stripped afterwards
//!   ([`crate::pdfops::strip_embedded_images`]) since the pipeline already
//!   owns that image.
//! * **Geometry** — the engine writes hOCR, which
//!   [`crate::textpdf::synthesize_text_page`] turns into an invisible-text
//!   page.
//!
//! Failure policy: a page whose recognition yields nothing gets one retry
//! with the fallback language (engines occasionally fail on exotic language
//! packs but succeed on the default), then a correctly-sized textless page.
//! No page failure ever aborts the document; the anomalies come back as
//! [`PageError`]s in the run output.

use crate::config::{PipelineConfig, TextStrategy};
use crate::error::{OcrSandwichError, PageError};
use crate::hocr;
use crate::pdfops;
use crate::pipeline::classify::PageImage;
use crate::progress::{self, Stage};
use crate::textpdf;
use crate::tools::{run_tool, Toolchain};
use crate::workspace::{Workspace, OCR_PREFIX};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Run OCR across all pages, writing one `ocr-<index>.pdf` per page into
/// the workspace (blank pages included, as textless same-size pages).
///
/// Returns the per-page anomalies that were absorbed.
pub async fn dispatch(
    pages: &[PageImage],
    ws: &Workspace,
    tools: &Toolchain,
    config: &PipelineConfig,
) -> Result<Vec<PageError>, OcrSandwichError> {
    let total = pages.len();
    progress::stage_start(&config.progress, Stage::Ocr, total);
    info!(
        "running OCR on {} pages ({} strategy)",
        pages.iter().filter(|p| !p.blank).count(),
        match config.text_strategy {
            TextStrategy::Direct => "direct",
            TextStrategy::Geometry => "geometry",
        }
    );

    let results: Vec<Result<Option<PageError>, OcrSandwichError>> =
        stream::iter(pages.iter().map(|page| {
            let progress = config.progress.clone();
            async move {
                let outcome = if page.blank {
                    synthesize_blank_slot(page, ws, config.dpi)?;
                    None
                } else {
                    ocr_one_page(page, ws, tools, config).await?
                };
                progress::page_done(&progress, Stage::Ocr, page.index, total);
                Ok(outcome)
            }
        }))
        .buffer_unordered(config.workers())
        .collect()
        .await;

    let mut errors = Vec::new();
    for result in results {
        if let Some(err) = result? {
            errors.push(err);
        }
    }
    errors.sort_by_key(|e| e.page());
    if !errors.is_empty() {
        warn!("{} pages fell back to a textless slot", errors.len());
    }
    progress::stage_complete(&config.progress, Stage::Ocr);
    Ok(errors)
}

/// Blank pages never reach the engine; their slot in the text layer is a
/// textless page matching the raster's dimensions.
fn synthesize_blank_slot(
    page: &PageImage,
    ws: &Workspace,
    dpi: u32,
) -> Result<(), OcrSandwichError> {
    let mut doc = textpdf::blank_page(page.width, page.height, dpi);
    let out = ws.indexed_file(OCR_PREFIX, page.index, "pdf");
    pdfops::save(&mut doc, &out)
}

/// OCR one page, absorbing every failure into a textless fallback.
async fn ocr_one_page(
    page: &PageImage,
    ws: &Workspace,
    tools: &Toolchain,
    config: &PipelineConfig,
) -> Result<Option<PageError>, OcrSandwichError> {
    let attempt = run_engine(page, ws, tools, config, &config.languages).await;

    let attempt = match attempt {
        EngineOutcome::Produced => EngineOutcome::Produced,
        EngineOutcome::Nothing(detail) => {
            if config.languages != config.fallback_language {
                warn!(
                    "page {}: no OCR output with '{}', retrying with '{}'",
                    page.index, config.languages, config.fallback_language
                );
                run_engine(page, ws, tools, config, &config.fallback_language).await
            } else {
                EngineOutcome::Nothing(detail)
            }
        }
    };

    match attempt {
        EngineOutcome::Produced => match config.text_strategy {
            TextStrategy::Direct => finish_direct(page, ws, tools).await,
            TextStrategy::Geometry => finish_geometry(page, ws, config),
        },
        EngineOutcome::Nothing(detail) => {
            warn!("page {}: OCR failed, slot will carry no text", page.index);
            synthesize_blank_slot(page, ws, config.dpi)?;
            Ok(Some(PageError::OcrFailed {
                page: page.index,
                detail,
            }))
        }
    }
}

enum EngineOutcome {
    /// The expected artifact (PDF or hOCR) exists.
    Produced,
    /// The engine ran but the artifact is missing; carries the diagnostic.
    Nothing(String),
}

/// One engine invocation; success is defined by the artifact existing, not
/// by the exit code alone (engines exit zero and write nothing more often
/// than the other way round).
async fn run_engine(
    page: &PageImage,
    ws: &Workspace,
    tools: &Toolchain,
    config: &PipelineConfig,
    languages: &str,
) -> EngineOutcome {
    let base = ws.file(Workspace::indexed_base(OCR_PREFIX, page.index));

    let mut args: Vec<String> = config.extra_ocr_args.clone();
    args.extend(["-l".into(), languages.to_string()]);
    match config.text_strategy {
        TextStrategy::Direct => {
            args.extend(["-c".into(), "tessedit_create_pdf=1".into()]);
            if tools.ocr_textonly_pdf {
                args.extend(["-c".into(), "textonly_pdf=1".into()]);
            }
        }
        TextStrategy::Geometry => {
            args.extend(["-c".into(), "tessedit_create_hocr=1".into()]);
        }
    }
    args.extend([
        "-c".into(),
        "tessedit_create_txt=1".into(),
        "-c".into(),
        format!("tessedit_pageseg_mode={}", config.psm),
        page.path.display().to_string(),
        base.display().to_string(),
    ]);

    let run = run_tool(&tools.ocr, &args, None).await;
    let artifact = match config.text_strategy {
        TextStrategy::Direct => ws.indexed_file(OCR_PREFIX, page.index, "pdf"),
        TextStrategy::Geometry => ws.indexed_file(OCR_PREFIX, page.index, "hocr"),
    };

    match run {
        Ok(out) if artifact.is_file() => {
            if !out.success {
                warn!(
                    "page {}: engine exited non-zero but produced output",
                    page.index
                );
            }
            EngineOutcome::Produced
        }
        Ok(out) => EngineOutcome::Nothing(if out.stderr.is_empty() {
            "engine produced no output artifact".into()
        } else {
            out.stderr
        }),
        Err(e) => EngineOutcome::Nothing(e.to_string()),
    }
}

/// Direct strategy epilogue: shrink the engine PDF down to text only.
async fn finish_direct(
    page: &PageImage,
    ws: &Workspace,
    tools: &Toolchain,
) -> Result<Option<PageError>, OcrSandwichError> {
    if tools.ocr_textonly_pdf {
        return Ok(None);
    }
    let pdf = ws.indexed_file(OCR_PREFIX, page.index, "pdf");
    let stripped = tokio::task::spawn_blocking(move || pdfops::strip_embedded_images(&pdf))
        .await
        .map_err(|e| OcrSandwichError::Internal(format!("strip task panicked: {e}")))?;
    if let Err(e) = stripped {
        // A PDF we cannot strip is still a usable text layer, just bigger.
        warn!("page {}: could not strip embedded image: {e}", page.index);
    }
    Ok(None)
}

/// Geometry strategy epilogue: hOCR → invisible-text page.
fn finish_geometry(
    page: &PageImage,
    ws: &Workspace,
    config: &PipelineConfig,
) -> Result<Option<PageError>, OcrSandwichError> {
    let hocr_path = ws.indexed_file(OCR_PREFIX, page.index, "hocr");
    let out = ws.indexed_file(OCR_PREFIX, page.index, "pdf");

    match read_geometry(&hocr_path) {
        Ok(geo) => {
            let mut doc = textpdf::synthesize_text_page(&geo, config.synthesis_dpi, config.debug_boxes);
            pdfops::save(&mut doc, &out)?;
            Ok(None)
        }
        Err(e) => {
            // Substitute the configured default page size; the page merges
            // with no text.
            warn!("page {}: {e}; using default page size", page.index);
            let (w, h) = config.fallback_page_px;
            let mut doc = textpdf::blank_page(w, h, config.synthesis_dpi);
            pdfops::save(&mut doc, &out)?;
            Ok(Some(PageError::GeometryMissing { page: page.index }))
        }
    }
}

fn read_geometry(path: &Path) -> Result<hocr::RecognitionGeometry, hocr::HocrError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| hocr::HocrError::Malformed(e.to_string()))?;
    hocr::parse(&text)
}

/// Concatenate per-page `.txt` outputs in page order into the sidecar file.
pub fn write_text_sidecar(
    pages: &[PageImage],
    ws: &Workspace,
    sidecar: &Path,
) -> Result<(), OcrSandwichError> {
    let mut combined = Vec::new();
    for page in pages {
        let txt = ws.indexed_file(OCR_PREFIX, page.index, "txt");
        if let Ok(bytes) = std::fs::read(&txt) {
            combined.extend_from_slice(&bytes);
        }
    }
    std::fs::write(sidecar, combined).map_err(|e| OcrSandwichError::OutputWrite {
        path: sidecar.to_path_buf(),
        source: e,
    })?;
    info!("created text sidecar {}", sidecar.display());
    Ok(())
}

/// Paths of the per-page OCR-layer PDFs, index-aligned with `pages`.
pub fn layer_paths(pages: &[PageImage], ws: &Workspace) -> Vec<PathBuf> {
    pages
        .iter()
        .map(|p| ws.indexed_file(OCR_PREFIX, p.index, "pdf"))
        .collect()
}

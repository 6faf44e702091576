//! Per-document orchestration and the batch driver.
//!
//! [`run_document`] walks one input through the full stage sequence:
//!
//! ```text
//! validate ──▶ decide path ──▶ define outputs ──▶ rasterize ──▶ classify
//!     ──▶ preprocess ──▶ OCR ──▶ aggregate ──▶ merge ──▶ rotate ──▶ metadata
//! ```
//!
//! with exactly one of two assembly paths executing per document: the direct
//! merge against the original PDF, or the full rebuild from raster pages.
//! The temporary workspace is owned by this function's future; dropping it —
//! normal return, fatal error, or timeout cancellation — releases the
//! workspace and kills any external process still in flight
//! (`kill_on_drop` on every spawned command).
//!
//! [`run_batch`] processes documents sequentially, each with its own
//! workspace and its own failure domain: one document's error never touches
//! the next.

use crate::config::PipelineConfig;
use crate::document::{InputKind, SourceDocument};
use crate::error::OcrSandwichError;
use crate::output::{AssemblyPath, BatchOutput, RunOutput, RunStats};
use crate::pdfops;
use crate::pipeline::{classify, merge, ocr, preprocess, raster, rebuild};
use crate::progress::{self, Stage};
use crate::tools::{run_tool, Toolchain};
use crate::workspace::Workspace;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Process one input into a searchable sandwich PDF.
///
/// Returns `Ok(RunOutput)` even when individual pages fell back to textless
/// slots (check [`RunOutput::page_errors`]); returns `Err` only for fatal
/// conditions that prevented producing an output at all.
pub async fn run_document(
    input: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<RunOutput, OcrSandwichError> {
    let input = input.as_ref();
    match config.timeout {
        Some(budget) => {
            let secs = budget.as_secs();
            match tokio::time::timeout(budget, run_inner(input, config)).await {
                Ok(result) => result,
                Err(_) => {
                    // The inner future was dropped: children killed, the
                    // workspace guard released.
                    warn!("document timed out after {secs}s");
                    Err(OcrSandwichError::TimeoutExceeded { secs })
                }
            }
        }
        None => run_inner(input, config).await,
    }
}

/// Process a batch of inputs sequentially.
///
/// Fatal errors are collected per document; the batch always runs to the
/// end. Callers map [`BatchOutput::all_succeeded`] onto their exit status.
pub async fn run_batch(inputs: &[PathBuf], config: &PipelineConfig) -> BatchOutput {
    let mut results = Vec::with_capacity(inputs.len());
    for input in inputs {
        info!("processing {}", input.display());
        let result = run_document(input, config).await;
        if let Err(ref e) = result {
            warn!("{}: {e}", input.display());
        }
        results.push((input.clone(), result));
    }
    BatchOutput { results }
}

async fn run_inner(
    input: &Path,
    config: &PipelineConfig,
) -> Result<RunOutput, OcrSandwichError> {
    let started = Instant::now();

    // ── Validate ─────────────────────────────────────────────────────────
    let document = SourceDocument::open(input)?;
    check_guards(&document, config)?;

    // ── Decide path ──────────────────────────────────────────────────────
    let rebuild_path = document.encrypted
        || document.kind.is_raster()
        || config.deskew_percent.is_some()
        || config.force_rebuild;
    if rebuild_path && config.ignore_existing_text {
        return Err(OcrSandwichError::RebuildConflict);
    }
    let assembly = if rebuild_path {
        AssemblyPath::Rebuild
    } else {
        AssemblyPath::Direct
    };
    debug!("assembly path: {assembly:?}");

    let tools = Toolchain::discover(config).await?;

    // ── Define outputs ───────────────────────────────────────────────────
    let output_pdf = resolve_output_path(&document.path, config);
    let sidecar = output_pdf.with_extension("pdf.txt");
    if config.safe_mode {
        if output_pdf.exists() {
            return Err(OcrSandwichError::OutputExists { path: output_pdf });
        }
        if config.text_sidecar && sidecar.exists() {
            return Err(OcrSandwichError::OutputExists { path: sidecar });
        }
    }
    best_effort_remove(&output_pdf);
    if config.text_sidecar {
        best_effort_remove(&sidecar);
    }
    debug!(
        "output file: {} (sidecar: {})",
        output_pdf.display(),
        sidecar.display()
    );

    let ws = Workspace::create(config.keep_temps)?;
    if let Some(cb) = &config.progress {
        cb.on_document_start(&document.path, document.page_count);
    }

    // ── Rasterize ────────────────────────────────────────────────────────
    let raster_started = Instant::now();
    progress::stage_start(&config.progress, Stage::Rasterize, 0);
    let raster_input = prepare_raster_input(&document, &ws, &tools, config).await?;
    let images = raster::rasterize(&document, &raster_input, &ws, &tools, config).await?;
    progress::stage_complete(&config.progress, Stage::Rasterize);
    let raster_duration_ms = raster_started.elapsed().as_millis() as u64;

    let total_pages = document.page_count.unwrap_or(images.len());
    if let Some(limit) = config.max_pages {
        // Re-check for documents whose page count was unknown upfront.
        if total_pages > limit {
            return Err(OcrSandwichError::TooManyPages {
                pages: total_pages,
                limit,
            });
        }
    }

    // ── Classify ─────────────────────────────────────────────────────────
    let pages = classify::classify_pages(images, config.workers(), &config.progress).await?;

    // ── Preprocess ───────────────────────────────────────────────────────
    if let Some(threshold) = config.deskew_threshold() {
        preprocess::deskew(&pages, &threshold, &tools, config).await?;
    }
    if config.autorotate {
        preprocess::detect_orientation(&pages, &ws, &tools, config).await?;
    }

    // ── OCR + aggregate text layer ───────────────────────────────────────
    let ocr_started = Instant::now();
    let mut page_errors = Vec::new();
    let text_layer = if config.ocr_enabled {
        page_errors = ocr::dispatch(&pages, &ws, &tools, config).await?;

        if config.text_sidecar {
            ocr::write_text_sidecar(&pages, &ws, &sidecar)?;
        }

        progress::stage_start(&config.progress, Stage::Aggregate, 0);
        let layer_paths: Vec<PathBuf> = ocr::layer_paths(&pages, &ws)
            .into_iter()
            .filter(|p| p.is_file())
            .collect();
        if layer_paths.is_empty() {
            return Err(OcrSandwichError::NothingToAggregate { kind: "OCR-layer" });
        }
        let layer = ws.file("text-layer.pdf");
        let mut aggregated = aggregate(&layer_paths).await?;
        pdfops::save(&mut aggregated, &layer)?;
        progress::stage_complete(&config.progress, Stage::Aggregate);
        info!("aggregated {} OCR pages", layer_paths.len());
        Some(layer)
    } else {
        info!("OCR skipped");
        None
    };
    let ocr_duration_ms = if config.ocr_enabled {
        ocr_started.elapsed().as_millis() as u64
    } else {
        0
    };

    // ── Merge (exactly one strategy) ─────────────────────────────────────
    progress::stage_start(&config.progress, Stage::Merge, 0);
    let merged = ws.file("merged.pdf");
    let mut repaired = false;
    match assembly {
        AssemblyPath::Direct => match &text_layer {
            Some(layer) => {
                repaired = merge::sandwich(&document.path, layer, &merged, &ws, &tools).await?;
            }
            None => {
                copy_file(&document.path, &merged).await?;
            }
        },
        AssemblyPath::Rebuild => {
            let rebuilt_pages = rebuild::rebuild_pages(&pages, &ws, &tools, config).await?;
            let rebuilt = ws.file("rebuilt.pdf");
            let mut aggregated = aggregate(&rebuilt_pages).await.map_err(|e| {
                OcrSandwichError::RebuildFailed {
                    detail: e.to_string(),
                }
            })?;
            pdfops::save(&mut aggregated, &rebuilt)?;

            match &text_layer {
                Some(layer) => {
                    repaired = merge::sandwich(&rebuilt, layer, &merged, &ws, &tools).await?;
                }
                None => {
                    copy_file(&rebuilt, &merged).await?;
                }
            }
        }
    }
    if !merged.is_file() {
        return Err(OcrSandwichError::MergeFailed {
            detail: "no merged output was produced".into(),
        });
    }
    progress::stage_complete(&config.progress, Stage::Merge);

    // ── Rotate ───────────────────────────────────────────────────────────
    progress::stage_start(&config.progress, Stage::Rotate, 0);
    let rotated = ws.file("rotated.pdf");
    let mut rotation_applied = false;
    if config.autorotate {
        match preprocess::collect_rotations(&pages, &ws) {
            Some(records) if records.len() == total_pages => {
                let angles: Vec<i64> = records.iter().map(|r| r.angle).collect();
                let source = merged.clone();
                let result = tokio::task::spawn_blocking({
                    let rotated = rotated.clone();
                    move || pdfops::apply_rotations(&source, &rotated, &angles)
                })
                .await
                .map_err(|e| OcrSandwichError::Internal(format!("rotate task panicked: {e}")))?;
                result?;
                rotation_applied = true;
            }
            _ => {
                warn!(
                    "skipping rotation: orientation reports were not generated for every page"
                );
                copy_file(&merged, &rotated).await?;
            }
        }
    } else {
        copy_file(&merged, &rotated).await?;
    }
    progress::stage_complete(&config.progress, Stage::Rotate);

    // ── Metadata ─────────────────────────────────────────────────────────
    progress::stage_start(&config.progress, Stage::Metadata, 0);
    // The rebuild path reconstructs every page from raster images; whatever
    // metadata the source carried does not describe the rebuilt file.
    let metadata: BTreeMap<String, Vec<u8>> = match assembly {
        AssemblyPath::Direct => document.metadata.clone(),
        AssemblyPath::Rebuild => BTreeMap::new(),
    };
    let final_result = tokio::task::spawn_blocking({
        let rotated = rotated.clone();
        let output_pdf = output_pdf.clone();
        move || pdfops::edit_metadata(&rotated, &output_pdf, &metadata)
    })
    .await
    .map_err(|e| OcrSandwichError::Internal(format!("metadata task panicked: {e}")))?;
    final_result?;
    progress::stage_complete(&config.progress, Stage::Metadata);
    info!("output file created: {}", output_pdf.display());

    if let Some(cb) = &config.progress {
        cb.on_document_complete(&document.path, true);
    }

    let stats = RunStats {
        pages: total_pages,
        blank_pages: pages.iter().filter(|p| p.blank).count(),
        failed_pages: page_errors.len(),
        assembly,
        rotation_applied,
        repaired,
        total_duration_ms: started.elapsed().as_millis() as u64,
        raster_duration_ms,
        ocr_duration_ms,
    };
    info!(
        "done in {:.3}s ({} pages, {} blank, {} fallbacks)",
        stats.total_duration_ms as f64 / 1000.0,
        stats.pages,
        stats.blank_pages,
        stats.failed_pages
    );

    Ok(RunOutput {
        output_pdf,
        sidecar_text: if config.text_sidecar {
            Some(sidecar)
        } else {
            None
        },
        stats,
        page_errors,
    })
}

/// Input-level guards, all fatal before any stage work starts.
fn check_guards(
    document: &SourceDocument,
    config: &PipelineConfig,
) -> Result<(), OcrSandwichError> {
    if let Some(limit_kb) = config.min_kbytes {
        let kbytes = document.size_bytes / 1024;
        if kbytes < limit_kb {
            return Err(OcrSandwichError::FileTooSmall {
                kbytes,
                limit_kb,
            });
        }
    }
    if let (Some(limit), Some(pages)) = (config.max_pages, document.page_count) {
        if pages > limit {
            return Err(OcrSandwichError::TooManyPages { pages, limit });
        }
    }
    if config.check_protection && document.encrypted {
        return Err(OcrSandwichError::InputEncrypted {
            path: document.path.clone(),
        });
    }
    if config.check_text && document.kind == InputKind::Pdf && document.has_text {
        return Err(OcrSandwichError::InputHasText {
            path: document.path.clone(),
        });
    }
    Ok(())
}

/// `<stem>-OCR.pdf` beside the input, unless a file or directory was forced.
fn resolve_output_path(input: &Path, config: &PipelineConfig) -> PathBuf {
    if let Some(ref forced) = config.output_file {
        return forced.clone();
    }
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".into());
    let dir = config
        .output_dir
        .clone()
        .or_else(|| input.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."));
    dir.join(format!("{stem}-OCR.pdf"))
}

/// Strip existing text from the input when requested; otherwise the input
/// itself feeds the rasterizer.
async fn prepare_raster_input(
    document: &SourceDocument,
    ws: &Workspace,
    tools: &Toolchain,
    config: &PipelineConfig,
) -> Result<PathBuf, OcrSandwichError> {
    if !config.ignore_existing_text || document.kind != InputKind::Pdf {
        return Ok(document.path.clone());
    }
    let gs = tools.ghostscript.as_ref().ok_or_else(|| {
        OcrSandwichError::Internal("ignore-existing-text requested but gs was not resolved".into())
    })?;
    let filtered = ws.file("filtered-input.pdf");
    let args: Vec<String> = vec![
        "-o".into(),
        filtered.display().to_string(),
        "-sDEVICE=pdfwrite".into(),
        "-dFILTERTEXT".into(),
        document.path.display().to_string(),
    ];
    let out = run_tool(gs, &args, None).await?;
    if !out.success || !filtered.is_file() {
        return Err(OcrSandwichError::RasterizeFailed {
            detail: format!("could not filter existing text: {}", out.stderr),
        });
    }
    info!("existing text stripped before rasterization");
    Ok(filtered)
}

/// Concatenate per-page PDFs off the async threads.
async fn aggregate(paths: &[PathBuf]) -> Result<lopdf::Document, OcrSandwichError> {
    let paths = paths.to_vec();
    tokio::task::spawn_blocking(move || pdfops::concat_documents(&paths))
        .await
        .map_err(|e| OcrSandwichError::Internal(format!("aggregate task panicked: {e}")))?
}

async fn copy_file(from: &Path, to: &Path) -> Result<(), OcrSandwichError> {
    tokio::fs::copy(from, to)
        .await
        .map(|_| ())
        .map_err(|e| OcrSandwichError::OutputWrite {
            path: to.to_path_buf(),
            source: e,
        })
}

fn best_effort_remove(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("could not remove {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_path_defaults_beside_input() {
        let config = PipelineConfig::builder().build().unwrap();
        let out = resolve_output_path(Path::new("/data/scans/report.pdf"), &config);
        assert_eq!(out, PathBuf::from("/data/scans/report-OCR.pdf"));
    }

    #[test]
    fn output_path_honours_forced_directory() {
        let config = PipelineConfig::builder().output_dir("/out").build().unwrap();
        let out = resolve_output_path(Path::new("/data/scans/report.pdf"), &config);
        assert_eq!(out, PathBuf::from("/out/report-OCR.pdf"));
    }

    #[test]
    fn output_path_honours_forced_file() {
        let config = PipelineConfig::builder()
            .output_file("/tmp/exact.pdf")
            .build()
            .unwrap();
        let out = resolve_output_path(Path::new("/data/report.pdf"), &config);
        assert_eq!(out, PathBuf::from("/tmp/exact.pdf"));
    }

    #[test]
    fn guards_reject_small_files() {
        let config = PipelineConfig::builder().min_kbytes(10).build().unwrap();
        let doc = SourceDocument {
            path: PathBuf::from("a.pdf"),
            kind: InputKind::Pdf,
            size_bytes: 1024,
            page_count: Some(1),
            encrypted: false,
            has_text: false,
            metadata: BTreeMap::new(),
        };
        assert!(matches!(
            check_guards(&doc, &config),
            Err(OcrSandwichError::FileTooSmall { .. })
        ));
    }

    #[test]
    fn guards_reject_high_page_counts() {
        let config = PipelineConfig::builder().max_pages(10).build().unwrap();
        let doc = SourceDocument {
            path: PathBuf::from("a.pdf"),
            kind: InputKind::Pdf,
            size_bytes: 1 << 20,
            page_count: Some(11),
            encrypted: false,
            has_text: false,
            metadata: BTreeMap::new(),
        };
        assert!(matches!(
            check_guards(&doc, &config),
            Err(OcrSandwichError::TooManyPages { .. })
        ));
    }

    #[test]
    fn guards_reject_encrypted_when_protection_checked() {
        let config = PipelineConfig::builder().check_protection(true).build().unwrap();
        let doc = SourceDocument {
            path: PathBuf::from("a.pdf"),
            kind: InputKind::Pdf,
            size_bytes: 1 << 20,
            page_count: Some(1),
            encrypted: true,
            has_text: false,
            metadata: BTreeMap::new(),
        };
        assert!(matches!(
            check_guards(&doc, &config),
            Err(OcrSandwichError::InputEncrypted { .. })
        ));
    }

    #[test]
    fn guards_reject_text_bearing_input_when_checked() {
        let config = PipelineConfig::builder().check_text(true).build().unwrap();
        let doc = SourceDocument {
            path: PathBuf::from("a.pdf"),
            kind: InputKind::Pdf,
            size_bytes: 1 << 20,
            page_count: Some(1),
            encrypted: false,
            has_text: true,
            metadata: BTreeMap::new(),
        };
        assert!(matches!(
            check_guards(&doc, &config),
            Err(OcrSandwichError::InputHasText { .. })
        ));
    }
}

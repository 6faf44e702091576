//! Rasterization: one image file per page, produced by the external
//! raster tool over contiguous page ranges.
//!
//! ## Why ranges instead of one call per page?
//!
//! The raster tool amortizes document open/parse cost across a range, so
//! carving the document into `ceil(pages/workers)`-sized chunks gets all
//! cores busy without paying that cost per page. Below 20 pages the chunking
//! overhead exceeds the win and a single sequential call does the job.

use crate::config::PipelineConfig;
use crate::document::{InputKind, SourceDocument};
use crate::error::OcrSandwichError;
use crate::tools::{run_tool, Toolchain};
use crate::workspace::{Workspace, RASTER_EXT, RASTER_PREFIX};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use tracing::{debug, info};

/// Inclusive 1-based page range assigned to one rasterizer invocation.
pub type PageRange = (u32, u32);

/// Split `total` pages into contiguous ranges for `workers` parallel
/// rasterizer calls.
///
/// Returns `None` when the page count is unknown or below 20 — a single
/// sequential call without a range covers those. The ranges' combined
/// coverage is re-verified; a mismatch is a defect in this function, not a
/// user-facing condition.
pub fn plan_ranges(total: Option<usize>, workers: usize) -> Option<Vec<PageRange>> {
    let total = total?;
    if total < 20 {
        return None;
    }
    let workers = workers.max(1);
    let range_size = total.div_ceil(workers);
    let range_count = total.div_ceil(range_size);

    let mut ranges = Vec::with_capacity(range_count);
    for i in 0..range_count {
        let start = (range_size * i) + 1;
        let end = ((range_size * i) + range_size).min(total);
        ranges.push((start as u32, end as u32));
    }

    let covered: usize = ranges.iter().map(|(s, e)| (e - s + 1) as usize).sum();
    assert_eq!(
        covered, total,
        "page range partition does not cover the document"
    );
    Some(ranges)
}

/// Rasterize the whole document into the workspace.
///
/// Returns the produced page images keyed by their parsed page index, in
/// page order. Any failed tool invocation fails the document.
pub async fn rasterize(
    doc: &SourceDocument,
    input: &std::path::Path,
    ws: &Workspace,
    tools: &Toolchain,
    config: &PipelineConfig,
) -> Result<Vec<(u32, PathBuf)>, OcrSandwichError> {
    match doc.kind {
        InputKind::Pdf => rasterize_pdf(doc, input, ws, tools, config).await?,
        _ => explode_image(input, ws, tools).await?,
    }

    let images = ws.list_indexed(RASTER_PREFIX, RASTER_EXT)?;
    if images.is_empty() {
        return Err(OcrSandwichError::RasterizeFailed {
            detail: "no page images were produced".into(),
        });
    }
    info!("rasterized {} pages", images.len());
    Ok(images)
}

async fn rasterize_pdf(
    doc: &SourceDocument,
    input: &std::path::Path,
    ws: &Workspace,
    tools: &Toolchain,
    config: &PipelineConfig,
) -> Result<(), OcrSandwichError> {
    let prefix = ws.file(RASTER_PREFIX);
    let base_args = |range: Option<PageRange>| {
        let mut args: Vec<String> = Vec::new();
        if let Some((first, last)) = range {
            args.extend(["-f".into(), first.to_string(), "-l".into(), last.to_string()]);
        }
        args.extend([
            "-r".into(),
            config.dpi.to_string(),
            "-jpeg".into(),
            input.display().to_string(),
            prefix.display().to_string(),
        ]);
        args
    };

    match plan_ranges(doc.page_count, config.workers()) {
        Some(ranges) => {
            debug!("rasterizing in {} parallel ranges", ranges.len());
            let results: Vec<Result<(), OcrSandwichError>> =
                stream::iter(ranges.into_iter().map(|range| {
                    let args = base_args(Some(range));
                    async move {
                        let out = run_tool(&tools.pdftoppm, &args, None).await?;
                        if out.success {
                            Ok(())
                        } else {
                            Err(OcrSandwichError::RasterizeFailed {
                                detail: format!(
                                    "pdftoppm failed on pages {}-{}: {}",
                                    range.0, range.1, out.stderr
                                ),
                            })
                        }
                    }
                }))
                .buffer_unordered(config.workers())
                .collect()
                .await;
            results.into_iter().collect::<Result<Vec<_>, _>>()?;
        }
        None => {
            debug!("rasterizing sequentially (page count {:?})", doc.page_count);
            let out = run_tool(&tools.pdftoppm, &base_args(None), None).await?;
            if !out.success {
                return Err(OcrSandwichError::RasterizeFailed {
                    detail: format!("pdftoppm failed: {}", out.stderr),
                });
            }
        }
    }
    Ok(())
}

/// Explode a raster input (multi-frame TIFF included) into per-page JPEGs.
async fn explode_image(
    input: &std::path::Path,
    ws: &Workspace,
    tools: &Toolchain,
) -> Result<(), OcrSandwichError> {
    // -scene 1 makes the %d numbering 1-based to match the PDF path.
    let pattern = ws.file(format!("{RASTER_PREFIX}-%09d.{RASTER_EXT}"));
    let args: Vec<String> = vec![
        input.display().to_string(),
        "-quality".into(),
        "100".into(),
        "-scene".into(),
        "1".into(),
        pattern.display().to_string(),
    ];
    let out = run_tool(&tools.convert, &args, None).await?;
    if !out.success {
        return Err(OcrSandwichError::RasterizeFailed {
            detail: format!("convert failed on image input: {}", out.stderr),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_documents_are_not_partitioned() {
        assert_eq!(plan_ranges(Some(19), 8), None);
        assert_eq!(plan_ranges(Some(1), 8), None);
        assert_eq!(plan_ranges(None, 8), None);
    }

    #[test]
    fn ranges_cover_exactly_once() {
        let ranges = plan_ranges(Some(100), 8).unwrap();
        assert_eq!(ranges[0].0, 1);
        assert_eq!(ranges.last().unwrap().1, 100);
        let covered: u32 = ranges.iter().map(|(s, e)| e - s + 1).sum();
        assert_eq!(covered, 100);
        // Contiguous and ordered.
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].1 + 1, pair[1].0);
        }
    }

    #[test]
    fn last_range_is_clipped() {
        // 25 pages over 4 workers → 7-page ranges, last one short.
        let ranges = plan_ranges(Some(25), 4).unwrap();
        assert_eq!(ranges, vec![(1, 7), (8, 14), (15, 21), (22, 25)]);
    }

    #[test]
    fn single_worker_is_one_range() {
        let ranges = plan_ranges(Some(40), 1).unwrap();
        assert_eq!(ranges, vec![(1, 40)]);
    }

    #[test]
    fn exact_division() {
        let ranges = plan_ranges(Some(40), 4).unwrap();
        assert_eq!(ranges, vec![(1, 10), (11, 20), (21, 30), (31, 40)]);
    }
}

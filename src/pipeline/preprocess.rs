//! Preprocessing: in-place deskew and page orientation detection.
//!
//! Both operate on non-blank pages only — a single-colour page has nothing
//! to straighten and nothing to orient.
//!
//! Deskew mutates the raster files, which invalidates any content streams
//! embedded in the original source; the orchestrator therefore forces the
//! rebuild-from-images path whenever deskew runs.
//!
//! Orientation detection is fail-soft at the document level: the rotation
//! compositor needs exactly one record per page, and if the reports do not
//! line up (an engine crash on one page, say), rotating *some* pages with
//! guessed alignment would be worse than rotating none.

use crate::config::PipelineConfig;
use crate::error::OcrSandwichError;
use crate::pipeline::classify::PageImage;
use crate::progress::{self, Stage};
use crate::tools::{run_tool, Toolchain};
use crate::workspace::{Workspace, OCR_PREFIX};
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

static ROTATE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^Rotate:\s*(\d+)").unwrap());

/// Rotation derived from orientation detection for one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationRecord {
    /// 1-based page index.
    pub index: u32,
    /// Clockwise angle, one of 0, 90, 180, 270.
    pub angle: i64,
}

/// Deskew every non-blank page raster in place.
pub async fn deskew(
    pages: &[PageImage],
    threshold: &str,
    tools: &Toolchain,
    config: &PipelineConfig,
) -> Result<(), OcrSandwichError> {
    let mogrify = tools.mogrify.as_ref().ok_or_else(|| {
        OcrSandwichError::Internal("deskew requested but mogrify was not resolved".into())
    })?;

    let work: Vec<&PageImage> = pages.iter().filter(|p| !p.blank).collect();
    let total = work.len();
    progress::stage_start(&config.progress, Stage::Deskew, total);
    info!("deskewing {} pages (threshold {})", total, threshold);

    let results: Vec<Result<(), OcrSandwichError>> = stream::iter(work.into_iter().map(|page| {
        let args: Vec<String> = vec![
            "-deskew".into(),
            threshold.to_string(),
            page.path.display().to_string(),
        ];
        let progress = config.progress.clone();
        let index = page.index;
        async move {
            let out = run_tool(mogrify, &args, None).await?;
            progress::page_done(&progress, Stage::Deskew, index, total);
            if out.success {
                Ok(())
            } else {
                // A page that refuses to deskew keeps its original raster.
                warn!("deskew failed on page {index}: {}", out.stderr);
                Ok(())
            }
        }
    }))
    .buffer_unordered(config.workers())
    .collect()
    .await;
    results.into_iter().collect::<Result<Vec<_>, _>>()?;
    progress::stage_complete(&config.progress, Stage::Deskew);
    Ok(())
}

/// Run orientation detection (engine OSD mode) on every non-blank page.
///
/// Each run writes an `.osd` report next to the page's other artifacts;
/// [`collect_rotations`] later decides whether the reports are usable.
pub async fn detect_orientation(
    pages: &[PageImage],
    ws: &Workspace,
    tools: &Toolchain,
    config: &PipelineConfig,
) -> Result<(), OcrSandwichError> {
    let work: Vec<&PageImage> = pages.iter().filter(|p| !p.blank).collect();
    let total = work.len();
    progress::stage_start(&config.progress, Stage::Orientation, total);
    info!("detecting orientation on {} pages", total);

    let results: Vec<Result<(), OcrSandwichError>> = stream::iter(work.into_iter().map(|page| {
        let base = ws.file(Workspace::indexed_base(OCR_PREFIX, page.index));
        let args: Vec<String> = vec![
            "-l".into(),
            format!("osd+{}", config.languages),
            "--psm".into(),
            "0".into(),
            page.path.display().to_string(),
            base.display().to_string(),
        ];
        let progress = config.progress.clone();
        let index = page.index;
        async move {
            let out = run_tool(&tools.ocr, &args, None).await?;
            progress::page_done(&progress, Stage::Orientation, index, total);
            if !out.success {
                // Missing report gets caught by the count check later.
                warn!("orientation detection failed on page {index}: {}", out.stderr);
            }
            Ok(())
        }
    }))
    .buffer_unordered(config.workers())
    .collect()
    .await;
    results.into_iter().collect::<Result<Vec<_>, _>>()?;
    progress::stage_complete(&config.progress, Stage::Orientation);
    Ok(())
}

/// Gather rotation records for the whole document.
///
/// Blank pages contribute angle 0 without a report. Returns `None` — skip
/// rotation entirely — when the records would not line up 1:1 with the page
/// sequence.
pub fn collect_rotations(
    pages: &[PageImage],
    ws: &Workspace,
) -> Option<Vec<RotationRecord>> {
    let mut records = Vec::with_capacity(pages.len());
    for page in pages {
        if page.blank {
            records.push(RotationRecord {
                index: page.index,
                angle: 0,
            });
            continue;
        }
        let report = ws.indexed_file(OCR_PREFIX, page.index, "osd");
        let Ok(text) = std::fs::read_to_string(&report) else {
            warn!(
                "skipping rotation: orientation report missing for page {}",
                page.index
            );
            return None;
        };
        let angle = match parse_rotation(&text) {
            Some(a) => a,
            None => {
                // The engine wrote a report but no angle; zero is the safe
                // reading, matching a page it considered upright.
                warn!(
                    "no rotation angle in orientation report for page {}; assuming 0",
                    page.index
                );
                0
            }
        };
        records.push(RotationRecord {
            index: page.index,
            angle,
        });
    }
    Some(records)
}

/// Pull the `Rotate: N` value out of an OSD report.
pub fn parse_rotation(report: &str) -> Option<i64> {
    ROTATE_LINE
        .captures(report)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

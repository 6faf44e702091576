//! Sandwich merger: composite the image-bearing PDF and the text layer.
//!
//! ## Direction
//!
//! The two layers do not always agree on page size (the text layer is sized
//! from recognition geometry, the image layer from the source). The merge
//! direction keeps the *larger* first page as the primary document: when the
//! text layer is smaller it is laid over the image underlay, otherwise the
//! text PDF overlays the image. Either way the image paints first and the
//! (invisible) text paints above it.
//!
//! ## Backends and repair
//!
//! The structural merge tool (qpdf contract) works directly on PDF objects
//! and never re-rasterizes. When it is absent, [`crate::pdfops::composite`]
//! does the same job page-by-page in-process. Success is defined by the
//! output file existing — the tools exit zero with no output in enough
//! broken-input cases that the exit code alone cannot be trusted. A missing
//! output triggers exactly one repair attempt: the suspect image PDF is
//! round-tripped through PostScript to normalize its structure, and the
//! merge retried against the repaired file.

use crate::error::OcrSandwichError;
use crate::pdfops;
use crate::tools::{run_tool, Toolchain};
use crate::workspace::Workspace;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Which document acts as primary in the merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDirection {
    /// Text layer is smaller: the image PDF is the underlay beneath it.
    UnderlayImage,
    /// Text layer is at least as large: it overlays the image PDF.
    OverlayText,
}

/// Decide the merge direction from first-page areas.
pub fn choose_direction(image_area: f64, text_area: f64) -> MergeDirection {
    if text_area < image_area {
        MergeDirection::UnderlayImage
    } else {
        MergeDirection::OverlayText
    }
}

/// Merge `image_pdf` and `text_pdf` into `out`.
///
/// Returns whether the repair round-trip had to run. Fails the document if
/// even the repaired merge produces nothing.
pub async fn sandwich(
    image_pdf: &Path,
    text_pdf: &Path,
    out: &Path,
    ws: &Workspace,
    tools: &Toolchain,
) -> Result<bool, OcrSandwichError> {
    let direction = direction_for(image_pdf, text_pdf)?;
    debug!("merge direction: {direction:?}");

    merge_once(image_pdf, text_pdf, out, direction, tools).await?;
    if out.is_file() {
        return Ok(false);
    }

    // One repair attempt: normalize the image PDF through PostScript and
    // retry. If the repair tools are missing there is nothing left to try.
    warn!("merge produced no output; attempting PostScript repair of the source");
    let repaired = repair_via_postscript(image_pdf, ws, tools).await?;
    let direction = direction_for(&repaired, text_pdf)?;
    merge_once(&repaired, text_pdf, out, direction, tools).await?;

    if out.is_file() {
        info!("merge succeeded after repair");
        Ok(true)
    } else {
        Err(OcrSandwichError::MergeFailed {
            detail: "no output produced even after PostScript repair".into(),
        })
    }
}

/// Compare first-page areas. The image side is allowed to be unreadable —
/// that is precisely the malformed-input case the repair path exists for —
/// and degrades to area 0 with a warning; the text side is our own artifact
/// and must parse.
fn direction_for(image_pdf: &Path, text_pdf: &Path) -> Result<MergeDirection, OcrSandwichError> {
    let image_area = match pdfops::first_page_area(image_pdf) {
        Ok(area) => area,
        Err(e) => {
            warn!("could not read source page geometry ({e}); merge may fail");
            0.0
        }
    };
    let text_area = pdfops::first_page_area(text_pdf)?;
    Ok(choose_direction(image_area, text_area))
}

async fn merge_once(
    image_pdf: &Path,
    text_pdf: &Path,
    out: &Path,
    direction: MergeDirection,
    tools: &Toolchain,
) -> Result<(), OcrSandwichError> {
    match &tools.qpdf {
        Some(qpdf) => {
            let args: Vec<String> = match direction {
                MergeDirection::UnderlayImage => vec![
                    "--underlay".into(),
                    image_pdf.display().to_string(),
                    "--".into(),
                    text_pdf.display().to_string(),
                    out.display().to_string(),
                ],
                MergeDirection::OverlayText => vec![
                    "--overlay".into(),
                    text_pdf.display().to_string(),
                    "--".into(),
                    image_pdf.display().to_string(),
                    out.display().to_string(),
                ],
            };
            // qpdf exits non-zero for recoverable warnings; the output check
            // decides success.
            let result = run_tool(qpdf, &args, None).await?;
            if !result.success {
                debug!("qpdf exited non-zero: {}", result.stderr);
            }
            Ok(())
        }
        None => {
            let (primary, secondary, on_top) = match direction {
                MergeDirection::UnderlayImage => (text_pdf, image_pdf, false),
                MergeDirection::OverlayText => (image_pdf, text_pdf, true),
            };
            let primary = primary.to_path_buf();
            let secondary = secondary.to_path_buf();
            let out = out.to_path_buf();
            let composed = tokio::task::spawn_blocking(move || {
                pdfops::composite(&primary, &secondary, &out, on_top)
            })
            .await
            .map_err(|e| OcrSandwichError::Internal(format!("composite task panicked: {e}")))?;
            if let Err(e) = composed {
                // Parity with the tool path: a failed merge means a missing
                // output file, which the caller turns into repair-or-fail.
                warn!("built-in compositor failed: {e}");
            }
            Ok(())
        }
    }
}

/// PDF → PostScript → PDF round-trip to shake structural corruption out of
/// the source.
async fn repair_via_postscript(
    source: &Path,
    ws: &Workspace,
    tools: &Toolchain,
) -> Result<PathBuf, OcrSandwichError> {
    let (Some(pdf2ps), Some(ps2pdf)) = (&tools.pdf2ps, &tools.ps2pdf) else {
        return Err(OcrSandwichError::MergeFailed {
            detail: "merge failed and pdf2ps/ps2pdf are not available for repair".into(),
        });
    };

    let ps = ws.file("repair.ps");
    let repaired = ws.file("repaired.pdf");

    let out = run_tool(
        pdf2ps,
        &[source.display().to_string(), ps.display().to_string()],
        None,
    )
    .await?;
    if !out.success || !ps.is_file() {
        return Err(OcrSandwichError::MergeFailed {
            detail: format!("pdf2ps repair step failed: {}", out.stderr),
        });
    }

    let out = run_tool(
        ps2pdf,
        &[ps.display().to_string(), repaired.display().to_string()],
        None,
    )
    .await?;
    if !out.success || !repaired.is_file() {
        return Err(OcrSandwichError::MergeFailed {
            detail: format!("ps2pdf repair step failed: {}", out.stderr),
        });
    }

    Ok(repaired)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smaller_text_layer_underlays_the_image() {
        // Image 612×792, text 500×700: text is smaller.
        assert_eq!(
            choose_direction(612.0 * 792.0, 500.0 * 700.0),
            MergeDirection::UnderlayImage
        );
    }

    #[test]
    fn larger_or_equal_text_layer_overlays() {
        assert_eq!(
            choose_direction(500.0 * 700.0, 612.0 * 792.0),
            MergeDirection::OverlayText
        );
        // Equal areas take the overlay branch.
        assert_eq!(
            choose_direction(612.0 * 792.0, 612.0 * 792.0),
            MergeDirection::OverlayText
        );
    }

    #[test]
    fn unreadable_image_geometry_forces_overlay() {
        // Area 0 for the image side can never exceed the text area.
        assert_eq!(choose_direction(0.0, 100.0), MergeDirection::OverlayText);
    }
}

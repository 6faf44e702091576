//! Rebuild engine: reconstruct per-page PDFs from raster images.
//!
//! Runs when the source cannot be merged directly — encrypted input, raster
//! input, deskewed rasters, or a forced rebuild. Each page image goes
//! through the external converter with a compression preset's operator
//! string; the resulting single-page PDFs are aggregated downstream.
//!
//! Rebuilding always discards original document metadata. That is a
//! documented, user-visible side effect, announced with a warning before
//! the first page converts.

use crate::config::{PipelineConfig, RebuildPreset};
use crate::error::OcrSandwichError;
use crate::pipeline::classify::{self, PageImage};
use crate::progress::{self, Stage};
use crate::tools::{run_tool, Toolchain};
use crate::workspace::{Workspace, REBUILD_PREFIX};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use tracing::{info, warn};

/// The smart decision given whole-document colour sampling.
pub fn smart_choice(all_pages_monochrome: bool) -> RebuildPreset {
    if all_pages_monochrome {
        RebuildPreset::Best
    } else {
        RebuildPreset::Jpeg
    }
}

/// Resolve [`RebuildPreset::Smart`] by sampling every page for colour
/// content; any other preset passes through unchanged.
pub async fn resolve_smart_preset(
    preset: &RebuildPreset,
    pages: &[PageImage],
    workers: usize,
) -> Result<RebuildPreset, OcrSandwichError> {
    if *preset != RebuildPreset::Smart {
        return Ok(preset.clone());
    }

    let checks: Vec<Result<bool, OcrSandwichError>> =
        stream::iter(pages.iter().map(|page| {
            let path = page.path.clone();
            async move {
                tokio::task::spawn_blocking(move || classify::is_monochrome(&path))
                    .await
                    .map_err(|e| {
                        OcrSandwichError::Internal(format!("colour check task panicked: {e}"))
                    })?
            }
        }))
        .buffer_unordered(workers)
        .collect()
        .await;

    let mut all_monochrome = true;
    for check in checks {
        if !check? {
            all_monochrome = false;
            break;
        }
    }

    let resolved = smart_choice(all_monochrome);
    if all_monochrome {
        info!("no colour pages detected; smart mode uses the 'best' preset");
    } else {
        info!("colour pages detected; smart mode uses the 'jpeg' preset");
    }
    Ok(resolved)
}

/// Split a converter operator string into argv tokens, honouring quotes so
/// raw user strings like `-set comment "scanned page"` survive.
pub fn split_operators(operators: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in operators.chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else {
                    current.push(c);
                }
            }
            None => match c {
                '"' | '\'' => quote = Some(c),
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Convert every page raster into a single-page PDF under the resolved
/// preset. Returns the rebuilt page paths in page order.
pub async fn rebuild_pages(
    pages: &[PageImage],
    ws: &Workspace,
    tools: &Toolchain,
    config: &PipelineConfig,
) -> Result<Vec<PathBuf>, OcrSandwichError> {
    warn!(
        "metadata wiped from final PDF file (source is not an unprotected PDF, \
         rebuild was forced, or deskew ran)"
    );

    let preset = resolve_smart_preset(&config.rebuild_preset, pages, config.workers()).await?;
    let operators = split_operators(&preset.operators());
    let total = pages.len();
    progress::stage_start(&config.progress, Stage::Rebuild, total);
    info!("rebuilding {} pages from images", total);

    let results: Vec<Result<(), OcrSandwichError>> = stream::iter(pages.iter().map(|page| {
        let out_pdf = ws.indexed_file(REBUILD_PREFIX, page.index, "pdf");
        let mut args: Vec<String> = vec![page.path.display().to_string()];
        args.extend(operators.iter().cloned());
        args.push(out_pdf.display().to_string());
        let progress = config.progress.clone();
        let index = page.index;
        async move {
            let out = run_tool(&tools.convert, &args, None).await?;
            progress::page_done(&progress, Stage::Rebuild, index, total);
            if !out.success {
                // The missing artifact is what ultimately fails the stage;
                // the diagnostic is more useful per page.
                warn!("convert failed on page {index}: {}", out.stderr);
            }
            Ok(())
        }
    }))
    .buffer_unordered(config.workers())
    .collect()
    .await;
    results.into_iter().collect::<Result<Vec<_>, _>>()?;

    let rebuilt = ws.list_indexed(REBUILD_PREFIX, "pdf")?;
    if rebuilt.is_empty() {
        return Err(OcrSandwichError::RebuildFailed {
            detail: "no PDF pages were generated from the images".into(),
        });
    }
    if rebuilt.len() != total {
        warn!("rebuilt {}/{} pages; missing pages will be absent", rebuilt.len(), total);
    }
    progress::stage_complete(&config.progress, Stage::Rebuild);
    Ok(rebuilt.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smart_decision_matches_colour_sampling() {
        assert_eq!(smart_choice(true), RebuildPreset::Best);
        assert_eq!(smart_choice(false), RebuildPreset::Jpeg);
    }

    #[test]
    fn operator_splitting_plain() {
        assert_eq!(
            split_operators("-threshold 60% -compress Group4"),
            vec!["-threshold", "60%", "-compress", "Group4"]
        );
    }

    #[test]
    fn operator_splitting_quoted() {
        assert_eq!(
            split_operators(r#"-set comment "scanned page" -quality 50%"#),
            vec!["-set", "comment", "scanned page", "-quality", "50%"]
        );
        assert_eq!(
            split_operators("-set comment 'one two'"),
            vec!["-set", "comment", "one two"]
        );
    }

    #[test]
    fn operator_splitting_empty_and_spaces() {
        assert!(split_operators("").is_empty());
        assert!(split_operators("   ").is_empty());
    }

    #[tokio::test]
    async fn non_smart_presets_pass_through() {
        let resolved = resolve_smart_preset(&RebuildPreset::Grayscale, &[], 2)
            .await
            .unwrap();
        assert_eq!(resolved, RebuildPreset::Grayscale);
    }

    #[tokio::test]
    async fn smart_preset_on_monochrome_pages() {
        use image::{Rgb, RgbImage};
        let dir = tempfile::tempdir().unwrap();

        let mut mono = RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]));
        mono.put_pixel(3, 3, Rgb([0, 0, 0]));
        let mono_path = dir.path().join("m.png");
        mono.save(&mono_path).unwrap();

        let pages = vec![PageImage {
            index: 1,
            path: mono_path,
            width: 10,
            height: 10,
            blank: false,
        }];

        let resolved = resolve_smart_preset(&RebuildPreset::Smart, &pages, 2)
            .await
            .unwrap();
        assert_eq!(resolved, RebuildPreset::Best);

        let mut colour = RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]));
        colour.put_pixel(3, 3, Rgb([200, 0, 0]));
        let colour_path = dir.path().join("c.png");
        colour.save(&colour_path).unwrap();

        let pages = vec![PageImage {
            index: 1,
            path: colour_path,
            width: 10,
            height: 10,
            blank: false,
        }];
        let resolved = resolve_smart_preset(&RebuildPreset::Smart, &pages, 2)
            .await
            .unwrap();
        assert_eq!(resolved, RebuildPreset::Jpeg);
    }
}

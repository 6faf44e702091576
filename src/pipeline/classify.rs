//! Raster page classification: blank detection and colour sampling.
//!
//! ## Why spawn_blocking?
//!
//! Decoding a 300-DPI page JPEG is CPU-bound; doing it inline would stall
//! tokio worker threads for tens of milliseconds per page. Each decode runs
//! on the blocking pool, fanned out through the same bounded
//! `buffer_unordered` pool as every other per-page stage.

use crate::error::OcrSandwichError;
use crate::progress::{self, SharedProgress, Stage};
use futures::stream::{self, StreamExt};
use image::GenericImageView;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One rasterized page with everything later stages need to know about it.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 1-based page index parsed from the artifact name.
    pub index: u32,
    /// Path of the page raster inside the workspace.
    pub path: PathBuf,
    /// Pixel dimensions.
    pub width: u32,
    pub height: u32,
    /// A page is blank iff its raster reduces to exactly one distinct colour.
    pub blank: bool,
}

/// Decode every page image and flag blank ones.
///
/// Results come back in page order regardless of completion order.
pub async fn classify_pages(
    images: Vec<(u32, PathBuf)>,
    workers: usize,
    progress: &Option<SharedProgress>,
) -> Result<Vec<PageImage>, OcrSandwichError> {
    let total = images.len();
    progress::stage_start(progress, Stage::Classify, total);

    let mut pages: Vec<PageImage> = stream::iter(images.into_iter().map(|(index, path)| {
        let progress = progress.clone();
        async move {
            let result = tokio::task::spawn_blocking({
                let path = path.clone();
                move || inspect_image(&path)
            })
            .await
            .map_err(|e| OcrSandwichError::Internal(format!("classify task panicked: {e}")))?;

            progress::page_done(&progress, Stage::Classify, index, total);
            result.map(|(width, height, blank)| PageImage {
                index,
                path,
                width,
                height,
                blank,
            })
        }
    }))
    .buffer_unordered(workers)
    .collect::<Vec<Result<PageImage, OcrSandwichError>>>()
    .await
    .into_iter()
    .collect::<Result<Vec<_>, _>>()?;

    pages.sort_by_key(|p| p.index);
    let blanks = pages.iter().filter(|p| p.blank).count();
    info!("classified {} pages, {} blank", pages.len(), blanks);
    progress::stage_complete(progress, Stage::Classify);
    Ok(pages)
}

/// Decode one raster: dimensions plus the single-colour check.
fn inspect_image(path: &Path) -> Result<(u32, u32, bool), OcrSandwichError> {
    let img = image::open(path).map_err(|e| OcrSandwichError::RasterizeFailed {
        detail: format!("cannot decode {}: {e}", path.display()),
    })?;
    let (width, height) = img.dimensions();

    let rgb = img.to_rgb8();
    let mut pixels = rgb.pixels();
    let blank = match pixels.next() {
        Some(first) => pixels.all(|p| p == first),
        None => true,
    };
    if blank {
        debug!("{} is blank ({}x{})", path.display(), width, height);
    }
    Ok((width, height, blank))
}

/// A page is monochrome iff its three colour channels are pixel-identical
/// everywhere. Used by the smart rebuild preset.
pub fn is_monochrome(path: &Path) -> Result<bool, OcrSandwichError> {
    let img = image::open(path).map_err(|e| OcrSandwichError::RasterizeFailed {
        detail: format!("cannot decode {}: {e}", path.display()),
    })?;
    let rgb = img.to_rgb8();
    Ok(rgb.pixels().all(|p| p.0[0] == p.0[1] && p.0[0] == p.0[2]))
}

//! Progress-callback trait for pipeline events.
//!
//! Inject an `Arc<dyn ProgressCallback>` via
//! [`crate::config::PipelineConfigBuilder::progress`] to receive events as
//! the pipeline moves through its stages and finishes individual pages.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a channel, a log sink, or a terminal progress bar
//! without the library knowing how the host application communicates.
//! Documents can have thousands of pages, so fan-out stages report page
//! completion as it happens rather than going silent until the stage ends.
//! The trait is `Send + Sync` because page events fire concurrently from the
//! worker pool.

use std::sync::Arc;

/// A named pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Stage {
    /// Converting the input into one raster image per page.
    Rasterize,
    /// Detecting blank (single-colour) pages.
    Classify,
    /// Straightening skewed rasters in place.
    Deskew,
    /// Collecting per-page orientation information.
    Orientation,
    /// Running the OCR engine per page.
    Ocr,
    /// Rebuilding per-page PDFs from raster images.
    Rebuild,
    /// Concatenating per-page PDFs in page order.
    Aggregate,
    /// Compositing the image and text layers.
    Merge,
    /// Applying per-page rotation to the merged output.
    Rotate,
    /// Rewriting document metadata into the final file.
    Metadata,
}

impl Stage {
    /// Human-readable label used in progress displays.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Rasterize => "rasterize",
            Stage::Classify => "classify",
            Stage::Deskew => "deskew",
            Stage::Orientation => "orientation",
            Stage::Ocr => "ocr",
            Stage::Rebuild => "rebuild",
            Stage::Aggregate => "aggregate",
            Stage::Merge => "merge",
            Stage::Rotate => "rotate",
            Stage::Metadata => "metadata",
        }
    }
}

/// Called by the pipeline as it processes a document.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Page-scoped methods may be called concurrently from
/// different workers; implementations must synchronise shared state.
pub trait ProgressCallback: Send + Sync {
    /// Called once per document, after validation, with the page count if it
    /// is already known (raster inputs only learn it after rasterization).
    fn on_document_start(&self, input: &std::path::Path, pages: Option<usize>) {
        let _ = (input, pages);
    }

    /// Called when a fan-out stage begins. `units` is the number of per-page
    /// work items the stage will process (0 for whole-document stages).
    fn on_stage_start(&self, stage: Stage, units: usize) {
        let _ = (stage, units);
    }

    /// Called each time a fan-out stage finishes one page.
    fn on_page_done(&self, stage: Stage, page: u32, total: usize) {
        let _ = (stage, page, total);
    }

    /// Called when a stage has fully completed.
    fn on_stage_complete(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called once per document with the final outcome.
    fn on_document_complete(&self, input: &std::path::Path, success: bool) {
        let _ = (input, success);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgress;

impl ProgressCallback for NoopProgress {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type SharedProgress = Arc<dyn ProgressCallback>;

/// Forward a page-completion event if a callback is configured.
pub(crate) fn page_done(progress: &Option<SharedProgress>, stage: Stage, page: u32, total: usize) {
    if let Some(cb) = progress {
        cb.on_page_done(stage, page, total);
    }
}

/// Forward a stage-start event if a callback is configured.
pub(crate) fn stage_start(progress: &Option<SharedProgress>, stage: Stage, units: usize) {
    if let Some(cb) = progress {
        cb.on_stage_start(stage, units);
    }
}

/// Forward a stage-complete event if a callback is configured.
pub(crate) fn stage_complete(progress: &Option<SharedProgress>, stage: Stage) {
    if let Some(cb) = progress {
        cb.on_stage_complete(stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracking {
        stages: AtomicUsize,
        pages: AtomicUsize,
    }

    impl ProgressCallback for Tracking {
        fn on_stage_start(&self, _stage: Stage, _units: usize) {
            self.stages.fetch_add(1, Ordering::SeqCst);
        }
        fn on_page_done(&self, _stage: Stage, _page: u32, _total: usize) {
            self.pages.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_does_not_panic() {
        let cb = NoopProgress;
        cb.on_document_start(std::path::Path::new("a.pdf"), Some(3));
        cb.on_stage_start(Stage::Ocr, 3);
        cb.on_page_done(Stage::Ocr, 1, 3);
        cb.on_stage_complete(Stage::Ocr);
        cb.on_document_complete(std::path::Path::new("a.pdf"), true);
    }

    #[test]
    fn helpers_forward_when_configured() {
        let tracker = Arc::new(Tracking {
            stages: AtomicUsize::new(0),
            pages: AtomicUsize::new(0),
        });
        let shared: Option<SharedProgress> = Some(tracker.clone() as SharedProgress);

        stage_start(&shared, Stage::Rasterize, 5);
        page_done(&shared, Stage::Rasterize, 1, 5);
        page_done(&shared, Stage::Rasterize, 2, 5);
        stage_complete(&shared, Stage::Rasterize);

        assert_eq!(tracker.stages.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.pages.load(Ordering::SeqCst), 2);

        // No callback configured: helpers are inert.
        page_done(&None, Stage::Ocr, 1, 1);
    }

    #[test]
    fn stage_labels_are_stable() {
        assert_eq!(Stage::Rasterize.label(), "rasterize");
        assert_eq!(Stage::Merge.label(), "merge");
    }
}

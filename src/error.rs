//! Error types for the ocr-sandwich library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`OcrSandwichError`] — **Fatal for the current document**: the pipeline
//!   cannot produce an output at all (unreadable input, a required external
//!   tool is missing, a whole stage yielded nothing). Returned as
//!   `Err(OcrSandwichError)` from the top-level `run_*` functions.
//!
//! * [`PageError`] — **Non-fatal**: a single page misbehaved (OCR produced no
//!   usable output, recognition geometry was unrecoverable) but every other
//!   page is fine. The page gets a textless stand-in and the error is stored
//!   in [`crate::output::RunOutput`] so callers can inspect partial success
//!   rather than losing a thousand-page document to one bad scan.
//!
//! Batch processing never propagates a fatal error across documents: each
//! input fails or succeeds on its own and the process exit status reflects
//! whether any of them failed.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the ocr-sandwich library.
///
/// Page-level failures use [`PageError`] and are stored in
/// [`crate::output::RunOutput`] rather than propagated here.
#[derive(Debug, Error)]
pub enum OcrSandwichError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("input file not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    /// The file exists but is neither a PDF nor a supported raster image.
    #[error("unsupported input '{path}': not a PDF, TIFF, JPEG or PNG (first bytes: {magic:02x?})")]
    UnsupportedInput { path: PathBuf, magic: [u8; 4] },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// Input already carries a text layer and `check_text` is enabled.
    #[error("'{path}' already has text and check-text mode is enabled")]
    InputHasText { path: PathBuf },

    /// Input is encrypted and `check_protection` is enabled.
    #[error("'{path}' is an encrypted PDF and check-protection mode is enabled")]
    InputEncrypted { path: PathBuf },

    /// Page count exceeds the configured guard.
    #[error("input has {pages} pages and the configured maximum is {limit}")]
    TooManyPages { pages: usize, limit: usize },

    /// Input file is smaller than the configured guard.
    #[error("input is {kbytes} KiB and the configured minimum is {limit_kb} KiB")]
    FileTooSmall { kbytes: u64, limit_kb: u64 },

    /// Output already exists and overwrite protection is enabled.
    #[error("'{path}' already exists and safe mode is enabled")]
    OutputExists { path: PathBuf },

    // ── Configuration errors ──────────────────────────────────────────────
    /// Builder validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Rebuilding from raster pages discards any embedded text, so it cannot
    /// be combined with skipping text that already exists in the source.
    #[error("rebuild from images and ignore-existing-text won't work together")]
    RebuildConflict,

    // ── Toolchain errors ──────────────────────────────────────────────────
    /// A required external tool could not be found on PATH.
    #[error("required external tool '{tool}' not found\n{hint}")]
    ToolMissing { tool: String, hint: String },

    // ── Stage failures (fatal for this document only) ─────────────────────
    /// Rasterization produced no usable page images.
    #[error("failed to create page images from input: {detail}")]
    RasterizeFailed { detail: String },

    /// A per-page artifact stream was empty when it was time to aggregate.
    #[error("no {kind} PDF pages were generated; nothing to aggregate")]
    NothingToAggregate { kind: &'static str },

    /// The sandwich merge yielded no output even after the repair retry.
    #[error("could not merge image and text layers: {detail}")]
    MergeFailed { detail: String },

    /// The rebuild engine produced no per-page PDFs.
    #[error("PDF rebuild from images failed: {detail}")]
    RebuildFailed { detail: String },

    // ── Timeout ───────────────────────────────────────────────────────────
    /// Wall-clock budget for the whole document exceeded; all in-flight
    /// external processes were killed and the workspace removed.
    #[error("stopped due to timeout of {secs} seconds")]
    TimeoutExceeded { secs: u64 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or populate the temporary workspace.
    #[error("workspace error: {source}")]
    Workspace {
        #[source]
        source: std::io::Error,
    },

    /// Could not write the final PDF or text sidecar.
    #[error("failed to write output file '{path}': {source}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// lopdf rejected a document we expected to be able to process.
    #[error("PDF object error: {detail}")]
    PdfObject { detail: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (violated invariant, task panic).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<lopdf::Error> for OcrSandwichError {
    fn from(e: lopdf::Error) -> Self {
        OcrSandwichError::PdfObject {
            detail: e.to_string(),
        }
    }
}

/// A non-fatal error for a single page.
///
/// Stored in [`crate::output::RunOutput`]. The affected page is replaced by a
/// correctly-sized textless page so page order and page count are preserved
/// in the final document.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The OCR engine exited abnormally or produced no output artifact,
    /// even after the default-language retry.
    #[error("page {page}: OCR produced no usable output: {detail}")]
    OcrFailed { page: u32, detail: String },

    /// Recognition geometry existed but carried no page dimensions; the
    /// fallback page size was substituted.
    #[error("page {page}: recognition geometry unrecoverable, default page size substituted")]
    GeometryMissing { page: u32 },
}

impl PageError {
    /// Page index the error belongs to.
    pub fn page(&self) -> u32 {
        match self {
            PageError::OcrFailed { page, .. } => *page,
            PageError::GeometryMissing { page } => *page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_missing_display_carries_hint() {
        let e = OcrSandwichError::ToolMissing {
            tool: "tesseract".into(),
            hint: "Install it with your package manager.".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("tesseract"));
        assert!(msg.contains("package manager"));
    }

    #[test]
    fn rebuild_conflict_display() {
        let msg = OcrSandwichError::RebuildConflict.to_string();
        assert!(msg.contains("won't work together"));
    }

    #[test]
    fn page_error_reports_index() {
        let e = PageError::OcrFailed {
            page: 7,
            detail: "exit status 1".into(),
        };
        assert_eq!(e.page(), 7);
        assert!(e.to_string().contains("page 7"));
    }

    #[test]
    fn timeout_display() {
        let e = OcrSandwichError::TimeoutExceeded { secs: 90 };
        assert!(e.to_string().contains("90 seconds"));
    }
}

//! Result types returned by the pipeline.

use crate::error::PageError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which assembly strategy produced the final document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssemblyPath {
    /// The original PDF was merged directly with the text layer.
    Direct,
    /// The document was rebuilt page-by-page from raster images first.
    Rebuild,
}

/// Aggregate counters and timings for one document run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    /// Total pages in the document.
    pub pages: usize,
    /// Pages classified as blank (single-colour) and skipped by OCR.
    pub blank_pages: usize,
    /// Pages whose OCR fell back to a textless stand-in.
    pub failed_pages: usize,
    /// Assembly strategy that executed.
    pub assembly: AssemblyPath,
    /// Whether per-page rotation was applied to the output.
    pub rotation_applied: bool,
    /// Whether the merge went through the PostScript repair round-trip.
    pub repaired: bool,
    /// Wall-clock duration of the whole run in milliseconds.
    pub total_duration_ms: u64,
    /// Rasterization stage duration in milliseconds.
    pub raster_duration_ms: u64,
    /// OCR stage duration in milliseconds (0 when OCR is skipped).
    pub ocr_duration_ms: u64,
}

/// Everything produced by a successful run of one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutput {
    /// The final sandwich PDF.
    pub output_pdf: PathBuf,
    /// The plain-text sidecar, when requested.
    pub sidecar_text: Option<PathBuf>,
    /// Counters and timings.
    pub stats: RunStats,
    /// Per-page anomalies that were absorbed (the run still succeeded).
    pub page_errors: Vec<PageError>,
}

impl RunOutput {
    /// True when every page carried real OCR text (no absorbed failures).
    pub fn is_clean(&self) -> bool {
        self.page_errors.is_empty()
    }
}

/// Outcome of a batch: one entry per input, in input order.
#[derive(Debug)]
pub struct BatchOutput {
    /// Per-document results keyed by input path.
    pub results: Vec<(PathBuf, Result<RunOutput, crate::error::OcrSandwichError>)>,
}

impl BatchOutput {
    /// True when every document in the batch succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.results.iter().all(|(_, r)| r.is_ok())
    }

    /// Number of failed documents.
    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_err()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_output() -> RunOutput {
        RunOutput {
            output_pdf: PathBuf::from("/tmp/a-OCR.pdf"),
            sidecar_text: None,
            stats: RunStats {
                pages: 3,
                blank_pages: 1,
                failed_pages: 0,
                assembly: AssemblyPath::Direct,
                rotation_applied: false,
                repaired: false,
                total_duration_ms: 1200,
                raster_duration_ms: 300,
                ocr_duration_ms: 800,
            },
            page_errors: vec![],
        }
    }

    #[test]
    fn clean_run_has_no_page_errors() {
        assert!(sample_output().is_clean());
    }

    #[test]
    fn run_output_serialises() {
        let json = serde_json::to_string(&sample_output()).unwrap();
        assert!(json.contains("\"pages\":3"));
        assert!(json.contains("Direct"));
        let back: RunOutput = serde_json::from_str(&json).unwrap();
        assert_eq!(back.stats.pages, 3);
    }

    #[test]
    fn batch_success_accounting() {
        let batch = BatchOutput {
            results: vec![
                (PathBuf::from("a.pdf"), Ok(sample_output())),
                (
                    PathBuf::from("b.pdf"),
                    Err(crate::error::OcrSandwichError::Internal("boom".into())),
                ),
            ],
        };
        assert!(!batch.all_succeeded());
        assert_eq!(batch.failed_count(), 1);
    }
}

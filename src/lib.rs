//! # ocr-sandwich
//!
//! OCR a scanned (or otherwise rasterizable) document and composite an
//! invisible, position-accurate text layer over the original page imagery —
//! a searchable "sandwich" PDF that looks identical to the input.
//!
//! ## Why this crate?
//!
//! Scanned PDFs are pictures: nothing selects, nothing searches. Re-encoding
//! them through a generic converter loses the original imagery or balloons
//! the file. This crate keeps the source pages untouched wherever possible
//! and only *adds* a text layer, positioned from the OCR engine's own
//! geometry so selection highlights land exactly on the printed words.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input (PDF / TIFF / JPEG / PNG)
//!  │
//!  ├─ 1. Validate   sniff type, page count, encryption, guards
//!  ├─ 2. Rasterize  one JPEG per page (pdftoppm, parallel page ranges)
//!  ├─ 3. Classify   blank pages short-circuit all later per-page work
//!  ├─ 4. Preprocess optional deskew + orientation detection
//!  ├─ 5. OCR        per page: text-bearing PDF or hOCR → invisible text
//!  ├─ 6. Aggregate  per-page PDFs concatenated in page order
//!  ├─ 7. Merge      sandwich the text layer with the image layer
//!  │                (direct merge, or full rebuild from rasters)
//!  ├─ 8. Rotate     apply per-page orientation corrections
//!  └─ 9. Metadata   preserve what survives, sign the Producer field
//! ```
//!
//! External tools (tesseract, poppler's pdftoppm, ImageMagick, qpdf,
//! ghostscript) are collaborators behind narrow contracts; everything
//! structural happens in-process on PDF objects.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ocr_sandwich::{run_document, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .languages("eng")
//!         .autorotate(true)
//!         .build()?;
//!     let output = run_document("scan.pdf", &config).await?;
//!     println!("wrote {}", output.output_pdf.display());
//!     eprintln!("{} pages, {} blank", output.stats.pages, output.stats.blank_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ocrsandwich` binary (clap + anyhow + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! ocr-sandwich = { version = "0.5", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod document;
pub mod error;
pub mod hocr;
pub mod output;
pub mod pdfops;
pub mod pipeline;
pub mod progress;
pub mod run;
pub mod textpdf;
pub mod tools;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder, RebuildPreset, TextStrategy};
pub use document::{InputKind, SourceDocument};
pub use error::{OcrSandwichError, PageError};
pub use output::{AssemblyPath, BatchOutput, RunOutput, RunStats};
pub use progress::{NoopProgress, ProgressCallback, SharedProgress, Stage};
pub use run::{run_batch, run_document};
pub use tools::Toolchain;

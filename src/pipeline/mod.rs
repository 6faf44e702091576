//! Pipeline stages for sandwich-PDF assembly.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. a different rasterizer contract) without
//! touching other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ raster ──▶ classify ──▶ preprocess ──▶ ocr ──────────┐
//! (pdf/img) (pdftoppm)  (blank?)    (deskew/osd)   (per page)    │
//!                │                                               ▼
//!                └───────▶ rebuild ──▶ ··· ──────────────────▶ merge ──▶ rotate
//!                          (convert)   (aggregate)             (qpdf)
//! ```
//!
//! 1. [`raster`]     — split the document into page ranges and rasterize
//!    each range with the external tool; page indices become explicit keys
//! 2. [`classify`]   — decode each raster and flag single-colour pages so
//!    nothing downstream wastes work on them
//! 3. [`preprocess`] — optional deskew (mutates rasters, forces rebuild)
//!    and orientation detection (one rotation record per page)
//! 4. [`ocr`]        — per-page recognition; a page failure never fails the
//!    document
//! 5. [`rebuild`]    — reconstruct per-page PDFs from rasters under a
//!    compression preset when the source cannot be merged directly
//! 6. [`merge`]      — composite image and text layers, with a
//!    PostScript round-trip repair fallback
//!
//! Every per-page fan-out here goes through the same bounded pool:
//! `futures::stream::iter(...).buffer_unordered(workers)`, each unit a pure
//! function of its page file plus the immutable config and toolchain.

pub mod classify;
pub mod merge;
pub mod ocr;
pub mod preprocess;
pub mod raster;
pub mod rebuild;

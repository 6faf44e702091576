//! Configuration types for the sandwich-OCR pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share configs across worker tasks, log them, and diff two runs
//! to understand why their outputs differ.
//!
//! # Design choice: strategies resolved once
//!
//! Choices that change the *shape* of the pipeline — how OCR text is
//! generated, which compression operators rebuild pages, which backend merges
//! the sandwich — are tagged enums ([`TextStrategy`], [`RebuildPreset`])
//! selected here and in [`crate::tools::Toolchain`] during startup, never
//! re-derived from strings at call sites.

use crate::error::OcrSandwichError;
use crate::progress::{ProgressCallback, SharedProgress};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// How the OCR engine's recognition output becomes a text-layer PDF page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextStrategy {
    /// The engine emits a text-bearing PDF directly; any embedded raster is
    /// stripped afterwards since the pipeline already owns the page image.
    /// (default)
    #[default]
    Direct,
    /// The engine emits recognition geometry (hOCR) which is synthesized into
    /// an invisible-text page by [`crate::textpdf`].
    Geometry,
}

/// Compression preset used when rebuilding pages from raster images.
///
/// The operator strings are ImageMagick `convert` arguments, chosen for the
/// classic scanned-document trade-offs: Group4 bitonal for text, JPEG for
/// colour material.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RebuildPreset {
    /// Fast bitonal file: `-threshold 60% -compress Group4`.
    Fast,
    /// Best-quality bitonal file (default):
    /// `-colors 2 -colorspace gray -normalize -threshold 60% -compress Group4`.
    #[default]
    Best,
    /// Bitonal from grayscale sources:
    /// `-threshold 85% -morphology Dilate Diamond -compress Group4`.
    Grayscale,
    /// Keep colour as JPEG:
    /// `-strip -interlace Plane -gaussian-blur 0.05 -quality 50% -compress JPEG`.
    Jpeg,
    /// Keep colour as JPEG2000: `-quality 32% -compress JPEG2000`.
    Jpeg2000,
    /// Sample every page for colour content, then use [`RebuildPreset::Best`]
    /// if all pages are monochrome, else [`RebuildPreset::Jpeg`].
    Smart,
    /// Raw `convert` operator string supplied by the caller.
    Raw(String),
}

impl RebuildPreset {
    /// The `convert` operator string for this preset.
    ///
    /// [`RebuildPreset::Smart`] has no operators of its own — it must be
    /// resolved to a concrete preset first (see
    /// [`crate::pipeline::rebuild::resolve_smart_preset`]); asking for its
    /// operators yields the [`RebuildPreset::Best`] string.
    pub fn operators(&self) -> String {
        match self {
            RebuildPreset::Fast => "-threshold 60% -compress Group4".into(),
            RebuildPreset::Best | RebuildPreset::Smart => {
                "-colors 2 -colorspace gray -normalize -threshold 60% -compress Group4".into()
            }
            RebuildPreset::Grayscale => {
                "-threshold 85% -morphology Dilate Diamond -compress Group4".into()
            }
            RebuildPreset::Jpeg => {
                "-strip -interlace Plane -gaussian-blur 0.05 -quality 50% -compress JPEG".into()
            }
            RebuildPreset::Jpeg2000 => "-quality 32% -compress JPEG2000".into(),
            RebuildPreset::Raw(s) => s.clone(),
        }
    }
}

/// Configuration for one pipeline run.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use ocr_sandwich::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .dpi(300)
///     .languages("deu+eng")
///     .autorotate(true)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Rasterization resolution in DPI. Range: 72–1200. Default: 300.
    ///
    /// 300 DPI is the OCR sweet spot: recognition quality plateaus above it
    /// while raster files and OCR time keep growing. Drop to 150–200 for
    /// speed on clean sources.
    pub dpi: u32,

    /// OCR language codes, engine syntax (e.g. `"por+eng"`). Default: `"por+eng"`.
    pub languages: String,

    /// Language substituted for the single retry when recognition yields
    /// nothing in the configured language. Default: `"eng"`.
    pub fallback_language: String,

    /// Page segmentation mode passed to the engine. Default: `"1"`.
    pub psm: String,

    /// How OCR output becomes a text layer. Default: [`TextStrategy::Direct`].
    pub text_strategy: TextStrategy,

    /// Run OCR at all. `false` reproduces a pure rebuild/copy run, useful for
    /// testing compression presets without paying for recognition.
    pub ocr_enabled: bool,

    /// Extra flags appended verbatim to every OCR engine invocation.
    pub extra_ocr_args: Vec<String>,

    /// Compression preset for the rebuild engine. Default: [`RebuildPreset::Best`].
    pub rebuild_preset: RebuildPreset,

    /// Force the rebuild-from-images path even for clean PDF inputs.
    pub force_rebuild: bool,

    /// Deskew threshold percentage; `Some(40)` runs
    /// `mogrify -deskew 40%` on every non-blank page. Deskewing mutates the
    /// rasters, so it forces the rebuild path. Default: off.
    pub deskew_percent: Option<u8>,

    /// Detect page orientation and rotate the final output accordingly.
    pub autorotate: bool,

    /// Fraction of available CPU cores used for per-page fan-out, in
    /// `(0.0, 1.0]`. Default: 1.0 (all cores). At least one worker always runs.
    pub parallelism: f64,

    /// Also write `<output>.txt` with page texts concatenated in page order.
    pub text_sidecar: bool,

    /// Overwrite protection: refuse to run if the output (or sidecar) exists.
    pub safe_mode: bool,

    /// Refuse inputs that already carry a text layer.
    pub check_text: bool,

    /// Refuse encrypted inputs instead of rebuilding them.
    pub check_protection: bool,

    /// Strip existing text from the input (ghostscript `-dFILTERTEXT`)
    /// before rasterizing, so native text is not OCRed again.
    pub ignore_existing_text: bool,

    /// Refuse inputs with more pages than this.
    pub max_pages: Option<usize>,

    /// Refuse inputs smaller than this many KiB.
    pub min_kbytes: Option<u64>,

    /// Explicit output file. Mutually exclusive with `output_dir`.
    pub output_file: Option<PathBuf>,

    /// Output directory; the file keeps the `<stem>-OCR.pdf` naming.
    pub output_dir: Option<PathBuf>,

    /// Keep the temporary workspace after the run (for debugging).
    pub keep_temps: bool,

    /// Wall-clock budget for the whole document. On expiry every in-flight
    /// external process is killed and the workspace removed.
    pub timeout: Option<Duration>,

    /// Draw visible dashed bounding boxes instead of invisible text.
    /// Debug aid for inspecting geometry alignment.
    pub debug_boxes: bool,

    /// Page size in pixels assumed when recognition geometry is
    /// unrecoverable, interpreted at the synthesizer DPI.
    /// Default: 1700×2400 (portrait Letter at 200 px/in, the historical
    /// behaviour of this pipeline — see DESIGN.md).
    pub fallback_page_px: (u32, u32),

    /// DPI at which hOCR pixel coordinates are converted to PDF points.
    /// Default: 300.
    pub synthesis_dpi: u32,

    /// Optional progress callback receiving per-stage and per-page events.
    pub progress: Option<SharedProgress>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            languages: "por+eng".into(),
            fallback_language: "eng".into(),
            psm: "1".into(),
            text_strategy: TextStrategy::default(),
            ocr_enabled: true,
            extra_ocr_args: Vec::new(),
            rebuild_preset: RebuildPreset::default(),
            force_rebuild: false,
            deskew_percent: None,
            autorotate: false,
            parallelism: 1.0,
            text_sidecar: false,
            safe_mode: false,
            check_text: false,
            check_protection: false,
            ignore_existing_text: false,
            max_pages: None,
            min_kbytes: None,
            output_file: None,
            output_dir: None,
            keep_temps: false,
            timeout: None,
            debug_boxes: false,
            fallback_page_px: (1700, 2400),
            synthesis_dpi: 300,
            progress: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("dpi", &self.dpi)
            .field("languages", &self.languages)
            .field("psm", &self.psm)
            .field("text_strategy", &self.text_strategy)
            .field("ocr_enabled", &self.ocr_enabled)
            .field("rebuild_preset", &self.rebuild_preset)
            .field("force_rebuild", &self.force_rebuild)
            .field("deskew_percent", &self.deskew_percent)
            .field("autorotate", &self.autorotate)
            .field("parallelism", &self.parallelism)
            .field("text_sidecar", &self.text_sidecar)
            .field("timeout", &self.timeout)
            .field("progress", &self.progress.as_ref().map(|_| "<dyn ProgressCallback>"))
            .finish_non_exhaustive()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Number of fan-out workers: `cpus × parallelism`, minimum one.
    pub fn workers(&self) -> usize {
        ((num_cpus::get() as f64) * self.parallelism).floor().max(1.0) as usize
    }

    /// The deskew threshold formatted for the preprocessor, e.g. `"40%"`.
    pub fn deskew_threshold(&self) -> Option<String> {
        self.deskew_percent.map(|p| format!("{p}%"))
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 1200);
        self
    }

    pub fn languages(mut self, langs: impl Into<String>) -> Self {
        self.config.languages = langs.into();
        self
    }

    pub fn fallback_language(mut self, lang: impl Into<String>) -> Self {
        self.config.fallback_language = lang.into();
        self
    }

    pub fn psm(mut self, psm: impl Into<String>) -> Self {
        self.config.psm = psm.into();
        self
    }

    pub fn text_strategy(mut self, strategy: TextStrategy) -> Self {
        self.config.text_strategy = strategy;
        self
    }

    pub fn ocr_enabled(mut self, enabled: bool) -> Self {
        self.config.ocr_enabled = enabled;
        self
    }

    pub fn extra_ocr_args(mut self, args: Vec<String>) -> Self {
        self.config.extra_ocr_args = args;
        self
    }

    pub fn rebuild_preset(mut self, preset: RebuildPreset) -> Self {
        self.config.rebuild_preset = preset;
        self
    }

    pub fn force_rebuild(mut self, v: bool) -> Self {
        self.config.force_rebuild = v;
        self
    }

    pub fn deskew_percent(mut self, percent: u8) -> Self {
        self.config.deskew_percent = Some(percent.clamp(1, 100));
        self
    }

    pub fn autorotate(mut self, v: bool) -> Self {
        self.config.autorotate = v;
        self
    }

    pub fn parallelism(mut self, fraction: f64) -> Self {
        self.config.parallelism = fraction;
        self
    }

    pub fn text_sidecar(mut self, v: bool) -> Self {
        self.config.text_sidecar = v;
        self
    }

    pub fn safe_mode(mut self, v: bool) -> Self {
        self.config.safe_mode = v;
        self
    }

    pub fn check_text(mut self, v: bool) -> Self {
        self.config.check_text = v;
        self
    }

    pub fn check_protection(mut self, v: bool) -> Self {
        self.config.check_protection = v;
        self
    }

    pub fn ignore_existing_text(mut self, v: bool) -> Self {
        self.config.ignore_existing_text = v;
        self
    }

    pub fn max_pages(mut self, limit: usize) -> Self {
        self.config.max_pages = Some(limit);
        self
    }

    pub fn min_kbytes(mut self, limit: u64) -> Self {
        self.config.min_kbytes = Some(limit);
        self
    }

    pub fn output_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_file = Some(path.into());
        self
    }

    pub fn output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output_dir = Some(path.into());
        self
    }

    pub fn keep_temps(mut self, v: bool) -> Self {
        self.config.keep_temps = v;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    pub fn debug_boxes(mut self, v: bool) -> Self {
        self.config.debug_boxes = v;
        self
    }

    pub fn fallback_page_px(mut self, width: u32, height: u32) -> Self {
        self.config.fallback_page_px = (width.max(1), height.max(1));
        self
    }

    pub fn synthesis_dpi(mut self, dpi: u32) -> Self {
        self.config.synthesis_dpi = dpi.clamp(72, 1200);
        self
    }

    pub fn progress(mut self, cb: Arc<dyn ProgressCallback>) -> Self {
        self.config.progress = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, OcrSandwichError> {
        let c = &self.config;
        if !(c.parallelism > 0.0 && c.parallelism <= 1.0) {
            return Err(OcrSandwichError::InvalidConfig(format!(
                "parallelism must be in (0.0, 1.0], got {}",
                c.parallelism
            )));
        }
        if c.output_file.is_some() && c.output_dir.is_some() {
            return Err(OcrSandwichError::InvalidConfig(
                "output file and output directory cannot both be forced".into(),
            ));
        }
        if c.languages.trim().is_empty() {
            return Err(OcrSandwichError::InvalidConfig(
                "at least one OCR language is required".into(),
            ));
        }
        // Deskew and forced rebuild both imply the rebuild path, which
        // discards existing page content; detecting existing text would then
        // be pointless at best and misleading at worst.
        if c.ignore_existing_text && (c.force_rebuild || c.deskew_percent.is_some()) {
            return Err(OcrSandwichError::RebuildConflict);
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::builder().build().unwrap();
        assert_eq!(config.dpi, 300);
        assert_eq!(config.languages, "por+eng");
        assert_eq!(config.rebuild_preset, RebuildPreset::Best);
        assert!(config.workers() >= 1);
    }

    #[test]
    fn dpi_is_clamped() {
        let config = PipelineConfig::builder().dpi(10).build().unwrap();
        assert_eq!(config.dpi, 72);
        let config = PipelineConfig::builder().dpi(5000).build().unwrap();
        assert_eq!(config.dpi, 1200);
    }

    #[test]
    fn parallelism_out_of_range_is_rejected() {
        assert!(PipelineConfig::builder().parallelism(0.0).build().is_err());
        assert!(PipelineConfig::builder().parallelism(1.5).build().is_err());
        assert!(PipelineConfig::builder().parallelism(0.5).build().is_ok());
    }

    #[test]
    fn forced_file_and_dir_conflict() {
        let result = PipelineConfig::builder()
            .output_file("/tmp/out.pdf")
            .output_dir("/tmp")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn rebuild_and_ignore_text_conflict() {
        let result = PipelineConfig::builder()
            .force_rebuild(true)
            .ignore_existing_text(true)
            .build();
        assert!(matches!(result, Err(OcrSandwichError::RebuildConflict)));

        let result = PipelineConfig::builder()
            .deskew_percent(40)
            .ignore_existing_text(true)
            .build();
        assert!(matches!(result, Err(OcrSandwichError::RebuildConflict)));
    }

    #[test]
    fn preset_operator_strings() {
        assert_eq!(
            RebuildPreset::Fast.operators(),
            "-threshold 60% -compress Group4"
        );
        assert_eq!(
            RebuildPreset::Best.operators(),
            "-colors 2 -colorspace gray -normalize -threshold 60% -compress Group4"
        );
        assert_eq!(
            RebuildPreset::Grayscale.operators(),
            "-threshold 85% -morphology Dilate Diamond -compress Group4"
        );
        assert_eq!(
            RebuildPreset::Jpeg.operators(),
            "-strip -interlace Plane -gaussian-blur 0.05 -quality 50% -compress JPEG"
        );
        assert_eq!(RebuildPreset::Jpeg2000.operators(), "-quality 32% -compress JPEG2000");
        assert_eq!(
            RebuildPreset::Raw("-quality 10%".into()).operators(),
            "-quality 10%"
        );
    }

    #[test]
    fn deskew_threshold_formatting() {
        let config = PipelineConfig::builder().deskew_percent(40).build().unwrap();
        assert_eq!(config.deskew_threshold().as_deref(), Some("40%"));
        let config = PipelineConfig::builder().build().unwrap();
        assert!(config.deskew_threshold().is_none());
    }
}

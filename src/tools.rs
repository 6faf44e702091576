//! External toolchain: discovery, capability flags, and process execution.
//!
//! Every external tool path is resolved exactly once at startup into an
//! immutable [`Toolchain`] value that the orchestrator threads into each
//! worker unit. Workers never consult ambient state or PATH themselves.
//!
//! ## Why `kill_on_drop`?
//!
//! Foreign executables cannot be cancelled cooperatively. Every command is
//! spawned with `kill_on_drop(true)`, so when the document's wall-clock
//! timeout fires and the in-flight stage futures are dropped, the kernel
//! reaps the whole set of child processes instead of leaving orphaned OCR
//! runs chewing CPU.

use crate::config::PipelineConfig;
use crate::error::OcrSandwichError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Resolved external tool paths and capability flags.
///
/// Optional tools degrade features instead of failing startup: without qpdf
/// the built-in compositor merges the sandwich, without ghostscript's ps2pdf
/// pair the merge-repair fallback is unavailable.
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// OCR engine (tesseract contract).
    pub ocr: PathBuf,
    /// PDF rasterizer (pdftoppm contract).
    pub pdftoppm: PathBuf,
    /// Image/PDF converter (ImageMagick convert contract).
    pub convert: PathBuf,
    /// In-place image mutator for deskew (ImageMagick mogrify contract).
    /// Only resolved when deskew is requested.
    pub mogrify: Option<PathBuf>,
    /// Ghostscript, used to strip existing text before rasterization.
    /// Only resolved when `ignore_existing_text` is requested.
    pub ghostscript: Option<PathBuf>,
    /// Structural PDF merger. Absent ⇒ built-in compositor.
    pub qpdf: Option<PathBuf>,
    /// PDF→PostScript half of the repair round-trip.
    pub pdf2ps: Option<PathBuf>,
    /// PostScript→PDF half of the repair round-trip.
    pub ps2pdf: Option<PathBuf>,
    /// Whether the OCR engine supports `textonly_pdf` output. When it does
    /// not, the embedded raster is stripped from its PDFs after the fact.
    pub ocr_textonly_pdf: bool,
}

impl Toolchain {
    /// Resolve every tool the given configuration needs.
    ///
    /// Required tools abort with [`OcrSandwichError::ToolMissing`]; optional
    /// tools log the degraded behaviour and continue.
    pub async fn discover(config: &PipelineConfig) -> Result<Self, OcrSandwichError> {
        let ocr = require("tesseract", "Install tesseract-ocr to run recognition.")?;
        let pdftoppm = require("pdftoppm", "Install poppler-utils to rasterize PDF pages.")?;
        let convert = find("convert")
            .or_else(|| find("magick"))
            .ok_or_else(|| OcrSandwichError::ToolMissing {
                tool: "convert".into(),
                hint: "Install ImageMagick (convert or magick) to build PDF pages from images."
                    .into(),
            })?;

        let mogrify = if config.deskew_percent.is_some() {
            Some(require(
                "mogrify",
                "Install ImageMagick (mogrify) to use deskew.",
            )?)
        } else {
            None
        };

        let ghostscript = if config.ignore_existing_text {
            Some(require(
                "gs",
                "Install ghostscript to use ignore-existing-text.",
            )?)
        } else {
            None
        };

        let qpdf = find("qpdf");
        if qpdf.is_none() {
            warn!("qpdf not available; merge will use the built-in compositor");
        }

        let pdf2ps = find("pdf2ps");
        let ps2pdf = find("ps2pdf");
        if pdf2ps.is_none() || ps2pdf.is_none() {
            warn!("pdf2ps/ps2pdf (ghostscript) not available; merge repair will not work");
        }

        let ocr_textonly_pdf = probe_textonly_pdf(&ocr).await;
        debug!("ocr engine can textonly_pdf: {ocr_textonly_pdf}");

        Ok(Self {
            ocr,
            pdftoppm,
            convert,
            mogrify,
            ghostscript,
            qpdf,
            pdf2ps,
            ps2pdf,
            ocr_textonly_pdf,
        })
    }
}

fn find(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

fn require(name: &str, hint: &str) -> Result<PathBuf, OcrSandwichError> {
    find(name).ok_or_else(|| OcrSandwichError::ToolMissing {
        tool: name.into(),
        hint: hint.into(),
    })
}

/// Capability probe: newer engines advertise `textonly_pdf` in their
/// parameter listing. A failed probe just means the strip-images fallback
/// runs instead.
async fn probe_textonly_pdf(ocr: &Path) -> bool {
    match Command::new(ocr)
        .arg("--print-parameters")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
    {
        Ok(out) => String::from_utf8_lossy(&out.stdout).contains("textonly_pdf"),
        Err(e) => {
            warn!("could not probe OCR engine capabilities: {e}");
            false
        }
    }
}

/// Outcome of one external command.
#[derive(Debug)]
pub struct ToolOutput {
    /// Process exit success.
    pub success: bool,
    /// Captured stderr, kept for diagnostics on failure.
    pub stderr: String,
}

/// Run an external tool to completion, capturing stderr for diagnostics.
///
/// Stdout is discarded — every tool in this pipeline communicates through
/// files. The child is killed if the returned future is dropped.
pub async fn run_tool(
    program: &Path,
    args: &[String],
    cwd: Option<&Path>,
) -> Result<ToolOutput, OcrSandwichError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    debug!("running {} {}", program.display(), args.join(" "));

    let out = cmd.output().await.map_err(|e| OcrSandwichError::Internal(format!(
        "failed to spawn {}: {e}",
        program.display()
    )))?;

    let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
    if !out.status.success() {
        debug!(
            "{} exited with {:?}: {}",
            program.display(),
            out.status.code(),
            stderr
        );
    }
    Ok(ToolOutput {
        success: out.status.success(),
        stderr,
    })
}

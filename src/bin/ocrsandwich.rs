//! CLI binary for ocr-sandwich.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, drives the batch, and renders progress.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use ocr_sandwich::{
    run_batch, PipelineConfig, ProgressCallback, RebuildPreset, Stage, TextStrategy,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # OCR a scanned PDF into scan-OCR.pdf next to it
  ocrsandwich scan.pdf

  # German + English, orientation correction, text sidecar
  ocrsandwich -l deu+eng --autorotate --text-sidecar scan.pdf

  # Force a rebuild with the smart compression preset
  ocrsandwich --force-rebuild --preset smart colour-scan.pdf

  # TIFF input (rebuild is implied), explicit output file
  ocrsandwich -o out.pdf fax.tiff

  # Batch several files; exit status is non-zero if any of them failed
  ocrsandwich a.pdf b.pdf c.tiff

  # Raw converter operators instead of a preset
  ocrsandwich --preset="-threshold 60% -compress Group4" scan.pdf

EXTERNAL TOOLS:
  required  tesseract, pdftoppm (poppler), convert (ImageMagick)
  optional  qpdf       faster structural merge
            mogrify    needed for --deskew
            gs         needed for --ignore-existing-text
            pdf2ps/ps2pdf   merge repair fallback

  A missing required tool aborts at startup with a hint; missing optional
  tools degrade the corresponding feature with a warning.
"#;

/// Add an invisible, searchable text layer to scanned PDFs and images.
#[derive(Parser, Debug)]
#[command(
    name = "ocrsandwich",
    version,
    about = "OCR scanned documents into searchable sandwich PDFs",
    long_about = "OCR a PDF or raster image and composite an invisible text layer over the \
original page imagery, producing a searchable PDF that looks identical to the input.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Input files (PDF, TIFF, JPEG or PNG). Directories must be expanded
    /// by the caller.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Write the output PDF to this exact path (single input only).
    #[arg(short, long, env = "OCRSANDWICH_OUTPUT")]
    output: Option<PathBuf>,

    /// Write outputs into this directory, keeping the `<stem>-OCR.pdf` naming.
    #[arg(short = 'O', long, conflicts_with = "output")]
    output_dir: Option<PathBuf>,

    /// OCR language codes, engine syntax (e.g. por+eng, deu).
    #[arg(short, long, env = "OCRSANDWICH_LANGS", default_value = "por+eng")]
    languages: String,

    /// Page segmentation mode passed to the OCR engine.
    #[arg(long, default_value = "1")]
    psm: String,

    /// Rasterization resolution in DPI (72-1200).
    #[arg(short = 'r', long, env = "OCRSANDWICH_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=1200))]
    dpi: u32,

    /// How OCR text becomes a PDF layer: engine-direct or hOCR geometry.
    #[arg(long, value_enum, default_value = "direct")]
    strategy: StrategyArg,

    /// Skip OCR entirely (test compression/rebuild settings without paying
    /// for recognition).
    #[arg(long)]
    no_ocr: bool,

    /// Extra flags appended verbatim to every OCR engine call.
    #[arg(short = 'x', long = "ocr-arg")]
    ocr_args: Vec<String>,

    /// Rebuild compression preset: fast, best, grayscale, jpeg, jpeg2000,
    /// smart, or a raw convert operator string.
    #[arg(short = 'g', long, default_value = "best")]
    preset: String,

    /// Force the PDF to be rebuilt from extracted page images.
    #[arg(short = 'f', long)]
    force_rebuild: bool,

    /// Deskew pages before OCR with this threshold percentage (implies rebuild).
    #[arg(short = 'd', long, value_name = "PERCENT")]
    deskew: Option<u8>,

    /// Detect page orientation and rotate the output accordingly.
    #[arg(short = 'u', long)]
    autorotate: bool,

    /// Fraction of CPU cores used for per-page parallelism (0-1].
    #[arg(short = 'j', long, env = "OCRSANDWICH_JOBS", default_value_t = 1.0)]
    jobs: f64,

    /// Also write a plain-text sidecar (<output>.pdf.txt).
    #[arg(short = 'w', long)]
    text_sidecar: bool,

    /// Safe mode: never overwrite an existing output file.
    #[arg(short = 's', long)]
    safe_mode: bool,

    /// Refuse to process PDFs that already contain text.
    #[arg(short = 't', long)]
    check_text: bool,

    /// Refuse to process encrypted PDFs.
    #[arg(short = 'a', long)]
    check_protection: bool,

    /// Strip existing text before OCR so it is not recognized twice.
    #[arg(long)]
    ignore_existing_text: bool,

    /// Refuse documents with more pages than this.
    #[arg(short = 'b', long, value_name = "PAGES")]
    max_pages: Option<usize>,

    /// Refuse input files smaller than this many KiB.
    #[arg(long, value_name = "KIB")]
    min_kbytes: Option<u64>,

    /// Keep the temporary workspace for debugging.
    #[arg(short = 'k', long)]
    keep_temps: bool,

    /// Wall-clock limit per document, in seconds.
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Draw visible dashed boxes instead of invisible text (geometry debug).
    #[arg(long)]
    debug_boxes: bool,

    /// Print the per-document run reports as JSON.
    #[arg(long)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "OCRSANDWICH_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "OCRSANDWICH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum StrategyArg {
    /// The engine emits a text-bearing PDF directly.
    Direct,
    /// The engine emits hOCR geometry which is synthesized into a page.
    Geometry,
}

impl From<StrategyArg> for TextStrategy {
    fn from(v: StrategyArg) -> Self {
        match v {
            StrategyArg::Direct => TextStrategy::Direct,
            StrategyArg::Geometry => TextStrategy::Geometry,
        }
    }
}

fn parse_preset(s: &str) -> RebuildPreset {
    match s {
        "fast" => RebuildPreset::Fast,
        "best" => RebuildPreset::Best,
        "grayscale" => RebuildPreset::Grayscale,
        "jpeg" => RebuildPreset::Jpeg,
        "jpeg2000" => RebuildPreset::Jpeg2000,
        "smart" => RebuildPreset::Smart,
        raw => RebuildPreset::Raw(raw.to_string()),
    }
}

// ── Progress rendering ───────────────────────────────────────────────────

/// Terminal progress: one bar that re-targets itself per stage. Fan-out
/// stages show page counters; whole-document stages show a spinner line.
struct CliProgress {
    bar: ProgressBar,
    done: AtomicUsize,
    current_stage: Mutex<Option<Stage>>,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(100));
        Arc::new(Self {
            bar,
            done: AtomicUsize::new(0),
            current_stage: Mutex::new(None),
        })
    }
}

impl ProgressCallback for CliProgress {
    fn on_document_start(&self, input: &Path, pages: Option<usize>) {
        self.bar.set_prefix("Processing");
        match pages {
            Some(n) => self
                .bar
                .set_message(format!("{} ({n} pages)", input.display())),
            None => self.bar.set_message(input.display().to_string()),
        }
    }

    fn on_stage_start(&self, stage: Stage, units: usize) {
        *self.current_stage.lock().unwrap() = Some(stage);
        self.done.store(0, Ordering::SeqCst);
        if units > 0 {
            self.bar.set_length(units as u64);
            self.bar.set_position(0);
            self.bar.set_style(
                ProgressStyle::with_template(
                    "{spinner:.cyan} {prefix:.bold}  [{bar:36.green/238}] {pos:>4}/{len} pages  {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
        } else {
            self.bar.set_style(
                ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
        }
        self.bar.set_prefix(capitalize(stage.label()));
        self.bar.set_message("");
    }

    fn on_page_done(&self, _stage: Stage, _page: u32, _total: usize) {
        self.done.fetch_add(1, Ordering::SeqCst);
        self.bar.inc(1);
    }

    fn on_stage_complete(&self, _stage: Stage) {
        *self.current_stage.lock().unwrap() = None;
    }

    fn on_document_complete(&self, input: &Path, success: bool) {
        self.bar.finish_and_clear();
        if success {
            eprintln!("\x1b[32m✔\x1b[0m {}", input.display());
        } else {
            eprintln!("\x1b[31m✘\x1b[0m {}", input.display());
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

// ── Entry point ──────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Suppress library INFO logs while the progress bar owns the terminal.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    if cli.output.is_some() && cli.inputs.len() > 1 {
        anyhow::bail!("--output can only be used with a single input; use --output-dir for batches");
    }

    let config = build_config(&cli).context("invalid configuration")?;

    let batch = run_batch(&cli.inputs, &config).await;

    if cli.json {
        let reports: Vec<serde_json::Value> = batch
            .results
            .iter()
            .map(|(path, result)| match result {
                Ok(output) => serde_json::json!({
                    "input": path,
                    "ok": true,
                    "output": output.output_pdf,
                    "sidecar": output.sidecar_text,
                    "stats": output.stats,
                    "page_errors": output.page_errors,
                }),
                Err(e) => serde_json::json!({
                    "input": path,
                    "ok": false,
                    "error": e.to_string(),
                }),
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&reports).context("failed to serialize reports")?
        );
    } else if !cli.quiet {
        for (path, result) in &batch.results {
            match result {
                Ok(output) => {
                    eprintln!(
                        "{} → {}  ({} pages, {:.1}s{})",
                        path.display(),
                        output.output_pdf.display(),
                        output.stats.pages,
                        output.stats.total_duration_ms as f64 / 1000.0,
                        if output.page_errors.is_empty() {
                            String::new()
                        } else {
                            format!(", {} pages without text", output.page_errors.len())
                        }
                    );
                }
                Err(e) => eprintln!("{}: error: {e}", path.display()),
            }
        }
    }

    if batch.all_succeeded() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .dpi(cli.dpi)
        .languages(cli.languages.clone())
        .psm(cli.psm.clone())
        .text_strategy(cli.strategy.clone().into())
        .ocr_enabled(!cli.no_ocr)
        .extra_ocr_args(cli.ocr_args.clone())
        .rebuild_preset(parse_preset(&cli.preset))
        .force_rebuild(cli.force_rebuild)
        .autorotate(cli.autorotate)
        .parallelism(cli.jobs)
        .text_sidecar(cli.text_sidecar)
        .safe_mode(cli.safe_mode)
        .check_text(cli.check_text)
        .check_protection(cli.check_protection)
        .ignore_existing_text(cli.ignore_existing_text)
        .keep_temps(cli.keep_temps)
        .debug_boxes(cli.debug_boxes);

    if let Some(percent) = cli.deskew {
        builder = builder.deskew_percent(percent);
    }
    if let Some(pages) = cli.max_pages {
        builder = builder.max_pages(pages);
    }
    if let Some(kib) = cli.min_kbytes {
        builder = builder.min_kbytes(kib);
    }
    if let Some(ref path) = cli.output {
        builder = builder.output_file(path.clone());
    }
    if let Some(ref dir) = cli.output_dir {
        builder = builder.output_dir(dir.clone());
    }
    if let Some(secs) = cli.timeout {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    if !cli.quiet && !cli.no_progress && !cli.json {
        builder = builder.progress(CliProgress::new());
    }

    Ok(builder.build()?)
}

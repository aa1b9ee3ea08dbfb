//! CLI binary for pixmorph.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig` / `ConversionRequest` / `ProcessingOptions` and prints
//! results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pixmorph::{
    convert, inspect, list_inputs, list_outputs, process, process_archive, process_batch,
    resolve_output, ConversionProgressCallback, ConversionRequest, ConversionResult,
    CropOptions, PipelineConfig, ProcessingOptions, ProgressCallback, ResizeFit, ResizeOptions,
    WatermarkOptions, WatermarkPosition,
};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

/// Terminal progress for multi-page documents and batches. Pages may
/// complete out of order when `--page-concurrency` is above 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Hidden until `on_conversion_start`: single images emit no events and
    /// should not flash a bar.
    fn new() -> Arc<Self> {
        Arc::new(Self {
            bar: ProgressBar::hidden(),
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, page: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&page))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len}  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Encoding");
        self.bar.enable_steady_tick(Duration::from_millis(80));
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Encoding {total_pages} outputs…"))
        ));
    }

    fn on_page_start(&self, page: usize, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(page, Instant::now());
        }
        self.bar.set_message(format!("#{page}"));
    }

    fn on_page_complete(&self, page: usize, total: usize, bytes: u64) {
        let secs = self.elapsed_secs(page);
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {:<12}  {}",
            green("✓"),
            page,
            total,
            dim(&format!("{bytes:>8} bytes")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page);
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Keep the log line to one row.
        let first_line = error.lines().next().unwrap_or(error);
        let msg: String = if first_line.chars().count() > 80 {
            first_line.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            first_line.to_string()
        };

        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            red("✗"),
            page,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let failed = total_pages.saturating_sub(success_count);
        self.bar.finish_and_clear();
        if failed > 0 {
            eprintln!(
                "{} {}/{} outputs encoded  ({} failed)",
                if failed == total_pages {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Plain conversion
  pixmorph photo.png --to webp --quality 80

  # AVIF, or HEIC with the AV1 codec instead of HEVC
  pixmorph photo.jpg --to avif
  pixmorph photo.jpg --to heic --codec av1

  # Every page of a PDF as PNG (returns a .tar.gz with one file per page)
  pixmorph report.pdf --to png --dpi 200

  # Resize, crop, rotate and watermark
  pixmorph photo.jpg --size 800x600 --fit contain --crop 10 --rotate 90 \
      --watermark "© ACME" --watermark-position top-right --to jpg

  # Logo watermark, faded to 30%
  pixmorph photo.jpg --watermark-image logo.png --watermark-opacity 0.3 --to jpg

  # Several inputs with the same transforms, bundled into one archive
  pixmorph a.jpg b.png c.webp --size 256 --to png

  # Every image inside an uploaded bundle
  pixmorph photos.tar.gz --bundle --size 1024 --to webp

  # Convert from URL
  pixmorph https://example.com/logo.svg --to ico

  # Format and size only
  pixmorph --inspect-only scan.tiff

  # JSON result for scripting
  pixmorph photo.png --to jpg --json

FIT MODES (--fit):
  cover    fill the box, crop the overflow (default)
  contain  fit inside the box, pad with transparency
  fill     stretch to the exact box
  inside   fit inside the box, no padding
  outside  cover the box, no cropping

WATERMARK POSITIONS:
  top-left, top, top-right, left, center, right,
  bottom-left, bottom, bottom-right (default)

ENVIRONMENT VARIABLES:
  PIXMORPH_CONVERTER_PATH   ImageMagick binary (magick / convert)
  PIXMORPH_RASTERIZER_PATH  Ghostscript binary (gs / gswin64c)
  PIXMORPH_OUTPUT_DIR       Output directory (default: uploads/output)
  RUST_LOG                  Log filter, e.g. pixmorph=debug

EXTERNAL TOOLS:
  ImageMagick is needed for ico, tga, psd, jp2 and pdf output, HEVC HEIC,
  and inputs the built-in decoders cannot read. Ghostscript is needed for
  pdf, ps and eps input. Neither is needed for jpeg, png, webp, gif, tiff,
  bmp or avif.
"#;

/// Convert and transform images and documents.
#[derive(Parser, Debug)]
#[command(
    name = "pixmorph",
    version,
    about = "Convert images and documents between formats, with resize, crop, rotate and watermark",
    long_about = "Convert images and documents (local files or URLs) between formats. Common \
raster formats are encoded in-process; ImageMagick covers icons, Targa, Photoshop, JPEG 2000 \
and HEVC HEIC, and Ghostscript rasterizes PDF, PostScript and EPS.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file paths or HTTP/HTTPS URLs. More than one runs a batch.
    #[arg(required_unless_present = "list_formats")]
    inputs: Vec<String>,

    /// Output format key (png, jpg, webp, avif, heic, ico, pdf, …).
    #[arg(short, long, env = "PIXMORPH_TO")]
    to: Option<String>,

    /// Treat the input as a .tar/.tar.gz bundle and process every image in it.
    #[arg(long, env = "PIXMORPH_BUNDLE")]
    bundle: bool,

    /// Encoder quality, 1–100.
    #[arg(short = 'Q', long, env = "PIXMORPH_QUALITY")]
    quality: Option<i64>,

    /// Codec for HEIF-family output: av1 or hevc.
    #[arg(long, env = "PIXMORPH_CODEC")]
    codec: Option<String>,

    /// Resize to a box: 300, 300x200 or 300,200.
    #[arg(long, env = "PIXMORPH_SIZE")]
    size: Option<String>,

    /// Resize width in pixels.
    #[arg(long, env = "PIXMORPH_WIDTH")]
    width: Option<u32>,

    /// Resize height in pixels.
    #[arg(long, env = "PIXMORPH_HEIGHT")]
    height: Option<u32>,

    /// Resize fit mode: cover, contain, fill, inside, outside.
    #[arg(long, env = "PIXMORPH_FIT")]
    fit: Option<ResizeFit>,

    /// Allow resizing above the original dimensions.
    #[arg(long, env = "PIXMORPH_ENLARGE")]
    enlarge: bool,

    /// Crop margins, CSS style: "10", "10,20", "10,20,30" or "10,20,30,40".
    #[arg(long, env = "PIXMORPH_CROP", allow_hyphen_values = true)]
    crop: Option<String>,

    /// Clockwise rotation in degrees (right angles, or 0–360).
    #[arg(long, env = "PIXMORPH_ROTATE", allow_hyphen_values = true)]
    rotate: Option<f64>,

    /// Watermark text.
    #[arg(long, env = "PIXMORPH_WATERMARK")]
    watermark: Option<String>,

    /// Watermark logo (scaled to 20% of the image width). Excludes --watermark.
    #[arg(long, env = "PIXMORPH_WATERMARK_IMAGE", conflicts_with = "watermark")]
    watermark_image: Option<PathBuf>,

    /// Watermark anchor (see WATERMARK POSITIONS).
    #[arg(long, env = "PIXMORPH_WATERMARK_POSITION")]
    watermark_position: Option<WatermarkPosition>,

    /// Watermark colour, #rgb or #rrggbb.
    #[arg(long, env = "PIXMORPH_WATERMARK_COLOR")]
    watermark_color: Option<String>,

    /// Watermark opacity, 0.0–1.0.
    #[arg(long, env = "PIXMORPH_WATERMARK_OPACITY")]
    watermark_opacity: Option<f32>,

    /// Watermark font size in pixels.
    #[arg(long, env = "PIXMORPH_WATERMARK_SIZE")]
    watermark_size: Option<u32>,

    /// Prefer lossless encoding where the format supports it.
    #[arg(long, env = "PIXMORPH_LOSSLESS")]
    lossless: bool,

    /// Directory results are written to.
    #[arg(short, long, env = "PIXMORPH_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Prefix of the printed download URL.
    #[arg(long, env = "PIXMORPH_PUBLIC_PREFIX")]
    public_prefix: Option<String>,

    /// Rasterization DPI for PDF / PostScript / EPS (36–600).
    #[arg(long, env = "PIXMORPH_DPI", default_value_t = 144,
          value_parser = clap::value_parser!(u32).range(36..=600))]
    dpi: u32,

    /// Timeout for each external tool run, in seconds.
    #[arg(long, env = "PIXMORPH_TOOL_TIMEOUT", default_value_t = 120)]
    tool_timeout: u64,

    /// Pages (or batch items) encoded at once.
    #[arg(long, env = "PIXMORPH_PAGE_CONCURRENCY", default_value_t = 1)]
    page_concurrency: usize,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PIXMORPH_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// ImageMagick binary.
    #[arg(long, env = "PIXMORPH_CONVERTER_PATH")]
    converter_path: Option<PathBuf>,

    /// Ghostscript binary.
    #[arg(long, env = "PIXMORPH_RASTERIZER_PATH")]
    rasterizer_path: Option<PathBuf>,

    /// Print the result as JSON.
    #[arg(long, env = "PIXMORPH_JSON")]
    json: bool,

    /// Print format and dimensions only, no conversion.
    #[arg(long)]
    inspect_only: bool,

    /// List supported input and output formats.
    #[arg(long)]
    list_formats: bool,

    /// Disable the progress bar.
    #[arg(long, env = "PIXMORPH_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PIXMORPH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PIXMORPH_QUIET")]
    quiet: bool,
}

impl Cli {
    fn has_transforms(&self) -> bool {
        self.size.is_some()
            || self.width.is_some()
            || self.height.is_some()
            || self.crop.is_some()
            || self.rotate.is_some()
            || self.watermark.is_some()
            || self.watermark_image.is_some()
            || self.lossless
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Format listing ───────────────────────────────────────────────────
    if cli.list_formats {
        print_formats(cli.json)?;
        return Ok(());
    }

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        for input in &cli.inputs {
            let info = inspect(input, &config)
                .await
                .with_context(|| format!("Failed to inspect {input}"))?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&info).context("Failed to serialise info")?
                );
            } else {
                println!("File:        {}", input);
                println!("Format:      {}", info.format.as_deref().unwrap_or("unknown"));
                println!("Dimensions:  {}x{}", info.width, info.height);
                println!("Size:        {} bytes", info.bytes);
            }
        }
        return Ok(());
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let start = Instant::now();
    let result = if cli.bundle {
        let options = build_options(&cli)?;
        process_archive(&cli.inputs[0], &options, &config)
            .await
            .context("Bundle processing failed")?
    } else if cli.inputs.len() > 1 {
        let options = build_options(&cli)?;
        process_batch(&cli.inputs, &options, &config)
            .await
            .context("Batch processing failed")?
    } else if cli.has_transforms() {
        let options = build_options(&cli)?;
        process(&cli.inputs[0], &options, &config)
            .await
            .context("Processing failed")?
    } else {
        let to = cli
            .to
            .as_deref()
            .context("--to is required when no transform is requested")?;
        let mut request = ConversionRequest::new(to);
        request.quality = cli.quality;
        request.codec = cli.codec.clone();
        convert(&cli.inputs[0], &request, &config)
            .await
            .context("Conversion failed")?
    };

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialise result")?
        );
    } else {
        println!("{}", result.output_path.display());
        if !cli.quiet {
            print_summary(&result, start.elapsed());
        }
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .dpi(cli.dpi)
        .tool_timeout_secs(cli.tool_timeout)
        .page_concurrency(cli.page_concurrency)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref dir) = cli.output_dir {
        builder = builder.output_dir(dir);
    }
    if let Some(ref prefix) = cli.public_prefix {
        builder = builder.public_prefix(prefix);
    }
    if let Some(ref p) = cli.converter_path {
        builder = builder.converter_path(p);
    }
    if let Some(ref p) = cli.rasterizer_path {
        builder = builder.rasterizer_path(p);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Map CLI args to `ProcessingOptions`.
fn build_options(cli: &Cli) -> Result<ProcessingOptions> {
    let resize = (cli.size.is_some() || cli.width.is_some() || cli.height.is_some()).then(|| {
        ResizeOptions {
            size: cli.size.clone(),
            width: cli.width,
            height: cli.height,
            fit: cli.fit.unwrap_or_default(),
            enlarge: cli.enlarge,
        }
    });

    let watermark = (cli.watermark.is_some() || cli.watermark_image.is_some()).then(|| {
        WatermarkOptions {
            text: cli.watermark.clone().unwrap_or_default(),
            image: cli.watermark_image.clone(),
            position: cli.watermark_position.unwrap_or_default(),
            color: cli.watermark_color.clone(),
            opacity: cli.watermark_opacity,
            font_size: cli.watermark_size,
        }
    });

    let options = ProcessingOptions {
        resize,
        crop: cli.crop.as_deref().map(CropOptions::from_shorthand),
        rotate: cli.rotate,
        watermark,
        output_format: cli.to.clone(),
        quality: cli.quality,
        lossless: cli.lossless,
        codec: cli.codec.clone(),
    };

    if let Some(ref to) = options.output_format {
        options.validate(Some(to)).context("Invalid options")?;
    }
    Ok(options)
}

fn print_formats(json: bool) -> Result<()> {
    if json {
        let outputs: Vec<_> = list_outputs()
            .into_iter()
            .filter_map(|k| resolve_output(k).ok())
            .collect();
        let value = serde_json::json!({
            "inputs": list_inputs(),
            "outputs": outputs,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&value).context("Failed to serialise formats")?
        );
        return Ok(());
    }

    println!("{}", bold("Input formats:"));
    println!("  {}", list_inputs().join(", "));
    println!();
    println!("{}", bold("Output formats:"));
    for key in list_outputs() {
        let d = resolve_output(key)?;
        let backend = if d.is_external() {
            dim("ImageMagick")
        } else {
            dim("built-in")
        };
        println!("  {:<6} .{:<5} {:<26} {}", key, d.extension, d.mime_type, backend);
    }
    Ok(())
}

fn print_summary(result: &ConversionResult, elapsed: Duration) {
    let shape = match (result.original_size, result.processed_size) {
        (Some((w0, h0)), Some((w1, h1))) => format!("  {w0}x{h0} → {w1}x{h1}"),
        (Some((w, h)), None) => format!("  {w}x{h}"),
        _ => String::new(),
    };
    let pages = if result.is_archive() {
        format!("  {} files", result.page_count)
    } else {
        String::new()
    };
    eprintln!(
        "{}  {} → {}{}{}  {} bytes  {}ms",
        if result.warnings.is_empty() {
            green("✔")
        } else {
            cyan("⚠")
        },
        result.input_format.as_deref().unwrap_or("?"),
        bold(&result.output_format),
        shape,
        pages,
        result.bytes_out,
        elapsed.as_millis(),
    );
    eprintln!("   {}", dim(&result.download_url));
    for w in &result.warnings {
        eprintln!("   {} {}", red("✗"), w);
    }
}

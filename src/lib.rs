//! # pixmorph
//!
//! Convert images and documents between formats, optionally resizing,
//! cropping, rotating and watermarking them on the way.
//!
//! ## Why this crate?
//!
//! No single encoder covers every format people ask for. The `image` crate
//! handles the common rasters in-process, ImageMagick covers icons, Targa,
//! Photoshop, JPEG 2000 and HEVC-coded HEIC, and Ghostscript is the only
//! practical way to turn PDF and PostScript into pixels. This crate picks
//! the right backend per target format, falls back once when the native
//! decoder cannot read an input, splits multi-page documents into one
//! output per page, and always cleans up its intermediates.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. Detect     content sniffing, extension as last resort
//!  ├─ 3. Rasterize  PDF / PS / EPS pages → PNG via Ghostscript
//!  ├─ 4. Transform  resize → crop → rotate → watermark  (process only)
//!  ├─ 5. Encode     native encoder or ImageMagick, per the format registry
//!  ├─ 6. Archive    tar.gz of per-page outputs (multi-page documents, batches)
//!  └─ 7. Publish    unique file name in the output directory
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pixmorph::{convert, ConversionRequest, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // ImageMagick and Ghostscript are discovered on PATH
//!     let config = PipelineConfig::default();
//!     let request = ConversionRequest::new("avif").quality(60);
//!     let result = convert("photo.png", &request, &config).await?;
//!     println!("{} ({} bytes)", result.download_url, result.bytes_out);
//!     Ok(())
//! }
//! ```
//!
//! ## External Tools
//!
//! | Tool | Needed for | Override |
//! |------|------------|----------|
//! | ImageMagick (`magick` / `convert`) | ico, tga, psd, jp2, pdf output; HEVC HEIC; inputs `image` cannot decode | `PIXMORPH_CONVERTER_PATH` |
//! | Ghostscript (`gs`) | pdf, ps, eps input | `PIXMORPH_RASTERIZER_PATH` |
//!
//! A missing tool is only an error when a request needs it.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pixmorph` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! pixmorph = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod formats;
pub mod options;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder, ToolPaths};
pub use convert::{convert, convert_from_bytes, convert_sync, inspect};
pub use error::PixmorphError;
pub use formats::{list_inputs, list_outputs, resolve_output, FormatDescriptor};
pub use options::{
    ConversionRequest, CropOptions, EncodeTarget, ProcessingOptions, Quality, ResizeFit,
    ResizeOptions, WatermarkOptions, WatermarkPosition,
};
pub use output::{ConversionResult, ImageInfo};
pub use process::{process, process_archive, process_batch, process_from_bytes};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};

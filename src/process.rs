//! Transform entry points: resize → crop → rotate → watermark → encode.
//!
//! The source is decoded once into memory, every configured stage runs on
//! a blocking thread, and the result goes through the same backend dispatch
//! as [`crate::convert`]. Without an explicit `output_format` the image is
//! re-encoded in its detected source format.
//!
//! Document inputs (PDF / PostScript / EPS) are processed from their first
//! page.

use crate::config::PipelineConfig;
use crate::error::{PixmorphError, StageError};
use crate::formats::{self, ARCHIVE_EXTENSION, ARCHIVE_KEY};
use crate::options::{EncodeTarget, ProcessingOptions};
use crate::output::ConversionResult;
use crate::pipeline::archive::{self, ArchiveEntry};
use crate::pipeline::dispatch::{self, join_error};
use crate::pipeline::rasterize::{self, PageRange};
use crate::pipeline::{
    detect, input, publish, remove_quietly, scratch_dir, scratch_file, transform,
};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// One processed image sitting in a scratch directory.
struct Processed {
    file: PathBuf,
    target: EncodeTarget,
    input_format: Option<String>,
    original_size: (u32, u32),
    processed_size: (u32, u32),
}

/// Apply `options` to a local file or HTTP(S) URL.
///
/// # Errors
/// - `UnsupportedFormat` / `InvalidQuality` / `InvalidCodec` /
///   `InvalidOption` before any pixel is decoded
/// - `FileNotFound` / `PermissionDenied` / `Download*` for the input
/// - `ToolNotFound` / `ToolIncompatible` when an external tool is needed
/// - `ProcessingFailed` for everything else
///
/// # Example
/// ```rust,no_run
/// use pixmorph::{process, PipelineConfig, ProcessingOptions, ResizeOptions, WatermarkOptions};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let options = ProcessingOptions {
///     resize: Some(ResizeOptions { size: Some("800x600".into()), ..Default::default() }),
///     watermark: Some(WatermarkOptions::new("© ACME")),
///     output_format: Some("webp".into()),
///     ..Default::default()
/// };
/// let result = process("photo.jpg", &options, &PipelineConfig::default()).await?;
/// println!("{:?} → {:?}", result.original_size, result.processed_size);
/// # Ok(())
/// # }
/// ```
pub async fn process(
    input_str: impl AsRef<str>,
    options: &ProcessingOptions,
    config: &PipelineConfig,
) -> Result<ConversionResult, PixmorphError> {
    let input_str = input_str.as_ref();
    // Everything but a format inferred from the source can be checked now.
    if options.output_format.is_some() {
        options.validate(None)?;
    }
    info!("Processing {}", input_str);

    let resolved =
        input::resolve_input(input_str, &config.temp_dir, config.download_timeout_secs).await?;
    process_path(resolved.path(), options, config).await
}

/// Apply `options` to an in-memory input; see
/// [`crate::convert::convert_from_bytes`] for how `file_name` is used.
pub async fn process_from_bytes(
    bytes: &[u8],
    file_name: &str,
    options: &ProcessingOptions,
    config: &PipelineConfig,
) -> Result<ConversionResult, PixmorphError> {
    if options.output_format.is_some() {
        options.validate(None)?;
    }
    let spooled = input::spool_bytes(bytes, file_name, &config.temp_dir).await?;
    process_path(spooled.path(), options, config).await
}

/// Apply the same `options` to every input and bundle the outputs into one
/// archive.
///
/// Items that fail are reported in `warnings`; the call fails only when no
/// item succeeds.
pub async fn process_batch<S: AsRef<str>>(
    inputs: &[S],
    options: &ProcessingOptions,
    config: &PipelineConfig,
) -> Result<ConversionResult, PixmorphError> {
    let start = Instant::now();
    if options.output_format.is_some() {
        options.validate(None)?;
    }
    let total = inputs.len();
    if total == 0 {
        return Err(PixmorphError::InvalidInput {
            input: "(empty batch)".to_string(),
        });
    }
    info!("Processing batch of {} inputs", total);

    let scratch = scratch_dir(&config.temp_dir)?;
    let scratch_path = scratch.path();
    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_start(total);
    }

    let outcomes: Vec<(String, Result<Processed, PixmorphError>)> =
        stream::iter(inputs.iter().enumerate().map(|(idx, item)| {
            let item = item.as_ref().to_string();
            let n = idx + 1;
            async move {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_page_start(n, total);
                }
                let result = async {
                    let resolved = input::resolve_input(
                        &item,
                        &config.temp_dir,
                        config.download_timeout_secs,
                    )
                    .await?;
                    process_in(config, scratch_path, resolved.path(), options).await
                }
                .await;
                if let Some(ref cb) = config.progress_callback {
                    match &result {
                        Ok(p) => {
                            let bytes = tokio::fs::metadata(&p.file)
                                .await
                                .map(|m| m.len())
                                .unwrap_or(0);
                            cb.on_page_complete(n, total, bytes);
                        }
                        Err(e) => cb.on_page_error(n, total, &e.to_string()),
                    }
                }
                (item, result)
            }
        }))
        .buffered(config.page_concurrency)
        .collect()
        .await;

    let mut entries = Vec::new();
    let mut warnings = Vec::new();
    let mut names = HashSet::new();
    for (item, outcome) in outcomes {
        match outcome {
            Ok(p) => {
                let name = unique_name(
                    &mut names,
                    &archive::batch_entry_name(Path::new(&item), p.target.descriptor.extension),
                );
                entries.push(ArchiveEntry {
                    source: p.file,
                    name,
                });
            }
            Err(e) => {
                warn!("Batch item {} failed: {}", item, e);
                warnings.push(format!("{item}: {e}"));
            }
        }
    }
    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_complete(total, entries.len());
    }

    if entries.is_empty() {
        return Err(PixmorphError::ProcessingFailed {
            message: format!(
                "all {} inputs failed; first error: {}",
                total,
                warnings.first().map(String::as_str).unwrap_or("unknown")
            ),
        });
    }

    let count = entries.len();
    let bundle = scratch_file(scratch_path, "batch", ARCHIVE_EXTENSION);
    archive::write_archive(entries, &bundle)
        .await
        .map_err(StageError::into_processing)?;
    let published = publish::publish(config, &bundle, ARCHIVE_EXTENSION).await?;

    info!(
        "Batch complete: {}/{} items → {} in {}ms",
        count,
        total,
        published.file_name,
        start.elapsed().as_millis()
    );

    Ok(ConversionResult {
        download_url: config.download_url(&published.file_name),
        output_path: published.path,
        output_file_name: published.file_name,
        format_extension: ARCHIVE_EXTENSION.to_string(),
        input_format: None,
        output_format: ARCHIVE_KEY.to_string(),
        mime_type: formats::mime_for(ARCHIVE_KEY).to_string(),
        bytes_out: published.bytes,
        page_count: count,
        original_size: None,
        processed_size: None,
        warnings,
    })
}

/// Batch-process the images inside an uploaded `.tar` / `.tar.gz` bundle.
///
/// Only entries with a raster extension (png, jpg, jpeg, webp, bmp, gif) are
/// processed; each comes back as `<stem>_processed.<ext>` in the output
/// archive, as with [`process_batch`].
pub async fn process_archive(
    bundle: impl AsRef<str>,
    options: &ProcessingOptions,
    config: &PipelineConfig,
) -> Result<ConversionResult, PixmorphError> {
    let bundle = bundle.as_ref();
    if options.output_format.is_some() {
        options.validate(None)?;
    }
    let resolved =
        input::resolve_input(bundle, &config.temp_dir, config.download_timeout_secs).await?;
    let unpacked = scratch_dir(&config.temp_dir)?;
    let images = archive::extract_images(resolved.path(), unpacked.path())
        .await
        .map_err(StageError::into_processing)?;
    if images.is_empty() {
        return Err(PixmorphError::InvalidInput {
            input: format!("{bundle} (no png, jpg, jpeg, webp, bmp or gif entries)"),
        });
    }
    info!("Bundle {} holds {} images", bundle, images.len());

    let items: Vec<String> = images
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    process_batch(&items, options, config).await
}

// ── Internal helpers ─────────────────────────────────────────────────────

async fn process_path(
    path: &Path,
    options: &ProcessingOptions,
    config: &PipelineConfig,
) -> Result<ConversionResult, PixmorphError> {
    let start = Instant::now();
    let scratch = scratch_dir(&config.temp_dir)?;
    let p = process_in(config, scratch.path(), path, options).await?;
    let ext = p.target.descriptor.extension;
    let published = publish::publish(config, &p.file, ext).await?;

    info!(
        "Processed {} {:?} → {:?} as {} in {}ms",
        path.display(),
        p.original_size,
        p.processed_size,
        published.file_name,
        start.elapsed().as_millis()
    );

    Ok(ConversionResult {
        download_url: config.download_url(&published.file_name),
        output_path: published.path,
        output_file_name: published.file_name,
        format_extension: ext.to_string(),
        input_format: p.input_format,
        output_format: p.target.descriptor.key.to_string(),
        mime_type: p.target.descriptor.mime_type.to_string(),
        bytes_out: published.bytes,
        page_count: 1,
        original_size: Some(p.original_size),
        processed_size: Some(p.processed_size),
        warnings: Vec::new(),
    })
}

/// Detect, validate, decode, transform and encode one input into `scratch`.
async fn process_in(
    config: &PipelineConfig,
    scratch: &Path,
    path: &Path,
    options: &ProcessingOptions,
) -> Result<Processed, PixmorphError> {
    let input_format = detect::detect_file(path).await;
    let target = options.validate(input_format.as_deref())?;
    debug!(
        "Processing {} ({:?}) → {}",
        path.display(),
        input_format,
        target.descriptor.key
    );

    let (file, original_size, processed_size) =
        run_stages(config, scratch, path, input_format.as_deref(), options, &target)
            .await
            .map_err(StageError::into_processing)?;

    Ok(Processed {
        file,
        target,
        input_format,
        original_size,
        processed_size,
    })
}

async fn run_stages(
    config: &PipelineConfig,
    scratch: &Path,
    path: &Path,
    input_format: Option<&str>,
    options: &ProcessingOptions,
    target: &EncodeTarget,
) -> Result<(PathBuf, (u32, u32), (u32, u32)), StageError> {
    let img = match input_format.filter(|k| formats::is_document(k)) {
        Some(kind) => {
            let pages_dir = scratch_file(scratch, "pages", "d");
            tokio::fs::create_dir(&pages_dir)
                .await
                .map_err(|e| StageError::io(format!("creating {}", pages_dir.display()), e))?;
            let pages =
                rasterize::rasterize(config, path, kind, &pages_dir, Some(PageRange::single(1)))
                    .await?;
            let result = dispatch::decode_file(config, scratch, &pages[0], false).await;
            for page in &pages {
                remove_quietly(page).await;
            }
            if let Err(e) = tokio::fs::remove_dir(&pages_dir).await {
                debug!("Could not remove {}: {}", pages_dir.display(), e);
            }
            result?
        }
        None => dispatch::decode_file(config, scratch, path, true).await?,
    };
    let original_size = (img.width(), img.height());

    let opts = options.clone();
    let img = tokio::task::spawn_blocking(move || transform::apply(img, &opts))
        .await
        .map_err(join_error)??;
    let processed_size = (img.width(), img.height());

    let dest = scratch_file(scratch, "processed", target.descriptor.extension);
    dispatch::encode_image(config, scratch, img, target, &dest).await?;
    Ok((dest, original_size, processed_size))
}

/// `name`, or `name` with `-2`, `-3`, … before the extension if taken.
fn unique_name(taken: &mut HashSet<String>, name: &str) -> String {
    if taken.insert(name.to_string()) {
        return name.to_string();
    }
    let (stem, ext) = name.rsplit_once('.').unwrap_or((name, ""));
    (2..)
        .map(|n| {
            if ext.is_empty() {
                format!("{stem}-{n}")
            } else {
                format!("{stem}-{n}.{ext}")
            }
        })
        .find(|candidate| taken.insert(candidate.clone()))
        .unwrap_or_else(|| name.to_string())
}

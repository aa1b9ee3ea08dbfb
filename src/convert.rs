//! Format conversion entry points.
//!
//! ## Flow
//!
//! ```text
//! validate ─▶ resolve input ─▶ detect ─┬─ raster ─────────────────────────▶ dispatch ─▶ publish
//!                                      └─ pdf/ps/eps ─▶ rasterize ─┬─ 1 page ─▶ dispatch ─▶ publish
//!                                                                  └─ N pages ─▶ dispatch × N ─▶ archive ─▶ publish
//! ```
//!
//! The request is validated before the input is even opened, so a bad
//! format, quality or codec never reaches a backend. Every intermediate
//! lives in one scratch directory per call, removed when the call returns
//! whatever the outcome.

use crate::config::PipelineConfig;
use crate::error::{PixmorphError, StageError};
use crate::formats::{self, ARCHIVE_EXTENSION, ARCHIVE_KEY};
use crate::options::{ConversionRequest, EncodeTarget};
use crate::output::{ConversionResult, ImageInfo};
use crate::pipeline::archive::{self, ArchiveEntry};
use crate::pipeline::rasterize::{self, PageRange};
use crate::pipeline::{
    detect, dispatch, input, magick, publish, remove_quietly, scratch_dir, scratch_file,
};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// What the stages left in the scratch directory, ready to publish.
struct Produced {
    file: PathBuf,
    extension: &'static str,
    format: &'static str,
    page_count: usize,
    original_size: Option<(u32, u32)>,
}

/// Convert a local file or HTTP(S) URL into `request.output_format`.
///
/// # Errors
/// - `UnsupportedFormat` / `InvalidQuality` / `InvalidCodec` before any I/O
/// - `FileNotFound` / `PermissionDenied` / `Download*` for the input
/// - `ToolNotFound` / `ToolIncompatible` when an external tool is needed
/// - `ConversionFailed` for everything else, with the cause in the message
///
/// # Example
/// ```rust,no_run
/// use pixmorph::{convert, ConversionRequest, PipelineConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = PipelineConfig::default();
/// let result = convert("photo.png", &ConversionRequest::new("webp").quality(80), &config).await?;
/// println!("{}", result.download_url);
/// # Ok(())
/// # }
/// ```
pub async fn convert(
    input_str: impl AsRef<str>,
    request: &ConversionRequest,
    config: &PipelineConfig,
) -> Result<ConversionResult, PixmorphError> {
    let target = request.validate()?;
    let input_str = input_str.as_ref();
    info!("Converting {} → {}", input_str, target.descriptor.key);

    let resolved =
        input::resolve_input(input_str, &config.temp_dir, config.download_timeout_secs).await?;
    convert_path(resolved.path(), &target, config).await
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    input_str: impl AsRef<str>,
    request: &ConversionRequest,
    config: &PipelineConfig,
) -> Result<ConversionResult, PixmorphError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PixmorphError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(input_str, request, config))
}

/// Convert an in-memory input.
///
/// `bytes` are written to a managed temp file named `file_name` (whose
/// extension is only used when the content is not recognised) and removed
/// on return.
pub async fn convert_from_bytes(
    bytes: &[u8],
    file_name: &str,
    request: &ConversionRequest,
    config: &PipelineConfig,
) -> Result<ConversionResult, PixmorphError> {
    let target = request.validate()?;
    let spooled = input::spool_bytes(bytes, file_name, &config.temp_dir).await?;
    // `spooled` is dropped (and the file deleted) when this returns
    convert_path(spooled.path(), &target, config).await
}

/// Report format and dimensions of an input without converting it.
///
/// Documents are measured by rasterizing their first page.
pub async fn inspect(
    input_str: impl AsRef<str>,
    config: &PipelineConfig,
) -> Result<ImageInfo, PixmorphError> {
    let resolved = input::resolve_input(
        input_str.as_ref(),
        &config.temp_dir,
        config.download_timeout_secs,
    )
    .await?;
    let path = resolved.path();
    let bytes = tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .map_err(|_| PixmorphError::FileNotFound {
            path: path.to_path_buf(),
        })?;
    let format = detect::detect_file(path).await;

    let scratch = scratch_dir(&config.temp_dir)?;
    let (width, height) = measure(config, scratch.path(), path, format.as_deref())
        .await
        .map_err(StageError::into_conversion)?;

    Ok(ImageInfo {
        format,
        width,
        height,
        bytes,
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Shared tail of every entry point: run the stages, then publish.
async fn convert_path(
    path: &Path,
    target: &EncodeTarget,
    config: &PipelineConfig,
) -> Result<ConversionResult, PixmorphError> {
    let start = Instant::now();
    let scratch = scratch_dir(&config.temp_dir)?;
    let input_format = detect::detect_file(path).await;
    debug!("Source format: {:?}", input_format);

    let produced = run_stages(config, scratch.path(), path, input_format.as_deref(), target)
        .await
        .map_err(StageError::into_conversion)?;
    let published = publish::publish(config, &produced.file, produced.extension).await?;

    info!(
        "Converted {} → {} ({} bytes, {} page(s)) in {}ms",
        path.display(),
        published.file_name,
        published.bytes,
        produced.page_count,
        start.elapsed().as_millis()
    );

    Ok(ConversionResult {
        download_url: config.download_url(&published.file_name),
        output_path: published.path,
        output_file_name: published.file_name,
        format_extension: produced.extension.to_string(),
        input_format,
        output_format: produced.format.to_string(),
        mime_type: formats::mime_for(produced.format).to_string(),
        bytes_out: published.bytes,
        page_count: produced.page_count,
        original_size: produced.original_size,
        processed_size: None,
        warnings: Vec::new(),
    })
}

async fn run_stages(
    config: &PipelineConfig,
    scratch: &Path,
    path: &Path,
    input_format: Option<&str>,
    target: &EncodeTarget,
) -> Result<Produced, StageError> {
    let ext = target.descriptor.extension;
    let dest = scratch_file(scratch, "output", ext);

    let Some(kind) = input_format.filter(|k| formats::is_document(k)) else {
        let original_size = dispatch::dimensions(path).await;
        dispatch::encode_file(config, scratch, path, true, target, &dest).await?;
        return Ok(Produced {
            file: dest,
            extension: ext,
            format: target.descriptor.key,
            page_count: 1,
            original_size,
        });
    };

    let pages_dir = scratch.join("pages");
    tokio::fs::create_dir(&pages_dir)
        .await
        .map_err(|e| StageError::io(format!("creating {}", pages_dir.display()), e))?;
    let pages = rasterize::rasterize(config, path, kind, &pages_dir, None).await?;

    if pages.len() > 1 {
        return encode_pages(config, scratch, &pages, target).await;
    }

    let page = &pages[0];
    let original_size = dispatch::dimensions(page).await;
    let result = dispatch::encode_file(config, scratch, page, false, target, &dest).await;
    remove_quietly(page).await;
    result?;
    Ok(Produced {
        file: dest,
        extension: ext,
        format: target.descriptor.key,
        page_count: 1,
        original_size,
    })
}

/// Encode every page, then bundle them into one archive.
///
/// A failed page fails the whole conversion and removes the pages already
/// encoded.
async fn encode_pages(
    config: &PipelineConfig,
    scratch: &Path,
    pages: &[PathBuf],
    target: &EncodeTarget,
) -> Result<Produced, StageError> {
    let total = pages.len();
    let ext = target.descriptor.extension;
    info!("Encoding {} pages to {}", total, target.descriptor.key);

    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_start(total);
    }

    let results: Vec<Result<ArchiveEntry, StageError>> =
        stream::iter(pages.iter().enumerate().map(|(idx, page)| {
            let page_num = idx + 1;
            async move {
                if let Some(ref cb) = config.progress_callback {
                    cb.on_page_start(page_num, total);
                }
                let name = archive::page_entry_name(page_num, ext);
                let dest = scratch.join(&name);
                let result = dispatch::encode_file(config, scratch, page, false, target, &dest).await;
                remove_quietly(page).await;
                if let Some(ref cb) = config.progress_callback {
                    match &result {
                        Ok(()) => {
                            let bytes = tokio::fs::metadata(&dest)
                                .await
                                .map(|m| m.len())
                                .unwrap_or(0);
                            cb.on_page_complete(page_num, total, bytes);
                        }
                        Err(e) => cb.on_page_error(page_num, total, &e.to_string()),
                    }
                }
                result.map(|()| ArchiveEntry { source: dest, name })
            }
        }))
        .buffered(config.page_concurrency)
        .collect()
        .await;

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_complete(total, succeeded);
    }

    let mut entries = Vec::with_capacity(total);
    let mut first_error = None;
    for r in results {
        match r {
            Ok(entry) => entries.push(entry),
            Err(e) if first_error.is_none() => first_error = Some(e),
            Err(_) => {}
        }
    }
    if let Some(e) = first_error {
        for entry in &entries {
            remove_quietly(&entry.source).await;
        }
        return Err(e);
    }

    let bundle = scratch_file(scratch, "bundle", ARCHIVE_EXTENSION);
    let sources: Vec<PathBuf> = entries.iter().map(|e| e.source.clone()).collect();
    let result = archive::write_archive(entries, &bundle).await;
    for source in &sources {
        remove_quietly(source).await;
    }
    let bytes = result?;
    debug!("Archived {} pages ({} bytes)", total, bytes);

    Ok(Produced {
        file: bundle,
        extension: ARCHIVE_EXTENSION,
        format: ARCHIVE_KEY,
        page_count: total,
        original_size: None,
    })
}

/// Dimensions for [`inspect`].
async fn measure(
    config: &PipelineConfig,
    scratch: &Path,
    path: &Path,
    format: Option<&str>,
) -> Result<(u32, u32), StageError> {
    if let Some(kind) = format.filter(|k| formats::is_document(k)) {
        let pages =
            rasterize::rasterize(config, path, kind, scratch, Some(PageRange::single(1))).await?;
        return dispatch::dimensions(&pages[0])
            .await
            .ok_or_else(|| StageError::Decode(format!("{}", pages[0].display())));
    }
    if let Some(size) = dispatch::dimensions(path).await {
        return Ok(size);
    }
    let png = scratch_file(scratch, "inspect", "png");
    magick::to_png(config, path, &png).await?;
    dispatch::dimensions(&png)
        .await
        .ok_or_else(|| StageError::Decode(format!("{}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolPaths;
    use image::{Rgba, RgbaImage};

    fn config(root: &Path) -> PipelineConfig {
        PipelineConfig::builder()
            .output_dir(root.join("out"))
            .temp_dir(root.join("tmp"))
            .tools(ToolPaths::default())
            .build()
            .unwrap()
    }

    fn png(path: &Path, w: u32, h: u32) {
        RgbaImage::from_pixel(w, h, Rgba([1, 2, 3, 255]))
            .save(path)
            .unwrap();
    }

    #[tokio::test]
    async fn bad_request_fails_before_touching_input() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let err = convert("/does/not/exist.png", &ConversionRequest::new("xyz"), &cfg)
            .await
            .unwrap_err();
        assert!(matches!(err, PixmorphError::UnsupportedFormat { .. }));
        let err = convert(
            "/does/not/exist.png",
            &ConversionRequest::new("png").quality(0),
            &cfg,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PixmorphError::InvalidQuality { value: 0 }));
    }

    #[tokio::test]
    async fn png_to_webp_publishes_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let src = dir.path().join("in.png");
        png(&src, 40, 30);

        let r = convert(src.to_str().unwrap(), &ConversionRequest::new("WEBP"), &cfg)
            .await
            .unwrap();
        assert_eq!(r.output_format, "webp");
        assert_eq!(r.format_extension, "webp");
        assert_eq!(r.mime_type, "image/webp");
        assert_eq!(r.input_format.as_deref(), Some("png"));
        assert_eq!(r.original_size, Some((40, 30)));
        assert!(r.download_url.ends_with(&r.output_file_name));
        assert!(r.output_path.exists());
        assert_eq!(std::fs::read_dir(dir.path().join("tmp")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn external_target_without_converter_is_tool_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let src = dir.path().join("in.png");
        png(&src, 8, 8);
        let err = convert(src.to_str().unwrap(), &ConversionRequest::new("ico"), &cfg)
            .await
            .unwrap_err();
        assert!(matches!(err, PixmorphError::ToolNotFound { .. }), "{err}");
    }

    #[tokio::test]
    async fn from_bytes_uses_content_not_name() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        let mut buf = std::io::Cursor::new(Vec::new());
        RgbaImage::new(5, 5)
            .write_to(&mut buf, image::ImageFormat::Png)
            .unwrap();
        let r = convert_from_bytes(buf.get_ref(), "upload.jpg", &ConversionRequest::new("bmp"), &cfg)
            .await
            .unwrap();
        assert_eq!(r.input_format.as_deref(), Some("png"));
        assert_eq!(r.format_extension, "bmp");
    }

    #[tokio::test]
    async fn inspect_raster() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.png");
        png(&src, 12, 34);
        let info = inspect(src.to_str().unwrap(), &config(dir.path())).await.unwrap();
        assert_eq!(info.format.as_deref(), Some("png"));
        assert_eq!((info.width, info.height), (12, 34));
        assert!(info.bytes > 0);
    }
}

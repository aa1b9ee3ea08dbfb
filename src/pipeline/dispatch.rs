//! Backend dispatch shared by `convert` and `process`.
//!
//! ## Routing
//!
//! The target descriptor's [`Backend`] decides where the bytes come from:
//!
//! - **Native**: decode + encode in-process on a blocking thread. When the
//!   native decoder cannot read a file source, the converter writes a PNG
//!   copy and the native encode is retried on it exactly once.
//! - **External**: the converter writes the target directly. Formats with a
//!   pixel limit (icons) get an in-process "inside, never enlarge" resize to
//!   a PNG intermediate first when the source is larger than the limit.
//!
//! HEVC-coded HEIF has no in-process encoder and is routed to the converter.
//!
//! Every intermediate lives in the caller's scratch directory and is removed
//! as soon as the step that needed it is done, success or failure.

use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::formats::{Backend, HeifCodec, NativeMethod};
use crate::options::{EncodeTarget, Quality, ResizeFit};
use crate::pipeline::magick::{self, MagickOptions};
use crate::pipeline::{native, remove_quietly, scratch_file, transform};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Backend that will actually produce `target`.
pub fn route(target: &EncodeTarget) -> Backend {
    match target.descriptor.backend {
        Backend::Native(NativeMethod::Heif { .. }) if target.codec == Some(HeifCodec::Hevc) => {
            Backend::External {
                honors_quality: true,
                max_dimension: None,
            }
        }
        other => other,
    }
}

/// Encode the file at `source` into `dest`.
///
/// `allow_fallback` enables the converter-then-retry path when the native
/// decoder rejects `source`.
pub async fn encode_file(
    config: &PipelineConfig,
    scratch: &Path,
    source: &Path,
    allow_fallback: bool,
    target: &EncodeTarget,
    dest: &Path,
) -> Result<(), StageError> {
    match route(target) {
        Backend::Native(method) => {
            let first = match native_file(source, method, target, dest).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            if !allow_fallback {
                return Err(first);
            }
            warn!(
                "Native encode of {} failed ({}); retrying via the converter",
                source.display(),
                first
            );
            let intermediate = scratch_file(scratch, "fallback", "png");
            let result = match magick::to_png(config, source, &intermediate).await {
                Ok(()) => native_file(&intermediate, method, target, dest).await,
                Err(StageError::ToolMissing { .. }) => {
                    debug!("No converter for the fallback; reporting the native error");
                    Err(first)
                }
                Err(e) => Err(StageError::Other(format!(
                    "{first}; converter fallback also failed: {e}"
                ))),
            };
            remove_quietly(&intermediate).await;
            result
        }
        Backend::External {
            honors_quality,
            max_dimension,
        } => external_file(config, scratch, source, target, honors_quality, max_dimension, dest).await,
    }
}

/// Encode an in-memory raster into `dest`.
pub async fn encode_image(
    config: &PipelineConfig,
    scratch: &Path,
    img: DynamicImage,
    target: &EncodeTarget,
    dest: &Path,
) -> Result<(), StageError> {
    match route(target) {
        Backend::Native(method) => {
            let t = *target;
            let bytes = tokio::task::spawn_blocking(move || native::encode(&img, method, &t))
                .await
                .map_err(join_error)??;
            write_bytes(dest, bytes).await
        }
        Backend::External {
            honors_quality,
            max_dimension,
        } => {
            // The converter works on files: flush the buffer first.
            let intermediate = scratch_file(scratch, "buffer", "png");
            let result = async {
                save_png(img, intermediate.clone()).await?;
                external_file(
                    config,
                    scratch,
                    &intermediate,
                    target,
                    honors_quality,
                    max_dimension,
                    dest,
                )
                .await
            }
            .await;
            remove_quietly(&intermediate).await;
            result
        }
    }
}

/// Decode `source` for the transform stages.
///
/// Same fallback rule as [`encode_file`]: when the native decoder rejects
/// the file, the converter writes a PNG copy that is decoded instead.
pub async fn decode_file(
    config: &PipelineConfig,
    scratch: &Path,
    source: &Path,
    allow_fallback: bool,
) -> Result<DynamicImage, StageError> {
    let first = match decode_blocking(source.to_path_buf()).await {
        Ok(img) => return Ok(img),
        Err(e) => e,
    };
    if !allow_fallback {
        return Err(first);
    }
    warn!(
        "Native decode of {} failed ({}); retrying via the converter",
        source.display(),
        first
    );
    let intermediate = scratch_file(scratch, "decoded", "png");
    let result = match magick::to_png(config, source, &intermediate).await {
        Ok(()) => decode_blocking(intermediate.clone()).await,
        Err(StageError::ToolMissing { .. }) => Err(first),
        Err(e) => Err(StageError::Other(format!(
            "{first}; converter fallback also failed: {e}"
        ))),
    };
    remove_quietly(&intermediate).await;
    result
}

async fn decode_blocking(path: PathBuf) -> Result<DynamicImage, StageError> {
    tokio::task::spawn_blocking(move || native::decode(&path))
        .await
        .map_err(join_error)?
}

async fn native_file(
    source: &Path,
    method: NativeMethod,
    target: &EncodeTarget,
    dest: &Path,
) -> Result<(), StageError> {
    let (source, t) = (source.to_path_buf(), *target);
    let bytes = tokio::task::spawn_blocking(move || {
        let img = native::decode(&source)?;
        native::encode(&img, method, &t)
    })
    .await
    .map_err(join_error)??;
    write_bytes(dest, bytes).await
}

async fn external_file(
    config: &PipelineConfig,
    scratch: &Path,
    source: &Path,
    target: &EncodeTarget,
    honors_quality: bool,
    max_dimension: Option<u32>,
    dest: &Path,
) -> Result<(), StageError> {
    let quality = if target.lossless {
        Quality::MAX
    } else {
        target.quality
    };
    let mut opts = MagickOptions {
        quality: honors_quality.then_some(quality),
        shrink_to: None,
    };

    let mut shrunk: Option<PathBuf> = None;
    if let Some(limit) = max_dimension {
        match dimensions(source).await {
            Some((w, h)) if w > limit || h > limit => {
                let tmp = scratch_file(scratch, "shrunk", "png");
                match shrink(source, &tmp, limit).await {
                    Ok(()) => shrunk = Some(tmp),
                    Err(e) => {
                        debug!("In-process shrink failed ({}); asking the converter", e);
                        remove_quietly(&tmp).await;
                        opts.shrink_to = Some(limit);
                    }
                }
            }
            Some(_) => {}
            // Unknown size: let the converter enforce the limit.
            None => opts.shrink_to = Some(limit),
        }
    }

    let input = shrunk.as_deref().unwrap_or(source);
    let result = magick::convert_file(config, input, dest, opts).await;
    if let Some(tmp) = shrunk {
        remove_quietly(&tmp).await;
    }
    result
}

/// Pixel size from the header, without decoding.
pub(crate) async fn dimensions(path: &Path) -> Option<(u32, u32)> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || image::image_dimensions(&path).ok())
        .await
        .ok()
        .flatten()
}

/// Resize to fit a `limit`×`limit` box (never enlarging) into a PNG.
async fn shrink(source: &Path, dest: &Path, limit: u32) -> Result<(), StageError> {
    let (source, dest) = (source.to_path_buf(), dest.to_path_buf());
    tokio::task::spawn_blocking(move || {
        let img = native::decode(&source)?;
        let plan = transform::plan_resize(
            img.width(),
            img.height(),
            Some(limit),
            Some(limit),
            ResizeFit::Inside,
            false,
        );
        debug!(
            "Shrinking {}x{} → {}x{} for a {}px limit",
            img.width(),
            img.height(),
            plan.scaled.0,
            plan.scaled.1,
            limit
        );
        img.resize_exact(plan.scaled.0, plan.scaled.1, FilterType::Lanczos3)
            .save_with_format(&dest, ImageFormat::Png)
            .map_err(|e| StageError::encode("png", e))
    })
    .await
    .map_err(join_error)?
}

async fn save_png(img: DynamicImage, dest: PathBuf) -> Result<(), StageError> {
    tokio::task::spawn_blocking(move || {
        img.save_with_format(&dest, ImageFormat::Png)
            .map_err(|e| StageError::encode("png", e))
    })
    .await
    .map_err(join_error)?
}

async fn write_bytes(dest: &Path, bytes: Vec<u8>) -> Result<(), StageError> {
    tokio::fs::write(dest, bytes)
        .await
        .map_err(|e| StageError::io(format!("writing {}", dest.display()), e))
}

pub(crate) fn join_error(e: tokio::task::JoinError) -> StageError {
    StageError::Other(format!("worker task failed: {e}"))
}

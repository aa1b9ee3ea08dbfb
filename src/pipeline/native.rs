//! In-process decode and encode with the `image` crate (plus `webp` for
//! lossy WebP).
//!
//! CPU-bound: callers run these inside `spawn_blocking`.
//!
//! | Method | Encoder | `lossless` |
//! |--------|---------|------------|
//! | JPEG   | `JpegEncoder`, RGB | quality 100 |
//! | PNG    | `PngEncoder`, adaptive filter | best compression |
//! | WebP   | libwebp via `webp` | lossless mode |
//! | GIF / TIFF / BMP | `image` defaults | n/a (always lossless or palette) |
//! | HEIF + AV1 | `AvifEncoder` (ravif), speed 6 | quality 100 |

use crate::error::StageError;
use crate::formats::{HeifCodec, NativeMethod};
use crate::options::EncodeTarget;
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// AVIF encoder speed (1 slowest … 10 fastest).
const AVIF_SPEED: u8 = 6;

/// Decode any raster format the `image` crate understands.
pub fn decode(path: &Path) -> Result<DynamicImage, StageError> {
    let reader = ImageReader::open(path)
        .map_err(|e| StageError::io(format!("opening {}", path.display()), e))?
        .with_guessed_format()
        .map_err(|e| StageError::io(format!("reading {}", path.display()), e))?;
    let img = reader
        .decode()
        .map_err(|e| StageError::Decode(format!("{}: {e}", path.display())))?;
    debug!(
        "Decoded {} → {}x{} {:?}",
        path.display(),
        img.width(),
        img.height(),
        img.color()
    );
    Ok(img)
}

/// Encode `img` for `target` with `method`.
pub fn encode(
    img: &DynamicImage,
    method: NativeMethod,
    target: &EncodeTarget,
) -> Result<Vec<u8>, StageError> {
    let key = target.descriptor.key;
    let q = if target.lossless { 100 } else { target.quality.get() };
    let mut buf = Vec::new();

    match method {
        NativeMethod::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            let enc = JpegEncoder::new_with_quality(&mut buf, q);
            rgb.write_with_encoder(enc)
                .map_err(|e| StageError::encode(key, e))?;
        }
        NativeMethod::Png => {
            let compression = if target.lossless {
                CompressionType::Best
            } else {
                CompressionType::Default
            };
            let enc = PngEncoder::new_with_quality(&mut buf, compression, FilterType::Adaptive);
            img.write_with_encoder(enc)
                .map_err(|e| StageError::encode(key, e))?;
        }
        NativeMethod::WebP => {
            let rgba = img.to_rgba8();
            let (w, h) = rgba.dimensions();
            let mem = webp::Encoder::from_rgba(&rgba, w, h)
                .encode_simple(target.lossless, f32::from(q))
                .map_err(|e| StageError::encode(key, format!("{e:?}")))?;
            buf.extend_from_slice(&mem);
        }
        NativeMethod::Gif => write_as(&DynamicImage::ImageRgba8(img.to_rgba8()), ImageFormat::Gif, &mut buf, key)?,
        NativeMethod::Tiff => write_as(&to_8bit(img), ImageFormat::Tiff, &mut buf, key)?,
        NativeMethod::Bmp => write_as(&to_8bit(img), ImageFormat::Bmp, &mut buf, key)?,
        NativeMethod::Heif { .. } => match target.codec {
            Some(HeifCodec::Hevc) => {
                return Err(StageError::encode(
                    key,
                    "HEVC has no in-process encoder; route it to the converter",
                ))
            }
            _ => {
                let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
                let enc = AvifEncoder::new_with_speed_quality(&mut buf, AVIF_SPEED, q);
                rgba.write_with_encoder(enc)
                    .map_err(|e| StageError::encode(key, e))?;
            }
        },
    }

    debug!("Encoded {} → {} bytes (quality {})", key, buf.len(), q);
    Ok(buf)
}

fn write_as(
    img: &DynamicImage,
    format: ImageFormat,
    buf: &mut Vec<u8>,
    key: &str,
) -> Result<(), StageError> {
    img.write_to(&mut Cursor::new(buf), format)
        .map_err(|e| StageError::encode(key, e))
}

/// 8-bit RGB or RGBA, whichever keeps the alpha channel.
fn to_8bit(img: &DynamicImage) -> DynamicImage {
    if img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    }
}

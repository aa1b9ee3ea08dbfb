//! Format registry: static capability tables for every output key.
//!
//! A [`FormatDescriptor`] says how a format is written: natively by the
//! in-process encoder ([`Backend::Native`]) or by shelling out to the
//! external converter ([`Backend::External`]). The backend is a closed enum,
//! so a descriptor can never name an encoder that does not exist.
//!
//! Lookups are case-insensitive. The input list is advisory: anything the
//! detector recognises, or that a backend accepts anyway, may be converted.

use crate::error::PixmorphError;
use serde::Serialize;

/// Key reported for multi-output results bundled by the archiver.
pub const ARCHIVE_KEY: &str = "archive";
/// File extension of archives.
pub const ARCHIVE_EXTENSION: &str = "tar.gz";
/// MIME type of archives.
pub const ARCHIVE_MIME: &str = "application/gzip";

// ── Codecs ───────────────────────────────────────────────────────────────

/// Compression codec inside a HEIF-family container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HeifCodec {
    /// AV1 (AVIF). Encoded in-process.
    Av1,
    /// HEVC (classic HEIC). Delegated to the external converter.
    Hevc,
}

impl HeifCodec {
    /// Allow-list of codec hints, in display order.
    pub const ALLOWED: &'static [&'static str] = &["av1", "hevc"];

    pub fn as_str(self) -> &'static str {
        match self {
            HeifCodec::Av1 => "av1",
            HeifCodec::Hevc => "hevc",
        }
    }

    /// Parse a codec hint. `avif`, `h265` and `x265` are accepted aliases.
    pub fn parse(hint: &str) -> Option<Self> {
        match hint.trim().to_lowercase().as_str() {
            "av1" | "avif" => Some(HeifCodec::Av1),
            "hevc" | "h265" | "x265" => Some(HeifCodec::Hevc),
            _ => None,
        }
    }
}

// ── Backends ─────────────────────────────────────────────────────────────

/// Encoders available in-process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NativeMethod {
    Jpeg,
    Png,
    WebP,
    Gif,
    Tiff,
    Bmp,
    /// HEIF container; `default_codec` applies when the caller gives no hint.
    Heif { default_codec: HeifCodec },
}

/// How a format is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Backend {
    Native(NativeMethod),
    External {
        /// Whether `-quality` is forwarded to the converter.
        honors_quality: bool,
        /// Largest width/height the container can hold.
        max_dimension: Option<u32>,
    },
}

/// Capability metadata for one output format key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatDescriptor {
    pub key: &'static str,
    pub extension: &'static str,
    pub mime_type: &'static str,
    pub backend: Backend,
}

impl FormatDescriptor {
    /// True when the external converter writes this format.
    pub fn is_external(&self) -> bool {
        matches!(self.backend, Backend::External { .. })
    }

    /// Whether a `lossless` request can be honored without the numeric quality.
    pub fn supports_lossless(&self) -> bool {
        matches!(
            self.backend,
            Backend::Native(
                NativeMethod::Png | NativeMethod::WebP | NativeMethod::Tiff | NativeMethod::Heif { .. }
            )
        )
    }
}

const fn native(
    key: &'static str,
    extension: &'static str,
    mime_type: &'static str,
    method: NativeMethod,
) -> FormatDescriptor {
    FormatDescriptor {
        key,
        extension,
        mime_type,
        backend: Backend::Native(method),
    }
}

const fn external(
    key: &'static str,
    extension: &'static str,
    mime_type: &'static str,
    honors_quality: bool,
    max_dimension: Option<u32>,
) -> FormatDescriptor {
    FormatDescriptor {
        key,
        extension,
        mime_type,
        backend: Backend::External {
            honors_quality,
            max_dimension,
        },
    }
}

static OUTPUTS: &[FormatDescriptor] = &[
    native("jpeg", "jpg", "image/jpeg", NativeMethod::Jpeg),
    native("jpg", "jpg", "image/jpeg", NativeMethod::Jpeg),
    native("png", "png", "image/png", NativeMethod::Png),
    native("webp", "webp", "image/webp", NativeMethod::WebP),
    native("gif", "gif", "image/gif", NativeMethod::Gif),
    native("tiff", "tiff", "image/tiff", NativeMethod::Tiff),
    native("tif", "tif", "image/tiff", NativeMethod::Tiff),
    native("bmp", "bmp", "image/bmp", NativeMethod::Bmp),
    native(
        "avif",
        "avif",
        "image/avif",
        NativeMethod::Heif {
            default_codec: HeifCodec::Av1,
        },
    ),
    native(
        "heic",
        "heic",
        "image/heic",
        NativeMethod::Heif {
            default_codec: HeifCodec::Hevc,
        },
    ),
    native(
        "heif",
        "heif",
        "image/heif",
        NativeMethod::Heif {
            default_codec: HeifCodec::Hevc,
        },
    ),
    external("ico", "ico", "image/x-icon", false, Some(256)),
    external("tga", "tga", "image/x-tga", false, None),
    external("psd", "psd", "image/vnd.adobe.photoshop", false, None),
    external("jp2", "jp2", "image/jp2", true, None),
    external("pdf", "pdf", "application/pdf", true, None),
];

/// Formats accepted as input beyond the output set.
static EXTRA_INPUTS: &[&str] = &["eps", "pnm", "ps", "qoi", "svg"];

/// Vector / paginated inputs that must be rasterized first.
static DOCUMENT_FAMILY: &[&str] = &["pdf", "ps", "eps"];

// ── Lookups ──────────────────────────────────────────────────────────────

/// Find the descriptor for `key`, ignoring case.
pub fn lookup_output(key: &str) -> Option<&'static FormatDescriptor> {
    let key = normalize(key);
    OUTPUTS.iter().find(|d| d.key == key)
}

/// Like [`lookup_output`], failing with the valid key list.
pub fn resolve_output(key: &str) -> Result<&'static FormatDescriptor, PixmorphError> {
    lookup_output(key).ok_or_else(|| PixmorphError::UnsupportedFormat {
        format: key.to_string(),
        valid: list_outputs().into_iter().map(String::from).collect(),
    })
}

/// Sorted, duplicate-free output keys.
pub fn list_outputs() -> Vec<&'static str> {
    let mut keys: Vec<&'static str> = OUTPUTS.iter().map(|d| d.key).collect();
    keys.sort_unstable();
    keys.dedup();
    keys
}

/// Sorted, duplicate-free input keys (advisory).
pub fn list_inputs() -> Vec<&'static str> {
    let mut keys: Vec<&'static str> = OUTPUTS
        .iter()
        .map(|d| d.key)
        .chain(EXTRA_INPUTS.iter().copied())
        .collect();
    keys.sort_unstable();
    keys.dedup();
    keys
}

/// True for PDF, PostScript and EPS.
pub fn is_document(key: &str) -> bool {
    DOCUMENT_FAMILY.contains(&normalize(key).as_str())
}

/// MIME type for a key, falling back to `application/octet-stream`.
pub fn mime_for(key: &str) -> &'static str {
    if normalize(key) == ARCHIVE_KEY {
        return ARCHIVE_MIME;
    }
    lookup_output(key)
        .map(|d| d.mime_type)
        .unwrap_or("application/octet-stream")
}

fn normalize(key: &str) -> String {
    key.trim().trim_start_matches('.').to_lowercase()
}

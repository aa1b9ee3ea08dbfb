//! Error types for the pixmorph library.
//!
//! Two error types reflect two layers of the pipeline:
//!
//! * [`PixmorphError`] — **Public**: everything `convert`, `process` and
//!   friends can return. Each variant carries enough context to be shown to
//!   an end user as-is, with a remediation hint where one exists.
//!
//! * [`StageError`] — **Internal**: what a single backend adapter reports
//!   (a decode failure, a subprocess exiting non-zero, a timeout). The
//!   orchestrators translate it at their boundary with
//!   [`StageError::into_conversion`] / [`StageError::into_processing`], so
//!   "tool not found" and "tool incompatible" keep their own kind while all
//!   other stage failures collapse into the generic catch-all for that entry
//!   point.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All errors returned by the pixmorph library.
#[derive(Debug, Error)]
pub enum PixmorphError {
    // ── Request errors ────────────────────────────────────────────────────
    /// Requested (or detected) format key is not in the registry.
    #[error("Unsupported format '{format}'\nValid output formats: {}", valid.join(", "))]
    UnsupportedFormat { format: String, valid: Vec<String> },

    /// Codec hint not accepted by a multi-codec container format.
    #[error(
        "Invalid codec '{codec}' for format '{format}'\nExpected one of: {}",
        allowed.join(", ")
    )]
    InvalidCodec {
        format: String,
        codec: String,
        allowed: Vec<String>,
    },

    /// Quality outside 1–100.
    #[error("Quality must be a number between 1 and 100, got {value}")]
    InvalidQuality { value: i64 },

    /// A processing option could not be parsed.
    #[error("Invalid value '{value}' for option '{name}': {reason}")]
    InvalidOption {
        name: String,
        value: String,
        reason: String,
    },

    // ── Tool errors ───────────────────────────────────────────────────────
    /// A required external binary could not be located.
    #[error("{tool} is required but was not found: {detail}\nInstall it, or point {env_var} at the binary.")]
    ToolNotFound {
        tool: String,
        env_var: String,
        detail: String,
    },

    /// External binary located but missing a required capability.
    #[error("{tool} at '{path}' cannot handle this input (missing: {missing})\nInstall a full build of {tool}.")]
    ToolIncompatible {
        tool: String,
        path: PathBuf,
        missing: String,
    },

    // ── Pipeline errors ───────────────────────────────────────────────────
    /// Catch-all for `convert` failures.
    #[error("Conversion failed: {message}")]
    ConversionFailed { message: String },

    /// Catch-all for `process` failures.
    #[error("Processing failed: {message}")]
    ProcessingFailed { message: String },

    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is neither a file path nor an HTTP(S) URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but the download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the published output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a single pipeline stage.
///
/// Never escapes the crate's public API; see the module docs.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("cannot decode image: {0}")]
    Decode(String),

    #[error("cannot encode {format}: {detail}")]
    Encode { format: String, detail: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} not found: {detail}")]
    ToolMissing {
        tool: &'static str,
        env_var: &'static str,
        detail: String,
    },

    #[error("{tool} at '{}' lacks {missing}", path.display())]
    ToolIncompatible {
        tool: &'static str,
        path: PathBuf,
        missing: String,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: &'static str,
        status: String,
        stderr: String,
    },

    #[error("{tool} did not finish within {}s", limit.as_secs())]
    ToolTimedOut { tool: &'static str, limit: Duration },

    #[error("rasterization produced no pages for '{}'", path.display())]
    NoPages { path: PathBuf },

    #[error("{0}")]
    Other(String),
}

impl StageError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StageError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn encode(format: impl Into<String>, detail: impl ToString) -> Self {
        StageError::Encode {
            format: format.into(),
            detail: detail.to_string(),
        }
    }

    /// Translate at the `convert` boundary.
    pub fn into_conversion(self) -> PixmorphError {
        self.into_public(|message| PixmorphError::ConversionFailed { message })
    }

    /// Translate at the `process` boundary.
    pub fn into_processing(self) -> PixmorphError {
        self.into_public(|message| PixmorphError::ProcessingFailed { message })
    }

    fn into_public(self, generic: impl FnOnce(String) -> PixmorphError) -> PixmorphError {
        match self {
            StageError::ToolMissing {
                tool,
                env_var,
                detail,
            } => PixmorphError::ToolNotFound {
                tool: tool.to_string(),
                env_var: env_var.to_string(),
                detail,
            },
            StageError::ToolIncompatible {
                tool,
                path,
                missing,
            } => PixmorphError::ToolIncompatible {
                tool: tool.to_string(),
                path,
                missing,
            },
            other => generic(other.to_string()),
        }
    }
}

impl From<PixmorphError> for StageError {
    fn from(e: PixmorphError) -> Self {
        StageError::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_format_lists_valid_keys() {
        let e = PixmorphError::UnsupportedFormat {
            format: "xyz".into(),
            valid: vec!["gif".into(), "png".into()],
        };
        let msg = e.to_string();
        assert!(msg.contains("'xyz'"), "got: {msg}");
        assert!(msg.contains("gif, png"), "got: {msg}");
    }

    #[test]
    fn invalid_codec_names_allowed_values() {
        let e = PixmorphError::InvalidCodec {
            format: "heic".into(),
            codec: "vp9".into(),
            allowed: vec!["av1".into(), "hevc".into()],
        };
        assert!(e.to_string().contains("av1, hevc"));
    }

    #[test]
    fn tool_missing_keeps_its_kind() {
        let e = StageError::ToolMissing {
            tool: "Ghostscript",
            env_var: "PIXMORPH_RASTERIZER_PATH",
            detail: "not on PATH".into(),
        }
        .into_conversion();
        match e {
            PixmorphError::ToolNotFound { tool, env_var, .. } => {
                assert_eq!(tool, "Ghostscript");
                assert_eq!(env_var, "PIXMORPH_RASTERIZER_PATH");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn generic_stage_failure_is_wrapped_per_entry_point() {
        let convert = StageError::Decode("truncated".into()).into_conversion();
        assert!(matches!(convert, PixmorphError::ConversionFailed { ref message } if message.contains("truncated")));

        let process = StageError::ToolTimedOut {
            tool: "ImageMagick",
            limit: Duration::from_secs(5),
        }
        .into_processing();
        assert!(process.to_string().contains("5s"));
        assert!(matches!(process, PixmorphError::ProcessingFailed { .. }));
    }
}

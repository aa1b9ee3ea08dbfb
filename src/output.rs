//! Result types returned by the public API.
//!
//! Everything here is `Serialize` so the CLI's `--json` mode and any HTTP
//! layer in front of the library can emit results without a mapping layer.

use serde::Serialize;
use std::path::PathBuf;

/// Outcome of one successful `convert`, `process` or `process_batch` call.
///
/// The file at `output_path` belongs to the caller from here on; the library
/// never touches it again.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionResult {
    /// Absolute or config-relative path of the published file.
    pub output_path: PathBuf,
    /// Generated file name (`<millis>-<uuid>-converted.<ext>`).
    pub output_file_name: String,
    /// Extension of the published file (`jpg`, `png`, `tar.gz`, …).
    pub format_extension: String,
    /// `public_prefix` + `/` + `output_file_name`.
    pub download_url: String,

    /// Detected source format, when known.
    pub input_format: Option<String>,
    /// Resolved target key, or `archive` for multi-output results.
    pub output_format: String,
    pub mime_type: String,
    /// Size of the published file.
    pub bytes_out: u64,
    /// Number of rasterized pages (documents) or archived items (batches).
    pub page_count: usize,

    /// Source dimensions, when the source was decoded in-process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_size: Option<(u32, u32)>,
    /// Dimensions after the transform stages (`process` only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_size: Option<(u32, u32)>,

    /// Per-item failures that did not fail the whole call (`process_batch`).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ConversionResult {
    /// True when the result is an archive of several outputs.
    pub fn is_archive(&self) -> bool {
        self.output_format == crate::formats::ARCHIVE_KEY
    }
}

/// What [`crate::inspect`] reports about an input without converting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    /// Detected format key, when the content or extension identified one.
    pub format: Option<String>,
    pub width: u32,
    pub height: u32,
    /// Size of the input file.
    pub bytes: u64,
}

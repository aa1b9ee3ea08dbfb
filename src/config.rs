//! Pipeline configuration.
//!
//! Every knob lives in [`PipelineConfig`], built via
//! [`PipelineConfig::builder()`]. The config also owns the resolved paths of
//! the external tools ([`ToolPaths`]) and the cached result of the
//! rasterizer capability probe, so nothing in the pipeline reaches for
//! process-wide state. Tests inject fake tool locations by handing the
//! builder an explicit [`ToolPaths`].

use crate::error::{PixmorphError, StageError};
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tool_locate::Tool;
use tracing::debug;

/// Rasterizer capability probe outcome: `Err` names the missing capability.
pub(crate) type ProbeOutcome = Result<(), String>;

// ── Tool paths ───────────────────────────────────────────────────────────

/// Resolved locations of the external binaries.
///
/// `None` means "not available"; the pipeline fails with
/// [`PixmorphError::ToolNotFound`] only when a request actually needs it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolPaths {
    /// ImageMagick (`magick` / `convert`).
    pub converter: Option<PathBuf>,
    /// Ghostscript (`gs` / `gswin64c`).
    pub rasterizer: Option<PathBuf>,
}

impl ToolPaths {
    /// Look both tools up with `tool-locate`.
    pub fn discover() -> Self {
        Self {
            converter: discover_one(Tool::Converter),
            rasterizer: discover_one(Tool::Rasterizer),
        }
    }

    /// Path of `tool`, or the "not found" stage error.
    pub(crate) fn require(&self, tool: Tool) -> Result<&Path, StageError> {
        let slot = match tool {
            Tool::Converter => &self.converter,
            Tool::Rasterizer => &self.rasterizer,
        };
        slot.as_deref().ok_or_else(|| StageError::ToolMissing {
            tool: tool.display_name(),
            env_var: tool.env_var(),
            detail: format!(
                "none of {:?} is on PATH or in the standard install directories",
                tool.candidates()
            ),
        })
    }
}

fn discover_one(tool: Tool) -> Option<PathBuf> {
    match tool_locate::locate(tool) {
        Ok(p) => {
            debug!("{} found at {}", tool.display_name(), p.display());
            Some(p)
        }
        Err(e) => {
            debug!("{}", e);
            None
        }
    }
}

// ── Config ───────────────────────────────────────────────────────────────

/// Configuration shared by every `convert` / `process` call.
///
/// Cloning is cheap and clones share the capability-probe cache.
///
/// # Example
/// ```rust,no_run
/// use pixmorph::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .output_dir("public/converted")
///     .public_prefix("/converted")
///     .dpi(200)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Directory published results are written to. Default: `uploads/output`.
    pub output_dir: PathBuf,

    /// Prefix of the returned download URL. Default: `/uploads/output`.
    pub public_prefix: String,

    /// Parent of each call's scratch directory. Default: the system temp dir.
    ///
    /// Every call creates one uniquely named directory under here and removes
    /// it on return, on error and on panic.
    pub temp_dir: PathBuf,

    /// Rasterization resolution for PDF / PostScript / EPS. Range: 36–600. Default: 144.
    pub dpi: u32,

    /// External tool locations.
    pub tools: ToolPaths,

    /// Upper bound on each subprocess, in seconds. Default: 120.
    ///
    /// A timed-out tool is killed and reported as a failure of that tool.
    pub tool_timeout_secs: u64,

    /// Document pages encoded at once. Default: 1.
    pub page_concurrency: usize,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,

    pub(crate) rasterizer_probe: Arc<OnceCell<ProbeOutcome>>,
}

impl Default for PipelineConfig {
    /// Defaults with tools discovered on this machine.
    fn default() -> Self {
        Self::with_tools(ToolPaths::discover())
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("output_dir", &self.output_dir)
            .field("public_prefix", &self.public_prefix)
            .field("temp_dir", &self.temp_dir)
            .field("dpi", &self.dpi)
            .field("tools", &self.tools)
            .field("tool_timeout_secs", &self.tool_timeout_secs)
            .field("page_concurrency", &self.page_concurrency)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    fn with_tools(tools: ToolPaths) -> Self {
        Self {
            output_dir: PathBuf::from("uploads/output"),
            public_prefix: "/uploads/output".to_string(),
            temp_dir: std::env::temp_dir(),
            dpi: 144,
            tools,
            tool_timeout_secs: 120,
            page_concurrency: 1,
            download_timeout_secs: 120,
            progress_callback: None,
            rasterizer_probe: Arc::new(OnceCell::new()),
        }
    }

    /// Build the download URL for a published file name.
    pub fn download_url(&self, file_name: &str) -> String {
        format!("{}/{}", self.public_prefix.trim_end_matches('/'), file_name)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Default)]
pub struct PipelineConfigBuilder {
    output_dir: Option<PathBuf>,
    public_prefix: Option<String>,
    temp_dir: Option<PathBuf>,
    dpi: Option<u32>,
    tools: Option<ToolPaths>,
    converter_path: Option<PathBuf>,
    rasterizer_path: Option<PathBuf>,
    tool_timeout_secs: Option<u64>,
    page_concurrency: Option<usize>,
    download_timeout_secs: Option<u64>,
    progress_callback: Option<ProgressCallback>,
}

impl fmt::Debug for PipelineConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfigBuilder")
            .field("output_dir", &self.output_dir)
            .field("dpi", &self.dpi)
            .field("tools", &self.tools)
            .field("converter_path", &self.converter_path)
            .field("rasterizer_path", &self.rasterizer_path)
            .finish_non_exhaustive()
    }
}

impl PipelineConfigBuilder {
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn public_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.public_prefix = Some(prefix.into());
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.dpi = Some(dpi.clamp(36, 600));
        self
    }

    /// Use exactly these tool paths and skip discovery.
    pub fn tools(mut self, tools: ToolPaths) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn converter_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.converter_path = Some(path.into());
        self
    }

    pub fn rasterizer_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.rasterizer_path = Some(path.into());
        self
    }

    pub fn tool_timeout_secs(mut self, secs: u64) -> Self {
        self.tool_timeout_secs = Some(secs);
        self
    }

    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.page_concurrency = Some(n.max(1));
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.download_timeout_secs = Some(secs);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// Tools not given explicitly are discovered here, once.
    pub fn build(self) -> Result<PipelineConfig, PixmorphError> {
        let tools = match self.tools {
            Some(t) => ToolPaths {
                converter: self.converter_path.or(t.converter),
                rasterizer: self.rasterizer_path.or(t.rasterizer),
            },
            None => ToolPaths {
                converter: self
                    .converter_path
                    .or_else(|| discover_one(Tool::Converter)),
                rasterizer: self
                    .rasterizer_path
                    .or_else(|| discover_one(Tool::Rasterizer)),
            },
        };

        let mut c = PipelineConfig::with_tools(tools);
        if let Some(v) = self.output_dir {
            c.output_dir = v;
        }
        if let Some(v) = self.public_prefix {
            c.public_prefix = v;
        }
        if let Some(v) = self.temp_dir {
            c.temp_dir = v;
        }
        if let Some(v) = self.dpi {
            c.dpi = v;
        }
        if let Some(v) = self.tool_timeout_secs {
            c.tool_timeout_secs = v;
        }
        if let Some(v) = self.page_concurrency {
            c.page_concurrency = v;
        }
        if let Some(v) = self.download_timeout_secs {
            c.download_timeout_secs = v;
        }
        c.progress_callback = self.progress_callback;

        if c.output_dir.as_os_str().is_empty() {
            return Err(PixmorphError::InvalidConfig(
                "output_dir must not be empty".into(),
            ));
        }
        if !(36..=600).contains(&c.dpi) {
            return Err(PixmorphError::InvalidConfig(format!(
                "DPI must be 36–600, got {}",
                c.dpi
            )));
        }
        if c.tool_timeout_secs == 0 {
            return Err(PixmorphError::InvalidConfig(
                "Tool timeout must be ≥ 1 second".into(),
            ));
        }
        if c.page_concurrency == 0 {
            return Err(PixmorphError::InvalidConfig(
                "Page concurrency must be ≥ 1".into(),
            ));
        }
        Ok(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_tools() -> PipelineConfigBuilder {
        PipelineConfig::builder().tools(ToolPaths::default())
    }

    #[test]
    fn defaults() {
        let c = no_tools().build().unwrap();
        assert_eq!(c.dpi, 144);
        assert_eq!(c.page_concurrency, 1);
        assert_eq!(c.output_dir, PathBuf::from("uploads/output"));
        assert_eq!(c.download_url("a.png"), "/uploads/output/a.png");
    }

    #[test]
    fn builder_clamps() {
        let c = no_tools().dpi(5000).page_concurrency(0).build().unwrap();
        assert_eq!(c.dpi, 600);
        assert_eq!(c.page_concurrency, 1);
    }

    #[test]
    fn zero_timeout_rejected() {
        assert!(matches!(
            no_tools().tool_timeout_secs(0).build(),
            Err(PixmorphError::InvalidConfig(_))
        ));
    }

    #[test]
    fn explicit_paths_override_injected_tools() {
        let c = PipelineConfig::builder()
            .tools(ToolPaths {
                converter: Some("/a/magick".into()),
                rasterizer: Some("/a/gs".into()),
            })
            .rasterizer_path("/b/gs")
            .build()
            .unwrap();
        assert_eq!(c.tools.converter.as_deref(), Some(Path::new("/a/magick")));
        assert_eq!(c.tools.rasterizer.as_deref(), Some(Path::new("/b/gs")));
    }

    #[test]
    fn missing_tool_is_a_distinct_error() {
        let tools = ToolPaths::default();
        let err = tools.require(Tool::Rasterizer).unwrap_err().into_conversion();
        let msg = err.to_string();
        assert!(matches!(err, PixmorphError::ToolNotFound { .. }));
        assert!(msg.contains("PIXMORPH_RASTERIZER_PATH"), "got: {msg}");
    }

    #[test]
    fn download_url_trims_trailing_slash() {
        let c = no_tools().public_prefix("https://cdn.example/out/").build().unwrap();
        assert_eq!(c.download_url("x.jpg"), "https://cdn.example/out/x.jpg");
    }

    #[test]
    fn debug_hides_callback() {
        let c = no_tools().build().unwrap();
        let s = format!("{c:?}");
        assert!(s.contains("PipelineConfig"));
        assert!(s.contains("progress_callback: None"));
    }
}

//! Document rasterization: PDF / PostScript / EPS pages → PNG files (Ghostscript).
//!
//! ## Why a capability probe?
//!
//! Some systems ship a `gs` that cannot read PDF (GhostPCL-only builds,
//! stripped distro packages) or lacks the `png16m` device. Discovering that
//! from a failed render means parsing free-form diagnostics on every call.
//! Instead `gs -h` is run once per [`PipelineConfig`], its device and
//! input-format lists are checked, and the outcome is cached in the config.
//! A build without a required capability fails fast with
//! [`StageError::ToolIncompatible`].
//!
//! ## Output
//!
//! All pages (or an inclusive 1-indexed range) are rendered by a single
//! `gs` invocation to `page-0001.png`, `page-0002.png`, … in a scratch
//! directory owned by the caller, and returned sorted by page.

use crate::config::{PipelineConfig, ProbeOutcome};
use crate::error::StageError;
use crate::pipeline::exec::ToolCmd;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tool_locate::Tool;
use tracing::{debug, info};

const PAGE_PREFIX: &str = "page-";

/// Inclusive, 1-indexed page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub first: u32,
    pub last: u32,
}

impl PageRange {
    pub fn single(page: u32) -> Self {
        Self {
            first: page,
            last: page,
        }
    }
}

/// Render `input` (of document kind `kind`: `pdf`, `ps` or `eps`) into
/// `out_dir`, returning the page images in page order.
pub async fn rasterize(
    config: &PipelineConfig,
    input: &Path,
    kind: &str,
    out_dir: &Path,
    pages: Option<PageRange>,
) -> Result<Vec<PathBuf>, StageError> {
    let gs = ensure_capable(config).await?;
    let timeout = Duration::from_secs(config.tool_timeout_secs);

    let mut cmd = ToolCmd::new(Tool::Rasterizer, gs, timeout)
        .args([
            "-dSAFER",
            "-dBATCH",
            "-dNOPAUSE",
            "-dQUIET",
            "-sDEVICE=png16m",
            "-dTextAlphaBits=4",
            "-dGraphicsAlphaBits=4",
        ])
        .arg(format!("-r{}", config.dpi));
    if let Some(r) = pages {
        cmd = cmd
            .arg(format!("-dFirstPage={}", r.first))
            .arg(format!("-dLastPage={}", r.last));
    }
    if kind == "eps" {
        cmd = cmd.arg("-dEPSCrop");
    }
    let mut target = std::ffi::OsString::from("-sOutputFile=");
    target.push(out_dir.join(format!("{PAGE_PREFIX}%04d.png")));
    cmd.arg(target).arg(input).run().await?;

    let pages = collect_pages(out_dir).await?;
    if pages.is_empty() {
        return Err(StageError::NoPages {
            path: input.to_path_buf(),
        });
    }
    info!(
        "Rasterized {} page(s) of {} at {} DPI",
        pages.len(),
        input.display(),
        config.dpi
    );
    Ok(pages)
}

/// Locate Ghostscript and verify it can render documents to PNG.
pub async fn ensure_capable(config: &PipelineConfig) -> Result<&Path, StageError> {
    let gs = config.tools.require(Tool::Rasterizer)?;
    let timeout = Duration::from_secs(config.tool_timeout_secs);
    let outcome = config
        .rasterizer_probe
        .get_or_try_init(|| probe(gs, timeout))
        .await?;
    match outcome {
        Ok(()) => Ok(gs),
        Err(missing) => Err(StageError::ToolIncompatible {
            tool: Tool::Rasterizer.display_name(),
            path: gs.to_path_buf(),
            missing: missing.clone(),
        }),
    }
}

async fn probe(gs: &Path, timeout: Duration) -> Result<ProbeOutcome, StageError> {
    let out = ToolCmd::new(Tool::Rasterizer, gs, timeout)
        .arg("-h")
        .output()
        .await?;
    let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&out.stderr));
    let outcome = check_capabilities(&text);
    debug!("Ghostscript probe for {}: {:?}", gs.display(), outcome);
    Ok(outcome)
}

/// Inspect `gs -h` output for the PNG device and PDF/PostScript input.
fn check_capabilities(help: &str) -> ProbeOutcome {
    let mut missing = Vec::new();
    if !help.contains("png16m") {
        missing.push("png16m output device");
    }
    let inputs = help
        .lines()
        .find(|l| l.trim_start().starts_with("Input formats:"))
        .unwrap_or("");
    if !inputs.contains("PDF") {
        missing.push("PDF input");
    }
    if !inputs.contains("PostScript") {
        missing.push("PostScript input");
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(missing.join(", "))
    }
}

async fn collect_pages(dir: &Path) -> Result<Vec<PathBuf>, StageError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| StageError::io(format!("listing {}", dir.display()), e))?;
    let mut pages = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StageError::io(format!("listing {}", dir.display()), e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(PAGE_PREFIX) && name.ends_with(".png") {
            pages.push(entry.path());
        }
    }
    // Zero-padded names sort in page order.
    pages.sort();
    Ok(pages)
}

//! External converter adapter (ImageMagick).
//!
//! Invoked as `magick <input>[0] [options] <output>`; the output format is
//! taken from the output file's extension. Only the first frame / layer of
//! the input is read, so multi-frame inputs still yield exactly one file.

use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::options::Quality;
use crate::pipeline::exec::ToolCmd;
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;
use tool_locate::Tool;
use tracing::debug;

/// Extra knobs for one converter run.
#[derive(Debug, Clone, Copy, Default)]
pub struct MagickOptions {
    /// Forwarded as `-quality`.
    pub quality: Option<Quality>,
    /// Shrink (never enlarge) to fit a `n`×`n` box.
    pub shrink_to: Option<u32>,
}

/// Convert `input` into `output` with the external converter.
pub async fn convert_file(
    config: &PipelineConfig,
    input: &Path,
    output: &Path,
    opts: MagickOptions,
) -> Result<(), StageError> {
    let program = config.tools.require(Tool::Converter)?;
    let timeout = Duration::from_secs(config.tool_timeout_secs);

    let mut cmd = ToolCmd::new(Tool::Converter, program, timeout).arg(first_frame(input));
    if let Some(n) = opts.shrink_to {
        cmd = cmd.args(["-resize".to_string(), format!("{n}x{n}>")]);
    }
    if let Some(q) = opts.quality {
        cmd = cmd.args(["-quality".to_string(), q.to_string()]);
    }
    cmd.arg(output).run().await?;

    if !tokio::fs::try_exists(output).await.unwrap_or(false) {
        return Err(StageError::ToolFailed {
            tool: Tool::Converter.display_name(),
            status: "exit status: 0".into(),
            stderr: format!("no output written to {}", output.display()),
        });
    }
    debug!("Converter wrote {}", output.display());
    Ok(())
}

/// Write a lossless PNG copy of `input` for the native encoder to retry on.
pub async fn to_png(config: &PipelineConfig, input: &Path, output: &Path) -> Result<(), StageError> {
    convert_file(config, input, output, MagickOptions::default()).await
}

/// `path[0]`: read only the first frame.
fn first_frame(path: &Path) -> OsString {
    let mut s = path.as_os_str().to_owned();
    s.push("[0]");
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolPaths;

    #[test]
    fn first_frame_suffix() {
        assert_eq!(first_frame(Path::new("/tmp/a.gif")), OsString::from("/tmp/a.gif[0]"));
    }

    #[tokio::test]
    async fn missing_converter_is_reported_before_spawning() {
        let config = PipelineConfig::builder()
            .tools(ToolPaths::default())
            .build()
            .unwrap();
        let err = convert_file(
            &config,
            Path::new("in.png"),
            Path::new("out.ico"),
            MagickOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StageError::ToolMissing { tool: "ImageMagick", .. }));
    }
}

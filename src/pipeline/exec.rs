//! Subprocess execution for the external tools.
//!
//! A small builder over `tokio::process::Command`:
//!
//! ```ignore
//! let out = ToolCmd::new(Tool::Converter, magick, timeout)
//!     .arg(input)
//!     .args(["-quality", "80"])
//!     .arg(output)
//!     .run()
//!     .await?;
//! ```
//!
//! Every invocation is bounded by a timeout. The child is spawned with
//! `kill_on_drop`, so when the timeout fires and the wait future is dropped
//! the process is killed rather than left running.

use crate::error::StageError;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tool_locate::Tool;
use tracing::debug;

/// Longest stderr excerpt carried in an error.
const STDERR_EXCERPT: usize = 600;

/// Builder for one external tool invocation.
pub struct ToolCmd {
    tool: Tool,
    program: PathBuf,
    args: Vec<OsString>,
    timeout: Duration,
}

impl ToolCmd {
    pub fn new(tool: Tool, program: &Path, timeout: Duration) -> Self {
        Self {
            tool,
            program: program.to_path_buf(),
            args: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    /// Run and require a zero exit status.
    pub async fn run(self) -> Result<Output, StageError> {
        let tool = self.tool;
        let out = self.output().await?;
        if out.status.success() {
            Ok(out)
        } else {
            Err(StageError::ToolFailed {
                tool: tool.display_name(),
                status: out.status.to_string(),
                stderr: excerpt(&out.stderr),
            })
        }
    }

    /// Run and return whatever the process produced, regardless of status.
    pub async fn output(self) -> Result<Output, StageError> {
        let name = self.tool.display_name();
        debug!("exec {} {:?}", self.program.display(), self.args);

        let child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    StageError::ToolMissing {
                        tool: name,
                        env_var: self.tool.env_var(),
                        detail: format!("cannot execute '{}': {e}", self.program.display()),
                    }
                }
                _ => StageError::io(format!("spawning {name}"), e),
            })?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(out)) => Ok(out),
            Ok(Err(e)) => Err(StageError::io(format!("waiting for {name}"), e)),
            Err(_) => Err(StageError::ToolTimedOut {
                tool: name,
                limit: self.timeout,
            }),
        }
    }
}

/// Last part of a tool's stderr, trimmed to something printable.
fn excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.is_empty() {
        return "(no output)".to_string();
    }
    let count = text.chars().count();
    if count <= STDERR_EXCERPT {
        text.to_string()
    } else {
        let tail: String = text.chars().skip(count - STDERR_EXCERPT).collect();
        format!("…{tail}")
    }
}

//! Input resolution: normalise a user-supplied path or URL to a local file.
//!
//! ## Why download to a temp file?
//!
//! Detection, the native decoder and both external tools all work on file
//! paths. Downloading into a `TempDir` gives every stage a path while
//! ensuring cleanup happens automatically when `ResolvedInput` is dropped,
//! even if the task panics. Local files are checked for existence and read
//! permission up front so callers get a precise error instead of a decoder
//! failure.

use crate::error::PixmorphError;
use crate::pipeline::scratch_dir;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// The resolved input: a local path, or a downloaded / spooled temp file.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL or an in-memory buffer written to a temp directory.
    /// The `TempDir` is kept alive until processing completes.
    Temporary { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Path of the input file regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Temporary { path, .. } => path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a local file.
///
/// URLs are downloaded into a fresh directory under `temp_parent`.
pub async fn resolve_input(
    input: &str,
    temp_parent: &Path,
    timeout_secs: u64,
) -> Result<ResolvedInput, PixmorphError> {
    if input.trim().is_empty() {
        return Err(PixmorphError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, temp_parent, timeout_secs).await
    } else if input.contains("://") {
        Err(PixmorphError::InvalidInput {
            input: input.to_string(),
        })
    } else {
        resolve_local(input)
    }
}

/// Write `bytes` to a temp file named after `file_name` (its extension is
/// the last-resort format hint).
pub async fn spool_bytes(
    bytes: &[u8],
    file_name: &str,
    temp_parent: &Path,
) -> Result<ResolvedInput, PixmorphError> {
    let temp_dir = scratch_dir(temp_parent)?;
    let name = sanitize_file_name(file_name).unwrap_or_else(|| "input.bin".to_string());
    let path = temp_dir.path().join(name);
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| PixmorphError::Internal(format!("Failed to write temp file: {}", e)))?;
    debug!("Spooled {} bytes to {}", bytes.len(), path.display());
    Ok(ResolvedInput::Temporary {
        path,
        _temp_dir: temp_dir,
    })
}

/// Resolve a local file path, validating existence and read permission.
fn resolve_local(path_str: &str) -> Result<ResolvedInput, PixmorphError> {
    let path = PathBuf::from(path_str);

    if !path.is_file() {
        return Err(PixmorphError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(PixmorphError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(PixmorphError::FileNotFound { path });
        }
    }

    debug!("Resolved local input: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(
    url: &str,
    temp_parent: &Path,
    timeout_secs: u64,
) -> Result<ResolvedInput, PixmorphError> {
    info!("Downloading input from: {}", url);

    let parsed = reqwest::Url::parse(url).map_err(|_| PixmorphError::InvalidInput {
        input: url.to_string(),
    })?;

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PixmorphError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let failed = |e: reqwest::Error| {
        if e.is_timeout() {
            PixmorphError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            PixmorphError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(parsed.clone()).send().await.map_err(failed)?;

    if !response.status().is_success() {
        return Err(PixmorphError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let filename = extract_filename(&parsed);
    let temp_dir = scratch_dir(temp_parent)?;
    let file_path = temp_dir.path().join(&filename);

    let bytes = response.bytes().await.map_err(failed)?;

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| PixmorphError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded {} bytes to: {}", bytes.len(), file_path.display());

    Ok(ResolvedInput::Temporary {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Last URL path segment when it looks like a file name.
fn extract_filename(url: &reqwest::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|last| last.contains('.'))
        .and_then(sanitize_file_name)
        .unwrap_or_else(|| "downloaded.bin".to_string())
}

/// Keep only the final path component, rejecting empty and dot names.
fn sanitize_file_name(name: &str) -> Option<String> {
    let base = Path::new(name).file_name()?.to_string_lossy().into_owned();
    if base.is_empty() || base.starts_with('.') {
        None
    } else {
        Some(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/a.png"));
        assert!(is_url("http://example.com/a.png"));
        assert!(!is_url("/tmp/a.png"));
        assert!(!is_url("a.png"));
        assert!(!is_url(""));
    }

    #[test]
    fn filename_from_url() {
        let u = reqwest::Url::parse("https://cdn.example.com/img/photo.webp?x=1").unwrap();
        assert_eq!(extract_filename(&u), "photo.webp");
        let u = reqwest::Url::parse("https://example.com/download").unwrap();
        assert_eq!(extract_filename(&u), "downloaded.bin");
    }

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_file_name("../../etc/passwd.png").as_deref(), Some("passwd.png"));
        assert_eq!(sanitize_file_name(".hidden"), None);
        assert_eq!(sanitize_file_name(""), None);
    }

    #[tokio::test]
    async fn missing_file_is_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.png");
        let err = resolve_input(missing.to_str().unwrap(), dir.path(), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, PixmorphError::FileNotFound { .. }));
    }

    #[tokio::test]
    async fn other_schemes_are_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_input("ftp://example.com/a.png", dir.path(), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, PixmorphError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn spooled_bytes_are_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = spool_bytes(b"abc", "pic.gif", dir.path()).await.unwrap();
        let p = resolved.path().to_path_buf();
        assert_eq!(p.file_name().unwrap(), "pic.gif");
        assert_eq!(std::fs::read(&p).unwrap(), b"abc");
        drop(resolved);
        assert!(!p.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}

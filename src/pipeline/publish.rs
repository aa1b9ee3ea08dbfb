//! Move a finished output from the scratch directory into `output_dir`.
//!
//! ## Naming
//!
//! `<unix-millis>-<uuid>-converted.<ext>`. The timestamp keeps listings
//! readable and roughly ordered; the random uuid makes concurrent calls
//! collision-free without any locking.
//!
//! The file is renamed into place when scratch and output share a
//! filesystem, otherwise copied into a file created with create-new
//! semantics. A failed copy removes the partial file.

use crate::config::PipelineConfig;
use crate::error::PixmorphError;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// A file that now lives in the output directory.
#[derive(Debug, Clone)]
pub struct Published {
    pub path: PathBuf,
    pub file_name: String,
    pub bytes: u64,
}

/// Generate a fresh output file name for extension `ext`.
pub fn output_file_name(ext: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{millis}-{}-converted.{ext}", Uuid::new_v4().simple())
}

/// Publish `produced` under a new name with extension `ext`.
pub async fn publish(
    config: &PipelineConfig,
    produced: &Path,
    ext: &str,
) -> Result<Published, PixmorphError> {
    let dir = &config.output_dir;
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| write_failed(dir, e))?;

    let file_name = output_file_name(ext);
    let dest = dir.join(&file_name);

    let bytes = match tokio::fs::metadata(produced).await {
        Ok(m) => m.len(),
        Err(e) => return Err(write_failed(produced, e)),
    };

    // rename() would silently replace an existing file; check first.
    if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
        return Err(write_failed(
            &dest,
            std::io::Error::from(std::io::ErrorKind::AlreadyExists),
        ));
    }
    match tokio::fs::rename(produced, &dest).await {
        Ok(()) => debug!("Moved {} → {}", produced.display(), dest.display()),
        Err(e) => {
            debug!("rename failed ({}); copying instead", e);
            copy_new(produced, &dest).await?;
        }
    }

    Ok(Published {
        path: dest,
        file_name,
        bytes,
    })
}

async fn copy_new(src: &Path, dest: &Path) -> Result<(), PixmorphError> {
    let mut out = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .await
        .map_err(|e| write_failed(dest, e))?;

    let result = async {
        let mut input = tokio::fs::File::open(src).await?;
        tokio::io::copy(&mut input, &mut out).await?;
        out.flush().await?;
        out.sync_all().await
    }
    .await;

    if let Err(e) = result {
        drop(out);
        if let Err(rm) = tokio::fs::remove_file(dest).await {
            warn!("Could not remove partial output {}: {}", dest.display(), rm);
        }
        return Err(write_failed(dest, e));
    }
    Ok(())
}

fn write_failed(path: &Path, source: std::io::Error) -> PixmorphError {
    PixmorphError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    }
}

//! Pipeline stages for format conversion and image processing.
//!
//! Each submodule implements one step. Keeping them separate makes each
//! independently testable and lets a backend change without touching the
//! orchestrators in [`crate::convert`] and [`crate::process`].
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ detect ──▶ [rasterize] ──▶ [transform ─▶ watermark] ──▶ dispatch ──▶ [archive] ──▶ publish
//! (URL/path) (sniff)   (Ghostscript)   (resize/crop/rotate)         (native|magick)  (tar.gz)    (output dir)
//! ```
//!
//! 1. [`input`]     — canonicalise the user-supplied path or URL to a local file
//! 2. [`detect`]    — identify the real source format from content
//! 3. [`rasterize`] — PDF / PostScript / EPS pages to PNG via Ghostscript
//! 4. [`transform`] — resize → crop → rotate on the decoded raster
//! 5. [`watermark`] — SVG text layer composited last
//! 6. [`dispatch`]  — pick the backend: [`native`] or [`magick`] (through [`exec`])
//! 7. [`archive`]   — bundle per-page or per-item outputs
//! 8. [`publish`]   — move the result into the output directory under a unique name

pub mod archive;
pub mod detect;
pub mod dispatch;
pub mod exec;
pub mod input;
pub mod magick;
pub mod native;
pub mod publish;
pub mod rasterize;
pub mod transform;
pub mod watermark;

use crate::error::PixmorphError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::warn;
use uuid::Uuid;

/// Fresh per-call scratch directory under `parent`, removed on drop.
pub(crate) fn scratch_dir(parent: &Path) -> Result<TempDir, PixmorphError> {
    std::fs::create_dir_all(parent)
        .and_then(|_| tempfile::Builder::new().prefix("pixmorph-").tempdir_in(parent))
        .map_err(|e| {
            PixmorphError::Internal(format!(
                "Failed to create scratch dir under {}: {}",
                parent.display(),
                e
            ))
        })
}

/// Unique path for an intermediate file inside `scratch`.
pub(crate) fn scratch_file(scratch: &Path, stem: &str, ext: &str) -> PathBuf {
    scratch.join(format!("{stem}-{}.{ext}", Uuid::new_v4().simple()))
}

/// Best-effort removal of a temporary file. Failures are logged, not raised.
pub(crate) async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove temporary file {}: {}", path.display(), e);
        }
    }
}

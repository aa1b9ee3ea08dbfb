//! Bundle several outputs into one gzip-compressed tar, and unpack an
//! uploaded bundle of images for batch processing.
//!
//! Entries are added in the order given, under the caller's names, with a
//! fixed mode so archives do not depend on the scratch files' permissions.

use crate::error::StageError;
use crate::pipeline::dispatch::join_error;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

/// One file to add: where it is, and its name inside the archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub source: PathBuf,
    pub name: String,
}

/// Entry name for page `page` (1-indexed) of a document.
pub fn page_entry_name(page: usize, ext: &str) -> String {
    format!("page-{page:03}.{ext}")
}

/// Entry name for a batch item derived from its input's file stem.
pub fn batch_entry_name(input: &Path, ext: &str) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "image".to_string());
    format!("{stem}_processed.{ext}")
}

/// Write `entries` into a new `.tar.gz` at `dest`.
pub async fn write_archive(entries: Vec<ArchiveEntry>, dest: &Path) -> Result<u64, StageError> {
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || write_blocking(&entries, &dest))
        .await
        .map_err(join_error)?
}

fn write_blocking(entries: &[ArchiveEntry], dest: &Path) -> Result<u64, StageError> {
    let io = |ctx: &str, e| StageError::io(format!("{ctx} {}", dest.display()), e);

    let file = File::create(dest).map_err(|e| io("creating", e))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.mode(tar::HeaderMode::Deterministic);

    for entry in entries {
        let mut f = File::open(&entry.source)
            .map_err(|e| StageError::io(format!("opening {}", entry.source.display()), e))?;
        builder
            .append_file(&entry.name, &mut f)
            .map_err(|e| io("appending to", e))?;
        debug!("archived {} as {}", entry.source.display(), entry.name);
    }

    let gz = builder.into_inner().map_err(|e| io("finishing", e))?;
    let file = gz.finish().map_err(|e| io("compressing", e))?;
    let len = file.metadata().map_err(|e| io("reading", e))?.len();
    Ok(len)
}

/// Raster extensions picked out of an input bundle; everything else is skipped.
pub const BUNDLE_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "gif"];

/// Unpack the image entries of a `.tar` or `.tar.gz` bundle into `dest`,
/// returning their paths in archive order.
///
/// Directory structure is flattened: entry `n` lands in `dest/<n>/<file name>`
/// so the file stem survives and names cannot escape `dest`.
pub async fn extract_images(bundle: &Path, dest: &Path) -> Result<Vec<PathBuf>, StageError> {
    let (bundle, dest) = (bundle.to_path_buf(), dest.to_path_buf());
    tokio::task::spawn_blocking(move || extract_blocking(&bundle, &dest))
        .await
        .map_err(join_error)?
}

fn extract_blocking(bundle: &Path, dest: &Path) -> Result<Vec<PathBuf>, StageError> {
    let io = |ctx: &str, e| StageError::io(format!("{ctx} {}", bundle.display()), e);

    let mut file = File::open(bundle).map_err(|e| io("opening", e))?;
    let mut magic = [0u8; 2];
    let gzipped = file.read_exact(&mut magic).is_ok() && magic == [0x1f, 0x8b];
    file.seek(SeekFrom::Start(0)).map_err(|e| io("reading", e))?;
    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut archive = tar::Archive::new(reader);
    let mut out = Vec::new();
    for (idx, entry) in archive
        .entries()
        .map_err(|e| io("listing", e))?
        .enumerate()
    {
        let mut entry = entry.map_err(|e| io("reading", e))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path().map_err(|e| io("reading", e))?.into_owned();
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        // macOS resource forks ride along as `._name.jpg`.
        if name.starts_with("._") || !is_bundle_image(&name) {
            debug!("skipping bundle entry {}", path.display());
            continue;
        }
        let dir = dest.join(idx.to_string());
        std::fs::create_dir_all(&dir)
            .map_err(|e| StageError::io(format!("creating {}", dir.display()), e))?;
        let target = dir.join(&name);
        let mut f = File::create(&target)
            .map_err(|e| StageError::io(format!("creating {}", target.display()), e))?;
        std::io::copy(&mut entry, &mut f).map_err(|e| io("extracting from", e))?;
        out.push(target);
    }
    debug!("extracted {} images from {}", out.len(), bundle.display());
    Ok(out)
}

fn is_bundle_image(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| {
            BUNDLE_IMAGE_EXTENSIONS
                .iter()
                .any(|e| e.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

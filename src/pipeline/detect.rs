//! Format detection from file content, independent of the file name.
//!
//! Order, first hit wins:
//!
//! 1. The `image` crate guesses the format from magic bytes *and* can read
//!    the dimensions with its decoder, so the file really is readable.
//! 2. Header sniffing for formats `image` cannot open: PDF, PostScript vs.
//!    EPS (DSC `EPSF` marker in the first line, or the binary EPS preamble),
//!    ISO-BMFF `ftyp` brands for AVIF / HEIC, and SVG markup.
//! 3. The lowercased extension, without the dot.
//!
//! `None` means unknown; callers decide whether that is fatal.

use image::{ImageFormat, ImageReader};
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Bytes read for header sniffing.
const SNIFF_LEN: usize = 512;
/// Portion of the header searched for the EPS marker.
const PS_HEADER_LEN: usize = 64;

/// Detect the format of the file at `path`.
pub fn detect(path: &Path) -> Option<String> {
    if let Some(key) = detect_native(path) {
        debug!("Detected {} via image decoder: {}", key, path.display());
        return Some(key);
    }
    if let Some(key) = read_header(path).and_then(|h| sniff(&h)) {
        debug!("Detected {} via header: {}", key, path.display());
        return Some(key.to_string());
    }
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .filter(|e| !e.is_empty());
    if let Some(ref e) = ext {
        debug!("Falling back to extension '{}' for {}", e, path.display());
    }
    ext
}

/// [`detect`] off the async executor.
pub async fn detect_file(path: &Path) -> Option<String> {
    let p = path.to_path_buf();
    tokio::task::spawn_blocking(move || detect(&p))
        .await
        .ok()
        .flatten()
}

/// Registry key for an `image` crate format.
pub fn format_key(format: ImageFormat) -> String {
    format!("{:?}", format).to_lowercase()
}

fn detect_native(path: &Path) -> Option<String> {
    let reader = ImageReader::open(path).ok()?.with_guessed_format().ok()?;
    let format = reader.format()?;
    reader.into_dimensions().ok()?;
    Some(format_key(format))
}

fn read_header(path: &Path) -> Option<Vec<u8>> {
    let file = std::fs::File::open(path).ok()?;
    let mut buf = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64).read_to_end(&mut buf).ok()?;
    Some(buf)
}

/// Identify non-raster formats from leading bytes.
pub fn sniff(header: &[u8]) -> Option<&'static str> {
    if header.starts_with(b"%PDF") {
        return Some("pdf");
    }
    if header.starts_with(&[0xC5, 0xD0, 0xD3, 0xC6]) {
        return Some("eps");
    }
    if header.starts_with(b"%!PS") {
        let head = &header[..header.len().min(PS_HEADER_LEN)];
        let first_line = head.split(|&b| b == b'\n' || b == b'\r').next().unwrap_or(head);
        return Some(if contains(first_line, b"EPSF") {
            "eps"
        } else {
            "ps"
        });
    }
    if header.len() >= 12 && &header[4..8] == b"ftyp" {
        return match &header[8..12] {
            b"avif" | b"avis" => Some("avif"),
            b"heic" | b"heix" | b"hevc" | b"hevx" | b"heim" | b"heis" => Some("heic"),
            b"mif1" | b"msf1" => Some("heif"),
            _ => None,
        };
    }
    let text = String::from_utf8_lossy(header);
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    if (trimmed.starts_with("<?xml") || trimmed.starts_with("<svg")) && text.contains("<svg") {
        return Some("svg");
    }
    None
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

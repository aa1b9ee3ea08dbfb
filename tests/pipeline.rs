//! Integration tests for the public pipeline API.
//!
//! Everything here runs without external tools except the real-document
//! tests, which need Ghostscript and print `SKIP` when it is not installed.
//! The page fan-out is also covered against a scripted stand-in for `gs`.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use flate2::read::GzDecoder;
use image::{GenericImageView, Rgba, RgbaImage};
use pixmorph::{
    convert, inspect, list_outputs, process, resolve_output, ConversionRequest, CropOptions,
    PipelineConfig, PixmorphError, ProcessingOptions, ToolPaths, WatermarkOptions,
    WatermarkPosition,
};
use std::path::{Path, PathBuf};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Route pipeline logs to the test output (visible with `--nocapture`).
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pixmorph=debug")),
        )
        .with_test_writer()
        .try_init();
}

fn config(root: &Path) -> PipelineConfig {
    init_tracing();
    PipelineConfig::builder()
        .output_dir(root.join("out"))
        .temp_dir(root.join("tmp"))
        .tools(ToolPaths::default())
        .build()
        .unwrap()
}

fn write_png(path: &Path, w: u32, h: u32, px: [u8; 4]) -> String {
    RgbaImage::from_pixel(w, h, Rgba(px)).save(path).unwrap();
    path.to_str().unwrap().to_string()
}

fn scratch_entries(root: &Path) -> usize {
    std::fs::read_dir(root.join("tmp"))
        .map(|d| d.count())
        .unwrap_or(0)
}

/// Skip this test if Ghostscript cannot be found.
macro_rules! skip_unless_rasterizer {
    () => {{
        match tool_locate::locate(tool_locate::Tool::Rasterizer) {
            Ok(p) => p,
            Err(_) => {
                println!("SKIP — Ghostscript not found (set PIXMORPH_RASTERIZER_PATH)");
                return;
            }
        }
    }};
}

/// Skip this test if ImageMagick cannot be found.
macro_rules! skip_unless_converter {
    () => {{
        match tool_locate::locate(tool_locate::Tool::Converter) {
            Ok(p) => p,
            Err(_) => {
                println!("SKIP — ImageMagick not found (set PIXMORPH_CONVERTER_PATH)");
                return;
            }
        }
    }};
}

/// A minimal PDF with `pages` blank US-letter pages and a correct xref.
fn blank_pdf(pages: usize) -> Vec<u8> {
    let mut objects: Vec<String> = Vec::new();
    objects.push("<< /Type /Catalog /Pages 2 0 R >>".into());
    let kids: Vec<String> = (0..pages).map(|i| format!("{} 0 R", i + 3)).collect();
    objects.push(format!(
        "<< /Type /Pages /Kids [{}] /Count {} >>",
        kids.join(" "),
        pages
    ));
    for _ in 0..pages {
        objects.push("<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] >>".into());
    }

    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
    }
    let xref = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for off in offsets {
        out.extend_from_slice(format!("{off:010} 00000 n \n").as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref
        )
        .as_bytes(),
    );
    out
}

fn archive_names(path: &Path) -> Vec<String> {
    let file = std::fs::File::open(path).unwrap();
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let mut names: Vec<String> = archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Write an executable stand-in for `gs` that answers the `-h` capability check
/// and "renders" `pages` copies of `seed` next to the `-sOutputFile` pattern.
#[cfg(unix)]
fn fake_rasterizer(root: &Path, seed: &Path, pages: u32) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let script = format!(
        r#"#!/bin/sh
if [ "$1" = "-h" ]; then
  echo 'Input formats: PDF PostScript'
  echo 'Available devices: png16m'
  exit 0
fi
for a in "$@"; do
  case "$a" in -sOutputFile=*) out="${{a#-sOutputFile=}}" ;; esac
done
dir=$(dirname "$out")
i=1
while [ "$i" -le {pages} ]; do
  cp '{seed}' "$dir/$(printf 'page-%04d.png' "$i")"
  i=$((i + 1))
done
"#,
        seed = seed.display(),
    );
    let path = root.join(format!("gs-{pages}"));
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(unix)]
fn scripted_document_config(root: &Path, pages: u32) -> PipelineConfig {
    init_tracing();
    let seed = root.join("seed.png");
    write_png(&seed, 40, 30, [10, 20, 30, 255]);
    PipelineConfig::builder()
        .output_dir(root.join("out"))
        .temp_dir(root.join("tmp"))
        .tools(ToolPaths {
            converter: None,
            rasterizer: Some(fake_rasterizer(root, &seed, pages)),
        })
        .build()
        .unwrap()
}

// ── Formats and options ──────────────────────────────────────────────────────

#[test]
fn unknown_format_lists_supported_keys() {
    let err = resolve_output("xyz").unwrap_err();
    match err {
        PixmorphError::UnsupportedFormat { ref valid, .. } => {
            assert!(!valid.is_empty());
            let mut sorted = valid.clone();
            sorted.sort();
            assert_eq!(&sorted, valid);
        }
        other => panic!("expected UnsupportedFormat, got {other:?}"),
    }
    assert!(err.to_string().contains("xyz"));
}

#[test]
fn format_keys_are_case_insensitive() {
    assert_eq!(resolve_output("PNG").unwrap().key, "png");
    assert_eq!(resolve_output("Jpeg").unwrap().extension, "jpg");
    assert_eq!(resolve_output("jpg").unwrap().key, "jpg");
    assert!(list_outputs().contains(&"avif"));
}

#[test]
fn quality_above_max_is_rejected() {
    let err = ConversionRequest::new("jpg").quality(101).validate().unwrap_err();
    assert!(matches!(err, PixmorphError::InvalidQuality { value: 101 }));
    assert!(ConversionRequest::new("jpg").quality(100).validate().is_ok());
}

#[test]
fn crop_single_value_applies_to_every_edge() {
    let one = CropOptions::from_shorthand("7").edges().unwrap().unwrap();
    let four = CropOptions::from_shorthand("7,7,7,7").edges().unwrap().unwrap();
    assert_eq!(one, four);
    assert_eq!(one.rect(100, 50), (7, 7, 86, 36));
}

// ── Conversion ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn png_to_jpeg_is_detected_as_jpeg() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let src = write_png(&dir.path().join("in.png"), 64, 48, [200, 30, 30, 255]);

    let r = convert(&src, &ConversionRequest::new("jpeg").quality(80), &cfg)
        .await
        .unwrap();
    assert_eq!(r.format_extension, "jpg");
    assert_eq!(r.mime_type, "image/jpeg");
    assert_eq!(r.page_count, 1);

    let info = inspect(r.output_path.to_str().unwrap(), &cfg).await.unwrap();
    assert_eq!(info.format.as_deref(), Some("jpeg"));
    assert_eq!((info.width, info.height), (64, 48));
    assert_eq!(info.bytes, r.bytes_out);
    assert_eq!(scratch_entries(dir.path()), 0);
}

#[tokio::test]
async fn missing_input_is_file_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let missing = dir.path().join("nope.png");
    let err = convert(missing.to_str().unwrap(), &ConversionRequest::new("png"), &cfg)
        .await
        .unwrap_err();
    assert!(matches!(err, PixmorphError::FileNotFound { .. }), "{err}");
}

#[tokio::test]
async fn failed_publish_leaves_no_scratch_files() {
    let dir = tempfile::tempdir().unwrap();
    // Output "directory" is a regular file, so publishing must fail.
    let blocker = dir.path().join("out");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let cfg = config(dir.path());
    let src = write_png(&dir.path().join("in.png"), 16, 16, [0, 0, 0, 255]);

    let err = convert(&src, &ConversionRequest::new("webp"), &cfg)
        .await
        .unwrap_err();
    assert!(matches!(err, PixmorphError::OutputWriteFailed { .. }), "{err}");
    assert_eq!(scratch_entries(dir.path()), 0);
}

#[tokio::test]
async fn oversized_icon_is_shrunk_to_the_limit() {
    let magick = skip_unless_converter!();
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cfg = PipelineConfig::builder()
        .output_dir(dir.path().join("out"))
        .temp_dir(dir.path().join("tmp"))
        .converter_path(magick)
        .build()
        .unwrap();
    let src = write_png(&dir.path().join("big.png"), 512, 300, [20, 120, 220, 255]);

    let r = convert(&src, &ConversionRequest::new("ico"), &cfg)
        .await
        .unwrap();
    assert_eq!(r.format_extension, "ico");
    let img = image::open(&r.output_path).unwrap();
    assert_eq!(img.dimensions(), (256, 150));
    assert_eq!(scratch_entries(dir.path()), 0);
}

// ── Processing ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn watermark_marks_only_the_anchored_corner() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let src = write_png(&dir.path().join("in.png"), 100, 100, [255, 255, 255, 255]);

    let mut wm = WatermarkOptions::new("pixmorph");
    wm.position = WatermarkPosition::BottomRight;
    // Light text gets a dark plate, visible on white without any font.
    wm.color = Some("#ffffff".into());
    wm.opacity = Some(1.0);
    let options = ProcessingOptions {
        watermark: Some(wm),
        output_format: Some("png".into()),
        ..Default::default()
    };

    let r = process(&src, &options, &cfg).await.unwrap();
    let out = image::open(&r.output_path).unwrap();
    assert_eq!(out.dimensions(), (100, 100));

    let region_changed = |x0: u32, y0: u32| {
        (x0..x0 + 18)
            .flat_map(|x| (y0..y0 + 18).map(move |y| (x, y)))
            .any(|(x, y)| out.get_pixel(x, y) != Rgba([255, 255, 255, 255]))
    };
    assert!(region_changed(62, 62), "bottom-right corner should be marked");
    assert!(!region_changed(0, 0), "top-left corner should be untouched");
}

#[tokio::test]
async fn resize_then_crop_reports_sizes() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let src = write_png(&dir.path().join("in.png"), 400, 200, [10, 20, 30, 255]);

    let options: ProcessingOptions = serde_json::from_value(serde_json::json!({
        "resize": { "width": 200 },
        "crop": { "value": 10 },
        "outputFormat": "webp",
    }))
    .unwrap();

    let r = process(&src, &options, &cfg).await.unwrap();
    assert_eq!(r.original_size, Some((400, 200)));
    assert_eq!(r.processed_size, Some((180, 80)));
    assert_eq!(r.output_format, "webp");
}

// ── Documents (scripted rasterizer) ──────────────────────────────────────────

#[cfg(unix)]
#[tokio::test]
async fn scripted_three_pages_are_bundled_into_an_archive() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = scripted_document_config(dir.path(), 3);
    let pdf = dir.path().join("doc.pdf");
    std::fs::write(&pdf, blank_pdf(3)).unwrap();

    let r = convert(pdf.to_str().unwrap(), &ConversionRequest::new("png"), &cfg)
        .await
        .unwrap();
    assert!(r.is_archive());
    assert_eq!(r.page_count, 3);
    assert_eq!(r.input_format.as_deref(), Some("pdf"));

    let file = std::fs::File::open(&r.output_path).unwrap();
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let mut names = Vec::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        names.push(entry.path().unwrap().to_string_lossy().into_owned());
        let mut bytes = Vec::new();
        std::io::Read::read_to_end(&mut entry, &mut bytes).unwrap();
        let page = image::load_from_memory(&bytes).unwrap();
        assert_eq!(page.dimensions(), (40, 30));
    }
    names.sort();
    assert_eq!(names, vec!["page-001.png", "page-002.png", "page-003.png"]);
    assert_eq!(scratch_entries(dir.path()), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn scripted_single_page_is_written_as_plain_image() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = scripted_document_config(dir.path(), 1);
    let pdf = dir.path().join("one.pdf");
    std::fs::write(&pdf, blank_pdf(1)).unwrap();

    let r = convert(pdf.to_str().unwrap(), &ConversionRequest::new("png"), &cfg)
        .await
        .unwrap();
    assert!(!r.is_archive());
    assert_eq!(r.page_count, 1);
    assert_eq!(r.format_extension, "png");
    assert!(!r.output_file_name.ends_with(".tar.gz"));
    let img = image::open(&r.output_path).unwrap();
    assert_eq!(img.dimensions(), (40, 30));
    assert_eq!(std::fs::read_dir(dir.path().join("out")).unwrap().count(), 1);
    assert_eq!(scratch_entries(dir.path()), 0);
}

// ── Documents (need Ghostscript) ─────────────────────────────────────────────

#[tokio::test]
async fn three_page_pdf_becomes_archive_of_pages() {
    let gs = skip_unless_rasterizer!();
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cfg = PipelineConfig::builder()
        .output_dir(dir.path().join("out"))
        .temp_dir(dir.path().join("tmp"))
        .rasterizer_path(gs)
        .dpi(72)
        .build()
        .unwrap();
    let pdf: PathBuf = dir.path().join("doc.pdf");
    std::fs::write(&pdf, blank_pdf(3)).unwrap();

    let r = convert(pdf.to_str().unwrap(), &ConversionRequest::new("png"), &cfg)
        .await
        .unwrap();
    assert!(r.is_archive());
    assert_eq!(r.page_count, 3);
    assert_eq!(r.input_format.as_deref(), Some("pdf"));
    assert!(r.output_file_name.ends_with(".tar.gz"));
    assert_eq!(
        archive_names(&r.output_path),
        vec!["page-001.png", "page-002.png", "page-003.png"]
    );
    assert_eq!(scratch_entries(dir.path()), 0);
}

#[tokio::test]
async fn single_page_pdf_becomes_one_image() {
    let gs = skip_unless_rasterizer!();
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let cfg = PipelineConfig::builder()
        .output_dir(dir.path().join("out"))
        .temp_dir(dir.path().join("tmp"))
        .rasterizer_path(gs)
        .dpi(72)
        .build()
        .unwrap();
    let pdf = dir.path().join("one.pdf");
    std::fs::write(&pdf, blank_pdf(1)).unwrap();

    let r = convert(pdf.to_str().unwrap(), &ConversionRequest::new("jpg"), &cfg)
        .await
        .unwrap();
    assert!(!r.is_archive());
    assert_eq!(r.page_count, 1);
    assert_eq!(r.format_extension, "jpg");
    let img = image::open(&r.output_path).unwrap();
    assert_eq!(img.dimensions(), (612, 792));
    assert_eq!(scratch_entries(dir.path()), 0);
}

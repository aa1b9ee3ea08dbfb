//! Watermarks: a text layer rendered through SVG with resvg, or a logo image
//! scaled to the base width. Either is alpha-composited over the image.
//!
//! ## Why SVG?
//!
//! resvg already does font lookup, shaping and anti-aliased text on
//! tiny-skia. Building a tiny SVG document the size of the image and
//! rasterizing it avoids carrying a separate glyph rasterizer. The text sits
//! on a translucent plate in a contrasting colour so it stays legible on
//! busy backgrounds, and the plate alone still marks the image on hosts with
//! no fonts installed.

use crate::error::PixmorphError;
use crate::options::{WatermarkOptions, WatermarkPosition};
use crate::pipeline::transform::pixmap_to_rgba;
use image::{imageops, DynamicImage, ImageReader, RgbaImage};
use once_cell::sync::Lazy;
use resvg::tiny_skia::{Pixmap, Transform};
use resvg::usvg::{self, fontdb};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Distance from the anchored edges, in pixels.
pub const MARGIN: u32 = 20;

/// Logo width as a fraction of the base image width.
pub const LOGO_SCALE: f32 = 0.2;

/// Rough advance width of one glyph relative to the font size.
const GLYPH_WIDTH: f32 = 0.6;

/// System fonts, loaded once per process.
static FONTS: Lazy<Arc<fontdb::Database>> = Lazy::new(|| {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    debug!("Loaded {} font faces for watermarks", db.len());
    Arc::new(db)
});

/// Composite the text or logo in `opts` onto `img`. Dimensions are unchanged.
pub fn apply(img: DynamicImage, opts: &WatermarkOptions) -> Result<DynamicImage, PixmorphError> {
    opts.validate()?;
    if let Some(ref path) = opts.image {
        return apply_logo(img, path, opts);
    }
    let (w, h) = (img.width(), img.height());
    let svg = build_svg(w, h, opts)?;

    let layer = render(&svg, w, h)?;
    let mut base = img.to_rgba8();
    imageops::overlay(&mut base, &layer, 0, 0);
    debug!("watermark '{}' at {:?}", opts.text, opts.position);
    Ok(DynamicImage::ImageRgba8(base))
}

fn apply_logo(
    img: DynamicImage,
    path: &Path,
    opts: &WatermarkOptions,
) -> Result<DynamicImage, PixmorphError> {
    let logo = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| PixmorphError::InvalidOption {
            name: "watermark.image".into(),
            value: path.display().to_string(),
            reason: e.to_string(),
        })?
        .decode()
        .map_err(|e| PixmorphError::InvalidOption {
            name: "watermark.image".into(),
            value: path.display().to_string(),
            reason: format!("not a decodable image: {e}"),
        })?;

    let (w, h) = (img.width(), img.height());
    let mark = scale_logo(&logo, w, opts.opacity());
    let (x, y) = place(w, h, mark.width(), mark.height(), opts.position);

    let mut base = img.to_rgba8();
    imageops::overlay(&mut base, &mark, x, y);
    debug!(
        "logo watermark {}x{} at {:?} ({x}, {y})",
        mark.width(),
        mark.height(),
        opts.position
    );
    Ok(DynamicImage::ImageRgba8(base))
}

/// Resize `logo` to [`LOGO_SCALE`] of `base_w` keeping its aspect ratio, and
/// fade its alpha by `opacity`.
fn scale_logo(logo: &DynamicImage, base_w: u32, opacity: f32) -> RgbaImage {
    let lw = ((base_w as f32 * LOGO_SCALE).round() as u32).max(1);
    let lh = ((logo.height() as f64 * lw as f64 / logo.width().max(1) as f64).round() as u32).max(1);
    let mut mark = logo
        .resize_exact(lw, lh, imageops::FilterType::Lanczos3)
        .to_rgba8();
    for px in mark.pixels_mut() {
        px[3] = (px[3] as f32 * opacity).round().clamp(0.0, 255.0) as u8;
    }
    mark
}

/// Top-left corner of a `mw`×`mh` mark anchored at `pos` inside `w`×`h`.
/// Signed so a mark larger than the base is clipped rather than shifted.
fn place(w: u32, h: u32, mw: u32, mh: u32, pos: WatermarkPosition) -> (i64, i64) {
    let (w, h, mw, mh, m) = (w as i64, h as i64, mw as i64, mh as i64, MARGIN as i64);
    let (col, row) = anchor(pos);
    let x = match col {
        Col::Start => m,
        Col::Middle => (w - mw) / 2,
        Col::End => w - m - mw,
    };
    let y = match row {
        Row::Top => m,
        Row::Middle => (h - mh) / 2,
        Row::Bottom => h - m - mh,
    };
    (x, y)
}

/// SVG document of exactly `w`×`h` holding the plate and the text.
fn build_svg(w: u32, h: u32, opts: &WatermarkOptions) -> Result<String, PixmorphError> {
    let [r, g, b] = opts.rgb()?;
    let opacity = opts.opacity();
    let size = opts.font_size_for(w, h) as f32;
    let text = escape(opts.text.trim());

    let pad = size * 0.3;
    let text_w = opts.text.trim().chars().count() as f32 * size * GLYPH_WIDTH;
    let plate_w = text_w + 2.0 * pad;
    let plate_h = size + 2.0 * pad;
    let (wf, hf, m) = (w as f32, h as f32, MARGIN as f32);

    let (col, row) = anchor(opts.position);
    let plate_x = match col {
        Col::Start => m,
        Col::Middle => (wf - plate_w) / 2.0,
        Col::End => wf - m - plate_w,
    };
    let plate_y = match row {
        Row::Top => m,
        Row::Middle => (hf - plate_h) / 2.0,
        Row::Bottom => hf - m - plate_h,
    };
    let text_x = plate_x + pad;
    // Baseline sits roughly 0.8 em below the top of the line box.
    let text_y = plate_y + pad + size * 0.8;

    // Dark plate under light text and vice versa.
    let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    let plate = if luma > 127.0 { "#000000" } else { "#ffffff" };
    let plate_opacity = opacity * 0.4;

    Ok(format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">
<rect x="{plate_x:.1}" y="{plate_y:.1}" width="{plate_w:.1}" height="{plate_h:.1}" rx="{pad:.1}" fill="{plate}" fill-opacity="{plate_opacity:.3}"/>
<text x="{text_x:.1}" y="{text_y:.1}" font-family="sans-serif" font-size="{size:.1}" fill="#{r:02x}{g:02x}{b:02x}" fill-opacity="{opacity:.3}">{text}</text>
</svg>"##
    ))
}

fn render(svg: &str, w: u32, h: u32) -> Result<image::RgbaImage, PixmorphError> {
    let mut opt = usvg::Options::default();
    opt.fontdb = FONTS.clone();
    let tree = usvg::Tree::from_str(svg, &opt)
        .map_err(|e| PixmorphError::Internal(format!("watermark layer: {e}")))?;

    let mut pixmap = Pixmap::new(w, h)
        .ok_or_else(|| PixmorphError::Internal(format!("cannot allocate {w}x{h} layer")))?;
    resvg::render(&tree, Transform::default(), &mut pixmap.as_mut());

    let layer = pixmap_to_rgba(&pixmap)
        .ok_or_else(|| PixmorphError::Internal("watermark layer size mismatch".into()))?;
    if layer.dimensions() != (w, h) {
        return Err(PixmorphError::Internal(format!(
            "watermark layer is {:?}, expected {w}x{h}",
            layer.dimensions()
        )));
    }
    Ok(layer)
}

enum Col {
    Start,
    Middle,
    End,
}

enum Row {
    Top,
    Middle,
    Bottom,
}

fn anchor(pos: WatermarkPosition) -> (Col, Row) {
    use WatermarkPosition::*;
    match pos {
        TopLeft => (Col::Start, Row::Top),
        Top => (Col::Middle, Row::Top),
        TopRight => (Col::End, Row::Top),
        Left => (Col::Start, Row::Middle),
        Center => (Col::Middle, Row::Middle),
        Right => (Col::End, Row::Middle),
        BottomLeft => (Col::Start, Row::Bottom),
        Bottom => (Col::Middle, Row::Bottom),
        BottomRight => (Col::End, Row::Bottom),
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

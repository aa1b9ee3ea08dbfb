//! Geometric transforms: resize, crop and rotate on an in-memory raster.
//!
//! [`apply`] runs the stages in their fixed order (resize → crop → rotate →
//! watermark), each on the output of the previous one, so the crop sees the
//! resized dimensions and the watermark is sized to the final pixels.

use crate::error::PixmorphError;
use crate::options::{check_output_size, ProcessingOptions, ResizeFit, ResizeOptions};
use crate::pipeline::watermark;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};
use resvg::tiny_skia::{self, FilterQuality, IntSize, Pixmap, PixmapPaint, Transform};
use tracing::{debug, warn};

/// Run every configured stage on `img`.
pub fn apply(img: DynamicImage, opts: &ProcessingOptions) -> Result<DynamicImage, PixmorphError> {
    let mut img = img;

    if let Some(ref r) = opts.resize {
        img = resize(img, r)?;
    }
    if let Some(ref c) = opts.crop {
        if let Some(edges) = c.edges()? {
            let (x, y, w, h) = edges.rect(img.width(), img.height());
            debug!("crop {}x{}+{}+{}", w, h, x, y);
            img = img.crop_imm(x, y, w, h);
        }
    }
    if let Some(angle) = opts.rotate {
        match Rotation::from_degrees(angle) {
            Some(r) => img = rotate(img, r),
            None => warn!("Ignoring rotate value {}: expected a right angle or 0–360", angle),
        }
    }
    if let Some(ref w) = opts.watermark {
        img = watermark::apply(img, w)?;
    }
    Ok(img)
}

// ── Resize ───────────────────────────────────────────────────────────────

/// Outcome of resize planning for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizePlan {
    /// Dimensions the pixels are resampled to.
    pub scaled: (u32, u32),
    /// Centre crop applied after scaling (`cover`).
    pub crop_to: Option<(u32, u32)>,
    /// Transparent canvas the scaled image is centred on (`contain`).
    pub pad_to: Option<(u32, u32)>,
}

impl ResizePlan {
    fn scale_only(scaled: (u32, u32)) -> Self {
        Self {
            scaled,
            crop_to: None,
            pad_to: None,
        }
    }
}

/// Work out the geometry for resizing a `src_w`×`src_h` image.
///
/// A single dimension keeps the aspect ratio whatever the fit. Without
/// `enlarge` the scale factor never exceeds 1.
pub fn plan_resize(
    src_w: u32,
    src_h: u32,
    width: Option<u32>,
    height: Option<u32>,
    fit: ResizeFit,
    enlarge: bool,
) -> ResizePlan {
    let (sw, sh) = (src_w.max(1) as f64, src_h.max(1) as f64);
    let cap = |s: f64| if enlarge { s } else { s.min(1.0) };
    let scaled = |s: f64| {
        (
            ((sw * s).round() as u32).max(1),
            ((sh * s).round() as u32).max(1),
        )
    };

    let (w, h) = match (width, height) {
        (None, None) => return ResizePlan::scale_only((src_w, src_h)),
        (Some(w), None) => return ResizePlan::scale_only(scaled(cap(w as f64 / sw))),
        (None, Some(h)) => return ResizePlan::scale_only(scaled(cap(h as f64 / sh))),
        (Some(w), Some(h)) => (w, h),
    };
    let (rx, ry) = (w as f64 / sw, h as f64 / sh);

    match fit {
        ResizeFit::Fill => {
            let (w, h) = if enlarge {
                (w, h)
            } else {
                (w.min(src_w), h.min(src_h))
            };
            ResizePlan::scale_only((w.max(1), h.max(1)))
        }
        ResizeFit::Inside => ResizePlan::scale_only(scaled(cap(rx.min(ry)))),
        ResizeFit::Outside => ResizePlan::scale_only(scaled(cap(rx.max(ry)))),
        ResizeFit::Cover => {
            let s = cap(rx.max(ry));
            let scaled = (
                ((sw * s).ceil() as u32).max(1),
                ((sh * s).ceil() as u32).max(1),
            );
            let crop = (w.min(scaled.0), h.min(scaled.1));
            ResizePlan {
                scaled,
                crop_to: (crop != scaled).then_some(crop),
                pad_to: None,
            }
        }
        ResizeFit::Contain => {
            let raw = rx.min(ry);
            let s = cap(raw);
            let scaled = scaled(s);
            // A capped scale means the source already fits: no letterbox.
            let pad = (s == raw && scaled != (w, h)).then_some((w, h));
            ResizePlan {
                scaled,
                crop_to: None,
                pad_to: pad,
            }
        }
    }
}

/// Resize stage.
pub fn resize(img: DynamicImage, opts: &ResizeOptions) -> Result<DynamicImage, PixmorphError> {
    let Some((width, height)) = opts.target()? else {
        return Ok(img);
    };
    let plan = plan_resize(img.width(), img.height(), width, height, opts.fit, opts.enlarge);
    debug!(
        "resize {}x{} → {:?} (fit {}, enlarge {})",
        img.width(),
        img.height(),
        plan,
        opts.fit,
        opts.enlarge
    );
    // A single requested side can still imply a huge other side.
    check_output_size(plan.scaled.0, plan.scaled.1)?;
    if let Some((pw, ph)) = plan.pad_to {
        check_output_size(pw, ph)?;
    }

    let mut out = if plan.scaled == (img.width(), img.height()) {
        img
    } else {
        img.resize_exact(plan.scaled.0, plan.scaled.1, FilterType::Lanczos3)
    };
    if let Some((cw, ch)) = plan.crop_to {
        let x = (out.width() - cw) / 2;
        let y = (out.height() - ch) / 2;
        out = out.crop_imm(x, y, cw, ch);
    }
    if let Some((pw, ph)) = plan.pad_to {
        let mut canvas = RgbaImage::new(pw, ph);
        let x = (pw.saturating_sub(out.width()) / 2) as i64;
        let y = (ph.saturating_sub(out.height()) / 2) as i64;
        imageops::overlay(&mut canvas, &out.to_rgba8(), x, y);
        out = DynamicImage::ImageRgba8(canvas);
    }
    Ok(out)
}

// ── Rotate ───────────────────────────────────────────────────────────────

/// A rotation that will actually be applied (clockwise).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rotation {
    Identity,
    Cw90,
    Cw180,
    Cw270,
    /// Any other angle in (0, 360), on an expanded canvas.
    Arbitrary(f32),
}

impl Rotation {
    /// Accept the right angles (±90, ±180, ±270) and anything in `[0, 360)`.
    pub fn from_degrees(angle: f64) -> Option<Self> {
        if !angle.is_finite() {
            return None;
        }
        Some(match angle {
            a if a == 90.0 || a == -270.0 => Rotation::Cw90,
            a if a == 180.0 || a == -180.0 => Rotation::Cw180,
            a if a == 270.0 || a == -90.0 => Rotation::Cw270,
            a if a == 0.0 => Rotation::Identity,
            a if (0.0..360.0).contains(&a) => Rotation::Arbitrary(a as f32),
            _ => return None,
        })
    }
}

/// Rotate stage.
pub fn rotate(img: DynamicImage, r: Rotation) -> DynamicImage {
    debug!("rotate {:?}", r);
    match r {
        Rotation::Identity => img,
        Rotation::Cw90 => img.rotate90(),
        Rotation::Cw180 => img.rotate180(),
        Rotation::Cw270 => img.rotate270(),
        Rotation::Arbitrary(deg) => rotate_any(&img, deg).unwrap_or_else(|| {
            warn!("Rotation by {} failed; leaving image unrotated", deg);
            img
        }),
    }
}

/// Bicubic rotation about the centre onto a canvas that fits the result.
/// Uncovered corners are transparent.
fn rotate_any(img: &DynamicImage, deg: f32) -> Option<DynamicImage> {
    let (w, h) = (img.width(), img.height());
    let rad = (deg as f64).to_radians();
    let (sin, cos) = (rad.sin().abs(), rad.cos().abs());
    let dw = ((w as f64 * cos + h as f64 * sin).ceil() as u32).max(1);
    let dh = ((w as f64 * sin + h as f64 * cos).ceil() as u32).max(1);

    let src = rgba_to_pixmap(img.to_rgba8())?;
    let mut dst = Pixmap::new(dw, dh)?;
    let transform = Transform::from_rotate_at(deg, w as f32 / 2.0, h as f32 / 2.0)
        .post_translate((dw as f32 - w as f32) / 2.0, (dh as f32 - h as f32) / 2.0);
    let paint = PixmapPaint {
        quality: FilterQuality::Bicubic,
        ..PixmapPaint::default()
    };
    dst.draw_pixmap(0, 0, src.as_ref(), &paint, transform, None);
    Some(DynamicImage::ImageRgba8(pixmap_to_rgba(&dst)?))
}

/// Straight-alpha RGBA → premultiplied pixmap.
pub(crate) fn rgba_to_pixmap(mut rgba: RgbaImage) -> Option<Pixmap> {
    let size = IntSize::from_wh(rgba.width(), rgba.height())?;
    for px in rgba.pixels_mut() {
        let a = px[3] as u16;
        for c in 0..3 {
            px[c] = ((px[c] as u16 * a + 127) / 255) as u8;
        }
    }
    Pixmap::from_vec(rgba.into_raw(), size)
}

/// Premultiplied pixmap → straight-alpha RGBA.
pub(crate) fn pixmap_to_rgba(pixmap: &Pixmap) -> Option<RgbaImage> {
    let data: Vec<u8> = pixmap
        .pixels()
        .iter()
        .flat_map(|p| {
            let c: tiny_skia::ColorU8 = p.demultiply();
            [c.red(), c.green(), c.blue(), c.alpha()]
        })
        .collect();
    RgbaImage::from_raw(pixmap.width(), pixmap.height(), data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CropOptions;
    use image::Rgba;

    fn blank(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([200, 10, 10, 255])))
    }

    fn dims(img: &DynamicImage) -> (u32, u32) {
        (img.width(), img.height())
    }

    #[test]
    fn single_dimension_keeps_aspect() {
        let p = plan_resize(400, 200, Some(100), None, ResizeFit::Cover, false);
        assert_eq!(p, ResizePlan::scale_only((100, 50)));
        let p = plan_resize(400, 200, None, Some(50), ResizeFit::Fill, false);
        assert_eq!(p.scaled, (100, 50));
    }

    #[test]
    fn inside_and_outside() {
        assert_eq!(
            plan_resize(400, 200, Some(100), Some(100), ResizeFit::Inside, false).scaled,
            (100, 50)
        );
        assert_eq!(
            plan_resize(400, 200, Some(100), Some(100), ResizeFit::Outside, false).scaled,
            (200, 100)
        );
    }

    #[test]
    fn cover_scales_then_centre_crops() {
        let p = plan_resize(400, 200, Some(100), Some(100), ResizeFit::Cover, false);
        assert_eq!(p.scaled, (200, 100));
        assert_eq!(p.crop_to, Some((100, 100)));

        let out = resize(
            blank(400, 200),
            &ResizeOptions {
                size: Some("100".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(dims(&out), (100, 100));
    }

    #[test]
    fn contain_pads_to_box() {
        let out = resize(
            blank(400, 200),
            &ResizeOptions {
                size: Some("100".into()),
                fit: ResizeFit::Contain,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(dims(&out), (100, 100));
        let rgba = out.to_rgba8();
        assert_eq!(rgba.get_pixel(50, 0)[3], 0, "letterbox is transparent");
        assert_eq!(rgba.get_pixel(50, 50)[3], 255);
    }

    #[test]
    fn implied_side_beyond_limit_is_rejected() {
        let opts = ResizeOptions {
            width: Some(20_000),
            enlarge: true,
            ..Default::default()
        };
        let err = resize(blank(1, 100), &opts).unwrap_err();
        assert!(matches!(err, PixmorphError::InvalidOption { ref name, .. } if name == "resize"));
    }

    #[test]
    fn never_enlarges_by_default() {
        for fit in [
            ResizeFit::Cover,
            ResizeFit::Contain,
            ResizeFit::Fill,
            ResizeFit::Inside,
            ResizeFit::Outside,
        ] {
            let p = plan_resize(50, 40, Some(500), Some(500), fit, false);
            assert!(p.scaled.0 <= 50 && p.scaled.1 <= 40, "{fit}: {p:?}");
            assert!(p.pad_to.is_none(), "{fit}");
        }
        let p = plan_resize(50, 40, Some(100), Some(80), ResizeFit::Fill, true);
        assert_eq!(p.scaled, (100, 80));
    }

    #[test]
    fn crop_runs_after_resize() {
        let opts = ProcessingOptions {
            resize: Some(ResizeOptions {
                width: Some(100),
                ..Default::default()
            }),
            crop: Some(CropOptions::from_shorthand("10")),
            ..Default::default()
        };
        let out = apply(blank(200, 100), &opts).unwrap();
        assert_eq!(dims(&out), (80, 30));
    }

    #[test]
    fn rotation_parsing() {
        assert_eq!(Rotation::from_degrees(90.0), Some(Rotation::Cw90));
        assert_eq!(Rotation::from_degrees(-90.0), Some(Rotation::Cw270));
        assert_eq!(Rotation::from_degrees(-180.0), Some(Rotation::Cw180));
        assert_eq!(Rotation::from_degrees(0.0), Some(Rotation::Identity));
        assert_eq!(Rotation::from_degrees(45.0), Some(Rotation::Arbitrary(45.0)));
        assert_eq!(Rotation::from_degrees(360.0), None);
        assert_eq!(Rotation::from_degrees(-45.0), None);
        assert_eq!(Rotation::from_degrees(f64::NAN), None);
    }

    #[test]
    fn right_angle_swaps_dimensions() {
        let out = rotate(blank(30, 10), Rotation::Cw90);
        assert_eq!(dims(&out), (10, 30));
    }

    #[test]
    fn arbitrary_angle_expands_canvas() {
        let out = rotate(blank(100, 100), Rotation::Arbitrary(45.0));
        assert!(out.width() >= 141 && out.width() <= 142, "{:?}", dims(&out));
        let rgba = out.to_rgba8();
        assert_eq!(rgba.get_pixel(0, 0)[3], 0, "corner is transparent");
        assert!(rgba.get_pixel(out.width() / 2, out.height() / 2)[3] > 200);
    }

    #[test]
    fn invalid_rotation_is_ignored() {
        let opts = ProcessingOptions {
            rotate: Some(725.0),
            ..Default::default()
        };
        let out = apply(blank(30, 10), &opts).unwrap();
        assert_eq!(dims(&out), (30, 10));
    }

    #[test]
    fn pixmap_round_trip_preserves_opaque_pixels() {
        let img = RgbaImage::from_pixel(3, 2, Rgba([12, 34, 56, 255]));
        let pm = rgba_to_pixmap(img.clone()).unwrap();
        assert_eq!(pixmap_to_rgba(&pm).unwrap(), img);
    }
}

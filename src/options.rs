//! Request types: what to convert to, and how to transform on the way.
//!
//! Everything here is validated up front. A request that reaches a backend
//! always carries a [`Quality`] in 1–100 and, for HEIF-family targets, a
//! codec from the allow-list.

use crate::error::PixmorphError;
use crate::formats::{self, Backend, FormatDescriptor, HeifCodec, NativeMethod};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

// ── Quality ──────────────────────────────────────────────────────────────

/// Encoder quality in 1–100. Default: 90.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quality(u8);

impl Quality {
    pub const DEFAULT: Quality = Quality(90);
    pub const MAX: Quality = Quality(100);

    /// Reject anything outside 1–100.
    pub fn new(value: i64) -> Result<Self, PixmorphError> {
        if (1..=100).contains(&value) {
            Ok(Quality(value as u8))
        } else {
            Err(PixmorphError::InvalidQuality { value })
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Encode target ────────────────────────────────────────────────────────

/// A fully validated encode request handed to the backends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncodeTarget {
    pub descriptor: &'static FormatDescriptor,
    pub quality: Quality,
    /// Set only for HEIF-family targets.
    pub codec: Option<HeifCodec>,
    pub lossless: bool,
}

impl EncodeTarget {
    /// Validate `format`, `quality` and `codec` into a target.
    pub fn resolve(
        format: &str,
        quality: Option<i64>,
        codec: Option<&str>,
        lossless: bool,
    ) -> Result<Self, PixmorphError> {
        let descriptor = formats::resolve_output(format)?;
        let quality = match quality {
            Some(q) => Quality::new(q)?,
            None => Quality::DEFAULT,
        };
        let codec = resolve_codec(descriptor, codec)?;
        Ok(Self {
            descriptor,
            quality,
            codec,
            lossless,
        })
    }
}

/// Pick the codec for a HEIF-family target, validating an explicit hint.
///
/// Hints on formats with a single codec are ignored.
fn resolve_codec(
    descriptor: &FormatDescriptor,
    hint: Option<&str>,
) -> Result<Option<HeifCodec>, PixmorphError> {
    let hint = hint.map(str::trim).filter(|h| !h.is_empty());
    match descriptor.backend {
        Backend::Native(NativeMethod::Heif { default_codec }) => match hint {
            None => Ok(Some(default_codec)),
            Some(h) => HeifCodec::parse(h)
                .map(Some)
                .ok_or_else(|| PixmorphError::InvalidCodec {
                    format: descriptor.key.to_string(),
                    codec: h.to_string(),
                    allowed: HeifCodec::ALLOWED.iter().map(|s| s.to_string()).collect(),
                }),
        },
        _ => {
            if let Some(h) = hint {
                debug!("Ignoring codec hint '{}' for {}", h, descriptor.key);
            }
            Ok(None)
        }
    }
}

// ── Conversion request ───────────────────────────────────────────────────

/// Parameters of a plain `convert` call.
///
/// ```rust
/// use pixmorph::ConversionRequest;
///
/// let req = ConversionRequest::new("avif").quality(70).codec("av1");
/// assert!(req.validate().is_ok());
/// assert!(ConversionRequest::new("png").quality(101).validate().is_err());
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConversionRequest {
    #[serde(alias = "outputFormat", alias = "format")]
    pub output_format: String,
    pub quality: Option<i64>,
    #[serde(alias = "compression")]
    pub codec: Option<String>,
}

impl ConversionRequest {
    pub fn new(output_format: impl Into<String>) -> Self {
        Self {
            output_format: output_format.into(),
            ..Default::default()
        }
    }

    pub fn quality(mut self, q: i64) -> Self {
        self.quality = Some(q);
        self
    }

    pub fn codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = Some(codec.into());
        self
    }

    /// Resolve format, quality and codec without touching any file.
    pub fn validate(&self) -> Result<EncodeTarget, PixmorphError> {
        EncodeTarget::resolve(
            &self.output_format,
            self.quality,
            self.codec.as_deref(),
            false,
        )
    }
}

// ── Processing options ───────────────────────────────────────────────────

/// Transform options for `process`. Every field is optional; an absent
/// field skips its stage.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProcessingOptions {
    pub resize: Option<ResizeOptions>,
    pub crop: Option<CropOptions>,
    /// Rotation in degrees. Values that are not a right angle or in
    /// `[0, 360)` are ignored.
    #[serde(deserialize_with = "lenient_angle")]
    pub rotate: Option<f64>,
    pub watermark: Option<WatermarkOptions>,
    #[serde(alias = "outputFormat", alias = "format")]
    pub output_format: Option<String>,
    pub quality: Option<i64>,
    pub lossless: bool,
    #[serde(alias = "compression")]
    pub codec: Option<String>,
}

impl ProcessingOptions {
    /// True when at least one transform stage would run.
    pub fn has_transforms(&self) -> bool {
        self.resize.is_some()
            || self.crop.is_some()
            || self.rotate.is_some()
            || self.watermark.is_some()
    }

    /// Validate every option, resolving the target against `source_format`
    /// when no explicit output format was given.
    pub fn validate(&self, source_format: Option<&str>) -> Result<EncodeTarget, PixmorphError> {
        let format = match (self.output_format.as_deref(), source_format) {
            (Some(f), _) if !f.trim().is_empty() => f,
            (_, Some(src)) => src,
            _ => {
                return Err(PixmorphError::UnsupportedFormat {
                    format: "unknown".into(),
                    valid: formats::list_outputs()
                        .into_iter()
                        .map(String::from)
                        .collect(),
                })
            }
        };
        let target =
            EncodeTarget::resolve(format, self.quality, self.codec.as_deref(), self.lossless)?;

        if let Some(ref r) = self.resize {
            r.target()?;
        }
        if let Some(ref c) = self.crop {
            c.edges()?;
        }
        if let Some(ref w) = self.watermark {
            w.validate()?;
        }
        Ok(target)
    }
}

/// Accept a number or a numeric string; anything else becomes NaN so the
/// rotate stage can log and skip it.
fn lenient_angle<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Text(String),
    }
    Ok(match Option::<Raw>::deserialize(d)? {
        None => None,
        Some(Raw::Num(n)) => Some(n),
        Some(Raw::Text(s)) if s.trim().is_empty() => None,
        Some(Raw::Text(s)) => Some(s.trim().parse().unwrap_or(f64::NAN)),
    })
}

/// Accept `300` as well as `"300"`.
fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Text(String),
    }
    Ok(match Option::<Raw>::deserialize(d)? {
        None => None,
        Some(Raw::Num(n)) => Some(n.to_string()),
        Some(Raw::Text(s)) => Some(s),
    })
}

// ── Resize ───────────────────────────────────────────────────────────────

/// How requested dimensions are reconciled with the source aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeFit {
    /// Fill the box, cropping the overflow around the centre. (default)
    #[default]
    Cover,
    /// Fit inside the box and pad the rest with transparency.
    Contain,
    /// Stretch to exactly the box, ignoring aspect ratio.
    Fill,
    /// Fit inside the box; output may be smaller than requested.
    Inside,
    /// Cover the box without cropping; output may be larger than requested.
    Outside,
}

impl FromStr for ResizeFit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cover" => Ok(Self::Cover),
            "contain" => Ok(Self::Contain),
            "fill" => Ok(Self::Fill),
            "inside" => Ok(Self::Inside),
            "outside" => Ok(Self::Outside),
            other => Err(format!(
                "unknown fit '{other}' (expected cover, contain, fill, inside or outside)"
            )),
        }
    }
}

impl fmt::Display for ResizeFit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Cover => "cover",
            Self::Contain => "contain",
            Self::Fill => "fill",
            Self::Inside => "inside",
            Self::Outside => "outside",
        };
        f.write_str(s)
    }
}

/// Resize stage options.
///
/// `size` takes precedence over `width`/`height` and accepts `"300"`
/// (square), `"300,200"` or `"300x200"`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ResizeOptions {
    #[serde(deserialize_with = "string_or_number")]
    pub size: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: ResizeFit,
    /// Allow output larger than the source.
    pub enlarge: bool,
}

impl ResizeOptions {
    /// Requested `(width, height)`, or `None` when nothing was asked for.
    pub fn target(&self) -> Result<Option<(Option<u32>, Option<u32>)>, PixmorphError> {
        let dims = match self.size {
            Some(ref raw) => parse_size(raw).map(|(w, h)| (Some(w), Some(h)))?,
            None => (self.width, self.height),
        };
        for (name, v) in [("width", dims.0), ("height", dims.1)] {
            if v == Some(0) {
                return Err(invalid(name, "0", "must be at least 1"));
            }
        }
        if let (Some(w), Some(h)) = dims {
            check_output_size(w, h)?;
        } else if let Some(n) = dims.0.or(dims.1) {
            check_output_size(n, 1)?;
        }
        Ok(match dims {
            (None, None) => None,
            dims => Some(dims),
        })
    }
}

/// Largest edge a resize may produce.
pub const MAX_DIMENSION: u32 = 32_768;

/// Largest pixel count a resize may produce.
pub const MAX_PIXELS: u64 = 100_000_000;

/// Reject output geometry beyond [`MAX_DIMENSION`] / [`MAX_PIXELS`].
pub(crate) fn check_output_size(w: u32, h: u32) -> Result<(), PixmorphError> {
    if w > MAX_DIMENSION || h > MAX_DIMENSION {
        return Err(invalid(
            "resize",
            &format!("{w}x{h}"),
            &format!("each side must be at most {MAX_DIMENSION} pixels"),
        ));
    }
    if w as u64 * h as u64 > MAX_PIXELS {
        return Err(invalid(
            "resize",
            &format!("{w}x{h}"),
            &format!("output must be at most {MAX_PIXELS} pixels"),
        ));
    }
    Ok(())
}

fn parse_size(raw: &str) -> Result<(u32, u32), PixmorphError> {
    let parts: Vec<&str> = raw
        .split(|c| c == ',' || c == 'x' || c == 'X')
        .map(str::trim)
        .collect();
    let nums = parts
        .iter()
        .map(|p| p.parse::<u32>().ok().filter(|&n| n > 0))
        .collect::<Option<Vec<u32>>>()
        .ok_or_else(|| invalid("size", raw, "expected positive integers like 300 or 300,200"))?;
    match nums.as_slice() {
        [s] => Ok((*s, *s)),
        [w, h] => Ok((*w, *h)),
        _ => Err(invalid("size", raw, "expected one or two values")),
    }
}

// ── Crop ─────────────────────────────────────────────────────────────────

/// Crop stage options: CSS-margin shorthand or explicit edges.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CropOptions {
    /// 1–4 integers: all / vertical,horizontal / top,horizontal,bottom /
    /// top,right,bottom,left.
    #[serde(alias = "value", deserialize_with = "string_or_number")]
    pub shorthand: Option<String>,
    pub top: Option<i64>,
    pub right: Option<i64>,
    pub bottom: Option<i64>,
    pub left: Option<i64>,
}

impl CropOptions {
    pub fn from_shorthand(s: impl Into<String>) -> Self {
        Self {
            shorthand: Some(s.into()),
            ..Default::default()
        }
    }

    /// Edge offsets, or `None` when no edge was given.
    pub fn edges(&self) -> Result<Option<CropEdges>, PixmorphError> {
        if let Some(ref raw) = self.shorthand.as_ref().filter(|s| !s.trim().is_empty()) {
            return parse_crop_shorthand(raw).map(Some);
        }
        if [self.top, self.right, self.bottom, self.left]
            .iter()
            .all(Option::is_none)
        {
            return Ok(None);
        }
        let clamp = |v: Option<i64>| v.unwrap_or(0).clamp(0, u32::MAX as i64) as u32;
        Ok(Some(CropEdges {
            top: clamp(self.top),
            right: clamp(self.right),
            bottom: clamp(self.bottom),
            left: clamp(self.left),
        }))
    }
}

fn parse_crop_shorthand(raw: &str) -> Result<CropEdges, PixmorphError> {
    let values = raw
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<i64>().map(|v| v.clamp(0, u32::MAX as i64) as u32))
        .collect::<Result<Vec<u32>, _>>()
        .map_err(|_| invalid("crop", raw, "expected 1 to 4 integers"))?;
    let (top, right, bottom, left) = match values.as_slice() {
        [a] => (*a, *a, *a, *a),
        [v, h] => (*v, *h, *v, *h),
        [t, h, b] => (*t, *h, *b, *h),
        [t, r, b, l] => (*t, *r, *b, *l),
        _ => return Err(invalid("crop", raw, "expected 1 to 4 integers")),
    };
    Ok(CropEdges {
        top,
        right,
        bottom,
        left,
    })
}

/// Resolved crop margins in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CropEdges {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl CropEdges {
    /// Extraction rectangle `(x, y, width, height)` inside a `w`×`h` image.
    ///
    /// The origin stays inside the image and the extent is at least 1×1.
    pub fn rect(&self, w: u32, h: u32) -> (u32, u32, u32, u32) {
        let x = self.left.min(w.saturating_sub(1));
        let y = self.top.min(h.saturating_sub(1));
        let cw = w.saturating_sub(x).saturating_sub(self.right).max(1);
        let ch = h.saturating_sub(y).saturating_sub(self.bottom).max(1);
        (x, y, cw, ch)
    }
}

// ── Watermark ────────────────────────────────────────────────────────────

static HEX_COLOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^#?(?:[0-9a-fA-F]{3}|[0-9a-fA-F]{6})$").expect("valid regex literal")
});

/// Where the watermark text is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum WatermarkPosition {
    TopLeft,
    Top,
    TopRight,
    Left,
    Center,
    Right,
    BottomLeft,
    Bottom,
    #[default]
    BottomRight,
}

impl FromStr for WatermarkPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect();
        Ok(match key.as_str() {
            "topleft" => Self::TopLeft,
            "top" | "topcenter" => Self::Top,
            "topright" => Self::TopRight,
            "left" | "centerleft" => Self::Left,
            "center" | "centre" | "middle" => Self::Center,
            "right" | "centerright" => Self::Right,
            "bottomleft" => Self::BottomLeft,
            "bottom" | "bottomcenter" => Self::Bottom,
            "bottomright" => Self::BottomRight,
            _ => return Err(format!("unknown watermark position '{s}'")),
        })
    }
}

impl TryFrom<String> for WatermarkPosition {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Watermark stage options.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WatermarkOptions {
    /// Text mark. Exactly one of `text` and `image` must be set.
    pub text: String,
    /// Image mark (a logo), scaled to a fifth of the base width.
    #[serde(alias = "imagePath")]
    pub image: Option<PathBuf>,
    pub position: WatermarkPosition,
    /// `#rgb` or `#rrggbb`. Default: white.
    pub color: Option<String>,
    /// 0.0–1.0. Default: 0.5.
    pub opacity: Option<f32>,
    /// Pixels. Default: `max(12, min(w, h) / 20)`.
    #[serde(alias = "fontSize")]
    pub font_size: Option<u32>,
}

impl WatermarkOptions {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Image watermark from the logo at `path`.
    pub fn from_image(path: impl Into<PathBuf>) -> Self {
        Self {
            image: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), PixmorphError> {
        match (self.text.trim().is_empty(), &self.image) {
            (true, None) => {
                return Err(invalid("watermark.text", &self.text, "must not be empty"));
            }
            (false, Some(_)) => {
                return Err(invalid(
                    "watermark",
                    &self.text,
                    "text and image are mutually exclusive",
                ));
            }
            (true, Some(path)) if !path.is_file() => {
                return Err(PixmorphError::FileNotFound { path: path.clone() });
            }
            _ => {}
        }
        self.rgb()?;
        if let Some(o) = self.opacity {
            if !(0.0..=1.0).contains(&o) {
                return Err(invalid(
                    "watermark.opacity",
                    &o.to_string(),
                    "must be between 0 and 1",
                ));
            }
        }
        if self.font_size == Some(0) {
            return Err(invalid("watermark.font_size", "0", "must be at least 1"));
        }
        Ok(())
    }

    /// Text colour as RGB.
    pub fn rgb(&self) -> Result<[u8; 3], PixmorphError> {
        let Some(raw) = self.color.as_deref() else {
            return Ok([255, 255, 255]);
        };
        if !HEX_COLOR.is_match(raw) {
            return Err(invalid(
                "watermark.color",
                raw,
                "expected a hex colour like #fff or #ffcc00",
            ));
        }
        let hex = raw.trim_start_matches('#');
        let digits: Vec<u8> = hex
            .chars()
            .filter_map(|c| c.to_digit(16).map(|d| d as u8))
            .collect();
        Ok(match digits.as_slice() {
            [r, g, b] => [r * 17, g * 17, b * 17],
            [r1, r2, g1, g2, b1, b2] => [r1 * 16 + r2, g1 * 16 + g2, b1 * 16 + b2],
            _ => [255, 255, 255],
        })
    }

    pub fn opacity(&self) -> f32 {
        self.opacity.unwrap_or(0.5)
    }

    /// Font size for a `w`×`h` image.
    pub fn font_size_for(&self, w: u32, h: u32) -> u32 {
        self.font_size.unwrap_or_else(|| (w.min(h) / 20).max(12))
    }
}

fn invalid(name: &str, value: &str, reason: &str) -> PixmorphError {
    PixmorphError::InvalidOption {
        name: name.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn quality_bounds() {
        assert!(Quality::new(0).is_err());
        assert!(Quality::new(1).is_ok());
        assert!(Quality::new(100).is_ok());
        assert!(matches!(
            Quality::new(101),
            Err(PixmorphError::InvalidQuality { value: 101 })
        ));
        assert_eq!(Quality::default().get(), 90);
    }

    #[test]
    fn request_validation() {
        let t = ConversionRequest::new("JPG").quality(75).validate().unwrap();
        assert_eq!(t.descriptor.key, "jpg");
        assert_eq!(t.quality.get(), 75);
        assert_eq!(t.codec, None);

        assert!(matches!(
            ConversionRequest::new("webp").quality(101).validate(),
            Err(PixmorphError::InvalidQuality { .. })
        ));
        assert!(matches!(
            ConversionRequest::new("xyz").validate(),
            Err(PixmorphError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn codec_defaults_and_validation() {
        let avif = ConversionRequest::new("avif").validate().unwrap();
        assert_eq!(avif.codec, Some(HeifCodec::Av1));
        let heic = ConversionRequest::new("heic").validate().unwrap();
        assert_eq!(heic.codec, Some(HeifCodec::Hevc));
        let forced = ConversionRequest::new("heic").codec("av1").validate().unwrap();
        assert_eq!(forced.codec, Some(HeifCodec::Av1));

        match ConversionRequest::new("heif").codec("vp9").validate() {
            Err(PixmorphError::InvalidCodec { allowed, .. }) => {
                assert_eq!(allowed, vec!["av1", "hevc"]);
            }
            other => panic!("unexpected: {other:?}"),
        }

        // Single-codec formats ignore the hint.
        let png = ConversionRequest::new("png").codec("whatever").validate().unwrap();
        assert_eq!(png.codec, None);
    }

    #[test]
    fn size_strings() {
        let r = |s: &str| ResizeOptions {
            size: Some(s.into()),
            ..Default::default()
        };
        assert_eq!(r("300").target().unwrap(), Some((Some(300), Some(300))));
        assert_eq!(r("300,200").target().unwrap(), Some((Some(300), Some(200))));
        assert_eq!(r("300x200").target().unwrap(), Some((Some(300), Some(200))));
        assert!(r("0").target().is_err());
        assert!(r("1,2,3").target().is_err());
        assert!(r("abc").target().is_err());

        let only_w = ResizeOptions {
            width: Some(50),
            ..Default::default()
        };
        assert_eq!(only_w.target().unwrap(), Some((Some(50), None)));
        assert_eq!(ResizeOptions::default().target().unwrap(), None);
    }

    #[test]
    fn oversized_resize_is_rejected_before_decoding() {
        let huge = ProcessingOptions {
            resize: Some(ResizeOptions {
                size: Some("200000x200000".into()),
                fit: ResizeFit::Fill,
                enlarge: true,
                ..Default::default()
            }),
            output_format: Some("png".into()),
            ..Default::default()
        };
        assert!(matches!(
            huge.validate(None),
            Err(PixmorphError::InvalidOption { ref name, .. }) if name == "resize"
        ));

        let too_many_pixels = ResizeOptions {
            size: Some("20000x20000".into()),
            ..Default::default()
        };
        assert!(too_many_pixels.target().is_err());
        let wide = ResizeOptions {
            width: Some(40_000),
            ..Default::default()
        };
        assert!(wide.target().is_err());
        let at_limit = ResizeOptions {
            size: Some("10000x10000".into()),
            ..Default::default()
        };
        assert!(at_limit.target().is_ok());
    }

    #[test]
    fn crop_shorthand_forms() {
        let e = |s: &str| CropOptions::from_shorthand(s).edges().unwrap().unwrap();
        assert_eq!(e("10"), e("10,10,10,10"));
        assert_eq!(
            e("1,2"),
            CropEdges {
                top: 1,
                right: 2,
                bottom: 1,
                left: 2
            }
        );
        assert_eq!(
            e("1 2 3"),
            CropEdges {
                top: 1,
                right: 2,
                bottom: 3,
                left: 2
            }
        );
        assert_eq!(
            e("-5,4,3,2"),
            CropEdges {
                top: 0,
                right: 4,
                bottom: 3,
                left: 2
            }
        );
        assert!(CropOptions::from_shorthand("1,2,3,4,5").edges().is_err());
        assert!(CropOptions::default().edges().unwrap().is_none());
    }

    #[test]
    fn crop_single_value_matches_four_values() {
        let one = CropOptions::from_shorthand("7").edges().unwrap().unwrap();
        let four = CropOptions::from_shorthand("7,7,7,7").edges().unwrap().unwrap();
        assert_eq!(one.rect(40, 30), four.rect(40, 30));
        assert_eq!(one.rect(40, 30), (7, 7, 26, 16));
    }

    #[test]
    fn crop_rect_never_degenerates() {
        let huge = CropEdges {
            top: 500,
            right: 500,
            bottom: 500,
            left: 500,
        };
        let (x, y, w, h) = huge.rect(20, 10);
        assert_eq!((x, y), (19, 9));
        assert_eq!((w, h), (1, 1));
    }

    #[test]
    fn watermark_colors() {
        let mut w = WatermarkOptions::new("hi");
        assert_eq!(w.rgb().unwrap(), [255, 255, 255]);
        w.color = Some("#f00".into());
        assert_eq!(w.rgb().unwrap(), [255, 0, 0]);
        w.color = Some("#00ff80".into());
        assert_eq!(w.rgb().unwrap(), [0, 255, 128]);
        w.color = Some("red".into());
        assert!(w.validate().is_err());
    }

    #[test]
    fn watermark_defaults() {
        let w = WatermarkOptions::new("x");
        assert_eq!(w.opacity(), 0.5);
        assert_eq!(w.font_size_for(100, 100), 12);
        assert_eq!(w.font_size_for(1000, 800), 40);
        assert_eq!(w.position, WatermarkPosition::BottomRight);
        assert!(WatermarkOptions::new("  ").validate().is_err());
    }

    #[test]
    fn watermark_text_and_image_are_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let logo = dir.path().join("logo.png");
        std::fs::write(&logo, b"not checked here").unwrap();

        assert!(WatermarkOptions::from_image(&logo).validate().is_ok());
        let mut both = WatermarkOptions::new("x");
        both.image = Some(logo);
        assert!(matches!(
            both.validate(),
            Err(PixmorphError::InvalidOption { ref name, .. }) if name == "watermark"
        ));
        assert!(matches!(
            WatermarkOptions::from_image(dir.path().join("gone.png")).validate(),
            Err(PixmorphError::FileNotFound { .. })
        ));
        let w: WatermarkOptions =
            serde_json::from_str(r#"{"imagePath": "/tmp/logo.png", "position": "top-left"}"#)
                .unwrap();
        assert_eq!(w.image.as_deref(), Some(Path::new("/tmp/logo.png")));
    }

    #[test]
    fn positions_parse_loosely() {
        assert_eq!("top-left".parse(), Ok(WatermarkPosition::TopLeft));
        assert_eq!("BOTTOM_RIGHT".parse(), Ok(WatermarkPosition::BottomRight));
        assert_eq!("center".parse(), Ok(WatermarkPosition::Center));
        assert!("nowhere".parse::<WatermarkPosition>().is_err());
    }

    #[test]
    fn processing_options_from_json() {
        let json = r##"{
            "resize": {"size": 300, "fit": "inside"},
            "crop": {"value": "5,10"},
            "rotate": "90",
            "watermark": {"text": "© me", "position": "top-right", "color": "#000"},
            "outputFormat": "webp",
            "quality": 80,
            "lossless": true
        }"##;
        let opts: ProcessingOptions = serde_json::from_str(json).unwrap();
        assert_eq!(opts.rotate, Some(90.0));
        assert_eq!(opts.resize.as_ref().unwrap().fit, ResizeFit::Inside);
        assert_eq!(opts.resize.as_ref().unwrap().size.as_deref(), Some("300"));
        assert!(opts.has_transforms());

        let target = opts.validate(Some("png")).unwrap();
        assert_eq!(target.descriptor.key, "webp");
        assert!(target.lossless);
    }

    #[test]
    fn garbage_rotate_is_kept_for_the_stage_to_ignore() {
        let opts: ProcessingOptions = serde_json::from_str(r#"{"rotate": "sideways"}"#).unwrap();
        assert!(opts.rotate.unwrap().is_nan());
    }

    #[test]
    fn processing_target_falls_back_to_source_format() {
        let opts = ProcessingOptions::default();
        assert_eq!(opts.validate(Some("gif")).unwrap().descriptor.key, "gif");
        assert!(opts.validate(None).is_err());

        let bad_quality = ProcessingOptions {
            quality: Some(101),
            ..Default::default()
        };
        assert!(matches!(
            bad_quality.validate(Some("png")),
            Err(PixmorphError::InvalidQuality { .. })
        ));
    }
}

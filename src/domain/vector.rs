//! Vector documents produced by the conversion engine and the bitmaps rasterized from them.

use std::sync::Arc;

use bytes::Bytes;

use super::error::DomainError;

/// Size in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dimensions {
    pub width: f64,
    pub height: f64,
}

impl Dimensions {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Both axes finite and strictly positive.
    pub fn is_positive(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    /// Each axis raised to at least `min`.
    pub fn clamped_min(&self, min: f64) -> Self {
        Self {
            width: self.width.max(min),
            height: self.height.max(min),
        }
    }
}

/// An SVG length as written on the root element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Length {
    /// Relative to the x-height of the surrounding font.
    Ex(f64),
    /// Absolute (`px`, `pt` or unitless).
    Points(f64),
}

impl Length {
    pub fn resolve(self, x_height: f64) -> f64 {
        match self {
            Length::Ex(value) => value * x_height,
            Length::Points(value) => value,
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (number, ex) = if let Some(number) = raw.strip_suffix("ex") {
            (number, true)
        } else if let Some(number) = raw.strip_suffix("px").or_else(|| raw.strip_suffix("pt")) {
            (number, false)
        } else {
            (raw, false)
        };

        let value: f64 = number.trim().parse().ok()?;
        if !value.is_finite() {
            return None;
        }
        Some(if ex {
            Length::Ex(value)
        } else {
            Length::Points(value)
        })
    }
}

/// Validated SVG markup for one equation together with its intrinsic size.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorDocument {
    markup: String,
    width: Length,
    height: Length,
    vertical_align: Length,
}

impl VectorDocument {
    /// Decode cached bytes. Anything that is not UTF-8 SVG with a readable
    /// width and height is rejected.
    pub fn parse(bytes: &[u8]) -> Result<Self, DomainError> {
        let markup = std::str::from_utf8(bytes)
            .map_err(|err| DomainError::malformed(format!("markup is not UTF-8: {err}")))?;
        Self::from_markup(markup)
    }

    pub fn from_markup(markup: impl Into<String>) -> Result<Self, DomainError> {
        let markup = markup.into();
        let (width, height, vertical_align) = {
            let document = roxmltree::Document::parse(&markup)
                .map_err(|err| DomainError::malformed(format!("invalid XML: {err}")))?;
            let root = document.root_element();
            if root.tag_name().name() != "svg" {
                return Err(DomainError::malformed(format!(
                    "root element is `{}`, expected `svg`",
                    root.tag_name().name()
                )));
            }

            let width = root
                .attribute("width")
                .and_then(Length::parse)
                .ok_or_else(|| DomainError::malformed("missing or unreadable `width`"))?;
            let height = root
                .attribute("height")
                .and_then(Length::parse)
                .ok_or_else(|| DomainError::malformed("missing or unreadable `height`"))?;
            let vertical_align = root
                .attribute("style")
                .and_then(vertical_align_from_style)
                .unwrap_or(Length::Ex(0.0));

            (width, height, vertical_align)
        };

        Ok(Self {
            markup,
            width,
            height,
            vertical_align,
        })
    }

    pub fn markup(&self) -> &str {
        &self.markup
    }

    /// Encoded form stored in the vector cache tier.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.markup.clone())
    }

    /// Intrinsic size for the given x-height.
    pub fn size(&self, x_height: f64) -> Dimensions {
        Dimensions {
            width: self.width.resolve(x_height),
            height: self.height.resolve(x_height),
        }
    }

    /// Baseline offset (negative values sit below the baseline).
    pub fn vertical_offset(&self, x_height: f64) -> f64 {
        self.vertical_align.resolve(x_height)
    }
}

fn vertical_align_from_style(style: &str) -> Option<Length> {
    style.split(';').find_map(|declaration| {
        let (property, value) = declaration.split_once(':')?;
        (property.trim() == "vertical-align")
            .then(|| Length::parse(value))
            .flatten()
    })
}

/// Rasterized equation: premultiplied RGBA8 pixels, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    scale: f64,
    pixels: Arc<[u8]>,
}

impl Bitmap {
    pub fn new(width: u32, height: u32, scale: f64, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            scale,
            pixels: Arc::from(pixels),
        }
    }

    /// A zero-area bitmap, the rasterizer's answer to unusable input.
    pub fn empty(scale: f64) -> Self {
        Self::new(0, 0, scale, Vec::new())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// Zero area, or a pixel buffer that does not match the dimensions.
    pub fn is_degenerate(&self) -> bool {
        let expected = u64::from(self.width) * u64::from(self.height) * 4;
        self.width == 0 || self.height == 0 || self.pixels.len() as u64 != expected
    }

    /// Display size in points.
    pub fn point_size(&self) -> Dimensions {
        Dimensions {
            width: f64::from(self.width) / self.scale,
            height: f64::from(self.height) / self.scale,
        }
    }

    /// Straight-alpha copy of the pixels, as image encoders expect.
    pub fn to_straight_rgba(&self) -> Vec<u8> {
        let mut rgba = self.pixels.to_vec();
        for pixel in rgba.chunks_exact_mut(4) {
            let alpha = pixel[3];
            if alpha == 0 || alpha == u8::MAX {
                continue;
            }
            for channel in &mut pixel[..3] {
                let value = u16::from(*channel) * 255 / u16::from(alpha);
                *channel = value.min(255) as u8;
            }
        }
        rgba
    }
}

//! Small value types shared across the crate: rects and the image buffer.

use std::io::Cursor;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A device-pixel rectangle. Negative width/height are never valid; callers
/// that might produce one (e.g. an unresolved [`crate::pipeline::Target`])
/// should clamp before constructing a `Rect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub const ZERO: Rect = Rect { x: 0, y: 0, w: 0, h: 0 };

    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    pub fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }

    pub fn center(&self) -> (i32, i32) {
        (self.x + self.w / 2, self.y + self.h / 2)
    }

    /// Translate and grow this rect by `offset`, matching `Actuator::get_target_rect`'s
    /// `raw + offset` arithmetic in the original implementation.
    pub fn offset_by(&self, offset: Rect) -> Rect {
        Rect {
            x: self.x + offset.x,
            y: self.y + offset.y,
            w: self.w + offset.w,
            h: self.h + offset.h,
        }
    }
}

/// Pixel layout of an [`Image`]'s raw buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelLayout {
    Bgr8,
    Rgb8,
    Rgba8,
    Gray8,
}

impl PixelLayout {
    fn channels(self) -> usize {
        match self {
            PixelLayout::Gray8 => 1,
            PixelLayout::Bgr8 | PixelLayout::Rgb8 => 3,
            PixelLayout::Rgba8 => 4,
        }
    }
}

/// An immutable-after-construction image buffer.
///
/// Carries raw pixel bytes plus an optional cached encoded (PNG/JPEG) blob.
/// Encoded/raw conversions are lossy-safe round trips through the `image`
/// crate, mirroring the teacher's `MaaImageBuffer::{set_raw, set_encoded}`
/// pair of accessors.
#[derive(Debug, Clone)]
pub struct Image {
    width: u32,
    height: u32,
    layout: PixelLayout,
    raw: Vec<u8>,
    encoded: Option<Vec<u8>>,
}

impl Image {
    pub fn empty() -> Self {
        Self {
            width: 0,
            height: 0,
            layout: PixelLayout::Bgr8,
            raw: Vec::new(),
            encoded: None,
        }
    }

    pub fn from_raw(width: u32, height: u32, layout: PixelLayout, raw: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * layout.channels();
        if raw.len() != expected {
            return Err(Error::InvalidArgument(format!(
                "raw buffer has {} bytes, expected {expected} for {width}x{height} {layout:?}",
                raw.len()
            )));
        }
        Ok(Self { width, height, layout, raw, encoded: None })
    }

    /// Decode a PNG/JPEG byte blob into a raw RGB8 buffer, caching the
    /// original encoded bytes alongside it.
    pub fn from_encoded(data: Vec<u8>) -> Result<Self> {
        let img = image::load_from_memory(&data)
            .map_err(|e| Error::InvalidArgument(format!("failed to decode image: {e}")))?;
        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        Ok(Self {
            width,
            height,
            layout: PixelLayout::Rgb8,
            raw: rgb.into_raw(),
            encoded: Some(data),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Lazily encode to PNG and cache the result for subsequent calls.
    pub fn encoded_png(&mut self) -> Result<&[u8]> {
        if self.encoded.is_none() {
            let rgb = self.to_rgb_image()?;
            let mut out = Cursor::new(Vec::new());
            rgb.write_to(&mut out, image::ImageFormat::Png)
                .map_err(|e| Error::Internal(format!("png encode failed: {e}")))?;
            self.encoded = Some(out.into_inner());
        }
        Ok(self.encoded.as_deref().unwrap())
    }

    fn to_rgb_image(&self) -> Result<image::RgbImage> {
        let rgb_bytes = match self.layout {
            PixelLayout::Rgb8 => self.raw.clone(),
            PixelLayout::Bgr8 => self.raw.chunks_exact(3).flat_map(|p| [p[2], p[1], p[0]]).collect(),
            PixelLayout::Rgba8 => self.raw.chunks_exact(4).flat_map(|p| [p[0], p[1], p[2]]).collect(),
            PixelLayout::Gray8 => self.raw.iter().flat_map(|&g| [g, g, g]).collect(),
        };
        image::RgbImage::from_raw(self.width, self.height, rgb_bytes)
            .ok_or_else(|| Error::Internal("raw buffer size mismatch during encode".into()))
    }

    /// Grayscale luminance bytes, used by the screen-freeze predicate's
    /// pixel-diff/histogram/correlation comparisons (§4.2).
    pub fn to_gray(&self) -> Vec<u8> {
        match self.layout {
            PixelLayout::Gray8 => self.raw.clone(),
            PixelLayout::Rgb8 => self
                .raw
                .chunks_exact(3)
                .map(|p| ((p[0] as u32 * 299 + p[1] as u32 * 587 + p[2] as u32 * 114) / 1000) as u8)
                .collect(),
            PixelLayout::Bgr8 => self
                .raw
                .chunks_exact(3)
                .map(|p| ((p[2] as u32 * 299 + p[1] as u32 * 587 + p[0] as u32 * 114) / 1000) as u8)
                .collect(),
            PixelLayout::Rgba8 => self
                .raw
                .chunks_exact(4)
                .map(|p| ((p[0] as u32 * 299 + p[1] as u32 * 587 + p[2] as u32 * 114) / 1000) as u8)
                .collect(),
        }
    }

    /// Extract the sub-image within `roi`, clamped to the image bounds.
    pub fn crop(&self, roi: Rect) -> Image {
        if roi.is_empty() {
            return self.clone();
        }
        let ch = self.layout.channels();
        let x0 = roi.x.max(0) as u32;
        let y0 = roi.y.max(0) as u32;
        let x1 = (roi.x + roi.w).max(0).min(self.width as i32) as u32;
        let y1 = (roi.y + roi.h).max(0).min(self.height as i32) as u32;
        if x1 <= x0 || y1 <= y0 {
            return Image { width: 0, height: 0, layout: self.layout, raw: Vec::new(), encoded: None };
        }
        let cw = (x1 - x0) as usize;
        let ch_rows = (y1 - y0) as usize;
        let mut raw = Vec::with_capacity(cw * ch_rows * ch);
        let stride = self.width as usize * ch;
        for row in 0..ch_rows {
            let y = y0 as usize + row;
            let start = y * stride + x0 as usize * ch;
            raw.extend_from_slice(&self.raw[start..start + cw * ch]);
        }
        Image { width: cw as u32, height: ch_rows as u32, layout: self.layout, raw, encoded: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_offset_matches_actuator_semantics() {
        let raw = Rect::new(10, 20, 30, 40);
        let offset = Rect::new(1, 2, 3, 4);
        assert_eq!(raw.offset_by(offset), Rect::new(11, 22, 33, 44));
    }

    #[test]
    fn raw_round_trip_preserves_bytes() {
        let raw = vec![1u8, 2, 3, 4, 5, 6];
        let img = Image::from_raw(2, 1, PixelLayout::Rgb8, raw.clone()).unwrap();
        assert_eq!(img.raw(), raw.as_slice());
    }

    #[test]
    fn encoded_round_trip_is_lossless_for_png() {
        let raw: Vec<u8> = (0..(4 * 3 * 3)).map(|i| (i * 7) as u8).collect();
        let mut img = Image::from_raw(4, 3, PixelLayout::Rgb8, raw.clone()).unwrap();
        let png = img.encoded_png().unwrap().to_vec();
        let decoded = Image::from_encoded(png).unwrap();
        assert_eq!(decoded.raw(), raw.as_slice());
    }

    #[test]
    fn crop_extracts_expected_region() {
        let raw: Vec<u8> = (0..(4 * 4)).collect();
        let img = Image::from_raw(4, 4, PixelLayout::Gray8, raw).unwrap();
        let cropped = img.crop(Rect::new(1, 1, 2, 2));
        assert_eq!(cropped.width(), 2);
        assert_eq!(cropped.height(), 2);
        assert_eq!(cropped.raw(), &[5, 6, 9, 10]);
    }
}

// THEORY:
// The `frame` module holds the "dumb" data containers that flow through the
// pipeline. None of them know how to analyze themselves; analysis lives in
// the preprocessor, the motion detector and the annotator.
//
// - `Frame` is one captured RGB image plus the instant it was captured. Its
//   pixels are private and there is no mutable accessor, so once a frame has
//   been captured it can only be read or copied. The annotator draws on a copy.
// - `PreprocessedFrame` is the single-channel, blurred form of a frame. It
//   exists only between preprocessing and detection.
// - `MotionRegion` and `DetectionResult` are the detector's output.

use crate::error::{Error, Result};
use image::{GrayImage, RgbImage};
use imageproc::rect::Rect;
use std::time::Instant;

/// One captured RGB image, tagged with its capture instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    image: RgbImage,
    captured_at: Instant,
}

impl Frame {
    pub fn new(image: RgbImage, captured_at: Instant) -> Self {
        Self { image, captured_at }
    }

    /// Builds a frame from a packed RGB8 buffer, checking that the buffer
    /// length matches the stated geometry.
    pub fn from_rgb_bytes(width: u32, height: u32, data: Vec<u8>, captured_at: Instant) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(Error::InvalidFrame(format!(
                "{width}x{height} RGB frame needs {expected} bytes, got {}",
                data.len()
            )));
        }
        let image = RgbImage::from_raw(width, height, data)
            .ok_or_else(|| Error::InvalidFrame(format!("could not wrap a {width}x{height} buffer")))?;
        Ok(Self::new(image, captured_at))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}

/// The single-channel, smoothed form of a `Frame`, ready for comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedFrame {
    luma: GrayImage,
}

impl PreprocessedFrame {
    pub(crate) fn new(luma: GrayImage) -> Self {
        Self { luma }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.luma.dimensions()
    }

    pub fn luma(&self) -> &GrayImage {
        &self.luma
    }
}

/// A rectangular area of change between two frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Area enclosed by the traced boundary of the component, in pixels.
    pub area: f64,
}

impl MotionRegion {
    /// The bounding box as a drawable rectangle.
    pub fn rect(&self) -> Rect {
        Rect::at(self.x as i32, self.y as i32).of_size(self.width.max(1), self.height.max(1))
    }

    /// True when this region's bounding box fully contains the given box.
    pub fn covers(&self, x: u32, y: u32, width: u32, height: u32) -> bool {
        self.x <= x
            && self.y <= y
            && self.x + self.width >= x + width
            && self.y + self.height >= y + height
    }
}

/// All regions found in one comparison, in discovery order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    pub regions: Vec<MotionRegion>,
}

impl DetectionResult {
    pub fn new(regions: Vec<MotionRegion>) -> Self {
        Self { regions }
    }

    pub fn motion_present(&self) -> bool {
        !self.regions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MotionRegion> {
        self.regions.iter()
    }
}

//! Frame type and pixel conversion — YUYV to RGB, grayscale expansion.

use std::time::Instant;

/// Channel layout of a frame's pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// 3 bytes per pixel, interleaved R, G, B.
    Rgb,
    /// 1 byte per pixel.
    Gray,
}

impl PixelLayout {
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Rgb => 3,
            PixelLayout::Gray => 1,
        }
    }
}

/// A captured camera frame.
///
/// Frames are immutable once built; the capture loop publishes them behind an
/// `Arc` and replaces the whole value on every tick.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub timestamp: Instant,
    pub sequence: u32,
}

impl Frame {
    /// Build a frame, checking that the buffer matches the declared geometry.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        layout: PixelLayout,
        sequence: u32,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * layout.channels();
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            layout,
            timestamp: Instant::now(),
            sequence,
        })
    }

    /// Pixel data as interleaved RGB, expanding grayscale if needed.
    pub fn to_rgb(&self) -> Vec<u8> {
        match self.layout {
            PixelLayout::Rgb => self.data.clone(),
            PixelLayout::Gray => self.data.iter().flat_map(|&y| [y, y, y]).collect(),
        }
    }
}

/// Convert packed YUYV (4:2:2) to interleaved RGB using BT.601 integer coefficients.
///
/// Each 4-byte group [Y0, U, Y1, V] yields two pixels sharing one chroma pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = width as usize * height as usize;
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for group in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (group[0], group[1], group[2], group[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

//! Circular enrollment guide.
//!
//! The display shows a square crop of the capture frame, horizontally
//! centred. A face is in the guide when both corners of its bounding box,
//! translated into display coordinates, lie inside the guide circle.

use crate::types::BoundingBox;

/// Display edge length the default guide is laid out for.
pub const DEFAULT_DISPLAY_SIZE: u32 = 400;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuideCircle {
    pub center_x: f32,
    pub center_y: f32,
    pub radius: f32,
}

impl Default for GuideCircle {
    fn default() -> Self {
        Self::for_display(DEFAULT_DISPLAY_SIZE)
    }
}

impl GuideCircle {
    /// Circle inscribed in a square display of the given size.
    pub fn for_display(size: u32) -> Self {
        let half = size as f32 / 2.0;
        Self {
            center_x: half,
            center_y: half,
            radius: half,
        }
    }

    /// Distance check, inclusive of the boundary.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        let dx = x - self.center_x;
        let dy = y - self.center_y;
        (dx * dx + dy * dy).sqrt() <= self.radius
    }

    /// True when both points lie in the circle; point order does not matter.
    pub fn contains_both(&self, a: (f32, f32), b: (f32, f32)) -> bool {
        self.contains(a.0, a.1) && self.contains(b.0, b.1)
    }

    /// Whether a face detected in a `frame_width`×`frame_height` capture sits inside the guide.
    pub fn encloses(&self, face: &BoundingBox, frame_width: u32, frame_height: u32) -> bool {
        let (top_left, bottom_right) = face.corners();
        self.contains_both(
            to_display(top_left, frame_width, frame_height),
            to_display(bottom_right, frame_width, frame_height),
        )
    }
}

/// Horizontal offset of the square display crop within the capture frame.
///
/// Truncates toward zero, so portrait frames get a negative offset.
pub fn display_offset(frame_width: u32, frame_height: u32) -> i64 {
    (frame_width as i64 - frame_height as i64) / 2
}

/// Translate a capture-frame point into display coordinates.
pub fn to_display(point: (f32, f32), frame_width: u32, frame_height: u32) -> (f32, f32) {
    let offset = display_offset(frame_width, frame_height) as f32;
    (point.0 - offset, point.1)
}

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of values in a face descriptor.
pub const DESCRIPTOR_LEN: usize = 128;

#[derive(Error, Debug, PartialEq)]
pub enum DescriptorError {
    #[error("descriptor must have {DESCRIPTOR_LEN} values, got {0}")]
    WrongLength(usize),
    #[error("descriptor value {index} is not finite")]
    NonFinite { index: usize },
}

/// Fixed-length face descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Descriptor(Vec<f32>);

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Result<Self, DescriptorError> {
        if values.len() != DESCRIPTOR_LEN {
            return Err(DescriptorError::WrongLength(values.len()));
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(DescriptorError::NonFinite { index });
        }
        Ok(Self(values))
    }

    pub fn values(&self) -> &[f32] {
        &self.0
    }

    /// Euclidean distance, accumulated in f64.
    pub fn distance(&self, other: &Descriptor) -> f64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(&a, &b)| (a as f64 - b as f64).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

impl TryFrom<Vec<f32>> for Descriptor {
    type Error = DescriptorError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<Descriptor> for Vec<f32> {
    fn from(descriptor: Descriptor) -> Self {
        descriptor.0
    }
}

/// Bounding box for a detected face, in capture-frame pixel coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Top-left and bottom-right corners.
    pub fn corners(&self) -> ((f32, f32), (f32, f32)) {
        (
            (self.x, self.y),
            (self.x + self.width, self.y + self.height),
        )
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ((ax1, ay1), (ax2, ay2)) = self.corners();
        let ((bx1, by1), (bx2, by2)) = other.corners();
        let inter_w = (ax2.min(bx2) - ax1.max(bx1)).max(0.0);
        let inter_h = (ay2.min(by2) - ay1.max(by1)).max(0.0);
        let inter = inter_w * inter_h;
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Landmarks and descriptor extracted for a single face.
#[derive(Debug, Clone)]
pub struct FaceDescription {
    pub landmarks: Vec<(f32, f32)>,
    pub descriptor: Descriptor,
}

/// Classification of a frame by the matching engine.
#[derive(Debug, Clone)]
pub enum Recognition {
    NoFace,
    OneFace {
        region: BoundingBox,
        landmarks: Vec<(f32, f32)>,
        descriptor: Descriptor,
    },
    MultipleFaces,
}

/// A stored identity.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentRecord {
    pub identifier: u32,
    pub name: String,
    pub descriptor: Descriptor,
}

/// Identity listing entry, without the descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub identifier: u32,
    pub name: String,
}

/// A logged check-in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub identifier: u32,
    pub name: String,
    pub timestamp: DateTime<Local>,
}

/// Result of a nearest-neighbour lookup against the store.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Whether `distance` is within the store's threshold.
    pub matched: bool,
    pub identifier: u32,
    pub name: String,
    pub distance: f64,
}

//! facecheck-core — Identity storage, attendance logging and face matching.
//!
//! The matching engine classifies frames through the `FaceAnalyzer` trait;
//! `OnnxAnalyzer` runs SCRFD detection and a 128-d descriptor network on CPU.

pub mod analyzer;
pub mod attendance;
pub mod describer;
pub mod detector;
pub mod engine;
pub mod guide;
mod lines;
pub mod store;
pub mod types;

pub use analyzer::OnnxAnalyzer;
pub use attendance::{AttendanceError, AttendanceLog};
pub use engine::{EngineError, FaceAnalyzer, MatchingEngine};
pub use guide::GuideCircle;
pub use store::{DescriptorStore, StoreError, MATCH_THRESHOLD};
pub use types::{
    AttendanceRecord, BoundingBox, Descriptor, DescriptorError, EnrollmentRecord, FaceDescription,
    Identity, MatchResult, Recognition, DESCRIPTOR_LEN,
};

use std::path::PathBuf;

/// Default directory for ONNX model files.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/facecheck/models")
}

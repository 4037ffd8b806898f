//! ONNX-backed [`FaceAnalyzer`]: SCRFD detection plus a descriptor network.

use crate::describer::FaceDescriber;
use crate::detector::{FaceDetector, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::engine::{EngineError, FaceAnalyzer};
use crate::types::{BoundingBox, FaceDescription};
use facecheck_hw::Frame;
use std::path::Path;

/// SCRFD detection model file name inside the model directory.
pub const DETECTOR_MODEL: &str = "det_10g.onnx";
/// 128-d descriptor model file name inside the model directory.
pub const DESCRIBER_MODEL: &str = "face_descriptor_128.onnx";

pub struct OnnxAnalyzer {
    detector: FaceDetector,
    describer: FaceDescriber,
}

impl OnnxAnalyzer {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, EngineError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_MODEL), DEFAULT_CONFIDENCE_THRESHOLD)?;
        let describer = FaceDescriber::load(&model_dir.join(DESCRIBER_MODEL))?;
        Ok(Self { detector, describer })
    }
}

impl FaceAnalyzer for OnnxAnalyzer {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, EngineError> {
        Ok(self.detector.detect(frame)?)
    }

    fn describe(&mut self, frame: &Frame, face: &BoundingBox) -> Result<FaceDescription, EngineError> {
        let descriptor = self.describer.describe(frame, face)?;
        Ok(FaceDescription {
            landmarks: face.landmarks.map(|points| points.to_vec()).unwrap_or_default(),
            descriptor,
        })
    }
}

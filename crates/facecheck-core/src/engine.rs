//! Matching engine: classifies a frame as no face, one face, or several.
//!
//! The detection and descriptor extraction themselves sit behind the
//! [`FaceAnalyzer`] trait; [`crate::analyzer::OnnxAnalyzer`] is the shipped
//! implementation.

use crate::types::{BoundingBox, FaceDescription, Recognition};
use facecheck_hw::Frame;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] crate::detector::DetectorError),
    #[error("describer error: {0}")]
    Describer(#[from] crate::describer::DescriberError),
    #[error("analyzer failed: {0}")]
    Analyzer(String),
}

/// Face detection plus descriptor extraction.
pub trait FaceAnalyzer: Send {
    /// Every face in the frame, highest confidence first.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, EngineError>;

    /// Landmarks and descriptor for one detected face.
    fn describe(&mut self, frame: &Frame, face: &BoundingBox) -> Result<FaceDescription, EngineError>;
}

/// Clone-safe handle around a single analyzer instance.
///
/// Each worker gets its own engine; clones of one engine serialize on the
/// analyzer lock.
#[derive(Clone)]
pub struct MatchingEngine {
    analyzer: Arc<Mutex<Box<dyn FaceAnalyzer>>>,
}

impl MatchingEngine {
    pub fn new(analyzer: Box<dyn FaceAnalyzer>) -> Self {
        Self {
            analyzer: Arc::new(Mutex::new(analyzer)),
        }
    }

    /// Classify `frame`. Zero or several faces are ordinary outcomes; only a
    /// failure of the analyzer itself is an error.
    pub fn recognize(&self, frame: &Frame) -> Result<Recognition, EngineError> {
        let mut analyzer = self.analyzer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut faces = analyzer.detect(frame)?;

        match faces.len() {
            0 => Ok(Recognition::NoFace),
            1 => {
                let region = faces.remove(0);
                let FaceDescription {
                    landmarks,
                    descriptor,
                } = analyzer.describe(frame, &region)?;
                Ok(Recognition::OneFace {
                    region,
                    landmarks,
                    descriptor,
                })
            }
            count => {
                tracing::debug!(count, "multiple faces in frame");
                Ok(Recognition::MultipleFaces)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Descriptor, DESCRIPTOR_LEN};
    use facecheck_hw::PixelLayout;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAnalyzer {
        faces: usize,
        describe_calls: Arc<AtomicUsize>,
    }

    impl FaceAnalyzer for CountingAnalyzer {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<BoundingBox>, EngineError> {
            Ok((0..self.faces)
                .map(|i| BoundingBox {
                    x: i as f32 * 100.0,
                    y: 0.0,
                    width: 50.0,
                    height: 50.0,
                    confidence: 0.9,
                    landmarks: None,
                })
                .collect())
        }

        fn describe(&mut self, _frame: &Frame, _face: &BoundingBox) -> Result<FaceDescription, EngineError> {
            self.describe_calls.fetch_add(1, Ordering::SeqCst);
            Ok(FaceDescription {
                landmarks: vec![(1.0, 2.0)],
                descriptor: Descriptor::new(vec![0.5; DESCRIPTOR_LEN]).unwrap(),
            })
        }
    }

    fn frame() -> Frame {
        Frame::new(vec![0; 4 * 4 * 3], 4, 4, PixelLayout::Rgb, 0).unwrap()
    }

    fn engine(faces: usize) -> (MatchingEngine, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let analyzer = CountingAnalyzer {
            faces,
            describe_calls: Arc::clone(&calls),
        };
        (MatchingEngine::new(Box::new(analyzer)), calls)
    }

    #[test]
    fn test_no_face() {
        let (engine, calls) = engine(0);
        assert!(matches!(engine.recognize(&frame()).unwrap(), Recognition::NoFace));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_one_face_is_described() {
        let (engine, calls) = engine(1);
        match engine.recognize(&frame()).unwrap() {
            Recognition::OneFace { region, landmarks, descriptor } => {
                assert_eq!(region.width, 50.0);
                assert_eq!(landmarks, vec![(1.0, 2.0)]);
                assert_eq!(descriptor.values()[0], 0.5);
            }
            other => panic!("expected one face, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_multiple_faces_skip_description() {
        let (engine, calls) = engine(2);
        assert!(matches!(engine.recognize(&frame()).unwrap(), Recognition::MultipleFaces));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}

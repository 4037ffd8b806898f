//! SCRFD face detector via ONNX Runtime.
//!
//! Letterboxes an RGB frame into the 640×640 model input, decodes the three
//! anchor-free stride levels and applies greedy non-maximum suppression.

use crate::types::BoundingBox;
use facecheck_hw::Frame;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Default minimum detection score.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("frame buffer does not match its dimensions")]
    InvalidFrame,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Placement of the resized frame inside the square model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let size = SCRFD_INPUT_SIZE as f32;
        let scale = (size / width as f32).min(size / height as f32);
        let (new_w, new_h) = Self::scaled_dims(width, height, scale);
        Self {
            scale,
            pad_x: ((SCRFD_INPUT_SIZE - new_w) / 2) as f32,
            pad_y: ((SCRFD_INPUT_SIZE - new_h) / 2) as f32,
        }
    }

    fn scaled_dims(width: u32, height: u32, scale: f32) -> (u32, u32) {
        let w = ((width as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        let h = ((height as f32 * scale).round() as u32).clamp(1, SCRFD_INPUT_SIZE);
        (w, h)
    }

    /// Map a point in model input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor positions for one stride level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LevelOutputs {
    score: usize,
    bbox: usize,
    kps: usize,
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    levels: [LevelOutputs; 3],
    confidence_threshold: f32,
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path, confidence_threshold: f32) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs 9 outputs (score/bbox/kps per stride), got {}",
                output_names.len()
            )));
        }

        let levels = output_layout(&output_names);
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            ?levels,
            "loaded SCRFD model"
        );

        Ok(Self {
            session,
            levels,
            confidence_threshold,
        })
    }

    /// Detect faces, returning boxes sorted by descending confidence.
    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = preprocess(frame)?;
        let levels = self.levels;
        let threshold = self.confidence_threshold;

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (level, &stride) in levels.iter().zip(SCRFD_STRIDES.iter()) {
            let extract = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = extract(level.score, "scores")?;
            let boxes = extract(level.bbox, "boxes")?;
            let kps = extract(level.kps, "landmarks")?;
            candidates.extend(decode_level(scores, boxes, kps, stride, &letterbox, threshold));
        }

        Ok(suppress_overlaps(candidates, SCRFD_NMS_THRESHOLD))
    }
}

/// Letterbox an RGB frame into a normalized NCHW tensor.
fn preprocess(frame: &Frame) -> Result<(Array4<f32>, Letterbox), DetectorError> {
    let rgb = RgbImage::from_raw(frame.width, frame.height, frame.to_rgb())
        .ok_or(DetectorError::InvalidFrame)?;

    let letterbox = Letterbox::fit(frame.width, frame.height);
    let (new_w, new_h) = Letterbox::scaled_dims(frame.width, frame.height, letterbox.scale);
    let resized = imageops::resize(&rgb, new_w, new_h, FilterType::Triangle);

    // Zero is the normalized value of SCRFD_MEAN, so untouched cells act as padding.
    let size = SCRFD_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let (pad_x, pad_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (x as usize + pad_x, y as usize + pad_y);
        for channel in 0..3 {
            tensor[[0, channel, ty, tx]] = (pixel[channel] as f32 - SCRFD_MEAN) / SCRFD_STD;
        }
    }

    Ok((tensor, letterbox))
}

/// Resolve output tensor positions from their names.
///
/// Exports named `score_8`, `bbox_16`, `kps_32`, ... are mapped by name;
/// anything else falls back to the conventional order of three scores,
/// three box tensors, then three landmark tensors.
fn output_layout(names: &[String]) -> [LevelOutputs; 3] {
    let position = |prefix: &str, stride: usize| {
        let wanted = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == wanted)
    };
    let by_name = |stride: usize| {
        Some(LevelOutputs {
            score: position("score", stride)?,
            bbox: position("bbox", stride)?,
            kps: position("kps", stride)?,
        })
    };

    match (by_name(8), by_name(16), by_name(32)) {
        (Some(a), Some(b), Some(c)) => [a, b, c],
        _ => std::array::from_fn(|i| LevelOutputs {
            score: i,
            bbox: i + 3,
            kps: i + 6,
        }),
    }
}

/// Decode the anchors of one stride level that clear `threshold`.
fn decode_level(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<BoundingBox> {
    let cells_per_row = SCRFD_INPUT_SIZE as usize / stride;
    let step = stride as f32;

    scores
        .iter()
        .enumerate()
        .filter(|(_, &score)| score > threshold)
        .filter_map(|(anchor, &score)| {
            let offsets = boxes.get(anchor * 4..anchor * 4 + 4)?;
            let cell = anchor / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % cells_per_row) as f32 * step;
            let cy = (cell / cells_per_row) as f32 * step;

            let (x1, y1) = letterbox.unmap(cx - offsets[0] * step, cy - offsets[1] * step);
            let (x2, y2) = letterbox.unmap(cx + offsets[2] * step, cy + offsets[3] * step);

            let landmarks = kps.get(anchor * 10..anchor * 10 + 10).map(|points| {
                std::array::from_fn(|i| {
                    letterbox.unmap(cx + points[i * 2] * step, cy + points[i * 2 + 1] * step)
                })
            });

            Some(BoundingBox {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression, highest confidence first.
fn suppress_overlaps(mut candidates: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<BoundingBox> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use facecheck_hw::PixelLayout;

    fn bbox(x: f32, y: f32, w: f32, h: f32, confidence: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence, landmarks: None }
    }

    #[test]
    fn test_suppress_overlapping() {
        let kept = suppress_overlaps(
            vec![
                bbox(5.0, 5.0, 100.0, 100.0, 0.8),
                bbox(0.0, 0.0, 100.0, 100.0, 0.9),
                bbox(200.0, 200.0, 50.0, 50.0, 0.7),
            ],
            0.4,
        );
        let confidences: Vec<f32> = kept.iter().map(|b| b.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7]);
    }

    #[test]
    fn test_suppress_keeps_separate_faces() {
        let kept = suppress_overlaps(
            vec![bbox(0.0, 0.0, 10.0, 10.0, 0.6), bbox(50.0, 50.0, 10.0, 10.0, 0.8)],
            0.4,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.8);
    }

    #[test]
    fn test_letterbox_wide_frame() {
        let lb = Letterbox::fit(640, 480);
        assert_eq!(lb.scale, 1.0);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 80.0);
        assert_eq!(lb.unmap(100.0, 180.0), (100.0, 100.0));
    }

    #[test]
    fn test_letterbox_unmap_scaled() {
        let lb = Letterbox::fit(320, 240);
        // scale 2.0, content 640x480, pad_y 80
        let (x, y) = lb.unmap(100.0 * 2.0, 50.0 * 2.0 + 80.0);
        assert!((x - 100.0).abs() < 1e-4);
        assert!((y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_output_layout_named() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ].iter().map(|s| s.to_string()).collect();
        let levels = output_layout(&names);
        assert_eq!(levels[0], LevelOutputs { score: 2, bbox: 0, kps: 1 });
        assert_eq!(levels[2], LevelOutputs { score: 8, bbox: 6, kps: 7 });
    }

    #[test]
    fn test_output_layout_positional() {
        let names: Vec<String> = (0..9).map(|i: usize| (440 + i).to_string()).collect();
        let levels = output_layout(&names);
        assert_eq!(levels[1], LevelOutputs { score: 1, bbox: 4, kps: 7 });
    }

    #[test]
    fn test_decode_single_anchor() {
        let lb = Letterbox::fit(640, 640);
        let stride = 32;
        let cells = (640 / stride) * (640 / stride) * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.0; cells];
        let mut boxes = vec![0.0; cells * 4];
        let kps = vec![0.0; cells * 10];

        // Anchor 42 → cell 21 → column 1, row 1 → centre (32, 32)
        scores[42] = 0.9;
        boxes[42 * 4..42 * 4 + 4].copy_from_slice(&[0.5, 0.5, 1.0, 1.0]);

        let faces = decode_level(&scores, &boxes, &kps, stride, &lb, 0.5);
        assert_eq!(faces.len(), 1);
        let face = &faces[0];
        assert_eq!((face.x, face.y), (16.0, 16.0));
        assert_eq!((face.width, face.height), (48.0, 48.0));
        assert_eq!(face.landmarks.unwrap()[0], (32.0, 32.0));
    }

    #[test]
    fn test_preprocess_pads_with_zero() {
        let frame = Frame::new(vec![255u8; 64 * 32 * 3], 64, 32, PixelLayout::Rgb, 0).unwrap();
        let (tensor, lb) = preprocess(&frame).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert_eq!(lb.pad_y, 160.0);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let inside = tensor[[0, 1, 320, 320]];
        assert!((inside - (255.0 - SCRFD_MEAN) / SCRFD_STD).abs() < 1e-5);
    }
}

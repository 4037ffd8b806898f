//! 128-dimensional face descriptor network via ONNX Runtime.
//!
//! Crops the detected face with a small margin, resizes it to the network's
//! 112×112 RGB input and L2-normalizes the output.

use crate::types::{BoundingBox, Descriptor, DESCRIPTOR_LEN};
use facecheck_hw::Frame;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const DESCRIBER_INPUT_SIZE: u32 = 112;
const DESCRIBER_MEAN: f32 = 127.5;
const DESCRIBER_STD: f32 = 128.0;
/// Fraction of the box size added on every side before cropping.
const CROP_MARGIN: f32 = 0.1;

#[derive(Error, Debug)]
pub enum DescriberError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face region lies outside the frame")]
    EmptyCrop,
    #[error("frame buffer does not match its dimensions")]
    InvalidFrame,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceDescriber {
    session: Session,
}

impl FaceDescriber {
    pub fn load(model_path: &Path) -> Result<Self, DescriberError> {
        if !model_path.exists() {
            return Err(DescriberError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded descriptor model"
        );

        Ok(Self { session })
    }

    pub fn describe(&mut self, frame: &Frame, face: &BoundingBox) -> Result<Descriptor, DescriberError> {
        let input = preprocess(frame, face)?;
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DescriberError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        if raw.len() != DESCRIPTOR_LEN {
            return Err(DescriberError::InferenceFailed(format!(
                "expected {DESCRIPTOR_LEN}-dim descriptor, got {}",
                raw.len()
            )));
        }

        Descriptor::new(l2_normalize(raw)).map_err(|e| DescriberError::InferenceFailed(e.to_string()))
    }
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}

/// Face box grown by [`CROP_MARGIN`] and clamped to the frame, as (x, y, w, h).
fn crop_rect(face: &BoundingBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let ((x1, y1), (x2, y2)) = face.corners();
    let mx = face.width * CROP_MARGIN;
    let my = face.height * CROP_MARGIN;

    let left = (x1 - mx).floor().clamp(0.0, width as f32) as u32;
    let top = (y1 - my).floor().clamp(0.0, height as f32) as u32;
    let right = (x2 + mx).ceil().clamp(0.0, width as f32) as u32;
    let bottom = (y2 + my).ceil().clamp(0.0, height as f32) as u32;

    (right > left && bottom > top).then(|| (left, top, right - left, bottom - top))
}

fn preprocess(frame: &Frame, face: &BoundingBox) -> Result<Array4<f32>, DescriberError> {
    let rgb = RgbImage::from_raw(frame.width, frame.height, frame.to_rgb())
        .ok_or(DescriberError::InvalidFrame)?;
    let (x, y, w, h) = crop_rect(face, frame.width, frame.height).ok_or(DescriberError::EmptyCrop)?;

    let crop = imageops::crop_imm(&rgb, x, y, w, h).to_image();
    let resized = imageops::resize(&crop, DESCRIBER_INPUT_SIZE, DESCRIBER_INPUT_SIZE, FilterType::Triangle);

    let size = DESCRIBER_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (px, py, pixel) in resized.enumerate_pixels() {
        for channel in 0..3 {
            tensor[[0, channel, py as usize, px as usize]] =
                (pixel[channel] as f32 - DESCRIBER_MEAN) / DESCRIBER_STD;
        }
    }
    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use facecheck_hw::PixelLayout;

    fn face(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9, landmarks: None }
    }

    #[test]
    fn test_crop_rect_adds_margin() {
        assert_eq!(crop_rect(&face(100.0, 100.0, 50.0, 50.0), 640, 480), Some((95, 95, 60, 60)));
    }

    #[test]
    fn test_crop_rect_clamps_to_frame() {
        assert_eq!(crop_rect(&face(-20.0, -20.0, 100.0, 100.0), 64, 64), Some((0, 0, 64, 64)));
    }

    #[test]
    fn test_crop_rect_outside_frame() {
        assert_eq!(crop_rect(&face(700.0, 10.0, 50.0, 50.0), 640, 480), None);
    }

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let frame = Frame::new(vec![128u8; 200 * 100], 200, 100, PixelLayout::Gray, 0).unwrap();
        let tensor = preprocess(&frame, &face(50.0, 20.0, 40.0, 40.0)).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
        let expected = (128.0 - DESCRIBER_MEAN) / DESCRIBER_STD;
        assert!((tensor[[0, 2, 56, 56]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }
}

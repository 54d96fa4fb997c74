//! YOLO-pose face engine on ONNX Runtime via `ort`.
//!
//! Letterbox preprocessing, inference, confidence filtering and NMS. Results
//! come back in the input frame's pixel space with the model's five
//! keypoints as landmarks.

use std::path::Path;

use crate::detection::domain::detection_engine::DetectionEngine;
use crate::shared::constants::{DEFAULT_CONFIDENCE, FACE_MODEL_NAME, REQUIRED_MODELS};
use crate::shared::detection::{BoundingBox, Detection, Point};
use crate::shared::error::OverlayError;
use crate::shared::frame::Frame;

use super::model_resolver::ModelLocation;

/// Fallback input resolution when the model doesn't specify dimensions.
const DEFAULT_INPUT_SIZE: u32 = 640;

const NMS_IOU_THRESH: f64 = 0.45;

/// Keypoint block per detection: 5 landmarks × (x, y, conf).
const NUM_KEYPOINTS: usize = 5;
const NUM_KEYPOINT_VALUES: usize = NUM_KEYPOINTS * 3;

pub struct OnnxFaceEngine {
    location: ModelLocation,
    confidence: f64,
    session: Option<ort::session::Session>,
    input_size: u32,
}

impl OnnxFaceEngine {
    pub fn new(location: ModelLocation) -> Self {
        Self {
            location,
            confidence: DEFAULT_CONFIDENCE,
            session: None,
            input_size: DEFAULT_INPUT_SIZE,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    fn build_session(
        &self,
        model_path: &Path,
    ) -> Result<(ort::session::Session, u32), OverlayError> {
        let session = ort::session::Session::builder()
            .map_err(model_err)?
            .with_execution_providers(preferred_execution_providers())
            .map_err(model_err)?
            .commit_from_file(model_path)
            .map_err(model_err)?;

        // NCHW: [1, 3, H, W]; dynamic shapes fall back to the default.
        let input_size = session
            .inputs()
            .first()
            .and_then(|input| match input.dtype() {
                ort::value::ValueType::Tensor { ref shape, .. }
                    if shape.len() >= 4 && shape[2] > 0 =>
                {
                    Some(shape[2] as u32)
                }
                _ => None,
            })
            .unwrap_or(DEFAULT_INPUT_SIZE);

        Ok((session, input_size))
    }
}

impl DetectionEngine for OnnxFaceEngine {
    fn load_models(&mut self) -> Result<(), OverlayError> {
        if self.session.is_some() {
            return Ok(());
        }
        let paths = self.location.resolve_all(REQUIRED_MODELS, None)?;
        let face_model = paths
            .into_iter()
            .find(|p| p.ends_with(FACE_MODEL_NAME))
            .ok_or_else(|| OverlayError::ModelLoad(format!("{FACE_MODEL_NAME} not resolved")))?;

        let (session, input_size) = self.build_session(&face_model)?;
        log::info!(
            "Loaded face model {} (input {input_size}px)",
            face_model.display()
        );
        self.session = Some(session);
        self.input_size = input_size;
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.session.is_some()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, OverlayError> {
        let input_size = self.input_size;
        let confidence = self.confidence;
        let session = self
            .session
            .as_mut()
            .ok_or(OverlayError::ModelsNotLoaded)?;

        if frame.width() == 0 || frame.height() == 0 {
            return Err(OverlayError::InvalidGeometry {
                width: frame.width(),
                height: frame.height(),
            });
        }
        if frame.channels() < 3 {
            return Err(OverlayError::Inference(format!(
                "expected RGB input, got {} channel(s)",
                frame.channels()
            )));
        }

        let (input_tensor, letterbox) = letterbox(frame, input_size);

        let input_value = ort::value::Tensor::from_array(input_tensor).map_err(inference_err)?;
        let outputs = session
            .run(ort::inputs![input_value])
            .map_err(inference_err)?;
        if outputs.len() == 0 {
            return Err(OverlayError::Inference("model produced no outputs".into()));
        }
        let tensor = outputs[0]
            .try_extract_array::<f32>()
            .map_err(inference_err)?;
        let shape = tensor.shape().to_vec();
        if shape.len() != 3 {
            return Err(OverlayError::Inference(format!(
                "unexpected output shape {shape:?}"
            )));
        }
        // Either [1, features, detections] or [1, detections, features].
        let transposed = shape[1] < shape[2];
        let (num_dets, num_feats) = if transposed {
            (shape[2], shape[1])
        } else {
            (shape[1], shape[2])
        };
        let data = tensor
            .as_slice()
            .ok_or_else(|| OverlayError::Inference("output tensor is not contiguous".into()))?;

        let mut candidates = Vec::new();
        for i in 0..num_dets {
            let row: Vec<f32> = if transposed {
                (0..num_feats).map(|f| data[f * num_dets + i]).collect()
            } else {
                data[i * num_feats..(i + 1) * num_feats].to_vec()
            };
            if let Some(det) = parse_row(&row, confidence, &letterbox) {
                candidates.push(det);
            }
        }

        Ok(nms(candidates, NMS_IOU_THRESH))
    }
}

/// Return the preferred ONNX execution providers for the current platform.
/// An empty list means CPU only.
fn preferred_execution_providers() -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    #[cfg(target_os = "macos")]
    {
        vec![ort::execution_providers::CoreMLExecutionProvider::default().build()]
    }
    #[cfg(target_os = "windows")]
    {
        vec![ort::execution_providers::DirectMLExecutionProvider::default().build()]
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        vec![]
    }
}

fn model_err(e: impl std::fmt::Display) -> OverlayError {
    OverlayError::ModelLoad(e.to_string())
}

fn inference_err(e: impl std::fmt::Display) -> OverlayError {
    OverlayError::Inference(e.to_string())
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

/// Mapping between letterboxed model space and frame space.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Letterbox {
    scale: f64,
    pad_x: f64,
    pad_y: f64,
}

impl Letterbox {
    fn to_frame(&self, x: f64, y: f64) -> Point {
        Point::new((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Letterbox-resize a frame to `target_size` × `target_size` as NCHW f32.
fn letterbox(frame: &Frame, target_size: u32) -> (ndarray::Array4<f32>, Letterbox) {
    let fw = frame.width() as f64;
    let fh = frame.height() as f64;
    let target = target_size as f64;

    let scale = (target / fw).min(target / fh);
    let new_w = ((fw * scale).round() as u32).min(target_size);
    let new_h = ((fh * scale).round() as u32).min(target_size);
    let pad_x = (target_size - new_w) / 2;
    let pad_y = (target_size - new_h) / 2;

    // YOLO convention: pad with 114 gray.
    let gray = 114.0f32 / 255.0;
    let mut tensor =
        ndarray::Array4::<f32>::from_elem((1, 3, target_size as usize, target_size as usize), gray);

    let src = frame.as_ndarray();
    let src_h = frame.height() as usize;
    let src_w = frame.width() as usize;

    for y in 0..new_h as usize {
        let src_y = ((y as f64 / scale) as usize).min(src_h - 1);
        for x in 0..new_w as usize {
            let src_x = ((x as f64 / scale) as usize).min(src_w - 1);
            let ty = pad_y as usize + y;
            let tx = pad_x as usize + x;
            for c in 0..3 {
                tensor[[0, c, ty, tx]] = src[[src_y, src_x, c]] as f32 / 255.0;
            }
        }
    }

    (
        tensor,
        Letterbox {
            scale,
            pad_x: pad_x as f64,
            pad_y: pad_y as f64,
        },
    )
}

// ---------------------------------------------------------------------------
// Postprocessing
// ---------------------------------------------------------------------------

/// Row layout: `[cx, cy, w, h, conf, kp0_x, kp0_y, kp0_conf, ...]`.
fn parse_row(row: &[f32], min_confidence: f64, lb: &Letterbox) -> Option<Detection> {
    if row.len() < 5 {
        return None;
    }
    let score = row[4] as f64;
    if score < min_confidence {
        return None;
    }

    let (cx, cy, w, h) = (row[0] as f64, row[1] as f64, row[2] as f64, row[3] as f64);
    let top_left = lb.to_frame(cx - w / 2.0, cy - h / 2.0);
    let bottom_right = lb.to_frame(cx + w / 2.0, cy + h / 2.0);
    let bbox = BoundingBox::from_corners(top_left.x, top_left.y, bottom_right.x, bottom_right.y);

    let landmarks = if row.len() >= 5 + NUM_KEYPOINT_VALUES {
        (0..NUM_KEYPOINTS)
            .map(|k| lb.to_frame(row[5 + k * 3] as f64, row[5 + k * 3 + 1] as f64))
            .collect()
    } else {
        Vec::new()
    };

    Some(Detection::new(bbox, score, landmarks))
}

/// Greedy NMS: highest score first, drop anything overlapping a kept box.
fn nms(mut dets: Vec<Detection>, iou_thresh: f64) -> Vec<Detection> {
    dets.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::with_capacity(dets.len());
    for det in dets {
        if keep.iter().all(|k| k.bbox.iou(&det.bbox) <= iou_thresh) {
            keep.push(det);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn det(x: f64, y: f64, w: f64, h: f64, score: f64) -> Detection {
        Detection::new(BoundingBox::new(x, y, w, h), score, vec![])
    }

    #[test]
    fn test_letterbox_preserves_aspect_ratio() {
        // 200x100 → 640: scale 3.2, image 640x320, pad_y 160
        let frame = Frame::new(vec![128u8; 200 * 100 * 3], 200, 100, 3, 0);
        let (tensor, lb) = letterbox(&frame, 640);

        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        assert_relative_eq!(lb.scale, 3.2, epsilon = 1e-9);
        assert_relative_eq!(lb.pad_x, 0.0);
        assert_relative_eq!(lb.pad_y, 160.0);
    }

    #[test]
    fn test_letterbox_values_normalized() {
        let frame = Frame::new(vec![255u8; 100 * 50 * 3], 100, 50, 3, 0);
        let (tensor, lb) = letterbox(&frame, 640);

        let y = lb.pad_y as usize + 1;
        assert!((tensor[[0, 0, y, 1]] - 1.0).abs() < 0.01);
        assert!((tensor[[0, 0, 0, 0]] - 114.0 / 255.0).abs() < 0.01);
    }

    #[test]
    fn test_parse_row_maps_back_to_frame_space() {
        let lb = Letterbox {
            scale: 2.0,
            pad_x: 0.0,
            pad_y: 40.0,
        };
        // Box centred at (200, 240) in model space, 100x80.
        let mut row = vec![200.0, 240.0, 100.0, 80.0, 0.9];
        for k in 0..5 {
            row.extend_from_slice(&[100.0 + k as f32 * 10.0, 140.0, 0.95]);
        }

        let d = parse_row(&row, 0.5, &lb).unwrap();
        assert_relative_eq!(d.bbox.x, 75.0);
        assert_relative_eq!(d.bbox.y, 80.0);
        assert_relative_eq!(d.bbox.width, 50.0);
        assert_relative_eq!(d.bbox.height, 40.0);
        assert_eq!(d.landmarks.len(), 5);
        assert_eq!(d.landmarks[0], Point::new(50.0, 50.0));
        assert_eq!(d.landmarks[4], Point::new(70.0, 50.0));
    }

    #[test]
    fn test_parse_row_below_confidence_is_dropped() {
        let lb = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        assert!(parse_row(&[10.0, 10.0, 5.0, 5.0, 0.2], 0.5, &lb).is_none());
    }

    #[test]
    fn test_parse_row_without_keypoints_has_no_landmarks() {
        let lb = Letterbox {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
        };
        let d = parse_row(&[10.0, 10.0, 4.0, 4.0, 0.8], 0.5, &lb).unwrap();
        assert!(d.landmarks.is_empty());
    }

    #[test]
    fn test_nms_suppresses_overlapping_keeps_highest_score() {
        let kept = nms(
            vec![det(2.0, 2.0, 100.0, 100.0, 0.5), det(0.0, 0.0, 100.0, 100.0, 0.9)],
            0.3,
        );
        assert_eq!(kept.len(), 1);
        assert_relative_eq!(kept[0].score, 0.9);
    }

    #[test]
    fn test_nms_keeps_non_overlapping() {
        let kept = nms(
            vec![det(0.0, 0.0, 50.0, 50.0, 0.9), det(200.0, 200.0, 50.0, 50.0, 0.8)],
            0.3,
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_detect_before_load_fails() {
        let mut engine = OnnxFaceEngine::new(ModelLocation::default());
        let frame = Frame::new(vec![0u8; 12], 2, 2, 3, 0);
        assert!(!engine.is_loaded());
        assert_eq!(
            engine.detect(&frame).unwrap_err(),
            OverlayError::ModelsNotLoaded
        );
    }

    #[test]
    fn test_load_models_fails_when_model_unreachable() {
        let tmp = tempfile::tempdir().unwrap();
        let mut engine = OnnxFaceEngine::new(ModelLocation {
            base_url: "http://invalid.nonexistent.example.com/models".into(),
            bundled_dir: None,
            cache_dir: Some(tmp.path().to_path_buf()),
        });

        let err = engine.load_models().unwrap_err();
        assert!(matches!(err, OverlayError::ModelLoad(_)));
        assert!(!engine.is_loaded());
    }

    #[test]
    fn test_load_models_rejects_corrupt_model_file() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(FACE_MODEL_NAME), b"not an onnx graph").unwrap();
        let mut engine =
            OnnxFaceEngine::new(ModelLocation::default().with_bundled_dir(tmp.path()));

        assert!(matches!(
            engine.load_models().unwrap_err(),
            OverlayError::ModelLoad(_)
        ));
    }
}

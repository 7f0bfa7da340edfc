//! Presence detection backends.
//!
//! Two interchangeable strategies answer "where are the faces in this frame":
//! a ResNet-10 SSD face network run through ONNX Runtime, and the SeetaFace
//! funnel cascade from `rustface` as a fallback. The choice is made once by
//! [`PresenceDetector::select`] and never revisited.

use crate::types::{BackendKind, DetectionBox};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SSD_INPUT_SIZE: usize = 300;
/// Per-channel mean in B, G, R order, subtracted before inference (scale 1.0).
const SSD_MEAN_BGR: [f32; 3] = [104.0, 177.0, 123.0];
/// Each SSD output row: [image_id, label, confidence, x1, y1, x2, y2].
const SSD_ROW_LEN: usize = 7;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

const CASCADE_SCALE_FACTOR: f32 = 1.1;
const CASCADE_MIN_FACE_SIZE: u32 = 60;
const CASCADE_SLIDE_STEP: u32 = 4;
const CASCADE_SCORE_THRESHOLD: f64 = 2.0;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("failed to load model: {0}")]
    LoadFailed(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("no face detector could be loaded (network: {network}; cascade: {cascade})")]
    NoBackend { network: String, cascade: String },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Shared capability of every detection backend.
pub trait FaceDetect {
    /// Backend identity, reported in the capture payload.
    fn backend(&self) -> BackendKind;

    /// Detect faces in a packed RGB8 frame.
    fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<DetectionBox>, DetectorError>;
}

/// The backend picked at startup.
pub enum PresenceDetector {
    Network(NetworkDetector),
    Cascade(CascadeDetector),
}

impl PresenceDetector {
    /// Load the network backend if its model is present, else the cascade.
    ///
    /// A network model that exists but fails to load downgrades to the cascade
    /// for the rest of the process. Only when the cascade fails as well is an
    /// error returned.
    pub fn select(
        network_model: &Path,
        cascade_model: &Path,
        confidence_threshold: f32,
    ) -> Result<Self, DetectorError> {
        let network_reason = if network_model.exists() {
            match NetworkDetector::load(network_model, confidence_threshold) {
                Ok(net) => {
                    tracing::info!(path = %network_model.display(), "using DNN face detector");
                    return Ok(Self::Network(net));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "DNN load failed; falling back to cascade");
                    e.to_string()
                }
            }
        } else {
            tracing::info!(
                path = %network_model.display(),
                "DNN model not present; using cascade detector"
            );
            DetectorError::ModelNotFound(network_model.display().to_string()).to_string()
        };

        match CascadeDetector::load(cascade_model) {
            Ok(cascade) => {
                tracing::info!(path = %cascade_model.display(), "using cascade face detector");
                Ok(Self::Cascade(cascade))
            }
            Err(e) => Err(DetectorError::NoBackend {
                network: network_reason,
                cascade: e.to_string(),
            }),
        }
    }
}

impl FaceDetect for PresenceDetector {
    fn backend(&self) -> BackendKind {
        match self {
            Self::Network(_) => BackendKind::Network,
            Self::Cascade(_) => BackendKind::Cascade,
        }
    }

    fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<DetectionBox>, DetectorError> {
        match self {
            Self::Network(net) => net.detect(rgb, width, height),
            Self::Cascade(cascade) => cascade.detect(rgb, width, height),
        }
    }
}

/// ResNet-10 SSD face detector exported to ONNX.
pub struct NetworkDetector {
    session: Session,
    confidence_threshold: f32,
}

impl NetworkDetector {
    /// Load the SSD ONNX model from the given path.
    pub fn load(model_path: &Path, confidence_threshold: f32) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::debug!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name().to_string()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name().to_string()).collect::<Vec<_>>(),
            "loaded SSD model"
        );

        if session.outputs().is_empty() {
            return Err(DetectorError::LoadFailed(format!(
                "{}: model has no outputs",
                model_path.display()
            )));
        }

        Ok(Self {
            session,
            confidence_threshold,
        })
    }

    /// Detect faces in an RGB frame.
    pub fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<DetectionBox>, DetectorError> {
        let input = preprocess_bgr_blob(rgb, width, height)?;

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("detections: {e}")))?;

        Ok(decode_ssd(raw, width, height, self.confidence_threshold))
    }
}

/// Resize to the SSD input square and build a mean-subtracted BGR NCHW tensor.
fn preprocess_bgr_blob(rgb: &[u8], width: u32, height: u32) -> Result<Array4<f32>, DetectorError> {
    let image = rgb_image(rgb, width, height)?;
    let side = SSD_INPUT_SIZE as u32;
    let resized = image::imageops::resize(&image, side, side, FilterType::Triangle);

    let mut tensor = Array4::<f32>::zeros((1, 3, SSD_INPUT_SIZE, SSD_INPUT_SIZE));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let [r, g, b] = pixel.0;
        tensor[[0, 0, y, x]] = b as f32 - SSD_MEAN_BGR[0];
        tensor[[0, 1, y, x]] = g as f32 - SSD_MEAN_BGR[1];
        tensor[[0, 2, y, x]] = r as f32 - SSD_MEAN_BGR[2];
    }
    Ok(tensor)
}

/// Decode SSD detection rows, keeping those at or above `threshold`.
///
/// Coordinates are normalized to [0, 1]; they are scaled to the frame size
/// and clamped to its bounds. Boxes that collapse to zero area are dropped.
fn decode_ssd(raw: &[f32], width: u32, height: u32, threshold: f32) -> Vec<DetectionBox> {
    let (w, h) = (width as f32, height as f32);
    raw.chunks_exact(SSD_ROW_LEN)
        .filter(|row| row[2] >= threshold)
        .filter_map(|row| {
            clamp_box(
                row[3] * w,
                row[4] * h,
                row[5] * w,
                row[6] * h,
                width,
                height,
                row[2],
            )
        })
        .collect()
}

/// SeetaFace funnel-structured cascade detector.
pub struct CascadeDetector {
    inner: Box<dyn rustface::Detector>,
}

impl CascadeDetector {
    /// Load the SeetaFace model (`seeta_fd_frontal_v1.0.bin`).
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let file = File::open(model_path)
            .map_err(|e| DetectorError::LoadFailed(format!("{}: {e}", model_path.display())))?;
        let model = rustface::read_model(BufReader::new(file))
            .map_err(|e| DetectorError::LoadFailed(format!("{}: {e}", model_path.display())))?;

        let mut inner = rustface::create_detector_with_model(model);
        inner.set_min_face_size(CASCADE_MIN_FACE_SIZE);
        inner.set_score_thresh(CASCADE_SCORE_THRESHOLD);
        // rustface shrinks the image per pyramid level, so the step is inverted.
        inner.set_pyramid_scale_factor(1.0 / CASCADE_SCALE_FACTOR);
        inner.set_slide_window_step(CASCADE_SLIDE_STEP, CASCADE_SLIDE_STEP);

        tracing::debug!(path = %model_path.display(), "loaded cascade model");
        Ok(Self { inner })
    }

    /// Detect faces in an RGB frame (converted to grayscale first).
    pub fn detect(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<DetectionBox>, DetectorError> {
        let gray = image::imageops::grayscale(&rgb_image(rgb, width, height)?);
        let data = rustface::ImageData::new(gray.as_raw(), width, height);

        let boxes = self
            .inner
            .detect(&data)
            .into_iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                let x1 = bbox.x() as f32;
                let y1 = bbox.y() as f32;
                clamp_box(
                    x1,
                    y1,
                    x1 + bbox.width() as f32,
                    y1 + bbox.height() as f32,
                    width,
                    height,
                    face.score() as f32,
                )
            })
            .collect();
        Ok(boxes)
    }
}

fn rgb_image(rgb: &[u8], width: u32, height: u32) -> Result<RgbImage, DetectorError> {
    let expected = width as usize * height as usize * 3;
    if rgb.len() < expected {
        return Err(DetectorError::InferenceFailed(format!(
            "RGB frame too short: expected {expected}, got {}",
            rgb.len()
        )));
    }
    RgbImage::from_raw(width, height, rgb[..expected].to_vec()).ok_or_else(|| {
        DetectorError::InferenceFailed(format!("invalid frame dimensions {width}x{height}"))
    })
}

/// Clamp corner coordinates to the frame and build a box, if any area remains.
fn clamp_box(
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    width: u32,
    height: u32,
    confidence: f32,
) -> Option<DetectionBox> {
    let (w, h) = (width as f32, height as f32);
    let x1 = x1.clamp(0.0, w).round();
    let y1 = y1.clamp(0.0, h).round();
    let x2 = x2.clamp(0.0, w).round();
    let y2 = y2.clamp(0.0, h).round();
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(DetectionBox {
        x: x1 as i32,
        y: y1 as i32,
        width: (x2 - x1) as u32,
        height: (y2 - y1) as u32,
        confidence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn row(conf: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> [f32; 7] {
        [0.0, 1.0, conf, x1, y1, x2, y2]
    }

    #[test]
    fn test_decode_ssd_threshold() {
        let mut raw = Vec::new();
        raw.extend(row(0.9, 0.1, 0.1, 0.5, 0.5));
        raw.extend(row(0.49, 0.2, 0.2, 0.6, 0.6));
        raw.extend(row(0.5, 0.0, 0.0, 0.25, 0.25));

        let boxes = decode_ssd(&raw, 640, 480, 0.5);
        assert_eq!(boxes.len(), 2);
        assert!((boxes[0].confidence - 0.9).abs() < 1e-6);
        assert!((boxes[1].confidence - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_decode_ssd_scales_to_frame() {
        let raw = row(0.8, 0.25, 0.5, 0.75, 1.0);
        let boxes = decode_ssd(&raw, 640, 480, 0.5);
        assert_eq!(
            boxes,
            vec![DetectionBox { x: 160, y: 240, width: 320, height: 240, confidence: 0.8 }]
        );
    }

    #[test]
    fn test_decode_ssd_clamps_out_of_frame() {
        let raw = row(0.7, -0.1, -0.2, 1.3, 0.5);
        let boxes = decode_ssd(&raw, 100, 100, 0.5);
        assert_eq!(boxes.len(), 1);
        assert_eq!((boxes[0].x, boxes[0].y), (0, 0));
        assert_eq!((boxes[0].width, boxes[0].height), (100, 50));
    }

    #[test]
    fn test_decode_ssd_drops_degenerate_and_partial_rows() {
        let mut raw = Vec::new();
        raw.extend(row(0.95, 0.5, 0.5, 0.5, 0.9)); // zero width
        raw.extend([0.0, 1.0, 0.99]); // truncated trailing row
        assert!(decode_ssd(&raw, 640, 480, 0.5).is_empty());
    }

    #[test]
    fn test_preprocess_subtracts_mean_in_bgr_order() {
        // Uniform frame: R=123, G=177, B=104 → all channels normalize to 0.
        let (w, h) = (8u32, 6u32);
        let rgb: Vec<u8> = std::iter::repeat([123u8, 177, 104])
            .take((w * h) as usize)
            .flatten()
            .collect();
        let tensor = preprocess_bgr_blob(&rgb, w, h).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, SSD_INPUT_SIZE, SSD_INPUT_SIZE]);
        assert!(tensor.iter().all(|v| v.abs() <= 1.0));
    }

    #[test]
    fn test_short_frame_is_rejected() {
        let result = preprocess_bgr_blob(&[0u8; 10], 4, 4);
        assert!(matches!(result, Err(DetectorError::InferenceFailed(_))));
    }

    #[test]
    fn test_select_falls_back_after_network_load_failure() {
        let dir = tempfile::tempdir().unwrap();
        let network = dir.path().join("res10_300x300_ssd.onnx");
        std::fs::write(&network, b"definitely not an onnx graph").unwrap();

        let result = PresenceDetector::select(
            &network,
            &dir.path().join("seeta_fd_frontal_v1.0.bin"),
            DEFAULT_CONFIDENCE_THRESHOLD,
        );
        match result {
            Err(DetectorError::NoBackend { network, cascade }) => {
                assert!(!network.contains("model file not found"), "{network}");
                assert!(cascade.contains("model file not found"), "{cascade}");
            }
            _ => panic!("expected NoBackend"),
        }
    }

    #[test]
    fn test_select_without_any_model_fails() {
        let missing = PathBuf::from("/nonexistent/attend/models");
        let result = PresenceDetector::select(
            &missing.join("res10_300x300_ssd.onnx"),
            &missing.join("seeta_fd_frontal_v1.0.bin"),
            DEFAULT_CONFIDENCE_THRESHOLD,
        );
        match result {
            Err(DetectorError::NoBackend { network, cascade }) => {
                assert!(network.contains("model file not found"));
                assert!(cascade.contains("seeta_fd_frontal_v1.0.bin"));
            }
            _ => panic!("expected NoBackend"),
        }
    }
}

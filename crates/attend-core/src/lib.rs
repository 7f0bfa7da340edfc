//! attend-core — Presence detection engine.
//!
//! Wraps a ResNet-10 SSD face network (ONNX Runtime) and a SeetaFace cascade
//! fallback behind a single closed [`PresenceDetector`] type.

pub mod detector;
pub mod types;

pub use detector::{DetectorError, FaceDetect, PresenceDetector, DEFAULT_CONFIDENCE_THRESHOLD};
pub use types::{BackendKind, DetectionBox};

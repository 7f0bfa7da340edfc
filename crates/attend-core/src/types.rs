use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned face rectangle in pixel coordinates of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    /// Raw backend score: a probability for the SSD network, a cascade score otherwise.
    pub confidence: f32,
}

impl DetectionBox {
    /// Area in pixels.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Which detection strategy produced a set of boxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// ONNX SSD face network.
    #[serde(rename = "dnn")]
    Network,
    /// SeetaFace funnel cascade.
    #[serde(rename = "cascade")]
    Cascade,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Network => "dnn",
            BackendKind::Cascade => "cascade",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

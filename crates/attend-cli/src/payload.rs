//! The JSON document emitted after every capture run.
//!
//! Key names are consumed by downstream tooling and must stay stable.

use crate::capture::{CaptureResult, CaptureStatus};
use crate::config::{Config, APP_VERSION};
use crate::device_info::DeviceInfo;
use crate::naming::pretty_timestamp;
use attend_core::BackendKind;
use chrono::{DateTime, Local};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct Payload {
    pub status: CaptureStatus,
    pub user: UserSection,
    pub capture: CaptureSection,
    pub runtime: RuntimeSection,
    pub device: DeviceInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSection {
    pub name: String,
    pub seat: String,
}

/// Unset values serialize as `null`.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureSection {
    pub image_path: Option<String>,
    pub saved_at_iso: Option<String>,
    pub saved_at_human: String,
    pub image_sha256: Option<String>,
    pub image_size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeSection {
    pub detector: Option<BackendKind>,
    pub cam_index: u32,
    pub timeout_secs: u64,
    pub required_consecutive_frames: u32,
    pub confidence_threshold: f32,
    pub app_version: String,
}

impl Payload {
    pub fn assemble(
        name: &str,
        seat: &str,
        result: &CaptureResult,
        config: &Config,
        device: DeviceInfo,
        now: DateTime<Local>,
    ) -> Self {
        let digest = match (&result.status, &result.image_path) {
            (CaptureStatus::Saved, Some(path)) => hash_file(path),
            _ => None,
        };
        let (image_sha256, image_size_bytes) = match digest {
            Some((sha, size)) => (Some(sha), Some(size)),
            None => (None, None),
        };

        Self {
            status: result.status,
            user: UserSection {
                name: name.to_string(),
                seat: seat.to_string(),
            },
            capture: CaptureSection {
                image_path: result
                    .image_path
                    .as_ref()
                    .map(|p| p.display().to_string()),
                saved_at_iso: result.saved_at.map(|at| at.to_rfc3339()),
                saved_at_human: pretty_timestamp(&now),
                image_sha256,
                image_size_bytes,
            },
            runtime: RuntimeSection {
                detector: result.detector,
                cam_index: config.camera_index,
                timeout_secs: config.timeout_secs,
                required_consecutive_frames: config.required_consecutive,
                confidence_threshold: config.confidence_threshold,
                app_version: APP_VERSION.to_string(),
            },
            device,
        }
    }

    /// Compact JSON; non-ASCII text is emitted as-is.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// SHA-256 hex digest and byte length of the file, if it can be read.
fn hash_file(path: &Path) -> Option<(String, u64)> {
    match std::fs::read(path) {
        Ok(bytes) => Some((format!("{:x}", Sha256::digest(&bytes)), bytes.len() as u64)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "saved image unreadable; skipping digest");
            None
        }
    }
}

/// Destination for an assembled payload.
pub trait PayloadSink {
    fn deliver(&self, payload: &Payload) -> anyhow::Result<()>;
}

/// Discards the payload. Stands in for a webhook or attendance API.
pub struct NoopSink;

impl PayloadSink for NoopSink {
    fn deliver(&self, payload: &Payload) -> anyhow::Result<()> {
        tracing::debug!(status = ?payload.status, "payload delivery not configured");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn config() -> Config {
        Config::defaults(Path::new("/home/test"))
    }

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 9, 7, 7, 0, 0).unwrap()
    }

    #[test]
    fn test_saved_payload_hashes_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Jane_12A.jpg");
        std::fs::write(&path, b"abc").unwrap();

        let result = CaptureResult {
            status: CaptureStatus::Saved,
            image_path: Some(path.clone()),
            saved_at: Some(now().fixed_offset()),
            detector: Some(BackendKind::Network),
        };
        let payload = Payload::assemble("Jane", "12A", &result, &config(), DeviceInfo::default(), now());

        assert_eq!(
            payload.capture.image_sha256.as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert_eq!(payload.capture.image_size_bytes, Some(3));
        assert_eq!(payload.capture.saved_at_human, "7 Sept, 7:00 am");

        let json: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "saved");
        assert_eq!(json["runtime"]["detector"], "dnn");
        assert_eq!(json["runtime"]["cam_index"], 0);
        assert_eq!(json["runtime"]["timeout_secs"], 25);
        assert_eq!(json["runtime"]["required_consecutive_frames"], 3);
        assert_eq!(json["runtime"]["app_version"], APP_VERSION);
        assert_eq!(json["capture"]["image_path"], path.display().to_string());
        assert!(json["capture"]["saved_at_iso"].as_str().unwrap().starts_with("2025-09-07T07:00:00"));
    }

    #[test]
    fn test_timeout_payload_has_null_capture_fields() {
        let result = CaptureResult {
            status: CaptureStatus::TimedOut,
            image_path: None,
            saved_at: None,
            detector: Some(BackendKind::Cascade),
        };
        let payload = Payload::assemble("Jane", "12A", &result, &config(), DeviceInfo::default(), now());
        let json: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();

        assert_eq!(json["status"], "no_face");
        assert!(json["capture"]["image_path"].is_null());
        assert!(json["capture"]["saved_at_iso"].is_null());
        assert!(json["capture"]["image_sha256"].is_null());
        assert!(json["capture"]["image_size_bytes"].is_null());
        assert_eq!(json["runtime"]["detector"], "cascade");
    }

    #[test]
    fn test_missing_saved_file_skips_digest() {
        let result = CaptureResult {
            status: CaptureStatus::Saved,
            image_path: Some(PathBuf::from("/nonexistent/attend/img.jpg")),
            saved_at: Some(now().fixed_offset()),
            detector: Some(BackendKind::Network),
        };
        let payload = Payload::assemble("Jane", "12A", &result, &config(), DeviceInfo::default(), now());
        assert!(payload.capture.image_sha256.is_none());
        assert!(payload.capture.image_size_bytes.is_none());
    }

    #[test]
    fn test_error_payload_keeps_user_and_preserves_unicode() {
        let result = CaptureResult {
            status: CaptureStatus::Error,
            image_path: None,
            saved_at: None,
            detector: None,
        };
        let payload = Payload::assemble("José Núñez", "7", &result, &config(), DeviceInfo::default(), now());
        let text = payload.to_json().unwrap();

        assert!(text.contains("José Núñez"));
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["user"]["seat"], "7");
        assert!(json["runtime"]["detector"].is_null());
        assert!(NoopSink.deliver(&payload).is_ok());
    }
}

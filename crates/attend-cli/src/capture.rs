//! One-shot capture: wait for a face on N consecutive frames, save one photo.
//!
//! States run `Idle → Acquiring → {Saved, TimedOut, Error}`. The camera is
//! held by a guard that releases it on every exit path.

use crate::config::Config;
use crate::naming::{capture_file_name, safe_filename};
use attend_core::{BackendKind, DetectorError, FaceDetect};
use attend_hw::{CameraDevice, CameraError, Frame, FrameError};
use chrono::{DateTime, FixedOffset, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("name or seat is empty")]
    Validation,
    #[error("cannot create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("detector error: {0}")]
    DetectorLoad(#[from] DetectorError),
    #[error("camera error: {0}")]
    Device(#[from] CameraError),
    #[error("no stable face within {0:?}")]
    Timeout(Duration),
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: FrameError },
}

/// Terminal state of a capture run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CaptureStatus {
    #[serde(rename = "saved")]
    Saved,
    #[serde(rename = "no_face")]
    TimedOut,
    #[serde(rename = "error")]
    Error,
}

impl CaptureStatus {
    /// Process exit code for this outcome.
    pub fn exit_code(self) -> u8 {
        match self {
            CaptureStatus::Saved => 0,
            CaptureStatus::TimedOut => 1,
            CaptureStatus::Error => 2,
        }
    }
}

/// Outcome of one run, threaded into payload assembly.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub status: CaptureStatus,
    pub image_path: Option<PathBuf>,
    pub saved_at: Option<DateTime<FixedOffset>>,
    /// `None` when no backend was loaded.
    pub detector: Option<BackendKind>,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub output_dir: PathBuf,
    pub timeout: Duration,
    pub required_consecutive: u32,
    pub poll_interval: Duration,
    pub jpeg_quality: u8,
}

impl From<&Config> for CaptureSettings {
    fn from(config: &Config) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            timeout: config.timeout(),
            required_consecutive: config.required_consecutive,
            poll_interval: config.poll_interval(),
            jpeg_quality: config.jpeg_quality,
        }
    }
}

/// Owns an open camera and releases it exactly once when dropped.
struct CameraGuard<C: CameraDevice> {
    camera: Option<C>,
}

impl<C: CameraDevice> CameraGuard<C> {
    fn new(camera: C) -> Self {
        Self {
            camera: Some(camera),
        }
    }

    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        match self.camera.as_mut() {
            Some(camera) => camera.read_frame(),
            None => Err(CameraError::CaptureFailed("camera already released".into())),
        }
    }
}

impl<C: CameraDevice> Drop for CameraGuard<C> {
    fn drop(&mut self) {
        if let Some(camera) = self.camera.take() {
            camera.release();
            tracing::debug!("camera released");
        }
    }
}

struct Saved {
    path: PathBuf,
    at: DateTime<FixedOffset>,
}

/// Run the one-shot capture for `name`/`seat`.
///
/// `load_detector` runs only after validation succeeds and `open_camera` only
/// after a detector is loaded. Never fails; the outcome is in the result.
pub fn capture_once<D, C>(
    settings: &CaptureSettings,
    name: &str,
    seat: &str,
    load_detector: impl FnOnce() -> Result<D, DetectorError>,
    open_camera: impl FnOnce() -> Result<C, CameraError>,
) -> CaptureResult
where
    D: FaceDetect,
    C: CameraDevice,
{
    let mut detector_used = None;
    let outcome = run(settings, name, seat, load_detector, open_camera, &mut detector_used);

    match outcome {
        Ok(saved) => CaptureResult {
            status: CaptureStatus::Saved,
            image_path: Some(saved.path),
            saved_at: Some(saved.at),
            detector: detector_used,
        },
        Err(e) => {
            let status = match &e {
                CaptureError::Timeout(_) => {
                    tracing::info!(error = %e, "capture timed out");
                    CaptureStatus::TimedOut
                }
                _ => {
                    tracing::error!(error = %e, "capture failed");
                    CaptureStatus::Error
                }
            };
            CaptureResult {
                status,
                image_path: None,
                saved_at: None,
                detector: detector_used,
            }
        }
    }
}

fn run<D, C>(
    settings: &CaptureSettings,
    name: &str,
    seat: &str,
    load_detector: impl FnOnce() -> Result<D, DetectorError>,
    open_camera: impl FnOnce() -> Result<C, CameraError>,
    detector_used: &mut Option<BackendKind>,
) -> Result<Saved, CaptureError>
where
    D: FaceDetect,
    C: CameraDevice,
{
    let name = safe_filename(name.trim());
    let seat = safe_filename(seat.trim());
    if name.is_empty() || seat.is_empty() {
        return Err(CaptureError::Validation);
    }

    std::fs::create_dir_all(&settings.output_dir).map_err(|source| CaptureError::OutputDir {
        path: settings.output_dir.clone(),
        source,
    })?;

    let mut detector = load_detector()?;
    *detector_used = Some(detector.backend());

    let mut camera = CameraGuard::new(open_camera()?);
    tracing::info!(
        backend = %detector.backend(),
        timeout = ?settings.timeout,
        required = settings.required_consecutive,
        "waiting for a stable face"
    );

    let start = Instant::now();
    let mut streak = 0u32;

    loop {
        let frame = match camera.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(error = %e, "frame read failed");
                std::thread::sleep(settings.poll_interval);
                if start.elapsed() > settings.timeout {
                    return Err(timed_out(settings.timeout));
                }
                continue;
            }
        };

        let faces = match detector.detect(&frame.data, frame.width, frame.height) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, seq = frame.sequence, "detection failed; counting as a miss");
                Vec::new()
            }
        };

        if faces.is_empty() {
            streak = 0;
        } else {
            streak += 1;
            tracing::debug!(
                faces = faces.len(),
                largest = faces.iter().map(|b| b.area()).max().unwrap_or(0),
                streak,
                "face present"
            );
        }

        if streak >= settings.required_consecutive {
            println!("present");
            return save_frame(&frame, &settings.output_dir, &name, &seat, settings.jpeg_quality);
        }

        if start.elapsed() > settings.timeout {
            return Err(timed_out(settings.timeout));
        }

        std::thread::sleep(settings.poll_interval);
    }
}

fn timed_out(timeout: Duration) -> CaptureError {
    println!("Device opened without face");
    CaptureError::Timeout(timeout)
}

fn save_frame(
    frame: &Frame,
    output_dir: &Path,
    name: &str,
    seat: &str,
    quality: u8,
) -> Result<Saved, CaptureError> {
    let path = output_dir.join(capture_file_name(name, seat, &Local::now()));
    frame
        .save_jpeg(&path, quality)
        .map_err(|source| CaptureError::Write {
            path: path.clone(),
            source,
        })?;

    let at = Local::now().fixed_offset();
    println!("[saved] {}", path.display());
    Ok(Saved { path, at })
}

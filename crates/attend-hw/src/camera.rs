//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use ouroboros::self_referencing;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;
/// Upper bound on one buffer dequeue; a stalled device surfaces as a read error.
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// A source of color frames whose handle must be given back exactly once.
///
/// `release` consumes the device, so a second release cannot be expressed.
pub trait CameraDevice {
    /// Read the next frame from the device.
    fn read_frame(&mut self) -> Result<Frame, CameraError>;

    /// Stop streaming and close the device.
    fn release(self);
}

/// A capture-capable `/dev/video*` node, as reported by the driver.
#[derive(Debug, Clone)]
pub struct VideoDevice {
    pub path: String,
    pub name: String,
    pub driver: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion JPEG, one compressed image per buffer.
    Mjpeg,
    /// Packed RGB24.
    Rgb24,
    /// 8-bit grayscale.
    Grey,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpeg),
            b"RGB3" => Some(Self::Rgb24),
            b"GREY" => Some(Self::Grey),
            _ => None,
        }
    }
}

/// Device plus its memory-mapped stream, which borrows the device.
#[self_referencing]
struct StreamState {
    device: Device,
    #[borrows(device)]
    #[not_covariant]
    stream: MmapStream<'this>,
}

/// V4L2 camera device handle with an active capture stream.
pub struct Camera {
    state: StreamState,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open the camera at a numeric index (`0` → `/dev/video0`).
    pub fn open(index: u32) -> Result<Self, CameraError> {
        Self::open_path(&format!("/dev/video{index}"))
    }

    /// Open a V4L2 camera device by path and start streaming.
    pub fn open_path(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        // Ask for YUYV; drivers that only speak MJPG, RGB3 or GREY answer with those.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = PixelFormat::from_fourcc(fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, MJPG, RGB3, or GREY)"
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        let state = StreamState::try_new(device, |device| {
            let mut stream = MmapStream::with_buffers(device, BufType::VideoCapture, STREAM_BUFFERS)?;
            stream.set_timeout(READ_TIMEOUT);
            Ok::<_, std::io::Error>(stream)
        })
        .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        Ok(Self {
            state,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Capture a single frame, converted to RGB8.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let (width, height, pixel_format) = (self.width, self.height, self.pixel_format);

        self.state.with_stream_mut(|stream| {
            let (buf, meta) = stream.next().map_err(|e| {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            })?;
            let used = (meta.bytesused as usize).min(buf.len());
            let buf = if used > 0 { &buf[..used] } else { buf };

            let (data, width, height) = buf_to_rgb(buf, pixel_format, width, height)?;
            Ok(Frame::from_rgb(data, width, height, meta.sequence))
        })
    }

    /// Enumerate `/dev/video0..15` nodes that support video capture.
    pub fn list_devices() -> Vec<VideoDevice> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(VideoDevice {
                path,
                name: caps.card,
                driver: caps.driver,
            });
        }

        devices
    }
}

impl CameraDevice for Camera {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }

    fn release(self) {
        tracing::debug!(device = %self.device_path, "releasing camera");
        // Dropping the stream stops capture; dropping the device closes the fd.
        drop(self.state);
    }
}

/// Convert a raw buffer to RGB8 based on the negotiated format.
fn buf_to_rgb(
    buf: &[u8],
    pixel_format: PixelFormat,
    width: u32,
    height: u32,
) -> Result<(Vec<u8>, u32, u32), CameraError> {
    match pixel_format {
        PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height)
            .map(|rgb| (rgb, width, height))
            .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
        PixelFormat::Grey => frame::grey_to_rgb(buf, width, height)
            .map(|rgb| (rgb, width, height))
            .map_err(|e| CameraError::CaptureFailed(format!("GREY conversion failed: {e}"))),
        PixelFormat::Rgb24 => {
            let expected = width as usize * height as usize * 3;
            if buf.len() < expected {
                return Err(CameraError::CaptureFailed(format!(
                    "RGB3 buffer too short: expected {expected}, got {}",
                    buf.len()
                )));
            }
            Ok((buf[..expected].to_vec(), width, height))
        }
        PixelFormat::Mjpeg => frame::mjpeg_to_rgb(buf)
            .map_err(|e| CameraError::CaptureFailed(format!("MJPG decode failed: {e}"))),
    }
}

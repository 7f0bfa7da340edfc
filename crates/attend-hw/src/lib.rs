//! attend-hw — Hardware abstraction for camera capture.
//!
//! Provides V4L2-based camera access and the RGB frame type handed to the
//! presence detector and written out as the attendance photo.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraDevice, CameraError, PixelFormat, VideoDevice, READ_TIMEOUT};
pub use frame::{Frame, FrameError};

//! Camera capability boundary and its V4L2 implementation.
//!
//! The capture loop only ever sees [`CameraOpener`] and [`CameraDevice`];
//! [`V4lOpener`] is the production backend.

use crate::frame::{self, Frame, PixelLayout};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("no frame: {0}")]
    NoFrame(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
}

/// Longest a single dequeue may wait before the read is abandoned.
pub const READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// An open camera handle.
///
/// `release` consumes the handle so a device can only be released once.
pub trait CameraDevice: Send {
    fn read_frame(&mut self) -> Result<Frame, CameraError>;
    fn release(self: Box<Self>);
}

/// Produces fresh camera handles. Every call to `open` must return a new handle.
pub trait CameraOpener: Send + Sync {
    fn open(&self) -> Result<Box<dyn CameraDevice>, CameraError>;
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed, converted to RGB.
    Yuyv,
    /// Packed 24-bit RGB, passed through.
    Rgb3,
    /// 8-bit grayscale, passed through as a gray frame.
    Grey,
}

/// Opens V4L2 devices at a requested resolution.
#[derive(Debug, Clone)]
pub struct V4lOpener {
    pub device_path: String,
    pub width: u32,
    pub height: u32,
}

impl V4lOpener {
    pub fn new(device_path: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            device_path: device_path.into(),
            width,
            height,
        }
    }
}

impl CameraOpener for V4lOpener {
    fn open(&self) -> Result<Box<dyn CameraDevice>, CameraError> {
        let camera = V4lCamera::open(&self.device_path, self.width, self.height)?;
        Ok(Box::new(camera))
    }
}

/// V4L2 camera device handle.
pub struct V4lCamera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
    sequence: u32,
}

impl V4lCamera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceUnavailable(format!(
                "{device_path}: no such device"
            )));
        }

        let device = Device::with_path(device_path)
            .map_err(|e| CameraError::DeviceUnavailable(format!("{device_path}: {e}")))?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::DeviceUnavailable(format!("failed to query capabilities: {e}"))
        })?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::DeviceUnavailable(format!(
                "{device_path}: not a video capture device"
            )));
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = width;
        fmt.height = height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"RGB3") {
            PixelFormat::Rgb3
        } else if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, RGB3, or GREY)"
            )));
        };

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "camera opened"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
            sequence: 0,
        })
    }

    /// Convert a raw buffer into a frame based on the negotiated format.
    fn decode(&self, buf: &[u8], sequence: u32) -> Result<Frame, CameraError> {
        let pixels = self.width as usize * self.height as usize;
        let (data, layout) = match self.pixel_format {
            PixelFormat::Yuyv => {
                let rgb = frame::yuyv_to_rgb(buf, self.width, self.height)
                    .map_err(|e| CameraError::NoFrame(format!("YUYV conversion failed: {e}")))?;
                (rgb, PixelLayout::Rgb)
            }
            PixelFormat::Rgb3 => (truncated(buf, pixels * 3, "RGB3")?, PixelLayout::Rgb),
            PixelFormat::Grey => (truncated(buf, pixels, "GREY")?, PixelLayout::Gray),
        };
        Frame::new(data, self.width, self.height, layout, sequence)
            .map_err(|e| CameraError::NoFrame(e.to_string()))
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .map(|i| format!("/dev/video{i}"))
            .filter(|path| Path::new(path).exists())
            .filter_map(|path| {
                let dev = Device::with_path(&path).ok()?;
                let caps = dev.query_caps().ok()?;
                caps.capabilities
                    .contains(v4l::capability::Flags::VIDEO_CAPTURE)
                    .then(|| DeviceInfo {
                        path,
                        name: caps.card.clone(),
                        driver: caps.driver.clone(),
                    })
            })
            .collect()
    }
}

impl CameraDevice for V4lCamera {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        let mut stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4).map_err(|e| {
                CameraError::NoFrame(format!("failed to create mmap stream: {e}"))
            })?;
        stream.set_timeout(READ_TIMEOUT);

        let (buf, meta) = stream.next().map_err(dequeue_error)?;

        self.sequence = meta.sequence;
        self.decode(buf, meta.sequence)
    }

    fn release(self: Box<Self>) {
        tracing::info!(device = %self.device_path, last_sequence = self.sequence, "camera released");
        drop(self);
    }
}

fn dequeue_error(e: std::io::Error) -> CameraError {
    if e.kind() == std::io::ErrorKind::TimedOut {
        CameraError::NoFrame(format!("no buffer within {READ_TIMEOUT:?}"))
    } else {
        CameraError::NoFrame(format!("failed to dequeue buffer: {e}"))
    }
}

fn truncated(buf: &[u8], len: usize, format: &str) -> Result<Vec<u8>, CameraError> {
    if buf.len() < len {
        return Err(CameraError::NoFrame(format!(
            "{format} buffer too short: expected {len}, got {}",
            buf.len()
        )));
    }
    Ok(buf[..len].to_vec())
}

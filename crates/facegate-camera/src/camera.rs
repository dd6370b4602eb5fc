//! V4L2 camera capture via the `v4l` crate.
//!
//! The session layer consumes cameras through the [`CameraSource`] /
//! [`VideoSource`] seam; release is `Drop`.

use crate::frame;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Raw captures attempted per sample to get past auto-exposure black frames.
const DARK_FRAME_ATTEMPTS: usize = 3;

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

/// Resolution and device hints for camera acquisition.
#[derive(Debug, Clone)]
pub struct CaptureConstraints {
    /// V4L2 device path (e.g., "/dev/video0").
    pub device: String,
    pub width: u32,
    pub height: u32,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
        }
    }
}

/// A single encoded still sampled from the live stream.
#[derive(Debug, Clone)]
pub struct CapturedPhoto {
    /// PNG-encoded grayscale image.
    pub bytes: Vec<u8>,
    /// Driver capture sequence number, for ordering.
    pub sequence: u32,
}

/// A live video stream that can be sampled for stills.
pub trait VideoSource: Send {
    fn sample(&mut self) -> Result<CapturedPhoto, CameraError>;
}

/// Factory for live video streams.
pub trait CameraSource: Send + Sync {
    fn acquire(&self, constraints: &CaptureConstraints) -> Result<Box<dyn VideoSource>, CameraError>;
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
}

/// Negotiated pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel, extract Y channel).
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel).
    Grey,
}

/// [`CameraSource`] over local V4L2 devices.
pub struct V4lCameraSource;

impl CameraSource for V4lCameraSource {
    fn acquire(&self, constraints: &CaptureConstraints) -> Result<Box<dyn VideoSource>, CameraError> {
        Ok(Box::new(V4lCamera::open(constraints)?))
    }
}

/// V4L2 camera device handle.
pub struct V4lCamera {
    device: Device,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

impl V4lCamera {
    /// Open a V4L2 device and negotiate a supported format.
    pub fn open(constraints: &CaptureConstraints) -> Result<Self, CameraError> {
        let device_path = &constraints.device;
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.clone()));
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
        if !caps
            .capabilities
            .contains(v4l::capability::Flags::VIDEO_CAPTURE)
        {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = constraints.width;
        fmt.height = constraints.height;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let pixel_format = if negotiated.fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if negotiated.fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {:?} (need YUYV or GREY)",
                negotiated.fourcc
            )));
        };

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?negotiated.fourcc,
            "camera opened"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            pixel_format,
        })
    }

    fn buf_to_grayscale(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let pixels = (self.width * self.height) as usize;
        match self.pixel_format {
            PixelFormat::Grey => {
                if buf.len() < pixels {
                    return Err(CameraError::CaptureFailed(format!(
                        "GREY buffer too short: expected {pixels}, got {}",
                        buf.len()
                    )));
                }
                Ok(buf[..pixels].to_vec())
            }
            PixelFormat::Yuyv => frame::yuyv_to_grayscale(buf, self.width, self.height)
                .map_err(|e| CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))),
        }
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
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
            if !caps
                .capabilities
                .contains(v4l::capability::Flags::VIDEO_CAPTURE)
            {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
            });
        }
        devices
    }
}

impl VideoSource for V4lCamera {
    /// Sample one still, skipping up to [`DARK_FRAME_ATTEMPTS`] dark frames.
    fn sample(&mut self) -> Result<CapturedPhoto, CameraError> {
        let mut stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4)
            .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;

        let mut last: Option<(Vec<u8>, u32)> = None;
        for _ in 0..DARK_FRAME_ATTEMPTS {
            let (buf, meta) = stream
                .next()
                .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

            let gray = self.buf_to_grayscale(buf)?;
            let dark = frame::is_dark_frame(&gray, 0.95);
            last = Some((gray, meta.sequence));
            if !dark {
                break;
            }
            tracing::debug!(seq = meta.sequence, "skipping dark frame");
        }

        let (gray, sequence) = last.expect("at least one capture attempt");
        let bytes = frame::encode_png(&gray, self.width, self.height)
            .map_err(|e| CameraError::CaptureFailed(format!("snapshot encode failed: {e}")))?;

        Ok(CapturedPhoto { bytes, sequence })
    }
}

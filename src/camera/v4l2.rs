use std::fs;
use image::{GrayImage, ImageBuffer, Luma};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};
use crate::camera::FrameSource;
use crate::common::config::CameraConfig;
use crate::common::{AccessError, Result};

pub struct Camera {
    device: Device,
    config: CameraConfig,
}

/// A running capture stream borrowed from an open [`Camera`].
pub struct CameraSession<'a> {
    _camera: &'a Camera,
    stream: v4l::io::mmap::Stream<'a>,
    format: v4l::Format,
}

impl Camera {
    pub fn new(config: &CameraConfig) -> Result<Self> {
        let index = config.device_index;
        tracing::info!("Opening camera device {}", index);

        let device = Device::new(index as usize)
            .map_err(|e| AccessError::Camera(format!("Failed to open camera {}: {}", index, e)))?;

        let caps = device.query_caps()
            .map_err(|e| AccessError::Camera(format!("Failed to query capabilities: {}", e)))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            tracing::warn!("Device {} ({}) may not support video capture", index, caps.card);
        }

        let mut fmt = device.format()
            .map_err(|e| AccessError::Camera(format!("Failed to get format: {}", e)))?;
        fmt.width = config.width;
        fmt.height = config.height;
        if fmt.fourcc != FourCC::new(b"GREY") && fmt.fourcc != FourCC::new(b"YUYV") {
            fmt.fourcc = FourCC::new(b"MJPG");
        }

        if let Err(e) = device.set_format(&fmt) {
            tracing::warn!("Could not set format {}x{}: {}. Using device defaults.", fmt.width, fmt.height, e);
        }

        let actual = device.format()
            .map_err(|e| AccessError::Camera(format!("Failed to get final format: {}", e)))?;
        tracing::info!(
            "Camera format: {}x{} {}",
            actual.width,
            actual.height,
            actual.fourcc.str().unwrap_or("????")
        );
        if actual.width != config.width || actual.height != config.height {
            tracing::warn!(
                "Camera resolution {}x{} differs from requested {}x{}",
                actual.width, actual.height, config.width, config.height
            );
        }

        Ok(Self { device, config: config.clone() })
    }

    /// Video capture devices under /dev, as `(index, card name)`.
    pub fn list_cameras() -> Result<Vec<(u32, String)>> {
        let mut cameras = Vec::new();
        for entry in fs::read_dir("/dev")? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(index) = file_name
                .to_str()
                .and_then(|n| n.strip_prefix("video"))
                .and_then(|i| i.parse::<u32>().ok())
            else {
                continue;
            };
            if let Ok(caps) = Device::new(index as usize).and_then(|d| d.query_caps()) {
                if caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                    cameras.push((index, caps.card));
                }
            }
        }
        cameras.sort_by_key(|c| c.0);
        Ok(cameras)
    }

    pub fn start_session(&self) -> Result<CameraSession<'_>> {
        let format = self.device.format()
            .map_err(|e| AccessError::Camera(format!("Failed to get format: {}", e)))?;

        let mut stream = v4l::io::mmap::Stream::with_buffers(&self.device, Type::VideoCapture, 4)
            .map_err(|e| AccessError::Camera(format!("Failed to create stream: {}", e)))?;

        for i in 0..self.config.warmup_frames {
            stream.next()
                .map_err(|e| AccessError::Camera(format!("Failed to capture warmup frame {}: {}", i, e)))?;
        }
        tracing::debug!("Camera warmed up with {} frames", self.config.warmup_frames);

        Ok(CameraSession { _camera: self, stream, format })
    }
}

impl<'a> FrameSource for CameraSession<'a> {
    fn next_frame(&mut self) -> Result<Option<GrayImage>> {
        let (buf, _meta) = self.stream.next()
            .map_err(|e| AccessError::Camera(format!("Failed to capture: {}", e)))?;
        let (width, height) = (self.format.width, self.format.height);

        let frame = match &self.format.fourcc.repr {
            b"GREY" => grey_to_image(buf, width, height)?,
            b"YUYV" => yuyv_luma(buf, width, height)?,
            b"MJPG" => image::load_from_memory(buf)?.to_luma8(),
            other => {
                return Err(AccessError::Camera(format!(
                    "Unsupported pixel format {}",
                    String::from_utf8_lossy(other)
                )))
            }
        };
        Ok(Some(frame))
    }
}

fn grey_to_image(data: &[u8], width: u32, height: u32) -> Result<GrayImage> {
    let len = (width * height) as usize;
    let data = data.get(..len)
        .ok_or_else(|| AccessError::Camera("Short grayscale frame".into()))?;
    ImageBuffer::<Luma<u8>, _>::from_raw(width, height, data.to_vec())
        .ok_or_else(|| AccessError::Camera("Failed to create grayscale image buffer".into()))
}

/// Keeps the luma byte of each YUYV pixel pair.
fn yuyv_luma(data: &[u8], width: u32, height: u32) -> Result<GrayImage> {
    let len = (width * height * 2) as usize;
    let data = data.get(..len)
        .ok_or_else(|| AccessError::Camera("Short YUYV frame".into()))?;
    let luma: Vec<u8> = data.iter().step_by(2).copied().collect();
    ImageBuffer::<Luma<u8>, _>::from_raw(width, height, luma)
        .ok_or_else(|| AccessError::Camera("Failed to create grayscale image buffer".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_keeps_luma_bytes() {
        let frame = yuyv_luma(&[10, 128, 20, 128, 30, 128, 40, 128], 2, 2).unwrap();
        assert_eq!(frame.into_raw(), vec![10, 20, 30, 40]);
    }

    #[test]
    fn short_grey_frame_is_rejected() {
        assert!(grey_to_image(&[0; 3], 2, 2).is_err());
    }
}

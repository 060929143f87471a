//! V4L2 camera source.
//!
//! Captures from a local device node (e.g. /dev/video0) through memory-mapped buffers.
//! RGB24 is requested; devices that insist on NV12 are converted in software. Frames are
//! scaled to the capture resolution when the device negotiates a different size.

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{fit_to_capture, CaptureSettings, FrameSource, SourceStats};
use crate::frame::Frame;

pub struct V4l2Source {
    device_path: String,
    capture: CaptureSettings,
    state: DeviceV4l2State,
    pixel_format: PixelFormat,
    active_width: u32,
    active_height: u32,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn open(device_path: &str, capture: CaptureSettings) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(device_path)
            .with_context(|| format!("open v4l2 device {}", device_path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = capture.width;
        format.height = capture.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    device_path,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        let pixel_format = match &format.fourcc.repr {
            b"RGB3" => PixelFormat::Rgb24,
            b"NV12" => PixelFormat::Nv12,
            other => {
                return Err(anyhow!(
                    "v4l2 device {} negotiated unsupported pixel format {}",
                    device_path,
                    String::from_utf8_lossy(other)
                ))
            }
        };

        let params = v4l::video::capture::Parameters::with_fps(capture.fps);
        if let Err(err) = device.set_params(&params) {
            log::warn!("V4l2Source: failed to set fps on {}: {}", device_path, err);
        }

        let state = DeviceV4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Source: connected to {} ({}x{})",
            device_path,
            format.width,
            format.height
        );

        Ok(Self {
            device_path: device_path.to_string(),
            capture,
            state,
            pixel_format,
            active_width: format.width,
            active_height: format.height,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        })
    }

    fn health_grace(&self) -> Duration {
        let base_ms = (1000 / self.capture.fps.max(1)).saturating_mul(6);
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

impl FrameSource for V4l2Source {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let (width, height, format) = (self.active_width, self.active_height, self.pixel_format);
        let image = self
            .state
            .with_mut(|fields| {
                let (buf, _meta) = fields.stream.next()?;
                normalize_to_rgb(buf, width, height, format)
            })
            .map_err(|err| {
                self.last_error = Some(err.to_string());
                err.context(format!("capture frame from {}", self.device_path))
            })?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        let image = fit_to_capture(image, &self.capture);
        Ok(Some(Frame::new(image, self.frame_count, Local::now())))
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(last_frame_at) = self.last_frame_at else {
            return true;
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.device_path.clone(),
        }
    }
}

//! Frame ingestion sources.
//!
//! This module provides the sources a run can read frames from:
//! - Synthetic scenes (`stub://<scene>`), for demos and tests
//! - Image-sequence directories (always available)
//! - Local video files and network streams (feature: ingest-ffmpeg)
//! - Local cameras by index (feature: ingest-v4l2)
//!
//! Every source yields frames already normalized to the configured capture
//! resolution, in RGB24, with a monotonically increasing index starting at 1.
//! `next_frame` blocks until a frame is available and returns `Ok(None)` at end of
//! stream. A source that cannot be opened surfaces `PerimeterError::SourceUnavailable`
//! from `open_source`, before any frame is requested.

use anyhow::{anyhow, Result};
use std::path::PathBuf;

use crate::frame::Frame;
use crate::PerimeterError;

#[cfg(feature = "ingest-ffmpeg")]
pub mod ffmpeg;
pub mod file;
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

#[cfg(feature = "ingest-ffmpeg")]
pub use ffmpeg::FfmpegSource;
pub use file::ImageSequenceSource;
pub(crate) use normalize::fit_to_capture;
pub use synthetic::{Actor, SyntheticScene, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Capture resolution and nominal frame rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 20,
        }
    }
}

/// Where frames come from. Chosen once before the frame loop starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceDescriptor {
    /// Local camera by index (0 = first device).
    Camera(u32),
    /// Network stream URL (rtsp://, http://, ...).
    Stream(String),
    /// Local video file or image-sequence directory.
    File(PathBuf),
    /// Built-in synthetic scene.
    Synthetic(String),
}

impl SourceDescriptor {
    /// Parse a descriptor string.
    ///
    /// A bare integer is a camera index, `stub://name` a synthetic scene, any other
    /// `scheme://` a network stream, and everything else a local path.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(anyhow!("source descriptor is empty"));
        }
        if raw.chars().all(|c| c.is_ascii_digit()) {
            let index = raw
                .parse()
                .map_err(|_| anyhow!("camera index {} out of range", raw))?;
            return Ok(Self::Camera(index));
        }
        if let Some(scene) = raw.strip_prefix("stub://") {
            return Ok(Self::Synthetic(scene.to_string()));
        }
        if raw.contains("://") {
            let parsed = url::Url::parse(raw)
                .map_err(|e| anyhow!("invalid stream url {}: {}", raw, e))?;
            if parsed.host_str().is_none() {
                return Err(anyhow!("stream url {} has no host", raw));
            }
            return Ok(Self::Stream(parsed.to_string()));
        }
        Ok(Self::File(PathBuf::from(raw)))
    }
}

impl std::fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Camera(index) => write!(f, "camera:{}", index),
            Self::Stream(url) => f.write_str(url),
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Synthetic(scene) => write!(f, "stub://{}", scene),
        }
    }
}

/// Frame counters for health logging.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// A blocking, ordered supply of frames.
pub trait FrameSource {
    /// Next frame, or `None` once the stream has ended.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Check if the source is healthy.
    fn is_healthy(&self) -> bool {
        true
    }

    /// Get frame statistics.
    fn stats(&self) -> SourceStats;
}

/// Open the source named by `descriptor`.
///
/// Any failure here is reported as `PerimeterError::SourceUnavailable`.
pub fn open_source(
    descriptor: &SourceDescriptor,
    capture: &CaptureSettings,
) -> Result<Box<dyn FrameSource>> {
    let label = descriptor.to_string();
    let unavailable = |reason: String| -> anyhow::Error {
        PerimeterError::source_unavailable(label.clone(), reason).into()
    };

    match descriptor {
        SourceDescriptor::Synthetic(scene) => {
            let scene = SyntheticScene::named(scene, capture)
                .ok_or_else(|| unavailable(format!("unknown synthetic scene '{}'", scene)))?;
            Ok(Box::new(SyntheticSource::new(scene, capture.fps)))
        }
        SourceDescriptor::File(path) => {
            if !path.exists() {
                return Err(unavailable("no such file or directory".to_string()));
            }
            if path.is_dir() {
                let source = ImageSequenceSource::open(path, *capture)
                    .map_err(|e| unavailable(e.to_string()))?;
                return Ok(Box::new(source));
            }
            open_decoded(&label, *capture).map_err(|e| unavailable(e.to_string()))
        }
        SourceDescriptor::Stream(url) => {
            open_decoded(url, *capture).map_err(|e| unavailable(e.to_string()))
        }
        SourceDescriptor::Camera(index) => {
            open_camera(*index, *capture).map_err(|e| unavailable(e.to_string()))
        }
    }
}

#[cfg(feature = "ingest-ffmpeg")]
fn open_decoded(input: &str, capture: CaptureSettings) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(FfmpegSource::open(input, capture)?))
}

#[cfg(not(feature = "ingest-ffmpeg"))]
fn open_decoded(_input: &str, _capture: CaptureSettings) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!(
        "video files and network streams require the ingest-ffmpeg feature"
    ))
}

#[cfg(feature = "ingest-v4l2")]
fn open_camera(index: u32, capture: CaptureSettings) -> Result<Box<dyn FrameSource>> {
    let device = format!("/dev/video{}", index);
    Ok(Box::new(V4l2Source::open(&device, capture)?))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_camera(_index: u32, _capture: CaptureSettings) -> Result<Box<dyn FrameSource>> {
    Err(anyhow!("local cameras require the ingest-v4l2 feature"))
}

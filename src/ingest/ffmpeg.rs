//! Video file and network stream source using FFmpeg.
//!
//! Decodes the best video stream in-memory, converts it to RGB24 and scales it to the
//! capture resolution in one pass. Frames still buffered in the decoder are drained before
//! the next packet is read, and again after end of input.

use anyhow::{Context, Result};
use chrono::Local;
use ffmpeg_next as ffmpeg;
use std::time::{Duration, Instant};

use super::{CaptureSettings, FrameSource, SourceStats};
use crate::frame::Frame;

pub struct FfmpegSource {
    input_name: String,
    capture: CaptureSettings,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_count: u64,
    eof_sent: bool,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

impl FfmpegSource {
    pub fn open(input_name: &str, capture: CaptureSettings) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&input_name)
            .with_context(|| format!("failed to open '{}' with ffmpeg", input_name))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("'{}' has no video track", input_name))?;
        let stream_index = input_stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            capture.width,
            capture.height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        log::info!(
            "FfmpegSource: opened {} ({}x{} -> {}x{})",
            input_name,
            decoder.width(),
            decoder.height(),
            capture.width,
            capture.height
        );

        Ok(Self {
            input_name: input_name.to_string(),
            capture,
            input,
            stream_index,
            decoder,
            scaler,
            frame_count: 0,
            eof_sent: false,
            last_frame_at: None,
            last_error: None,
        })
    }

    fn receive(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let pixels = frame_to_pixels(&rgb_frame)?;

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        let frame = Frame::from_rgb(
            pixels,
            self.capture.width,
            self.capture.height,
            self.frame_count,
            Local::now(),
        )?;
        Ok(Some(frame))
    }

    fn health_grace(&self) -> Duration {
        let base_ms = (1000 / self.capture.fps.max(1)).saturating_mul(6);
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

impl FrameSource for FfmpegSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.receive()? {
                return Ok(Some(frame));
            }
            if self.eof_sent {
                return Ok(None);
            }

            let next_packet = self
                .input
                .packets()
                .find(|(stream, _)| stream.index() == self.stream_index)
                .map(|(_, packet)| packet);
            match next_packet {
                Some(packet) => {
                    if let Err(err) = self.decoder.send_packet(&packet) {
                        self.last_error = Some(err.to_string());
                        return Err(anyhow::Error::new(err).context("send packet to decoder"));
                    }
                }
                None => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.eof_sent = true;
                    log::info!(
                        "FfmpegSource: end of {} after {} frames",
                        self.input_name,
                        self.frame_count
                    );
                }
            }
        }
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        match self.last_frame_at {
            Some(last_frame_at) => self.eof_sent || last_frame_at.elapsed() <= self.health_grace(),
            None => true,
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.input_name.clone(),
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<Vec<u8>> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let row_bytes = width * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let plane = data
            .get(..row_bytes * height)
            .context("ffmpeg frame plane is truncated")?;
        return Ok(plane.to_vec());
    }

    let mut pixels = Vec::with_capacity(row_bytes * height);
    for row in 0..height {
        let start = row * stride;
        pixels.extend_from_slice(
            data.get(start..start + row_bytes)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }
    Ok(pixels)
}

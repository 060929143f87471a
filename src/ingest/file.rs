//! Image-sequence directory source.
//!
//! Reads every `.jpg`, `.jpeg` or `.png` file in a directory in file-name order, one
//! frame per file. Files are decoded lazily, one per `next_frame` call. Video files are
//! handled by the FFmpeg source instead.

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use std::path::{Path, PathBuf};

use super::{fit_to_capture, CaptureSettings, FrameSource, SourceStats};
use crate::frame::Frame;

const EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub struct ImageSequenceSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    capture: CaptureSettings,
    cursor: usize,
    frame_count: u64,
    last_error: Option<String>,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path, capture: CaptureSettings) -> Result<Self> {
        let entries =
            std::fs::read_dir(dir).with_context(|| format!("read directory {}", dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && has_image_extension(&path) {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(anyhow!("{} contains no jpg or png frames", dir.display()));
        }
        files.sort();
        log::info!(
            "ImageSequenceSource: {} frames in {}",
            files.len(),
            dir.display()
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            capture,
            cursor: 0,
            frame_count: 0,
            last_error: None,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        let decoded = image::open(path).map_err(|err| {
            self.last_error = Some(err.to_string());
            anyhow!("decode {}: {}", path.display(), err)
        })?;
        let image = fit_to_capture(decoded.into_rgb8(), &self.capture);
        self.frame_count += 1;
        Ok(Some(Frame::new(image, self.frame_count, Local::now())))
    }

    fn is_healthy(&self) -> bool {
        self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.dir.display().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn reads_frames_in_name_order_and_resizes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        RgbImage::from_pixel(32, 24, Rgb([10, 10, 10])).save(dir.path().join("0002.png"))?;
        RgbImage::from_pixel(32, 24, Rgb([200, 200, 200])).save(dir.path().join("0001.png"))?;
        std::fs::write(dir.path().join("notes.txt"), "not a frame")?;

        let capture = CaptureSettings {
            width: 16,
            height: 12,
            fps: 5,
        };
        let mut source = ImageSequenceSource::open(dir.path(), capture)?;
        assert_eq!(source.len(), 2);

        let first = source.next_frame()?.expect("first frame");
        assert_eq!(first.index, 1);
        assert_eq!(first.image().dimensions(), (16, 12));
        assert_eq!(first.image().get_pixel(0, 0).0, [200, 200, 200]);

        let second = source.next_frame()?.expect("second frame");
        assert_eq!(second.index, 2);
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn empty_directory_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(ImageSequenceSource::open(dir.path(), CaptureSettings::default()).is_err());
        Ok(())
    }
}

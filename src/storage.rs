//! Output directories, snapshots and recordings.
//!
//! Layout under the output root:
//!
//! ```text
//! recordings/<YYYY-MM-DD>/intrusion_<HH-MM-SS>/frame_000001.jpg ...
//! reports/intrusion_log.{csv,db}
//! snapshots/<HHMMSS>_ID<n>.jpg
//! ```

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Local};
use image::RgbImage;
use std::path::{Path, PathBuf};

use crate::config::ReportFormat;
use crate::threat::ThreatLevel;
use crate::track::TrackId;
use crate::PerimeterError;

/// The three output directories, created once at startup.
#[derive(Clone, Debug)]
pub struct OutputLayout {
    pub root: PathBuf,
    pub recordings: PathBuf,
    pub reports: PathBuf,
    pub snapshots: PathBuf,
}

impl OutputLayout {
    /// Create (or reuse) the output directories under `root`.
    pub fn init(root: &Path) -> Result<Self> {
        let layout = Self {
            root: root.to_path_buf(),
            recordings: root.join("recordings"),
            reports: root.join("reports"),
            snapshots: root.join("snapshots"),
        };
        for dir in [&layout.recordings, &layout.reports, &layout.snapshots] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create output directory {}", dir.display()))?;
        }
        Ok(layout)
    }

    pub fn report_path(&self, format: ReportFormat) -> PathBuf {
        self.reports.join(format.file_name())
    }

    pub fn snapshot_path(&self, at: DateTime<Local>, track_id: TrackId) -> PathBuf {
        self.snapshots
            .join(format!("{}_ID{}.jpg", at.format("%H%M%S"), track_id))
    }
}

// ---- Snapshots ----

pub trait SnapshotWriter {
    fn save(&mut self, image: &RgbImage, path: &Path) -> Result<()>;
}

/// Writes snapshots as JPEG (format chosen from the extension).
pub struct JpegSnapshotWriter;

impl SnapshotWriter for JpegSnapshotWriter {
    fn save(&mut self, image: &RgbImage, path: &Path) -> Result<()> {
        image
            .save(path)
            .map_err(|err| anyhow!("encode {}: {}", path.display(), err))
    }
}

/// Best-effort snapshot capture for detection events.
pub struct Snapshots {
    layout: OutputLayout,
    writer: Box<dyn SnapshotWriter>,
    min_threat: ThreatLevel,
    failures: u64,
}

impl Snapshots {
    pub fn new(layout: OutputLayout, writer: Box<dyn SnapshotWriter>, min_threat: ThreatLevel) -> Self {
        Self {
            layout,
            writer,
            min_threat,
            failures: 0,
        }
    }

    /// Save `frame` for `track_id`. Returns the written path, or `None` when the threat is
    /// below the configured minimum or the write failed (logged, not propagated).
    pub fn capture(
        &mut self,
        frame: &RgbImage,
        track_id: TrackId,
        threat: ThreatLevel,
        at: DateTime<Local>,
    ) -> Option<PathBuf> {
        if threat < self.min_threat {
            return None;
        }
        let path = self.layout.snapshot_path(at, track_id);
        match self.writer.save(frame, &path) {
            Ok(()) => Some(path),
            Err(err) => {
                self.failures += 1;
                let err = PerimeterError::SnapshotWriteFailure {
                    path: path.display().to_string(),
                    reason: format!("{:#}", err),
                };
                log::warn!("{}", err);
                None
            }
        }
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }
}

// ---- Recording ----

/// Receives every composited record frame of a session.
pub trait RecordingSink {
    fn write(&mut self, frame: &RgbImage) -> Result<()>;

    /// Finish the recording. Must be safe to call more than once.
    fn close(&mut self) -> Result<()>;
}

/// Writes each frame as a numbered JPEG into one session directory.
pub struct FrameSequenceSink {
    dir: PathBuf,
    width: u32,
    height: u32,
    frames: u64,
    closed: bool,
}

impl FrameSequenceSink {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }
}

/// Open `recordings/<YYYY-MM-DD>/intrusion_<HH-MM-SS>/` for a new session.
pub fn open_recording(
    layout: &OutputLayout,
    fps: u32,
    resolution: (u32, u32),
    started_at: DateTime<Local>,
) -> Result<FrameSequenceSink> {
    let dir = layout
        .recordings
        .join(started_at.format("%Y-%m-%d").to_string())
        .join(format!("intrusion_{}", started_at.format("%H-%M-%S")));
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create recording directory {}", dir.display()))?;
    log::info!(
        "recording: {} ({}x{} @ {} fps)",
        dir.display(),
        resolution.0,
        resolution.1,
        fps
    );
    Ok(FrameSequenceSink {
        dir,
        width: resolution.0,
        height: resolution.1,
        frames: 0,
        closed: false,
    })
}

impl RecordingSink for FrameSequenceSink {
    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        if self.closed {
            return Err(anyhow!("recording {} is closed", self.dir.display()));
        }
        if frame.dimensions() != (self.width, self.height) {
            return Err(anyhow!(
                "recording expects {}x{}, got {}x{}",
                self.width,
                self.height,
                frame.width(),
                frame.height()
            ));
        }
        self.frames += 1;
        let path = self.dir.join(format!("frame_{:06}.jpg", self.frames));
        frame
            .save(&path)
            .map_err(|err| anyhow!("write {}: {}", path.display(), err))
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            log::info!(
                "recording: closed {} after {} frames",
                self.dir.display(),
                self.frames
            );
        }
        Ok(())
    }
}

/// Discards frames. Used when recording is disabled.
#[derive(Default)]
pub struct NullSink {
    pub frames: u64,
    pub closed: bool,
}

impl RecordingSink for NullSink {
    fn write(&mut self, _frame: &RgbImage) -> Result<()> {
        self.frames += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use image::Rgb;

    fn fixed_time() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2026, 10, 16, 21, 4, 9)
            .single()
            .expect("unambiguous local time")
    }

    struct BrokenWriter;

    impl SnapshotWriter for BrokenWriter {
        fn save(&mut self, _image: &RgbImage, _path: &Path) -> Result<()> {
            Err(anyhow!("read-only filesystem"))
        }
    }

    #[test]
    fn init_is_idempotent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let first = OutputLayout::init(dir.path())?;
        let second = OutputLayout::init(dir.path())?;
        assert!(first.recordings.is_dir());
        assert!(first.reports.is_dir());
        assert!(first.snapshots.is_dir());
        assert_eq!(first.snapshots, second.snapshots);
        assert_eq!(
            first.report_path(ReportFormat::Csv),
            dir.path().join("reports").join("intrusion_log.csv")
        );
        Ok(())
    }

    #[test]
    fn snapshots_respect_min_threat_and_naming() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = OutputLayout::init(dir.path())?;
        let mut snapshots = Snapshots::new(
            layout.clone(),
            Box::new(JpegSnapshotWriter),
            ThreatLevel::Medium,
        );
        let frame = RgbImage::from_pixel(16, 16, Rgb([1, 2, 3]));

        assert_eq!(snapshots.capture(&frame, 4, ThreatLevel::Low, fixed_time()), None);
        let path = snapshots
            .capture(&frame, 4, ThreatLevel::High, fixed_time())
            .expect("snapshot written");
        assert_eq!(path, layout.snapshots.join("210409_ID4.jpg"));
        assert!(path.is_file());
        Ok(())
    }

    #[test]
    fn snapshot_failure_is_absorbed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = OutputLayout::init(dir.path())?;
        let mut snapshots = Snapshots::new(layout, Box::new(BrokenWriter), ThreatLevel::Low);
        let frame = RgbImage::new(4, 4);
        assert_eq!(snapshots.capture(&frame, 1, ThreatLevel::Critical, fixed_time()), None);
        assert_eq!(snapshots.failures(), 1);
        Ok(())
    }

    #[test]
    fn recording_writes_numbered_frames_and_rejects_after_close() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let layout = OutputLayout::init(dir.path())?;
        let mut sink = open_recording(&layout, 20, (8, 6), fixed_time())?;
        assert!(sink.dir().ends_with("2026-10-16/intrusion_21-04-09"));

        sink.write(&RgbImage::new(8, 6))?;
        sink.write(&RgbImage::new(8, 6))?;
        assert!(sink.write(&RgbImage::new(4, 4)).is_err());
        assert!(sink.dir().join("frame_000002.jpg").is_file());

        sink.close()?;
        sink.close()?;
        assert!(sink.write(&RgbImage::new(8, 6)).is_err());
        assert_eq!(sink.frames_written(), 2);
        Ok(())
    }
}

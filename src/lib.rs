//! Perimeter Watch
//!
//! Perimeter intrusion detection over a live or recorded video stream.
//!
//! # Architecture
//!
//! Every frame flows through one synchronous pipeline:
//!
//! 1. **Ingest**: a `FrameSource` yields RGB frames at the configured resolution.
//! 2. **Segment**: a `MotionSegmenter` turns each frame into foreground `Region`s.
//! 3. **Track**: the `TrackRegistry` binds regions to persistent `Track` identities.
//! 4. **Assess**: an `ObjectClassifier` and the `ThreatPolicy` label every matched track,
//!    and the `FenceMonitor` advances its fence state machine.
//! 5. **Log**: one `DetectionEvent` per matched region lands in the `EventLog`.
//! 6. **Render**: the `CompositeRenderer` projects the result into the operator cockpit.
//!
//! # Module Structure
//!
//! - `ingest`: Frame sources (synthetic, image sequences, FFmpeg, V4L2)
//! - `detect`: Motion segmentation and classification backends
//! - `track`, `threat`, `fence`: Per-frame correlation and assessment
//! - `pipeline`: Headless composition of the stages above
//! - `render`, `fusion`: Operator display
//! - `report`, `storage`: Event reports, snapshots, recordings
//! - `session`: The frame loop that owns everything for one run
//! - Core types: BoundingBox, Region, PerimeterError

use serde::{Deserialize, Serialize};

pub mod config;
pub mod detect;
pub mod fence;
pub mod frame;
pub mod fusion;
pub mod ingest;
pub mod pipeline;
pub mod render;
pub mod report;
pub mod session;
pub mod storage;
pub mod threat;
pub mod track;

pub use config::PerimeterConfig;
pub use detect::{
    BackgroundSegmenter, Classification, ClassifierRegistry, HeuristicClassifier, MotionSegmenter,
    ObjectCategory, ObjectClassifier, RegionFeatures, Segmentation,
};
pub use fence::{FenceLine, FenceMonitor, FenceReport, FenceSide, FenceState};
pub use frame::Frame;
pub use fusion::{fuse, thermal_view, BlendPreset};
pub use ingest::{open_source, CaptureSettings, FrameSource, SourceDescriptor};
pub use pipeline::{FrameOutcome, Pipeline, TrackAnnotation};
pub use render::{Composite, CompositeRenderer, RenderInput};
pub use report::{CsvReportWriter, DetectionEvent, EventLog, ReportWriter, SqliteReportWriter};
pub use session::{
    Control, ControlInput, DisplaySink, Session, SessionSummary, ShutdownFlag, StopReason,
};
pub use storage::{
    open_recording, FrameSequenceSink, JpegSnapshotWriter, OutputLayout, RecordingSink,
    SnapshotWriter, Snapshots,
};
pub use threat::{ThreatLevel, ThreatPolicy};
pub use track::{MatchPolicy, Track, TrackId, TrackRegistry, Trail, TrailPoint};

// -------------------- Regions --------------------

/// Axis-aligned bounding box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Integer center of the box (`x + w/2`, `y + h/2`).
    pub fn centroid(&self) -> Point {
        Point {
            x: self.x + self.width / 2,
            y: self.y + self.height / 2,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A pixel position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: Point) -> f32 {
        let dx = self.x as f32 - other.x as f32;
        let dy = self.y as f32 - other.y as f32;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Candidate foreground object for a single frame. Regions carry no identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub bbox: BoundingBox,
    /// Foreground pixel count of the connected component.
    pub pixel_area: u64,
}

impl Region {
    pub fn new(bbox: BoundingBox, pixel_area: u64) -> Self {
        Self { bbox, pixel_area }
    }

    pub fn centroid(&self) -> Point {
        self.bbox.centroid()
    }
}

// -------------------- Errors --------------------

/// Failures the frame loop distinguishes. Everything else travels as plain `anyhow::Error`.
///
/// End of stream is not an error: sources return `Ok(None)`.
#[derive(Debug)]
pub enum PerimeterError {
    /// The frame source could not be opened. Fatal before the loop starts.
    SourceUnavailable { source: String, reason: String },
    /// A snapshot could not be written. The frame continues without it.
    SnapshotWriteFailure { path: String, reason: String },
    /// The event report could not be persisted at shutdown.
    ReportPersistFailure { path: String, reason: String },
    /// Configuration rejected by validation.
    InvalidConfig(String),
}

impl std::fmt::Display for PerimeterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SourceUnavailable { source, reason } => {
                write!(f, "source unavailable: {} ({})", source, reason)
            }
            Self::SnapshotWriteFailure { path, reason } => {
                write!(f, "snapshot write failed: {} ({})", path, reason)
            }
            Self::ReportPersistFailure { path, reason } => {
                write!(f, "report persist failed: {} ({})", path, reason)
            }
            Self::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for PerimeterError {}

impl PerimeterError {
    pub fn source_unavailable(source: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::SourceUnavailable {
            source: source.into(),
            reason: reason.to_string(),
        }
    }

    /// True when `err` (or anything it wraps) is a `SourceUnavailable`.
    pub fn is_source_unavailable(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<PerimeterError>(),
                Some(PerimeterError::SourceUnavailable { .. })
            )
        })
    }
}

// -------------------- Tests --------------------

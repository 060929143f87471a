use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fence::FenceSide;
use crate::ingest::CaptureSettings;
use crate::threat::ThreatLevel;
use crate::track::MatchPolicy;
use crate::PerimeterError;

const DEFAULT_SOURCE: &str = "stub://perimeter";
const DEFAULT_FENCE_Y: u32 = 260;
const DEFAULT_APPROACH_BAND: u32 = 100;
const DEFAULT_MIN_AREA: u64 = 1500;
const DEFAULT_LOITER_SECS: u64 = 5;
const DEFAULT_FUSION_ALPHA: f32 = 0.7;
const DEFAULT_CLASSIFIER: &str = "heuristic";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 20;
const DEFAULT_MATCH_DISTANCE: f32 = 80.0;
const DEFAULT_MAX_MISSED_FRAMES: u32 = 5;
const DEFAULT_TRAIL_CAPACITY: usize = 20;
const DEFAULT_SEGMENTER_THRESHOLD: u8 = 25;
const DEFAULT_LEARNING_RATE: f32 = 0.02;
const DEFAULT_DISPLAY_EVERY: u32 = 5;

#[derive(Debug, Deserialize, Default)]
struct PerimeterConfigFile {
    source: Option<String>,
    classifier: Option<String>,
    fence: Option<FenceConfigFile>,
    detection: Option<DetectionConfigFile>,
    capture: Option<CaptureConfigFile>,
    output: Option<OutputConfigFile>,
    tracking: Option<TrackingConfigFile>,
    segmenter: Option<SegmenterConfigFile>,
    snapshots: Option<SnapshotConfigFile>,
    display: Option<DisplayConfigFile>,
    report: Option<ReportConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct FenceConfigFile {
    y: Option<u32>,
    approach_band: Option<u32>,
    protected_side: Option<FenceSide>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    min_area: Option<u64>,
    loiter_secs: Option<u64>,
    fusion_alpha: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    root: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    matching: Option<MatchPolicy>,
    match_distance: Option<f32>,
    max_missed_frames: Option<u32>,
    trail_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct SegmenterConfigFile {
    threshold: Option<u8>,
    learning_rate: Option<f32>,
    dilate_radius: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct SnapshotConfigFile {
    enabled: Option<bool>,
    min_threat: Option<ThreatLevel>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    font: Option<PathBuf>,
    path: Option<PathBuf>,
    every_n_frames: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ReportConfigFile {
    format: Option<ReportFormat>,
}

/// Process-wide configuration. Read once at startup, immutable during a run.
#[derive(Debug, Clone)]
pub struct PerimeterConfig {
    /// Source descriptor string (camera index, stream URL, file path or `stub://`).
    pub source: String,
    /// Registered classifier name.
    pub classifier: String,
    pub fence: FenceSettings,
    pub detection: DetectionSettings,
    pub capture: CaptureSettings,
    pub output_root: PathBuf,
    pub tracking: TrackingSettings,
    pub segmenter: SegmenterSettings,
    pub snapshots: SnapshotSettings,
    pub display: DisplaySettings,
    pub report: ReportSettings,
}

#[derive(Debug, Clone)]
pub struct FenceSettings {
    pub y: u32,
    pub approach_band: u32,
    pub protected_side: FenceSide,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    /// Regions with fewer foreground pixels never reach the tracker.
    pub min_area: u64,
    pub loiter: Duration,
    pub fusion_alpha: f32,
}

#[derive(Debug, Clone)]
pub struct TrackingSettings {
    pub matching: MatchPolicy,
    pub match_distance: f32,
    pub max_missed_frames: u32,
    pub trail_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct SegmenterSettings {
    /// Absolute luma difference above which a pixel is foreground.
    pub threshold: u8,
    pub learning_rate: f32,
    pub dilate_radius: u8,
}

#[derive(Debug, Clone)]
pub struct SnapshotSettings {
    pub enabled: bool,
    pub min_threat: ThreatLevel,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    /// TrueType font used for overlay text. Without one, text is skipped.
    pub font: Option<PathBuf>,
    /// File the cockpit view is mirrored to. `None` runs headless.
    pub path: Option<PathBuf>,
    pub every_n_frames: u32,
}

#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub format: ReportFormat,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Csv,
    Sqlite,
}

impl ReportFormat {
    pub fn file_name(&self) -> &'static str {
        match self {
            ReportFormat::Csv => "intrusion_log.csv",
            ReportFormat::Sqlite => "intrusion_log.db",
        }
    }
}

impl Default for PerimeterConfig {
    fn default() -> Self {
        Self::from_file(PerimeterConfigFile::default())
    }
}

impl PerimeterConfig {
    /// Load from the file named by `PIDS_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PIDS_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => PerimeterConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PerimeterConfigFile) -> Self {
        let source = file.source.unwrap_or_else(|| DEFAULT_SOURCE.to_string());
        let classifier = file
            .classifier
            .unwrap_or_else(|| DEFAULT_CLASSIFIER.to_string());
        let fence_file = file.fence.unwrap_or_default();
        let fence = FenceSettings {
            y: fence_file.y.unwrap_or(DEFAULT_FENCE_Y),
            approach_band: fence_file.approach_band.unwrap_or(DEFAULT_APPROACH_BAND),
            protected_side: fence_file.protected_side.unwrap_or_default(),
        };
        let detection_file = file.detection.unwrap_or_default();
        let detection = DetectionSettings {
            min_area: detection_file.min_area.unwrap_or(DEFAULT_MIN_AREA),
            loiter: Duration::from_secs(detection_file.loiter_secs.unwrap_or(DEFAULT_LOITER_SECS)),
            fusion_alpha: detection_file.fusion_alpha.unwrap_or(DEFAULT_FUSION_ALPHA),
        };
        let capture_file = file.capture.unwrap_or_default();
        let capture = CaptureSettings {
            width: capture_file.width.unwrap_or(DEFAULT_WIDTH),
            height: capture_file.height.unwrap_or(DEFAULT_HEIGHT),
            fps: capture_file.fps.unwrap_or(DEFAULT_FPS),
        };
        let output_root = file
            .output
            .and_then(|output| output.root)
            .unwrap_or_else(|| PathBuf::from("."));
        let tracking_file = file.tracking.unwrap_or_default();
        let tracking = TrackingSettings {
            matching: tracking_file.matching.unwrap_or_default(),
            match_distance: tracking_file
                .match_distance
                .unwrap_or(DEFAULT_MATCH_DISTANCE),
            max_missed_frames: tracking_file
                .max_missed_frames
                .unwrap_or(DEFAULT_MAX_MISSED_FRAMES),
            trail_capacity: tracking_file
                .trail_capacity
                .unwrap_or(DEFAULT_TRAIL_CAPACITY),
        };
        let segmenter_file = file.segmenter.unwrap_or_default();
        let segmenter = SegmenterSettings {
            threshold: segmenter_file
                .threshold
                .unwrap_or(DEFAULT_SEGMENTER_THRESHOLD),
            learning_rate: segmenter_file
                .learning_rate
                .unwrap_or(DEFAULT_LEARNING_RATE),
            dilate_radius: segmenter_file.dilate_radius.unwrap_or(0),
        };
        let snapshots_file = file.snapshots.unwrap_or_default();
        let snapshots = SnapshotSettings {
            enabled: snapshots_file.enabled.unwrap_or(true),
            min_threat: snapshots_file.min_threat.unwrap_or(ThreatLevel::Low),
        };
        let display_file = file.display.unwrap_or_default();
        let display = DisplaySettings {
            font: display_file.font,
            path: display_file.path,
            every_n_frames: display_file
                .every_n_frames
                .unwrap_or(DEFAULT_DISPLAY_EVERY),
        };
        let report = ReportSettings {
            format: file
                .report
                .and_then(|report| report.format)
                .unwrap_or_default(),
        };
        Self {
            source,
            classifier,
            fence,
            detection,
            capture,
            output_root,
            tracking,
            segmenter,
            snapshots,
            display,
            report,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("PIDS_SOURCE") {
            if !source.trim().is_empty() {
                self.source = source.trim().to_string();
            }
        }
        if let Ok(fence_y) = std::env::var("PIDS_FENCE_Y") {
            self.fence.y = fence_y
                .trim()
                .parse()
                .map_err(|_| anyhow!("PIDS_FENCE_Y must be an integer pixel row"))?;
        }
        if let Ok(min_area) = std::env::var("PIDS_MIN_AREA") {
            self.detection.min_area = min_area
                .trim()
                .parse()
                .map_err(|_| anyhow!("PIDS_MIN_AREA must be an integer pixel count"))?;
        }
        if let Ok(loiter) = std::env::var("PIDS_LOITER_SECS") {
            let seconds: u64 = loiter
                .trim()
                .parse()
                .map_err(|_| anyhow!("PIDS_LOITER_SECS must be an integer number of seconds"))?;
            self.detection.loiter = Duration::from_secs(seconds);
        }
        if let Ok(alpha) = std::env::var("PIDS_FUSION_ALPHA") {
            self.detection.fusion_alpha = alpha
                .trim()
                .parse()
                .map_err(|_| anyhow!("PIDS_FUSION_ALPHA must be a number between 0 and 1"))?;
        }
        if let Ok(root) = std::env::var("PIDS_OUTPUT_DIR") {
            if !root.trim().is_empty() {
                self.output_root = PathBuf::from(root.trim());
            }
        }
        if let Ok(font) = std::env::var("PIDS_FONT") {
            if !font.trim().is_empty() {
                self.display.font = Some(PathBuf::from(font.trim()));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| -> Result<()> { Err(PerimeterError::InvalidConfig(msg).into()) };

        if self.capture.width == 0 || self.capture.height == 0 {
            return invalid("capture resolution must be non-zero".to_string());
        }
        if self.capture.fps == 0 {
            return invalid("capture fps must be >= 1".to_string());
        }
        if self.fence.y >= self.capture.height {
            return invalid(format!(
                "fence y={} lies outside a {}px tall frame",
                self.fence.y, self.capture.height
            ));
        }
        if self.detection.min_area == 0 {
            return invalid("min_area must be greater than zero".to_string());
        }
        if !(0.0..=1.0).contains(&self.detection.fusion_alpha) {
            return invalid(format!(
                "fusion_alpha {} must be within 0..=1",
                self.detection.fusion_alpha
            ));
        }
        if self.tracking.trail_capacity < 2 {
            return invalid("trail_capacity must hold at least two points".to_string());
        }
        if self.tracking.match_distance <= 0.0 {
            return invalid("match_distance must be positive".to_string());
        }
        if !(self.segmenter.learning_rate > 0.0 && self.segmenter.learning_rate <= 1.0) {
            return invalid("segmenter learning_rate must be within (0, 1]".to_string());
        }
        if self.display.every_n_frames == 0 {
            return invalid("display every_n_frames must be >= 1".to_string());
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<PerimeterConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let cfg = PerimeterConfig::default();
        assert_eq!(cfg.fence.y, 260);
        assert_eq!(cfg.detection.min_area, 1500);
        assert_eq!(cfg.detection.loiter, Duration::from_secs(5));
        assert_eq!(cfg.detection.fusion_alpha, 0.7);
        assert_eq!((cfg.capture.width, cfg.capture.height), (640, 480));
        assert_eq!(cfg.tracking.trail_capacity, 20);
        assert_eq!(cfg.tracking.matching, MatchPolicy::NearestCentroid);
        assert_eq!(cfg.report.format, ReportFormat::Csv);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_fence_outside_frame() {
        let mut cfg = PerimeterConfig::default();
        cfg.fence.y = 480;
        let err = cfg.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PerimeterError>(),
            Some(PerimeterError::InvalidConfig(_))
        ));
    }

    #[test]
    fn validate_rejects_alpha_out_of_range() {
        let mut cfg = PerimeterConfig::default();
        cfg.detection.fusion_alpha = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn toml_file_is_parsed_by_extension() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pids.toml");
        std::fs::write(
            &path,
            r#"
source = "stub://walker"

[fence]
y = 300
protected_side = "above"

[tracking]
matching = "per_region"
"#,
        )?;
        let file = read_config_file(&path)?;
        let cfg = PerimeterConfig::from_file(file);
        assert_eq!(cfg.source, "stub://walker");
        assert_eq!(cfg.fence.y, 300);
        assert_eq!(cfg.fence.protected_side, FenceSide::Above);
        assert_eq!(cfg.tracking.matching, MatchPolicy::PerRegion);
        Ok(())
    }
}

//! Headless per-frame processing.
//!
//! segmentation -> min-area filter -> tracking -> classification and threat scoring ->
//! fence evaluation -> snapshot and event. Rendering consumes the returned annotations
//! and never feeds back into this state.

use anyhow::{Context, Result};

use crate::config::PerimeterConfig;
use crate::detect::{
    BackgroundSegmenter, ClassifierRegistry, MotionSegmenter, ObjectCategory, RegionFeatures,
};
use crate::fence::{FenceLine, FenceMonitor, FenceState};
use crate::frame::Frame;
use crate::report::{DetectionEvent, EventLog};
use crate::storage::Snapshots;
use crate::threat::{ThreatLevel, ThreatPolicy};
use crate::track::{TrackId, TrackRegistry, TrackerSettings};
use crate::{BoundingBox, Point, Region};

/// What the renderer needs to draw one track.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackAnnotation {
    pub track_id: TrackId,
    pub bbox: BoundingBox,
    pub category: ObjectCategory,
    pub color: [u8; 3],
    pub confidence: f32,
    pub threat: ThreatLevel,
    pub fence_state: FenceState,
    pub loitering: bool,
    /// Oldest first.
    pub trail: Vec<Point>,
}

/// Result of processing one frame.
#[derive(Clone, Debug, Default)]
pub struct FrameOutcome {
    pub frame_index: u64,
    /// One per surviving region, in region order.
    pub annotations: Vec<TrackAnnotation>,
    /// Tracks that moved onto the protected side in this frame.
    pub crossings: Vec<TrackId>,
    /// Regions dropped by the area filter.
    pub filtered: usize,
}

impl FrameOutcome {
    pub fn max_threat(&self) -> Option<ThreatLevel> {
        self.annotations.iter().map(|a| a.threat).max()
    }
}

pub struct Pipeline {
    segmenter: Box<dyn MotionSegmenter>,
    classifiers: ClassifierRegistry,
    policy: ThreatPolicy,
    tracks: TrackRegistry,
    fence: FenceMonitor,
    events: EventLog,
    min_area: u64,
    snapshots: Option<Snapshots>,
}

impl Pipeline {
    pub fn new(
        config: &PerimeterConfig,
        segmenter: Box<dyn MotionSegmenter>,
        classifiers: ClassifierRegistry,
    ) -> Self {
        Self {
            segmenter,
            classifiers,
            policy: ThreatPolicy::default(),
            tracks: TrackRegistry::new(TrackerSettings::from(&config.tracking)),
            fence: FenceMonitor::new(FenceLine::from(&config.fence), config.detection.loiter),
            events: EventLog::new(),
            min_area: config.detection.min_area,
            snapshots: None,
        }
    }

    /// Background segmenter plus the built-in classifiers, with the configured default.
    pub fn from_config(config: &PerimeterConfig) -> Result<Self> {
        let mut classifiers = ClassifierRegistry::new();
        classifiers
            .set_default(&config.classifier)
            .context("select classifier")?;
        let segmenter = BackgroundSegmenter::new(config.segmenter.clone());
        Ok(Self::new(config, Box::new(segmenter), classifiers))
    }

    pub fn with_snapshots(mut self, snapshots: Snapshots) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn with_policy(mut self, policy: ThreatPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn process(&mut self, frame: &Frame) -> Result<FrameOutcome> {
        let segmentation = self
            .segmenter
            .apply(frame.image())
            .with_context(|| format!("segment frame {}", frame.index))?;

        let total = segmentation.regions.len();
        let regions: Vec<Region> = segmentation
            .regions
            .into_iter()
            .filter(|r| r.pixel_area >= self.min_area && !r.bbox.is_degenerate())
            .collect();

        let now = frame.captured_at;
        let ids = self.tracks.update(&regions, frame.index, now);
        let (date, time) = DetectionEvent::stamp(now);

        let mut outcome = FrameOutcome {
            frame_index: frame.index,
            filtered: total - regions.len(),
            ..FrameOutcome::default()
        };

        for id in ids {
            let Some(track) = self.tracks.get_mut(id) else {
                continue;
            };
            let speed = track.speed();
            let features = RegionFeatures {
                width: track.bbox.width,
                height: track.bbox.height,
                speed,
            };
            let classification = self.classifiers.classify(&features);
            let distance = self.fence.line().distance(track.centroid());
            let threat = self.policy.score(distance, speed);
            track.classification = Some(classification);
            track.threat = threat;

            let report = self.fence.evaluate(track, now);
            if report.crossed_line {
                log::warn!(
                    "track {} ({}) crossed the fence, threat {}",
                    id,
                    classification.category,
                    threat
                );
                outcome.crossings.push(id);
            }

            let snapshot = self
                .snapshots
                .as_mut()
                .and_then(|s| s.capture(frame.image(), id, threat, now));

            self.events.append(DetectionEvent {
                date: date.clone(),
                time: time.clone(),
                track_id: id,
                category: classification.category,
                threat,
                confidence: classification.confidence,
                fence_state: report.state,
                loitering: report.loitering,
                snapshot: snapshot.map(|p| p.display().to_string()),
            });

            outcome.annotations.push(TrackAnnotation {
                track_id: id,
                bbox: track.bbox,
                category: classification.category,
                color: classification.color,
                confidence: classification.confidence,
                threat,
                fence_state: report.state,
                loitering: report.loitering,
                trail: track.trail.iter().map(|p| p.centroid).collect(),
            });
        }

        Ok(outcome)
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventLog {
        &mut self.events
    }

    pub fn tracks(&self) -> &TrackRegistry {
        &self.tracks
    }

    pub fn fence(&self) -> &FenceMonitor {
        &self.fence
    }

    pub fn classifier_name(&self) -> &str {
        self.classifiers.default_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Segmentation;
    use crate::track::MatchPolicy;
    use chrono::Local;
    use image::{GrayImage, RgbImage};
    use std::collections::VecDeque;

    /// Replays canned region lists, one per frame.
    struct Scripted {
        frames: VecDeque<Vec<Region>>,
    }

    impl MotionSegmenter for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn apply(&mut self, frame: &RgbImage) -> Result<Segmentation> {
            Ok(Segmentation {
                mask: GrayImage::new(frame.width(), frame.height()),
                regions: self.frames.pop_front().unwrap_or_default(),
            })
        }
    }

    fn region(x: u32, y: u32, w: u32, h: u32) -> Region {
        Region::new(BoundingBox::new(x, y, w, h), w as u64 * h as u64)
    }

    fn pipeline(frames: Vec<Vec<Region>>, policy: MatchPolicy) -> Pipeline {
        let mut config = PerimeterConfig::default();
        config.tracking.matching = policy;
        let segmenter = Scripted {
            frames: frames.into(),
        };
        Pipeline::new(&config, Box::new(segmenter), ClassifierRegistry::new())
    }

    fn frame(index: u64) -> Frame {
        Frame::new(RgbImage::new(640, 480), index, Local::now())
    }

    #[test]
    fn small_and_degenerate_regions_are_dropped() -> Result<()> {
        let mut p = pipeline(
            vec![vec![
                region(10, 10, 30, 30),
                region(100, 100, 60, 80),
                Region::new(BoundingBox::new(300, 300, 0, 40), 5000),
            ]],
            MatchPolicy::NearestCentroid,
        );
        let outcome = p.process(&frame(1))?;
        assert_eq!(outcome.annotations.len(), 1);
        assert_eq!(outcome.filtered, 2);
        assert_eq!(outcome.annotations[0].category, ObjectCategory::Human);
        assert_eq!(p.events().len(), 1);
        Ok(())
    }

    #[test]
    fn min_area_is_inclusive() -> Result<()> {
        let mut p = pipeline(
            vec![vec![
                Region::new(BoundingBox::new(10, 10, 50, 30), 1500),
                Region::new(BoundingBox::new(300, 10, 50, 30), 1499),
            ]],
            MatchPolicy::PerRegion,
        );
        let outcome = p.process(&frame(1))?;
        assert_eq!(outcome.filtered, 1);
        assert_eq!(outcome.annotations.len(), 1);
        assert_eq!(outcome.annotations[0].bbox.x, 10);
        assert_eq!(p.events().len(), 1);
        Ok(())
    }

    #[test]
    fn region_first_seen_past_the_fence_is_not_a_crossing() -> Result<()> {
        let frames = vec![vec![region(200, 380, 100, 40)], vec![region(200, 384, 100, 40)]];
        let mut p = pipeline(frames, MatchPolicy::NearestCentroid);
        let first = p.process(&frame(1))?;
        assert_eq!(first.annotations[0].fence_state, FenceState::Crossed);
        assert!(first.crossings.is_empty());
        assert!(p.process(&frame(2))?.crossings.is_empty());
        Ok(())
    }

    #[test]
    fn per_region_mode_mints_one_track_and_one_event_per_region() -> Result<()> {
        let frames = vec![
            vec![region(10, 10, 50, 40), region(300, 10, 50, 40)],
            vec![region(12, 12, 50, 40), region(302, 12, 50, 40)],
        ];
        let mut p = pipeline(frames, MatchPolicy::PerRegion);
        let first = p.process(&frame(1))?;
        let second = p.process(&frame(2))?;

        let ids: Vec<TrackId> = first
            .annotations
            .iter()
            .chain(second.annotations.iter())
            .map(|a| a.track_id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(p.events().len(), 4);
        Ok(())
    }

    #[test]
    fn nearest_centroid_keeps_identity_and_scores_speed() -> Result<()> {
        // 100x50 blob stepping 30 px/frame towards the fence at 260.
        let frames = (0..4).map(|k| vec![region(200, 150 + 30 * k, 100, 50)]).collect();
        let mut p = pipeline(frames, MatchPolicy::NearestCentroid);

        let mut threats = Vec::new();
        let mut states = Vec::new();
        for index in 1..=4 {
            let outcome = p.process(&frame(index))?;
            assert_eq!(outcome.annotations.len(), 1);
            assert_eq!(outcome.annotations[0].track_id, 1);
            threats.push(outcome.annotations[0].threat);
            states.push(outcome.annotations[0].fence_state);
        }
        // centroids 175, 205, 235, 265
        assert_eq!(
            threats,
            vec![
                ThreatLevel::High,
                ThreatLevel::High,
                ThreatLevel::Critical,
                ThreatLevel::Critical
            ]
        );
        assert_eq!(states[3], FenceState::Crossed);
        assert_eq!(p.tracks().len(), 1);
        Ok(())
    }

    #[test]
    fn crossing_is_reported_once() -> Result<()> {
        let frames = vec![
            vec![region(200, 200, 100, 50)],
            vec![region(200, 240, 100, 50)],
            vec![region(200, 250, 100, 50)],
        ];
        let mut p = pipeline(frames, MatchPolicy::NearestCentroid);
        assert!(p.process(&frame(1))?.crossings.is_empty());
        assert_eq!(p.process(&frame(2))?.crossings, vec![1]);
        assert!(p.process(&frame(3))?.crossings.is_empty());
        Ok(())
    }
}

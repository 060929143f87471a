//! Virtual fence state machine.
//!
//! Each live track sits in one of three bands relative to the fence line:
//! `Outside` (far), `Approaching` (within `approach_band` pixels) or `Crossed`
//! (on the protected side of the line). Time spent in a non-`Outside` band beyond the
//! loiter duration marks the track as loitering. Tracks may move back and forth
//! between bands; nothing is terminal.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::track::Track;
use crate::Point;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FenceState {
    Outside,
    Approaching,
    Crossed,
}

impl FenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FenceState::Outside => "OUTSIDE",
            FenceState::Approaching => "APPROACHING",
            FenceState::Crossed => "CROSSED",
        }
    }
}

impl std::fmt::Display for FenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of the line is the protected area.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FenceSide {
    /// Rows at or below the line (moving down the frame crosses it).
    #[default]
    Below,
    Above,
}

/// Horizontal fence line in image space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FenceLine {
    pub y: u32,
    pub approach_band: u32,
    pub protected_side: FenceSide,
}

impl FenceLine {
    pub fn new(y: u32) -> Self {
        Self {
            y,
            approach_band: 100,
            protected_side: FenceSide::Below,
        }
    }

    /// Absolute vertical offset from the line.
    pub fn distance(&self, point: Point) -> f32 {
        (self.y as f32 - point.y as f32).abs()
    }

    pub fn is_protected(&self, point: Point) -> bool {
        match self.protected_side {
            FenceSide::Below => point.y >= self.y,
            FenceSide::Above => point.y <= self.y,
        }
    }

    pub fn classify(&self, point: Point) -> FenceState {
        if self.is_protected(point) {
            FenceState::Crossed
        } else if self.distance(point) < self.approach_band as f32 {
            FenceState::Approaching
        } else {
            FenceState::Outside
        }
    }
}

impl From<&crate::config::FenceSettings> for FenceLine {
    fn from(cfg: &crate::config::FenceSettings) -> Self {
        Self {
            y: cfg.y,
            approach_band: cfg.approach_band,
            protected_side: cfg.protected_side,
        }
    }
}

/// Current fence state of a track and when it was entered.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FenceStatus {
    pub state: FenceState,
    pub entered_at: DateTime<Local>,
}

impl FenceStatus {
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            state: FenceState::Outside,
            entered_at: now,
        }
    }
}

/// Result of one fence evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FenceReport {
    pub previous: FenceState,
    pub state: FenceState,
    pub changed: bool,
    /// The track moved onto the protected side this frame, having been seen off it before.
    pub crossed_line: bool,
    pub loitering: bool,
}

pub struct FenceMonitor {
    line: FenceLine,
    loiter: Duration,
}

impl FenceMonitor {
    pub fn new(line: FenceLine, loiter: Duration) -> Self {
        Self { line, loiter }
    }

    pub fn line(&self) -> &FenceLine {
        &self.line
    }

    /// Advance the track's fence state for this frame.
    pub fn evaluate(&self, track: &mut Track, now: DateTime<Local>) -> FenceReport {
        let previous = track.fence.state;
        let state = self.line.classify(track.centroid());
        let changed = state != previous;
        if changed {
            track.fence.state = state;
            track.fence.entered_at = now;
            log::debug!("track {} fence {} -> {}", track.id, previous, state);
        }

        let loitering = state != FenceState::Outside
            && (now - track.fence.entered_at)
                .to_std()
                .is_ok_and(|dwell| dwell > self.loiter);

        FenceReport {
            previous,
            state,
            changed,
            // A track minted on the protected side was never observed outside.
            crossed_line: changed && state == FenceState::Crossed && track.trail.len() > 1,
            loitering,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{TrackRegistry, TrackerSettings};
    use crate::{BoundingBox, Region};
    use chrono::TimeDelta;

    fn monitor() -> FenceMonitor {
        FenceMonitor::new(FenceLine::new(260), Duration::from_secs(5))
    }

    fn track_at(registry: &mut TrackRegistry, cy: u32, frame: u64, now: DateTime<Local>) -> u64 {
        let region = Region::new(BoundingBox::new(100, cy - 10, 20, 20), 400);
        registry.update(&[region], frame, now)[0]
    }

    #[test]
    fn bands_follow_distance() {
        let line = FenceLine::new(260);
        assert_eq!(line.classify(Point::new(0, 100)), FenceState::Outside);
        // Exactly one band width away is still outside.
        assert_eq!(line.classify(Point::new(0, 160)), FenceState::Outside);
        assert_eq!(line.classify(Point::new(0, 161)), FenceState::Approaching);
        assert_eq!(line.classify(Point::new(0, 260)), FenceState::Crossed);
        assert_eq!(line.classify(Point::new(0, 400)), FenceState::Crossed);
        assert_eq!(line.distance(Point::new(0, 300)), 40.0);
    }

    #[test]
    fn track_first_seen_inside_is_not_a_crossing() {
        let monitor = monitor();
        let mut registry = TrackRegistry::new(TrackerSettings::default());
        let t0 = Local::now();

        let id = track_at(&mut registry, 400, 1, t0);
        let report = monitor.evaluate(registry.get_mut(id).expect("track"), t0);
        assert_eq!(report.state, FenceState::Crossed);
        assert!(report.changed);
        assert!(!report.crossed_line);

        let t1 = t0 + TimeDelta::seconds(1);
        let id = track_at(&mut registry, 405, 2, t1);
        let report = monitor.evaluate(registry.get_mut(id).expect("track"), t1);
        assert_eq!(report.state, FenceState::Crossed);
        assert!(!report.crossed_line);
    }

    #[test]
    fn protected_side_above() {
        let line = FenceLine {
            protected_side: FenceSide::Above,
            ..FenceLine::new(260)
        };
        assert_eq!(line.classify(Point::new(0, 100)), FenceState::Crossed);
        assert_eq!(line.classify(Point::new(0, 300)), FenceState::Approaching);
        assert_eq!(line.classify(Point::new(0, 470)), FenceState::Outside);
    }

    #[test]
    fn crossing_and_loitering() {
        let monitor = monitor();
        let mut registry = TrackRegistry::new(TrackerSettings::default());
        let t0 = Local::now();

        let id = track_at(&mut registry, 100, 1, t0);
        let track = registry.get_mut(id).expect("track");
        let report = monitor.evaluate(track, t0);
        assert_eq!(report.state, FenceState::Outside);
        assert!(!report.changed);

        let t1 = t0 + TimeDelta::seconds(1);
        let id = track_at(&mut registry, 170, 2, t1);
        let report = monitor.evaluate(registry.get_mut(id).expect("track"), t1);
        assert_eq!(report.state, FenceState::Approaching);
        assert!(report.changed);
        assert!(!report.loitering);

        let t2 = t0 + TimeDelta::seconds(2);
        let id = track_at(&mut registry, 230, 3, t2);
        let report = monitor.evaluate(registry.get_mut(id).expect("track"), t2);
        assert_eq!(report.state, FenceState::Approaching);
        assert!(!report.changed);

        let t3 = t0 + TimeDelta::seconds(3);
        let id = track_at(&mut registry, 270, 4, t3);
        let report = monitor.evaluate(registry.get_mut(id).expect("track"), t3);
        assert_eq!(report.previous, FenceState::Approaching);
        assert_eq!(report.state, FenceState::Crossed);
        assert!(report.crossed_line);
        assert!(!report.loitering);

        // Stays on the protected side past the loiter duration.
        let t9 = t3 + TimeDelta::seconds(6);
        let id = track_at(&mut registry, 275, 5, t9);
        let report = monitor.evaluate(registry.get_mut(id).expect("track"), t9);
        assert_eq!(report.state, FenceState::Crossed);
        assert!(!report.crossed_line);
        assert!(report.loitering);

        // Walking back out resets the dwell clock.
        let t10 = t9 + TimeDelta::seconds(1);
        let id = track_at(&mut registry, 240, 6, t10);
        let report = monitor.evaluate(registry.get_mut(id).expect("track"), t10);
        assert_eq!(report.state, FenceState::Approaching);
        assert!(!report.loitering);
    }
}

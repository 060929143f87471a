//! Persistent object tracks.
//!
//! `TrackRegistry` owns the identity counter and the live track table. Each frame it
//! binds the frame's regions to tracks, either by minting a fresh track per region
//! (`MatchPolicy::PerRegion`) or by greedy nearest-centroid matching with a grace
//! period for missed frames (`MatchPolicy::NearestCentroid`).

use chrono::{DateTime, Local};
use serde::Deserialize;
use std::collections::{BTreeMap, VecDeque};

use crate::detect::Classification;
use crate::fence::FenceStatus;
use crate::threat::ThreatLevel;
use crate::{BoundingBox, Point, Region};

/// Track identity. Minted in increasing order from 1, never reused within a process.
pub type TrackId = u64;

/// How regions are bound to tracks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Every region is a new object. No cross-frame correlation.
    PerRegion,
    /// Greedy nearest-centroid assignment within `match_distance`.
    #[default]
    NearestCentroid,
}

/// One observation on a track's path.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrailPoint {
    pub centroid: Point,
    pub frame_index: u64,
    pub timestamp: DateTime<Local>,
}

/// Bounded FIFO of recent centroids.
#[derive(Clone, Debug)]
pub struct Trail {
    points: VecDeque<TrailPoint>,
    capacity: usize,
}

impl Trail {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a point, evicting the oldest when full.
    pub fn push(&mut self, point: TrailPoint) {
        while self.points.len() >= self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&TrailPoint> {
        self.points.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrailPoint> + '_ {
        self.points.iter()
    }

    /// Pixels per frame between the two most recent points. Zero with fewer than two.
    pub fn speed(&self) -> f32 {
        let n = self.points.len();
        if n < 2 {
            return 0.0;
        }
        let last = &self.points[n - 1];
        let prev = &self.points[n - 2];
        let frames = last.frame_index.saturating_sub(prev.frame_index).max(1);
        last.centroid.distance_to(prev.centroid) / frames as f32
    }
}

/// A persistent object hypothesis spanning multiple frames.
#[derive(Clone, Debug)]
pub struct Track {
    pub id: TrackId,
    pub bbox: BoundingBox,
    pub trail: Trail,
    pub created_at: DateTime<Local>,
    pub last_seen: DateTime<Local>,
    /// Set by the pipeline each frame the track is matched.
    pub classification: Option<Classification>,
    pub threat: ThreatLevel,
    pub fence: FenceStatus,
    /// Consecutive frames without a matching region.
    pub missed_frames: u32,
}

impl Track {
    fn new(id: TrackId, region: &Region, trail_capacity: usize, frame_index: u64, now: DateTime<Local>) -> Self {
        let mut trail = Trail::new(trail_capacity);
        trail.push(TrailPoint {
            centroid: region.centroid(),
            frame_index,
            timestamp: now,
        });
        Self {
            id,
            bbox: region.bbox,
            trail,
            created_at: now,
            last_seen: now,
            classification: None,
            threat: ThreatLevel::Low,
            fence: FenceStatus::new(now),
            missed_frames: 0,
        }
    }

    fn observe(&mut self, region: &Region, frame_index: u64, now: DateTime<Local>) {
        self.bbox = region.bbox;
        self.last_seen = now;
        self.missed_frames = 0;
        self.trail.push(TrailPoint {
            centroid: region.centroid(),
            frame_index,
            timestamp: now,
        });
    }

    pub fn centroid(&self) -> Point {
        self.bbox.centroid()
    }

    pub fn speed(&self) -> f32 {
        self.trail.speed()
    }
}

/// Matching parameters for `TrackRegistry`.
#[derive(Clone, Copy, Debug)]
pub struct TrackerSettings {
    pub policy: MatchPolicy,
    pub match_distance: f32,
    pub max_missed_frames: u32,
    pub trail_capacity: usize,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            policy: MatchPolicy::NearestCentroid,
            match_distance: 80.0,
            max_missed_frames: 5,
            trail_capacity: 20,
        }
    }
}

impl From<&crate::config::TrackingSettings> for TrackerSettings {
    fn from(cfg: &crate::config::TrackingSettings) -> Self {
        Self {
            policy: cfg.matching,
            match_distance: cfg.match_distance,
            max_missed_frames: cfg.max_missed_frames,
            trail_capacity: cfg.trail_capacity,
        }
    }
}

/// Owner of the live track table and the identity counter.
pub struct TrackRegistry {
    settings: TrackerSettings,
    tracks: BTreeMap<TrackId, Track>,
    next_id: TrackId,
    retired: u64,
}

impl TrackRegistry {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            settings,
            tracks: BTreeMap::new(),
            next_id: 1,
            retired: 0,
        }
    }

    /// Bind this frame's regions to tracks.
    ///
    /// Returns one track id per region, in region order. Regions must already have
    /// passed the minimum-area filter. Unmatched tracks age by one frame and are
    /// retired once they exceed the grace period.
    pub fn update(
        &mut self,
        regions: &[Region],
        frame_index: u64,
        now: DateTime<Local>,
    ) -> Vec<TrackId> {
        let mut assigned: Vec<Option<TrackId>> = vec![None; regions.len()];

        if self.settings.policy == MatchPolicy::NearestCentroid {
            let mut pairs: Vec<(usize, TrackId, f32)> = Vec::new();
            for (ri, region) in regions.iter().enumerate() {
                let centroid = region.centroid();
                for (id, track) in &self.tracks {
                    let distance = track.centroid().distance_to(centroid);
                    if distance <= self.settings.match_distance {
                        pairs.push((ri, *id, distance));
                    }
                }
            }
            pairs.sort_by(|a, b| {
                a.2.total_cmp(&b.2)
                    .then(a.1.cmp(&b.1))
                    .then(a.0.cmp(&b.0))
            });

            let mut claimed: Vec<TrackId> = Vec::new();
            for (ri, id, _distance) in pairs {
                if assigned[ri].is_some() || claimed.contains(&id) {
                    continue;
                }
                if let Some(track) = self.tracks.get_mut(&id) {
                    track.observe(&regions[ri], frame_index, now);
                    assigned[ri] = Some(id);
                    claimed.push(id);
                }
            }
        }

        let mut ids = Vec::with_capacity(regions.len());
        let mut touched: Vec<TrackId> = assigned.iter().flatten().copied().collect();
        for (region, slot) in regions.iter().zip(assigned) {
            let id = match slot {
                Some(id) => id,
                None => {
                    let id = self.mint_id();
                    let track = Track::new(id, region, self.settings.trail_capacity, frame_index, now);
                    self.tracks.insert(id, track);
                    touched.push(id);
                    id
                }
            };
            ids.push(id);
        }

        self.age_unmatched(&touched);
        ids
    }

    fn mint_id(&mut self) -> TrackId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn age_unmatched(&mut self, touched: &[TrackId]) {
        let max_missed = self.settings.max_missed_frames;
        let mut expired = Vec::new();
        for (id, track) in self.tracks.iter_mut() {
            if touched.contains(id) {
                continue;
            }
            track.missed_frames += 1;
            if track.missed_frames > max_missed {
                expired.push(*id);
            }
        }
        for id in expired {
            self.tracks.remove(&id);
            self.retired += 1;
            log::debug!("track {} retired after {} missed frames", id, max_missed + 1);
        }
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn get_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.get_mut(&id)
    }

    /// Live tracks in identity order.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> + '_ {
        self.tracks.values()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Total tracks retired since the registry was created.
    pub fn retired(&self) -> u64 {
        self.retired
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x: u32, y: u32, w: u32, h: u32) -> Region {
        Region::new(BoundingBox::new(x, y, w, h), w as u64 * h as u64)
    }

    fn point(i: u32) -> TrailPoint {
        TrailPoint {
            centroid: Point::new(i, i),
            frame_index: i as u64,
            timestamp: Local::now(),
        }
    }

    fn registry(policy: MatchPolicy) -> TrackRegistry {
        TrackRegistry::new(TrackerSettings {
            policy,
            ..TrackerSettings::default()
        })
    }

    #[test]
    fn trail_evicts_oldest_at_capacity() {
        let mut trail = Trail::new(20);
        for i in 0..21 {
            trail.push(point(i));
        }
        assert_eq!(trail.len(), 20);
        assert!(trail.iter().all(|p| p.centroid != Point::new(0, 0)));
        assert_eq!(trail.iter().next().map(|p| p.centroid), Some(Point::new(1, 1)));
        assert_eq!(trail.latest().map(|p| p.centroid), Some(Point::new(20, 20)));
    }

    #[test]
    fn speed_needs_two_points() {
        let mut trail = Trail::new(4);
        assert_eq!(trail.speed(), 0.0);
        trail.push(TrailPoint {
            centroid: Point::new(0, 0),
            frame_index: 1,
            timestamp: Local::now(),
        });
        assert_eq!(trail.speed(), 0.0);
        trail.push(TrailPoint {
            centroid: Point::new(0, 30),
            frame_index: 3,
            timestamp: Local::now(),
        });
        assert_eq!(trail.speed(), 15.0);
    }

    #[test]
    fn per_region_mints_new_identity_every_time() {
        let mut reg = registry(MatchPolicy::PerRegion);
        let now = Local::now();
        let first = reg.update(&[region(10, 10, 50, 50), region(200, 10, 50, 50)], 1, now);
        assert_eq!(first, vec![1, 2]);
        let second = reg.update(&[region(12, 10, 50, 50)], 2, now);
        assert_eq!(second, vec![3]);
        assert_eq!(reg.get(3).map(|t| t.trail.len()), Some(1));
    }

    #[test]
    fn nearest_centroid_keeps_identity() {
        let mut reg = registry(MatchPolicy::NearestCentroid);
        let now = Local::now();
        let ids: Vec<TrackId> = (0..5)
            .flat_map(|i| reg.update(&[region(100, 20 + i * 20, 40, 40)], i as u64 + 1, now))
            .collect();
        assert_eq!(ids, vec![1, 1, 1, 1, 1]);
        let track = reg.get(1).expect("live track");
        assert_eq!(track.trail.len(), 5);
        assert_eq!(track.speed(), 20.0);
    }

    #[test]
    fn closest_pair_wins() {
        let mut reg = registry(MatchPolicy::NearestCentroid);
        let now = Local::now();
        reg.update(&[region(0, 0, 20, 20), region(100, 0, 20, 20)], 1, now);
        // Both regions are within range of track 1; the closer one takes it.
        let ids = reg.update(&[region(50, 0, 20, 20), region(5, 0, 20, 20)], 2, now);
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn far_region_starts_new_track() {
        let mut reg = registry(MatchPolicy::NearestCentroid);
        let now = Local::now();
        reg.update(&[region(0, 0, 20, 20)], 1, now);
        let ids = reg.update(&[region(400, 400, 20, 20)], 2, now);
        assert_eq!(ids, vec![2]);
        assert_eq!(reg.get(1).map(|t| t.missed_frames), Some(1));
    }

    #[test]
    fn grace_period_then_retire() {
        let mut reg = TrackRegistry::new(TrackerSettings {
            max_missed_frames: 2,
            ..TrackerSettings::default()
        });
        let now = Local::now();
        reg.update(&[region(0, 0, 20, 20)], 1, now);
        reg.update(&[], 2, now);
        reg.update(&[], 3, now);
        assert!(reg.get(1).is_some());
        // Reappearing inside the grace period resumes the same identity.
        assert_eq!(reg.update(&[region(4, 0, 20, 20)], 4, now), vec![1]);
        reg.update(&[], 5, now);
        reg.update(&[], 6, now);
        reg.update(&[], 7, now);
        assert!(reg.get(1).is_none());
        assert_eq!(reg.retired(), 1);
        // Ids are never reused after retirement.
        assert_eq!(reg.update(&[region(0, 0, 20, 20)], 8, now), vec![2]);
    }
}

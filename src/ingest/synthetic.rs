//! Synthetic scene source (`stub://<scene>`).
//!
//! Renders solid rectangles ("actors") moving in straight lines over a static
//! background. Frame timestamps advance by exactly one frame period per frame, so runs
//! are reproducible regardless of wall-clock speed.

use anyhow::Result;
use chrono::{DateTime, Local, TimeDelta};
use image::{Rgb, RgbImage};

use super::{CaptureSettings, FrameSource, SourceStats};
use crate::frame::Frame;

/// A rectangle moving at constant velocity.
#[derive(Clone, Debug)]
pub struct Actor {
    pub width: u32,
    pub height: u32,
    /// Top-left corner in the first frame the actor is visible.
    pub start: (i64, i64),
    /// Displacement per frame.
    pub step: (i64, i64),
    pub color: [u8; 3],
    /// First frame index (1-based) the actor is visible in.
    pub appears_at: u64,
    /// Number of frames the actor stays visible; `None` keeps it forever.
    pub lifetime: Option<u64>,
}

impl Actor {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            start: (0, 0),
            step: (0, 0),
            color: [230, 230, 230],
            appears_at: 1,
            lifetime: None,
        }
    }

    pub fn starting_at(mut self, x: i64, y: i64) -> Self {
        self.start = (x, y);
        self
    }

    pub fn moving(mut self, dx: i64, dy: i64) -> Self {
        self.step = (dx, dy);
        self
    }

    pub fn colored(mut self, color: [u8; 3]) -> Self {
        self.color = color;
        self
    }

    pub fn visible(mut self, appears_at: u64, lifetime: u64) -> Self {
        self.appears_at = appears_at.max(1);
        self.lifetime = Some(lifetime);
        self
    }

    /// Top-left corner at `index`, or `None` if not visible then.
    fn position(&self, index: u64) -> Option<(i64, i64)> {
        if index < self.appears_at {
            return None;
        }
        let age = index - self.appears_at;
        if self.lifetime.is_some_and(|lifetime| age >= lifetime) {
            return None;
        }
        let age = age as i64;
        Some((
            self.start.0 + self.step.0 * age,
            self.start.1 + self.step.1 * age,
        ))
    }
}

/// Background plus actors.
#[derive(Clone, Debug)]
pub struct SyntheticScene {
    pub width: u32,
    pub height: u32,
    pub background: [u8; 3],
    pub actors: Vec<Actor>,
    /// Total frames before end of stream; `None` never ends.
    pub length: Option<u64>,
    /// Replay the scene every `cycle` frames.
    pub cycle: Option<u64>,
}

impl SyntheticScene {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            background: [40, 60, 40],
            actors: Vec::new(),
            length: None,
            cycle: None,
        }
    }

    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.actors.push(actor);
        self
    }

    pub fn with_length(mut self, frames: u64) -> Self {
        self.length = Some(frames);
        self
    }

    pub fn with_cycle(mut self, frames: u64) -> Self {
        self.cycle = Some(frames.max(1));
        self
    }

    /// Built-in scenes: `perimeter` (a walker heading for the fence plus a small animal
    /// crossing the yard, looping) and `empty` (background only).
    pub fn named(name: &str, capture: &CaptureSettings) -> Option<Self> {
        let (w, h) = (capture.width as i64, capture.height as i64);
        match name {
            "" | "perimeter" => {
                let walker = Actor::new(60, 90)
                    .starting_at(w / 2 - 30, 0)
                    .moving(0, (h / 60).max(1))
                    .colored([210, 200, 190])
                    .visible(5, 70);
                let animal = Actor::new(40, 40)
                    .starting_at(0, h / 4)
                    .moving((w / 50).max(1), 0)
                    .colored([150, 110, 70])
                    .visible(20, 50);
                Some(
                    Self::new(capture.width, capture.height)
                        .with_actor(walker)
                        .with_actor(animal)
                        .with_cycle(90),
                )
            }
            "empty" => Some(Self::new(capture.width, capture.height)),
            _ => None,
        }
    }

    pub fn render(&self, index: u64) -> RgbImage {
        let local = match self.cycle {
            Some(cycle) => (index.saturating_sub(1) % cycle) + 1,
            None => index,
        };
        let mut image = RgbImage::from_pixel(self.width, self.height, Rgb(self.background));
        for actor in &self.actors {
            if let Some((x, y)) = actor.position(local) {
                fill_clipped(&mut image, x, y, actor.width, actor.height, actor.color);
            }
        }
        image
    }
}

fn fill_clipped(image: &mut RgbImage, x: i64, y: i64, w: u32, h: u32, color: [u8; 3]) {
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + w as i64).min(image.width() as i64);
    let y1 = (y + h as i64).min(image.height() as i64);
    for py in y0..y1 {
        for px in x0..x1 {
            image.put_pixel(px as u32, py as u32, Rgb(color));
        }
    }
}

pub struct SyntheticSource {
    scene: SyntheticScene,
    period_ms: i64,
    started_at: DateTime<Local>,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(scene: SyntheticScene, fps: u32) -> Self {
        Self::starting_at(scene, fps, Local::now())
    }

    pub fn starting_at(scene: SyntheticScene, fps: u32, started_at: DateTime<Local>) -> Self {
        let period_ms = 1000 / i64::from(fps.max(1));
        Self {
            scene,
            period_ms,
            started_at,
            frame_count: 0,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.scene.length.is_some_and(|len| self.frame_count >= len) {
            return Ok(None);
        }
        self.frame_count += 1;
        let index = self.frame_count;
        let captured_at =
            self.started_at + TimeDelta::milliseconds(self.period_ms * (index as i64 - 1));
        Ok(Some(Frame::new(self.scene.render(index), index, captured_at)))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: "stub://synthetic".to_string(),
        }
    }
}

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::Region;

/// Output of one segmentation pass.
#[derive(Clone, Debug)]
pub struct Segmentation {
    /// Binary foreground mask (0 or 255), same size as the input frame.
    pub mask: GrayImage,
    /// Connected foreground components, in raster order of their first pixel.
    pub regions: Vec<Region>,
}

impl Segmentation {
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            mask: GrayImage::new(width, height),
            regions: Vec::new(),
        }
    }
}

/// Geometric features handed to a classifier.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegionFeatures {
    pub width: u32,
    pub height: u32,
    /// Estimated speed in pixels per frame (0 when unknown).
    pub speed: f32,
}

impl RegionFeatures {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectCategory {
    Animal,
    Human,
    Vehicle,
}

impl ObjectCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectCategory::Animal => "Animal",
            ObjectCategory::Human => "Human",
            ObjectCategory::Vehicle => "Vehicle",
        }
    }
}

impl std::fmt::Display for ObjectCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier verdict for one region.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Classification {
    pub category: ObjectCategory,
    /// RGB overlay color.
    pub color: [u8; 3],
    /// 0..=1
    pub confidence: f32,
}

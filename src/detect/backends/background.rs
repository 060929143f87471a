use anyhow::{anyhow, Result};
use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::region_labelling::{connected_components, Connectivity};
use std::collections::BTreeMap;

use crate::config::SegmenterSettings;
use crate::detect::backend::MotionSegmenter;
use crate::detect::result::Segmentation;
use crate::{BoundingBox, Region};

/// Running-average background subtractor over luma.
///
/// The first frame seeds the model and yields no regions. Afterwards a pixel is
/// foreground when it differs from the background by more than `threshold`. Only
/// background pixels are blended into the model, so a moving object leaves no ghost.
pub struct BackgroundSegmenter {
    settings: SegmenterSettings,
    background: Option<Vec<f32>>,
    frames_seen: u64,
}

impl BackgroundSegmenter {
    pub fn new(settings: SegmenterSettings) -> Self {
        Self {
            settings,
            background: None,
            frames_seen: 0,
        }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl MotionSegmenter for BackgroundSegmenter {
    fn name(&self) -> &'static str {
        "background"
    }

    fn apply(&mut self, frame: &RgbImage) -> Result<Segmentation> {
        self.frames_seen += 1;
        let luma = image::imageops::grayscale(frame);
        let (width, height) = luma.dimensions();
        let expected = (width as usize) * (height as usize);

        let needs_seed = self
            .background
            .as_ref()
            .map_or(true, |background| background.len() != expected);
        if needs_seed {
            self.background = Some(luma.pixels().map(|p| p.0[0] as f32).collect());
            return Ok(Segmentation::empty(width, height));
        }
        let Some(background) = self.background.as_mut() else {
            return Ok(Segmentation::empty(width, height));
        };

        let threshold = self.settings.threshold as f32;
        let rate = self.settings.learning_rate;
        let mut mask_raw = vec![0u8; expected];
        for ((pixel, model), out) in luma
            .pixels()
            .zip(background.iter_mut())
            .zip(mask_raw.iter_mut())
        {
            let value = pixel.0[0] as f32;
            if (value - *model).abs() > threshold {
                *out = 255;
            } else {
                *model += rate * (value - *model);
            }
        }

        let mut mask = GrayImage::from_raw(width, height, mask_raw)
            .ok_or_else(|| anyhow!("foreground mask does not match {}x{}", width, height))?;
        if self.settings.dilate_radius > 0 {
            mask = imageproc::morphology::dilate(&mask, Norm::LInf, self.settings.dilate_radius);
        }

        let regions = label_regions(&mask);
        Ok(Segmentation { mask, regions })
    }

    fn reset(&mut self) {
        self.background = None;
    }
}

#[derive(Clone, Copy)]
struct ComponentBounds {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    pixels: u64,
}

/// Bounding boxes and pixel counts of the 8-connected foreground components.
fn label_regions(mask: &GrayImage) -> Vec<Region> {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
    let mut components: BTreeMap<u32, ComponentBounds> = BTreeMap::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label.0[0];
        if label == 0 {
            continue;
        }
        components
            .entry(label)
            .and_modify(|bounds| {
                bounds.min_x = bounds.min_x.min(x);
                bounds.min_y = bounds.min_y.min(y);
                bounds.max_x = bounds.max_x.max(x);
                bounds.max_y = bounds.max_y.max(y);
                bounds.pixels += 1;
            })
            .or_insert(ComponentBounds {
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
                pixels: 1,
            });
    }
    components
        .into_values()
        .map(|bounds| {
            Region::new(
                BoundingBox::new(
                    bounds.min_x,
                    bounds.min_y,
                    bounds.max_x - bounds.min_x + 1,
                    bounds.max_y - bounds.min_y + 1,
                ),
                bounds.pixels,
            )
        })
        .collect()
}

use anyhow::Result;
use image::RgbImage;

use crate::detect::result::{Classification, RegionFeatures, Segmentation};

/// Motion segmentation backend.
///
/// Implementations keep their own background model across calls. The pipeline only
/// sees the resulting mask and regions; it never inspects backend state.
pub trait MotionSegmenter {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Segment one frame into foreground regions.
    ///
    /// Frames arrive in stream order. Regions are reported unfiltered; the minimum-area
    /// filter is applied by the caller.
    fn apply(&mut self, frame: &RgbImage) -> Result<Segmentation>;

    /// Drop any learned background, e.g. after the source jumps.
    fn reset(&mut self) {}
}

/// Object classifier capability.
///
/// Callers depend only on the `(category, color, confidence)` contract, so a learned
/// model can replace the heuristic without touching the pipeline.
pub trait ObjectClassifier {
    /// Classifier identifier (used for registry lookup).
    fn name(&self) -> &'static str;

    /// Classify one region. Must be total over non-degenerate features.
    fn classify(&self, features: &RegionFeatures) -> Classification;
}

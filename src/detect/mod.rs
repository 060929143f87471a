mod backend;
mod backends;
mod registry;
mod result;

pub use backend::{MotionSegmenter, ObjectClassifier};
pub use backends::{BackgroundSegmenter, HeuristicClassifier};
pub use registry::ClassifierRegistry;
pub use result::{Classification, ObjectCategory, RegionFeatures, Segmentation};

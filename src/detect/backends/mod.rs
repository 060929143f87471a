pub mod background;
pub mod heuristic;

pub use background::BackgroundSegmenter;
pub use heuristic::HeuristicClassifier;

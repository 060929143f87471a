use crate::detect::backend::ObjectClassifier;
use crate::detect::result::{Classification, ObjectCategory, RegionFeatures};

const ANIMAL_MAX_AREA: u64 = 4000;
const VEHICLE_MIN_AREA: u64 = 15000;

const ANIMAL_COLOR: [u8; 3] = [255, 255, 0];
const VEHICLE_COLOR: [u8; 3] = [255, 165, 0];
const HUMAN_COLOR: [u8; 3] = [255, 0, 0];

/// Bounding-box area heuristic.
///
/// `area < 4000` is an animal, `area > 15000` a vehicle, anything in between a human.
/// Speed is accepted but unused; the bands are placeholders for a learned model.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl ObjectClassifier for HeuristicClassifier {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn classify(&self, features: &RegionFeatures) -> Classification {
        let area = features.area();
        if area < ANIMAL_MAX_AREA {
            Classification {
                category: ObjectCategory::Animal,
                color: ANIMAL_COLOR,
                confidence: 0.65,
            }
        } else if area > VEHICLE_MIN_AREA {
            Classification {
                category: ObjectCategory::Vehicle,
                color: VEHICLE_COLOR,
                confidence: 0.85,
            }
        } else {
            Classification {
                category: ObjectCategory::Human,
                color: HUMAN_COLOR,
                confidence: 0.90,
            }
        }
    }
}

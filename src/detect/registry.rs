use std::collections::HashMap;

use anyhow::{anyhow, Result};

use super::backend::ObjectClassifier;
use super::backends::HeuristicClassifier;
use super::result::{Classification, RegionFeatures};

/// Registry of classifier backends, selected by name.
///
/// The heuristic classifier is always registered, so `classify` is total.
pub struct ClassifierRegistry {
    classifiers: HashMap<String, Box<dyn ObjectClassifier>>,
    default_name: String,
}

impl ClassifierRegistry {
    pub fn new() -> Self {
        let heuristic = HeuristicClassifier::new();
        let default_name = heuristic.name().to_string();
        let mut classifiers: HashMap<String, Box<dyn ObjectClassifier>> = HashMap::new();
        classifiers.insert(default_name.clone(), Box::new(heuristic));
        Self {
            classifiers,
            default_name,
        }
    }

    /// Register a classifier. A classifier with the same name is replaced.
    pub fn register<C: ObjectClassifier + 'static>(&mut self, classifier: C) {
        let name = classifier.name().to_string();
        self.classifiers.insert(name, Box::new(classifier));
    }

    /// Set default classifier by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.classifiers.contains_key(name) {
            return Err(anyhow!(
                "classifier '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            ));
        }
        self.default_name = name.to_string();
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn ObjectClassifier> {
        self.classifiers.get(name).map(|c| c.as_ref())
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// List registered classifiers, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classifiers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Classify with the default classifier.
    pub fn classify(&self, features: &RegionFeatures) -> Classification {
        match self.classifiers.get(&self.default_name) {
            Some(classifier) => classifier.classify(features),
            None => HeuristicClassifier.classify(features),
        }
    }
}

impl Default for ClassifierRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::ObjectCategory;

    struct AlwaysVehicle;

    impl ObjectClassifier for AlwaysVehicle {
        fn name(&self) -> &'static str {
            "always_vehicle"
        }

        fn classify(&self, _features: &RegionFeatures) -> Classification {
            Classification {
                category: ObjectCategory::Vehicle,
                color: [0, 0, 0],
                confidence: 1.0,
            }
        }
    }

    fn features() -> RegionFeatures {
        RegionFeatures {
            width: 10,
            height: 10,
            speed: 0.0,
        }
    }

    #[test]
    fn heuristic_is_default() {
        let registry = ClassifierRegistry::new();
        assert_eq!(registry.default_name(), "heuristic");
        assert_eq!(registry.classify(&features()).category, ObjectCategory::Animal);
    }

    #[test]
    fn substitute_classifier_without_touching_callers() -> Result<()> {
        let mut registry = ClassifierRegistry::new();
        registry.register(AlwaysVehicle);
        assert_eq!(registry.list(), vec!["always_vehicle", "heuristic"]);
        registry.set_default("always_vehicle")?;
        assert_eq!(registry.classify(&features()).category, ObjectCategory::Vehicle);
        Ok(())
    }

    #[test]
    fn unknown_default_is_rejected() {
        let mut registry = ClassifierRegistry::new();
        assert!(registry.set_default("yolo").is_err());
        assert!(registry.get("heuristic").is_some());
    }
}

//! Intrusion severity scoring relative to the virtual fence.

use serde::{Deserialize, Serialize};

/// Discrete threat level. Ordered `Low < Medium < High < Critical`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Low => "LOW",
            ThreatLevel::Medium => "MEDIUM",
            ThreatLevel::High => "HIGH",
            ThreatLevel::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distance/speed thresholds for `score`. Distances are pixels from the fence line,
/// speed is pixels per frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThreatPolicy {
    pub critical_distance: f32,
    pub critical_speed: f32,
    pub high_distance: f32,
    pub medium_distance: f32,
}

impl Default for ThreatPolicy {
    fn default() -> Self {
        Self {
            critical_distance: 50.0,
            critical_speed: 1.0,
            high_distance: 100.0,
            medium_distance: 200.0,
        }
    }
}

impl ThreatPolicy {
    /// Total over all finite inputs; every bound is exclusive.
    pub fn score(&self, distance: f32, speed: f32) -> ThreatLevel {
        if distance < self.critical_distance && speed > self.critical_speed {
            ThreatLevel::Critical
        } else if distance < self.high_distance {
            ThreatLevel::High
        } else if distance < self.medium_distance {
            ThreatLevel::Medium
        } else {
            ThreatLevel::Low
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_points() {
        let policy = ThreatPolicy::default();
        assert_eq!(policy.score(49.0, 1.1), ThreatLevel::Critical);
        assert_eq!(policy.score(99.0, 0.0), ThreatLevel::High);
        assert_eq!(policy.score(199.0, 0.0), ThreatLevel::Medium);
        assert_eq!(policy.score(200.0, 0.0), ThreatLevel::Low);
    }

    #[test]
    fn boundaries_are_exclusive() {
        let policy = ThreatPolicy::default();
        assert_eq!(policy.score(50.0, 5.0), ThreatLevel::High);
        assert_eq!(policy.score(100.0, 0.0), ThreatLevel::Medium);
        assert_eq!(policy.score(200.0, 9.0), ThreatLevel::Low);
        // Slow movers near the line stay HIGH.
        assert_eq!(policy.score(10.0, 1.0), ThreatLevel::High);
    }

    #[test]
    fn levels_are_totally_ordered() {
        assert!(ThreatLevel::Critical > ThreatLevel::High);
        assert!(ThreatLevel::High > ThreatLevel::Medium);
        assert!(ThreatLevel::Medium > ThreatLevel::Low);
        assert_eq!(ThreatLevel::Critical.to_string(), "CRITICAL");
    }
}

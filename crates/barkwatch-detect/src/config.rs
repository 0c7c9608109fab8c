use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the detection debouncer. Label matching is
/// case-insensitive; the defaults are the bark-monitoring label sets the
/// system was originally deployed with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    /// Labels identifying the subject of interest (who is making noise).
    pub subject_labels: Vec<String>,
    /// Labels identifying the acoustic signature (what the noise is).
    pub signature_labels: Vec<String>,
    pub subject_threshold: f32,
    pub signature_threshold: f32,
    /// Continuous non-qualification required before a window closes.
    pub grace_period_s: f64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            subject_labels: [
                "Dog",
                "Canidae, dogs, wolves",
                "Domestic animals, pets",
                "Wild animals",
                "Livestock, farm animals, working animals",
                "Animal",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            signature_labels: ["Bark", "Whimper (dog)", "Growling", "Howl", "Yip"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            subject_threshold: 0.9,
            signature_threshold: 0.85,
            grace_period_s: 1.0,
        }
    }
}

impl DebounceConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs_f64(self.grace_period_s)
    }
}

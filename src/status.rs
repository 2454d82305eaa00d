//! Safety status derivation.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PERSON_THRESHOLD: u32 = 10;

/// Coarse safety classification published to the dashboard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SafetyStatus {
    Safe,
    Danger,
}

impl SafetyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyStatus::Safe => "SAFE",
            SafetyStatus::Danger => "DANGER",
        }
    }
}

impl std::fmt::Display for SafetyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metrics of one detection cycle. Built whole before anything is written.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub person_count: u32,
    pub flashlight_count: u32,
    pub status: SafetyStatus,
    /// Seconds since epoch.
    pub timestamp: u64,
}

/// Pure status rule: DANGER when the crowd exceeds `person_threshold` or any
/// flashlight is visible.
#[derive(Clone, Copy, Debug)]
pub struct StatusAggregator {
    person_threshold: u32,
}

impl Default for StatusAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_PERSON_THRESHOLD)
    }
}

impl StatusAggregator {
    pub fn new(person_threshold: u32) -> Self {
        Self { person_threshold }
    }

    pub fn person_threshold(&self) -> u32 {
        self.person_threshold
    }

    pub fn status(&self, person_count: u32, flashlight_count: u32) -> SafetyStatus {
        if person_count > self.person_threshold || flashlight_count > 0 {
            SafetyStatus::Danger
        } else {
            SafetyStatus::Safe
        }
    }

    pub fn aggregate(&self, person_count: u32, flashlight_count: u32, now: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            person_count,
            flashlight_count,
            status: self.status(person_count, flashlight_count),
            timestamp: now,
        }
    }
}

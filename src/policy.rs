//! Intervention selection
//!
//! Which intervention to surface for a given stress reading is product policy, not
//! engine logic. The engine only asks an [`InterventionPolicy`] for a key.

use crate::types::{Severity, StressScore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Chooses an intervention key for a score
pub trait InterventionPolicy {
    fn select(&self, score: &StressScore) -> Option<String>;
}

/// Lookup table from severity to intervention key.
///
/// A severity without an entry falls back to the closest lower severity that has one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTable {
    entries: BTreeMap<Severity, String>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, severity: Severity, key: impl Into<String>) -> Self {
        self.entries.insert(severity, key.into());
        self
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl InterventionPolicy for PolicyTable {
    fn select(&self, score: &StressScore) -> Option<String> {
        self.entries
            .range(..=score.severity)
            .next_back()
            .map(|(_, key)| key.clone())
    }
}

/// Policy that never names an intervention; the presenter decides alone
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPolicy;

impl InterventionPolicy for NoPolicy {
    fn select(&self, _score: &StressScore) -> Option<String> {
        None
    }
}

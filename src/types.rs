//! Core data types
//!
//! This module defines the metric snapshot shape produced by metric sources, the
//! field catalogue used to address individual metrics uniformly, and the score
//! and intervention records that flow out of the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pointer-derived metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MouseMetrics {
    /// Mean cursor speed (px/s)
    pub movement_velocity: f64,
    /// Mean absolute acceleration (px/s²)
    pub movement_acceleration: f64,
    /// Small direction reversals per movement
    pub mouse_jitter: f64,
    /// Clicks per minute
    pub click_frequency_per_min: f64,
    /// Double/triple clicks per minute
    pub multi_click_rate_per_min: f64,
    /// Straight-line distance over travelled distance (0-1)
    pub path_efficiency: f64,
    /// Fraction of the window with no pointer motion (0-1)
    pub pause_ratio: f64,
    /// Wheel scroll speed as seen by the pointer tracker
    pub scroll_velocity: f64,
}

/// Keyboard-derived metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyboardMetrics {
    /// Corrections (backspace/delete) over keystrokes
    pub typing_error_rate: f64,
    /// Keystrokes per minute
    pub typing_speed_per_min: f64,
    /// Variability of inter-key pauses
    pub pause_regularity: f64,
    /// Mean pause between bursts (ms)
    pub avg_pause_duration: f64,
}

/// Page scroll metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScrollMetrics {
    pub velocity: f64,
}

/// One behavioral metric snapshot from a metric source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    #[serde(default)]
    pub mouse: MouseMetrics,
    #[serde(default)]
    pub keyboard: KeyboardMetrics,
    #[serde(default)]
    pub scroll: ScrollMetrics,
    pub timestamp: DateTime<Utc>,
}

impl MetricSnapshot {
    /// A snapshot with every metric at zero
    pub fn zeroed(timestamp: DateTime<Utc>) -> Self {
        Self {
            mouse: MouseMetrics::default(),
            keyboard: KeyboardMetrics::default(),
            scroll: ScrollMetrics::default(),
            timestamp,
        }
    }

    /// Read a single metric
    pub fn get(&self, field: MetricField) -> f64 {
        match field {
            MetricField::MovementVelocity => self.mouse.movement_velocity,
            MetricField::MovementAcceleration => self.mouse.movement_acceleration,
            MetricField::MouseJitter => self.mouse.mouse_jitter,
            MetricField::ClickFrequencyPerMin => self.mouse.click_frequency_per_min,
            MetricField::MultiClickRatePerMin => self.mouse.multi_click_rate_per_min,
            MetricField::PathEfficiency => self.mouse.path_efficiency,
            MetricField::PauseRatio => self.mouse.pause_ratio,
            MetricField::ScrollVelocity => self.mouse.scroll_velocity,
            MetricField::TypingErrorRate => self.keyboard.typing_error_rate,
            MetricField::TypingSpeedPerMin => self.keyboard.typing_speed_per_min,
            MetricField::PauseRegularity => self.keyboard.pause_regularity,
            MetricField::AvgPauseDuration => self.keyboard.avg_pause_duration,
            MetricField::PageScrollVelocity => self.scroll.velocity,
        }
    }

    /// Overwrite a single metric
    pub fn set(&mut self, field: MetricField, value: f64) {
        let slot = match field {
            MetricField::MovementVelocity => &mut self.mouse.movement_velocity,
            MetricField::MovementAcceleration => &mut self.mouse.movement_acceleration,
            MetricField::MouseJitter => &mut self.mouse.mouse_jitter,
            MetricField::ClickFrequencyPerMin => &mut self.mouse.click_frequency_per_min,
            MetricField::MultiClickRatePerMin => &mut self.mouse.multi_click_rate_per_min,
            MetricField::PathEfficiency => &mut self.mouse.path_efficiency,
            MetricField::PauseRatio => &mut self.mouse.pause_ratio,
            MetricField::ScrollVelocity => &mut self.mouse.scroll_velocity,
            MetricField::TypingErrorRate => &mut self.keyboard.typing_error_rate,
            MetricField::TypingSpeedPerMin => &mut self.keyboard.typing_speed_per_min,
            MetricField::PauseRegularity => &mut self.keyboard.pause_regularity,
            MetricField::AvgPauseDuration => &mut self.keyboard.avg_pause_duration,
            MetricField::PageScrollVelocity => &mut self.scroll.velocity,
        };
        *slot = value;
    }
}

/// Addressable metric fields of a [`MetricSnapshot`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricField {
    MovementVelocity,
    MovementAcceleration,
    MouseJitter,
    ClickFrequencyPerMin,
    MultiClickRatePerMin,
    PathEfficiency,
    PauseRatio,
    ScrollVelocity,
    TypingErrorRate,
    TypingSpeedPerMin,
    PauseRegularity,
    AvgPauseDuration,
    PageScrollVelocity,
}

impl MetricField {
    pub const ALL: [MetricField; 13] = [
        MetricField::MovementVelocity,
        MetricField::MovementAcceleration,
        MetricField::MouseJitter,
        MetricField::ClickFrequencyPerMin,
        MetricField::MultiClickRatePerMin,
        MetricField::PathEfficiency,
        MetricField::PauseRatio,
        MetricField::ScrollVelocity,
        MetricField::TypingErrorRate,
        MetricField::TypingSpeedPerMin,
        MetricField::PauseRegularity,
        MetricField::AvgPauseDuration,
        MetricField::PageScrollVelocity,
    ];

    /// Stable camelCase name, matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricField::MovementVelocity => "movementVelocity",
            MetricField::MovementAcceleration => "movementAcceleration",
            MetricField::MouseJitter => "mouseJitter",
            MetricField::ClickFrequencyPerMin => "clickFrequencyPerMin",
            MetricField::MultiClickRatePerMin => "multiClickRatePerMin",
            MetricField::PathEfficiency => "pathEfficiency",
            MetricField::PauseRatio => "pauseRatio",
            MetricField::ScrollVelocity => "scrollVelocity",
            MetricField::TypingErrorRate => "typingErrorRate",
            MetricField::TypingSpeedPerMin => "typingSpeedPerMin",
            MetricField::PauseRegularity => "pauseRegularity",
            MetricField::AvgPauseDuration => "avgPauseDuration",
            MetricField::PageScrollVelocity => "pageScrollVelocity",
        }
    }

    /// Fields bounded to the unit interval
    pub fn is_ratio(&self) -> bool {
        matches!(self, MetricField::PathEfficiency | MetricField::PauseRatio)
    }
}

impl fmt::Display for MetricField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discrete stress level derived from raw score thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressLevel {
    Normal,
    Moderate,
    High,
}

/// Discretized stress intensity derived from the display percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Calm,
    Mild,
    Elevated,
    High,
    Severe,
}

impl Severity {
    /// Bucket a percentage in [0, 100]
    pub fn from_percentage(percentage: f64) -> Self {
        match percentage {
            p if p >= 90.0 => Severity::Severe,
            p if p >= 80.0 => Severity::High,
            p if p >= 65.0 => Severity::Elevated,
            p if p >= 50.0 => Severity::Mild,
            _ => Severity::Calm,
        }
    }
}

/// Per-field scoring breakdown
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldContribution {
    pub field: MetricField,
    /// Directional z before threshold and cap
    pub raw_z: f64,
    /// z after threshold subtraction and cap
    pub z: f64,
    pub weight: f64,
}

/// Result of scoring one aggregate against the active baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StressScore {
    pub mouse_score: f64,
    pub keyboard_score: f64,
    pub combined: f64,
    pub level: StressLevel,
    /// Display percentage (0-100)
    pub percentage: f64,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    /// The aggregate this score was computed from
    pub metrics: MetricSnapshot,
    #[serde(default)]
    pub contributions: Vec<FieldContribution>,
}

impl StressScore {
    /// A zero-stress score for when computation produced garbage
    pub fn neutral(metrics: MetricSnapshot, timestamp: DateTime<Utc>) -> Self {
        Self {
            mouse_score: 0.0,
            keyboard_score: 0.0,
            combined: 0.0,
            level: StressLevel::Normal,
            percentage: 0.0,
            severity: Severity::Calm,
            timestamp,
            metrics,
            contributions: Vec::new(),
        }
    }
}

/// Signal emitted to the intervention presenter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterventionSignal {
    pub level: StressLevel,
    pub severity: Severity,
    pub combined: f64,
    pub percentage: f64,
    pub timestamp: DateTime<Utc>,
    /// Key chosen by the external policy table, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intervention_selected: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_snapshot_deserialization_camel_case() {
        let json = r#"{
            "mouse": {
                "movementVelocity": 420.0,
                "clickFrequencyPerMin": 12.5,
                "pathEfficiency": 0.8
            },
            "keyboard": { "typingErrorRate": 0.05 },
            "scroll": { "velocity": 300.0 },
            "timestamp": "2024-01-15T14:00:00Z"
        }"#;

        let snapshot: MetricSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.mouse.movement_velocity, 420.0);
        assert_eq!(snapshot.mouse.click_frequency_per_min, 12.5);
        assert_eq!(snapshot.mouse.mouse_jitter, 0.0);
        assert_eq!(snapshot.keyboard.typing_error_rate, 0.05);
        assert_eq!(snapshot.scroll.velocity, 300.0);
    }

    #[test]
    fn test_field_get_set() {
        let mut snapshot =
            MetricSnapshot::zeroed(Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap());
        for (i, field) in MetricField::ALL.iter().enumerate() {
            snapshot.set(*field, i as f64 + 1.0);
        }
        for (i, field) in MetricField::ALL.iter().enumerate() {
            assert_eq!(snapshot.get(*field), i as f64 + 1.0, "field {field}");
        }
    }

    #[test]
    fn test_metric_field_serialization() {
        let json = serde_json::to_string(&MetricField::ClickFrequencyPerMin).unwrap();
        assert_eq!(json, "\"clickFrequencyPerMin\"");
        assert_eq!(MetricField::ClickFrequencyPerMin.as_str(), "clickFrequencyPerMin");
    }

    #[test]
    fn test_severity_buckets() {
        assert_eq!(Severity::from_percentage(0.0), Severity::Calm);
        assert_eq!(Severity::from_percentage(49.9), Severity::Calm);
        assert_eq!(Severity::from_percentage(50.0), Severity::Mild);
        assert_eq!(Severity::from_percentage(70.0), Severity::Elevated);
        assert_eq!(Severity::from_percentage(85.0), Severity::High);
        assert_eq!(Severity::from_percentage(100.0), Severity::Severe);
        assert!(Severity::Mild < Severity::Severe);
    }
}

//! Engine configuration
//!
//! All options deserialize from camelCase JSON and fall back to defaults when absent,
//! so a partial configuration document is always valid input.

use crate::error::EngineError;
use crate::types::Severity;
use serde::{Deserialize, Serialize};

/// Default intervention cooldown (minutes)
pub const DEFAULT_COOLDOWN_MINUTES: u32 = 8;

/// Default calibration window (seconds)
pub const DEFAULT_CALIBRATION_DURATION_SECONDS: u32 = 60;

/// Default lifetime of an aggregator entry (seconds)
pub const DEFAULT_AGGREGATE_TTL_SECONDS: u32 = 15;

/// Longest accepted tick period (milliseconds)
pub const MAX_TICK_MILLIS: u64 = 3_600_000;

/// Detection sensitivity, selecting the score threshold set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    Low,
    #[default]
    Medium,
    High,
}

impl Sensitivity {
    /// Combined score at or above which stress is `high`
    pub fn high_threshold(&self) -> f64 {
        match self {
            Sensitivity::Low => 3.3,
            Sensitivity::Medium => 2.6,
            Sensitivity::High => 2.2,
        }
    }

    /// Combined score at or above which stress is `moderate`
    pub fn moderate_threshold(&self) -> f64 {
        (0.5 * self.high_threshold()).max(0.8)
    }
}

/// Annoyance scheduler tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    pub cooldown_minutes: u32,
    pub max_per_hour: u32,
    pub max_per_day: u32,
    pub auto_snooze_after_dismissals: u32,
    pub snooze_minutes: u32,
    /// Lowest severity that may trigger an intervention
    pub min_severity: Severity,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cooldown_minutes: DEFAULT_COOLDOWN_MINUTES,
            max_per_hour: 3,
            max_per_day: 12,
            auto_snooze_after_dismissals: 2,
            snooze_minutes: 30,
            min_severity: Severity::Mild,
        }
    }
}

/// Slow baseline adaptation applied from the tick loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlendingConfig {
    pub enabled: bool,
    /// Smoothing factor per blend step
    pub alpha: f64,
    pub interval_seconds: u32,
}

impl Default for BlendingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            alpha: 0.01,
            interval_seconds: 60,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub sensitivity: Sensitivity,
    #[serde(flatten)]
    pub scheduler: SchedulerConfig,
    pub calibration_duration_seconds: u32,
    pub aggregate_ttl_seconds: u32,
    pub tick_millis: u64,
    /// How often shared persisted state is re-read
    pub sync_interval_seconds: u32,
    pub blending: BlendingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sensitivity: Sensitivity::default(),
            scheduler: SchedulerConfig::default(),
            calibration_duration_seconds: DEFAULT_CALIBRATION_DURATION_SECONDS,
            aggregate_ttl_seconds: DEFAULT_AGGREGATE_TTL_SECONDS,
            tick_millis: 1000,
            sync_interval_seconds: 5,
            blending: BlendingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.calibration_duration_seconds == 0 {
            return Err(EngineError::InvalidConfig(
                "calibrationDurationSeconds must be positive".to_string(),
            ));
        }
        if self.aggregate_ttl_seconds == 0 {
            return Err(EngineError::InvalidConfig(
                "aggregateTtlSeconds must be positive".to_string(),
            ));
        }
        if self.tick_millis == 0 {
            return Err(EngineError::InvalidConfig(
                "tickMillis must be positive".to_string(),
            ));
        }
        if self.tick_millis > MAX_TICK_MILLIS {
            return Err(EngineError::InvalidConfig(format!(
                "tickMillis {} exceeds {MAX_TICK_MILLIS}",
                self.tick_millis
            )));
        }
        if self.scheduler.max_per_day < self.scheduler.max_per_hour {
            return Err(EngineError::InvalidConfig(format!(
                "maxPerDay ({}) is below maxPerHour ({})",
                self.scheduler.max_per_day, self.scheduler.max_per_hour
            )));
        }
        if !(0.0..=0.5).contains(&self.blending.alpha) {
            return Err(EngineError::InvalidConfig(format!(
                "blending alpha {} outside [0, 0.5]",
                self.blending.alpha
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensitivity_thresholds() {
        assert_eq!(Sensitivity::Low.high_threshold(), 3.3);
        assert_eq!(Sensitivity::Medium.high_threshold(), 2.6);
        assert_eq!(Sensitivity::High.high_threshold(), 2.2);

        assert!((Sensitivity::Low.moderate_threshold() - 1.65).abs() < 1e-9);
        assert!((Sensitivity::Medium.moderate_threshold() - 1.3).abs() < 1e-9);
        assert!((Sensitivity::High.moderate_threshold() - 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(
            r#"{ "sensitivity": "high", "cooldownMinutes": 4, "snoozeMinutes": 10 }"#,
        )
        .unwrap();

        assert_eq!(config.sensitivity, Sensitivity::High);
        assert_eq!(config.scheduler.cooldown_minutes, 4);
        assert_eq!(config.scheduler.snooze_minutes, 10);
        assert_eq!(config.scheduler.max_per_hour, 3);
        assert_eq!(
            config.calibration_duration_seconds,
            DEFAULT_CALIBRATION_DURATION_SECONDS
        );
    }

    #[test]
    fn test_empty_json_is_default() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_validation_rejects_zero_calibration() {
        let result = EngineConfig::from_json(r#"{ "calibrationDurationSeconds": 0 }"#);
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_validation_rejects_oversized_tick() {
        let result = EngineConfig::from_json(r#"{ "tickMillis": 18446744073709551615 }"#);
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));

        let config = EngineConfig::from_json(r#"{ "tickMillis": 3600000 }"#).unwrap();
        assert_eq!(config.tick_millis, MAX_TICK_MILLIS);
    }

    #[test]
    fn test_zero_caps_accepted() {
        let config = EngineConfig::from_json(r#"{ "maxPerHour": 0, "maxPerDay": 0 }"#).unwrap();
        assert_eq!(config.scheduler.max_per_hour, 0);
        assert_eq!(config.scheduler.max_per_day, 0);
    }

    #[test]
    fn test_validation_rejects_inverted_caps() {
        let result = EngineConfig::from_json(r#"{ "maxPerHour": 5, "maxPerDay": 2 }"#);
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }
}

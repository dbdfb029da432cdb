//! Personal baseline management
//!
//! A baseline holds a robust center (median) and scale (median absolute deviation)
//! for every metric field. Baselines are produced by calibration, may drift slowly
//! through exponential blending, and are archived daily into a bounded history.

use crate::error::EngineError;
use crate::types::{MetricField, MetricSnapshot};
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Maximum number of archived daily baselines
pub const BASELINE_HISTORY_LIMIT: usize = 30;

/// Scale never drops below this absolute value
const MIN_SCALE_ABSOLUTE: f64 = 0.1;

/// Scale never drops below this fraction of |center|
const MIN_SCALE_RELATIVE: f64 = 0.25;

/// Lower bound for a field's scale given its center
pub fn scale_floor(center: f64) -> f64 {
    (MIN_SCALE_RELATIVE * center.abs()).max(MIN_SCALE_ABSOLUTE)
}

/// Median of a slice; `None` when empty
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Median absolute deviation around `center`
pub fn median_absolute_deviation(values: &[f64], center: f64) -> Option<f64> {
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

/// Robust center and scale for one metric field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldBaseline {
    pub center: f64,
    pub scale: f64,
}

impl FieldBaseline {
    /// Build from raw statistics, applying the scale floor
    pub fn new(center: f64, mad: f64) -> Self {
        Self {
            center,
            scale: mad.max(scale_floor(center)),
        }
    }
}

/// Coarse time-of-day bucket a baseline was recorded in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOfDay {
    Night,
    Morning,
    Afternoon,
    Evening,
}

impl TimeOfDay {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => TimeOfDay::Morning,
            12..=16 => TimeOfDay::Afternoon,
            17..=21 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }
}

/// Recording context of a baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineContext {
    pub time_of_day: TimeOfDay,
    pub day_of_week: Weekday,
}

impl BaselineContext {
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            time_of_day: TimeOfDay::from_hour(timestamp.hour()),
            day_of_week: timestamp.weekday(),
        }
    }
}

/// Per-metric personal baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Baseline {
    pub fields: BTreeMap<MetricField, FieldBaseline>,
    pub timestamp: DateTime<Utc>,
    pub context: BaselineContext,
    #[serde(default)]
    pub sample_count: usize,
}

impl Baseline {
    /// Compute a baseline from calibration samples
    pub fn from_samples(
        samples: &[MetricSnapshot],
        timestamp: DateTime<Utc>,
    ) -> Result<Self, EngineError> {
        if samples.is_empty() {
            return Err(EngineError::InsufficientCalibrationData);
        }

        let mut fields = BTreeMap::new();
        for field in MetricField::ALL {
            let values: Vec<f64> = samples.iter().map(|s| s.get(field)).collect();
            // Non-empty by the guard above
            let center = median(&values).unwrap_or(0.0);
            let mad = median_absolute_deviation(&values, center).unwrap_or(0.0);
            fields.insert(field, FieldBaseline::new(center, mad));
        }

        Ok(Self {
            fields,
            timestamp,
            context: BaselineContext::at(timestamp),
            sample_count: samples.len(),
        })
    }

    pub fn get(&self, field: MetricField) -> Option<FieldBaseline> {
        self.fields.get(&field).copied()
    }

    /// Center of a field, zero when the field is missing
    pub fn center(&self, field: MetricField) -> f64 {
        self.get(field).map(|b| b.center).unwrap_or(0.0)
    }

    /// Move every field a bounded step towards `snapshot`
    pub fn blend(&mut self, snapshot: &MetricSnapshot, alpha: f64, timestamp: DateTime<Utc>) {
        let alpha = alpha.clamp(0.0, 1.0);
        for field in MetricField::ALL {
            let value = snapshot.get(field);
            let entry = self
                .fields
                .entry(field)
                .or_insert_with(|| FieldBaseline::new(value, 0.0));

            let deviation = (value - entry.center).abs();
            let center = (1.0 - alpha) * entry.center + alpha * value;
            let scale = (1.0 - alpha) * entry.scale + alpha * deviation;
            *entry = FieldBaseline::new(center, scale);
        }
        self.timestamp = timestamp;
    }

    /// Check a baseline loaded from outside the process
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.fields.is_empty() {
            return Err(EngineError::InvalidBaselineStructure(
                "baseline has no fields".to_string(),
            ));
        }
        for (field, value) in &self.fields {
            if !value.center.is_finite() || value.center < 0.0 {
                return Err(EngineError::InvalidBaselineStructure(format!(
                    "{field} center {} is not a non-negative number",
                    value.center
                )));
            }
            if !value.scale.is_finite() || value.scale <= 0.0 {
                return Err(EngineError::InvalidBaselineStructure(format!(
                    "{field} scale {} is not positive",
                    value.scale
                )));
            }
        }
        Ok(())
    }

    /// Parse, validate and re-floor a persisted baseline
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let mut baseline: Baseline = serde_json::from_str(json)
            .map_err(|e| EngineError::InvalidBaselineStructure(e.to_string()))?;
        baseline.validate()?;
        for value in baseline.fields.values_mut() {
            *value = FieldBaseline::new(value.center, value.scale);
        }
        Ok(baseline)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Bounded archive of past daily baselines
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineHistory {
    entries: VecDeque<Baseline>,
    limit: usize,
}

impl Default for BaselineHistory {
    fn default() -> Self {
        Self::new(BASELINE_HISTORY_LIMIT)
    }
}

impl BaselineHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit),
            limit,
        }
    }

    /// Archive a baseline, dropping the oldest beyond the limit
    pub fn push(&mut self, baseline: Baseline) {
        self.entries.push_back(baseline);
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&Baseline> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Baseline> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Trend of a field's center across the archive, oldest first
    pub fn center_trend(&self, field: MetricField) -> Vec<(DateTime<Utc>, f64)> {
        self.entries
            .iter()
            .filter_map(|b| b.get(field).map(|f| (b.timestamp, f.center)))
            .collect()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut history: BaselineHistory = serde_json::from_str(json)?;
        if history.limit == 0 || history.limit > BASELINE_HISTORY_LIMIT {
            history.limit = BASELINE_HISTORY_LIMIT;
        }
        while history.entries.len() > history.limit {
            history.entries.pop_front();
        }
        Ok(history)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

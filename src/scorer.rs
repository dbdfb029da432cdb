//! Stress scoring
//!
//! Converts an aggregated snapshot and the active baseline into directional z-scores,
//! a weighted composite, a discrete level and a display percentage. The formulas are
//! deterministic and every intermediate is kept in the score for explanation.

use crate::baseline::Baseline;
use crate::config::Sensitivity;
use crate::types::{
    FieldContribution, MetricField, MetricSnapshot, Severity, StressLevel, StressScore,
};
use chrono::{DateTime, Utc};

/// Upper bound on a single field's z-score
pub const Z_CAP: f64 = 4.0;

/// Share of the mouse score in the combined score
const MOUSE_SHARE: f64 = 0.7;

/// Share of the keyboard score in the combined score
const KEYBOARD_SHARE: f64 = 0.3;

/// Weight of the path-inefficiency penalty
const PATH_PENALTY_WEIGHT: f64 = 0.1;

/// Ceiling on the pause-ratio penalty
const PAUSE_PENALTY_CAP: f64 = 0.5;

/// Upper end of the percentage scale as a multiple of the high threshold
const PERCENTAGE_CAP_FACTOR: f64 = 1.5;

/// Weighting of one field within its family score
#[derive(Debug, Clone, Copy)]
pub struct FieldWeight {
    pub field: MetricField,
    pub weight: f64,
    /// Deviation (in scale units) that produces no signal
    pub min_threshold: f64,
}

const fn weight(field: MetricField, weight: f64, min_threshold: f64) -> FieldWeight {
    FieldWeight {
        field,
        weight,
        min_threshold,
    }
}

pub const MOUSE_WEIGHTS: [FieldWeight; 6] = [
    weight(MetricField::ClickFrequencyPerMin, 0.15, 0.2),
    weight(MetricField::MultiClickRatePerMin, 0.15, 0.2),
    weight(MetricField::MovementVelocity, 0.10, 0.3),
    weight(MetricField::MovementAcceleration, 0.10, 0.3),
    weight(MetricField::MouseJitter, 0.10, 0.3),
    weight(MetricField::ScrollVelocity, 0.10, 0.3),
];

pub const KEYBOARD_WEIGHTS: [FieldWeight; 4] = [
    weight(MetricField::TypingErrorRate, 0.50, 0.2),
    weight(MetricField::TypingSpeedPerMin, 0.25, 0.3),
    weight(MetricField::PauseRegularity, 0.15, 0.3),
    weight(MetricField::AvgPauseDuration, 0.10, 0.3),
];

/// Directional z-score before thresholding; zero when the field has no baseline
pub fn directional_z(value: f64, baseline: &Baseline, field: MetricField) -> f64 {
    match baseline.get(field) {
        Some(b) if b.scale > 0.0 => ((value - b.center) / b.scale).max(0.0),
        _ => 0.0,
    }
}

/// Remove the dead zone and cap outliers
pub fn clamp_z(raw_z: f64, min_threshold: f64) -> f64 {
    (raw_z - min_threshold).max(0.0).min(Z_CAP)
}

/// Display percentage for a combined score.
///
/// Piecewise linear: [0, moderate) → [0, 50), [moderate, high) → [50, 80),
/// [high, 1.5·high] → [80, 100].
pub fn percentage(combined: f64, sensitivity: Sensitivity) -> f64 {
    let high = sensitivity.high_threshold();
    let moderate = sensitivity.moderate_threshold();
    let cap = high * PERCENTAGE_CAP_FACTOR;
    let combined = combined.max(0.0);

    let pct = if combined < moderate {
        50.0 * combined / moderate
    } else if combined < high {
        50.0 + 30.0 * (combined - moderate) / (high - moderate)
    } else {
        80.0 + 20.0 * ((combined - high) / (cap - high)).min(1.0)
    };
    pct.clamp(0.0, 100.0)
}

/// Level for a combined score
pub fn level(combined: f64, sensitivity: Sensitivity) -> StressLevel {
    if combined >= sensitivity.high_threshold() {
        StressLevel::High
    } else if combined >= sensitivity.moderate_threshold() {
        StressLevel::Moderate
    } else {
        StressLevel::Normal
    }
}

/// Scorer bound to a sensitivity setting
#[derive(Debug, Clone, Copy, Default)]
pub struct StressScorer {
    sensitivity: Sensitivity,
}

impl StressScorer {
    pub fn new(sensitivity: Sensitivity) -> Self {
        Self { sensitivity }
    }

    pub fn sensitivity(&self) -> Sensitivity {
        self.sensitivity
    }

    /// Score an aggregate against a baseline. Never fails; garbage becomes neutral.
    pub fn score(
        &self,
        aggregate: &MetricSnapshot,
        baseline: &Baseline,
        timestamp: DateTime<Utc>,
    ) -> StressScore {
        let mut contributions = Vec::with_capacity(MOUSE_WEIGHTS.len() + KEYBOARD_WEIGHTS.len());

        let mouse_mean = weighted_mean(&MOUSE_WEIGHTS, aggregate, baseline, &mut contributions);
        let mouse_score = mouse_mean
            + path_penalty(aggregate, baseline)
            + pause_penalty(aggregate, baseline);
        let keyboard_score =
            weighted_mean(&KEYBOARD_WEIGHTS, aggregate, baseline, &mut contributions);

        let combined = MOUSE_SHARE * mouse_score + KEYBOARD_SHARE * keyboard_score;

        if !(combined.is_finite() && mouse_score.is_finite() && keyboard_score.is_finite()) {
            tracing::warn!(combined, "non-finite stress score, substituting neutral");
            return StressScore::neutral(*aggregate, timestamp);
        }

        let percentage = percentage(combined, self.sensitivity);
        StressScore {
            mouse_score,
            keyboard_score,
            combined,
            level: level(combined, self.sensitivity),
            percentage,
            severity: Severity::from_percentage(percentage),
            timestamp,
            metrics: *aggregate,
            contributions,
        }
    }
}

/// Weighted mean over all listed fields; quiet fields still count in the denominator
fn weighted_mean(
    weights: &[FieldWeight],
    aggregate: &MetricSnapshot,
    baseline: &Baseline,
    contributions: &mut Vec<FieldContribution>,
) -> f64 {
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;

    for w in weights {
        let raw_z = directional_z(aggregate.get(w.field), baseline, w.field);
        let z = clamp_z(raw_z, w.min_threshold);
        weighted_sum += w.weight * z;
        weight_total += w.weight;
        contributions.push(FieldContribution {
            field: w.field,
            raw_z,
            z,
            weight: w.weight,
        });
    }

    if weight_total > 0.0 {
        weighted_sum / weight_total
    } else {
        0.0
    }
}

fn path_penalty(aggregate: &MetricSnapshot, baseline: &Baseline) -> f64 {
    let Some(b) = baseline.get(MetricField::PathEfficiency) else {
        return 0.0;
    };
    let current = aggregate.mouse.path_efficiency;
    if current < b.center {
        (2.0 * (b.center - current)).min(1.0) * PATH_PENALTY_WEIGHT
    } else {
        0.0
    }
}

fn pause_penalty(aggregate: &MetricSnapshot, baseline: &Baseline) -> f64 {
    let Some(b) = baseline.get(MetricField::PauseRatio) else {
        return 0.0;
    };
    let current = aggregate.mouse.pause_ratio;
    if current > b.center {
        (2.0 * (current - b.center)).min(PAUSE_PENALTY_CAP)
    } else {
        0.0
    }
}

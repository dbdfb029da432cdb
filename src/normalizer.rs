//! Metric sanitization
//!
//! Snapshots arrive from untrusted producers. Every field is forced into its valid
//! range before it can reach the aggregator, calibrator or scorer.

use crate::types::{MetricField, MetricSnapshot};
use serde::{Deserialize, Serialize};

/// What was wrong with a repaired field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SanitizeIssue {
    /// NaN or infinite, replaced by zero
    NonFinite,
    /// Negative, replaced by zero
    Negative,
    /// Ratio above one, clamped
    AboveUnit,
}

/// A field repaired during sanitization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityFlag {
    pub field: MetricField,
    pub issue: SanitizeIssue,
}

/// Sanitized snapshot together with the repairs applied to it
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedSnapshot {
    pub snapshot: MetricSnapshot,
    pub quality_flags: Vec<QualityFlag>,
}

impl SanitizedSnapshot {
    pub fn is_clean(&self) -> bool {
        self.quality_flags.is_empty()
    }
}

/// Boundary normalizer for metric snapshots
pub struct MetricNormalizer;

impl MetricNormalizer {
    /// Force every field into range, reporting what was repaired
    pub fn sanitize(mut snapshot: MetricSnapshot) -> SanitizedSnapshot {
        let mut quality_flags = Vec::new();

        for field in MetricField::ALL {
            let value = snapshot.get(field);
            let (clean, issue) = sanitize_value(field, value);
            if let Some(issue) = issue {
                snapshot.set(field, clean);
                quality_flags.push(QualityFlag { field, issue });
            }
        }

        if !quality_flags.is_empty() {
            tracing::debug!(
                repaired = quality_flags.len(),
                "sanitized malformed metric snapshot"
            );
        }

        SanitizedSnapshot {
            snapshot,
            quality_flags,
        }
    }
}

fn sanitize_value(field: MetricField, value: f64) -> (f64, Option<SanitizeIssue>) {
    if !value.is_finite() {
        return (0.0, Some(SanitizeIssue::NonFinite));
    }
    if value < 0.0 {
        return (0.0, Some(SanitizeIssue::Negative));
    }
    if field.is_ratio() && value > 1.0 {
        return (1.0, Some(SanitizeIssue::AboveUnit));
    }
    (value, None)
}

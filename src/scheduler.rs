//! Annoyance control
//!
//! Gates how often interventions may be surfaced. The scheduler's state is a log of
//! recent interventions plus a dismissal counter and snooze deadline; the current
//! status (available, cooling down, capped, snoozed) is always derived from that
//! state at query time, never stored.

use crate::config::SchedulerConfig;
use crate::types::Severity;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How an intervention ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum InterventionOutcome {
    Completed {
        #[serde(rename = "durationMs")]
        duration_ms: u64,
    },
    Dismissed,
}

/// One shown intervention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterventionLogEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<InterventionOutcome>,
}

/// Persistent scheduler state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnoyanceState {
    #[serde(default)]
    pub intervention_log: Vec<InterventionLogEntry>,
    #[serde(default)]
    pub consecutive_dismissals: u32,
    #[serde(default)]
    pub snoozed_until: Option<DateTime<Utc>>,
}

/// Scalar part of [`AnnoyanceState`], persisted apart from the log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnoyanceCounters {
    #[serde(default)]
    pub consecutive_dismissals: u32,
    #[serde(default)]
    pub snoozed_until: Option<DateTime<Utc>>,
}

impl AnnoyanceState {
    pub fn counters(&self) -> AnnoyanceCounters {
        AnnoyanceCounters {
            consecutive_dismissals: self.consecutive_dismissals,
            snoozed_until: self.snoozed_until,
        }
    }

    pub fn from_parts(log: Vec<InterventionLogEntry>, counters: AnnoyanceCounters) -> Self {
        Self {
            intervention_log: log,
            consecutive_dismissals: counters.consecutive_dismissals,
            snoozed_until: counters.snoozed_until,
        }
    }
}

/// Current gate status with the instant it lifts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum SchedulerStatus {
    Available,
    CoolingDown { until: DateTime<Utc> },
    Capped { until: DateTime<Utc> },
    Snoozed { until: DateTime<Utc> },
}

/// Rate limiter for interventions
#[derive(Debug, Clone)]
pub struct AnnoyanceScheduler {
    config: SchedulerConfig,
    state: AnnoyanceState,
}

impl AnnoyanceScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_state(config, AnnoyanceState::default())
    }

    pub fn with_state(config: SchedulerConfig, state: AnnoyanceState) -> Self {
        Self { config, state }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn state(&self) -> &AnnoyanceState {
        &self.state
    }

    /// Replace state wholesale (e.g. after re-reading shared storage)
    pub fn set_state(&mut self, state: AnnoyanceState) {
        self.state = state;
    }

    fn cooldown(&self) -> Duration {
        Duration::minutes(i64::from(self.config.cooldown_minutes))
    }

    fn last_shown(&self) -> Option<DateTime<Utc>> {
        self.state.intervention_log.iter().map(|e| e.timestamp).max()
    }

    /// Entries newer than `window`, oldest first
    fn within(&self, now: DateTime<Utc>, window: Duration) -> Vec<DateTime<Utc>> {
        let mut stamps: Vec<DateTime<Utc>> = self
            .state
            .intervention_log
            .iter()
            .map(|e| e.timestamp)
            .filter(|ts| now - *ts < window)
            .collect();
        stamps.sort();
        stamps
    }

    /// When a cap of `max` over `window` lifts, if it is currently reached
    fn cap_until(&self, now: DateTime<Utc>, window: Duration, max: u32) -> Option<DateTime<Utc>> {
        // A zero cap never admits anything; it lifts one window from any query
        if max == 0 {
            return Some(now + window);
        }
        let stamps = self.within(now, window);
        let max = max as usize;
        if stamps.len() < max {
            return None;
        }
        // The cap lifts once enough entries age out to drop below `max`
        let idx = stamps.len() - max;
        Some(stamps[idx] + window)
    }

    /// Derive the gate status at `now`
    pub fn status(&self, now: DateTime<Utc>) -> SchedulerStatus {
        if let Some(until) = self.state.snoozed_until {
            if now < until {
                return SchedulerStatus::Snoozed { until };
            }
        }

        let hour_cap = self.cap_until(now, Duration::hours(1), self.config.max_per_hour);
        let day_cap = self.cap_until(now, Duration::hours(24), self.config.max_per_day);
        if let Some(until) = hour_cap.into_iter().chain(day_cap).max() {
            return SchedulerStatus::Capped { until };
        }

        if let Some(last) = self.last_shown() {
            let until = last + self.cooldown();
            if now < until {
                return SchedulerStatus::CoolingDown { until };
            }
        }

        SchedulerStatus::Available
    }

    /// Whether an intervention may be shown at `now`
    pub fn can_show(&self, now: DateTime<Utc>) -> bool {
        self.status(now) == SchedulerStatus::Available
    }

    /// `can_show` restricted to severities at or above the configured minimum
    pub fn should_intervene(&self, now: DateTime<Utc>, severity: Severity) -> bool {
        severity >= self.config.min_severity && self.can_show(now)
    }

    pub fn record_shown(&mut self, now: DateTime<Utc>) {
        let mut state = self.state.clone();
        state.intervention_log.push(InterventionLogEntry {
            timestamp: now,
            outcome: None,
        });
        prune(&mut state, now);
        self.state = state;
        tracing::info!(at = %now, "intervention shown");
    }

    pub fn record_completed(&mut self, now: DateTime<Utc>, duration_ms: u64) {
        let mut state = self.state.clone();
        state.consecutive_dismissals = 0;
        set_last_outcome(&mut state, InterventionOutcome::Completed { duration_ms });
        prune(&mut state, now);
        self.state = state;
    }

    pub fn record_dismissed(&mut self, now: DateTime<Utc>) {
        let mut state = self.state.clone();
        state.consecutive_dismissals += 1;
        set_last_outcome(&mut state, InterventionOutcome::Dismissed);

        let threshold = self.config.auto_snooze_after_dismissals;
        if threshold > 0 && state.consecutive_dismissals >= threshold {
            let until = now + Duration::minutes(i64::from(self.config.snooze_minutes));
            state.snoozed_until = Some(until);
            state.consecutive_dismissals = 0;
            tracing::info!(until = %until, "auto-snoozed after repeated dismissals");
        }
        prune(&mut state, now);
        self.state = state;
    }

    /// Lift a snooze early
    pub fn clear_snooze(&mut self) {
        self.state.snoozed_until = None;
    }

    pub fn reset(&mut self) {
        self.state = AnnoyanceState::default();
    }
}

fn set_last_outcome(state: &mut AnnoyanceState, outcome: InterventionOutcome) {
    if let Some(entry) = state
        .intervention_log
        .iter_mut()
        .filter(|e| e.outcome.is_none())
        .max_by_key(|e| e.timestamp)
    {
        entry.outcome = Some(outcome);
    }
}

/// Drop log entries no cap can see anymore and expired snoozes
fn prune(state: &mut AnnoyanceState, now: DateTime<Utc>) {
    let horizon = Duration::hours(24);
    state.intervention_log.retain(|e| now - e.timestamp < horizon);
    if matches!(state.snoozed_until, Some(until) if until <= now) {
        state.snoozed_until = None;
    }
}

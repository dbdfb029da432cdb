//! Engine orchestration
//!
//! [`StressEngine`] wires the calibrator, aggregator, scorer and scheduler together
//! and drives them from a single periodic [`StressEngine::tick`]. Metric sources push
//! snapshots at their own cadence; the tick reads a consistent aggregate, scores it,
//! runs the slow baseline blend, and decides whether an intervention may fire.
//!
//! Persistence is best effort. A failed write marks state dirty and is retried on
//! the next tick; in-memory state stays authoritative in the meantime.

use crate::aggregator::{MetricAggregator, SharedAggregator};
use crate::baseline::{Baseline, BaselineHistory};
use crate::calibration::{CalibrationState, CalibrationStatus, Calibrator};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::normalizer::MetricNormalizer;
use crate::policy::{InterventionPolicy, NoPolicy};
use crate::scheduler::{
    AnnoyanceCounters, AnnoyanceScheduler, AnnoyanceState, InterventionLogEntry, SchedulerStatus,
};
use crate::scorer::StressScorer;
use crate::storage::{read_json, write_json, MemoryStore, StateKey, StateStore};
use crate::types::{InterventionSignal, MetricSnapshot, StressLevel, StressScore};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Result of one evaluation tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum TickOutcome {
    /// Detection switched off
    Disabled,
    /// No baseline yet and no session open
    Uncalibrated,
    /// Calibration session open, scoring suspended
    Calibrating { progress: f64 },
    /// No live sources; the last score is held rather than reported as zero
    NoData { held: Option<StressScore> },
    Scored {
        score: StressScore,
        #[serde(skip_serializing_if = "Option::is_none")]
        intervention: Option<InterventionSignal>,
    },
}

impl TickOutcome {
    pub fn intervention(&self) -> Option<&InterventionSignal> {
        match self {
            TickOutcome::Scored { intervention, .. } => intervention.as_ref(),
            _ => None,
        }
    }

    pub fn score(&self) -> Option<&StressScore> {
        match self {
            TickOutcome::Scored { score, .. } => Some(score),
            TickOutcome::NoData { held } => held.as_ref(),
            _ => None,
        }
    }
}

/// Stateful scoring engine
pub struct StressEngine<S: StateStore = MemoryStore> {
    config: EngineConfig,
    calibrator: Calibrator,
    aggregator: SharedAggregator,
    scorer: StressScorer,
    scheduler: AnnoyanceScheduler,
    policy: Box<dyn InterventionPolicy + Send>,
    store: S,
    enabled: bool,
    last_score: Option<StressScore>,
    last_blend: Option<DateTime<Utc>>,
    last_sync: Option<DateTime<Utc>>,
    current_day: Option<NaiveDate>,
    dirty: bool,
    /// A reset whose key removals have not all succeeded yet
    pending_clear: bool,
}

impl StressEngine<MemoryStore> {
    /// Engine with default configuration and in-memory state
    pub fn in_memory() -> Self {
        Self::assemble(EngineConfig::default(), MemoryStore::new())
    }
}

impl<S: StateStore> StressEngine<S> {
    /// Build an engine and restore whatever state `store` holds
    pub fn new(config: EngineConfig, store: S) -> Result<Self, EngineError> {
        config.validate()?;
        let mut engine = Self::assemble(config, store);
        engine.load_state();
        Ok(engine)
    }

    fn assemble(config: EngineConfig, store: S) -> Self {
        Self {
            calibrator: Calibrator::new(config.calibration_duration_seconds),
            aggregator: SharedAggregator::new(MetricAggregator::new(config.aggregate_ttl_seconds)),
            scorer: StressScorer::new(config.sensitivity),
            scheduler: AnnoyanceScheduler::new(config.scheduler.clone()),
            policy: Box::new(NoPolicy),
            store,
            enabled: true,
            last_score: None,
            last_blend: None,
            last_sync: None,
            current_day: None,
            dirty: false,
            pending_clear: false,
            config,
        }
    }

    pub fn with_policy(mut self, policy: impl InterventionPolicy + Send + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Handle for producers on other threads
    pub fn aggregator_handle(&self) -> SharedAggregator {
        self.aggregator.clone()
    }

    pub fn baseline(&self) -> Option<&Baseline> {
        self.calibrator.baseline()
    }

    pub fn baseline_history(&self) -> &BaselineHistory {
        self.calibrator.history()
    }

    pub fn last_score(&self) -> Option<&StressScore> {
        self.last_score.as_ref()
    }

    pub fn calibration_state(&self, now: DateTime<Utc>) -> CalibrationState {
        self.calibrator.state(now)
    }

    pub fn scheduler_status(&self, now: DateTime<Utc>) -> SchedulerStatus {
        self.scheduler.status(now)
    }

    pub fn annoyance_state(&self) -> &AnnoyanceState {
        self.scheduler.state()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the last persistence attempt failed
    pub fn has_pending_writes(&self) -> bool {
        self.dirty || self.pending_clear
    }

    // ------------------------------------------------------------------
    // Metric intake
    // ------------------------------------------------------------------

    /// Accept a snapshot from a metric source
    pub fn push_snapshot(&mut self, source_id: &str, snapshot: MetricSnapshot, now: DateTime<Utc>) {
        if !self.enabled {
            return;
        }
        self.aggregator.record(source_id, snapshot, now);

        if self.calibrator.session().is_some() {
            let clean = MetricNormalizer::sanitize(snapshot).snapshot;
            match self.calibrator.add_sample(clean, now) {
                Ok(CalibrationStatus::Completed(_)) => self.on_calibration_complete(now),
                Ok(CalibrationStatus::Collecting { .. }) => {
                    self.persist_calibration(now);
                }
                Err(err) => tracing::warn!(error = %err, "calibration sample rejected"),
            }
        }
    }

    /// Open a calibration session
    pub fn start_calibration(&mut self, now: DateTime<Utc>) {
        self.calibrator.start(now);
        self.last_score = None;
        self.persist_calibration(now);
    }

    fn on_calibration_complete(&mut self, now: DateTime<Utc>) {
        self.current_day = Some(now.date_naive());
        self.last_blend = Some(now);
        self.persist_baseline();
        self.persist_history();
        self.persist_calibration(now);
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Run one evaluation cycle
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        if !self.enabled {
            return TickOutcome::Disabled;
        }

        if self.has_pending_writes() {
            self.flush(now);
        }
        self.maybe_sync(now);

        let aggregate = self.aggregator.compute_aggregate(now);

        let calibrating = self.poll_calibration(now);
        if calibrating && !(self.config.blending.enabled && self.calibrator.baseline().is_some()) {
            return TickOutcome::Calibrating {
                progress: self.calibrator.progress(now),
            };
        }

        let Some(baseline) = self.calibrator.baseline() else {
            return TickOutcome::Uncalibrated;
        };

        let Some(aggregate) = aggregate else {
            tracing::debug!(error = %EngineError::StaleAggregate, "holding last score");
            return TickOutcome::NoData {
                held: self.last_score.clone(),
            };
        };

        let score = self.scorer.score(&aggregate, baseline, now);
        self.last_score = Some(score.clone());

        self.roll_day(now);
        if !calibrating {
            self.maybe_blend(&aggregate, &score, now);
        }

        let intervention = self.select_intervention(&score, now);
        TickOutcome::Scored {
            score,
            intervention,
        }
    }

    /// Returns whether a session is still open after polling
    fn poll_calibration(&mut self, now: DateTime<Utc>) -> bool {
        if self.calibrator.session().is_none() {
            return false;
        }
        match self.calibrator.poll(now) {
            Ok(CalibrationStatus::Completed(_)) => {
                self.on_calibration_complete(now);
                false
            }
            Ok(CalibrationStatus::Collecting { .. }) => true,
            Err(EngineError::InsufficientCalibrationData) => true,
            Err(err) => {
                tracing::warn!(error = %err, "calibration poll failed");
                self.calibrator.is_calibrating()
            }
        }
    }

    fn select_intervention(
        &self,
        score: &StressScore,
        now: DateTime<Utc>,
    ) -> Option<InterventionSignal> {
        if score.level == StressLevel::Normal {
            return None;
        }
        if !self.scheduler.should_intervene(now, score.severity) {
            return None;
        }

        let signal = InterventionSignal {
            level: score.level,
            severity: score.severity,
            combined: score.combined,
            percentage: score.percentage,
            timestamp: now,
            intervention_selected: self.policy.select(score),
        };
        tracing::info!(
            level = ?signal.level,
            severity = ?signal.severity,
            percentage = signal.percentage,
            "intervention eligible"
        );
        Some(signal)
    }

    /// Archive the baseline once per calendar day
    fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        match self.current_day {
            Some(day) if day == today => {}
            Some(_) => {
                self.calibrator.archive_baseline();
                self.current_day = Some(today);
                self.persist_history();
            }
            None => self.current_day = Some(today),
        }
    }

    /// Slow exponential drift of the baseline towards calm behavior
    fn maybe_blend(&mut self, aggregate: &MetricSnapshot, score: &StressScore, now: DateTime<Utc>) {
        let blending = &self.config.blending;
        if !blending.enabled || score.level != StressLevel::Normal {
            return;
        }
        let interval = Duration::seconds(i64::from(blending.interval_seconds));
        if matches!(self.last_blend, Some(last) if now - last < interval) {
            return;
        }
        let alpha = blending.alpha;
        if let Some(baseline) = self.calibrator.baseline_mut() {
            baseline.blend(aggregate, alpha, now);
            self.last_blend = Some(now);
            self.persist_baseline();
        }
    }

    // ------------------------------------------------------------------
    // Presenter feedback
    // ------------------------------------------------------------------

    pub fn record_shown(&mut self, now: DateTime<Utc>) {
        self.scheduler.record_shown(now);
        self.persist_annoyance();
    }

    pub fn record_completed(&mut self, now: DateTime<Utc>, duration_ms: u64) {
        self.scheduler.record_completed(now, duration_ms);
        self.persist_annoyance();
    }

    pub fn record_dismissed(&mut self, now: DateTime<Utc>) {
        self.scheduler.record_dismissed(now);
        self.persist_annoyance();
    }

    // ------------------------------------------------------------------
    // Reset / enable
    // ------------------------------------------------------------------

    /// Drop baseline, calibration, scores and scheduler state, in memory and on disk
    pub fn reset(&mut self) {
        self.calibrator.reset();
        self.scheduler.reset();
        self.aggregator.clear();
        self.last_score = None;
        self.last_blend = None;
        self.current_day = None;
        self.dirty = false;
        self.clear_store();
        tracing::info!("engine state reset");
    }

    /// Switch detection on or off; switching off clears all state
    pub fn set_enabled(&mut self, enabled: bool) {
        if !enabled && self.enabled {
            self.reset();
        }
        self.enabled = enabled;
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Remove every persisted slot; any failure leaves the clear pending
    fn clear_store(&mut self) {
        let mut failed = false;
        for key in StateKey::ALL {
            if let Err(err) = self.store.remove(&key.key()) {
                tracing::warn!(key = %key.key(), error = %err, "failed to clear persisted state");
                failed = true;
            }
        }
        self.pending_clear = failed;
    }

    fn write<T: Serialize>(&mut self, key: StateKey, value: &T) {
        if let Err(err) = write_json(&mut self.store, key, value) {
            tracing::warn!(key = %key.key(), error = %err, "persistence write failed");
            self.dirty = true;
        }
    }

    fn persist_baseline(&mut self) {
        if let Some(baseline) = self.calibrator.baseline().cloned() {
            self.write(StateKey::Baseline, &baseline);
        }
    }

    fn persist_history(&mut self) {
        let history = self.calibrator.history().clone();
        self.write(StateKey::BaselineHistory, &history);
    }

    fn persist_calibration(&mut self, now: DateTime<Utc>) {
        let state = self.calibrator.state(now);
        let samples = self.calibrator.samples().to_vec();
        self.write(StateKey::CalibrationState, &state);
        self.write(StateKey::CalibrationData, &samples);
    }

    fn persist_annoyance(&mut self) {
        let state = self.scheduler.state().clone();
        self.write(StateKey::AnnoyanceLog, &state.intervention_log);
        self.write(StateKey::AnnoyanceState, &state.counters());
    }

    /// Retry a pending clear, then rewrite every slot from in-memory state
    pub fn flush(&mut self, now: DateTime<Utc>) {
        if self.pending_clear {
            self.clear_store();
        }
        self.dirty = false;
        self.persist_baseline();
        self.persist_history();
        self.persist_calibration(now);
        self.persist_annoyance();
    }

    /// Re-read shared state written by other contexts
    fn maybe_sync(&mut self, now: DateTime<Utc>) {
        let interval = Duration::seconds(i64::from(self.config.sync_interval_seconds));
        if matches!(self.last_sync, Some(last) if now - last < interval) {
            return;
        }
        self.last_sync = Some(now);
        // Unwritten local changes win over whatever storage holds
        if self.has_pending_writes() {
            return;
        }
        self.sync_from_store();
    }

    /// Pull baseline and scheduler state from storage
    ///
    /// Missing slots mean another context reset the engine, so the matching local
    /// state is dropped too. An open calibration session keeps its own baseline.
    pub fn sync_from_store(&mut self) {
        if self.calibrator.session().is_none() {
            match self.read_baseline() {
                Ok(Some(baseline)) => self.calibrator.set_baseline(baseline),
                Ok(None) => {
                    if self.calibrator.clear_baseline().is_some() {
                        tracing::info!("persisted baseline removed elsewhere; dropping local copy");
                        self.last_score = None;
                        self.last_blend = None;
                    }
                }
                // Rewrite ours over an unreadable slot
                Err(_) => self.persist_baseline(),
            }
        }
        if let Some(state) = self.read_annoyance() {
            self.scheduler.set_state(state);
        }
    }

    fn load_state(&mut self) {
        if let Ok(Some(baseline)) = self.read_baseline() {
            self.calibrator.set_baseline(baseline);
        }
        match read_json::<BaselineHistory>(&self.store, StateKey::BaselineHistory) {
            Ok(Some(history)) => self.calibrator.set_history(history),
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, "ignoring unreadable baseline history"),
        }

        let state = read_json::<CalibrationState>(&self.store, StateKey::CalibrationState);
        if let Ok(Some(state)) = state {
            let samples = read_json::<Vec<MetricSnapshot>>(&self.store, StateKey::CalibrationData)
                .ok()
                .flatten()
                .unwrap_or_default();
            self.calibrator.resume(&state, samples);
        }

        if let Some(state) = self.read_annoyance() {
            self.scheduler.set_state(state);
        }
    }

    /// `Ok(None)` when the slot is absent; an invalid baseline is discarded
    fn read_baseline(&mut self) -> Result<Option<Baseline>, EngineError> {
        let raw = match self.store.get(&StateKey::Baseline.key()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(err) => {
                tracing::warn!(error = %err, "baseline unreadable");
                return Err(err);
            }
        };
        match Baseline::from_json(&raw) {
            Ok(baseline) => Ok(Some(baseline)),
            Err(err) => {
                tracing::warn!(error = %err, "discarding invalid persisted baseline");
                if let Err(err) = self.store.remove(&StateKey::Baseline.key()) {
                    tracing::warn!(error = %err, "failed to discard invalid baseline");
                }
                Err(err)
            }
        }
    }

    /// Absent slots read as a fresh scheduler; unreadable ones as `None`
    fn read_annoyance(&self) -> Option<AnnoyanceState> {
        let log = read_json::<Vec<InterventionLogEntry>>(&self.store, StateKey::AnnoyanceLog);
        let counters = read_json::<AnnoyanceCounters>(&self.store, StateKey::AnnoyanceState);
        match (log, counters) {
            (Ok(log), Ok(counters)) => Some(AnnoyanceState::from_parts(
                log.unwrap_or_default(),
                counters.unwrap_or_default(),
            )),
            (Err(err), _) | (_, Err(err)) => {
                tracing::warn!(error = %err, "ignoring unreadable annoyance state");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Sensitivity;
    use crate::policy::PolicyTable;
    use crate::types::{MetricField, Severity};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
    }

    fn secs(s: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(s)
    }

    fn calm(ts: DateTime<Utc>, jitter: f64) -> MetricSnapshot {
        let mut s = MetricSnapshot::zeroed(ts);
        s.mouse.click_frequency_per_min = 9.0 + jitter;
        s.mouse.multi_click_rate_per_min = 1.0;
        s.mouse.movement_velocity = 400.0 + jitter * 10.0;
        s.mouse.movement_acceleration = 900.0;
        s.mouse.mouse_jitter = 0.2;
        s.mouse.path_efficiency = 0.85;
        s.mouse.pause_ratio = 0.3;
        s.mouse.scroll_velocity = 200.0;
        s.keyboard.typing_error_rate = 0.04;
        s.keyboard.typing_speed_per_min = 220.0;
        s.keyboard.pause_regularity = 0.3;
        s.keyboard.avg_pause_duration = 600.0;
        s.scroll.velocity = 200.0;
        s
    }

    fn stressed(ts: DateTime<Utc>) -> MetricSnapshot {
        let mut s = calm(ts, 0.0);
        s.mouse.click_frequency_per_min = 40.0;
        s.mouse.multi_click_rate_per_min = 10.0;
        s.mouse.movement_velocity = 2000.0;
        s.mouse.movement_acceleration = 6000.0;
        s.mouse.mouse_jitter = 2.0;
        s.mouse.scroll_velocity = 1500.0;
        s.keyboard.typing_error_rate = 0.4;
        s
    }

    fn calibrated_engine() -> StressEngine {
        let config = EngineConfig {
            calibration_duration_seconds: 10,
            ..EngineConfig::default()
        };
        let mut engine = StressEngine::new(config, MemoryStore::new())
            .unwrap()
            .with_policy(PolicyTable::new().with(Severity::Mild, "breathing"));
        engine.start_calibration(t0());
        for i in 0..=10 {
            engine.push_snapshot("tab-1", calm(secs(i), (i % 3) as f64), secs(i));
        }
        assert!(engine.baseline().is_some());
        engine
    }

    #[test]
    fn test_uncalibrated_engine() {
        let mut engine = StressEngine::in_memory();
        engine.push_snapshot("tab", calm(t0(), 0.0), t0());
        assert_eq!(engine.tick(t0()), TickOutcome::Uncalibrated);
    }

    #[test]
    fn test_calibrating_suspends_scoring() {
        let mut engine = StressEngine::in_memory();
        engine.start_calibration(t0());
        engine.push_snapshot("tab", calm(secs(30), 0.0), secs(30));

        match engine.tick(secs(30)) {
            TickOutcome::Calibrating { progress } => assert!((progress - 0.5).abs() < 1e-9),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_calibration_completes_on_tick_poll() {
        let config = EngineConfig {
            calibration_duration_seconds: 10,
            ..EngineConfig::default()
        };
        let mut engine = StressEngine::new(config, MemoryStore::new()).unwrap();
        engine.start_calibration(t0());
        engine.push_snapshot("tab", calm(secs(1), 0.0), secs(1));

        // No further samples; the tick notices the window has elapsed
        let outcome = engine.tick(secs(11));
        assert!(engine.baseline().is_some());
        assert!(matches!(outcome, TickOutcome::Scored { .. }));
    }

    #[test]
    fn test_calm_behavior_scores_normal() {
        let mut engine = calibrated_engine();
        engine.push_snapshot("tab-1", calm(secs(20), 1.0), secs(20));

        let outcome = engine.tick(secs(20));
        let score = outcome.score().unwrap();
        assert_eq!(score.level, StressLevel::Normal);
        assert!(outcome.intervention().is_none());
    }

    #[test]
    fn test_stress_emits_intervention() {
        let mut engine = calibrated_engine();
        engine.push_snapshot("tab-1", stressed(secs(20)), secs(20));

        let outcome = engine.tick(secs(20));
        let signal = outcome.intervention().expect("intervention expected");
        assert_eq!(signal.level, StressLevel::High);
        assert_eq!(signal.intervention_selected.as_deref(), Some("breathing"));

        // Presenter shows it; cooldown blocks the next tick
        engine.record_shown(secs(21));
        engine.push_snapshot("tab-1", stressed(secs(22)), secs(22));
        let outcome = engine.tick(secs(22));
        assert_eq!(outcome.score().unwrap().level, StressLevel::High);
        assert!(outcome.intervention().is_none());
    }

    #[test]
    fn test_no_live_sources_holds_last_score() {
        let mut engine = calibrated_engine();
        engine.push_snapshot("tab-1", stressed(secs(20)), secs(20));
        let first = engine.tick(secs(20));
        let first_score = first.score().unwrap().clone();

        let outcome = engine.tick(secs(60));
        assert_eq!(
            outcome,
            TickOutcome::NoData {
                held: Some(first_score)
            }
        );
    }

    #[test]
    fn test_blending_moves_baseline_slowly() {
        let mut engine = calibrated_engine();
        let before = engine
            .baseline()
            .unwrap()
            .center(MetricField::ClickFrequencyPerMin);

        let mut quiet = calm(secs(100), 0.0);
        quiet.mouse.click_frequency_per_min = 5.0;
        engine.push_snapshot("tab-1", quiet, secs(100));
        engine.tick(secs(100));

        let after = engine
            .baseline()
            .unwrap()
            .center(MetricField::ClickFrequencyPerMin);
        assert!(after < before);
        assert!(before - after < 0.1);
    }

    #[test]
    fn test_state_persisted_and_restored() {
        let mut engine = calibrated_engine();
        engine.record_shown(secs(20));
        engine.record_dismissed(secs(21));

        let store = engine.store().clone();
        assert!(store.get(&StateKey::Baseline.key()).unwrap().is_some());
        assert!(store.get(&StateKey::AnnoyanceLog.key()).unwrap().is_some());

        let restored = StressEngine::new(EngineConfig::default(), store).unwrap();
        let (a, b) = (restored.baseline().unwrap(), engine.baseline().unwrap());
        assert_eq!(a.sample_count, b.sample_count);
        for field in MetricField::ALL {
            assert!((a.center(field) - b.center(field)).abs() < 1e-9);
        }
        assert_eq!(restored.annoyance_state(), engine.annoyance_state());
    }

    #[test]
    fn test_invalid_persisted_baseline_discarded() {
        let mut store = MemoryStore::new();
        store
            .set(&StateKey::Baseline.key(), r#"{"fields":{}}"#)
            .unwrap();

        let mut engine = StressEngine::new(EngineConfig::default(), store).unwrap();
        assert!(engine.baseline().is_none());
        assert!(engine
            .store()
            .get(&StateKey::Baseline.key())
            .unwrap()
            .is_none());
        assert_eq!(engine.tick(t0()), TickOutcome::Uncalibrated);
    }

    #[test]
    fn test_reset_clears_memory_and_store() {
        let mut engine = calibrated_engine();
        engine.record_shown(secs(20));
        engine.reset();

        assert!(engine.baseline().is_none());
        assert!(engine.last_score().is_none());
        assert_eq!(engine.annoyance_state(), &AnnoyanceState::default());
        assert!(engine.store().is_empty());
    }

    #[test]
    fn test_disable_clears_and_silences() {
        let mut engine = calibrated_engine();
        engine.set_enabled(false);
        assert!(engine.baseline().is_none());
        assert_eq!(engine.tick(secs(20)), TickOutcome::Disabled);

        engine.set_enabled(true);
        assert_eq!(engine.tick(secs(21)), TickOutcome::Uncalibrated);
    }

    #[test]
    fn test_flush_uses_caller_clock() {
        let mut engine = StressEngine::in_memory();
        engine.start_calibration(t0());
        engine.flush(secs(30));

        let state = read_json::<CalibrationState>(engine.store(), StateKey::CalibrationState)
            .unwrap()
            .unwrap();
        assert!(state.is_calibrating);
        assert!((state.progress - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_sync_drops_baseline_removed_from_store() {
        let mut engine = calibrated_engine();
        engine.record_shown(secs(11));

        // Another context reset the shared state
        let mut store = engine.store().clone();
        for key in StateKey::ALL {
            store.remove(&key.key()).unwrap();
        }
        engine.store = store;

        engine.sync_from_store();
        assert!(engine.baseline().is_none());
        assert_eq!(engine.annoyance_state(), &AnnoyanceState::default());
    }

    #[test]
    fn test_sensitivity_from_config() {
        let config = EngineConfig {
            sensitivity: Sensitivity::High,
            ..EngineConfig::default()
        };
        let engine = StressEngine::new(config, MemoryStore::new()).unwrap();
        assert_eq!(engine.config().sensitivity, Sensitivity::High);
    }
}

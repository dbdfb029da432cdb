//! Baseline calibration
//!
//! A calibration session collects metric snapshots for a fixed wall-clock window
//! and then commits a [`Baseline`]. Completion is checked whenever a sample arrives
//! (or on [`Calibrator::poll`]), so missed ticks never stall a session.

use crate::baseline::{Baseline, BaselineHistory};
use crate::error::EngineError;
use crate::types::MetricSnapshot;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An open calibration session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationSession {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub collected_samples: Vec<MetricSnapshot>,
}

/// Persisted view of calibration progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationState {
    pub is_calibrating: bool,
    pub calibration_start_time: Option<DateTime<Utc>>,
    pub progress: f64,
    pub session_id: Option<Uuid>,
}

/// Outcome of feeding the calibrator
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationStatus {
    /// Window still open
    Collecting { progress: f64, samples: usize },
    /// Window elapsed and a baseline was committed
    Completed(Baseline),
}

#[derive(Debug, Clone)]
enum Phase {
    Idle,
    Collecting(CalibrationSession),
    Finalizing,
}

/// Calibrates and owns the active baseline
#[derive(Debug, Clone)]
pub struct Calibrator {
    duration: Duration,
    phase: Phase,
    baseline: Option<Baseline>,
    history: BaselineHistory,
}

impl Calibrator {
    pub fn new(duration_seconds: u32) -> Self {
        Self {
            duration: Duration::seconds(i64::from(duration_seconds)),
            phase: Phase::Idle,
            baseline: None,
            history: BaselineHistory::default(),
        }
    }

    /// Open a fresh session, discarding any samples collected so far
    pub fn start(&mut self, now: DateTime<Utc>) -> Uuid {
        let session_id = Uuid::new_v4();
        self.phase = Phase::Collecting(CalibrationSession {
            session_id,
            started_at: now,
            collected_samples: Vec::new(),
        });
        tracing::info!(%session_id, "calibration started");
        session_id
    }

    pub fn is_calibrating(&self) -> bool {
        !matches!(self.phase, Phase::Idle)
    }

    /// Append a sample and finalize if the window has elapsed
    pub fn add_sample(
        &mut self,
        snapshot: MetricSnapshot,
        now: DateTime<Utc>,
    ) -> Result<CalibrationStatus, EngineError> {
        match &mut self.phase {
            Phase::Idle => Err(EngineError::CalibrationNotActive),
            Phase::Finalizing => Err(EngineError::FinalizeInProgress),
            Phase::Collecting(session) => {
                session.collected_samples.push(snapshot);
                self.poll(now)
            }
        }
    }

    /// Check the window without adding a sample.
    ///
    /// An elapsed window with no samples leaves the session open and reports
    /// [`EngineError::InsufficientCalibrationData`].
    pub fn poll(&mut self, now: DateTime<Utc>) -> Result<CalibrationStatus, EngineError> {
        let session = match &self.phase {
            Phase::Idle => return Err(EngineError::CalibrationNotActive),
            Phase::Finalizing => return Err(EngineError::FinalizeInProgress),
            Phase::Collecting(session) => session,
        };

        if now - session.started_at < self.duration {
            return Ok(CalibrationStatus::Collecting {
                progress: self.progress(now),
                samples: session.collected_samples.len(),
            });
        }

        if session.collected_samples.is_empty() {
            tracing::warn!(
                session_id = %session.session_id,
                "calibration window elapsed without samples, extending"
            );
            return Err(EngineError::InsufficientCalibrationData);
        }

        self.finalize(now).map(CalibrationStatus::Completed)
    }

    fn finalize(&mut self, now: DateTime<Utc>) -> Result<Baseline, EngineError> {
        let session = match std::mem::replace(&mut self.phase, Phase::Finalizing) {
            Phase::Collecting(session) => session,
            other => {
                let err = match other {
                    Phase::Finalizing => EngineError::FinalizeInProgress,
                    _ => EngineError::CalibrationNotActive,
                };
                self.phase = other;
                return Err(err);
            }
        };

        match Baseline::from_samples(&session.collected_samples, now) {
            Ok(baseline) => {
                tracing::info!(
                    session_id = %session.session_id,
                    samples = session.collected_samples.len(),
                    "calibration complete"
                );
                self.commit(baseline.clone());
                self.phase = Phase::Idle;
                Ok(baseline)
            }
            Err(err) => {
                self.phase = Phase::Collecting(session);
                Err(err)
            }
        }
    }

    fn commit(&mut self, baseline: Baseline) {
        if let Some(previous) = self.baseline.replace(baseline) {
            self.history.push(previous);
        }
    }

    /// Fraction of the calibration window elapsed (0-1)
    pub fn progress(&self, now: DateTime<Utc>) -> f64 {
        match &self.phase {
            Phase::Collecting(session) => {
                let total = self.duration.num_milliseconds().max(1) as f64;
                let elapsed = (now - session.started_at).num_milliseconds().max(0) as f64;
                (elapsed / total).clamp(0.0, 1.0)
            }
            Phase::Finalizing => 1.0,
            Phase::Idle => {
                if self.baseline.is_some() {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn state(&self, now: DateTime<Utc>) -> CalibrationState {
        let session = self.session();
        CalibrationState {
            is_calibrating: self.is_calibrating(),
            calibration_start_time: session.map(|s| s.started_at),
            progress: self.progress(now),
            session_id: session.map(|s| s.session_id),
        }
    }

    pub fn session(&self) -> Option<&CalibrationSession> {
        match &self.phase {
            Phase::Collecting(session) => Some(session),
            _ => None,
        }
    }

    /// Samples collected by the open session
    pub fn samples(&self) -> &[MetricSnapshot] {
        self.session()
            .map(|s| s.collected_samples.as_slice())
            .unwrap_or(&[])
    }

    /// Reopen a session persisted by an earlier process
    pub fn resume(&mut self, state: &CalibrationState, samples: Vec<MetricSnapshot>) {
        let (true, Some(started_at)) = (state.is_calibrating, state.calibration_start_time) else {
            return;
        };
        self.phase = Phase::Collecting(CalibrationSession {
            session_id: state.session_id.unwrap_or_else(Uuid::new_v4),
            started_at,
            collected_samples: samples,
        });
    }

    pub fn baseline(&self) -> Option<&Baseline> {
        self.baseline.as_ref()
    }

    pub fn baseline_mut(&mut self) -> Option<&mut Baseline> {
        self.baseline.as_mut()
    }

    /// Install a baseline loaded from storage
    pub fn set_baseline(&mut self, baseline: Baseline) {
        self.baseline = Some(baseline);
    }

    /// Drop the committed baseline, keeping session and history
    pub fn clear_baseline(&mut self) -> Option<Baseline> {
        self.baseline.take()
    }

    pub fn history(&self) -> &BaselineHistory {
        &self.history
    }

    pub fn set_history(&mut self, history: BaselineHistory) {
        self.history = history;
    }

    /// Archive a copy of the active baseline
    pub fn archive_baseline(&mut self) {
        if let Some(baseline) = &self.baseline {
            self.history.push(baseline.clone());
        }
    }

    /// Drop baseline, session and history
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.baseline = None;
        self.history.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::scale_floor;
    use crate::types::MetricField;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    fn sample(clicks: f64) -> MetricSnapshot {
        let mut s = MetricSnapshot::zeroed(t0());
        s.mouse.click_frequency_per_min = clicks;
        s
    }

    #[test]
    fn test_collecting_until_window_elapses() {
        let mut calibrator = Calibrator::new(60);
        calibrator.start(t0());

        let status = calibrator
            .add_sample(sample(9.0), t0() + Duration::seconds(30))
            .unwrap();
        assert_eq!(
            status,
            CalibrationStatus::Collecting {
                progress: 0.5,
                samples: 1
            }
        );
        assert!(calibrator.baseline().is_none());
        assert!(calibrator.is_calibrating());
    }

    #[test]
    fn test_completes_on_elapsed_sample() {
        let mut calibrator = Calibrator::new(60);
        calibrator.start(t0());
        calibrator
            .add_sample(sample(8.0), t0() + Duration::seconds(10))
            .unwrap();
        calibrator
            .add_sample(sample(9.0), t0() + Duration::seconds(20))
            .unwrap();

        let status = calibrator
            .add_sample(sample(10.0), t0() + Duration::seconds(60))
            .unwrap();
        let CalibrationStatus::Completed(baseline) = status else {
            panic!("expected completion");
        };

        assert_eq!(baseline.center(MetricField::ClickFrequencyPerMin), 9.0);
        assert_eq!(calibrator.baseline(), Some(&baseline));
        assert!(!calibrator.is_calibrating());
        assert!(calibrator.samples().is_empty());
    }

    #[test]
    fn test_single_sample_completes_with_floor() {
        let mut calibrator = Calibrator::new(1);
        calibrator.start(t0());
        let status = calibrator
            .add_sample(sample(9.0), t0() + Duration::seconds(5))
            .unwrap();

        let CalibrationStatus::Completed(baseline) = status else {
            panic!("expected completion");
        };
        for field in MetricField::ALL {
            let fb = baseline.get(field).unwrap();
            assert_eq!(fb.scale, scale_floor(fb.center));
        }
    }

    #[test]
    fn test_elapsed_without_samples_extends_session() {
        let mut calibrator = Calibrator::new(60);
        let session_id = calibrator.start(t0());

        let result = calibrator.poll(t0() + Duration::seconds(90));
        assert!(matches!(
            result,
            Err(EngineError::InsufficientCalibrationData)
        ));
        assert!(calibrator.is_calibrating());
        assert_eq!(calibrator.session().unwrap().session_id, session_id);

        // First late sample completes immediately
        let status = calibrator
            .add_sample(sample(9.0), t0() + Duration::seconds(91))
            .unwrap();
        assert!(matches!(status, CalibrationStatus::Completed(_)));
    }

    #[test]
    fn test_finalize_is_not_reentrant() {
        let mut calibrator = Calibrator::new(60);
        calibrator.start(t0());
        calibrator.phase = Phase::Finalizing;

        let result = calibrator.add_sample(sample(9.0), t0() + Duration::seconds(61));
        assert!(matches!(result, Err(EngineError::FinalizeInProgress)));
        assert!(matches!(
            calibrator.poll(t0() + Duration::seconds(61)),
            Err(EngineError::FinalizeInProgress)
        ));
    }

    #[test]
    fn test_sample_without_session_rejected() {
        let mut calibrator = Calibrator::new(60);
        let result = calibrator.add_sample(sample(9.0), t0());
        assert!(matches!(result, Err(EngineError::CalibrationNotActive)));
    }

    #[test]
    fn test_restart_clears_samples() {
        let mut calibrator = Calibrator::new(60);
        calibrator.start(t0());
        calibrator
            .add_sample(sample(9.0), t0() + Duration::seconds(1))
            .unwrap();
        calibrator.start(t0() + Duration::seconds(2));
        assert!(calibrator.samples().is_empty());
    }

    #[test]
    fn test_recalibration_archives_previous_baseline() {
        let mut calibrator = Calibrator::new(1);
        calibrator.start(t0());
        calibrator
            .add_sample(sample(9.0), t0() + Duration::seconds(2))
            .unwrap();
        calibrator.start(t0() + Duration::seconds(3));
        calibrator
            .add_sample(sample(12.0), t0() + Duration::seconds(5))
            .unwrap();

        assert_eq!(calibrator.history().len(), 1);
        assert_eq!(
            calibrator
                .baseline()
                .unwrap()
                .center(MetricField::ClickFrequencyPerMin),
            12.0
        );
    }

    #[test]
    fn test_state_and_resume() {
        let mut calibrator = Calibrator::new(60);
        let session_id = calibrator.start(t0());
        calibrator
            .add_sample(sample(9.0), t0() + Duration::seconds(15))
            .unwrap();

        let state = calibrator.state(t0() + Duration::seconds(15));
        assert!(state.is_calibrating);
        assert_eq!(state.session_id, Some(session_id));
        assert_eq!(state.progress, 0.25);

        let mut restored = Calibrator::new(60);
        restored.resume(&state, calibrator.samples().to_vec());
        assert_eq!(restored.samples().len(), 1);
        assert_eq!(restored.session().unwrap().started_at, t0());
    }

    #[test]
    fn test_reset_discards_everything() {
        let mut calibrator = Calibrator::new(1);
        calibrator.start(t0());
        calibrator
            .add_sample(sample(9.0), t0() + Duration::seconds(2))
            .unwrap();
        calibrator.archive_baseline();
        calibrator.start(t0() + Duration::seconds(3));

        calibrator.reset();
        assert!(calibrator.baseline().is_none());
        assert!(calibrator.history().is_empty());
        assert!(!calibrator.is_calibrating());
        assert_eq!(calibrator.progress(t0()), 0.0);
    }
}

//! Calm Flux - Behavioral stress scoring and intervention scheduling engine
//!
//! Calm Flux turns pre-aggregated interaction metrics (pointer movement, clicks,
//! typing, scrolling) into an explainable stress score and decides when a
//! non-intrusive intervention may be shown:
//! calibration → aggregation → scoring → annoyance-controlled scheduling.
//!
//! ## Modules
//!
//! - **Calibration**: Derive a personal median/MAD baseline from a short window
//! - **Aggregation**: Merge snapshots from many concurrent metric sources
//! - **Scoring**: Direction-aware weighted z-scores, levels and percentages
//! - **Scheduling**: Cooldowns, hourly/daily caps and auto-snooze
//! - **Engine**: Tick-driven orchestration with best-effort persistence

pub mod aggregator;
pub mod baseline;
pub mod calibration;
pub mod config;
pub mod encoder;
pub mod error;
pub mod normalizer;
pub mod pipeline;
pub mod policy;
pub mod scheduler;
pub mod scorer;
pub mod storage;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use aggregator::{MetricAggregator, SharedAggregator};
pub use baseline::{Baseline, BaselineHistory};
pub use calibration::{CalibrationState, Calibrator};
pub use config::{EngineConfig, Sensitivity};
pub use encoder::SignalEncoder;
pub use error::EngineError;
pub use pipeline::{StressEngine, TickOutcome};
pub use policy::{InterventionPolicy, PolicyTable};
pub use scheduler::{AnnoyanceScheduler, SchedulerStatus};
pub use scorer::StressScorer;
pub use storage::{FileStore, MemoryStore, StateStore};
pub use types::{InterventionSignal, MetricSnapshot, Severity, StressLevel, StressScore};

/// Library version embedded in all signal payloads
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for signal payloads
pub const PRODUCER_NAME: &str = "calm-flux";

//! Error types for Calm Flux

use thiserror::Error;

/// Errors that can occur inside the scoring engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Calibration window elapsed without any samples")]
    InsufficientCalibrationData,

    #[error("Invalid baseline structure: {0}")]
    InvalidBaselineStructure(String),

    #[error("No live metric sources")]
    StaleAggregate,

    #[error("Failed to persist {key}: {reason}")]
    PersistenceWriteFailure { key: String, reason: String },

    #[error("Calibration finalize already in progress")]
    FinalizeInProgress,

    #[error("No calibration session is active")]
    CalibrationNotActive,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether the engine can keep scoring after this error.
    ///
    /// Everything except configuration errors degrades to "no intervention this tick".
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EngineError::InvalidConfig(_))
    }
}

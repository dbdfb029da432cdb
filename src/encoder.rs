//! Signal encoding
//!
//! Renders tick outcomes into self-describing JSON payloads for the intervention
//! presenter and other downstream consumers.

use crate::error::EngineError;
use crate::pipeline::TickOutcome;
use crate::scheduler::SchedulerStatus;
use crate::{PRODUCER_NAME, VERSION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload format version
pub const SIGNAL_VERSION: &str = "1.0.0";

/// Who produced a payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// One encoded tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPayload {
    pub signal_version: String,
    pub producer: SignalProducer,
    pub computed_at_utc: String,
    pub outcome: TickOutcome,
    pub scheduler: SchedulerStatus,
}

/// Encoder carrying a stable instance id across payloads
pub struct SignalEncoder {
    instance_id: String,
}

impl Default for SignalEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalEncoder {
    /// Create an encoder with a fresh instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn encode(
        &self,
        outcome: &TickOutcome,
        scheduler: SchedulerStatus,
        computed_at: DateTime<Utc>,
    ) -> SignalPayload {
        SignalPayload {
            signal_version: SIGNAL_VERSION.to_string(),
            producer: SignalProducer {
                name: PRODUCER_NAME.to_string(),
                version: VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            computed_at_utc: computed_at.to_rfc3339(),
            outcome: outcome.clone(),
            scheduler,
        }
    }

    /// Encode to a compact single-line JSON string
    pub fn encode_to_json(
        &self,
        outcome: &TickOutcome,
        scheduler: SchedulerStatus,
        computed_at: DateTime<Utc>,
    ) -> Result<String, EngineError> {
        let payload = self.encode(outcome, scheduler, computed_at);
        serde_json::to_string(&payload).map_err(EngineError::JsonError)
    }
}

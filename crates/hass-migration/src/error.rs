use hass_core::HassError;
use thiserror::Error;

use crate::phase::MigrationPhase;

/// 迁移错误
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Invalid migration config: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] HassError),

    #[error("Extraction failed for {measurement}: {reason}")]
    Extraction { measurement: String, reason: String },

    #[error("Consistency violation: rate {rate:.3} below required {required:.3}")]
    ConsistencyViolation { rate: f64, required: f64 },

    #[error("Phase {phase} failed: {reason}")]
    PhaseFailed {
        phase: MigrationPhase,
        reason: String,
    },

    #[error("Migration cancelled")]
    Cancelled,

    #[error("Migration already in progress")]
    AlreadyRunning,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unexpected failure: {0}")]
    Panic(String),
}

impl MigrationError {
    pub fn phase(phase: MigrationPhase, reason: impl Into<String>) -> Self {
        MigrationError::PhaseFailed {
            phase,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MigrationError>;

//! Session-level errors.
//!
//! Per-specialist problems never show up here: they are recovered inside the
//! round that hit them and recorded as [`SpecialistFailure`]s.
//!
//! [`SpecialistFailure`]: crate::specialist::SpecialistFailure

use thiserror::Error;

use crate::config::ConfigError;
use crate::debate::DebateError;
use crate::session::WorkflowStage;

/// Errors that end a deliberation session or reject an operation on it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DeliberationError {
    /// The final arbiter failed or timed out. No decision is fabricated.
    #[error("arbitrator unavailable: {0}")]
    ArbitratorUnavailable(String),

    /// Every specialist failed during initial analysis.
    #[error("no specialist produced an initial proposal")]
    NoProposals,

    #[error("invalid stage transition {from} -> {to}")]
    InvalidTransition {
        from: WorkflowStage,
        to: WorkflowStage,
    },

    /// The session is FINALIZED or FAILED and can no longer change.
    #[error("session {0} is closed")]
    SessionClosed(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("debate error: {0}")]
    Debate(#[from] DebateError),
}

pub type Result<T> = std::result::Result<T, DeliberationError>;

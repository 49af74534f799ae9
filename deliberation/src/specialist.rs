//! Specialist opinion capability: the boundary to whatever produces opinions.
//!
//! The engine never looks inside an [`OpinionGenerator`]. It only needs one
//! proposal per call, or a failure. Retries and backoff belong to the
//! implementation, not to the orchestration core.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::proposal::{Proposal, SpecialistId};

/// Errors an opinion generator can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpinionError {
    #[error("specialist unavailable: {0}")]
    Unavailable(String),

    #[error("opinion request timed out after {0}ms")]
    Timeout(u64),

    #[error("malformed opinion: {0}")]
    Malformed(String),
}

/// What a specialist is told about the session when asked for an opinion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    pub topic: String,
    /// Specialist being asked.
    pub specialist_id: SpecialistId,
    /// 0 for the initial analysis, 1.. for debate rounds.
    pub round: u32,
    /// Caller-supplied context (brand guidelines, metrics, ...).
    #[serde(default)]
    pub context: serde_json::Value,
}

/// Produces a specialist's proposal, given the other current proposals.
///
/// Used for both the initial analysis (`others` is empty) and debate
/// responses.
#[async_trait]
pub trait OpinionGenerator: Send + Sync {
    async fn generate(
        &self,
        ctx: &SessionContext,
        others: &[Proposal],
    ) -> Result<Proposal, OpinionError>;
}

/// Why a specialist's contribution could not be used as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Unavailable,
    TimedOut,
    /// The record failed validation and was discarded.
    Malformed,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Malformed => write!(f, "malformed"),
        }
    }
}

/// A recovered per-specialist failure, kept in the session record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistFailure {
    pub specialist_id: SpecialistId,
    pub round: u32,
    pub kind: FailureKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl SpecialistFailure {
    pub fn new(specialist_id: &str, round: u32, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            specialist_id: specialist_id.to_string(),
            round,
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Outcome of a single opinion request.
#[derive(Debug, Clone)]
pub(crate) struct Solicited {
    pub specialist_id: SpecialistId,
    /// Usable proposal, possibly a conservative stand-in.
    pub proposal: Option<Proposal>,
    pub failure: Option<SpecialistFailure>,
}

/// Ask one specialist for an opinion, bounded by `timeout`.
///
/// Never fails: errors and timeouts come back as a recorded failure with no
/// proposal. A record that fails validation is also recorded as a failure.
/// In the initial analysis (round 0) it is replaced by the conservative
/// default; in debate rounds no proposal is returned, so the caller keeps the
/// specialist's previous one.
pub(crate) async fn solicit(
    generator: &dyn OpinionGenerator,
    ctx: SessionContext,
    others: Vec<Proposal>,
    timeout: Duration,
) -> Solicited {
    let specialist_id = ctx.specialist_id.clone();
    let round = ctx.round;

    let failed = |kind: FailureKind, message: String| {
        warn!(
            session_id = %ctx.session_id,
            specialist = %specialist_id,
            round,
            kind = %kind,
            "Specialist opinion unavailable: {}",
            message
        );
        Solicited {
            specialist_id: specialist_id.clone(),
            proposal: None,
            failure: Some(SpecialistFailure::new(&specialist_id, round, kind, message)),
        }
    };

    let result = match tokio::time::timeout(timeout, generator.generate(&ctx, &others)).await {
        Ok(result) => result,
        Err(_elapsed) => {
            return failed(
                FailureKind::TimedOut,
                format!("no response within {}ms", timeout.as_millis()),
            )
        }
    };

    match result {
        Ok(proposal) => {
            let (proposal, issues) = proposal.sanitize(&specialist_id);
            let proposal = proposal.for_round(round);
            if issues.is_empty() {
                return Solicited {
                    specialist_id,
                    proposal: Some(proposal),
                    failure: None,
                };
            }
            let message = issues.join("; ");
            warn!(
                session_id = %ctx.session_id,
                specialist = %specialist_id,
                round,
                "Malformed opinion discarded: {}",
                message
            );
            let proposal = (round == 0).then_some(proposal);
            Solicited {
                failure: Some(SpecialistFailure::new(
                    &specialist_id,
                    round,
                    FailureKind::Malformed,
                    message,
                )),
                specialist_id,
                proposal,
            }
        }
        Err(OpinionError::Timeout(ms)) => {
            failed(FailureKind::TimedOut, format!("generator timed out after {}ms", ms))
        }
        Err(OpinionError::Malformed(reason)) => failed(FailureKind::Malformed, reason),
        Err(OpinionError::Unavailable(reason)) => failed(FailureKind::Unavailable, reason),
    }
}

/// The safest stand-in when a specialist returned nothing usable: an
/// abstention with zero confidence, flagged degraded.
pub fn conservative_default(specialist_id: &str, round: u32) -> Proposal {
    Proposal::conservative(specialist_id, round)
}

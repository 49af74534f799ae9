//! Session record persistence: versioned JSON with integrity validation.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::{DeliberationSession, WorkflowStage};

/// Error during persistence operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    #[error("serialize failed: {reason}")]
    SerializeFailed { reason: String },

    #[error("deserialize failed: {reason}")]
    DeserializeFailed { reason: String },

    #[error("version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("io error on {path}: {reason}")]
    Io { path: String, reason: String },
}

/// A complete session record for storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Schema version for forward compatibility.
    pub version: u32,
    pub session: DeliberationSession,
    pub saved_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Current schema version.
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(session: &DeliberationSession) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            session: session.clone(),
            saved_at: Utc::now(),
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, PersistenceError> {
        serde_json::to_string_pretty(self).map_err(|e| PersistenceError::SerializeFailed {
            reason: e.to_string(),
        })
    }

    /// Deserialize from JSON string.
    pub fn from_json(json: &str) -> Result<Self, PersistenceError> {
        let record: Self =
            serde_json::from_str(json).map_err(|e| PersistenceError::DeserializeFailed {
                reason: e.to_string(),
            })?;

        if record.version > Self::CURRENT_VERSION {
            return Err(PersistenceError::VersionMismatch {
                expected: Self::CURRENT_VERSION,
                found: record.version,
            });
        }

        Ok(record)
    }

    pub async fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        let json = self.to_json()?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| PersistenceError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    pub async fn load(path: &Path) -> Result<Self, PersistenceError> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PersistenceError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Self::from_json(&json)
    }
}

/// Integrity check result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityStatus {
    Valid,
    /// Usable, with minor issues.
    Recoverable { warnings: Vec<String> },
    /// Internally inconsistent.
    Corrupted { errors: Vec<String> },
}

impl IntegrityStatus {
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Valid | Self::Recoverable { .. })
    }
}

fn in_unit_range(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

/// Check a stored record for internal consistency.
pub fn validate_record(record: &SessionRecord) -> IntegrityStatus {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<String> = Vec::new();
    let session = &record.session;

    if record.version > SessionRecord::CURRENT_VERSION {
        errors.push(format!(
            "version {} > current {}",
            record.version,
            SessionRecord::CURRENT_VERSION
        ));
    }

    if !session.stage.is_terminal() {
        warnings.push(format!("session still open at stage {}", session.stage));
    }

    if let Some(last) = session.transitions.last() {
        if last.to != session.stage {
            errors.push(format!(
                "last transition target {} doesn't match current stage {}",
                last.to, session.stage
            ));
        }
    } else if session.stage != WorkflowStage::Initialized {
        errors.push(format!("stage {} with no transition history", session.stage));
    }

    // Rounds
    for (i, round) in session.rounds.iter().enumerate() {
        let expected = i as u32 + 1;
        if round.round != expected {
            errors.push(format!("round {} found where {} expected", round.round, expected));
        }
        if !in_unit_range(round.consensus_score) {
            errors.push(format!(
                "round {} consensus {} outside [0, 1]",
                round.round, round.consensus_score
            ));
        }
        let is_last = i + 1 == session.rounds.len();
        if round.termination_reason.is_some() && !is_last {
            errors.push(format!(
                "round {} has a termination reason but is not the final round",
                round.round
            ));
        }
        if is_last && round.termination_reason.is_none() {
            errors.push(format!("final round {} has no termination reason", round.round));
        }
        for p in round.proposals.iter() {
            if !in_unit_range(p.confidence) {
                errors.push(format!(
                    "round {} proposal from {} has confidence {}",
                    round.round, p.specialist_id, p.confidence
                ));
            }
        }
    }
    if session.rounds.len() as u32 > session.config.max_rounds {
        errors.push(format!(
            "{} rounds exceed max_rounds {}",
            session.rounds.len(),
            session.config.max_rounds
        ));
    }

    if let Some(score) = session.initial_consensus {
        if !in_unit_range(score) {
            errors.push(format!("initial consensus {} outside [0, 1]", score));
        }
    }

    // Outcome
    match session.stage {
        WorkflowStage::Finalized if session.decision.is_none() => {
            errors.push("finalized session has no decision".to_string());
        }
        WorkflowStage::Failed if session.failure_reason.is_none() => {
            warnings.push("failed session has no failure reason".to_string());
        }
        _ => {}
    }
    if session.decision.as_ref().is_some_and(|d| d.degraded) {
        warnings.push("decision was repaired from an invalid verdict".to_string());
    }

    if !errors.is_empty() {
        IntegrityStatus::Corrupted { errors }
    } else if !warnings.is_empty() {
        IntegrityStatus::Recoverable { warnings }
    } else {
        IntegrityStatus::Valid
    }
}

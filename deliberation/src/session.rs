//! Deliberation session record and workflow stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::arbitration::DecisionRecord;
use crate::config::DeliberationConfig;
use crate::conflict::{Conflict, ConflictSummary};
use crate::debate::{DebateRound, DebateSummary};
use crate::error::DeliberationError;
use crate::proposal::{ProposalSet, SpecialistId};
use crate::specialist::SpecialistFailure;

/// Stage of a deliberation workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStage {
    Initialized,
    Analysis,
    ConflictDetection,
    Debate,
    Arbitration,
    Finalized,
    Failed,
}

impl WorkflowStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Failed)
    }

    /// Valid transitions from this stage.
    pub fn valid_transitions(self) -> &'static [WorkflowStage] {
        match self {
            Self::Initialized => &[Self::Analysis, Self::Failed],
            Self::Analysis => &[Self::ConflictDetection, Self::Failed],
            Self::ConflictDetection => &[Self::Debate, Self::Arbitration, Self::Failed],
            Self::Debate => &[Self::Arbitration, Self::Failed],
            Self::Arbitration => &[Self::Finalized, Self::Failed],
            Self::Finalized | Self::Failed => &[],
        }
    }
}

impl std::fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialized => write!(f, "INITIALIZED"),
            Self::Analysis => write!(f, "ANALYSIS"),
            Self::ConflictDetection => write!(f, "CONFLICT_DETECTION"),
            Self::Debate => write!(f, "DEBATE"),
            Self::Arbitration => write!(f, "ARBITRATION"),
            Self::Finalized => write!(f, "FINALIZED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// A stage transition record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTransition {
    pub from: WorkflowStage,
    pub to: WorkflowStage,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// One end-to-end deliberation for a single topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliberationSession {
    /// Correlation id carried through every log line and event.
    pub id: String,
    pub topic: String,
    pub specialists: Vec<SpecialistId>,
    pub config: DeliberationConfig,
    pub stage: WorkflowStage,
    pub transitions: Vec<StageTransition>,
    /// Proposals from the initial analysis.
    pub initial_proposals: ProposalSet,
    pub initial_consensus: Option<f64>,
    pub conflicts: Vec<Conflict>,
    pub conflict_summary: Option<ConflictSummary>,
    /// Specialists that failed or were repaired during initial analysis.
    pub analysis_failures: Vec<SpecialistFailure>,
    pub rounds: Vec<DebateRound>,
    pub debate_summary: Option<DebateSummary>,
    pub final_proposals: ProposalSet,
    pub decision: Option<DecisionRecord>,
    pub failure_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl DeliberationSession {
    /// New session with a fresh uuid.
    pub fn new(topic: &str, specialists: Vec<SpecialistId>, config: DeliberationConfig) -> Self {
        Self::with_id(&Uuid::new_v4().to_string(), topic, specialists, config)
    }

    pub fn with_id(
        id: &str,
        topic: &str,
        specialists: Vec<SpecialistId>,
        config: DeliberationConfig,
    ) -> Self {
        Self {
            id: id.to_string(),
            topic: topic.to_string(),
            specialists,
            config,
            stage: WorkflowStage::Initialized,
            transitions: Vec::new(),
            initial_proposals: ProposalSet::new(),
            initial_consensus: None,
            conflicts: Vec::new(),
            conflict_summary: None,
            analysis_failures: Vec::new(),
            rounds: Vec::new(),
            debate_summary: None,
            final_proposals: ProposalSet::new(),
            decision: None,
            failure_reason: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Move to a new stage with a reason.
    pub fn transition(&mut self, to: WorkflowStage, reason: &str) -> Result<(), DeliberationError> {
        if self.stage.is_terminal() {
            return Err(DeliberationError::SessionClosed(self.id.clone()));
        }
        if !self.stage.valid_transitions().contains(&to) {
            return Err(DeliberationError::InvalidTransition {
                from: self.stage,
                to,
            });
        }
        self.transitions.push(StageTransition {
            from: self.stage,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.stage = to;
        if to.is_terminal() {
            self.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Move to FAILED, keeping everything recorded so far.
    pub fn fail(&mut self, error: &DeliberationError) -> Result<(), DeliberationError> {
        self.transition(WorkflowStage::Failed, &error.to_string())?;
        self.failure_reason = Some(error.to_string());
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Whether the debate stage was entered.
    pub fn debated(&self) -> bool {
        self.transitions.iter().any(|t| t.to == WorkflowStage::Debate)
    }

    /// Compact status line.
    pub fn status_line(&self) -> String {
        let decision = self
            .decision
            .as_ref()
            .map(|d| d.decision.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "[{}] {} | {} specialists | {} rounds | decision={}",
            self.stage,
            self.id,
            self.specialists.len(),
            self.rounds.len(),
            decision
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> DeliberationSession {
        DeliberationSession::new(
            "spring campaign",
            vec!["brand".into(), "risk".into()],
            DeliberationConfig::default(),
        )
    }

    #[test]
    fn test_new_session() {
        let s = session();
        assert_eq!(s.stage, WorkflowStage::Initialized);
        assert!(Uuid::parse_str(&s.id).is_ok());
        assert!(!s.is_closed());
        assert!(s.ended_at.is_none());
    }

    #[test]
    fn test_happy_path_with_debate() {
        let mut s = session();
        s.transition(WorkflowStage::Analysis, "start").unwrap();
        s.transition(WorkflowStage::ConflictDetection, "analysis done").unwrap();
        s.transition(WorkflowStage::Debate, "low consensus").unwrap();
        s.transition(WorkflowStage::Arbitration, "debate over").unwrap();
        s.transition(WorkflowStage::Finalized, "decided").unwrap();
        assert!(s.is_closed());
        assert!(s.debated());
        assert!(s.ended_at.is_some());
        assert_eq!(s.transitions.len(), 5);
    }

    #[test]
    fn test_debate_can_be_skipped() {
        let mut s = session();
        s.transition(WorkflowStage::Analysis, "start").unwrap();
        s.transition(WorkflowStage::ConflictDetection, "analysis done").unwrap();
        s.transition(WorkflowStage::Arbitration, "consensus").unwrap();
        assert!(!s.debated());
    }

    #[test]
    fn test_invalid_transition() {
        let mut s = session();
        let err = s.transition(WorkflowStage::Debate, "skip ahead").unwrap_err();
        assert_eq!(
            err,
            DeliberationError::InvalidTransition {
                from: WorkflowStage::Initialized,
                to: WorkflowStage::Debate,
            }
        );
        assert!(s.transitions.is_empty());
    }

    #[test]
    fn test_closed_session_rejects_changes() {
        let mut s = session();
        s.fail(&DeliberationError::NoProposals).unwrap();
        assert_eq!(s.stage, WorkflowStage::Failed);
        assert_eq!(
            s.failure_reason.as_deref(),
            Some("no specialist produced an initial proposal")
        );
        let err = s.transition(WorkflowStage::Analysis, "retry").unwrap_err();
        assert!(matches!(err, DeliberationError::SessionClosed(_)));
    }

    #[test]
    fn test_fail_from_any_open_stage() {
        for stages in [
            vec![],
            vec![WorkflowStage::Analysis],
            vec![WorkflowStage::Analysis, WorkflowStage::ConflictDetection],
            vec![
                WorkflowStage::Analysis,
                WorkflowStage::ConflictDetection,
                WorkflowStage::Debate,
            ],
        ] {
            let mut s = session();
            for stage in stages {
                s.transition(stage, "step").unwrap();
            }
            s.fail(&DeliberationError::ArbitratorUnavailable("down".into()))
                .unwrap();
            assert_eq!(s.stage, WorkflowStage::Failed);
        }
    }

    #[test]
    fn test_status_line() {
        let s = session();
        let line = s.status_line();
        assert!(line.starts_with("[INITIALIZED]"));
        assert!(line.contains("decision=-"));
    }
}

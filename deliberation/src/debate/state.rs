//! Debate state machine: states, round records, and termination reasons.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::proposal::{ProposalSet, SpecialistId, Vote};
use crate::specialist::SpecialistFailure;

/// State of a debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DebateState {
    /// Created, no round run yet.
    NotStarted,
    /// At least one round committed, more may follow.
    RoundInProgress,
    /// Consensus reached the convergence threshold.
    Converged,
    /// A round changed no votes.
    Stalemate,
    /// The round limit was hit.
    MaxRoundsReached,
    /// The session budget ran out.
    TimedOut,
}

impl DebateState {
    /// Whether this is a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Converged | Self::Stalemate | Self::MaxRoundsReached | Self::TimedOut
        )
    }

    /// Valid transitions from this state.
    pub fn valid_transitions(self) -> &'static [DebateState] {
        match self {
            Self::NotStarted => &[
                Self::RoundInProgress,
                Self::Converged,
                Self::Stalemate,
                Self::MaxRoundsReached,
                Self::TimedOut,
            ],
            Self::RoundInProgress => &[
                Self::RoundInProgress,
                Self::Converged,
                Self::Stalemate,
                Self::MaxRoundsReached,
                Self::TimedOut,
            ],
            Self::Converged | Self::Stalemate | Self::MaxRoundsReached | Self::TimedOut => &[],
        }
    }

    /// State a debate ends in for the given reason.
    pub fn for_termination(reason: TerminationReason) -> Self {
        match reason {
            TerminationReason::MaxRoundsReached => Self::MaxRoundsReached,
            TerminationReason::ConsensusAchieved => Self::Converged,
            TerminationReason::Stalemate => Self::Stalemate,
            TerminationReason::SessionTimeout => Self::TimedOut,
        }
    }
}

impl std::fmt::Display for DebateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "NOT_STARTED"),
            Self::RoundInProgress => write!(f, "ROUND_IN_PROGRESS"),
            Self::Converged => write!(f, "CONVERGED"),
            Self::Stalemate => write!(f, "STALEMATE"),
            Self::MaxRoundsReached => write!(f, "MAX_ROUNDS_REACHED"),
            Self::TimedOut => write!(f, "TIMED_OUT"),
        }
    }
}

/// Why a debate stopped. Set on the final round only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    MaxRoundsReached,
    ConsensusAchieved,
    Stalemate,
    SessionTimeout,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaxRoundsReached => write!(f, "Max rounds reached"),
            Self::ConsensusAchieved => write!(f, "Consensus achieved"),
            Self::Stalemate => write!(f, "Stalemate"),
            Self::SessionTimeout => write!(f, "Session timeout"),
        }
    }
}

/// A specialist switching votes between the start and end of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionChange {
    pub specialist_id: SpecialistId,
    pub previous_vote: Vote,
    pub new_vote: Vote,
}

/// What a specialist put forward in a round, whether or not its vote moved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub specialist_id: SpecialistId,
    pub vote: Vote,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub concerns: Vec<String>,
}

/// One committed debate round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateRound {
    /// Round number (1-indexed).
    pub round: u32,
    /// Current proposal per specialist after this round.
    pub proposals: ProposalSet,
    pub arguments: Vec<Argument>,
    pub consensus_score: f64,
    pub position_changes: Vec<PositionChange>,
    /// Specialists whose call failed or was repaired this round.
    #[serde(default)]
    pub failures: Vec<SpecialistFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<TerminationReason>,
    pub started_at: DateTime<Utc>,
}

impl DebateRound {
    /// Whether this round ended the debate.
    pub fn is_final(&self) -> bool {
        self.termination_reason.is_some()
    }
}

/// Aggregate view of a finished (or interrupted) debate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateSummary {
    pub total_rounds: u32,
    pub final_consensus: f64,
    pub total_position_changes: usize,
    pub termination_reason: Option<TerminationReason>,
    pub converged: bool,
    pub consensus_by_round: Vec<f64>,
}

impl DebateSummary {
    /// Summarize committed rounds. `None` when no round ran.
    pub fn from_rounds(rounds: &[DebateRound], convergence_threshold: f64) -> Option<Self> {
        let last = rounds.last()?;
        Some(Self {
            total_rounds: rounds.len() as u32,
            final_consensus: last.consensus_score,
            total_position_changes: rounds.iter().map(|r| r.position_changes.len()).sum(),
            termination_reason: last.termination_reason,
            converged: last.consensus_score >= convergence_threshold,
            consensus_by_round: rounds.iter().map(|r| r.consensus_score).collect(),
        })
    }

    /// Compact status line.
    pub fn summary_line(&self) -> String {
        let reason = self
            .termination_reason
            .map(|r| r.to_string())
            .unwrap_or_else(|| "in progress".to_string());
        format!(
            "{} rounds | consensus {:.2} | {} position changes | {}",
            self.total_rounds, self.final_consensus, self.total_position_changes, reason
        )
    }
}

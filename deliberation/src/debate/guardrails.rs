//! Stop conditions and the session time budget.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::state::TerminationReason;
use crate::config::DeliberationConfig;

/// Result of evaluating the stop conditions after a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopDecision {
    Continue,
    Stop(TerminationReason),
}

impl StopDecision {
    /// Whether the debate should stop.
    pub fn should_stop(&self) -> bool {
        !matches!(self, Self::Continue)
    }

    pub fn reason(&self) -> Option<TerminationReason> {
        match self {
            Self::Continue => None,
            Self::Stop(reason) => Some(*reason),
        }
    }
}

impl std::fmt::Display for StopDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::Stop(reason) => write!(f, "stop: {}", reason),
        }
    }
}

/// Evaluates the per-round stop conditions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopPolicy {
    pub max_rounds: u32,
    pub convergence_threshold: f64,
    pub stalemate_detection: bool,
}

impl StopPolicy {
    pub fn from_config(config: &DeliberationConfig) -> Self {
        Self {
            max_rounds: config.max_rounds,
            convergence_threshold: config.convergence_threshold,
            stalemate_detection: config.stalemate_detection,
        }
    }

    /// Decide whether to stop after `round`.
    ///
    /// Checked in order: round limit, convergence, stalemate, then the
    /// session budget.
    pub fn evaluate(
        &self,
        round: u32,
        consensus: f64,
        position_changes: usize,
        budget_exhausted: bool,
    ) -> StopDecision {
        if round >= self.max_rounds {
            return StopDecision::Stop(TerminationReason::MaxRoundsReached);
        }
        if consensus >= self.convergence_threshold {
            return StopDecision::Stop(TerminationReason::ConsensusAchieved);
        }
        if self.stalemate_detection && position_changes == 0 {
            return StopDecision::Stop(TerminationReason::Stalemate);
        }
        if budget_exhausted {
            return StopDecision::Stop(TerminationReason::SessionTimeout);
        }
        StopDecision::Continue
    }
}

/// Wall-clock budget for one session, measured on the tokio clock.
#[derive(Debug, Clone, Copy)]
pub struct SessionBudget {
    deadline: Option<Instant>,
}

impl SessionBudget {
    /// Budget starting now. `None` means unlimited.
    pub fn start(limit: Option<Duration>) -> Self {
        Self {
            deadline: limit.map(|d| Instant::now() + d),
        }
    }

    pub fn unlimited() -> Self {
        Self { deadline: None }
    }

    /// Time left, or `None` when unlimited.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }

    /// Per-call timeout, clamped to the time left.
    pub fn clamp(&self, timeout: Duration) -> Duration {
        match self.remaining() {
            Some(remaining) => timeout.min(remaining),
            None => timeout,
        }
    }
}

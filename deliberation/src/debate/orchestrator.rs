//! Debate orchestrator: runs bounded rounds of opinion exchange.
//!
//! Each round fans the current proposals out to the participants
//! concurrently, folds the responses into a fresh proposal set, scores it,
//! and commits the round in one step. Nothing observable changes until the
//! whole round has been computed.

use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::guardrails::{SessionBudget, StopDecision, StopPolicy};
use super::state::{
    Argument, DebateRound, DebateState, DebateSummary, PositionChange, TerminationReason,
};
use crate::config::DeliberationConfig;
use crate::consensus::{ConsensusScorer, MajorityScorer};
use crate::proposal::{ProposalSet, SpecialistId};
use crate::specialist::{solicit, OpinionGenerator, SessionContext};

/// Errors from the debate orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DebateError {
    #[error("debate already complete ({0})")]
    AlreadyComplete(DebateState),

    #[error("debate has no proposals to work from")]
    NoProposals,

    #[error("invalid debate transition {from} -> {to}")]
    InvalidTransition { from: DebateState, to: DebateState },
}

/// Session identity handed to every opinion request.
#[derive(Debug, Clone, Default)]
pub struct DebateContext {
    pub session_id: String,
    pub topic: String,
    pub context: serde_json::Value,
}

/// Result of a finished debate.
#[derive(Debug, Clone)]
pub struct DebateOutcome {
    pub state: DebateState,
    pub rounds: Vec<DebateRound>,
    pub final_proposals: ProposalSet,
    pub summary: Option<DebateSummary>,
}

/// Drives debate rounds for one session.
///
/// Usage:
/// 1. Create with the initial proposals.
/// 2. Call `next_round()` until `is_complete()`, or call `run()`.
/// 3. Call `interrupt()` if the session budget runs out between rounds.
/// 4. Call `finish()` for the outcome.
pub struct DebateOrchestrator {
    config: DeliberationConfig,
    policy: StopPolicy,
    generator: Arc<dyn OpinionGenerator>,
    scorer: Arc<dyn ConsensusScorer>,
    ctx: DebateContext,
    state: DebateState,
    committed: ProposalSet,
    rounds: Vec<DebateRound>,
}

impl DebateOrchestrator {
    pub fn new(
        config: DeliberationConfig,
        generator: Arc<dyn OpinionGenerator>,
        ctx: DebateContext,
        initial: ProposalSet,
    ) -> Self {
        Self::with_scorer(config, generator, Arc::new(MajorityScorer), ctx, initial)
    }

    pub fn with_scorer(
        config: DeliberationConfig,
        generator: Arc<dyn OpinionGenerator>,
        scorer: Arc<dyn ConsensusScorer>,
        ctx: DebateContext,
        initial: ProposalSet,
    ) -> Self {
        Self {
            policy: StopPolicy::from_config(&config),
            config,
            generator,
            scorer,
            ctx,
            state: DebateState::NotStarted,
            committed: initial,
            rounds: Vec::new(),
        }
    }

    pub fn state(&self) -> DebateState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_terminal()
    }

    /// Committed rounds so far.
    pub fn rounds(&self) -> &[DebateRound] {
        &self.rounds
    }

    /// Proposals as of the last committed round.
    pub fn current_proposals(&self) -> &ProposalSet {
        &self.committed
    }

    /// Specialists asked for an opinion in round `round`.
    ///
    /// The configured arbiter specialist only joins on the last round, and a
    /// specialist with nobody else to respond to is skipped.
    pub fn participants(&self, round: u32) -> Vec<SpecialistId> {
        let last_round = round >= self.config.max_rounds;
        self.committed
            .specialist_ids()
            .filter(|id| last_round || self.config.arbiter_specialist.as_ref() != Some(*id))
            .filter(|id| self.committed.iter().any(|p| &p.specialist_id != *id))
            .cloned()
            .collect()
    }

    /// Run one round and commit it.
    pub async fn next_round(&mut self, budget: &SessionBudget) -> Result<&DebateRound, DebateError> {
        if self.state.is_terminal() {
            return Err(DebateError::AlreadyComplete(self.state));
        }
        if self.committed.is_empty() {
            return Err(DebateError::NoProposals);
        }

        let round = self.rounds.len() as u32 + 1;
        let started_at = chrono::Utc::now();
        let participants = self.participants(round);
        let timeout = budget.clamp(self.config.specialist_timeout());

        debug!(
            session_id = %self.ctx.session_id,
            round,
            participants = participants.len(),
            timeout_ms = timeout.as_millis() as u64,
            "Starting debate round"
        );

        let generator = self.generator.as_ref();
        let calls = participants.iter().map(|id| {
            let ctx = SessionContext {
                session_id: self.ctx.session_id.clone(),
                topic: self.ctx.topic.clone(),
                specialist_id: id.clone(),
                round,
                context: self.ctx.context.clone(),
            };
            solicit(generator, ctx, self.committed.others(id), timeout)
        });
        let responses = join_all(calls).await;

        let mut next = self.committed.clone();
        let mut arguments = Vec::new();
        let mut position_changes = Vec::new();
        let mut failures = Vec::new();

        for response in responses {
            if let Some(failure) = response.failure {
                failures.push(failure);
            }
            let Some(proposal) = response.proposal else {
                // Keep whatever the specialist held at the start of the round.
                continue;
            };
            arguments.push(Argument {
                specialist_id: proposal.specialist_id.clone(),
                vote: proposal.vote,
                confidence: proposal.confidence,
                reasoning: proposal.reasoning.clone(),
                concerns: proposal.concerns.clone(),
            });
            let Some(previous) = self.committed.get(&response.specialist_id) else {
                continue;
            };
            if proposal.vote != previous.vote {
                position_changes.push(PositionChange {
                    specialist_id: response.specialist_id.clone(),
                    previous_vote: previous.vote,
                    new_vote: proposal.vote,
                });
                next.insert(proposal);
            }
        }

        let consensus_score = self.scorer.score(&next.to_vec()).clamp(0.0, 1.0);
        let decision = self.policy.evaluate(
            round,
            consensus_score,
            position_changes.len(),
            budget.is_exhausted(),
        );

        let record = DebateRound {
            round,
            proposals: next.clone(),
            arguments,
            consensus_score,
            position_changes,
            failures,
            termination_reason: decision.reason(),
            started_at,
        };

        let to = match decision {
            StopDecision::Continue => DebateState::RoundInProgress,
            StopDecision::Stop(reason) => DebateState::for_termination(reason),
        };
        self.transition(to)?;
        self.committed = next;
        self.rounds.push(record);

        let committed = &self.rounds[self.rounds.len() - 1];
        info!(
            session_id = %self.ctx.session_id,
            round,
            consensus = consensus_score,
            position_changes = committed.position_changes.len(),
            failures = committed.failures.len(),
            decision = %decision,
            "Debate round committed"
        );
        Ok(committed)
    }

    /// Run rounds until a stop condition fires or the budget runs out.
    pub async fn run(&mut self, budget: &SessionBudget) -> Result<(), DebateError> {
        while !self.is_complete() {
            if budget.is_exhausted() {
                self.interrupt();
                break;
            }
            self.next_round(budget).await?;
        }
        Ok(())
    }

    /// End the debate because the session budget ran out.
    ///
    /// The last committed round, if any, is stamped with the timeout reason.
    pub fn interrupt(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        warn!(
            session_id = %self.ctx.session_id,
            rounds = self.rounds.len(),
            "Session budget exhausted, ending debate"
        );
        if let Some(last) = self.rounds.last_mut() {
            last.termination_reason = Some(TerminationReason::SessionTimeout);
        }
        self.state = DebateState::TimedOut;
    }

    pub fn summary(&self) -> Option<DebateSummary> {
        DebateSummary::from_rounds(&self.rounds, self.config.convergence_threshold)
    }

    pub fn finish(self) -> DebateOutcome {
        let summary = self.summary();
        DebateOutcome {
            state: self.state,
            rounds: self.rounds,
            final_proposals: self.committed,
            summary,
        }
    }

    fn transition(&mut self, to: DebateState) -> Result<(), DebateError> {
        if !self.state.valid_transitions().contains(&to) {
            return Err(DebateError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

//! Deliberation controller: drives one session through every stage.
//!
//! ```text
//! INITIALIZED → ANALYSIS → CONFLICT_DETECTION ─┬─→ DEBATE ─→ ARBITRATION → FINALIZED
//!                                               └─ skip ────↗
//! any non-terminal stage ─→ FAILED
//! ```
//!
//! Debate is skipped when the initial consensus already meets the threshold
//! and no critical conflict was found. Callers always get back a FINALIZED
//! session with a decision, or a FAILED one with a reason and whatever
//! history was recorded.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::arbitration::{
    ArbitrationInput, ArbitrationSource, Arbitrator, DecisionRecord, FinalArbiter,
};
use crate::config::DeliberationConfig;
use crate::conflict::ConflictDetector;
use crate::consensus::{ConsensusScorer, MajorityScorer};
use crate::debate::{DebateContext, DebateOrchestrator, SessionBudget, TerminationReason};
use crate::error::{DeliberationError, Result};
use crate::events::{SessionEvent, SharedSink};
use crate::proposal::{ProposalSet, SpecialistId};
use crate::session::{DeliberationSession, WorkflowStage};
use crate::specialist::{conservative_default, solicit, FailureKind, OpinionGenerator, SessionContext};

/// A request to deliberate on one topic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliberationRequest {
    pub topic: String,
    pub specialists: Vec<SpecialistId>,
    /// Free-form context passed to every specialist and the arbiter.
    #[serde(default)]
    pub context: serde_json::Value,
    /// Correlation id; a uuid is generated when absent.
    #[serde(default)]
    pub session_id: Option<String>,
}

impl DeliberationRequest {
    pub fn new(topic: &str, specialists: &[&str]) -> Self {
        Self {
            topic: topic.to_string(),
            specialists: specialists.iter().map(|s| s.to_string()).collect(),
            context: serde_json::Value::Null,
            session_id: None,
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_session_id(mut self, id: &str) -> Self {
        self.session_id = Some(id.to_string());
        self
    }
}

/// How a session ended.
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Finalized(DeliberationSession),
    Failed {
        session: DeliberationSession,
        error: DeliberationError,
    },
}

impl SessionOutcome {
    pub fn session(&self) -> &DeliberationSession {
        match self {
            Self::Finalized(session) => session,
            Self::Failed { session, .. } => session,
        }
    }

    pub fn into_session(self) -> DeliberationSession {
        match self {
            Self::Finalized(session) => session,
            Self::Failed { session, .. } => session,
        }
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self, Self::Finalized(_))
    }

    pub fn decision(&self) -> Option<&DecisionRecord> {
        self.session().decision.as_ref()
    }

    pub fn error(&self) -> Option<&DeliberationError> {
        match self {
            Self::Finalized(_) => None,
            Self::Failed { error, .. } => Some(error),
        }
    }
}

/// Runs deliberation sessions.
///
/// Holds no per-session state, so one controller can run any number of
/// sessions concurrently.
pub struct DeliberationController {
    config: DeliberationConfig,
    generator: Arc<dyn OpinionGenerator>,
    arbitrator: Arbitrator,
    sink: SharedSink,
    scorer: Arc<dyn ConsensusScorer>,
}

impl DeliberationController {
    /// Create a controller. Fails if the configuration does not validate.
    pub fn new(
        config: DeliberationConfig,
        generator: Arc<dyn OpinionGenerator>,
        arbiter: Arc<dyn FinalArbiter>,
        sink: SharedSink,
    ) -> Result<Self> {
        config.validate()?;
        let arbitrator = Arbitrator::new(arbiter, config.arbiter_timeout());
        Ok(Self {
            config,
            generator,
            arbitrator,
            sink,
            scorer: Arc::new(MajorityScorer),
        })
    }

    /// Replace the consensus scorer used for skip and convergence decisions.
    pub fn with_scorer(mut self, scorer: Arc<dyn ConsensusScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn config(&self) -> &DeliberationConfig {
        &self.config
    }

    /// Run a session to FINALIZED or FAILED.
    pub async fn run(&self, request: DeliberationRequest) -> SessionOutcome {
        let specialists = dedup(&request.specialists);
        let mut session = match &request.session_id {
            Some(id) => DeliberationSession::with_id(
                id,
                &request.topic,
                specialists,
                self.config.clone(),
            ),
            None => DeliberationSession::new(&request.topic, specialists, self.config.clone()),
        };
        let budget = SessionBudget::start(self.config.session_budget());

        info!(
            session_id = %session.id,
            topic = %session.topic,
            specialists = session.specialists.len(),
            scorer = self.scorer.name(),
            "Deliberation started"
        );

        let result = self.drive(&mut session, &request.context, &budget).await;

        let outcome = match result {
            Ok(()) => SessionOutcome::Finalized(session),
            Err(error) => {
                warn!(session_id = %session.id, stage = %session.stage, "Deliberation failed: {}", error);
                if let Err(e) = session.fail(&error) {
                    warn!(session_id = %session.id, "Could not mark session failed: {}", e);
                }
                SessionOutcome::Failed { session, error }
            }
        };

        let session = outcome.session();
        info!(
            session_id = %session.id,
            stage = %session.stage,
            rounds = session.rounds.len(),
            "{}",
            session.status_line()
        );
        self.emit(SessionEvent::session_completed(session.clone())).await;
        outcome
    }

    async fn drive(
        &self,
        session: &mut DeliberationSession,
        context: &serde_json::Value,
        budget: &SessionBudget,
    ) -> Result<()> {
        advance(session, WorkflowStage::Analysis, "session started")?;
        self.analyze(session, context, budget).await;
        if session.initial_proposals.is_empty() {
            return Err(DeliberationError::NoProposals);
        }
        advance(
            session,
            WorkflowStage::ConflictDetection,
            &format!(
                "{} proposals, {} failures",
                session.initial_proposals.len(),
                session.analysis_failures.len()
            ),
        )?;

        let initial = session.initial_proposals.to_vec();
        let consensus = self.scorer.score(&initial).clamp(0.0, 1.0);
        let detector = ConflictDetector::new(&self.config);
        let conflicts = detector.detect(&initial);
        let summary = detector.summarize(&conflicts);
        info!(
            session_id = %session.id,
            consensus,
            conflicts = summary.total_conflicts,
            critical = summary.critical_conflicts,
            requires_arbitration = summary.requires_arbitration,
            "Initial analysis scored"
        );
        let skip_debate =
            consensus >= self.config.convergence_threshold && summary.critical_conflicts == 0;
        session.initial_consensus = Some(consensus);
        session.conflicts = conflicts;
        session.conflict_summary = Some(summary);
        session.final_proposals = session.initial_proposals.clone();

        if budget.is_exhausted() {
            advance(
                session,
                WorkflowStage::Arbitration,
                &TerminationReason::SessionTimeout.to_string(),
            )?;
        } else if skip_debate {
            advance(
                session,
                WorkflowStage::Arbitration,
                &format!("consensus {:.2} with no critical conflicts", consensus),
            )?;
        } else {
            advance(session, WorkflowStage::Debate, &format!("consensus {:.2}", consensus))?;
            let reason = self.debate(session, context, budget).await?;
            advance(session, WorkflowStage::Arbitration, &reason)?;
        }

        let input = ArbitrationInput::build(
            ArbitrationSource {
                session_id: &session.id,
                topic: &session.topic,
                context,
                initial: &session.initial_proposals,
                rounds: &session.rounds,
                conflicts: &session.conflicts,
            },
            &self.config,
        );
        let record = self.arbitrator.decide(&input).await?;
        let reason = format!("decision: {}", record.decision);
        session.decision = Some(record);
        advance(session, WorkflowStage::Finalized, &reason)
    }

    /// Collect one initial proposal per specialist, concurrently.
    async fn analyze(
        &self,
        session: &mut DeliberationSession,
        context: &serde_json::Value,
        budget: &SessionBudget,
    ) {
        let timeout = budget.clamp(self.config.specialist_timeout());
        let generator = self.generator.as_ref();
        let calls = session.specialists.iter().map(|id| {
            let ctx = SessionContext {
                session_id: session.id.clone(),
                topic: session.topic.clone(),
                specialist_id: id.clone(),
                round: 0,
                context: context.clone(),
            };
            solicit(generator, ctx, Vec::new(), timeout)
        });
        let responses = join_all(calls).await;

        let mut proposals = ProposalSet::new();
        for response in responses {
            let unparseable = response.proposal.is_none()
                && response
                    .failure
                    .as_ref()
                    .is_some_and(|f| f.kind == FailureKind::Malformed);
            if let Some(failure) = response.failure {
                session.analysis_failures.push(failure);
            }
            match response.proposal {
                Some(proposal) => {
                    proposals.insert(proposal);
                }
                None if unparseable => {
                    proposals.insert(conservative_default(&response.specialist_id, 0));
                }
                None => {}
            }
        }
        session.initial_proposals = proposals;
    }

    /// Run the debate and record it on the session. Returns the reason it
    /// ended.
    async fn debate(
        &self,
        session: &mut DeliberationSession,
        context: &serde_json::Value,
        budget: &SessionBudget,
    ) -> Result<String> {
        let mut orchestrator = DebateOrchestrator::with_scorer(
            self.config.clone(),
            self.generator.clone(),
            self.scorer.clone(),
            DebateContext {
                session_id: session.id.clone(),
                topic: session.topic.clone(),
                context: context.clone(),
            },
            session.initial_proposals.clone(),
        );

        while !orchestrator.is_complete() {
            if budget.is_exhausted() {
                orchestrator.interrupt();
                break;
            }
            let round = orchestrator.next_round(budget).await?.clone();
            self.emit(SessionEvent::round_completed(&session.id, round))
                .await;
        }

        let outcome = orchestrator.finish();
        let reason = outcome
            .rounds
            .last()
            .and_then(|r| r.termination_reason)
            .unwrap_or(TerminationReason::SessionTimeout)
            .to_string();
        if let Some(summary) = &outcome.summary {
            info!(session_id = %session.id, "Debate finished: {}", summary.summary_line());
        }
        session.rounds = outcome.rounds;
        session.debate_summary = outcome.summary;
        session.final_proposals = outcome.final_proposals;
        Ok(reason)
    }

    async fn emit(&self, event: SessionEvent) {
        let event_type = event.event_type();
        let session_id = event.session_id().to_string();
        if let Err(e) = self.sink.emit(event).await {
            warn!(session_id = %session_id, event_type, "Failed to emit event: {}", e);
        }
    }
}

fn advance(session: &mut DeliberationSession, to: WorkflowStage, reason: &str) -> Result<()> {
    let from = session.stage;
    session.transition(to, reason)?;
    info!(session_id = %session.id, from = %from, to = %to, reason, "Stage transition");
    Ok(())
}

/// Specialist ids in request order, duplicates dropped.
fn dedup(specialists: &[SpecialistId]) -> Vec<SpecialistId> {
    let mut seen = BTreeSet::new();
    specialists
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

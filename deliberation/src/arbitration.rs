//! Final arbitration: turn the whole deliberation into one binding decision.
//!
//! The engine assembles everything the arbiter needs into an
//! [`ArbitrationInput`], hands it to the injected [`FinalArbiter`], validates
//! what comes back, and works out which specialists were overruled. Weighted
//! vote totals are advisory. The arbiter's decision is never overridden.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::DeliberationConfig;
use crate::conflict::{Conflict, ConflictDetector};
use crate::debate::{DebateRound, DebateSummary};
use crate::error::DeliberationError;
use crate::proposal::{Proposal, ProposalSet, SpecialistId, Vote};

/// Errors a final arbiter can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArbiterError {
    #[error("arbiter unavailable: {0}")]
    Unavailable(String),

    #[error("arbiter timed out after {0}ms")]
    Timeout(u64),
}

/// The binding outcome of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalDecision {
    Approve,
    ApproveWithModifications,
    Reject,
    ReviseAndResubmit,
}

impl FinalDecision {
    pub const ALL: [FinalDecision; 4] = [
        Self::Approve,
        Self::ApproveWithModifications,
        Self::Reject,
        Self::ReviseAndResubmit,
    ];

    /// The vote a specialist would have cast to agree with this decision.
    pub fn expected_vote(self) -> Vote {
        match self {
            Self::Approve => Vote::Approve,
            Self::ApproveWithModifications => Vote::Conditional,
            Self::Reject | Self::ReviseAndResubmit => Vote::Reject,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::ApproveWithModifications => "approve_with_modifications",
            Self::Reject => "reject",
            Self::ReviseAndResubmit => "revise_and_resubmit",
        }
    }
}

impl std::fmt::Display for FinalDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FinalDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        Self::ALL
            .into_iter()
            .find(|d| d.as_str() == normalized)
            .ok_or_else(|| format!("unknown decision: {:?}", s))
    }
}

/// Voting weight summed per vote bucket. Abstentions are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightedVoteTotals {
    pub approve: f64,
    pub reject: f64,
    pub conditional: f64,
}

impl WeightedVoteTotals {
    pub fn from_proposals<'a>(
        proposals: impl IntoIterator<Item = &'a Proposal>,
        config: &DeliberationConfig,
    ) -> Self {
        let mut totals = Self::default();
        for p in proposals {
            let weight = config.weight_for(p);
            match p.vote {
                Vote::Approve => totals.approve += weight,
                Vote::Reject => totals.reject += weight,
                Vote::Conditional => totals.conditional += weight,
                Vote::Abstain => {}
            }
        }
        totals
    }

    /// Bucket with the most weight; ties and an empty tally give `None`.
    pub fn leading(&self) -> Option<Vote> {
        let buckets = [
            (Vote::Approve, self.approve),
            (Vote::Reject, self.reject),
            (Vote::Conditional, self.conditional),
        ];
        let max = buckets.iter().map(|(_, w)| *w).fold(0.0, f64::max);
        if max <= 0.0 {
            return None;
        }
        let mut leaders = buckets.iter().filter(|(_, w)| (*w - max).abs() < 1e-9);
        match (leaders.next(), leaders.next()) {
            (Some((vote, _)), None) => Some(*vote),
            _ => None,
        }
    }
}

/// Everything the final arbiter gets to see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrationInput {
    pub session_id: String,
    pub topic: String,
    #[serde(default)]
    pub context: serde_json::Value,
    /// Latest proposal per specialist.
    pub final_proposals: Vec<Proposal>,
    /// Every distinct proposal made, initial analysis first.
    pub proposal_history: Vec<Proposal>,
    /// Specialist → vote at the initial analysis and after each round.
    pub vote_history: BTreeMap<SpecialistId, Vec<Vote>>,
    /// Conflicts found after the initial analysis.
    pub conflicts: Vec<Conflict>,
    /// Conflicts still present among the final proposals.
    pub unresolved_conflicts: Vec<Conflict>,
    pub rounds: Vec<DebateRound>,
    pub debate_summary: Option<DebateSummary>,
    pub weighted_totals: WeightedVoteTotals,
}

/// Session data an [`ArbitrationInput`] is assembled from.
#[derive(Debug, Clone, Copy)]
pub struct ArbitrationSource<'a> {
    pub session_id: &'a str,
    pub topic: &'a str,
    pub context: &'a serde_json::Value,
    pub initial: &'a ProposalSet,
    pub rounds: &'a [DebateRound],
    pub conflicts: &'a [Conflict],
}

impl ArbitrationInput {
    pub fn build(source: ArbitrationSource<'_>, config: &DeliberationConfig) -> Self {
        let final_set = source
            .rounds
            .last()
            .map(|r| &r.proposals)
            .unwrap_or(source.initial);

        let mut proposal_history = source.initial.to_vec();
        for round in source.rounds {
            proposal_history.extend(
                round
                    .proposals
                    .iter()
                    .filter(|p| p.round == round.round)
                    .cloned(),
            );
        }

        let mut vote_history: BTreeMap<SpecialistId, Vec<Vote>> = BTreeMap::new();
        for p in source.initial.iter() {
            vote_history.insert(p.specialist_id.clone(), vec![p.vote]);
        }
        for round in source.rounds {
            for (id, votes) in vote_history.iter_mut() {
                if let Some(p) = round.proposals.get(id) {
                    votes.push(p.vote);
                }
            }
        }

        let final_proposals = final_set.to_vec();
        let unresolved_conflicts = ConflictDetector::new(config).detect(&final_proposals);

        Self {
            session_id: source.session_id.to_string(),
            topic: source.topic.to_string(),
            context: source.context.clone(),
            weighted_totals: WeightedVoteTotals::from_proposals(final_set.iter(), config),
            final_proposals,
            proposal_history,
            vote_history,
            conflicts: source.conflicts.to_vec(),
            unresolved_conflicts,
            debate_summary: DebateSummary::from_rounds(
                source.rounds,
                config.convergence_threshold,
            ),
            rounds: source.rounds.to_vec(),
        }
    }
}

/// What a final arbiter returns. The decision is free text until validated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArbiterVerdict {
    #[serde(default)]
    pub decision: Option<String>,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub modifications_required: Vec<String>,
}

/// Produces the binding verdict from the aggregated deliberation.
#[async_trait]
pub trait FinalArbiter: Send + Sync {
    async fn arbitrate(&self, input: &ArbitrationInput) -> Result<ArbiterVerdict, ArbiterError>;
}

/// The validated final decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision: FinalDecision,
    pub rationale: String,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub modifications_required: Vec<String>,
    /// Specialists whose final vote went against the decision.
    #[serde(default)]
    pub overruled: Vec<SpecialistId>,
    pub weighted_totals: WeightedVoteTotals,
    /// Set when the verdict had to be repaired.
    #[serde(default)]
    pub degraded: bool,
    pub decided_at: DateTime<Utc>,
}

/// Specialists whose latest vote contradicts the decision.
///
/// Conditional and abstaining votes are never counted as overruled.
pub fn overruled_specialists(decision: FinalDecision, proposals: &ProposalSet) -> Vec<SpecialistId> {
    let expected = decision.expected_vote();
    proposals
        .iter()
        .filter(|p| !matches!(p.vote, Vote::Conditional | Vote::Abstain))
        .filter(|p| p.vote != expected)
        .map(|p| p.specialist_id.clone())
        .collect()
}

/// Validate a raw verdict into a [`DecisionRecord`].
pub fn validate_verdict(verdict: ArbiterVerdict, input: &ArbitrationInput) -> DecisionRecord {
    let mut degraded = false;

    let decision = match verdict.decision.as_deref().map(str::parse::<FinalDecision>) {
        Some(Ok(decision)) => decision,
        Some(Err(reason)) => {
            warn!(session_id = %input.session_id, "Invalid arbiter decision: {}", reason);
            degraded = true;
            FinalDecision::ReviseAndResubmit
        }
        None => {
            warn!(session_id = %input.session_id, "Arbiter returned no decision");
            degraded = true;
            FinalDecision::ReviseAndResubmit
        }
    };

    let confidence = match verdict.confidence {
        Some(c) if c.is_finite() => {
            if !(0.0..=1.0).contains(&c) {
                degraded = true;
            }
            Some(c.clamp(0.0, 1.0))
        }
        Some(_) => {
            degraded = true;
            None
        }
        None => None,
    };

    let final_set: ProposalSet = input.final_proposals.iter().cloned().collect();

    DecisionRecord {
        decision,
        rationale: verdict.rationale,
        confidence,
        modifications_required: verdict.modifications_required,
        overruled: overruled_specialists(decision, &final_set),
        weighted_totals: input.weighted_totals,
        degraded,
        decided_at: Utc::now(),
    }
}

/// Calls the final arbiter with a timeout and validates its verdict.
#[derive(Clone)]
pub struct Arbitrator {
    arbiter: Arc<dyn FinalArbiter>,
    timeout: Duration,
}

impl Arbitrator {
    pub fn new(arbiter: Arc<dyn FinalArbiter>, timeout: Duration) -> Self {
        Self { arbiter, timeout }
    }

    /// Produce the final decision.
    ///
    /// Fails with [`DeliberationError::ArbitratorUnavailable`] when the
    /// arbiter errors or does not answer in time.
    pub async fn decide(&self, input: &ArbitrationInput) -> Result<DecisionRecord, DeliberationError> {
        let verdict = match tokio::time::timeout(self.timeout, self.arbiter.arbitrate(input)).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                warn!(session_id = %input.session_id, "Arbiter failed: {}", e);
                return Err(DeliberationError::ArbitratorUnavailable(e.to_string()));
            }
            Err(_) => {
                let e = ArbiterError::Timeout(self.timeout.as_millis() as u64);
                warn!(session_id = %input.session_id, "Arbiter failed: {}", e);
                return Err(DeliberationError::ArbitratorUnavailable(e.to_string()));
            }
        };

        let record = validate_verdict(verdict, input);
        info!(
            session_id = %input.session_id,
            decision = %record.decision,
            overruled = record.overruled.len(),
            degraded = record.degraded,
            "Final decision reached"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debate::TerminationReason;

    struct Fixed(Result<ArbiterVerdict, ArbiterError>);

    #[async_trait]
    impl FinalArbiter for Fixed {
        async fn arbitrate(&self, _input: &ArbitrationInput) -> Result<ArbiterVerdict, ArbiterError> {
            self.0.clone()
        }
    }

    struct Hangs;

    #[async_trait]
    impl FinalArbiter for Hangs {
        async fn arbitrate(&self, _input: &ArbitrationInput) -> Result<ArbiterVerdict, ArbiterError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ArbiterVerdict::default())
        }
    }

    fn set(votes: &[(&str, Vote)]) -> ProposalSet {
        votes.iter().map(|(id, v)| Proposal::new(*id, *v, 0.8)).collect()
    }

    fn input(final_set: &ProposalSet) -> ArbitrationInput {
        let context = serde_json::Value::Null;
        ArbitrationInput::build(
            ArbitrationSource {
                session_id: "s-1",
                topic: "launch",
                context: &context,
                initial: final_set,
                rounds: &[],
                conflicts: &[],
            },
            &DeliberationConfig::default(),
        )
    }

    fn verdict(decision: Option<&str>) -> ArbiterVerdict {
        ArbiterVerdict {
            decision: decision.map(str::to_string),
            rationale: "weighed it up".into(),
            confidence: Some(0.8),
            modifications_required: vec![],
        }
    }

    #[test]
    fn test_decision_parse() {
        assert_eq!("approve".parse::<FinalDecision>(), Ok(FinalDecision::Approve));
        assert_eq!(
            " Approve With Modifications ".parse::<FinalDecision>(),
            Ok(FinalDecision::ApproveWithModifications)
        );
        assert_eq!(
            "revise-and-resubmit".parse::<FinalDecision>(),
            Ok(FinalDecision::ReviseAndResubmit)
        );
        assert!("maybe".parse::<FinalDecision>().is_err());
    }

    #[test]
    fn test_overruled_mapping() {
        let proposals = set(&[
            ("brand", Vote::Approve),
            ("risk", Vote::Reject),
            ("trend", Vote::Conditional),
            ("legal", Vote::Abstain),
        ]);
        assert_eq!(
            overruled_specialists(FinalDecision::Approve, &proposals),
            vec!["risk".to_string()]
        );
        assert_eq!(
            overruled_specialists(FinalDecision::Reject, &proposals),
            vec!["brand".to_string()]
        );
        assert_eq!(
            overruled_specialists(FinalDecision::ApproveWithModifications, &proposals),
            vec!["brand".to_string(), "risk".to_string()]
        );
        assert_eq!(
            overruled_specialists(FinalDecision::ReviseAndResubmit, &proposals),
            vec!["brand".to_string()]
        );
    }

    #[test]
    fn test_weighted_totals() {
        let mut config = DeliberationConfig::default();
        config.voting_weights.insert("brand".into(), 0.25);
        let proposals = set(&[
            ("brand", Vote::Approve),
            ("risk", Vote::Reject),
            ("trend", Vote::Approve),
            ("legal", Vote::Abstain),
        ]);
        let totals = WeightedVoteTotals::from_proposals(proposals.iter(), &config);
        assert!((totals.approve - 0.40).abs() < 1e-9);
        assert!((totals.reject - 0.15).abs() < 1e-9);
        assert_eq!(totals.conditional, 0.0);
        assert_eq!(totals.leading(), Some(Vote::Approve));

        assert_eq!(WeightedVoteTotals::default().leading(), None);
    }

    #[test]
    fn test_input_history() {
        let initial = set(&[("a", Vote::Approve), ("b", Vote::Reject)]);
        let mut after = initial.clone();
        after.insert(Proposal::new("b", Vote::Approve, 0.7).for_round(1));
        let rounds = vec![DebateRound {
            round: 1,
            proposals: after,
            arguments: vec![],
            consensus_score: 1.0,
            position_changes: vec![],
            failures: vec![],
            termination_reason: Some(TerminationReason::ConsensusAchieved),
            started_at: Utc::now(),
        }];
        let context = serde_json::Value::Null;
        let input = ArbitrationInput::build(
            ArbitrationSource {
                session_id: "s-1",
                topic: "launch",
                context: &context,
                initial: &initial,
                rounds: &rounds,
                conflicts: &[],
            },
            &DeliberationConfig::default(),
        );

        assert_eq!(input.proposal_history.len(), 3);
        assert_eq!(input.vote_history["b"], vec![Vote::Reject, Vote::Approve]);
        assert_eq!(input.vote_history["a"], vec![Vote::Approve, Vote::Approve]);
        assert!(input.unresolved_conflicts.is_empty());
        assert_eq!(input.final_proposals.len(), 2);
        assert!(input.debate_summary.unwrap().converged);
    }

    #[tokio::test]
    async fn test_valid_verdict() {
        let proposals = set(&[("a", Vote::Approve), ("b", Vote::Reject)]);
        let arb = Arbitrator::new(Arc::new(Fixed(Ok(verdict(Some("approve"))))), Duration::from_secs(1));
        let record = arb.decide(&input(&proposals)).await.unwrap();
        assert_eq!(record.decision, FinalDecision::Approve);
        assert_eq!(record.overruled, vec!["b".to_string()]);
        assert!(!record.degraded);
    }

    #[tokio::test]
    async fn test_invalid_decision_becomes_revise() {
        let proposals = set(&[("a", Vote::Approve)]);
        for raw in [Some("ship it"), None] {
            let arb = Arbitrator::new(Arc::new(Fixed(Ok(verdict(raw)))), Duration::from_secs(1));
            let record = arb.decide(&input(&proposals)).await.unwrap();
            assert_eq!(record.decision, FinalDecision::ReviseAndResubmit);
            assert!(record.degraded);
        }
    }

    #[tokio::test]
    async fn test_out_of_range_confidence_is_clamped() {
        let proposals = set(&[("a", Vote::Approve)]);
        let mut v = verdict(Some("approve"));
        v.confidence = Some(1.7);
        let record = validate_verdict(v, &input(&proposals));
        assert_eq!(record.confidence, Some(1.0));
        assert!(record.degraded);
    }

    #[tokio::test]
    async fn test_arbiter_error_is_unavailable() {
        let proposals = set(&[("a", Vote::Approve)]);
        let arb = Arbitrator::new(
            Arc::new(Fixed(Err(ArbiterError::Unavailable("down".into())))),
            Duration::from_secs(1),
        );
        let err = arb.decide(&input(&proposals)).await.unwrap_err();
        assert!(matches!(err, DeliberationError::ArbitratorUnavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_arbiter_timeout_is_unavailable() {
        let proposals = set(&[("a", Vote::Approve)]);
        let arb = Arbitrator::new(Arc::new(Hangs), Duration::from_secs(60));
        let err = arb.decide(&input(&proposals)).await.unwrap_err();
        assert_eq!(
            err,
            DeliberationError::ArbitratorUnavailable("arbiter timed out after 60000ms".into())
        );
    }
}

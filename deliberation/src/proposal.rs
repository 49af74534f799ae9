//! Specialist proposals: the unit of opinion exchanged during deliberation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a specialist taking part in a session.
pub type SpecialistId = String;

/// Voting weight applied when neither the proposal nor the config sets one.
pub const DEFAULT_VOTING_WEIGHT: f64 = 0.15;

/// A specialist's vote on the proposed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Approve,
    Reject,
    /// Approve only if the listed conditions are met.
    Conditional,
    Abstain,
}

impl Vote {
    pub const ALL: [Vote; 4] = [Self::Approve, Self::Reject, Self::Conditional, Self::Abstain];

    /// Whether the two votes are in direct opposition (approve vs reject).
    pub fn opposes(self, other: Vote) -> bool {
        matches!(
            (self, other),
            (Self::Approve, Self::Reject) | (Self::Reject, Self::Approve)
        )
    }
}

impl std::fmt::Display for Vote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approve => write!(f, "approve"),
            Self::Reject => write!(f, "reject"),
            Self::Conditional => write!(f, "conditional"),
            Self::Abstain => write!(f, "abstain"),
        }
    }
}

impl std::str::FromStr for Vote {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(Self::Approve),
            "reject" => Ok(Self::Reject),
            "conditional" => Ok(Self::Conditional),
            "abstain" => Ok(Self::Abstain),
            other => Err(format!("unknown vote '{}'", other)),
        }
    }
}

/// Urgency a specialist assigns to the proposed action.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    /// Ordinal level: low=0, medium=1, high=2.
    pub fn level(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }

    /// Absolute ordinal distance between two priorities.
    pub fn gap(self, other: Priority) -> u8 {
        self.level().abs_diff(other.level())
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// One specialist's structured opinion for a round.
///
/// Proposals are never mutated after creation. A debate round that changes a
/// specialist's position produces a fresh proposal, so the full history stays
/// intact across rounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub specialist_id: SpecialistId,
    pub vote: Vote,
    /// Confidence in the vote (0.0–1.0).
    pub confidence: f64,
    #[serde(default)]
    pub priority: Priority,
    /// Named assessments, each in 0.0–1.0 (e.g. `"risk" => 0.2`).
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_voting_weight")]
    pub voting_weight: f64,
    /// Conditions attached to a conditional vote.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<String>>,
    /// Round this proposal was produced in (0 = initial analysis).
    #[serde(default)]
    pub round: u32,
    /// Set when this is a conservative stand-in for a record that failed validation.
    #[serde(default)]
    pub degraded: bool,
}

fn default_voting_weight() -> f64 {
    DEFAULT_VOTING_WEIGHT
}

impl Proposal {
    /// Create a proposal with medium priority and the default voting weight.
    pub fn new(specialist_id: impl Into<SpecialistId>, vote: Vote, confidence: f64) -> Self {
        Self {
            specialist_id: specialist_id.into(),
            vote,
            confidence,
            priority: Priority::Medium,
            scores: BTreeMap::new(),
            concerns: Vec::new(),
            reasoning: String::new(),
            timestamp: Utc::now(),
            voting_weight: DEFAULT_VOTING_WEIGHT,
            conditions: None,
            round: 0,
            degraded: false,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_concern(mut self, concern: impl Into<String>) -> Self {
        self.concerns.push(concern.into());
        self
    }

    pub fn with_score(mut self, name: impl Into<String>, value: f64) -> Self {
        self.scores.insert(name.into(), value);
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<String>) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn with_voting_weight(mut self, weight: f64) -> Self {
        self.voting_weight = weight;
        self
    }

    pub fn for_round(mut self, round: u32) -> Self {
        self.round = round;
        self
    }

    /// Shape problems that make this record untrustworthy as-is.
    pub fn validation_issues(&self, expected_specialist: &str) -> Vec<String> {
        let mut issues = Vec::new();

        if self.specialist_id != expected_specialist {
            issues.push(format!(
                "specialist id '{}' does not match '{}'",
                self.specialist_id, expected_specialist
            ));
        }
        if !in_unit_range(self.confidence) {
            issues.push(format!("confidence {} outside [0, 1]", self.confidence));
        }
        for (name, value) in &self.scores {
            if !in_unit_range(*value) {
                issues.push(format!("score '{}' = {} outside [0, 1]", name, value));
            }
        }
        if !self.voting_weight.is_finite() || self.voting_weight < 0.0 {
            issues.push(format!("voting weight {} is invalid", self.voting_weight));
        }

        issues
    }

    /// The safest stand-in for a record that cannot be trusted: an
    /// abstention with zero confidence, flagged degraded.
    pub fn conservative(specialist_id: impl Into<SpecialistId>, round: u32) -> Self {
        let mut proposal = Self::new(specialist_id, Vote::Abstain, 0.0)
            .with_reasoning("opinion could not be validated; abstaining")
            .for_round(round);
        proposal.degraded = true;
        proposal
    }

    /// Validate against the expected specialist.
    ///
    /// A record with any issue is discarded whole and replaced by the
    /// [`conservative`](Self::conservative) default for `expected_specialist`.
    /// Returns the issues that were found.
    pub fn sanitize(self, expected_specialist: &str) -> (Self, Vec<String>) {
        let issues = self.validation_issues(expected_specialist);
        if issues.is_empty() {
            return (self, issues);
        }
        (Self::conservative(expected_specialist, self.round), issues)
    }
}

fn in_unit_range(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

/// The current proposal of each specialist, keyed and ordered by specialist id.
///
/// Keying by id enforces at most one current proposal per specialist, and the
/// stable ordering keeps everything computed from the set independent of the
/// order in which responses arrived.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalSet {
    proposals: BTreeMap<SpecialistId, Proposal>,
}

impl ProposalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the specialist's current proposal.
    pub fn insert(&mut self, proposal: Proposal) -> Option<Proposal> {
        self.proposals
            .insert(proposal.specialist_id.clone(), proposal)
    }

    pub fn get(&self, specialist_id: &str) -> Option<&Proposal> {
        self.proposals.get(specialist_id)
    }

    pub fn contains(&self, specialist_id: &str) -> bool {
        self.proposals.contains_key(specialist_id)
    }

    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }

    /// Proposals in specialist-id order.
    pub fn iter(&self) -> impl Iterator<Item = &Proposal> {
        self.proposals.values()
    }

    pub fn specialist_ids(&self) -> impl Iterator<Item = &SpecialistId> {
        self.proposals.keys()
    }

    /// Every proposal except the given specialist's own.
    pub fn others(&self, specialist_id: &str) -> Vec<Proposal> {
        self.proposals
            .values()
            .filter(|p| p.specialist_id != specialist_id)
            .cloned()
            .collect()
    }

    /// Specialist → vote mapping.
    pub fn votes(&self) -> BTreeMap<SpecialistId, Vote> {
        self.proposals
            .iter()
            .map(|(id, p)| (id.clone(), p.vote))
            .collect()
    }

    pub fn to_vec(&self) -> Vec<Proposal> {
        self.proposals.values().cloned().collect()
    }
}

impl FromIterator<Proposal> for ProposalSet {
    fn from_iter<T: IntoIterator<Item = Proposal>>(iter: T) -> Self {
        let mut set = Self::new();
        for proposal in iter {
            set.insert(proposal);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_opposition() {
        assert!(Vote::Approve.opposes(Vote::Reject));
        assert!(Vote::Reject.opposes(Vote::Approve));
        assert!(!Vote::Approve.opposes(Vote::Conditional));
        assert!(!Vote::Abstain.opposes(Vote::Reject));
        assert!(!Vote::Approve.opposes(Vote::Approve));
    }

    #[test]
    fn test_vote_parse_and_display() {
        for vote in Vote::ALL {
            let parsed: Vote = vote.to_string().parse().unwrap();
            assert_eq!(parsed, vote);
        }
        assert_eq!(" Approve ".parse::<Vote>().unwrap(), Vote::Approve);
        assert!("maybe".parse::<Vote>().is_err());
    }

    #[test]
    fn test_vote_serde() {
        let json = serde_json::to_string(&Vote::Conditional).unwrap();
        assert_eq!(json, "\"conditional\"");
    }

    #[test]
    fn test_priority_gap() {
        assert_eq!(Priority::Low.gap(Priority::High), 2);
        assert_eq!(Priority::High.gap(Priority::Low), 2);
        assert_eq!(Priority::Medium.gap(Priority::High), 1);
        assert_eq!(Priority::Medium.gap(Priority::Medium), 0);
        assert!(Priority::High > Priority::Low);
    }

    #[test]
    fn test_builder() {
        let p = Proposal::new("risk", Vote::Conditional, 0.7)
            .with_priority(Priority::High)
            .with_reasoning("needs legal review")
            .with_concern("disclosure missing")
            .with_score("backlash", 0.4)
            .with_conditions(vec!["add disclosure".to_string()])
            .with_voting_weight(0.2)
            .for_round(2);
        assert_eq!(p.specialist_id, "risk");
        assert_eq!(p.priority, Priority::High);
        assert_eq!(p.concerns, vec!["disclosure missing".to_string()]);
        assert_eq!(p.scores.get("backlash"), Some(&0.4));
        assert_eq!(p.round, 2);
        assert!(!p.degraded);
    }

    #[test]
    fn test_valid_proposal_passes_through_sanitize() {
        let p = Proposal::new("brand", Vote::Approve, 0.9).with_score("tone", 0.8);
        let (clean, issues) = p.clone().sanitize("brand");
        assert!(issues.is_empty());
        assert_eq!(clean, p);
    }

    #[test]
    fn test_sanitize_replaces_invalid_record() {
        let p = Proposal::new("someone-else", Vote::Reject, 1.7)
            .with_score("risk", f64::NAN)
            .with_score("reach", -0.3)
            .with_voting_weight(-1.0)
            .for_round(2);
        let (clean, issues) = p.sanitize("trend");
        assert_eq!(issues.len(), 5);
        assert!(clean.degraded);
        assert_eq!(clean.specialist_id, "trend");
        assert_eq!(clean.vote, Vote::Abstain);
        assert_eq!(clean.confidence, 0.0);
        assert!(clean.scores.is_empty());
        assert_eq!(clean.voting_weight, DEFAULT_VOTING_WEIGHT);
        assert_eq!(clean.round, 2);
    }

    #[test]
    fn test_out_of_range_confidence_does_not_keep_vote() {
        let (clean, issues) = Proposal::new("brand", Vote::Approve, 5.0).sanitize("brand");
        assert_eq!(issues, vec!["confidence 5 outside [0, 1]".to_string()]);
        assert_eq!(clean.vote, Vote::Abstain);
        assert_eq!(clean.confidence, 0.0);
    }

    #[test]
    fn test_priority_defaults_to_medium() {
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn test_proposal_set_one_per_specialist() {
        let mut set = ProposalSet::new();
        assert!(set.insert(Proposal::new("a", Vote::Approve, 0.5)).is_none());
        let replaced = set.insert(Proposal::new("a", Vote::Reject, 0.6));
        assert_eq!(replaced.unwrap().vote, Vote::Approve);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("a").unwrap().vote, Vote::Reject);
    }

    #[test]
    fn test_proposal_set_ordering_and_others() {
        let set: ProposalSet = vec![
            Proposal::new("c", Vote::Approve, 0.5),
            Proposal::new("a", Vote::Reject, 0.5),
            Proposal::new("b", Vote::Abstain, 0.5),
        ]
        .into_iter()
        .collect();

        let ids: Vec<_> = set.specialist_ids().cloned().collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let others: Vec<_> = set.others("b").into_iter().map(|p| p.specialist_id).collect();
        assert_eq!(others, vec!["a", "c"]);
        assert_eq!(set.votes()["a"], Vote::Reject);
    }

    #[test]
    fn test_proposal_deserialize_defaults() {
        let json = r#"{
            "specialist_id": "trend",
            "vote": "approve",
            "confidence": 0.8,
            "timestamp": "2026-02-07T10:00:00Z"
        }"#;
        let p: Proposal = serde_json::from_str(json).unwrap();
        assert_eq!(p.priority, Priority::Medium);
        assert_eq!(p.voting_weight, DEFAULT_VOTING_WEIGHT);
        assert!(p.conditions.is_none());
        assert_eq!(p.round, 0);
    }
}

//! Consensus scoring: how much a proposal set agrees.
//!
//! [`MajorityScorer`] is the binding measure used for skip-debate and
//! convergence decisions. The other scorers are alternatives that can be
//! injected in its place; none of them is ever blended into another.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::proposal::{Proposal, Vote};

/// Computes an agreement level in `[0, 1]` over a set of proposals.
pub trait ConsensusScorer: Send + Sync {
    /// Stable name, recorded alongside scores.
    fn name(&self) -> &'static str;

    /// Agreement level in `[0, 1]`. Must be a pure function of the set.
    fn score(&self, proposals: &[Proposal]) -> f64;
}

/// Largest vote bucket divided by the number of proposals.
#[derive(Debug, Clone, Copy, Default)]
pub struct MajorityScorer;

impl ConsensusScorer for MajorityScorer {
    fn name(&self) -> &'static str {
        "majority"
    }

    fn score(&self, proposals: &[Proposal]) -> f64 {
        consensus_score(proposals)
    }
}

/// Approvals divided by the number of non-abstaining votes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApprovalRatioScorer;

impl ConsensusScorer for ApprovalRatioScorer {
    fn name(&self) -> &'static str {
        "approval_ratio"
    }

    fn score(&self, proposals: &[Proposal]) -> f64 {
        let tally = VoteTally::from_proposals(proposals);
        let counted = tally.total - tally.count(Vote::Abstain);
        if counted == 0 {
            return 0.0;
        }
        tally.count(Vote::Approve) as f64 / counted as f64
    }
}

/// Largest bucket by summed confidence divided by total confidence.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceWeightedScorer;

impl ConsensusScorer for ConfidenceWeightedScorer {
    fn name(&self) -> &'static str {
        "confidence_weighted"
    }

    fn score(&self, proposals: &[Proposal]) -> f64 {
        let mut buckets: BTreeMap<Vote, f64> = BTreeMap::new();
        let mut total = 0.0;
        for p in proposals {
            let weight = if p.confidence.is_finite() {
                p.confidence.clamp(0.0, 1.0)
            } else {
                0.0
            };
            *buckets.entry(p.vote).or_insert(0.0) += weight;
            total += weight;
        }
        if total <= 0.0 {
            return 0.0;
        }
        let largest = buckets.values().cloned().fold(0.0, f64::max);
        (largest / total).clamp(0.0, 1.0)
    }
}

/// Unweighted consensus: size of the largest vote bucket ÷ proposal count.
///
/// An empty set scores 0.0.
pub fn consensus_score(proposals: &[Proposal]) -> f64 {
    let tally = VoteTally::from_proposals(proposals);
    if tally.total == 0 {
        return 0.0;
    }
    tally.largest_bucket() as f64 / tally.total as f64
}

/// Count of proposals per vote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub counts: BTreeMap<Vote, usize>,
    pub total: usize,
}

impl VoteTally {
    pub fn from_proposals(proposals: &[Proposal]) -> Self {
        let mut tally = Self::default();
        for p in proposals {
            *tally.counts.entry(p.vote).or_insert(0) += 1;
            tally.total += 1;
        }
        tally
    }

    pub fn count(&self, vote: Vote) -> usize {
        self.counts.get(&vote).copied().unwrap_or(0)
    }

    pub fn largest_bucket(&self) -> usize {
        self.counts.values().copied().max().unwrap_or(0)
    }

    /// Most common vote; ties resolve to the earliest in `Vote` order.
    pub fn majority_vote(&self) -> Option<Vote> {
        let largest = self.largest_bucket();
        if largest == 0 {
            return None;
        }
        self.counts
            .iter()
            .find(|(_, count)| **count == largest)
            .map(|(vote, _)| *vote)
    }
}

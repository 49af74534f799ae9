//! Conflict detection: pairwise disagreement between specialists.
//!
//! Every unordered pair of proposals runs four independent checks:
//!
//! | Kind             | Trigger                                   | Severity |
//! |------------------|-------------------------------------------|----------|
//! | `Vote`           | approve vs reject                         | Critical |
//! | `Strategic`      | roles listed in the tension table         | High     |
//! | `Priority`       | priority ordinal gap ≥ threshold (2)      | Medium   |
//! | `ConfidenceGap`  | confidence difference ≥ threshold (0.4)   | Low      |
//!
//! Pairs are scanned in specialist-id order, so the output depends only on
//! the set of proposals and never on the order they were supplied in.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::DeliberationConfig;
use crate::proposal::{Proposal, SpecialistId};

/// Confidence lead that lets a vote conflict suggest favouring one side.
const VOTE_FAVOR_MARGIN: f64 = 0.2;

/// Absorbs float rounding so a gap of exactly the threshold (0.7 vs 0.3)
/// still counts.
const GAP_TOLERANCE: f64 = 1e-9;

/// Number of conflicts listed in a summary's `top_conflicts`.
const TOP_CONFLICTS: usize = 3;

/// Category of disagreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictKind {
    Vote,
    Priority,
    Strategic,
    ConfidenceGap,
}

impl ConflictKind {
    /// Fixed severity for each kind.
    pub fn severity(self) -> ConflictSeverity {
        match self {
            Self::Vote => ConflictSeverity::Critical,
            Self::Strategic => ConflictSeverity::High,
            Self::Priority => ConflictSeverity::Medium,
            Self::ConfidenceGap => ConflictSeverity::Low,
        }
    }
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vote => write!(f, "VOTE"),
            Self::Priority => write!(f, "PRIORITY"),
            Self::Strategic => write!(f, "STRATEGIC"),
            Self::ConfidenceGap => write!(f, "CONFIDENCE_GAP"),
        }
    }
}

/// Conflict severity. Ordered `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for ConflictSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// A detected disagreement between two specialists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    /// The pair, lower specialist id first.
    pub specialists: [SpecialistId; 2],
    pub kind: ConflictKind,
    pub severity: ConflictSeverity,
    pub description: String,
    pub resolution: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Conflict {
    fn new(
        a: &Proposal,
        b: &Proposal,
        kind: ConflictKind,
        description: String,
        resolution: String,
    ) -> Self {
        Self {
            specialists: [a.specialist_id.clone(), b.specialist_id.clone()],
            kind,
            severity: kind.severity(),
            description,
            resolution,
            metadata: BTreeMap::new(),
        }
    }

    fn with_meta(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    /// Whether the conflict involves the given specialist.
    pub fn involves(&self, specialist_id: &str) -> bool {
        self.specialists.iter().any(|s| s == specialist_id)
    }
}

/// How hard the detected conflicts will be to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionComplexity {
    Low,
    Medium,
    High,
}

/// Aggregate view over a conflict list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictSummary {
    pub total_conflicts: usize,
    pub by_kind: BTreeMap<ConflictKind, usize>,
    pub by_severity: BTreeMap<ConflictSeverity, usize>,
    pub critical_conflicts: usize,
    pub requires_arbitration: bool,
    pub top_conflicts: Vec<Conflict>,
    pub complexity: ResolutionComplexity,
}

impl ConflictSummary {
    /// Summary of an empty conflict list.
    pub fn empty() -> Self {
        Self {
            total_conflicts: 0,
            by_kind: BTreeMap::new(),
            by_severity: BTreeMap::new(),
            critical_conflicts: 0,
            requires_arbitration: false,
            top_conflicts: Vec::new(),
            complexity: ResolutionComplexity::Low,
        }
    }
}

/// Pairwise conflict scanner.
#[derive(Debug, Clone)]
pub struct ConflictDetector {
    config: DeliberationConfig,
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new(&DeliberationConfig::default())
    }
}

impl ConflictDetector {
    pub fn new(config: &DeliberationConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Scan every unordered pair and return all conflicts found.
    pub fn detect(&self, proposals: &[Proposal]) -> Vec<Conflict> {
        if proposals.len() < 2 {
            return Vec::new();
        }

        let mut ordered: Vec<&Proposal> = proposals.iter().collect();
        ordered.sort_by(|a, b| a.specialist_id.cmp(&b.specialist_id));

        let mut conflicts = Vec::new();
        for (i, a) in ordered.iter().enumerate() {
            for b in &ordered[i + 1..] {
                self.detect_pair(a, b, &mut conflicts);
            }
        }

        debug!(
            proposals = proposals.len(),
            conflicts = conflicts.len(),
            "Conflict scan complete"
        );
        conflicts
    }

    fn detect_pair(&self, a: &Proposal, b: &Proposal, out: &mut Vec<Conflict>) {
        if a.vote.opposes(b.vote) {
            out.push(
                Conflict::new(
                    a,
                    b,
                    ConflictKind::Vote,
                    format!(
                        "{} votes {}, {} votes {}",
                        a.specialist_id, a.vote, b.specialist_id, b.vote
                    ),
                    vote_resolution(a, b),
                )
                .with_meta("vote_a", a.vote)
                .with_meta("vote_b", b.vote),
            );
        }

        if a.priority.gap(b.priority) >= self.config.priority_gap_threshold {
            out.push(
                Conflict::new(
                    a,
                    b,
                    ConflictKind::Priority,
                    format!(
                        "{} rates as {}, {} rates as {}",
                        a.specialist_id, a.priority, b.specialist_id, b.priority
                    ),
                    "Evaluate against current objectives and resource constraints".to_string(),
                )
                .with_meta("priority_a", a.priority)
                .with_meta("priority_b", b.priority),
            );
        }

        if let Some(rule) = self.config.tension_between(&a.specialist_id, &b.specialist_id) {
            let role_a = self.config.role_of(&a.specialist_id);
            let role_b = self.config.role_of(&b.specialist_id);
            let resolution = if rule.resolution.is_empty() {
                "Evaluate the strategic trade-off against the session goals".to_string()
            } else {
                rule.resolution.clone()
            };
            out.push(
                Conflict::new(
                    a,
                    b,
                    ConflictKind::Strategic,
                    format!(
                        "Strategic tension between {} and {}: {}",
                        role_a, role_b, rule.description
                    ),
                    resolution,
                )
                .with_meta("role_a", role_a)
                .with_meta("role_b", role_b),
            );
        }

        let gap = (a.confidence - b.confidence).abs();
        if gap + GAP_TOLERANCE >= self.config.confidence_gap_threshold {
            let (higher, lower) = if a.confidence > b.confidence {
                (a, b)
            } else {
                (b, a)
            };
            out.push(
                Conflict::new(
                    a,
                    b,
                    ConflictKind::ConfidenceGap,
                    format!(
                        "{} has {:.2} confidence, {} has {:.2}",
                        higher.specialist_id,
                        higher.confidence,
                        lower.specialist_id,
                        lower.confidence
                    ),
                    "Weight the decision toward the more confident specialist".to_string(),
                )
                .with_meta("confidence_a", format!("{:.2}", a.confidence))
                .with_meta("confidence_b", format!("{:.2}", b.confidence)),
            );
        }
    }

    /// Aggregate counts and the arbitration requirement.
    pub fn summarize(&self, conflicts: &[Conflict]) -> ConflictSummary {
        if conflicts.is_empty() {
            return ConflictSummary::empty();
        }

        let mut by_kind = BTreeMap::new();
        let mut by_severity = BTreeMap::new();
        for c in conflicts {
            *by_kind.entry(c.kind).or_insert(0) += 1;
            *by_severity.entry(c.severity).or_insert(0) += 1;
        }
        let critical = by_severity
            .get(&ConflictSeverity::Critical)
            .copied()
            .unwrap_or(0);

        ConflictSummary {
            total_conflicts: conflicts.len(),
            by_kind,
            by_severity,
            critical_conflicts: critical,
            requires_arbitration: critical > 0 || conflicts.len() > self.config.arbitration_conflict_threshold,
            top_conflicts: most_severe(conflicts, TOP_CONFLICTS),
            complexity: assess_complexity(conflicts),
        }
    }
}

fn vote_resolution(a: &Proposal, b: &Proposal) -> String {
    if a.confidence > b.confidence + VOTE_FAVOR_MARGIN {
        format!(
            "Favor {} (higher confidence: {:.2})",
            a.specialist_id, a.confidence
        )
    } else if b.confidence > a.confidence + VOTE_FAVOR_MARGIN {
        format!(
            "Favor {} (higher confidence: {:.2})",
            b.specialist_id, b.confidence
        )
    } else {
        "Arbiter must weigh specialist expertise and strategic priorities".to_string()
    }
}

/// Group conflicts by kind, preserving detection order within each group.
pub fn group_by_kind(conflicts: &[Conflict]) -> BTreeMap<ConflictKind, Vec<Conflict>> {
    let mut grouped: BTreeMap<ConflictKind, Vec<Conflict>> = BTreeMap::new();
    for c in conflicts {
        grouped.entry(c.kind).or_default().push(c.clone());
    }
    grouped
}

/// The `n` most severe conflicts; ties keep detection order.
pub fn most_severe(conflicts: &[Conflict], n: usize) -> Vec<Conflict> {
    let mut sorted = conflicts.to_vec();
    sorted.sort_by(|a, b| b.severity.cmp(&a.severity));
    sorted.truncate(n);
    sorted
}

/// HIGH with two or more critical conflicts, MEDIUM with four or more in
/// total, LOW otherwise.
pub fn assess_complexity(conflicts: &[Conflict]) -> ResolutionComplexity {
    let critical = conflicts
        .iter()
        .filter(|c| c.severity == ConflictSeverity::Critical)
        .count();
    if critical >= 2 {
        ResolutionComplexity::High
    } else if conflicts.len() >= 4 {
        ResolutionComplexity::Medium
    } else {
        ResolutionComplexity::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TensionRule;
    use crate::proposal::{Priority, Vote};

    fn tension_config() -> DeliberationConfig {
        DeliberationConfig {
            tensions: vec![
                TensionRule::new("trend", "brand", "viral reach vs consistency", "Test small"),
                TensionRule::new("trend", "risk", "opportunity vs safety", ""),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_no_conflicts_for_single_or_empty() {
        let detector = ConflictDetector::default();
        assert!(detector.detect(&[]).is_empty());
        assert!(detector
            .detect(&[Proposal::new("a", Vote::Approve, 0.9)])
            .is_empty());
    }

    #[test]
    fn test_vote_conflict_is_critical() {
        let detector = ConflictDetector::default();
        let conflicts = detector.detect(&[
            Proposal::new("a", Vote::Approve, 0.9),
            Proposal::new("b", Vote::Reject, 0.85),
        ]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::Vote);
        assert_eq!(conflicts[0].severity, ConflictSeverity::Critical);
        assert_eq!(conflicts[0].specialists, ["a".to_string(), "b".to_string()]);
        assert_eq!(conflicts[0].metadata["vote_a"], "approve");
        assert!(conflicts[0].resolution.contains("Arbiter"));
    }

    #[test]
    fn test_vote_resolution_favours_confident_side() {
        let detector = ConflictDetector::default();
        let conflicts = detector.detect(&[
            Proposal::new("a", Vote::Approve, 0.95),
            Proposal::new("b", Vote::Reject, 0.6),
        ]);
        let vote = conflicts
            .iter()
            .find(|c| c.kind == ConflictKind::Vote)
            .unwrap();
        assert!(vote.resolution.starts_with("Favor a"));
    }

    #[test]
    fn test_conditional_does_not_oppose() {
        let detector = ConflictDetector::default();
        let conflicts = detector.detect(&[
            Proposal::new("a", Vote::Approve, 0.8),
            Proposal::new("b", Vote::Conditional, 0.8),
            Proposal::new("c", Vote::Abstain, 0.8),
        ]);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_priority_conflict() {
        let detector = ConflictDetector::default();
        let conflicts = detector.detect(&[
            Proposal::new("a", Vote::Approve, 0.8).with_priority(Priority::High),
            Proposal::new("b", Vote::Approve, 0.8).with_priority(Priority::Low),
            Proposal::new("c", Vote::Approve, 0.8).with_priority(Priority::Medium),
        ]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::Priority);
        assert_eq!(conflicts[0].severity, ConflictSeverity::Medium);
    }

    #[test]
    fn test_strategic_conflict_from_table() {
        let detector = ConflictDetector::new(&tension_config());
        let conflicts = detector.detect(&[
            Proposal::new("trend", Vote::Approve, 0.8),
            Proposal::new("brand", Vote::Approve, 0.8),
            Proposal::new("risk", Vote::Approve, 0.8),
        ]);
        assert_eq!(conflicts.len(), 2);
        assert!(conflicts
            .iter()
            .all(|c| c.kind == ConflictKind::Strategic && c.severity == ConflictSeverity::High));
        let brand_trend = conflicts.iter().find(|c| c.involves("brand")).unwrap();
        assert_eq!(brand_trend.resolution, "Test small");
        let risk_trend = conflicts.iter().find(|c| c.involves("risk")).unwrap();
        assert!(risk_trend.resolution.contains("strategic trade-off"));
    }

    #[test]
    fn test_strategic_uses_roles() {
        let mut config = tension_config();
        config
            .specialist_roles
            .insert("analyst-7".to_string(), "trend".to_string());
        let detector = ConflictDetector::new(&config);
        let conflicts = detector.detect(&[
            Proposal::new("analyst-7", Vote::Approve, 0.8),
            Proposal::new("brand", Vote::Approve, 0.8),
        ]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].metadata["role_a"], "trend");
    }

    #[test]
    fn test_no_strategic_conflict_without_table() {
        let detector = ConflictDetector::default();
        let conflicts = detector.detect(&[
            Proposal::new("trend", Vote::Approve, 0.8),
            Proposal::new("brand", Vote::Approve, 0.8),
        ]);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_confidence_gap() {
        let detector = ConflictDetector::default();
        let conflicts = detector.detect(&[
            Proposal::new("a", Vote::Approve, 0.9),
            Proposal::new("b", Vote::Approve, 0.45),
        ]);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::ConfidenceGap);
        assert_eq!(conflicts[0].severity, ConflictSeverity::Low);
        assert!(conflicts[0].description.starts_with("a has 0.90"));

        let conflicts = detector.detect(&[
            Proposal::new("a", Vote::Approve, 0.9),
            Proposal::new("b", Vote::Approve, 0.55),
        ]);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_confidence_gap_at_threshold() {
        let detector = ConflictDetector::default();
        for (high, low) in [(0.7, 0.3), (0.9, 0.5), (0.85, 0.45)] {
            let conflicts = detector.detect(&[
                Proposal::new("a", Vote::Approve, high),
                Proposal::new("b", Vote::Approve, low),
            ]);
            assert_eq!(conflicts.len(), 1, "gap {} vs {}", high, low);
            assert_eq!(conflicts[0].kind, ConflictKind::ConfidenceGap);
        }

        let conflicts = detector.detect(&[
            Proposal::new("a", Vote::Approve, 0.7),
            Proposal::new("b", Vote::Approve, 0.31),
        ]);
        assert!(conflicts.is_empty());
    }

    #[test]
    fn test_pair_can_yield_all_four() {
        let detector = ConflictDetector::new(&tension_config());
        let conflicts = detector.detect(&[
            Proposal::new("trend", Vote::Approve, 0.95).with_priority(Priority::High),
            Proposal::new("brand", Vote::Reject, 0.3).with_priority(Priority::Low),
        ]);
        let kinds: Vec<_> = conflicts.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ConflictKind::Vote,
                ConflictKind::Priority,
                ConflictKind::Strategic,
                ConflictKind::ConfidenceGap
            ]
        );
    }

    #[test]
    fn test_detect_is_order_independent_and_repeatable() {
        let detector = ConflictDetector::new(&tension_config());
        let proposals = vec![
            Proposal::new("trend", Vote::Approve, 0.95).with_priority(Priority::High),
            Proposal::new("risk", Vote::Reject, 0.4).with_priority(Priority::Low),
            Proposal::new("brand", Vote::Conditional, 0.7),
        ];
        let mut reversed = proposals.clone();
        reversed.reverse();

        let first = detector.detect(&proposals);
        assert_eq!(first, detector.detect(&reversed));
        assert_eq!(first, detector.detect(&proposals));
        assert!(first.iter().all(|c| c.specialists[0] < c.specialists[1]));
    }

    #[test]
    fn test_severity_ordering_total() {
        assert!(ConflictSeverity::Critical > ConflictSeverity::High);
        assert!(ConflictSeverity::High > ConflictSeverity::Medium);
        assert!(ConflictSeverity::Medium > ConflictSeverity::Low);
    }

    #[test]
    fn test_summary_requires_arbitration() {
        let detector = ConflictDetector::default();
        let conflicts = detector.detect(&[
            Proposal::new("a", Vote::Approve, 0.9),
            Proposal::new("b", Vote::Reject, 0.85),
        ]);
        let summary = detector.summarize(&conflicts);
        assert_eq!(summary.total_conflicts, 1);
        assert_eq!(summary.critical_conflicts, 1);
        assert!(summary.requires_arbitration);
        assert_eq!(summary.by_kind[&ConflictKind::Vote], 1);
        assert_eq!(summary.complexity, ResolutionComplexity::Low);

        assert_eq!(detector.summarize(&[]), ConflictSummary::empty());
    }

    #[test]
    fn test_summary_threshold_without_critical() {
        let detector = ConflictDetector::default();
        // Four confidence/priority conflicts, none critical.
        let conflicts = detector.detect(&[
            Proposal::new("a", Vote::Approve, 0.95).with_priority(Priority::High),
            Proposal::new("b", Vote::Approve, 0.3).with_priority(Priority::Low),
            Proposal::new("c", Vote::Approve, 0.2).with_priority(Priority::Low),
        ]);
        assert_eq!(conflicts.len(), 4);
        let summary = detector.summarize(&conflicts);
        assert_eq!(summary.critical_conflicts, 0);
        assert!(summary.requires_arbitration);
        assert_eq!(summary.complexity, ResolutionComplexity::Medium);
        assert_eq!(summary.top_conflicts.len(), 3);
        assert_eq!(summary.top_conflicts[0].severity, ConflictSeverity::Medium);
    }

    #[test]
    fn test_group_and_rank_helpers() {
        let detector = ConflictDetector::default();
        let conflicts = detector.detect(&[
            Proposal::new("a", Vote::Approve, 0.95),
            Proposal::new("b", Vote::Reject, 0.3),
            Proposal::new("c", Vote::Reject, 0.9),
        ]);
        let grouped = group_by_kind(&conflicts);
        assert_eq!(grouped[&ConflictKind::Vote].len(), 2);
        assert_eq!(grouped[&ConflictKind::ConfidenceGap].len(), 2);

        let top = most_severe(&conflicts, 1);
        assert_eq!(top[0].severity, ConflictSeverity::Critical);
        assert_eq!(assess_complexity(&conflicts), ResolutionComplexity::High);
    }

    #[test]
    fn test_display() {
        assert_eq!(ConflictKind::ConfidenceGap.to_string(), "CONFIDENCE_GAP");
        assert_eq!(ConflictSeverity::Critical.to_string(), "CRITICAL");
        let json = serde_json::to_string(&ConflictKind::ConfidenceGap).unwrap();
        assert_eq!(json, "\"CONFIDENCE_GAP\"");
    }
}

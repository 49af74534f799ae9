//! Session configuration.
//!
//! Loaded from TOML, optionally overridden by `DELIBERATION_*` environment
//! variables, then validated before a controller accepts it.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::proposal::{Proposal, SpecialistId, DEFAULT_VOTING_WEIGHT};

/// Errors loading or validating configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid environment override {var}={value}")]
    Env { var: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A known strategic tension between two specialist roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensionRule {
    /// The two roles in tension (order does not matter).
    pub roles: [String; 2],
    /// What the tension is about (e.g. "viral reach vs consistency").
    pub description: String,
    /// Guidance handed to the arbiter when the tension shows up.
    #[serde(default)]
    pub resolution: String,
}

impl TensionRule {
    pub fn new(a: &str, b: &str, description: &str, resolution: &str) -> Self {
        Self {
            roles: [a.to_string(), b.to_string()],
            description: description.to_string(),
            resolution: resolution.to_string(),
        }
    }

    /// Whether this rule covers the unordered pair `(a, b)`.
    pub fn matches(&self, a: &str, b: &str) -> bool {
        (self.roles[0] == a && self.roles[1] == b) || (self.roles[0] == b && self.roles[1] == a)
    }
}

/// Configuration for one deliberation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliberationConfig {
    /// Maximum debate rounds.
    pub max_rounds: u32,
    /// Consensus score that skips or ends debate (0.0–1.0).
    pub convergence_threshold: f64,
    /// Stop the debate when a round changes no votes.
    pub stalemate_detection: bool,
    /// Conflict count above which arbitration is required.
    pub arbitration_conflict_threshold: usize,
    /// Confidence difference that counts as a conflict.
    pub confidence_gap_threshold: f64,
    /// Priority ordinal distance that counts as a conflict.
    pub priority_gap_threshold: u8,
    /// Known strategic tensions between roles.
    pub tensions: Vec<TensionRule>,
    /// Specialist id → role. Specialists without an entry use their id.
    pub specialist_roles: BTreeMap<SpecialistId, String>,
    /// Specialist id → voting weight. Overrides the proposal's own weight.
    pub voting_weights: BTreeMap<SpecialistId, f64>,
    /// Weight used when neither the config nor the proposal supplies one.
    pub default_voting_weight: f64,
    /// Specialist that only observes until the final debate round.
    pub arbiter_specialist: Option<SpecialistId>,
    /// Per-call timeout for opinion requests.
    pub specialist_timeout_ms: u64,
    /// Timeout for the final arbiter call.
    pub arbiter_timeout_ms: u64,
    /// Wall-clock budget for the whole session (0 = unlimited).
    pub session_budget_ms: u64,
}

impl Default for DeliberationConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            convergence_threshold: 0.85,
            stalemate_detection: true,
            arbitration_conflict_threshold: 3,
            confidence_gap_threshold: 0.4,
            priority_gap_threshold: 2,
            tensions: Vec::new(),
            specialist_roles: BTreeMap::new(),
            voting_weights: BTreeMap::new(),
            default_voting_weight: DEFAULT_VOTING_WEIGHT,
            arbiter_specialist: None,
            specialist_timeout_ms: 30_000,
            arbiter_timeout_ms: 60_000,
            session_budget_ms: 0,
        }
    }
}

impl DeliberationConfig {
    /// Parse from a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load and validate a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `DELIBERATION_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DELIBERATION_MAX_ROUNDS") {
            self.max_rounds = parse_env("DELIBERATION_MAX_ROUNDS", &v)?;
        }
        if let Some(v) = lookup("DELIBERATION_CONVERGENCE_THRESHOLD") {
            self.convergence_threshold = parse_env("DELIBERATION_CONVERGENCE_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("DELIBERATION_STALEMATE_DETECTION") {
            self.stalemate_detection = parse_env("DELIBERATION_STALEMATE_DETECTION", &v)?;
        }
        if let Some(v) = lookup("DELIBERATION_SPECIALIST_TIMEOUT_MS") {
            self.specialist_timeout_ms = parse_env("DELIBERATION_SPECIALIST_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("DELIBERATION_ARBITER_TIMEOUT_MS") {
            self.arbiter_timeout_ms = parse_env("DELIBERATION_ARBITER_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("DELIBERATION_SESSION_BUDGET_MS") {
            self.session_budget_ms = parse_env("DELIBERATION_SESSION_BUDGET_MS", &v)?;
        }
        if let Some(v) = lookup("DELIBERATION_ARBITER_SPECIALIST") {
            self.arbiter_specialist = if v.trim().is_empty() {
                None
            } else {
                Some(v.trim().to_string())
            };
        }
        Ok(())
    }

    /// Check ranges and internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_rounds == 0 {
            return Err(ConfigError::Invalid("max_rounds must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.convergence_threshold) {
            return Err(ConfigError::Invalid(format!(
                "convergence_threshold {} outside [0, 1]",
                self.convergence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence_gap_threshold) {
            return Err(ConfigError::Invalid(format!(
                "confidence_gap_threshold {} outside [0, 1]",
                self.confidence_gap_threshold
            )));
        }
        if self.priority_gap_threshold == 0 {
            return Err(ConfigError::Invalid(
                "priority_gap_threshold must be positive".into(),
            ));
        }
        if self.specialist_timeout_ms == 0 || self.arbiter_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        if !self.default_voting_weight.is_finite() || self.default_voting_weight < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "default_voting_weight {} is invalid",
                self.default_voting_weight
            )));
        }
        for (id, weight) in &self.voting_weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "voting weight for '{}' is invalid: {}",
                    id, weight
                )));
            }
        }
        for rule in &self.tensions {
            if rule.roles[0] == rule.roles[1] {
                return Err(ConfigError::Invalid(format!(
                    "tension rule pairs role '{}' with itself",
                    rule.roles[0]
                )));
            }
        }
        Ok(())
    }

    /// Role of a specialist (its id unless mapped).
    pub fn role_of<'a>(&'a self, specialist_id: &'a str) -> &'a str {
        self.specialist_roles
            .get(specialist_id)
            .map(String::as_str)
            .unwrap_or(specialist_id)
    }

    /// Tension rule covering the two specialists' roles, if any.
    pub fn tension_between(&self, a: &str, b: &str) -> Option<&TensionRule> {
        let (role_a, role_b) = (self.role_of(a), self.role_of(b));
        self.tensions.iter().find(|rule| rule.matches(role_a, role_b))
    }

    /// Effective voting weight for a proposal.
    pub fn weight_for(&self, proposal: &Proposal) -> f64 {
        if let Some(weight) = self.voting_weights.get(&proposal.specialist_id) {
            return *weight;
        }
        if proposal.voting_weight.is_finite() && proposal.voting_weight >= 0.0 {
            proposal.voting_weight
        } else {
            self.default_voting_weight
        }
    }

    pub fn specialist_timeout(&self) -> Duration {
        Duration::from_millis(self.specialist_timeout_ms)
    }

    pub fn arbiter_timeout(&self) -> Duration {
        Duration::from_millis(self.arbiter_timeout_ms)
    }

    /// Session budget, `None` when unlimited.
    pub fn session_budget(&self) -> Option<Duration> {
        (self.session_budget_ms > 0).then(|| Duration::from_millis(self.session_budget_ms))
    }
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        value: value.to_string(),
    })
}

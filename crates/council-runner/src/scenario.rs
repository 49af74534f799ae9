//! Scripted council scenarios loaded from JSON.
//!
//! A scenario names the topic, each specialist's turn-by-turn positions, and
//! the arbiter's verdict, so a whole session replays deterministically.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use deliberation::{
    ArbiterError, ArbiterVerdict, ArbitrationInput, DeliberationConfig, DeliberationRequest,
    FinalArbiter, OpinionError, OpinionGenerator, Priority, Proposal, SessionContext, Vote,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse scenario: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid scenario: {0}")]
    Invalid(String),
}

/// One specialist turn. Turn 0 is the initial analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    #[serde(default)]
    pub vote: Option<Vote>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub conditions: Option<Vec<String>>,
    /// Simulate an unavailable specialist for this turn.
    #[serde(default)]
    pub fail: bool,
}

fn default_confidence() -> f64 {
    0.7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedSpecialist {
    pub id: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub voting_weight: Option<f64>,
    pub turns: Vec<Turn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub topic: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub context: serde_json::Value,
    pub specialists: Vec<ScriptedSpecialist>,
    pub arbiter: ArbiterVerdict,
}

impl Scenario {
    pub fn from_json(json: &str) -> Result<Self, ScenarioError> {
        let scenario: Self = serde_json::from_str(json)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let json = std::fs::read_to_string(path).map_err(|source| ScenarioError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.specialists.is_empty() {
            return Err(ScenarioError::Invalid("no specialists".into()));
        }
        for s in &self.specialists {
            if s.turns.is_empty() {
                return Err(ScenarioError::Invalid(format!("specialist '{}' has no turns", s.id)));
            }
            if !s.turns[0].fail && s.turns[0].vote.is_none() {
                return Err(ScenarioError::Invalid(format!(
                    "specialist '{}' has no opening vote",
                    s.id
                )));
            }
        }
        Ok(())
    }

    /// Copy roles and voting weights into the session config.
    pub fn apply_to(&self, config: &mut DeliberationConfig) {
        for s in &self.specialists {
            if let Some(role) = &s.role {
                config.specialist_roles.insert(s.id.clone(), role.clone());
            }
            if let Some(weight) = s.voting_weight {
                config.voting_weights.insert(s.id.clone(), weight);
            }
        }
    }

    pub fn request(&self) -> DeliberationRequest {
        DeliberationRequest {
            topic: self.topic.clone(),
            specialists: self.specialists.iter().map(|s| s.id.clone()).collect(),
            context: self.context.clone(),
            session_id: self.session_id.clone(),
        }
    }

    pub fn council(&self) -> ScriptedCouncil {
        ScriptedCouncil {
            specialists: self
                .specialists
                .iter()
                .map(|s| (s.id.clone(), s.clone()))
                .collect(),
        }
    }

    pub fn arbiter(&self) -> ScriptedVerdict {
        ScriptedVerdict(self.arbiter.clone())
    }
}

/// Opinion generator that plays back each specialist's turns.
///
/// A `fail` turn fails only its own round. Past the last scripted turn a
/// specialist repeats its last vote, even when the script ended on a failure.
pub struct ScriptedCouncil {
    specialists: BTreeMap<String, ScriptedSpecialist>,
}

impl ScriptedCouncil {
    fn turn(&self, specialist: &str, round: u32) -> Option<&Turn> {
        let turns = &self.specialists.get(specialist)?.turns;
        let idx = round as usize;
        if let Some(turn) = turns.get(idx) {
            if turn.fail || turn.vote.is_some() {
                return Some(turn);
            }
        }
        // Past the script, or a turn without a vote: keep the most recent vote.
        turns[..idx.min(turns.len())]
            .iter()
            .rev()
            .find(|t| t.vote.is_some())
    }
}

#[async_trait]
impl OpinionGenerator for ScriptedCouncil {
    async fn generate(
        &self,
        ctx: &SessionContext,
        others: &[Proposal],
    ) -> Result<Proposal, OpinionError> {
        debug!(specialist = %ctx.specialist_id, round = ctx.round, others = others.len(), "Scripted turn");
        let turn = self
            .turn(&ctx.specialist_id, ctx.round)
            .ok_or_else(|| OpinionError::Unavailable(format!("no script for {}", ctx.specialist_id)))?;
        if turn.fail {
            return Err(OpinionError::Unavailable("scripted failure".into()));
        }
        let vote = turn
            .vote
            .ok_or_else(|| OpinionError::Malformed("turn has no vote".into()))?;

        let mut proposal = Proposal::new(ctx.specialist_id.clone(), vote, turn.confidence)
            .with_priority(turn.priority)
            .with_reasoning(turn.reasoning.clone());
        proposal.concerns = turn.concerns.clone();
        proposal.scores = turn.scores.clone();
        proposal.conditions = turn.conditions.clone();
        Ok(proposal)
    }
}

/// Final arbiter that returns the scenario's verdict.
pub struct ScriptedVerdict(ArbiterVerdict);

#[async_trait]
impl FinalArbiter for ScriptedVerdict {
    async fn arbitrate(&self, input: &ArbitrationInput) -> Result<ArbiterVerdict, ArbiterError> {
        debug!(
            session_id = %input.session_id,
            approve = input.weighted_totals.approve,
            reject = input.weighted_totals.reject,
            conditional = input.weighted_totals.conditional,
            "Scripted arbitration"
        );
        Ok(self.0.clone())
    }
}

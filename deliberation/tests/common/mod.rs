//! Deterministic scripted specialists and arbiters (no LLM calls).

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use deliberation::{
    ArbiterError, ArbiterVerdict, ArbitrationInput, DeliberationConfig, DeliberationController,
    FinalArbiter, MemorySink, OpinionError, OpinionGenerator, Proposal, SessionContext,
    SharedSink, Vote,
};

/// What a scripted specialist does in a given round.
#[derive(Debug, Clone)]
pub enum Step {
    Vote(Vote, f64),
    Fail,
    /// Never answers; only a timeout ends the call.
    Hang,
    /// Returns this record verbatim, however invalid.
    Raw(Proposal),
    /// Reports an unparseable opinion.
    Garbled,
}

/// Specialists driven by a per-(specialist, round) script.
///
/// A specialist with no entry for a debate round repeats its most recent
/// scripted vote; with no entry for round 0 it is unavailable.
#[derive(Default)]
pub struct ScriptedGenerator {
    script: BTreeMap<(String, u32), Step>,
    pub calls: Mutex<Vec<(String, u32, Vec<String>)>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, specialist: &str, round: u32, step: Step) -> Self {
        self.script.insert((specialist.to_string(), round), step);
        self
    }

    pub fn vote(self, specialist: &str, round: u32, vote: Vote, confidence: f64) -> Self {
        self.step(specialist, round, Step::Vote(vote, confidence))
    }

    pub fn calls_in_round(&self, round: u32) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, r, _)| *r == round)
            .map(|(id, _, _)| id.clone())
            .collect()
    }

    /// Most recent scripted vote at or before `round`.
    fn last_vote(&self, specialist: &str, round: u32) -> Option<Step> {
        (0..=round).rev().find_map(|r| {
            match self.script.get(&(specialist.to_string(), r)) {
                Some(step @ Step::Vote(..)) => Some(step.clone()),
                _ => None,
            }
        })
    }
}

#[async_trait]
impl OpinionGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        ctx: &SessionContext,
        others: &[Proposal],
    ) -> Result<Proposal, OpinionError> {
        self.calls.lock().unwrap().push((
            ctx.specialist_id.clone(),
            ctx.round,
            others.iter().map(|p| p.specialist_id.clone()).collect(),
        ));

        let step = match self.script.get(&(ctx.specialist_id.clone(), ctx.round)) {
            Some(step) => step.clone(),
            None if ctx.round == 0 => return Err(OpinionError::Unavailable("not scripted".into())),
            // Failures and hangs don't carry over into later rounds.
            None => match self.last_vote(&ctx.specialist_id, ctx.round) {
                Some(step) => step,
                None => return Err(OpinionError::Unavailable("not scripted".into())),
            },
        };

        match step {
            Step::Vote(vote, confidence) => Ok(Proposal::new(ctx.specialist_id.clone(), vote, confidence)
                .with_reasoning(format!("{} holds {} in round {}", ctx.specialist_id, vote, ctx.round))),
            Step::Fail => Err(OpinionError::Unavailable("backend returned 503".into())),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Err(OpinionError::Unavailable("woke up".into()))
            }
            Step::Raw(proposal) => Ok(proposal),
            Step::Garbled => Err(OpinionError::Malformed("response was not JSON".into())),
        }
    }
}

/// Arbiter returning a fixed verdict and remembering what it was shown.
pub struct ScriptedArbiter {
    verdict: Result<ArbiterVerdict, ArbiterError>,
    delay: Option<Duration>,
    pub inputs: Mutex<Vec<ArbitrationInput>>,
}

impl ScriptedArbiter {
    pub fn deciding(decision: &str) -> Self {
        Self {
            verdict: Ok(ArbiterVerdict {
                decision: Some(decision.to_string()),
                rationale: format!("scripted {}", decision),
                confidence: Some(0.8),
                modifications_required: Vec::new(),
            }),
            delay: None,
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_verdict(verdict: ArbiterVerdict) -> Self {
        Self {
            verdict: Ok(verdict),
            delay: None,
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            verdict: Err(ArbiterError::Unavailable("arbiter offline".into())),
            delay: None,
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn slow(decision: &str, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::deciding(decision)
        }
    }

    pub fn last_input(&self) -> Option<ArbitrationInput> {
        self.inputs.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl FinalArbiter for ScriptedArbiter {
    async fn arbitrate(&self, input: &ArbitrationInput) -> Result<ArbiterVerdict, ArbiterError> {
        self.inputs.lock().unwrap().push(input.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.verdict.clone()
    }
}

/// Controller wired to the given fakes plus a memory sink.
pub fn controller(
    config: DeliberationConfig,
    generator: Arc<ScriptedGenerator>,
    arbiter: Arc<ScriptedArbiter>,
) -> (DeliberationController, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let shared: SharedSink = sink.clone();
    let controller =
        DeliberationController::new(config, generator, arbiter, shared).expect("valid config");
    (controller, sink)
}

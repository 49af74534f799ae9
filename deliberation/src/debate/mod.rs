//! Debate: bounded rounds of opinion exchange between specialists.
//!
//! # Debate Flow
//!
//! ```text
//! NotStarted → round 1 → [stop?] ─ no ─→ RoundInProgress → round r+1 ...
//!                           │
//!                           ├─ r == max_rounds      → MaxRoundsReached
//!                           ├─ score ≥ threshold    → Converged
//!                           ├─ no votes changed     → Stalemate
//!                           └─ budget exhausted     → TimedOut
//! ```
//!
//! A specialist whose call fails keeps its previous proposal for the round.

pub mod guardrails;
pub mod orchestrator;
pub mod state;

pub use guardrails::{SessionBudget, StopDecision, StopPolicy};
pub use orchestrator::{DebateContext, DebateError, DebateOrchestrator, DebateOutcome};
pub use state::{
    Argument, DebateRound, DebateState, DebateSummary, PositionChange, TerminationReason,
};

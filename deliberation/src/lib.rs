//! Specialist Council Deliberation Library
//!
//! This library runs structured deliberations between independent
//! specialists and drives them to one binding decision:
//! - Consensus scoring over specialist proposals
//! - Pairwise conflict detection with resolution suggestions
//! - Bounded, concurrent debate rounds with convergence and stalemate stops
//! - Final arbitration through an injected arbiter
//!
//! # Workflow
//!
//! ```text
//! INITIALIZED → ANALYSIS → CONFLICT_DETECTION → (DEBATE | skip)
//!             → ARBITRATION → FINALIZED        (or FAILED)
//! ```
//!
//! # Capabilities
//!
//! The engine never produces opinions itself. Callers plug in:
//! - `OpinionGenerator`: one proposal per specialist per round
//! - `FinalArbiter`: the binding verdict
//! - `SessionSink`: round and session events
//!
//! # Usage
//!
//! ```ignore
//! let controller = DeliberationController::new(config, generator, arbiter, sink)?;
//! let outcome = controller
//!     .run(DeliberationRequest::new("spring launch", &["brand", "risk", "trend"]))
//!     .await;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod arbitration;
pub mod config;
pub mod conflict;
pub mod consensus;
pub mod controller;
pub mod debate;
pub mod error;
pub mod events;
pub mod persistence;
pub mod proposal;
pub mod session;
pub mod specialist;

pub use arbitration::{
    overruled_specialists, ArbiterError, ArbiterVerdict, ArbitrationInput, ArbitrationSource,
    Arbitrator, DecisionRecord, FinalArbiter, FinalDecision, WeightedVoteTotals,
};
pub use config::{ConfigError, DeliberationConfig, TensionRule};
pub use conflict::{
    Conflict, ConflictDetector, ConflictKind, ConflictSeverity, ConflictSummary,
    ResolutionComplexity,
};
pub use consensus::{
    consensus_score, ApprovalRatioScorer, ConfidenceWeightedScorer, ConsensusScorer,
    MajorityScorer, VoteTally,
};
pub use controller::{DeliberationController, DeliberationRequest, SessionOutcome};
pub use debate::{
    DebateOrchestrator, DebateRound, DebateState, DebateSummary, PositionChange, SessionBudget,
    TerminationReason,
};
pub use error::{DeliberationError, Result};
pub use events::{
    BroadcastSink, JsonlSink, MemorySink, NullSink, SessionEvent, SessionSink, SharedSink,
    SinkError,
};
pub use persistence::{validate_record, IntegrityStatus, PersistenceError, SessionRecord};
pub use proposal::{Priority, Proposal, ProposalSet, SpecialistId, Vote};
pub use session::{DeliberationSession, StageTransition, WorkflowStage};
pub use specialist::{
    FailureKind, OpinionError, OpinionGenerator, SessionContext, SpecialistFailure,
};

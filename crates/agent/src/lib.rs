//! Per-call dialogue core
//!
//! Owns everything that happens between a transcribed user turn and the
//! agent's spoken reply:
//! - Booking state machine with guard-driven transitions and retry,
//!   digression, and silence policy
//! - Turn orchestrator running at most one turn at a time through
//!   extraction, state dispatch, and synthesis
//! - Session task: one select loop per call owning all mutable state,
//!   timers included
//! - Context-aware silence nudges

pub mod fsm;
pub mod nudges;
pub mod orchestrator;
pub mod runtime;
pub mod session;

pub use fsm::{Action, BookingState, Disposition, ProcessIntent, ResponseChoice, StateMachine};
pub use nudges::nudge_for;
pub use orchestrator::TurnOrchestrator;
pub use runtime::{SessionDeps, SessionRuntime};
pub use session::{BargeGate, Session, SessionFlags};

use thiserror::Error;

/// Dialogue errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("extraction error: {0}")]
    Extraction(String),

    #[error("synthesis error: {0}")]
    Synthesis(String),

    #[error("media stream error: {0}")]
    Media(String),
}

impl From<frontdesk_llm::LlmError> for AgentError {
    fn from(err: frontdesk_llm::LlmError) -> Self {
        AgentError::Extraction(err.to_string())
    }
}

impl From<frontdesk_pipeline::PipelineError> for AgentError {
    fn from(err: frontdesk_pipeline::PipelineError) -> Self {
        AgentError::Synthesis(err.to_string())
    }
}

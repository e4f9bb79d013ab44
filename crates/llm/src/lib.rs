//! Intent and entity extraction
//!
//! One call to the language model per user turn: classify the intent,
//! extract booking entities, and draft the agent's next utterance. The
//! model's output is never trusted — it is parsed against a strict schema
//! and anything malformed is coerced to an `unclear` result that the state
//! machine treats as a retry.

pub mod backend;
pub mod contract;
pub mod prompt;
pub mod sanitize;

pub use backend::{ExtractorBackend, HttpExtractor, HttpExtractorConfig};
pub use contract::{parse_inference, ExtractionRequest, HistoryEntry, Intent, TurnInference};
pub use prompt::PromptBuilder;
pub use sanitize::sanitize;

use thiserror::Error;

/// Extractor errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("request timed out")]
    Timeout,
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for frontdesk_core::Error {
    fn from(err: LlmError) -> Self {
        frontdesk_core::Error::Llm(err.to_string())
    }
}

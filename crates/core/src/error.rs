//! Error taxonomy
//!
//! Errors are grouped into four categories that drive recovery policy:
//! - Transient: retry locally, keep the call alive
//! - Protocol: coerce to a safe value, retry within the current state
//! - Policy: transition to fallback and wind the call down
//! - Fatal: cancel the session and persist the final record

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Recovery category for an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Recoverable within the turn (LLM timeout, TTS hiccup).
    Transient,
    /// Malformed data from a collaborator; coerced, never surfaced.
    Protocol,
    /// Conversation policy exhausted (retries, repeated silence).
    Policy,
    /// Session cannot continue (socket gone, recognizer dead).
    Fatal,
}

/// Top-level error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("ASR error: {0}")]
    Asr(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("media stream error: {0}")]
    Media(String),

    #[error("malformed collaborator output: {0}")]
    Protocol(String),

    #[error("retries exceeded in state {0}")]
    RetriesExceeded(String),

    #[error("invalid phone number: {0}")]
    InvalidPhoneNumber(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("booking error: {0}")]
    Booking(String),

    #[error("session canceled")]
    Canceled,

    #[error("timeout waiting for {0}")]
    Timeout(&'static str),

    #[error("channel closed")]
    ChannelClosed,
}

impl Error {
    /// The recovery category this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Llm(_) | Error::Tts(_) | Error::Timeout(_) | Error::Booking(_) => {
                ErrorCategory::Transient
            }
            Error::Protocol(_) | Error::InvalidPhoneNumber(_) => ErrorCategory::Protocol,
            Error::RetriesExceeded(_) => ErrorCategory::Policy,
            Error::Asr(_)
            | Error::Media(_)
            | Error::Config(_)
            | Error::Canceled
            | Error::ChannelClosed => ErrorCategory::Fatal,
        }
    }

    /// True when the error should end the session outright.
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Fatal
    }
}

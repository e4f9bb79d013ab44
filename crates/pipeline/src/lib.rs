//! Voice pipeline clients
//!
//! The streaming halves of the call path:
//! - Streaming speech recognition over a vendor WebSocket, with voice
//!   activity events and interim/final transcripts
//! - Streaming speech synthesis, re-framed to telephony mu-law and written
//!   to the media socket, cancellable mid-utterance
//! - Turn buffering that coalesces bursty final transcripts into one user
//!   turn
//!
//! Clients expose typed event channels; no callbacks, no shared mutable
//! state beyond the "agent speaking" flag the recognizer needs for
//! barge-in synthesis.

pub mod stt;
pub mod tts;
pub mod turn;

pub use stt::{AsrClient, AsrConfig, AsrEvent, AsrHandle};
pub use tts::{SpeakMetrics, TtsClient, TtsConfig};
pub use turn::{TurnBuffer, TurnBufferConfig};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("ASR error: {0}")]
    Asr(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error("cancelled")]
    Cancelled,

    #[error("timeout")]
    Timeout,
}

impl From<PipelineError> for frontdesk_core::Error {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Asr(msg) => frontdesk_core::Error::Asr(msg),
            PipelineError::Tts(msg) => frontdesk_core::Error::Tts(msg),
            PipelineError::ChannelClosed => frontdesk_core::Error::ChannelClosed,
            PipelineError::Cancelled => frontdesk_core::Error::Canceled,
            PipelineError::Timeout => frontdesk_core::Error::Timeout("pipeline"),
        }
    }
}

//! Media stream transport
//!
//! The telephony side of the system: the JSON wire format spoken over the
//! bidirectional media socket, the typed events the rest of the pipeline
//! consumes, and the pending-call store the webhook writes for streams
//! that arrive without custom parameters.
//!
//! The adapter never interprets audio. It frames, decodes base64, and
//! hands `AudioFrame`s onward.

pub mod call_store;
pub mod wire;

pub use call_store::{CallStore, PendingCall};
pub use wire::{InboundFrame, MediaEvent, OutboundMedia, StartMeta};

use thiserror::Error;

/// Transport errors. Malformed frames are terminal for the session.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("malformed media frame: {0}")]
    Malformed(String),
}

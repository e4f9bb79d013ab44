//! Media stream wire format
//!
//! Inbound and outbound JSON frames for the PBX media socket. The format
//! is camelCase on the wire; field names here follow it exactly.
//!
//! Inbound:
//! ```json
//! {"event":"start","start":{"streamSid":"MZ...","callSid":"CA...","customParameters":{"to":"+1...","from":"+1..."}}}
//! {"event":"media","media":{"payload":"<base64 mu-law 20ms>"}}
//! {"event":"stop"}
//! ```
//!
//! Outbound:
//! ```json
//! {"event":"media","streamSid":"MZ...","media":{"payload":"<base64 mu-law>"}}
//! ```

use base64::Engine;
use serde::{Deserialize, Serialize};

use frontdesk_core::{normalize_e164, AudioFrame};

use crate::call_store::CallStore;
use crate::TransportError;

/// Raw inbound frames, tagged by `event`.
#[derive(Debug, Deserialize)]
#[serde(tag = "event")]
#[serde(rename_all = "lowercase")]
pub enum InboundFrame {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        start: StartMeta,
    },
    Media {
        media: MediaPayload,
    },
    Mark {
        #[serde(default, rename = "streamSid")]
        stream_sid: Option<String>,
    },
    Stop {},
}

/// Metadata carried on the `start` frame.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMeta {
    pub stream_sid: String,
    pub call_sid: String,
    #[serde(default)]
    pub custom_parameters: CustomParameters,
}

#[derive(Debug, Default, Deserialize)]
pub struct CustomParameters {
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded mu-law audio.
    pub payload: String,
}

/// Decoded media events consumed by the session task.
#[derive(Debug)]
pub enum MediaEvent {
    StreamStart {
        stream_sid: String,
        call_sid: String,
        /// Dialed number, E.164.
        called_number: String,
        /// Caller number, E.164 when parseable, raw otherwise.
        caller_number: String,
    },
    MediaIn(AudioFrame),
    StreamStop,
}

impl InboundFrame {
    /// Parse one text frame off the socket.
    pub fn parse(text: &str) -> Result<Self, TransportError> {
        serde_json::from_str(text).map_err(|e| TransportError::Malformed(e.to_string()))
    }

    /// Decode into a typed media event.
    ///
    /// `start` frames missing `to`/`from` fall back to the pending-call
    /// store keyed by `callSid` (the webhook writes it); the entry is
    /// consumed on read. `connected` and `mark` frames decode to `None`.
    pub fn into_event(self, calls: &CallStore) -> Result<Option<MediaEvent>, TransportError> {
        match self {
            InboundFrame::Connected { .. } => Ok(None),
            InboundFrame::Mark { .. } => Ok(None),
            InboundFrame::Stop {} => Ok(Some(MediaEvent::StreamStop)),
            InboundFrame::Media { media } => {
                let mulaw = base64::engine::general_purpose::STANDARD
                    .decode(&media.payload)
                    .map_err(|e| TransportError::Malformed(format!("bad media payload: {e}")))?;
                Ok(Some(MediaEvent::MediaIn(AudioFrame::new(mulaw))))
            }
            InboundFrame::Start { start } => {
                let (to, from) = match (start.custom_parameters.to, start.custom_parameters.from) {
                    (Some(to), Some(from)) => (to, from),
                    (maybe_to, maybe_from) => {
                        // Parameters arrive late on some carriers; the
                        // webhook stashed them keyed by callSid.
                        let pending = calls.take(&start.call_sid);
                        match pending {
                            Some(p) => (maybe_to.unwrap_or(p.to), maybe_from.unwrap_or(p.from)),
                            None => {
                                tracing::warn!(
                                    call_sid = %start.call_sid,
                                    "start frame without to/from and no pending call entry"
                                );
                                (
                                    maybe_to.unwrap_or_default(),
                                    maybe_from.unwrap_or_default(),
                                )
                            }
                        }
                    }
                };

                let called_number = normalize_e164(&to).unwrap_or(to);
                let caller_number = normalize_e164(&from).unwrap_or(from);

                Ok(Some(MediaEvent::StreamStart {
                    stream_sid: start.stream_sid,
                    call_sid: start.call_sid,
                    called_number,
                    caller_number,
                }))
            }
        }
    }
}

/// One outbound audio frame, ready to serialize onto the socket.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMedia {
    pub stream_sid: String,
    /// Base64-encoded mu-law chunk.
    pub payload: String,
}

impl OutboundMedia {
    /// Build from raw mu-law bytes.
    pub fn from_mulaw(stream_sid: &str, mulaw: &[u8]) -> Self {
        Self {
            stream_sid: stream_sid.to_string(),
            payload: base64::engine::general_purpose::STANDARD.encode(mulaw),
        }
    }

    /// Wire representation.
    pub fn to_json(&self) -> String {
        serde_json::json!({
            "event": "media",
            "streamSid": self.stream_sid,
            "media": { "payload": self.payload }
        })
        .to_string()
    }
}

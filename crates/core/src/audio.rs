//! Telephony audio frame types
//!
//! All audio in the system is 8 kHz mono mu-law, carried in 20 ms frames
//! (160 bytes decoded). There is no transcoding: frames pass through from
//! the media socket to the recognizer, and from the synthesizer back to
//! the socket, untouched.

use chrono::{DateTime, Utc};

/// Telephony sample rate.
pub const MULAW_SAMPLE_RATE_HZ: u32 = 8000;

/// Frame duration on the wire.
pub const FRAME_MS: u32 = 20;

/// Bytes per 20 ms mu-law frame at 8 kHz mono.
pub const FRAME_BYTES: usize = 160;

/// A chunk of mu-law audio.
///
/// Frames arriving from the media socket are exactly [`FRAME_BYTES`] long;
/// synthesized audio may arrive in arbitrary chunks and is re-framed with
/// [`frames`] before being written back out.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw mu-law bytes.
    pub mulaw: Vec<u8>,
    /// When this frame entered the system.
    pub received_at: DateTime<Utc>,
}

impl AudioFrame {
    /// Create a frame from raw mu-law bytes.
    pub fn new(mulaw: Vec<u8>) -> Self {
        Self {
            mulaw,
            received_at: Utc::now(),
        }
    }

    /// Audio duration represented by this frame.
    pub fn duration_ms(&self) -> u64 {
        self.mulaw.len() as u64 * 1000 / MULAW_SAMPLE_RATE_HZ as u64
    }

    /// True for frames carrying no samples.
    pub fn is_empty(&self) -> bool {
        self.mulaw.is_empty()
    }
}

/// Re-chunk an arbitrary run of mu-law bytes into wire-sized frames.
///
/// The final frame may be shorter than [`FRAME_BYTES`]; empty input yields
/// no frames.
pub fn frames(mulaw: &[u8]) -> Vec<AudioFrame> {
    mulaw
        .chunks(FRAME_BYTES)
        .map(|c| AudioFrame::new(c.to_vec()))
        .collect()
}

//! Streaming speech synthesis client
//!
//! Synthesizes one utterance at a time as a byte stream, re-frames the
//! vendor's mu-law output into 20 ms wire frames, and hands them to the
//! media socket writer tagged with the active stream id.
//!
//! Synthesis is cancellable between chunks: barge-in cancels the utterance
//! token and unwritten frames are dropped on the floor. The shared
//! "agent speaking" flag is held for exactly the lifetime of an utterance,
//! including early exits — the recognizer reads it to synthesize barge-in
//! events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use frontdesk_core::{VoiceSettings, FRAME_BYTES};
use frontdesk_transport::OutboundMedia;

use crate::PipelineError;

/// Synthesis client settings.
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub endpoint: String,
    pub api_key: String,
    /// Voice used when the organization has none configured.
    pub default_voice: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.elevenlabs.io/v1".to_string(),
            api_key: String::new(),
            default_voice: "rachel".to_string(),
        }
    }
}

/// Timing and volume for one spoken utterance.
#[derive(Debug, Clone, Default)]
pub struct SpeakMetrics {
    /// Request start to first audio byte.
    pub generation_ms: u64,
    /// First byte to last frame written.
    pub streaming_ms: u64,
    pub bytes: u64,
    /// True when the utterance was cut short by barge-in.
    pub interrupted: bool,
}

#[derive(Debug, Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice_settings: Option<VoiceBody>,
}

#[derive(Debug, Serialize)]
struct VoiceBody {
    speed: f32,
    pitch: f32,
}

/// Streaming synthesis client. Cheap to clone; holds only the HTTP client
/// and config.
#[derive(Clone)]
pub struct TtsClient {
    client: reqwest::Client,
    config: TtsConfig,
    speaking: Arc<AtomicBool>,
}

/// Clears the speaking flag on every exit path out of `speak`.
struct SpeakingGuard<'a>(&'a AtomicBool);

impl Drop for SpeakingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

impl TtsClient {
    pub fn new(config: TtsConfig, speaking: Arc<AtomicBool>) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| PipelineError::Tts(e.to_string()))?;
        Ok(Self {
            client,
            config,
            speaking,
        })
    }

    /// Whether an utterance is currently streaming out.
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Relaxed)
    }

    /// Synthesize one utterance and stream it to the media socket.
    ///
    /// Returns after the last frame is queued, or early when `cancel`
    /// fires; cancelled synthesis drops all unwritten frames immediately.
    pub async fn speak(
        &self,
        text: &str,
        voice: &VoiceSettings,
        stream_sid: &str,
        out: &mpsc::Sender<OutboundMedia>,
        cancel: CancellationToken,
    ) -> Result<SpeakMetrics, PipelineError> {
        if text.trim().is_empty() {
            return Ok(SpeakMetrics::default());
        }

        let voice_id = if voice.voice_id.is_empty() || voice.voice_id == "default" {
            &self.config.default_voice
        } else {
            &voice.voice_id
        };

        let url = format!(
            "{}/text-to-speech/{}/stream?output_format=ulaw_8000",
            self.config.endpoint, voice_id
        );

        let body = SynthesisRequest {
            text,
            voice_settings: Some(VoiceBody {
                speed: voice.speed,
                pitch: voice.pitch,
            }),
        };

        let started = Instant::now();

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Tts(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(PipelineError::Tts(format!("{status}: {detail}")));
        }

        self.speaking.store(true, Ordering::Relaxed);
        let _guard = SpeakingGuard(&self.speaking);

        let mut metrics = SpeakMetrics::default();
        let mut first_byte: Option<Instant> = None;
        // Carry for partial frames across chunk boundaries.
        let mut pending: Vec<u8> = Vec::with_capacity(FRAME_BYTES);
        let mut stream = response.bytes_stream();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    metrics.interrupted = true;
                    break;
                }
                chunk = stream.next() => {
                    let Some(chunk) = chunk else { break };
                    let chunk = chunk.map_err(|e| PipelineError::Tts(e.to_string()))?;
                    if first_byte.is_none() {
                        first_byte = Some(Instant::now());
                        metrics.generation_ms = started.elapsed().as_millis() as u64;
                    }

                    pending.extend_from_slice(&chunk);
                    while pending.len() >= FRAME_BYTES {
                        let frame: Vec<u8> = pending.drain(..FRAME_BYTES).collect();
                        metrics.bytes += frame.len() as u64;
                        if out
                            .send(OutboundMedia::from_mulaw(stream_sid, &frame))
                            .await
                            .is_err()
                        {
                            return Err(PipelineError::ChannelClosed);
                        }
                    }
                }
            }
        }

        // Tail shorter than one frame still gets written.
        if !metrics.interrupted && !pending.is_empty() {
            metrics.bytes += pending.len() as u64;
            if out
                .send(OutboundMedia::from_mulaw(stream_sid, &pending))
                .await
                .is_err()
            {
                return Err(PipelineError::ChannelClosed);
            }
        }

        if let Some(first) = first_byte {
            metrics.streaming_ms = first.elapsed().as_millis() as u64;
        }

        metrics::histogram!("tts_generation_ms").record(metrics.generation_ms as f64);
        metrics::histogram!("tts_streaming_ms").record(metrics.streaming_ms as f64);

        tracing::debug!(
            bytes = metrics.bytes,
            generation_ms = metrics.generation_ms,
            interrupted = metrics.interrupted,
            "utterance synthesized"
        );

        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> TtsClient {
        TtsClient::new(TtsConfig::default(), Arc::new(AtomicBool::new(false))).unwrap()
    }

    #[tokio::test]
    async fn test_empty_text_is_a_noop() {
        let c = client();
        let (tx, mut rx) = mpsc::channel(4);
        let metrics = c
            .speak(
                "   ",
                &VoiceSettings::default(),
                "MZ1",
                &tx,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(metrics.bytes, 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_speaking_guard_clears_flag() {
        let flag = AtomicBool::new(true);
        {
            let _guard = SpeakingGuard(&flag);
        }
        assert!(!flag.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn test_voice_fallback_to_default() {
        let c = client();
        assert!(!c.is_speaking());
        // Default org voice id resolves to the configured default voice.
        let voice = VoiceSettings::default();
        assert_eq!(voice.voice_id, "default");
        assert_eq!(c.config.default_voice, "rachel");
    }
}

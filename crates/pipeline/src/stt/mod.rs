//! Streaming speech recognition client
//!
//! Opens a WebSocket to the recognition vendor, forwards telephony audio,
//! and emits typed events: interim/final transcripts, voice activity, and
//! synthesized barge-in when the caller speaks over the agent.
//!
//! Audio sent before the socket is up is queued in a small bounded buffer
//! and flushed on connect; overflow drops the oldest frame. If the vendor
//! closes the socket before the media stream has started, the client
//! reconnects once after a short delay; a mid-call close surfaces an error
//! instead — the dialogue layer decides how to wind the call down.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use frontdesk_core::{AudioFrame, FRAME_MS};

use crate::PipelineError;

/// Pre-ready audio buffer size: ~200 ms of 20 ms frames.
const AUDIO_QUEUE_FRAMES: usize = 200 / FRAME_MS as usize;

/// Delay before the single pre-stream reconnect attempt.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Recognizer connection parameters.
#[derive(Debug, Clone)]
pub struct AsrConfig {
    pub endpoint: String,
    pub api_key: String,
    /// Model selected for phone audio.
    pub model: String,
    pub language: String,
    pub interim_results: bool,
    pub vad_events: bool,
    pub punctuate: bool,
    pub smart_format: bool,
    pub filler_words: bool,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://api.deepgram.com/v1/listen".to_string(),
            api_key: String::new(),
            model: "nova-2-phonecall".to_string(),
            language: "en-US".to_string(),
            interim_results: true,
            vad_events: true,
            punctuate: true,
            smart_format: true,
            filler_words: false,
        }
    }
}

impl AsrConfig {
    /// Full connection URL with query parameters. Audio is always mu-law
    /// 8 kHz mono.
    pub fn url(&self) -> String {
        format!(
            "{}?model={}&language={}&encoding=mulaw&sample_rate=8000&channels=1\
             &interim_results={}&vad_events={}&punctuate={}&smart_format={}&filler_words={}",
            self.endpoint,
            self.model,
            self.language,
            self.interim_results,
            self.vad_events,
            self.punctuate,
            self.smart_format,
            self.filler_words,
        )
    }
}

/// Events emitted by the recognizer.
#[derive(Debug, Clone, PartialEq)]
pub enum AsrEvent {
    /// Socket is open; queued audio has been flushed.
    Ready,
    Interim {
        text: String,
    },
    Final {
        text: String,
        confidence: f32,
    },
    SpeechStarted,
    SpeechEnded,
    /// The vendor signaled end of utterance without any transcript.
    Silence,
    /// Speech started while the agent was speaking.
    BargeIn,
    Error(String),
    Closed,
}

/// Bounded pre-send audio queue with drop-oldest overflow.
struct AudioQueue {
    frames: Mutex<VecDeque<AudioFrame>>,
    notify: Notify,
    dropped: AtomicU64,
    capacity: usize,
}

impl AudioQueue {
    fn new(capacity: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            capacity,
        }
    }

    fn push(&self, frame: AudioFrame) {
        let mut frames = self.frames.lock();
        if frames.len() >= self.capacity {
            frames.pop_front();
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            metrics::counter!("asr_frames_dropped_total").increment(1);
            if dropped % 50 == 1 {
                tracing::warn!(dropped, "audio-in queue overflow, dropping oldest frame");
            }
        }
        frames.push_back(frame);
        drop(frames);
        self.notify.notify_one();
    }

    fn drain(&self) -> Vec<AudioFrame> {
        self.frames.lock().drain(..).collect()
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Handle to a running recognizer connection. Clones share the same
/// connection and queue.
#[derive(Clone)]
pub struct AsrHandle {
    queue: Arc<AudioQueue>,
    stop: CancellationToken,
}

impl AsrHandle {
    /// Handle with no connection behind it; queued audio goes nowhere.
    /// For tests and dry runs.
    pub fn detached() -> Self {
        Self {
            queue: Arc::new(AudioQueue::new(AUDIO_QUEUE_FRAMES)),
            stop: CancellationToken::new(),
        }
    }

    /// Queue one audio frame. Fire-and-forget, O(1); never blocks the
    /// media reader.
    pub fn send(&self, frame: AudioFrame) {
        self.queue.push(frame);
    }

    /// Flush and close the connection.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Frames dropped to queue overflow so far.
    pub fn dropped_frames(&self) -> u64 {
        self.queue.dropped()
    }
}

/// Streaming recognizer client.
pub struct AsrClient;

impl AsrClient {
    /// Start the recognizer connection.
    ///
    /// `agent_speaking` gates barge-in synthesis; `stream_started` gates
    /// the one-shot reconnect policy. Both are owned by the session and
    /// only read here.
    pub fn start(
        config: AsrConfig,
        agent_speaking: Arc<AtomicBool>,
        stream_started: Arc<AtomicBool>,
    ) -> (AsrHandle, mpsc::Receiver<AsrEvent>) {
        let (events_tx, events_rx) = mpsc::channel(64);
        let queue = Arc::new(AudioQueue::new(AUDIO_QUEUE_FRAMES));
        let stop = CancellationToken::new();

        let handle = AsrHandle {
            queue: queue.clone(),
            stop: stop.clone(),
        };

        tokio::spawn(drive(
            config,
            queue,
            events_tx,
            stop,
            agent_speaking,
            stream_started,
        ));

        (handle, events_rx)
    }
}

/// Why a connection ended.
enum ConnectionEnd {
    Stopped,
    Remote(String),
}

async fn drive(
    config: AsrConfig,
    queue: Arc<AudioQueue>,
    events: mpsc::Sender<AsrEvent>,
    stop: CancellationToken,
    agent_speaking: Arc<AtomicBool>,
    stream_started: Arc<AtomicBool>,
) {
    let mut reconnected = false;

    loop {
        let end = match connect(&config).await {
            Ok(ws) => {
                let _ = events.send(AsrEvent::Ready).await;
                run_connection(ws, &queue, &events, &stop, &agent_speaking).await
            }
            Err(e) => ConnectionEnd::Remote(e.to_string()),
        };

        match end {
            ConnectionEnd::Stopped => {
                let _ = events.send(AsrEvent::Closed).await;
                return;
            }
            ConnectionEnd::Remote(reason) => {
                if !reconnected && !stream_started.load(Ordering::Relaxed) {
                    // The call hasn't produced media yet; one quiet retry.
                    reconnected = true;
                    tracing::warn!(%reason, "recognizer socket lost before stream start, reconnecting");
                    tokio::select! {
                        _ = tokio::time::sleep(RECONNECT_DELAY) => continue,
                        _ = stop.cancelled() => {
                            let _ = events.send(AsrEvent::Closed).await;
                            return;
                        }
                    }
                }
                tracing::error!(%reason, "recognizer socket lost mid-call");
                let _ = events.send(AsrEvent::Error(reason)).await;
                let _ = events.send(AsrEvent::Closed).await;
                return;
            }
        }
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(config: &AsrConfig) -> Result<WsStream, PipelineError> {
    let mut request = config
        .url()
        .into_client_request()
        .map_err(|e| PipelineError::Asr(e.to_string()))?;

    if !config.api_key.is_empty() {
        let auth = format!("Token {}", config.api_key);
        request.headers_mut().insert(
            "Authorization",
            auth.parse()
                .map_err(|_| PipelineError::Asr("invalid api key header".to_string()))?,
        );
    }

    let (ws, _) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| PipelineError::Asr(e.to_string()))?;
    Ok(ws)
}

async fn run_connection(
    ws: WsStream,
    queue: &AudioQueue,
    events: &mpsc::Sender<AsrEvent>,
    stop: &CancellationToken,
    agent_speaking: &AtomicBool,
) -> ConnectionEnd {
    let (mut sink, mut stream) = ws.split();

    // Flush whatever queued while connecting.
    for frame in queue.drain() {
        if let Err(e) = sink.send(Message::Binary(frame.mulaw)).await {
            return ConnectionEnd::Remote(e.to_string());
        }
    }

    // Transcript seen since the last speech-start; drives Silence synthesis.
    let mut saw_transcript = false;

    loop {
        tokio::select! {
            _ = queue.notify.notified() => {
                for frame in queue.drain() {
                    if let Err(e) = sink.send(Message::Binary(frame.mulaw)).await {
                        return ConnectionEnd::Remote(e.to_string());
                    }
                }
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let speaking = agent_speaking.load(Ordering::Relaxed);
                        for event in map_vendor_message(&text, speaking, &mut saw_transcript) {
                            if events.send(event).await.is_err() {
                                return ConnectionEnd::Stopped;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return ConnectionEnd::Remote("vendor closed".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return ConnectionEnd::Remote(e.to_string()),
                }
            }
            _ = stop.cancelled() => {
                // Ask the vendor to flush, then close.
                let _ = sink.send(Message::Text(r#"{"type":"CloseStream"}"#.to_string())).await;
                let _ = sink.send(Message::Close(None)).await;
                return ConnectionEnd::Stopped;
            }
        }
    }
}

/// Vendor result message (subset we consume).
#[derive(Debug, Deserialize)]
struct VendorMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    channel: Option<VendorChannel>,
}

#[derive(Debug, Deserialize)]
struct VendorChannel {
    alternatives: Vec<VendorAlternative>,
}

#[derive(Debug, Deserialize)]
struct VendorAlternative {
    transcript: String,
    #[serde(default)]
    confidence: f32,
}

/// Map one vendor text frame into recognizer events.
///
/// `saw_transcript` tracks whether any transcript arrived since the last
/// speech start; an utterance end without one is reported as silence.
fn map_vendor_message(text: &str, agent_speaking: bool, saw_transcript: &mut bool) -> Vec<AsrEvent> {
    let msg: VendorMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(error = %e, "unparseable vendor message, ignoring");
            return Vec::new();
        }
    };

    match msg.kind.as_str() {
        "Results" => {
            let Some(alt) = msg.channel.and_then(|c| c.alternatives.into_iter().next()) else {
                return Vec::new();
            };
            let transcript = alt.transcript.trim().to_string();
            if transcript.is_empty() {
                return Vec::new();
            }
            *saw_transcript = true;
            if msg.is_final {
                vec![AsrEvent::Final {
                    text: transcript,
                    confidence: alt.confidence.clamp(0.0, 1.0),
                }]
            } else {
                vec![AsrEvent::Interim { text: transcript }]
            }
        }
        "SpeechStarted" => {
            *saw_transcript = false;
            if agent_speaking {
                // Caller is talking over the agent.
                vec![AsrEvent::SpeechStarted, AsrEvent::BargeIn]
            } else {
                vec![AsrEvent::SpeechStarted]
            }
        }
        "UtteranceEnd" => {
            if *saw_transcript {
                vec![AsrEvent::SpeechEnded]
            } else {
                vec![AsrEvent::SpeechEnded, AsrEvent::Silence]
            }
        }
        _ => Vec::new(),
    }
}

//! Channel-backed event sink
//!
//! Turn records and call updates go through a bounded channel to a writer
//! task that appends JSONL and logs. The voice path never blocks on the
//! sink: a full channel drops the event and bumps a counter.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use frontdesk_core::{CallUpdate, EventSink, TurnRecord};

/// Default channel depth.
const QUEUE_DEPTH: usize = 256;

#[derive(Debug)]
enum SinkMessage {
    Turn(Box<TurnRecord>),
    Call(Box<CallUpdate>),
}

/// Best-effort sink writing JSONL to a file.
pub struct ChannelEventSink {
    tx: mpsc::Sender<SinkMessage>,
}

impl ChannelEventSink {
    /// Start the writer task. Records append to `path`; the task stops
    /// when the token is cancelled or all senders are gone, flushing what
    /// it has.
    pub fn start(
        path: PathBuf,
        shutdown: CancellationToken,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let handle = tokio::spawn(write_loop(path, rx, shutdown));
        (Self { tx }, handle)
    }

    fn push(&self, message: SinkMessage) {
        if self.tx.try_send(message).is_err() {
            metrics::counter!("event_sink_dropped_total").increment(1);
            tracing::warn!("event sink queue full, dropping record");
        }
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn append(&self, record: TurnRecord) {
        self.push(SinkMessage::Turn(Box::new(record)));
    }

    async fn update_call(&self, update: CallUpdate) {
        self.push(SinkMessage::Call(Box::new(update)));
    }
}

async fn write_loop(
    path: PathBuf,
    mut rx: mpsc::Receiver<SinkMessage>,
    shutdown: CancellationToken,
) {
    let mut file = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
    {
        Ok(file) => Some(file),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e,
                "event sink file unavailable, records log-only");
            None
        }
    };

    loop {
        let message = tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
            _ = shutdown.cancelled() => break,
        };

        let line = match &message {
            SinkMessage::Turn(record) => {
                tracing::info!(
                    session_id = %record.session_id,
                    turn = record.turn_index,
                    intent = %record.intent,
                    state = %record.state_after,
                    total_ms = record.total_ms,
                    "turn"
                );
                serde_json::to_string(record)
            }
            SinkMessage::Call(update) => {
                tracing::info!(
                    session_id = %update.session_id,
                    status = update.status.as_str(),
                    turns = update.turn_index,
                    "call ended"
                );
                serde_json::to_string(update)
            }
        };

        if let (Some(file), Ok(line)) = (file.as_mut(), line) {
            if let Err(e) = file.write_all(format!("{line}\n").as_bytes()).await {
                tracing::warn!(error = %e, "event sink write failed");
            }
        }
    }

    // Drain whatever is still queued before exiting.
    while let Ok(message) = rx.try_recv() {
        if let Some(file) = file.as_mut() {
            let line = match &message {
                SinkMessage::Turn(record) => serde_json::to_string(record),
                SinkMessage::Call(update) => serde_json::to_string(update),
            };
            if let Ok(line) = line {
                let _ = file.write_all(format!("{line}\n").as_bytes()).await;
            }
        }
    }
    if let Some(mut file) = file {
        let _ = file.flush().await;
    }
}

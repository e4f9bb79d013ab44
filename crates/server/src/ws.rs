//! Media stream handling
//!
//! One WebSocket per call. The socket loop here does exactly two things:
//! pump decoded caller audio straight into the recognizer (never through
//! the session task), and write synthesized frames back out. Control
//! frames (start/stop) go to the session task, which owns everything
//! stateful.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use tokio::sync::mpsc;

use frontdesk_agent::{SessionDeps, SessionRuntime, TurnOrchestrator};
use frontdesk_pipeline::{AsrClient, AsrConfig, TtsClient, TtsConfig};
use frontdesk_transport::{InboundFrame, MediaEvent};

use crate::state::AppState;

/// Outbound frame queue depth. Kept short on purpose: synthesis
/// backpressures against it, so a barge-in only ever leaves this much
/// audio (~160 ms) already committed to the socket.
const OUT_QUEUE_DEPTH: usize = 8;

/// Control event queue depth.
const CONTROL_QUEUE_DEPTH: usize = 16;

/// How long the session task gets to release resources after the socket
/// closes before the cancellation token fires.
const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_millis(500);

/// Run one call's media stream to completion.
pub async fn handle_media_stream(mut socket: WebSocket, state: AppState) {
    metrics::counter!("calls_total").increment(1);

    let speaking = Arc::new(AtomicBool::new(false));
    let stream_started = Arc::new(AtomicBool::new(false));

    let asr_config = AsrConfig {
        endpoint: state.settings.asr.endpoint.clone(),
        api_key: state.settings.asr.api_key.clone(),
        model: state.settings.asr.model.clone(),
        language: state.settings.asr.language.clone(),
        ..Default::default()
    };
    let (asr, asr_rx) = AsrClient::start(asr_config, speaking.clone(), stream_started.clone());

    let tts_config = TtsConfig {
        endpoint: state.settings.tts.endpoint.clone(),
        api_key: state.settings.tts.api_key.clone(),
        default_voice: state.settings.tts.default_voice.clone(),
    };
    let tts = match TtsClient::new(tts_config, speaking) {
        Ok(tts) => tts,
        Err(e) => {
            tracing::error!(error = %e, "synthesis client unavailable, refusing call");
            asr.stop();
            return;
        }
    };

    let (out_tx, mut out_rx) = mpsc::channel(OUT_QUEUE_DEPTH);
    let (media_tx, media_rx) = mpsc::channel(CONTROL_QUEUE_DEPTH);

    let cancel = state.shutdown.child_token();
    let orchestrator = TurnOrchestrator::new(
        state.extractor.clone(),
        tts,
        state.events.clone(),
        state.appointments.clone(),
        out_tx,
    );
    let deps = SessionDeps {
        org_provider: state.org_provider.clone(),
        events: state.events.clone(),
        orchestrator,
        timers: state.settings.timers.clone(),
        cancel: cancel.clone(),
    };
    let runtime = SessionRuntime::new(deps, media_rx, asr.clone(), asr_rx, stream_started);
    let session_id = runtime.session_id().to_string();
    let session_task = tokio::spawn(runtime.run());

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(%session_id, "media socket closed");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::warn!(%session_id, error = %e, "media socket error");
                        break;
                    }
                };

                let frame = match InboundFrame::parse(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        // Adapter errors are terminal for the session.
                        tracing::warn!(%session_id, error = %e, "malformed media frame");
                        break;
                    }
                };

                match frame.into_event(&state.calls) {
                    // Audio goes straight to the recognizer; the session
                    // task must never sit between the socket and ASR.
                    Ok(Some(MediaEvent::MediaIn(audio))) => asr.send(audio),
                    Ok(Some(control)) => {
                        let stop = matches!(control, MediaEvent::StreamStop);
                        if media_tx.send(control).await.is_err() || stop {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(%session_id, error = %e, "undecodable media frame");
                        break;
                    }
                }
            }

            out = out_rx.recv() => {
                match out {
                    Some(media) => {
                        if socket.send(Message::Text(media.to_json())).await.is_err() {
                            tracing::debug!(%session_id, "outbound media write failed");
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    // Let the session observe the stream ending and wind itself down; the
    // hard cancel only fires if it doesn't release in time.
    drop(media_tx);
    let mut session_task = session_task;
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut session_task).await {
        Ok(Err(e)) => tracing::error!(%session_id, error = %e, "session task panicked"),
        Ok(Ok(())) => {}
        Err(_) => {
            cancel.cancel();
            if let Err(e) = session_task.await {
                tracing::error!(%session_id, error = %e, "session task panicked");
            }
        }
    }

    // Flush whatever synthesized audio was already queued.
    while let Ok(media) = out_rx.try_recv() {
        if socket.send(Message::Text(media.to_json())).await.is_err() {
            break;
        }
    }
}

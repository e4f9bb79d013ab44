//! Session runtime
//!
//! One task per call owns every piece of mutable session state: the
//! session record, the turn buffer, and all four conversation timers live
//! here, in a single select loop. Timer cancellation is trivially correct
//! because nothing else can arm or clear them.
//!
//! While a turn is being processed the loop keeps draining recognizer
//! events: barge-in cancels the in-flight synthesis token immediately,
//! everything else queues and is replayed in order once the turn
//! completes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use frontdesk_config::TimerSettings;
use frontdesk_core::{CallStatus, CallUpdate, EventSink, OrgContextProvider};
use frontdesk_pipeline::{AsrEvent, AsrHandle, TurnBuffer, TurnBufferConfig};
use frontdesk_transport::MediaEvent;

use crate::fsm::{scripts, SilenceOutcome};
use crate::nudges;
use crate::orchestrator::{TurnOrchestrator, TurnOutcome};
use crate::session::{BargeGate, Session};
use crate::AgentError;

/// Everything a session needs injected at construction.
pub struct SessionDeps {
    pub org_provider: Arc<dyn OrgContextProvider>,
    pub events: Arc<dyn EventSink>,
    pub orchestrator: TurnOrchestrator,
    pub timers: TimerSettings,
    /// Session-scoped token; cancelling it releases every child task.
    pub cancel: CancellationToken,
}

/// The per-call session task.
pub struct SessionRuntime {
    session: Session,
    buffer: TurnBuffer,
    barge: BargeGate,
    deps: SessionDeps,
    media_rx: mpsc::Receiver<MediaEvent>,
    asr_rx: mpsc::Receiver<AsrEvent>,
    asr: AsrHandle,
    /// Shared with the recognizer's reconnect policy.
    stream_started: Arc<AtomicBool>,
    /// Recognizer events that arrived mid-turn, replayed in order after.
    pending: VecDeque<AsrEvent>,

    silence_deadline: Option<Instant>,
    conversation_deadline: Option<Instant>,
    greeting_deadline: Option<Instant>,
    close_deadline: Option<Instant>,
    last_final_at: Option<Instant>,

    status: CallStatus,
    error: Option<String>,
}

impl SessionRuntime {
    pub fn new(
        deps: SessionDeps,
        media_rx: mpsc::Receiver<MediaEvent>,
        asr: AsrHandle,
        asr_rx: mpsc::Receiver<AsrEvent>,
        stream_started: Arc<AtomicBool>,
    ) -> Self {
        let buffer = TurnBuffer::new(TurnBufferConfig {
            quiescence: Duration::from_millis(deps.timers.turn_buffer_ms),
            continuation_window: Duration::from_millis(deps.timers.continuation_window_ms),
        });

        Self {
            session: Session::new(),
            buffer,
            barge: BargeGate::new(),
            deps,
            media_rx,
            asr_rx,
            asr,
            stream_started,
            pending: VecDeque::new(),
            silence_deadline: None,
            conversation_deadline: None,
            greeting_deadline: None,
            close_deadline: None,
            last_final_at: None,
            status: CallStatus::InProgress,
            error: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }

    /// Run the session to completion. Consumes the runtime; on return all
    /// child tasks have been told to stop and the final call record has
    /// been emitted.
    pub async fn run(mut self) {
        tracing::info!(session_id = %self.session.session_id, "session started");

        loop {
            if self.session.ready_to_greet() && self.speak_greeting().await {
                break;
            }

            tokio::select! {
                _ = self.deps.cancel.cancelled() => {
                    self.status = CallStatus::Failed;
                    self.error = Some("session cancelled".to_string());
                    break;
                }

                ev = self.media_rx.recv() => {
                    match ev {
                        Some(MediaEvent::StreamStart { stream_sid, call_sid, called_number, caller_number }) => {
                            self.on_stream_start(stream_sid, call_sid, called_number, caller_number).await;
                        }
                        Some(MediaEvent::MediaIn(frame)) => {
                            // Normally pumped straight to the recognizer by
                            // the socket reader; forward strays.
                            self.asr.send(frame);
                        }
                        Some(MediaEvent::StreamStop) | None => {
                            tracing::info!(session_id = %self.session.session_id, "media stream ended");
                            break;
                        }
                    }
                }

                ev = self.asr_rx.recv() => {
                    match ev {
                        Some(ev) => {
                            if self.on_asr_event(ev) {
                                break;
                            }
                        }
                        None => break,
                    }
                }

                _ = sleep_opt(self.buffer.deadline()) => {
                    if self.flush_turn().await {
                        break;
                    }
                }

                _ = sleep_opt(self.silence_deadline) => {
                    if self.on_silence_timeout().await {
                        break;
                    }
                }

                _ = sleep_opt(self.conversation_deadline) => {
                    self.on_conversation_timeout().await;
                    break;
                }

                _ = sleep_opt(self.greeting_deadline) => {
                    self.greeting_deadline = None;
                    if !self.session.flags.greeting_sent {
                        tracing::warn!(session_id = %self.session.session_id,
                            "greeting deadline hit before recognizer ready, greeting with defaults");
                        self.speak_greeting().await;
                    }
                }

                _ = sleep_opt(self.close_deadline) => {
                    // Audio drain grace elapsed.
                    break;
                }
            }
        }

        self.shutdown().await;
    }

    async fn on_stream_start(
        &mut self,
        stream_sid: String,
        call_sid: String,
        called_number: String,
        caller_number: String,
    ) {
        tracing::info!(
            session_id = %self.session.session_id,
            %stream_sid,
            %call_sid,
            called = %called_number,
            "stream started"
        );

        match self.deps.org_provider.resolve(&called_number).await {
            Ok(org) => self.session.org = org,
            Err(e) => {
                tracing::warn!(error = %e, "org resolution failed, using default context");
                self.session.org =
                    frontdesk_core::OrganizationContext::default_for(&called_number);
            }
        }

        self.session.stream_sid = Some(stream_sid);
        self.session.call_sid = Some(call_sid);
        self.session.called_number = Some(called_number);
        self.session.caller_number = Some(caller_number);
        self.session.flags.stream_started = true;
        self.stream_started.store(true, Ordering::Relaxed);

        let now = Instant::now();
        self.greeting_deadline =
            Some(now + Duration::from_millis(self.deps.timers.fallback_greeting_ms));
        self.silence_deadline = Some(now + Duration::from_millis(self.deps.timers.silence_ms));
        self.conversation_deadline =
            Some(now + Duration::from_millis(self.deps.timers.conversation_ms));
    }

    /// Handle one recognizer event. Returns true when the session must
    /// end.
    fn on_asr_event(&mut self, ev: AsrEvent) -> bool {
        let now = Instant::now();
        match ev {
            AsrEvent::Ready => {
                self.session.flags.stt_ready = true;
            }
            AsrEvent::Interim { .. } => {
                self.reset_activity_timers(now);
            }
            AsrEvent::Final { text, .. } => {
                self.buffer.push_final(&text, now);
                self.last_final_at = Some(now);
                self.reset_activity_timers(now);
            }
            AsrEvent::SpeechStarted => {
                // Speech activity holds the conversation open; the silence
                // timer only resets on transcripts.
                self.conversation_deadline =
                    Some(now + Duration::from_millis(self.deps.timers.conversation_ms));
            }
            AsrEvent::SpeechEnded => {}
            AsrEvent::Silence => {
                tracing::debug!(session_id = %self.session.session_id, "recognizer reported empty utterance");
            }
            AsrEvent::BargeIn => {
                // Nothing is being spoken on this path; still discard any
                // half-buffered turn so the new utterance starts clean.
                self.buffer.discard();
                self.barge
                    .fire(now, Duration::from_millis(self.deps.timers.barge_in_debounce_ms));
            }
            AsrEvent::Error(e) => {
                tracing::error!(session_id = %self.session.session_id, error = %e, "recognizer failed");
                self.status = CallStatus::Failed;
                self.error = Some(format!("asr: {e}"));
                return true;
            }
            AsrEvent::Closed => {
                if self.status == CallStatus::InProgress && self.error.is_none() {
                    tracing::debug!(session_id = %self.session.session_id, "recognizer closed");
                }
            }
        }
        false
    }

    fn reset_activity_timers(&mut self, now: Instant) {
        self.silence_deadline = Some(now + Duration::from_millis(self.deps.timers.silence_ms));
        self.conversation_deadline =
            Some(now + Duration::from_millis(self.deps.timers.conversation_ms));
    }

    /// Flush the buffered turn through the orchestrator. Returns true when
    /// the session must end.
    async fn flush_turn(&mut self) -> bool {
        if self.session.flags.processing_turn {
            return false;
        }
        let Some(text) = self.buffer.take() else {
            return false;
        };

        let asr_ms = self
            .last_final_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        let outcome = run_turn_with_barge(
            &self.deps.orchestrator,
            &mut self.session,
            &mut self.asr_rx,
            &mut self.pending,
            &mut self.barge,
            &mut self.buffer,
            &self.deps.cancel,
            Duration::from_millis(self.deps.timers.barge_in_debounce_ms),
            text,
            asr_ms,
        )
        .await;

        // Replay recognizer events that arrived mid-turn, in order.
        while let Some(ev) = self.pending.pop_front() {
            if self.on_asr_event(ev) {
                return true;
            }
        }

        self.after_turn(outcome)
    }

    fn after_turn(&mut self, outcome: TurnOutcome) -> bool {
        if let Some(ref e) = outcome.error {
            self.error = Some(e.clone());
        }
        if outcome.fatal {
            self.status = CallStatus::Failed;
            return true;
        }

        self.reset_activity_timers(Instant::now());

        if outcome.terminal {
            self.status = match outcome.state {
                crate::fsm::BookingState::Success => CallStatus::Completed,
                crate::fsm::BookingState::CallbackScheduled => CallStatus::CallbackScheduled,
                _ => CallStatus::Fallback,
            };
            self.schedule_close();
        }
        false
    }

    /// Silence timer fired: nudge or fall back. Fallback closes through
    /// the grace timer; returns true only when a replayed recognizer
    /// event ends the session outright.
    async fn on_silence_timeout(&mut self) -> bool {
        if !self.session.flags.greeting_sent {
            // Quiet before the greeting isn't the caller stalling.
            self.silence_deadline =
                Some(Instant::now() + Duration::from_millis(self.deps.timers.silence_ms));
            return false;
        }

        match self.session.machine.note_silence(&self.session.org) {
            SilenceOutcome::Nudge(count) => {
                let nudge = nudges::nudge_for(&self.session.slots, count);
                tracing::debug!(session_id = %self.session.session_id, count, "silence nudge");
                let end = self.speak_script(nudge.to_string()).await;
                self.silence_deadline =
                    Some(Instant::now() + Duration::from_millis(self.deps.timers.silence_ms));
                end
            }
            SilenceOutcome::Fallback(script) => {
                tracing::info!(session_id = %self.session.session_id, "silence budget exhausted");
                let end = self.speak_script(script).await;
                self.status = CallStatus::Fallback;
                self.schedule_close();
                self.silence_deadline = None;
                end
            }
        }
    }

    async fn on_conversation_timeout(&mut self) {
        tracing::info!(session_id = %self.session.session_id, "conversation timed out");
        let farewell = scripts::farewell(&self.session.org);
        let _ = self.speak_script(farewell).await;
        if self.status == CallStatus::InProgress {
            self.status = CallStatus::Completed;
        }
    }

    /// Speak the greeting exactly once. Returns true when the session
    /// must end.
    async fn speak_greeting(&mut self) -> bool {
        // Gated before the speak so a barge-in mid-greeting cannot replay
        // it.
        self.session.flags.greeting_sent = true;
        self.greeting_deadline = None;
        let greeting = self.session.org.greeting.clone();
        let end = self.speak_script(greeting).await;
        self.reset_activity_timers(Instant::now());
        end
    }

    /// Speak a script while keeping barge-in live. Recognizer events that
    /// arrived mid-playback are replayed afterwards; returns true when one
    /// of them ends the session.
    async fn speak_script(&mut self, text: String) -> bool {
        let result = speak_with_barge(
            &self.deps.orchestrator,
            &self.session,
            &mut self.asr_rx,
            &mut self.pending,
            &mut self.barge,
            &mut self.buffer,
            &self.deps.cancel,
            Duration::from_millis(self.deps.timers.barge_in_debounce_ms),
            &text,
        )
        .await;

        if let Err(e) = result {
            tracing::warn!(session_id = %self.session.session_id, error = %e, "script playback failed");
            if matches!(e, AgentError::Media(_)) {
                self.status = CallStatus::Failed;
                self.error = Some(e.to_string());
                self.schedule_close();
            }
        }

        while let Some(ev) = self.pending.pop_front() {
            if self.on_asr_event(ev) {
                return true;
            }
        }
        false
    }

    fn schedule_close(&mut self) {
        self.close_deadline =
            Some(Instant::now() + Duration::from_millis(self.deps.timers.close_grace_ms));
    }

    async fn shutdown(mut self) {
        self.buffer.discard();
        self.asr.stop();
        self.deps.cancel.cancel();

        let dropped = self.asr.dropped_frames();
        if dropped > 0 {
            tracing::warn!(session_id = %self.session.session_id, dropped,
                "audio frames dropped to backpressure this call");
        }

        let status = if self.error.is_some() && self.status == CallStatus::InProgress {
            CallStatus::Failed
        } else if self.status == CallStatus::InProgress {
            CallStatus::Completed
        } else {
            self.status
        };

        self.deps
            .events
            .update_call(CallUpdate {
                session_id: self.session.session_id.clone(),
                status,
                ended_at: chrono::Utc::now(),
                final_slots: self.session.slots.snapshot(),
                turn_index: self.session.turn_index,
                error: self.error.clone(),
            })
            .await;

        let duration_ms = (chrono::Utc::now() - self.session.started_at).num_milliseconds();
        tracing::info!(
            session_id = %self.session.session_id,
            status = status.as_str(),
            turns = self.session.turn_index,
            duration_ms,
            "session ended"
        );
    }
}

/// Sleep until an optional deadline; `None` never wakes.
async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Run one turn while watching the recognizer channel: barge-in cancels
/// the in-flight synthesis, everything else queues for replay.
#[allow(clippy::too_many_arguments)]
async fn run_turn_with_barge(
    orchestrator: &TurnOrchestrator,
    session: &mut Session,
    asr_rx: &mut mpsc::Receiver<AsrEvent>,
    pending: &mut VecDeque<AsrEvent>,
    barge: &mut BargeGate,
    buffer: &mut TurnBuffer,
    session_cancel: &CancellationToken,
    debounce: Duration,
    text: String,
    asr_ms: u64,
) -> TurnOutcome {
    let speak_cancel = session_cancel.child_token();
    let turn = orchestrator.run_turn(session, text, speak_cancel.clone(), asr_ms);
    tokio::pin!(turn);

    loop {
        tokio::select! {
            outcome = &mut turn => return outcome,
            ev = asr_rx.recv() => {
                match ev {
                    Some(AsrEvent::BargeIn) => {
                        buffer.discard();
                        if barge.fire(Instant::now(), debounce) {
                            tracing::debug!("barge-in, cancelling synthesis");
                            speak_cancel.cancel();
                        }
                    }
                    Some(other) => pending.push_back(other),
                    None => {
                        // Recognizer channel gone; let the turn finish and
                        // the main loop observe the closure.
                        pending.push_back(AsrEvent::Closed);
                        return turn.await;
                    }
                }
            }
        }
    }
}

/// Speak one script with the same barge-in handling as a turn.
#[allow(clippy::too_many_arguments)]
async fn speak_with_barge(
    orchestrator: &TurnOrchestrator,
    session: &Session,
    asr_rx: &mut mpsc::Receiver<AsrEvent>,
    pending: &mut VecDeque<AsrEvent>,
    barge: &mut BargeGate,
    buffer: &mut TurnBuffer,
    session_cancel: &CancellationToken,
    debounce: Duration,
    text: &str,
) -> Result<(), AgentError> {
    let speak_cancel = session_cancel.child_token();
    let speak = orchestrator.speak_script(session, text, speak_cancel.clone());
    tokio::pin!(speak);

    loop {
        tokio::select! {
            result = &mut speak => return result,
            ev = asr_rx.recv() => {
                match ev {
                    Some(AsrEvent::BargeIn) => {
                        buffer.discard();
                        if barge.fire(Instant::now(), debounce) {
                            speak_cancel.cancel();
                        }
                    }
                    Some(other) => pending.push_back(other),
                    None => {
                        pending.push_back(AsrEvent::Closed);
                        return speak.await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use frontdesk_core::{
        BookingConfirmation, BookingError, BookingRequest, CallbackRequest, OrganizationContext,
        TurnRecord,
    };
    use frontdesk_llm::{ExtractionRequest, ExtractorBackend, LlmError, TurnInference};
    use frontdesk_pipeline::{TtsClient, TtsConfig};
    use parking_lot::Mutex;

    struct StubProvider;

    #[async_trait]
    impl OrgContextProvider for StubProvider {
        async fn resolve(&self, dialed: &str) -> frontdesk_core::Result<OrganizationContext> {
            Ok(OrganizationContext::default_for(dialed))
        }
    }

    struct StubExtractor;

    #[async_trait]
    impl ExtractorBackend for StubExtractor {
        async fn infer(&self, _request: &ExtractionRequest) -> Result<TurnInference, LlmError> {
            Ok(TurnInference::unclear())
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    struct StubAppointments;

    #[async_trait]
    impl frontdesk_core::AppointmentSink for StubAppointments {
        async fn book(
            &self,
            _request: BookingRequest,
        ) -> Result<BookingConfirmation, BookingError> {
            Err(BookingError::IntegrationUnavailable("stub".to_string()))
        }

        async fn record_callback(&self, _request: CallbackRequest) -> Result<(), BookingError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CapturingSink {
        updates: Mutex<Vec<CallUpdate>>,
    }

    #[async_trait]
    impl EventSink for CapturingSink {
        async fn append(&self, _record: TurnRecord) {}

        async fn update_call(&self, update: CallUpdate) {
            self.updates.lock().push(update);
        }
    }

    struct Harness {
        runtime: SessionRuntime,
        media_tx: mpsc::Sender<MediaEvent>,
        asr_tx: mpsc::Sender<AsrEvent>,
        sink: Arc<CapturingSink>,
        cancel: CancellationToken,
    }

    fn harness() -> Harness {
        let (media_tx, media_rx) = mpsc::channel(8);
        let (asr_tx, asr_rx) = mpsc::channel(8);
        let sink = Arc::new(CapturingSink::default());
        let cancel = CancellationToken::new();

        let tts = TtsClient::new(
            TtsConfig {
                endpoint: "http://127.0.0.1:1".to_string(),
                ..Default::default()
            },
            Arc::new(AtomicBool::new(false)),
        )
        .unwrap();
        let (out_tx, _out_rx) = mpsc::channel(8);
        let orchestrator = TurnOrchestrator::new(
            Arc::new(StubExtractor),
            tts,
            sink.clone(),
            Arc::new(StubAppointments),
            out_tx,
        );

        let deps = SessionDeps {
            org_provider: Arc::new(StubProvider),
            events: sink.clone(),
            orchestrator,
            timers: TimerSettings::default(),
            cancel: cancel.clone(),
        };
        let runtime = SessionRuntime::new(
            deps,
            media_rx,
            frontdesk_pipeline::AsrHandle::detached(),
            asr_rx,
            Arc::new(AtomicBool::new(false)),
        );

        Harness {
            runtime,
            media_tx,
            asr_tx,
            sink,
            cancel,
        }
    }

    #[tokio::test]
    async fn test_media_close_ends_session_with_final_record() {
        let h = harness();
        drop(h.media_tx);
        drop(h.asr_tx);

        h.runtime.run().await;

        let updates = h.sink.updates.lock();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status, CallStatus::Completed);
        assert_eq!(updates[0].turn_index, 0);
    }

    #[tokio::test]
    async fn test_cancellation_marks_call_failed() {
        let h = harness();
        let task = tokio::spawn(h.runtime.run());

        h.media_tx
            .send(MediaEvent::StreamStart {
                stream_sid: "MZ1".into(),
                call_sid: "CA1".into(),
                called_number: "+15551234567".into(),
                caller_number: "+15550001111".into(),
            })
            .await
            .unwrap();
        tokio::task::yield_now().await;
        h.cancel.cancel();
        task.await.unwrap();

        let updates = h.sink.updates.lock();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status, CallStatus::Failed);
    }

    #[tokio::test]
    async fn test_stream_stop_completes_session() {
        let h = harness();
        let task = tokio::spawn(h.runtime.run());

        h.media_tx
            .send(MediaEvent::StreamStart {
                stream_sid: "MZ1".into(),
                call_sid: "CA1".into(),
                called_number: "+15551234567".into(),
                caller_number: "+15550001111".into(),
            })
            .await
            .unwrap();
        h.media_tx.send(MediaEvent::StreamStop).await.unwrap();
        task.await.unwrap();

        let updates = h.sink.updates.lock();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status, CallStatus::Completed);
    }

    // Timer tests run under the paused clock so deadlines are exercised
    // deterministically. Each test advances past a deadline and checks the
    // expired-arm behavior plus what got re-armed or cleared.

    async fn start_stream(runtime: &mut SessionRuntime) {
        runtime
            .on_stream_start(
                "MZ1".to_string(),
                "CA1".to_string(),
                "+15551234567".to_string(),
                "+15550001111".to_string(),
            )
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_start_arms_timers() {
        let mut h = harness();
        assert!(h.runtime.silence_deadline.is_none());
        assert!(h.runtime.conversation_deadline.is_none());
        assert!(h.runtime.greeting_deadline.is_none());

        let t0 = Instant::now();
        start_stream(&mut h.runtime).await;

        let timers = &h.runtime.deps.timers;
        assert_eq!(
            h.runtime.greeting_deadline,
            Some(t0 + Duration::from_millis(timers.fallback_greeting_ms))
        );
        assert_eq!(
            h.runtime.silence_deadline,
            Some(t0 + Duration::from_millis(timers.silence_ms))
        );
        assert_eq!(
            h.runtime.conversation_deadline,
            Some(t0 + Duration::from_millis(timers.conversation_ms))
        );
        assert!(h.runtime.close_deadline.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_timer_nudges_then_falls_back() {
        let mut h = harness();
        start_stream(&mut h.runtime).await;
        h.runtime.session.flags.stt_ready = true;
        h.runtime.session.flags.greeting_sent = true;

        let silence = Duration::from_millis(h.runtime.deps.timers.silence_ms);

        // First expiry: nudge, count one silence, re-arm.
        let armed = h.runtime.silence_deadline.expect("armed at stream start");
        tokio::time::advance(silence + Duration::from_millis(1)).await;
        assert!(armed <= Instant::now());
        assert!(!h.runtime.on_silence_timeout().await);
        assert_eq!(
            h.runtime.session.machine.silences(crate::fsm::BookingState::Idle),
            1
        );
        assert_eq!(h.runtime.status, CallStatus::InProgress);
        let rearmed = h.runtime.silence_deadline.expect("re-armed after nudge");
        assert!(rearmed > Instant::now());

        // Second expiry: another nudge, still alive.
        tokio::time::advance(silence + Duration::from_millis(1)).await;
        assert!(!h.runtime.on_silence_timeout().await);
        assert_eq!(
            h.runtime.session.machine.silences(crate::fsm::BookingState::Idle),
            2
        );
        assert_eq!(h.runtime.status, CallStatus::InProgress);

        // Third expiry exhausts the silence budget: fallback, close grace
        // armed, silence timer cleared.
        tokio::time::advance(silence + Duration::from_millis(1)).await;
        assert!(!h.runtime.on_silence_timeout().await);
        assert_eq!(
            h.runtime.session.machine.state(),
            crate::fsm::BookingState::Fallback
        );
        assert_eq!(h.runtime.status, CallStatus::Fallback);
        assert!(h.runtime.silence_deadline.is_none());
        assert!(h.runtime.close_deadline.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_before_greeting_only_rearms() {
        let mut h = harness();
        start_stream(&mut h.runtime).await;
        assert!(!h.runtime.session.flags.greeting_sent);

        let armed = h.runtime.silence_deadline.expect("armed at stream start");
        tokio::time::advance(Duration::from_millis(h.runtime.deps.timers.silence_ms + 1)).await;
        assert!(armed <= Instant::now());

        // Quiet before the greeting is not the caller stalling: nothing
        // escalates, the deadline is simply re-armed.
        assert!(!h.runtime.on_silence_timeout().await);
        assert_eq!(
            h.runtime.session.machine.silences(crate::fsm::BookingState::Idle),
            0
        );
        assert_eq!(
            h.runtime.session.machine.state(),
            crate::fsm::BookingState::Idle
        );
        assert_eq!(h.runtime.status, CallStatus::InProgress);
        assert!(h.runtime.close_deadline.is_none());
        let rearmed = h.runtime.silence_deadline.expect("re-armed");
        assert!(rearmed > armed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conversation_timer_completes_call() {
        let mut h = harness();
        start_stream(&mut h.runtime).await;
        h.runtime.session.flags.greeting_sent = true;

        let deadline = h
            .runtime
            .conversation_deadline
            .expect("armed at stream start");
        tokio::time::advance(Duration::from_millis(h.runtime.deps.timers.conversation_ms + 1))
            .await;
        assert!(deadline <= Instant::now());

        h.runtime.on_conversation_timeout().await;
        assert_eq!(h.runtime.status, CallStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_greeting_fires_without_recognizer_ready() {
        let mut h = harness();
        start_stream(&mut h.runtime).await;
        // The recognizer never came up, so the ready-gate never opens.
        assert!(!h.runtime.session.flags.stt_ready);
        assert!(!h.runtime.session.ready_to_greet());

        let deadline = h.runtime.greeting_deadline.expect("armed at stream start");
        tokio::time::advance(Duration::from_millis(
            h.runtime.deps.timers.fallback_greeting_ms + 1,
        ))
        .await;
        assert!(deadline <= Instant::now());

        // The expired arm speaks the greeting with the defaults we have.
        h.runtime.greeting_deadline = None;
        assert!(!h.runtime.session.flags.greeting_sent);
        assert!(!h.runtime.speak_greeting().await);

        assert!(h.runtime.session.flags.greeting_sent);
        assert_eq!(
            h.runtime.session.org.greeting,
            OrganizationContext::default_for("+15551234567").greeting
        );
        assert!(h.runtime.greeting_deadline.is_none());
        // Once sent, nothing can replay it.
        assert!(!h.runtime.session.ready_to_greet());
        // Activity timers were re-armed after the greeting.
        assert!(h.runtime.silence_deadline.expect("re-armed") > Instant::now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_grace_timer_ends_session_through_select() {
        let mut h = harness();
        h.runtime.status = CallStatus::Fallback;
        h.runtime.schedule_close();

        // Media and recognizer channels stay open, so the close deadline
        // is the only arm that can wake the loop; the paused clock jumps
        // to it.
        let task = tokio::spawn(h.runtime.run());
        task.await.unwrap();

        let updates = h.sink.updates.lock();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status, CallStatus::Fallback);
    }
}

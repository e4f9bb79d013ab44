//! Turn orchestration
//!
//! Runs one user turn end to end: extraction, slot merge, state dispatch,
//! response selection, synthesis, and the turn record. At most one turn is
//! in flight per session; everything that can fail is caught here and the
//! caller hears the organization's fallback line instead of silence.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use frontdesk_core::{
    AppointmentSink, BookingRequest, CallbackRequest, EventSink, SlotKey, TurnRecord,
};
use frontdesk_llm::{sanitize, ExtractionRequest, ExtractorBackend, TurnInference};
use frontdesk_pipeline::TtsClient;
use frontdesk_transport::OutboundMedia;

use crate::fsm::{scripts, Action, BookingState, ProcessIntent, ResponseChoice};
use crate::session::Session;
use crate::AgentError;

/// Result of one turn, consumed by the session task.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub state: BookingState,
    /// The session should schedule its close-grace timer.
    pub terminal: bool,
    /// The session should end now (media or synthesis path is gone).
    pub fatal: bool,
    pub error: Option<String>,
}

/// Drives one turn at a time through the pipeline.
pub struct TurnOrchestrator {
    extractor: Arc<dyn ExtractorBackend>,
    tts: TtsClient,
    events: Arc<dyn EventSink>,
    appointments: Arc<dyn AppointmentSink>,
    out: mpsc::Sender<OutboundMedia>,
}

impl TurnOrchestrator {
    pub fn new(
        extractor: Arc<dyn ExtractorBackend>,
        tts: TtsClient,
        events: Arc<dyn EventSink>,
        appointments: Arc<dyn AppointmentSink>,
        out: mpsc::Sender<OutboundMedia>,
    ) -> Self {
        Self {
            extractor,
            tts,
            events,
            appointments,
            out,
        }
    }

    /// Run one user turn. `asr_ms` is the time from end of utterance to
    /// the flushed transcript, measured by the session task.
    pub async fn run_turn(
        &self,
        session: &mut Session,
        user_text: String,
        cancel: CancellationToken,
        asr_ms: u64,
    ) -> TurnOutcome {
        if session.flags.processing_turn {
            tracing::warn!(session_id = %session.session_id, "turn already in flight, dropping");
            return TurnOutcome {
                state: session.machine.state(),
                terminal: false,
                fatal: false,
                error: None,
            };
        }

        session.flags.processing_turn = true;
        session.turn_index += 1;
        let outcome = self.turn_inner(session, &user_text, cancel, asr_ms).await;
        session.flags.processing_turn = false;
        outcome
    }

    async fn turn_inner(
        &self,
        session: &mut Session,
        user_text: &str,
        cancel: CancellationToken,
        asr_ms: u64,
    ) -> TurnOutcome {
        let t0 = Instant::now();
        let state_before = session.machine.state();
        session.push_history("user", user_text);

        // Extraction. A failure here speaks the fallback line and keeps
        // the call alive; the backend already did its one retry.
        let llm_started = Instant::now();
        let inference = match self.extract(session, user_text).await {
            Ok(inference) => inference,
            Err(e) => {
                return self
                    .recover(session, user_text, state_before, t0, asr_ms, e)
                    .await;
            }
        };
        let llm_ms = llm_started.elapsed().as_millis() as u64;

        tracing::debug!(
            session_id = %session.session_id,
            intent = %inference.intent,
            confidence = inference.confidence,
            llm_ms,
            "turn classified"
        );

        // Merge entities before dispatch; the extractor is the only slot
        // writer. A service that isn't on the org's list never reaches the
        // store — the guard sees the store, the model's guess stays in the
        // event.
        let mut patch = inference.entities.clone();
        if let Some(ref service) = patch.service {
            match session.org.find_service(service) {
                Some(known) => patch.service = Some(known.name.clone()),
                None => {
                    tracing::debug!(session_id = %session.session_id, requested = %service,
                        "service not offered, leaving slot unset");
                    patch.service = None;
                }
            }
        }
        session
            .slots
            .merge(&patch, inference.confidence, session.turn_index);

        let event = ProcessIntent {
            intent: inference.intent,
            confidence: inference.confidence,
            entities: inference.entities.clone(),
            original_text: user_text.to_string(),
            response: inference.response.clone(),
        };
        let disposition = session.machine.dispatch(&event, &mut session.slots, &session.org);

        // The booking action runs inline so its script is spoken in the
        // same turn.
        let agent_text = if disposition.action == Some(Action::AttemptBooking) {
            self.attempt_booking(session).await
        } else {
            choose_response(&disposition.response, &inference, session)
        };
        let agent_text = sanitize(&agent_text);
        let state_after = session.machine.state();

        // Synthesis.
        let tts_started = Instant::now();
        let speak_result = self.speak(session, &agent_text, cancel).await;
        let tts_ms = tts_started.elapsed().as_millis() as u64;

        session.push_history("agent", agent_text.clone());

        let error = speak_result.as_ref().err().map(|e| e.to_string());
        let fatal = matches!(speak_result, Err(AgentError::Media(_)));

        let total_ms = t0.elapsed().as_millis() as u64;
        metrics::histogram!("turn_total_ms").record(total_ms as f64);
        metrics::histogram!("llm_ms").record(llm_ms as f64);

        self.events
            .append(turn_record(
                session, user_text, &agent_text, &inference, state_before, state_after, asr_ms,
                llm_ms, tts_ms, total_ms, error.clone(),
            ))
            .await;

        TurnOutcome {
            state: state_after,
            terminal: state_after.is_terminal(),
            fatal,
            error,
        }
    }

    async fn extract(
        &self,
        session: &Session,
        user_text: &str,
    ) -> Result<TurnInference, AgentError> {
        let request = ExtractionRequest {
            transcript: user_text.to_string(),
            state: session.machine.state().as_str().to_string(),
            slots: session
                .slots
                .snapshot()
                .into_iter()
                .map(|(k, v)| (k.as_str().to_string(), v))
                .collect(),
            recent_history: session.recent_history(),
            services: session
                .org
                .active_services()
                .map(|s| s.name.clone())
                .collect(),
            business_hours: session.hours_summary(),
            timezone: session.org.business_hours.timezone.clone(),
        };

        Ok(self.extractor.infer(&request).await?)
    }

    /// Book through the calendar collaborator; integration failure records
    /// a callback request and the caller hears the distinct script.
    async fn attempt_booking(&self, session: &mut Session) -> String {
        let request = BookingRequest {
            org_id: session.org.id.clone(),
            session_id: session.session_id.clone(),
            service: session
                .slots
                .value(SlotKey::Service)
                .unwrap_or_default()
                .to_string(),
            time_window: session
                .slots
                .value(SlotKey::TimeWindow)
                .unwrap_or_default()
                .to_string(),
            contact: session
                .slots
                .value(SlotKey::Contact)
                .unwrap_or_default()
                .to_string(),
            location: session.slots.value(SlotKey::Location).map(String::from),
            notes: session.slots.value(SlotKey::Notes).map(String::from),
        };

        let booked = match self.appointments.book(request).await {
            Ok(confirmation) => {
                tracing::info!(
                    session_id = %session.session_id,
                    booking_id = %confirmation.booking_id,
                    "appointment booked"
                );
                true
            }
            Err(e) => {
                tracing::warn!(session_id = %session.session_id, error = %e,
                    "booking failed, recording callback");
                let callback = CallbackRequest {
                    org_id: session.org.id.clone(),
                    session_id: session.session_id.clone(),
                    caller_number: session.caller_number.clone().unwrap_or_default(),
                    service: session.slots.value(SlotKey::Service).map(String::from),
                    time_window: session.slots.value(SlotKey::TimeWindow).map(String::from),
                    requested_at: chrono::Utc::now(),
                };
                if let Err(e) = self.appointments.record_callback(callback).await {
                    tracing::warn!(error = %e, "callback record failed");
                }
                false
            }
        };

        let (_, script) = session
            .machine
            .finish_booking(booked, &session.org, &session.slots);
        script
    }

    /// Speak a script outside a turn (greeting, nudge, farewell). Subject
    /// to the same stream guard and cancellation as turn responses.
    pub async fn speak_script(
        &self,
        session: &Session,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<(), AgentError> {
        self.speak(session, text, cancel).await
    }

    async fn speak(
        &self,
        session: &Session,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<(), AgentError> {
        // Synthesis never runs without an established stream.
        let stream_sid = session
            .stream_sid
            .as_deref()
            .ok_or_else(|| AgentError::Media("no active stream".to_string()))?;

        self.tts
            .speak(text, &session.org.voice, stream_sid, &self.out, cancel)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                frontdesk_pipeline::PipelineError::ChannelClosed => {
                    AgentError::Media("media socket gone".to_string())
                }
                other => AgentError::Synthesis(other.to_string()),
            })
    }

    /// Error path: speak the fallback line, record the error, keep going.
    async fn recover(
        &self,
        session: &mut Session,
        user_text: &str,
        state_before: BookingState,
        t0: Instant,
        asr_ms: u64,
        error: AgentError,
    ) -> TurnOutcome {
        tracing::warn!(session_id = %session.session_id, error = %error, "turn failed, speaking fallback");

        let fallback = session.org.fallback.clone();
        let speak_result = self
            .speak(session, &fallback, CancellationToken::new())
            .await;
        session.push_history("agent", fallback.clone());

        let fatal = matches!(speak_result, Err(AgentError::Media(_)));
        let total_ms = t0.elapsed().as_millis() as u64;

        self.events
            .append(TurnRecord {
                session_id: session.session_id.clone(),
                turn_index: session.turn_index,
                user_text: user_text.to_string(),
                agent_text: fallback,
                intent: "unclear".to_string(),
                confidence: 0.0,
                state_before: state_before.as_str().to_string(),
                state_after: session.machine.state().as_str().to_string(),
                asr_ms,
                llm_ms: 0,
                tts_ms: 0,
                total_ms,
                error: Some(error.to_string()),
                ts: chrono::Utc::now(),
            })
            .await;

        TurnOutcome {
            state: session.machine.state(),
            terminal: false,
            fatal,
            error: Some(error.to_string()),
        }
    }
}

/// Pick the agent's spoken text for this turn. State-owned scripts win;
/// an empty drafted response falls back to the active prompt — never to a
/// previous turn's text.
fn choose_response(
    choice: &ResponseChoice,
    inference: &TurnInference,
    session: &Session,
) -> String {
    match choice {
        ResponseChoice::Script(script) => script.clone(),
        ResponseChoice::Llm => {
            if inference.response.trim().is_empty() {
                scripts::reprompt(session.machine.state(), &session.org, &session.slots)
            } else {
                inference.response.clone()
            }
        }
        ResponseChoice::LlmWithReprompt(reprompt) => {
            if inference.response.trim().is_empty() {
                reprompt.clone()
            } else {
                format!("{} {}", inference.response.trim(), reprompt)
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn turn_record(
    session: &Session,
    user_text: &str,
    agent_text: &str,
    inference: &TurnInference,
    state_before: BookingState,
    state_after: BookingState,
    asr_ms: u64,
    llm_ms: u64,
    tts_ms: u64,
    total_ms: u64,
    error: Option<String>,
) -> TurnRecord {
    TurnRecord {
        session_id: session.session_id.clone(),
        turn_index: session.turn_index,
        user_text: user_text.to_string(),
        agent_text: agent_text.to_string(),
        intent: inference.intent.to_string(),
        confidence: inference.confidence,
        state_before: state_before.as_str().to_string(),
        state_after: state_after.as_str().to_string(),
        asr_ms,
        llm_ms,
        tts_ms,
        total_ms,
        error,
        ts: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use frontdesk_core::{BookingConfirmation, BookingError, CallUpdate, EntityPatch};
    use frontdesk_llm::{Intent, LlmError};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    fn session_with_org() -> Session {
        let mut session = Session::new();
        session.org.services = vec![frontdesk_core::Service {
            id: "svc-1".into(),
            name: "Haircut".into(),
            duration_minutes: 30,
            active: true,
        }];
        session.stream_sid = Some("MZ1".into());
        session
    }

    fn inference(response: &str) -> TurnInference {
        TurnInference {
            intent: Intent::ServiceProvided,
            confidence: 0.9,
            entities: EntityPatch::default(),
            response: response.to_string(),
        }
    }

    #[test]
    fn test_script_overrides_llm_response() {
        let session = session_with_org();
        let text = choose_response(
            &ResponseChoice::Script("Shall I book it?".into()),
            &inference("something the model drafted"),
            &session,
        );
        assert_eq!(text, "Shall I book it?");
    }

    #[test]
    fn test_empty_llm_response_falls_back_to_prompt() {
        let session = session_with_org();
        let text = choose_response(&ResponseChoice::Llm, &inference("   "), &session);
        // Never empty, never a previous turn's text.
        assert!(!text.trim().is_empty());
    }

    #[test]
    fn test_digression_appends_reprompt() {
        let session = session_with_org();
        let text = choose_response(
            &ResponseChoice::LlmWithReprompt("What service would you like?".into()),
            &inference("We're open until five."),
            &session,
        );
        assert_eq!(text, "We're open until five. What service would you like?");
    }

    // Mocks for end-to-end turn tests. Synthesis points at a closed local
    // port, so every speak fails fast without touching the network; state
    // transitions and records must survive that.

    struct ScriptedExtractor {
        script: Mutex<VecDeque<TurnInference>>,
    }

    impl ScriptedExtractor {
        fn new(script: Vec<TurnInference>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl ExtractorBackend for ScriptedExtractor {
        async fn infer(&self, _request: &ExtractionRequest) -> Result<TurnInference, LlmError> {
            self.script
                .lock()
                .pop_front()
                .ok_or_else(|| LlmError::Api("script exhausted".to_string()))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    struct FailingExtractor;

    #[async_trait]
    impl ExtractorBackend for FailingExtractor {
        async fn infer(&self, _request: &ExtractionRequest) -> Result<TurnInference, LlmError> {
            Err(LlmError::Timeout)
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    #[derive(Default)]
    struct CapturingSink {
        records: Mutex<Vec<TurnRecord>>,
    }

    #[async_trait]
    impl frontdesk_core::EventSink for CapturingSink {
        async fn append(&self, record: TurnRecord) {
            self.records.lock().push(record);
        }

        async fn update_call(&self, _update: CallUpdate) {}
    }

    #[derive(Default)]
    struct StubAppointments {
        fail: bool,
        booked: Mutex<Vec<BookingRequest>>,
    }

    #[async_trait]
    impl AppointmentSink for StubAppointments {
        async fn book(
            &self,
            request: BookingRequest,
        ) -> Result<BookingConfirmation, BookingError> {
            if self.fail {
                return Err(BookingError::IntegrationUnavailable("down".to_string()));
            }
            self.booked.lock().push(request);
            Ok(BookingConfirmation {
                booking_id: "bk-1".to_string(),
                booked_at: chrono::Utc::now(),
            })
        }

        async fn record_callback(&self, _request: CallbackRequest) -> Result<(), BookingError> {
            Ok(())
        }
    }

    fn turn(intent: Intent, entities: EntityPatch, response: &str) -> TurnInference {
        TurnInference {
            intent,
            confidence: 0.9,
            entities,
            response: response.to_string(),
        }
    }

    fn harness(
        extractor: Arc<dyn ExtractorBackend>,
        appointments: Arc<dyn AppointmentSink>,
    ) -> (TurnOrchestrator, Arc<CapturingSink>) {
        let sink = Arc::new(CapturingSink::default());
        // Closed port: connection refused immediately, no network.
        let tts = frontdesk_pipeline::TtsClient::new(
            frontdesk_pipeline::TtsConfig {
                endpoint: "http://127.0.0.1:1".to_string(),
                ..Default::default()
            },
            Arc::new(std::sync::atomic::AtomicBool::new(false)),
        )
        .unwrap();
        let (out_tx, _out_rx) = mpsc::channel(8);
        let orchestrator =
            TurnOrchestrator::new(extractor, tts, sink.clone(), appointments, out_tx);
        (orchestrator, sink)
    }

    fn booking_session() -> Session {
        let mut session = session_with_org();
        session.org.services.push(frontdesk_core::Service {
            id: "svc-2".into(),
            name: "Consultation".into(),
            duration_minutes: 60,
            active: true,
        });
        session
    }

    #[tokio::test]
    async fn test_happy_path_call_flow() {
        let extractor = Arc::new(ScriptedExtractor::new(vec![
            turn(
                Intent::Booking,
                EntityPatch {
                    service: Some("haircut".into()),
                    ..Default::default()
                },
                "Great, what day and time works for you?",
            ),
            turn(
                Intent::TimeProvided,
                EntityPatch {
                    time_window: Some("Tuesday 3 PM".into()),
                    ..Default::default()
                },
                "And your name and number?",
            ),
            turn(
                Intent::ContactProvided,
                EntityPatch {
                    contact: Some("Jane, 555-0100".into()),
                    ..Default::default()
                },
                "Let me read that back.",
            ),
            turn(Intent::ConfirmationYes, EntityPatch::default(), "Booked!"),
        ]));
        let appointments = Arc::new(StubAppointments::default());
        let (orchestrator, sink) = harness(extractor, appointments.clone());
        let mut session = booking_session();

        for text in [
            "I'd like to book a haircut.",
            "Tuesday at 3 PM.",
            "Jane, 555-0100.",
            "Yes.",
        ] {
            let outcome = orchestrator
                .run_turn(&mut session, text.to_string(), CancellationToken::new(), 0)
                .await;
            assert!(!outcome.fatal);
        }

        assert_eq!(session.machine.state(), BookingState::Success);
        assert_eq!(session.turn_index, 4);
        assert_eq!(appointments.booked.lock().len(), 1);

        let records = sink.records.lock();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].state_before, "idle");
        assert_eq!(records[0].state_after, "collect_time_window");
        assert_eq!(records[3].state_after, "success");
        // One turn in flight at a time: each record's index is unique and
        // sequential.
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.turn_index as usize, i + 1);
        }
    }

    #[tokio::test]
    async fn test_booking_failure_goes_to_callback() {
        let extractor = Arc::new(ScriptedExtractor::new(vec![turn(
            Intent::ConfirmationYes,
            EntityPatch::default(),
            "Booked!",
        )]));
        let appointments = Arc::new(StubAppointments {
            fail: true,
            ..Default::default()
        });
        let (orchestrator, sink) = harness(extractor, appointments);

        let mut session = booking_session();
        // Arrange a session already at confirmation.
        session.slots.merge(
            &EntityPatch {
                service: Some("Haircut".into()),
                time_window: Some("Tuesday 3 PM".into()),
                contact: Some("Jane".into()),
                ..Default::default()
            },
            0.9,
            1,
        );
        let readback = ProcessIntent {
            intent: Intent::ContactProvided,
            confidence: 0.9,
            entities: EntityPatch::default(),
            original_text: String::new(),
            response: String::new(),
        };
        let d = session
            .machine
            .dispatch(&readback, &mut session.slots, &session.org);
        assert_eq!(d.state_after, BookingState::Confirm);

        let outcome = orchestrator
            .run_turn(&mut session, "Yes.".to_string(), CancellationToken::new(), 0)
            .await;

        assert_eq!(outcome.state, BookingState::CallbackScheduled);
        assert!(outcome.terminal);
        let records = sink.records.lock();
        assert_eq!(records[0].state_after, "callback_scheduled");
    }

    #[tokio::test]
    async fn test_extraction_failure_keeps_call_alive() {
        let (orchestrator, sink) = harness(
            Arc::new(FailingExtractor),
            Arc::new(StubAppointments::default()),
        );
        let mut session = booking_session();

        let outcome = orchestrator
            .run_turn(
                &mut session,
                "I'd like a haircut.".to_string(),
                CancellationToken::new(),
                0,
            )
            .await;

        assert!(!outcome.terminal);
        assert!(outcome.error.is_some());
        assert!(!session.flags.processing_turn);

        let records = sink.records.lock();
        assert_eq!(records.len(), 1);
        assert!(records[0].error.is_some());
        // State untouched by the failed turn.
        assert_eq!(records[0].state_before, records[0].state_after);
    }

    #[tokio::test]
    async fn test_invalid_service_never_reaches_slots() {
        let extractor = Arc::new(ScriptedExtractor::new(vec![turn(
            Intent::ServiceProvided,
            EntityPatch {
                service: Some("quantum healing".into()),
                ..Default::default()
            },
            "We don't offer that, but we have haircuts and consultations.",
        )]));
        let (orchestrator, _sink) =
            harness(extractor, Arc::new(StubAppointments::default()));
        let mut session = booking_session();

        orchestrator
            .run_turn(
                &mut session,
                "Do you do quantum healing?".to_string(),
                CancellationToken::new(),
                0,
            )
            .await;

        assert!(!session.slots.is_set(frontdesk_core::SlotKey::Service));
    }

    #[tokio::test]
    async fn test_service_name_canonicalized_on_merge() {
        let extractor = Arc::new(ScriptedExtractor::new(vec![turn(
            Intent::ServiceProvided,
            EntityPatch {
                service: Some("HAIRCUT".into()),
                ..Default::default()
            },
            "Great.",
        )]));
        let (orchestrator, _sink) =
            harness(extractor, Arc::new(StubAppointments::default()));
        let mut session = booking_session();

        orchestrator
            .run_turn(
                &mut session,
                "A haircut please.".to_string(),
                CancellationToken::new(),
                0,
            )
            .await;

        assert_eq!(
            session.slots.value(frontdesk_core::SlotKey::Service),
            Some("Haircut")
        );
    }
}

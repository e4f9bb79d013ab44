//! Booking state machine
//!
//! Deterministic guard-driven dispatch over the extractor's per-turn
//! output. The machine owns the conversation policy: slot-collection
//! order, retry budgets, digression bounds, silence escalation, and the
//! state-owned scripts that take precedence over the model's drafted
//! response for readback and terminal states.
//!
//! The machine never talks to the network. The one side-effecting state —
//! `Book` — is surfaced as an [`Action`] the orchestrator performs, with
//! the result fed back through [`StateMachine::finish_booking`].

use std::collections::HashMap;

use frontdesk_core::{EntityPatch, OrganizationContext, SlotKey, SlotStore};
use frontdesk_llm::Intent;

/// Consecutive digressions answered before forcing the caller back to the
/// active prompt.
const MAX_DIGRESSIONS: u32 = 3;

/// Silence timeouts tolerated in one state before falling back.
const MAX_SILENCES: u32 = 2;

/// Conversation states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookingState {
    Idle,
    CollectService,
    CollectTimeWindow,
    CollectContact,
    Confirm,
    Book,
    Success,
    CallbackScheduled,
    Fallback,
    /// A digression was answered before any booking intent surfaced; the
    /// machine waits without an active prompt.
    RespondAndIdle,
}

impl BookingState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingState::Success | BookingState::CallbackScheduled | BookingState::Fallback
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingState::Idle => "idle",
            BookingState::CollectService => "collect_service",
            BookingState::CollectTimeWindow => "collect_time_window",
            BookingState::CollectContact => "collect_contact",
            BookingState::Confirm => "confirm",
            BookingState::Book => "book",
            BookingState::Success => "success",
            BookingState::CallbackScheduled => "callback_scheduled",
            BookingState::Fallback => "fallback",
            BookingState::RespondAndIdle => "respond_and_idle",
        }
    }
}

impl std::fmt::Display for BookingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One turn's classified input.
#[derive(Debug, Clone)]
pub struct ProcessIntent {
    pub intent: Intent,
    pub confidence: f32,
    pub entities: EntityPatch,
    pub original_text: String,
    pub response: String,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Persist the appointment through the calendar collaborator.
    AttemptBooking,
}

/// How the agent's spoken text is chosen for this turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseChoice {
    /// Use the extractor's drafted response.
    Llm,
    /// State-owned script; overrides whatever the model drafted.
    Script(String),
    /// Digression: the model's inline answer followed by the active
    /// prompt.
    LlmWithReprompt(String),
}

/// Result of dispatching one intent.
#[derive(Debug, Clone)]
pub struct Disposition {
    pub state_before: BookingState,
    pub state_after: BookingState,
    pub response: ResponseChoice,
    pub action: Option<Action>,
    /// Guard produced a retry rather than a transition.
    pub retried: bool,
}

/// Outcome of a silence timeout.
#[derive(Debug, Clone, PartialEq)]
pub enum SilenceOutcome {
    /// Speak a nudge; the count is the per-state silence ordinal.
    Nudge(u32),
    /// Silence budget exhausted; the fallback script to speak.
    Fallback(String),
}

/// The per-session booking state machine.
#[derive(Debug)]
pub struct StateMachine {
    state: BookingState,
    retry_by_state: HashMap<BookingState, u32>,
    silence_by_state: HashMap<BookingState, u32>,
    digression_streak: u32,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: BookingState::Idle,
            retry_by_state: HashMap::new(),
            silence_by_state: HashMap::new(),
            digression_streak: 0,
        }
    }

    pub fn state(&self) -> BookingState {
        self.state
    }

    pub fn retries(&self, state: BookingState) -> u32 {
        self.retry_by_state.get(&state).copied().unwrap_or(0)
    }

    pub fn silences(&self, state: BookingState) -> u32 {
        self.silence_by_state.get(&state).copied().unwrap_or(0)
    }

    /// Dispatch one classified turn.
    ///
    /// Entities have already been merged into `slots` by the orchestrator;
    /// the patch is still consulted for confirmation-rejection wipes.
    pub fn dispatch(
        &mut self,
        event: &ProcessIntent,
        slots: &mut SlotStore,
        org: &OrganizationContext,
    ) -> Disposition {
        let before = self.state;

        if before.is_terminal() || before == BookingState::Book {
            return Disposition {
                state_before: before,
                state_after: before,
                response: ResponseChoice::Llm,
                action: None,
                retried: false,
            };
        }

        // Digressions answer inline and re-emit the active prompt; they
        // never touch retry counters. A streak of them forces the caller
        // back to the prompt without another inline answer.
        if event.intent == Intent::Digression {
            self.digression_streak += 1;
            let reprompt = scripts::reprompt(self.active_prompt_state(), org, slots);
            let response = if self.digression_streak > MAX_DIGRESSIONS {
                ResponseChoice::Script(reprompt)
            } else {
                ResponseChoice::LlmWithReprompt(reprompt)
            };
            let after = if before == BookingState::Idle {
                BookingState::RespondAndIdle
            } else {
                before
            };
            self.state = after;
            return Disposition {
                state_before: before,
                state_after: after,
                response,
                action: None,
                retried: false,
            };
        }
        self.digression_streak = 0;

        // Low confidence retries the current state instead of acting on a
        // guess. Threshold is inclusive: exactly at it is good enough.
        if event.intent == Intent::Unclear || event.confidence < org.rules.confirmation_threshold {
            return self.retry(before, org, slots, true);
        }

        match before {
            BookingState::Idle | BookingState::RespondAndIdle | BookingState::CollectService => {
                if slots.is_set(SlotKey::Service) {
                    self.advance(before, org, slots)
                } else {
                    // Invalid or missing service. The model's drafted reply
                    // offers the listed services; from idle this is the
                    // opening ask, not a retry.
                    self.retry(before, org, slots, false)
                }
            }
            BookingState::CollectTimeWindow => {
                if slots.is_set(SlotKey::TimeWindow) {
                    self.advance(before, org, slots)
                } else {
                    self.retry(before, org, slots, false)
                }
            }
            BookingState::CollectContact => {
                if slots.is_set(SlotKey::Contact) {
                    self.advance(before, org, slots)
                } else {
                    self.retry(before, org, slots, false)
                }
            }
            BookingState::Confirm => match event.intent {
                Intent::ConfirmationYes => {
                    self.state = BookingState::Book;
                    Disposition {
                        state_before: before,
                        state_after: BookingState::Book,
                        response: ResponseChoice::Llm,
                        action: Some(Action::AttemptBooking),
                        retried: false,
                    }
                }
                Intent::ConfirmationNo => {
                    // Wipe the slots the caller flagged without giving a
                    // replacement; replacements were already merged this
                    // turn.
                    let to_wipe: Vec<SlotKey> = event
                        .entities
                        .override_slots
                        .iter()
                        .copied()
                        .filter(|k| {
                            !event.entities.entries().any(|(ek, _)| ek == *k)
                        })
                        .collect();
                    slots.clear(&to_wipe);
                    self.transition(before, BookingState::CollectService, ResponseChoice::Llm)
                }
                _ => {
                    // New details at confirmation re-read the summary.
                    let readback = scripts::confirm_readback(org, slots);
                    Disposition {
                        state_before: before,
                        state_after: BookingState::Confirm,
                        response: ResponseChoice::Script(readback),
                        action: None,
                        retried: true,
                    }
                }
            },
            // Terminal and Book handled above.
            _ => unreachable!("dispatch from {before}"),
        }
    }

    /// Complete the booking action with the collaborator's result.
    ///
    /// Returns the terminal state entered and its script.
    pub fn finish_booking(
        &mut self,
        booked: bool,
        org: &OrganizationContext,
        slots: &SlotStore,
    ) -> (BookingState, String) {
        let (state, script) = if booked {
            (BookingState::Success, scripts::success(org, slots))
        } else {
            (BookingState::CallbackScheduled, scripts::callback(org))
        };
        self.state = state;
        (state, script)
    }

    /// Record a silence timeout in the current state.
    pub fn note_silence(&mut self, org: &OrganizationContext) -> SilenceOutcome {
        let count = self.silence_by_state.entry(self.state).or_insert(0);
        *count += 1;
        if *count > MAX_SILENCES {
            self.state = BookingState::Fallback;
            SilenceOutcome::Fallback(scripts::fallback(org))
        } else {
            SilenceOutcome::Nudge(*count)
        }
    }

    /// The state whose prompt a digression returns to.
    fn active_prompt_state(&self) -> BookingState {
        match self.state {
            BookingState::Idle | BookingState::RespondAndIdle => BookingState::CollectService,
            other => other,
        }
    }

    /// Move to the next missing slot in canonical order, or to
    /// confirmation when everything is collected. A caller who gives
    /// several details in one utterance skips the states those details
    /// would have collected.
    fn advance(
        &mut self,
        before: BookingState,
        org: &OrganizationContext,
        slots: &SlotStore,
    ) -> Disposition {
        match slots.first_missing() {
            Some(SlotKey::TimeWindow) => {
                self.transition(before, BookingState::CollectTimeWindow, ResponseChoice::Llm)
            }
            Some(SlotKey::Contact) => {
                self.transition(before, BookingState::CollectContact, ResponseChoice::Llm)
            }
            _ => {
                let readback = scripts::confirm_readback(org, slots);
                self.transition(before, BookingState::Confirm, ResponseChoice::Script(readback))
            }
        }
    }

    fn transition(
        &mut self,
        before: BookingState,
        after: BookingState,
        response: ResponseChoice,
    ) -> Disposition {
        self.state = after;
        Disposition {
            state_before: before,
            state_after: after,
            response,
            action: None,
            retried: false,
        }
    }

    /// Stay (or enter) the collection state for another attempt. Entering
    /// from idle is the opening ask and does not count against the retry
    /// budget; exceeding the budget falls back.
    fn retry(
        &mut self,
        before: BookingState,
        org: &OrganizationContext,
        slots: &SlotStore,
        low_confidence: bool,
    ) -> Disposition {
        let target = match before {
            BookingState::Idle | BookingState::RespondAndIdle => BookingState::CollectService,
            other => other,
        };

        let is_retry = target == before;
        if is_retry {
            let count = self.retry_by_state.entry(target).or_insert(0);
            *count += 1;
            if *count >= org.rules.max_retries {
                self.state = BookingState::Fallback;
                return Disposition {
                    state_before: before,
                    state_after: BookingState::Fallback,
                    response: ResponseChoice::Script(scripts::fallback(org)),
                    action: None,
                    retried: false,
                };
            }
        }

        self.state = target;
        let response = if low_confidence {
            // Nothing usable was drafted; ask again from the script.
            ResponseChoice::Script(scripts::reprompt(target, org, slots))
        } else {
            ResponseChoice::Llm
        };

        Disposition {
            state_before: before,
            state_after: target,
            response,
            action: None,
            retried: is_retry,
        }
    }
}

/// State-owned scripts, with per-organization overrides.
pub mod scripts {
    use super::*;

    /// The active prompt for a collection state.
    pub fn reprompt(state: BookingState, org: &OrganizationContext, slots: &SlotStore) -> String {
        if let Some(script) = org.script_for(state.as_str()) {
            return script.to_string();
        }
        match state {
            BookingState::CollectService => {
                let names: Vec<&str> =
                    org.active_services().map(|s| s.name.as_str()).collect();
                if names.is_empty() {
                    "What can I help you schedule?".to_string()
                } else {
                    format!("What service would you like to book? We offer {}.", names.join(", "))
                }
            }
            BookingState::CollectTimeWindow => {
                "What day and time works best for you?".to_string()
            }
            BookingState::CollectContact => {
                "Can I get your name and a phone number for the appointment?".to_string()
            }
            BookingState::Confirm => confirm_readback(org, slots),
            _ => org.fallback.clone(),
        }
    }

    /// Confirmation readback built from the slot store, never from a
    /// previous turn's response.
    pub fn confirm_readback(org: &OrganizationContext, slots: &SlotStore) -> String {
        if let Some(script) = org.script_for("confirm") {
            return script.to_string();
        }
        format!(
            "Let me make sure I have that right: {} on {}, for {}. Shall I book it?",
            slots.value(SlotKey::Service).unwrap_or("your appointment"),
            slots.value(SlotKey::TimeWindow).unwrap_or("the requested time"),
            slots.value(SlotKey::Contact).unwrap_or("you"),
        )
    }

    pub fn success(org: &OrganizationContext, slots: &SlotStore) -> String {
        if let Some(script) = org.script_for("success") {
            return script.to_string();
        }
        format!(
            "You're all set — {} on {}. We look forward to seeing you. Goodbye!",
            slots.value(SlotKey::Service).unwrap_or("your appointment"),
            slots.value(SlotKey::TimeWindow).unwrap_or("the requested time"),
        )
    }

    pub fn callback(org: &OrganizationContext) -> String {
        if let Some(script) = org.script_for("callback_scheduled") {
            return script.to_string();
        }
        "I wasn't able to finalize that in our calendar just now, but I've saved your \
         request and someone will call you back shortly to confirm. Goodbye!"
            .to_string()
    }

    pub fn fallback(org: &OrganizationContext) -> String {
        if let Some(script) = org.script_for("fallback") {
            return script.to_string();
        }
        match &org.escalation_number {
            Some(number) => format!(
                "I'm having trouble helping with this over the phone. Please call {} to \
                 reach someone directly. Goodbye!",
                number
            ),
            None => "I'm having trouble helping with this over the phone. Please call back \
                     during business hours to speak with someone directly. Goodbye!"
                .to_string(),
        }
    }

    pub fn farewell(org: &OrganizationContext) -> String {
        if let Some(script) = org.script_for("farewell") {
            return script.to_string();
        }
        "Thanks for calling. Goodbye!".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org() -> OrganizationContext {
        let mut org = OrganizationContext::default_for("+15551234567");
        org.services = vec![
            frontdesk_core::Service {
                id: "svc-1".into(),
                name: "Haircut".into(),
                duration_minutes: 30,
                active: true,
            },
            frontdesk_core::Service {
                id: "svc-2".into(),
                name: "Consultation".into(),
                duration_minutes: 60,
                active: true,
            },
        ];
        org
    }

    fn event(intent: Intent, confidence: f32) -> ProcessIntent {
        ProcessIntent {
            intent,
            confidence,
            entities: EntityPatch::default(),
            original_text: String::new(),
            response: "drafted response".into(),
        }
    }

    fn filled_slots(service: bool, time: bool, contact: bool) -> SlotStore {
        let mut slots = SlotStore::new();
        let patch = EntityPatch {
            service: service.then(|| "Haircut".to_string()),
            time_window: time.then(|| "Tuesday 3 PM".to_string()),
            contact: contact.then(|| "Jane, 555-0100".to_string()),
            ..Default::default()
        };
        slots.merge(&patch, 0.9, 1);
        slots
    }

    #[test]
    fn test_happy_path_transitions() {
        let org = org();
        let mut sm = StateMachine::new();

        // "I'd like to book a haircut."
        let mut slots = filled_slots(true, false, false);
        let d = sm.dispatch(&event(Intent::Booking, 0.9), &mut slots, &org);
        assert_eq!(d.state_after, BookingState::CollectTimeWindow);

        // "Tuesday at 3 PM."
        let mut slots = filled_slots(true, true, false);
        let d = sm.dispatch(&event(Intent::TimeProvided, 0.9), &mut slots, &org);
        assert_eq!(d.state_after, BookingState::CollectContact);

        // "Jane, 555-0100."
        let mut slots = filled_slots(true, true, true);
        let d = sm.dispatch(&event(Intent::ContactProvided, 0.9), &mut slots, &org);
        assert_eq!(d.state_after, BookingState::Confirm);
        assert!(matches!(d.response, ResponseChoice::Script(_)));

        // "Yes."
        let d = sm.dispatch(&event(Intent::ConfirmationYes, 0.9), &mut slots, &org);
        assert_eq!(d.state_after, BookingState::Book);
        assert_eq!(d.action, Some(Action::AttemptBooking));

        let (state, script) = sm.finish_booking(true, &org, &slots);
        assert_eq!(state, BookingState::Success);
        assert!(script.contains("Haircut"));
        assert!(state.is_terminal());
    }

    #[test]
    fn test_booking_failure_schedules_callback() {
        let org = org();
        let mut sm = StateMachine::new();
        let slots = filled_slots(true, true, true);
        sm.state = BookingState::Book;

        let (state, script) = sm.finish_booking(false, &org, &slots);
        assert_eq!(state, BookingState::CallbackScheduled);
        assert!(script.contains("call you back"));
    }

    #[test]
    fn test_invalid_service_retries_with_counter() {
        let org = org();
        let mut sm = StateMachine::new();
        sm.state = BookingState::CollectService;

        // "quantum healing" never made it into the slot store.
        let mut slots = SlotStore::new();
        let mut e = event(Intent::ServiceProvided, 0.9);
        e.entities.service = Some("quantum healing".into());

        let d = sm.dispatch(&e, &mut slots, &org);
        assert_eq!(d.state_after, BookingState::CollectService);
        assert!(d.retried);
        assert_eq!(sm.retries(BookingState::CollectService), 1);
        assert!(!slots.is_set(SlotKey::Service));
        // The drafted reply (offering listed services) is used.
        assert_eq!(d.response, ResponseChoice::Llm);
    }

    #[test]
    fn test_opening_ask_from_idle_is_not_a_retry() {
        let org = org();
        let mut sm = StateMachine::new();
        let mut slots = SlotStore::new();

        let d = sm.dispatch(&event(Intent::Booking, 0.9), &mut slots, &org);
        assert_eq!(d.state_before, BookingState::Idle);
        assert_eq!(d.state_after, BookingState::CollectService);
        assert!(!d.retried);
        assert_eq!(sm.retries(BookingState::CollectService), 0);
    }

    #[test]
    fn test_retries_exhausted_falls_back() {
        let org = org();
        let mut sm = StateMachine::new();
        sm.state = BookingState::CollectService;
        let mut slots = SlotStore::new();

        // "uhh" x3 at collect_service
        let e = event(Intent::Unclear, 0.0);
        let d1 = sm.dispatch(&e, &mut slots, &org);
        assert_eq!(d1.state_after, BookingState::CollectService);
        let d2 = sm.dispatch(&e, &mut slots, &org);
        assert_eq!(d2.state_after, BookingState::CollectService);
        let d3 = sm.dispatch(&e, &mut slots, &org);
        assert_eq!(d3.state_after, BookingState::Fallback);
        match d3.response {
            ResponseChoice::Script(s) => assert!(s.contains("Goodbye")),
            other => panic!("expected fallback script, got {other:?}"),
        }
    }

    #[test]
    fn test_confidence_threshold_inclusive() {
        let org = org(); // threshold 0.5
        let mut sm = StateMachine::new();
        let mut slots = filled_slots(true, false, false);

        // Exactly at threshold transitions.
        let d = sm.dispatch(&event(Intent::ServiceProvided, 0.5), &mut slots, &org);
        assert_eq!(d.state_after, BookingState::CollectTimeWindow);

        // Just below retries.
        let mut sm = StateMachine::new();
        sm.state = BookingState::CollectTimeWindow;
        let mut slots = filled_slots(true, true, false);
        let d = sm.dispatch(&event(Intent::TimeProvided, 0.49), &mut slots, &org);
        assert_eq!(d.state_after, BookingState::CollectTimeWindow);
        assert!(d.retried);
    }

    #[test]
    fn test_digression_bounded_at_three() {
        let org = org();
        let mut sm = StateMachine::new();
        sm.state = BookingState::CollectTimeWindow;
        let mut slots = filled_slots(true, false, false);

        let e = event(Intent::Digression, 0.9);
        for _ in 0..3 {
            let d = sm.dispatch(&e, &mut slots, &org);
            assert_eq!(d.state_after, BookingState::CollectTimeWindow);
            assert!(matches!(d.response, ResponseChoice::LlmWithReprompt(_)));
            assert!(!d.retried);
        }
        assert_eq!(sm.retries(BookingState::CollectTimeWindow), 0);

        // Fourth digression forces the prompt without an inline answer.
        let d = sm.dispatch(&e, &mut slots, &org);
        assert!(matches!(d.response, ResponseChoice::Script(_)));
    }

    #[test]
    fn test_digression_streak_resets_on_real_intent() {
        let org = org();
        let mut sm = StateMachine::new();
        sm.state = BookingState::CollectTimeWindow;
        let mut slots = filled_slots(true, false, false);

        for _ in 0..2 {
            sm.dispatch(&event(Intent::Digression, 0.9), &mut slots, &org);
        }
        let mut slots = filled_slots(true, true, false);
        sm.dispatch(&event(Intent::TimeProvided, 0.9), &mut slots, &org);

        // Streak reset: three more inline answers allowed.
        let mut slots = filled_slots(true, true, false);
        sm.state = BookingState::CollectContact;
        for _ in 0..3 {
            let d = sm.dispatch(&event(Intent::Digression, 0.9), &mut slots, &org);
            assert!(matches!(d.response, ResponseChoice::LlmWithReprompt(_)));
        }
    }

    #[test]
    fn test_confirmation_no_wipes_indicated_slots() {
        let org = org();
        let mut sm = StateMachine::new();
        sm.state = BookingState::Confirm;
        let mut slots = filled_slots(true, true, true);

        let mut e = event(Intent::ConfirmationNo, 0.9);
        e.entities.override_slots = vec![SlotKey::TimeWindow];

        let d = sm.dispatch(&e, &mut slots, &org);
        assert_eq!(d.state_after, BookingState::CollectService);
        assert!(!slots.is_set(SlotKey::TimeWindow));
        assert!(slots.is_set(SlotKey::Service));
        assert!(slots.is_set(SlotKey::Contact));
    }

    #[test]
    fn test_confirmation_no_with_replacement_keeps_new_value() {
        let org = org();
        let mut sm = StateMachine::new();
        sm.state = BookingState::Confirm;

        // Replacement already merged by the orchestrator this turn.
        let mut slots = filled_slots(true, true, true);
        let mut replace = EntityPatch {
            time_window: Some("Wednesday 4 PM".into()),
            ..Default::default()
        };
        replace.override_slots = vec![SlotKey::TimeWindow];
        slots.merge(&replace, 0.9, 4);

        let mut e = event(Intent::ConfirmationNo, 0.9);
        e.entities = replace;

        sm.dispatch(&e, &mut slots, &org);
        // Not wiped: the caller provided the new value in the same turn.
        assert_eq!(slots.value(SlotKey::TimeWindow), Some("Wednesday 4 PM"));
    }

    #[test]
    fn test_silence_escalation() {
        let org = org();
        let mut sm = StateMachine::new();
        sm.state = BookingState::CollectService;

        assert_eq!(sm.note_silence(&org), SilenceOutcome::Nudge(1));
        assert_eq!(sm.note_silence(&org), SilenceOutcome::Nudge(2));
        assert_eq!(sm.silences(BookingState::CollectService), 2);
        match sm.note_silence(&org) {
            SilenceOutcome::Fallback(script) => assert!(script.contains("Goodbye")),
            other => panic!("expected fallback, got {other:?}"),
        }
        assert_eq!(sm.state(), BookingState::Fallback);
    }

    #[test]
    fn test_silence_counts_are_per_state() {
        let org = org();
        let mut sm = StateMachine::new();
        sm.state = BookingState::CollectService;
        sm.note_silence(&org);
        sm.note_silence(&org);

        sm.state = BookingState::CollectTimeWindow;
        assert_eq!(sm.note_silence(&org), SilenceOutcome::Nudge(1));
    }

    #[test]
    fn test_escalation_number_in_fallback_script() {
        let mut org = org();
        org.escalation_number = Some("+15559990000".into());
        let script = scripts::fallback(&org);
        assert!(script.contains("+15559990000"));
    }

    #[test]
    fn test_terminal_states_ignore_dispatch() {
        let org = org();
        let mut sm = StateMachine::new();
        sm.state = BookingState::Success;
        let mut slots = SlotStore::new();

        let d = sm.dispatch(&event(Intent::Booking, 0.9), &mut slots, &org);
        assert_eq!(d.state_after, BookingState::Success);
        assert!(d.action.is_none());
    }

    #[test]
    fn test_multi_entity_utterance_skips_states() {
        // Service and time in one breath: contact is the next ask.
        let org = org();
        let mut sm = StateMachine::new();
        let mut slots = filled_slots(true, true, false);

        let d = sm.dispatch(&event(Intent::Booking, 0.9), &mut slots, &org);
        assert_eq!(d.state_after, BookingState::CollectContact);

        // Everything at once goes straight to confirmation.
        let mut sm = StateMachine::new();
        let mut slots = filled_slots(true, true, true);
        let d = sm.dispatch(&event(Intent::Booking, 0.9), &mut slots, &org);
        assert_eq!(d.state_after, BookingState::Confirm);
        assert!(matches!(d.response, ResponseChoice::Script(_)));
    }

    #[test]
    fn test_readback_reflects_current_slots() {
        let org = org();
        let slots = filled_slots(true, true, true);
        let readback = scripts::confirm_readback(&org, &slots);
        assert!(readback.contains("Haircut"));
        assert!(readback.contains("Tuesday 3 PM"));
        assert!(readback.contains("Jane, 555-0100"));
    }
}

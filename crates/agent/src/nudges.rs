//! Silence nudges
//!
//! What the agent says when the caller goes quiet. Phrasings rotate per
//! context so a caller who stalls twice doesn't hear the same sentence
//! twice; the context is derived from how much of the booking has been
//! collected.

use frontdesk_core::{SlotKey, SlotStore};

/// How far along the booking is when silence hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NudgeContext {
    NoSlots,
    ServiceOnly,
    ServiceAndTime,
    AllSlots,
}

const NO_SLOTS: &[&str] = &[
    "Are you still there? What can I help you schedule today?",
    "I'm still here. Were you looking to book an appointment?",
    "Take your time. Just let me know what you'd like to book.",
];

const SERVICE_ONLY: &[&str] = &[
    "Still with me? What day and time would work for you?",
    "Whenever you're ready, just tell me a day and time that suits you.",
    "No rush. Did you have a day in mind for your appointment?",
    "Are you there? I just need a day and time to keep going.",
];

const SERVICE_AND_TIME: &[&str] = &[
    "Are you still there? I just need a name and phone number to hold that time.",
    "Whenever you're ready, a name and number is all I need to finish up.",
    "Still with me? Just your name and a callback number and we're nearly done.",
];

const ALL_SLOTS: &[&str] = &[
    "Are you still there? Should I go ahead and book that for you?",
    "Just say yes and I'll lock that appointment in.",
    "Still with me? I have everything I need — shall I book it?",
];

/// Derive the nudge context from the slot store.
pub fn context_for(slots: &SlotStore) -> NudgeContext {
    match (
        slots.is_set(SlotKey::Service),
        slots.is_set(SlotKey::TimeWindow),
        slots.is_set(SlotKey::Contact),
    ) {
        (true, true, true) => NudgeContext::AllSlots,
        (true, true, false) => NudgeContext::ServiceAndTime,
        (true, false, _) => NudgeContext::ServiceOnly,
        _ => NudgeContext::NoSlots,
    }
}

/// Pick a nudge for the given silence ordinal (1-based); rotation is
/// deterministic per context.
pub fn nudge_for(slots: &SlotStore, count: u32) -> &'static str {
    let set = match context_for(slots) {
        NudgeContext::NoSlots => NO_SLOTS,
        NudgeContext::ServiceOnly => SERVICE_ONLY,
        NudgeContext::ServiceAndTime => SERVICE_AND_TIME,
        NudgeContext::AllSlots => ALL_SLOTS,
    };
    set[count.saturating_sub(1) as usize % set.len()]
}

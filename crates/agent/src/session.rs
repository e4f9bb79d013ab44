//! Session state
//!
//! One `Session` per active call, owned exclusively by the session task.
//! All the flags that used to be easy to scatter — recognizer readiness,
//! stream start, greeting emission, turn-in-flight — live in one record
//! and are mutated in exactly one place.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

use frontdesk_core::{OrganizationContext, SlotStore};
use frontdesk_llm::HistoryEntry;

use crate::fsm::StateMachine;

/// Bounded conversation history length.
const MAX_HISTORY: usize = 20;

/// Lifecycle flags, mutated only by the session task.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionFlags {
    /// Recognizer socket is open and flushing audio.
    pub stt_ready: bool,
    /// The media stream's `start` frame arrived.
    pub stream_started: bool,
    /// The greeting was spoken; it is never spoken twice.
    pub greeting_sent: bool,
    /// A turn is in flight; at most one per session.
    pub processing_turn: bool,
}

/// One entry of conversation history.
#[derive(Debug, Clone)]
pub struct HistoryTurn {
    /// "user" or "agent".
    pub role: &'static str,
    pub text: String,
    pub ts: DateTime<Utc>,
}

/// Per-call mutable state.
pub struct Session {
    pub session_id: String,
    pub call_sid: Option<String>,
    pub called_number: Option<String>,
    pub caller_number: Option<String>,
    pub stream_sid: Option<String>,
    pub org: OrganizationContext,
    pub slots: SlotStore,
    pub machine: StateMachine,
    pub turn_index: u32,
    pub flags: SessionFlags,
    history: VecDeque<HistoryTurn>,
    pub started_at: DateTime<Utc>,
}

/// Barge-in debouncer, owned by the session task alongside the session.
///
/// The recognizer double-fires speech-start around real interruptions; two
/// barge-ins inside the window produce exactly one interrupt.
#[derive(Debug, Default)]
pub struct BargeGate {
    last: Option<Instant>,
}

impl BargeGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when this barge-in should interrupt synthesis.
    pub fn fire(&mut self, now: Instant, debounce: Duration) -> bool {
        let fire = self
            .last
            .map_or(true, |last| now.duration_since(last) >= debounce);
        if fire {
            self.last = Some(now);
        }
        fire
    }
}

impl Session {
    /// Create a session with the default organization context; the real
    /// context is swapped in when the stream's dialed number is known.
    pub fn new() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            call_sid: None,
            called_number: None,
            caller_number: None,
            stream_sid: None,
            org: OrganizationContext::default_for(""),
            slots: SlotStore::new(),
            machine: StateMachine::new(),
            turn_index: 0,
            flags: SessionFlags::default(),
            history: VecDeque::with_capacity(MAX_HISTORY),
            started_at: Utc::now(),
        }
    }

    /// Append to bounded history, discarding the oldest entry on overflow.
    pub fn push_history(&mut self, role: &'static str, text: impl Into<String>) {
        if self.history.len() >= MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(HistoryTurn {
            role,
            text: text.into(),
            ts: Utc::now(),
        });
    }

    /// Recent history for the extraction prompt.
    pub fn recent_history(&self) -> Vec<HistoryEntry> {
        self.history
            .iter()
            .map(|t| HistoryEntry {
                role: t.role.to_string(),
                text: t.text.clone(),
            })
            .collect()
    }

    /// Greeting gate: the stream is up, the recognizer is ready, and the
    /// greeting has not been spoken yet.
    pub fn ready_to_greet(&self) -> bool {
        self.flags.stt_ready
            && self.flags.stream_started
            && self.stream_sid.is_some()
            && !self.flags.greeting_sent
    }

    /// Human-readable hours summary for the extraction prompt.
    pub fn hours_summary(&self) -> String {
        use frontdesk_core::Weekday::*;
        let days = &self.org.business_hours.days;
        if days.is_empty() {
            return "not specified".to_string();
        }
        let order = [
            (Monday, "Mon"),
            (Tuesday, "Tue"),
            (Wednesday, "Wed"),
            (Thursday, "Thu"),
            (Friday, "Fri"),
            (Saturday, "Sat"),
            (Sunday, "Sun"),
        ];
        order
            .iter()
            .filter_map(|(day, label)| {
                days.get(day).filter(|h| h.enabled).map(|h| {
                    format!("{label} {}-{}", h.start, h.end)
                })
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

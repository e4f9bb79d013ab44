//! Turn and call records
//!
//! Append-only records emitted to the event sink: one per completed turn,
//! plus a final call update when the session ends. Emission is best-effort
//! and never blocks the voice path.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::slots::SlotKey;

/// Record of one completed turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub session_id: String,
    pub turn_index: u32,
    pub user_text: String,
    pub agent_text: String,
    pub intent: String,
    pub confidence: f32,
    pub state_before: String,
    pub state_after: String,
    /// End of utterance to final transcript, per stage.
    pub asr_ms: u64,
    pub llm_ms: u64,
    pub tts_ms: u64,
    pub total_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub ts: DateTime<Utc>,
}

/// Terminal status of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    InProgress,
    Completed,
    CallbackScheduled,
    Fallback,
    Failed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::InProgress => "in_progress",
            CallStatus::Completed => "completed",
            CallStatus::CallbackScheduled => "callback_scheduled",
            CallStatus::Fallback => "fallback",
            CallStatus::Failed => "failed",
        }
    }
}

/// Final state of a call, emitted once at session end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallUpdate {
    pub session_id: String,
    pub status: CallStatus,
    pub ended_at: DateTime<Utc>,
    pub final_slots: BTreeMap<SlotKey, String>,
    pub turn_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_record_serde_roundtrip() {
        let record = TurnRecord {
            session_id: "s-1".into(),
            turn_index: 3,
            user_text: "Tuesday at 3".into(),
            agent_text: "Got it.".into(),
            intent: "time_provided".into(),
            confidence: 0.92,
            state_before: "collect_time_window".into(),
            state_after: "collect_contact".into(),
            asr_ms: 120,
            llm_ms: 640,
            tts_ms: 310,
            total_ms: 1080,
            error: None,
            ts: Utc::now(),
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("\"error\""));
        let back: TurnRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.turn_index, 3);
        assert_eq!(back.intent, "time_provided");
    }

    #[test]
    fn test_call_status_names() {
        assert_eq!(CallStatus::Fallback.as_str(), "fallback");
        let json = serde_json::to_string(&CallStatus::CallbackScheduled).unwrap();
        assert_eq!(json, "\"callback_scheduled\"");
    }
}

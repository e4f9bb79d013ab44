//! Slot store
//!
//! Booking data accumulates across turns in a small keyed store. Writes are
//! monotonic: once a slot holds a value, later turns cannot silently change
//! it. The extractor must mark a slot for replacement explicitly, which is
//! how "actually, make that Wednesday" works without letting a noisy
//! transcription clobber confirmed data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Booking slot keys, in canonical collection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKey {
    Service,
    TimeWindow,
    Contact,
    Location,
    Notes,
}

impl SlotKey {
    /// The three slots required before confirmation, in the order they are
    /// collected.
    pub const REQUIRED: [SlotKey; 3] = [SlotKey::Service, SlotKey::TimeWindow, SlotKey::Contact];

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotKey::Service => "service",
            SlotKey::TimeWindow => "time_window",
            SlotKey::Contact => "contact",
            SlotKey::Location => "location",
            SlotKey::Notes => "notes",
        }
    }
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A filled slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotValue {
    pub value: String,
    pub confidence: f32,
    /// Turn index that wrote this value.
    pub turn: u32,
}

/// Entity patch produced by the extractor for one turn.
///
/// `override_slots` lists the keys the caller explicitly asked to change;
/// only those may replace an existing value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityPatch {
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub time_window: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub override_slots: Vec<SlotKey>,
}

impl EntityPatch {
    /// Iterate the non-empty entities in this patch.
    pub fn entries(&self) -> impl Iterator<Item = (SlotKey, &str)> {
        [
            (SlotKey::Service, self.service.as_deref()),
            (SlotKey::TimeWindow, self.time_window.as_deref()),
            (SlotKey::Contact, self.contact.as_deref()),
            (SlotKey::Location, self.location.as_deref()),
            (SlotKey::Notes, self.notes.as_deref()),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
        .filter(|(_, v)| !v.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }

    pub fn allows_override(&self, key: SlotKey) -> bool {
        self.override_slots.contains(&key)
    }
}

/// The per-session slot store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlotStore {
    slots: BTreeMap<SlotKey, SlotValue>,
}

impl SlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one turn's entities, honoring the monotonic-write rule.
    ///
    /// Returns the keys actually written, for the turn record.
    pub fn merge(&mut self, patch: &EntityPatch, confidence: f32, turn: u32) -> Vec<SlotKey> {
        let mut written = Vec::new();
        for (key, value) in patch.entries() {
            let occupied = self.slots.contains_key(&key);
            if occupied && !patch.allows_override(key) {
                tracing::debug!(slot = %key, "slot already set, ignoring non-override write");
                continue;
            }
            self.slots.insert(
                key,
                SlotValue {
                    value: value.trim().to_string(),
                    confidence,
                    turn,
                },
            );
            written.push(key);
        }
        written
    }

    pub fn get(&self, key: SlotKey) -> Option<&SlotValue> {
        self.slots.get(&key)
    }

    pub fn value(&self, key: SlotKey) -> Option<&str> {
        self.slots.get(&key).map(|s| s.value.as_str())
    }

    pub fn is_set(&self, key: SlotKey) -> bool {
        self.slots.contains_key(&key)
    }

    /// Remove the given slots (confirmation-rejected path).
    pub fn clear(&mut self, keys: &[SlotKey]) {
        for key in keys {
            self.slots.remove(key);
        }
    }

    /// First required slot not yet filled, in canonical order.
    pub fn first_missing(&self) -> Option<SlotKey> {
        SlotKey::REQUIRED.iter().copied().find(|k| !self.is_set(*k))
    }

    /// True when every required slot is filled.
    pub fn has_all_required(&self) -> bool {
        self.first_missing().is_none()
    }

    /// Snapshot of filled slots for records and prompts.
    pub fn snapshot(&self) -> BTreeMap<SlotKey, String> {
        self.slots
            .iter()
            .map(|(k, v)| (*k, v.value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(service: Option<&str>, time: Option<&str>) -> EntityPatch {
        EntityPatch {
            service: service.map(String::from),
            time_window: time.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_fills_empty_slots() {
        let mut store = SlotStore::new();
        let written = store.merge(&patch(Some("haircut"), Some("Tuesday 3 PM")), 0.9, 1);
        assert_eq!(written, vec![SlotKey::Service, SlotKey::TimeWindow]);
        assert_eq!(store.value(SlotKey::Service), Some("haircut"));
    }

    #[test]
    fn test_merge_is_monotonic() {
        let mut store = SlotStore::new();
        store.merge(&patch(Some("haircut"), None), 0.9, 1);
        let written = store.merge(&patch(Some("massage"), None), 0.9, 2);
        assert!(written.is_empty());
        assert_eq!(store.value(SlotKey::Service), Some("haircut"));
    }

    #[test]
    fn test_explicit_override_replaces() {
        let mut store = SlotStore::new();
        store.merge(&patch(Some("haircut"), None), 0.9, 1);

        let mut p = patch(Some("massage"), None);
        p.override_slots.push(SlotKey::Service);
        let written = store.merge(&p, 0.8, 2);

        assert_eq!(written, vec![SlotKey::Service]);
        assert_eq!(store.value(SlotKey::Service), Some("massage"));
        assert_eq!(store.get(SlotKey::Service).unwrap().turn, 2);
    }

    #[test]
    fn test_blank_entities_ignored() {
        let mut store = SlotStore::new();
        let written = store.merge(&patch(Some("   "), None), 0.9, 1);
        assert!(written.is_empty());
        assert!(!store.is_set(SlotKey::Service));
    }

    #[test]
    fn test_first_missing_canonical_order() {
        let mut store = SlotStore::new();
        assert_eq!(store.first_missing(), Some(SlotKey::Service));

        store.merge(&patch(Some("haircut"), None), 0.9, 1);
        assert_eq!(store.first_missing(), Some(SlotKey::TimeWindow));

        store.merge(&patch(None, Some("Tuesday 3 PM")), 0.9, 2);
        assert_eq!(store.first_missing(), Some(SlotKey::Contact));

        store.merge(
            &EntityPatch {
                contact: Some("Jane, 555-0100".to_string()),
                ..Default::default()
            },
            0.9,
            3,
        );
        assert!(store.has_all_required());
    }

    #[test]
    fn test_clear() {
        let mut store = SlotStore::new();
        store.merge(&patch(Some("haircut"), Some("Tuesday")), 0.9, 1);
        store.clear(&[SlotKey::Service]);
        assert!(!store.is_set(SlotKey::Service));
        assert!(store.is_set(SlotKey::TimeWindow));
    }
}

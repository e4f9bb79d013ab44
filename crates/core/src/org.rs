//! Organization context
//!
//! Read-only per-call configuration resolved from the dialed number at
//! session start: greeting and fallback scripts, bookable services,
//! business hours, voice settings, and conversation rules.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Day of week for business hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

/// Opening hours for one day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayHours {
    /// Opening time, "HH:MM".
    pub start: String,
    /// Closing time, "HH:MM".
    pub end: String,
    /// Whether the business is open at all this day.
    pub enabled: bool,
}

/// Weekly business hours with timezone and holiday exclusions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusinessHours {
    #[serde(default)]
    pub days: HashMap<Weekday, DayHours>,
    /// IANA timezone name, e.g. "America/New_York".
    #[serde(default)]
    pub timezone: String,
    /// ISO dates the business is closed.
    #[serde(default)]
    pub holidays: Vec<String>,
}

/// A bookable service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub duration_minutes: u32,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Voice settings for synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub voice_id: String,
    pub speed: f32,
    pub pitch: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            voice_id: "default".to_string(),
            speed: 1.0,
            pitch: 1.0,
        }
    }
}

/// Conversation and scheduling rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgRules {
    pub default_slot_minutes: u32,
    pub buffer_minutes: u32,
    pub allow_double_booking: bool,
    /// Per-state retry budget before falling back.
    pub max_retries: u32,
    /// Minimum extractor confidence for a transition.
    pub confirmation_threshold: f32,
}

impl Default for OrgRules {
    fn default() -> Self {
        Self {
            default_slot_minutes: 30,
            buffer_minutes: 0,
            allow_double_booking: false,
            max_retries: 3,
            confirmation_threshold: 0.5,
        }
    }
}

/// Status of a calendar/CRM integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    Connected,
    Disconnected,
    Error,
}

/// A configured external integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Integration {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: IntegrationStatus,
}

/// Per-organization context, resolved once per call and read-only after.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationContext {
    pub id: String,
    pub display_name: String,
    /// E.164 number this context is keyed by.
    pub dialed_number: String,
    /// Opening line spoken when the call connects.
    pub greeting: String,
    /// Line spoken when a turn fails and no better script applies.
    pub fallback: String,
    /// Optional per-state script overrides, keyed by state name.
    #[serde(default)]
    pub scripts: HashMap<String, String>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub business_hours: BusinessHours,
    #[serde(default)]
    pub voice: VoiceSettings,
    #[serde(default)]
    pub rules: OrgRules,
    /// Number to hand the caller on escalation, if any.
    #[serde(default)]
    pub escalation_number: Option<String>,
    #[serde(default)]
    pub integrations: Vec<Integration>,
}

impl OrganizationContext {
    /// Generic context for numbers with no mapping: empty services, a
    /// neutral greeting, and default rules. The call still proceeds.
    pub fn default_for(dialed_number: &str) -> Self {
        Self {
            id: "default".to_string(),
            display_name: "this office".to_string(),
            dialed_number: dialed_number.to_string(),
            greeting: "Thank you for calling. How can I help you today?".to_string(),
            fallback: "I'm sorry, I didn't catch that. Could you say it again?".to_string(),
            scripts: HashMap::new(),
            services: Vec::new(),
            business_hours: BusinessHours::default(),
            voice: VoiceSettings::default(),
            rules: OrgRules::default(),
            escalation_number: None,
            integrations: Vec::new(),
        }
    }

    /// Active services only.
    pub fn active_services(&self) -> impl Iterator<Item = &Service> {
        self.services.iter().filter(|s| s.active)
    }

    /// Case-insensitive match of a caller-provided service name against the
    /// active service list.
    pub fn find_service(&self, name: &str) -> Option<&Service> {
        let needle = name.trim().to_lowercase();
        self.active_services()
            .find(|s| s.name.to_lowercase() == needle)
    }

    /// Script override for a state, if one is configured.
    pub fn script_for(&self, state: &str) -> Option<&str> {
        self.scripts.get(state).map(String::as_str)
    }

    /// Whether a connected integration of the given kind exists.
    pub fn has_integration(&self, kind: &str) -> bool {
        self.integrations
            .iter()
            .any(|i| i.kind == kind && i.status == IntegrationStatus::Connected)
    }
}

//! Extraction contract
//!
//! The strict shape the model must return for every turn, and the
//! validation that enforces it. Malformed output never reaches the state
//! machine: it is coerced to `unclear` with zero confidence, which the
//! dialogue treats as a retry in the current state.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use frontdesk_core::EntityPatch;

/// Turn intents the state machine dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Booking,
    ServiceProvided,
    TimeProvided,
    ContactProvided,
    ConfirmationYes,
    ConfirmationNo,
    Digression,
    /// Catch-all; also the coercion target for unknown intents.
    Unclear,
}

impl<'de> Deserialize<'de> for Intent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Intent::parse(&raw))
    }
}

impl Intent {
    /// Parse an intent name; anything unrecognized coerces to `Unclear`.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "booking" => Intent::Booking,
            "service_provided" => Intent::ServiceProvided,
            "time_provided" => Intent::TimeProvided,
            "contact_provided" => Intent::ContactProvided,
            "confirmation_yes" => Intent::ConfirmationYes,
            "confirmation_no" => Intent::ConfirmationNo,
            "digression" => Intent::Digression,
            "unclear" => Intent::Unclear,
            other => {
                tracing::debug!(intent = other, "unknown intent, coercing to unclear");
                Intent::Unclear
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Booking => "booking",
            Intent::ServiceProvided => "service_provided",
            Intent::TimeProvided => "time_provided",
            Intent::ContactProvided => "contact_provided",
            Intent::ConfirmationYes => "confirmation_yes",
            Intent::ConfirmationNo => "confirmation_no",
            Intent::Digression => "digression",
            Intent::Unclear => "unclear",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry of recent conversation history sent to the model.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub role: String,
    pub text: String,
}

/// Everything the model sees for one turn.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub transcript: String,
    /// Current state name, e.g. "collect_time_window".
    pub state: String,
    /// Filled slots as name/value pairs.
    pub slots: Vec<(String, String)>,
    pub recent_history: Vec<HistoryEntry>,
    /// Active service names the caller can book.
    pub services: Vec<String>,
    /// Human-readable hours summary for the prompt.
    pub business_hours: String,
    pub timezone: String,
}

/// Validated model output for one turn.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnInference {
    pub intent: Intent,
    pub confidence: f32,
    #[serde(default)]
    pub entities: EntityPatch,
    #[serde(default)]
    pub response: String,
}

impl TurnInference {
    /// The coercion target for anything the model got wrong.
    pub fn unclear() -> Self {
        Self {
            intent: Intent::Unclear,
            confidence: 0.0,
            entities: EntityPatch::default(),
            response: String::new(),
        }
    }
}

/// Output schema the model must satisfy.
static OUTPUT_SCHEMA: Lazy<jsonschema::JSONSchema> = Lazy::new(|| {
    let schema = serde_json::json!({
        "type": "object",
        "required": ["intent", "confidence", "response"],
        "properties": {
            "intent": { "type": "string" },
            "confidence": { "type": "number" },
            "entities": {
                "type": "object",
                "properties": {
                    "service": { "type": ["string", "null"] },
                    "time_window": { "type": ["string", "null"] },
                    "contact": { "type": ["string", "null"] },
                    "location": { "type": ["string", "null"] },
                    "notes": { "type": ["string", "null"] },
                    "override_slots": {
                        "type": "array",
                        "items": { "type": "string" }
                    }
                },
                "additionalProperties": false
            },
            "response": { "type": "string" }
        },
        "additionalProperties": false
    });
    jsonschema::JSONSchema::compile(&schema).expect("static schema compiles")
});

/// Parse and validate raw model output.
///
/// Any failure — unparseable JSON, schema violation, out-of-range
/// confidence — coerces to [`TurnInference::unclear`]. Unknown intent
/// strings deserialize to `Unclear` via serde. Confidence is clamped to
/// [0, 1].
pub fn parse_inference(raw: &str) -> TurnInference {
    let trimmed = strip_fences(raw);

    let value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "extractor returned unparseable JSON");
            return TurnInference::unclear();
        }
    };

    if !OUTPUT_SCHEMA.is_valid(&value) {
        tracing::warn!("extractor output failed schema validation");
        return TurnInference::unclear();
    }

    match serde_json::from_value::<TurnInference>(value) {
        Ok(mut inference) => {
            inference.confidence = inference.confidence.clamp(0.0, 1.0);
            inference
        }
        Err(e) => {
            tracing::warn!(error = %e, "extractor output failed deserialization");
            TurnInference::unclear()
        }
    }
}

/// Models sometimes wrap JSON in markdown fences despite instructions.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_output() {
        let raw = r#"{
            "intent": "service_provided",
            "confidence": 0.93,
            "entities": { "service": "haircut" },
            "response": "Great, when would you like to come in?"
        }"#;

        let inference = parse_inference(raw);
        assert_eq!(inference.intent, Intent::ServiceProvided);
        assert_eq!(inference.confidence, 0.93);
        assert_eq!(inference.entities.service.as_deref(), Some("haircut"));
    }

    #[test]
    fn test_malformed_json_coerces_to_unclear() {
        let inference = parse_inference("I think the user wants a haircut");
        assert_eq!(inference.intent, Intent::Unclear);
        assert_eq!(inference.confidence, 0.0);
        assert!(inference.entities.is_empty());
    }

    #[test]
    fn test_unknown_intent_coerces_to_unclear() {
        let raw = r#"{"intent": "order_pizza", "confidence": 0.8, "response": "Sure."}"#;
        let inference = parse_inference(raw);
        assert_eq!(inference.intent, Intent::Unclear);
        // Valid shape otherwise: confidence survives.
        assert_eq!(inference.confidence, 0.8);
    }

    #[test]
    fn test_missing_required_field_coerces() {
        let raw = r#"{"intent": "booking", "response": "Sure."}"#;
        let inference = parse_inference(raw);
        assert_eq!(inference.intent, Intent::Unclear);
        assert_eq!(inference.confidence, 0.0);
    }

    #[test]
    fn test_unexpected_field_coerces() {
        let raw = r#"{"intent": "booking", "confidence": 0.9, "response": "ok", "reasoning": "..."}"#;
        let inference = parse_inference(raw);
        assert_eq!(inference.intent, Intent::Unclear);
    }

    #[test]
    fn test_confidence_clamped() {
        let raw = r#"{"intent": "booking", "confidence": 1.4, "response": "ok"}"#;
        assert_eq!(parse_inference(raw).confidence, 1.0);

        let raw = r#"{"intent": "booking", "confidence": -0.2, "response": "ok"}"#;
        assert_eq!(parse_inference(raw).confidence, 0.0);
    }

    #[test]
    fn test_fenced_output_accepted() {
        let raw = "```json\n{\"intent\": \"booking\", \"confidence\": 0.7, \"response\": \"ok\"}\n```";
        let inference = parse_inference(raw);
        assert_eq!(inference.intent, Intent::Booking);
    }

    #[test]
    fn test_override_slots_deserialize() {
        let raw = r#"{
            "intent": "service_provided",
            "confidence": 0.9,
            "entities": { "service": "massage", "override_slots": ["service"] },
            "response": "Changing that to a massage."
        }"#;
        let inference = parse_inference(raw);
        assert!(inference
            .entities
            .allows_override(frontdesk_core::SlotKey::Service));
    }

    #[test]
    fn test_intent_names() {
        assert_eq!(Intent::ConfirmationYes.as_str(), "confirmation_yes");
        assert_eq!(Intent::Unclear.to_string(), "unclear");
    }
}

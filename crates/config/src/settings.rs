//! Application settings
//!
//! One `Settings` struct for the whole process, layered from an optional
//! TOML file and FRONTDESK_-prefixed environment variables. Vendor
//! credentials are opaque strings; every conversation timer from the
//! dialogue design is overridable here.

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// HTTP/WebSocket server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Externally reachable hostname used in the webhook's stream URL.
    pub public_host: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            public_host: "localhost:8080".to_string(),
        }
    }
}

/// Streaming recognizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AsrSettings {
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    pub language: String,
}

impl Default for AsrSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: "wss://api.deepgram.com/v1/listen".to_string(),
            model: "nova-2-phonecall".to_string(),
            language: "en-US".to_string(),
        }
    }
}

/// Speech synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsSettings {
    pub api_key: String,
    pub endpoint: String,
    /// Voice used when the organization has no voice configured.
    pub default_voice: String,
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: "https://api.elevenlabs.io/v1".to_string(),
            default_voice: "rachel".to_string(),
        }
    }
}

/// Extractor endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    pub timeout_ms: u64,
    /// Single retry with fixed backoff on transient failures.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_ms: 8000,
            max_retries: 1,
            retry_backoff_ms: 500,
        }
    }
}

/// Conversation timer durations, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    /// Quiescence after the last final transcript before a turn flushes.
    pub turn_buffer_ms: u64,
    /// Window within which a new final appends to the buffered turn.
    pub continuation_window_ms: u64,
    /// Silence before a nudge is spoken.
    pub silence_ms: u64,
    /// Total inactivity before the call is closed with a farewell.
    pub conversation_ms: u64,
    /// Deadline for the greeting after stream start.
    pub fallback_greeting_ms: u64,
    /// Audio drain grace after a terminal state.
    pub close_grace_ms: u64,
    /// Debounce between barge-in interrupts.
    pub barge_in_debounce_ms: u64,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            turn_buffer_ms: 1500,
            continuation_window_ms: 2000,
            silence_ms: 12_000,
            conversation_ms: 30_000,
            fallback_greeting_ms: 3000,
            close_grace_ms: 5000,
            barge_in_debounce_ms: 300,
        }
    }
}

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub asr: AsrSettings,
    #[serde(default)]
    pub tts: TtsSettings,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub timers: TimerSettings,
    /// Organization used when the dialed number has no mapping.
    #[serde(default)]
    pub default_org_id: String,
    /// Tracing filter, e.g. "info" or "frontdesk=debug".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory of per-organization TOML files for the static provider.
    #[serde(default)]
    pub orgs_path: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            asr: AsrSettings::default(),
            tts: TtsSettings::default(),
            llm: LlmSettings::default(),
            timers: TimerSettings::default(),
            default_org_id: String::new(),
            log_level: default_log_level(),
            orgs_path: None,
        }
    }
}

impl Settings {
    /// Validate cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "port must be non-zero".to_string(),
            });
        }
        if self.server.public_host.is_empty() {
            return Err(ConfigError::MissingField("server.public_host".to_string()));
        }
        if self.timers.turn_buffer_ms == 0 || self.timers.continuation_window_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timers".to_string(),
                message: "turn buffer and continuation window must be non-zero".to_string(),
            });
        }
        if self.timers.silence_ms >= self.timers.conversation_ms {
            return Err(ConfigError::InvalidValue {
                field: "timers.silence_ms".to_string(),
                message: "silence timer must be shorter than the conversation timer".to_string(),
            });
        }
        if self.llm.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "llm.timeout_ms".to_string(),
                message: "timeout must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Load settings from an optional file plus environment overrides.
///
/// `FRONTDESK_LLM__API_KEY=...` overrides `llm.api_key`, and so on.
pub fn load_settings(path: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        builder = builder.add_source(config::File::with_name(path).required(false));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("FRONTDESK")
            .separator("__")
            .try_parsing(true),
    );

    let settings: Settings = builder.build()?.try_deserialize()?;
    settings.validate()?;

    tracing::debug!(
        port = settings.server.port,
        asr_model = %settings.asr.model,
        llm_model = %settings.llm.model,
        "settings loaded"
    );

    Ok(settings)
}

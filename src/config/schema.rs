//! Session configuration schema.
//!
//! All structs use `#[serde(rename_all = "camelCase")]` so the settings JSON
//! uses camelCase keys while Rust code uses snake_case fields. Every field
//! has a default so a partial (or empty) settings document always
//! deserializes.

use serde::{Deserialize, Serialize};

/// Settings for one voice call.
///
/// Immutable for the lifetime of one negotiation; re-applying mid-call sends
/// a protocol update over the control channel rather than starting a new
/// session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// System instructions for the remote agent.
    #[serde(default = "default_instructions")]
    pub instructions: String,
    /// Voice identifier understood by the realtime endpoint.
    #[serde(default = "default_voice")]
    pub voice: String,
    /// Realtime model identifier. Also selects the pricing row.
    #[serde(default = "default_model")]
    pub model: String,
    /// Text the agent is asked to speak right after connecting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_greeting: Option<String>,
    /// Preferred capture device identifier. `None` selects the default input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub microphone_id: Option<String>,
}

fn default_instructions() -> String {
    "You are a friendly voice assistant. Keep responses short and conversational.".to_string()
}

fn default_voice() -> String {
    "verse".to_string()
}

fn default_model() -> String {
    "gpt-realtime-2025-08-28".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            instructions: default_instructions(),
            voice: default_voice(),
            model: default_model(),
            initial_greeting: None,
            microphone_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.voice, "verse");
        assert_eq!(cfg.model, "gpt-realtime-2025-08-28");
        assert!(cfg.initial_greeting.is_none());
        assert!(cfg.microphone_id.is_none());
    }

    #[test]
    fn test_empty_document_deserializes_to_defaults() {
        let cfg: SessionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, SessionConfig::default());
    }

    #[test]
    fn test_camel_case_keys() {
        let cfg: SessionConfig = serde_json::from_str(
            r#"{"instructions":"hi","voice":"alloy","model":"m","initialGreeting":"hello","microphoneId":"usb-mic"}"#,
        )
        .unwrap();
        assert_eq!(cfg.initial_greeting.as_deref(), Some("hello"));
        assert_eq!(cfg.microphone_id.as_deref(), Some("usb-mic"));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut cfg = SessionConfig::default();
        cfg.initial_greeting = Some("Hi there!".into());
        let json = serde_json::to_string(&cfg).unwrap();
        let parsed: SessionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cfg);
        assert!(json.contains("initialGreeting"));
    }
}

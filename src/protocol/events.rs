//! Control-channel event types.
//!
//! One JSON object per data-channel frame, discriminated by the `type`
//! field. Outbound events are what we send; inbound events are dispatched by
//! [`crate::protocol::handler`]. Event kinds we do not consume collapse into
//! [`ServerEvent::Unrecognized`] so new server events never break parsing.

use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::usage::UsageCounters;

/// Name of the function tool the remote agent calls to hang up.
pub const END_CALL_TOOL: &str = "end_call";

/// Transcription model requested for caller speech.
const INPUT_TRANSCRIPTION_MODEL: &str = "whisper-1";

// ---------------------------------------------------------------------------
// Outbound (client -> server)
// ---------------------------------------------------------------------------

/// Events sent over the control channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionUpdateBody },
    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponseCreateBody },
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionUpdateBody {
    pub instructions: String,
    pub voice: String,
    pub input_audio_transcription: TranscriptionSettings,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptionSettings {
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseCreateBody {
    pub modalities: Vec<String>,
    pub instructions: String,
}

impl ClientEvent {
    /// Build the `session.update` applying a [`SessionConfig`].
    ///
    /// Always advertises the `end_call` tool so the agent can hang up when
    /// the caller says goodbye.
    pub fn session_update(config: &SessionConfig) -> Self {
        ClientEvent::SessionUpdate {
            session: SessionUpdateBody {
                instructions: config.instructions.clone(),
                voice: config.voice.clone(),
                input_audio_transcription: TranscriptionSettings {
                    model: INPUT_TRANSCRIPTION_MODEL.to_string(),
                },
                tools: vec![ToolSpec {
                    kind: "function".to_string(),
                    name: END_CALL_TOOL.to_string(),
                    description: "End the conversation and disconnect the call. Use this when \
                                  the user says goodbye or asks to end the call."
                        .to_string(),
                }],
                tool_choice: "auto".to_string(),
            },
        }
    }

    /// Build the `response.create` requesting the initial spoken greeting.
    pub fn greeting_request(greeting: &str) -> Self {
        ClientEvent::ResponseCreate {
            response: ResponseCreateBody {
                modalities: vec!["audio".to_string(), "text".to_string()],
                instructions: format!("Greet the user warmly by saying: \"{}\"", greeting),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound (server -> client)
// ---------------------------------------------------------------------------

/// Events received over the control channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// The agent finished emitting arguments for a function call.
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallDone {
        #[serde(default)]
        name: String,
    },
    /// Finalized transcript of agent speech.
    #[serde(rename = "response.audio_transcript.done")]
    AssistantTranscriptDone {
        #[serde(default)]
        transcript: String,
    },
    /// A response completed; carries the per-response usage block.
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: ResponseDoneBody,
    },
    /// Finalized transcript of caller speech.
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    UserTranscriptCompleted {
        #[serde(default)]
        transcript: String,
    },
    /// Any event kind we do not consume.
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseDoneBody {
    #[serde(default)]
    pub usage: Option<UsageCounters>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_update_shape() {
        let cfg = SessionConfig::default();
        let json = serde_json::to_value(ClientEvent::session_update(&cfg)).unwrap();
        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["voice"], "verse");
        assert_eq!(json["session"]["tool_choice"], "auto");
        assert_eq!(json["session"]["input_audio_transcription"]["model"], "whisper-1");
        assert_eq!(json["session"]["tools"][0]["type"], "function");
        assert_eq!(json["session"]["tools"][0]["name"], "end_call");
    }

    #[test]
    fn test_greeting_request_shape() {
        let json = serde_json::to_value(ClientEvent::greeting_request("Hello!")).unwrap();
        assert_eq!(json["type"], "response.create");
        assert_eq!(json["response"]["modalities"][0], "audio");
        assert_eq!(json["response"]["modalities"][1], "text");
        assert!(json["response"]["instructions"].as_str().unwrap().contains("Hello!"));
    }

    #[test]
    fn test_parse_function_call_done() {
        let ev: ServerEvent = serde_json::from_str(
            r#"{"type":"response.function_call_arguments.done","name":"end_call","arguments":"{}"}"#,
        )
        .unwrap();
        assert!(matches!(ev, ServerEvent::FunctionCallDone { ref name } if name == END_CALL_TOOL));
    }

    #[test]
    fn test_parse_response_done_with_usage() {
        let ev: ServerEvent = serde_json::from_str(
            r#"{"type":"response.done","response":{"usage":{"total_tokens":90,"input_tokens":60,"output_tokens":30}}}"#,
        )
        .unwrap();
        match ev {
            ServerEvent::ResponseDone { response } => {
                let usage = response.usage.unwrap();
                assert_eq!(usage.total_tokens, 90);
                assert_eq!(usage.input_tokens, 60);
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_parse_response_done_without_usage() {
        let ev: ServerEvent =
            serde_json::from_str(r#"{"type":"response.done","response":{}}"#).unwrap();
        match ev {
            ServerEvent::ResponseDone { response } => assert!(response.usage.is_none()),
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_parse_transcripts() {
        let ev: ServerEvent = serde_json::from_str(
            r#"{"type":"response.audio_transcript.done","transcript":"Good morning!"}"#,
        )
        .unwrap();
        assert!(matches!(ev, ServerEvent::AssistantTranscriptDone { ref transcript } if transcript == "Good morning!"));

        let ev: ServerEvent = serde_json::from_str(
            r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"Hi."}"#,
        )
        .unwrap();
        assert!(matches!(ev, ServerEvent::UserTranscriptCompleted { ref transcript } if transcript == "Hi."));
    }

    #[test]
    fn test_unknown_event_kind_is_unrecognized() {
        let ev: ServerEvent =
            serde_json::from_str(r#"{"type":"response.audio.delta","delta":"AAAA"}"#).unwrap();
        assert!(matches!(ev, ServerEvent::Unrecognized));
    }

    #[test]
    fn test_malformed_frame_is_an_error() {
        assert!(serde_json::from_str::<ServerEvent>("{ not json").is_err());
        assert!(serde_json::from_str::<ServerEvent>(r#"{"no_type":true}"#).is_err());
    }
}

//! Inbound control-channel dispatch.
//!
//! One task per call consumes frames in arrival order, so usage merges are
//! applied exactly as the server emitted them. A frame that does not parse
//! is logged and dropped; it never stops the loop or touches the counters.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::protocol::events::{ServerEvent, END_CALL_TOOL};
use crate::session::controller::ActiveCall;
use crate::session::Role;
use crate::utils::helpers::truncate_string;

/// Consume the inbound frame stream until the channel or the call ends.
pub(crate) fn spawn_event_loop(
    call: Arc<ActiveCall>,
    mut inbound: mpsc::UnboundedReceiver<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = inbound.recv().await {
            handle_frame(&call, &frame).await;
            if call.is_closed() {
                break;
            }
        }
        debug!("Control channel event loop ended");
    })
}

/// Parse and dispatch one frame.
pub(crate) async fn handle_frame(call: &Arc<ActiveCall>, frame: &str) {
    let event = match serde_json::from_str::<ServerEvent>(frame) {
        Ok(event) => event,
        Err(e) => {
            warn!("Dropping malformed control frame ({}): {}", e, truncate_string(frame, 120));
            return;
        }
    };
    dispatch(call, event);
}

fn dispatch(call: &Arc<ActiveCall>, event: ServerEvent) {
    match event {
        ServerEvent::FunctionCallDone { name } if name == END_CALL_TOOL => {
            call.request_termination();
        }
        ServerEvent::FunctionCallDone { name } => {
            debug!("Ignoring function call '{}'", name);
        }
        ServerEvent::AssistantTranscriptDone { transcript } => {
            if !transcript.is_empty() {
                call.emit_transcript(Role::Assistant, transcript);
            }
        }
        ServerEvent::ResponseDone { response } => {
            if let Some(usage) = response.usage {
                call.merge_usage(&usage);
            }
            if call.termination_pending() {
                debug!("Response complete with termination pending; arming hangup");
                call.begin_silent_hangup();
            }
        }
        ServerEvent::UserTranscriptCompleted { transcript } => {
            if !transcript.is_empty() {
                call.emit_transcript(Role::User, transcript);
            }
        }
        ServerEvent::Unrecognized => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::controller::detached_call;
    use crate::session::SessionEvent;

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn test_end_call_arms_termination() {
        let (call, _rx) = detached_call("gpt-realtime-2025-08-28", 150.0);
        handle_frame(
            &call,
            r#"{"type":"response.function_call_arguments.done","name":"end_call"}"#,
        )
        .await;
        assert!(call.termination_pending());
    }

    #[tokio::test]
    async fn test_other_function_calls_ignored() {
        let (call, _rx) = detached_call("gpt-realtime-2025-08-28", 150.0);
        handle_frame(
            &call,
            r#"{"type":"response.function_call_arguments.done","name":"set_timer"}"#,
        )
        .await;
        assert!(!call.termination_pending());
    }

    #[tokio::test]
    async fn test_transcripts_emit_lines() {
        let (call, mut rx) = detached_call("gpt-realtime-2025-08-28", 150.0);
        handle_frame(
            &call,
            r#"{"type":"response.audio_transcript.done","transcript":"Hello there."}"#,
        )
        .await;
        handle_frame(
            &call,
            r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"Hi."}"#,
        )
        .await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            SessionEvent::Transcript { role: Role::Assistant, text, .. } if text == "Hello there."
        ));
        assert!(matches!(
            &events[1],
            SessionEvent::Transcript { role: Role::User, text, .. } if text == "Hi."
        ));
    }

    #[tokio::test]
    async fn test_empty_transcript_not_emitted() {
        let (call, mut rx) = detached_call("gpt-realtime-2025-08-28", 150.0);
        handle_frame(&call, r#"{"type":"response.audio_transcript.done","transcript":""}"#).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_response_done_merges_usage() {
        let (call, _rx) = detached_call("gpt-realtime-2025-08-28", 150.0);
        let frame = r#"{"type":"response.done","response":{"usage":{
            "total_tokens":120,"input_tokens":80,"output_tokens":40,
            "input_token_details":{"cached_tokens":16,"text_tokens":4,"audio_tokens":60},
            "output_token_details":{"text_tokens":10,"audio_tokens":30}}}}"#;
        handle_frame(&call, frame).await;
        handle_frame(&call, frame).await;

        let usage = call.usage();
        assert_eq!(usage.total_tokens, 240);
        assert_eq!(usage.input_tokens, 160);
        assert_eq!(usage.input_token_details.cached_tokens, 32);
        assert_eq!(usage.output_token_details.audio_tokens, 60);
    }

    #[tokio::test]
    async fn test_malformed_frames_dropped_without_corruption() {
        let (call, _rx) = detached_call("gpt-realtime-2025-08-28", 150.0);
        handle_frame(&call, "{ this is not json").await;
        handle_frame(&call, r#"{"no_type_field": 1}"#).await;
        handle_frame(&call, "").await;
        assert_eq!(call.usage(), Default::default());
        assert!(!call.termination_pending());
        assert!(!call.is_closed());
    }

    #[tokio::test]
    async fn test_unrecognized_kinds_ignored() {
        let (call, mut rx) = detached_call("gpt-realtime-2025-08-28", 150.0);
        handle_frame(&call, r#"{"type":"session.created","session":{}}"#).await;
        handle_frame(&call, r#"{"type":"response.audio.delta","delta":"AAAA"}"#).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_event_loop_processes_in_order() {
        let (call, _rx) = detached_call("gpt-realtime-2025-08-28", 150.0);
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_event_loop(call.clone(), rx);

        for n in [10u64, 20, 30] {
            let frame = format!(
                r#"{{"type":"response.done","response":{{"usage":{{"input_tokens":{}}}}}}}"#,
                n
            );
            tx.send(frame).unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        assert_eq!(call.usage().input_tokens, 60);
    }
}

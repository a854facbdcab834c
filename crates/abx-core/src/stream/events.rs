//! Typed events carried on the agent's output stream.

use serde::{Deserialize, Serialize};

/// One event from a streamed agent response.
///
/// Wire form is a JSON object tagged by `type`, e.g.
/// `{"type":"TEXT","content":"Hel"}`. Unknown payload fields are ignored so
/// newer agents can add fields without breaking older clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamEvent {
    /// Incremental assistant text.
    Text { content: String },
    /// Incremental reasoning text, streamed before the answer.
    Reasoning { content: String },
    /// The agent started a tool invocation.
    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_args: Option<serde_json::Value>,
    },
    /// Outcome of a previously announced tool invocation.
    #[serde(rename_all = "camelCase")]
    ToolResult {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    /// The agent entered a new work phase.
    #[serde(rename_all = "camelCase")]
    StepBegin {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_number: Option<u32>,
    },
    /// The current work phase ended.
    #[serde(rename_all = "camelCase")]
    StepEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_number: Option<u32>,
    },
    /// Fatal stream-level failure reported by the agent.
    Error { message: String },
    /// Terminal marker. Nothing follows.
    Done,
}

impl StreamEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_tagged_events() {
        let event: StreamEvent = serde_json::from_str(r#"{"type":"TEXT","content":"Hel"}"#).unwrap();
        assert_eq!(
            event,
            StreamEvent::Text {
                content: "Hel".to_string()
            }
        );

        let event: StreamEvent = serde_json::from_str(
            r#"{"type":"TOOL_CALL","toolName":"read_file","toolCallId":"c1","toolArgs":{"path":"x"}}"#,
        )
        .unwrap();
        match event {
            StreamEvent::ToolCall {
                tool_name,
                tool_call_id,
                tool_args,
            } => {
                assert_eq!(tool_name, "read_file");
                assert_eq!(tool_call_id.as_deref(), Some("c1"));
                assert_eq!(tool_args.unwrap()["path"], "x");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let event: StreamEvent =
            serde_json::from_str(r#"{"type":"DONE","finishReason":"stop"}"#).unwrap();
        assert_eq!(event, StreamEvent::Done);
        assert!(event.is_terminal());
    }

    #[test]
    fn optional_fields_may_be_absent() {
        let event: StreamEvent = serde_json::from_str(r#"{"type":"STEP_BEGIN"}"#).unwrap();
        assert_eq!(event, StreamEvent::StepBegin { step_number: None });

        let event: StreamEvent =
            serde_json::from_str(r#"{"type":"STEP_END","stepNumber":3}"#).unwrap();
        assert_eq!(
            event,
            StreamEvent::StepEnd {
                step_number: Some(3)
            }
        );

        let event: StreamEvent =
            serde_json::from_str(r#"{"type":"TOOL_RESULT","content":"ok"}"#).unwrap();
        assert_eq!(
            event,
            StreamEvent::ToolResult {
                tool_call_id: None,
                content: Some("ok".to_string())
            }
        );
    }
}

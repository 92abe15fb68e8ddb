//! Session-scoped topics and their typed payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The fixed set of topics subscribed for every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Thinking,
    Reasoning,
    ToolCall,
    ToolResult,
    Response,
    Error,
}

impl TopicKind {
    pub const ALL: [TopicKind; 6] = [
        TopicKind::Thinking,
        TopicKind::Reasoning,
        TopicKind::ToolCall,
        TopicKind::ToolResult,
        TopicKind::Response,
        TopicKind::Error,
    ];

    pub fn segment(&self) -> &'static str {
        match self {
            TopicKind::Thinking => "thinking",
            TopicKind::Reasoning => "reasoning",
            TopicKind::ToolCall => "tool-call",
            TopicKind::ToolResult => "tool-result",
            TopicKind::Response => "response",
            TopicKind::Error => "error",
        }
    }

    /// `/topic/{segment}/{session_id}`
    pub fn topic(&self, session_id: &str) -> String {
        format!("/topic/{}/{}", self.segment(), session_id)
    }
}

/// `{content, timestamp}` used by thinking, reasoning and response topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPayload {
    pub content: String,
    #[serde(default, deserialize_with = "crate::time::opt_epoch_millis::deserialize")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPayload {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
    #[serde(default, deserialize_with = "crate::time::opt_epoch_millis::deserialize")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultPayload {
    pub tool_name: String,
    #[serde(default)]
    pub result: Value,
    /// Execution time in milliseconds.
    #[serde(default)]
    pub duration: Option<u64>,
    /// Set when the tool failed; the call is then marked failed instead of completed.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, deserialize_with = "crate::time::opt_epoch_millis::deserialize")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    #[serde(default)]
    pub content: Option<String>,
}

/// Everything the realtime client reports to its owner, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Connected,
    /// The connection dropped; a reconnect is scheduled unless the client was torn down.
    Disconnected,
    Thinking(ContentPayload),
    Reasoning(ContentPayload),
    ToolCall(ToolCallPayload),
    ToolResult(ToolResultPayload),
    Response(ContentPayload),
    Error(ErrorPayload),
    /// The broker sent an ERROR frame; carries its `message` header. The connection is retried.
    BrokerError(String),
    /// Transport failure with best-effort diagnostic text.
    TransportError(String),
}

/// Decode a MESSAGE body received on a session topic.
pub fn decode_event(kind: TopicKind, body: &str) -> Result<RealtimeEvent, serde_json::Error> {
    Ok(match kind {
        TopicKind::Thinking => RealtimeEvent::Thinking(serde_json::from_str(body)?),
        TopicKind::Reasoning => RealtimeEvent::Reasoning(serde_json::from_str(body)?),
        TopicKind::ToolCall => RealtimeEvent::ToolCall(serde_json::from_str(body)?),
        TopicKind::ToolResult => RealtimeEvent::ToolResult(serde_json::from_str(body)?),
        TopicKind::Response => RealtimeEvent::Response(serde_json::from_str(body)?),
        TopicKind::Error => RealtimeEvent::Error(serde_json::from_str(body)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::from_epoch_millis;

    #[test]
    fn topic_names() {
        let names: Vec<String> = TopicKind::ALL.iter().map(|k| k.topic("s1")).collect();
        assert_eq!(
            names,
            vec![
                "/topic/thinking/s1",
                "/topic/reasoning/s1",
                "/topic/tool-call/s1",
                "/topic/tool-result/s1",
                "/topic/response/s1",
                "/topic/error/s1",
            ]
        );
    }

    #[test]
    fn decode_response() {
        let ev = decode_event(
            TopicKind::Response,
            r#"{"content":"Consider ETFs","timestamp":1700000000000}"#,
        )
        .unwrap();
        assert_eq!(
            ev,
            RealtimeEvent::Response(ContentPayload {
                content: "Consider ETFs".to_string(),
                timestamp: from_epoch_millis(1_700_000_000_000),
            })
        );
    }

    #[test]
    fn decode_thinking_without_timestamp() {
        // the backend sends {type, content} on the thinking topic
        let ev = decode_event(TopicKind::Thinking, r#"{"type":"thinking","content":"Planning"}"#)
            .unwrap();
        let RealtimeEvent::Thinking(p) = ev else {
            panic!("expected thinking");
        };
        assert_eq!(p.content, "Planning");
        assert!(p.timestamp.is_none());
    }

    #[test]
    fn decode_tool_events() {
        let call = decode_event(
            TopicKind::ToolCall,
            r#"{"toolName":"stockLookup","parameters":{"symbol":"AAPL"},"timestamp":1}"#,
        )
        .unwrap();
        let RealtimeEvent::ToolCall(call) = call else {
            panic!("expected tool call");
        };
        assert_eq!(call.tool_name, "stockLookup");
        assert_eq!(call.parameters.unwrap()["symbol"], "AAPL");

        let result = decode_event(
            TopicKind::ToolResult,
            r#"{"toolName":"stockLookup","result":"{\"price\":1}","duration":42,"timestamp":2}"#,
        )
        .unwrap();
        let RealtimeEvent::ToolResult(result) = result else {
            panic!("expected tool result");
        };
        assert_eq!(result.duration, Some(42));
        assert!(result.error.is_none());
    }

    #[test]
    fn decode_rejects_malformed_bodies() {
        assert!(decode_event(TopicKind::Response, "not json").is_err());
        assert!(decode_event(TopicKind::ToolCall, r#"{"parameters":{}}"#).is_err());
        assert!(decode_event(TopicKind::Reasoning, r#"{"content":"x","timestamp":"soon"}"#).is_err());
    }
}

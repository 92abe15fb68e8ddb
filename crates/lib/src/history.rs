//! Conversation history: message types and per-session persistence.
//!
//! Messages are appended in order and written through to storage on every change under
//! `messages:{sessionId}` as a JSON array of `{role, content, timestamp}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::storage::KeyValueStore;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// A failure shown in the conversation (request error, server error event).
    Error,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Error => "error",
        };
        f.write_str(s)
    }
}

/// A single message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(with = "crate::time::iso_millis")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: crate::time::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(Role::Error, content)
    }
}

/// Storage key for a session's messages.
pub fn messages_key(session_id: &str) -> String {
    format!("messages:{}", session_id)
}

/// Loads and saves a session's messages. Failures are logged, never returned.
#[derive(Clone)]
pub struct LocalMessageStore {
    store: Arc<dyn KeyValueStore>,
}

impl LocalMessageStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Stored messages for the session; empty when missing or undecodable.
    pub fn load(&self, session_id: &str) -> Vec<Message> {
        let key = messages_key(session_id);
        let raw = match self.store.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                log::debug!("no stored messages for session {}", session_id);
                return Vec::new();
            }
            Err(e) => {
                log::error!("error loading messages for session {}: {}", session_id, e);
                return Vec::new();
            }
        };
        match serde_json::from_str::<Vec<Message>>(&raw) {
            Ok(messages) => messages,
            Err(e) => {
                log::error!("error decoding stored messages for session {}: {}", session_id, e);
                Vec::new()
            }
        }
    }

    pub fn save(&self, session_id: &str, messages: &[Message]) {
        let json = match serde_json::to_string(messages) {
            Ok(json) => json,
            Err(e) => {
                log::error!("error encoding messages for session {}: {}", session_id, e);
                return;
            }
        };
        if let Err(e) = self.store.set(&messages_key(session_id), &json) {
            log::error!("error saving messages for session {}: {}", session_id, e);
        }
    }

    pub fn clear(&self, session_id: &str) {
        if let Err(e) = self.store.remove(&messages_key(session_id)) {
            log::error!("error clearing messages for session {}: {}", session_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::time::from_epoch_millis;

    fn store() -> (Arc<MemoryStore>, LocalMessageStore) {
        let kv = Arc::new(MemoryStore::new());
        (kv.clone(), LocalMessageStore::new(kv))
    }

    fn at(role: Role, content: &str, ms: i64) -> Message {
        Message {
            role,
            content: content.to_string(),
            timestamp: from_epoch_millis(ms).unwrap(),
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let (_, history) = store();
        let messages = vec![
            at(Role::User, "What stocks should I buy?", 1_700_000_000_001),
            at(Role::Assistant, "Consider diversified ETFs", 1_700_000_000_999),
            at(Role::Error, "Failed to get response. Please try again.", 1_700_000_001_500),
        ];
        history.save("session-123", &messages);
        assert_eq!(history.load("session-123"), messages);
    }

    #[test]
    fn fresh_messages_round_trip_to_the_millisecond() {
        let (_, history) = store();
        let messages = vec![Message::user("hi"), Message::assistant("hello")];
        history.save("s", &messages);
        let loaded = history.load("s");
        assert_eq!(loaded.len(), 2);
        for (a, b) in loaded.iter().zip(messages.iter()) {
            assert_eq!(a.timestamp.timestamp_millis(), b.timestamp.timestamp_millis());
            assert_eq!(a.content, b.content);
            assert_eq!(a.role, b.role);
        }
    }

    #[test]
    fn persisted_json_uses_iso_timestamps_and_lowercase_roles() {
        let (kv, history) = store();
        history.save("s", &[at(Role::Assistant, "ok", 1_700_000_000_000)]);
        let raw = kv.get("messages:s").unwrap().unwrap();
        assert_eq!(
            raw,
            r#"[{"role":"assistant","content":"ok","timestamp":"2023-11-14T22:13:20.000Z"}]"#
        );
    }

    #[test]
    fn missing_or_corrupt_history_loads_empty() {
        let (kv, history) = store();
        assert!(history.load("nobody").is_empty());
        kv.set("messages:broken", "{not json").unwrap();
        assert!(history.load("broken").is_empty());
        kv.set("messages:badrole", r#"[{"role":"system","content":"x","timestamp":0}]"#)
            .unwrap();
        assert!(history.load("badrole").is_empty());
    }

    #[test]
    fn sessions_do_not_interfere() {
        let (_, history) = store();
        history.save("a", &[Message::user("for a")]);
        history.save("b", &[Message::user("for b")]);
        history.clear("a");
        assert!(history.load("a").is_empty());
        assert_eq!(history.load("b")[0].content, "for b");
    }
}

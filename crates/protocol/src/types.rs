//! Core types shared across the protocol

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Error,
}

/// A research conflict surfaced by the backend. Read-only on the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ConflictWire")]
pub struct ConflictRecord {
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_resolution: Option<String>,
}

const UNTITLED_CONFLICT: &str = "Conflicting sources";

/// The backend emits conflicts either as bare strings or as loosely shaped
/// objects; anything else is kept as its JSON text.
#[derive(Deserialize)]
#[serde(untagged)]
enum ConflictWire {
    Text(String),
    Record {
        #[serde(default, alias = "description")]
        topic: Option<String>,
        #[serde(default)]
        source_1: Option<String>,
        #[serde(default)]
        source_2: Option<String>,
        #[serde(default, alias = "resolution")]
        suggested_resolution: Option<String>,
    },
    Other(Value),
}

impl From<ConflictWire> for ConflictRecord {
    fn from(wire: ConflictWire) -> Self {
        match wire {
            ConflictWire::Text(topic) => ConflictRecord {
                topic,
                suggested_resolution: None,
            },
            ConflictWire::Record {
                topic,
                source_1,
                source_2,
                suggested_resolution,
            } => {
                let topic = topic
                    .filter(|t| !t.trim().is_empty())
                    .or_else(|| match (source_1, source_2) {
                        (Some(a), Some(b)) => Some(format!("{a} vs {b}")),
                        _ => None,
                    })
                    .unwrap_or_else(|| UNTITLED_CONFLICT.to_string());
                ConflictRecord {
                    topic,
                    suggested_resolution,
                }
            }
            ConflictWire::Other(value) => ConflictRecord {
                topic: value.to_string(),
                suggested_resolution: None,
            },
        }
    }
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<ConflictRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            conflicts: Vec::new(),
            timestamp: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Error, content)
    }

    /// System message carrying a conflict list
    pub fn conflicts(content: impl Into<String>, conflicts: Vec<ConflictRecord>) -> Self {
        Self {
            conflicts,
            ..Self::system(content)
        }
    }
}

/// Summary of a session for list views
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    #[serde(alias = "session_id")]
    pub id: String,
    /// Derived company name; absent until research has started
    #[serde(default, alias = "company", skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, alias = "msg_count")]
    pub message_count: u64,
}

impl SessionSummary {
    /// Summary for a session that exists only on this client so far
    pub fn fresh(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: None,
            updated_at: None,
            message_count: 0,
        }
    }
}

/// Response body of a create-session call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedSession {
    #[serde(alias = "session_id")]
    pub id: String,
}

/// Progress of an in-flight generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub percent: u8,
    pub message: String,
}

impl Progress {
    /// Build from a raw wire percent, clamped to 0..=100
    pub fn clamped(percent: i64, message: impl Into<String>) -> Self {
        Self {
            percent: percent.clamp(0, 100) as u8,
            message: message.into(),
        }
    }
}

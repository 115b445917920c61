use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Who authored a message
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

// Represents a single message in a conversation.
// Assistant messages are only built once their stream reports `done`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    // The remote store calls this `reasoning_content`
    #[serde(default, alias = "reasoning_content", skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            reasoning: None,
        }
    }

    /// Builds an assistant reply. Empty reasoning is treated as absent.
    pub fn assistant(content: impl Into<String>, reasoning: impl Into<String>) -> Self {
        let reasoning = reasoning.into();
        Self {
            role: Role::Assistant,
            content: content.into(),
            reasoning: if reasoning.is_empty() { None } else { Some(reasoning) },
        }
    }
}

// A conversation thread as mirrored from the remote store
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            updated_at: Utc::now(),
            messages: Vec::new(),
        }
    }
}

// Entry of the bounded local history log
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct HistoryEntry {
    pub content: String,
    pub role: Role,
}

impl From<&Message> for HistoryEntry {
    fn from(message: &Message) -> Self {
        Self {
            content: message.content.clone(),
            role: message.role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_reads_reasoning_content_alias() {
        let raw = r#"{"role":"assistant","content":"Answer","reasoning_content":"Step 1"}"#;
        let message: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.reasoning.as_deref(), Some("Step 1"));
    }

    #[test]
    fn test_assistant_drops_empty_reasoning() {
        let message = Message::assistant("Hi", "");
        assert!(message.reasoning.is_none());
        let serialized = serde_json::to_string(&message).unwrap();
        assert!(!serialized.contains("reasoning"));
    }
}

//! Notification interface between the chat core and whatever presents it.

use crate::models::{Conversation, Message};
use crate::render::MarkupRenderer;
use crate::session::StreamStatus;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// Receives state changes. All methods default to no-ops so an observer only
/// implements what it renders.
pub trait ChatObserver: Send + Sync {
    fn on_status(&self, _conversation_id: &str, _status: StreamStatus) {}
    fn on_user_message(&self, _conversation_id: &str, _message: &Message) {}
    /// Cumulative assistant text so far
    fn on_content(&self, _conversation_id: &str, _content: &str) {}
    /// Cumulative reasoning text so far
    fn on_reasoning(&self, _conversation_id: &str, _reasoning: &str) {}
    fn on_message_completed(&self, _conversation_id: &str, _message: &Message) {}
    fn on_conversations_changed(&self, _conversations: &[Conversation], _current: Option<&str>) {}
    fn on_conversation_selected(&self, _conversation: &Conversation) {}
    /// A user-facing error message
    fn on_error(&self, _message: &str) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

/// Fan-out registry of observers, notified in subscription order.
#[derive(Default)]
pub struct Observers {
    entries: RwLock<Vec<(SubscriptionId, Arc<dyn ChatObserver>)>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn ChatObserver>) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        match self.entries.write() {
            Ok(mut entries) => entries.push((id, observer)),
            Err(poisoned) => poisoned.into_inner().push((id, observer)),
        }
        id
    }

    /// Returns false if the id was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    // Observers are called outside the lock so they may subscribe/unsubscribe.
    fn snapshot(&self) -> Vec<Arc<dyn ChatObserver>> {
        let entries = match self.entries.read() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.iter().map(|(_, o)| Arc::clone(o)).collect()
    }

    pub fn notify(&self, f: impl Fn(&dyn ChatObserver)) {
        for observer in self.snapshot() {
            f(observer.as_ref());
        }
    }
}

/// Serializable UI notification, the payload a front-end consumes.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum UiEvent {
    #[serde(rename_all = "camelCase")]
    StatusChanged { conversation_id: String, status: StreamStatus },
    #[serde(rename_all = "camelCase")]
    UserMessage { conversation_id: String, content: String },
    #[serde(rename_all = "camelCase")]
    AssistantContent { conversation_id: String, markup: String },
    #[serde(rename_all = "camelCase")]
    AssistantReasoning { conversation_id: String, markup: String },
    #[serde(rename_all = "camelCase")]
    AssistantFinished { conversation_id: String, message: Message },
    #[serde(rename_all = "camelCase")]
    ConversationsChanged { conversations: Vec<Conversation>, current: Option<String> },
    #[serde(rename_all = "camelCase")]
    ConversationSelected { conversation: Conversation },
    Error { message: String },
}

/// Forwards notifications as `UiEvent`s over a channel, rendering assistant
/// text to markup on the way.
pub struct ChannelObserver {
    sender: UnboundedSender<UiEvent>,
    renderer: Arc<dyn MarkupRenderer>,
}

impl ChannelObserver {
    pub fn new(sender: UnboundedSender<UiEvent>, renderer: Arc<dyn MarkupRenderer>) -> Self {
        Self { sender, renderer }
    }

    fn emit(&self, event: UiEvent) {
        if self.sender.send(event).is_err() {
            log::debug!("UI event receiver dropped, discarding event");
        }
    }
}

impl ChatObserver for ChannelObserver {
    fn on_status(&self, conversation_id: &str, status: StreamStatus) {
        self.emit(UiEvent::StatusChanged {
            conversation_id: conversation_id.to_string(),
            status,
        });
    }

    fn on_user_message(&self, conversation_id: &str, message: &Message) {
        self.emit(UiEvent::UserMessage {
            conversation_id: conversation_id.to_string(),
            content: message.content.clone(),
        });
    }

    fn on_content(&self, conversation_id: &str, content: &str) {
        self.emit(UiEvent::AssistantContent {
            conversation_id: conversation_id.to_string(),
            markup: self.renderer.render(content),
        });
    }

    fn on_reasoning(&self, conversation_id: &str, reasoning: &str) {
        self.emit(UiEvent::AssistantReasoning {
            conversation_id: conversation_id.to_string(),
            markup: self.renderer.render(reasoning),
        });
    }

    fn on_message_completed(&self, conversation_id: &str, message: &Message) {
        self.emit(UiEvent::AssistantFinished {
            conversation_id: conversation_id.to_string(),
            message: message.clone(),
        });
    }

    fn on_conversations_changed(&self, conversations: &[Conversation], current: Option<&str>) {
        self.emit(UiEvent::ConversationsChanged {
            conversations: conversations.to_vec(),
            current: current.map(str::to_string),
        });
    }

    fn on_conversation_selected(&self, conversation: &Conversation) {
        self.emit(UiEvent::ConversationSelected {
            conversation: conversation.clone(),
        });
    }

    fn on_error(&self, message: &str) {
        self.emit(UiEvent::Error {
            message: message.to_string(),
        });
    }
}

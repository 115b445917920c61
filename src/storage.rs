use crate::api::{derive_title, ChatBackend, DEFAULT_TITLE};
use crate::error::Result;
use crate::models::{Conversation, Message, Role};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Local mirror of the remote conversation store.
///
/// The cache is best-effort: `list` replaces it wholesale and `load` replaces
/// one entry, whichever completes last wins. Streamed messages are appended
/// locally only and reconcile on the next `list`/`load`.
pub struct ConversationStore {
    backend: Arc<dyn ChatBackend>,
    cache: DashMap<String, Conversation>,
    current: Mutex<Option<String>>,
}

impl ConversationStore {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            cache: DashMap::new(),
            current: Mutex::new(None),
        }
    }

    fn current_slot(&self) -> MutexGuard<'_, Option<String>> {
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Creates a conversation remotely and makes it current.
    pub async fn create(&self) -> Result<Conversation> {
        let conversation = self.backend.create_conversation().await?;
        self.cache.insert(conversation.id.clone(), conversation.clone());
        self.set_current(Some(conversation.id.clone()));
        log::info!("Conversation {} created and selected", conversation.id);
        Ok(conversation)
    }

    /// Fetches all conversations, most recently updated first, replacing the cache.
    pub async fn list(&self) -> Result<Vec<Conversation>> {
        let mut conversations = self.backend.list_conversations().await?;
        sort_most_recent_first(&mut conversations);

        self.cache.clear();
        for conversation in &conversations {
            self.cache.insert(conversation.id.clone(), conversation.clone());
        }
        log::debug!("Conversation cache refreshed with {} entries", conversations.len());
        Ok(conversations)
    }

    /// Fetches one conversation with its messages and makes it current.
    pub async fn load(&self, id: &str) -> Result<Conversation> {
        let conversation = self.backend.get_conversation(id).await?;
        self.cache.insert(conversation.id.clone(), conversation.clone());
        self.set_current(Some(conversation.id.clone()));
        log::info!(
            "Loaded conversation {} ({} messages)",
            conversation.id,
            conversation.messages.len()
        );
        Ok(conversation)
    }

    /// Deletes remotely and locally. Returns true if `id` was the current
    /// conversation, which leaves no current conversation behind.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.backend.delete_conversation(id).await?;
        self.cache.remove(id);

        let mut current = self.current_slot();
        let was_current = current.as_deref() == Some(id);
        if was_current {
            *current = None;
        }
        log::info!("Deleted conversation {} (was current: {})", id, was_current);
        Ok(was_current)
    }

    /// Local-only append, no round trip.
    pub fn append_message(&self, id: &str, message: Message) {
        let mut entry = self
            .cache
            .entry(id.to_string())
            .or_insert_with(|| Conversation::new(id, DEFAULT_TITLE));
        let conversation = entry.value_mut();
        let is_user = message.role == Role::User;
        conversation.messages.push(message);
        conversation.updated_at = Utc::now();
        if is_user && conversation.title == DEFAULT_TITLE {
            conversation.title = derive_title(&conversation.messages);
        }
    }

    pub fn get(&self, id: &str) -> Option<Conversation> {
        self.cache.get(id).map(|entry| entry.value().clone())
    }

    /// Cached conversations, most recently updated first.
    pub fn conversations(&self) -> Vec<Conversation> {
        let mut conversations: Vec<Conversation> =
            self.cache.iter().map(|entry| entry.value().clone()).collect();
        sort_most_recent_first(&mut conversations);
        conversations
    }

    pub fn current_id(&self) -> Option<String> {
        self.current_slot().clone()
    }

    pub fn current(&self) -> Option<Conversation> {
        self.current_id().and_then(|id| self.get(&id))
    }

    pub fn set_current(&self, id: Option<String>) {
        *self.current_slot() = id;
    }
}

fn sort_most_recent_first(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;
    use crate::testing::FakeBackend;
    use chrono::Duration;

    fn store_with(backend: &Arc<FakeBackend>) -> ConversationStore {
        ConversationStore::new(backend.clone())
    }

    #[tokio::test]
    async fn test_create_sets_current() {
        let backend = Arc::new(FakeBackend::new());
        let store = store_with(&backend);

        let conversation = store.create().await.unwrap();
        assert_eq!(store.current_id(), Some(conversation.id.clone()));
        assert!(store.get(&conversation.id).unwrap().messages.is_empty());
    }

    #[tokio::test]
    async fn test_list_sorts_and_replaces_cache() {
        let backend = Arc::new(FakeBackend::new());
        let now = Utc::now();
        backend.seed(Conversation {
            updated_at: now - Duration::hours(2),
            ..Conversation::new("old", "Old")
        });
        backend.seed(Conversation {
            updated_at: now,
            ..Conversation::new("new", "New")
        });
        let store = store_with(&backend);
        store.append_message("local-only", Message::user("hi"));

        let listed = store.list().await.unwrap();
        let ids: Vec<_> = listed.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert!(store.get("local-only").is_none());
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let backend = Arc::new(FakeBackend::new());
        let store = store_with(&backend);
        store.set_current(Some("keep".to_string()));

        let err = store.load("ghost").await.unwrap_err();
        assert_eq!(err, ChatError::not_found("ghost"));
        assert_eq!(store.current_id().as_deref(), Some("keep"));
    }

    #[tokio::test]
    async fn test_load_supersedes_local_appends() {
        let backend = Arc::new(FakeBackend::new());
        let mut remote = Conversation::new("c1", "Remote");
        remote.messages.push(Message::user("from server"));
        backend.seed(remote);
        let store = store_with(&backend);
        store.append_message("c1", Message::user("local"));

        let loaded = store.load("c1").await.unwrap();
        assert_eq!(loaded.messages, vec![Message::user("from server")]);
        assert_eq!(store.get("c1").unwrap().messages.len(), 1);
        assert_eq!(store.current_id().as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_delete_reports_current() {
        let backend = Arc::new(FakeBackend::new());
        let store = store_with(&backend);
        let first = store.create().await.unwrap();
        let second = store.create().await.unwrap();

        assert!(!store.delete(&first.id).await.unwrap());
        assert_eq!(store.current_id(), Some(second.id.clone()));
        assert!(store.delete(&second.id).await.unwrap());
        assert!(store.current_id().is_none());
        assert!(store.get(&second.id).is_none());
    }

    #[test]
    fn test_append_titles_placeholder_conversation() {
        let backend = Arc::new(FakeBackend::new());
        let store = store_with(&backend);
        store.append_message("c9", Message::user("Explain borrowing"));
        store.append_message("c9", Message::assistant("Sure", ""));

        let conversation = store.get("c9").unwrap();
        assert_eq!(conversation.title, "Explain borrowing");
        assert_eq!(conversation.messages.len(), 2);
    }
}

//! In-memory `ChatBackend` with scripted `/ask` responses, for tests.

use crate::api::{AskRequest, ByteStream, ChatBackend, SearchResult};
use crate::error::{ChatError, Result};
use crate::models::Conversation;
use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn frame(json: &str) -> String {
    format!("data: {}\n\n", json)
}

pub fn content(text: &str) -> String {
    frame(&serde_json::json!({"type": "content", "content": text}).to_string())
}

pub fn reasoning(text: &str) -> String {
    frame(&serde_json::json!({"type": "reasoning", "content": text}).to_string())
}

pub fn error_event(text: &str) -> String {
    frame(&serde_json::json!({"type": "error", "content": text}).to_string())
}

pub fn done() -> String {
    frame(r#"{"type": "done"}"#)
}

pub enum AskScript {
    /// Body made of these chunks, then end of stream
    Chunks(Vec<Result<String>>),
    /// These chunks, then the body never yields again
    Hang(Vec<String>),
    /// The request itself fails
    Reject(ChatError),
}

impl AskScript {
    pub fn chunks(chunks: Vec<String>) -> Self {
        Self::Chunks(chunks.into_iter().map(Ok).collect())
    }

    pub fn hang(chunks: Vec<String>) -> Self {
        Self::Hang(chunks)
    }
}

#[derive(Default)]
pub struct FakeBackend {
    conversations: Mutex<Vec<Conversation>>,
    scripts: Mutex<VecDeque<AskScript>>,
    asks: Mutex<Vec<AskRequest>>,
    calls: Mutex<Vec<String>>,
    next_id: AtomicUsize,
    offline: AtomicBool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, conversation: Conversation) {
        self.conversations.lock().unwrap().push(conversation);
    }

    pub fn script(&self, script: AskScript) {
        self.scripts.lock().unwrap().push_back(script);
    }

    /// Makes every conversation call fail with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn asks(&self) -> Vec<AskRequest> {
        self.asks.lock().unwrap().clone()
    }

    /// Names of the calls made so far, e.g. `list`, `create`, `ask:c1`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn remote_ids(&self) -> Vec<String> {
        self.conversations
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.id.clone())
            .collect()
    }

    fn record(&self, call: String) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.offline.load(Ordering::SeqCst) {
            return Err(ChatError::transport("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn ask(&self, request: &AskRequest) -> Result<ByteStream> {
        self.calls.lock().unwrap().push(format!(
            "ask:{}",
            request.conversation_id.clone().unwrap_or_default()
        ));
        self.asks.lock().unwrap().push(request.clone());
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(AskScript::Chunks(chunks)) => {
                let items: Vec<Result<Vec<u8>>> = chunks
                    .into_iter()
                    .map(|c| c.map(String::into_bytes))
                    .collect();
                Ok(Box::pin(stream::iter(items)))
            }
            Some(AskScript::Hang(chunks)) => {
                let items: Vec<Result<Vec<u8>>> =
                    chunks.into_iter().map(|c| Ok(c.into_bytes())).collect();
                Ok(Box::pin(stream::iter(items).chain(stream::pending())))
            }
            Some(AskScript::Reject(err)) => Err(err),
            None => Err(ChatError::transport("no scripted response")),
        }
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.record("list".to_string())?;
        Ok(self.conversations.lock().unwrap().clone())
    }

    async fn create_conversation(&self) -> Result<Conversation> {
        self.record("create".to_string())?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let conversation = Conversation::new(format!("conv-{}", n), crate::api::DEFAULT_TITLE);
        self.conversations.lock().unwrap().push(conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: &str) -> Result<Conversation> {
        self.record(format!("get:{}", id))?;
        self.conversations
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| ChatError::not_found(id))
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        self.record(format!("delete:{}", id))?;
        let mut conversations = self.conversations.lock().unwrap();
        let before = conversations.len();
        conversations.retain(|c| c.id != id);
        if conversations.len() == before {
            return Err(ChatError::transport("Delete conversation: HTTP error! status: 404"));
        }
        Ok(())
    }

    async fn upload(&self, filename: &str, content: &str) -> Result<String> {
        self.record(format!("upload:{}", filename))?;
        Ok(format!("Analysis of {} ({} bytes)", filename, content.len()))
    }

    async fn search(&self, query: &str) -> Result<SearchResult> {
        self.record("search".to_string())?;
        Ok(SearchResult {
            content: format!("Results for {}", query),
            reasoning: None,
        })
    }
}

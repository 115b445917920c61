use crate::error::{ChatError, Result};
use crate::models::{Conversation, Message, Role};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::{Stream, StreamExt};
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Deserializer, Serialize};
use std::pin::Pin;
use std::time::Duration;

// Alias for the raw response body of `/ask`
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

pub const DEFAULT_TITLE: &str = "New conversation";
const TITLE_MAX_CHARS: usize = 30;

// Trait defining the remote assistant service the client talks to
#[async_trait]
pub trait ChatBackend: Send + Sync {
    // Starts an exchange. Returns the streamed body; non-2xx is a transport error.
    async fn ask(&self, request: &AskRequest) -> Result<ByteStream>;

    async fn list_conversations(&self) -> Result<Vec<Conversation>>;

    async fn create_conversation(&self) -> Result<Conversation>;

    // Fails with NotFound when the remote reports the id as missing
    async fn get_conversation(&self, id: &str) -> Result<Conversation>;

    async fn delete_conversation(&self, id: &str) -> Result<()>;

    // Returns the assistant's analysis of the uploaded file
    async fn upload(&self, filename: &str, content: &str) -> Result<String>;

    async fn search(&self, query: &str) -> Result<SearchResult>;
}

// Request body for `POST /ask`
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct AskRequest {
    pub message: String,
    pub conversation_id: Option<String>,
    pub search_enabled: bool,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SearchResult {
    pub content: String,
    #[serde(default)]
    pub reasoning: Option<String>,
}

// Conversation as the remote store serializes it. Create responses may carry
// the id as `conversation_id`, alone or next to `id`.
#[derive(Deserialize, Debug)]
struct RemoteConversation {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    created_at: Option<DateTime<Utc>>,
}

impl RemoteConversation {
    fn into_conversation(self) -> Result<Conversation> {
        let id = self
            .id
            .or(self.conversation_id)
            .ok_or_else(|| ChatError::Protocol("conversation without an id".to_string()))?;
        let title = self
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| derive_title(&self.messages));
        Ok(Conversation {
            id,
            title,
            updated_at: self.updated_at.or(self.created_at).unwrap_or_else(Utc::now),
            messages: self.messages,
        })
    }
}

#[derive(Serialize)]
struct UploadBody<'a> {
    filename: &'a str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct UploadResponse {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct SearchBody<'a> {
    query: &'a str,
}

// Body of a JSON error response, e.g. `{"error": "..."}`
#[derive(Deserialize, Debug)]
struct ErrorBody {
    error: String,
}

/// Titles untitled conversations after their first user message.
pub fn derive_title(messages: &[Message]) -> String {
    messages
        .iter()
        .find(|m| m.role == Role::User && !m.content.trim().is_empty())
        .map(|m| m.content.trim().chars().take(TITLE_MAX_CHARS).collect())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string())
}

/// Parses RFC 3339, or a naive ISO-8601 timestamp taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

// --- HTTP implementation ---

pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // `/conversations/<id>` with the id percent-encoded as one path segment
    fn conversation_url(&self, id: &str) -> Result<Url> {
        let mut url = Url::parse(&self.url("/conversations"))
            .map_err(|e| ChatError::transport(format!("Invalid base URL {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| ChatError::transport(format!("Invalid base URL {}", self.base_url)))?
            .push(id);
        Ok(url)
    }

    // Maps non-2xx statuses to a transport error, keeping the server's message if it sent one
    async fn check_status(response: Response, what: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        log::error!("{} failed with status {}: {}", what, status, body);
        let detail = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or_else(|_| format!("HTTP error! status: {}", status.as_u16()));
        Err(ChatError::transport(format!("{}: {}", what, detail)))
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn ask(&self, request: &AskRequest) -> Result<ByteStream> {
        log::info!(
            "Sending ask request for conversation {:?} (search: {})",
            request.conversation_id,
            request.search_enabled
        );
        let response = self.client.post(self.url("/ask")).json(request).send().await?;
        let response = Self::check_status(response, "Ask request").await?;

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ChatError::from));
        Ok(Box::pin(body))
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        log::debug!("Fetching conversation list");
        let response = self.client.get(self.url("/conversations")).send().await?;
        let response = Self::check_status(response, "List conversations").await?;
        let remote: Vec<RemoteConversation> = response.json().await?;
        log::info!("Fetched {} conversations", remote.len());
        remote
            .into_iter()
            .map(RemoteConversation::into_conversation)
            .collect()
    }

    async fn create_conversation(&self) -> Result<Conversation> {
        log::info!("Creating new conversation");
        let response = self.client.post(self.url("/conversations")).send().await?;
        let response = Self::check_status(response, "Create conversation").await?;
        let remote: RemoteConversation = response.json().await?;
        let conversation = remote.into_conversation()?;
        log::info!("Created conversation with ID: {}", conversation.id);
        Ok(conversation)
    }

    async fn get_conversation(&self, id: &str) -> Result<Conversation> {
        log::debug!("Fetching conversation {}", id);
        let response = self
            .client
            .get(self.conversation_url(id)?)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            log::warn!("Conversation {} not found remotely", id);
            return Err(ChatError::not_found(id));
        }
        let response = Self::check_status(response, "Load conversation").await?;
        let remote: RemoteConversation = response.json().await?;
        remote.into_conversation()
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        log::warn!("Deleting conversation {}", id);
        let response = self
            .client
            .delete(self.conversation_url(id)?)
            .send()
            .await?;
        Self::check_status(response, "Delete conversation").await?;
        Ok(())
    }

    async fn upload(&self, filename: &str, content: &str) -> Result<String> {
        log::info!("Uploading file {} ({} bytes)", filename, content.len());
        let response = self
            .client
            .post(self.url("/upload"))
            .json(&UploadBody { filename, content })
            .send()
            .await?;
        let response = Self::check_status(response, "Upload").await?;
        let parsed: UploadResponse = response.json().await?;
        match (parsed.error, parsed.content) {
            (Some(error), _) => Err(ChatError::ServerReported(error)),
            (None, Some(content)) => Ok(content),
            (None, None) => Ok(String::new()),
        }
    }

    async fn search(&self, query: &str) -> Result<SearchResult> {
        log::info!("Sending search request");
        let response = self
            .client
            .post(self.url("/search"))
            .json(&SearchBody { query })
            .send()
            .await?;
        let response = Self::check_status(response, "Search").await?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_naive_timestamp_as_utc() {
        let dt = parse_timestamp("2025-02-12T18:18:35.123456").unwrap();
        assert_eq!(dt.year(), 2025);
        assert_eq!(dt.hour(), 18);
    }

    #[test]
    fn test_parse_rfc3339_timestamp() {
        let dt = parse_timestamp("2025-02-12T18:18:35+02:00").unwrap();
        assert_eq!(dt.hour(), 16);
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_remote_conversation_without_title() {
        let raw = r#"{
            "id": "c1",
            "messages": [{"role": "user", "content": "  How do lifetimes work in Rust generics?  "}],
            "created_at": "2025-02-12T18:18:35",
            "updated_at": "2025-02-12T18:20:00"
        }"#;
        let remote: RemoteConversation = serde_json::from_str(raw).unwrap();
        let conversation = remote.into_conversation().unwrap();
        assert_eq!(conversation.title, "How do lifetimes work in Rust ");
        assert_eq!(conversation.updated_at.minute(), 20);
    }

    #[test]
    fn test_create_response_with_conversation_id() {
        let remote: RemoteConversation =
            serde_json::from_str(r#"{"conversation_id": "abc"}"#).unwrap();
        let conversation = remote.into_conversation().unwrap();
        assert_eq!(conversation.id, "abc");
        assert_eq!(conversation.title, DEFAULT_TITLE);
        assert!(conversation.messages.is_empty());
    }

    #[test]
    fn test_create_response_with_both_ids_prefers_id() {
        let remote: RemoteConversation =
            serde_json::from_str(r#"{"id": "abc", "conversation_id": "other", "title": "T"}"#)
                .unwrap();
        assert_eq!(remote.into_conversation().unwrap().id, "abc");

        let remote: RemoteConversation = serde_json::from_str(r#"{"title": "T"}"#).unwrap();
        assert!(matches!(remote.into_conversation(), Err(ChatError::Protocol(_))));
    }

    #[test]
    fn test_conversation_url_encodes_id() {
        let backend = HttpBackend::new("http://localhost:5000/api/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            backend.conversation_url("a/b?c#d").unwrap().as_str(),
            "http://localhost:5000/api/conversations/a%2Fb%3Fc%23d"
        );
        assert_eq!(
            backend.conversation_url("conv-1").unwrap().as_str(),
            "http://localhost:5000/api/conversations/conv-1"
        );
    }

    #[test]
    fn test_ask_request_serializes_null_conversation() {
        let request = AskRequest {
            message: "hello".to_string(),
            conversation_id: None,
            search_enabled: false,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"message": "hello", "conversation_id": null, "search_enabled": false})
        );
    }

    #[test]
    fn test_http_backend_trims_base_url() {
        let backend = HttpBackend::new("http://localhost:5000/", Duration::from_secs(5)).unwrap();
        assert_eq!(backend.url("/ask"), "http://localhost:5000/ask");
    }
}

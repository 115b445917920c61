use crate::api::{AskRequest, ChatBackend};
use crate::decoder::{decode_events, StreamEvent};
use crate::error::{ChatError, Result};
use crate::history::History;
use crate::models::{HistoryEntry, Message};
use crate::observer::Observers;
use crate::storage::ConversationStore;
use futures::StreamExt;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Idle,
    Streaming,
    Completed,
    Errored,
}

/// The one in-flight exchange of this client.
///
/// `partial_content` and `partial_reasoning` are replaced by each cumulative
/// server update, never appended to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveStreamState {
    pub conversation_id: Option<String>,
    pub partial_content: String,
    pub partial_reasoning: String,
    pub status: StreamStatus,
}

impl Default for ActiveStreamState {
    fn default() -> Self {
        Self {
            conversation_id: None,
            partial_content: String::new(),
            partial_reasoning: String::new(),
            status: StreamStatus::Idle,
        }
    }
}

/// How a `begin` call ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Completed(Message),
    Cancelled,
}

struct Exchange {
    id: Uuid,
    cancel: CancellationToken,
}

// Why `run_exchange` failed, and whether the user has already seen it
struct ExchangeFailure {
    error: ChatError,
    delivered: bool,
}

impl From<ChatError> for ExchangeFailure {
    fn from(error: ChatError) -> Self {
        Self {
            error,
            delivered: false,
        }
    }
}

#[derive(Default)]
struct Inner {
    state: ActiveStreamState,
    // Present exactly while `state.status` is `Streaming`
    exchange: Option<Exchange>,
}

/// Drives one request/response exchange at a time.
pub struct StreamSession {
    backend: Arc<dyn ChatBackend>,
    store: Arc<ConversationStore>,
    observers: Arc<Observers>,
    history: Mutex<History>,
    inner: Mutex<Inner>,
}

// Resets the session to idle if a `begin` future is dropped mid-exchange.
struct ExchangeGuard<'a> {
    session: &'a StreamSession,
    exchange_id: Uuid,
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        let mut inner = self.session.lock_inner();
        if inner.exchange.as_ref().map(|e| e.id) == Some(self.exchange_id) {
            log::warn!("Exchange {} abandoned while streaming, resetting to idle", self.exchange_id);
            if let Some(exchange) = inner.exchange.take() {
                exchange.cancel.cancel();
            }
            inner.state.status = StreamStatus::Idle;
            inner.state.partial_content.clear();
            inner.state.partial_reasoning.clear();
        }
    }
}

impl StreamSession {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        store: Arc<ConversationStore>,
        observers: Arc<Observers>,
        max_history: usize,
    ) -> Self {
        Self {
            backend,
            store,
            observers,
            history: Mutex::new(History::new(max_history)),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_history(&self) -> MutexGuard<'_, History> {
        match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn snapshot(&self) -> ActiveStreamState {
        self.lock_inner().state.clone()
    }

    pub fn status(&self) -> StreamStatus {
        self.lock_inner().state.status
    }

    pub fn is_streaming(&self) -> bool {
        self.status() == StreamStatus::Streaming
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.lock_history().entries()
    }

    /// Sends `message` to `conversation_id` and consumes the streamed reply.
    ///
    /// Rejected with `Concurrency`, without touching any state, while another
    /// exchange is streaming. The user message is appended to the
    /// conversation before the request goes out and is kept whatever happens
    /// next. The assistant reply is only stored once `done` arrives.
    pub async fn begin(
        &self,
        conversation_id: &str,
        message: &str,
        search_enabled: bool,
    ) -> Result<ExchangeOutcome> {
        let (exchange_id, cancel) = self.acquire(conversation_id)?;
        let _guard = ExchangeGuard {
            session: self,
            exchange_id,
        };
        log::info!("Exchange {} started for conversation {}", exchange_id, conversation_id);
        self.observers
            .notify(|o| o.on_status(conversation_id, StreamStatus::Streaming));

        let user_message = Message::user(message);
        self.store.append_message(conversation_id, user_message.clone());
        self.lock_history().push(HistoryEntry::from(&user_message));
        self.observers
            .notify(|o| o.on_user_message(conversation_id, &user_message));

        let request = AskRequest {
            message: message.to_string(),
            conversation_id: Some(conversation_id.to_string()),
            search_enabled,
        };

        match self.run_exchange(exchange_id, &cancel, &request).await {
            Ok(ExchangeOutcome::Completed(reply)) => {
                if !self.finish(exchange_id, StreamStatus::Completed) {
                    log::warn!("Exchange {} was cancelled before its reply could be stored", exchange_id);
                    return Ok(ExchangeOutcome::Cancelled);
                }
                self.store.append_message(conversation_id, reply.clone());
                self.lock_history().push(HistoryEntry::from(&reply));
                log::info!(
                    "Exchange {} completed ({} chars)",
                    exchange_id,
                    reply.content.len()
                );
                self.observers.notify(|o| {
                    o.on_message_completed(conversation_id, &reply);
                    o.on_status(conversation_id, StreamStatus::Completed);
                });
                Ok(ExchangeOutcome::Completed(reply))
            }
            Ok(ExchangeOutcome::Cancelled) => {
                log::warn!("Exchange {} stopped after cancellation", exchange_id);
                Ok(ExchangeOutcome::Cancelled)
            }
            Err(ExchangeFailure { error, delivered }) => {
                if self.finish(exchange_id, StreamStatus::Errored) {
                    log::error!("Exchange {} failed: {}", exchange_id, error);
                    let shown = error.to_string();
                    self.observers.notify(|o| {
                        if !delivered {
                            o.on_error(&shown);
                        }
                        o.on_status(conversation_id, StreamStatus::Errored);
                    });
                }
                Err(error)
            }
        }
    }

    /// Stops consuming the active stream and drops its partial reply.
    /// The remote side may keep generating. Returns false if nothing was streaming.
    pub fn cancel(&self) -> bool {
        let (token, conversation_id) = {
            let mut inner = self.lock_inner();
            let Some(exchange) = inner.exchange.take() else {
                return false;
            };
            inner.state.status = StreamStatus::Idle;
            inner.state.partial_content.clear();
            inner.state.partial_reasoning.clear();
            (exchange.cancel, inner.state.conversation_id.clone().unwrap_or_default())
        };
        token.cancel();
        log::warn!("Cancellation requested for conversation {}", conversation_id);
        self.observers
            .notify(|o| o.on_status(&conversation_id, StreamStatus::Idle));
        true
    }

    // The exclusivity gate: check and set happen under one lock with no suspension in between.
    fn acquire(&self, conversation_id: &str) -> Result<(Uuid, CancellationToken)> {
        let mut inner = self.lock_inner();
        if inner.state.status == StreamStatus::Streaming {
            log::warn!("Rejected exchange for {}: a stream is already active", conversation_id);
            return Err(ChatError::Concurrency);
        }
        let exchange = Exchange {
            id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
        };
        let handle = (exchange.id, exchange.cancel.clone());
        inner.state = ActiveStreamState {
            conversation_id: Some(conversation_id.to_string()),
            partial_content: String::new(),
            partial_reasoning: String::new(),
            status: StreamStatus::Streaming,
        };
        inner.exchange = Some(exchange);
        Ok(handle)
    }

    // Moves the exchange to a terminal status. False if it is no longer the active one.
    fn finish(&self, exchange_id: Uuid, status: StreamStatus) -> bool {
        let mut inner = self.lock_inner();
        if inner.exchange.as_ref().map(|e| e.id) != Some(exchange_id) {
            return false;
        }
        inner.exchange = None;
        inner.state.status = status;
        inner.state.partial_content.clear();
        inner.state.partial_reasoning.clear();
        true
    }

    // Applies `update` to the state if `exchange_id` is still the active exchange.
    fn update_active(&self, exchange_id: Uuid, update: impl FnOnce(&mut ActiveStreamState)) -> bool {
        let mut inner = self.lock_inner();
        if inner.exchange.as_ref().map(|e| e.id) != Some(exchange_id) {
            return false;
        }
        update(&mut inner.state);
        true
    }

    async fn run_exchange(
        &self,
        exchange_id: Uuid,
        cancel: &CancellationToken,
        request: &AskRequest,
    ) -> std::result::Result<ExchangeOutcome, ExchangeFailure> {
        let conversation_id = request.conversation_id.as_deref().unwrap_or_default();
        let mut server_error: Option<String> = None;

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(ExchangeOutcome::Cancelled),
            body = self.backend.ask(request) => body?,
        };
        let mut events = decode_events(body);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(ExchangeOutcome::Cancelled),
                next = events.next() => next,
            };

            match next {
                Some(Ok(StreamEvent::Content { content })) => {
                    if !self.update_active(exchange_id, |s| s.partial_content = content.clone()) {
                        return Ok(ExchangeOutcome::Cancelled);
                    }
                    log::debug!("Exchange {}: content now {} chars", exchange_id, content.len());
                    self.observers
                        .notify(|o| o.on_content(conversation_id, &content));
                }
                Some(Ok(StreamEvent::Reasoning { content })) => {
                    if !self.update_active(exchange_id, |s| s.partial_reasoning = content.clone()) {
                        return Ok(ExchangeOutcome::Cancelled);
                    }
                    self.observers
                        .notify(|o| o.on_reasoning(conversation_id, &content));
                }
                Some(Ok(StreamEvent::Error { content })) => {
                    log::warn!("Exchange {}: server reported error: {}", exchange_id, content);
                    self.observers.notify(|o| o.on_error(&content));
                    server_error = Some(content);
                }
                Some(Ok(StreamEvent::Done)) => {
                    let snapshot = self.snapshot();
                    return Ok(ExchangeOutcome::Completed(Message::assistant(
                        snapshot.partial_content,
                        snapshot.partial_reasoning,
                    )));
                }
                Some(Err(e)) => return Err(e.into()),
                // The server's own error already explains the missing `done`
                None => {
                    return Err(match server_error {
                        Some(message) => ExchangeFailure {
                            error: ChatError::ServerReported(message),
                            delivered: true,
                        },
                        None => ChatError::transport(
                            "Stream closed before the reply was complete",
                        )
                        .into(),
                    })
                }
            }
        }
    }
}

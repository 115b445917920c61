use crate::api::SearchResult;
use crate::error::{ChatError, Result};
use crate::models::{Conversation, HistoryEntry};
use crate::observer::{ChatObserver, SubscriptionId};
use crate::session::ExchangeOutcome;
use crate::state::ChatContext;
use crate::upload::FileKind;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Where the controller is in a send. Anything but `Idle` rejects new sends.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ExchangePhase {
    Idle,
    ResolvingConversation,
    Streaming,
}

/// Entry point for a UI layer.
pub struct ChatController {
    ctx: ChatContext,
    phase: Mutex<PhaseState>,
}

// `generation` counts sends, so a guard left over from a cancelled send
// cannot touch the phase of a later one.
#[derive(Debug, Clone, Copy)]
struct PhaseState {
    phase: ExchangePhase,
    generation: u64,
}

// Puts the controller back to idle however the send ends.
struct PhaseGuard<'a> {
    controller: &'a ChatController,
    generation: u64,
}

impl PhaseGuard<'_> {
    fn set(&self, phase: ExchangePhase) {
        let mut state = self.controller.lock_phase();
        if state.generation == self.generation {
            state.phase = phase;
        }
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.set(ExchangePhase::Idle);
    }
}

impl ChatController {
    pub fn new(ctx: ChatContext) -> Self {
        Self {
            ctx,
            phase: Mutex::new(PhaseState {
                phase: ExchangePhase::Idle,
                generation: 0,
            }),
        }
    }

    pub fn context(&self) -> &ChatContext {
        &self.ctx
    }

    fn lock_phase(&self) -> MutexGuard<'_, PhaseState> {
        match self.phase.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn phase(&self) -> ExchangePhase {
        self.lock_phase().phase
    }

    pub fn subscribe(&self, observer: Arc<dyn ChatObserver>) -> SubscriptionId {
        self.ctx.observers.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.ctx.observers.unsubscribe(id)
    }

    /// Loads the conversation list; call once after subscribing observers.
    pub async fn init(&self) -> Result<Vec<Conversation>> {
        log::info!("Initializing chat controller");
        self.refresh_conversations().await
    }

    /// Stops any active stream. The context can be dropped afterwards.
    pub fn shutdown(&self) {
        if self.cancel() {
            log::info!("Active stream cancelled on shutdown");
        }
    }

    pub fn search_enabled(&self) -> bool {
        self.ctx.search_enabled()
    }

    pub fn set_search_enabled(&self, enabled: bool) {
        log::info!("Search {}", if enabled { "enabled" } else { "disabled" });
        self.ctx.set_search_enabled(enabled);
    }

    pub fn current_conversation(&self) -> Option<Conversation> {
        self.ctx.store.current()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.ctx.store.conversations()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.ctx.session.history()
    }

    /// Stops the active stream and makes the controller idle at once, so a new
    /// send is accepted before the cancelled one has unwound.
    pub fn cancel(&self) -> bool {
        if !self.ctx.session.cancel() {
            return false;
        }
        let mut state = self.lock_phase();
        if state.phase == ExchangePhase::Streaming {
            state.phase = ExchangePhase::Idle;
            state.generation += 1;
        }
        true
    }

    // Logs and shows an error that did not come out of the stream session
    fn report(&self, err: &ChatError) {
        log::error!("{}", err);
        let shown = err.to_string();
        self.ctx.observers.notify(|o| o.on_error(&shown));
    }

    fn enter_exchange(&self) -> Result<PhaseGuard<'_>> {
        let mut state = self.lock_phase();
        if state.phase != ExchangePhase::Idle {
            return Err(ChatError::Busy);
        }
        state.phase = ExchangePhase::ResolvingConversation;
        state.generation += 1;
        Ok(PhaseGuard {
            controller: self,
            generation: state.generation,
        })
    }

    /// Sends a user message to the current conversation, resolving one first
    /// if there is none, and waits for the whole reply.
    pub async fn send_message(&self, text: &str) -> Result<ExchangeOutcome> {
        let message = text.trim();
        if message.is_empty() {
            let err = ChatError::EmptyMessage;
            self.report(&err);
            return Err(err);
        }

        let phase = match self.enter_exchange() {
            Ok(guard) => guard,
            Err(err) => {
                self.report(&err);
                return Err(err);
            }
        };

        let conversation_id = match self.resolve_conversation().await {
            Ok(id) => id,
            Err(err) => {
                self.report(&err);
                return Err(err);
            }
        };

        phase.set(ExchangePhase::Streaming);
        let outcome = self
            .ctx
            .session
            .begin(&conversation_id, message, self.ctx.search_enabled())
            .await;
        drop(phase);

        match &outcome {
            Ok(ExchangeOutcome::Completed(_)) => self.refresh_after_mutation().await,
            Err(ChatError::Concurrency) => self.report(&ChatError::Concurrency),
            _ => {}
        }
        outcome
    }

    // Current conversation, else the most recently updated one, else a new one.
    async fn resolve_conversation(&self) -> Result<String> {
        if let Some(id) = self.ctx.store.current_id() {
            return Ok(id);
        }

        let conversations = self.ctx.store.list().await?;
        if let Some(latest) = conversations.first() {
            log::info!("No current conversation, continuing most recent {}", latest.id);
            self.ctx.store.set_current(Some(latest.id.clone()));
            return Ok(latest.id.clone());
        }

        log::info!("No conversations yet, creating one");
        let created = self.ctx.store.create().await?;
        Ok(created.id)
    }

    pub async fn new_conversation(&self) -> Result<Conversation> {
        let conversation = match self.ctx.store.create().await {
            Ok(conversation) => conversation,
            Err(err) => {
                self.report(&err);
                return Err(err);
            }
        };
        self.ctx
            .observers
            .notify(|o| o.on_conversation_selected(&conversation));
        self.refresh_after_mutation().await;
        Ok(conversation)
    }

    pub async fn select_conversation(&self, id: &str) -> Result<Conversation> {
        match self.ctx.store.load(id).await {
            Ok(conversation) => {
                self.ctx
                    .observers
                    .notify(|o| o.on_conversation_selected(&conversation));
                self.refresh_after_mutation().await;
                Ok(conversation)
            }
            Err(err) => {
                self.report(&err);
                if matches!(err, ChatError::NotFound(_)) {
                    // Drop the stale entry from the list
                    self.refresh_after_mutation().await;
                }
                Err(err)
            }
        }
    }

    /// Deletes a conversation. When it was the current one, a new conversation
    /// is created and made current before this returns; it is returned as `Some`.
    pub async fn delete_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let was_current = match self.ctx.store.delete(id).await {
            Ok(was_current) => was_current,
            Err(err) => {
                self.report(&err);
                return Err(err);
            }
        };

        // A failed delete leaves the stream running
        let snapshot = self.ctx.session.snapshot();
        if snapshot.conversation_id.as_deref() == Some(id) && self.cancel() {
            log::warn!("Cancelled the stream of deleted conversation {}", id);
        }

        let replacement = if was_current {
            match self.ctx.store.create().await {
                Ok(conversation) => {
                    self.ctx
                        .observers
                        .notify(|o| o.on_conversation_selected(&conversation));
                    Some(conversation)
                }
                Err(err) => {
                    self.report(&err);
                    return Err(err);
                }
            }
        } else {
            None
        };

        self.refresh_after_mutation().await;
        Ok(replacement)
    }

    /// Fetches the conversation list and publishes it.
    pub async fn refresh_conversations(&self) -> Result<Vec<Conversation>> {
        match self.ctx.store.list().await {
            Ok(conversations) => {
                let current = self.ctx.store.current_id();
                self.ctx
                    .observers
                    .notify(|o| o.on_conversations_changed(&conversations, current.as_deref()));
                Ok(conversations)
            }
            Err(err) => {
                self.report(&err);
                Err(err)
            }
        }
    }

    // A failed refresh does not fail the mutation that triggered it.
    async fn refresh_after_mutation(&self) {
        if let Err(err) = self.refresh_conversations().await {
            log::warn!("Conversation list refresh failed: {}", err);
        }
    }

    /// Sends a local text file for analysis and returns the assistant's answer.
    pub async fn upload_file(&self, path: &Path) -> Result<String> {
        let result = self.upload_file_inner(path).await;
        if let Err(err) = &result {
            self.report(err);
        }
        result
    }

    async fn upload_file_inner(&self, path: &Path) -> Result<String> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ChatError::UnsupportedFile(path.display().to_string()))?;
        let kind = FileKind::from_filename(filename)
            .ok_or_else(|| ChatError::UnsupportedFile(filename.to_string()))?;

        let bytes = tokio::fs::read(path).await?;
        let content = String::from_utf8_lossy(&bytes);
        log::info!("Uploading {} file {}", kind.as_str(), filename);
        self.ctx.backend.upload(filename, &content).await
    }

    pub async fn search(&self, query: &str) -> Result<SearchResult> {
        let query = query.trim();
        let result = if query.is_empty() {
            Err(ChatError::EmptyMessage)
        } else {
            self.ctx.backend.search(query).await
        };
        if let Err(err) = &result {
            self.report(err);
        }
        result
    }
}

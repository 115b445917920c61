use crate::api::{ChatBackend, HttpBackend};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::observer::Observers;
use crate::session::StreamSession;
use crate::storage::ConversationStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Everything one client instance owns, created once at startup and handed
/// to the controller. Dropping it tears the client down; call
/// `ChatController::shutdown` first to stop an active stream.
#[derive(Clone)]
pub struct ChatContext {
    pub backend: Arc<dyn ChatBackend>,
    pub store: Arc<ConversationStore>,
    pub session: Arc<StreamSession>,
    pub observers: Arc<Observers>,
    search_enabled: Arc<AtomicBool>,
}

impl ChatContext {
    pub fn new(backend: Arc<dyn ChatBackend>, config: &ClientConfig) -> Self {
        let store = Arc::new(ConversationStore::new(backend.clone()));
        let observers = Arc::new(Observers::new());
        let session = Arc::new(StreamSession::new(
            backend.clone(),
            store.clone(),
            observers.clone(),
            config.max_history,
        ));
        Self {
            backend,
            store,
            session,
            observers,
            search_enabled: Arc::new(AtomicBool::new(config.search_enabled)),
        }
    }

    /// Context talking HTTP to `config.base_url`.
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        log::info!("Using chat service at {}", config.base_url);
        let backend: Arc<dyn ChatBackend> =
            Arc::new(HttpBackend::new(&config.base_url, config.request_timeout())?);
        Ok(Self::new(backend, config))
    }

    pub fn search_enabled(&self) -> bool {
        self.search_enabled.load(Ordering::SeqCst)
    }

    pub fn set_search_enabled(&self, enabled: bool) {
        self.search_enabled.store(enabled, Ordering::SeqCst);
    }
}

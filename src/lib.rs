// Streaming chat client for a remote assistant service

// Declare the modules
pub mod api;
pub mod commands;
pub mod config;
pub mod controller;
pub mod decoder;
pub mod error;
pub mod history;
pub mod models;
pub mod observer;
pub mod render;
pub mod session;
pub mod state;
pub mod storage;
pub mod upload;

#[cfg(test)]
mod testing;

use anyhow::Context;
use config::ClientConfig;
use std::path::PathBuf;

pub use api::{ChatBackend, HttpBackend};
pub use controller::{ChatController, ExchangePhase};
pub use decoder::{decode_events, FrameDecoder, StreamEvent};
pub use error::ChatError;
pub use models::{Conversation, Message, Role};
pub use observer::{ChannelObserver, ChatObserver, Observers, UiEvent};
pub use render::{MarkdownRenderer, MarkupRenderer};
pub use session::{ActiveStreamState, ExchangeOutcome, StreamSession, StreamStatus};
pub use state::ChatContext;
pub use storage::ConversationStore;

/// Terminal entry point. The optional first argument is a JSON config file.
pub fn run() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = ClientConfig::load(config_path.as_deref())?;

    // One thread: all client logic runs cooperatively, suspending only on I/O.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    runtime.block_on(commands::repl(config))
}

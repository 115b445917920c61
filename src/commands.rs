// Terminal front-end: command parsing and a stdout observer

use crate::config::ClientConfig;
use crate::controller::ChatController;
use crate::models::{Conversation, Message, Role};
use crate::observer::ChatObserver;
use crate::session::{ExchangeOutcome, StreamStatus};
use crate::state::ChatContext;
use anyhow::Context;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};

const HELP: &str = "\
Commands:
  /new              start a new conversation
  /list             list conversations
  /open <id>        switch to a conversation
  /delete <id>      delete a conversation
  /search on|off    toggle search for new messages
  /upload <path>    send a file for analysis
  /find <query>     one-off web search answer
  /history          show recent messages
  /help             show this help
  /quit             exit
Anything else is sent as a message. Ctrl-C stops a reply.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    New,
    List,
    Open(String),
    Delete(String),
    Search(bool),
    Upload(PathBuf),
    Find(String),
    History,
    Help,
    Quit,
}

/// Parses one input line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let require_arg = |usage: &str| {
        if arg.is_empty() {
            Err(format!("Usage: {}", usage))
        } else {
            Ok(arg.to_string())
        }
    };

    let command = match name {
        "new" => Command::New,
        "list" => Command::List,
        "open" => Command::Open(require_arg("/open <id>")?),
        "delete" => Command::Delete(require_arg("/delete <id>")?),
        "search" => match arg {
            "on" => Command::Search(true),
            "off" => Command::Search(false),
            _ => return Err("Usage: /search on|off".to_string()),
        },
        "upload" => Command::Upload(PathBuf::from(require_arg("/upload <path>")?)),
        "find" => Command::Find(require_arg("/find <query>")?),
        "history" => Command::History,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("Unknown command '/{}', try /help", other)),
    };
    Ok(Some(command))
}

// Prints the growing reply in place. Updates are cumulative, so only the
// unseen suffix is written; a rewrite of earlier text reprints the whole reply.
#[derive(Default)]
pub struct TerminalObserver {
    printed_content: Mutex<String>,
    printed_reasoning: Mutex<String>,
}

fn print_suffix(printed: &Mutex<String>, latest: &str, out: &mut dyn Write) {
    let mut printed = match printed.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    let fresh = match latest.strip_prefix(printed.as_str()) {
        Some(suffix) => suffix.to_string(),
        None => format!("\n{}", latest),
    };
    let _ = write!(out, "{}", fresh);
    let _ = out.flush();
    *printed = latest.to_string();
}

impl ChatObserver for TerminalObserver {
    fn on_content(&self, _conversation_id: &str, content: &str) {
        print_suffix(&self.printed_content, content, &mut std::io::stdout());
    }

    fn on_reasoning(&self, _conversation_id: &str, reasoning: &str) {
        print_suffix(&self.printed_reasoning, reasoning, &mut std::io::stderr());
    }

    fn on_message_completed(&self, _conversation_id: &str, _message: &Message) {
        println!();
    }

    fn on_status(&self, _conversation_id: &str, status: StreamStatus) {
        log::debug!("Stream status: {:?}", status);
        if status == StreamStatus::Streaming {
            for printed in [&self.printed_content, &self.printed_reasoning] {
                if let Ok(mut printed) = printed.lock() {
                    printed.clear();
                }
            }
        }
    }

    fn on_error(&self, message: &str) {
        eprintln!("\n[error] {}", message);
    }
}

fn print_conversations(conversations: &[Conversation], current: Option<&str>) {
    if conversations.is_empty() {
        println!("(no conversations)");
    }
    for conversation in conversations {
        let marker = if Some(conversation.id.as_str()) == current { "*" } else { " " };
        println!(
            "{} {}  {}  ({})",
            marker,
            conversation.id,
            conversation.title,
            conversation.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
}

fn print_message(message: &Message) {
    let who = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    println!("{}> {}", who, message.content);
}

/// Runs one command against the controller. Errors were already shown by the
/// terminal observer.
pub async fn execute(controller: &ChatController, command: Command) {
    match command {
        Command::Send(text) => {
            tokio::select! {
                result = controller.send_message(&text) => {
                    if let Ok(ExchangeOutcome::Cancelled) = result {
                        println!("\n[stopped]");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    controller.cancel();
                    println!("\n[stopped]");
                }
            }
        }
        Command::New => {
            if let Ok(conversation) = controller.new_conversation().await {
                println!("Started conversation {}", conversation.id);
            }
        }
        Command::List => {
            if let Ok(conversations) = controller.refresh_conversations().await {
                let current = controller.current_conversation().map(|c| c.id);
                print_conversations(&conversations, current.as_deref());
            }
        }
        Command::Open(id) => {
            if let Ok(conversation) = controller.select_conversation(&id).await {
                println!("== {} ==", conversation.title);
                conversation.messages.iter().for_each(print_message);
            }
        }
        Command::Delete(id) => {
            if let Ok(replacement) = controller.delete_conversation(&id).await {
                println!("Deleted {}", id);
                if let Some(conversation) = replacement {
                    println!("Started conversation {}", conversation.id);
                }
            }
        }
        Command::Search(enabled) => {
            controller.set_search_enabled(enabled);
            println!("Search {}", if enabled { "enabled" } else { "disabled" });
        }
        Command::Upload(path) => {
            if let Ok(analysis) = controller.upload_file(&path).await {
                println!("{}", analysis);
            }
        }
        Command::Find(query) => {
            if let Ok(result) = controller.search(&query).await {
                if let Some(reasoning) = result.reasoning.filter(|r| !r.is_empty()) {
                    eprintln!("{}", reasoning);
                }
                println!("{}", result.content);
            }
        }
        Command::History => {
            for entry in controller.history() {
                println!("[{}] {}", entry.role.as_str(), entry.content);
            }
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => {}
    }
}

/// Interactive loop on stdin until `/quit` or end of input.
pub async fn repl(config: ClientConfig) -> anyhow::Result<()> {
    let ctx = ChatContext::connect(&config).context("Failed to set up chat client")?;
    let controller = ChatController::new(ctx);
    controller.subscribe(Arc::new(TerminalObserver::default()));

    if controller.init().await.is_err() {
        log::warn!("Starting without a conversation list");
    }
    println!("Connected to {}. Type /help for commands.", config.base_url);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        match parse_command(&line) {
            Ok(None) => {}
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => execute(&controller, command).await,
            Err(message) => eprintln!("{}", message),
        }
    }

    controller.shutdown();
    log::info!("Chat client stopped");
    Ok(())
}

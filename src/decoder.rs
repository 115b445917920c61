//! Decoding of the `/ask` response body into typed stream events.
//!
//! The body is a sequence of newline-terminated lines. Only lines starting
//! with `data: ` carry protocol frames; the payload is either the literal
//! `[DONE]` (ignored) or a JSON object tagged by `type`. Payloads are
//! cumulative: each `content`/`reasoning` event carries the full text so far.

use crate::api::ByteStream;
use crate::error::ChatError;
use futures::{stream, Stream, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;
use std::pin::Pin;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ChatError>> + Send>>;

/// One decoded protocol frame.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// Full assistant text so far
    Content { content: String },
    /// Full reasoning text so far
    Reasoning { content: String },
    /// User-facing error; the stream keeps going
    Error { content: String },
    /// Terminal marker
    Done,
}

/// Splits raw chunks into lines and decodes them.
///
/// Bytes after the last newline are held back until the next chunk so a frame
/// split across chunks decodes the same as an unsplit one.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a `done` event has been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feeds one chunk and returns the events completed by it, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if self.push_line(&line[..line.len() - 1], &mut events) {
                self.buffer.clear();
                break;
            }
        }
        events
    }

    /// Flushes a trailing line that was never newline-terminated.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.finished && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.push_line(&line, &mut events);
        }
        self.buffer.clear();
        events
    }

    // Returns true when the line was the terminal `done` event.
    fn push_line(&mut self, raw: &[u8], events: &mut Vec<StreamEvent>) -> bool {
        let text = String::from_utf8_lossy(raw);
        match parse_line(&text) {
            Some(Ok(event)) => {
                let is_done = event == StreamEvent::Done;
                events.push(event);
                if is_done {
                    self.finished = true;
                }
                is_done
            }
            Some(Err(e)) => {
                log::warn!("Skipping stream line: {}", e);
                false
            }
            None => false,
        }
    }
}

/// Decodes a single line.
///
/// `None` means the line is not a protocol frame (comment, keep-alive, blank,
/// or the `[DONE]` sentinel). `Some(Err(_))` is a malformed frame.
pub fn parse_line(line: &str) -> Option<Result<StreamEvent, ChatError>> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let payload = line.strip_prefix(DATA_PREFIX)?;
    if payload.trim() == DONE_SENTINEL {
        return None;
    }
    Some(
        serde_json::from_str::<StreamEvent>(payload)
            .map_err(|e| ChatError::Protocol(format!("{} - Data: {}", e, payload))),
    )
}

struct DecodeState {
    source: ByteStream,
    decoder: FrameDecoder,
    pending: VecDeque<StreamEvent>,
    exhausted: bool,
}

/// Turns a response body into a lazy, finite event stream.
///
/// The stream ends right after `done` (the source is dropped without reading
/// further), after the source ends, or after the first source error, which is
/// yielded as an `Err`.
pub fn decode_events(source: ByteStream) -> EventStream {
    let state = DecodeState {
        source,
        decoder: FrameDecoder::new(),
        pending: VecDeque::new(),
        exhausted: false,
    };

    let events = stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((Ok(event), st));
            }
            if st.exhausted || st.decoder.is_finished() {
                return None;
            }
            match st.source.next().await {
                Some(Ok(chunk)) => {
                    let decoded = st.decoder.feed(&chunk);
                    st.pending.extend(decoded);
                }
                Some(Err(e)) => {
                    log::error!("Error reading response body: {}", e);
                    st.exhausted = true;
                    return Some((Err(e), st));
                }
                None => {
                    st.exhausted = true;
                    let trailing = st.decoder.finish();
                    st.pending.extend(trailing);
                }
            }
        }
    });

    Box::pin(events)
}

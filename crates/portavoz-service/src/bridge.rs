//! Translation between backend data and bus events.
//!
//! Inbound: a received utterance is split into chunks no larger than the
//! configured event-body size and published as `LISTEN_STRING_UNFINISHED`
//! events capped by one `LISTEN_STRING_END`, all sharing a freshly assigned
//! `string_id` and carrying ascending `part_index` values.
//!
//! Outbound: a performed delivery is acknowledged with exactly one
//! `SAY_STRING_PERFORMED` carrying the utterance's `(string_id, group_id)`.
//!
//! Identifier assignment and event emission happen under one mutex so
//! `string_id`s are strictly increasing *and* events reach the bus in id
//! order, no matter which backend worker publishes.

use std::sync::{Arc, Mutex};

use crate::bus::{EventSink, OutboundEvent};
use crate::Result;

/// The bridge between backends and the event bus.
pub struct EventBridge {
    sink: Arc<dyn EventSink>,
    max_chunk_bytes: usize,
    next_string_id: Mutex<u32>,
}

impl EventBridge {
    /// Create a bridge chunking inbound strings at `max_chunk_bytes`.
    pub fn new(sink: Arc<dyn EventSink>, max_chunk_bytes: usize) -> Self {
        Self {
            sink,
            max_chunk_bytes: max_chunk_bytes.max(1),
            next_string_id: Mutex::new(0),
        }
    }

    /// Publish one received utterance. Returns the assigned `string_id`.
    ///
    /// Identifiers are strictly increasing for the process lifetime; once
    /// the 32-bit space is exhausted no further input can be published
    /// (reusing an id would be worse than dropping the utterance).
    pub fn publish_input(&self, text: &str) -> Result<u32> {
        let mut next = self.next_string_id.lock().unwrap();
        let string_id = *next;
        if string_id == u32::MAX {
            return Err(crate::Error::EventEmitFailed(
                "input identifier space exhausted".into(),
            ));
        }
        *next += 1;

        let chunks = chunk_utf8(text, self.max_chunk_bytes);
        let last = chunks.len() - 1;

        for (index, chunk) in chunks.into_iter().enumerate() {
            let part_index = index as u32;
            let event = if index == last {
                OutboundEvent::ListenStringEnd {
                    string_id,
                    part_index,
                    text: chunk,
                }
            } else {
                OutboundEvent::ListenStringUnfinished {
                    string_id,
                    part_index,
                    text: chunk,
                }
            };
            self.sink.emit(&event)?;
        }

        Ok(string_id)
    }

    /// Acknowledge one performed delivery.
    pub fn acknowledge_output(&self, string_id: u32, group_id: u32) -> Result<()> {
        self.sink.emit(&OutboundEvent::SayStringPerformed {
            string_id,
            group_id,
        })
    }
}

/// Split text into chunks of at most `max_bytes` each, on char boundaries.
/// Always yields at least one (possibly empty) chunk so the END event is
/// emitted even for an empty utterance.
fn chunk_utf8(text: &str, max_bytes: usize) -> Vec<String> {
    if text.len() <= max_bytes {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::with_capacity(text.len() / max_bytes + 1);
    let mut current = String::new();

    for ch in text.chars() {
        if current.len() + ch.len_utf8() > max_bytes {
            chunks.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

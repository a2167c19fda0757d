//! Pending outbound utterances.
//!
//! The storage is shared between the event dispatcher (writer) and the
//! method multiplexer (reader): say requests land here and the active
//! backend drains them in FIFO order on its `say` ticks.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::{Error, Result, Utterance};

/// Thread-safe FIFO of utterances waiting to be performed.
#[derive(Debug)]
pub struct OutputStorage {
    queue: Mutex<VecDeque<Utterance>>,
    max_string_bytes: usize,
}

impl OutputStorage {
    /// Create storage accepting strings up to `max_string_bytes`.
    pub fn new(max_string_bytes: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            max_string_bytes,
        }
    }

    /// Drop all pending utterances.
    pub fn clear(&self) {
        self.queue.lock().unwrap().clear();
    }

    /// Queue an utterance.
    ///
    /// Empty and oversize strings are rejected with a warning and no
    /// insertion; the bus gets no error for them, the request is simply
    /// never performed.
    pub fn add(&self, text: impl Into<String>, string_id: u32, group_id: u32) {
        let text = text.into();

        if text.is_empty() || text.len() > self.max_string_bytes {
            tracing::warn!(
                string_id,
                bytes = text.len(),
                max = self.max_string_bytes,
                "rejected say string with unusable size"
            );
            return;
        }

        self.queue.lock().unwrap().push_back(Utterance {
            text,
            string_id,
            group_id,
        });
    }

    /// True when at least one utterance is pending.
    pub fn available(&self) -> bool {
        !self.queue.lock().unwrap().is_empty()
    }

    /// Pop the oldest utterance. Fails with [`Error::Empty`] when nothing
    /// is pending.
    pub fn pop(&self) -> Result<Utterance> {
        self.queue.lock().unwrap().pop_front().ok_or(Error::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let storage = OutputStorage::new(2048);
        storage.add("first", 1, 10);
        storage.add("second", 2, 10);
        storage.add("third", 3, 11);

        assert!(storage.available());
        assert_eq!(storage.pop().unwrap().text, "first");
        assert_eq!(storage.pop().unwrap().text, "second");
        assert_eq!(storage.pop().unwrap().text, "third");
        assert!(!storage.available());
    }

    #[test]
    fn test_pop_empty_fails() {
        let storage = OutputStorage::new(2048);
        assert!(matches!(storage.pop(), Err(Error::Empty)));
    }

    #[test]
    fn test_empty_string_rejected() {
        let storage = OutputStorage::new(2048);
        storage.add("", 1, 0);
        assert!(!storage.available());
    }

    #[test]
    fn test_oversize_string_rejected() {
        let storage = OutputStorage::new(8);
        storage.add("way too long for this storage", 1, 0);
        assert!(!storage.available());

        // At the limit is fine.
        storage.add("12345678", 2, 0);
        assert!(storage.available());
    }

    #[test]
    fn test_clear() {
        let storage = OutputStorage::new(2048);
        storage.add("gone", 1, 0);
        storage.clear();
        assert!(!storage.available());
    }

    #[test]
    fn test_ids_preserved() {
        let storage = OutputStorage::new(2048);
        storage.add("text", 7, 42);
        let utterance = storage.pop().unwrap();
        assert_eq!(utterance.string_id, 7);
        assert_eq!(utterance.group_id, 42);
    }
}

//! Outgoing message queue, interrupt slot, and input history

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::FileAttachment;

/// A user message waiting to be sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEntry {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileAttachment>,
}

impl OutgoingEntry {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            files: Vec::new(),
        }
    }

    pub fn with_files(mut self, files: Vec<FileAttachment>) -> Self {
        self.files = files;
        self
    }
}

impl From<&str> for OutgoingEntry {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for OutgoingEntry {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// Where the next entry to send came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextSource {
    Interrupt,
    Queue,
}

/// FIFO of entries submitted while a turn was in flight, plus a one-shot
/// interrupt slot that takes priority over the queue
#[derive(Debug, Default)]
pub struct OutgoingQueue {
    entries: VecDeque<OutgoingEntry>,
    interrupt: Option<OutgoingEntry>,
}

impl OutgoingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the back of the queue
    pub fn push(&mut self, entry: OutgoingEntry) {
        self.entries.push_back(entry);
    }

    /// Remove a queued entry by position
    pub fn remove(&mut self, index: usize) -> Option<OutgoingEntry> {
        self.entries.remove(index)
    }

    /// Set the interrupt payload; the last writer wins
    ///
    /// Returns the payload that was replaced, if any.
    pub fn stash_interrupt(&mut self, entry: OutgoingEntry) -> Option<OutgoingEntry> {
        self.interrupt.replace(entry)
    }

    /// Take what should be sent next
    ///
    /// A pending interrupt goes first and leaves the queue untouched.
    pub fn take_next(&mut self) -> Option<(OutgoingEntry, NextSource)> {
        if let Some(entry) = self.interrupt.take() {
            return Some((entry, NextSource::Interrupt));
        }
        self.entries
            .pop_front()
            .map(|entry| (entry, NextSource::Queue))
    }

    /// Put an entry back at the front after a failed send
    pub fn restore(&mut self, entry: OutgoingEntry, source: NextSource) {
        match source {
            NextSource::Interrupt => self.interrupt = Some(entry),
            NextSource::Queue => self.entries.push_front(entry),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &OutgoingEntry> {
        self.entries.iter()
    }

    pub fn pending_interrupt(&self) -> Option<&OutgoingEntry> {
        self.interrupt.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.interrupt.is_none()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.interrupt = None;
    }
}

/// Bounded list of previously submitted inputs with a recall cursor
#[derive(Debug)]
pub struct InputHistory {
    items: VecDeque<String>,
    capacity: usize,
    cursor: Option<usize>,
}

impl InputHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
            cursor: None,
        }
    }

    /// Remember a submitted input and reset the cursor
    ///
    /// Blank inputs and repeats of the latest entry are not stored.
    pub fn record(&mut self, text: &str) {
        self.cursor = None;
        if self.capacity == 0 || text.trim().is_empty() {
            return;
        }
        if self.items.back().is_some_and(|last| last == text) {
            return;
        }
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(text.to_string());
    }

    /// Step back to an older entry
    pub fn recall_previous(&mut self) -> Option<&str> {
        let index = match self.cursor {
            None => self.items.len().checked_sub(1)?,
            Some(i) => i.saturating_sub(1),
        };
        self.cursor = Some(index);
        self.items.get(index).map(String::as_str)
    }

    /// Step forward; past the newest entry the cursor resets and `None` is
    /// returned so the caller can restore its draft
    pub fn recall_next(&mut self) -> Option<&str> {
        let current = self.cursor?;
        if current + 1 >= self.items.len() {
            self.cursor = None;
            return None;
        }
        self.cursor = Some(current + 1);
        self.items.get(current + 1).map(String::as_str)
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = None;
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn texts(queue: &OutgoingQueue) -> Vec<&str> {
        queue.entries().map(|e| e.text.as_str()).collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = OutgoingQueue::new();
        for text in ["a", "b", "c"] {
            queue.push(text.into());
        }

        let sent: Vec<String> = std::iter::from_fn(|| queue.take_next().map(|(e, _)| e.text)).collect();
        assert_eq!(sent, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_interrupt_precedes_queue() {
        let mut queue = OutgoingQueue::new();
        queue.push("a".into());
        queue.push("b".into());
        queue.stash_interrupt("x".into());

        let (entry, source) = queue.take_next().unwrap();
        assert_eq!(entry.text, "x");
        assert_eq!(source, NextSource::Interrupt);
        assert_eq!(texts(&queue), vec!["a", "b"]);
    }

    #[test]
    fn test_interrupt_last_writer_wins() {
        let mut queue = OutgoingQueue::new();
        assert!(queue.stash_interrupt("x".into()).is_none());
        let replaced = queue.stash_interrupt("y".into());

        assert_eq!(replaced.map(|e| e.text).as_deref(), Some("x"));
        assert_eq!(queue.pending_interrupt().map(|e| e.text.as_str()), Some("y"));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_remove_and_restore() {
        let mut queue = OutgoingQueue::new();
        queue.push("a".into());
        queue.push("b".into());
        queue.push("c".into());

        assert_eq!(queue.remove(1).map(|e| e.text).as_deref(), Some("b"));
        assert!(queue.remove(5).is_none());

        let (entry, source) = queue.take_next().unwrap();
        queue.restore(entry, source);
        assert_eq!(texts(&queue), vec!["a", "c"]);
    }

    #[test]
    fn test_history_recall() {
        let mut history = InputHistory::new(10);
        history.record("one");
        history.record("two");
        history.record("two");
        history.record("   ");
        history.record("three");
        assert_eq!(history.len(), 3);

        assert_eq!(history.recall_previous(), Some("three"));
        assert_eq!(history.recall_previous(), Some("two"));
        assert_eq!(history.recall_previous(), Some("one"));
        assert_eq!(history.recall_previous(), Some("one"));
        assert_eq!(history.recall_next(), Some("two"));
        assert_eq!(history.recall_next(), Some("three"));
        assert_eq!(history.recall_next(), None);
        assert_eq!(history.cursor(), None);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = InputHistory::new(2);
        history.record("a");
        history.record("b");
        history.record("c");

        assert_eq!(history.len(), 2);
        assert_eq!(history.recall_previous(), Some("c"));
        assert_eq!(history.recall_previous(), Some("b"));
        assert_eq!(history.recall_previous(), Some("b"));
    }

    #[test]
    fn test_record_resets_cursor() {
        let mut history = InputHistory::new(5);
        history.record("a");
        history.recall_previous();
        assert_eq!(history.cursor(), Some(0));

        history.record("b");
        assert_eq!(history.cursor(), None);
        assert!(InputHistory::new(5).recall_previous().is_none());
    }
}

//! Thread-safe, category-indexed message accumulator.

use crate::category::MessageCategory;
use crate::message::CompilerMessage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Accumulates the messages of one compilation run.
///
/// Messages keep their emission order. Per-category counts are tracked
/// atomically so that the pipeline's "any errors so far?" checks never lock
/// the message vector.
pub struct MessageSink {
    messages: Mutex<Vec<CompilerMessage>>,
    counts: [AtomicUsize; 3],
}

impl MessageSink {
    /// Creates a new empty sink.
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
            counts: [AtomicUsize::new(0), AtomicUsize::new(0), AtomicUsize::new(0)],
        }
    }

    /// Emits a message into the sink.
    pub fn emit(&self, message: CompilerMessage) {
        self.counts[slot(message.category)].fetch_add(1, Ordering::Relaxed);
        self.lock().push(message);
    }

    /// Returns the number of messages of `category` emitted so far.
    pub fn count(&self, category: MessageCategory) -> usize {
        self.counts[slot(category)].load(Ordering::Relaxed)
    }

    /// Returns the number of messages of every category.
    pub fn total(&self) -> usize {
        MessageCategory::ALL.iter().map(|c| self.count(*c)).sum()
    }

    /// Returns `true` if any error message has been emitted.
    pub fn has_errors(&self) -> bool {
        self.count(MessageCategory::Error) > 0
    }

    /// Returns the messages of one category, in emission order.
    pub fn messages(&self, category: MessageCategory) -> Vec<CompilerMessage> {
        self.lock()
            .iter()
            .filter(|m| m.category == category)
            .cloned()
            .collect()
    }

    /// Returns a snapshot of all messages without draining.
    pub fn all(&self) -> Vec<CompilerMessage> {
        self.lock().clone()
    }

    /// Takes all accumulated messages, leaving the sink empty.
    ///
    /// Counts are not reset: they describe the whole run.
    pub fn take_all(&self) -> Vec<CompilerMessage> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CompilerMessage>> {
        // A panic while holding the lock can't leave the vector half-written.
        self.messages.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MessageSink {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSink")
            .field("errors", &self.count(MessageCategory::Error))
            .field("warnings", &self.count(MessageCategory::Warning))
            .field("total", &self.total())
            .finish()
    }
}

fn slot(category: MessageCategory) -> usize {
    match category {
        MessageCategory::Information => 0,
        MessageCategory::Warning => 1,
        MessageCategory::Error => 2,
    }
}

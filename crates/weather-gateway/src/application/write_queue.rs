//! Serialized outbound writes.
//!
//! A WebSocket sink must not have two writes in flight at once.  Browser
//! sessions therefore push every outgoing message through a [`WriteQueue`]:
//!
//! ```text
//! push onto empty queue      → caller dispatches the new head now
//! push onto non-empty queue  → only enqueued; a write is already running
//! write completes            → head popped; caller dispatches the next head
//! ```

use std::collections::VecDeque;

/// FIFO of messages waiting to be written; the head is the one in flight.
#[derive(Debug)]
pub struct WriteQueue<T> {
    pending: VecDeque<T>,
}

impl<T> Default for WriteQueue<T> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }
}

impl<T> WriteQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues `item`.  Returns `true` when the queue was empty, meaning the
    /// caller must start writing [`WriteQueue::head`] immediately.
    pub fn push(&mut self, item: T) -> bool {
        self.pending.push_back(item);
        self.pending.len() == 1
    }

    /// The message currently being written.
    pub fn head(&self) -> Option<&T> {
        self.pending.front()
    }

    /// Marks the head as written and returns the next message to dispatch.
    pub fn complete(&mut self) -> Option<&T> {
        self.pending.pop_front();
        self.pending.front()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

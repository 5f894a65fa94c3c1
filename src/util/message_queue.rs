use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::messaging::message::Message;


/// Thread-safe FIFO of pending outbound messages.
///
/// The send loop works with a peek-then-dequeue discipline: a message stays at the head until it
///  was actually transmitted on some socket, so a send failure (followed by a socket replacement)
///  re-attempts the same head instead of losing it.
pub struct MessageQueue {
    queue: Mutex<VecDeque<Arc<dyn Message>>>,
}

impl MessageQueue {
    pub fn new() -> MessageQueue {
        MessageQueue {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn enqueue(&self, message: Arc<dyn Message>) {
        self.lock().push_back(message);
    }

    pub fn try_peek(&self) -> Option<Arc<dyn Message>> {
        self.lock().front().cloned()
    }

    pub fn try_dequeue(&self) -> Option<Arc<dyn Message>> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Arc<dyn Message>>> {
        // a poisoned queue is still structurally intact - none of the operations leave it
        //  in a half-modified state
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

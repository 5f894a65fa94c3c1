use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time;
use tokio::time::Instant;


/// A counting signal: [CountdownLatch::increment] raises the count and wakes a waiter,
///  [CountdownLatch::wait_timeout] suspends until the count is positive or the timeout elapses.
///
/// The count is deliberately *not* clamped at zero. A decrement without a matching increment
///  drives it negative, and a negative latch swallows increments until it recovers - callers
///  must pair every decrement with an operation that actually consumed a signal (for the send
///  loop: never decrement without a successfully transmitted message).
pub struct CountdownLatch {
    count: AtomicI64,
    notify: Notify,
}

impl CountdownLatch {
    pub fn new() -> CountdownLatch {
        CountdownLatch {
            count: AtomicI64::new(0),
            notify: Notify::new(),
        }
    }

    pub fn count(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
        // notify_one stores a permit if no waiter is registered yet, closing the window
        //  between a waiter's count check and its first poll
        self.notify.notify_one();
    }

    pub fn decrement(&self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }

    /// Returns `true` as soon as the count is positive, `false` once the timeout elapsed.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if self.count.load(Ordering::SeqCst) > 0 {
                return true;
            }
            match time::timeout_at(deadline, notified).await {
                Ok(_) => {
                    // woken - re-check the count, this may be a stale permit
                }
                Err(_) => {
                    return false;
                }
            }
        }
    }
}

impl Default for CountdownLatch {
    fn default() -> Self {
        Self::new()
    }
}

use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::sync::watch;
use tokio::time;


/// Cooperative cancellation: a [CancellationSource] flips a watch channel, and any number of
///  [CancelToken] clones observe it. Every suspension point in the crate `select!`s on the
///  innermost token.
///
/// Sources can be linked: a child source is cancelled when its parent token is, optionally also
///  after a deadline (the per-attempt `connection_timeout` scoping). Dropping a source cancels
///  it, which makes "replace the current connection" a plain ownership move.
pub struct CancellationSource {
    sender: Arc<watch::Sender<bool>>,
}

impl CancellationSource {
    pub fn new() -> CancellationSource {
        let (sender, _) = watch::channel(false);
        CancellationSource {
            sender: Arc::new(sender),
        }
    }

    /// A source that is cancelled as soon as `parent` is.
    pub fn linked(parent: &CancelToken) -> CancellationSource {
        Self::new_linked(parent, None)
    }

    /// A source that is cancelled when `parent` is, or when `timeout` elapsed - whichever
    ///  comes first.
    pub fn linked_with_timeout(parent: &CancelToken, timeout: Duration) -> CancellationSource {
        Self::new_linked(parent, Some(timeout))
    }

    fn new_linked(parent: &CancelToken, timeout: Option<Duration>) -> CancellationSource {
        let source = CancellationSource::new();

        let sender = source.sender.clone();
        let mut parent = parent.clone();
        let mut child = source.token();
        tokio::spawn(async move {
            match timeout {
                Some(timeout) => {
                    select! {
                        _ = parent.cancelled() => { let _ = sender.send(true); }
                        _ = time::sleep(timeout) => { let _ = sender.send(true); }
                        _ = child.cancelled() => {} // cancelled or dropped independently
                    }
                }
                None => {
                    select! {
                        _ = parent.cancelled() => { let _ = sender.send(true); }
                        _ = child.cancelled() => {}
                    }
                }
            }
        });

        source
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Drop for CancellationSource {
    fn drop(&mut self) {
        let _ = self.sender.send(true);
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}


#[derive(Clone)]
pub struct CancelToken {
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Completes once the source is cancelled (or gone).
    pub async fn cancelled(&mut self) {
        let _ = self.receiver.wait_for(|cancelled| *cancelled).await;
    }
}

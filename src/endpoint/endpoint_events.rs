use std::sync::Arc;

use anyhow::anyhow;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::messaging::message::TypeTag;


/// Lifecycle events of an endpoint. These are the user-observable failure channel: the
///  framework never surfaces network errors any other way.
#[derive(Clone, Debug)]
pub enum EndpointEvent {
    /// a connection attempt completed its handshake; the socket is installed and both loops run
    ConnectionSuccess,
    /// a connection attempt failed (connect error, timeout or rejected handshake)
    ConnectionFailure,
    /// an installed connection ended - socket closed by the peer, I/O failure or local close
    Disconnection,
    /// a frame left on the wire
    RawMessageSent(RawMessageData),
    /// a frame arrived and decoded to a registered variant
    RawMessageReceived(RawMessageData),
}

#[derive(Clone, Debug)]
pub struct RawMessageData {
    pub type_tag: TypeTag,
}


#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait EndpointEventListener: Sync + Send {
    async fn on_endpoint_event(&self, event: EndpointEvent);
}


pub struct EndpointEventNotifier {
    listeners: RwLock<FxHashMap<Uuid, Arc<dyn EndpointEventListener>>>,
}

impl EndpointEventNotifier {
    pub fn new() -> EndpointEventNotifier {
        EndpointEventNotifier {
            listeners: Default::default(),
        }
    }

    /// Registers a listener, returning the key for later removal.
    pub async fn add_listener(&self, listener: Arc<dyn EndpointEventListener>) -> Uuid {
        let id = Uuid::new_v4();
        self.listeners.write().await
            .insert(id, listener);
        id
    }

    pub async fn try_remove_listener(&self, listener_id: &Uuid) -> anyhow::Result<()> {
        match self.listeners.write().await
            .remove(listener_id)
        {
            None => Err(anyhow!("tried to remove a listener that was not (no longer?) registered: {}", listener_id)),
            Some(_) => Ok(()),
        }
    }

    /// Delivers an event to every listener, serially. Listeners that need to do real work
    ///  should offload it - this call holds up the emitting loop.
    pub async fn emit(&self, event: EndpointEvent) {
        let listeners = self.listeners.read().await
            .values()
            .cloned()
            .collect::<Vec<_>>();
        for listener in listeners {
            listener.on_endpoint_event(event.clone()).await;
        }
    }
}

impl Default for EndpointEventNotifier {
    fn default() -> Self {
        Self::new()
    }
}

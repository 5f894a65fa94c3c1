use std::collections::hash_map::Entry;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use rustc_hash::FxHashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::endpoint::endpoint_config::EndpointConfig;
use crate::endpoint::remote_endpoint::RemoteEndpoint;
use crate::endpoint::Endpoint;
use crate::messaging::codec;
use crate::messaging::codec::ReadResult;
use crate::messaging::dispatch::MessageDispatcher;
use crate::messaging::registry::MessageRegistry;
use crate::messaging::system_messages::Identification;
use crate::util::cancellation::CancellationSource;


/// Ceiling for a freshly accepted socket to identify itself. Deliberately independent of the
///  configurable `connection_timeout`, which only bounds the handshake once an identity is
///  established.
pub const IDENTIFICATION_TIMEOUT: Duration = Duration::from_secs(20);


#[async_trait::async_trait]
pub trait NewClientListener: Sync + Send {
    async fn on_new_client(&self, endpoint: Arc<RemoteEndpoint>);
}


/// The host's front door: accepts TCP connections, identifies each one by the hardware address
///  in its first frame, and either reattaches a known identity onto the new socket or registers
///  a fresh [RemoteEndpoint] for it.
///
/// The client table is keyed by hardware address and append-only; the network identifier handed
///  to a new client is the table size at insertion, so identifiers stay stable across
///  reconnects and are never reused.
pub struct EndpointAuthenticator {
    listening_port: u16,
    registry: Arc<MessageRegistry>,
    dispatcher: Arc<MessageDispatcher>,
    config: EndpointConfig,
    clients: Mutex<FxHashMap<[u8; 6], Arc<RemoteEndpoint>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    cancel: CancellationSource,
    new_client_listeners: RwLock<FxHashMap<Uuid, Arc<dyn NewClientListener>>>,
}

impl EndpointAuthenticator {
    pub fn new(
        listening_port: u16,
        registry: Arc<MessageRegistry>,
        dispatcher: Arc<MessageDispatcher>,
        config: EndpointConfig,
    ) -> Arc<EndpointAuthenticator> {
        Arc::new(EndpointAuthenticator {
            listening_port,
            registry,
            dispatcher,
            config,
            clients: Mutex::new(Default::default()),
            local_addr: Mutex::new(None),
            cancel: CancellationSource::new(),
            new_client_listeners: Default::default(),
        })
    }

    /// Binds the listening socket and launches the accept loop. Pass port 0 to let the OS pick;
    ///  [EndpointAuthenticator::local_addr] reports the actual binding.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.listening_port)).await
            .with_context(|| format!("binding listening port {}", self.listening_port))?;
        let local_addr = listener.local_addr()?;
        *self.lock_local_addr() = Some(local_addr);
        info!(?local_addr, "accepting client connections");

        let this = self.clone();
        tokio::spawn(async move { this.accept_loop(listener).await });
        Ok(())
    }

    /// The TCP port clients should dial (meaningful once started). This is also what the
    ///  discovery answerer advertises.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.lock_local_addr()
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut cancel = self.cancel.token();
        loop {
            let accepted = select! {
                _ = cancel.cancelled() => break,
                r = listener.accept() => r,
            };
            match accepted {
                Ok((stream, peer)) => {
                    trace!(?peer, "accepted connection");
                    // identification runs on its own task - a client that stalls inside its
                    //  20 second ceiling must not hold up everyone else's accept
                    tokio::spawn(self.clone().handle_incoming(stream, peer));
                }
                Err(e) => {
                    warn!("error accepting a connection: {}", e);
                }
            }
        }
        debug!("accept loop terminated");
    }

    /// Identification and routing for one accepted socket. Anything other than a valid
    ///  identification frame within the ceiling closes the socket; the accept loop goes on.
    async fn handle_incoming(self: Arc<Self>, mut stream: TcpStream, peer: SocketAddr) {
        let attempt = CancellationSource::linked_with_timeout(&self.cancel.token(), IDENTIFICATION_TIMEOUT);
        let mut cancel = attempt.token();

        let hardware_address = match codec::read_message(&mut stream, &self.registry, &mut cancel).await {
            ReadResult::Message(message) => {
                match message.as_any().downcast_ref::<Identification>() {
                    Some(identification) => identification.hardware_address,
                    None => {
                        warn!(?peer, "expected an identification, received {:?} - closing", message);
                        return;
                    }
                }
            }
            _ => {
                warn!(?peer, "connection closed, timed out or sent garbage before identifying - closing");
                return;
            }
        };

        // lookup-or-insert under a single lock acquisition: two simultaneous first contacts
        //  from the same hardware address must resolve to one table entry and one identifier
        let (endpoint, is_new) = {
            let mut clients = self.lock_clients();
            let network_identifier = clients.len() as u8;
            match clients.entry(hardware_address) {
                Entry::Occupied(e) => (e.get().clone(), false),
                Entry::Vacant(e) => {
                    let endpoint = RemoteEndpoint::new(
                        hardware_address,
                        network_identifier,
                        self.registry.clone(),
                        self.dispatcher.clone(),
                        self.config.clone(),
                    );
                    e.insert(endpoint.clone());
                    (endpoint, true)
                }
            }
        };

        if is_new {
            info!(address = ?hardware_address, network_identifier = endpoint.network_identifier(), "registered new client");
            endpoint.attach(stream);
            self.notify_new_client(endpoint).await;
        } else {
            debug!(address = ?hardware_address, "known identity reconnected");
            endpoint.reconnect(stream);
        }
    }

    pub fn client_for(&self, hardware_address: &[u8; 6]) -> Option<Arc<RemoteEndpoint>> {
        self.lock_clients().get(hardware_address).cloned()
    }

    pub fn clients(&self) -> Vec<Arc<RemoteEndpoint>> {
        self.lock_clients().values().cloned().collect()
    }

    pub fn client_count(&self) -> usize {
        self.lock_clients().len()
    }

    pub async fn add_new_client_listener(&self, listener: Arc<dyn NewClientListener>) -> Uuid {
        let id = Uuid::new_v4();
        self.new_client_listeners.write().await
            .insert(id, listener);
        id
    }

    async fn notify_new_client(&self, endpoint: Arc<RemoteEndpoint>) {
        let listeners = self.new_client_listeners.read().await
            .values()
            .cloned()
            .collect::<Vec<_>>();
        for listener in listeners {
            listener.on_new_client(endpoint.clone()).await;
        }
    }

    /// Stops accepting and disposes every remote endpoint. The client table itself stays as-is:
    ///  it is append-only, and nothing runs anymore that could consult it.
    pub fn dispose(&self) {
        self.cancel.cancel();
        for endpoint in self.lock_clients().values() {
            endpoint.dispose();
        }
    }

    fn lock_clients(&self) -> std::sync::MutexGuard<'_, FxHashMap<[u8; 6], Arc<RemoteEndpoint>>> {
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_local_addr(&self) -> std::sync::MutexGuard<'_, Option<SocketAddr>> {
        self.local_addr.lock().unwrap_or_else(|e| e.into_inner())
    }
}

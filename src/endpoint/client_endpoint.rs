use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::select;
use tracing::{debug, warn};

use crate::endpoint::endpoint_config::EndpointConfig;
use crate::endpoint::endpoint_events::{EndpointEvent, EndpointEventListener};
use crate::endpoint::{handle_new_connection, Endpoint, EndpointCore};
use crate::messaging::client_address::ClientAddress;
use crate::messaging::codec;
use crate::messaging::codec::ReadResult;
use crate::messaging::dispatch::MessageDispatcher;
use crate::messaging::message::EndpointKind;
use crate::messaging::registry::MessageRegistry;
use crate::messaging::system_messages::{Identification, LoginConfirmation};
use crate::util::cancellation::{CancelToken, CancellationSource};


/// The initiating side of a connection: dials a host, identifies itself with its hardware
///  address, and keeps reconnecting (with the same identity, so the host reattaches it to the
///  same remote endpoint) until it is disposed.
pub struct ClientEndpoint {
    core: EndpointCore,
    target: SocketAddr,
    address: ClientAddress,
}

impl ClientEndpoint {
    /// A client identified by the local machine's first non-loopback interface, distinguished
    ///  from other logical clients on the same device by `discriminator`. Schedules its first
    ///  connection attempt immediately.
    pub async fn new(
        target: SocketAddr,
        discriminator: u16,
        registry: Arc<MessageRegistry>,
        dispatcher: Arc<MessageDispatcher>,
        config: EndpointConfig,
    ) -> anyhow::Result<Arc<ClientEndpoint>> {
        let address = ClientAddress::from_local_interface(discriminator)?;
        Ok(Self::with_address(target, address, registry, dispatcher, config).await)
    }

    /// Like [ClientEndpoint::new], but with an explicit identity. This is what tests use to run
    ///  several distinct "devices" on one machine.
    pub async fn with_address(
        target: SocketAddr,
        address: ClientAddress,
        registry: Arc<MessageRegistry>,
        dispatcher: Arc<MessageDispatcher>,
        config: EndpointConfig,
    ) -> Arc<ClientEndpoint> {
        let endpoint = Arc::new(ClientEndpoint {
            core: EndpointCore::new(registry, dispatcher, config, EndpointKind::Client),
            target,
            address,
        });

        endpoint.core.add_listener(Arc::new(ReconnectListener {
            endpoint: Arc::downgrade(&endpoint),
        })).await;

        endpoint.schedule_connection_attempt();
        endpoint
    }

    pub fn client_address(&self) -> ClientAddress {
        self.address
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    fn schedule_connection_attempt(self: &Arc<Self>) {
        let endpoint = self.clone();
        tokio::spawn(async move {
            endpoint.request_connection(endpoint.core.config.connection_timeout).await;
        });
    }

    /// One connection attempt, bounded by `timeout`. Success installs the socket and starts
    ///  the loops; failure (including timeout) raises `ConnectionFailure`, which the reconnect
    ///  listener turns into the next attempt.
    pub async fn request_connection(self: &Arc<Self>, timeout: Duration) {
        if self.core.cancel_token().is_cancelled() {
            return;
        }
        debug!(target = ?self.target, "requesting connection");

        let attempt = CancellationSource::linked_with_timeout(&self.core.cancel_token(), timeout);
        let mut cancel = attempt.token();

        let stream = select! {
            _ = cancel.cancelled() => {
                debug!(target = ?self.target, "connection attempt cancelled or timed out");
                None
            }
            r = TcpStream::connect(self.target) => {
                match r {
                    Ok(stream) => Some(stream),
                    Err(e) => {
                        debug!(target = ?self.target, "connection attempt failed: {}", e);
                        None
                    }
                }
            }
        };

        match stream {
            Some(stream) => {
                handle_new_connection(self.clone(), stream, cancel).await;
            }
            None => {
                self.core.emit(EndpointEvent::ConnectionFailure).await;
            }
        }
    }
}

#[async_trait::async_trait]
impl Endpoint for ClientEndpoint {
    fn core(&self) -> &EndpointCore {
        &self.core
    }

    /// Identify, then wait for the host's login confirmation and adopt the network identifier
    ///  it carries.
    async fn handshake(&self, stream: &mut TcpStream, cancel: &mut CancelToken) -> bool {
        let identification = Identification {
            hardware_address: self.address.hardware_address,
        };
        if !codec::write_message(stream, &self.core.registry, &identification, cancel).await {
            return false;
        }

        match codec::read_message(stream, &self.core.registry, cancel).await {
            ReadResult::Message(message) => {
                match message.as_any().downcast_ref::<LoginConfirmation>() {
                    Some(confirmation) => {
                        debug!(address = ?self.address, network_identifier = confirmation.network_identifier, "login confirmed");
                        self.core.adopt_network_identifier(confirmation.network_identifier);
                        true
                    }
                    None => {
                        warn!("expected a login confirmation, received {:?} - rejecting connection", message);
                        false
                    }
                }
            }
            _ => false,
        }
    }
}


/// Keeps the connection chain alive: every failure or disconnection schedules the next attempt
///  right away, bounded only by the endpoint's disposal. Each attempt is itself bounded by the
///  configured connection timeout.
struct ReconnectListener {
    endpoint: Weak<ClientEndpoint>,
}

#[async_trait::async_trait]
impl EndpointEventListener for ReconnectListener {
    async fn on_endpoint_event(&self, event: EndpointEvent) {
        if !matches!(event, EndpointEvent::ConnectionFailure | EndpointEvent::Disconnection) {
            return;
        }

        if let Some(endpoint) = self.endpoint.upgrade() {
            if !endpoint.core.cancel_token().is_cancelled() {
                endpoint.schedule_connection_attempt();
            }
        }
    }
}

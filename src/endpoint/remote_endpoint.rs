use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::endpoint::endpoint_config::EndpointConfig;
use crate::endpoint::{handle_new_connection, Endpoint, EndpointCore};
use crate::messaging::codec;
use crate::messaging::dispatch::MessageDispatcher;
use crate::messaging::message::EndpointKind;
use crate::messaging::registry::MessageRegistry;
use crate::messaging::system_messages::LoginConfirmation;
use crate::util::cancellation::{CancelToken, CancellationSource};


/// The host's handle for one identified client. It never dials: the authenticator hands it a
///  socket at registration and again whenever the same identity reconnects; between sockets it
///  just sits in the host's table, queueing outbound messages.
pub struct RemoteEndpoint {
    core: EndpointCore,
    hardware_address: [u8; 6],
}

impl RemoteEndpoint {
    pub(crate) fn new(
        hardware_address: [u8; 6],
        network_identifier: u8,
        registry: Arc<MessageRegistry>,
        dispatcher: Arc<MessageDispatcher>,
        config: EndpointConfig,
    ) -> Arc<RemoteEndpoint> {
        let core = EndpointCore::new(registry, dispatcher, config, EndpointKind::Host);
        core.adopt_network_identifier(network_identifier);

        Arc::new(RemoteEndpoint {
            core,
            hardware_address,
        })
    }

    pub fn hardware_address(&self) -> [u8; 6] {
        self.hardware_address
    }

    /// Brings a new socket to this endpoint: completes the handshake and installs it, replacing
    ///  (and closing) whatever socket was current. Identification already happened - the
    ///  authenticator consumed it before routing the socket here.
    pub(crate) fn attach(self: &Arc<Self>, stream: TcpStream) {
        let attempt = CancellationSource::linked_with_timeout(
            &self.core.cancel_token(),
            self.core.config.connection_timeout,
        );
        let endpoint = self.clone();
        tokio::spawn(async move {
            let cancel = attempt.token();
            handle_new_connection(endpoint, stream, cancel).await;
            drop(attempt); // keep the attempt scope alive across the handshake
        });
    }

    /// Reattaches a returning identity onto a fresh socket.
    pub fn reconnect(self: &Arc<Self>, stream: TcpStream) {
        debug!(address = ?self.hardware_address, "reconnecting existing endpoint onto a new socket");
        self.attach(stream);
    }
}

#[async_trait::async_trait]
impl Endpoint for RemoteEndpoint {
    fn core(&self) -> &EndpointCore {
        &self.core
    }

    /// The host's half of the handshake is a single frame: confirm the login with the
    ///  network identifier assigned to this identity.
    async fn handshake(&self, stream: &mut TcpStream, cancel: &mut CancelToken) -> bool {
        let network_identifier = match self.core.network_identifier() {
            Some(id) => id,
            None => {
                warn!("remote endpoint without an assigned network identifier - rejecting connection");
                return false;
            }
        };

        let confirmation = LoginConfirmation { network_identifier };
        codec::write_message(stream, &self.core.registry, &confirmation, cancel).await
    }
}

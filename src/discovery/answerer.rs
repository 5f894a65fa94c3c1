use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::select;
use tracing::{debug, info, trace, warn};

use crate::discovery::descriptor::EndpointDescriptor;
use crate::discovery::BROADCAST_HEADER;
use crate::util::cancellation::CancellationSource;


/// Makes a host findable on the local network: answers every broadcast query on the discovery
///  port with the host's descriptor and the address of its TCP listener.
pub struct DiscoveryAnswerer {
    descriptor: EndpointDescriptor,
    discovery_port: u16,
    tcp_port: u16,
    local_addr: std::sync::Mutex<Option<SocketAddr>>,
    cancel: CancellationSource,
}

impl DiscoveryAnswerer {
    /// `tcp_port` is what gets advertised - typically the authenticator's listening port.
    pub fn new(descriptor: EndpointDescriptor, discovery_port: u16, tcp_port: u16) -> Arc<DiscoveryAnswerer> {
        Arc::new(DiscoveryAnswerer {
            descriptor,
            discovery_port,
            tcp_port,
            local_addr: std::sync::Mutex::new(None),
            cancel: CancellationSource::new(),
        })
    }

    /// Binds the discovery port (with address reuse, so several answerers can coexist on one
    ///  machine) and launches the answer loop.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let socket = bind_reusable(self.discovery_port)
            .with_context(|| format!("binding discovery port {}", self.discovery_port))?;
        let local_addr = socket.local_addr()?;
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner()) = Some(local_addr);
        info!(?local_addr, "answering discovery queries");

        let this = self.clone();
        tokio::spawn(async move { this.answer_loop(socket).await });
        Ok(())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn answer_loop(self: Arc<Self>, socket: UdpSocket) {
        let mut cancel = self.cancel.token();
        let mut buf = vec![0u8; 2048];

        loop {
            let received = select! {
                _ = cancel.cancelled() => break,
                r = socket.recv_from(&mut buf) => r,
            };
            let (len, from) = match received {
                Ok(x) => x,
                Err(e) => {
                    warn!("error receiving from the discovery socket: {}", e);
                    continue;
                }
            };

            if !is_query(&buf[..len]) {
                trace!(?from, "ignoring unrelated datagram on the discovery port");
                continue;
            }

            if let Err(e) = self.answer(&socket, from).await {
                warn!(?from, "error answering a discovery query: {}", e);
            }
        }
        debug!("discovery answer loop terminated");
    }

    async fn answer(&self, socket: &UdpSocket, requester: SocketAddr) -> anyhow::Result<()> {
        let own_ip = local_ip_towards(requester).await?;
        let advertised = SocketAddr::new(own_ip, self.tcp_port);

        let mut buf = BytesMut::new();
        self.descriptor.ser(advertised, &mut buf)?;
        socket.send_to(&buf, requester).await?;
        debug!(?requester, ?advertised, "answered discovery query");
        Ok(())
    }

    pub fn dispose(&self) {
        self.cancel.cancel();
    }
}

fn is_query(payload: &[u8]) -> bool {
    let header = BROADCAST_HEADER.as_bytes();
    payload.len() >= header.len() && payload[..header.len()].eq_ignore_ascii_case(header)
}

/// Binding with SO_REUSEADDR, which tokio's socket builder does not expose.
fn bind_reusable(port: u16) -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::from(([0, 0, 0, 0], port)).into())?;
    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(socket.into())?)
}

/// The local IP a peer at `towards` would see us under. Connecting a throwaway UDP socket makes
///  the OS pick the right outbound interface without sending anything.
async fn local_ip_towards(towards: SocketAddr) -> anyhow::Result<IpAddr> {
    let probe = if towards.is_ipv4() {
        UdpSocket::bind("0.0.0.0:0").await?
    } else {
        UdpSocket::bind("[::]:0").await?
    };
    probe.connect(towards).await?;
    Ok(probe.local_addr()?.ip())
}

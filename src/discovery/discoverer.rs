use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::discovery::descriptor::{DiscoveredHost, EndpointDescriptor};
use crate::discovery::{BROADCAST_HEADER, MAX_DATAGRAM_SIZE};


/// How long a query collects answers before returning what it found.
pub const RESPONSE_WINDOW: Duration = Duration::from_secs(1);


/// The client side of discovery: broadcast a query datagram, then collect descriptor answers
///  for one response window.
pub struct Discoverer {
    discovery_port: u16,
    game_identifier: Option<String>,
    target: Option<SocketAddr>,
}

impl Discoverer {
    /// `game_identifier` filters the answers; `None` accepts every host.
    pub fn new(discovery_port: u16, game_identifier: Option<String>) -> Discoverer {
        Discoverer {
            discovery_port,
            game_identifier,
            target: None,
        }
    }

    /// Directs the query at a specific address instead of the broadcast address. Used by tests
    ///  and for re-checking a previously discovered host.
    pub fn with_target(mut self, target: SocketAddr) -> Discoverer {
        self.target = Some(target);
        self
    }

    /// One query/collect cycle. Blocks for the full [RESPONSE_WINDOW].
    pub async fn discover(&self) -> anyhow::Result<Vec<DiscoveredHost>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.set_broadcast(true)?;

        let target = self.target
            .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::BROADCAST, self.discovery_port)));
        socket.send_to(BROADCAST_HEADER.as_bytes(), target).await?;
        debug!(?target, "sent discovery query");

        let deadline = Instant::now() + RESPONSE_WINDOW;
        let mut found = Vec::new();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let received = match time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Ok(r) => r,
                Err(_) => break, // response window elapsed
            };
            let (len, from) = match received {
                Ok(x) => x,
                Err(e) => {
                    warn!("error receiving a discovery answer: {}", e);
                    continue;
                }
            };

            match EndpointDescriptor::try_deser(&mut &buf[..len]) {
                Ok(host) => {
                    if self.accepts(&host) {
                        debug!(?from, descriptor = ?host.descriptor, "discovered host");
                        found.push(host);
                    } else {
                        debug!(?from, game_identifier = ?host.descriptor.game_identifier, "filtered out discovery answer");
                    }
                }
                Err(e) => {
                    debug!(?from, "undecodable discovery answer: {}", e);
                }
            }
        }

        Ok(found)
    }

    fn accepts(&self, host: &DiscoveredHost) -> bool {
        match &self.game_identifier {
            Some(filter) => filter == &host.descriptor.game_identifier,
            None => true,
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;

    fn host(game_identifier: &str) -> DiscoveredHost {
        DiscoveredHost {
            descriptor: EndpointDescriptor {
                name: "n".to_string(),
                game_identifier: game_identifier.to_string(),
                additional_data: vec![],
            },
            address: SocketAddr::from(([127, 0, 0, 1], 1)),
        }
    }

    #[test]
    fn test_filter() {
        let unfiltered = Discoverer::new(0, None);
        assert!(unfiltered.accepts(&host("a")));

        let filtered = Discoverer::new(0, Some("a".to_string()));
        assert!(filtered.accepts(&host("a")));
        assert!(!filtered.accepts(&host("b")));
        assert!(!filtered.accepts(&host("")));
    }
}

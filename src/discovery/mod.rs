pub mod answerer;
pub mod descriptor;
pub mod discoverer;


/// Well-known UDP port the discovery exchange runs on.
pub const DISCOVERY_PORT: u16 = 14242;

/// Fixed query payload; answerers match it case-insensitively at the start of a datagram and
///  ignore everything else arriving on the discovery port.
pub const BROADCAST_HEADER: &str = "TBNF-DISCOVER";

/// Largest payload a single UDP datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65507;

use std::time::Duration;


/// Per-endpoint configuration. Mutate before the endpoint starts; the loops read it as-is and
///  never expect it to change.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// idle period after which the send loop injects an inactivity probe so a dead peer is
    ///  detected by the next write
    pub inactivity_check_interval: Duration,
    /// upper bound for a single connection or reconnect attempt
    pub connection_timeout: Duration,
}

impl EndpointConfig {
    pub fn new() -> EndpointConfig {
        EndpointConfig {
            inactivity_check_interval: Duration::from_secs(5),
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::new()
    }
}

use std::time::Duration;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8083;

/// Everything the server needs to know before it binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// Messages a client may have pending before the dispatcher evicts it.
    pub mailbox_capacity: usize,
    /// Decoded messages waiting for the dispatcher.
    pub inbound_capacity: usize,
    /// How long a new connection has to send its login frame.
    pub handshake_timeout: Duration,
    /// Drop a session that sends nothing for this long.
    pub idle_timeout: Option<Duration>,
    /// Drop a session whose socket does not accept a frame within this long.
    pub write_timeout: Option<Duration>,
    /// Consecutive undecodable frames tolerated before the session is closed.
    pub max_decode_errors: u32,
}

impl RelayConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Raises queue capacities to at least one; tokio channels cannot be empty.
    pub fn normalized(self) -> Self {
        Self {
            mailbox_capacity: self.mailbox_capacity.max(1),
            inbound_capacity: self.inbound_capacity.max(1),
            ..self
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            mailbox_capacity: 64,
            inbound_capacity: 1024,
            handshake_timeout: Duration::from_secs(10),
            idle_timeout: None,
            write_timeout: Some(Duration::from_secs(10)),
            max_decode_errors: 8,
        }
    }
}

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_HOST, DEFAULT_PORT, RelayConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server, accepting TCP connections.
    Server(ServerArgs),
    /// Connect to a relay and participate in the chat.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// The host to listen on.
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// The port to listen on. Use 0 for an ephemeral port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Pending messages per client before a slow client is dropped.
    #[arg(long, default_value_t = 64)]
    pub mailbox_capacity: usize,

    /// Seconds a new connection has to log in.
    #[arg(long, default_value_t = 10)]
    pub handshake_timeout_secs: u64,

    /// Close sessions that stay silent for this many seconds.
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,

    /// Close sessions whose socket blocks a write for this many seconds.
    #[arg(long, default_value_t = 10)]
    pub write_timeout_secs: u64,
}

impl From<ServerArgs> for RelayConfig {
    fn from(args: ServerArgs) -> Self {
        Self {
            host: args.host,
            port: args.port,
            mailbox_capacity: args.mailbox_capacity,
            handshake_timeout: Duration::from_secs(args.handshake_timeout_secs),
            idle_timeout: args.idle_timeout_secs.map(Duration::from_secs),
            write_timeout: Some(Duration::from_secs(args.write_timeout_secs)),
            ..RelayConfig::default()
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Username announced in the login handshake.
    #[arg(long)]
    pub username: String,

    /// The host to connect to.
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// The port to connect to.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

impl ClientArgs {
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

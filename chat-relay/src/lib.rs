//! Multi-client chat relay over TCP.
//!
//! Clients connect, send a login frame whose content is
//! [`message::LOGIN_TOKEN`], and from then on every message they send is
//! relayed to every other logged-in client. Each module owns one concern:
//!
//! - [`cli`] parses the command line for server and client modes.
//! - [`config`] holds the server settings handed to [`server::ChatServer`].
//! - [`message`] defines [`message::ChatMessage`] and the system notices.
//! - [`codec`] frames messages on the wire (length prefix + JSON).
//! - [`registry`] tracks logged-in clients by username.
//! - [`dispatcher`] fans inbound messages out to client mailboxes.
//! - [`session`] drives one connection from login to teardown.
//! - [`server`] accepts connections and wires the pieces together.
//! - [`client`] is a line-oriented terminal client.
//! - [`error`] lists the connection-scoped failures.
//!
//! Data flows socket → session reader → inbound queue → dispatcher →
//! mailbox → session writer → socket.

pub mod cli;
pub mod client;
pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod registry;
pub mod server;
pub mod session;

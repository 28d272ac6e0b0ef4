use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Content of the first frame every connection must send.
pub const LOGIN_TOKEN: &str = "GOCHATLOGIN";

/// Sender name used for notices the server writes directly to a peer.
pub const SERVER_SENDER: &str = "server";

/// The unit routed by the relay.
///
/// Every field is optional on the wire; a missing field decodes as its empty
/// value so that `(sender, send_time, content)` survives a decode/encode cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatMessage {
    pub sender: String,
    pub send_time: u64,
    pub content: String,
}

impl ChatMessage {
    /// Builds a message stamped with the current time.
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            send_time: now_epoch_secs(),
            content: content.into(),
        }
    }

    /// The handshake frame a client sends right after connecting.
    pub fn login(username: impl Into<String>) -> Self {
        Self::new(username, LOGIN_TOKEN)
    }

    pub fn joined(username: &str) -> Self {
        Self::new(username, format!("User {username} has connected"))
    }

    pub fn left(username: &str) -> Self {
        Self::new(username, format!("User {username} has disconnected"))
    }

    pub fn is_login(&self) -> bool {
        self.content == LOGIN_TOKEN
    }
}

pub fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

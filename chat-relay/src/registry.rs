use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use tokio::sync::{Notify, RwLock, mpsc};

use crate::{
    error::{RelayError, Result},
    message::ChatMessage,
};

pub type SessionId = u64;

/// The registry's view of one logged-in connection.
///
/// Holding the mailbox sender here is what keeps the client's writer alive:
/// once the handle is removed and every snapshot clone is dropped, the mailbox
/// closes and the writer winds down. `kick` ends the session even while its
/// writer is blocked on the socket.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    pub username: String,
    pub remote_addr: SocketAddr,
    pub session_id: SessionId,
    pub mailbox: mpsc::Sender<ChatMessage>,
    pub kick: Arc<Notify>,
}

impl ClientHandle {
    pub fn kick(&self) {
        self.kick.notify_one();
    }
}

/// Live clients keyed by username.
///
/// Cloning is cheap and yields another handle onto the same set.
#[derive(Debug, Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<String, ClientHandle>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, client: ClientHandle) -> Result<()> {
        let mut clients = self.clients.write().await;

        if clients.contains_key(&client.username) {
            return Err(RelayError::DuplicateUsername(client.username));
        }

        clients.insert(client.username.clone(), client);
        Ok(())
    }

    pub async fn remove(&self, username: &str) -> Option<ClientHandle> {
        let mut clients = self.clients.write().await;
        clients.remove(username)
    }

    /// Removes `username` only while it still belongs to `session_id`.
    pub async fn remove_session(
        &self,
        username: &str,
        session_id: SessionId,
    ) -> Option<ClientHandle> {
        let mut clients = self.clients.write().await;
        match clients.get(username) {
            Some(client) if client.session_id == session_id => clients.remove(username),
            _ => None,
        }
    }

    /// Copies the current clients out so callers never iterate under the lock.
    pub async fn snapshot(&self) -> Vec<ClientHandle> {
        let clients = self.clients.read().await;
        clients.values().cloned().collect()
    }

    pub async fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&ClientHandle),
    {
        for client in self.snapshot().await {
            visit(&client);
        }
    }

    pub async fn contains(&self, username: &str) -> bool {
        self.clients.read().await.contains_key(username)
    }

    pub async fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drops every handle and kicks its session.
    pub async fn clear(&self) -> usize {
        let mut clients = self.clients.write().await;
        let dropped = clients.len();
        for (_, client) in clients.drain() {
            client.kick();
        }
        dropped
    }
}

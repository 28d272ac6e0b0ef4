use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::{message::ChatMessage, registry::ClientRegistry};

/// Outcome of fanning one message out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: Vec<String>,
    pub evicted: Vec<String>,
}

/// Single consumer of the inbound queue.
///
/// Every message is pushed onto the mailbox of each registered client except
/// its sender. Pushes never wait: a client whose mailbox is full or already
/// closed is evicted from the registry so one stalled peer cannot hold up the
/// rest.
pub struct Dispatcher {
    registry: ClientRegistry,
    inbound: mpsc::Receiver<ChatMessage>,
}

impl Dispatcher {
    pub fn new(registry: ClientRegistry, inbound: mpsc::Receiver<ChatMessage>) -> Self {
        Self { registry, inbound }
    }

    /// Runs until every inbound sender has been dropped.
    pub async fn run(mut self) {
        debug!("dispatcher started");
        while let Some(message) = self.inbound.recv().await {
            let report = fan_out(&self.registry, message).await;
            debug!(
                delivered = report.delivered.len(),
                evicted = report.evicted.len(),
                "message dispatched"
            );
        }
        debug!("inbound queue closed; dispatcher stopping");
    }
}

pub async fn fan_out(registry: &ClientRegistry, message: ChatMessage) -> FanOut {
    let mut report = FanOut::default();
    let mut stale = Vec::new();

    for client in registry.snapshot().await {
        if client.username == message.sender {
            continue;
        }

        match client.mailbox.try_send(message.clone()) {
            Ok(()) => report.delivered.push(client.username),
            Err(TrySendError::Full(_)) => {
                warn!(
                    username = %client.username,
                    peer = %client.remote_addr,
                    "mailbox full; dropping slow client"
                );
                stale.push(client);
            }
            Err(TrySendError::Closed(_)) => {
                debug!(username = %client.username, "mailbox closed; dropping client");
                stale.push(client);
            }
        }
    }

    for client in stale {
        if registry
            .remove_session(&client.username, client.session_id)
            .await
            .is_some()
        {
            info!(username = %client.username, "client evicted");
        }
        client.kick();
        report.evicted.push(client.username);
    }

    report
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::registry::tests::test_client;

    #[tokio::test]
    async fn message_reaches_everyone_but_the_sender() {
        let registry = ClientRegistry::new();
        let (alice, mut alice_inbox) = test_client("alice", 1, 8);
        let (bob, mut bob_inbox) = test_client("bob", 2, 8);
        let (carol, mut carol_inbox) = test_client("carol", 3, 8);
        for client in [alice, bob, carol] {
            registry.add(client).await.expect("register");
        }

        let report = fan_out(&registry, ChatMessage::new("alice", "hello")).await;

        let mut delivered = report.delivered.clone();
        delivered.sort();
        assert_eq!(delivered, vec!["bob".to_string(), "carol".to_string()]);
        assert!(report.evicted.is_empty());

        for inbox in [&mut bob_inbox, &mut carol_inbox] {
            let received = inbox.try_recv().expect("one copy");
            assert_eq!(received.sender, "alice");
            assert_eq!(received.content, "hello");
            assert!(inbox.try_recv().is_err(), "exactly one copy");
        }
        assert!(alice_inbox.try_recv().is_err(), "sender gets no copy");
    }

    #[tokio::test]
    async fn full_mailbox_is_evicted_without_stalling_others() {
        let registry = ClientRegistry::new();
        let (stalled, _stalled_inbox) = test_client("stalled", 1, 1);
        let stalled_kick = stalled.kick.clone();
        let (bob, mut bob_inbox) = test_client("bob", 2, 8);
        registry.add(stalled).await.expect("register stalled");
        registry.add(bob).await.expect("register bob");

        let first = fan_out(&registry, ChatMessage::new("alice", "one")).await;
        assert!(first.evicted.is_empty());

        let second = timeout(
            Duration::from_millis(200),
            fan_out(&registry, ChatMessage::new("alice", "two")),
        )
        .await
        .expect("fan-out must not wait on a full mailbox");

        assert_eq!(second.evicted, vec!["stalled".to_string()]);
        assert_eq!(second.delivered, vec!["bob".to_string()]);
        assert_eq!(registry.usernames().await, vec!["bob".to_string()]);
        timeout(Duration::from_millis(200), stalled_kick.notified())
            .await
            .expect("evicted session is kicked");
        assert_eq!(bob_inbox.recv().await.expect("one").content, "one");
        assert_eq!(bob_inbox.recv().await.expect("two").content, "two");
    }

    #[tokio::test]
    async fn closed_mailbox_is_evicted() {
        let registry = ClientRegistry::new();
        let (gone, gone_inbox) = test_client("gone", 1, 4);
        registry.add(gone).await.expect("register");
        drop(gone_inbox);

        let report = fan_out(&registry, ChatMessage::new("bob", "anyone?")).await;

        assert_eq!(report.evicted, vec!["gone".to_string()]);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn removed_client_receives_nothing_further() {
        let registry = ClientRegistry::new();
        let (alice, mut alice_inbox) = test_client("alice", 1, 4);
        let (bob, _bob_inbox) = test_client("bob", 2, 4);
        registry.add(alice).await.expect("register alice");
        registry.add(bob).await.expect("register bob");

        registry.remove("alice").await;
        fan_out(&registry, ChatMessage::new("bob", "after alice left")).await;

        assert!(alice_inbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn run_drains_the_queue_in_order() {
        let registry = ClientRegistry::new();
        let (bob, mut bob_inbox) = test_client("bob", 1, 8);
        registry.add(bob).await.expect("register bob");

        let (inbound_tx, inbound_rx) = mpsc::channel(8);
        let dispatcher = tokio::spawn(Dispatcher::new(registry.clone(), inbound_rx).run());

        for text in ["first", "second", "third"] {
            inbound_tx
                .send(ChatMessage::new("alice", text))
                .await
                .expect("enqueue");
        }
        drop(inbound_tx);
        dispatcher.await.expect("dispatcher finishes once senders are gone");

        for expected in ["first", "second", "third"] {
            assert_eq!(bob_inbox.recv().await.expect("message").content, expected);
        }
    }
}

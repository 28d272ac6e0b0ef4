use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::mpsc,
};
use tracing::{debug, info, warn};

use crate::{
    config::RelayConfig,
    dispatcher::Dispatcher,
    error::RelayError,
    message::ChatMessage,
    registry::ClientRegistry,
    session::{SessionContext, run_session},
};

pub struct ChatServer {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    dispatcher: Dispatcher,
}

impl ChatServer {
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        let addr = config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        Ok(Self::new(listener, config))
    }

    pub fn new(listener: TcpListener, config: RelayConfig) -> Self {
        let config = config.normalized();
        let registry = ClientRegistry::new();
        let (inbound_tx, inbound_rx) = mpsc::channel::<ChatMessage>(config.inbound_capacity);
        Self {
            listener,
            dispatcher: Dispatcher::new(registry.clone(), inbound_rx),
            ctx: Arc::new(SessionContext::new(registry, inbound_tx, config)),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle onto the live client set, mostly useful for inspection.
    pub fn registry(&self) -> ClientRegistry {
        self.ctx.registry().clone()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let ChatServer {
            listener,
            ctx,
            dispatcher,
        } = self;
        tokio::spawn(dispatcher.run());
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    handle_shutdown(&ctx).await;
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &ctx);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_shutdown(ctx: &SessionContext) {
    ctx.shut_down();
    let dropped = ctx.registry().clear().await;
    info!(clients = dropped, "relay shutting down");
}

fn handle_accept_result(
    result: std::io::Result<(TcpStream, SocketAddr)>,
    ctx: &Arc<SessionContext>,
) {
    match result {
        Ok((stream, peer)) => spawn_session(stream, peer, ctx),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_session(stream: TcpStream, peer: SocketAddr, ctx: &Arc<SessionContext>) {
    debug!(%peer, "accepted connection");
    if let Err(err) = stream.set_nodelay(true) {
        warn!(%peer, error = ?err, "failed to set TCP_NODELAY");
    }

    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        match run_session(stream, peer, &ctx).await {
            Ok(()) => {}
            Err(RelayError::ShuttingDown) => debug!(%peer, "refused login during shutdown"),
            Err(err) => warn!(%peer, error = %err, "session closed with error"),
        }
    });
}

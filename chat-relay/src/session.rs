//! Per-connection lifecycle.
//!
//! A session waits for the login frame, registers the client, then runs the
//! connection reader and writer side by side until either of them stops. The
//! client is always removed from the registry before the session returns.

use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    select,
    sync::{Notify, mpsc, watch},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    codec::{read_message, write_message},
    config::RelayConfig,
    error::{RelayError, Result},
    message::{ChatMessage, SERVER_SENDER},
    registry::{ClientHandle, ClientRegistry, SessionId},
};

/// State shared by every session of one server.
pub struct SessionContext {
    registry: ClientRegistry,
    inbound: mpsc::Sender<ChatMessage>,
    config: RelayConfig,
    next_session: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl SessionContext {
    pub fn new(
        registry: ClientRegistry,
        inbound: mpsc::Sender<ChatMessage>,
        config: RelayConfig,
    ) -> Self {
        Self {
            registry,
            inbound,
            config: config.normalized(),
            next_session: AtomicU64::new(1),
            shutdown: watch::Sender::new(false),
        }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Refuses further logins and ends sessions still waiting to log in.
    pub fn shut_down(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn shutdown_requested(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let _ = shutdown.wait_for(|down| *down).await;
    }

    fn next_session_id(&self) -> SessionId {
        self.next_session.fetch_add(1, Ordering::Relaxed)
    }

    async fn announce(&self, notice: ChatMessage) {
        if self.inbound.send(notice).await.is_err() {
            debug!("dispatcher stopped; notice dropped");
        }
    }
}

pub async fn run_session<S>(stream: S, peer: SocketAddr, ctx: &SessionContext) -> Result<()>
where
    S: AsyncRead + AsyncWrite,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    let login = select! {
        result = await_login(&mut reader, ctx.config.handshake_timeout) => result,
        _ = ctx.shutdown_requested() => Err(RelayError::ShuttingDown),
    };
    let username = match login {
        Ok(username) => username,
        Err(err) => {
            reject(&mut writer, &err, ctx.config.write_timeout).await;
            return Err(err);
        }
    };

    let session_id = ctx.next_session_id();
    let (mailbox, inbox) = mpsc::channel(ctx.config.mailbox_capacity);
    let kick = Arc::new(Notify::new());
    let client = ClientHandle {
        username: username.clone(),
        remote_addr: peer,
        session_id,
        mailbox,
        kick: Arc::clone(&kick),
    };
    if let Err(err) = ctx.registry.add(client).await {
        reject(&mut writer, &err, ctx.config.write_timeout).await;
        return Err(err);
    }
    // Shutdown clears the registry after raising the flag, so a login that
    // registered after the clear is caught here.
    if ctx.is_shutting_down() {
        ctx.registry.remove_session(&username, session_id).await;
        let err = RelayError::ShuttingDown;
        reject(&mut writer, &err, ctx.config.write_timeout).await;
        return Err(err);
    }

    info!(%peer, session_id, "user {username} joined");
    ctx.announce(ChatMessage::joined(&username)).await;

    let outcome = select! {
        result = read_loop(&mut reader, ctx, &username) => result,
        result = write_loop(&mut writer, inbox, ctx.config.write_timeout) => result,
        _ = kick.notified() => {
            debug!(%peer, session_id, "session kicked");
            Ok(())
        }
        _ = ctx.shutdown_requested() => Ok(()),
    };

    ctx.registry.remove_session(&username, session_id).await;
    info!(%peer, session_id, "user {username} left");
    ctx.announce(ChatMessage::left(&username)).await;

    if let Err(err) = writer.shutdown().await {
        debug!(%peer, error = ?err, "failed to shut down stream cleanly");
    }

    outcome
}

async fn await_login<R>(reader: &mut R, limit: Duration) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let first = match with_deadline(Some(limit), "login", read_message(reader)).await {
        Ok(Some(message)) => message,
        Ok(None) => {
            return Err(RelayError::ProtocolViolation(
                "connection closed before login".to_string(),
            ));
        }
        Err(RelayError::Decode(err)) => {
            return Err(RelayError::ProtocolViolation(format!(
                "undecodable login frame: {err}"
            )));
        }
        Err(err) => return Err(err),
    };

    extract_username(first)
}

fn extract_username(message: ChatMessage) -> Result<String> {
    if !message.is_login() {
        return Err(RelayError::ProtocolViolation(
            "expected login token as first message".to_string(),
        ));
    }

    let username = message.sender.trim();
    if username.is_empty() {
        return Err(RelayError::ProtocolViolation(
            "username cannot be empty".to_string(),
        ));
    }
    if username == SERVER_SENDER {
        return Err(RelayError::ProtocolViolation(format!(
            "username '{SERVER_SENDER}' is reserved"
        )));
    }

    Ok(username.to_string())
}

/// Best-effort notice telling the peer why it is being disconnected.
async fn reject<W>(writer: &mut W, err: &RelayError, limit: Option<Duration>)
where
    W: AsyncWrite + Unpin,
{
    if matches!(err, RelayError::Stream(_) | RelayError::Timeout { .. }) {
        return;
    }

    let notice = ChatMessage::new(SERVER_SENDER, err.to_string());
    if let Err(write_err) = with_deadline(limit, "write", write_message(writer, &notice)).await {
        debug!(error = %write_err, "failed to deliver rejection notice");
    }
}

async fn read_loop<R>(reader: &mut R, ctx: &SessionContext, username: &str) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut decode_errors = 0u32;

    loop {
        match with_deadline(ctx.config.idle_timeout, "read", read_message(reader)).await {
            Ok(Some(mut message)) => {
                decode_errors = 0;
                if message.is_login() {
                    debug!(username, "ignoring repeated login");
                    continue;
                }
                message.sender = username.to_string();
                if ctx.inbound.send(message).await.is_err() {
                    debug!(username, "dispatcher stopped; ending session");
                    return Ok(());
                }
            }
            Ok(None) => {
                debug!(username, "peer closed the connection");
                return Ok(());
            }
            Err(err) if err.is_recoverable() => {
                decode_errors += 1;
                warn!(username, error = %err, decode_errors, "discarding undecodable frame");
                if decode_errors > ctx.config.max_decode_errors {
                    return Err(RelayError::ProtocolViolation(format!(
                        "{decode_errors} consecutive undecodable frames"
                    )));
                }
            }
            Err(err) => return Err(err),
        }
    }
}

async fn write_loop<W>(
    writer: &mut W,
    mut inbox: mpsc::Receiver<ChatMessage>,
    limit: Option<Duration>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = inbox.recv().await {
        with_deadline(limit, "write", write_message(writer, &message)).await?;
    }

    // Mailbox closed: the client was evicted or the server is shutting down.
    debug!("mailbox closed");
    Ok(())
}

async fn with_deadline<F, T>(
    limit: Option<Duration>,
    operation: &'static str,
    future: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(after) => timeout(after, future)
            .await
            .map_err(|_| RelayError::Timeout { operation, after })?,
        None => future.await,
    }
}

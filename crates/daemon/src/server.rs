//! TCP server for file browser clients.
//!
//! Each accepted connection runs in its own task with its own
//! [`ConnectionContext`]. Requests on a connection are handled one at a time
//! and every response echoes the request's sequence number.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use protocol::{Envelope, ErrorCode, ErrorMessage, Frame, Message, ProtocolError, PROTOCOL_VERSION};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::router::{ConnectionContext, MessageRouter, RouterError};
use crate::transport::FramedStream;

/// Errors from the server itself, as opposed to per-request failures.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Connection limits.
#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    pub max_connections: usize,
    /// Close connections that send nothing for this long.
    pub idle_timeout: Option<Duration>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_connections: 64,
            idle_timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// Accept loop bound to a TCP address.
pub struct FileServer {
    listener: TcpListener,
    router: Arc<MessageRouter>,
    options: ServerOptions,
    connections: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl FileServer {
    /// Bind to `addr`. Port 0 picks a free port; see [`local_addr`](Self::local_addr).
    pub async fn bind(
        addr: SocketAddr,
        router: Arc<MessageRouter>,
        options: ServerOptions,
        shutdown: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(Self {
            listener,
            router,
            connections: Arc::new(Semaphore::new(options.max_connections)),
            options,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the shutdown token is cancelled.
    ///
    /// Connections over the limit are closed immediately.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr()?, "Listening");

        loop {
            let (stream, peer) = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Server received shutdown signal");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            let Ok(permit) = Arc::clone(&self.connections).try_acquire_owned() else {
                warn!(%peer, limit = self.options.max_connections, "Connection limit reached, rejecting");
                continue;
            };

            let router = Arc::clone(&self.router);
            let shutdown = self.shutdown.clone();
            let idle_timeout = self.options.idle_timeout;

            tokio::spawn(async move {
                let _permit = permit;
                debug!(%peer, "Connection opened");
                match handle_connection(stream, &router, idle_timeout, shutdown).await {
                    Ok(()) => debug!(%peer, "Connection closed"),
                    Err(e) => debug!(%peer, error = %e, "Connection closed with error"),
                }
            });
        }

        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    router: &MessageRouter,
    idle_timeout: Option<Duration>,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    stream.set_nodelay(true)?;
    let mut framed = FramedStream::new(stream);
    let mut ctx = ConnectionContext::new();

    let result = async {
        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => break,
                frame = read_frame(&mut framed, idle_timeout) => frame?,
            };
            let Some(frame) = frame else { break };

            let envelope = match Envelope::from_msgpack(&frame.payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    debug!(error = %e, "Undecodable message");
                    let error = ErrorMessage {
                        code: ErrorCode::InvalidRequest,
                        message: "malformed message".to_string(),
                        context: None,
                        recoverable: true,
                    };
                    framed
                        .write_envelope(&Envelope::new(0, Message::Error(error)))
                        .await?;
                    continue;
                }
            };

            let sequence = envelope.sequence;
            if let Some(response) = dispatch(router, &mut ctx, envelope).await {
                framed
                    .write_envelope(&Envelope::new(sequence, response))
                    .await?;
            }
        }
        Ok::<(), ServerError>(())
    }
    .await;

    if let Some(token) = ctx.token.take() {
        router.gate().logout(&token);
    }
    result
}

async fn read_frame(
    framed: &mut FramedStream<TcpStream>,
    idle_timeout: Option<Duration>,
) -> Result<Option<Frame>, ProtocolError> {
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, framed.read_frame())
            .await
            .map_err(|_| ProtocolError::Timeout("connection idle".to_string()))?,
        None => framed.read_frame().await,
    }
}

/// Route one request and turn failures into an error response.
async fn dispatch(
    router: &MessageRouter,
    ctx: &mut ConnectionContext,
    envelope: Envelope,
) -> Option<Message> {
    let kind = envelope.payload.kind();

    let result = if envelope.version != PROTOCOL_VERSION {
        Err(RouterError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            got: envelope.version,
        })
    } else {
        router.route(ctx, envelope.payload).await
    };

    match result {
        Ok(response) => response,
        Err(e) => {
            debug!(kind, error = %e, "Request failed");
            Some(Message::Error(e.to_error_message(Some(kind.to_string()))))
        }
    }
}

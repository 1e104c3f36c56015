//! Server sockets: binding and accept loops.
//!
//! Server sockets are bound once, before any worker starts, so a busy
//! port fails the driver up front. Each worker then clones the bound
//! listener into its own runtime and runs an accept loop on it; the kernel
//! spreads incoming connections across the workers.
//!
//! # Connection Flow
//!
//! 1. [`BoundListener::bind`] in the master
//! 2. [`BoundListener::serve`] in every worker, which creates the accept unit
//! 3. One unit per accepted connection: a WebSocket handshake (ws) or a
//!    hyper HTTP/1 connection (http)

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::http::{HeaderMap, StatusCode, Uri};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::CoroutineId;
use crate::socket::{ListenerRole, ServerSocket, SocketKind, authorize};

use super::TransportContext;
use super::connection::{self, ConnectionOrigin};
use super::http;

// ============================================================================
// Constants
// ============================================================================

/// Pause after a failed `accept` (e.g. file descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

// ============================================================================
// BoundListener
// ============================================================================

/// A server socket bound to its address, shared by every worker.
#[derive(Debug, Clone)]
pub struct BoundListener {
    socket: ServerSocket,
    listener: Arc<std::net::TcpListener>,
    local_addr: SocketAddr,
}

impl BoundListener {
    /// Binds `socket`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the address cannot be bound.
    pub fn bind(socket: ServerSocket) -> Result<Self> {
        let listener = std::net::TcpListener::bind(socket.bind_address())?;
        let local_addr = listener.local_addr()?;

        debug!(
            kind = %socket.kind(),
            port = local_addr.port(),
            flag = socket.flag(),
            primary = socket.role() == ListenerRole::Primary,
            "Server socket bound"
        );

        Ok(Self {
            socket,
            listener: Arc::new(listener),
            local_addr,
        })
    }

    /// Returns the socket description.
    #[inline]
    #[must_use]
    pub fn socket(&self) -> &ServerSocket {
        &self.socket
    }

    /// Returns the bound address (with the real port when 0 was asked).
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts the accept loop for this socket as a unit of `ctx`.
    ///
    /// Must be called from inside the worker's runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the listener cannot be registered with the
    /// runtime.
    pub fn serve(&self, ctx: &TransportContext) -> Result<CoroutineId> {
        let std_listener = self.listener.try_clone()?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;

        let socket = self.socket.clone();
        let unit_ctx = ctx.clone();
        let cid = ctx.coroutine.create(accept_loop(listener, socket, unit_ctx));

        info!(
            kind = %self.socket.kind(),
            addr = %self.local_addr,
            flag = self.socket.flag(),
            "Accepting connections"
        );
        Ok(cid)
    }
}

// ============================================================================
// Accept Loop
// ============================================================================

/// Accepts connections until shutdown, one unit per connection.
async fn accept_loop(listener: TcpListener, socket: ServerSocket, ctx: TransportContext) {
    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(kind = %socket.kind(), error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
            () = ctx.shutdown.wait() => break,
        };

        debug!(kind = %socket.kind(), %peer, "Connection accepted");

        let unit_ctx = ctx.clone();
        let unit_socket = socket.clone();
        match socket.kind() {
            SocketKind::Ws => {
                ctx.coroutine.create(async move {
                    if let Err(e) = accept_websocket(stream, &unit_socket, unit_ctx).await {
                        debug!(%peer, error = %e, "WebSocket handshake failed");
                    }
                });
            }
            SocketKind::Http => {
                ctx.coroutine
                    .create(http::serve_connection(stream, peer, unit_socket, unit_ctx));
            }
            SocketKind::HttpWebhook | SocketKind::WsReverse => {
                warn!(kind = %socket.kind(), "Not a server socket, stopping accept loop");
                break;
            }
        }
    }

    debug!(kind = %socket.kind(), flag = socket.flag(), "Accept loop stopped");
}

/// Performs the WebSocket handshake and runs the connection.
///
/// Handshakes without a valid access token are answered with `401`.
async fn accept_websocket(
    stream: TcpStream,
    socket: &ServerSocket,
    ctx: TransportContext,
) -> Result<()> {
    let token = socket.access_token();
    let mut handshake: Option<(Uri, HeaderMap)> = None;

    let callback = |request: &Request, response: Response| {
        if !authorize(token, request.headers(), request.uri().query()) {
            let mut rejection = ErrorResponse::new(Some("Unauthorized".to_string()));
            *rejection.status_mut() = StatusCode::UNAUTHORIZED;
            return Err(rejection);
        }
        handshake = Some((request.uri().clone(), request.headers().clone()));
        Ok(response)
    };

    let ws_stream = accept_hdr_async(stream, callback)
        .await
        .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

    let (uri, headers) = handshake.unwrap_or_default();
    connection::serve(
        ws_stream,
        socket.flag(),
        ConnectionOrigin::Server,
        uri,
        headers,
        ctx,
    )
    .await;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::socket::ServerSocketConfig;

    fn socket(kind: SocketKind) -> ServerSocket {
        let config = ServerSocketConfig {
            host: "127.0.0.1".into(),
            port: 0,
            access_token: None,
            flag: 7,
        };
        ServerSocket::new(kind, &config, ListenerRole::Primary).expect("valid socket")
    }

    #[test]
    fn test_bind_random_port() {
        let bound = BoundListener::bind(socket(SocketKind::Ws)).expect("bind");
        assert!(bound.local_addr().port() > 0);
        assert_eq!(bound.socket().flag(), 7);
    }

    #[test]
    fn test_bind_busy_port_fails() {
        let first = BoundListener::bind(socket(SocketKind::Http)).expect("bind");
        let config = ServerSocketConfig {
            host: "127.0.0.1".into(),
            port: first.local_addr().port(),
            access_token: None,
            flag: 0,
        };
        let second = ServerSocket::new(SocketKind::Http, &config, ListenerRole::Secondary)
            .expect("valid socket");
        let err = BoundListener::bind(second).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}

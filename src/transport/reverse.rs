//! Reverse WebSocket client.
//!
//! Dials the configured URL, runs the connection like a server-accepted
//! one, and dials again `reconnect_interval` after every failure or close
//! until the driver shuts down.

// ============================================================================
// Imports
// ============================================================================

use hyper::http::Uri;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::CoroutineId;
use crate::socket::ClientSocket;

use super::TransportContext;
use super::connection::{self, ConnectionOrigin};

// ============================================================================
// Types
// ============================================================================

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// Public API
// ============================================================================

/// Starts the reconnect loop for `socket` as a unit of `ctx`.
pub fn spawn(socket: ClientSocket, ctx: &TransportContext) -> CoroutineId {
    info!(url = %socket.url(), flag = socket.flag(), "Starting reverse WebSocket client");
    let unit_ctx = ctx.clone();
    ctx.coroutine.create(reconnect_loop(socket, unit_ctx))
}

/// Dials `socket` once, applying its headers and timeout.
///
/// # Errors
///
/// - [`Error::Timeout`] if the handshake does not finish in time
/// - [`Error::WebSocket`] if the connection or handshake fails
pub async fn connect(socket: &ClientSocket) -> Result<ClientStream> {
    let mut request = socket.url().as_str().into_client_request()?;
    request.headers_mut().extend(socket.headers().clone());

    let limit = socket.timeout();
    let (ws_stream, response) = timeout(limit, connect_async(request))
        .await
        .map_err(|_| Error::timeout("reverse WebSocket connect", limit.as_millis() as u64))??;

    debug!(url = %socket.url(), status = %response.status(), "Reverse WebSocket handshake done");
    Ok(ws_stream)
}

// ============================================================================
// Reconnect Loop
// ============================================================================

/// Parses the request URI handed to connection listeners.
fn request_uri(url: &str) -> Result<Uri> {
    url.parse()
        .map_err(|e| Error::config(format!("invalid reverse WebSocket URL '{url}': {e}")))
}

async fn reconnect_loop(socket: ClientSocket, ctx: TransportContext) {
    let uri = match request_uri(socket.url().as_str()) {
        Ok(uri) => uri,
        Err(e) => {
            error!(url = %socket.url(), error = %e, "Reverse WebSocket client disabled");
            return;
        }
    };
    let mut failures = 0u32;

    while !ctx.shutdown.is_triggered() {
        match connect(&socket).await {
            Ok(ws_stream) => {
                failures = 0;
                info!(url = %socket.url(), flag = socket.flag(), "Reverse WebSocket connected");
                connection::serve(
                    ws_stream,
                    socket.flag(),
                    ConnectionOrigin::Reverse,
                    uri.clone(),
                    socket.headers().clone(),
                    ctx.clone(),
                )
                .await;
            }
            Err(e) => {
                failures += 1;
                warn!(url = %socket.url(), failures, error = %e, "Reverse WebSocket connect failed");
            }
        }

        tokio::select! {
            () = tokio::time::sleep(socket.reconnect_interval()) => {}
            () = ctx.shutdown.wait() => break,
        }
    }

    debug!(url = %socket.url(), "Reverse WebSocket client stopped");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::socket::{ClientSocketConfig, SocketKind};

    #[test]
    fn test_request_uri() {
        let uri = request_uri("ws://127.0.0.1:8080/onebot?x=1").expect("valid uri");
        assert_eq!(uri.path(), "/onebot");
        assert_eq!(uri.query(), Some("x=1"));

        let err = request_uri("ws://bad host/").unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("bad host"));
    }

    #[tokio::test]
    async fn test_connect_refused_is_websocket_error() {
        // Bind then drop to get a port with nothing listening.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr").port()
        };
        let mut config = ClientSocketConfig::new(format!("ws://127.0.0.1:{port}/"));
        config.timeout = 1_000;
        let socket = ClientSocket::new(SocketKind::WsReverse, &config).expect("valid socket");

        let err = connect(&socket).await.unwrap_err();
        assert!(matches!(err, Error::WebSocket(_) | Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_connect_times_out_on_silent_server() {
        // Accepts TCP but never answers the handshake.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let holder = tokio::spawn(async move {
            let _conn = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let mut config = ClientSocketConfig::new(format!("ws://127.0.0.1:{port}/"));
        config.timeout = 50;
        let socket = ClientSocket::new(SocketKind::WsReverse, &config).expect("valid socket");

        let err = connect(&socket).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        holder.abort();
    }
}

//! WebSocket connection handle and frame loop.
//!
//! Every open WebSocket (accepted by a ws-server socket or dialed by a
//! ws-reverse socket) runs one frame loop inside a concurrent unit. The loop
//! owns the stream; the rest of the driver talks to it through a cloneable
//! [`WsConnection`] that forwards commands over an unbounded channel.
//!
//! # Event Loop
//!
//! The loop selects over:
//!
//! - incoming frames, dispatched as `websocket.message`
//! - outgoing commands from [`WsConnection::send`] / [`WsConnection::close`]
//! - the driver's shutdown signal
//!
//! `websocket.open` is dispatched before the loop starts and
//! `websocket.close` after it ends.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use hyper::http::{HeaderMap, Uri};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::event::{Event, WebSocketCloseEvent, WebSocketMessageEvent, WebSocketOpenEvent};
use crate::identifiers::ConnectionId;

use super::TransportContext;

// ============================================================================
// Types
// ============================================================================

/// Commands for the frame loop.
#[derive(Debug)]
enum ConnectionCommand {
    /// Write a frame.
    Send(Message),
    /// Close the connection.
    Close,
}

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOrigin {
    /// Accepted by a ws-server socket.
    Server,
    /// Dialed by a ws-reverse socket.
    Reverse,
}

// ============================================================================
// WsConnection
// ============================================================================

/// Handle to one open WebSocket.
///
/// Cheap to clone; every clone talks to the same frame loop. Sending on a
/// closed connection fails with [`Error::ConnectionClosed`].
#[derive(Debug, Clone)]
pub struct WsConnection {
    id: ConnectionId,
    flag: i32,
    origin: ConnectionOrigin,
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
}

impl WsConnection {
    fn new(
        flag: i32,
        origin: ConnectionOrigin,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionCommand>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let connection = Self {
            id: ConnectionId::next(),
            flag,
            origin,
            command_tx,
        };
        (connection, command_rx)
    }

    /// Returns the connection id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the flag of the socket that owns the connection.
    #[inline]
    #[must_use]
    pub fn flag(&self) -> i32 {
        self.flag
    }

    /// Returns which side opened the connection.
    #[inline]
    #[must_use]
    pub fn origin(&self) -> ConnectionOrigin {
        self.origin
    }

    /// Returns `true` once the frame loop has ended.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    /// Queues a frame for sending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the frame loop has ended.
    pub fn send(&self, message: Message) -> Result<()> {
        self.command_tx
            .send(ConnectionCommand::Send(message))
            .map_err(|_| Error::ConnectionClosed {
                connection_id: self.id,
            })
    }

    /// Queues a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the frame loop has ended.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Message::Text(text.into().into()))
    }

    /// Queues a JSON value as a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the frame loop has ended.
    pub fn send_json(&self, value: &Value) -> Result<()> {
        self.send_text(value.to_string())
    }

    /// Asks the frame loop to close the connection.
    pub fn close(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Close);
    }
}

// ============================================================================
// ConnectionRegistry
// ============================================================================

/// Open WebSocket connections of the whole driver, keyed by id.
///
/// Shared by every worker. Handles are usable from any thread.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<FxHashMap<ConnectionId, WsConnection>>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, connection: WsConnection) {
        self.connections.write().insert(connection.id(), connection);
    }

    fn remove(&self, id: ConnectionId) -> Option<WsConnection> {
        self.connections.write().remove(&id)
    }

    /// Returns the handle of connection `id`.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<WsConnection> {
        self.connections.read().get(&id).cloned()
    }

    /// Returns the number of open connections.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Returns `true` if no connection is open.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Returns the ids of open connections carrying `flag`, sorted.
    #[must_use]
    pub fn ids_with_flag(&self, flag: i32) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self
            .connections
            .read()
            .values()
            .filter(|c| c.flag() == flag)
            .map(WsConnection::id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Sends `message` on connection `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if `id` is not open.
    pub fn send(&self, id: ConnectionId, message: Message) -> Result<()> {
        self.get(id)
            .ok_or(Error::ConnectionClosed { connection_id: id })?
            .send(message)
    }

    /// Sends `message` on every open connection carrying `flag`.
    ///
    /// Returns how many connections accepted the frame.
    pub fn broadcast(&self, flag: i32, message: &Message) -> usize {
        let targets: Vec<_> = self
            .connections
            .read()
            .values()
            .filter(|c| c.flag() == flag)
            .cloned()
            .collect();

        targets
            .iter()
            .filter(|c| c.send(message.clone()).is_ok())
            .count()
    }
}

// ============================================================================
// Frame Loop
// ============================================================================

/// Registers the connection, runs its frame loop, and cleans up.
///
/// Returns once the connection is closed by either side or the driver
/// shuts down.
pub(crate) async fn serve<S>(
    ws_stream: WebSocketStream<S>,
    flag: i32,
    origin: ConnectionOrigin,
    uri: Uri,
    headers: HeaderMap,
    ctx: TransportContext,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (connection, command_rx) = WsConnection::new(flag, origin);
    let id = connection.id();
    ctx.connections.insert(connection.clone());
    debug!(connection = %id, flag, ?origin, "WebSocket connection opened");

    let mut open = Event::websocket_open(WebSocketOpenEvent::new(connection.clone(), uri, headers));
    ctx.dispatcher.dispatch_with_handler(&mut open);

    let reason = run_frame_loop(ws_stream, &connection, command_rx, &ctx).await;

    ctx.connections.remove(id);
    debug!(connection = %id, reason = ?reason, "WebSocket connection closed");

    let mut close = Event::websocket_close(WebSocketCloseEvent::new(id, flag, reason));
    ctx.dispatcher.dispatch_with_handler(&mut close);
}

/// Pumps frames until the connection ends, returning the close reason.
async fn run_frame_loop<S>(
    ws_stream: WebSocketStream<S>,
    connection: &WsConnection,
    mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    ctx: &TransportContext,
) -> Option<String>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_write, mut ws_read) = ws_stream.split();

    let reason = loop {
        tokio::select! {
            frame = ws_read.next() => {
                match frame {
                    Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
                        trace!(connection = %connection.id(), "Frame received");
                        let payload = WebSocketMessageEvent::new(connection.clone(), message);
                        let mut event = Event::websocket_message(payload);
                        ctx.dispatcher.dispatch_with_handler(&mut event);
                    }

                    Some(Ok(Message::Close(frame))) => {
                        // Flushes the close reply queued by tungstenite.
                        let _ = ws_write.close().await;
                        break frame
                            .map(|f| f.reason.as_str().to_string())
                            .filter(|r| !r.is_empty());
                    }

                    Some(Err(e)) => {
                        warn!(connection = %connection.id(), error = %e, "WebSocket error");
                        break Some(e.to_string());
                    }

                    None => break None,

                    // Ping, Pong and raw frames
                    Some(Ok(_)) => {}
                }
            }

            command = command_rx.recv() => {
                match command {
                    Some(ConnectionCommand::Send(message)) => {
                        if let Err(e) = ws_write.send(message).await {
                            warn!(connection = %connection.id(), error = %e, "Failed to send frame");
                            break Some(e.to_string());
                        }
                    }

                    Some(ConnectionCommand::Close) | None => {
                        let _ = ws_write.close().await;
                        break Some("closed locally".to_string());
                    }
                }
            }

            () = ctx.shutdown.wait() => {
                let _ = ws_write.close().await;
                break Some("driver shutdown".to_string());
            }
        }
    };

    command_rx.close();
    reason
}

// ============================================================================
// Tests
// ============================================================================

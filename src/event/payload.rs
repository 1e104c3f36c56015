//! Transport payloads carried by events.
//!
//! HTTP events expose a mutable response slot plus a deferred sender for
//! listeners that answer later from another unit. WebSocket events carry
//! the connection handle so listeners can reply on it.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;

use hyper::body::Bytes;
use hyper::http::{HeaderMap, HeaderValue, Request, Response, StatusCode, Uri, header};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;

use crate::identifiers::ConnectionId;
use crate::transport::WsConnection;

// ============================================================================
// ResponseSender
// ============================================================================

/// Deferred answer to an HTTP request.
///
/// Obtained from [`HttpRequestEvent::defer`]. Dropping it unanswered makes
/// the transport reply `500`.
#[derive(Debug)]
pub struct ResponseSender {
    tx: oneshot::Sender<Response<Bytes>>,
}

impl ResponseSender {
    /// Sends the response. Returns `false` if the client is already gone.
    pub fn send(self, response: Response<Bytes>) -> bool {
        self.tx.send(response).is_ok()
    }
}

// ============================================================================
// HttpRequestEvent
// ============================================================================

/// Payload of `http.request`.
#[derive(Debug)]
pub struct HttpRequestEvent {
    request: Request<Bytes>,
    flag: i32,
    peer: Option<SocketAddr>,
    response: Option<Response<Bytes>>,
    deferred: Option<oneshot::Sender<Response<Bytes>>>,
}

impl HttpRequestEvent {
    /// Creates the payload and the receiver of a deferred response.
    #[must_use]
    pub fn new(
        request: Request<Bytes>,
        flag: i32,
        peer: Option<SocketAddr>,
    ) -> (Self, oneshot::Receiver<Response<Bytes>>) {
        let (tx, rx) = oneshot::channel();
        let event = Self {
            request,
            flag,
            peer,
            response: None,
            deferred: Some(tx),
        };
        (event, rx)
    }

    /// Returns the request.
    #[inline]
    #[must_use]
    pub fn request(&self) -> &Request<Bytes> {
        &self.request
    }

    /// Returns the request body.
    #[inline]
    #[must_use]
    pub fn body(&self) -> &Bytes {
        self.request.body()
    }

    /// Returns the flag of the socket that received the request.
    #[inline]
    #[must_use]
    pub fn flag(&self) -> i32 {
        self.flag
    }

    /// Returns the remote address, if known.
    #[inline]
    #[must_use]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Fills the response slot, replacing any previous response.
    pub fn set_response(&mut self, response: Response<Bytes>) {
        self.response = Some(response);
    }

    /// Fills the response slot with `status` and a body.
    pub fn respond(&mut self, status: StatusCode, body: impl Into<Bytes>) {
        let mut response = Response::new(body.into());
        *response.status_mut() = status;
        self.response = Some(response);
    }

    /// Fills the response slot with a JSON body.
    pub fn respond_json(&mut self, status: StatusCode, body: &serde_json::Value) {
        self.respond(status, body.to_string());
        if let Some(response) = self.response.as_mut() {
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }
    }

    /// Returns the response slot.
    #[inline]
    #[must_use]
    pub fn response(&self) -> Option<&Response<Bytes>> {
        self.response.as_ref()
    }

    /// Takes the response out of the slot.
    #[inline]
    pub fn take_response(&mut self) -> Option<Response<Bytes>> {
        self.response.take()
    }

    /// Takes the deferred sender; the slot is then ignored.
    ///
    /// Returns `None` if another listener already deferred the request.
    pub fn defer(&mut self) -> Option<ResponseSender> {
        self.deferred.take().map(|tx| ResponseSender { tx })
    }

    /// Returns `true` if a listener took the deferred sender.
    #[inline]
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        self.deferred.is_none()
    }
}

// ============================================================================
// WebSocketOpenEvent
// ============================================================================

/// Payload of `websocket.open`.
#[derive(Debug, Clone)]
pub struct WebSocketOpenEvent {
    connection: WsConnection,
    uri: Uri,
    headers: HeaderMap,
}

impl WebSocketOpenEvent {
    /// Creates the payload.
    #[must_use]
    pub fn new(connection: WsConnection, uri: Uri, headers: HeaderMap) -> Self {
        Self {
            connection,
            uri,
            headers,
        }
    }

    /// Returns the connection handle.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &WsConnection {
        &self.connection
    }

    /// Returns the handshake URI (the target URL for reverse connections).
    #[inline]
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Returns the handshake headers.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the socket flag.
    #[inline]
    #[must_use]
    pub fn flag(&self) -> i32 {
        self.connection.flag()
    }
}

// ============================================================================
// WebSocketMessageEvent
// ============================================================================

/// Payload of `websocket.message`.
#[derive(Debug, Clone)]
pub struct WebSocketMessageEvent {
    connection: WsConnection,
    frame: Message,
}

impl WebSocketMessageEvent {
    /// Creates the payload.
    #[must_use]
    pub fn new(connection: WsConnection, frame: Message) -> Self {
        Self { connection, frame }
    }

    /// Returns the connection handle.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &WsConnection {
        &self.connection
    }

    /// Returns the connection id.
    #[inline]
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Returns the received frame.
    #[inline]
    #[must_use]
    pub fn frame(&self) -> &Message {
        &self.frame
    }

    /// Returns the frame as text, if it is a text frame.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match &self.frame {
            Message::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }

    /// Returns the socket flag.
    #[inline]
    #[must_use]
    pub fn flag(&self) -> i32 {
        self.connection.flag()
    }
}

// ============================================================================
// WebSocketCloseEvent
// ============================================================================

/// Payload of `websocket.close`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketCloseEvent {
    connection_id: ConnectionId,
    flag: i32,
    reason: Option<String>,
}

impl WebSocketCloseEvent {
    /// Creates the payload.
    #[must_use]
    pub fn new(connection_id: ConnectionId, flag: i32, reason: Option<String>) -> Self {
        Self {
            connection_id,
            flag,
            reason,
        }
    }

    /// Returns the closed connection's id.
    #[inline]
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Returns the socket flag.
    #[inline]
    #[must_use]
    pub fn flag(&self) -> i32 {
        self.flag
    }

    /// Returns the close reason, if any was given.
    #[inline]
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

// ============================================================================
// Tests
// ============================================================================

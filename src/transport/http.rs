//! HTTP/1 server connections.
//!
//! Each request becomes an `http.request` event. The response is taken, in
//! order of precedence, from:
//!
//! | Listener did | Status sent |
//! |--------------|-------------|
//! | `defer()` then `send(resp)` | `resp` |
//! | `defer()` then dropped the sender | `500` |
//! | filled the response slot | the slot |
//! | nothing, dispatch faulted | `500` |
//! | nothing | `404` |
//!
//! Requests without a valid access token get `401` without dispatching.

// ============================================================================
// Imports
// ============================================================================

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::pin;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::http::{Request, Response, StatusCode};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

use crate::event::{Event, HttpRequestEvent};
use crate::socket::ServerSocket;

use super::TransportContext;

// ============================================================================
// Connection
// ============================================================================

/// Serves one HTTP/1 connection until the peer hangs up or the driver
/// shuts down (in-flight requests are allowed to finish).
pub(crate) async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    socket: ServerSocket,
    ctx: TransportContext,
) {
    let shutdown = ctx.shutdown.clone();
    let service = service_fn(move |request: Request<Incoming>| {
        let socket = socket.clone();
        let ctx = ctx.clone();
        async move { Ok::<_, Infallible>(handle_request(request, peer, &socket, &ctx).await) }
    });

    let mut connection = pin!(http1::Builder::new().serve_connection(TokioIo::new(stream), service));

    tokio::select! {
        result = connection.as_mut() => {
            if let Err(e) = result {
                debug!(%peer, error = %e, "HTTP connection error");
            }
        }
        () = shutdown.wait() => {
            connection.as_mut().graceful_shutdown();
            if let Err(e) = connection.await {
                debug!(%peer, error = %e, "HTTP connection error during shutdown");
            }
        }
    }
}

// ============================================================================
// Request Handling
// ============================================================================

/// Turns one request into an event and the event into a response.
async fn handle_request(
    request: Request<Incoming>,
    peer: SocketAddr,
    socket: &ServerSocket,
    ctx: &TransportContext,
) -> Response<Full<Bytes>> {
    if !socket.authorize(request.headers(), request.uri().query()) {
        debug!(%peer, path = request.uri().path(), "Rejected request without valid token");
        return status_response(StatusCode::UNAUTHORIZED);
    }

    let (parts, body) = request.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(%peer, error = %e, "Failed to read request body");
            return status_response(StatusCode::BAD_REQUEST);
        }
    };

    let (payload, deferred) =
        HttpRequestEvent::new(Request::from_parts(parts, body), socket.flag(), Some(peer));
    let mut event = Event::http_request(payload);
    let clean = ctx.dispatcher.dispatch_with_handler(&mut event);

    let Some(payload) = event.as_http_request_mut() else {
        return status_response(StatusCode::INTERNAL_SERVER_ERROR);
    };

    if payload.is_deferred() {
        drop(event);
        trace!(%peer, "Awaiting deferred response");
        return match deferred.await {
            Ok(response) => response.map(Full::new),
            Err(_) => {
                warn!(%peer, "Deferred response dropped unanswered");
                status_response(StatusCode::INTERNAL_SERVER_ERROR)
            }
        };
    }

    match payload.take_response() {
        Some(response) => response.map(Full::new),
        None if !clean => status_response(StatusCode::INTERNAL_SERVER_ERROR),
        None => status_response(StatusCode::NOT_FOUND),
    }
}

/// Builds a response whose body is the status' reason phrase.
fn status_response(status: StatusCode) -> Response<Full<Bytes>> {
    let reason = status.canonical_reason().unwrap_or_default();
    let mut response = Response::new(Full::new(Bytes::from(reason)));
    *response.status_mut() = status;
    response
}

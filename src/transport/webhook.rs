//! HTTP webhook client.
//!
//! Two client implementations are available:
//!
//! | Implementation | Schemes |
//! |----------------|---------|
//! | [`ClientImpl::Reqwest`] | `http`, `https` (rustls) |
//! | [`ClientImpl::Hyper`] | `http` |
//!
//! [`HttpWebhookClient::with_fallback`] tries the implementations in order
//! and keeps the first one that can serve the endpoint.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::http::{HeaderValue, Method, Request, Response, header};
use hyper_util::client::legacy::Client as LegacyClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::socket::ClientSocket;

// ============================================================================
// ClientImpl
// ============================================================================

/// Outbound HTTP client implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientImpl {
    /// `reqwest` with rustls.
    #[default]
    Reqwest,
    /// `hyper` legacy client, plain HTTP only.
    Hyper,
}

impl ClientImpl {
    /// Returns the implementation's name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reqwest => "reqwest",
            Self::Hyper => "hyper",
        }
    }
}

impl fmt::Display for ClientImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// HttpWebhookClient
// ============================================================================

enum Backend {
    Reqwest(reqwest::Client),
    Hyper(LegacyClient<HttpConnector, Full<Bytes>>),
}

/// POSTs payloads to a webhook endpoint.
pub struct HttpWebhookClient {
    socket: ClientSocket,
    implementation: ClientImpl,
    backend: Backend,
}

impl fmt::Debug for HttpWebhookClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpWebhookClient")
            .field("url", &self.socket.url().as_str())
            .field("implementation", &self.implementation)
            .field("flag", &self.socket.flag())
            .finish()
    }
}

impl HttpWebhookClient {
    /// Builds a client for `socket` with one implementation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the implementation cannot serve the URL scheme
    /// - [`Error::Client`] if the client cannot be constructed
    pub fn new(socket: ClientSocket, implementation: ClientImpl) -> Result<Self> {
        let backend = match implementation {
            ClientImpl::Reqwest => {
                let client = reqwest::Client::builder()
                    .timeout(socket.timeout())
                    .default_headers(socket.headers().clone())
                    .build()
                    .map_err(|e| Error::client(format!("reqwest client: {e}")))?;
                Backend::Reqwest(client)
            }
            ClientImpl::Hyper => {
                if socket.url().scheme() != "http" {
                    return Err(Error::config(format!(
                        "hyper client cannot reach '{}' (plain http only)",
                        socket.url()
                    )));
                }
                Backend::Hyper(LegacyClient::builder(TokioExecutor::new()).build_http())
            }
        };

        Ok(Self {
            socket,
            implementation,
            backend,
        })
    }

    /// Builds a client with the first usable implementation of `order`.
    ///
    /// # Errors
    ///
    /// Returns the last construction error if no implementation is usable,
    /// or [`Error::Config`] if `order` is empty.
    pub fn with_fallback(socket: ClientSocket, order: &[ClientImpl]) -> Result<Self> {
        let mut last_error = None;
        for &implementation in order {
            match Self::new(socket.clone(), implementation) {
                Ok(client) => {
                    debug!(url = %socket.url(), implementation = %implementation, "Webhook client ready");
                    return Ok(client);
                }
                Err(e) => {
                    warn!(
                        url = %socket.url(),
                        implementation = %implementation,
                        error = %e,
                        "Webhook client implementation unusable"
                    );
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::config("no client implementation configured")))
    }

    /// Returns the socket description.
    #[inline]
    #[must_use]
    pub fn socket(&self) -> &ClientSocket {
        &self.socket
    }

    /// Returns the implementation in use.
    #[inline]
    #[must_use]
    pub fn implementation(&self) -> ClientImpl {
        self.implementation
    }

    /// POSTs `body` as JSON and returns the endpoint's response.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if the endpoint does not answer in time
    /// - [`Error::Client`] if the request fails
    pub async fn post(&self, body: impl Into<Bytes>) -> Result<Response<Bytes>> {
        let body = body.into();
        trace!(url = %self.socket.url(), bytes = body.len(), "Posting webhook");

        let limit = self.socket.timeout();
        let response = timeout(limit, self.send(body))
            .await
            .map_err(|_| Error::timeout("webhook post", limit.as_millis() as u64))??;

        debug!(url = %self.socket.url(), status = %response.status(), "Webhook answered");
        Ok(response)
    }

    /// POSTs a JSON value.
    ///
    /// # Errors
    ///
    /// See [`post`](Self::post).
    pub async fn post_json(&self, value: &serde_json::Value) -> Result<Response<Bytes>> {
        self.post(serde_json::to_vec(value)?).await
    }

    async fn send(&self, body: Bytes) -> Result<Response<Bytes>> {
        match &self.backend {
            Backend::Reqwest(client) => {
                let reply = client
                    .post(self.socket.url().clone())
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| Error::client(e.to_string()))?;

                let status = reply.status();
                let headers = reply.headers().clone();
                let bytes = reply.bytes().await.map_err(|e| Error::client(e.to_string()))?;

                let mut response = Response::new(bytes);
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                Ok(response)
            }
            Backend::Hyper(client) => {
                let mut builder = Request::builder()
                    .method(Method::POST)
                    .uri(self.socket.url().as_str())
                    .header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
                for (name, value) in self.socket.headers() {
                    builder = builder.header(name, value);
                }
                let request = builder
                    .body(Full::new(body))
                    .map_err(|e| Error::client(e.to_string()))?;

                let reply = client
                    .request(request)
                    .await
                    .map_err(|e| Error::client(e.to_string()))?;
                let (parts, incoming) = reply.into_parts();
                let bytes = incoming.collect().await?.to_bytes();
                Ok(Response::from_parts(parts, bytes))
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Socket descriptions.
//!
//! A socket is an immutable endpoint record. Four kinds exist:
//!
//! | `type` | Direction | Built into |
//! |--------|-----------|------------|
//! | `ws` | inbound | [`ServerSocket`] |
//! | `http` | inbound | [`ServerSocket`] |
//! | `http_webhook` | outbound | [`ClientSocket`] |
//! | `ws_reverse` | outbound | [`ClientSocket`] |
//!
//! Every socket carries a `flag`, an integer copied onto each transport
//! event so listeners can tell endpoints apart.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use hyper::http::header::{AUTHORIZATION, HeaderName, HeaderValue};
use hyper::http::HeaderMap;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default webhook request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Default reverse WebSocket reconnect interval in milliseconds.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 5_000;

const fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

const fn default_reconnect_interval_ms() -> u64 {
    DEFAULT_RECONNECT_INTERVAL_MS
}

// ============================================================================
// SocketConfig
// ============================================================================

/// Serializable socket record, tagged by `type`.
///
/// ```json
/// { "type": "ws", "host": "0.0.0.0", "port": 6700, "flag": 1 }
/// { "type": "ws_reverse", "url": "ws://127.0.0.1:8080/onebot", "reconnect_interval": 3000 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SocketConfig {
    /// WebSocket server.
    Ws(ServerSocketConfig),
    /// HTTP server.
    Http(ServerSocketConfig),
    /// Outbound HTTP POST client.
    HttpWebhook(ClientSocketConfig),
    /// Outbound WebSocket client.
    WsReverse(ClientSocketConfig),
}

impl SocketConfig {
    /// Returns the transport kind.
    #[must_use]
    pub fn kind(&self) -> SocketKind {
        match self {
            Self::Ws(_) => SocketKind::Ws,
            Self::Http(_) => SocketKind::Http,
            Self::HttpWebhook(_) => SocketKind::HttpWebhook,
            Self::WsReverse(_) => SocketKind::WsReverse,
        }
    }
}

/// Endpoint of a server socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSocketConfig {
    /// Bind host.
    pub host: String,
    /// Bind port (0 picks a free port).
    pub port: u16,
    /// Token clients must present.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Demultiplexing tag.
    #[serde(default)]
    pub flag: i32,
}

/// Endpoint of a client socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSocketConfig {
    /// Target URL.
    pub url: String,
    /// Extra headers sent with every request or handshake.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Token sent as `Authorization: Bearer <token>`.
    #[serde(default)]
    pub access_token: Option<String>,
    /// Request timeout in milliseconds (webhooks).
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,
    /// Reconnect interval in milliseconds (reverse WebSocket).
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval: u64,
    /// Demultiplexing tag.
    #[serde(default)]
    pub flag: i32,
}

impl ClientSocketConfig {
    /// Creates a config for `url` with default timings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            access_token: None,
            timeout: DEFAULT_TIMEOUT_MS,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL_MS,
            flag: 0,
        }
    }
}

// ============================================================================
// SocketKind
// ============================================================================

/// Transport type of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
    /// WebSocket server.
    Ws,
    /// HTTP server.
    Http,
    /// HTTP webhook client.
    HttpWebhook,
    /// Reverse WebSocket client.
    WsReverse,
}

impl SocketKind {
    /// Returns the `type` tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ws => "ws",
            Self::Http => "http",
            Self::HttpWebhook => "http_webhook",
            Self::WsReverse => "ws_reverse",
        }
    }
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ServerSocket
// ============================================================================

/// Whether a server socket owns its transport's handler or shares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerRole {
    /// First endpoint of its type.
    Primary,
    /// Additional endpoint served by the primary's handler.
    Secondary,
}

/// Inbound endpoint (WebSocket or HTTP server).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSocket {
    kind: SocketKind,
    host: String,
    port: u16,
    access_token: Option<String>,
    flag: i32,
    role: ListenerRole,
}

impl ServerSocket {
    /// Builds a server socket of `kind` (`Ws` or `Http`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for client kinds or an empty host.
    pub fn new(kind: SocketKind, config: &ServerSocketConfig, role: ListenerRole) -> Result<Self> {
        if !matches!(kind, SocketKind::Ws | SocketKind::Http) {
            return Err(Error::config(format!("{kind} is not a server socket type")));
        }
        if config.host.trim().is_empty() {
            return Err(Error::config(format!("{kind} socket has an empty host")));
        }
        Ok(Self {
            kind,
            host: config.host.clone(),
            port: config.port,
            access_token: config.access_token.clone().filter(|t| !t.is_empty()),
            flag: config.flag,
            role,
        })
    }

    /// Returns the transport kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    /// Returns the bind host.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the configured port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns `host:port`.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the access token, if one is required.
    #[inline]
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Returns the socket flag.
    #[inline]
    #[must_use]
    pub fn flag(&self) -> i32 {
        self.flag
    }

    /// Returns whether this is the primary listener of its type.
    #[inline]
    #[must_use]
    pub fn role(&self) -> ListenerRole {
        self.role
    }

    /// Checks the credentials of an inbound request.
    #[must_use]
    pub fn authorize(&self, headers: &HeaderMap, query: Option<&str>) -> bool {
        authorize(self.access_token(), headers, query)
    }
}

// ============================================================================
// ClientSocket
// ============================================================================

/// Outbound endpoint (webhook or reverse WebSocket).
#[derive(Debug, Clone)]
pub struct ClientSocket {
    kind: SocketKind,
    url: Url,
    headers: HeaderMap,
    timeout: Duration,
    reconnect_interval: Duration,
    flag: i32,
}

impl ClientSocket {
    /// Builds a client socket of `kind` (`HttpWebhook` or `WsReverse`).
    ///
    /// The access token is folded into the header set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for server kinds, an unparsable URL, a
    /// scheme the kind cannot use, or an invalid header.
    pub fn new(kind: SocketKind, config: &ClientSocketConfig) -> Result<Self> {
        let url = Url::parse(&config.url)
            .map_err(|e| Error::config(format!("invalid {kind} url '{}': {e}", config.url)))?;

        let allowed: &[&str] = match kind {
            SocketKind::HttpWebhook => &["http", "https"],
            // The WebSocket client is built without TLS.
            SocketKind::WsReverse => &["ws"],
            SocketKind::Ws | SocketKind::Http => {
                return Err(Error::config(format!("{kind} is not a client socket type")));
            }
        };
        if !allowed.contains(&url.scheme()) {
            return Err(Error::config(format!(
                "{kind} url scheme '{}' not supported (expected {})",
                url.scheme(),
                allowed.join(" or ")
            )));
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::config(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::config(format!("invalid value for header {name}: {e}")))?;
            headers.insert(name, value);
        }
        if let Some(token) = config.access_token.as_deref().filter(|t| !t.is_empty()) {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| Error::config(format!("invalid access token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        Ok(Self {
            kind,
            url,
            headers,
            timeout: Duration::from_millis(config.timeout),
            reconnect_interval: Duration::from_millis(config.reconnect_interval),
            flag: config.flag,
        })
    }

    /// Returns the transport kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    /// Returns the target URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the headers sent on every request, authorization included.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the request timeout.
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the reconnect interval.
    #[inline]
    #[must_use]
    pub fn reconnect_interval(&self) -> Duration {
        self.reconnect_interval
    }

    /// Returns the socket flag.
    #[inline]
    #[must_use]
    pub fn flag(&self) -> i32 {
        self.flag
    }
}

// ============================================================================
// Access Token
// ============================================================================

/// Checks an inbound request against `token`.
///
/// Accepts `Authorization: Bearer <token>`, `Authorization: Token <token>`,
/// or an `access_token` query parameter. Always passes when `token` is
/// `None`.
#[must_use]
pub fn authorize(token: Option<&str>, headers: &HeaderMap, query: Option<&str>) -> bool {
    let Some(token) = token else {
        return true;
    };

    let from_header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("Token "))
        })
        .is_some_and(|presented| presented.trim() == token);
    if from_header {
        return true;
    }

    query
        .unwrap_or_default()
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, _)| *key == "access_token")
        .any(|(_, value)| urlencoding::decode(value).is_ok_and(|v| v == token))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_deserialize_tagged_configs() {
        let configs: Vec<SocketConfig> = serde_json::from_value(json!([
            {"type": "ws", "host": "127.0.0.1", "port": 6700, "flag": 1},
            {"type": "http", "host": "0.0.0.0", "port": 5700, "access_token": "t"},
            {"type": "http_webhook", "url": "http://127.0.0.1:9000/", "timeout": 1000},
            {"type": "ws_reverse", "url": "ws://127.0.0.1:8080/", "headers": {"X-Self-ID": "42"}}
        ]))
        .expect("valid configs");

        let kinds: Vec<_> = configs.iter().map(SocketConfig::kind).collect();
        assert_eq!(
            kinds,
            [SocketKind::Ws, SocketKind::Http, SocketKind::HttpWebhook, SocketKind::WsReverse]
        );

        let SocketConfig::WsReverse(reverse) = &configs[3] else {
            panic!("expected ws_reverse");
        };
        assert_eq!(reverse.reconnect_interval, DEFAULT_RECONNECT_INTERVAL_MS);
        assert_eq!(reverse.timeout, DEFAULT_TIMEOUT_MS);
        assert_eq!(reverse.flag, 0);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result: std::result::Result<SocketConfig, _> =
            serde_json::from_value(json!({"type": "grpc", "host": "x", "port": 1}));
        assert!(result.is_err());
    }

    #[test]
    fn test_server_socket_rejects_client_kind() {
        let config = ServerSocketConfig {
            host: "127.0.0.1".into(),
            port: 0,
            access_token: None,
            flag: 0,
        };
        assert!(ServerSocket::new(SocketKind::HttpWebhook, &config, ListenerRole::Primary).is_err());
        let socket = ServerSocket::new(SocketKind::Http, &config, ListenerRole::Secondary)
            .expect("valid socket");
        assert_eq!(socket.role(), ListenerRole::Secondary);
        assert_eq!(socket.bind_address(), "127.0.0.1:0");
    }

    #[test]
    fn test_client_socket_folds_token_into_headers() {
        let mut config = ClientSocketConfig::new("ws://127.0.0.1:8080/ws");
        config.access_token = Some("secret".into());
        config.headers.insert("X-Self-ID".into(), "42".into());

        let socket = ClientSocket::new(SocketKind::WsReverse, &config).expect("valid socket");
        assert_eq!(
            socket.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()),
            Some("Bearer secret")
        );
        assert_eq!(
            socket.headers().get("x-self-id").and_then(|v| v.to_str().ok()),
            Some("42")
        );
    }

    #[test]
    fn test_client_socket_scheme_checks() {
        let wss = ClientSocketConfig::new("wss://example.com/ws");
        let err = ClientSocket::new(SocketKind::WsReverse, &wss).unwrap_err();
        assert!(err.is_config_error());

        let https = ClientSocketConfig::new("https://example.com/hook");
        assert!(ClientSocket::new(SocketKind::HttpWebhook, &https).is_ok());

        let garbage = ClientSocketConfig::new("not a url");
        assert!(ClientSocket::new(SocketKind::HttpWebhook, &garbage).is_err());
    }

    #[test]
    fn test_authorize_variants() {
        let mut headers = HeaderMap::new();
        assert!(authorize(None, &headers, None));
        assert!(!authorize(Some("abc"), &headers, None));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert!(authorize(Some("abc"), &headers, None));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Token abc"));
        assert!(authorize(Some("abc"), &headers, None));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer wrong"));
        assert!(!authorize(Some("abc"), &headers, None));

        let empty = HeaderMap::new();
        assert!(authorize(Some("a b"), &empty, Some("x=1&access_token=a%20b")));
        assert!(!authorize(Some("abc"), &empty, Some("token=abc")));
    }
}

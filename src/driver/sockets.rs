//! Socket sets of a driver, grouped by transport type.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::socket::{
    ClientSocket, ClientSocketConfig, ListenerRole, ServerSocket, ServerSocketConfig,
    SocketConfig, SocketKind,
};
use crate::transport::{ClientImpl, HttpWebhookClient};

// ============================================================================
// DriverSockets
// ============================================================================

/// Constructed sockets of one driver.
#[derive(Debug, Default, Clone)]
pub struct DriverSockets {
    http: Vec<ServerSocket>,
    ws: Vec<ServerSocket>,
    webhooks: Vec<Arc<HttpWebhookClient>>,
    ws_reverse: Vec<ClientSocket>,
}

impl DriverSockets {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs every endpoint and reports which transport types are
    /// active, as `(http, webhook, ws, ws_reverse)`.
    ///
    /// The first server endpoint of a type becomes its primary listener;
    /// later ones are secondary listeners served by the same handler.
    /// Client endpoints try the implementations of `clients` in order. An
    /// endpoint that cannot be built is logged and skipped.
    pub fn init_internal_driver_classes(
        &mut self,
        http: &[ServerSocketConfig],
        webhook: &[ClientSocketConfig],
        ws: &[ServerSocketConfig],
        ws_reverse: &[ClientSocketConfig],
        clients: &[ClientImpl],
    ) -> (bool, bool, bool, bool) {
        for config in http {
            if let Some(socket) = server_socket(SocketKind::Http, config, self.http.is_empty()) {
                self.http.push(socket);
            }
        }

        for config in ws {
            if let Some(socket) = server_socket(SocketKind::Ws, config, self.ws.is_empty()) {
                self.ws.push(socket);
            }
        }

        for config in webhook {
            let client = ClientSocket::new(SocketKind::HttpWebhook, config)
                .and_then(|socket| HttpWebhookClient::with_fallback(socket, clients));
            match client {
                Ok(client) => self.webhooks.push(Arc::new(client)),
                Err(e) => error!(url = %config.url, error = %e, "Webhook endpoint disabled"),
            }
        }

        for config in ws_reverse {
            match ClientSocket::new(SocketKind::WsReverse, config) {
                Ok(socket) => self.ws_reverse.push(socket),
                Err(e) => error!(url = %config.url, error = %e, "Reverse WebSocket endpoint disabled"),
            }
        }

        let active = (
            !self.http.is_empty(),
            !self.webhooks.is_empty(),
            !self.ws.is_empty(),
            !self.ws_reverse.is_empty(),
        );
        debug!(
            http = self.http.len(),
            webhook = self.webhooks.len(),
            ws = self.ws.len(),
            ws_reverse = self.ws_reverse.len(),
            "Driver sockets initialized"
        );
        active
    }

    /// Builds the set from tagged configs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if endpoints were configured but none of
    /// them could be built.
    pub fn from_configs(configs: &[SocketConfig], clients: &[ClientImpl]) -> Result<Self> {
        let mut http = Vec::new();
        let mut webhook = Vec::new();
        let mut ws = Vec::new();
        let mut ws_reverse = Vec::new();
        for config in configs {
            match config {
                SocketConfig::Http(c) => http.push(c.clone()),
                SocketConfig::HttpWebhook(c) => webhook.push(c.clone()),
                SocketConfig::Ws(c) => ws.push(c.clone()),
                SocketConfig::WsReverse(c) => ws_reverse.push(c.clone()),
            }
        }

        let mut sockets = Self::new();
        let (h, wh, w, wr) =
            sockets.init_internal_driver_classes(&http, &webhook, &ws, &ws_reverse, clients);

        if !configs.is_empty() && !(h || wh || w || wr) {
            return Err(Error::config(if configs.len() == 1 {
                "the only configured transport could not be initialized"
            } else {
                "none of the configured transports could be initialized"
            }));
        }
        Ok(sockets)
    }

    /// HTTP server sockets, primary first.
    #[inline]
    #[must_use]
    pub fn http(&self) -> &[ServerSocket] {
        &self.http
    }

    /// WebSocket server sockets, primary first.
    #[inline]
    #[must_use]
    pub fn ws(&self) -> &[ServerSocket] {
        &self.ws
    }

    /// Webhook clients.
    #[inline]
    #[must_use]
    pub fn webhooks(&self) -> &[Arc<HttpWebhookClient>] {
        &self.webhooks
    }

    /// Reverse WebSocket sockets.
    #[inline]
    #[must_use]
    pub fn ws_reverse(&self) -> &[ClientSocket] {
        &self.ws_reverse
    }

    /// Returns every server socket, HTTP first.
    pub fn servers(&self) -> impl Iterator<Item = &ServerSocket> {
        self.http.iter().chain(self.ws.iter())
    }

    /// Returns the total number of active endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.http.len() + self.ws.len() + self.webhooks.len() + self.ws_reverse.len()
    }

    /// Returns `true` if no endpoint is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn server_socket(kind: SocketKind, config: &ServerSocketConfig, first: bool) -> Option<ServerSocket> {
    let role = if first {
        ListenerRole::Primary
    } else {
        ListenerRole::Secondary
    };
    match ServerSocket::new(kind, config, role) {
        Ok(socket) => Some(socket),
        Err(e) => {
            error!(kind = %kind, host = %config.host, port = config.port, error = %e, "Server endpoint disabled");
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

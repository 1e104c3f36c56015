//! Outbound sockets: webhook posts and reverse WebSocket connections.

mod common;

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use hyper::StatusCode;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use onebot_driver::event::names;
use onebot_driver::socket::{ClientSocketConfig, ServerSocketConfig, SocketConfig};
use onebot_driver::transport::{ClientImpl, ConnectionOrigin};
use onebot_driver::{Driver, Propagation};

use common::{Running, free_port};

fn webhook_driver(port: u16, implementation: ClientImpl) -> Result<Driver> {
    let mut hook = ClientSocketConfig::new(format!("http://127.0.0.1:{port}/hook"));
    hook.access_token = Some("secret".into());

    Ok(Driver::builder()
        .default_client_impl(implementation)
        .fallback_client_impl(None)
        .socket(SocketConfig::Http(ServerSocketConfig {
            host: "127.0.0.1".into(),
            port,
            access_token: Some("secret".into()),
            flag: 1,
        }))
        .socket(SocketConfig::HttpWebhook(hook))
        .build()?)
}

async fn post_through(implementation: ClientImpl) -> Result<()> {
    let port = free_port()?;
    let driver = webhook_driver(port, implementation)?;
    driver.add_event_listener(
        names::HTTP_REQUEST,
        |event| {
            if let Some(http) = event.as_http_request_mut()
                && http.request().uri().path() == "/hook"
            {
                let posted: Value = serde_json::from_slice(http.body())?;
                http.respond_json(StatusCode::OK, &json!({ "received": posted }));
            }
            Ok(Propagation::Continue)
        },
        20,
    );
    let running = Running::start(driver, port)?;

    let client = running
        .driver()
        .webhooks()
        .first()
        .cloned()
        .context("webhook client missing")?;
    assert_eq!(client.implementation(), implementation);

    let response = client.post_json(&json!({ "post_type": "meta_event" })).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(response.body())?;
    assert_eq!(body, json!({ "received": { "post_type": "meta_event" } }));

    running.stop()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_webhook_post_with_reqwest() -> Result<()> {
    post_through(ClientImpl::Reqwest).await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_webhook_post_with_hyper() -> Result<()> {
    post_through(ClientImpl::Hyper).await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reverse_websocket_connects_and_echoes() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let mut reverse = ClientSocketConfig::new(format!("ws://127.0.0.1:{port}/onebot"));
    reverse.flag = 9;
    reverse.reconnect_interval = 100;
    let driver = Driver::builder()
        .socket(SocketConfig::WsReverse(reverse))
        .build()?;

    driver.add_event_listener(
        names::WEBSOCKET_OPEN,
        |event| {
            if let Some(open) = event.as_websocket_open() {
                assert_eq!(open.connection().origin(), ConnectionOrigin::Reverse);
                open.connection().send_text("hello from driver")?;
            }
            Ok(Propagation::Continue)
        },
        20,
    );
    driver.add_event_listener(
        names::WEBSOCKET_MESSAGE,
        |event| {
            if let Some(frame) = event.as_websocket_message()
                && let Some(text) = frame.text()
            {
                frame.connection().send_text(text.to_uppercase())?;
            }
            Ok(Propagation::Continue)
        },
        20,
    );

    let running = Running::start_detached(driver);

    let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .context("driver never connected")??;
    let mut ws = accept_async(stream).await?;

    let greeting = timeout(Duration::from_secs(5), ws.next())
        .await?
        .context("stream ended")??;
    assert_eq!(greeting, Message::text("hello from driver"));

    ws.send(Message::text("ping")).await?;
    let reply = timeout(Duration::from_secs(5), ws.next())
        .await?
        .context("stream ended")??;
    assert_eq!(reply, Message::text("PING"));

    running.stop()
}

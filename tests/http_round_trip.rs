//! HTTP server sockets driven end to end through a real client.

mod common;

use std::thread;
use std::time::Duration;

use anyhow::Result;
use hyper::StatusCode;
use hyper::body::Bytes;
use hyper::http::Response;
use serde_json::{Value, json};

use onebot_driver::event::names;
use onebot_driver::socket::{ClientSocketConfig, ServerSocketConfig, SocketConfig};
use onebot_driver::transport::ClientImpl;
use onebot_driver::{Driver, Error, Propagation};

use common::{Running, free_port};

fn http_socket(port: u16, flag: i32) -> SocketConfig {
    SocketConfig::Http(ServerSocketConfig {
        host: "127.0.0.1".into(),
        port,
        access_token: None,
        flag,
    })
}

fn answer_with_flag(driver: &Driver) {
    driver.add_event_listener(
        names::HTTP_REQUEST,
        |event| {
            if let Some(http) = event.as_http_request_mut() {
                let reply = json!({ "flag": http.flag() });
                http.respond_json(StatusCode::OK, &reply);
            }
            Ok(Propagation::Stop)
        },
        20,
    );
}

fn http_driver(port: u16, token: Option<&str>) -> Result<Driver> {
    Ok(Driver::builder()
        .name("http-test")
        .socket(SocketConfig::Http(ServerSocketConfig {
            host: "127.0.0.1".into(),
            port,
            access_token: token.map(str::to_string),
            flag: 7,
        }))
        .build()?)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_listener_response_and_fallback_404() -> Result<()> {
    let port = free_port()?;
    let driver = http_driver(port, None)?;
    driver.add_event_listener(
        names::HTTP_REQUEST,
        |event| {
            let Some(http) = event.as_http_request_mut() else {
                return Ok(Propagation::Continue);
            };
            if http.request().uri().path() == "/echo" {
                let body: Value = serde_json::from_slice(http.body())?;
                let reply = json!({ "flag": http.flag(), "echo": body });
                http.respond_json(StatusCode::OK, &reply);
                return Ok(Propagation::Stop);
            }
            Ok(Propagation::Continue)
        },
        20,
    );
    let running = Running::start(driver, port)?;

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{port}");

    let reply = client
        .post(format!("{base}/echo"))
        .body(r#"{"action":"send_msg"}"#)
        .send()
        .await?;
    assert_eq!(reply.status().as_u16(), 200);
    let body: Value = reply.json().await?;
    assert_eq!(body, json!({ "flag": 7, "echo": { "action": "send_msg" } }));

    let missing = client.get(format!("{base}/nothing")).send().await?;
    assert_eq!(missing.status().as_u16(), 404);

    running.stop()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_access_token_is_enforced() -> Result<()> {
    let port = free_port()?;
    let driver = http_driver(port, Some("secret"))?;
    driver.add_event_listener(
        names::HTTP_REQUEST,
        |event| {
            if let Some(http) = event.as_http_request_mut() {
                http.respond(StatusCode::OK, "ok");
            }
            Ok(Propagation::Stop)
        },
        20,
    );
    let running = Running::start(driver, port)?;

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{port}/");

    let denied = client.get(&base).send().await?;
    assert_eq!(denied.status().as_u16(), 401);

    let wrong = client.get(&base).bearer_auth("nope").send().await?;
    assert_eq!(wrong.status().as_u16(), 401);

    let header = client.get(&base).bearer_auth("secret").send().await?;
    assert_eq!(header.status().as_u16(), 200);
    assert_eq!(header.text().await?, "ok");

    let query = client
        .get(format!("{base}?access_token=secret"))
        .send()
        .await?;
    assert_eq!(query.status().as_u16(), 200);

    running.stop()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_deferred_response_and_faults() -> Result<()> {
    let port = free_port()?;
    let driver = http_driver(port, None)?;
    driver.add_event_listener(
        names::HTTP_REQUEST,
        |event| {
            let Some(http) = event.as_http_request_mut() else {
                return Ok(Propagation::Continue);
            };
            match http.request().uri().path() {
                "/later" => {
                    if let Some(sender) = http.defer() {
                        thread::spawn(move || {
                            thread::sleep(Duration::from_millis(50));
                            let response = Response::builder()
                                .status(StatusCode::ACCEPTED)
                                .body(Bytes::from_static(b"done"))
                                .unwrap_or_default();
                            sender.send(response);
                        });
                    }
                }
                "/abandoned" => {
                    drop(http.defer());
                }
                "/fault" => return Err(Error::listener(names::HTTP_REQUEST, "listener failed")),
                _ => {}
            }
            Ok(Propagation::Continue)
        },
        20,
    );
    let running = Running::start(driver, port)?;

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{port}");

    let later = client.get(format!("{base}/later")).send().await?;
    assert_eq!(later.status().as_u16(), 202);
    assert_eq!(later.text().await?, "done");

    let abandoned = client.get(format!("{base}/abandoned")).send().await?;
    assert_eq!(abandoned.status().as_u16(), 500);

    let fault = client.get(format!("{base}/fault")).send().await?;
    assert_eq!(fault.status().as_u16(), 500);

    running.stop()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_occupied_port_skips_only_that_socket() -> Result<()> {
    let port = free_port()?;
    let occupied = std::net::TcpListener::bind("127.0.0.1:0")?;
    let busy_port = occupied.local_addr()?.port();

    let driver = Driver::builder()
        .name("partial-bind")
        .sockets([http_socket(port, 1), http_socket(busy_port, 2)])
        .build()?;
    answer_with_flag(&driver);
    let running = Running::start(driver, port)?;

    let reply = reqwest::get(format!("http://127.0.0.1:{port}/")).await?;
    assert_eq!(reply.status().as_u16(), 200);
    let body: Value = reply.json().await?;
    assert_eq!(body, json!({ "flag": 1 }));

    drop(occupied);
    running.stop()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unusable_webhook_next_to_http_server() -> Result<()> {
    let port = free_port()?;
    let driver = Driver::builder()
        .name("partial-client")
        .default_client_impl(ClientImpl::Hyper)
        .fallback_client_impl(None)
        .sockets([
            SocketConfig::HttpWebhook(ClientSocketConfig::new("https://127.0.0.1:9/hook")),
            http_socket(port, 3),
        ])
        .build()?;
    assert!(driver.webhooks().is_empty());
    answer_with_flag(&driver);
    let running = Running::start(driver, port)?;

    let reply = reqwest::get(format!("http://127.0.0.1:{port}/")).await?;
    assert_eq!(reply.status().as_u16(), 200);
    let body: Value = reply.json().await?;
    assert_eq!(body, json!({ "flag": 3 }));

    running.stop()
}

#[test]
fn test_run_fails_when_no_socket_binds() -> Result<()> {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0")?;
    let busy_port = occupied.local_addr()?.port();

    let driver = Driver::builder()
        .name("no-bind")
        .socket(http_socket(busy_port, 1))
        .build()?;
    let err = driver.run().unwrap_err();
    assert!(err.is_config_error());

    drop(occupied);
    Ok(())
}

//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use onebot_driver::Driver;
use tracing_subscriber::EnvFilter;

/// Installs a test log subscriber once; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_test_writer()
        .try_init();
}

/// Picks a port that is free right now.
pub fn free_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").context("bind throwaway listener")?;
    Ok(listener.local_addr()?.port())
}

/// A driver running on a background thread.
pub struct Running {
    driver: Driver,
    handle: Option<thread::JoinHandle<onebot_driver::Result<()>>>,
}

impl Running {
    /// Starts `driver` and waits until `port` accepts connections.
    pub fn start(driver: Driver, port: u16) -> Result<Self> {
        init_tracing();
        let runner = driver.clone();
        let handle = thread::spawn(move || runner.run());
        let running = Self {
            driver,
            handle: Some(handle),
        };
        wait_for_port(port)?;
        Ok(running)
    }

    /// Starts `driver` without waiting on a port.
    pub fn start_detached(driver: Driver) -> Self {
        init_tracing();
        let runner = driver.clone();
        Self {
            driver,
            handle: Some(thread::spawn(move || runner.run())),
        }
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    /// Triggers shutdown and joins the run thread.
    pub fn stop(mut self) -> Result<()> {
        self.driver.shutdown_handle().trigger();
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => Ok(result?),
                Err(_) => bail!("driver thread panicked"),
            },
            None => Ok(()),
        }
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.driver.shutdown_handle().trigger();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn wait_for_port(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if TcpStream::connect_timeout(&addr, Duration::from_millis(100)).is_ok() {
            return Ok(());
        }
        thread::sleep(Duration::from_millis(20));
    }
    bail!("port {port} never accepted connections")
}

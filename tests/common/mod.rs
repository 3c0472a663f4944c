//! Shared helpers for the integration tests.
#![allow(dead_code)]

use edge_sentry::config::SentryConfig;
use edge_sentry::daemon::{DeviceDaemon, DeviceHardware};
use edge_sentry::capture::CaptureState;
use serde_json::Value;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Device configuration on an ephemeral localhost port writing into `dir`.
pub fn device_config(dir: &Path) -> SentryConfig {
    let mut config = SentryConfig::default();
    config.device.bind_address = "127.0.0.1".to_string();
    config.device.port = 0;
    config.device.frame_width = 160;
    config.device.frame_height = 120;
    config.device.cycle_delay_ms = 5;
    config.recording.save_dir = dir.to_path_buf();
    config
}

/// A device daemon running on its own task.
pub struct RunningDevice {
    pub addr: SocketAddr,
    pub state: Arc<CaptureState>,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<edge_sentry::error::AppResult<()>>,
}

impl RunningDevice {
    /// Cancel and wait for the daemon to stop.
    pub async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("daemon did not stop in time")
            .expect("daemon task panicked")
            .expect("daemon returned an error");
    }
}

pub async fn spawn_device(config: &SentryConfig, hardware: DeviceHardware) -> RunningDevice {
    let daemon = DeviceDaemon::build(config, hardware)
        .await
        .expect("Failed to build device daemon");
    let addr = daemon.local_addr().expect("no local address");
    let state = daemon.state();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(daemon.run(shutdown.clone()));
    RunningDevice {
        addr,
        state,
        shutdown,
        handle,
    }
}

/// Poll `condition` every 10 ms until it holds or `limit` elapses.
pub async fn wait_until<F, Fut>(what: &str, limit: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while !condition().await {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Raw line-protocol client.
pub struct LineClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl LineClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect failed");
        let (read, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer,
        }
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("send failed");
    }

    pub async fn send(&mut self, json: &str) {
        self.send_raw(format!("{}\n", json).as_bytes()).await;
    }

    /// Next response line, or `None` once the server closed the connection.
    pub async fn recv(&mut self) -> Option<Value> {
        let mut line = String::new();
        let n = tokio::time::timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("no response within 5s")
            .ok()?;
        if n == 0 {
            return None;
        }
        Some(serde_json::from_str(&line).expect("response is not JSON"))
    }

    /// Like `recv`, but gives up after `limit`.
    pub async fn try_recv(&mut self, limit: Duration) -> Option<Value> {
        let mut line = String::new();
        match tokio::time::timeout(limit, self.reader.read_line(&mut line)).await {
            Ok(Ok(n)) if n > 0 => serde_json::from_str(&line).ok(),
            _ => None,
        }
    }

    pub async fn request(&mut self, json: &str) -> Value {
        self.send(json).await;
        self.recv().await.expect("connection closed")
    }
}

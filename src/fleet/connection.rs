//! Client-side connection to one device's command server.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::device::DeviceRecord;
use super::error::{ClientError, Result};
use crate::network::framing::LineFramer;
use crate::network::protocol::{encode_line, Command, ProtocolError, Response};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Timeouts and limits for device connections.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    /// Limit on establishing the TCP connection
    pub connect_timeout: Duration,
    /// Limit on waiting for one response line
    pub recv_timeout: Duration,
    /// Longest response line accepted
    pub max_response_bytes: usize,
}

struct ConnectionIo {
    stream: Option<TcpStream>,
    framer: LineFramer,
}

/// A live connection to one device.
///
/// The socket and its receive buffer sit behind the connection's request lock, held for
/// a whole send/receive exchange, so concurrent callers are served one after another.
/// The first connection failure marks the connection dead: waiting callers then fail
/// fast, and a teardown task closes the socket and returns the device record to
/// `Disconnected`.
pub struct DeviceConnection {
    id: u64,
    device: String,
    io: Mutex<ConnectionIo>,
    alive: AtomicBool,
    closed: CancellationToken,
    recv_timeout: Duration,
    record: Weak<DeviceRecord>,
    tasks: TaskTracker,
}

impl DeviceConnection {
    /// Connect to `record`'s address within the connect timeout.
    pub async fn connect(
        record: &Arc<DeviceRecord>,
        settings: ConnectionSettings,
        tasks: TaskTracker,
    ) -> Result<Arc<Self>> {
        let target = record.address().connect_target();
        let stream = match timeout(settings.connect_timeout, TcpStream::connect(&target)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ClientError::Connection(format!("{}: {}", target, e))),
            Err(_) => {
                return Err(ClientError::Timeout(format!(
                    "connect to {} after {:?}",
                    target, settings.connect_timeout
                )))
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(device = record.name(), error = %e, "Could not set TCP_NODELAY");
        }

        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        info!(device = record.name(), %target, connection = id, "Connected");

        Ok(Arc::new(Self {
            id,
            device: record.name().to_string(),
            io: Mutex::new(ConnectionIo {
                stream: Some(stream),
                framer: LineFramer::new(settings.max_response_bytes),
            }),
            alive: AtomicBool::new(true),
            closed: CancellationToken::new(),
            recv_timeout: settings.recv_timeout,
            record: Arc::downgrade(record),
            tasks,
        }))
    }

    /// Process-unique connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// False once any call on this connection failed at the transport level.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Resolves once the connection has been marked dead.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// Send `command` and wait for its response.
    ///
    /// A device-level error status is returned as `Ok`; `Err` means the exchange itself
    /// failed.
    pub async fn call(self: &Arc<Self>, command: &Command) -> Result<Response> {
        if !self.is_alive() {
            return Err(self.dead_error());
        }
        let mut io = self.io.lock().await;
        if !self.is_alive() {
            return Err(self.dead_error());
        }

        let result = self.exchange(&mut io, command).await;
        drop(io);

        if let Err(e) = &result {
            if e.is_connection_failure() {
                warn!(device = %self.device, command = command.name(), error = %e, "Call failed, dropping connection");
                self.mark_dead();
            }
        }
        result
    }

    async fn exchange(&self, io: &mut ConnectionIo, command: &Command) -> Result<Response> {
        let ConnectionIo { stream, framer } = io;
        let stream = stream
            .as_mut()
            .ok_or_else(|| ClientError::Connection("socket closed".to_string()))?;

        let line = encode_line(command).map_err(|e| ClientError::Decode(e.to_string()))?;
        stream
            .write_all(&line)
            .await
            .map_err(|e| ClientError::Connection(format!("send failed: {}", e)))?;

        let received = timeout(self.recv_timeout, framer.read_line(stream))
            .await
            .map_err(|_| {
                ClientError::Timeout(format!(
                    "no response to {} within {:?}",
                    command.name(),
                    self.recv_timeout
                ))
            })?;

        let line = match received {
            Ok(Some(line)) => line,
            Ok(None) => return Err(ClientError::Connection("closed by peer".to_string())),
            Err(ProtocolError::Io(e)) => {
                return Err(ClientError::Connection(format!("receive failed: {}", e)))
            }
            Err(e) => return Err(ClientError::Decode(e.to_string())),
        };

        Response::decode(&line).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Close the connection and release the device record.
    pub fn close(self: &Arc<Self>) {
        self.mark_dead();
    }

    fn mark_dead(self: &Arc<Self>) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        self.closed.cancel();

        let conn = Arc::clone(self);
        self.tasks.spawn(async move {
            let stream = conn.io.lock().await.stream.take();
            if let Some(mut stream) = stream {
                let _ = stream.shutdown().await;
            }
            if let Some(record) = conn.record.upgrade() {
                if record.release_connection(conn.id) {
                    info!(device = %conn.device, connection = conn.id, "Disconnected");
                }
            }
        });
    }

    fn dead_error(&self) -> ClientError {
        ClientError::Connection(format!("connection to {} is closed", self.device))
    }
}

//! TCP command server.
//!
//! One acceptor task; one task per connection. A worker permit is acquired *before*
//! accepting, so at most `max_workers` connections are served at once and further
//! clients wait in the listen backlog. Requests on one connection are handled strictly
//! in order.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::framing::LineFramer;
use super::handler::{CommandHandler, Handled};
use super::protocol::{encode_line, Command, ProtocolError, Response};
use crate::config::DeviceConfig;
use crate::error::{AppResult, SentryError};
use crate::hardware::capabilities::HostControl;

const ACCEPT_ERROR_BACKOFF_MS: u64 = 100;

/// Line-protocol TCP server for one device.
///
/// At most `max_workers` connections are served at once; further clients wait in the
/// listen backlog until a slot frees up.
pub struct CommandServer {
    listener: TcpListener,
    handler: Arc<CommandHandler>,
    host: Arc<dyn HostControl>,
    max_workers: usize,
    max_request_bytes: usize,
    active: Arc<AtomicU32>,
}

impl CommandServer {
    /// Bind the listener. `addr` may use port 0 to pick a free port.
    pub async fn bind(
        addr: &str,
        handler: Arc<CommandHandler>,
        host: Arc<dyn HostControl>,
        config: &DeviceConfig,
    ) -> AppResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, max_workers = config.max_workers, "Command server listening");

        Ok(Self {
            listener,
            handler,
            host,
            max_workers: config.max_workers,
            max_request_bytes: config.max_request_bytes,
            active: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Bound address (useful with port 0).
    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` fires, then wait for every connection task to finish.
    pub async fn run(self, shutdown: CancellationToken) -> AppResult<()> {
        let permits = Arc::new(Semaphore::new(self.max_workers));
        let mut connections = JoinSet::new();

        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Connection task panicked");
                    }
                    continue;
                }
                permit = permits.clone().acquire_owned() => permit
                    .map_err(|e| SentryError::Configuration(format!("worker pool closed: {}", e)))?,
            };

            let (socket, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Accept error");
                        sleep(Duration::from_millis(ACCEPT_ERROR_BACKOFF_MS)).await;
                        continue;
                    }
                },
            };

            let handler = self.handler.clone();
            let host = self.host.clone();
            let active = self.active.clone();
            let shutdown = shutdown.clone();
            let max_request_bytes = self.max_request_bytes;

            connections.spawn(async move {
                let _permit = permit;
                let count = active.fetch_add(1, Ordering::SeqCst) + 1;
                let session = Uuid::new_v4();
                info!(%peer, %session, active = count, "Client connected");

                match serve_connection(socket, handler, host, max_request_bytes, shutdown).await {
                    Ok(()) => info!(%peer, %session, "Client disconnected"),
                    Err(e) => warn!(%peer, %session, error = %e, "Dropping client connection"),
                }
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }

        info!(active = self.active.load(Ordering::SeqCst), "Command server stopping, joining connections");
        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Connection task panicked");
            }
        }
        info!("Command server stopped");
        Ok(())
    }
}

async fn serve_connection(
    socket: TcpStream,
    handler: Arc<CommandHandler>,
    host: Arc<dyn HostControl>,
    max_request_bytes: usize,
    shutdown: CancellationToken,
) -> Result<(), ProtocolError> {
    let (mut reader, mut writer) = socket.into_split();
    let mut framer = LineFramer::new(max_request_bytes);

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            line = framer.read_line(&mut reader) => line?,
        };
        let Some(line) = line else {
            return Ok(());
        };
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let handled = match Command::decode(&line)? {
            Ok(command) => {
                debug!(command = command.name(), "Handling command");
                handler.handle(command).await
            }
            Err(rejected) => {
                debug!(error = %rejected, "Rejected command");
                Handled::from(Response::from(rejected))
            }
        };

        writer.write_all(&encode_line(&handled.response)?).await?;
        writer.flush().await?;

        if let Some(action) = handled.after_reply {
            if let Err(e) = host.execute(action).await {
                error!(?action, error = %e, "Host action failed");
            }
        }
    }
}

//! Fleet connection manager.
//!
//! Owns one [`DeviceRecord`] per configured device and keeps them connected:
//!
//! - a scanner task wakes every scan interval and launches one connect attempt per
//!   device that is neither connected nor connecting;
//! - every successful connect starts a frame-poll worker feeding the [`FrameSink`];
//! - commands go to one device or fan out to all connected devices in parallel.
//!
//! All tasks are tracked and joined by [`FleetManager::shutdown`].

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use super::address::DeviceAddress;
use super::connection::{ConnectionSettings, DeviceConnection};
use super::device::{ConnectAttempt, ConnectionStatus, DeviceRecord};
use super::error::{ClientError, Result};
use super::sink::{FrameSink, PreviewFrame};
use crate::config::FleetConfig;
use crate::network::protocol::{Command, Response};

/// Tracking and recording state reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    /// Detection and actuation enabled
    pub tracking: bool,
    /// An incident recording is open
    pub recording: bool,
}

/// Per-device outcome of a broadcast.
pub type BroadcastReport = BTreeMap<String, Result<()>>;

/// Owns the device roster, its connections and the background scan and poll tasks.
///
/// Commands to one device are serialized on its connection; different devices are
/// independent.
pub struct FleetManager {
    devices: BTreeMap<String, Arc<DeviceRecord>>,
    config: FleetConfig,
    sink: Arc<dyn FrameSink>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl FleetManager {
    /// Build the roster from configuration. No connection is attempted yet.
    pub fn new(config: &FleetConfig, sink: Arc<dyn FrameSink>) -> Result<Self> {
        let devices = config
            .devices
            .iter()
            .map(|(name, address)| {
                let address = DeviceAddress::parse(address, config.default_port)?;
                Ok((name.clone(), Arc::new(DeviceRecord::new(name.clone(), address))))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Self {
            devices,
            config: config.clone(),
            sink,
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Configured device names, in roster order.
    pub fn device_names(&self) -> Vec<String> {
        self.devices.keys().cloned().collect()
    }

    /// Connection status of `name`, or `None` if it is not configured.
    pub fn device_status(&self, name: &str) -> Option<ConnectionStatus> {
        self.devices.get(name).map(|record| record.status())
    }

    /// Connection status of every device.
    pub fn statuses(&self) -> Vec<(String, ConnectionStatus)> {
        self.devices
            .iter()
            .map(|(name, record)| (name.clone(), record.status()))
            .collect()
    }

    /// Start the periodic scanner. The first scan runs immediately.
    pub fn start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.tasks.spawn(async move {
            let mut ticker = tokio::time::interval(this.config.scan_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = this.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let launched = this.scan_once();
                        if launched > 0 {
                            debug!(launched, "Connection scan");
                        }
                    }
                }
            }
            debug!("Scanner stopped");
        });
    }

    /// Launch a connect attempt for every device that is neither connected nor
    /// connecting. Returns the number of attempts launched.
    pub fn scan_once(&self) -> usize {
        if self.shutdown.is_cancelled() {
            return 0;
        }
        let mut launched = 0;
        for record in self.devices.values() {
            if let Some(attempt) = record.begin_connect() {
                self.spawn_connect(attempt);
                launched += 1;
            }
        }
        launched
    }

    fn spawn_connect(&self, attempt: ConnectAttempt) {
        let settings = self.connection_settings();
        let tasks = self.tasks.clone();
        let shutdown = self.shutdown.clone();
        let sink = self.sink.clone();
        let poll_interval = self.config.poll_interval();

        self.tasks.spawn(async move {
            let record = Arc::clone(attempt.record());
            let connected = tokio::select! {
                _ = shutdown.cancelled() => return,
                connected = DeviceConnection::connect(&record, settings, tasks.clone()) => connected,
            };

            match connected {
                Ok(conn) if shutdown.is_cancelled() => conn.close(),
                Ok(conn) => {
                    attempt.complete(Arc::clone(&conn));
                    tasks.spawn(poll_frames(conn, sink, poll_interval, shutdown));
                }
                Err(e) => {
                    warn!(device = record.name(), address = %record.address(), error = %e, "Connect attempt failed");
                }
            }
        });
    }

    fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            connect_timeout: self.config.connect_timeout(),
            recv_timeout: self.config.recv_timeout(),
            max_response_bytes: self.config.max_response_bytes,
        }
    }

    /// Send one command to one device.
    pub async fn call(&self, device: &str, command: &Command) -> Result<Response> {
        let record = self
            .devices
            .get(device)
            .ok_or_else(|| ClientError::DeviceNotFound(device.to_string()))?;
        let conn = record
            .connection()
            .ok_or_else(|| ClientError::NotConnected(device.to_string()))?;
        conn.call(command).await
    }

    /// Like [`FleetManager::call`], turning an error status into `ClientError::Rejected`.
    pub async fn call_ok(&self, device: &str, command: &Command) -> Result<Response> {
        let response = self.call(device, command).await?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(ClientError::Rejected(
                response.message().unwrap_or("unspecified error").to_string(),
            ))
        }
    }

    /// Enable tracking on `device`.
    pub async fn start_tracking(&self, device: &str) -> Result<()> {
        self.call_ok(device, &Command::StartTracking).await.map(drop)
    }

    /// Disable tracking on `device`.
    pub async fn stop_tracking(&self, device: &str) -> Result<()> {
        self.call_ok(device, &Command::StopTracking).await.map(drop)
    }

    /// Query tracking and recording state.
    pub async fn status(&self, device: &str) -> Result<DeviceStatus> {
        let response = self.call_ok(device, &Command::Status).await?;
        let tracking = response
            .get_bool("tracking_status")
            .ok_or_else(|| ClientError::Decode("status without tracking_status".to_string()))?;
        Ok(DeviceStatus {
            tracking,
            recording: response.get_bool("recording").unwrap_or(false),
        })
    }

    /// Recording file names on `device`, most recent first.
    pub async fn list_recordings(&self, device: &str) -> Result<Vec<String>> {
        let response = self.call_ok(device, &Command::ListRecordings).await?;
        let files = response
            .get("files")
            .and_then(|v| v.as_array())
            .ok_or_else(|| ClientError::Decode("list_recordings without files".to_string()))?;
        files
            .iter()
            .map(|f| {
                f.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ClientError::Decode("non-string file name".to_string()))
            })
            .collect()
    }

    /// Download `filename` from `device` into `dest_dir`. Returns the local path.
    pub async fn download_recording(
        &self,
        device: &str,
        filename: &str,
        dest_dir: &Path,
    ) -> Result<PathBuf> {
        let response = self
            .call_ok(
                device,
                &Command::DownloadRecording {
                    filename: filename.to_string(),
                },
            )
            .await?;
        let content = response
            .get_str("content")
            .ok_or_else(|| ClientError::Decode("download without content".to_string()))?;
        let bytes = BASE64
            .decode(content)
            .map_err(|e| ClientError::Decode(format!("content is not base64: {}", e)))?;

        // the device echoes the name; only its final component is used locally
        let local_name = Path::new(response.get_str("filename").unwrap_or(filename))
            .file_name()
            .ok_or_else(|| ClientError::Decode(format!("unusable file name '{}'", filename)))?
            .to_owned();
        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(local_name);
        tokio::fs::write(&path, &bytes).await?;
        info!(device, path = %path.display(), size = bytes.len(), "Recording downloaded");
        Ok(path)
    }

    /// Ask `device` to reboot its host.
    pub async fn reboot(&self, device: &str) -> Result<()> {
        self.call_ok(device, &Command::Reboot).await.map(drop)
    }

    /// Ask `device` to power off its host.
    pub async fn power_off(&self, device: &str) -> Result<()> {
        self.call_ok(device, &Command::PowerOff).await.map(drop)
    }

    /// Send `command` to every connected device in parallel.
    ///
    /// Devices that are not connected are skipped; each device's failure is isolated.
    pub async fn broadcast(&self, command: Command) -> BroadcastReport {
        let calls = self.devices.iter().filter_map(|(name, record)| {
            let conn = record.connection()?;
            let command = &command;
            Some(async move {
                let result = match conn.call(command).await {
                    Ok(response) if response.is_success() => Ok(()),
                    Ok(response) => Err(ClientError::Rejected(
                        response.message().unwrap_or("unspecified error").to_string(),
                    )),
                    Err(e) => Err(e),
                };
                if let Err(e) = &result {
                    warn!(device = %name, command = command.name(), error = %e, "Broadcast call failed");
                }
                (name.clone(), result)
            })
        });

        join_all(calls).await.into_iter().collect()
    }

    /// [`broadcast`](Self::broadcast) `start_tracking`.
    pub async fn start_tracking_all(&self) -> BroadcastReport {
        self.broadcast(Command::StartTracking).await
    }

    /// [`broadcast`](Self::broadcast) `stop_tracking`.
    pub async fn stop_tracking_all(&self) -> BroadcastReport {
        self.broadcast(Command::StopTracking).await
    }

    /// [`broadcast`](Self::broadcast) `reboot`.
    pub async fn reboot_all(&self) -> BroadcastReport {
        self.broadcast(Command::Reboot).await
    }

    /// [`broadcast`](Self::broadcast) `power_off`.
    pub async fn power_off_all(&self) -> BroadcastReport {
        self.broadcast(Command::PowerOff).await
    }

    /// Stop scanning and polling, close every connection and join all tasks.
    pub async fn shutdown(&self) {
        info!("Fleet manager shutting down");
        self.shutdown.cancel();
        for record in self.devices.values() {
            if let Some(conn) = record.take_connection() {
                conn.close();
            }
        }
        self.tasks.close();
        self.tasks.wait().await;
        info!("Fleet manager stopped");
    }
}

/// Poll `get_frame` on `conn` until it dies or shutdown, forwarding previews to `sink`.
async fn poll_frames(
    conn: Arc<DeviceConnection>,
    sink: Arc<dyn FrameSink>,
    interval: std::time::Duration,
    shutdown: CancellationToken,
) {
    let device = conn.device().to_string();
    debug!(%device, "Frame poller started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = conn.closed() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match conn.call(&Command::GetFrame).await {
            Ok(response) if response.is_success() => match decode_preview(&response) {
                Ok(frame) => sink.show(&device, frame),
                Err(e) => warn!(%device, error = %e, "Undecodable preview frame"),
            },
            Ok(response) => {
                trace!(%device, message = response.message().unwrap_or(""), "No preview available");
            }
            Err(e) => {
                debug!(%device, error = %e, "Frame poll failed");
                break;
            }
        }
    }

    sink.clear(&device);
    debug!(%device, "Frame poller stopped");
}

fn decode_preview(response: &Response) -> Result<PreviewFrame> {
    let encoded = response
        .get_str("frame")
        .ok_or_else(|| ClientError::Decode("get_frame without frame".to_string()))?;
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| ClientError::Decode(format!("frame is not base64: {}", e)))?;
    let field = |key: &str| {
        response
            .get_u64(key)
            .ok_or_else(|| ClientError::Decode(format!("get_frame without {}", key)))
    };
    let width = u32::try_from(field("width")?)
        .map_err(|_| ClientError::Decode("width out of range".to_string()))?;
    let height = u32::try_from(field("height")?)
        .map_err(|_| ClientError::Decode("height out of range".to_string()))?;
    let channels = u8::try_from(field("channels")?)
        .map_err(|_| ClientError::Decode("channels out of range".to_string()))?;

    Ok(PreviewFrame {
        width,
        height,
        channels,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::sink::LatestFrameSink;

    fn config(devices: &[(&str, &str)]) -> FleetConfig {
        FleetConfig {
            devices: devices
                .iter()
                .map(|(n, a)| (n.to_string(), a.to_string()))
                .collect(),
            ..FleetConfig::default()
        }
    }

    #[test]
    fn builds_roster_with_default_port() {
        let manager = FleetManager::new(
            &config(&[("dock_a", "10.0.0.2"), ("dock_b", "10.0.0.3:9000")]),
            Arc::new(LatestFrameSink::new()),
        )
        .unwrap();
        assert_eq!(manager.device_names(), vec!["dock_a", "dock_b"]);
        assert_eq!(manager.devices["dock_a"].address().port, 8888);
        assert_eq!(manager.devices["dock_b"].address().port, 9000);
        assert_eq!(manager.device_status("dock_a"), Some(ConnectionStatus::Disconnected));
    }

    #[test]
    fn rejects_bad_address() {
        let result = FleetManager::new(&config(&[("dock", "host:port")]), Arc::new(LatestFrameSink::new()));
        assert!(matches!(result, Err(ClientError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn calls_to_unknown_or_disconnected_devices_fail() {
        let manager =
            FleetManager::new(&config(&[("dock", "127.0.0.1:1")]), Arc::new(LatestFrameSink::new())).unwrap();
        assert!(matches!(
            manager.call("nope", &Command::Status).await,
            Err(ClientError::DeviceNotFound(_))
        ));
        assert!(matches!(
            manager.call("dock", &Command::Status).await,
            Err(ClientError::NotConnected(_))
        ));
        assert!(manager.broadcast(Command::StartTracking).await.is_empty());
    }

    #[test]
    fn decodes_preview_payload() {
        let response = Response::success()
            .with("frame", BASE64.encode([1u8, 2, 3]))
            .with("width", 1)
            .with("height", 1)
            .with("channels", 3);
        let frame = decode_preview(&response).unwrap();
        assert_eq!(frame.bytes, vec![1, 2, 3]);
        assert_eq!((frame.width, frame.height, frame.channels), (1, 1, 3));
    }
}

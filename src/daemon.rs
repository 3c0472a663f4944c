//! Device daemon assembly: capture loop + command server over one shared state.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::capture::{CaptureLoop, CaptureState};
use crate::config::SentryConfig;
use crate::error::{AppResult, SentryError};
use crate::hardware::capabilities::{
    ActuatorOutput, DetectionService, FrameSource, HostControl, PreviewEncoder, RawPreviewEncoder,
};
use crate::hardware::mock::{MockActuator, MockCamera, MockHostControl, ScriptedDetector};
use crate::network::{CommandHandler, CommandServer};
use crate::recording::{RawVideoWriterFactory, RecordingManager, RecordingStore, VideoWriterFactory};

/// The external collaborators a device runs with.
pub struct DeviceHardware {
    /// Camera
    pub source: Arc<dyn FrameSource>,
    /// Object detector
    pub detector: Arc<dyn DetectionService>,
    /// Warning outputs
    pub actuator: Arc<dyn ActuatorOutput>,
    /// Encoder for `get_frame` previews
    pub encoder: Arc<dyn PreviewEncoder>,
    /// Opens incident recordings
    pub writers: Arc<dyn VideoWriterFactory>,
    /// Reboot and power-off
    pub host: Arc<dyn HostControl>,
}

impl DeviceHardware {
    /// Simulated devices: test-pattern camera, a detector that never fires, recorded
    /// actuator and host actions.
    pub fn simulated(config: &SentryConfig) -> Self {
        Self {
            source: Arc::new(MockCamera::new(
                config.device.frame_width,
                config.device.frame_height,
            )),
            detector: Arc::new(ScriptedDetector::new()),
            actuator: Arc::new(MockActuator::new()),
            encoder: Arc::new(RawPreviewEncoder),
            writers: Arc::new(RawVideoWriterFactory),
            host: Arc::new(MockHostControl::new()),
        }
    }
}

/// A device: capture loop plus command server over one [`CaptureState`].
pub struct DeviceDaemon {
    state: Arc<CaptureState>,
    capture: CaptureLoop,
    server: CommandServer,
}

impl DeviceDaemon {
    /// Wire the pipeline and bind the command server.
    pub async fn build(config: &SentryConfig, hardware: DeviceHardware) -> AppResult<Self> {
        let recorder = RecordingManager::new(&config.recording, hardware.writers);
        let state = Arc::new(CaptureState::new(hardware.actuator, recorder));

        let capture = CaptureLoop::new(
            hardware.source,
            hardware.detector,
            state.clone(),
            &config.device,
        )?;

        let store = RecordingStore::new(&config.recording.save_dir, &config.recording.extension);
        let handler = Arc::new(CommandHandler::new(
            state.clone(),
            store,
            hardware.encoder,
            config.preview.clone(),
        ));
        let addr = format!("{}:{}", config.device.bind_address, config.device.port);
        let server = CommandServer::bind(&addr, handler, hardware.host, &config.device).await?;

        Ok(Self {
            state,
            capture,
            server,
        })
    }

    /// Address the command server is bound to.
    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        self.server.local_addr()
    }

    /// Shared state, for embedding and tests.
    pub fn state(&self) -> Arc<CaptureState> {
        self.state.clone()
    }

    /// Run until `shutdown` fires.
    ///
    /// A capture loop failure (camera missing) does not stop the server; it keeps
    /// answering, with `get_frame` reporting "No frame".
    pub async fn run(self, shutdown: CancellationToken) -> AppResult<()> {
        let capture = tokio::spawn(self.capture.run(shutdown.clone()));

        self.server.run(shutdown.clone()).await?;

        match capture.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Capture loop ended with an error"),
            Err(e) => {
                return Err(SentryError::Hardware(format!("capture task failed: {}", e)));
            }
        }
        info!("Device daemon stopped");
        Ok(())
    }
}

//! Command dispatch against the shared capture state.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::protocol::{Command, Response};
use crate::capture::CaptureState;
use crate::config::PreviewConfig;
use crate::hardware::capabilities::{HostAction, PreviewEncoder};
use crate::recording::{RecordingStore, StoreError};

/// Outcome of one command: the response, plus a host action to run once the response
/// has been written.
#[derive(Debug)]
pub struct Handled {
    /// Reply to send
    pub response: Response,
    /// Run after the reply is flushed
    pub after_reply: Option<HostAction>,
}

impl From<Response> for Handled {
    fn from(response: Response) -> Self {
        Self {
            response,
            after_reply: None,
        }
    }
}

/// Executes decoded commands.
pub struct CommandHandler {
    state: Arc<CaptureState>,
    store: RecordingStore,
    encoder: Arc<dyn PreviewEncoder>,
    preview: PreviewConfig,
}

impl CommandHandler {
    /// Handler over the device state and its recording directory.
    pub fn new(
        state: Arc<CaptureState>,
        store: RecordingStore,
        encoder: Arc<dyn PreviewEncoder>,
        preview: PreviewConfig,
    ) -> Self {
        Self {
            state,
            store,
            encoder,
            preview,
        }
    }

    /// Execute one command. Never fails; failures become error responses.
    pub async fn handle(&self, command: Command) -> Handled {
        match command {
            Command::StartTracking => {
                self.state.start_tracking().await;
                Response::success().into()
            }
            Command::StopTracking => {
                self.state.stop_tracking().await;
                Response::success().into()
            }
            Command::Status => {
                let status = self.state.status().await;
                Response::success()
                    .with("tracking_status", status.tracking)
                    .with("recording", status.recording)
                    .into()
            }
            Command::GetFrame => self.get_frame().await.into(),
            Command::ListRecordings => match self.store.list().await {
                Ok(files) => Response::success().with("files", files).into(),
                Err(e) => {
                    warn!(error = %e, "Listing recordings failed");
                    Response::error(e.to_string()).into()
                }
            },
            Command::DownloadRecording { filename } => self.download(filename).await.into(),
            Command::Reboot => Self::host_action(HostAction::Reboot),
            Command::PowerOff => Self::host_action(HostAction::PowerOff),
        }
    }

    async fn get_frame(&self) -> Response {
        let Some(frame) = self.state.latest_frame().await else {
            return Response::error("No frame");
        };
        let encoded = match self
            .encoder
            .encode(&frame, self.preview.width, self.preview.height)
        {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "Preview encoding failed");
                return Response::error(format!("Frame encoding failed: {}", e));
            }
        };
        Response::success()
            .with("frame", BASE64.encode(&encoded.bytes))
            .with("width", encoded.width)
            .with("height", encoded.height)
            .with("channels", encoded.channels)
    }

    async fn download(&self, filename: String) -> Response {
        match self.store.read(&filename).await {
            Ok(bytes) => {
                debug!(%filename, size = bytes.len(), "Serving recording");
                Response::success()
                    .with("filename", filename)
                    .with("content", BASE64.encode(&bytes))
            }
            Err(e @ (StoreError::InvalidName(_) | StoreError::NotFound(_))) => {
                Response::error(e.to_string())
            }
            Err(e) => {
                warn!(%filename, error = %e, "Reading recording failed");
                Response::error(e.to_string())
            }
        }
    }

    fn host_action(action: HostAction) -> Handled {
        info!(?action, "Host action requested");
        Handled {
            response: Response::success(),
            after_reply: Some(action),
        }
    }
}

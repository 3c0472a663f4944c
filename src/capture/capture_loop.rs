//! The per-device real-time loop: grab, detect, drive the actuator, record, publish.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::state::CaptureState;
use crate::config::DeviceConfig;
use crate::detection::overlay::draw_detections;
use crate::detection::LabelMap;
use crate::error::{AppResult, SentryError};
use crate::hardware::capabilities::{DetectionService, FrameSource};
use crate::hardware::Frame;
use crate::recording::RecorderEvent;

const GRAB_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Grabs frames from one camera and feeds them through detection into [`CaptureState`].
pub struct CaptureLoop {
    source: Arc<dyn FrameSource>,
    detector: Arc<dyn DetectionService>,
    labels: LabelMap,
    state: Arc<CaptureState>,
    cycle_delay: Duration,
}

impl CaptureLoop {
    /// Build the loop, resolving the detector's label schema.
    ///
    /// # Errors
    /// `SentryError::Detection` if the detector's schema version is not supported.
    pub fn new(
        source: Arc<dyn FrameSource>,
        detector: Arc<dyn DetectionService>,
        state: Arc<CaptureState>,
        config: &DeviceConfig,
    ) -> AppResult<Self> {
        let schema = detector.label_schema();
        let labels = LabelMap::from_schema(&schema)?;
        debug!(version = labels.version(), labels = ?schema.labels, "Detector label schema resolved");

        Ok(Self {
            source,
            detector,
            labels,
            state,
            cycle_delay: Duration::from_millis(config.cycle_delay_ms),
        })
    }

    /// Run until `shutdown` fires.
    ///
    /// On exit the active recording (if any) is finalized and the actuator reset.
    ///
    /// # Errors
    /// `SentryError::Hardware` if the camera cannot be opened.
    pub async fn run(self, shutdown: CancellationToken) -> AppResult<()> {
        if let Err(e) = self.source.open().await {
            error!(error = %e, "Camera failed to open, capture loop not started");
            return Err(SentryError::Hardware(format!("Camera open failed: {}", e)));
        }
        info!("Capture loop started");

        let mut consecutive_failures: u64 = 0;
        while !shutdown.is_cancelled() {
            let grabbed = tokio::select! {
                _ = shutdown.cancelled() => break,
                grabbed = self.source.grab() => grabbed,
            };

            let pause = match grabbed {
                Ok(frame) => {
                    consecutive_failures = 0;
                    self.process(frame).await;
                    self.cycle_delay
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(error = %e, consecutive_failures, "Frame acquisition failed, skipping cycle");
                    self.state.tick(Instant::now()).await;
                    GRAB_RETRY_BACKOFF
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        self.state.shutdown().await;
        if let Err(e) = self.source.close().await {
            warn!(error = %e, "Camera close failed");
        }
        info!("Capture loop stopped");
        Ok(())
    }

    async fn process(&self, frame: Frame) {
        let tracking = self.state.is_tracking().await;

        let (display, signal) = if tracking {
            let started = Instant::now();
            let detected = self.detector.detect(&frame).await;
            debug!(
                latency_ms = started.elapsed().as_secs_f64() * 1000.0,
                ok = detected.is_ok(),
                "Inference finished"
            );
            match detected {
                Ok(raw) => {
                    let result = self.labels.interpret(&raw);
                    let signal = result.signal();
                    (draw_detections(&frame, &result), Some(signal))
                }
                Err(e) => {
                    warn!(error = %e, "Detection failed, publishing raw frame");
                    (frame, None)
                }
            }
        } else {
            (frame, None)
        };

        let display = Arc::new(display);
        match self.state.apply_cycle(signal, display.clone(), Instant::now()).await {
            RecorderEvent::Failed { path } => {
                warn!(path = %path.display(), "Recording stopped after a failure")
            }
            RecorderEvent::Started { .. }
            | RecorderEvent::Finished { .. }
            | RecorderEvent::Recording
            | RecorderEvent::Idle => {}
        }

        self.state.publish_frame(display).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordingConfig;
    use crate::detection::LabelSchema;
    use crate::hardware::mock::{MockActuator, MockCamera, ScriptedDetector};
    use crate::recording::{RawVideoWriterFactory, RecordingManager};

    fn state(dir: &std::path::Path) -> Arc<CaptureState> {
        let config = RecordingConfig {
            save_dir: dir.to_path_buf(),
            ..RecordingConfig::default()
        };
        Arc::new(CaptureState::new(
            Arc::new(MockActuator::new()),
            RecordingManager::new(&config, Arc::new(RawVideoWriterFactory)),
        ))
    }

    #[test]
    fn rejects_unsupported_schema_version() {
        let dir = tempfile::tempdir().unwrap();
        let detector = ScriptedDetector::with_schema(LabelSchema {
            version: 2,
            labels: vec!["forklift".into(), "person".into()],
        });
        let built = CaptureLoop::new(
            Arc::new(MockCamera::new(8, 8)),
            Arc::new(detector),
            state(dir.path()),
            &DeviceConfig::default(),
        );
        assert!(matches!(built, Err(SentryError::Detection(_))));
    }

    #[tokio::test]
    async fn camera_open_failure_is_hardware_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let capture = CaptureLoop::new(
            Arc::new(MockCamera::unavailable()),
            Arc::new(ScriptedDetector::new()),
            state.clone(),
            &DeviceConfig::default(),
        )
        .unwrap();

        let result = capture.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(SentryError::Hardware(_))));
        assert!(state.latest_frame().await.is_none());
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn logs_inference_latency_while_tracking() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path());
        let capture = CaptureLoop::new(
            Arc::new(MockCamera::new(8, 8)),
            Arc::new(ScriptedDetector::new()),
            state.clone(),
            &DeviceConfig::default(),
        )
        .unwrap();

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        capture.process(Frame::filled(8, 8, 3, 0)).await;
        assert!(!String::from_utf8_lossy(&captured.0.lock().unwrap()).contains("latency_ms"));

        state.start_tracking().await;
        capture.process(Frame::filled(8, 8, 3, 0)).await;
        let logs = String::from_utf8_lossy(&captured.0.lock().unwrap()).into_owned();
        assert!(logs.contains("Inference finished"), "logs: {}", logs);
        assert!(logs.contains("latency_ms"), "logs: {}", logs);
    }
}

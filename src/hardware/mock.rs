//! Mock Hardware Implementations
//!
//! Provides simulated devices for testing without a camera, a detector or GPIO wiring.
//! All mock devices use async-safe operations (tokio::time::sleep, not std::thread::sleep).
//!
//! # Available Mocks
//!
//! - `MockCamera` - Test-pattern camera with scriptable open/grab failures
//! - `ScriptedDetector` - Replays a queue of per-frame detections
//! - `MockActuator` - Records every applied signal
//! - `MockHostControl` - Records host actions instead of executing them

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::debug;

use crate::detection::{ActuatorSignal, BoundingBox, LabelSchema, RawDetection};
use crate::hardware::capabilities::{
    ActuatorOutput, DetectionService, FrameSource, HostAction, HostControl,
};
use crate::hardware::Frame;

// =============================================================================
// MockCamera - Simulated Camera
// =============================================================================

/// Mock camera producing a moving test pattern.
///
/// # Example
///
/// ```rust,ignore
/// let camera = MockCamera::new(640, 480);
/// camera.open().await?;
/// let frame = camera.grab().await?;
/// ```
pub struct MockCamera {
    resolution: (u32, u32),
    frame_count: AtomicU64,
    opened: Arc<RwLock<bool>>,
    fail_open: bool,
    grab_failures: AtomicU64,
    failing: AtomicBool,
    readout: Duration,
}

impl MockCamera {
    /// Create a mock camera with the given resolution (3 channels)
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            resolution: (width, height),
            frame_count: AtomicU64::new(0),
            opened: Arc::new(RwLock::new(false)),
            fail_open: false,
            grab_failures: AtomicU64::new(0),
            failing: AtomicBool::new(false),
            readout: Duration::from_millis(1),
        }
    }

    /// A camera whose `open` always fails
    pub fn unavailable() -> Self {
        Self {
            fail_open: true,
            ..Self::new(640, 480)
        }
    }

    /// Fail the next `count` grabs before producing frames again
    pub fn with_grab_failures(self, count: u64) -> Self {
        self.grab_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Make every grab fail until switched back
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Simulated frame readout time
    pub fn with_readout(mut self, readout: Duration) -> Self {
        self.readout = readout;
        self
    }

    /// Frames delivered so far
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::SeqCst)
    }

    /// Whether the camera is currently open
    pub async fn is_open(&self) -> bool {
        *self.opened.read().await
    }
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

#[async_trait]
impl FrameSource for MockCamera {
    async fn open(&self) -> Result<()> {
        if self.fail_open {
            anyhow::bail!("MockCamera: device not present");
        }
        *self.opened.write().await = true;
        debug!(width = self.resolution.0, height = self.resolution.1, "MockCamera opened");
        Ok(())
    }

    async fn grab(&self) -> Result<Frame> {
        if !*self.opened.read().await {
            anyhow::bail!("MockCamera: grab before open");
        }

        sleep(self.readout).await;

        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("MockCamera: sensor not responding"));
        }

        let pending = self.grab_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.grab_failures.store(pending - 1, Ordering::SeqCst);
            return Err(anyhow!("MockCamera: dropped frame"));
        }

        let n = self.frame_count.fetch_add(1, Ordering::SeqCst) + 1;
        let (width, height) = self.resolution;
        let data: Vec<u8> = (0..(width as usize * height as usize * 3))
            .map(|i| ((i as u64 + n) % 256) as u8)
            .collect();
        Ok(Frame::from_bytes(width, height, 3, data))
    }

    async fn close(&self) -> Result<()> {
        *self.opened.write().await = false;
        Ok(())
    }
}

// =============================================================================
// ScriptedDetector - Replayed Detections
// =============================================================================

/// Detector that returns a pre-scripted detection set per call.
///
/// Once the script is exhausted it returns the fallback set (empty by default).
pub struct ScriptedDetector {
    schema: LabelSchema,
    script: Mutex<VecDeque<Result<Vec<RawDetection>, String>>>,
    fallback: Vec<RawDetection>,
    calls: AtomicU64,
}

impl ScriptedDetector {
    /// Detector using the stock label schema and an empty script
    pub fn new() -> Self {
        Self::with_schema(LabelSchema::v1_default())
    }

    /// Detector publishing a custom label schema
    pub fn with_schema(schema: LabelSchema) -> Self {
        Self {
            schema,
            script: Mutex::new(VecDeque::new()),
            fallback: Vec::new(),
            calls: AtomicU64::new(0),
        }
    }

    /// Detections returned after the script runs out
    pub fn with_fallback(mut self, detections: Vec<RawDetection>) -> Self {
        self.fallback = detections;
        self
    }

    /// Queue the detections for the next call
    pub fn push(&self, detections: Vec<RawDetection>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(detections));
        }
    }

    /// Queue a failure for the next call
    pub fn push_failure(&self, message: &str) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(message.to_string()));
        }
    }

    /// Number of `detect` calls served
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// A detection of `class_index` covering a fixed box
    pub fn hit(class_index: u32) -> RawDetection {
        RawDetection {
            class_index,
            bbox: BoundingBox::new(10, 10, 60, 80),
            confidence: 0.9,
        }
    }
}

impl Default for ScriptedDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DetectionService for ScriptedDetector {
    fn label_schema(&self) -> LabelSchema {
        self.schema.clone()
    }

    async fn detect(&self, _frame: &Frame) -> Result<Vec<RawDetection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .map_err(|_| anyhow!("ScriptedDetector: script lock poisoned"))?
            .pop_front();
        match next {
            Some(Ok(detections)) => Ok(detections),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(self.fallback.clone()),
        }
    }
}

// =============================================================================
// MockActuator - Recorded Output Lines
// =============================================================================

/// Actuator that records what it was asked to drive.
#[derive(Default)]
pub struct MockActuator {
    history: Mutex<Vec<ActuatorSignal>>,
    fail: AtomicBool,
}

impl MockActuator {
    /// New actuator with all lines low
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `apply` calls fail
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Most recently applied signal (`None` if never driven)
    pub fn current(&self) -> ActuatorSignal {
        self.history
            .lock()
            .ok()
            .and_then(|h| h.last().copied())
            .unwrap_or_default()
    }

    /// Every applied signal in order
    pub fn history(&self) -> Vec<ActuatorSignal> {
        self.history.lock().map(|h| h.clone()).unwrap_or_default()
    }
}

impl ActuatorOutput for MockActuator {
    fn apply(&self, signal: ActuatorSignal) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("MockActuator: output lines unavailable");
        }
        self.history
            .lock()
            .map_err(|_| anyhow!("MockActuator: history lock poisoned"))?
            .push(signal);
        Ok(())
    }
}

// =============================================================================
// MockHostControl - Recorded Host Actions
// =============================================================================

/// Host control that records actions instead of rebooting the machine.
#[derive(Default)]
pub struct MockHostControl {
    actions: Mutex<Vec<HostAction>>,
}

impl MockHostControl {
    /// New recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Actions executed so far
    pub fn actions(&self) -> Vec<HostAction> {
        self.actions.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl HostControl for MockHostControl {
    async fn execute(&self, action: HostAction) -> Result<()> {
        debug!(?action, "MockHostControl: recording host action");
        self.actions
            .lock()
            .map_err(|_| anyhow!("MockHostControl: lock poisoned"))?
            .push(action);
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_camera_requires_open() {
        let camera = MockCamera::new(8, 6);
        assert!(camera.grab().await.is_err());

        camera.open().await.unwrap();
        let frame = camera.grab().await.unwrap();
        assert_eq!((frame.width, frame.height, frame.channels), (8, 6, 3));
        assert!(frame.is_well_formed());
        assert_eq!(camera.frame_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_camera_scripted_failures() {
        let camera = MockCamera::new(4, 4).with_grab_failures(2);
        camera.open().await.unwrap();
        assert!(camera.grab().await.is_err());
        assert!(camera.grab().await.is_err());
        assert!(camera.grab().await.is_ok());
    }

    #[tokio::test]
    async fn test_unavailable_camera() {
        let camera = MockCamera::unavailable();
        assert!(camera.open().await.is_err());
        assert!(!camera.is_open().await);
    }

    #[tokio::test]
    async fn test_scripted_detector_replays_then_falls_back() {
        let detector = ScriptedDetector::new().with_fallback(vec![ScriptedDetector::hit(2)]);
        detector.push(vec![ScriptedDetector::hit(1)]);
        detector.push_failure("model crashed");

        let frame = Frame::filled(4, 4, 3, 0);
        assert_eq!(detector.detect(&frame).await.unwrap()[0].class_index, 1);
        assert!(detector.detect(&frame).await.is_err());
        assert_eq!(detector.detect(&frame).await.unwrap()[0].class_index, 2);
        assert_eq!(detector.calls(), 3);
    }

    #[test]
    fn test_mock_actuator_history() {
        let actuator = MockActuator::new();
        assert_eq!(actuator.current(), ActuatorSignal::None);
        actuator.apply(ActuatorSignal::Both).unwrap();
        actuator.apply(ActuatorSignal::Person).unwrap();
        assert_eq!(actuator.current(), ActuatorSignal::Person);
        assert_eq!(actuator.history().len(), 2);

        actuator.set_failing(true);
        assert!(actuator.apply(ActuatorSignal::None).is_err());
    }

    #[tokio::test]
    async fn test_mock_host_control_records() {
        let host = MockHostControl::new();
        host.execute(HostAction::Reboot).await.unwrap();
        assert_eq!(host.actions(), vec![HostAction::Reboot]);
    }
}

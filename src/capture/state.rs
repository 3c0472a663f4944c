//! State shared between the capture loop and the command server.
//!
//! Two locks, never held together:
//! - the *control lock* (async mutex) over the tracking flag, the actuator and the
//!   recording manager, so a cycle's actuator and recording decisions are applied
//!   atomically against the current tracking flag;
//! - the *frame lock* (async rwlock) over the most recently published frame, swapped as
//!   an `Arc` so readers see either the old or the new frame.
//!
//! Recorder calls (encoding, flushing, renaming) run on the blocking pool while the
//! control lock is held, so a slow encoder never occupies a runtime worker.

use serde::Serialize;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::detection::ActuatorSignal;
use crate::hardware::capabilities::ActuatorOutput;
use crate::hardware::Frame;
use crate::recording::{RecorderEvent, RecordingManager};

type SharedRecorder = Arc<StdMutex<RecordingManager>>;

struct ControlState {
    tracking: bool,
    signal: ActuatorSignal,
    actuator: Arc<dyn ActuatorOutput>,
    recorder: SharedRecorder,
}

impl ControlState {
    fn drive(&mut self, signal: ActuatorSignal) {
        if signal != self.signal {
            self.force(signal);
        }
    }

    fn force(&mut self, signal: ActuatorSignal) {
        match self.actuator.apply(signal) {
            Ok(()) => self.signal = signal,
            Err(e) => warn!(%signal, error = %e, "Failed to drive actuator"),
        }
    }

    fn is_recording(&self) -> bool {
        self.recorder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_recording()
    }
}

/// Run `op` against the recorder on the blocking pool.
///
/// Returns `None` if the blocking task panicked.
async fn with_recorder<R, F>(recorder: &SharedRecorder, op: F) -> Option<R>
where
    F: FnOnce(&mut RecordingManager) -> R + Send + 'static,
    R: Send + 'static,
{
    let recorder = recorder.clone();
    let task = tokio::task::spawn_blocking(move || {
        let mut recorder = recorder.lock().unwrap_or_else(PoisonError::into_inner);
        op(&mut recorder)
    });
    match task.await {
        Ok(out) => Some(out),
        Err(e) => {
            error!(error = %e, "Recorder task failed");
            None
        }
    }
}

/// Point-in-time view of the control state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// Whether detection and actuation are enabled
    pub tracking: bool,
    /// Whether an incident recording is open
    pub recording: bool,
    /// Signal currently driven on the actuator
    pub signal: ActuatorSignal,
}

/// The single owned state object behind the capture loop and the command server.
pub struct CaptureState {
    control: Mutex<ControlState>,
    frame: RwLock<Option<Arc<Frame>>>,
}

impl CaptureState {
    /// Tracking starts disabled with the actuator at `None`.
    pub fn new(actuator: Arc<dyn ActuatorOutput>, recorder: RecordingManager) -> Self {
        Self {
            control: Mutex::new(ControlState {
                tracking: false,
                signal: ActuatorSignal::None,
                actuator,
                recorder: Arc::new(StdMutex::new(recorder)),
            }),
            frame: RwLock::new(None),
        }
    }

    /// Enable detection and actuation from the next cycle on.
    pub async fn start_tracking(&self) {
        let mut control = self.control.lock().await;
        if !control.tracking {
            info!("Tracking enabled");
        }
        control.tracking = true;
    }

    /// Disable tracking and drop the actuator to `None` immediately.
    pub async fn stop_tracking(&self) {
        let mut control = self.control.lock().await;
        if control.tracking {
            info!("Tracking disabled");
        }
        control.tracking = false;
        control.force(ActuatorSignal::None);
    }

    /// Current tracking flag.
    pub async fn is_tracking(&self) -> bool {
        self.control.lock().await.tracking
    }

    /// Tracking, recording and actuator state read under one lock.
    pub async fn status(&self) -> StatusSnapshot {
        let control = self.control.lock().await;
        StatusSnapshot {
            tracking: control.tracking,
            recording: control.is_recording(),
            signal: control.signal,
        }
    }

    /// Apply one capture cycle's outcome.
    ///
    /// `detected` is the signal computed from this cycle's detections, or `None` when
    /// detection did not run. The tracking flag is re-checked here: if tracking was
    /// disabled while the cycle ran, the signal is discarded. An active recording always
    /// receives the frame (as a non-danger frame when no signal applies) so its linger
    /// window can elapse.
    pub async fn apply_cycle(
        &self,
        detected: Option<ActuatorSignal>,
        frame: Arc<Frame>,
        now: Instant,
    ) -> RecorderEvent {
        let mut control = self.control.lock().await;
        let signal = match (control.tracking, detected) {
            (true, Some(signal)) => {
                control.drive(signal);
                signal
            }
            _ if control.is_recording() => ActuatorSignal::None,
            _ => return RecorderEvent::Idle,
        };
        with_recorder(&control.recorder, move |recorder| {
            recorder.observe(signal, &frame, now)
        })
        .await
        .unwrap_or(RecorderEvent::Idle)
    }

    /// Advance an active recording through a cycle that produced no frame.
    pub async fn tick(&self, now: Instant) -> RecorderEvent {
        let control = self.control.lock().await;
        if !control.is_recording() {
            return RecorderEvent::Idle;
        }
        with_recorder(&control.recorder, move |recorder| recorder.tick(now))
            .await
            .unwrap_or(RecorderEvent::Idle)
    }

    /// Finalize any active recording, then reset the actuator.
    pub async fn shutdown(&self) {
        let mut control = self.control.lock().await;
        if let Some(Some(path)) = with_recorder(&control.recorder, |recorder| recorder.finalize()).await {
            info!(path = %path.display(), "Recording closed on shutdown");
        }
        control.force(ActuatorSignal::None);
    }

    /// Replace the frame served to `get_frame` requests.
    pub async fn publish_frame(&self, frame: Arc<Frame>) {
        *self.frame.write().await = Some(frame);
    }

    /// The most recently published frame, if any.
    pub async fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.frame.read().await.clone()
    }
}

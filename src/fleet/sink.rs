//! Display sinks receiving preview frames from the poll workers.

use std::collections::HashMap;
use std::sync::Mutex;
use tracing::trace;

/// A decoded preview frame from one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewFrame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Bytes per pixel
    pub channels: u8,
    /// Packed row-major pixels
    pub bytes: Vec<u8>,
}

/// Receives preview frames per device.
///
/// Rendering is the implementor's business; calls come from poll worker tasks.
pub trait FrameSink: Send + Sync {
    /// Show `frame` as the current view of `device`
    fn show(&self, device: &str, frame: PreviewFrame);

    /// `device` has no live view any more
    fn clear(&self, device: &str);
}

/// Sink that keeps the latest frame per device and logs arrivals at trace level.
#[derive(Default)]
pub struct LatestFrameSink {
    frames: Mutex<HashMap<String, PreviewFrame>>,
}

impl LatestFrameSink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest frame of `device`, if it has a live view
    pub fn latest(&self, device: &str) -> Option<PreviewFrame> {
        self.frames.lock().ok()?.get(device).cloned()
    }

    /// Devices with a live view
    pub fn devices(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .frames
            .lock()
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl FrameSink for LatestFrameSink {
    fn show(&self, device: &str, frame: PreviewFrame) {
        trace!(device, width = frame.width, height = frame.height, "Preview frame");
        if let Ok(mut frames) = self.frames.lock() {
            frames.insert(device.to_string(), frame);
        }
    }

    fn clear(&self, device: &str) {
        if let Ok(mut frames) = self.frames.lock() {
            frames.remove(device);
        }
    }
}

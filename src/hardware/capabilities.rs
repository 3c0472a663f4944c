//! Hardware Capabilities
//!
//! Small, focused traits describing the collaborators the device core drives but does
//! not implement itself:
//!
//! - `FrameSource` - a camera producing raw frames on demand
//! - `DetectionService` - the object detector (black box)
//! - `ActuatorOutput` - the physical output pins behind an `ActuatorSignal`
//! - `PreviewEncoder` - downsizing/encoding of frames for transport
//! - `HostControl` - privileged host actions (reboot, power off)
//!
//! # Design Philosophy
//!
//! Each capability trait:
//! - Is thread-safe (requires Send + Sync)
//! - Takes `&self`; implementations use interior mutability for state
//! - Uses anyhow::Result for errors, since driver failures are opaque to the core
//! - Focuses on ONE thing
//!
//! Simulated implementations live in [`crate::hardware::mock`].

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::detection::{ActuatorSignal, LabelSchema, RawDetection};
use crate::hardware::Frame;

/// Capability: Frame Acquisition
///
/// # Contract
/// - `open` is called once before the first `grab`; failure there is fatal to capture
/// - `grab` may fail transiently (dropped USB frame); callers skip the cycle and retry
/// - `close` releases the device; calling it twice must be harmless
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Open the device and apply the requested geometry
    async fn open(&self) -> Result<()>;

    /// Acquire the next frame
    async fn grab(&self) -> Result<Frame>;

    /// Release the device
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Capability: Object Detection
///
/// The detector reports class *indices*. What those indices mean is declared by
/// `label_schema`, which the capture loop resolves by name when it is built.
#[async_trait]
pub trait DetectionService: Send + Sync {
    /// The versioned label vocabulary this detector was trained with
    fn label_schema(&self) -> LabelSchema;

    /// Run detection on one frame
    async fn detect(&self, frame: &Frame) -> Result<Vec<RawDetection>>;
}

/// Capability: Actuator Output
///
/// Drives the output pins so that only the pin belonging to `signal` is high
/// (all pins low for `None`).
pub trait ActuatorOutput: Send + Sync {
    /// Apply a signal to the outputs
    fn apply(&self, signal: ActuatorSignal) -> Result<()>;
}

/// A downsized, transport-encoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPreview {
    /// Width of the encoded image
    pub width: u32,
    /// Height of the encoded image
    pub height: u32,
    /// Channels of the encoded image
    pub channels: u8,
    /// Encoded bytes
    pub bytes: Vec<u8>,
}

/// Capability: Preview Encoding
pub trait PreviewEncoder: Send + Sync {
    /// Downsize `frame` to `width` x `height` and encode it for transport
    fn encode(&self, frame: &Frame, width: u32, height: u32) -> Result<EncodedPreview>;
}

/// Raw preview encoding: nearest-neighbour downsizing, uncompressed pixels.
///
/// Stand-in for an image codec; consoles receive width/height/channels alongside.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawPreviewEncoder;

impl PreviewEncoder for RawPreviewEncoder {
    fn encode(&self, frame: &Frame, width: u32, height: u32) -> Result<EncodedPreview> {
        if !frame.is_well_formed() {
            anyhow::bail!(
                "Frame buffer of {} bytes does not match {}x{}x{}",
                frame.data.len(),
                frame.width,
                frame.height,
                frame.channels
            );
        }
        let small = frame.resized(width, height);
        Ok(EncodedPreview {
            width: small.width,
            height: small.height,
            channels: small.channels,
            bytes: small.data,
        })
    }
}

/// Privileged host actions a console may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostAction {
    /// Restart the device
    Reboot,
    /// Shut the device down
    PowerOff,
}

/// Capability: Host Control
#[async_trait]
pub trait HostControl: Send + Sync {
    /// Execute a privileged host action
    async fn execute(&self, action: HostAction) -> Result<()>;
}

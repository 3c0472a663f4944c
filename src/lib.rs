//! # Edge Sentry
//!
//! Core library for a small fleet of camera-equipped edge devices that warn when a
//! forklift and a person share the scene, record those incidents, and are operated
//! remotely from a controller console.
//!
//! ## Crate Structure
//!
//! - **`capture`**: the per-device real-time loop (grab, detect, actuate, record,
//!   publish) and the `CaptureState` it shares with the command server.
//! - **`detection`**: detection results, the versioned label contract with the external
//!   detector, the actuator policy and box overlays.
//! - **`recording`**: the hysteresis recording state machine, container writers and the
//!   store serving finished recordings.
//! - **`network`**: the line-delimited JSON protocol and the device command server.
//! - **`fleet`**: controller-side device connections, reconnection, fan-out and frame
//!   polling.
//! - **`hardware`**: capability traits for camera, detector, actuator, preview encoder
//!   and host control, plus mock implementations.
//! - **`daemon`**: assembly of the device process.
//! - **`console`**: the stdin operator console of the fleet controller.
//! - **`config`**, **`logging`**, **`error`**: the ambient configuration, tracing and
//!   error types.

pub mod capture;
pub mod config;
pub mod console;
pub mod daemon;
pub mod detection;
pub mod error;
pub mod fleet;
pub mod hardware;
pub mod logging;
pub mod network;
pub mod recording;

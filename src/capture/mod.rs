//! Device capture pipeline and the state it shares with the command server.

pub mod capture_loop;
pub mod state;

pub use capture_loop::CaptureLoop;
pub use state::{CaptureState, StatusSnapshot};

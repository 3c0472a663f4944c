//! Device-side hardware seams.
//!
//! The core only talks to hardware through the capability traits in [`capabilities`].
//! [`mock`] provides simulated devices for tests and for running the daemon on a
//! workstation; [`host`] wraps the system shutdown command.

pub mod capabilities;
pub mod frame;
pub mod host;
pub mod mock;

pub use frame::Frame;

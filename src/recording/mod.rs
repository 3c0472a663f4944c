//! Incident recording: the recording state machine, container writers and the store
//! serving finished files.

pub mod manager;
pub mod store;
pub mod writer;

pub use manager::{RecorderEvent, RecordingManager, RecordingSession};
pub use store::{RecordingStore, StoreError};
pub use writer::{FrameWriter, RawVideoWriterFactory, VideoWriterFactory};

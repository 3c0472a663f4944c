//! Fleet side: connections to many devices, reconnection, fan-out and frame polling.

pub mod address;
pub mod connection;
pub mod device;
pub mod error;
pub mod manager;
pub mod sink;

pub use address::DeviceAddress;
pub use connection::{ConnectionSettings, DeviceConnection};
pub use device::{ConnectionStatus, DeviceRecord};
pub use error::ClientError;
pub use manager::{BroadcastReport, DeviceStatus, FleetManager};
pub use sink::{FrameSink, LatestFrameSink, PreviewFrame};

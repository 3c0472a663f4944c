//! Roster entries and their connection state.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use super::address::DeviceAddress;
use super::connection::DeviceConnection;

/// Connection state of one device.
#[derive(Clone)]
pub enum ConnectionState {
    /// No connection and no attempt in flight.
    Disconnected,
    /// A connect attempt is in flight; no second attempt may start.
    Connecting,
    /// A live connection.
    Connected(Arc<DeviceConnection>),
}

/// Payload-free view of [`ConnectionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Waiting for the next scan
    Disconnected,
    /// Attempt in flight
    Connecting,
    /// Usable
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        })
    }
}

/// One configured device. Created at start-up, never removed.
pub struct DeviceRecord {
    name: String,
    address: DeviceAddress,
    state: Mutex<ConnectionState>,
}

impl DeviceRecord {
    /// New record, starting `Disconnected`.
    pub fn new(name: impl Into<String>, address: DeviceAddress) -> Self {
        Self {
            name: name.into(),
            address,
            state: Mutex::new(ConnectionState::Disconnected),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Current state without the connection handle.
    pub fn status(&self) -> ConnectionStatus {
        match *self.lock() {
            ConnectionState::Disconnected => ConnectionStatus::Disconnected,
            ConnectionState::Connecting => ConnectionStatus::Connecting,
            ConnectionState::Connected(_) => ConnectionStatus::Connected,
        }
    }

    /// The live connection, if any.
    pub fn connection(&self) -> Option<Arc<DeviceConnection>> {
        match &*self.lock() {
            ConnectionState::Connected(conn) => Some(conn.clone()),
            _ => None,
        }
    }

    /// Move `Disconnected` to `Connecting` and hand out the attempt guard.
    ///
    /// Returns `None` if the device is already connected or connecting.
    pub fn begin_connect(self: &Arc<Self>) -> Option<ConnectAttempt> {
        let mut state = self.lock();
        match *state {
            ConnectionState::Disconnected => {
                *state = ConnectionState::Connecting;
                Some(ConnectAttempt {
                    record: Arc::clone(self),
                    finished: false,
                })
            }
            ConnectionState::Connecting | ConnectionState::Connected(_) => None,
        }
    }

    /// Drop back to `Disconnected` if the record still holds connection `id`.
    pub fn release_connection(&self, id: u64) -> bool {
        let mut state = self.lock();
        match &*state {
            ConnectionState::Connected(conn) if conn.id() == id => {
                *state = ConnectionState::Disconnected;
                true
            }
            _ => false,
        }
    }

    /// Take the live connection out of the record, leaving it `Disconnected`.
    pub fn take_connection(&self) -> Option<Arc<DeviceConnection>> {
        let mut state = self.lock();
        match std::mem::replace(&mut *state, ConnectionState::Disconnected) {
            ConnectionState::Connected(conn) => Some(conn),
            other => {
                *state = other;
                None
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        // state transitions never panic midway, so a poisoned lock still holds a valid state
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// An in-flight connect attempt.
///
/// Dropping the guard without [`ConnectAttempt::complete`] returns the record to
/// `Disconnected`, whatever way the attempt ended.
pub struct ConnectAttempt {
    record: Arc<DeviceRecord>,
    finished: bool,
}

impl ConnectAttempt {
    /// The record being connected.
    pub fn record(&self) -> &Arc<DeviceRecord> {
        &self.record
    }

    /// Install the new connection.
    pub fn complete(mut self, conn: Arc<DeviceConnection>) {
        *self.record.lock() = ConnectionState::Connected(conn);
        self.finished = true;
    }
}

impl Drop for ConnectAttempt {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = self.record.lock();
        if matches!(*state, ConnectionState::Connecting) {
            *state = ConnectionState::Disconnected;
        }
    }
}

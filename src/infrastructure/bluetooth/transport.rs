//! Platform BLE transport boundary.
//!
//! The scan session and connection supervisor drive the radio through this
//! trait and never touch a platform BLE API directly. Asynchronous transport
//! happenings (advertisement sightings, unsolicited link drops) arrive as
//! [`TransportEvent`]s on the channel handed to the adapter at construction;
//! request/response operations complete through their `Result`.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("no usable Bluetooth adapter")]
    AdapterUnavailable,
    #[error("no active GATT session")]
    NotConnected,
    #[error("peripheral {0} not found")]
    PeripheralNotFound(String),
    #[error("control characteristic missing on peripheral")]
    CharacteristicMissing,
    #[error("transport failure: {0}")]
    Io(String),
}

/// Events the transport pushes without a matching request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// An advertisement sighting during an active scan.
    Discovered {
        address: String,
        name: Option<String>,
        connectable: bool,
    },
    /// The link to the connected peripheral went away. Sent both for
    /// requested teardowns and for unsolicited drops.
    Disconnected,
}

/// One BLE central, one GATT session at a time.
///
/// `connect` resolving `Ok` means the transport reports connected with the
/// control characteristic resolved; `disconnect` resolving `Ok` means the
/// teardown was confirmed. There is no explicit timeout on reads or writes
/// here: a dead peripheral surfaces through the transport's own failure
/// path.
#[async_trait]
pub trait BleTransport: Send + Sync {
    async fn start_scan(&self) -> Result<(), TransportError>;

    async fn stop_scan(&self) -> Result<(), TransportError>;

    async fn connect(&self, address: &str) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Read the raw state frame from the control characteristic.
    async fn read_state(&self) -> Result<Vec<u8>, TransportError>;

    /// Write one command frame to the control characteristic.
    async fn write_command(&self, frame: &[u8]) -> Result<(), TransportError>;
}

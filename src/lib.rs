//! BLE controller for addressable LED strips.
//!
//! Discovers SP11x-class strip controllers, supervises a single GATT
//! session, and speaks the controller's binary command/state protocol.
//! The [`StripService`] handle is the application-facing surface; the
//! transport behind it is pluggable through [`BleTransport`].

pub mod domain;
pub mod infrastructure;

pub use domain::models::{
    AppEvent, ConnectionState, CustomColorSlot, Device, DeviceState, MessageSeverity,
    StatusMessage,
};
pub use domain::preferences::{LogSettings, Preferences, PreferencesService};
pub use infrastructure::bluetooth::btleplug_backend::BtleplugTransport;
pub use infrastructure::bluetooth::protocol::{CommandError, CommandFrame};
pub use infrastructure::bluetooth::service::StripService;
pub use infrastructure::bluetooth::transport::{BleTransport, TransportError, TransportEvent};

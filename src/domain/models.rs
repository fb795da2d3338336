use serde::{Deserialize, Serialize};

/// A controller seen during a scan.
///
/// Identity is the hardware address; two sightings with the same address are
/// the same device no matter what name they advertised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub name: Option<String>,
    pub address: String,
}

/// Lifecycle of the single logical GATT session.
///
/// This is the sole authority other components consult to know whether
/// writes are currently permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Connected at the transport level, initial state frame not read yet.
    LoadingState,
    Connected,
    Retrying,
    Disconnecting,
    /// Retry attempts exhausted for this address; requires an explicit
    /// reconnect from the user.
    InvalidDevice,
}

/// Decoded contents of the controller's 12-byte state frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    pub is_on: bool,
    pub preset: u8,
    pub speed: u8,
    pub brightness: u8,
    pub ic_model: u8,
    pub channel: u8,
    pub pixel_count: u16,
    /// Two uppercase hex digits per channel, e.g. "FF".
    pub red: String,
    pub green: String,
    pub blue: String,
    pub white_brightness: u8,
}

/// A saved color preset for one device, slots 1..=7.
///
/// Slot 0 means "no slot selected" in the controller UI and is never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomColorSlot {
    pub id: u8,
    pub hex_color: String,
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

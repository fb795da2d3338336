//! Connection State Machine
//!
//! Owns the lifecycle of the single logical GATT session. Transport
//! callbacks and user intents are normalized into [`ConnEvent`]s and fed
//! through one transition function; the returned [`ConnAction`]s tell the
//! supervisor what transport work to start or cancel. The machine itself
//! never performs I/O, which keeps every transition testable.

use crate::domain::models::{ConnectionState, DeviceState, MessageSeverity};
use crate::infrastructure::bluetooth::protocol;
use tracing::{info, warn};

/// Retries after the initial attempt; the (N+1)-th consecutive failure is
/// terminal for the address.
pub const MAX_CONNECT_RETRIES: u8 = 3;

/// Everything that can happen to the session, as one tagged union.
#[derive(Debug, Clone)]
pub enum ConnEvent {
    ConnectRequested { address: String },
    DisconnectRequested,
    TransportConnected,
    TransportConnectFailed { reason: String },
    StateFrame { bytes: Vec<u8> },
    StateReadFailed { reason: String },
    RetryTick,
    TransportDisconnected,
}

/// Side effects the supervisor performs after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnAction {
    StartConnect { address: String },
    ReadDeviceState,
    StartDisconnect,
    /// Feed a `RetryTick` back in. Kept as an action so a queued
    /// `DisconnectRequested` can still win the race and cancel the retry.
    ScheduleRetry,
    /// Abort any in-flight connect or state read.
    CancelPendingIo,
    Report {
        message: String,
        severity: MessageSeverity,
    },
}

pub struct ConnectionMachine {
    state: ConnectionState,
    device_state: Option<DeviceState>,
    address: Option<String>,
    retries_used: u8,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            device_state: None,
            address: None,
            retries_used: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn device_state(&self) -> Option<&DeviceState> {
        self.device_state.as_ref()
    }

    /// The address of the current (or last attempted) session.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Writes are permitted only while `Connected`.
    pub fn writes_permitted(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Mirror a successfully written command into the cached device state so
    /// observers track what was just commanded without a re-read.
    pub fn update_device_state(&mut self, apply: impl FnOnce(&mut DeviceState)) {
        if self.state == ConnectionState::Connected {
            if let Some(ref mut ds) = self.device_state {
                apply(ds);
            }
        }
    }

    pub fn on_event(&mut self, event: ConnEvent) -> Vec<ConnAction> {
        use ConnectionState::*;

        match event {
            ConnEvent::ConnectRequested { address } => match self.state {
                Disconnected | InvalidDevice => {
                    info!(%address, "starting connection");
                    self.address = Some(address.clone());
                    self.retries_used = 0;
                    self.device_state = None;
                    self.state = Connecting;
                    vec![ConnAction::StartConnect { address }]
                }
                _ => {
                    warn!(state = ?self.state, "connect rejected, session already active");
                    vec![ConnAction::Report {
                        message: format!(
                            "Connect rejected: a session is already {:?}",
                            self.state
                        ),
                        severity: MessageSeverity::Warning,
                    }]
                }
            },

            ConnEvent::TransportConnected => match self.state {
                Connecting => {
                    self.state = LoadingState;
                    vec![ConnAction::ReadDeviceState]
                }
                // Late confirmation; a disconnect is already in flight or
                // the session was torn down. Nothing to do.
                _ => vec![],
            },

            ConnEvent::TransportConnectFailed { reason } => match self.state {
                Connecting => self.fail_attempt(reason),
                _ => vec![],
            },

            ConnEvent::StateFrame { bytes } => match self.state {
                LoadingState => match protocol::decode_device_state(&bytes) {
                    Ok(device_state) => {
                        info!(address = ?self.address, "device state loaded, session ready");
                        self.device_state = Some(device_state);
                        self.state = Connected;
                        vec![ConnAction::Report {
                            message: "Connected".to_string(),
                            severity: MessageSeverity::Success,
                        }]
                    }
                    // A garbled frame is a connection-health signal, not a
                    // user-facing error.
                    Err(e) => self.fail_attempt(format!("state frame rejected: {e}")),
                },
                _ => vec![],
            },

            ConnEvent::StateReadFailed { reason } => match self.state {
                LoadingState => self.fail_attempt(reason),
                _ => vec![],
            },

            ConnEvent::RetryTick => match self.state {
                Retrying => {
                    let address = self
                        .address
                        .clone()
                        .expect("retrying without a selected address");
                    self.state = Connecting;
                    vec![ConnAction::StartConnect { address }]
                }
                // The retry was cancelled (disconnect arrived first).
                _ => vec![],
            },

            ConnEvent::DisconnectRequested => match self.state {
                Connecting | LoadingState | Connected | Retrying => {
                    self.state = Disconnecting;
                    vec![ConnAction::CancelPendingIo, ConnAction::StartDisconnect]
                }
                _ => vec![],
            },

            ConnEvent::TransportDisconnected => match self.state {
                Disconnected => vec![],
                // The terminal failure marker survives transport cleanup
                // events; only an explicit connect leaves InvalidDevice.
                InvalidDevice => vec![],
                _ => {
                    info!("session ended");
                    self.state = Disconnected;
                    self.device_state = None;
                    vec![ConnAction::CancelPendingIo]
                }
            },
        }
    }

    fn fail_attempt(&mut self, reason: String) -> Vec<ConnAction> {
        if self.retries_used < MAX_CONNECT_RETRIES {
            self.retries_used += 1;
            warn!(
                attempt = self.retries_used,
                max = MAX_CONNECT_RETRIES,
                "connection attempt failed: {reason}"
            );
            self.state = ConnectionState::Retrying;
            vec![ConnAction::ScheduleRetry]
        } else {
            warn!("retries exhausted: {reason}");
            self.state = ConnectionState::InvalidDevice;
            self.device_state = None;
            vec![
                ConnAction::CancelPendingIo,
                ConnAction::StartDisconnect,
                ConnAction::Report {
                    message: format!(
                        "Device unreachable after {} attempts",
                        MAX_CONNECT_RETRIES + 1
                    ),
                    severity: MessageSeverity::Error,
                },
            ]
        }
    }
}

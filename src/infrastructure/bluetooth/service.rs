//! Strip Control Service
//!
//! Single-writer supervisor that owns the scan session and the connection
//! state machine, serializes user intents and transport completions into
//! them, and interprets the machine's actions as transport work. The public
//! [`StripService`] handle is the only surface the application layer sees.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::models::{
    AppEvent, ConnectionState, Device, DeviceState, MessageSeverity, StatusMessage,
};
use crate::infrastructure::bluetooth::connection::{ConnAction, ConnEvent, ConnectionMachine};
use crate::infrastructure::bluetooth::protocol::{self, CommandError, CommandFrame};
use crate::infrastructure::bluetooth::scanner::ScanSession;
use crate::infrastructure::bluetooth::throttle::{WriteThrottle, SAMPLE_WINDOW};
use crate::infrastructure::bluetooth::transport::{BleTransport, TransportEvent};

/// User intents, serialized into the supervisor's queue.
enum Intent {
    StartScan,
    StopScan,
    Connect { address: String },
    Disconnect,
    Write { frame: CommandFrame, kind: WriteKind },
}

/// What a queued write will change, for the optimistic state mirror.
enum WriteKind {
    Power(bool),
    Color { r: u8, g: u8, b: u8 },
    Brightness(u8),
    Rename { name: String },
}

/// Handle to the spawned control service.
///
/// Cheap intent senders plus `watch` receivers for the observable values.
/// Input validation happens synchronously here; everything else is applied
/// by the supervisor task in arrival order.
pub struct StripService {
    intents: mpsc::UnboundedSender<Intent>,
    throttle: WriteThrottle,
    scan_results: watch::Receiver<Vec<Device>>,
    scanning: watch::Receiver<bool>,
    connection: watch::Receiver<ConnectionState>,
    device_state: watch::Receiver<Option<DeviceState>>,
    worker: JoinHandle<()>,
}

impl StripService {
    /// Spawn the supervisor onto the current runtime.
    ///
    /// `transport_events` must be the receiving end of the channel the
    /// transport adapter was constructed with.
    pub fn spawn(
        transport: Arc<dyn BleTransport>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        app_events: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let (intent_tx, intent_rx) = mpsc::unbounded_channel();
        let (io_tx, io_rx) = mpsc::unbounded_channel();
        let (connection_tx, connection_rx) = watch::channel(ConnectionState::Disconnected);
        let (device_state_tx, device_state_rx) = watch::channel(None);

        let scan = ScanSession::new(Arc::clone(&transport), app_events.clone());
        let scan_results = scan.observe_results();
        let scanning = scan.observe_scanning();

        let supervisor = Supervisor {
            transport,
            machine: ConnectionMachine::new(),
            scan,
            intents: intent_rx,
            transport_events,
            transport_open: true,
            io_tx,
            io_rx,
            connection_tx,
            device_state_tx,
            app_events,
            pending_connect: None,
            pending_read: None,
        };
        let worker = tokio::spawn(supervisor.run());

        let throttle_intents = intent_tx.clone();
        let throttle = WriteThrottle::spawn(SAMPLE_WINDOW, move |value| {
            let frame = protocol::encode_brightness(value);
            let level = frame.as_bytes()[0];
            let _ = throttle_intents.send(Intent::Write {
                frame,
                kind: WriteKind::Brightness(level),
            });
        });

        Self {
            intents: intent_tx,
            throttle,
            scan_results,
            scanning,
            connection: connection_rx,
            device_state: device_state_rx,
            worker,
        }
    }

    pub fn start_scan(&self) {
        let _ = self.intents.send(Intent::StartScan);
    }

    pub fn stop_scan(&self) {
        let _ = self.intents.send(Intent::StopScan);
    }

    pub fn connect(&self, address: impl Into<String>) {
        let _ = self.intents.send(Intent::Connect {
            address: address.into(),
        });
    }

    pub fn disconnect(&self) {
        let _ = self.intents.send(Intent::Disconnect);
    }

    pub fn set_power(&self, on: bool) {
        let _ = self.intents.send(Intent::Write {
            frame: protocol::encode_power(on),
            kind: WriteKind::Power(on),
        });
    }

    /// Validate and queue a set-color write. Validation errors return here,
    /// synchronously; they are never retried.
    pub fn set_color(&self, hex: &str) -> Result<(), CommandError> {
        let frame = protocol::encode_color(hex)?;
        let bytes = frame.as_bytes();
        let kind = WriteKind::Color {
            r: bytes[0],
            g: bytes[1],
            b: bytes[2],
        };
        let _ = self.intents.send(Intent::Write { frame, kind });
        Ok(())
    }

    /// Submit a brightness value to the conflating throttle. Out-of-range
    /// values are clamped at encode time.
    pub fn set_brightness(&self, value: i32) {
        self.throttle.submit(value);
    }

    pub fn rename(&self, name: &str) -> Result<(), CommandError> {
        let frame = protocol::encode_rename(name)?;
        let _ = self.intents.send(Intent::Write {
            frame,
            kind: WriteKind::Rename {
                name: name.to_string(),
            },
        });
        Ok(())
    }

    pub fn observe_scan_results(&self) -> watch::Receiver<Vec<Device>> {
        self.scan_results.clone()
    }

    pub fn observe_scanning(&self) -> watch::Receiver<bool> {
        self.scanning.clone()
    }

    pub fn observe_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    pub fn observe_device_state(&self) -> watch::Receiver<Option<DeviceState>> {
        self.device_state.clone()
    }
}

impl Drop for StripService {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

struct Supervisor {
    transport: Arc<dyn BleTransport>,
    machine: ConnectionMachine,
    scan: ScanSession,
    intents: mpsc::UnboundedReceiver<Intent>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    transport_open: bool,
    io_tx: mpsc::UnboundedSender<ConnEvent>,
    io_rx: mpsc::UnboundedReceiver<ConnEvent>,
    connection_tx: watch::Sender<ConnectionState>,
    device_state_tx: watch::Sender<Option<DeviceState>>,
    app_events: mpsc::UnboundedSender<AppEvent>,
    pending_connect: Option<JoinHandle<()>>,
    pending_read: Option<JoinHandle<()>>,
}

impl Supervisor {
    async fn run(mut self) {
        loop {
            let scan_deadline = self.scan.deadline();

            tokio::select! {
                intent = self.intents.recv() => match intent {
                    Some(intent) => self.handle_intent(intent).await,
                    // Every handle dropped: the service is shutting down.
                    None => break,
                },
                event = self.transport_events.recv(), if self.transport_open => {
                    match event {
                        Some(event) => self.handle_transport_event(event).await,
                        None => self.transport_open = false,
                    }
                }
                Some(event) = self.io_rx.recv() => {
                    self.apply_conn_event(event).await;
                }
                _ = async {
                    match scan_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                } => {
                    debug!("scan window elapsed, auto-stopping");
                    self.scan.stop().await;
                }
            }
        }

        self.cancel_pending_io();
    }

    async fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::StartScan => self.scan.start().await,
            Intent::StopScan => self.scan.stop().await,
            Intent::Connect { address } => {
                self.apply_conn_event(ConnEvent::ConnectRequested { address })
                    .await;
            }
            Intent::Disconnect => {
                self.apply_conn_event(ConnEvent::DisconnectRequested).await;
            }
            Intent::Write { frame, kind } => self.handle_write(frame, kind).await,
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Discovered {
                address,
                name,
                connectable,
            } => self.scan.on_sighting(address, name, connectable),
            TransportEvent::Disconnected => {
                self.apply_conn_event(ConnEvent::TransportDisconnected).await;
            }
        }
    }

    /// Writes are accepted only while `Connected`; anything else is
    /// rejected with a report and dropped. Callers (the throttle above all)
    /// tolerate the rejection.
    async fn handle_write(&mut self, frame: CommandFrame, kind: WriteKind) {
        if !self.machine.writes_permitted() {
            debug!(state = ?self.machine.state(), "write rejected: not connected");
            self.report("Command dropped: not connected", MessageSeverity::Warning);
            return;
        }

        match self.transport.write_command(frame.as_bytes()).await {
            Ok(()) => {
                match kind {
                    WriteKind::Power(on) => {
                        self.machine.update_device_state(|ds| ds.is_on = on);
                    }
                    WriteKind::Color { r, g, b } => {
                        self.machine.update_device_state(|ds| {
                            ds.red = format!("{r:02X}");
                            ds.green = format!("{g:02X}");
                            ds.blue = format!("{b:02X}");
                        });
                    }
                    WriteKind::Brightness(level) => {
                        self.machine.update_device_state(|ds| ds.brightness = level);
                    }
                    WriteKind::Rename { name } => {
                        self.report(format!("Device renamed to {name:?}"), MessageSeverity::Success);
                    }
                }
                self.publish();
            }
            Err(e) => {
                // A dead link also surfaces as a transport disconnect event,
                // which resets the state machine; here we only report.
                warn!("characteristic write failed: {e}");
                self.report(format!("Write failed: {e}"), MessageSeverity::Error);
            }
        }
    }

    async fn apply_conn_event(&mut self, event: ConnEvent) {
        let actions = self.machine.on_event(event);
        self.publish();
        for action in actions {
            self.perform(action).await;
        }
    }

    async fn perform(&mut self, action: ConnAction) {
        match action {
            ConnAction::StartConnect { address } => {
                self.cancel_pending_io();
                let transport = Arc::clone(&self.transport);
                let io = self.io_tx.clone();
                self.pending_connect = Some(tokio::spawn(async move {
                    match transport.connect(&address).await {
                        Ok(()) => {
                            let _ = io.send(ConnEvent::TransportConnected);
                        }
                        Err(e) => {
                            let _ = io.send(ConnEvent::TransportConnectFailed {
                                reason: e.to_string(),
                            });
                        }
                    }
                }));
            }
            ConnAction::ReadDeviceState => {
                let transport = Arc::clone(&self.transport);
                let io = self.io_tx.clone();
                self.pending_read = Some(tokio::spawn(async move {
                    match transport.read_state().await {
                        Ok(bytes) => {
                            let _ = io.send(ConnEvent::StateFrame { bytes });
                        }
                        Err(e) => {
                            let _ = io.send(ConnEvent::StateReadFailed {
                                reason: e.to_string(),
                            });
                        }
                    }
                }));
            }
            ConnAction::StartDisconnect => {
                let transport = Arc::clone(&self.transport);
                let io = self.io_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = transport.disconnect().await {
                        // Tear down locally regardless; the machine must
                        // never hang in Disconnecting on a broken transport.
                        warn!("transport disconnect failed: {e}");
                    }
                    let _ = io.send(ConnEvent::TransportDisconnected);
                });
            }
            ConnAction::ScheduleRetry => {
                // Immediate retry, no extra backoff. Routed through the io
                // queue so a disconnect intent already queued can still win.
                let _ = self.io_tx.send(ConnEvent::RetryTick);
            }
            ConnAction::CancelPendingIo => self.cancel_pending_io(),
            ConnAction::Report { message, severity } => self.report(message, severity),
        }
    }

    fn cancel_pending_io(&mut self) {
        if let Some(handle) = self.pending_connect.take() {
            handle.abort();
        }
        if let Some(handle) = self.pending_read.take() {
            handle.abort();
        }
    }

    fn publish(&self) {
        let state = self.machine.state();
        self.connection_tx.send_if_modified(|current| {
            if *current != state {
                *current = state;
                true
            } else {
                false
            }
        });

        let device_state = self.machine.device_state().cloned();
        self.device_state_tx.send_if_modified(|current| {
            if *current != device_state {
                *current = device_state;
                true
            } else {
                false
            }
        });
    }

    fn report(&self, message: impl Into<String>, severity: MessageSeverity) {
        let _ = self.app_events.send(AppEvent::LogMessage(StatusMessage {
            message: message.into(),
            severity,
        }));
    }
}

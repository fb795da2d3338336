//! End-to-end tests driving the strip control service over a scripted
//! transport: connect/retry/teardown flows, write gating, throttling, and
//! scan de-duplication with the auto-stop window.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use lumistrip::infrastructure::bluetooth::{MAX_CONNECT_RETRIES, SAMPLE_WINDOW, SCAN_WINDOW};
use lumistrip::{
    AppEvent, BleTransport, ConnectionState, MessageSeverity, StripService, TransportError,
    TransportEvent,
};

const ADDR: &str = "AA:BB:CC:DD:EE:FF";
const GOOD_FRAME: [u8; 12] = [
    0x01, 0x00, 0x00, 0xFF, 0x00, 0x00, 0x00, 0x1A, 0xFF, 0x00, 0x80, 0xFF,
];

/// Transport with preprogrammed connect/read outcomes and recorded writes.
/// Outcomes default to success when the script runs dry.
#[derive(Default)]
struct ScriptedTransport {
    connects: Mutex<VecDeque<Result<(), TransportError>>>,
    reads: Mutex<VecDeque<Result<Vec<u8>, TransportError>>>,
    writes: Mutex<Vec<Vec<u8>>>,
    scan_starts: Mutex<usize>,
    scan_stops: Mutex<usize>,
}

impl ScriptedTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push_connect(&self, outcome: Result<(), TransportError>) {
        self.connects.lock().unwrap().push_back(outcome);
    }

    fn push_read(&self, outcome: Result<Vec<u8>, TransportError>) {
        self.reads.lock().unwrap().push_back(outcome);
    }

    fn recorded_writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    fn scan_starts(&self) -> usize {
        *self.scan_starts.lock().unwrap()
    }

    fn scan_stops(&self) -> usize {
        *self.scan_stops.lock().unwrap()
    }
}

#[async_trait]
impl BleTransport for ScriptedTransport {
    async fn start_scan(&self) -> Result<(), TransportError> {
        *self.scan_starts.lock().unwrap() += 1;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        *self.scan_stops.lock().unwrap() += 1;
        Ok(())
    }

    async fn connect(&self, _address: &str) -> Result<(), TransportError> {
        self.connects.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn read_state(&self) -> Result<Vec<u8>, TransportError> {
        self.reads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(GOOD_FRAME.to_vec()))
    }

    async fn write_command(&self, frame: &[u8]) -> Result<(), TransportError> {
        self.writes.lock().unwrap().push(frame.to_vec());
        Ok(())
    }
}

struct Harness {
    service: StripService,
    transport: Arc<ScriptedTransport>,
    transport_tx: mpsc::UnboundedSender<TransportEvent>,
    app_rx: mpsc::UnboundedReceiver<AppEvent>,
}

fn harness() -> Harness {
    let transport = ScriptedTransport::new();
    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let (app_tx, app_rx) = mpsc::unbounded_channel();
    let dyn_transport: Arc<dyn BleTransport> = transport.clone();
    let service = StripService::spawn(dyn_transport, transport_rx, app_tx);
    Harness {
        service,
        transport,
        transport_tx,
        app_rx,
    }
}

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, want: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if *rx.borrow_and_update() == want {
                return;
            }
            rx.changed().await.expect("service stopped unexpectedly");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {want:?}, last seen {:?}", *rx.borrow()));
}

async fn expect_report(
    rx: &mut mpsc::UnboundedReceiver<AppEvent>,
    severity: MessageSeverity,
    needle: &str,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let AppEvent::LogMessage(msg) = rx.recv().await.expect("event channel closed");
            if msg.severity == severity && msg.message.contains(needle) {
                return;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {severity:?} report containing {needle:?}"));
}

#[tokio::test]
async fn connect_loads_state_and_reaches_connected() {
    let h = harness();
    h.transport.push_connect(Ok(()));
    h.transport.push_read(Ok(GOOD_FRAME.to_vec()));

    let mut connection = h.service.observe_connection_state();
    h.service.connect(ADDR);
    wait_for_state(&mut connection, ConnectionState::Connected).await;

    let state = h
        .service
        .observe_device_state()
        .borrow()
        .clone()
        .expect("device state loaded");
    assert!(state.is_on);
    assert_eq!(state.brightness, 0xFF);
    assert_eq!(state.pixel_count, 26);
    assert_eq!(state.red, "FF");
    assert_eq!(state.green, "00");
    assert_eq!(state.blue, "80");
    assert_eq!(state.white_brightness, 255);
}

#[tokio::test]
async fn retries_exhaust_into_invalid_device() {
    let h = harness();
    for _ in 0..=MAX_CONNECT_RETRIES {
        h.transport
            .push_connect(Err(TransportError::Io("peer refused".to_string())));
    }

    let mut connection = h.service.observe_connection_state();
    h.service.connect(ADDR);
    wait_for_state(&mut connection, ConnectionState::InvalidDevice).await;

    assert!(h.service.observe_device_state().borrow().is_none());

    let mut app_rx = h.app_rx;
    expect_report(&mut app_rx, MessageSeverity::Error, "unreachable").await;
}

#[tokio::test]
async fn success_on_a_retry_attempt_connects() {
    let h = harness();
    h.transport
        .push_connect(Err(TransportError::Io("first attempt lost".to_string())));
    h.transport.push_connect(Ok(()));
    h.transport.push_read(Ok(GOOD_FRAME.to_vec()));

    let mut connection = h.service.observe_connection_state();
    h.service.connect(ADDR);
    wait_for_state(&mut connection, ConnectionState::Connected).await;
}

#[tokio::test]
async fn garbled_state_frame_retries_then_recovers() {
    let h = harness();
    h.transport.push_connect(Ok(()));
    h.transport.push_connect(Ok(()));
    h.transport.push_read(Ok(vec![0x01, 0x02, 0x03])); // short frame
    h.transport.push_read(Ok(GOOD_FRAME.to_vec()));

    let mut connection = h.service.observe_connection_state();
    h.service.connect(ADDR);
    wait_for_state(&mut connection, ConnectionState::Connected).await;
}

#[tokio::test]
async fn writes_are_rejected_while_disconnected() {
    let mut h = harness();
    h.service.set_power(true);

    expect_report(&mut h.app_rx, MessageSeverity::Warning, "not connected").await;
    assert!(h.transport.recorded_writes().is_empty());
}

#[tokio::test]
async fn connected_session_writes_protocol_frames() {
    let h = harness();
    let mut connection = h.service.observe_connection_state();
    h.service.connect(ADDR);
    wait_for_state(&mut connection, ConnectionState::Connected).await;

    h.service.set_power(true);
    h.service.set_color("FF0080").unwrap();
    h.service.rename("Strip").unwrap();
    settle().await;

    let writes = h.transport.recorded_writes();
    assert_eq!(writes.len(), 3);
    assert_eq!(writes[0], vec![0x00, 0x00, 0x00, 0xAA]);
    assert_eq!(writes[1], vec![0xFF, 0x00, 0x80, 0x1E]);
    assert_eq!(writes[2], {
        let mut frame = vec![5, 0xBB];
        frame.extend_from_slice(b"Strip");
        frame
    });
}

#[tokio::test]
async fn successful_writes_update_device_state_optimistically() {
    let h = harness();
    let mut connection = h.service.observe_connection_state();
    h.service.connect(ADDR);
    wait_for_state(&mut connection, ConnectionState::Connected).await;

    h.service.set_power(false);
    h.service.set_color("12AB34").unwrap();
    settle().await;

    let state = h.service.observe_device_state().borrow().clone().unwrap();
    assert!(!state.is_on);
    assert_eq!(state.red, "12");
    assert_eq!(state.green, "AB");
    assert_eq!(state.blue, "34");
}

#[tokio::test]
async fn invalid_inputs_fail_synchronously_without_writes() {
    let h = harness();
    let mut connection = h.service.observe_connection_state();
    h.service.connect(ADDR);
    wait_for_state(&mut connection, ConnectionState::Connected).await;

    assert!(h.service.set_color("GGHHII").is_err());
    assert!(h.service.rename("").is_err());
    assert!(h.service.rename("WayTooLongDeviceName").is_err());
    settle().await;

    assert!(h.transport.recorded_writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn brightness_is_conflated_to_the_latest_value() {
    let h = harness();
    let mut connection = h.service.observe_connection_state();
    h.service.connect(ADDR);
    wait_for_state(&mut connection, ConnectionState::Connected).await;
    settle().await;

    h.service.set_brightness(10);
    h.service.set_brightness(20);
    h.service.set_brightness(30);
    tokio::time::advance(SAMPLE_WINDOW).await;
    settle().await;

    let writes = h.transport.recorded_writes();
    assert_eq!(writes, vec![vec![30, 0x00, 0x00, 0x2A]]);

    let state = h.service.observe_device_state().borrow().clone().unwrap();
    assert_eq!(state.brightness, 30);
}

#[tokio::test]
async fn requested_disconnect_tears_the_session_down() {
    let h = harness();
    let mut connection = h.service.observe_connection_state();
    h.service.connect(ADDR);
    wait_for_state(&mut connection, ConnectionState::Connected).await;

    h.service.disconnect();
    wait_for_state(&mut connection, ConnectionState::Disconnected).await;
    assert!(h.service.observe_device_state().borrow().is_none());
}

#[tokio::test]
async fn unsolicited_disconnect_resets_the_session() {
    let h = harness();
    let mut connection = h.service.observe_connection_state();
    h.service.connect(ADDR);
    wait_for_state(&mut connection, ConnectionState::Connected).await;

    h.transport_tx.send(TransportEvent::Disconnected).unwrap();
    wait_for_state(&mut connection, ConnectionState::Disconnected).await;
    assert!(h.service.observe_device_state().borrow().is_none());
}

#[tokio::test]
async fn second_connect_while_active_is_reported() {
    let mut h = harness();
    let mut connection = h.service.observe_connection_state();
    h.service.connect(ADDR);
    wait_for_state(&mut connection, ConnectionState::Connected).await;

    h.service.connect("11:22:33:44:55:66");
    expect_report(&mut h.app_rx, MessageSeverity::Warning, "rejected").await;
    assert_eq!(*connection.borrow(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn scan_deduplicates_and_stops_after_the_window() {
    let h = harness();
    let mut scanning = h.service.observe_scanning();
    h.service.start_scan();
    settle().await;
    assert!(*scanning.borrow_and_update());
    assert_eq!(h.transport.scan_starts(), 1);

    let sighting = |address: &str, name: Option<&str>, connectable| TransportEvent::Discovered {
        address: address.to_string(),
        name: name.map(str::to_string),
        connectable,
    };
    h.transport_tx.send(sighting("AA:BB", Some("Strip"), true)).unwrap();
    h.transport_tx.send(sighting("AA:BB", Some("Other"), true)).unwrap();
    h.transport_tx.send(sighting("EE:FF", Some("Beacon"), false)).unwrap();
    h.transport_tx.send(sighting("CC:DD", None, true)).unwrap();
    settle().await;

    let devices = h.service.observe_scan_results().borrow().clone();
    assert_eq!(devices.len(), 2);
    assert_eq!(devices[0].address, "AA:BB");
    assert_eq!(devices[0].name.as_deref(), Some("Strip"));
    assert_eq!(devices[1].address, "CC:DD");

    // The fixed window elapses: the scan stops itself exactly once.
    tokio::time::advance(SCAN_WINDOW).await;
    settle().await;
    assert!(!*scanning.borrow_and_update());
    assert_eq!(h.transport.scan_stops(), 1);

    // Late sightings are dropped; results from the finished round remain
    // visible for selection.
    h.transport_tx.send(sighting("99:88", None, true)).unwrap();
    settle().await;
    assert_eq!(h.service.observe_scan_results().borrow().len(), 2);
}

//! BLE Scan Session
//!
//! Owns one discovery round: starting and stopping the radio scan,
//! de-duplicating sightings by address, and the fixed auto-stop window.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::models::{AppEvent, Device, MessageSeverity, StatusMessage};
use crate::infrastructure::bluetooth::transport::BleTransport;

/// Fixed discovery window; the scan stops itself after this long.
pub const SCAN_WINDOW: Duration = Duration::from_secs(30);

/// Discovery state owner: `Idle` or `Scanning`, one result set per round.
pub struct ScanSession {
    transport: Arc<dyn BleTransport>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    results_tx: watch::Sender<Vec<Device>>,
    scanning_tx: watch::Sender<bool>,
    seen: HashSet<String>,
    deadline: Option<Instant>,
}

impl ScanSession {
    pub fn new(
        transport: Arc<dyn BleTransport>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let (results_tx, _) = watch::channel(Vec::new());
        let (scanning_tx, _) = watch::channel(false);
        Self {
            transport,
            event_sender,
            results_tx,
            scanning_tx,
            seen: HashSet::new(),
            deadline: None,
        }
    }

    pub fn observe_results(&self) -> watch::Receiver<Vec<Device>> {
        self.results_tx.subscribe()
    }

    pub fn observe_scanning(&self) -> watch::Receiver<bool> {
        self.scanning_tx.subscribe()
    }

    pub fn is_scanning(&self) -> bool {
        *self.scanning_tx.borrow()
    }

    /// The auto-stop deadline while scanning.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Start a discovery round, implicitly stopping any previous one.
    ///
    /// If the transport refuses (adapter missing, radio off) the session
    /// stays `Idle` and the failure is reported as a one-shot event.
    pub async fn start(&mut self) {
        if self.is_scanning() {
            self.stop().await;
        }

        self.seen.clear();
        self.results_tx.send_replace(Vec::new());

        match self.transport.start_scan().await {
            Ok(()) => {
                info!("BLE scan started, window {:?}", SCAN_WINDOW);
                self.deadline = Some(Instant::now() + SCAN_WINDOW);
                self.scanning_tx.send_replace(true);
                self.log("Scanning for LED controllers...", MessageSeverity::Info);
            }
            Err(e) => {
                warn!("BLE scan could not start: {e}");
                self.log(format!("Scan unavailable: {e}"), MessageSeverity::Error);
            }
        }
    }

    /// Stop scanning. Idempotent; a no-op while `Idle`.
    ///
    /// The session always returns to `Idle`, even when the transport stop
    /// call fails; that failure is surfaced as a side-channel event.
    pub async fn stop(&mut self) {
        if !self.is_scanning() {
            return;
        }

        self.deadline = None;
        self.scanning_tx.send_replace(false);

        match self.transport.stop_scan().await {
            Ok(()) => {
                info!("BLE scan stopped");
                self.log("Scan stopped.", MessageSeverity::Info);
            }
            Err(e) => {
                warn!("transport scan stop failed: {e}");
                self.log(format!("Scan stop failed: {e}"), MessageSeverity::Warning);
            }
        }
    }

    /// Apply one transport sighting.
    ///
    /// Dropped while `Idle` (results are armed by `start`, not by the
    /// radio), dropped for non-connectable advertisers, de-duplicated by
    /// address with the first-seen name winning.
    pub fn on_sighting(&mut self, address: String, name: Option<String>, connectable: bool) {
        if !self.is_scanning() {
            return;
        }
        if !connectable {
            debug!(%address, "ignoring non-connectable advertiser");
            return;
        }
        if !self.seen.insert(address.clone()) {
            return;
        }

        info!(%address, ?name, "device discovered");
        self.results_tx
            .send_modify(|devices| devices.push(Device { name, address }));
    }

    fn log(&self, message: impl Into<String>, severity: MessageSeverity) {
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage {
            message: message.into(),
            severity,
        }));
    }
}

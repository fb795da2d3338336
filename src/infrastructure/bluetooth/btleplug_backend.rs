//! Transport adapter backed by `btleplug`.
//!
//! Bridges the cross-platform BLE central into the [`BleTransport`]
//! contract: request/response calls map onto adapter/peripheral operations,
//! and the central's event stream is forwarded as [`TransportEvent`]s.

use std::sync::{Arc, Mutex};

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::infrastructure::bluetooth::protocol::{CHARACTERISTIC_UUID, SERVICE_UUID};
use crate::infrastructure::bluetooth::transport::{BleTransport, TransportError, TransportEvent};

struct ActiveSession {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

pub struct BtleplugTransport {
    adapter: Adapter,
    session: Mutex<Option<ActiveSession>>,
    /// Shared with the event forwarder so unsolicited drops can be matched
    /// against the active session.
    current_id: Arc<Mutex<Option<PeripheralId>>>,
}

impl BtleplugTransport {
    /// Open the first system adapter and start forwarding central events
    /// into `events`.
    pub async fn new(
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self, TransportError> {
        let manager = Manager::new().await.map_err(io_err)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(io_err)?
            .into_iter()
            .next()
            .ok_or(TransportError::AdapterUnavailable)?;

        let current_id = Arc::new(Mutex::new(None::<PeripheralId>));
        let mut stream = adapter.events().await.map_err(io_err)?;

        let forward_adapter = adapter.clone();
        let forward_current = Arc::clone(&current_id);
        tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                match event {
                    CentralEvent::DeviceDiscovered(id) => {
                        let Ok(peripheral) = forward_adapter.peripheral(&id).await else {
                            continue;
                        };
                        let name = match peripheral.properties().await {
                            Ok(Some(props)) => props.local_name,
                            _ => None,
                        };
                        let _ = events.send(TransportEvent::Discovered {
                            address: peripheral.address().to_string(),
                            name,
                            // btleplug does not surface the connectable
                            // flag; advertisers reaching us here are
                            // treated as connectable.
                            connectable: true,
                        });
                    }
                    CentralEvent::DeviceDisconnected(id) => {
                        let matches = forward_current
                            .lock()
                            .map(|current| current.as_ref() == Some(&id))
                            .unwrap_or(false);
                        if matches {
                            debug!(?id, "active peripheral dropped the link");
                            let _ = events.send(TransportEvent::Disconnected);
                        }
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            adapter,
            session: Mutex::new(None),
            current_id,
        })
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral, TransportError> {
        let peripherals = self.adapter.peripherals().await.map_err(io_err)?;
        for peripheral in peripherals {
            if peripheral.address().to_string().eq_ignore_ascii_case(address)
                || peripheral.id().to_string() == address
            {
                return Ok(peripheral);
            }
        }
        Err(TransportError::PeripheralNotFound(address.to_string()))
    }

    fn active_session(&self) -> Result<(Peripheral, Characteristic), TransportError> {
        let guard = self
            .session
            .lock()
            .map_err(|_| TransportError::Io("session lock poisoned".to_string()))?;
        match guard.as_ref() {
            Some(session) => Ok((session.peripheral.clone(), session.characteristic.clone())),
            None => Err(TransportError::NotConnected),
        }
    }

    fn set_session(&self, session: Option<ActiveSession>) {
        let id = session.as_ref().map(|s| s.peripheral.id());
        if let Ok(mut current) = self.current_id.lock() {
            *current = id;
        }
        if let Ok(mut guard) = self.session.lock() {
            *guard = session;
        }
    }
}

#[async_trait::async_trait]
impl BleTransport for BtleplugTransport {
    async fn start_scan(&self) -> Result<(), TransportError> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(io_err)
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        self.adapter.stop_scan().await.map_err(io_err)
    }

    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let peripheral = self.find_peripheral(address).await?;

        if !peripheral.is_connected().await.map_err(io_err)? {
            peripheral.connect().await.map_err(io_err)?;
        }
        peripheral.discover_services().await.map_err(io_err)?;

        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == CHARACTERISTIC_UUID && c.service_uuid == SERVICE_UUID)
            .ok_or(TransportError::CharacteristicMissing)?;

        info!(%address, "GATT session established");
        self.set_session(Some(ActiveSession {
            peripheral,
            characteristic,
        }));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let (peripheral, _) = match self.active_session() {
            Ok(session) => session,
            // Nothing to tear down; confirm trivially.
            Err(TransportError::NotConnected) => return Ok(()),
            Err(e) => return Err(e),
        };

        // Clear first so the forwarder does not also report this teardown
        // as an unsolicited drop.
        self.set_session(None);

        if let Err(e) = peripheral.disconnect().await {
            warn!("peripheral disconnect failed: {e}");
            return Err(io_err(e));
        }
        Ok(())
    }

    async fn read_state(&self) -> Result<Vec<u8>, TransportError> {
        let (peripheral, characteristic) = self.active_session()?;
        peripheral.read(&characteristic).await.map_err(io_err)
    }

    async fn write_command(&self, frame: &[u8]) -> Result<(), TransportError> {
        let (peripheral, characteristic) = self.active_session()?;
        peripheral
            .write(&characteristic, frame, WriteType::WithoutResponse)
            .await
            .map_err(io_err)
    }
}

fn io_err(e: btleplug::Error) -> TransportError {
    TransportError::Io(e.to_string())
}

//! `btleplug` backed GATT driver
//!
//! Every request is spawned onto the runtime and reports back through the
//! event channel, so the link never waits on the Bluetooth stack.
//!
//! # Requirements
//!
//! On Linux, you'll also need:
//! ```bash
//! apt install libdbus-1-dev
//! ```

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::registry::{ConnectionSlot, DiscoveryCache, MAX_DISCOVERED};
use super::{DeviceId, GattDriver, GattEvent, GattService};
use crate::error::{RelayError, Result};

struct Shared {
    scanning: AtomicBool,
    discovered: DiscoveryCache<Peripheral>,
    connection: ConnectionSlot<Peripheral>,
    notifications: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            scanning: AtomicBool::new(false),
            discovered: DiscoveryCache::new(MAX_DISCOVERED),
            connection: ConnectionSlot::new(),
            notifications: Mutex::new(None),
        }
    }

    fn current(&self) -> Option<Peripheral> {
        self.connection.current()
    }

    fn stop_notifications(&self) {
        if let Some(task) = self.notifications.lock().take() {
            task.abort();
        }
    }
}

/// GATT driver on the host's first Bluetooth adapter
pub struct BtleplugDriver {
    adapter: Adapter,
    events_tx: mpsc::UnboundedSender<GattEvent>,
    shared: Arc<Shared>,
    central_task: JoinHandle<()>,
}

impl BtleplugDriver {
    /// Open the first adapter and start listening for central events
    pub async fn new(events_tx: mpsc::UnboundedSender<GattEvent>) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(RelayError::NoAdapter)?;

        if let Ok(info) = adapter.adapter_info().await {
            info!(adapter = %info, "Using Bluetooth adapter");
        }

        let shared = Arc::new(Shared::new());
        let events = adapter.events().await?;
        let central_task = tokio::spawn(central_loop(
            adapter.clone(),
            events,
            shared.clone(),
            events_tx.clone(),
        ));

        Ok(Self {
            adapter,
            events_tx,
            shared,
            central_task,
        })
    }

    fn post(&self, event: GattEvent) {
        let _ = self.events_tx.send(event);
    }
}

async fn central_loop(
    adapter: Adapter,
    mut events: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
    shared: Arc<Shared>,
    events_tx: mpsc::UnboundedSender<GattEvent>,
) {
    while let Some(event) = events.next().await {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                if !shared.scanning.load(Ordering::Acquire) {
                    continue;
                }
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let name = peripheral
                    .properties()
                    .await
                    .ok()
                    .flatten()
                    .and_then(|props| props.local_name);
                let address = peripheral.address().to_string();
                trace!(%address, ?name, "Advertisement");

                shared.discovered.insert(address.clone(), peripheral);
                let _ = events_tx.send(GattEvent::DeviceFound {
                    device: DeviceId(address),
                    name,
                });
            }
            CentralEvent::DeviceDisconnected(id) => {
                if shared.connection.take_if(|p| p.id() == id).is_some() {
                    shared.stop_notifications();
                    let _ = events_tx.send(GattEvent::Disconnected);
                }
            }
            _ => {}
        }
    }
    debug!("Central event stream ended");
}

fn find_characteristic(peripheral: &Peripheral, uuid: Uuid) -> Option<Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == uuid)
}

impl GattDriver for BtleplugDriver {
    fn start_scan(&mut self) {
        self.shared.discovered.clear();
        self.shared.scanning.store(true, Ordering::Release);
        let adapter = self.adapter.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = adapter.start_scan(ScanFilter::default()).await {
                let _ = tx.send(GattEvent::ScanFailed {
                    reason: e.to_string(),
                });
            }
        });
    }

    fn stop_scan(&mut self) {
        self.shared.scanning.store(false, Ordering::Release);
        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                debug!(error = %e, "Failed to stop scan");
            }
        });
    }

    fn connect(&mut self, device: &DeviceId) {
        let Some(peripheral) = self.shared.discovered.take(&device.0) else {
            self.post(GattEvent::ConnectFailed {
                reason: format!("unknown device {device}"),
            });
            return;
        };
        let shared = self.shared.clone();
        let tx = self.events_tx.clone();
        let ticket = shared.connection.begin();
        tokio::spawn(async move {
            match peripheral.connect().await {
                Ok(()) => match shared.connection.claim(ticket, peripheral) {
                    Ok(()) => {
                        let _ = tx.send(GattEvent::Connected);
                    }
                    Err(abandoned) => {
                        debug!("Link released while connecting, dropping connection");
                        if let Err(e) = abandoned.disconnect().await {
                            warn!(error = %e, "Failed to disconnect");
                        }
                    }
                },
                Err(e) => {
                    let _ = tx.send(GattEvent::ConnectFailed {
                        reason: e.to_string(),
                    });
                }
            }
        });
    }

    fn request_high_priority(&mut self) {
        debug!("Connection priority is managed by the host stack");
    }

    fn discover_services(&mut self) {
        let Some(peripheral) = self.shared.current() else {
            self.post(GattEvent::DiscoveryFailed {
                reason: "not connected".to_string(),
            });
            return;
        };
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let event = match peripheral.discover_services().await {
                Ok(()) => GattEvent::ServicesDiscovered {
                    services: peripheral
                        .services()
                        .into_iter()
                        .map(|service| GattService {
                            uuid: service.uuid,
                            characteristics: service
                                .characteristics
                                .into_iter()
                                .map(|c| c.uuid)
                                .collect(),
                        })
                        .collect(),
                },
                Err(e) => GattEvent::DiscoveryFailed {
                    reason: e.to_string(),
                },
            };
            let _ = tx.send(event);
        });
    }

    fn enable_notifications(&mut self, characteristic: Uuid) {
        let Some(peripheral) = self.shared.current() else {
            return;
        };
        let tx = self.events_tx.clone();
        self.shared.stop_notifications();
        let task = tokio::spawn(async move {
            let Some(target) = find_characteristic(&peripheral, characteristic) else {
                let _ = tx.send(GattEvent::DiscoveryFailed {
                    reason: format!("characteristic {characteristic} not found"),
                });
                return;
            };
            let mut stream = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = tx.send(GattEvent::DiscoveryFailed {
                        reason: e.to_string(),
                    });
                    return;
                }
            };
            if let Err(e) = peripheral.subscribe(&target).await {
                let _ = tx.send(GattEvent::DiscoveryFailed {
                    reason: e.to_string(),
                });
                return;
            }
            debug!(%characteristic, "Notifications enabled");

            while let Some(notification) = stream.next().await {
                let _ = tx.send(GattEvent::Notification {
                    characteristic: notification.uuid,
                    value: Bytes::from(notification.value),
                });
            }
        });
        *self.shared.notifications.lock() = Some(task);
    }

    fn write(&mut self, characteristic: Uuid, value: Bytes) {
        let tx = self.events_tx.clone();
        let Some(peripheral) = self.shared.current() else {
            self.post(GattEvent::WriteComplete {
                characteristic,
                result: Err("not connected".to_string()),
            });
            return;
        };
        tokio::spawn(async move {
            let result = match find_characteristic(&peripheral, characteristic) {
                Some(target) => peripheral
                    .write(&target, &value, WriteType::WithResponse)
                    .await
                    .map_err(|e| e.to_string()),
                None => Err(format!("characteristic {characteristic} not found")),
            };
            let _ = tx.send(GattEvent::WriteComplete {
                characteristic,
                result,
            });
        });
    }

    fn disconnect(&mut self) {
        self.shared.stop_notifications();
        let Some(peripheral) = self.shared.connection.release() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                warn!(error = %e, "Failed to disconnect");
            }
        });
    }

    fn name(&self) -> &str {
        "btleplug"
    }
}

impl Drop for BtleplugDriver {
    fn drop(&mut self) {
        self.central_task.abort();
        self.shared.stop_notifications();
    }
}

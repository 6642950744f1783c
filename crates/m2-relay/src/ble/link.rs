//! BLE link state machine

use bytes::Bytes;
use m2_protocol::gatt::{
    M2_COMMAND_CHARACTERISTIC, M2_CONFIG_CHARACTERISTIC, M2_MESSAGE_CHARACTERISTIC,
    M2_RELAY_CHARACTERISTIC, M2_SERVICE, RELAY_STATUS_CLOSED, RELAY_STATUS_OPEN,
    SERIAL_CHARACTERISTIC, SERIAL_SERVICE,
};
use m2_protocol::{FrameReassembler, Message};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::queue::{WriteKind, WriteQueue, WriteTarget};
use super::{BleState, DeviceId, GattDriver, GattEvent, GattService};
use crate::config::{BleConfig, BleProfile};
use crate::error::{RelayError, Result};

/// Characteristics resolved on the connected device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicSet {
    /// Notifying characteristic carrying frames
    pub message: Uuid,
    /// Command write target
    pub command: Uuid,
    /// Config write target
    pub config: Uuid,
    /// Relay status write target, absent on the serial bridge
    pub relay_status: Option<Uuid>,
}

impl CharacteristicSet {
    /// Pick the profile's characteristics out of discovered services
    pub fn resolve(profile: BleProfile, services: &[GattService]) -> Result<Self> {
        let service_uuid = match profile {
            BleProfile::Characteristic => M2_SERVICE,
            BleProfile::Serial => SERIAL_SERVICE,
        };
        let service = services
            .iter()
            .find(|s| s.uuid == service_uuid)
            .ok_or_else(|| RelayError::Transport(format!("service {service_uuid} not found")))?;

        let require = |uuid: Uuid| -> Result<Uuid> {
            if service.characteristics.contains(&uuid) {
                Ok(uuid)
            } else {
                Err(RelayError::Transport(format!(
                    "characteristic {uuid} not found"
                )))
            }
        };

        match profile {
            BleProfile::Characteristic => Ok(Self {
                message: require(M2_MESSAGE_CHARACTERISTIC)?,
                command: require(M2_COMMAND_CHARACTERISTIC)?,
                config: require(M2_CONFIG_CHARACTERISTIC)?,
                relay_status: Some(require(M2_RELAY_CHARACTERISTIC)?),
            }),
            BleProfile::Serial => {
                let serial = require(SERIAL_CHARACTERISTIC)?;
                Ok(Self {
                    message: serial,
                    command: serial,
                    config: serial,
                    relay_status: None,
                })
            }
        }
    }

    fn target(&self, target: WriteTarget) -> Option<Uuid> {
        match target {
            WriteTarget::RelayStatus => self.relay_status,
            WriteTarget::Config => Some(self.config),
            WriteTarget::Command => Some(self.command),
        }
    }
}

/// A frame received from the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Frame bytes exactly as received
    pub raw: Bytes,
    /// Decoded message (characteristic profile only)
    pub message: Option<Message>,
}

/// What the link reports to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleNotice {
    /// Characteristics resolved; writes are accepted
    Ready,
    /// A ready link was lost
    Disconnected,
    /// Frame received
    Frame(InboundFrame),
    /// Bytes discarded because they could not be framed
    Malformed {
        /// Number of bytes discarded
        dropped: usize,
    },
}

/// Connection to one M2 device
pub struct BleLink<D: GattDriver> {
    driver: D,
    config: BleConfig,
    state: BleState,
    device: Option<DeviceId>,
    characteristics: Option<CharacteristicSet>,
    writes: WriteQueue,
    reassembler: FrameReassembler,
    stopped: bool,
}

impl<D: GattDriver> BleLink<D> {
    /// Create an idle link
    pub fn new(driver: D, config: BleConfig) -> Self {
        Self {
            driver,
            config,
            state: BleState::Idle,
            device: None,
            characteristics: None,
            writes: WriteQueue::new(),
            reassembler: FrameReassembler::new(),
            stopped: true,
        }
    }

    /// Current connection state
    pub fn state(&self) -> BleState {
        self.state
    }

    /// Whether writes are accepted
    pub fn is_ready(&self) -> bool {
        self.state == BleState::Ready
    }

    /// The device currently connected or being connected
    pub fn device(&self) -> Option<&DeviceId> {
        self.device.as_ref()
    }

    /// Resolved characteristics while connected
    pub fn characteristics(&self) -> Option<&CharacteristicSet> {
        self.characteristics.as_ref()
    }

    /// Writes waiting for the link
    pub fn pending_writes(&self) -> usize {
        self.writes.pending()
    }

    /// Access the driver
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Begin scanning for the configured device
    pub fn start(&mut self) {
        self.stopped = false;
        if matches!(self.state, BleState::Idle | BleState::Disconnected) {
            self.scan();
        }
    }

    /// Stop scanning, disconnect and discard queued writes
    ///
    /// Returns `true` if the link was ready.
    pub fn stop(&mut self) -> bool {
        self.stopped = true;
        let was_ready = self.is_ready();
        match self.state {
            BleState::Scanning => self.driver.stop_scan(),
            BleState::Connecting | BleState::DiscoveringServices | BleState::Ready => {
                self.driver.disconnect()
            }
            BleState::Idle | BleState::Disconnected => {}
        }
        self.teardown();
        self.state = BleState::Idle;
        info!("BLE link stopped");
        was_ready
    }

    /// Submit a config or command write
    pub fn write(&mut self, kind: WriteKind, payload: Bytes) -> Result<()> {
        if !self.is_ready() {
            return Err(RelayError::NotConnected);
        }
        trace!(?kind, len = payload.len(), "Queueing write");
        self.writes.push(kind, payload);
        self.pump();
        Ok(())
    }

    /// Tell the device whether the cloud relay is up
    ///
    /// Ignored when not ready or when the profile has no relay status
    /// characteristic.
    pub fn set_relay_status(&mut self, open: bool) {
        let supported = self
            .characteristics
            .map(|set| set.relay_status.is_some())
            .unwrap_or(false);
        if !self.is_ready() || !supported {
            return;
        }
        let value = if open {
            RELAY_STATUS_OPEN
        } else {
            RELAY_STATUS_CLOSED
        };
        debug!(value, "Setting relay status");
        self.writes.set_relay_status(value);
        self.pump();
    }

    /// Advance the state machine with a driver event
    pub fn handle_event(&mut self, event: GattEvent) -> Vec<BleNotice> {
        let mut notices = Vec::new();

        match event {
            GattEvent::DeviceFound { device, name } => {
                if self.state != BleState::Scanning {
                    return notices;
                }
                if !self.config.matches(name.as_deref(), &device.0) {
                    trace!(%device, ?name, "Ignoring device");
                    return notices;
                }
                info!(%device, ?name, "Found M2 device, connecting");
                self.driver.stop_scan();
                self.driver.connect(&device);
                self.device = Some(device);
                self.state = BleState::Connecting;
            }
            GattEvent::ScanFailed { reason } => {
                warn!(driver = self.driver.name(), %reason, "BLE scan failed");
            }
            GattEvent::Connected => {
                if self.state != BleState::Connecting {
                    return notices;
                }
                debug!(device = ?self.device, "Connected, discovering services");
                self.state = BleState::DiscoveringServices;
                self.driver.request_high_priority();
                self.driver.discover_services();
            }
            GattEvent::ConnectFailed { reason } => {
                if self.state != BleState::Connecting {
                    return notices;
                }
                warn!(device = ?self.device, %reason, "Connection failed");
                self.link_lost(&mut notices);
            }
            GattEvent::ServicesDiscovered { services } => {
                if self.state != BleState::DiscoveringServices {
                    return notices;
                }
                match CharacteristicSet::resolve(self.config.profile, &services) {
                    Ok(set) => {
                        info!(
                            device = ?self.device,
                            profile = %self.config.profile,
                            "M2 ready"
                        );
                        self.driver.enable_notifications(set.message);
                        self.characteristics = Some(set);
                        self.state = BleState::Ready;
                        notices.push(BleNotice::Ready);
                    }
                    Err(e) => {
                        warn!(error = %e, "Device is missing the M2 profile, disconnecting");
                        self.driver.disconnect();
                        self.link_lost(&mut notices);
                    }
                }
            }
            GattEvent::DiscoveryFailed { reason } => {
                if !matches!(
                    self.state,
                    BleState::DiscoveringServices | BleState::Ready
                ) {
                    return notices;
                }
                warn!(%reason, "Service discovery failed, disconnecting");
                self.driver.disconnect();
                self.link_lost(&mut notices);
            }
            GattEvent::Notification {
                characteristic,
                value,
            } => self.on_notification(characteristic, value, &mut notices),
            GattEvent::WriteComplete {
                characteristic,
                result,
            } => self.on_write_complete(characteristic, result),
            GattEvent::Disconnected => {
                if matches!(self.state, BleState::Idle | BleState::Scanning) {
                    return notices;
                }
                info!(device = ?self.device, "M2 disconnected");
                self.link_lost(&mut notices);
            }
        }

        notices
    }

    fn on_notification(
        &mut self,
        characteristic: Uuid,
        value: Bytes,
        notices: &mut Vec<BleNotice>,
    ) {
        let Some(set) = self.characteristics else {
            return;
        };
        if self.state != BleState::Ready || characteristic != set.message || value.is_empty() {
            return;
        }

        match self.config.profile {
            BleProfile::Characteristic => match Message::decode(&value) {
                Ok(message) => notices.push(BleNotice::Frame(InboundFrame {
                    raw: value,
                    message: Some(message),
                })),
                Err(e) => {
                    warn!(error = %e, len = value.len(), "Dropping malformed notification");
                    notices.push(BleNotice::Malformed {
                        dropped: value.len(),
                    });
                }
            },
            BleProfile::Serial => {
                let output = self.reassembler.push(&value);
                if let Some(resync) = output.resync {
                    warn!(
                        declared_len = resync.declared_len,
                        dropped = resync.dropped,
                        "Serial stream out of sync, discarding buffer"
                    );
                    notices.push(BleNotice::Malformed {
                        dropped: resync.dropped,
                    });
                }
                notices.extend(output.frames.into_iter().map(|raw| {
                    BleNotice::Frame(InboundFrame { raw, message: None })
                }));
            }
        }
    }

    fn on_write_complete(&mut self, characteristic: Uuid, result: std::result::Result<(), String>) {
        if !self.writes.is_busy() {
            trace!(%characteristic, "Ignoring stale write completion");
            return;
        }
        match result {
            Ok(()) => {
                self.writes.complete();
            }
            Err(reason) => {
                warn!(%characteristic, %reason, "Write failed");
                if let Some(dropped) = self.writes.fail() {
                    warn!(
                        target = ?dropped.target,
                        attempts = dropped.attempts,
                        "Dropping write after repeated failures"
                    );
                }
            }
        }
        self.pump();
    }

    /// Issue the next queued write if none is in flight
    fn pump(&mut self) {
        let Some(set) = self.characteristics else {
            return;
        };
        while let Some(write) = self.writes.next_write() {
            match set.target(write.target) {
                Some(uuid) => {
                    trace!(target = ?write.target, len = write.payload.len(), "Writing");
                    self.driver.write(uuid, write.payload);
                    return;
                }
                None => {
                    self.writes.complete();
                }
            }
        }
    }

    fn link_lost(&mut self, notices: &mut Vec<BleNotice>) {
        let was_ready = self.is_ready();
        self.teardown();
        self.state = BleState::Disconnected;
        if was_ready {
            notices.push(BleNotice::Disconnected);
        }
        if !self.stopped {
            self.scan();
        }
    }

    fn teardown(&mut self) {
        self.device = None;
        self.characteristics = None;
        self.writes.clear();
        self.reassembler.clear();
    }

    fn scan(&mut self) {
        debug!(
            name = %self.config.device_name,
            address = ?self.config.device_address,
            "Scanning for M2"
        );
        self.state = BleState::Scanning;
        self.driver.start_scan();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{m2_services, serial_services, GattCall, MockGattDriver};
    use m2_protocol::Command;

    fn link(profile: BleProfile) -> BleLink<MockGattDriver> {
        let config = BleConfig {
            profile,
            ..BleConfig::default()
        };
        BleLink::new(MockGattDriver::new(), config)
    }

    fn found(name: &str) -> GattEvent {
        GattEvent::DeviceFound {
            device: DeviceId("AA:BB:CC:DD:EE:FF".to_string()),
            name: Some(name.to_string()),
        }
    }

    fn ready_link(profile: BleProfile) -> BleLink<MockGattDriver> {
        let mut link = link(profile);
        let services = match profile {
            BleProfile::Characteristic => m2_services(),
            BleProfile::Serial => serial_services(),
        };
        link.start();
        link.handle_event(found("Onyx M2"));
        link.handle_event(GattEvent::Connected);
        let notices = link.handle_event(GattEvent::ServicesDiscovered { services });
        assert_eq!(notices, vec![BleNotice::Ready]);
        link.driver().take_calls();
        link
    }

    fn write_ok(characteristic: Uuid) -> GattEvent {
        GattEvent::WriteComplete {
            characteristic,
            result: Ok(()),
        }
    }

    #[test]
    fn test_connection_sequence() {
        let mut link = link(BleProfile::Characteristic);
        link.start();
        assert_eq!(link.state(), BleState::Scanning);

        link.handle_event(found("Something else"));
        assert_eq!(link.state(), BleState::Scanning);

        link.handle_event(found("Onyx M2"));
        assert_eq!(link.state(), BleState::Connecting);

        link.handle_event(GattEvent::Connected);
        assert_eq!(link.state(), BleState::DiscoveringServices);

        let notices = link.handle_event(GattEvent::ServicesDiscovered {
            services: m2_services(),
        });
        assert_eq!(notices, vec![BleNotice::Ready]);
        assert!(link.is_ready());

        assert_eq!(
            link.driver().take_calls(),
            vec![
                GattCall::StartScan,
                GattCall::StopScan,
                GattCall::Connect(DeviceId("AA:BB:CC:DD:EE:FF".to_string())),
                GattCall::RequestHighPriority,
                GattCall::DiscoverServices,
                GattCall::EnableNotifications(M2_MESSAGE_CHARACTERISTIC),
            ]
        );
    }

    #[test]
    fn test_write_requires_ready() {
        let mut link = link(BleProfile::Characteristic);
        link.start();
        let result = link.write(WriteKind::Command, Bytes::from_static(&[0x05]));
        assert!(matches!(result, Err(RelayError::NotConnected)));
    }

    #[test]
    fn test_missing_service_rescans() {
        let mut link = link(BleProfile::Characteristic);
        link.start();
        link.handle_event(found("Onyx M2"));
        link.handle_event(GattEvent::Connected);
        link.driver().take_calls();

        let notices = link.handle_event(GattEvent::ServicesDiscovered {
            services: serial_services(),
        });
        assert!(notices.is_empty());
        assert_eq!(link.state(), BleState::Scanning);
        assert_eq!(
            link.driver().take_calls(),
            vec![GattCall::Disconnect, GattCall::StartScan]
        );
    }

    #[test]
    fn test_missing_characteristic_rejected() {
        let mut services = m2_services();
        services[0]
            .characteristics
            .retain(|c| *c != M2_COMMAND_CHARACTERISTIC);
        assert!(CharacteristicSet::resolve(BleProfile::Characteristic, &services).is_err());
    }

    #[test]
    fn test_writes_serialized_in_priority_order() {
        let mut link = ready_link(BleProfile::Characteristic);

        link.write(WriteKind::Command, Bytes::from_static(b"c1"))
            .unwrap();
        link.write(WriteKind::Command, Bytes::from_static(b"c2"))
            .unwrap();
        link.write(WriteKind::Config, Bytes::from_static(b"SH=host"))
            .unwrap();
        assert_eq!(link.driver().writes().len(), 1);

        link.handle_event(write_ok(M2_COMMAND_CHARACTERISTIC));
        link.handle_event(write_ok(M2_CONFIG_CHARACTERISTIC));
        link.handle_event(write_ok(M2_COMMAND_CHARACTERISTIC));

        assert_eq!(
            link.driver().writes(),
            vec![
                (M2_COMMAND_CHARACTERISTIC, Bytes::from_static(b"c1")),
                (M2_CONFIG_CHARACTERISTIC, Bytes::from_static(b"SH=host")),
                (M2_COMMAND_CHARACTERISTIC, Bytes::from_static(b"c2")),
            ]
        );
    }

    #[test]
    fn test_failed_write_retried_then_dropped() {
        let mut link = ready_link(BleProfile::Characteristic);
        link.write(WriteKind::Command, Bytes::from_static(b"c1"))
            .unwrap();

        for _ in 0..3 {
            link.handle_event(GattEvent::WriteComplete {
                characteristic: M2_COMMAND_CHARACTERISTIC,
                result: Err("busy".to_string()),
            });
        }
        assert_eq!(link.driver().writes().len(), 3);
        assert_eq!(link.pending_writes(), 0);

        link.write(WriteKind::Command, Bytes::from_static(b"c2"))
            .unwrap();
        assert_eq!(link.driver().writes().len(), 4);
    }

    #[test]
    fn test_relay_status_written_first() {
        let mut link = ready_link(BleProfile::Characteristic);
        link.write(WriteKind::Command, Bytes::from_static(b"c1"))
            .unwrap();
        link.write(WriteKind::Config, Bytes::from_static(b"RESET"))
            .unwrap();
        link.set_relay_status(true);
        link.set_relay_status(false);

        link.handle_event(write_ok(M2_COMMAND_CHARACTERISTIC));
        link.handle_event(write_ok(M2_RELAY_CHARACTERISTIC));

        let writes = link.driver().writes();
        assert_eq!(writes[1], (M2_RELAY_CHARACTERISTIC, Bytes::from_static(&[0])));
        assert_eq!(writes[2], (M2_CONFIG_CHARACTERISTIC, Bytes::from_static(b"RESET")));
    }

    #[test]
    fn test_disconnect_clears_queues_and_rescans() {
        let mut link = ready_link(BleProfile::Characteristic);
        link.write(WriteKind::Command, Bytes::from_static(b"c1"))
            .unwrap();
        link.write(WriteKind::Command, Bytes::from_static(b"c2"))
            .unwrap();

        let notices = link.handle_event(GattEvent::Disconnected);
        assert_eq!(notices, vec![BleNotice::Disconnected]);
        assert_eq!(link.state(), BleState::Scanning);
        assert_eq!(link.pending_writes(), 0);
        assert!(link.characteristics().is_none());

        // late completion of the write that was in flight
        link.handle_event(write_ok(M2_COMMAND_CHARACTERISTIC));
        assert_eq!(link.driver().writes().len(), 1);
    }

    #[test]
    fn test_disconnect_before_ready_is_silent() {
        let mut link = link(BleProfile::Characteristic);
        link.start();
        link.handle_event(found("Onyx M2"));
        let notices = link.handle_event(GattEvent::ConnectFailed {
            reason: "timeout".to_string(),
        });
        assert!(notices.is_empty());
        assert_eq!(link.state(), BleState::Scanning);
    }

    #[test]
    fn test_message_notifications_decoded() {
        let mut link = ready_link(BleProfile::Characteristic);
        let raw = Bytes::from_static(&[1, 0, 0, 0, 2, 0x34, 0x12, 2, 0xAA, 0xBB]);

        let notices = link.handle_event(GattEvent::Notification {
            characteristic: M2_MESSAGE_CHARACTERISTIC,
            value: raw.clone(),
        });
        let expected = Message::new(1, 2, 0x1234, vec![0xAA, 0xBB]).unwrap();
        assert_eq!(
            notices,
            vec![BleNotice::Frame(InboundFrame {
                raw,
                message: Some(expected),
            })]
        );
    }

    #[test]
    fn test_irrelevant_notifications_ignored() {
        let mut link = ready_link(BleProfile::Characteristic);

        let empty = link.handle_event(GattEvent::Notification {
            characteristic: M2_MESSAGE_CHARACTERISTIC,
            value: Bytes::new(),
        });
        let other = link.handle_event(GattEvent::Notification {
            characteristic: M2_CONFIG_CHARACTERISTIC,
            value: Bytes::from_static(&[1, 2, 3]),
        });
        assert!(empty.is_empty());
        assert!(other.is_empty());

        let malformed = link.handle_event(GattEvent::Notification {
            characteristic: M2_MESSAGE_CHARACTERISTIC,
            value: Bytes::from_static(&[1, 2, 3]),
        });
        assert_eq!(malformed, vec![BleNotice::Malformed { dropped: 3 }]);
    }

    #[test]
    fn test_serial_profile_reassembles() {
        let mut link = ready_link(BleProfile::Serial);
        let frame = [9, 9, 9, 9, 9, 9, 2, 0xAA, 0xBB];

        let first = link.handle_event(GattEvent::Notification {
            characteristic: SERIAL_CHARACTERISTIC,
            value: Bytes::copy_from_slice(&frame[..4]),
        });
        assert!(first.is_empty());

        let second = link.handle_event(GattEvent::Notification {
            characteristic: SERIAL_CHARACTERISTIC,
            value: Bytes::copy_from_slice(&frame[4..]),
        });
        assert_eq!(
            second,
            vec![BleNotice::Frame(InboundFrame {
                raw: Bytes::copy_from_slice(&frame),
                message: None,
            })]
        );
    }

    #[test]
    fn test_serial_profile_has_no_relay_status() {
        let mut link = ready_link(BleProfile::Serial);
        link.set_relay_status(true);
        assert!(link.driver().writes().is_empty());

        link.write(WriteKind::Command, Command::take_snapshot().into_bytes())
            .unwrap();
        assert_eq!(
            link.driver().writes(),
            vec![(SERIAL_CHARACTERISTIC, Bytes::from_static(&[0x05]))]
        );
    }

    #[test]
    fn test_stop_does_not_rescan() {
        let mut link = ready_link(BleProfile::Characteristic);
        assert!(link.stop());
        assert_eq!(link.state(), BleState::Idle);

        link.handle_event(GattEvent::Disconnected);
        assert_eq!(link.driver().take_calls(), vec![GattCall::Disconnect]);
    }

    #[test]
    fn test_stop_while_connecting_releases_driver() {
        let mut link = link(BleProfile::Characteristic);
        link.start();
        link.handle_event(found("Onyx M2"));
        assert_eq!(link.state(), BleState::Connecting);
        link.driver().take_calls();

        assert!(!link.stop());
        assert_eq!(link.driver().take_calls(), vec![GattCall::Disconnect]);

        // a late connect completion is ignored
        assert!(link.handle_event(GattEvent::Connected).is_empty());
        assert_eq!(link.state(), BleState::Idle);
        assert!(link.driver().take_calls().is_empty());
    }
}

//! Test doubles for the GATT driver and the cloud connector
//!
//! Both mocks share their state behind `Arc<Mutex<..>>`, so a test keeps a
//! clone for inspection after moving the original into a link or bridge.
//!
//! # Example
//!
//! ```rust,ignore
//! let (gatt_tx, gatt_rx) = mpsc::unbounded_channel();
//! let driver = MockGattDriver::scripted(gatt_tx, BleProfile::Characteristic);
//! let connector = MockConnector::auto_open();
//! let (bridge, handle) = RelayBridge::new(config, driver.clone(), gatt_rx, connector.clone());
//! tokio::spawn(bridge.run());
//! ```

use bytes::Bytes;
use m2_protocol::gatt::{
    M2_COMMAND_CHARACTERISTIC, M2_CONFIG_CHARACTERISTIC, M2_MESSAGE_CHARACTERISTIC,
    M2_RELAY_CHARACTERISTIC, M2_SERVICE, SERIAL_CHARACTERISTIC, SERIAL_SERVICE,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ble::{DeviceId, GattDriver, GattEvent, GattService};
use crate::cloud::{
    session_channel, CloudConnector, CloudEvent, SessionCommands, SessionHandle, SessionId,
    SessionRequest,
};
use crate::config::BleProfile;

/// Address reported by the scripted driver
pub const MOCK_DEVICE_ADDRESS: &str = "AA:BB:CC:DD:EE:FF";

/// Services of an M2 board
pub fn m2_services() -> Vec<GattService> {
    vec![GattService {
        uuid: M2_SERVICE,
        characteristics: vec![
            M2_CONFIG_CHARACTERISTIC,
            M2_RELAY_CHARACTERISTIC,
            M2_COMMAND_CHARACTERISTIC,
            M2_MESSAGE_CHARACTERISTIC,
        ],
    }]
}

/// Services of the serial bridge
pub fn serial_services() -> Vec<GattService> {
    vec![GattService {
        uuid: SERIAL_SERVICE,
        characteristics: vec![SERIAL_CHARACTERISTIC],
    }]
}

/// A request recorded by [`MockGattDriver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattCall {
    /// `start_scan`
    StartScan,
    /// `stop_scan`
    StopScan,
    /// `connect`
    Connect(DeviceId),
    /// `request_high_priority`
    RequestHighPriority,
    /// `discover_services`
    DiscoverServices,
    /// `enable_notifications`
    EnableNotifications(Uuid),
    /// `write`
    Write(Uuid, Bytes),
    /// `disconnect`
    Disconnect,
}

struct Script {
    events: mpsc::UnboundedSender<GattEvent>,
    profile: BleProfile,
}

#[derive(Default)]
struct DriverState {
    calls: Vec<GattCall>,
    failing_writes: usize,
}

/// Recording GATT driver
///
/// Built with [`scripted`](Self::scripted) it also answers every request
/// the way a well-behaved device would.
#[derive(Clone, Default)]
pub struct MockGattDriver {
    state: Arc<Mutex<DriverState>>,
    script: Option<Arc<Script>>,
}

impl MockGattDriver {
    /// Driver that only records
    pub fn new() -> Self {
        Self::default()
    }

    /// Driver that records and answers through `events`
    pub fn scripted(events: mpsc::UnboundedSender<GattEvent>, profile: BleProfile) -> Self {
        Self {
            state: Arc::default(),
            script: Some(Arc::new(Script { events, profile })),
        }
    }

    /// All requests so far
    pub fn calls(&self) -> Vec<GattCall> {
        self.state.lock().calls.clone()
    }

    /// Requests so far, clearing the record
    pub fn take_calls(&self) -> Vec<GattCall> {
        std::mem::take(&mut self.state.lock().calls)
    }

    /// Writes issued so far, in order
    pub fn writes(&self) -> Vec<(Uuid, Bytes)> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                GattCall::Write(uuid, value) => Some((*uuid, value.clone())),
                _ => None,
            })
            .collect()
    }

    /// Make the next `count` scripted writes fail
    pub fn fail_next_writes(&self, count: usize) {
        self.state.lock().failing_writes = count;
    }

    fn record(&self, call: GattCall) {
        self.state.lock().calls.push(call);
    }

    fn reply(&self, event: GattEvent) {
        if let Some(script) = &self.script {
            let _ = script.events.send(event);
        }
    }
}

impl GattDriver for MockGattDriver {
    fn start_scan(&mut self) {
        self.record(GattCall::StartScan);
        self.reply(GattEvent::DeviceFound {
            device: DeviceId(MOCK_DEVICE_ADDRESS.to_string()),
            name: Some(m2_protocol::gatt::DEFAULT_DEVICE_NAME.to_string()),
        });
    }

    fn stop_scan(&mut self) {
        self.record(GattCall::StopScan);
    }

    fn connect(&mut self, device: &DeviceId) {
        self.record(GattCall::Connect(device.clone()));
        self.reply(GattEvent::Connected);
    }

    fn request_high_priority(&mut self) {
        self.record(GattCall::RequestHighPriority);
    }

    fn discover_services(&mut self) {
        self.record(GattCall::DiscoverServices);
        let services = match self.script.as_ref().map(|s| s.profile) {
            Some(BleProfile::Serial) => serial_services(),
            _ => m2_services(),
        };
        self.reply(GattEvent::ServicesDiscovered { services });
    }

    fn enable_notifications(&mut self, characteristic: Uuid) {
        self.record(GattCall::EnableNotifications(characteristic));
    }

    fn write(&mut self, characteristic: Uuid, value: Bytes) {
        self.record(GattCall::Write(characteristic, value));
        let result = {
            let mut state = self.state.lock();
            if state.failing_writes > 0 {
                state.failing_writes -= 1;
                Err("GATT busy".to_string())
            } else {
                Ok(())
            }
        };
        self.reply(GattEvent::WriteComplete {
            characteristic,
            result,
        });
    }

    fn disconnect(&mut self) {
        self.record(GattCall::Disconnect);
    }

    fn name(&self) -> &str {
        "mock"
    }
}

struct MockSession {
    id: SessionId,
    commands: SessionCommands,
    sent: Vec<Bytes>,
    close_reason: Option<String>,
}

impl MockSession {
    fn poll(&mut self) {
        while let Ok(frame) = self.commands.frames.try_recv() {
            self.sent.push(frame);
        }
        if self.close_reason.is_none() {
            if let Ok(reason) = self.commands.close.try_recv() {
                self.close_reason = Some(reason);
            }
        }
    }
}

#[derive(Default)]
struct ConnectorState {
    requests: Vec<SessionRequest>,
    sessions: Vec<MockSession>,
    events: Option<mpsc::UnboundedSender<CloudEvent>>,
    auto_open: bool,
}

/// Recording cloud connector
///
/// Sessions never touch the network. Tests drive them with the
/// `open_session`/`deliver`/`fail`/`peer_close`/`complete_close` helpers,
/// which post events tagged with the right session id.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    /// Connector whose sessions stay connecting until told otherwise
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector whose sessions open immediately
    pub fn auto_open() -> Self {
        let connector = Self::default();
        connector.state.lock().auto_open = true;
        connector
    }

    /// Every session request so far
    pub fn requests(&self) -> Vec<SessionRequest> {
        self.state.lock().requests.clone()
    }

    /// Number of sessions opened so far
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    /// Frames the owner queued on session `index`
    pub fn sent_frames(&self, index: usize) -> Vec<Bytes> {
        let mut state = self.state.lock();
        match state.sessions.get_mut(index) {
            Some(session) => {
                session.poll();
                session.sent.clone()
            }
            None => Vec::new(),
        }
    }

    /// Close reason the owner gave session `index`, if it asked to close
    pub fn close_reason(&self, index: usize) -> Option<String> {
        let mut state = self.state.lock();
        let session = state.sessions.get_mut(index)?;
        session.poll();
        session.close_reason.clone()
    }

    /// Complete the handshake of session `index`
    pub fn open_session(&self, index: usize) {
        self.post(index, |session| CloudEvent::Opened { session });
    }

    /// Deliver a binary frame on session `index`
    pub fn deliver(&self, index: usize, data: impl Into<Bytes>) {
        let data = data.into();
        self.post(index, move |session| CloudEvent::Binary { session, data });
    }

    /// Fail session `index`
    pub fn fail(&self, index: usize, error: &str) {
        let error = error.to_string();
        self.post(index, move |session| CloudEvent::Failed { session, error });
    }

    /// Close session `index` from the server side
    pub fn peer_close(&self, index: usize) {
        self.post(index, |session| CloudEvent::PeerClosed {
            session,
            code: 1000,
            reason: "server restart".to_string(),
        });
    }

    /// Report that a close requested on session `index` completed
    pub fn complete_close(&self, index: usize) {
        self.post(index, |session| CloudEvent::Closed { session });
    }

    fn post(&self, index: usize, event: impl FnOnce(SessionId) -> CloudEvent) {
        let state = self.state.lock();
        let (Some(session), Some(events)) = (state.sessions.get(index), state.events.as_ref())
        else {
            return;
        };
        let _ = events.send(event(session.id));
    }
}

impl CloudConnector for MockConnector {
    fn open(
        &mut self,
        request: SessionRequest,
        events: mpsc::UnboundedSender<CloudEvent>,
    ) -> SessionHandle {
        let (handle, commands) = session_channel(request.outbound_queue_size);
        let mut state = self.state.lock();
        if state.auto_open {
            let _ = events.send(CloudEvent::Opened {
                session: request.id,
            });
        }
        state.sessions.push(MockSession {
            id: request.id,
            commands,
            sent: Vec::new(),
            close_reason: None,
        });
        state.requests.push(request);
        state.events = Some(events);
        handle
    }
}

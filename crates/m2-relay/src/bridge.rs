//! RelayBridge - BLE to cloud coordinator
//!
//! The bridge task owns the [`BleLink`], the [`CloudLink`], the mute flag and
//! the statistics. Everything that changes them arrives as an event on one of
//! its channels, so no locking is needed:
//!
//! ```text
//! ┌──────────────┐ GattEvent  ┌──────────────────────┐ CloudEvent ┌──────────────┐
//! │ GattDriver   │──────────► │     RelayBridge      │ ◄──────────│ session task │
//! │ (btleplug)   │ ◄───────── │ BleLink    CloudLink │ ──────────►│ (websocket)  │
//! └──────────────┘  requests  └──────────▲───────────┘   frames   └──────────────┘
//!                                        │ BridgeCommand
//!                                 ┌──────┴───────┐
//!                                 │ BridgeHandle │
//!                                 └──────────────┘
//! ```
//!
//! - M2 → server: every frame is published locally, then forwarded unless
//!   muted or the session is down. Nothing is buffered for later.
//! - server → M2: frames are commands, written through the command queue.
//!   `SET_ALL_MSG_FLAGS 0` mutes forwarding instead of reaching the device.
//!
//! # Example
//!
//! ```rust,ignore
//! use m2_relay::{BtleplugDriver, RelayBridge, RelayConfig, WsConnector};
//!
//! let (gatt_tx, gatt_rx) = tokio::sync::mpsc::unbounded_channel();
//! let driver = BtleplugDriver::new(gatt_tx).await?;
//! let (bridge, handle) = RelayBridge::new(config, driver, gatt_rx, WsConnector::new());
//! tokio::spawn(bridge.run());
//!
//! let mut status = handle.status();
//! while status.changed().await.is_ok() {
//!     println!("{}", status.borrow().summary());
//! }
//! ```

use bytes::Bytes;
use m2_protocol::{Command, DeviceSettings, Message};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::ble::{BleLink, BleNotice, GattDriver, GattEvent, InboundFrame, WriteKind};
use crate::cloud::{CloudConnector, CloudEvent, CloudLink, CloudNotice, DesiredState, SendOutcome};
use crate::config::{RelayConfig, DEFAULT_RATE_INTERVAL_MS};
use crate::error::{RelayError, Result};

/// Close reason when the M2 goes away
pub const CLOSE_REASON_BLE_LOST: &str = "M2 disconnected";

/// Close reason on shutdown
pub const CLOSE_REASON_SHUTDOWN: &str = "Service stopped";

/// Commands that can be sent to the bridge
#[derive(Debug)]
pub enum BridgeCommand {
    /// Write device settings to the M2
    SyncConfig {
        /// Settings to write
        settings: DeviceSettings,
        /// Whether the directives were queued
        reply: oneshot::Sender<Result<()>>,
    },
    /// Write a command to the M2 on behalf of a local client
    SendCommand {
        /// Command to write
        command: Command,
        /// Whether the command was queued
        reply: oneshot::Sender<Result<()>>,
    },
    /// The host switched networks
    NetworkChanged,
    /// Get bridge statistics
    GetStats(oneshot::Sender<BridgeStats>),
    /// Shutdown the bridge
    Shutdown,
}

/// Bridge statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    /// Frames received from the M2
    pub frames_received: u64,
    /// Frames handed to the cloud session
    pub frames_forwarded: u64,
    /// Frames dropped because the session was not open
    pub frames_dropped: u64,
    /// Frames withheld while muted
    pub frames_suppressed: u64,
    /// Frames dropped because the session queue was full
    pub backpressure_drops: u64,
    /// Server commands written to the M2
    pub commands_written: u64,
    /// Config directives written to the M2
    pub config_writes: u64,
    /// Notifications or server frames that could not be decoded
    pub malformed_frames: u64,
}

/// Observable relay state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelayStatus {
    /// M2 link ready
    pub ble_connected: bool,
    /// Cloud session open
    pub cloud_connected: bool,
    /// Frames forwarded during the last rate window, per second
    pub messages_per_second: u32,
    /// Forwarding paused by the server
    pub muted: bool,
}

/// One-line description of a [`RelayStatus`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSummary {
    /// Short state name
    pub title: &'static str,
    /// Human readable detail
    pub text: String,
}

impl std::fmt::Display for StatusSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.title, self.text)
    }
}

impl RelayStatus {
    /// Summarize the state the way the service notification shows it
    pub fn summary(&self) -> StatusSummary {
        let (title, text) = if self.messages_per_second > 0 {
            (
                "Active",
                format!("Relaying {} msgs/sec", self.messages_per_second),
            )
        } else if !self.ble_connected {
            ("Idle", "Car is offline or out of range".to_string())
        } else if !self.cloud_connected {
            ("Connected", "Car is connected".to_string())
        } else {
            ("Online", "Car is online".to_string())
        };
        StatusSummary { title, text }
    }
}

/// Handle for controlling the RelayBridge
#[derive(Clone)]
pub struct BridgeHandle {
    command_tx: mpsc::Sender<BridgeCommand>,
    status_rx: watch::Receiver<RelayStatus>,
    messages_tx: broadcast::Sender<Message>,
}

impl BridgeHandle {
    /// Write device settings to the M2 and refresh the cloud credentials
    ///
    /// Fails with [`RelayError::NotConnected`] unless the M2 is ready.
    pub async fn sync_config(&self, settings: DeviceSettings) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(BridgeCommand::SyncConfig { settings, reply })
            .await
            .map_err(|_| RelayError::ChannelClosed)?;
        rx.await.map_err(|_| RelayError::ChannelClosed)?
    }

    /// Queue a command for the M2
    ///
    /// Local commands bypass the mute directive handling: a
    /// `SET_ALL_MSG_FLAGS` sent here is written like any other command.
    pub async fn send_command(&self, command: Command) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command_tx
            .send(BridgeCommand::SendCommand { command, reply })
            .await
            .map_err(|_| RelayError::ChannelClosed)?;
        rx.await.map_err(|_| RelayError::ChannelClosed)?
    }

    /// Cycle the cloud session after a network change
    pub async fn network_changed(&self) -> Result<()> {
        self.command_tx
            .send(BridgeCommand::NetworkChanged)
            .await
            .map_err(|_| RelayError::ChannelClosed)
    }

    /// Get bridge statistics
    pub async fn stats(&self) -> Result<BridgeStats> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(BridgeCommand::GetStats(tx))
            .await
            .map_err(|_| RelayError::ChannelClosed)?;
        rx.await.map_err(|_| RelayError::ChannelClosed)
    }

    /// Watch the relay status
    pub fn status(&self) -> watch::Receiver<RelayStatus> {
        self.status_rx.clone()
    }

    /// Latest relay status
    pub fn current_status(&self) -> RelayStatus {
        self.status_rx.borrow().clone()
    }

    /// Receive every message decoded from the M2
    pub fn subscribe_messages(&self) -> broadcast::Receiver<Message> {
        self.messages_tx.subscribe()
    }

    /// Shutdown the bridge
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(BridgeCommand::Shutdown)
            .await
            .map_err(|_| RelayError::ChannelClosed)
    }
}

/// Relay between one M2 device and the cloud server
pub struct RelayBridge<D: GattDriver, C: CloudConnector> {
    /// BLE link to the M2
    ble: BleLink<D>,
    /// Cloud session
    cloud: CloudLink<C>,
    /// Driver events
    gatt_rx: mpsc::UnboundedReceiver<GattEvent>,
    /// Session and timer events
    cloud_rx: mpsc::UnboundedReceiver<CloudEvent>,
    /// Command receiver
    command_rx: mpsc::Receiver<BridgeCommand>,
    /// Status publisher
    status_tx: watch::Sender<RelayStatus>,
    /// Local message fan-out
    messages_tx: broadcast::Sender<Message>,
    /// Bridge statistics
    stats: BridgeStats,
    /// Forwarding paused by the server
    muted: bool,
    /// Frames forwarded in the current rate window
    window_count: u64,
    /// Rate window length
    rate_interval: Duration,
}

impl<D: GattDriver, C: CloudConnector> RelayBridge<D, C> {
    /// Create a bridge; `gatt_rx` receives the events `driver` posts
    pub fn new(
        config: RelayConfig,
        driver: D,
        gatt_rx: mpsc::UnboundedReceiver<GattEvent>,
        connector: C,
    ) -> (Self, BridgeHandle) {
        let (command_tx, command_rx) = mpsc::channel(config.bridge.command_queue_size.max(1));
        let (cloud_tx, cloud_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(RelayStatus::default());
        let (messages_tx, _) = broadcast::channel(config.bridge.message_buffer.max(1));
        let rate_interval = if config.bridge.rate_interval.is_zero() {
            warn!("Zero rate interval, using the default");
            Duration::from_millis(DEFAULT_RATE_INTERVAL_MS)
        } else {
            config.bridge.rate_interval
        };

        let handle = BridgeHandle {
            command_tx,
            status_rx,
            messages_tx: messages_tx.clone(),
        };

        let bridge = Self {
            ble: BleLink::new(driver, config.ble),
            cloud: CloudLink::new(connector, config.cloud, cloud_tx),
            gatt_rx,
            cloud_rx,
            command_rx,
            status_tx,
            messages_tx,
            stats: BridgeStats::default(),
            muted: false,
            window_count: 0,
            rate_interval,
        };

        (bridge, handle)
    }

    /// Run the bridge until shutdown or until every handle is dropped
    pub async fn run(mut self) -> Result<()> {
        info!(driver = self.ble.driver().name(), "Starting relay bridge");
        self.ble.start();

        let mut rate = tokio::time::interval_at(
            tokio::time::Instant::now() + self.rate_interval,
            self.rate_interval,
        );

        loop {
            tokio::select! {
                Some(event) = self.gatt_rx.recv() => {
                    for notice in self.ble.handle_event(event) {
                        self.on_ble_notice(notice);
                    }
                }

                Some(event) = self.cloud_rx.recv() => {
                    if let Some(notice) = self.cloud.handle_event(event) {
                        self.on_cloud_notice(notice);
                    }
                }

                command = self.command_rx.recv() => {
                    match command {
                        Some(BridgeCommand::Shutdown) => {
                            info!("Bridge shutdown requested");
                            break;
                        }
                        Some(command) => self.handle_command(command),
                        None => {
                            debug!("All bridge handles dropped");
                            break;
                        }
                    }
                }

                _ = rate.tick() => self.update_rate(),
            }
        }

        self.cloud.shutdown(CLOSE_REASON_SHUTDOWN);
        self.ble.stop();
        self.status_tx.send_replace(RelayStatus::default());
        info!(
            received = self.stats.frames_received,
            forwarded = self.stats.frames_forwarded,
            "Relay bridge stopped"
        );
        Ok(())
    }

    fn handle_command(&mut self, command: BridgeCommand) {
        match command {
            BridgeCommand::SyncConfig { settings, reply } => {
                let _ = reply.send(self.sync_config(&settings));
            }
            BridgeCommand::SendCommand { command, reply } => {
                let _ = reply.send(self.send_command(command));
            }
            BridgeCommand::NetworkChanged => self.cloud.network_changed(),
            BridgeCommand::GetStats(tx) => {
                let _ = tx.send(self.stats.clone());
            }
            BridgeCommand::Shutdown => {}
        }
    }

    fn on_ble_notice(&mut self, notice: BleNotice) {
        match notice {
            BleNotice::Ready => {
                self.cloud.set_desired(DesiredState::Open);
                self.cloud.connect();
                self.publish_status();
            }
            BleNotice::Disconnected => {
                self.cloud.disconnect(CLOSE_REASON_BLE_LOST);
                self.publish_status();
            }
            BleNotice::Frame(frame) => self.on_frame(frame),
            BleNotice::Malformed { dropped } => {
                trace!(dropped, "Malformed M2 data");
                self.stats.malformed_frames += 1;
            }
        }
    }

    fn on_frame(&mut self, frame: InboundFrame) {
        self.stats.frames_received += 1;
        if let Some(message) = frame.message {
            trace!(%message, "M2 message");
            let _ = self.messages_tx.send(message);
        }

        if self.muted {
            self.stats.frames_suppressed += 1;
            return;
        }

        match self.cloud.send(frame.raw) {
            SendOutcome::Queued => {
                self.stats.frames_forwarded += 1;
                self.window_count += 1;
            }
            SendOutcome::NotOpen => {
                trace!("Relay session not open, dropping frame");
                self.stats.frames_dropped += 1;
            }
            SendOutcome::Backpressure => {
                debug!("Relay session backed up, dropping frame");
                self.stats.backpressure_drops += 1;
            }
        }
    }

    fn on_cloud_notice(&mut self, notice: CloudNotice) {
        match notice {
            CloudNotice::Opened => {
                self.ble.set_relay_status(true);
                self.publish_status();
            }
            CloudNotice::Closed => {
                self.ble.set_relay_status(false);
                self.publish_status();
            }
            CloudNotice::Inbound(data) => self.on_server_command(data),
        }
    }

    fn on_server_command(&mut self, data: Bytes) {
        let command = match Command::from_bytes(data) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "Dropping server frame");
                self.stats.malformed_frames += 1;
                return;
            }
        };

        if command.is_mute() {
            if !self.muted {
                info!("Server muted forwarding");
                self.muted = true;
                self.publish_status();
            }
            return;
        }
        if command.is_unmute() && self.muted {
            info!("Server unmuted forwarding");
            self.muted = false;
            self.publish_status();
        }

        match self.ble.write(WriteKind::Command, command.into_bytes()) {
            Ok(()) => self.stats.commands_written += 1,
            Err(e) => debug!(error = %e, "Server command not written"),
        }
    }

    fn send_command(&mut self, command: Command) -> Result<()> {
        debug!(opcode = command.opcode_byte(), "Local command");
        self.ble.write(WriteKind::Command, command.into_bytes())?;
        self.stats.commands_written += 1;
        Ok(())
    }

    fn sync_config(&mut self, settings: &DeviceSettings) -> Result<()> {
        if !self.ble.is_ready() {
            return Err(RelayError::NotConnected);
        }
        info!(host = %settings.server_hostname, "Syncing M2 config");
        self.cloud
            .update_credentials(&settings.server_hostname, &settings.server_pin);
        // credentials may have just become available
        self.cloud.connect();

        for directive in settings.directives() {
            debug!(%directive, "Queueing config directive");
            self.ble
                .write(WriteKind::Config, Bytes::from(directive.encode()))?;
            self.stats.config_writes += 1;
        }
        Ok(())
    }

    fn update_rate(&mut self) {
        let secs = self.rate_interval.as_secs_f64();
        let rate = (self.window_count as f64 / secs).round() as u32;
        self.window_count = 0;
        self.status_tx.send_if_modified(|status| {
            if status.messages_per_second == rate {
                return false;
            }
            status.messages_per_second = rate;
            true
        });
    }

    fn publish_status(&mut self) {
        let ble_connected = self.ble.is_ready();
        let cloud_connected = self.cloud.is_open();
        let muted = self.muted;
        self.status_tx.send_if_modified(|status| {
            let changed = status.ble_connected != ble_connected
                || status.cloud_connected != cloud_connected
                || status.muted != muted;
            status.ble_connected = ble_connected;
            status.cloud_connected = cloud_connected;
            status.muted = muted;
            changed
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfigBuilder;
    use crate::test_utils::{GattCall, MockConnector, MockGattDriver};
    use m2_protocol::gatt::{M2_COMMAND_CHARACTERISTIC, M2_CONFIG_CHARACTERISTIC};
    use m2_protocol::MessageFlags;

    const FRAME: [u8; 10] = [1, 0, 0, 0, 2, 0x34, 0x12, 2, 0xAA, 0xBB];

    type TestBridge = RelayBridge<MockGattDriver, MockConnector>;

    fn bridge() -> (TestBridge, BridgeHandle, MockGattDriver, MockConnector) {
        let config = RelayConfigBuilder::new()
            .server("relay.example.com", "1234")
            .build();
        let (gatt_tx, gatt_rx) = mpsc::unbounded_channel();
        let driver = MockGattDriver::scripted(gatt_tx, Default::default());
        let connector = MockConnector::new();
        let (bridge, handle) = RelayBridge::new(config, driver.clone(), gatt_rx, connector.clone());
        (bridge, handle, driver, connector)
    }

    fn pump_gatt(bridge: &mut TestBridge) {
        while let Ok(event) = bridge.gatt_rx.try_recv() {
            for notice in bridge.ble.handle_event(event) {
                bridge.on_ble_notice(notice);
            }
        }
    }

    fn pump_cloud(bridge: &mut TestBridge) {
        while let Ok(event) = bridge.cloud_rx.try_recv() {
            if let Some(notice) = bridge.cloud.handle_event(event) {
                bridge.on_cloud_notice(notice);
            }
        }
    }

    fn frame() -> BleNotice {
        BleNotice::Frame(InboundFrame {
            raw: Bytes::from_static(&FRAME),
            message: Message::decode(&FRAME).ok(),
        })
    }

    fn ready(bridge: &mut TestBridge) {
        bridge.ble.start();
        pump_gatt(bridge);
        assert!(bridge.ble.is_ready());
    }

    #[tokio::test]
    async fn test_ble_ready_opens_cloud() {
        let (mut bridge, handle, _driver, connector) = bridge();
        ready(&mut bridge);
        assert_eq!(connector.session_count(), 1);
        assert!(handle.current_status().ble_connected);

        connector.open_session(0);
        pump_cloud(&mut bridge);
        pump_gatt(&mut bridge);
        assert!(handle.current_status().cloud_connected);
        assert_eq!(handle.current_status().summary().title, "Online");
    }

    #[tokio::test]
    async fn test_frames_dropped_while_cloud_down() {
        let (mut bridge, _handle, _driver, connector) = bridge();
        ready(&mut bridge);

        bridge.on_ble_notice(frame());
        assert_eq!(bridge.stats.frames_dropped, 1);
        assert_eq!(bridge.stats.frames_forwarded, 0);

        connector.open_session(0);
        pump_cloud(&mut bridge);
        bridge.on_ble_notice(frame());
        assert_eq!(bridge.stats.frames_forwarded, 1);
        assert_eq!(connector.sent_frames(0), vec![Bytes::from_static(&FRAME)]);
    }

    #[tokio::test]
    async fn test_frames_published_locally() {
        let (mut bridge, handle, _driver, _connector) = bridge();
        let mut messages = handle.subscribe_messages();
        ready(&mut bridge);

        bridge.on_ble_notice(frame());
        let message = messages.try_recv().unwrap();
        assert_eq!(message.id(), 0x1234);
        assert_eq!(message.data(), &[0xAA, 0xBB]);
    }

    #[tokio::test]
    async fn test_mute_and_unmute() {
        let (mut bridge, handle, driver, connector) = bridge();
        ready(&mut bridge);
        connector.open_session(0);
        pump_cloud(&mut bridge);
        pump_gatt(&mut bridge);
        driver.take_calls();

        bridge.on_server_command(Command::set_all_msg_flags(MessageFlags::NONE).into_bytes());
        assert!(handle.current_status().muted);
        assert!(driver.writes().is_empty());

        bridge.on_ble_notice(frame());
        assert_eq!(bridge.stats.frames_suppressed, 1);
        assert!(connector.sent_frames(0).is_empty());

        bridge.on_server_command(Command::take_snapshot().into_bytes());
        assert!(handle.current_status().muted);

        let unmute = Command::set_all_msg_flags(MessageFlags::TRANSMIT).into_bytes();
        bridge.on_server_command(unmute.clone());
        pump_gatt(&mut bridge);
        assert!(!handle.current_status().muted);
        assert_eq!(
            driver.writes(),
            vec![
                (M2_COMMAND_CHARACTERISTIC, Bytes::from_static(&[0x05])),
                (M2_COMMAND_CHARACTERISTIC, unmute),
            ]
        );

        bridge.on_ble_notice(frame());
        assert_eq!(connector.sent_frames(0).len(), 1);
    }

    #[tokio::test]
    async fn test_empty_server_frame_is_malformed() {
        let (mut bridge, _handle, driver, _connector) = bridge();
        ready(&mut bridge);
        driver.take_calls();

        bridge.on_server_command(Bytes::new());
        assert_eq!(bridge.stats.malformed_frames, 1);
        assert!(driver.writes().is_empty());
    }

    #[tokio::test]
    async fn test_sync_config_requires_ble() {
        let (mut bridge, _handle, _driver, _connector) = bridge();
        let result = bridge.sync_config(&DeviceSettings::default());
        assert!(matches!(result, Err(RelayError::NotConnected)));
    }

    #[tokio::test]
    async fn test_sync_config_writes_directives_in_order() {
        let (mut bridge, _handle, driver, _connector) = bridge();
        ready(&mut bridge);
        driver.take_calls();

        let settings = DeviceSettings {
            server_hostname: "relay.example.com".to_string(),
            server_pin: "1234".to_string(),
            ..DeviceSettings::default()
        };
        bridge.sync_config(&settings).unwrap();
        pump_gatt(&mut bridge);

        let expected: Vec<_> = settings
            .directives()
            .iter()
            .map(|d| (M2_CONFIG_CHARACTERISTIC, Bytes::from(d.encode())))
            .collect();
        assert_eq!(driver.writes(), expected);
        assert_eq!(bridge.stats.config_writes, 9);
    }

    #[tokio::test]
    async fn test_ble_loss_closes_cloud() {
        let (mut bridge, handle, driver, connector) = bridge();
        ready(&mut bridge);
        connector.open_session(0);
        pump_cloud(&mut bridge);

        for notice in bridge.ble.handle_event(GattEvent::Disconnected) {
            bridge.on_ble_notice(notice);
        }
        let status = handle.current_status();
        assert!(!status.ble_connected);
        assert!(!status.cloud_connected);
        assert_eq!(connector.close_reason(0).as_deref(), Some(CLOSE_REASON_BLE_LOST));
        assert_eq!(driver.calls().last(), Some(&GattCall::StartScan));

        bridge.on_ble_notice(frame());
        assert_eq!(bridge.stats.frames_forwarded, 0);
    }

    #[tokio::test]
    async fn test_local_command_written() {
        let (mut bridge, _handle, driver, connector) = bridge();
        let snapshot = Command::take_snapshot();
        assert!(matches!(
            bridge.send_command(snapshot.clone()),
            Err(RelayError::NotConnected)
        ));

        ready(&mut bridge);
        connector.open_session(0);
        pump_cloud(&mut bridge);
        pump_gatt(&mut bridge);
        driver.take_calls();

        bridge.send_command(snapshot.clone()).unwrap();
        let mute = Command::set_all_msg_flags(MessageFlags::NONE);
        bridge.send_command(mute.clone()).unwrap();
        pump_gatt(&mut bridge);

        assert_eq!(
            driver.writes(),
            vec![
                (M2_COMMAND_CHARACTERISTIC, snapshot.into_bytes()),
                (M2_COMMAND_CHARACTERISTIC, mute.into_bytes()),
            ]
        );
        assert!(!bridge.muted);
        assert_eq!(bridge.stats.commands_written, 2);
    }

    #[tokio::test]
    async fn test_zero_rate_interval_uses_default() {
        let mut config = RelayConfig::default();
        config.bridge.rate_interval = Duration::ZERO;
        let (_gatt_tx, gatt_rx) = mpsc::unbounded_channel();
        let (bridge, _handle) =
            RelayBridge::new(config, MockGattDriver::new(), gatt_rx, MockConnector::new());
        assert_eq!(bridge.rate_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_status_summary() {
        let mut status = RelayStatus::default();
        assert_eq!(status.summary().title, "Idle");
        status.ble_connected = true;
        assert_eq!(status.summary().title, "Connected");
        status.cloud_connected = true;
        assert_eq!(status.summary().to_string(), "Online: Car is online");
        status.messages_per_second = 12;
        assert_eq!(status.summary().text, "Relaying 12 msgs/sec");
    }
}

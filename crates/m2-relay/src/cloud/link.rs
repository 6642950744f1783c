//! Cloud session state machine

use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::{
    CloudConnector, CloudEvent, DesiredState, SessionHandle, SessionId, SessionRequest,
    SessionState,
};
use crate::config::CloudConfig;

/// Close reason of a network change cycle
pub const CLOSE_REASON_CYCLE: &str = "Switching networks";

/// What the link reports to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudNotice {
    /// Session opened
    Opened,
    /// An open session ended
    Closed,
    /// Binary frame from the server
    Inbound(Bytes),
}

/// Result of [`CloudLink::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the session
    Queued,
    /// No open session
    NotOpen,
    /// Session queue full, frame dropped
    Backpressure,
}

struct Timer {
    id: u64,
    task: JoinHandle<()>,
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// The relay's connection to the cloud server
pub struct CloudLink<C: CloudConnector> {
    connector: C,
    config: CloudConfig,
    events_tx: mpsc::UnboundedSender<CloudEvent>,
    state: SessionState,
    desired: DesiredState,
    session: Option<(SessionId, SessionHandle)>,
    next_id: u64,
    reconnect: Option<Timer>,
    cycle: Option<Timer>,
}

impl<C: CloudConnector> CloudLink<C> {
    /// Create a closed link; `events_tx` is handed to sessions and timers
    pub fn new(
        connector: C,
        config: CloudConfig,
        events_tx: mpsc::UnboundedSender<CloudEvent>,
    ) -> Self {
        Self {
            connector,
            config,
            events_tx,
            state: SessionState::Closed,
            desired: DesiredState::Closed,
            session: None,
            next_id: 0,
            reconnect: None,
            cycle: None,
        }
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Desired state
    pub fn desired(&self) -> DesiredState {
        self.desired
    }

    /// Whether frames can be sent
    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Id of the live session, if any
    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|(id, _)| *id)
    }

    /// Whether a reconnect is scheduled
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect.is_some()
    }

    /// Access the connector
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Set whether a session is wanted
    pub fn set_desired(&mut self, desired: DesiredState) {
        self.desired = desired;
    }

    /// Replace the server hostname and pin used by the next connect
    pub fn update_credentials(&mut self, hostname: impl Into<String>, pin: impl Into<String>) {
        self.config.hostname = Some(hostname.into());
        self.config.pin = Some(pin.into());
    }

    /// Open a session if one is wanted and none exists
    ///
    /// Does nothing while the hostname or pin is missing.
    pub fn connect(&mut self) {
        if self.desired != DesiredState::Open || self.state != SessionState::Closed {
            return;
        }
        let url = match self.config.url() {
            Ok(url) => url,
            Err(e) => {
                debug!(error = %e, "Relay server not configured, staying offline");
                return;
            }
        };
        self.reconnect = None;

        let id = SessionId(self.next_id());
        info!(session = %id, host = ?self.config.hostname, "Connecting to relay server");
        let request = SessionRequest {
            id,
            url,
            ping_interval: self.config.ping_interval,
            connect_timeout: self.config.connect_timeout,
            outbound_queue_size: self.config.outbound_queue_size,
        };
        let handle = self.connector.open(request, self.events_tx.clone());
        self.session = Some((id, handle));
        self.state = SessionState::Connecting;
    }

    /// Stop wanting a session and close any that exists
    ///
    /// Returns `true` if a session was open.
    pub fn disconnect(&mut self, reason: &str) -> bool {
        self.desired = DesiredState::Closed;
        self.reconnect = None;
        self.cycle = None;
        let was_open = matches!(self.state, SessionState::Open | SessionState::Closing);
        if let Some((id, mut handle)) = self.session.take() {
            info!(session = %id, %reason, "Closing relay session");
            handle.close(reason);
        }
        self.state = SessionState::Closed;
        was_open
    }

    /// Close the session after the network change delay and reconnect
    pub fn network_changed(&mut self) {
        if self.state != SessionState::Open {
            debug!(state = %self.state, "Network changed, no open session to cycle");
            return;
        }
        let delay = self.config.network_change_delay;
        info!(?delay, "Network changed, cycling relay session");
        let id = self.next_id();
        self.cycle = Some(self.schedule(delay, CloudEvent::CycleDue { timer: id }, id));
    }

    /// Queue a frame on the open session
    pub fn send(&mut self, frame: Bytes) -> SendOutcome {
        if self.state != SessionState::Open {
            return SendOutcome::NotOpen;
        }
        let Some((_, handle)) = &self.session else {
            return SendOutcome::NotOpen;
        };
        match handle.try_send(frame) {
            Ok(()) => SendOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                trace!("Session queue full, dropping frame");
                SendOutcome::Backpressure
            }
            Err(TrySendError::Closed(_)) => SendOutcome::NotOpen,
        }
    }

    /// Close for good
    pub fn shutdown(&mut self, reason: &str) -> bool {
        self.disconnect(reason)
    }

    /// Advance the state machine with a session or timer event
    pub fn handle_event(&mut self, event: CloudEvent) -> Option<CloudNotice> {
        match event {
            CloudEvent::Opened { session } => {
                if !self.is_current(session) || self.state != SessionState::Connecting {
                    return None;
                }
                info!(session = %session, "Relay session open");
                self.state = SessionState::Open;
                Some(CloudNotice::Opened)
            }
            CloudEvent::Binary { session, data } => {
                if !self.is_current(session) || self.state != SessionState::Open {
                    return None;
                }
                trace!(len = data.len(), "Inbound frame");
                Some(CloudNotice::Inbound(data))
            }
            CloudEvent::Text { session, text } => {
                if self.is_current(session) {
                    debug!(%text, "Ignoring text frame");
                }
                None
            }
            CloudEvent::PeerClosed {
                session,
                code,
                reason,
            } => {
                if !self.is_current(session) {
                    return None;
                }
                info!(session = %session, code, %reason, "Relay server closed the session");
                let notice = self.session_ended();
                self.schedule_reconnect();
                notice
            }
            CloudEvent::Closed { session } => {
                if !self.is_current(session) {
                    return None;
                }
                debug!(session = %session, "Relay session closed");
                let notice = self.session_ended();
                // cycle close: reconnect right away
                self.connect();
                notice
            }
            CloudEvent::Failed { session, error } => {
                if !self.is_current(session) {
                    return None;
                }
                warn!(session = %session, %error, "Relay session failed");
                let notice = self.session_ended();
                self.schedule_reconnect();
                notice
            }
            CloudEvent::ReconnectDue { timer } => {
                if self.reconnect.as_ref().map(|t| t.id) != Some(timer) {
                    return None;
                }
                self.reconnect = None;
                self.connect();
                None
            }
            CloudEvent::CycleDue { timer } => {
                if self.cycle.as_ref().map(|t| t.id) != Some(timer) {
                    return None;
                }
                self.cycle = None;
                if self.state == SessionState::Open {
                    if let Some((id, handle)) = self.session.as_mut() {
                        info!(session = %id, "Closing relay session for network change");
                        handle.close(CLOSE_REASON_CYCLE);
                        self.state = SessionState::Closing;
                    }
                }
                None
            }
        }
    }

    fn is_current(&self, session: SessionId) -> bool {
        self.session_id() == Some(session)
    }

    fn session_ended(&mut self) -> Option<CloudNotice> {
        let was_open = matches!(self.state, SessionState::Open | SessionState::Closing);
        self.session = None;
        self.cycle = None;
        self.state = SessionState::Closed;
        was_open.then_some(CloudNotice::Closed)
    }

    fn schedule_reconnect(&mut self) {
        if self.desired != DesiredState::Open {
            return;
        }
        let delay = self.config.reconnect_delay;
        debug!(?delay, "Scheduling reconnect");
        let id = self.next_id();
        self.reconnect = Some(self.schedule(delay, CloudEvent::ReconnectDue { timer: id }, id));
    }

    fn schedule(&self, delay: Duration, event: CloudEvent, id: u64) -> Timer {
        let tx = self.events_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        });
        Timer { id, task }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

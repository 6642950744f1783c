//! Cloud relay session
//!
//! [`CloudLink`] keeps one WebSocket session to the relay server alive while
//! it is wanted. The socket itself lives in a task started by a
//! [`CloudConnector`]; the link only sees [`CloudEvent`]s tagged with the
//! session they belong to, so events from a superseded session are dropped.

mod link;
mod ws;

pub use link::{CloudLink, CloudNotice, SendOutcome, CLOSE_REASON_CYCLE};
pub use ws::WsConnector;

use bytes::Bytes;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Identifies one connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No socket
    Closed,
    /// Handshake in progress
    Connecting,
    /// Frames may be sent
    Open,
    /// Deliberate close in progress
    Closing,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Closed => write!(f, "closed"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Open => write!(f, "open"),
            SessionState::Closing => write!(f, "closing"),
        }
    }
}

/// Whether the owner wants a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DesiredState {
    /// Keep a session open, reconnecting as needed
    Open,
    /// No session
    #[default]
    Closed,
}

/// Events posted to the link by session tasks and timers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudEvent {
    /// Handshake completed
    Opened {
        /// Originating session
        session: SessionId,
    },
    /// Binary frame from the server
    Binary {
        /// Originating session
        session: SessionId,
        /// Frame payload
        data: Bytes,
    },
    /// Text frame from the server
    Text {
        /// Originating session
        session: SessionId,
        /// Frame text
        text: String,
    },
    /// Server closed the session
    PeerClosed {
        /// Originating session
        session: SessionId,
        /// Close code
        code: u16,
        /// Close reason
        reason: String,
    },
    /// A close we requested completed
    Closed {
        /// Originating session
        session: SessionId,
    },
    /// I/O error, connect timeout or missed keepalive
    Failed {
        /// Originating session
        session: SessionId,
        /// Failure description
        error: String,
    },
    /// Reconnect delay elapsed
    ReconnectDue {
        /// Timer that fired
        timer: u64,
    },
    /// Network change delay elapsed
    CycleDue {
        /// Timer that fired
        timer: u64,
    },
}

/// Parameters for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    /// Session id to tag events with
    pub id: SessionId,
    /// Relay URL
    pub url: String,
    /// Keepalive ping interval
    pub ping_interval: Duration,
    /// Handshake timeout
    pub connect_timeout: Duration,
    /// Capacity of the outbound frame queue
    pub outbound_queue_size: usize,
}

/// Owner's side of a session task
#[derive(Debug)]
pub struct SessionHandle {
    frames: mpsc::Sender<Bytes>,
    close: Option<oneshot::Sender<String>>,
}

/// Session task's side of a [`SessionHandle`]
#[derive(Debug)]
pub struct SessionCommands {
    /// Frames to send, in order
    pub frames: mpsc::Receiver<Bytes>,
    /// Close request carrying the close reason
    pub close: oneshot::Receiver<String>,
}

/// Create a connected handle/commands pair
pub fn session_channel(outbound_queue_size: usize) -> (SessionHandle, SessionCommands) {
    let (frames_tx, frames_rx) = mpsc::channel(outbound_queue_size.max(1));
    let (close_tx, close_rx) = oneshot::channel();
    (
        SessionHandle {
            frames: frames_tx,
            close: Some(close_tx),
        },
        SessionCommands {
            frames: frames_rx,
            close: close_rx,
        },
    )
}

impl SessionHandle {
    /// Queue a frame without waiting
    pub fn try_send(&self, frame: Bytes) -> std::result::Result<(), mpsc::error::TrySendError<Bytes>> {
        self.frames.try_send(frame)
    }

    /// Ask the session to close with code 1000
    pub fn close(&mut self, reason: &str) {
        if let Some(close) = self.close.take() {
            let _ = close.send(reason.to_string());
        }
    }
}

/// Starts session tasks
///
/// `open` must not block. The session reports through `events`, tagging
/// every event with `request.id`.
pub trait CloudConnector: Send + 'static {
    /// Start a session
    fn open(
        &mut self,
        request: SessionRequest,
        events: mpsc::UnboundedSender<CloudEvent>,
    ) -> SessionHandle;
}

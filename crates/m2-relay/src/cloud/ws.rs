//! WebSocket sessions on `tokio-tungstenite`

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::Once;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace};

use super::{
    session_channel, CloudConnector, CloudEvent, SessionCommands, SessionHandle, SessionId,
    SessionRequest,
};

/// Close reason used when the owner drops its handle
const CLOSE_REASON_DROPPED: &str = "Service stopped";

static CRYPTO_PROVIDER: Once = Once::new();

/// Install ring as the process-wide rustls provider unless one is set
fn install_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            debug!("rustls crypto provider already installed");
        }
    });
}

/// Connector spawning one tokio task per session
#[derive(Debug, Clone)]
pub struct WsConnector;

impl WsConnector {
    /// Create a connector
    pub fn new() -> Self {
        install_crypto_provider();
        Self
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl CloudConnector for WsConnector {
    fn open(
        &mut self,
        request: SessionRequest,
        events: mpsc::UnboundedSender<CloudEvent>,
    ) -> SessionHandle {
        let (handle, commands) = session_channel(request.outbound_queue_size);
        let session = request.id;
        spawn_supervised(session, events.clone(), run_session(request, events, commands));
        handle
    }
}

/// Run a session task, reporting `Failed` if it panics or is cancelled
fn spawn_supervised<F>(session: SessionId, events: mpsc::UnboundedSender<CloudEvent>, task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let task = tokio::spawn(task);
    tokio::spawn(async move {
        if let Err(e) = task.await {
            error!(session = %session, error = %e, "Session task died");
            let _ = events.send(CloudEvent::Failed {
                session,
                error: format!("session task died: {e}"),
            });
        }
    });
}

async fn run_session(
    request: SessionRequest,
    events: mpsc::UnboundedSender<CloudEvent>,
    mut commands: SessionCommands,
) {
    let session = request.id;
    let fail = |error: String| {
        let _ = events.send(CloudEvent::Failed { session, error });
    };

    let connect = tokio::time::timeout(request.connect_timeout, connect_async(request.url.as_str()));
    let (socket, _response) = tokio::select! {
        result = connect => match result {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return fail(e.to_string()),
            Err(_) => return fail("connect timeout".to_string()),
        },
        _ = &mut commands.close => {
            let _ = events.send(CloudEvent::Closed { session });
            return;
        }
    };
    let _ = events.send(CloudEvent::Opened { session });

    let (mut sink, mut stream) = socket.split();
    let mut keepalive = tokio::time::interval_at(
        tokio::time::Instant::now() + request.ping_interval,
        request.ping_interval,
    );
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            close = &mut commands.close => {
                let reason = close.unwrap_or_else(|_| CLOSE_REASON_DROPPED.to_string());
                let frame = CloseFrame {
                    code: CloseCode::Normal,
                    reason: reason.into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    debug!(session = %session, error = %e, "Close frame not sent");
                } else {
                    // wait for the server's close reply
                    let _ = tokio::time::timeout(request.connect_timeout, async {
                        while let Some(Ok(message)) = stream.next().await {
                            if message.is_close() {
                                break;
                            }
                        }
                    })
                    .await;
                }
                let _ = events.send(CloudEvent::Closed { session });
                return;
            }
            Some(frame) = commands.frames.recv() => {
                if let Err(e) = sink.send(Message::Binary(frame.to_vec())).await {
                    return fail(e.to_string());
                }
            }
            message = stream.next() => match message {
                Some(Ok(Message::Binary(data))) => {
                    let _ = events.send(CloudEvent::Binary {
                        session,
                        data: Bytes::from(data),
                    });
                }
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(CloudEvent::Text { session, text });
                }
                Some(Ok(Message::Pong(_))) => {
                    trace!(session = %session, "Pong");
                    awaiting_pong = false;
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((u16::from(CloseCode::Status), String::new()));
                    // flushes the close reply queued by the protocol
                    let _ = sink.close().await;
                    let _ = events.send(CloudEvent::PeerClosed {
                        session,
                        code,
                        reason,
                    });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return fail(e.to_string()),
                None => return fail("connection reset".to_string()),
            },
            _ = keepalive.tick() => {
                if awaiting_pong {
                    return fail("keepalive timeout".to_string());
                }
                awaiting_pong = true;
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    return fail(e.to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_panicking_session_reports_failure() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn_supervised(SessionId(7), tx, async {
            panic!("handshake blew up");
        });

        match rx.recv().await {
            Some(CloudEvent::Failed { session, error }) => {
                assert_eq!(session, SessionId(7));
                assert!(error.contains("session task died"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_finished_session_reports_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn_supervised(SessionId(1), tx, async {});
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_provider_installed_once() {
        let _ = WsConnector::new();
        let _ = WsConnector::default();
        assert!(rustls::crypto::CryptoProvider::get_default().is_some());
    }
}

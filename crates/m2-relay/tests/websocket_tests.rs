//! WebSocket session tests against a local tungstenite server
//!
//! These use real sockets and real time, so every wait is bounded.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use m2_relay::{
    CloudConfig, CloudEvent, CloudLink, CloudNotice, DesiredState, RelayConfigBuilder,
    SendOutcome, SessionState, WsConnector,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

fn cloud_config(addr: SocketAddr) -> CloudConfig {
    RelayConfigBuilder::new()
        .server(addr.to_string(), "42")
        .scheme("ws")
        .build()
        .cloud
}

/// Feed events to the link until it reports something
async fn next_notice(
    link: &mut CloudLink<WsConnector>,
    events: &mut mpsc::UnboundedReceiver<CloudEvent>,
) -> CloudNotice {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if let Some(notice) = link.handle_event(event) {
                return notice;
            }
        }
    })
    .await
    .expect("no notice from the session")
}

#[tokio::test]
async fn test_session_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut uri = String::new();
        let mut ws = tokio_tungstenite::accept_hdr_async(
            stream,
            |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                uri = request.uri().to_string();
                Ok(response)
            },
        )
        .await
        .unwrap();

        ws.send(Message::Binary(vec![0x05])).await.unwrap();

        let mut received = Vec::new();
        let mut close_reason = None;
        while let Some(Ok(message)) = ws.next().await {
            match message {
                Message::Binary(data) => received.push(data),
                Message::Close(frame) => {
                    close_reason = frame.map(|f| f.reason.into_owned());
                }
                _ => {}
            }
        }
        (uri, received, close_reason)
    });

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut link = CloudLink::new(WsConnector::new(), cloud_config(addr), events_tx);
    link.set_desired(DesiredState::Open);
    link.connect();
    assert_eq!(link.state(), SessionState::Connecting);

    assert_eq!(next_notice(&mut link, &mut events).await, CloudNotice::Opened);
    assert_eq!(
        next_notice(&mut link, &mut events).await,
        CloudNotice::Inbound(Bytes::from_static(&[0x05]))
    );

    assert_eq!(
        link.send(Bytes::from_static(&[1, 0, 0, 0, 0, 0x10, 0, 0])),
        SendOutcome::Queued
    );
    // let the frame go out ahead of the close
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(link.disconnect("M2 disconnected"));

    let (uri, received, close_reason) = tokio::time::timeout(WAIT, server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(uri, "/relay?pin=42");
    assert_eq!(received, vec![vec![1, 0, 0, 0, 0, 0x10, 0, 0]]);
    assert_eq!(close_reason.as_deref(), Some("M2 disconnected"));
}

#[tokio::test]
async fn test_server_close_schedules_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "maintenance".into(),
        }))
        .await
        .unwrap();
        while ws.next().await.is_some() {}
    });

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut link = CloudLink::new(WsConnector::new(), cloud_config(addr), events_tx);
    link.set_desired(DesiredState::Open);
    link.connect();

    assert_eq!(next_notice(&mut link, &mut events).await, CloudNotice::Opened);
    assert_eq!(next_notice(&mut link, &mut events).await, CloudNotice::Closed);
    assert_eq!(link.state(), SessionState::Closed);
    assert!(link.reconnect_pending());
}

#[tokio::test]
async fn test_refused_connection_fails() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut link = CloudLink::new(WsConnector::new(), cloud_config(addr), events_tx);
    link.set_desired(DesiredState::Open);
    link.connect();
    let session = link.session_id().unwrap();

    let event = tokio::time::timeout(WAIT, events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, CloudEvent::Failed { session: s, .. } if s == session));

    assert_eq!(link.handle_event(event), None);
    assert_eq!(link.state(), SessionState::Closed);
    assert!(link.reconnect_pending());
}

#[tokio::test]
async fn test_tls_handshake_failure_schedules_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // plain TCP peer: accept, then hang up mid-handshake
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
    });

    let mut config = RelayConfigBuilder::new()
        .server(addr.to_string(), "42")
        .build()
        .cloud;
    config.connect_timeout = Duration::from_secs(2);
    assert!(config.url().unwrap().starts_with("wss://"));

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut link = CloudLink::new(WsConnector::new(), config, events_tx);
    link.set_desired(DesiredState::Open);
    link.connect();
    let session = link.session_id().unwrap();

    let event = tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("session reported nothing")
        .unwrap();
    assert!(matches!(event, CloudEvent::Failed { session: s, .. } if s == session));

    assert_eq!(link.handle_event(event), None);
    assert_eq!(link.state(), SessionState::Closed);
    assert!(link.reconnect_pending());
}

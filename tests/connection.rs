//! Connection manager against a real WebSocket server on localhost

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use yoke_client::network::{ConnectionManager, ConnectionState, WsConnector};
use yoke_client::protocol::{ClientMessage, ServerMessage};

const WAIT: Duration = Duration::from_secs(5);
const RECONNECT_DELAY: Duration = Duration::from_millis(50);

async fn server() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    (listener, url)
}

async fn accept(listener: &TcpListener) -> WebSocketStream<tokio::net::TcpStream> {
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    accept_async(stream).await.unwrap()
}

async fn next_json(ws: &mut WebSocketStream<tokio::net::TcpStream>) -> Value {
    loop {
        let message = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn wait_for_state(manager: &ConnectionManager, wanted: ConnectionState) {
    let mut states = manager.watch_state();
    timeout(WAIT, states.wait_for(|s| *s == wanted))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_queued_messages_reach_server_in_order() {
    let (listener, url) = server().await;
    let manager = ConnectionManager::spawn(WsConnector::new(url), RECONNECT_DELAY);

    manager.send(ClientMessage::Pitch { semitones: 7.0 }).unwrap();
    manager
        .send(ClientMessage::Seek {
            position_seconds: 30.0,
        })
        .unwrap();
    manager.connect();

    let mut ws = accept(&listener).await;
    wait_for_state(&manager, ConnectionState::Connected).await;
    manager.send(ClientMessage::ShowQr).unwrap();

    assert_eq!(next_json(&mut ws).await, json!({ "type": "pitch", "semitones": 7.0 }));
    assert_eq!(
        next_json(&mut ws).await,
        json!({ "type": "seek", "position_seconds": 30.0 })
    );
    assert_eq!(next_json(&mut ws).await, json!({ "type": "show_qr" }));

    manager.disconnect();
}

#[tokio::test]
async fn test_inbound_frames_delivered_and_malformed_dropped() {
    let (listener, url) = server().await;
    let manager = ConnectionManager::spawn(WsConnector::new(url), RECONNECT_DELAY);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = manager.on_message(move |message: &ServerMessage| {
        let _ = tx.send(message.clone());
    });
    manager.connect();

    let mut ws = accept(&listener).await;
    for frame in [
        r#"{"type":"error","message":"Not joined"}"#,
        "not json at all",
        r#"{"type":"pitch","semitones":3}"#,
        r#"{"type":"position_update","position":12.5}"#,
    ] {
        ws.send(Message::Text(frame.into())).await.unwrap();
    }

    let first = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        first,
        ServerMessage::Error {
            message: "Not joined".into()
        }
    );
    let second = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(second, ServerMessage::PositionUpdate { position: 12.5 });

    assert_eq!(manager.stats().malformed_frames, 2);
    assert_eq!(manager.connection_state(), ConnectionState::Connected);
    manager.disconnect();
}

#[tokio::test]
async fn test_reconnects_after_server_drops_link() {
    let (listener, url) = server().await;
    let manager = ConnectionManager::spawn(WsConnector::new(url), RECONNECT_DELAY);
    manager.connect();

    for round in 0..3 {
        let mut ws = accept(&listener).await;
        wait_for_state(&manager, ConnectionState::Connected).await;
        ws.close(None).await.unwrap();
        drop(ws);
        wait_for_state(&manager, ConnectionState::Connecting).await;
        assert!(manager.stats().connection_attempts >= round + 1);
    }

    // Still retrying
    let _ws = accept(&listener).await;
    wait_for_state(&manager, ConnectionState::Connected).await;
    manager.disconnect();
}

#[tokio::test]
async fn test_disconnect_stops_reconnecting() {
    let (listener, url) = server().await;
    let manager = ConnectionManager::spawn(WsConnector::new(url), RECONNECT_DELAY);
    manager.connect();

    let mut ws = accept(&listener).await;
    wait_for_state(&manager, ConnectionState::Connected).await;

    manager.disconnect();
    assert_eq!(manager.connection_state(), ConnectionState::Disconnected);

    // The client closes its side
    loop {
        match timeout(WAIT, ws.next()).await.unwrap() {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(_)) => {}
        }
    }

    let attempt = timeout(RECONNECT_DELAY * 6, listener.accept()).await;
    assert!(attempt.is_err(), "client reconnected after disconnect");
    assert_eq!(manager.connection_state(), ConnectionState::Disconnected);
}

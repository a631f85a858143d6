//! End-to-end scenarios against a real `hyper` listener: a handshake over
//! long-polling, the dispatcher's rejection paths, a message round trip,
//! heartbeat timeout, and the full polling-to-websocket probe/upgrade
//! sequence.

mod support;

use std::time::Duration;

use engineio::{ConnectError, DisconnectReason, EngineIoConfig, Packet};
use futures::{SinkExt, StreamExt};
use hyper::{Body, Client, Method, Request};
use support::{spawn_server, Event};
use tokio_tungstenite::tungstenite::Message;

fn open_packet_sid(body: &[u8]) -> String {
    let text = std::str::from_utf8(body).expect("open packet body is utf8");
    match Packet::decode(text).expect("open packet decodes") {
        Packet::Open(open) => open.sid,
        other => panic!("expected an open packet, got {other:?}"),
    }
}

#[tokio::test]
async fn handshake_over_polling_returns_open_packet() {
    let server = spawn_server(EngineIoConfig::builder().build().unwrap());
    let client = Client::new();

    let resp = client
        .get(server.url("/engine.io/?EIO=4&transport=polling"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    let sid = open_packet_sid(&body);
    assert!(!sid.is_empty());
}

#[tokio::test]
async fn sid_required_once_connected() {
    let mut server = spawn_server(EngineIoConfig::builder().build().unwrap());
    let client = Client::new();

    let resp = client
        .get(server.url("/engine.io/?EIO=4&transport=polling"))
        .await
        .unwrap();
    let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    let _sid = open_packet_sid(&body);
    let _ = server.wait_for(|e| matches!(e, Event::Connect(_))).await;

    // Same loopback IP now has a live session; a follow-up GET without
    // `sid` must be rejected rather than treated as a fresh handshake.
    let resp = client
        .get(server.url("/engine.io/?EIO=4&transport=polling"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let event = server
        .wait_for(|e| matches!(e, Event::ConnectError(_)))
        .await;
    assert!(matches!(
        event,
        Event::ConnectError(ConnectError::SessionIdentifierRequired)
    ));
}

#[tokio::test]
async fn illegal_open_packet_from_client_is_rejected() {
    let mut server = spawn_server(EngineIoConfig::builder().build().unwrap());
    let client = Client::new();

    let resp = client
        .get(server.url("/engine.io/?EIO=4&transport=polling"))
        .await
        .unwrap();
    let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    let sid = open_packet_sid(&body);
    let _ = server.wait_for(|e| matches!(e, Event::Connect(_))).await;

    // A well-formed `open` packet that nonetheless a client must never
    // send: it decodes cleanly, so the rejection has to come from the
    // socket's legality sweep rather than the packet codec.
    let open_payload = r#"0{"sid":"x","upgrades":[],"pingInterval":1,"pingTimeout":1,"maxPayload":1}"#;
    let req = Request::builder()
        .method(Method::POST)
        .uri(server.url(&format!("/engine.io/?EIO=4&transport=polling&sid={sid}")))
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(open_payload))
        .unwrap();
    let resp = client.request(req).await.unwrap();
    assert_eq!(resp.status(), 400);

    let event = server
        .wait_for(|e| matches!(e, Event::TransportException(..)))
        .await;
    assert!(matches!(
        event,
        Event::TransportException(_, engineio::TransportError::PacketIllegal)
    ));
}

#[tokio::test]
async fn message_round_trips_over_polling() {
    let mut server = spawn_server(EngineIoConfig::builder().build().unwrap());
    let client = Client::new();

    let resp = client
        .get(server.url("/engine.io/?EIO=4&transport=polling"))
        .await
        .unwrap();
    let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    let sid = open_packet_sid(&body);
    let _ = server.wait_for(|e| matches!(e, Event::Connect(_))).await;

    let req = Request::builder()
        .method(Method::POST)
        .uri(server.url(&format!("/engine.io/?EIO=4&transport=polling&sid={sid}")))
        .body(Body::from("4hello there"))
        .unwrap();
    let resp = client.request(req).await.unwrap();
    assert_eq!(resp.status(), 200);

    let event = server
        .wait_for(|e| matches!(e, Event::Message(..)))
        .await;
    match event {
        Event::Message(_, text) => assert_eq!(text, "hello there"),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn heartbeat_timeout_disconnects_idle_session() {
    let config = EngineIoConfig::builder()
        .ping_interval(Duration::from_millis(40))
        .ping_timeout(Duration::from_millis(20))
        .build()
        .unwrap();
    let mut server = spawn_server(config);
    let client = Client::new();

    let resp = client
        .get(server.url("/engine.io/?EIO=4&transport=polling"))
        .await
        .unwrap();
    let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    let _sid = open_packet_sid(&body);
    let _ = server.wait_for(|e| matches!(e, Event::Connect(_))).await;

    // No client ever polls again to pick up the server's ping, let alone
    // answer it, so the heart's timeout must fire and tear the session down.
    let event = tokio::time::timeout(
        Duration::from_secs(2),
        server.wait_for(|e| matches!(e, Event::Disconnect(..))),
    )
    .await
    .expect("disconnect event within timeout");
    match event {
        Event::Disconnect(_, reason) => assert_eq!(reason, DisconnectReason::HeartbeatTimeout),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn probe_and_upgrade_to_websocket() {
    let mut server = spawn_server(EngineIoConfig::builder().build().unwrap());
    let client = Client::new();

    let resp = client
        .get(server.url("/engine.io/?EIO=4&transport=polling"))
        .await
        .unwrap();
    let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
    let sid = open_packet_sid(&body);
    let _ = server.wait_for(|e| matches!(e, Event::Connect(_))).await;

    let (mut ws, resp) = tokio_tungstenite::connect_async(
        server.ws_url(&format!("/engine.io/?EIO=4&transport=websocket&sid={sid}")),
    )
    .await
    .unwrap();
    assert_eq!(resp.status().as_u16(), 101);

    ws.send(Message::Text("2probe".into())).await.unwrap();
    let pong = ws.next().await.unwrap().unwrap();
    assert_eq!(pong, Message::Text("3probe".into()));

    ws.send(Message::Text("5".into())).await.unwrap();

    // A second upgrade packet on the now-active transport is a protocol
    // violation: the socket's legality sweep rejects it and the session
    // is torn down rather than silently ignoring it.
    ws.send(Message::Text("5".into())).await.unwrap();
    let event = server
        .wait_for(|e| matches!(e, Event::TransportException(..)))
        .await;
    assert!(matches!(
        event,
        Event::TransportException(_, engineio::TransportError::TransportAlreadyUpgraded)
    ));
    let event = server
        .wait_for(|e| matches!(e, Event::Disconnect(..)))
        .await;
    assert!(matches!(
        event,
        Event::Disconnect(_, DisconnectReason::TransportError)
    ));

    // The policy violation must reach the client as a 1008 close code, not
    // a bare close with no status.
    let close_frame = loop {
        match ws.next().await {
            Some(Ok(Message::Close(frame))) => break frame,
            Some(Ok(_)) => continue,
            _ => break None,
        }
    }
    .expect("server closed the websocket with a close frame");
    assert_eq!(u16::from(close_frame.code), 1008);
}

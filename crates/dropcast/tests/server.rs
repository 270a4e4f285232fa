//! Integration tests for the Dropcast server, handler, and full connection flow.

use std::sync::Arc;
use std::time::Duration;

use dropcast::prelude::*;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;
type Registry = Arc<RoomRegistry<WebSocketConnection>>;

/// Starts a server on a random port and returns its address and registry.
async fn start_with<A: Authenticator>(
    builder: DropcastServerBuilder,
    auth: A,
) -> (String, Registry) {
    let server = builder
        .bind("127.0.0.1:0")
        .build(auth)
        .await
        .expect("server should build");

    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();
    let registry = server.registry();

    tokio::spawn(async move {
        let _ = server.run().await;
    });

    (addr, registry)
}

async fn start_server() -> (String, Registry) {
    start_with(DropcastServerBuilder::new(), AllowAll).await
}

async fn connect(addr: &str, query: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws{query}"))
        .await
        .expect("should connect");
    ws
}

/// Polls until `channel` has exactly `count` members.
async fn wait_for_members(registry: &Registry, channel: &str, count: usize) {
    let channel = ChannelName::new(channel);
    for _ in 0..200 {
        if registry.member_count(&channel).await == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "channel {channel} never reached {count} members (has {})",
        registry.member_count(&channel).await
    );
}

/// Receives the next data message, skipping control frames.
async fn recv_data(ws: &mut ClientWs) -> Message {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(_) | Message::Binary(_) => return msg,
            _ => continue,
        }
    }
}

/// Asserts that no data message arrives within a short window.
async fn assert_silent(ws: &mut ClientWs) {
    let result = tokio::time::timeout(Duration::from_millis(150), ws.next()).await;
    assert!(result.is_err(), "expected no message, got {result:?}");
}

/// Waits for the server to close the connection; returns the close frame
/// code if one was sent.
async fn wait_for_close(ws: &mut ClientWs) -> Option<CloseCode> {
    loop {
        let next = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for close");
        match next {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| f.code),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return None,
        }
    }
}

fn text(msg: &Message) -> &str {
    match msg {
        Message::Text(t) => t.as_str(),
        other => panic!("expected text, got {other:?}"),
    }
}

// =========================================================================
// Scenarios
// =========================================================================

#[tokio::test]
async fn test_peer_receives_and_sender_does_not() {
    let (addr, registry) = start_server().await;
    let mut a = connect(&addr, "?channel=room1").await;
    let mut b = connect(&addr, "?channel=room1").await;
    wait_for_members(&registry, "room1", 2).await;

    a.send(Message::Text("hello".into())).await.unwrap();

    assert_eq!(text(&recv_data(&mut b).await), "hello");
    assert_silent(&mut a).await;
}

#[tokio::test]
async fn test_echo_client_alone_gets_message_back() {
    let (addr, registry) = start_server().await;
    let mut a = connect(&addr, "?channel=room1&echo=true").await;
    wait_for_members(&registry, "room1", 1).await;

    a.send(Message::Text("ping".into())).await.unwrap();

    assert_eq!(text(&recv_data(&mut a).await), "ping");
}

#[tokio::test]
async fn test_binary_frames_are_relayed_as_binary() {
    let (addr, registry) = start_server().await;
    let mut a = connect(&addr, "?channel=files").await;
    let mut b = connect(&addr, "?channel=files").await;
    wait_for_members(&registry, "files", 2).await;

    a.send(Message::Binary(vec![1, 2, 3, 255].into()))
        .await
        .unwrap();

    match recv_data(&mut b).await {
        Message::Binary(data) => assert_eq!(data.as_ref(), [1, 2, 3, 255]),
        other => panic!("expected binary, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_channel_joins_default() {
    let (addr, registry) = start_server().await;
    let _a = connect(&addr, "").await;
    let _b = connect(&addr, "?channel=").await;

    wait_for_members(&registry, "default", 2).await;
}

#[tokio::test]
async fn test_channels_are_isolated() {
    let (addr, registry) = start_server().await;
    let mut a = connect(&addr, "?channel=room1").await;
    let mut b = connect(&addr, "?channel=room1").await;
    let mut c = connect(&addr, "?channel=room2").await;
    wait_for_members(&registry, "room1", 2).await;
    wait_for_members(&registry, "room2", 1).await;

    a.send(Message::Text("room1 only".into())).await.unwrap();

    assert_eq!(text(&recv_data(&mut b).await), "room1 only");
    assert_silent(&mut c).await;
}

#[tokio::test]
async fn test_messages_from_one_sender_arrive_in_order() {
    let (addr, registry) = start_server().await;
    let mut a = connect(&addr, "?channel=ordered").await;
    let mut b = connect(&addr, "?channel=ordered").await;
    wait_for_members(&registry, "ordered", 2).await;

    for i in 0..25 {
        a.send(Message::Text(format!("msg-{i}").into())).await.unwrap();
    }
    for i in 0..25 {
        assert_eq!(text(&recv_data(&mut b).await), format!("msg-{i}"));
    }
}

#[tokio::test]
async fn test_clean_close_leaves_channel() {
    let (addr, registry) = start_server().await;
    let mut a = connect(&addr, "?channel=room1").await;
    let mut b = connect(&addr, "?channel=room1").await;
    wait_for_members(&registry, "room1", 2).await;

    b.close(None).await.unwrap();
    wait_for_members(&registry, "room1", 1).await;

    // The remaining member can still send without error.
    a.send(Message::Text("anyone?".into())).await.unwrap();
    assert_silent(&mut a).await;
}

#[tokio::test]
async fn test_last_member_leaving_removes_channel() {
    let (addr, registry) = start_server().await;
    let mut a = connect(&addr, "?channel=room1").await;
    wait_for_members(&registry, "room1", 1).await;

    a.close(None).await.unwrap();
    wait_for_members(&registry, "room1", 0).await;

    assert!(!registry.contains_channel(&ChannelName::new("room1")).await);
    assert_eq!(registry.channel_count().await, 0);
}

#[tokio::test]
async fn test_unclean_disconnect_is_cleaned_up() {
    let (addr, registry) = start_server().await;
    let mut a = connect(&addr, "?channel=room1").await;
    let b = connect(&addr, "?channel=room1").await;
    wait_for_members(&registry, "room1", 2).await;

    // Drop the socket without a close handshake.
    drop(b);

    // A keeps sending; whichever path notices first (B's read loop or a
    // failed write during broadcast) removes B.
    for i in 0..5 {
        a.send(Message::Text(format!("tick {i}").into())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    wait_for_members(&registry, "room1", 1).await;

    let mut c = connect(&addr, "?channel=room1").await;
    wait_for_members(&registry, "room1", 2).await;
    a.send(Message::Text("after".into())).await.unwrap();
    assert_eq!(text(&recv_data(&mut c).await), "after");
}

#[tokio::test]
async fn test_evicted_connection_is_closed_and_cannot_relay() {
    let builder = DropcastServerBuilder::new().send_timeout(Some(Duration::from_millis(250)));
    let (addr, registry) = start_with(builder, AllowAll).await;
    let room1 = ChannelName::new("room1");

    let mut a = connect(&addr, "?channel=room1").await;
    let mut b = connect(&addr, "?channel=room1").await;
    let c = connect(&addr, "?channel=room1").await;
    wait_for_members(&registry, "room1", 3).await;

    // C keeps reading and reports every text frame it sees.
    let (texts_tx, mut texts) = tokio::sync::mpsc::unbounded_channel();
    let c_reader = tokio::spawn(async move {
        let mut c = c;
        while let Some(Ok(msg)) = c.next().await {
            let Message::Text(t) = msg else { continue };
            if texts_tx.send(t.as_str().to_owned()).is_err() {
                break;
            }
        }
    });

    // B never reads, so once the socket buffers fill a write to it stalls
    // past the send timeout and B is evicted.
    let payload = vec![0u8; 2 * 1024 * 1024];
    for _ in 0..64 {
        a.send(Message::Binary(payload.clone().into())).await.unwrap();
        if registry.member_count(&room1).await == 2 {
            break;
        }
    }
    wait_for_members(&registry, "room1", 2).await;

    // Whatever B still sends must go nowhere.
    let _ = tokio::time::timeout(
        Duration::from_secs(1),
        b.send(Message::Text("ghost".into())),
    )
    .await;

    // The server tears B's connection down: after the buffered frames,
    // its stream ends.
    let closed = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match b.next().await {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "evicted connection should be closed");

    // The channel still works for A and C, and B's frame never arrived.
    a.send(Message::Text("live".into())).await.unwrap();
    let first = tokio::time::timeout(Duration::from_secs(5), texts.recv())
        .await
        .expect("C should receive the next text frame")
        .expect("C reader should still be running");
    assert_eq!(first, "live");
    assert_eq!(registry.member_count(&room1).await, 2);
    assert_eq!(registry.connection_count().await, 2);

    c_reader.abort();
}

// =========================================================================
// Gate, timeouts and shutdown
// =========================================================================

#[tokio::test]
async fn test_shared_token_rejects_missing_token() {
    let (addr, registry) =
        start_with(DropcastServerBuilder::new(), SharedToken::new("s3cret")).await;

    let mut ws = connect(&addr, "?channel=room1").await;
    assert_eq!(wait_for_close(&mut ws).await, Some(CloseCode::Policy));
    assert_eq!(registry.connection_count().await, 0);
}

#[tokio::test]
async fn test_shared_token_admits_matching_token() {
    let (addr, registry) =
        start_with(DropcastServerBuilder::new(), SharedToken::new("s3cret")).await;

    let mut a = connect(&addr, "?channel=room1&echo=1&token=s3cret").await;
    wait_for_members(&registry, "room1", 1).await;

    a.send(Message::Text("let me in".into())).await.unwrap();
    assert_eq!(text(&recv_data(&mut a).await), "let me in");
}

#[tokio::test]
async fn test_idle_connection_is_closed() {
    let builder = DropcastServerBuilder::new().idle_timeout(Some(Duration::from_millis(100)));
    let (addr, registry) = start_with(builder, AllowAll).await;

    let mut a = connect(&addr, "?channel=quiet").await;
    wait_for_members(&registry, "quiet", 1).await;

    wait_for_close(&mut a).await;
    wait_for_members(&registry, "quiet", 0).await;
}

#[tokio::test]
async fn test_shutdown_closes_live_connections() {
    let server = DropcastServerBuilder::new()
        .bind("127.0.0.1:0")
        .build(AllowAll)
        .await
        .expect("server should build");
    let addr = server.local_addr().unwrap().to_string();
    let registry = server.registry();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let running = tokio::spawn(server.run_until(async move {
        let _ = stop_rx.await;
    }));

    let mut a = connect(&addr, "?channel=room1").await;
    let mut b = connect(&addr, "?channel=room2").await;
    wait_for_members(&registry, "room1", 1).await;
    wait_for_members(&registry, "room2", 1).await;

    stop_tx.send(()).unwrap();
    running
        .await
        .expect("server task")
        .expect("run_until should return Ok");

    // run_until waits for the handlers, so cleanup is already done.
    assert_eq!(registry.connection_count().await, 0);

    wait_for_close(&mut a).await;
    wait_for_close(&mut b).await;
    wait_for_members(&registry, "room1", 0).await;
    wait_for_members(&registry, "room2", 0).await;
    assert_eq!(registry.channel_count().await, 0);
}

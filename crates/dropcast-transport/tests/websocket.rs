//! Integration tests for the WebSocket transport.
//!
//! These tests spin up a real WebSocket server and client to verify
//! that frames flow over the network with their type tags intact.

#[cfg(feature = "websocket")]
mod websocket {
    use std::time::Duration;

    use dropcast_transport::{
        Connection, Frame, UpgradeRequest, WebSocketConnection, WebSocketTransport,
    };
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    type ClientWs = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Binds on a random port, connects one client to `target`, and
    /// returns both ends plus the captured request.
    async fn connected_pair(target: &str) -> (WebSocketConnection, UpgradeRequest, ClientWs) {
        let transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("should have local addr");

        let server = tokio::spawn(async move {
            let pending = transport.accept().await.expect("should accept");
            pending
                .upgrade(HANDSHAKE_TIMEOUT)
                .await
                .expect("upgrade should succeed")
        });

        let url = format!("ws://{addr}{target}");
        let (client, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("client should connect");
        let (conn, request) = server.await.expect("task should complete");
        (conn, request, client)
    }

    #[tokio::test]
    async fn test_upgrade_captures_path_and_query() {
        let (conn, request, _client) = connected_pair("/ws?channel=room1&echo=1").await;
        assert!(conn.id().into_inner() > 0);
        assert_eq!(request.path(), "/ws");
        assert_eq!(request.query_param("channel"), Some("room1"));
        assert_eq!(request.query_param("echo"), Some("1"));
    }

    #[tokio::test]
    async fn test_text_and_binary_keep_their_tags() {
        let (conn, _, mut client) = connected_pair("/").await;

        conn.send(&Frame::Text("hello".into()))
            .await
            .expect("send should succeed");
        conn.send(&Frame::Binary(vec![0, 159, 146, 150]))
            .await
            .expect("send should succeed");

        let first = client.next().await.unwrap().unwrap();
        assert!(matches!(&first, Message::Text(t) if t.as_str() == "hello"));
        let second = client.next().await.unwrap().unwrap();
        assert!(matches!(&second, Message::Binary(b) if b.as_ref() == [0, 159, 146, 150]));

        client
            .send(Message::Text("from client".into()))
            .await
            .unwrap();
        client
            .send(Message::Binary(vec![1, 2, 3].into()))
            .await
            .unwrap();

        let text = conn.recv().await.expect("recv ok").expect("frame");
        assert_eq!(text, Frame::Text("from client".into()));
        let binary = conn.recv().await.expect("recv ok").expect("frame");
        assert_eq!(binary, Frame::Binary(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_recv_skips_ping() {
        let (conn, _, mut client) = connected_pair("/").await;

        client.send(Message::Ping(vec![9].into())).await.unwrap();
        client.send(Message::Text("after ping".into())).await.unwrap();

        let frame = conn.recv().await.expect("recv ok").expect("frame");
        assert_eq!(frame, Frame::Text("after ping".into()));
    }

    #[tokio::test]
    async fn test_recv_returns_none_on_client_close() {
        let (conn, _, mut client) = connected_pair("/").await;

        client.send(Message::Close(None)).await.unwrap();

        let result = conn.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on client close");
    }

    #[tokio::test]
    async fn test_send_while_recv_is_parked() {
        // A task blocked in recv must not prevent writes on the same
        // connection.
        let (conn, _, mut client) = connected_pair("/").await;
        let conn = std::sync::Arc::new(conn);

        let reader = {
            let conn = std::sync::Arc::clone(&conn);
            tokio::spawn(async move { conn.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(
            Duration::from_secs(2),
            conn.send(&Frame::Text("not blocked".into())),
        )
        .await
        .expect("send should not wait for the reader")
        .expect("send should succeed");

        let msg = client.next().await.unwrap().unwrap();
        assert!(matches!(&msg, Message::Text(t) if t.as_str() == "not blocked"));

        client.send(Message::Close(None)).await.unwrap();
        let read = reader.await.expect("reader task").expect("recv ok");
        assert!(read.is_none());
    }

    #[tokio::test]
    async fn test_close_ends_client_stream() {
        let (conn, _, mut client) = connected_pair("/").await;

        conn.close().await.expect("close should succeed");

        let msg = client.next().await;
        assert!(
            matches!(msg, Some(Ok(Message::Close(_))) | None),
            "client should observe the close"
        );
    }

    #[tokio::test]
    async fn test_send_after_close_reports_connection_closed() {
        let (conn, _, _client) = connected_pair("/").await;

        conn.close().await.expect("close should succeed");
        let result = conn.send(&Frame::Text("too late".into())).await;

        assert!(
            matches!(
                result,
                Err(dropcast_transport::TransportError::ConnectionClosed(_))
            ),
            "got {result:?}"
        );
    }

    #[tokio::test]
    async fn test_upgrade_times_out_without_handshake() {
        let transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("local addr");

        // Plain TCP connection that never sends an HTTP request.
        let _raw = tokio::net::TcpStream::connect(addr).await.unwrap();
        let pending = transport.accept().await.expect("should accept");
        let result = pending.upgrade(Duration::from_millis(50)).await;
        assert!(matches!(
            result,
            Err(dropcast_transport::TransportError::Timeout(_))
        ));
    }
}

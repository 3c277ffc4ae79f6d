//! Integration tests for the WebSocket client transport.
//!
//! These tests spin up a real `tokio-tungstenite` server on an OS-assigned
//! port and dial it with [`WebSocketConnector`], so bytes actually cross a
//! socket.

#[cfg(feature = "websocket")]
mod websocket {
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use rollsync_transport::{
        Connection, Connector, TransportError, WebSocketConnector,
    };
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    /// Binds a listener on a random port and returns it with its `ws://` URL.
    async fn bind_server() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = listener.local_addr().expect("should have addr");
        (listener, format!("ws://{addr}"))
    }

    #[tokio::test]
    async fn test_connect_send_and_receive_text_frames() {
        let (listener, url) = bind_server().await;

        // Server: echo the first frame back with a prefix, then close.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let msg = ws.next().await.unwrap().unwrap();
            assert!(msg.is_text(), "JSON payloads should travel as text");
            let text = msg.into_text().unwrap();
            let reply = format!("echo:{}", text.as_str());
            ws.send(Message::text(reply)).await.unwrap();
        });

        let conn = WebSocketConnector::new(url)
            .connect()
            .await
            .expect("client should connect");
        assert!(conn.id().into_inner() > 0);

        conn.send(br#"{"jsonrpc":"2.0","id":1,"method":"getSlot"}"#)
            .await
            .expect("send should succeed");

        let received = conn
            .recv()
            .await
            .expect("recv should succeed")
            .expect("should have data");
        assert_eq!(
            received,
            br#"echo:{"jsonrpc":"2.0","id":1,"method":"getSlot"}"#.to_vec()
        );

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_recv_returns_none_when_server_closes() {
        let (listener, url) = bind_server().await;

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Close(None)).await.unwrap();
        });

        let conn = WebSocketConnector::new(url).connect().await.unwrap();
        let result = conn.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on server close");
    }

    #[tokio::test]
    async fn test_connect_refused_returns_connect_failed() {
        // Bind then drop so the port is almost certainly closed.
        let (listener, url) = bind_server().await;
        drop(listener);

        let result = WebSocketConnector::new(url.clone())
            .with_connect_timeout(Duration::from_secs(2))
            .connect()
            .await;

        match result {
            Err(TransportError::ConnectFailed { url: dialed, .. }) => {
                assert_eq!(dialed, url);
            }
            Err(other) => panic!("expected ConnectFailed, got {other}"),
            Ok(_) => panic!("connect to a closed port should fail"),
        }
    }

    #[tokio::test]
    async fn test_each_connection_gets_a_fresh_id() {
        let (listener, url) = bind_server().await;

        tokio::spawn(async move {
            for _ in 0..2 {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let mut ws =
                        tokio_tungstenite::accept_async(stream).await.unwrap();
                    while ws.next().await.is_some() {}
                });
            }
        });

        let connector = WebSocketConnector::new(url);
        let first = connector.connect().await.unwrap();
        let second = connector.connect().await.unwrap();
        assert_ne!(first.id(), second.id());
        assert!(connector.endpoint().starts_with("ws://127.0.0.1:"));
    }
}

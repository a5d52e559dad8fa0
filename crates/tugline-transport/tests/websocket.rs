//! Integration tests for the WebSocket transport.
//!
//! These spin up a real listener and client so the upgrade-path session
//! binding and frame flow are verified over an actual socket.

#[cfg(feature = "websocket")]
mod websocket {
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::Message;
    use tugline_protocol::SessionId;
    use tugline_transport::{Connection, Transport, WebSocketTransport};

    type ClientWs = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn bind() -> (WebSocketTransport, String) {
        let transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("local addr").to_string();
        (transport, addr)
    }

    async fn connect_client(addr: &str, session_id: SessionId) -> ClientWs {
        let url = format!("ws://{addr}/api/v1/sessions/{}/ws", session_id.0);
        let (ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("client should connect");
        ws
    }

    #[tokio::test]
    async fn test_accept_binds_the_connection_to_its_session() {
        let (mut transport, addr) = bind().await;
        let session_id = SessionId::new();

        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });
        let _client = connect_client(&addr, session_id).await;
        let conn = server_handle.await.expect("accept task");

        assert_eq!(conn.session_id(), session_id);
        assert!(conn.id().into_inner() > 0);
    }

    #[tokio::test]
    async fn test_text_frames_flow_both_ways() {
        let (mut transport, addr) = bind().await;
        let session_id = SessionId::new();

        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });
        let mut client = connect_client(&addr, session_id).await;
        let conn = server_handle.await.expect("accept task");

        conn.send(r#"{"type":"PONG"}"#).await.expect("server send");
        let msg = client.next().await.unwrap().unwrap();
        assert_eq!(msg.into_text().unwrap().as_str(), r#"{"type":"PONG"}"#);

        client
            .send(Message::text(r#"{"type":"PING"}"#))
            .await
            .unwrap();
        let received = conn.recv().await.expect("recv").expect("frame");
        assert_eq!(received, r#"{"type":"PING"}"#);
    }

    #[tokio::test]
    async fn test_bad_upgrade_path_is_rejected_before_frames() {
        let (mut transport, addr) = bind().await;

        let server_handle =
            tokio::spawn(async move { transport.accept().await });

        let url = format!("ws://{addr}/somewhere/else");
        let result = tokio_tungstenite::connect_async(&url).await;
        assert!(result.is_err(), "client upgrade must fail");

        let accept = server_handle.await.expect("accept task");
        assert!(accept.is_err(), "server must reject the upgrade");
    }

    #[tokio::test]
    async fn test_recv_returns_none_on_client_close() {
        let (mut transport, addr) = bind().await;
        let session_id = SessionId::new();

        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });
        let mut client = connect_client(&addr, session_id).await;
        let conn = server_handle.await.expect("accept task");

        client.send(Message::Close(None)).await.unwrap();
        let result = conn.recv().await.expect("recv should not error");
        assert!(result.is_none(), "clean close surfaces as None");
    }

    #[tokio::test]
    async fn test_close_with_code_reaches_the_client() {
        let (mut transport, addr) = bind().await;
        let session_id = SessionId::new();

        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });
        let mut client = connect_client(&addr, session_id).await;
        let conn = server_handle.await.expect("accept task");

        conn.close_with(1008, "kicked").await.expect("close");

        let msg = client.next().await.unwrap().unwrap();
        match msg {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, CloseCode::Policy);
                assert_eq!(frame.reason.as_str(), "kicked");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_while_recv_is_parked_does_not_deadlock() {
        let (mut transport, addr) = bind().await;
        let session_id = SessionId::new();

        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });
        let mut client = connect_client(&addr, session_id).await;
        let conn = server_handle.await.expect("accept task");

        // Park one clone on recv while the other sends.
        let reader = conn.clone();
        let recv_handle = tokio::spawn(async move { reader.recv().await });

        conn.send("still alive").await.expect("send during recv");
        let msg = client.next().await.unwrap().unwrap();
        assert_eq!(msg.into_text().unwrap().as_str(), "still alive");

        client.send(Message::text("done")).await.unwrap();
        let received = recv_handle.await.unwrap().unwrap();
        assert_eq!(received.as_deref(), Some("done"));
    }
}

use futures::{SinkExt, StreamExt};
use retrace_engine::config::RecorderConfig;
use retrace_engine::protocol::{ActionKind, ServerMessage};
use retrace_engine::recorder::Recorder;
use retrace_engine::service::RecorderService;
use retrace_r::server::RemoteServer;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect_simulated_client(port: u16) -> Client {
    let url = format!("ws://127.0.0.1:{}", port);
    for _ in 0..10 {
        if let Ok((ws_stream, _)) = connect_async(&url).await {
            return ws_stream;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Failed to connect to server");
}

async fn send(client: &mut Client, json: &str) {
    client
        .send(Message::Text(json.to_string()))
        .await
        .expect("Failed to send");
}

async fn recv(client: &mut Client) -> ServerMessage {
    let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("Timed out waiting for reply")
        .expect("Stream ended")
        .expect("WS error");
    serde_json::from_str(&msg.to_string()).expect("Failed to deserialize reply")
}

#[tokio::test]
async fn test_remote_recording_session() {
    let (service, handle) = RecorderService::new(
        Recorder::new(&RecorderConfig::default()),
        Duration::from_millis(700),
    );
    let _task = service.spawn();
    let server = RemoteServer::new(0)
        .start(handle)
        .await
        .expect("Failed to start server");
    let mut client = connect_simulated_client(server.local_addr.port()).await;

    send(&mut client, r#"{"kind":"command","id":1,"cmd":"START"}"#).await;
    match recv(&mut client).await {
        ServerMessage::Response { id, response } => {
            assert_eq!(id, Some(1));
            assert!(response.ok);
            assert_eq!(response.active, Some(true));
        }
        other => panic!("Unexpected reply: {:?}", other),
    }

    // Events are fire-and-forget; the next command observes them in order.
    send(
        &mut client,
        r#"{"kind":"event","event":{"event":"click","target":[{"tag":"BUTTON","id":"save"},{"tag":"BODY","is_body":true}]}}"#,
    )
    .await;
    send(&mut client, r#"{"kind":"command","id":2,"cmd":"GET_ALL"}"#).await;
    match recv(&mut client).await {
        ServerMessage::Response { id, response } => {
            assert_eq!(id, Some(2));
            let actions = response.actions.expect("actions");
            assert_eq!(actions.len(), 1);
            assert_eq!(actions[0].kind(), ActionKind::Click);
            assert_eq!(actions[0].selector(), Some("#save"));
        }
        other => panic!("Unexpected reply: {:?}", other),
    }

    server.shutdown();
}

#[tokio::test]
async fn test_malformed_message_gets_error_reply() {
    let (service, handle) = RecorderService::new(
        Recorder::new(&RecorderConfig::default()),
        Duration::from_millis(700),
    );
    let _task = service.spawn();
    let server = RemoteServer::new(0)
        .start(handle)
        .await
        .expect("Failed to start server");
    let mut client = connect_simulated_client(server.local_addr.port()).await;

    send(&mut client, r#"{"kind":"command","cmd":"REWIND"}"#).await;
    match recv(&mut client).await {
        ServerMessage::Error { message } => assert!(message.starts_with("invalid message")),
        other => panic!("Unexpected reply: {:?}", other),
    }

    // The connection stays usable after a bad message.
    send(&mut client, r#"{"kind":"command","cmd":"STOP"}"#).await;
    match recv(&mut client).await {
        ServerMessage::Response { id, response } => {
            assert_eq!(id, None);
            assert!(response.ok);
            assert_eq!(response.active, Some(false));
        }
        other => panic!("Unexpected reply: {:?}", other),
    }

    server.shutdown();
}

#[tokio::test]
async fn test_shutdown_releases_recorder() {
    let (service, handle) = RecorderService::new(
        Recorder::new(&RecorderConfig::default()),
        Duration::from_millis(700),
    );
    let task = service.spawn();
    let server = RemoteServer::new(0)
        .start(handle.clone())
        .await
        .expect("Failed to start server");
    let mut client = connect_simulated_client(server.local_addr.port()).await;

    send(&mut client, r#"{"kind":"command","id":7,"cmd":"START"}"#).await;
    assert!(matches!(
        recv(&mut client).await,
        ServerMessage::Response { id: Some(7), .. }
    ));

    server.shutdown();
    drop(handle);

    // Once the connection and accept loop let go of their handles the
    // service winds down and returns the recorder.
    let recorder = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("Service did not stop")
        .unwrap();
    assert!(recorder.is_active());
}

//! WebSocket bridge for page hosts that live outside this process, such as a
//! browser extension. Hosts stream page events and control commands as
//! `ClientMessage` JSON; command replies come back as `ServerMessage`.

use futures::{SinkExt, StreamExt};
use retrace_engine::protocol::{ClientMessage, ServerMessage};
use retrace_engine::service::RecorderHandle;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

pub const DEFAULT_PORT: u16 = 9031;

#[derive(Clone)]
pub struct RemoteServer {
    port: u16,
}

pub struct ServerHandle {
    pub local_addr: SocketAddr,
    task: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl ServerHandle {
    /// Stop accepting and close every open connection, releasing their
    /// recorder handles.
    pub fn shutdown(self) {
        self.task.abort();
        let _ = self.shutdown_tx.send(true);
    }
}

impl RemoteServer {
    /// Port 0 picks a free port; read it back from `ServerHandle::local_addr`.
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn start(&self, recorder: RecorderHandle) -> Result<ServerHandle, std::io::Error> {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Remote server listening on: {}", local_addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            info!("Server accept loop started");
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        info!("Accepted TCP connection from: {}", peer);
                        tokio::spawn(accept_connection(
                            stream,
                            recorder.clone(),
                            shutdown_rx.clone(),
                        ));
                    }
                    Err(e) => {
                        error!("Accept failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(ServerHandle {
            local_addr,
            task,
            shutdown_tx,
        })
    }
}

async fn accept_connection(
    stream: TcpStream,
    recorder: RecorderHandle,
    mut shutdown: watch::Receiver<bool>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("Error during the websocket handshake occurred: {}", e);
            return;
        }
    };

    info!("New WebSocket connection: established");
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        let msg = tokio::select! {
            msg = ws_receiver.next() => match msg {
                Some(msg) => msg,
                None => break,
            },
            _ = shutdown.changed() => {
                info!("Server shutting down; closing connection");
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        };
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                info!("WebSocket closed");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
        };

        let reply = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Event { event }) => {
                debug!("Remote page event: {:?}", event);
                if recorder.emit(event).await.is_err() {
                    warn!("Recorder service is gone; closing connection");
                    break;
                }
                None
            }
            Ok(ClientMessage::Command { id, cmd }) => match recorder.send(cmd).await {
                Ok(response) => Some(ServerMessage::Response { id, response }),
                Err(e) => Some(ServerMessage::Error {
                    message: e.to_string(),
                }),
            },
            Err(e) => {
                warn!("Failed to parse client message: {} | Text: {}", e, text);
                Some(ServerMessage::Error {
                    message: format!("invalid message: {}", e),
                })
            }
        };

        let Some(reply) = reply else { continue };
        let json = match serde_json::to_string(&reply) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize reply: {}", e);
                continue;
            }
        };
        if let Err(e) = ws_sender.send(Message::Text(json)).await {
            error!("Failed to send message to WS: {}", e);
            break;
        }
    }
}

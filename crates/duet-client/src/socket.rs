use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use duet_types::events::{GatewayCommand, GatewayEvent};

use crate::error::ClientError;

/// Cloneable handle for emitting commands on the live socket.
#[derive(Clone)]
pub struct SocketSender(mpsc::UnboundedSender<GatewayCommand>);

impl SocketSender {
    /// Best effort: returns false once the socket is gone.
    pub fn send(&self, cmd: GatewayCommand) -> bool {
        self.0.send(cmd).is_ok()
    }
}

/// A live gateway connection. Events are read from [`Socket::take_events`].
pub struct Socket {
    commands: SocketSender,
    events: Option<mpsc::UnboundedReceiver<GatewayEvent>>,
    task: JoinHandle<()>,
}

/// `http://host` -> `ws://host/ws?token=...`
pub fn gateway_url(base_url: &str, token: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!("{}/ws?token={}", ws_base, token)
}

impl Socket {
    pub async fn connect(base_url: &str, token: &str) -> Result<Self, ClientError> {
        let (stream, _) = connect_async(gateway_url(base_url, token)).await?;
        let (mut sink, mut source) = stream.split();
        info!("Connected to gateway at {}", base_url);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<GatewayCommand>();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = source.next() => {
                        let text = match frame {
                            Some(Ok(Message::Text(text))) => text,
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => {
                                warn!("Gateway read error: {}", e);
                                break;
                            }
                        };
                        match serde_json::from_str::<GatewayEvent>(text.as_str()) {
                            Ok(event) => {
                                if event_tx.send(event).is_err() {
                                    break;
                                }
                            }
                            Err(e) => debug!("Ignoring unknown gateway frame: {}", e),
                        }
                    }
                    cmd = cmd_rx.recv() => {
                        let Some(cmd) = cmd else { break };
                        let text = match serde_json::to_string(&cmd) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("Failed to encode command: {}", e);
                                continue;
                            }
                        };
                        if sink.send(Message::text(text)).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = sink.close().await;
            info!("Gateway connection closed");
        });

        Ok(Self {
            commands: SocketSender(cmd_tx),
            events: Some(event_rx),
            task,
        })
    }

    pub fn sender(&self) -> SocketSender {
        self.commands.clone()
    }

    /// The event stream; can be taken once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<GatewayEvent>> {
        self.events.take()
    }

    pub fn disconnect(self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_url_swaps_scheme() {
        assert_eq!(gateway_url("http://localhost:5000/", "t"), "ws://localhost:5000/ws?token=t");
        assert_eq!(gateway_url("https://chat.example", "t"), "wss://chat.example/ws?token=t");
    }
}

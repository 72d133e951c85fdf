use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use duet_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::{Delivery, Dispatcher};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive a WebSocket whose token was already validated at the HTTP upgrade.
///
/// Registers the user in the presence map for the lifetime of the socket,
/// forwards broadcasts and targeted events out, and reads client commands in.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, user_id: Uuid) {
    let (sender, receiver) = socket.split();

    // Subscribe before registering so this client also sees its own online list.
    let broadcast_rx = dispatcher.subscribe();
    let (handle, user_rx) = dispatcher.connect(user_id).await;
    info!("{} connected to gateway", user_id);

    let pong_received = Arc::new(AtomicBool::new(true));

    let mut send_task = tokio::spawn(write_loop(sender, broadcast_rx, user_rx, pong_received.clone()));

    let dispatcher_recv = dispatcher.clone();
    let mut recv_task = tokio::spawn(read_loop(receiver, dispatcher_recv, user_id, pong_received));

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.disconnect(user_id, handle.conn_id).await;
    info!("{} disconnected from gateway", user_id);
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut broadcast_rx: tokio::sync::broadcast::Receiver<GatewayEvent>,
    mut user_rx: tokio::sync::mpsc::UnboundedReceiver<GatewayEvent>,
    pong_received: Arc<AtomicBool>,
) {
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        let event = tokio::select! {
            result = broadcast_rx.recv() => match result {
                Ok(event) => event,
                Err(RecvError::Lagged(n)) => {
                    warn!("Broadcast receiver lagged by {} messages", n);
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
            result = user_rx.recv() => match result {
                Some(event) => event,
                None => break,
            },
            _ = heartbeat.tick() => {
                if pong_received.swap(false, Ordering::Acquire) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break;
                    }
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode gateway event: {}", e);
                continue;
            }
        };
        if sender.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
}

async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    dispatcher: Dispatcher,
    user_id: Uuid,
    pong_received: Arc<AtomicBool>,
) {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                Ok(cmd) => handle_command(&dispatcher, user_id, cmd).await,
                Err(e) => {
                    warn!(
                        "{} bad command: {} -- raw: {}",
                        user_id,
                        e,
                        text.chars().take(200).collect::<String>()
                    );
                }
            },
            Message::Pong(_) => {
                pong_received.store(true, Ordering::Release);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

async fn handle_command(dispatcher: &Dispatcher, user_id: Uuid, cmd: GatewayCommand) {
    match cmd {
        GatewayCommand::DeleteMessage { message_id, receiver_id } => {
            match dispatcher.relay_delete_notice(user_id, message_id, receiver_id).await {
                Some(Delivery::Delivered) => {}
                Some(Delivery::Offline) => {
                    debug!("{} delete notice for {} dropped, {} offline", user_id, message_id, receiver_id);
                }
                None => {
                    warn!(
                        "{} sent a delete notice for {} to {} that matches none of their deletions",
                        user_id, message_id, receiver_id
                    );
                }
            }
        }
    }
}

use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::chat::model::UserId;
use crate::config::ChatConfig;
use crate::ws::connection::{ConnectionHandle, Role};
use crate::ws::hub::HubHandle;
use crate::ws::protocol::{ProtocolError, ServerFrame, ServerResponse};

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, drains the bounded outbound queue and sends
///   keepalive pings
/// - Reader loop: forwards inbound text frames to the hub, enforces the pong
///   deadline
///
/// Whichever half stops first cancels the connection's shutdown token, which
/// stops the other. The hub is told to unregister only after both are done.
pub async fn run_connection(
    socket: WebSocket,
    hub: HubHandle,
    user_id: UserId,
    role: Role,
    chat: ChatConfig,
) {
    let (conn, rx) = ConnectionHandle::new(user_id, role, chat.outbound_queue_capacity);
    let conn_id = conn.id();
    let shutdown = conn.shutdown_token();
    let (ws_sender, ws_receiver) = socket.split();

    hub.register(conn.clone()).await;

    tracing::info!(
        user_id = user_id,
        conn = %conn_id,
        role = role.as_str(),
        "WebSocket actor started"
    );

    let writer_handle = tokio::spawn(writer_task(
        ws_sender,
        rx,
        shutdown.clone(),
        chat.ping_period(),
        chat.write_wait(),
    ));

    reader_loop(ws_receiver, &conn, &hub, chat.pong_wait()).await;

    conn.close();
    if let Err(e) = writer_handle.await {
        tracing::error!(conn = %conn_id, error = %e, "Writer task failed");
    }

    hub.unregister(conn_id, user_id).await;

    tracing::info!(user_id = user_id, conn = %conn_id, "WebSocket actor stopped");
}

/// Reader loop: exits on client close, transport error, missed pong
/// deadline, or shutdown of the connection.
async fn reader_loop(
    mut ws_receiver: SplitStream<WebSocket>,
    conn: &ConnectionHandle,
    hub: &HubHandle,
    pong_wait: Duration,
) {
    let shutdown = conn.shutdown_token();
    let conn_id = conn.id();
    let user_id = conn.user_id();
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = timeout_at(deadline, ws_receiver.next()) => next,
        };

        match next {
            Ok(Some(Ok(msg))) => match msg {
                Message::Text(text) => {
                    hub.route(conn_id, user_id, text.as_str().to_owned()).await;
                }
                Message::Binary(data) => match std::str::from_utf8(&data) {
                    Ok(text) => hub.route(conn_id, user_id, text.to_owned()).await,
                    Err(_) => {
                        conn.send(ServerResponse::error(ProtocolError::InvalidFormat.to_string()));
                    }
                },
                Message::Pong(_) => {
                    deadline = Instant::now() + pong_wait;
                }
                // Pongs to client pings are sent by the transport
                Message::Ping(_) => {}
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = user_id,
                        conn = %conn_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Ok(Some(Err(e))) => {
                tracing::warn!(
                    user_id = user_id,
                    conn = %conn_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            Ok(None) => {
                tracing::info!(user_id = user_id, conn = %conn_id, "WebSocket stream ended");
                break;
            }
            Err(_) => {
                tracing::warn!(user_id = user_id, conn = %conn_id, "Pong timeout, closing connection");
                break;
            }
        }
    }
}

/// Writer task: the only place the sink is written to and closed.
async fn writer_task(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<ServerFrame>,
    shutdown: CancellationToken,
    ping_period: Duration,
    write_wait: Duration,
) {
    let mut ping_timer = interval_at(Instant::now() + ping_period, ping_period);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                let close = Message::Close(Some(CloseFrame {
                    code: close_code::NORMAL,
                    reason: "".into(),
                }));
                let _ = timeout(write_wait, ws_sender.send(close)).await;
                break;
            }
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize outbound frame");
                        continue;
                    }
                };
                if !send_with_deadline(&mut ws_sender, Message::Text(text.into()), write_wait).await {
                    break;
                }
            }
            _ = ping_timer.tick() => {
                if !send_with_deadline(&mut ws_sender, Message::Ping(Bytes::new()), write_wait).await {
                    break;
                }
            }
        }
    }

    shutdown.cancel();
    let _ = timeout(write_wait, ws_sender.close()).await;
}

async fn send_with_deadline(
    ws_sender: &mut SplitSink<WebSocket, Message>,
    msg: Message,
    write_wait: Duration,
) -> bool {
    match timeout(write_wait, ws_sender.send(msg)).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "WebSocket send failed");
            false
        }
        Err(_) => {
            tracing::warn!("WebSocket write timed out");
            false
        }
    }
}

//! Per-connection session actor.
//!
//! Transport handshake and credential checks happen before this module runs;
//! `run_connection` takes over an authenticated socket, registers it, and
//! owns it until teardown. Registration happens once on entry and
//! unregistration exactly once on the way out, whatever triggered the close.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, timeout, Instant};

use gather_wire::{ClientFrame, PushPayload};

use crate::chat;
use crate::state::AppState;
use crate::ws::ConnectionEntry;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Close code for a connection that stopped answering pings.
const CLOSE_GOING_AWAY: u16 = 1001;

/// Drive one authenticated socket until it closes.
///
/// The socket splits into halves: a spawned writer task owns the sink and
/// drains the connection's mpsc queue, so the dispatcher, the heartbeat,
/// and this actor all share one ordered path to the client. The read half
/// stays here, multiplexed with the ping schedule.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: String) {
    let (ws_sink, mut ws_stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    let entry = ConnectionEntry::new(tx.clone());
    let conn_id = entry.conn_id;
    state.registry.register(&user_id, entry.clone());

    // First frame on every connection: confirm the session
    queue_payload(
        &tx,
        &PushPayload::AuthSuccess {
            user_id: user_id.clone(),
        },
    );

    tracing::info!(user_id = %user_id, conn_id = %conn_id, "WebSocket session active");

    let mut writer = tokio::spawn(drain_to_sink(ws_sink, rx));

    let mut ping_timer = interval(PING_INTERVAL);
    ping_timer.tick().await; // consume the immediate first tick

    // While Some, a ping is outstanding and the pong must arrive by then
    let mut pong_due: Option<Instant> = None;

    loop {
        tokio::select! {
            incoming = ws_stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle_text_frame(text.as_str(), &state, &user_id).await;
                }
                Some(Ok(Message::Pong(_))) => {
                    entry.touch();
                    pong_due = None;
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = tx.send(Message::Pong(data));
                }
                Some(Ok(Message::Binary(_))) => {
                    // JSON-over-text channel; drop the frame, keep the session
                    tracing::debug!(user_id = %user_id, "Ignoring unexpected binary frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(user_id = %user_id, reason = ?frame, "Client initiated close");
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!(user_id = %user_id, error = %e, "WebSocket receive error");
                    break;
                }
                None => {
                    tracing::info!(user_id = %user_id, "WebSocket stream ended");
                    break;
                }
            },

            _ = ping_timer.tick() => {
                if tx.send(Message::Ping(vec![0x67].into())).is_err() {
                    // Writer gone, nothing left to keep alive
                    break;
                }
                if pong_due.is_none() {
                    pong_due = Some(Instant::now() + PONG_TIMEOUT);
                }
            }

            _ = wait_for_deadline(pong_due) => {
                tracing::warn!(user_id = %user_id, conn_id = %conn_id, "Pong timeout, closing");
                let _ = tx.send(Message::Close(Some(CloseFrame {
                    code: CLOSE_GOING_AWAY,
                    reason: "Pong timeout".into(),
                })));
                break;
            }
        }
    }

    // Closing: unregister, then drop every sender so the writer drains what
    // is still queued (a pong-timeout close frame included) and exits on its
    // own. Abort only if the peer stalls the flush.
    state.registry.unregister(&user_id, conn_id);
    drop(entry);
    drop(tx);
    if timeout(Duration::from_secs(1), &mut writer).await.is_err() {
        writer.abort();
    }
    tracing::info!(user_id = %user_id, conn_id = %conn_id, "WebSocket session closed");
}

/// Pends forever while no pong is outstanding.
async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Parse and apply one inbound frame. Malformed input is logged and
/// dropped; one bad frame must not take the session down.
async fn handle_text_frame(text: &str, state: &AppState, user_id: &str) {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                error = %e,
                "Discarding malformed client frame: {}",
                text.chars().take(100).collect::<String>()
            );
            return;
        }
    };

    match frame {
        ClientFrame::MarkRead { conversation_id } => {
            if let Err(status) =
                chat::messages::mark_conversation_read(state, user_id, &conversation_id).await
            {
                tracing::warn!(
                    user_id = %user_id,
                    conversation_id = %conversation_id,
                    status = %status,
                    "mark_read frame failed"
                );
            }
        }
    }
}

/// Writer half: forwards the connection's queue to the sink in order, and
/// exits once every sender is gone and the queue is drained.
async fn drain_to_sink<S>(mut sink: S, mut rx: mpsc::UnboundedReceiver<Message>)
where
    S: Sink<Message> + Unpin,
{
    while let Some(msg) = rx.recv().await {
        if sink.send(msg).await.is_err() {
            break;
        }
    }
}

/// Queue a payload on this connection's send queue.
fn queue_payload(tx: &mpsc::UnboundedSender<Message>, payload: &PushPayload) {
    if let Ok(text) = serde_json::to_string(payload) {
        let _ = tx.send(Message::Text(text.into()));
    }
}

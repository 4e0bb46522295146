use std::borrow::Cow;
use std::fmt::Display;
use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        ConnectInfo, Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{stream::SplitStream, Sink, SinkExt, StreamExt};
use metrics::{counter, gauge};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::connection::{CloseReason, Connection};
use crate::error::RelayError;
use crate::lifecycle::{self, ConnectionResources};
use crate::relay::{self, RelayOutcome};
use crate::signaling::SignalMessage;
use crate::{keepalive, presence, AppState};

/// WebSocket upgrade handler for `/{room_id}/{user_id}`.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    Path((room_id, user_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    if room_id.is_empty() || user_id.is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, room_id, user_id, state, remote_addr))
}

async fn handle_socket(
    socket: WebSocket,
    room_id: String,
    user_id: String,
    state: AppState,
    remote_addr: SocketAddr,
) {
    // Split the socket so the writer task owns the sending half
    let (sink, mut stream) = socket.split();
    let (conn, outbound) = Connection::new(
        room_id,
        user_id,
        Some(remote_addr),
        state.relay.outbound_buffer,
    );
    let writer = spawn_writer(conn.clone(), sink, outbound);

    // Announce to the room and take the slot, evicting any previous occupant
    let joined = presence::join(&state.registry, conn.clone());
    counter!("beach_pier_connections_total", 1);
    gauge!(
        "beach_pier_connections_active",
        state.registry.connection_count() as f64
    );
    info!(
        room_id = %conn.room_id(),
        user_id = %conn.user_id(),
        connection_id = %conn.id(),
        remote_addr = %remote_addr,
        notified = joined.notified,
        replaced = joined.evicted.is_some(),
        "connection joined"
    );

    let keepalive = keepalive::spawn(conn.clone(), state.relay.keepalive_interval);

    let reason = read_frames(&state, &conn, &mut stream).await;
    drop(stream);

    // Release the slot and stop per-connection tasks

    lifecycle::release(
        &state.registry,
        ConnectionResources {
            connection: conn,
            keepalive,
            writer: Some(writer),
        },
        reason,
    )
    .await;
}

/// Reads frames until the client goes away or the connection is closed
/// locally, and returns why it stopped.
async fn read_frames(
    state: &AppState,
    conn: &Connection,
    stream: &mut SplitStream<WebSocket>,
) -> CloseReason {
    loop {
        // A local close wins over any frame already buffered on the socket
        let frame = tokio::select! {
            biased;
            () = conn.closed() => {
                return conn.close_reason().unwrap_or(CloseReason::RemoteClosed);
            }
            frame = stream.next() => frame,
        };

        match frame {
            None => return CloseReason::RemoteClosed,
            Some(Err(err)) => {
                warn!(
                    room_id = %conn.room_id(),
                    user_id = %conn.user_id(),
                    error = %err,
                    "websocket receive failed"
                );
                return CloseReason::TransportError;
            }
            Some(Ok(Message::Close(frame))) => {
                debug!(
                    room_id = %conn.room_id(),
                    user_id = %conn.user_id(),
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "client closed websocket"
                );
                return CloseReason::RemoteClosed;
            }
            Some(Ok(Message::Text(text))) => dispatch(state, conn, &text),
            // Browsers occasionally send JSON as binary
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => dispatch(state, conn, &text),
                Err(_) => record_drop(
                    conn,
                    &RelayError::Malformed("binary frame is not UTF-8".into()),
                ),
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
        }
    }
}

fn dispatch(state: &AppState, conn: &Connection, text: &str) {
    match relay::handle_text(&state.registry, conn, text) {
        Ok(RelayOutcome::Delivered { kind, target }) => {
            counter!("beach_pier_messages_relayed_total", 1, "event" => kind.as_str());
            debug!(
                room_id = %conn.room_id(),
                user_id = %conn.user_id(),
                target = %target,
                event = kind.as_str(),
                "relayed negotiation message"
            );
        }
        Ok(RelayOutcome::Ignored { event }) => {
            debug!(
                room_id = %conn.room_id(),
                user_id = %conn.user_id(),
                event = %event,
                "ignoring unrecognized event"
            );
        }
        Err(err) => record_drop(conn, &err),
    }
}

fn record_drop(conn: &Connection, err: &RelayError) {
    counter!("beach_pier_messages_dropped_total", 1, "reason" => err.reason());
    warn!(
        room_id = %conn.room_id(),
        user_id = %conn.user_id(),
        error = %err,
        "dropping inbound message"
    );
}

/// Drains the connection's outbound queue into text frames. Once the
/// connection is closed it sends a close frame and exits.
fn spawn_writer<S>(
    conn: Connection,
    mut sink: S,
    mut outbound: mpsc::Receiver<SignalMessage>,
) -> JoinHandle<()>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                message = outbound.recv() => {
                    let Some(message) = message else { break };
                    let json = match serde_json::to_string(&message) {
                        Ok(json) => json,
                        Err(err) => {
                            warn!(error = %err, event = message.event(), "failed to encode message");
                            continue;
                        }
                    };
                    if let Err(err) = sink.send(Message::Text(json)).await {
                        debug!(
                            room_id = %conn.room_id(),
                            user_id = %conn.user_id(),
                            error = %err,
                            "websocket send failed"
                        );
                        conn.close(CloseReason::TransportError);
                        return;
                    }
                }
                () = conn.closed() => break,
            }
        }

        // Best effort; the peer may already be gone
        let reason = conn.close_reason().unwrap_or(CloseReason::RemoteClosed);
        let _ = sink.send(Message::Close(Some(close_frame(reason)))).await;
        debug!(
            room_id = %conn.room_id(),
            user_id = %conn.user_id(),
            connection_id = %conn.id(),
            "writer task finished"
        );
    })
}

fn close_frame(reason: CloseReason) -> CloseFrame<'static> {
    let (code, text) = match reason {
        CloseReason::Replaced => (close_code::POLICY, "replaced by a newer connection"),
        CloseReason::Shutdown => (close_code::AWAY, "server shutting down"),
        CloseReason::RemoteClosed | CloseReason::TransportError => (close_code::NORMAL, ""),
    };
    CloseFrame {
        code,
        reason: Cow::Borrowed(text),
    }
}

//! Per-connection WebSocket task.
//!
//! Each accepted socket runs one task that owns both directions: inbound
//! frames are parsed and forwarded into the session actor's mailbox,
//! outbound frames arrive on a per-connection channel and are written to
//! the socket. The session actor force-closes a connection (rejection,
//! meeting end, slow consumer) by cancelling its token.
//!
//! A connection is anonymous until its first successful `join`; everything
//! else it sends before that is dropped. A no-host refusal produces one
//! `error` frame and leaves the socket open so the client can retry.

use axum::extract::ws::{Message, WebSocket};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actors::messages::{JoinRequest, SessionLink, SessionMessage};
use crate::actors::registry::SessionRegistryHandle;
use crate::protocol::{ClientFrame, Role, ServerFrame};

/// Drive one WebSocket for its whole life.
pub async fn handle_socket(
    socket: WebSocket,
    registry: SessionRegistryHandle,
    outbound_buffer: usize,
) {
    let metrics = registry.metrics();
    metrics.connection_opened();
    run_socket(socket, registry, outbound_buffer).await;
    metrics.connection_closed();
}

async fn run_socket(mut socket: WebSocket, registry: SessionRegistryHandle, outbound_buffer: usize) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    debug!(
        target: "relay.ws",
        connection_id = %connection_id,
        "WebSocket connected"
    );

    let Some(joined) = join_phase(&mut socket, &registry, &connection_id, outbound_buffer).await
    else {
        debug!(
            target: "relay.ws",
            connection_id = %connection_id,
            "WebSocket closed before joining a session"
        );
        return;
    };

    let Joined {
        session: link,
        user_id,
        mut outbound,
        cancel,
    } = joined;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!(
                    target: "relay.ws",
                    connection_id = %connection_id,
                    user_id = %user_id,
                    "Connection force-closed by session"
                );
                let _ = socket.send(Message::Close(None)).await;
                break;
            }

            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if !write_frame(&mut socket, &frame).await {
                    break;
                }
            }

            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Some(frame) = parse_client_frame(&text) else { continue };
                        if matches!(frame, ClientFrame::Join { .. }) {
                            // Already joined; a repeat join on the same
                            // socket is a no-op.
                            continue;
                        }
                        let sent = link
                            .sender
                            .send(SessionMessage::ClientFrame {
                                connection_id: connection_id.clone(),
                                frame,
                            })
                            .await;
                        if sent.is_err() {
                            // Session is gone; nothing left to relay.
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary/ping/pong: ignored
                    Some(Err(e)) => {
                        debug!(
                            target: "relay.ws",
                            connection_id = %connection_id,
                            error = %e,
                            "WebSocket receive error"
                        );
                        break;
                    }
                }
            }
        }
    }

    let _ = link
        .sender
        .send(SessionMessage::Disconnected {
            connection_id: connection_id.clone(),
        })
        .await;

    info!(
        target: "relay.ws",
        connection_id = %connection_id,
        user_id = %user_id,
        "WebSocket disconnected"
    );
}

struct Joined {
    session: SessionLink,
    user_id: String,
    outbound: mpsc::Receiver<ServerFrame>,
    cancel: CancellationToken,
}

/// Read frames until a `join` succeeds. Non-join frames are dropped, a
/// refused join gets an `error` frame and another chance. Returns `None`
/// when the socket closes first.
async fn join_phase(
    socket: &mut WebSocket,
    registry: &SessionRegistryHandle,
    connection_id: &str,
    outbound_buffer: usize,
) -> Option<Joined> {
    loop {
        let text = match socket.recv().await? {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(e) => {
                debug!(
                    target: "relay.ws",
                    connection_id = %connection_id,
                    error = %e,
                    "WebSocket receive error before join"
                );
                return None;
            }
        };

        let Some(frame) = parse_client_frame(&text) else {
            continue;
        };
        let kind = frame.kind();
        let ClientFrame::Join {
            session_id,
            user_id,
            user_role,
            user_name,
            is_whiteboard_mode,
        } = frame
        else {
            debug!(
                target: "relay.ws",
                connection_id = %connection_id,
                frame = kind,
                "Dropping pre-join frame"
            );
            continue;
        };

        let link = match registry.get_or_create_session(session_id).await {
            Ok(link) => link,
            Err(e) => {
                warn!(
                    target: "relay.ws",
                    connection_id = %connection_id,
                    error = %e,
                    "Failed to resolve session"
                );
                return None;
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_buffer);
        let cancel = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        let request = JoinRequest {
            connection_id: connection_id.to_string(),
            user_id,
            user_name,
            role: Role::from_wire(user_role.as_deref()),
            whiteboard_mode: is_whiteboard_mode,
            outbound: outbound_tx,
            cancel: cancel.clone(),
        };
        if link
            .sender
            .send(SessionMessage::Join {
                request,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return None;
        }

        match rx.await {
            Ok(Ok(outcome)) => {
                return Some(Joined {
                    session: link,
                    user_id: outcome.user_id,
                    outbound: outbound_rx,
                    cancel,
                });
            }
            Ok(Err(refusal)) => {
                // One error frame, then the client may try again.
                let frame = ServerFrame::Error {
                    message: refusal.client_message(),
                };
                if !write_frame(socket, &frame).await {
                    return None;
                }
            }
            Err(_) => return None,
        }
    }
}

/// Serialize and write one frame. Returns false when the socket is done.
async fn write_frame(socket: &mut WebSocket, frame: &ServerFrame) -> bool {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(e) => {
            warn!(target: "relay.ws", error = %e, frame = frame.kind(), "Failed to serialize frame");
            return true;
        }
    };
    if let Err(e) = socket.send(Message::Text(text)).await {
        debug!(target: "relay.ws", error = %e, "WebSocket send failed");
        return false;
    }
    true
}

/// Parse an inbound text frame; malformed or unknown frames are dropped.
fn parse_client_frame(text: &str) -> Option<ClientFrame> {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => Some(frame),
        Err(e) => {
            debug!(target: "relay.ws", error = %e, "Dropping unparseable frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unparseable_frames_are_dropped() {
        assert!(parse_client_frame("{").is_none());
        assert!(parse_client_frame(r#"{"type":"warp-drive"}"#).is_none());
        assert!(parse_client_frame(r#"{"type":"clear","sessionId":"s"}"#).is_some());
    }
}

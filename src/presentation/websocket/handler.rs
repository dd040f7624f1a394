//! WebSocket Connection Handler
//!
//! Owns the per-connection lifecycle: admission, token authentication,
//! room registration, the event dispatch loop, and teardown. Fatal
//! errors (admission, authentication) close the socket; every other
//! error is reported to the requesting connection as a scoped `error`
//! event and the loop continues.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::messages::{parse_wire_id, ClientEvent, ServerEvent};
use super::registry::Connection;
use super::rooms::RoomKey;
use crate::application::AuthenticatedUser;
use crate::infrastructure::cache::{PresenceStatus, PresenceTracker};
use crate::infrastructure::metrics;
use crate::shared::error::GatewayError;
use crate::startup::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    token: Option<String>,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, addr.ip(), params.token, state))
}

/// Handle one WebSocket connection from upgrade to close.
async fn handle_socket(socket: WebSocket, address: IpAddr, token: Option<String>, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Outbound queue: the registry and services push ServerEvents, the
    // writer task serializes them onto the socket.
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let writer_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize outbound event");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Admission counts pre-auth, so a flood of unauthenticated upgrades
    // from one address still hits the ceiling.
    if let Err(e) = state.registry.admit(address) {
        tracing::debug!(%address, "Connection rejected by admission control");
        let _ = tx.send(ServerEvent::Error {
            message: e.to_string(),
        });
        flush_and_close(writer_task).await;
        return;
    }

    let user = match authenticate(token.as_deref(), &state).await {
        Ok(user) => user,
        Err(event) => {
            let _ = tx.send(event);
            state.registry.release_address(address);
            flush_and_close(writer_task).await;
            return;
        }
    };

    let rooms = match state.rooms.resolve(user.id).await {
        Ok(rooms) => rooms,
        Err(e) => {
            tracing::error!(user_id = user.id, error = %e, "Room resolution failed");
            let _ = tx.send(ServerEvent::Error {
                message: e.to_string(),
            });
            state.registry.release_address(address);
            flush_and_close(writer_task).await;
            return;
        }
    };

    let connection_id = Uuid::new_v4();
    let connection = Arc::new(Connection {
        id: connection_id,
        address,
        user_id: user.id,
        sender: tx.clone(),
        joined_rooms: parking_lot::Mutex::new(HashSet::new()),
        connected_at: chrono::Utc::now(),
    });

    let first_connection = state.registry.register(connection);
    metrics::GATEWAY_CONNECTIONS_ACTIVE.inc();

    let guild_rooms: Vec<RoomKey> = rooms
        .iter()
        .copied()
        .filter(|room| matches!(room, RoomKey::Guild(_)))
        .collect();
    for room in rooms {
        state.registry.join_room(connection_id, room);
    }

    let _ = tx.send(ServerEvent::Authenticated {
        user: user.profile.clone(),
    });

    if let Err(e) = state.presence.set_online(user.id).await {
        tracing::warn!(user_id = user.id, error = %e, "Failed to record online presence");
    }
    if first_connection {
        broadcast_presence(&state, &guild_rooms, user.id, PresenceStatus::Online).await;
    }

    tracing::info!(user_id = user.id, connection_id = %connection_id, "User connected");

    // Main loop. Delivery to this socket happens through the registry's
    // sender, so only inbound frames are read here.
    while let Some(frame) = ws_receiver.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_)) => continue,
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        };

        let event = match serde_json::from_str::<ClientEvent>(&text) {
            Ok(event) => event,
            Err(e) => {
                let _ = tx.send(ServerEvent::Error {
                    message: format!("invalid request: {}", e),
                });
                continue;
            }
        };

        metrics::GATEWAY_EVENTS_TOTAL
            .with_label_values(&[event.name()])
            .inc();

        if let Err(e) = dispatch_event(event, connection_id, &user, &tx, &state).await {
            let fatal = e.is_fatal();
            let _ = tx.send(ServerEvent::Error {
                message: e.to_string(),
            });
            if fatal {
                tracing::info!(connection_id = %connection_id, error = %e, "Closing connection");
                break;
            }
        }
    }

    // Teardown order matters: typing stops must broadcast while the
    // connection could still be the user's last, presence goes offline
    // only after the registry confirms it was.
    metrics::GATEWAY_CONNECTIONS_ACTIVE.dec();
    state.typing.cleanup_user(user.id).await;

    if let Some(outcome) = state.registry.unregister(connection_id) {
        if outcome.last_connection {
            if let Err(e) = state.presence.set_offline(outcome.user_id).await {
                tracing::warn!(user_id = outcome.user_id, error = %e, "Failed to record offline presence");
            }
            broadcast_presence(&state, &guild_rooms, outcome.user_id, PresenceStatus::Offline)
                .await;
        }
    }
    writer_task.abort();

    tracing::info!(user_id = user.id, connection_id = %connection_id, "User disconnected");
}

/// Resolve the presented token. Errors come back as the event to send
/// before closing.
async fn authenticate(
    token: Option<&str>,
    state: &AppState,
) -> Result<AuthenticatedUser, ServerEvent> {
    let Some(token) = token else {
        return Err(ServerEvent::AuthRequired);
    };
    match state.sessions.resolve(token).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(ServerEvent::AuthRequired),
        Err(e) => {
            tracing::error!(error = %e, "Session resolution failed");
            Err(ServerEvent::Error {
                message: "authentication unavailable".into(),
            })
        }
    }
}

async fn dispatch_event(
    event: ClientEvent,
    connection_id: Uuid,
    user: &AuthenticatedUser,
    tx: &mpsc::UnboundedSender<ServerEvent>,
    state: &AppState,
) -> Result<(), GatewayError> {
    match event {
        ClientEvent::SendMessage(payload) => {
            let message = state
                .messages
                .send(user.id, Some(connection_id), &payload)
                .await?;
            let _ = tx.send(ServerEvent::MessageSent {
                client_temp_id: payload.client_temp_id,
                message,
            });
        }

        ClientEvent::EditMessage(payload) => {
            let message_id = parse_wire_id("message_id", &payload.message_id)?;
            state.messages.edit(user.id, message_id, &payload.content).await?;
        }

        ClientEvent::DeleteMessage(payload) => {
            let message_id = parse_wire_id("message_id", &payload.message_id)?;
            state.messages.delete(user.id, message_id).await?;
        }

        ClientEvent::JoinChannel(payload) => {
            let channel_id = parse_wire_id("channel_id", &payload.channel_id)?;
            state.messages.authorize_channel(user.id, channel_id).await?;
            state
                .registry
                .join_room(connection_id, RoomKey::Channel(channel_id));
            let _ = tx.send(ServerEvent::ChannelJoined {
                channel_id: payload.channel_id,
            });
        }

        ClientEvent::LeaveChannel(payload) => {
            let channel_id = parse_wire_id("channel_id", &payload.channel_id)?;
            state
                .registry
                .leave_room(connection_id, RoomKey::Channel(channel_id));
            let _ = tx.send(ServerEvent::ChannelLeft {
                channel_id: payload.channel_id,
            });
        }

        ClientEvent::StartTyping(payload) => {
            let channel_id = parse_wire_id("channel_id", &payload.channel_id)?;
            state.messages.authorize_channel(user.id, channel_id).await?;
            state
                .typing
                .start(channel_id, user.id, user.profile.clone(), Some(connection_id))
                .await;
        }

        ClientEvent::StopTyping(payload) => {
            let channel_id = parse_wire_id("channel_id", &payload.channel_id)?;
            state.typing.stop(channel_id, user.id).await;
        }

        ClientEvent::Heartbeat => {
            // presence writes are best-effort: a store failure never
            // reaches the client or suppresses the ack
            refresh_presence(state.presence.as_ref(), user.id).await;
            let _ = tx.send(ServerEvent::HeartbeatAck);
        }

        ClientEvent::UpdatePresence(payload) => {
            let status = requested_status(payload.status)?;
            if let Err(e) = state.presence.set_status(user.id, status).await {
                tracing::warn!(user_id = user.id, error = %e, "Presence status write failed");
            }
            let guild_rooms: Vec<RoomKey> = state
                .registry
                .rooms_of(connection_id)
                .into_iter()
                .filter(|room| matches!(room, RoomKey::Guild(_)))
                .collect();
            broadcast_presence(state, &guild_rooms, user.id, status).await;
        }
    }

    Ok(())
}

/// Extend the presence TTL on heartbeat, re-announcing when the record
/// lapsed. Failures are logged and swallowed.
async fn refresh_presence(presence: &dyn PresenceTracker, user_id: i64) {
    match presence.refresh(user_id).await {
        Ok(true) => {}
        Ok(false) => {
            if let Err(e) = presence.set_online(user_id).await {
                tracing::warn!(user_id, error = %e, "Presence re-announce failed");
            }
        }
        Err(e) => tracing::warn!(user_id, error = %e, "Presence refresh failed"),
    }
}

/// Clients may request any status except offline; offline is owned by
/// the disconnect path once the last connection closes.
fn requested_status(status: PresenceStatus) -> Result<PresenceStatus, GatewayError> {
    if status == PresenceStatus::Offline {
        return Err(GatewayError::Validation(
            "offline is set when the last connection closes".into(),
        ));
    }
    Ok(status)
}

async fn broadcast_presence(
    state: &AppState,
    guild_rooms: &[RoomKey],
    user_id: i64,
    status: PresenceStatus,
) {
    // invisible users read as offline to everyone else
    let visible = match status {
        PresenceStatus::Invisible => PresenceStatus::Offline,
        other => other,
    };
    for room in guild_rooms {
        state
            .backend
            .publish(
                *room,
                ServerEvent::PresenceUpdate {
                    user_id: user_id.to_string(),
                    status: visible,
                },
                None,
            )
            .await;
    }
}

/// Give the writer a moment to drain the final event, then stop it.
async fn flush_and_close(writer_task: tokio::task::JoinHandle<()>) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    writer_task.abort();
}

//! Broadcast Backends
//!
//! Fan-out is pluggable behind `BroadcastBackend`. `LocalBroadcast`
//! dispatches straight into the connection registry; `RedisBroadcast`
//! additionally relays events over Redis pub/sub so every gateway
//! instance delivers to its own connections.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::messages::ServerEvent;
use super::registry::ConnectionRegistry;
use super::rooms::RoomKey;

/// Fan-out seam between the event producers and connection delivery.
#[async_trait]
pub trait BroadcastBackend: Send + Sync {
    /// Deliver an event to every connection in a room. `exclude` drops
    /// one local connection from delivery (echo suppression for the
    /// sender's own socket).
    async fn publish(&self, room: RoomKey, event: ServerEvent, exclude: Option<Uuid>);
}

/// Single-instance backend: direct registry dispatch.
pub struct LocalBroadcast {
    registry: Arc<ConnectionRegistry>,
}

impl LocalBroadcast {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl BroadcastBackend for LocalBroadcast {
    async fn publish(&self, room: RoomKey, event: ServerEvent, exclude: Option<Uuid>) {
        self.registry.send_to_room(&room, &event, exclude);
    }
}

/// Relay envelope carried over the Redis event channel.
#[derive(Debug, Serialize, Deserialize)]
struct RelayEnvelope {
    room: RoomKey,
    event: ServerEvent,
    exclude: Option<Uuid>,
    /// Publishing instance; subscribers skip their own envelopes since
    /// local delivery already happened at publish time.
    origin: Uuid,
}

/// Multi-instance backend: local dispatch plus a pub/sub relay.
pub struct RedisBroadcast {
    registry: Arc<ConnectionRegistry>,
    redis: ConnectionManager,
    channel: String,
    instance: Uuid,
}

impl RedisBroadcast {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        redis: ConnectionManager,
        channel: String,
        instance: Uuid,
    ) -> Self {
        Self {
            registry,
            redis,
            channel,
            instance,
        }
    }
}

#[async_trait]
impl BroadcastBackend for RedisBroadcast {
    async fn publish(&self, room: RoomKey, event: ServerEvent, exclude: Option<Uuid>) {
        // Local connections first; the relay only serves other instances.
        self.registry.send_to_room(&room, &event, exclude);

        let envelope = RelayEnvelope {
            room,
            event,
            exclude,
            origin: self.instance,
        };
        let payload = match serde_json::to_string(&envelope) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "failed to serialize relay envelope");
                return;
            }
        };

        // Relay failures degrade to local-only delivery, never to a
        // connection error.
        let mut conn = self.redis.clone();
        if let Err(e) = conn.publish::<_, _, ()>(&self.channel, payload).await {
            warn!(error = %e, room = %room, "event relay publish failed");
        }
    }
}

/// Subscriber loop for the Redis relay. Spawned once per instance at
/// startup; exits when the pub/sub connection closes.
pub async fn run_relay_subscriber(
    client: redis::Client,
    channel: String,
    registry: Arc<ConnectionRegistry>,
    instance: Uuid,
) {
    let mut pubsub = match client.get_async_pubsub().await {
        Ok(pubsub) => pubsub,
        Err(e) => {
            error!(error = %e, "failed to open relay pub/sub connection");
            return;
        }
    };
    if let Err(e) = pubsub.subscribe(&channel).await {
        error!(error = %e, channel = %channel, "failed to subscribe to relay channel");
        return;
    }

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "unreadable relay payload");
                continue;
            }
        };
        let envelope: RelayEnvelope = match serde_json::from_str(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "malformed relay envelope");
                continue;
            }
        };
        if envelope.origin == instance {
            continue;
        }
        debug!(room = %envelope.room, "delivering relayed event");
        // exclude is instance-local, never applied to relayed events
        self_deliver(&registry, envelope);
    }

    error!("relay subscriber stream ended");
}

fn self_deliver(registry: &ConnectionRegistry, envelope: RelayEnvelope) {
    registry.send_to_room(&envelope.room, &envelope.event, None);
}

/// Test double capturing published events.
#[cfg(test)]
pub(crate) struct RecordingBackend {
    pub published: parking_lot::Mutex<Vec<(RoomKey, ServerEvent, Option<Uuid>)>>,
}

#[cfg(test)]
impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            published: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn take(&self) -> Vec<(RoomKey, ServerEvent, Option<Uuid>)> {
        std::mem::take(&mut self.published.lock())
    }
}

#[cfg(test)]
#[async_trait]
impl BroadcastBackend for RecordingBackend {
    async fn publish(&self, room: RoomKey, event: ServerEvent, exclude: Option<Uuid>) {
        self.published.lock().push((room, event, exclude));
    }
}

//! Connection Registry
//!
//! Tracks live WebSocket connections, their room memberships, and the
//! per-address admission counter. All maps are DashMaps so the registry
//! is shared by `Arc` without an outer lock.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::messages::ServerEvent;
use super::rooms::RoomKey;
use crate::shared::error::GatewayError;

/// One live WebSocket connection.
pub struct Connection {
    pub id: Uuid,
    pub address: IpAddr,
    pub user_id: i64,
    /// Outbound queue drained by the connection's writer task.
    pub sender: mpsc::UnboundedSender<ServerEvent>,
    /// Rooms this connection is in; mirrors the registry's room index.
    pub joined_rooms: Mutex<HashSet<RoomKey>>,
    pub connected_at: chrono::DateTime<chrono::Utc>,
}

/// Result of removing a connection.
pub struct UnregisterOutcome {
    pub user_id: i64,
    /// True when this was the user's last connection on this instance.
    pub last_connection: bool,
}

/// Registry of live connections with admission control.
pub struct ConnectionRegistry {
    max_per_address: u32,
    connections: DashMap<Uuid, Arc<Connection>>,
    user_connections: DashMap<i64, HashSet<Uuid>>,
    address_counts: DashMap<IpAddr, u32>,
    rooms: DashMap<RoomKey, HashSet<Uuid>>,
}

impl ConnectionRegistry {
    pub fn new(max_per_address: u32) -> Self {
        Self {
            max_per_address,
            connections: DashMap::new(),
            user_connections: DashMap::new(),
            address_counts: DashMap::new(),
            rooms: DashMap::new(),
        }
    }

    /// Reserve an admission slot for an address.
    ///
    /// Counts against the per-address ceiling before any auth work
    /// happens, so one address cannot hold more than the ceiling even in
    /// pre-auth state. Call `release_address` on every failure path that
    /// follows a successful `admit`.
    pub fn admit(&self, address: IpAddr) -> Result<(), GatewayError> {
        let mut count = self.address_counts.entry(address).or_insert(0);
        if *count >= self.max_per_address {
            return Err(GatewayError::RateLimited);
        }
        *count += 1;
        Ok(())
    }

    /// Release an admission slot reserved by `admit`.
    pub fn release_address(&self, address: IpAddr) {
        if let Some(mut count) = self.address_counts.get_mut(&address) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                drop(count);
                self.address_counts.remove_if(&address, |_, c| *c == 0);
            }
        }
    }

    /// Register an authenticated connection. Returns true when this is
    /// the user's first live connection.
    pub fn register(&self, connection: Arc<Connection>) -> bool {
        let mut user_conns = self
            .user_connections
            .entry(connection.user_id)
            .or_default();
        let first_connection = user_conns.is_empty();
        user_conns.insert(connection.id);
        drop(user_conns);

        tracing::info!(
            user_id = connection.user_id,
            connection_id = %connection.id,
            "Connection registered"
        );

        self.connections.insert(connection.id, connection);
        first_connection
    }

    /// Remove a connection, releasing its address slot and room
    /// memberships. Returns `None` if the ID was never registered.
    pub fn unregister(&self, connection_id: Uuid) -> Option<UnregisterOutcome> {
        let (_, connection) = self.connections.remove(&connection_id)?;

        self.release_address(connection.address);

        let joined: Vec<RoomKey> = connection.joined_rooms.lock().drain().collect();
        for room in joined {
            self.remove_from_room_index(&room, connection_id);
        }

        let mut last_connection = false;
        if let Some(mut user_conns) = self.user_connections.get_mut(&connection.user_id) {
            user_conns.remove(&connection_id);
            last_connection = user_conns.is_empty();
        }
        if last_connection {
            self.user_connections
                .remove_if(&connection.user_id, |_, conns| conns.is_empty());
        }

        tracing::info!(
            user_id = connection.user_id,
            connection_id = %connection_id,
            last_connection,
            "Connection unregistered"
        );

        Some(UnregisterOutcome {
            user_id: connection.user_id,
            last_connection,
        })
    }

    /// Add a connection to a room.
    pub fn join_room(&self, connection_id: Uuid, room: RoomKey) {
        let Some(connection) = self.connections.get(&connection_id) else {
            return;
        };
        connection.joined_rooms.lock().insert(room);
        self.rooms.entry(room).or_default().insert(connection_id);
    }

    /// Remove a connection from a room.
    pub fn leave_room(&self, connection_id: Uuid, room: RoomKey) {
        if let Some(connection) = self.connections.get(&connection_id) {
            connection.joined_rooms.lock().remove(&room);
        }
        self.remove_from_room_index(&room, connection_id);
    }

    /// Rooms a connection is currently in.
    pub fn rooms_of(&self, connection_id: Uuid) -> HashSet<RoomKey> {
        self.connections
            .get(&connection_id)
            .map(|c| c.joined_rooms.lock().clone())
            .unwrap_or_default()
    }

    /// Deliver an event to every connection in a room, optionally
    /// excluding one connection (the sender, for echo suppression).
    pub fn send_to_room(&self, room: &RoomKey, event: &ServerEvent, exclude: Option<Uuid>) {
        let Some(members) = self.rooms.get(room) else {
            return;
        };
        for connection_id in members.iter() {
            if Some(*connection_id) == exclude {
                continue;
            }
            if let Some(connection) = self.connections.get(connection_id) {
                let _ = connection.sender.send(event.clone());
            }
        }
    }

    /// Deliver an event to every connection of a user.
    pub fn send_to_user(&self, user_id: i64, event: &ServerEvent) {
        let Some(conn_ids) = self.user_connections.get(&user_id) else {
            return;
        };
        for connection_id in conn_ids.iter() {
            if let Some(connection) = self.connections.get(connection_id) {
                let _ = connection.sender.send(event.clone());
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connections_of(&self, user_id: i64) -> Vec<Uuid> {
        self.user_connections
            .get(&user_id)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default()
    }

    fn remove_from_room_index(&self, room: &RoomKey, connection_id: Uuid) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(&connection_id);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn test_addr(last: u8) -> IpAddr {
        IpAddr::from([127, 0, 0, last])
    }

    fn test_connection(
        user_id: i64,
        address: IpAddr,
    ) -> (Arc<Connection>, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Connection {
            id: Uuid::new_v4(),
            address,
            user_id,
            sender: tx,
            joined_rooms: Mutex::new(HashSet::new()),
            connected_at: chrono::Utc::now(),
        });
        (connection, rx)
    }

    #[test]
    fn admission_enforces_per_address_ceiling() {
        let registry = ConnectionRegistry::new(10);
        let addr = test_addr(1);

        for _ in 0..10 {
            registry.admit(addr).unwrap();
        }
        assert!(matches!(
            registry.admit(addr),
            Err(GatewayError::RateLimited)
        ));

        // another address is unaffected
        registry.admit(test_addr(2)).unwrap();

        // releasing a slot reopens admission
        registry.release_address(addr);
        registry.admit(addr).unwrap();
    }

    #[test]
    fn unregister_reports_last_connection() {
        let registry = ConnectionRegistry::new(10);
        let addr = test_addr(1);

        registry.admit(addr).unwrap();
        registry.admit(addr).unwrap();
        let (first, _rx1) = test_connection(7, addr);
        let (second, _rx2) = test_connection(7, addr);

        assert!(registry.register(first.clone()));
        assert!(!registry.register(second.clone()));

        let outcome = registry.unregister(first.id).unwrap();
        assert!(!outcome.last_connection);

        let outcome = registry.unregister(second.id).unwrap();
        assert!(outcome.last_connection);
        assert_eq!(outcome.user_id, 7);

        assert!(registry.unregister(second.id).is_none());
    }

    #[tokio::test]
    async fn room_delivery_respects_exclusion() {
        let registry = ConnectionRegistry::new(10);
        let addr = test_addr(1);

        registry.admit(addr).unwrap();
        registry.admit(addr).unwrap();
        let (sender_conn, mut sender_rx) = test_connection(1, addr);
        let (other_conn, mut other_rx) = test_connection(2, addr);
        registry.register(sender_conn.clone());
        registry.register(other_conn.clone());

        let room = RoomKey::Channel(5);
        registry.join_room(sender_conn.id, room);
        registry.join_room(other_conn.id, room);

        let event = ServerEvent::ChannelJoined {
            channel_id: "5".into(),
        };
        registry.send_to_room(&room, &event, Some(sender_conn.id));

        assert_eq!(other_rx.try_recv().unwrap(), event);
        assert!(sender_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn leaving_a_room_stops_delivery() {
        let registry = ConnectionRegistry::new(10);
        let addr = test_addr(1);

        registry.admit(addr).unwrap();
        let (connection, mut rx) = test_connection(1, addr);
        registry.register(connection.clone());

        let room = RoomKey::Channel(9);
        registry.join_room(connection.id, room);
        registry.leave_room(connection.id, room);

        registry.send_to_room(&room, &ServerEvent::HeartbeatAck, None);
        assert!(rx.try_recv().is_err());
        assert!(registry.rooms_of(connection.id).is_empty());
    }

    #[test]
    fn unregister_releases_admission_slot() {
        let registry = ConnectionRegistry::new(1);
        let addr = test_addr(3);

        registry.admit(addr).unwrap();
        let (connection, _rx) = test_connection(1, addr);
        registry.register(connection.clone());

        assert!(registry.admit(addr).is_err());
        registry.unregister(connection.id);
        registry.admit(addr).unwrap();
    }
}

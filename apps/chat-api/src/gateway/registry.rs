//! Who is connected, and which rooms each connected user is subscribed to.
//!
//! Two independent locks: one for the user → connection map, one for the
//! room → subscribers map. Operations that need both take the connection
//! lock first. Nothing here awaits while holding a lock.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use super::connection::ConnectionHandle;

// ---------------------------------------------------------------------------
// Connections
// ---------------------------------------------------------------------------

/// user id → live connection. At most one connection per user.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<HashMap<String, ConnectionHandle>>,
}

impl ConnectionRegistry {
    /// Install `conn` for its user, returning the connection it replaced.
    /// The replaced connection is not closed here.
    pub fn register(&self, conn: ConnectionHandle) -> Option<ConnectionHandle> {
        self.inner.write().insert(conn.user_id().to_string(), conn)
    }

    /// No-op if the user has no connection.
    pub fn unregister(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.inner.write().remove(user_id)
    }

    pub fn get(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.inner.read().get(user_id).cloned()
    }

    /// True if `conn` still owns its user's slot.
    pub fn is_current(&self, conn: &ConnectionHandle) -> bool {
        self.inner
            .read()
            .get(conn.user_id())
            .is_some_and(|c| c.is(conn))
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Rooms
// ---------------------------------------------------------------------------

/// room id → subscribed user ids. Empty rooms are pruned.
#[derive(Default)]
pub struct RoomRegistry {
    inner: RwLock<HashMap<String, HashSet<String>>>,
}

impl RoomRegistry {
    /// Returns true if the user was not already subscribed.
    pub fn subscribe(&self, room_id: &str, user_id: &str) -> bool {
        subscribe_locked(&mut self.inner.write(), room_id, user_id)
    }

    /// Returns true if the user was subscribed.
    pub fn unsubscribe(&self, room_id: &str, user_id: &str) -> bool {
        unsubscribe_locked(&mut self.inner.write(), room_id, user_id)
    }

    /// Point-in-time copy of a room's subscribers.
    pub fn members_of(&self, room_id: &str) -> HashSet<String> {
        self.inner.read().get(room_id).cloned().unwrap_or_default()
    }

    pub fn is_subscribed(&self, room_id: &str, user_id: &str) -> bool {
        self.inner
            .read()
            .get(room_id)
            .is_some_and(|members| members.contains(user_id))
    }

    /// Rooms the user is currently subscribed to.
    pub fn rooms_of(&self, user_id: &str) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .inner
            .read()
            .iter()
            .filter(|(_, members)| members.contains(user_id))
            .map(|(room, _)| room.clone())
            .collect();
        rooms.sort();
        rooms
    }

    pub fn room_count(&self) -> usize {
        self.inner.read().len()
    }
}

fn subscribe_locked(rooms: &mut HashMap<String, HashSet<String>>, room_id: &str, user_id: &str) -> bool {
    rooms
        .entry(room_id.to_string())
        .or_default()
        .insert(user_id.to_string())
}

fn unsubscribe_locked(
    rooms: &mut HashMap<String, HashSet<String>>,
    room_id: &str,
    user_id: &str,
) -> bool {
    let Some(members) = rooms.get_mut(room_id) else {
        return false;
    };
    let removed = members.remove(user_id);
    if members.is_empty() {
        rooms.remove(room_id);
    }
    removed
}

// ---------------------------------------------------------------------------
// Both
// ---------------------------------------------------------------------------

/// The hub's shared state: both registries plus the operations that must see
/// them together.
#[derive(Default)]
pub struct Registry {
    pub connections: ConnectionRegistry,
    pub rooms: RoomRegistry,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `conn`'s user to a room, but only while `conn` is still the
    /// user's live connection. `None` if it has been replaced or removed;
    /// otherwise whether the subscription is new.
    pub fn subscribe_if_current(&self, conn: &ConnectionHandle, room_id: &str) -> Option<bool> {
        let connections = self.connections.inner.read();
        if !connections
            .get(conn.user_id())
            .is_some_and(|c| c.is(conn))
        {
            return None;
        }
        let mut rooms = self.rooms.inner.write();
        Some(subscribe_locked(&mut rooms, room_id, conn.user_id()))
    }

    /// Unsubscribe `conn`'s user from every room in `room_ids`, only while
    /// `conn` is current. Returns the rooms actually left.
    pub fn unsubscribe_if_current(&self, conn: &ConnectionHandle, room_ids: &[String]) -> Vec<String> {
        let connections = self.connections.inner.read();
        if !connections
            .get(conn.user_id())
            .is_some_and(|c| c.is(conn))
        {
            return Vec::new();
        }
        let mut rooms = self.rooms.inner.write();
        room_ids
            .iter()
            .filter(|room_id| unsubscribe_locked(&mut rooms, room_id, conn.user_id()))
            .cloned()
            .collect()
    }

    /// Remove `conn` and every subscription of its user in one step.
    ///
    /// `None` if `conn` no longer owns the slot (a newer connection replaced
    /// it); the newer connection's subscriptions are left untouched.
    pub fn remove_if_current(&self, conn: &ConnectionHandle) -> Option<Vec<String>> {
        let mut connections = self.connections.inner.write();
        if !connections
            .get(conn.user_id())
            .is_some_and(|c| c.is(conn))
        {
            return None;
        }
        connections.remove(conn.user_id());

        let mut rooms = self.rooms.inner.write();
        let user_id = conn.user_id();
        let mut left: Vec<String> = rooms
            .iter()
            .filter(|(_, members)| members.contains(user_id))
            .map(|(room, _)| room.clone())
            .collect();
        for room_id in &left {
            unsubscribe_locked(&mut rooms, room_id, user_id);
        }
        left.sort();
        Some(left)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::Identity;
    use crate::gateway::outbound;

    fn handle(user_id: &str) -> ConnectionHandle {
        let (tx, _rx) = outbound::channel(4);
        ConnectionHandle::new(
            &Identity {
                user_id: user_id.to_string(),
                username: user_id.to_string(),
            },
            tx,
        )
    }

    #[test]
    fn register_returns_previous_connection() {
        let reg = ConnectionRegistry::default();
        let first = handle("usr_a");
        let second = handle("usr_a");

        assert!(reg.register(first.clone()).is_none());
        let prev = reg.register(second.clone()).expect("previous");
        assert!(prev.is(&first));
        assert!(reg.is_current(&second));
        assert!(!reg.is_current(&first));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn unregister_absent_is_noop() {
        let reg = ConnectionRegistry::default();
        assert!(reg.unregister("usr_ghost").is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn subscribe_is_idempotent_and_prunes_empty_rooms() {
        let rooms = RoomRegistry::default();
        assert!(rooms.subscribe("room_1", "usr_a"));
        assert!(!rooms.subscribe("room_1", "usr_a"));
        assert!(rooms.subscribe("room_1", "usr_b"));
        assert_eq!(rooms.members_of("room_1").len(), 2);

        assert!(rooms.unsubscribe("room_1", "usr_a"));
        assert!(!rooms.unsubscribe("room_1", "usr_a"));
        assert!(rooms.unsubscribe("room_1", "usr_b"));
        assert_eq!(rooms.room_count(), 0);
        assert!(!rooms.unsubscribe("room_1", "usr_b"));
    }

    #[test]
    fn members_of_is_a_snapshot() {
        let rooms = RoomRegistry::default();
        rooms.subscribe("room_1", "usr_a");
        let snapshot = rooms.members_of("room_1");
        rooms.subscribe("room_1", "usr_b");
        assert_eq!(snapshot.len(), 1);
        assert!(rooms.members_of("room_unknown").is_empty());
    }

    #[test]
    fn subscribe_if_current_rejects_replaced_connection() {
        let reg = Registry::new();
        let old = handle("usr_a");
        let new = handle("usr_a");
        reg.connections.register(old.clone());
        assert_eq!(reg.subscribe_if_current(&old, "room_1"), Some(true));

        reg.connections.register(new.clone());
        assert_eq!(reg.subscribe_if_current(&old, "room_2"), None);
        assert_eq!(reg.subscribe_if_current(&new, "room_1"), Some(false));
        assert_eq!(reg.rooms.rooms_of("usr_a"), vec!["room_1".to_string()]);
    }

    #[test]
    fn remove_if_current_clears_every_room() {
        let reg = Registry::new();
        let conn = handle("usr_a");
        reg.connections.register(conn.clone());
        for room in ["room_1", "room_2", "room_3"] {
            reg.subscribe_if_current(&conn, room);
        }
        reg.rooms.subscribe("room_2", "usr_b");

        let left = reg.remove_if_current(&conn).expect("current");
        assert_eq!(left, vec!["room_1", "room_2", "room_3"]);
        assert!(reg.rooms.rooms_of("usr_a").is_empty());
        assert_eq!(reg.rooms.room_count(), 1);
        assert!(reg.connections.get("usr_a").is_none());

        // Second removal finds nothing.
        assert!(reg.remove_if_current(&conn).is_none());
    }

    #[test]
    fn stale_removal_leaves_new_connection_alone() {
        let reg = Registry::new();
        let old = handle("usr_a");
        let new = handle("usr_a");
        reg.connections.register(old.clone());
        reg.subscribe_if_current(&old, "room_1");
        reg.connections.register(new.clone());

        assert!(reg.remove_if_current(&old).is_none());
        assert!(reg.connections.is_current(&new));
        assert!(reg.rooms.is_subscribed("room_1", "usr_a"));
    }
}

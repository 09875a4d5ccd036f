//! The hub ties the registry and room manager together.
//!
//! It implements the operations that cross component boundaries: room
//! join/leave with membership-count fan-out, the signaling relay, chat
//! broadcast, targeted notification, and the disconnect cascade. The
//! relay itself is stateless pass-through; all bookkeeping lives in the
//! two state owners the hub composes.

use crate::connection::{ConnectionId, Deliver, Outbound};
use crate::registry::{Registry, RegistryError};
use crate::rooms::{RoomError, RoomManager, RoomUpdate};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use stagecast_protocol::Frame;

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum number of live connections.
    pub max_connections: usize,
    /// Maximum rooms one connection may join.
    pub max_rooms_per_connection: usize,
    /// Depth of each connection's outbound queue. A connection that lets
    /// its queue fill is disconnected.
    pub outbound_queue_depth: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: 100_000,
            max_rooms_per_connection: 64,
            outbound_queue_depth: 256,
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone)]
pub struct HubStats {
    /// Live connections.
    pub connections: usize,
    /// Active (non-empty) rooms.
    pub rooms: usize,
}

/// The realtime core: connection registry, room membership, and every
/// delivery path between them.
pub struct Hub {
    registry: Registry,
    rooms: RoomManager,
    config: HubConfig,
}

impl Hub {
    /// Create a hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        info!("Creating hub with config: {:?}", config);
        Self {
            registry: Registry::new(config.max_connections),
            rooms: RoomManager::new(config.max_rooms_per_connection),
            config,
        }
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.registry.len(),
            rooms: self.rooms.room_count(),
        }
    }

    /// Admit a new transport session.
    ///
    /// Returns the assigned connection id and the receiver the socket
    /// task drains for outbound frames.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AtCapacity`] when the live set is full.
    pub fn connect(
        &self,
    ) -> Result<(ConnectionId, mpsc::Receiver<Arc<Frame>>), RegistryError> {
        let (outbound, rx) = Outbound::channel(self.config.outbound_queue_depth);
        let id = self.registry.register(outbound)?;
        Ok((id, rx))
    }

    /// Bind an authenticated identity to a connection.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyBound`] on a rebind attempt.
    pub fn bind_identity(&self, conn: &ConnectionId, user: &str) -> Result<(), RegistryError> {
        self.registry.bind_identity(conn, user)
    }

    /// The identity bound to a connection, if any.
    #[must_use]
    pub fn identity_of(&self, conn: &ConnectionId) -> Option<String> {
        self.registry.identity_of(conn)
    }

    /// Current member count of a room.
    #[must_use]
    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.member_count(room)
    }

    /// Join a room and report the post-mutation count to every member,
    /// the joiner included.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid room name or a joined-room limit
    /// violation; both are protocol violations for the caller to reject.
    pub fn join_room(&self, conn: &ConnectionId, room: &str) -> Result<usize, RoomError> {
        // A disconnect escalated from another task may have raced this
        // join; don't resurrect membership for a dead connection.
        if !self.registry.contains(conn) {
            debug!(connection = %conn, room = %room, "Join from vanished connection dropped");
            return Ok(0);
        }

        let update = self.rooms.join(room, conn)?;
        let count = update.count;
        self.fan_count(room, &update, true);
        Ok(count)
    }

    /// Leave a room and report the post-mutation count to the remaining
    /// members. No-op (count 0) for non-members and unknown rooms.
    pub fn leave_room(&self, conn: &ConnectionId, room: &str) -> usize {
        let update = self.rooms.leave(room, conn);
        let count = update.count;
        self.fan_count(room, &update, true);
        count
    }

    /// Tear down a connection: leave every joined room (reporting counts
    /// to whoever remains), unbind its identity, drop it from the live
    /// set. Idempotent against duplicate close events.
    pub fn disconnect(&self, conn: &ConnectionId) {
        let left = self.rooms.leave_all(conn);
        self.registry.unregister(conn);

        for (room, update) in &left {
            // No escalation here: an overflow during disconnect cleanup
            // is logged and dropped, never a re-entrant disconnect.
            self.fan_count(room, update, false);
        }

        debug!(connection = %conn, rooms_left = left.len(), "Disconnected");
    }

    /// Relay an opaque signaling payload from one connection to another.
    ///
    /// Pure pass-through: the payload is never inspected, and a vanished
    /// target is a silent drop (the target likely disconnected
    /// mid-handshake), never an error to the sender.
    pub fn relay(&self, from: &ConnectionId, target: &ConnectionId, payload: Vec<u8>) {
        let frame = Arc::new(Frame::signal_recv(from.as_str(), payload));
        match self.registry.deliver(target, frame) {
            Deliver::Queued => {}
            Deliver::Gone => {
                debug!(from = %from, target = %target, "Signal target gone, dropped");
            }
            Deliver::Overflow => self.drop_slow(target),
        }
    }

    /// Fan a chat line out to a room, excluding the sender (who already
    /// rendered it locally). The `from` field carries the sender's bound
    /// identity, falling back to their connection id.
    pub fn chat(&self, sender: &ConnectionId, room: &str, text: &str) -> usize {
        let from = self
            .identity_of(sender)
            .unwrap_or_else(|| sender.to_string());
        self.broadcast(room, Frame::chat_recv(room, from, text), Some(sender))
    }

    /// Deliver a frame to every current member of a room.
    ///
    /// The member list is a point-in-time snapshot; connections joining
    /// during fan-out may miss this frame. Per-recipient failures are
    /// isolated: a vanished member is skipped, a slow one is
    /// disconnected, and neither aborts delivery to the rest.
    ///
    /// Returns the number of members the frame was queued to.
    pub fn broadcast(&self, room: &str, frame: Frame, exclude: Option<&ConnectionId>) -> usize {
        let members = self.rooms.members_of(room);
        let frame = Arc::new(frame);

        let mut delivered = 0;
        let mut slow = Vec::new();
        for member in &members {
            if exclude == Some(member) {
                continue;
            }
            match self.registry.deliver(member, frame.clone()) {
                Deliver::Queued => delivered += 1,
                Deliver::Gone => {
                    debug!(room = %room, member = %member, "Fan-out to vanished member skipped");
                }
                Deliver::Overflow => slow.push(member.clone()),
            }
        }
        for member in slow {
            self.drop_slow(&member);
        }

        delivered
    }

    /// Deliver a notification to every connection currently bound to an
    /// identity, across rooms and devices. An identity with no live
    /// connections drops the message; durable storage is the caller's
    /// concern.
    ///
    /// Returns the number of connections the notice was queued to.
    pub fn notify(&self, user: &str, payload: serde_json::Value) -> usize {
        let targets = self.registry.connections_for_identity(user);
        if targets.is_empty() {
            debug!(user = %user, "Notify with no live connections, dropped");
            return 0;
        }

        let frame = Arc::new(Frame::notice(payload));
        let mut delivered = 0;
        let mut slow = Vec::new();
        for conn in &targets {
            match self.registry.deliver(conn, frame.clone()) {
                Deliver::Queued => delivered += 1,
                Deliver::Gone => {}
                Deliver::Overflow => slow.push(conn.clone()),
            }
        }
        for conn in slow {
            self.drop_slow(&conn);
        }

        delivered
    }

    /// Report a post-mutation room count to the members in the update.
    fn fan_count(&self, room: &str, update: &RoomUpdate, escalate: bool) {
        if update.members.is_empty() {
            return;
        }

        let frame = Arc::new(Frame::room_count(room, update.count));
        let mut slow = Vec::new();
        for member in &update.members {
            match self.registry.deliver(member, frame.clone()) {
                Deliver::Queued | Deliver::Gone => {}
                Deliver::Overflow if escalate => slow.push(member.clone()),
                Deliver::Overflow => {
                    warn!(room = %room, member = %member, "Count report dropped on full queue");
                }
            }
        }
        for member in slow {
            self.drop_slow(&member);
        }
    }

    /// Backpressure valve: a connection whose queue overflowed is torn
    /// down rather than allowed to degrade delivery for everyone else.
    fn drop_slow(&self, conn: &ConnectionId) {
        warn!(connection = %conn, "Outbound queue overflow, disconnecting slow connection");
        self.disconnect(conn);
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::Receiver<Arc<Frame>>) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push((*frame).clone());
        }
        frames
    }

    #[test]
    fn test_join_reports_count_to_all_members() {
        let hub = Hub::new();
        let (a, mut rx_a) = hub.connect().unwrap();
        let (b, mut rx_b) = hub.connect().unwrap();

        assert_eq!(hub.join_room(&a, "evt-42").unwrap(), 1);
        assert_eq!(hub.join_room(&b, "evt-42").unwrap(), 2);

        // A saw count 1 (its own join) then count 2 (B's join).
        assert_eq!(
            drain(&mut rx_a),
            vec![Frame::room_count("evt-42", 1), Frame::room_count("evt-42", 2)]
        );
        assert_eq!(drain(&mut rx_b), vec![Frame::room_count("evt-42", 2)]);
    }

    #[test]
    fn test_relay_to_vanished_target_is_silent() {
        let hub = Hub::new();
        let (a, mut rx_a) = hub.connect().unwrap();

        hub.relay(&a, &ConnectionId::new("ghost"), b"offer-sdp".to_vec());
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(hub.stats().connections, 1);
    }

    #[test]
    fn test_overflow_disconnects_only_the_slow_connection() {
        let hub = Hub::with_config(HubConfig {
            outbound_queue_depth: 1,
            ..HubConfig::default()
        });
        // A's queue is never drained; its own join fills it.
        let (a, _rx_a) = hub.connect().unwrap();
        let (b, mut rx_b) = hub.connect().unwrap();

        assert_eq!(hub.join_room(&a, "evt-1").unwrap(), 1);
        // B's join overflows A's full queue; A is dropped, B stays.
        assert_eq!(hub.join_room(&b, "evt-1").unwrap(), 2);

        assert_eq!(hub.stats().connections, 1);
        assert_eq!(hub.member_count("evt-1"), 1);
        assert_eq!(drain(&mut rx_b), vec![Frame::room_count("evt-1", 2)]);
    }

    #[test]
    fn test_chat_excludes_sender_and_uses_identity() {
        let hub = Hub::new();
        let (a, mut rx_a) = hub.connect().unwrap();
        let (b, mut rx_b) = hub.connect().unwrap();
        hub.bind_identity(&a, "alice").unwrap();

        hub.join_room(&a, "evt-1").unwrap();
        hub.join_room(&b, "evt-1").unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        assert_eq!(hub.chat(&a, "evt-1", "hello"), 1);

        assert!(drain(&mut rx_a).is_empty());
        match drain(&mut rx_b).as_slice() {
            [Frame::ChatRecv { room, from, text, .. }] => {
                assert_eq!(room, "evt-1");
                assert_eq!(from, "alice");
                assert_eq!(text, "hello");
            }
            other => panic!("unexpected frames: {other:?}"),
        }
    }
}

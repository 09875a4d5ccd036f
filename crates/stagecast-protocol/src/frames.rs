//! Frame types for the Stagecast protocol.
//!
//! Every logically distinct event the relay recognizes is one `Frame`
//! variant. Signal payloads are opaque bytes: the relay never inspects
//! them, it only moves them between two named connections.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current protocol version. Sent by the client in `connect` and echoed
/// by the server in `connected`.
pub const PROTOCOL_VERSION: u8 = 1;

/// Rejection codes sent back to a misbehaving connection.
pub mod reject {
    /// Malformed or unexpected frame.
    pub const INVALID_FRAME: u16 = 4000;
    /// Room name failed validation.
    pub const INVALID_ROOM: u16 = 4001;
    /// Connection reached its joined-room limit.
    pub const ROOM_LIMIT: u16 = 4002;
    /// Connection already bound to a different identity.
    pub const ALREADY_BOUND: u16 = 4003;
    /// Server at connection capacity.
    pub const SERVER_FULL: u16 = 4004;
    /// Client speaks an unsupported protocol version.
    pub const UNSUPPORTED_VERSION: u16 = 4005;
}

/// Unix timestamp in milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A protocol frame.
///
/// Client → server: `Connect`, `Join`, `Leave`, `Register`, `Signal`,
/// `Chat`, `Ping`.
///
/// Server → client: `Connected`, `RoomCount`, `SignalRecv`, `ChatRecv`,
/// `Notice`, `Ack`, `Reject`, `Pong`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Handshake; first frame a client sends.
    #[serde(rename = "connect")]
    Connect {
        /// Protocol version the client speaks.
        version: u8,
    },

    /// Handshake response carrying the server-assigned connection id.
    ///
    /// Clients address `signal` frames with these ids.
    #[serde(rename = "connected")]
    Connected {
        /// Server-assigned connection identifier.
        connection_id: String,
        /// Negotiated protocol version.
        version: u8,
        /// Expected heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Join a room.
    #[serde(rename = "join")]
    Join {
        /// Request id echoed in the ack or rejection.
        id: u64,
        /// Room to join.
        room: String,
    },

    /// Leave a room. Disconnecting implies leaving every joined room.
    #[serde(rename = "leave")]
    Leave {
        /// Request id echoed in the ack.
        id: u64,
        /// Room to leave.
        room: String,
    },

    /// Bind an already-authenticated user identity to this connection.
    #[serde(rename = "register")]
    Register {
        /// Request id echoed in the ack or rejection.
        id: u64,
        /// User identity to bind. One identity per connection, forever.
        user: String,
    },

    /// Relay an opaque signaling payload to another connection.
    ///
    /// Fire-and-forget: a vanished target is an expected race, never an
    /// error back to the sender.
    #[serde(rename = "signal")]
    Signal {
        /// Target connection id.
        target: String,
        /// Opaque payload (SDP offer/answer, ICE candidate, ...).
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// Send a chat line to a room.
    #[serde(rename = "chat")]
    Chat {
        /// Target room.
        room: String,
        /// Chat text.
        text: String,
    },

    /// Membership count of a room changed; carries the post-mutation count.
    #[serde(rename = "room-count")]
    RoomCount {
        /// Room whose membership changed.
        room: String,
        /// Member count after the change.
        count: usize,
    },

    /// A relayed signaling payload arriving at its target.
    #[serde(rename = "signal-recv")]
    SignalRecv {
        /// Connection id of the sender.
        from: String,
        /// Opaque payload, untouched.
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },

    /// A chat line fanned out to a room.
    #[serde(rename = "chat-recv")]
    ChatRecv {
        /// Room the chat was sent to.
        room: String,
        /// Sender's bound identity, or their connection id if unbound.
        from: String,
        /// Chat text.
        text: String,
        /// Server timestamp in unix milliseconds.
        timestamp: u64,
    },

    /// A personal notification for this connection's bound identity.
    #[serde(rename = "notice")]
    Notice {
        /// Structured notification payload.
        payload: serde_json::Value,
    },

    /// Success response to a request frame.
    #[serde(rename = "ack")]
    Ack {
        /// Id of the acknowledged request.
        id: u64,
    },

    /// Rejection of an invalid request, sent only to the offender.
    #[serde(rename = "reject")]
    Reject {
        /// Id of the rejected request (0 if not applicable).
        id: u64,
        /// Rejection code (see [`reject`]).
        code: u16,
        /// Human-readable reason.
        reason: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional client timestamp, echoed back.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from the ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Short name of the frame kind, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Connect { .. } => "connect",
            Frame::Connected { .. } => "connected",
            Frame::Join { .. } => "join",
            Frame::Leave { .. } => "leave",
            Frame::Register { .. } => "register",
            Frame::Signal { .. } => "signal",
            Frame::Chat { .. } => "chat",
            Frame::RoomCount { .. } => "room-count",
            Frame::SignalRecv { .. } => "signal-recv",
            Frame::ChatRecv { .. } => "chat-recv",
            Frame::Notice { .. } => "notice",
            Frame::Ack { .. } => "ack",
            Frame::Reject { .. } => "reject",
            Frame::Ping { .. } => "ping",
            Frame::Pong { .. } => "pong",
        }
    }

    /// Create a `Connect` frame for the current protocol version.
    #[must_use]
    pub fn connect() -> Self {
        Frame::Connect {
            version: PROTOCOL_VERSION,
        }
    }

    /// Create a `Connected` frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version: PROTOCOL_VERSION,
            heartbeat,
        }
    }

    /// Create a `Join` frame.
    #[must_use]
    pub fn join(id: u64, room: impl Into<String>) -> Self {
        Frame::Join {
            id,
            room: room.into(),
        }
    }

    /// Create a `Leave` frame.
    #[must_use]
    pub fn leave(id: u64, room: impl Into<String>) -> Self {
        Frame::Leave {
            id,
            room: room.into(),
        }
    }

    /// Create a `Register` frame.
    #[must_use]
    pub fn register(id: u64, user: impl Into<String>) -> Self {
        Frame::Register {
            id,
            user: user.into(),
        }
    }

    /// Create a `Signal` frame.
    #[must_use]
    pub fn signal(target: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Frame::Signal {
            target: target.into(),
            payload: payload.into(),
        }
    }

    /// Create a `SignalRecv` frame.
    #[must_use]
    pub fn signal_recv(from: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Frame::SignalRecv {
            from: from.into(),
            payload: payload.into(),
        }
    }

    /// Create a `RoomCount` frame.
    #[must_use]
    pub fn room_count(room: impl Into<String>, count: usize) -> Self {
        Frame::RoomCount {
            room: room.into(),
            count,
        }
    }

    /// Create a `ChatRecv` frame stamped with the current time.
    #[must_use]
    pub fn chat_recv(
        room: impl Into<String>,
        from: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Frame::ChatRecv {
            room: room.into(),
            from: from.into(),
            text: text.into(),
            timestamp: now_millis(),
        }
    }

    /// Create a `Notice` frame.
    #[must_use]
    pub fn notice(payload: serde_json::Value) -> Self {
        Frame::Notice { payload }
    }

    /// Create an `Ack` frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Create a `Reject` frame.
    #[must_use]
    pub fn reject(id: u64, code: u16, reason: impl Into<String>) -> Self {
        Frame::Reject {
            id,
            code,
            reason: reason.into(),
        }
    }

    /// Create a `Pong` frame echoing a ping timestamp.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_kind() {
        assert_eq!(Frame::join(1, "evt-42").kind(), "join");
        assert_eq!(Frame::signal("c-1", b"sdp".to_vec()).kind(), "signal");
        assert_eq!(Frame::notice(json!({"text": "hi"})).kind(), "notice");
    }

    #[test]
    fn test_signal_roundtrip_preserves_payload() {
        let frame = Frame::signal("c-2", b"offer-sdp".to_vec());
        match &frame {
            Frame::Signal { target, payload } => {
                assert_eq!(target, "c-2");
                assert_eq!(payload, b"offer-sdp");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_chat_recv_is_stamped() {
        let frame = Frame::chat_recv("evt-42", "u1", "hello");
        match frame {
            Frame::ChatRecv { timestamp, .. } => assert!(timestamp > 0),
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

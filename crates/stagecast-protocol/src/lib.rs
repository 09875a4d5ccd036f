//! # stagecast-protocol
//!
//! Wire protocol for the Stagecast realtime relay.
//!
//! Defines the frames exchanged between clients and the relay server:
//! room membership (`join` / `leave`), identity registration (`register`),
//! peer signaling (`signal`), chat, and the server-pushed events
//! (`room-count`, `signal-recv`, `chat-recv`, `notice`).
//!
//! Frames are MessagePack maps with a 4-byte big-endian length prefix.
//!
//! ## Example
//!
//! ```rust
//! use stagecast_protocol::{codec, Frame};
//!
//! let frame = Frame::join(1, "evt-42");
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{reject, Frame, PROTOCOL_VERSION};

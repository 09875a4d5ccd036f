//! # stagecast-core
//!
//! The realtime core of Stagecast: connection bookkeeping, room
//! membership, and message fan-out for live event broadcasting.
//!
//! - **Registry** - live connections and the identity → connections index
//! - **RoomManager** - room membership with atomic count reporting
//! - **Hub** - signaling relay, broadcast fan-out, targeted notification,
//!   and the disconnect cascade tying the two state owners together
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐      ┌─────────────┐
//! │  Transport  │─────▶│     Hub     │
//! └─────────────┘      └──────┬──────┘
//!                      ┌──────┴──────┐
//!                      ▼             ▼
//!               ┌────────────┐ ┌─────────────┐
//!               │  Registry  │ │ RoomManager │
//!               └────────────┘ └─────────────┘
//! ```
//!
//! All delivery goes through per-connection bounded queues, so a slow
//! client never stalls fan-out to others.

pub mod connection;
pub mod hub;
pub mod registry;
pub mod rooms;

pub use connection::{ConnectionId, Deliver, Outbound};
pub use hub::{Hub, HubConfig, HubStats};
pub use registry::{Registry, RegistryError, UserId};
pub use rooms::{RoomError, RoomId, RoomManager, RoomUpdate};

//! Connection Registry: the live-connection set and the identity index.
//!
//! The registry owns every connection's outbound handle and the mapping
//! from user identity to the set of connections currently representing it
//! (one user, many tabs). Both maps are sharded, so unrelated connections
//! and identities never contend.

use crate::connection::{ConnectionId, Deliver, Outbound};
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use stagecast_protocol::Frame;

/// An authenticated user identity. Verified by the authentication layer
/// before it ever reaches the registry.
pub type UserId = String;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry is at its connection capacity.
    #[error("Connection registry at capacity ({0})")]
    AtCapacity(usize),

    /// The connection is already bound to a different identity.
    #[error("Connection already bound to an identity")]
    AlreadyBound,
}

struct ConnectionEntry {
    outbound: Outbound,
    identity: Option<UserId>,
}

/// The live-connection set plus the identity → connections index.
pub struct Registry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    identities: DashMap<UserId, DashSet<ConnectionId>>,
    max_connections: usize,
}

impl Registry {
    /// Create a registry that admits at most `max_connections` live
    /// connections.
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: DashMap::new(),
            identities: DashMap::new(),
            max_connections,
        }
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connections are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Whether a connection is currently live.
    #[must_use]
    pub fn contains(&self, conn: &ConnectionId) -> bool {
        self.connections.contains_key(conn)
    }

    /// Admit a newly established connection, assigning it a fresh id.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AtCapacity`] when the live set is full;
    /// the transport layer refuses the connection.
    pub fn register(&self, outbound: Outbound) -> Result<ConnectionId, RegistryError> {
        if self.connections.len() >= self.max_connections {
            warn!(capacity = self.max_connections, "Registry full, refusing connection");
            return Err(RegistryError::AtCapacity(self.max_connections));
        }

        let id = ConnectionId::generate();
        self.connections.insert(
            id.clone(),
            ConnectionEntry {
                outbound,
                identity: None,
            },
        );

        debug!(connection = %id, "Connection registered");
        Ok(id)
    }

    /// Bind a user identity to a connection.
    ///
    /// Binding the same identity again is an idempotent success. A bind
    /// for a connection that already died is silently dropped (close
    /// races with register-identity).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyBound`] if the connection carries
    /// a different identity.
    pub fn bind_identity(&self, conn: &ConnectionId, user: &str) -> Result<(), RegistryError> {
        let Some(mut entry) = self.connections.get_mut(conn) else {
            debug!(connection = %conn, user = %user, "Bind for unknown connection dropped");
            return Ok(());
        };

        match &entry.identity {
            Some(bound) if bound == user => return Ok(()),
            Some(_) => return Err(RegistryError::AlreadyBound),
            None => {}
        }

        entry.identity = Some(user.to_string());
        self.identities
            .entry(user.to_string())
            .or_default()
            .insert(conn.clone());

        debug!(connection = %conn, user = %user, "Identity bound");
        Ok(())
    }

    /// Remove a connection from the live set and the identity index.
    ///
    /// Idempotent: unknown ids are a no-op, so duplicate close events are
    /// harmless.
    pub fn unregister(&self, conn: &ConnectionId) {
        let Some((_, entry)) = self.connections.remove(conn) else {
            return;
        };

        if let Some(user) = entry.identity {
            if let Some(set) = self.identities.get(&user) {
                set.remove(conn);
            }
            // Drop the index entry once its last connection is gone.
            self.identities.remove_if(&user, |_, set| set.is_empty());
        }

        debug!(connection = %conn, "Connection unregistered");
    }

    /// The identity bound to a connection, if any.
    #[must_use]
    pub fn identity_of(&self, conn: &ConnectionId) -> Option<UserId> {
        self.connections
            .get(conn)
            .and_then(|entry| entry.identity.clone())
    }

    /// All connections currently bound to an identity. May be empty.
    #[must_use]
    pub fn connections_for_identity(&self, user: &str) -> Vec<ConnectionId> {
        self.identities
            .get(user)
            .map(|set| set.iter().map(|c| c.clone()).collect())
            .unwrap_or_default()
    }

    /// Queue a frame to a connection.
    ///
    /// A vanished connection yields [`Deliver::Gone`] rather than an
    /// error; send racing close resolves to a silent drop.
    pub fn deliver(&self, conn: &ConnectionId, frame: Arc<Frame>) -> Deliver {
        match self.connections.get(conn) {
            Some(entry) => entry.outbound.push(frame),
            None => {
                debug!(connection = %conn, "Delivery to vanished connection dropped");
                Deliver::Gone
            }
        }
    }
}

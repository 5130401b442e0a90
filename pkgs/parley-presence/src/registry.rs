//! Connection registry
//!
//! This module tracks which identities hold a live socket:
//! - Registration of a connection under a user identity
//! - Handle-checked removal on disconnect
//! - Destination lookup for the router
//! - The presence roster (`all_online`)
//!
//! # Data Structures
//!
//! - **connections**: HashMap<UserId, Vec<Connection>> - every live handle per
//!   identity, oldest first
//!
//! Removal always names the connection id, never just the identity. A stale
//! disconnect from a superseded socket therefore cannot erase the mapping a
//! newer socket installed for the same user.

use chrono::{DateTime, Utc};
use parley_protocol::{ServerSignal, UserId};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::SessionPolicy;

/// Identity of one socket, unique for the life of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sending side of one socket's outbound queue
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<ServerSignal>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer task drains
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerSignal>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        (
            Self {
                id: ConnectionId::new(),
                outbound,
            },
            receiver,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a signal for this socket. Returns `false` if the socket is gone.
    pub fn send(&self, signal: ServerSignal) -> bool {
        self.outbound.send(signal).is_ok()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

/// A registered socket
#[derive(Debug, Clone)]
pub struct Connection {
    pub user_id: UserId,
    pub handle: ConnectionHandle,
    pub connected_at: DateTime<Utc>,
}

/// Result of a registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The identity was offline and is now online
    Online,
    /// The identity was already online; another session was added
    AdditionalSession,
    /// The identity was already online; its previous handle was superseded
    Replaced { previous: ConnectionId },
}

/// Result of an unregistration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The last handle of the identity was removed; it is now offline
    Offline,
    /// The handle was removed; other sessions keep the identity online
    SessionClosed,
    /// The handle was not registered (superseded or unknown); nothing changed
    Stale,
}

impl Removal {
    /// Whether the presence roster changed
    pub fn roster_changed(self) -> bool {
        self == Removal::Offline
    }
}

/// Identity → live connections
pub struct ConnectionRegistry {
    policy: SessionPolicy,
    connections: HashMap<UserId, Vec<Connection>>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            policy,
            connections: HashMap::new(),
        }
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    /// Install `handle` as a live connection for `user_id`.
    ///
    /// Under [`SessionPolicy::LastWriterWins`] any previous handle is dropped
    /// from the registry (its socket stays open but no longer resolves).
    pub fn register(&mut self, user_id: UserId, handle: ConnectionHandle) -> Registration {
        let connection = Connection {
            user_id: user_id.clone(),
            handle,
            connected_at: Utc::now(),
        };
        let sessions = self.connections.entry(user_id).or_default();

        if sessions.is_empty() {
            sessions.push(connection);
            return Registration::Online;
        }

        match self.policy {
            SessionPolicy::MultiSession => {
                sessions.push(connection);
                Registration::AdditionalSession
            }
            SessionPolicy::LastWriterWins => {
                let previous = sessions[sessions.len() - 1].handle.id();
                sessions.clear();
                sessions.push(connection);
                Registration::Replaced { previous }
            }
        }
    }

    /// Remove the connection `connection_id` registered for `user_id`.
    ///
    /// A handle that was already superseded leaves the current mapping
    /// untouched and yields [`Removal::Stale`].
    pub fn unregister(&mut self, user_id: &UserId, connection_id: ConnectionId) -> Removal {
        let Some(sessions) = self.connections.get_mut(user_id) else {
            return Removal::Stale;
        };
        let before = sessions.len();
        sessions.retain(|c| c.handle.id() != connection_id);
        if sessions.len() == before {
            return Removal::Stale;
        }
        if sessions.is_empty() {
            self.connections.remove(user_id);
            Removal::Offline
        } else {
            Removal::SessionClosed
        }
    }

    /// All live handles for `user_id`; empty when the identity is offline
    pub fn resolve(&self, user_id: &UserId) -> Vec<&ConnectionHandle> {
        self.connections
            .get(user_id)
            .map(|sessions| sessions.iter().map(|c| &c.handle).collect())
            .unwrap_or_default()
    }

    /// Connection records for `user_id`, oldest first
    pub fn connections_of(&self, user_id: &UserId) -> &[Connection] {
        self.connections
            .get(user_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.connections.contains_key(user_id)
    }

    /// Snapshot of the presence roster
    pub fn all_online(&self) -> BTreeSet<UserId> {
        self.connections.keys().cloned().collect()
    }

    /// Number of online identities
    pub fn online_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of registered handles across all identities
    pub fn connection_count(&self) -> usize {
        self.connections.values().map(Vec::len).sum()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(SessionPolicy::default())
    }
}

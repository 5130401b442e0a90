//! Event routing for live signals
//!
//! The router reacts to three discrete events (connect, inbound signal,
//! disconnect). Each reaction runs to completion before the next starts.

use parley_protocol::{ClientSignal, ServerSignal, UserId};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::SessionPolicy;
use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, Registration, Removal};

/// Work item for the router actor
#[derive(Debug)]
pub enum RouterCommand {
    Connected {
        handle: ConnectionHandle,
        user_id: Option<UserId>,
    },
    Inbound {
        connection_id: ConnectionId,
        signal: ClientSignal,
    },
    Disconnected {
        connection_id: ConnectionId,
    },
}

/// Why a signal was not delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The destination identity has no live connection
    Offline,
    /// The signal failed shape validation
    Malformed,
    /// The originating connection is not known to the router
    UnknownConnection,
    /// `identify` on a connection that already has an identity
    AlreadyIdentified,
}

/// Observable result of one routing step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Unicast to every live handle of the destination
    Delivered {
        event: &'static str,
        recipients: usize,
    },
    /// Full roster sent to all connections
    RosterBroadcast { online: usize, recipients: usize },
    Dropped {
        event: &'static str,
        reason: DropReason,
    },
}

/// A socket known to the router, identified or anonymous
struct Session {
    handle: ConnectionHandle,
    user_id: Option<UserId>,
}

/// Dispatches inbound signals to the connections of their destination
pub struct EventRouter {
    registry: ConnectionRegistry,
    sessions: HashMap<ConnectionId, Session>,
}

impl EventRouter {
    pub fn new(policy: SessionPolicy) -> Self {
        Self {
            registry: ConnectionRegistry::new(policy),
            sessions: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Number of open sockets, anonymous ones included
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Apply one actor command
    pub fn handle_command(&mut self, command: RouterCommand) -> RouteOutcome {
        match command {
            RouterCommand::Connected { handle, user_id } => self.connect(handle, user_id),
            RouterCommand::Inbound {
                connection_id,
                signal,
            } => self.dispatch(connection_id, signal),
            RouterCommand::Disconnected { connection_id } => self.disconnect(connection_id),
        }
    }

    /// A socket finished its handshake.
    ///
    /// Registers it when an identity was supplied, then broadcasts the roster.
    pub fn connect(&mut self, handle: ConnectionHandle, user_id: Option<UserId>) -> RouteOutcome {
        let connection_id = handle.id();
        if let Some(ref user_id) = user_id {
            self.register(user_id.clone(), handle.clone());
        } else {
            info!("Anonymous connection {}", connection_id);
        }
        self.sessions
            .insert(connection_id, Session { handle, user_id });
        self.broadcast_roster()
    }

    /// A socket closed. Unregisters its own handle only, then broadcasts.
    pub fn disconnect(&mut self, connection_id: ConnectionId) -> RouteOutcome {
        let Some(session) = self.sessions.remove(&connection_id) else {
            return RouteOutcome::Dropped {
                event: "disconnect",
                reason: DropReason::UnknownConnection,
            };
        };
        if let Some(user_id) = session.user_id {
            match self.registry.unregister(&user_id, connection_id) {
                Removal::Offline => {
                    info!("User {} disconnected ({})", user_id, connection_id)
                }
                Removal::SessionClosed => info!(
                    "Session {} of {} closed, other sessions remain",
                    connection_id, user_id
                ),
                Removal::Stale => debug!(
                    "Stale disconnect for {} ({}), current mapping kept",
                    user_id, connection_id
                ),
            }
        }
        self.broadcast_roster()
    }

    /// Route one inbound signal from `connection_id`
    pub fn dispatch(&mut self, connection_id: ConnectionId, signal: ClientSignal) -> RouteOutcome {
        let event = signal.name();
        if !self.sessions.contains_key(&connection_id) {
            return RouteOutcome::Dropped {
                event,
                reason: DropReason::UnknownConnection,
            };
        }
        if let Err(e) = signal.validate() {
            debug!("Dropping malformed {} from {}: {}", event, connection_id, e);
            return RouteOutcome::Dropped {
                event,
                reason: DropReason::Malformed,
            };
        }

        match signal {
            ClientSignal::Identify { user_id } => self.identify(connection_id, user_id),
            ClientSignal::MarkAsRead(pair) => self.unicast(
                event,
                &pair.sender_id,
                ServerSignal::MessageRead {
                    sender_id: pair.receiver_id,
                },
            ),
            ClientSignal::IsTyping(pair) => self.unicast(
                event,
                &pair.receiver_id,
                ServerSignal::Typing {
                    sender_id: pair.sender_id,
                },
            ),
            ClientSignal::StoppedTyping(pair) => self.unicast(
                event,
                &pair.receiver_id,
                ServerSignal::StoppedTyping {
                    sender_id: pair.sender_id,
                },
            ),
            ClientSignal::NewMessage(message) => {
                let receiver_id = message.receiver_id.clone();
                self.unicast(event, &receiver_id, ServerSignal::NewMessage(message))
            }
        }
    }

    fn identify(&mut self, connection_id: ConnectionId, user_id: UserId) -> RouteOutcome {
        let Some(session) = self.sessions.get_mut(&connection_id) else {
            return RouteOutcome::Dropped {
                event: "identify",
                reason: DropReason::UnknownConnection,
            };
        };
        if session.user_id.is_some() {
            return RouteOutcome::Dropped {
                event: "identify",
                reason: DropReason::AlreadyIdentified,
            };
        }
        session.user_id = Some(user_id.clone());
        let handle = session.handle.clone();
        self.register(user_id, handle);
        self.broadcast_roster()
    }

    fn register(&mut self, user_id: UserId, handle: ConnectionHandle) {
        let connection_id = handle.id();
        match self.registry.register(user_id.clone(), handle) {
            Registration::Online => info!("User {} connected ({})", user_id, connection_id),
            Registration::AdditionalSession => info!(
                "User {} opened another session ({})",
                user_id, connection_id
            ),
            Registration::Replaced { previous } => info!(
                "User {} reconnected ({}), superseding {}",
                user_id, connection_id, previous
            ),
        }
    }

    fn unicast(
        &self,
        event: &'static str,
        destination: &UserId,
        signal: ServerSignal,
    ) -> RouteOutcome {
        let handles = self.registry.resolve(destination);
        if handles.is_empty() {
            debug!("Dropping {} for offline user {}", event, destination);
            return RouteOutcome::Dropped {
                event,
                reason: DropReason::Offline,
            };
        }
        let recipients = handles
            .into_iter()
            .filter(|handle| handle.send(signal.clone()))
            .count();
        debug!("Routed {} to {} ({} sockets)", event, destination, recipients);
        RouteOutcome::Delivered { event, recipients }
    }

    fn broadcast_roster(&self) -> RouteOutcome {
        let online: Vec<UserId> = self.registry.all_online().into_iter().collect();
        let count = online.len();
        let signal = ServerSignal::GetOnlineUsers(online);
        let recipients = self
            .sessions
            .values()
            .filter(|session| session.handle.send(signal.clone()))
            .count();
        RouteOutcome::RosterBroadcast {
            online: count,
            recipients,
        }
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new(SessionPolicy::default())
    }
}

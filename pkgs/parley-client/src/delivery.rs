//! Message log of the open conversation
//!
//! The log has three inputs: REST history snapshots, REST responses to the
//! local user's own sends, and socket pushes from the peer. Every insert is
//! checked against the ids already present, and a push whose sender is the
//! local user is always ignored since the REST response already put it there.

use parley_protocol::{Message, MessageId, UserId};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// What happened to a pushed `newMessage`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Appended,
    /// Sent by the local user; the REST response owns it
    OwnEcho,
    /// From a peer whose conversation is not open
    OtherConversation,
    Duplicate,
    NoConversation,
}

/// Taken just before a history request is issued.
///
/// A snapshot answering the request can only be missing entries that arrived
/// after the ticket was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    generation: u64,
    mark: u64,
}

impl FetchTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug)]
pub struct DeliveryCoordinator {
    local: UserId,
    peer: Option<UserId>,
    generation: u64,
    log: Vec<Message>,
    ids: HashSet<MessageId>,
    /// Arrival sequence of entries no snapshot has confirmed yet
    live: HashMap<MessageId, u64>,
    sequence: u64,
}

impl DeliveryCoordinator {
    pub fn new(local: UserId) -> Self {
        Self {
            local,
            peer: None,
            generation: 0,
            log: Vec::new(),
            ids: HashSet::new(),
            live: HashMap::new(),
            sequence: 0,
        }
    }

    /// Detach the previous conversation and attach `peer`.
    ///
    /// Returns the new generation. Results tagged with an older generation
    /// are discarded.
    pub fn attach(&mut self, peer: Option<UserId>) -> u64 {
        self.peer = peer;
        self.generation += 1;
        self.log.clear();
        self.ids.clear();
        self.live.clear();
        self.generation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn peer(&self) -> Option<&UserId> {
        self.peer.as_ref()
    }

    /// Ticket for a history request about to be issued
    pub fn begin_fetch(&self) -> FetchTicket {
        FetchTicket {
            generation: self.generation,
            mark: self.sequence,
        }
    }

    /// Install an authoritative history snapshot.
    ///
    /// The snapshot replaces the log. Only entries that arrived after
    /// `ticket` was taken, and that the snapshot does not contain yet, are
    /// carried over; anything older that the snapshot lacks is gone from the
    /// server and leaves the log.
    pub fn replace_history(&mut self, ticket: FetchTicket, history: Vec<Message>) -> bool {
        if ticket.generation != self.generation {
            debug!(
                "Discarding history for generation {} (current {})",
                ticket.generation, self.generation
            );
            return false;
        }

        let carried: Vec<(Message, u64)> = {
            let snapshot_ids: HashSet<&MessageId> = history.iter().map(|m| &m.id).collect();
            self.log
                .iter()
                .filter(|m| !snapshot_ids.contains(&m.id))
                .filter_map(|m| match self.live.get(&m.id) {
                    Some(&arrived) if arrived > ticket.mark => Some((m.clone(), arrived)),
                    _ => None,
                })
                .collect()
        };

        self.log.clear();
        self.ids.clear();
        self.live.clear();
        for message in history {
            self.insert(message);
        }
        for (message, arrived) in carried {
            self.live.insert(message.id.clone(), arrived);
            self.insert(message);
        }
        true
    }

    /// Append the REST response to a local send
    pub fn append_sent(&mut self, generation: u64, message: Message) -> bool {
        if generation != self.generation {
            return false;
        }
        match &self.peer {
            Some(peer) if message.is_between(&self.local, peer) => {}
            _ => return false,
        }
        self.insert_live(message)
    }

    /// Apply a socket-pushed `newMessage`
    pub fn accept_push(&mut self, message: Message) -> PushOutcome {
        if message.sender_id == self.local {
            return PushOutcome::OwnEcho;
        }
        let Some(peer) = &self.peer else {
            return PushOutcome::NoConversation;
        };
        if &message.sender_id != peer || message.receiver_id != self.local {
            return PushOutcome::OtherConversation;
        }
        if self.insert_live(message) {
            PushOutcome::Appended
        } else {
            PushOutcome::Duplicate
        }
    }

    /// Replace an edited message in place. Read state never goes back to unread.
    pub fn replace(&mut self, mut message: Message) -> bool {
        match self.log.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => {
                message.is_read |= existing.is_read;
                *existing = message;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let index = self.log.iter().position(|m| &m.id == id)?;
        self.ids.remove(id);
        self.live.remove(id);
        Some(self.log.remove(index))
    }

    /// `reader` has read everything the local user sent them
    pub fn mark_read_by_peer(&mut self, reader: &UserId) -> usize {
        if self.peer.as_ref() != Some(reader) {
            return 0;
        }
        let local = &self.local;
        self.log
            .iter_mut()
            .filter(|m| &m.sender_id == local && &m.receiver_id == reader)
            .map(|m| m.mark_read())
            .filter(|changed| *changed)
            .count()
    }

    /// The local user has read everything the peer sent
    pub fn mark_incoming_read(&mut self) -> usize {
        let local = &self.local;
        self.log
            .iter_mut()
            .filter(|m| &m.receiver_id == local)
            .map(|m| m.mark_read())
            .filter(|changed| *changed)
            .count()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.log.iter().find(|m| &m.id == id)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.log
    }

    pub fn last(&self) -> Option<&Message> {
        self.log.last()
    }

    fn insert_live(&mut self, message: Message) -> bool {
        let id = message.id.clone();
        if self.insert(message) {
            self.sequence += 1;
            self.live.insert(id, self.sequence);
            true
        } else {
            false
        }
    }

    /// Insert keeping creation order; ties keep arrival order
    fn insert(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        let at = self
            .log
            .partition_point(|m| m.created_at <= message.created_at);
        self.log.insert(at, message);
        true
    }
}

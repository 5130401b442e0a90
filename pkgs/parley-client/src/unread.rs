//! Per-peer unread counters and previews
//!
//! The cache is fed by three sources: socket pushes, local actions, and the
//! reconciliation poll. The poll is authoritative and overwrites everything.

use parley_protocol::{Message, MessageId, UserId};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::time::Instant;

/// Sidebar state for one peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationState {
    pub peer_id: UserId,
    pub unread_count: u64,
    pub last_message_preview: Option<String>,
    pub last_message_is_mine: bool,
    pub last_message_id: Option<MessageId>,
    /// The peer has read the local user's latest message
    pub peer_has_read: bool,
    pub is_typing: bool,
    pub typing_expiry: Option<Instant>,
}

impl ConversationState {
    pub fn new(peer_id: UserId) -> Self {
        Self {
            peer_id,
            unread_count: 0,
            last_message_preview: None,
            last_message_is_mine: false,
            last_message_id: None,
            peer_has_read: false,
            is_typing: false,
            typing_expiry: None,
        }
    }

    fn set_last(&mut self, message: &Message, is_mine: bool) {
        self.last_message_preview = Some(message.preview());
        self.last_message_is_mine = is_mine;
        self.last_message_id = Some(message.id.clone());
    }
}

#[derive(Debug)]
pub struct UnreadTracker {
    local: UserId,
    conversations: BTreeMap<UserId, ConversationState>,
    /// Ids already counted since the last authoritative count, per peer
    counted: HashMap<UserId, HashSet<MessageId>>,
}

impl UnreadTracker {
    pub fn new(local: UserId) -> Self {
        Self {
            local,
            conversations: BTreeMap::new(),
            counted: HashMap::new(),
        }
    }

    pub fn conversation(&self, peer: &UserId) -> Option<&ConversationState> {
        self.conversations.get(peer)
    }

    pub fn conversations(&self) -> impl Iterator<Item = &ConversationState> {
        self.conversations.values()
    }

    pub fn total_unread(&self) -> u64 {
        self.conversations.values().map(|c| c.unread_count).sum()
    }

    fn entry(&mut self, peer: &UserId) -> &mut ConversationState {
        self.conversations
            .entry(peer.clone())
            .or_insert_with(|| ConversationState::new(peer.clone()))
    }

    /// Make sure `peer` has a state, e.g. after loading contacts
    pub fn track(&mut self, peer: &UserId) {
        self.entry(peer);
    }

    /// Optimistic zero when a conversation is opened or explicitly read.
    ///
    /// Returns `true` if the count changed.
    pub fn mark_opened(&mut self, peer: &UserId) -> bool {
        self.counted.remove(peer);
        let state = self.entry(peer);
        let changed = state.unread_count != 0;
        state.unread_count = 0;
        changed
    }

    /// A live message from a peer. Counted only when its conversation is not
    /// open. Returns `true` if the count changed.
    pub fn on_incoming(&mut self, message: &Message, conversation_open: bool) -> bool {
        if message.receiver_id != self.local || message.sender_id == self.local {
            return false;
        }
        let peer = message.sender_id.clone();
        self.entry(&peer).set_last(message, false);
        if conversation_open {
            return false;
        }
        if !self
            .counted
            .entry(peer.clone())
            .or_default()
            .insert(message.id.clone())
        {
            return false;
        }
        self.entry(&peer).unread_count += 1;
        true
    }

    pub fn on_outgoing(&mut self, message: &Message) {
        let state = self.entry(&message.receiver_id);
        state.set_last(message, true);
        state.peer_has_read = false;
    }

    /// `messageRead` from `reader`
    pub fn on_peer_read(&mut self, reader: &UserId) {
        self.entry(reader).peer_has_read = true;
    }

    /// Refresh the preview if the edited message is the latest one
    pub fn on_edited(&mut self, message: &Message) {
        let peer = message.counterpart(&self.local).clone();
        let state = self.entry(&peer);
        if state.last_message_id.as_ref() == Some(&message.id) {
            state.last_message_preview = Some(message.preview());
        }
    }

    pub fn set_typing(&mut self, peer: &UserId, expiry: Option<Instant>) {
        let state = self.entry(peer);
        state.is_typing = expiry.is_some();
        state.typing_expiry = expiry;
    }

    /// Overwrite the cache with authoritative values.
    ///
    /// Returns `true` if anything visible changed.
    pub fn reconcile(&mut self, peer: &UserId, unread_count: u64, last: Option<&Message>) -> bool {
        self.counted.remove(peer);
        let local = self.local.clone();
        let state = self.entry(peer);
        let before = state.clone();

        state.unread_count = unread_count;
        match last {
            Some(message) => {
                let is_mine = message.sender_id == local;
                state.set_last(message, is_mine);
                state.peer_has_read = is_mine && message.is_read;
            }
            None => {
                state.last_message_preview = None;
                state.last_message_is_mine = false;
                state.last_message_id = None;
                state.peer_has_read = false;
            }
        }
        *state != before
    }
}

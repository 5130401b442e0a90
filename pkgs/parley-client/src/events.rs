//! Events published by a chat session

use parley_protocol::{Message, MessageId, UserId};

/// State changes a UI layer reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// New roster from the presence server
    PresenceChanged { online: Vec<UserId> },
    TypingStarted { peer: UserId },
    /// Stop signal received, or the liveness timeout fired
    TypingStopped { peer: UserId },
    /// History snapshot installed for the open conversation
    HistoryLoaded { peer: UserId, count: usize },
    MessageAppended { message: Message },
    MessageUpdated { message: Message },
    MessageRemoved { id: MessageId },
    UnreadChanged { peer: UserId, unread_count: u64 },
    /// The peer read the local user's messages
    ReadByPeer { peer: UserId },
    /// One-shot notice for a failed REST call
    Notification { message: String },
}

//! Socket signals
//!
//! Both directions use a single tagged union each, so the routing contract is
//! visible in the type system: every inbound frame decodes to exactly one
//! [`ClientSignal`] and every outbound frame is exactly one [`ServerSignal`].

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::models::{Message, UserId};

/// Sender/receiver pair carried by typing and read signals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalPair {
    pub sender_id: UserId,
    pub receiver_id: UserId,
}

impl SignalPair {
    pub fn new(sender_id: impl Into<UserId>, receiver_id: impl Into<UserId>) -> Self {
        Self {
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
        }
    }
}

/// Client → server signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientSignal {
    /// Late identification for a connection opened without `userId`
    Identify {
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    /// The local user (`receiver_id`) has read everything from `sender_id`
    MarkAsRead(SignalPair),
    IsTyping(SignalPair),
    StoppedTyping(SignalPair),
    /// Announce a message that the REST layer already persisted
    NewMessage(Message),
}

impl ClientSignal {
    /// Event name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            ClientSignal::Identify { .. } => "identify",
            ClientSignal::MarkAsRead(_) => "markAsRead",
            ClientSignal::IsTyping(_) => "isTyping",
            ClientSignal::StoppedTyping(_) => "stoppedTyping",
            ClientSignal::NewMessage(_) => "newMessage",
        }
    }

    /// Minimal shape check: every identity the signal names must be non-empty
    pub fn validate(&self) -> Result<()> {
        let empty = match self {
            ClientSignal::Identify { user_id } => user_id.is_empty(),
            ClientSignal::MarkAsRead(pair)
            | ClientSignal::IsTyping(pair)
            | ClientSignal::StoppedTyping(pair) => {
                pair.sender_id.is_empty() || pair.receiver_id.is_empty()
            }
            ClientSignal::NewMessage(message) => {
                message.sender_id.is_empty()
                    || message.receiver_id.is_empty()
                    || message.id.as_str().is_empty()
            }
        };
        if empty {
            return Err(ProtocolError::EmptyIdentity(self.name()));
        }
        Ok(())
    }

    /// Decode one text frame
    pub fn from_frame(frame: &str) -> Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }

    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Server → client signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerSignal {
    /// Full presence roster, sent to everyone on every registry change
    GetOnlineUsers(Vec<UserId>),
    /// `sender_id` is the reader: the recipient's sent messages to them are read
    MessageRead {
        #[serde(rename = "senderId")]
        sender_id: UserId,
    },
    Typing {
        #[serde(rename = "senderId")]
        sender_id: UserId,
    },
    StoppedTyping {
        #[serde(rename = "senderId")]
        sender_id: UserId,
    },
    NewMessage(Message),
}

impl ServerSignal {
    pub fn name(&self) -> &'static str {
        match self {
            ServerSignal::GetOnlineUsers(_) => "getOnlineUsers",
            ServerSignal::MessageRead { .. } => "messageRead",
            ServerSignal::Typing { .. } => "typing",
            ServerSignal::StoppedTyping { .. } => "stoppedTyping",
            ServerSignal::NewMessage(_) => "newMessage",
        }
    }

    pub fn from_frame(frame: &str) -> Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }

    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

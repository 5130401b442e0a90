//! Parley Protocol - wire vocabulary for live chat signals
//!
//! This crate defines everything that crosses the socket between a Parley
//! client and the presence server:
//!
//! - **Identities**: [`UserId`] and [`MessageId`] newtypes
//! - **Messages**: the [`Message`] record produced by the REST persistence
//!   layer and re-announced over the socket
//! - **Signals**: [`ClientSignal`] (client → server) and [`ServerSignal`]
//!   (server → client) tagged unions, one JSON text frame each
//! - **Handshake**: the `userId` query parameter carried by the websocket
//!   upgrade request
//!
//! # Frame format
//!
//! ```json
//! {"event": "isTyping", "data": {"senderId": "alice", "receiverId": "bob"}}
//! ```
//!
//! Delivery of every signal is at-most-once. Nothing here is persisted.

pub mod error;
pub mod handshake;
pub mod models;
pub mod signals;

pub use error::{ProtocolError, Result};
pub use handshake::{socket_url, user_id_from_query, USER_ID_PARAM};
pub use models::{Message, MessageId, OutgoingMessage, UserId, IMAGE_PREVIEW};
pub use signals::{ClientSignal, ServerSignal, SignalPair};

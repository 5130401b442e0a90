//! Parley Client - live chat state on top of REST and the presence socket
//!
//! A [`ChatSession`] merges two transports into one consistent view:
//!
//! - **REST** ([`ChatApi`]): authoritative history, sends, read state, counts
//! - **Socket** ([`LiveSocket`]): at-most-once pushes of presence, typing,
//!   read receipts and new messages
//!
//! The pieces of state it keeps:
//!
//! - [`DeliveryCoordinator`]: duplicate-free, ordered log of the open
//!   conversation
//! - [`UnreadTracker`]: per-peer unread counters and previews
//! - [`TypingIndicator`] / [`TypingNotifier`]: remote and local typing with
//!   liveness timeouts
//!
//! A reconciliation task re-fetches counts and last messages on a fixed
//! interval, correcting anything the socket lost.
//!
//! # Example
//!
//! ```rust,no_run
//! use parley_client::{ChatSession, ClientConfig, ClientEvent};
//! use parley_protocol::UserId;
//!
//! # async fn example() -> parley_client::Result<()> {
//! let mut connected = ChatSession::connect(ClientConfig::default(), UserId::new("alice")).await?;
//! connected.session.open_conversation(&UserId::new("bob")).await?;
//! connected.session.send_text("hi").await?;
//!
//! while let Some(event) = connected.events.recv().await {
//!     if let ClientEvent::MessageAppended { message } = event {
//!         println!("{}: {}", message.sender_id, message.preview());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod delivery;
pub mod error;
pub mod events;
pub mod reconcile;
pub mod session;
pub mod socket;
pub mod typing;
pub mod unread;

pub use api::{ChatApi, Contact, RestApi};
pub use config::ClientConfig;
pub use delivery::{DeliveryCoordinator, FetchTicket, PushOutcome};
pub use error::{ClientError, Result};
pub use events::ClientEvent;
pub use reconcile::TaskHandle;
pub use session::{ChatSession, ConnectedSession};
pub use socket::{LiveSocket, SignalEmitter};
pub use typing::{TypingIndicator, TypingNotifier, TypingState};
pub use unread::{ConversationState, UnreadTracker};

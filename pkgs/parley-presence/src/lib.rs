//! Parley Presence - who is online, and where live signals go
//!
//! This crate is the server-resident half of Parley's live layer:
//!
//! - **ConnectionRegistry**: identity → live connection handles, the source of
//!   truth for the presence roster
//! - **EventRouter**: validates inbound signals, resolves destinations through
//!   the registry and unicasts them, dropping anything it cannot deliver
//! - **PresenceServer**: websocket listener feeding a single router actor
//!
//! # Concurrency
//!
//! The registry is owned by exactly one task (the router actor). Socket tasks
//! never touch it; they send [`RouterCommand`]s over an unbounded queue and the
//! actor applies them one at a time, so a register and a stale unregister for
//! the same identity can never interleave mid-mutation.
//!
//! # Delivery
//!
//! At-most-once. A signal for an identity with no live connection is dropped
//! without queueing, retrying, or telling the sender. Each connection has its
//! own outbound queue drained by one writer task, which gives FIFO per
//! connection and nothing stronger.

pub mod config;
pub mod error;
pub mod registry;
pub mod router;
pub mod server;

pub use config::{PresenceConfig, SessionPolicy};
pub use error::{PresenceError, Result};
pub use registry::{
    Connection, ConnectionHandle, ConnectionId, ConnectionRegistry, Registration, Removal,
};
pub use router::{DropReason, EventRouter, RouteOutcome, RouterCommand};
pub use server::PresenceServer;

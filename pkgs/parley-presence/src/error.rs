//! Error types for the presence server

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PresenceError>;

/// Errors that can occur while running the presence server.
///
/// Undeliverable signals are not errors; the router drops them.
#[derive(Error, Debug)]
pub enum PresenceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Protocol error: {0}")]
    ProtocolError(#[from] parley_protocol::ProtocolError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

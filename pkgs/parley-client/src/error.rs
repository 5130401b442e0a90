//! Error types for the chat client

use parley_protocol::MessageId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by client operations.
///
/// Lost socket signals are never reported here; only REST failures and misuse
/// of the session are.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("API error ({status}): {message}")]
    ApiError { status: u16, message: String },
    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Protocol error: {0}")]
    ProtocolError(#[from] parley_protocol::ProtocolError),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("No conversation is open")]
    NoOpenConversation,
    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),
    #[error("Message has neither text nor image")]
    EmptyMessage,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

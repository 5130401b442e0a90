//! Error types for wire encoding and validation

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while decoding or validating socket frames
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Empty identity in {0} signal")]
    EmptyIdentity(&'static str),
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

//! Presence server configuration

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Default TCP port for the presence socket
pub const DEFAULT_PORT: u16 = 5001;

/// How the registry treats a second connection for the same identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionPolicy {
    /// One handle per identity; a new connection silently supersedes the old one
    LastWriterWins,
    /// Every live connection is tracked; the identity is online while any remains
    #[default]
    MultiSession,
}

/// Configuration for the presence server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Address the websocket listener binds to
    pub listen_addr: SocketAddr,
    /// Registry behavior for repeated connections of one identity
    pub session_policy: SessionPolicy,
    /// Largest accepted websocket frame/message in bytes (min: 1 KiB, max: 16 MiB)
    pub max_frame_bytes: usize,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            session_policy: SessionPolicy::default(),
            max_frame_bytes: 64 * 1024,
        }
    }
}

impl PresenceConfig {
    const MIN_FRAME_BYTES: usize = 1024;
    const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

    /// Validates the configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.max_frame_bytes < Self::MIN_FRAME_BYTES {
            return Err(format!(
                "Frame limit too small: {} bytes (min: {})",
                self.max_frame_bytes,
                Self::MIN_FRAME_BYTES
            ));
        }
        if self.max_frame_bytes > Self::MAX_FRAME_BYTES {
            return Err(format!(
                "Frame limit too large: {} bytes (max: {})",
                self.max_frame_bytes,
                Self::MAX_FRAME_BYTES
            ));
        }
        Ok(())
    }
}

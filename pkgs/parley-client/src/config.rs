//! Client configuration

use std::time::Duration;

/// Configuration for a chat session
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST collaborator, e.g. `http://localhost:5001/api/`
    pub api_base_url: String,
    /// Base URL of the presence socket, e.g. `ws://localhost:5001/`
    pub socket_url: String,
    /// Session token sent as the `jwt` cookie
    pub auth_token: Option<String>,
    /// Silence after which a remote typing indicator clears itself (min: 1s, max: 30s)
    pub typing_timeout: Duration,
    /// Local inactivity after which `stoppedTyping` is announced (min: 500ms, max: 10s)
    pub typing_idle: Duration,
    /// Period of the unread/last-message reconciliation poll (min: 1s, max: 5min)
    pub reconcile_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5001/api/".to_string(),
            socket_url: "ws://localhost:5001/".to_string(),
            auth_token: None,
            typing_timeout: Duration::from_secs(4),
            typing_idle: Duration::from_secs(2),
            reconcile_interval: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    const MIN_TYPING_TIMEOUT: Duration = Duration::from_secs(1);
    const MAX_TYPING_TIMEOUT: Duration = Duration::from_secs(30);
    const MIN_TYPING_IDLE: Duration = Duration::from_millis(500);
    const MAX_TYPING_IDLE: Duration = Duration::from_secs(10);
    const MIN_RECONCILE_INTERVAL: Duration = Duration::from_secs(1);
    const MAX_RECONCILE_INTERVAL: Duration = Duration::from_secs(5 * 60);

    /// Validates the configuration parameters
    ///
    /// # Returns
    /// - `Ok(())` - Configuration is valid
    /// - `Err(String)` - Describes which parameter is invalid and why
    pub fn validate(&self) -> Result<(), String> {
        for (name, url) in [("API", &self.api_base_url), ("socket", &self.socket_url)] {
            if let Err(e) = url::Url::parse(url) {
                return Err(format!("Invalid {} URL '{}': {}", name, url, e));
            }
        }

        check_range(
            "Typing timeout",
            self.typing_timeout,
            Self::MIN_TYPING_TIMEOUT,
            Self::MAX_TYPING_TIMEOUT,
        )?;
        check_range(
            "Typing idle window",
            self.typing_idle,
            Self::MIN_TYPING_IDLE,
            Self::MAX_TYPING_IDLE,
        )?;
        check_range(
            "Reconcile interval",
            self.reconcile_interval,
            Self::MIN_RECONCILE_INTERVAL,
            Self::MAX_RECONCILE_INTERVAL,
        )?;

        if self.typing_idle >= self.typing_timeout {
            return Err(format!(
                "Typing idle window {:?} must be shorter than the typing timeout {:?}",
                self.typing_idle, self.typing_timeout
            ));
        }
        Ok(())
    }
}

fn check_range(name: &str, value: Duration, min: Duration, max: Duration) -> Result<(), String> {
    if value < min {
        return Err(format!("{} too short: {:?} (min: {:?})", name, value, min));
    }
    if value > max {
        return Err(format!("{} too long: {:?} (max: {:?})", name, value, max));
    }
    Ok(())
}

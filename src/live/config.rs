//! Live manager tuning.

use std::time::Duration;

use crate::error::{LiveError, LiveResult};

/// Timing and retry bounds for every managed channel.
///
/// Override single fields with struct update syntax:
///
/// ```rust,ignore
/// let config = LiveConfig {
///     stats_interval: Duration::from_secs(2),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveConfig {
    /// Automatic reconnects before giving up on an entity.
    pub max_reconnect_attempts: u32,
    /// Reconnect delay is `reconnect_base_delay × attempt`.
    pub reconnect_base_delay: Duration,
    /// Period of `send stats` requests while the agent is active.
    pub stats_interval: Duration,
    /// Refresh this long before the token expires.
    pub token_refresh_lead: Duration,
    /// Lower bound on the refresh delay.
    pub token_refresh_floor: Duration,
    /// Wait for `auth success` / `auth_error` after the socket opens.
    pub auth_timeout: Duration,
    /// Socket open deadline.
    pub connect_timeout: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_secs(5),
            stats_interval: Duration::from_secs(5),
            token_refresh_lead: Duration::from_secs(60),
            token_refresh_floor: Duration::from_secs(5),
            auth_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl LiveConfig {
    pub fn validate(&self) -> LiveResult<()> {
        let durations = [
            ("reconnect_base_delay", self.reconnect_base_delay),
            ("stats_interval", self.stats_interval),
            ("token_refresh_floor", self.token_refresh_floor),
            ("auth_timeout", self.auth_timeout),
            ("connect_timeout", self.connect_timeout),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(LiveError::Other(format!("{} must be non-zero", name)));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(LiveError::Other(
                "max_reconnect_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

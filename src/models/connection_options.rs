use serde::{Deserialize, Serialize};

/// Connection-level options for the realtime stream.
///
/// These options control:
/// - Automatic reconnection on connection loss
/// - The fixed delay between reconnection attempts (a `retry:` hint sent by
///   the server takes precedence)
/// - How many consecutive failed attempts are tolerated before giving up
///
/// Separate from [`SubscriptionOptions`](crate::SubscriptionOptions) which
/// shape individual subscriptions.
///
/// # Example
///
/// ```rust
/// use pocket_link::ConnectionOptions;
///
/// let options = ConnectionOptions::default()
///     .with_auto_reconnect(true)
///     .with_reconnect_delay_ms(2000)
///     .with_max_reconnect_attempts(Some(10));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    /// Enable automatic reconnection on connection loss
    /// Default: true
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Delay in milliseconds between reconnection attempts when the server
    /// did not suggest one
    /// Default: 3000ms
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Maximum number of consecutive reconnection attempts before giving up
    /// Default: None (infinite retries)
    /// Set to Some(0) to fail on the first connection loss
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: default_auto_reconnect(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: None,
        }
    }
}

impl ConnectionOptions {
    /// Create new connection options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to automatically reconnect on connection loss
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Set the delay between reconnection attempts (in milliseconds)
    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    /// Set the maximum number of reconnection attempts
    /// Pass None for infinite retries
    pub fn with_max_reconnect_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self
    }

    /// Whether another reconnection attempt is allowed after `failed`
    /// consecutive failures.
    pub(crate) fn allows_attempt(&self, failed: u32) -> bool {
        self.auto_reconnect && self.max_reconnect_attempts.map_or(true, |max| failed < max)
    }
}

//! Timeout configuration for pocket-link client operations.
//!
//! Provides centralized timeout management for REST requests, the realtime
//! stream handshake, subscription waits and subscription submissions.

use std::time::Duration;

/// Timeout configuration for pocket-link client operations.
///
/// A zero duration disables the corresponding timeout.
///
/// # Examples
///
/// ```rust
/// use pocket_link::PocketLinkTimeouts;
/// use std::time::Duration;
///
/// // Use defaults (recommended for most cases)
/// let timeouts = PocketLinkTimeouts::default();
///
/// // Custom timeouts for high-latency environments
/// let timeouts = PocketLinkTimeouts::builder()
///     .connection_timeout(Duration::from_secs(60))
///     .subscribe_timeout(Duration::from_secs(120))
///     .build();
///
/// // Aggressive timeouts for local development
/// let timeouts = PocketLinkTimeouts::fast();
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PocketLinkTimeouts {
    /// Timeout for establishing connections (TCP + TLS handshake).
    /// Default: 10 seconds
    pub connection_timeout: Duration,

    /// Overall timeout for a single REST request.
    /// Default: 30 seconds
    pub request_timeout: Duration,

    /// How long `subscribe` waits for the realtime connection to be
    /// announced by the server.
    /// Default: 15 seconds
    pub subscribe_timeout: Duration,

    /// Timeout for the subscription submission request.
    /// Default: 10 seconds
    pub submit_timeout: Duration,
}

impl Default for PocketLinkTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            subscribe_timeout: Duration::from_secs(15),
            submit_timeout: Duration::from_secs(10),
        }
    }
}

impl PocketLinkTimeouts {
    /// Create a new builder starting from the defaults.
    pub fn builder() -> PocketLinkTimeoutsBuilder {
        PocketLinkTimeoutsBuilder::new()
    }

    /// Create timeouts optimized for local development and tests.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            subscribe_timeout: Duration::from_secs(2),
            submit_timeout: Duration::from_secs(2),
        }
    }

    /// Create timeouts optimized for high-latency or unreliable networks.
    pub fn relaxed() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
            subscribe_timeout: Duration::from_secs(60),
            submit_timeout: Duration::from_secs(30),
        }
    }

    /// Returns `true` when `duration` means "no timeout".
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero()
    }
}

/// Builder for [`PocketLinkTimeouts`].
#[derive(Debug, Clone)]
pub struct PocketLinkTimeoutsBuilder {
    timeouts: PocketLinkTimeouts,
}

impl PocketLinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: PocketLinkTimeouts::default(),
        }
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    pub fn connection_timeout_secs(self, secs: u64) -> Self {
        self.connection_timeout(Duration::from_secs(secs))
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.request_timeout = timeout;
        self
    }

    pub fn request_timeout_secs(self, secs: u64) -> Self {
        self.request_timeout(Duration::from_secs(secs))
    }

    pub fn subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.subscribe_timeout = timeout;
        self
    }

    pub fn subscribe_timeout_secs(self, secs: u64) -> Self {
        self.subscribe_timeout(Duration::from_secs(secs))
    }

    pub fn submit_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.submit_timeout = timeout;
        self
    }

    pub fn submit_timeout_secs(self, secs: u64) -> Self {
        self.submit_timeout(Duration::from_secs(secs))
    }

    pub fn build(self) -> PocketLinkTimeouts {
        self.timeouts
    }
}

/// Run `fut` under `timeout` unless the timeout is disabled.
pub(crate) async fn with_timeout<F, T>(
    timeout: Duration,
    what: &str,
    fut: F,
) -> crate::error::Result<T>
where
    F: std::future::Future<Output = crate::error::Result<T>>,
{
    if PocketLinkTimeouts::is_no_timeout(timeout) {
        return fut.await;
    }
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(crate::error::PocketLinkError::TimeoutError(format!(
            "{} timed out after {:?}",
            what, timeout
        ))),
    }
}

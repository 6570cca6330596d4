//! Timeout configuration for quarry-link client operations.
//!
//! Provides centralized timeout management for HTTP requests and the
//! background heartbeat of long-running queries.

use std::time::Duration;

/// Network deadlines and the heartbeat cadence of a [`QuarryLinkClient`].
///
/// ```rust
/// use quarry_link::QuarryLinkTimeouts;
///
/// // long-polling pages of up to two minutes
/// let timeouts = QuarryLinkTimeouts::builder()
///     .receive_timeout_secs(150)
///     .heartbeat_interval_secs(20)
///     .build();
/// assert!(timeouts.heartbeat_enabled());
///
/// let local = QuarryLinkTimeouts::fast();
/// assert!(local.connection_timeout < timeouts.connection_timeout);
/// ```
///
/// [`QuarryLinkClient`]: crate::QuarryLinkClient
#[derive(Debug, Clone)]
pub struct QuarryLinkTimeouts {
    /// TCP connect plus TLS handshake, per node. Default 10s.
    pub connection_timeout: Duration,

    /// Timeout for a single HTTP exchange, request sent to body received.
    /// Must exceed the pagination `wait_time_secs` the server may hold a page for.
    /// Default 60s.
    pub receive_timeout: Duration,

    /// Interval between keepalive heartbeats of a query whose rows are still
    /// being consumed. Zero disables heartbeats. Default 30s.
    pub heartbeat_interval: Duration,
}

impl Default for QuarryLinkTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            receive_timeout: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl QuarryLinkTimeouts {
    /// Start from the defaults and override individual values.
    pub fn builder() -> QuarryLinkTimeoutsBuilder {
        QuarryLinkTimeoutsBuilder::new()
    }

    /// Short deadlines for a server on the same host or LAN.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            receive_timeout: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(10),
        }
    }

    /// Generous deadlines for remote clusters and slow warehouses.
    pub fn relaxed() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            receive_timeout: Duration::from_secs(180),
            heartbeat_interval: Duration::from_secs(60),
        }
    }

    /// Whether heartbeats are enabled by this configuration.
    pub fn heartbeat_enabled(&self) -> bool {
        !self.heartbeat_interval.is_zero()
    }
}

/// Builder for creating custom [`QuarryLinkTimeouts`] configurations.
#[derive(Debug, Clone)]
pub struct QuarryLinkTimeoutsBuilder {
    timeouts: QuarryLinkTimeouts,
}

impl QuarryLinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: QuarryLinkTimeouts::default(),
        }
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    pub fn connection_timeout_secs(self, secs: u64) -> Self {
        self.connection_timeout(Duration::from_secs(secs))
    }

    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.receive_timeout = timeout;
        self
    }

    pub fn receive_timeout_secs(self, secs: u64) -> Self {
        self.receive_timeout(Duration::from_secs(secs))
    }

    /// A zero interval disables heartbeats.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.timeouts.heartbeat_interval = interval;
        self
    }

    pub fn heartbeat_interval_secs(self, secs: u64) -> Self {
        self.heartbeat_interval(Duration::from_secs(secs))
    }

    pub fn build(self) -> QuarryLinkTimeouts {
        self.timeouts
    }
}

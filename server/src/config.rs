//! Runtime tuning for a sync node

use std::time::Duration;

/// Timeouts and intervals that bound every suspending operation of the node.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upper bound on one cross-process directory lookup
    pub lookup_timeout: Duration,
    /// Upper bound on one remote notification send
    pub delivery_timeout: Duration,
    /// A local session with no traffic for this long is dropped
    pub session_timeout: Duration,
    /// How often the node sweeps for timed-out sessions
    pub sweep_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_millis(500),
            delivery_timeout: Duration::from_millis(500),
            session_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

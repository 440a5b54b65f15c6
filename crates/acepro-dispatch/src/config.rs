use std::time::Duration;

use crate::health::StabilityConfig;

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum requests in flight at once.
    pub window: usize,
    /// Age at which an in-flight request resolves as "no response".
    pub response_timeout: Duration,
    /// Capacity of each priority queue.
    pub queue_capacity: usize,
    /// Scheduler tick.
    pub tick: Duration,
    /// Idle time before an opportunistic `get_status` is sent.
    pub idle_status_interval: Duration,
    /// Delay between reconnect attempts.
    pub reconnect_interval: Duration,
    /// Queue a `get_info` right after each connect.
    pub query_info_on_connect: bool,
    /// When reconnects make a link count as unstable.
    pub stability: StabilityConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            window: 2,
            response_timeout: Duration::from_secs(2),
            queue_capacity: 1024,
            tick: Duration::from_millis(50),
            idle_status_interval: Duration::from_millis(1500),
            reconnect_interval: Duration::from_secs(1),
            query_info_on_connect: true,
            stability: StabilityConfig::default(),
        }
    }
}

//! Link stability bookkeeping.
//!
//! Every connect attempt after the first is a reconnect. A link is stable
//! once it has stayed up for the grace period and fewer than `threshold`
//! reconnects fall inside the rolling window.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::dispatcher::ConnectionState;

/// Thresholds for calling a link stable.
#[derive(Debug, Clone)]
pub struct StabilityConfig {
    /// Reconnects inside `window` that mark a link unstable.
    pub threshold: usize,
    pub window: Duration,
    /// Uptime a fresh link needs before it counts as stable.
    pub grace: Duration,
    /// Uptime after which reconnects leading up to this link are forgotten.
    pub reset_after: Duration,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            threshold: 6,
            window: Duration::from_secs(180),
            grace: Duration::from_secs(30),
            reset_after: Duration::from_secs(60),
        }
    }
}

/// Snapshot of one link's health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub stable: bool,
    pub recent_reconnects: usize,
    pub threshold: usize,
    /// Uptime of the current link; `None` while disconnected.
    pub time_connected: Option<Duration>,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Reconnects reached the threshold.
    pub fn is_flapping(&self) -> bool {
        self.recent_reconnects >= self.threshold
    }
}

#[derive(Debug, Default)]
pub(crate) struct LinkHealth {
    reconnects: VecDeque<Instant>,
    connected_at: Option<Instant>,
}

impl LinkHealth {
    pub(crate) fn record_reconnect(&mut self, now: Instant, window: Duration) {
        self.prune(now, window);
        self.reconnects.push_back(now);
    }

    pub(crate) fn connected(&mut self, now: Instant) {
        self.connected_at = Some(now);
    }

    pub(crate) fn disconnected(&mut self) {
        self.connected_at = None;
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while self
            .reconnects
            .front()
            .is_some_and(|at| now.saturating_duration_since(*at) > window)
        {
            self.reconnects.pop_front();
        }
    }

    pub(crate) fn status(
        &mut self,
        state: ConnectionState,
        now: Instant,
        config: &StabilityConfig,
    ) -> ConnectionStatus {
        self.prune(now, config.window);

        let connected_at = self
            .connected_at
            .filter(|_| state == ConnectionState::Connected);
        let time_connected = connected_at.map(|at| now.saturating_duration_since(at));

        if let (Some(at), Some(up)) = (connected_at, time_connected) {
            if up >= config.reset_after {
                self.reconnects.retain(|stamp| *stamp > at);
            }
        }

        let recent_reconnects = self.reconnects.len();
        let stable = time_connected.is_some_and(|up| up >= config.grace)
            && recent_reconnects < config.threshold;

        ConnectionStatus {
            state,
            stable,
            recent_reconnects,
            threshold: config.threshold,
            time_connected,
        }
    }
}

//! Exponential reconnect backoff for fleet sessions.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::FleetConfig;

/// Backoff state for one session's reconnect loop
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound for any delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles each time)
    pub backoff_multiplier: f64,
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(200), Duration::from_secs(10), 1.5)
    }
}

impl Backoff {
    pub fn new(initial_delay: Duration, max_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            backoff_multiplier,
            current: initial_delay,
        }
    }

    pub fn from_config(config: &FleetConfig) -> Self {
        Self::new(
            Duration::from_millis(config.reconnect_initial_delay_ms),
            Duration::from_millis(config.reconnect_max_delay_ms),
            2.0,
        )
    }

    /// Delay to wait now; the following call returns a longer one, capped at `max_delay`.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.max_delay);
        self.current = Duration::from_millis(
            ((self.current.as_millis() as f64) * self.backoff_multiplier) as u64,
        )
        .min(self.max_delay);
        delay
    }

    /// Back to `initial_delay`, after a successful connect
    pub fn reset(&mut self) {
        self.current = self.initial_delay;
    }

    /// Sleep for the next delay. Returns false if cancelled first.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> bool {
        let delay = self.next_delay();
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

//! Scheduler tuning knobs.

use std::time::Duration;

/// Configuration for the scheduler. Defaults match production behavior;
/// tests shrink the delays.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Restart attempts per window before giving up until the next one.
    pub max_crash_retries: u32,
    /// First crash-recovery delay; each further attempt triples it.
    pub backoff_base: Duration,
    /// How late a trigger may fire and still be honored. Later firings are
    /// treated as missed and skipped.
    pub misfire_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_crash_retries: 3,
            backoff_base: Duration::from_secs(10),
            misfire_grace: Duration::from_secs(300),
        }
    }
}

impl SchedulerConfig {
    /// Delay before restart attempt `attempt` (1-based): `base * 3^(n-1)`,
    /// i.e. 10s, 30s, 90s with defaults.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_base * 3u32.pow(attempt.saturating_sub(1))
    }
}

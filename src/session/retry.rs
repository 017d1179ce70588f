//! Reconnect policy and backoff for channel failures.

use std::time::Duration;

/// Default number of consecutive reconnect attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (1 second).
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Maximum delay cap for exponential backoff (60 seconds).
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Calculate exponential backoff delay with jitter.
///
/// Uses `min(base * 2^attempt + jitter, max)` where jitter is half the base,
/// capped at 500ms.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponential = base.saturating_mul(2u32.saturating_pow(attempt));
    let jitter_ms = (base.as_millis() as u64).min(1000);
    let jitter = Duration::from_millis(jitter_ms / 2);
    exponential.saturating_add(jitter).min(max)
}

/// Whether and how a session restarts after the channel fails.
///
/// Disabled by default: a failed channel leaves the console idle until the
/// operator starts it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Delay before reconnect attempt `attempt` (0-based), or `None` when
    /// reconnecting is off or attempts are exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if !self.enabled || attempt >= self.max_attempts {
            return None;
        }
        Some(calculate_backoff(attempt, self.backoff_base, self.backoff_max))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
        }
    }
}

use crate::config::{RECONNECT_INITIAL_DELAY_MS, RECONNECT_MAX_DELAY_MS, RECONNECT_MAX_RETRIES};
use std::time::Duration;

/// Exponential backoff schedule for progress stream reconnects.
///
/// The delay before reconnect number `n + 1` is
/// `min(initial_delay * 2^n, max_delay)`, where `n` is the number of
/// consecutive transport failures seen since the last decoded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Reconnects allowed before the stream gives up
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(RECONNECT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(RECONNECT_MAX_DELAY_MS),
            max_retries: RECONNECT_MAX_RETRIES,
        }
    }
}

impl ReconnectPolicy {
    /// Delay to wait after a failure when `retry_count` failures preceded it.
    ///
    /// # Examples
    ///
    /// ```
    /// use download_tracker::progress::ReconnectPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = ReconnectPolicy::default();
    /// assert_eq!(policy.delay_for(0), Duration::from_secs(1));
    /// assert_eq!(policy.delay_for(4), Duration::from_secs(16));
    /// assert_eq!(policy.delay_for(5), Duration::from_secs(30));
    /// ```
    #[must_use]
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Whether reconnect number `attempt` (1-based) is still allowed.
    #[must_use]
    pub const fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }
}

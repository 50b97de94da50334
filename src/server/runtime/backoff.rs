//! Retry timing for failed `accept()` calls.

use std::time::Duration;

/// Exponential back-off applied when the listener fails to accept.
///
/// The delay starts at `initial_delay`, doubles after every consecutive
/// failure up to `max_delay`, and resets after a successful accept.
///
/// Defaults: 10 ms initial, 1 s maximum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound for the delay.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl BackoffConfig {
    /// Clamp both delays to at least 1 ms and order them.
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use wirechain::server::BackoffConfig;
    ///
    /// let cfg = BackoffConfig {
    ///     initial_delay: Duration::ZERO,
    ///     max_delay: Duration::from_millis(5),
    /// }
    /// .normalized();
    /// assert_eq!(cfg.initial_delay, Duration::from_millis(1));
    /// ```
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.initial_delay = self.initial_delay.max(Duration::from_millis(1));
        self.max_delay = self.max_delay.max(Duration::from_millis(1));
        if self.initial_delay > self.max_delay {
            std::mem::swap(&mut self.initial_delay, &mut self.max_delay);
        }
        self
    }

    /// Delay to use after a failure that followed `current`.
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration { (current * 2).min(self.max_delay) }
}

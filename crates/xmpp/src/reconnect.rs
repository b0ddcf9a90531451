use std::time::Duration;

/// Linear reconnect backoff.
///
/// Each scheduled reconnect uses the current delay and then grows it by one
/// step, clamped to the ceiling. A successful connect resets it to zero, so
/// the delay before automatic attempt `k` is `min(ceiling, (k - 1) * step)`.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    step: Duration,
    ceiling: Duration,
    delay: Duration,
    attempt: u32,
}

impl ReconnectPolicy {
    pub const DEFAULT_STEP: Duration = Duration::from_millis(1_000);
    pub const DEFAULT_CEILING: Duration = Duration::from_millis(30_000);

    pub fn new(step: Duration, ceiling: Duration) -> Self {
        Self {
            step,
            ceiling,
            delay: Duration::ZERO,
            attempt: 0,
        }
    }

    /// Delay the next scheduled reconnect will use.
    pub fn current_delay(&self) -> Duration {
        self.delay
    }

    /// Number of reconnects scheduled since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the delay for the reconnect being scheduled now and advances
    /// the policy for the one after it.
    pub fn next_delay(&mut self) -> Duration {
        let scheduled = self.delay;
        self.delay = self.delay.saturating_add(self.step).min(self.ceiling);
        self.attempt = self.attempt.saturating_add(1);
        scheduled
    }

    pub fn reset(&mut self) {
        self.delay = Duration::ZERO;
        self.attempt = 0;
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_STEP, Self::DEFAULT_CEILING)
    }
}

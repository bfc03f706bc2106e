use crate::stop::StopSignal;
use std::time::{Duration, Instant};

/// Exponential idle backoff for a consumer polling the exchange.
///
/// Defaults suit a low-latency loop:
/// - first wait 100µs, doubling each idle iteration
/// - capped at 2ms, so a new frame is noticed within ~2ms worst case
#[derive(Debug, Clone)]
pub struct IdleBackoff {
    pub base_delay: Duration,
    pub max_delay: Duration,
    attempt: u32,
}

impl Default for IdleBackoff {
    fn default() -> Self {
        Self::new(Duration::from_micros(100), Duration::from_millis(2))
    }
}

impl IdleBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            attempt: 0,
        }
    }

    pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }

    /// Delay the next idle wait will use.
    pub fn next_delay(&self) -> Duration {
        self.delay_for_attempt(self.attempt)
    }

    /// Sleep for the current delay, then grow it. Returns early if `stop` is set.
    pub fn idle(&mut self, stop: &StopSignal) {
        let deadline = Instant::now() + self.next_delay();
        self.attempt = self.attempt.saturating_add(1);

        // Short slices keep the wait interruptible without a busy spin.
        let slice = self.base_delay.max(Duration::from_micros(50));
        loop {
            if stop.is_set() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            std::thread::sleep((deadline - now).min(slice));
        }
    }

    /// Back to the base delay after useful work.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

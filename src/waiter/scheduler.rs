use std::sync::Arc;
use std::time::Duration;

use crate::extensions::{JitterSource, RandomJitter};
use crate::retry::backoff::scale_duration;

/// Computes the pause before each poll after the first.
#[derive(Clone)]
pub struct WaiterScheduler {
    min_delay: Duration,
    max_delay: Duration,
    max_wait_time: Duration,
    shorten_final_delay: bool,
    jitter_source: Arc<dyn JitterSource>,
}

impl std::fmt::Debug for WaiterScheduler {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("WaiterScheduler")
            .field("min_delay", &self.min_delay)
            .field("max_delay", &self.max_delay)
            .field("max_wait_time", &self.max_wait_time)
            .field("shorten_final_delay", &self.shorten_final_delay)
            .finish_non_exhaustive()
    }
}

impl WaiterScheduler {
    pub fn new(min_delay: Duration, max_delay: Duration, max_wait_time: Duration) -> Self {
        Self {
            min_delay,
            max_delay,
            max_wait_time,
            shorten_final_delay: false,
            jitter_source: Arc::new(RandomJitter),
        }
    }

    /// Instead of timing out when the next delay overruns the budget, shrink
    /// it so that `min_delay` of budget is left for one more poll.
    pub fn shorten_final_delay(mut self, enabled: bool) -> Self {
        self.shorten_final_delay = enabled;
        self
    }

    pub fn jitter_source(mut self, jitter_source: Arc<dyn JitterSource>) -> Self {
        self.jitter_source = jitter_source;
        self
    }

    pub fn max_wait_time(&self) -> Duration {
        self.max_wait_time
    }

    /// Upper bound of the delay before `attempt` (2 or more), before jitter.
    pub fn capped_delay(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(2).min(31) as u32;
        self.min_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
    }

    /// Delay before `attempt`, or `None` when waiting that long would run
    /// past `max_wait_time`.
    pub fn next_delay(&self, attempt: usize, elapsed: Duration) -> Option<Duration> {
        let remaining = self.max_wait_time.saturating_sub(elapsed);
        if remaining.is_zero() || remaining < self.min_delay {
            return None;
        }

        let capped = self.capped_delay(attempt);
        let spread = capped.saturating_sub(self.min_delay);
        let delay = self.min_delay + scale_duration(spread, self.jitter_source.sample());
        if delay <= remaining {
            return Some(delay);
        }
        if !self.shorten_final_delay {
            return None;
        }
        // a zero delay would poll again without waiting
        let shortened = remaining - self.min_delay;
        (!shortened.is_zero()).then_some(shortened)
    }
}

use std::sync::Arc;
use std::time::Duration;

use crate::extensions::{JitterSource, RandomJitter};

pub trait BackoffStrategy: Send + Sync {
    /// Delay to wait after the given 1-based failed attempt.
    fn delay_for_attempt(&self, attempt: usize) -> Duration;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Jitter {
    /// Uniform draw in `[0, capped]`.
    #[default]
    Full,
    None,
}

/// `min(scale * 2^(attempt-1), max_backoff)`, optionally fully jittered.
#[derive(Clone)]
pub struct ExponentialBackoff {
    scale: Duration,
    max_backoff: Duration,
    jitter: Jitter,
    jitter_source: Arc<dyn JitterSource>,
}

impl std::fmt::Debug for ExponentialBackoff {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ExponentialBackoff")
            .field("scale", &self.scale)
            .field("max_backoff", &self.max_backoff)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl ExponentialBackoff {
    pub fn new(scale: Duration, max_backoff: Duration) -> Self {
        Self {
            scale,
            max_backoff,
            jitter: Jitter::Full,
            jitter_source: Arc::new(RandomJitter),
        }
    }

    pub fn standard() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(20))
    }

    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn jitter_source(mut self, jitter_source: Arc<dyn JitterSource>) -> Self {
        self.jitter_source = jitter_source;
        self
    }

    pub fn scale(&self) -> Duration {
        self.scale
    }

    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    fn capped_delay(&self, attempt: usize) -> Duration {
        let exponent = attempt.max(1).saturating_sub(1).min(31) as u32;
        self.scale
            .saturating_mul(1_u32 << exponent)
            .min(self.max_backoff)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::standard()
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let capped = self.capped_delay(attempt);
        match self.jitter {
            Jitter::None => capped,
            Jitter::Full => scale_duration(capped, self.jitter_source.sample()),
        }
    }
}

/// `duration * factor` for `factor` in `[0, 1]`, exact at both ends.
pub(crate) fn scale_duration(duration: Duration, factor: f64) -> Duration {
    if factor >= 1.0 {
        return duration;
    }
    if factor <= 0.0 || factor.is_nan() {
        return Duration::ZERO;
    }
    let nanos = (duration.as_nanos() as f64 * factor).round();
    Duration::from_nanos(nanos.min(u64::MAX as f64) as u64)
}

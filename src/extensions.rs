//! Injectable time and randomness.
//!
//! Every place the runtime reads the clock, sleeps or draws jitter goes
//! through one of these traits, so tests can swap in [`ManualClock`],
//! [`RecordingSleeper`] and [`FixedJitter`] and get bit-exact delay traces.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use futures_util::future::BoxFuture;
use rand::Rng;

use crate::util::lock_unpoisoned;

pub trait Clock: Send + Sync {
    fn now_system(&self) -> SystemTime;

    fn now(&self) -> Instant;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    started_system: SystemTime,
    started: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new(started_system: SystemTime) -> Self {
        Self {
            started_system,
            started: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut offset = lock_unpoisoned(&self.offset);
        *offset = offset.saturating_add(duration);
    }

    pub fn elapsed(&self) -> Duration {
        *lock_unpoisoned(&self.offset)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000))
    }
}

impl Clock for ManualClock {
    fn now_system(&self) -> SystemTime {
        self.started_system + self.elapsed()
    }

    fn now(&self) -> Instant {
        self.started + self.elapsed()
    }
}

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

#[derive(Debug, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Returns immediately, remembering every requested delay. When paired with a
/// [`ManualClock`] it advances that clock by the requested amount.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
    clock: Option<Arc<ManualClock>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advancing(clock: Arc<ManualClock>) -> Self {
        Self {
            delays: Mutex::new(Vec::new()),
            clock: Some(clock),
        }
    }

    pub fn delays(&self) -> Vec<Duration> {
        lock_unpoisoned(&self.delays).clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        lock_unpoisoned(&self.delays).push(duration);
        if let Some(clock) = &self.clock {
            clock.advance(duration);
        }
        Box::pin(std::future::ready(()))
    }
}

/// Source of the uniform `[0, 1]` draw used for jitter.
pub trait JitterSource: Send + Sync {
    fn sample(&self) -> f64;
}

#[derive(Debug, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn sample(&self) -> f64 {
        rand::rng().random_range(0.0..=1.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedJitter(f64);

impl FixedJitter {
    pub fn new(value: f64) -> Self {
        Self(value.clamp(0.0, 1.0))
    }

    pub fn max() -> Self {
        Self(1.0)
    }
}

impl JitterSource for FixedJitter {
    fn sample(&self) -> f64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{Clock, FixedJitter, JitterSource, ManualClock, RandomJitter, RecordingSleeper, Sleeper};

    #[tokio::test]
    async fn recording_sleeper_advances_manual_clock() {
        let clock = Arc::new(ManualClock::default());
        let before = clock.now_system();
        let sleeper = RecordingSleeper::advancing(Arc::clone(&clock));

        sleeper.sleep(Duration::from_secs(2)).await;
        sleeper.sleep(Duration::from_millis(500)).await;

        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_secs(2), Duration::from_millis(500)]
        );
        assert_eq!(clock.elapsed(), Duration::from_millis(2_500));
        assert_eq!(
            clock.now_system(),
            before + Duration::from_millis(2_500)
        );
    }

    #[test]
    fn jitter_sources_stay_in_unit_interval() {
        for _ in 0..256 {
            let sample = RandomJitter.sample();
            assert!((0.0..=1.0).contains(&sample));
        }
        assert_eq!(FixedJitter::new(3.0).sample(), 1.0);
        assert_eq!(FixedJitter::max().sample(), 1.0);
    }
}

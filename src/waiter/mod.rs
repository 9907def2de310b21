//! Acceptor-driven polling until an operation reaches a terminal state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span};

pub mod acceptor;
pub mod config;
pub mod scheduler;

pub use self::acceptor::{Acceptor, AcceptorState, Matcher};
pub use self::config::{DEFAULT_MAX_DELAY, DEFAULT_MAX_WAIT_TIME, DEFAULT_MIN_DELAY, WaiterConfig};
pub use self::scheduler::WaiterScheduler;

use crate::error::Error;
use crate::extensions::{Clock, JitterSource, RandomJitter, Sleeper, SystemClock, TokioSleeper};
use crate::metrics::RuntimeMetrics;

type PollFn<I, O> = dyn Fn(I) -> BoxFuture<'static, Result<O, Error>> + Send + Sync;

/// Per-call overrides of the configured delays and budget.
#[derive(Clone, Debug, Default)]
pub struct WaiterOptions {
    pub min_delay: Option<Duration>,
    pub max_delay: Option<Duration>,
    pub max_wait_time: Option<Duration>,
    /// Shrink a delay that would overrun the budget instead of timing out.
    pub shorten_final_delay: bool,
    pub cancellation: Option<CancellationToken>,
}

impl WaiterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = Some(min_delay);
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn max_wait_time(mut self, max_wait_time: Duration) -> Self {
        self.max_wait_time = Some(max_wait_time);
        self
    }

    pub fn shorten_final_delay(mut self, enabled: bool) -> Self {
        self.shorten_final_delay = enabled;
        self
    }

    pub fn cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }
}

/// Terminal success: a `Success` acceptor matched the last poll, which may
/// itself have been an error (waiting for deletion, for example).
#[derive(Debug)]
pub struct WaiterOutcome<O> {
    pub attempts: usize,
    pub result: Result<O, Error>,
}

#[derive(Debug, Error)]
pub enum WaiterError<O> {
    #[error("waiter reached a failure state after {attempts} attempt(s)")]
    Failure {
        attempts: usize,
        /// `true` when a `Failure` acceptor matched; `false` when the poll
        /// returned an error that no acceptor handled.
        failed_on_match: bool,
        last_result: Result<O, Error>,
    },
    #[error(
        "waiter timed out after {attempts} attempt(s) ({elapsed:?} elapsed, max wait {max_wait_time:?})"
    )]
    Timeout {
        attempts: usize,
        elapsed: Duration,
        max_wait_time: Duration,
        last_result: Result<O, Error>,
    },
    #[error("waiter cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: usize, elapsed: Duration },
    #[error("invalid waiter options: {source}")]
    Configuration {
        #[source]
        source: Error,
    },
}

impl<O> WaiterError<O> {
    pub fn attempts(&self) -> usize {
        match self {
            Self::Failure { attempts, .. }
            | Self::Timeout { attempts, .. }
            | Self::Cancelled { attempts, .. } => *attempts,
            Self::Configuration { .. } => 0,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Polls one operation until an acceptor reports a terminal state.
pub struct Waiter<I, O> {
    config: WaiterConfig<I, O>,
    operation: Arc<PollFn<I, O>>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    jitter_source: Arc<dyn JitterSource>,
    metrics: RuntimeMetrics,
}

impl<I, O> std::fmt::Debug for Waiter<I, O> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Waiter")
            .field("acceptors", &self.config.acceptors().len())
            .field("min_delay", &self.config.min_delay())
            .field("max_delay", &self.config.max_delay())
            .finish_non_exhaustive()
    }
}

impl<I, O> Waiter<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Send + 'static,
{
    pub fn new<F, Fut>(config: WaiterConfig<I, O>, operation: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, Error>> + Send + 'static,
    {
        Self {
            config,
            operation: Arc::new(move |input| -> BoxFuture<'static, Result<O, Error>> {
                Box::pin(operation(input))
            }),
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(SystemClock),
            jitter_source: Arc::new(RandomJitter),
            metrics: RuntimeMetrics::disabled(),
        }
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn jitter_source(mut self, jitter_source: Arc<dyn JitterSource>) -> Self {
        self.jitter_source = jitter_source;
        self
    }

    pub fn metrics(mut self, metrics: RuntimeMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &WaiterConfig<I, O> {
        &self.config
    }

    fn scheduler(&self, options: &WaiterOptions) -> Result<WaiterScheduler, Error> {
        let min_delay = options.min_delay.unwrap_or(self.config.min_delay());
        let max_delay = options.max_delay.unwrap_or(self.config.max_delay());
        config::validate_delays(min_delay, max_delay)?;
        let max_wait_time = options
            .max_wait_time
            .unwrap_or(self.config.max_wait_time());
        Ok(WaiterScheduler::new(min_delay, max_delay, max_wait_time)
            .shorten_final_delay(options.shorten_final_delay)
            .jitter_source(Arc::clone(&self.jitter_source)))
    }

    pub async fn wait_until(
        &self,
        options: &WaiterOptions,
        input: I,
    ) -> Result<WaiterOutcome<O>, WaiterError<O>> {
        let scheduler = self
            .scheduler(options)
            .map_err(|source| WaiterError::Configuration { source })?;
        let cancellation = options.cancellation.as_ref();
        let started = self.clock.now();
        let mut attempts = 0_usize;

        loop {
            let elapsed = self.clock.now().saturating_duration_since(started);
            if cancellation.is_some_and(CancellationToken::is_cancelled) {
                return Err(WaiterError::Cancelled { attempts, elapsed });
            }

            attempts += 1;
            self.metrics.record_waiter_poll();
            let span = info_span!("opstack.waiter.poll", attempt = attempts);
            let poll = (self.operation)(input.clone()).instrument(span);
            let result = match cancellation {
                Some(cancellation) => tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => {
                        let elapsed = self.clock.now().saturating_duration_since(started);
                        return Err(WaiterError::Cancelled { attempts, elapsed });
                    }
                    result = poll => result,
                },
                None => poll.await,
            };

            match self.config.evaluate(&input, &result) {
                Some(AcceptorState::Success) => {
                    debug!(attempts, "waiter reached success state");
                    return Ok(WaiterOutcome { attempts, result });
                }
                Some(AcceptorState::Failure) => {
                    return Err(WaiterError::Failure {
                        attempts,
                        failed_on_match: true,
                        last_result: result,
                    });
                }
                Some(AcceptorState::Retry) => {}
                None if result.is_err() => {
                    return Err(WaiterError::Failure {
                        attempts,
                        failed_on_match: false,
                        last_result: result,
                    });
                }
                None => {}
            }

            let elapsed = self.clock.now().saturating_duration_since(started);
            let Some(delay) = scheduler.next_delay(attempts + 1, elapsed) else {
                debug!(attempts, elapsed_ms = elapsed.as_millis() as u64, "waiter timed out");
                return Err(WaiterError::Timeout {
                    attempts,
                    elapsed,
                    max_wait_time: scheduler.max_wait_time(),
                    last_result: result,
                });
            };

            debug!(attempts, delay_ms = delay.as_millis() as u64, "waiter polling again");
            let sleep = self.sleeper.sleep(delay);
            match cancellation {
                Some(cancellation) => tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => {
                        let elapsed = self.clock.now().saturating_duration_since(started);
                        return Err(WaiterError::Cancelled { attempts, elapsed });
                    }
                    _ = sleep => {}
                },
                None => sleep.await,
            }
        }
    }
}

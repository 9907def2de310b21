//! Quota-bounded retry engine.
//!
//! The engine is split the same way generated SDK runtimes split it: a
//! [`RetryClassifier`] decides whether an error may be retried, a
//! [`RetryStrategy`] decides whether it *will* be (attempt budget and
//! partition quota) and how long to wait, and the
//! [`RetryMiddleware`] drives the attempt loop inside the Finalize stage.

use std::sync::Arc;
use std::time::Duration;

pub mod backoff;
pub mod classifier;
pub mod metadata;
mod middleware;
pub mod quota;

pub use self::backoff::{BackoffStrategy, ExponentialBackoff, Jitter};
pub use self::classifier::{
    NoThrottlingRetries, RetryClassifier, RetryErrorInfo, RetryKind, StandardRetryClassifier,
};
pub use self::metadata::{INVOCATION_ID_HEADER, REQUEST_METADATA_HEADER, RequestMetadata};
pub use self::middleware::RetryMiddleware;
pub use self::quota::{QuotaExhausted, RetryQuota, RetryQuotaRegistry};

use crate::error::Error;

pub const DEFAULT_MAX_RETRIES_BASE: usize = 2;
pub const DEFAULT_QUOTA_CAPACITY: usize = 500;
pub const DEFAULT_RETRY_COST: usize = 5;
pub const DEFAULT_TIMEOUT_RETRY_COST: usize = 10;
pub const DEFAULT_NO_RETRY_INCREMENT: usize = 1;

#[derive(Clone)]
pub struct RetryStrategyOptions {
    backoff: Arc<dyn BackoffStrategy>,
    max_retries_base: usize,
    available_capacity: usize,
    max_capacity: usize,
    retry_cost: usize,
    timeout_retry_cost: usize,
    no_retry_increment: usize,
    total_timeout: Option<Duration>,
}

impl std::fmt::Debug for RetryStrategyOptions {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RetryStrategyOptions")
            .field("max_retries_base", &self.max_retries_base)
            .field("available_capacity", &self.available_capacity)
            .field("max_capacity", &self.max_capacity)
            .field("retry_cost", &self.retry_cost)
            .field("timeout_retry_cost", &self.timeout_retry_cost)
            .field("no_retry_increment", &self.no_retry_increment)
            .field("total_timeout", &self.total_timeout)
            .finish_non_exhaustive()
    }
}

impl RetryStrategyOptions {
    /// Three attempts, a 500 token bucket, 1s backoff scale capped at 20s.
    pub fn standard() -> Self {
        Self {
            backoff: Arc::new(ExponentialBackoff::standard()),
            max_retries_base: DEFAULT_MAX_RETRIES_BASE,
            available_capacity: DEFAULT_QUOTA_CAPACITY,
            max_capacity: DEFAULT_QUOTA_CAPACITY,
            retry_cost: DEFAULT_RETRY_COST,
            timeout_retry_cost: DEFAULT_TIMEOUT_RETRY_COST,
            no_retry_increment: DEFAULT_NO_RETRY_INCREMENT,
            total_timeout: None,
        }
    }

    /// A single attempt; retryable failures surface as
    /// [`Error::MaxAttemptsExceeded`] without touching the quota.
    pub fn disabled() -> Self {
        Self::standard().max_retries_base(0)
    }

    /// Standard quota accounting with the older 25ms backoff scale.
    pub fn legacy() -> Self {
        Self::standard().backoff(ExponentialBackoff::new(
            Duration::from_millis(25),
            Duration::from_secs(20),
        ))
    }

    pub fn backoff(mut self, backoff: impl BackoffStrategy + 'static) -> Self {
        self.backoff = Arc::new(backoff);
        self
    }

    pub fn shared_backoff(mut self, backoff: Arc<dyn BackoffStrategy>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Retries allowed after the first attempt.
    pub fn max_retries_base(mut self, max_retries_base: usize) -> Self {
        self.max_retries_base = max_retries_base;
        self
    }

    pub fn available_capacity(mut self, available_capacity: usize) -> Self {
        self.available_capacity = available_capacity;
        self
    }

    pub fn max_capacity(mut self, max_capacity: usize) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    pub fn retry_cost(mut self, retry_cost: usize) -> Self {
        self.retry_cost = retry_cost;
        self
    }

    pub fn timeout_retry_cost(mut self, timeout_retry_cost: usize) -> Self {
        self.timeout_retry_cost = timeout_retry_cost;
        self
    }

    pub fn no_retry_increment(mut self, no_retry_increment: usize) -> Self {
        self.no_retry_increment = no_retry_increment;
        self
    }

    /// Upper bound on wall time spent across all attempts and backoff sleeps.
    pub fn total_timeout(mut self, total_timeout: Duration) -> Self {
        self.total_timeout = Some(total_timeout);
        self
    }

    pub fn max_attempts(&self) -> usize {
        self.max_retries_base.saturating_add(1)
    }

    pub fn retry_cost_for(&self, info: &RetryErrorInfo) -> usize {
        if info.is_timeout {
            self.timeout_retry_cost
        } else {
            self.retry_cost
        }
    }

    pub fn configured_total_timeout(&self) -> Option<Duration> {
        self.total_timeout
    }

    pub fn initial_capacity(&self) -> usize {
        self.available_capacity
    }

    pub fn capacity_limit(&self) -> usize {
        self.max_capacity
    }
}

impl Default for RetryStrategyOptions {
    fn default() -> Self {
        Self::standard()
    }
}

/// Per-call retry state handed out by a [`RetryStrategy`].
#[derive(Debug)]
pub struct RetryToken {
    partition: String,
    quota: Arc<RetryQuota>,
    attempt: usize,
    last_retry_cost: Option<usize>,
}

impl RetryToken {
    pub fn new(partition: impl Into<String>, quota: Arc<RetryQuota>) -> Self {
        Self {
            partition: partition.into(),
            quota,
            attempt: 1,
            last_retry_cost: None,
        }
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    /// 1-based attempt the token currently authorizes.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn available_capacity(&self) -> usize {
        self.quota.available_capacity()
    }

    pub fn quota(&self) -> &Arc<RetryQuota> {
        &self.quota
    }
}

/// Why a strategy refused another attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryRefusal {
    MaxAttempts {
        attempts: usize,
        max_attempts: usize,
        available_capacity: usize,
    },
    QuotaExceeded {
        attempts: usize,
        available_capacity: usize,
        required: usize,
    },
    /// Sleeping before the next attempt would cross the total timeout.
    Deadline {
        attempts: usize,
        elapsed_ms: u128,
        budget_ms: u128,
    },
}

impl RetryRefusal {
    pub fn into_error(self, last_error: Error) -> Error {
        match self {
            Self::MaxAttempts {
                attempts,
                max_attempts,
                available_capacity,
            } => Error::MaxAttemptsExceeded {
                attempts,
                max_attempts,
                available_capacity,
                source: Box::new(last_error),
            },
            Self::QuotaExceeded {
                attempts,
                available_capacity,
                required,
            } => Error::RetryQuotaExceeded {
                attempts,
                available_capacity,
                required,
                source: Box::new(last_error),
            },
            Self::Deadline {
                attempts,
                elapsed_ms,
                budget_ms,
            } => Error::DeadlineExceeded {
                attempts,
                elapsed_ms,
                budget_ms,
                source: Box::new(last_error),
            },
        }
    }
}

pub trait RetryStrategy: Send + Sync {
    fn max_attempts(&self) -> usize;

    fn acquire_initial_token(&self, partition: &str) -> RetryToken;

    /// Authorizes the next attempt after a classified failure and returns the
    /// delay to wait first. `elapsed` is the time spent since the first
    /// attempt started. A refusal must leave the quota untouched.
    fn refresh_token_for_retry(
        &self,
        token: &mut RetryToken,
        info: &RetryErrorInfo,
        elapsed: Duration,
    ) -> Result<Duration, RetryRefusal>;

    /// Refunds quota after a successful attempt and returns the new level.
    fn record_success(&self, token: RetryToken) -> usize;
}

#[derive(Clone, Debug)]
pub struct StandardRetryStrategy {
    options: RetryStrategyOptions,
    quotas: Arc<RetryQuotaRegistry>,
}

impl StandardRetryStrategy {
    pub fn new(options: RetryStrategyOptions) -> Self {
        let quotas = Arc::new(RetryQuotaRegistry::new(
            options.available_capacity,
            options.max_capacity,
        ));
        Self { options, quotas }
    }

    /// Shares quota buckets with every other strategy built on `quotas`, so
    /// all operations of one client draw from the same partitions.
    pub fn with_quota_registry(
        options: RetryStrategyOptions,
        quotas: Arc<RetryQuotaRegistry>,
    ) -> Self {
        Self { options, quotas }
    }

    pub fn options(&self) -> &RetryStrategyOptions {
        &self.options
    }

    pub fn quota_registry(&self) -> &Arc<RetryQuotaRegistry> {
        &self.quotas
    }
}

impl Default for StandardRetryStrategy {
    fn default() -> Self {
        Self::new(RetryStrategyOptions::standard())
    }
}

impl RetryStrategy for StandardRetryStrategy {
    fn max_attempts(&self) -> usize {
        self.options.max_attempts()
    }

    fn acquire_initial_token(&self, partition: &str) -> RetryToken {
        RetryToken::new(partition, self.quotas.quota(partition))
    }

    fn refresh_token_for_retry(
        &self,
        token: &mut RetryToken,
        info: &RetryErrorInfo,
        elapsed: Duration,
    ) -> Result<Duration, RetryRefusal> {
        let max_attempts = self.max_attempts();
        if token.attempt >= max_attempts {
            return Err(RetryRefusal::MaxAttempts {
                attempts: token.attempt,
                max_attempts,
                available_capacity: token.available_capacity(),
            });
        }

        let delay = info
            .retry_after
            .unwrap_or_else(|| self.options.backoff.delay_for_attempt(token.attempt));
        if let Some(budget) = self.options.total_timeout
            && elapsed.saturating_add(delay) > budget
        {
            return Err(RetryRefusal::Deadline {
                attempts: token.attempt,
                elapsed_ms: elapsed.as_millis(),
                budget_ms: budget.as_millis(),
            });
        }

        let cost = self.options.retry_cost_for(info);
        token
            .quota
            .try_withdraw(cost)
            .map_err(|exhausted| RetryRefusal::QuotaExceeded {
                attempts: token.attempt,
                available_capacity: exhausted.available_capacity,
                required: exhausted.required,
            })?;
        token.last_retry_cost = Some(cost);
        token.attempt += 1;
        Ok(delay)
    }

    fn record_success(&self, token: RetryToken) -> usize {
        let refund = token
            .last_retry_cost
            .unwrap_or(self.options.no_retry_increment);
        token.quota.release(refund)
    }
}

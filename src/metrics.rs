use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::Error;
use crate::util::lock_unpoisoned;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RuntimeMetricsSnapshot {
    pub operations_started: u64,
    pub operations_succeeded: u64,
    pub operations_failed: u64,
    pub attempts: u64,
    pub retries: u64,
    pub quota_rejections: u64,
    pub max_attempts_exhausted: u64,
    pub deadline_exceeded: u64,
    pub cancelled: u64,
    pub in_flight: u64,
    pub waiter_polls: u64,
    pub latency_samples: u64,
    pub latency_total_ms: u64,
    pub latency_avg_ms: f64,
    pub status_counts: BTreeMap<u16, u64>,
    pub error_counts: BTreeMap<String, u64>,
}

/// Counters shared by every operation and waiter built from one client
/// configuration. Cloning shares the counters; a disabled handle records
/// nothing.
#[derive(Clone, Debug, Default)]
pub struct RuntimeMetrics {
    inner: Option<Arc<RuntimeMetricsInner>>,
}

#[derive(Debug, Default)]
struct RuntimeMetricsInner {
    operations_started: AtomicU64,
    operations_succeeded: AtomicU64,
    operations_failed: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    quota_rejections: AtomicU64,
    max_attempts_exhausted: AtomicU64,
    deadline_exceeded: AtomicU64,
    cancelled: AtomicU64,
    in_flight: AtomicU64,
    waiter_polls: AtomicU64,
    latency_total_ms: AtomicU64,
    latency_samples: AtomicU64,
    status_counts: Mutex<BTreeMap<u16, u64>>,
    error_counts: Mutex<BTreeMap<String, u64>>,
}

pub(crate) struct InFlightGuard {
    inner: Option<Arc<RuntimeMetricsInner>>,
}

impl RuntimeMetrics {
    pub fn enabled() -> Self {
        Self {
            inner: Some(Arc::new(RuntimeMetricsInner::default())),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub(crate) fn record_operation_started(&self) {
        let Some(inner) = &self.inner else {
            return;
        };
        inner.operations_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn enter_in_flight(&self) -> InFlightGuard {
        match &self.inner {
            Some(inner) => {
                inner.in_flight.fetch_add(1, Ordering::Relaxed);
                InFlightGuard {
                    inner: Some(Arc::clone(inner)),
                }
            }
            None => InFlightGuard { inner: None },
        }
    }

    pub(crate) fn record_attempt(&self) {
        let Some(inner) = &self.inner else {
            return;
        };
        inner.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        let Some(inner) = &self.inner else {
            return;
        };
        inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_waiter_poll(&self) {
        let Some(inner) = &self.inner else {
            return;
        };
        inner.waiter_polls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_status(&self, status: u16) {
        let Some(inner) = &self.inner else {
            return;
        };
        let mut status_counts = lock_unpoisoned(&inner.status_counts);
        *status_counts.entry(status).or_insert(0) += 1;
    }

    pub(crate) fn record_operation_completed<T>(
        &self,
        result: &Result<T, Error>,
        latency: Duration,
    ) {
        let Some(inner) = &self.inner else {
            return;
        };
        self.record_latency(latency);
        let error = match result {
            Ok(_) => {
                inner.operations_succeeded.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(error) => error,
        };

        inner.operations_failed.fetch_add(1, Ordering::Relaxed);
        match error {
            Error::RetryQuotaExceeded { .. } => {
                inner.quota_rejections.fetch_add(1, Ordering::Relaxed);
            }
            Error::MaxAttemptsExceeded { .. } => {
                inner.max_attempts_exhausted.fetch_add(1, Ordering::Relaxed);
            }
            Error::DeadlineExceeded { .. } => {
                inner.deadline_exceeded.fetch_add(1, Ordering::Relaxed);
            }
            Error::Cancelled { .. } => {
                inner.cancelled.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        let key = match error.last_attempt_error() {
            Error::Transport { kind, .. } => format!("transport:{kind}"),
            Error::Service(service) => match &service.code {
                Some(code) => format!("service:{code}"),
                None => format!("service:{}", service.fault),
            },
            other => other.code().as_str().to_owned(),
        };
        self.add_error_count(key);
    }

    pub fn snapshot(&self) -> RuntimeMetricsSnapshot {
        let Some(inner) = &self.inner else {
            return RuntimeMetricsSnapshot::default();
        };

        let latency_samples = inner.latency_samples.load(Ordering::Relaxed);
        let latency_total_ms = inner.latency_total_ms.load(Ordering::Relaxed);
        let latency_avg_ms = if latency_samples == 0 {
            0.0
        } else {
            latency_total_ms as f64 / latency_samples as f64
        };

        RuntimeMetricsSnapshot {
            operations_started: inner.operations_started.load(Ordering::Relaxed),
            operations_succeeded: inner.operations_succeeded.load(Ordering::Relaxed),
            operations_failed: inner.operations_failed.load(Ordering::Relaxed),
            attempts: inner.attempts.load(Ordering::Relaxed),
            retries: inner.retries.load(Ordering::Relaxed),
            quota_rejections: inner.quota_rejections.load(Ordering::Relaxed),
            max_attempts_exhausted: inner.max_attempts_exhausted.load(Ordering::Relaxed),
            deadline_exceeded: inner.deadline_exceeded.load(Ordering::Relaxed),
            cancelled: inner.cancelled.load(Ordering::Relaxed),
            in_flight: inner.in_flight.load(Ordering::Relaxed),
            waiter_polls: inner.waiter_polls.load(Ordering::Relaxed),
            latency_samples,
            latency_total_ms,
            latency_avg_ms,
            status_counts: lock_unpoisoned(&inner.status_counts).clone(),
            error_counts: lock_unpoisoned(&inner.error_counts).clone(),
        }
    }

    fn record_latency(&self, latency: Duration) {
        let Some(inner) = &self.inner else {
            return;
        };
        inner.latency_samples.fetch_add(1, Ordering::Relaxed);
        inner.latency_total_ms.fetch_add(
            latency.as_millis().min(u64::MAX as u128) as u64,
            Ordering::Relaxed,
        );
    }

    fn add_error_count(&self, error_key: String) {
        let Some(inner) = &self.inner else {
            return;
        };
        let mut error_counts = lock_unpoisoned(&inner.error_counts);
        *error_counts.entry(error_key).or_insert(0) += 1;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some(inner) = &self.inner {
            inner.in_flight.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RuntimeMetrics;
    use crate::error::{Error, ServiceError, TransportErrorKind};

    #[test]
    fn disabled_metrics_record_nothing() {
        let metrics = RuntimeMetrics::disabled();
        metrics.record_operation_started();
        metrics.record_retry();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.operations_started, 0);
        assert_eq!(snapshot.retries, 0);
        assert!(!metrics.is_enabled());
    }

    #[test]
    fn failures_are_bucketed_by_last_attempt_error() {
        let metrics = RuntimeMetrics::enabled();
        let quota: Result<(), Error> = Err(Error::RetryQuotaExceeded {
            attempts: 2,
            available_capacity: 0,
            required: 5,
            source: Box::new(ServiceError::from_status(503).with_code("SlowDown").into()),
        });
        metrics.record_operation_completed(&quota, Duration::from_millis(30));
        let transport: Result<(), Error> =
            Err(Error::transport(TransportErrorKind::Connect, "refused"));
        metrics.record_operation_completed(&transport, Duration::from_millis(10));
        metrics.record_operation_completed(&Ok::<_, Error>(()), Duration::from_millis(20));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.operations_failed, 2);
        assert_eq!(snapshot.operations_succeeded, 1);
        assert_eq!(snapshot.quota_rejections, 1);
        assert_eq!(snapshot.error_counts.get("service:SlowDown"), Some(&1));
        assert_eq!(snapshot.error_counts.get("transport:connect"), Some(&1));
        assert_eq!(snapshot.latency_samples, 3);
        assert_eq!(snapshot.latency_avg_ms, 20.0);
    }

    #[test]
    fn in_flight_guard_decrements_on_drop() {
        let metrics = RuntimeMetrics::enabled();
        let guard = metrics.enter_in_flight();
        assert_eq!(metrics.snapshot().in_flight, 1);
        drop(guard);
        assert_eq!(metrics.snapshot().in_flight, 0);
    }
}

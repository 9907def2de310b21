use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{Instrument, debug, info_span, warn};

use crate::Result;
use crate::context::CallContext;
use crate::error::Error;
use crate::extensions::{Clock, Sleeper, SystemClock, TokioSleeper};
use crate::metrics::RuntimeMetrics;
use crate::observe::Observer;
use crate::request::HttpRequest;
use crate::retry::classifier::{RetryClassifier, StandardRetryClassifier};
use crate::retry::metadata::{RequestMetadata, stamp_request_metadata};
use crate::retry::{RetryStrategy, StandardRetryStrategy};
use crate::stack::{Handler, Middleware};

pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(30);

/// Finalize-stage middleware that owns the attempt loop.
///
/// Everything registered after it in Finalize (signing included) and the
/// whole Deserialize stage run once per attempt; Initialize, Serialize and
/// Build run once per call.
pub struct RetryMiddleware {
    strategy: Arc<dyn RetryStrategy>,
    classifier: Arc<dyn RetryClassifier>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    socket_timeout: Duration,
    observer: Option<Arc<dyn Observer>>,
    metrics: RuntimeMetrics,
}

impl std::fmt::Debug for RetryMiddleware {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RetryMiddleware")
            .field("max_attempts", &self.strategy.max_attempts())
            .field("socket_timeout", &self.socket_timeout)
            .finish_non_exhaustive()
    }
}

impl RetryMiddleware {
    pub fn new(strategy: impl RetryStrategy + 'static) -> Self {
        Self::shared(Arc::new(strategy))
    }

    pub fn shared(strategy: Arc<dyn RetryStrategy>) -> Self {
        Self {
            strategy,
            classifier: Arc::new(StandardRetryClassifier),
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(SystemClock),
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            observer: None,
            metrics: RuntimeMetrics::disabled(),
        }
    }

    pub fn classifier(mut self, classifier: impl RetryClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Added to the skew-corrected clock to form the `ttl` of retried
    /// attempts.
    pub fn socket_timeout(mut self, socket_timeout: Duration) -> Self {
        self.socket_timeout = socket_timeout;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn metrics(mut self, metrics: RuntimeMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn strategy(&self) -> &Arc<dyn RetryStrategy> {
        &self.strategy
    }

    async fn pause(&self, context: &CallContext, delay: Duration, attempts: usize) -> Result<()> {
        let sleep = self.sleeper.sleep(delay);
        match context.cancellation() {
            Some(cancellation) => {
                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => Err(Error::Cancelled { attempts }),
                    _ = sleep => Ok(()),
                }
            }
            None => {
                sleep.await;
                Ok(())
            }
        }
    }
}

impl Default for RetryMiddleware {
    fn default() -> Self {
        Self::new(StandardRetryStrategy::default())
    }
}

fn partition_for(context: &CallContext, request: &HttpRequest) -> String {
    context
        .partition_id()
        .or_else(|| request.host())
        .or_else(|| context.service_name())
        .unwrap_or("default")
        .to_owned()
}

#[async_trait]
impl<O> Middleware<HttpRequest, O> for RetryMiddleware
where
    O: Send + 'static,
{
    fn id(&self) -> &str {
        "retry"
    }

    async fn handle(
        &self,
        context: &mut CallContext,
        request: HttpRequest,
        next: &dyn Handler<HttpRequest, O>,
    ) -> Result<O> {
        let partition = partition_for(context, &request);
        let mut token = self.strategy.acquire_initial_token(&partition);
        let max_attempts = self.strategy.max_attempts();
        let started = self.clock.now();

        loop {
            let attempt = token.attempt();
            if context.is_cancelled() {
                return Err(Error::Cancelled {
                    attempts: attempt - 1,
                });
            }
            context.set_attempt(attempt);

            let metadata = RequestMetadata::for_attempt(
                attempt,
                max_attempts,
                self.clock.now_system(),
                context.estimated_skew(),
                self.socket_timeout,
            );
            let mut attempt_request = request.clone();
            stamp_request_metadata(&mut attempt_request, context.invocation_id(), &metadata)?;

            self.metrics.record_attempt();
            if let Some(observer) = &self.observer {
                observer.on_attempt_start(context, attempt);
            }
            let span = info_span!(
                "opstack.attempt",
                operation = %context.operation_name(),
                partition = %partition,
                attempt = attempt,
                max_attempts = max_attempts
            );
            let error = match next.call(context, attempt_request).instrument(span).await {
                Ok(output) => {
                    let available_capacity = self.strategy.record_success(token);
                    debug!(attempt, available_capacity, "attempt succeeded");
                    return Ok(output);
                }
                Err(error) => error,
            };

            let Some(info) = self.classifier.classify(&error) else {
                debug!(attempt, error = %error, "error is not retryable");
                return Err(error);
            };

            let elapsed = self.clock.now().saturating_duration_since(started);
            let delay = match self.strategy.refresh_token_for_retry(&mut token, &info, elapsed) {
                Ok(delay) => delay,
                Err(refusal) => {
                    let error = refusal.into_error(error);
                    warn!(attempt, error = %error, "retry refused");
                    return Err(error);
                }
            };

            warn!(
                attempt,
                kind = %info.kind,
                delay_ms = delay.as_millis() as u64,
                available_capacity = token.available_capacity(),
                error = %error,
                "retrying attempt"
            );
            if let Some(observer) = &self.observer {
                observer.on_retry_scheduled(context, &info, delay);
            }
            self.metrics.record_retry();
            self.pause(context, delay, attempt).await?;
        }
    }
}

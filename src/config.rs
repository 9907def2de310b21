//! Client-level defaults shared by every operation of one service client.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue};

use crate::Result;
use crate::error::Error;
use crate::extensions::{Clock, Sleeper, SystemClock, TokioSleeper};
use crate::metrics::{RuntimeMetrics, RuntimeMetricsSnapshot};
use crate::observe::Observer;
use crate::retry::{
    ExponentialBackoff, RetryMiddleware, RetryQuotaRegistry, RetryStrategyOptions,
    StandardRetryStrategy,
};
use crate::stack::{
    ContentLengthMiddleware, DefaultHeadersMiddleware, EndpointMiddleware,
    OperationStackBuilder, Position, ResponseLoggingMiddleware, UserAgentMiddleware,
};
use crate::util::{parse_header_name, parse_header_value, validate_endpoint};
use crate::waiter::{Acceptor, DEFAULT_MAX_DELAY, DEFAULT_MIN_DELAY, Waiter, WaiterConfig};

const DEFAULT_SDK_NAME: &str = "opstack";
const DEFAULT_SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientProfile {
    #[default]
    StandardSdk,
    LowLatency,
    HighThroughput,
}

#[derive(Clone, Debug)]
pub struct ProfileDefaults {
    pub socket_timeout: Duration,
    pub retry_options: RetryStrategyOptions,
    pub waiter_min_delay: Duration,
    pub waiter_max_delay: Duration,
}

impl ClientProfile {
    pub fn defaults(self) -> ProfileDefaults {
        match self {
            Self::StandardSdk => ProfileDefaults {
                socket_timeout: Duration::from_secs(10),
                retry_options: RetryStrategyOptions::standard(),
                waiter_min_delay: DEFAULT_MIN_DELAY,
                waiter_max_delay: DEFAULT_MAX_DELAY,
            },
            Self::LowLatency => ProfileDefaults {
                socket_timeout: Duration::from_secs(2),
                retry_options: RetryStrategyOptions::standard()
                    .max_retries_base(1)
                    .total_timeout(Duration::from_secs(5))
                    .backoff(ExponentialBackoff::new(
                        Duration::from_millis(50),
                        Duration::from_millis(300),
                    )),
                waiter_min_delay: Duration::from_secs(1),
                waiter_max_delay: Duration::from_secs(30),
            },
            Self::HighThroughput => ProfileDefaults {
                socket_timeout: Duration::from_secs(20),
                retry_options: RetryStrategyOptions::standard()
                    .max_retries_base(3)
                    .total_timeout(Duration::from_secs(60))
                    .backoff(ExponentialBackoff::new(
                        Duration::from_millis(150),
                        Duration::from_secs(3),
                    )),
                waiter_min_delay: DEFAULT_MIN_DELAY,
                waiter_max_delay: DEFAULT_MAX_DELAY,
            },
        }
    }
}

pub struct ClientConfigBuilder {
    endpoint: String,
    profile: ClientProfile,
    service_name: Option<String>,
    sdk_name: String,
    sdk_version: String,
    app_id: Option<String>,
    default_headers: HeaderMap,
    socket_timeout: Option<Duration>,
    retry_options: Option<RetryStrategyOptions>,
    waiter_delays: Option<(Duration, Duration)>,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    observer: Option<Arc<dyn Observer>>,
    metrics_enabled: bool,
}

impl ClientConfigBuilder {
    pub(crate) fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            profile: ClientProfile::default(),
            service_name: None,
            sdk_name: DEFAULT_SDK_NAME.to_owned(),
            sdk_version: DEFAULT_SDK_VERSION.to_owned(),
            app_id: None,
            default_headers: HeaderMap::new(),
            socket_timeout: None,
            retry_options: None,
            waiter_delays: None,
            sleeper: Arc::new(TokioSleeper),
            clock: Arc::new(SystemClock),
            observer: None,
            metrics_enabled: false,
        }
    }

    /// Baseline for every setting not overridden explicitly.
    pub fn profile(mut self, profile: ClientProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    pub fn user_agent(mut self, sdk_name: impl Into<String>, sdk_version: impl Into<String>) -> Self {
        self.sdk_name = sdk_name.into();
        self.sdk_version = sdk_version.into();
        self
    }

    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn try_default_header(self, name: &str, value: &str) -> Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.default_header(name, value))
    }

    /// Socket timeout used for the `ttl` stamped on retried attempts.
    pub fn socket_timeout(mut self, socket_timeout: Duration) -> Self {
        self.socket_timeout = Some(socket_timeout);
        self
    }

    pub fn retry_options(mut self, retry_options: RetryStrategyOptions) -> Self {
        self.retry_options = Some(retry_options);
        self
    }

    pub fn waiter_delays(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.waiter_delays = Some((min_delay, max_delay));
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

    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn metrics_enabled(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    pub fn try_build(self) -> Result<ClientConfig> {
        validate_endpoint(&self.endpoint)?;

        let defaults = self.profile.defaults();
        let (waiter_min_delay, waiter_max_delay) = self
            .waiter_delays
            .unwrap_or((defaults.waiter_min_delay, defaults.waiter_max_delay));
        crate::waiter::config::validate_delays(waiter_min_delay, waiter_max_delay)?;

        let user_agent =
            UserAgentMiddleware::new(&self.sdk_name, &self.sdk_version, self.app_id.as_deref())?;
        let retry_options = self.retry_options.unwrap_or(defaults.retry_options);
        let quotas = Arc::new(RetryQuotaRegistry::new(
            retry_options.initial_capacity(),
            retry_options.capacity_limit(),
        ));
        let metrics = if self.metrics_enabled {
            RuntimeMetrics::enabled()
        } else {
            RuntimeMetrics::disabled()
        };

        Ok(ClientConfig {
            endpoint: self.endpoint,
            profile: self.profile,
            service_name: self.service_name,
            default_headers: DefaultHeadersMiddleware::new(self.default_headers),
            user_agent,
            socket_timeout: self.socket_timeout.unwrap_or(defaults.socket_timeout),
            retry_options,
            quotas,
            waiter_min_delay,
            waiter_max_delay,
            sleeper: self.sleeper,
            clock: self.clock,
            observer: self.observer,
            metrics,
        })
    }

    pub fn build(self) -> ClientConfig {
        self.try_build().unwrap_or_else(|error| {
            panic!("failed to build opstack client config: {error}; use try_build() to handle configuration errors")
        })
    }
}

/// Shared settings for every operation of one service client. Operations
/// built from the same config draw retry tokens from the same quota
/// partitions.
#[derive(Clone)]
pub struct ClientConfig {
    endpoint: String,
    profile: ClientProfile,
    service_name: Option<String>,
    default_headers: DefaultHeadersMiddleware,
    user_agent: UserAgentMiddleware,
    socket_timeout: Duration,
    retry_options: RetryStrategyOptions,
    quotas: Arc<RetryQuotaRegistry>,
    waiter_min_delay: Duration,
    waiter_max_delay: Duration,
    sleeper: Arc<dyn Sleeper>,
    clock: Arc<dyn Clock>,
    observer: Option<Arc<dyn Observer>>,
    metrics: RuntimeMetrics,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("endpoint", &self.endpoint)
            .field("profile", &self.profile)
            .field("service_name", &self.service_name)
            .field("socket_timeout", &self.socket_timeout)
            .field("retry_options", &self.retry_options)
            .field("metrics_enabled", &self.metrics.is_enabled())
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    pub fn builder(endpoint: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(endpoint)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn profile(&self) -> ClientProfile {
        self.profile
    }

    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    pub fn socket_timeout(&self) -> Duration {
        self.socket_timeout
    }

    pub fn retry_options(&self) -> &RetryStrategyOptions {
        &self.retry_options
    }

    pub fn quota_registry(&self) -> &Arc<RetryQuotaRegistry> {
        &self.quotas
    }

    pub fn metrics_snapshot(&self) -> RuntimeMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Retry loop wired to the shared quota registry and this client's
    /// time sources.
    pub fn retry_middleware(&self) -> RetryMiddleware {
        let strategy = StandardRetryStrategy::with_quota_registry(
            self.retry_options.clone(),
            Arc::clone(&self.quotas),
        );
        RetryMiddleware::new(strategy)
            .sleeper(Arc::clone(&self.sleeper))
            .clock(Arc::clone(&self.clock))
            .socket_timeout(self.socket_timeout)
    }

    /// Starts an operation with the standard middleware set installed:
    /// endpoint, default headers, user agent and content length in Build,
    /// the retry loop in Finalize, and attempt logging in Deserialize.
    pub fn operation<I, O>(&self, operation_name: impl Into<String>) -> OperationStackBuilder<I, O>
    where
        I: Send + 'static,
        O: Send + 'static,
    {
        let mut builder = OperationStackBuilder::new(operation_name)
            .build_step(EndpointMiddleware::new(self.endpoint.clone()), Position::After)
            .build_step(self.default_headers.clone(), Position::After)
            .build_step(self.user_agent.clone(), Position::After)
            .build_step(ContentLengthMiddleware, Position::After)
            .deserialize(ResponseLoggingMiddleware, Position::After)
            .with_retry(self.retry_middleware())
            .clock(Arc::clone(&self.clock))
            .metrics(self.metrics.clone());
        if let Some(service_name) = &self.service_name {
            builder = builder.service(service_name.clone());
        }
        if let Some(observer) = &self.observer {
            builder = builder.observer(Arc::clone(observer));
        }
        builder
    }

    /// Validated waiter config carrying this client's default delays.
    pub fn waiter_config<I, O>(&self, acceptors: Vec<Acceptor<I, O>>) -> Result<WaiterConfig<I, O>> {
        WaiterConfig::new(acceptors)?.with_delays(self.waiter_min_delay, self.waiter_max_delay)
    }

    pub fn waiter<I, O, F, Fut>(
        &self,
        acceptors: Vec<Acceptor<I, O>>,
        operation: F,
    ) -> Result<Waiter<I, O>>
    where
        I: Clone + Send + Sync + 'static,
        O: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<O, Error>> + Send + 'static,
    {
        let config = self.waiter_config(acceptors)?;
        Ok(Waiter::new(config, operation)
            .sleeper(Arc::clone(&self.sleeper))
            .clock(Arc::clone(&self.clock))
            .metrics(self.metrics.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{ClientConfig, ClientProfile};
    use crate::error::ErrorCode;
    use crate::stack::StageName;
    use crate::waiter::{Acceptor, AcceptorState};

    #[test]
    fn profiles_tune_retry_and_waiter_defaults() {
        let standard = ClientProfile::StandardSdk.defaults();
        assert_eq!(standard.retry_options.max_attempts(), 3);
        assert_eq!(standard.socket_timeout, Duration::from_secs(10));

        let low_latency = ClientProfile::LowLatency.defaults();
        assert_eq!(low_latency.retry_options.max_attempts(), 2);
        assert_eq!(
            low_latency.retry_options.configured_total_timeout(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(low_latency.waiter_max_delay, Duration::from_secs(30));

        let high_throughput = ClientProfile::HighThroughput.defaults();
        assert_eq!(high_throughput.retry_options.max_attempts(), 4);
    }

    #[test]
    fn try_build_rejects_bad_endpoint_and_delays() {
        let error = ClientConfig::builder("not a url")
            .try_build()
            .expect_err("endpoint must parse");
        assert_eq!(error.code(), ErrorCode::InvalidUri);

        let error = ClientConfig::builder("https://api.example.com")
            .waiter_delays(Duration::from_secs(10), Duration::from_secs(1))
            .try_build()
            .expect_err("min delay above max");
        assert_eq!(error.code(), ErrorCode::WaiterConfiguration);

        assert!(
            ClientConfig::builder("https://api.example.com")
                .try_default_header("bad header", "x")
                .is_err()
        );
    }

    #[test]
    fn operations_get_standard_middleware_set() {
        let config = ClientConfig::builder("https://api.example.com")
            .service_name("tables")
            .build();
        let builder = config.operation::<(), ()>("DescribeTable");
        let orchestrator = builder.build(
            std::sync::Arc::new(crate::tests::NeverTransport),
            |_: &crate::response::HttpResponse| Ok(()),
        );
        let stages = orchestrator.stages();
        let ids = |name: StageName| {
            stages
                .iter()
                .find(|(stage, _)| *stage == name)
                .map(|(_, ids)| ids.clone())
                .unwrap_or_default()
        };
        assert_eq!(
            ids(StageName::Build),
            vec!["endpoint", "default_headers", "user_agent", "content_length"]
        );
        assert_eq!(ids(StageName::Finalize), vec!["retry"]);
        assert_eq!(ids(StageName::Deserialize), vec!["response_logging"]);
        assert_eq!(orchestrator.new_context().service_name(), Some("tables"));
    }

    #[test]
    fn waiter_config_uses_client_delays() {
        let config = ClientConfig::builder("https://api.example.com")
            .waiter_delays(Duration::from_secs(1), Duration::from_secs(8))
            .build();
        let waiter_config = config
            .waiter_config::<(), u32>(vec![Acceptor::success(AcceptorState::Success, true)])
            .expect("valid acceptors");
        assert_eq!(waiter_config.min_delay(), Duration::from_secs(1));
        assert_eq!(waiter_config.max_delay(), Duration::from_secs(8));
    }
}

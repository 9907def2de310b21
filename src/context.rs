use http::Extensions;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// State threaded through every stage of one invocation.
///
/// A context belongs to exactly one in-flight call: it is created before the
/// call, handed to [`Orchestrator::handle`](crate::Orchestrator::handle) by
/// mutable reference, and dropped afterwards. Besides the well-known fields
/// below it carries a typed bag of [`Extensions`] for values that generated
/// code or custom middlewares want to pass between stages.
#[derive(Debug)]
pub struct CallContext {
    operation_name: String,
    service_name: Option<String>,
    partition_id: Option<String>,
    invocation_id: String,
    auth_scheme: Option<String>,
    attempt: usize,
    estimated_skew_ms: i64,
    cancellation: Option<CancellationToken>,
    extensions: Extensions,
}

impl CallContext {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            service_name: None,
            partition_id: None,
            invocation_id: Uuid::new_v4().to_string(),
            auth_scheme: None,
            attempt: 0,
            estimated_skew_ms: 0,
            cancellation: None,
            extensions: Extensions::new(),
        }
    }

    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    /// Overrides the retry quota partition; defaults to the request host.
    pub fn with_partition_id(mut self, partition_id: impl Into<String>) -> Self {
        self.partition_id = Some(partition_id.into());
        self
    }

    pub fn with_invocation_id(mut self, invocation_id: impl Into<String>) -> Self {
        self.invocation_id = invocation_id.into();
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    pub fn service_name(&self) -> Option<&str> {
        self.service_name.as_deref()
    }

    pub(crate) fn set_service_name_if_absent(&mut self, service_name: &str) {
        if self.service_name.is_none() {
            self.service_name = Some(service_name.to_owned());
        }
    }

    pub fn partition_id(&self) -> Option<&str> {
        self.partition_id.as_deref()
    }

    /// Stable for every attempt of this call.
    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn auth_scheme(&self) -> Option<&str> {
        self.auth_scheme.as_deref()
    }

    pub fn set_auth_scheme(&mut self, auth_scheme: impl Into<String>) {
        self.auth_scheme = Some(auth_scheme.into());
    }

    /// 1-based attempt currently in flight, 0 before the first attempt.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub(crate) fn set_attempt(&mut self, attempt: usize) {
        self.attempt = attempt;
    }

    /// Server clock minus local clock in milliseconds, as last observed from
    /// a response `Date` header.
    pub fn estimated_skew(&self) -> i64 {
        self.estimated_skew_ms
    }

    pub(crate) fn set_estimated_skew(&mut self, skew_ms: i64) {
        self.estimated_skew_ms = skew_ms;
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    pub fn insert<T>(&mut self, value: T) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.extensions.insert(value)
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.extensions.get::<T>()
    }

    pub fn get_mut<T>(&mut self) -> Option<&mut T>
    where
        T: Send + Sync + 'static,
    {
        self.extensions.get_mut::<T>()
    }

    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.extensions.remove::<T>()
    }
}

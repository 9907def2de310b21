//! The operation stack: five ordered stages folded into one handler chain.
//!
//! ```text
//! Initialize(I) -> Serialize(SerializeInput<I>) -> Build(HttpRequestBuilder)
//!     -> Finalize(HttpRequest) -> Deserialize(HttpRequest) -> Transport
//! ```
//!
//! Each stage's terminal converts the value into the next stage's type and
//! calls into that stage's chain; the Deserialize terminal performs the one
//! transport call of an attempt and decodes the response.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{Instrument, info_span};

pub mod middleware;
pub mod stage;
pub mod standard;

pub use self::middleware::{Handler, Middleware};
pub use self::stage::{Position, Stage, StageName};
pub use self::standard::{
    BodySerializeMiddleware, ContentLengthMiddleware, DefaultHeadersMiddleware,
    EndpointMiddleware, InputValidationMiddleware, LastResponse, ResponseLoggingMiddleware,
    SigningMiddleware, UserAgentMiddleware,
};

use crate::Result;
use crate::context::CallContext;
use crate::error::Error;
use crate::extensions::{Clock, SystemClock};
use crate::metrics::{RuntimeMetrics, RuntimeMetricsSnapshot};
use crate::observe::Observer;
use crate::request::{HttpRequest, HttpRequestBuilder};
use crate::retry::RetryMiddleware;
use crate::transport::{RequestSerializer, ResponseDeserializer, Signer, Transport};
use crate::util::{clock_skew_millis, parse_date_header, parse_retry_after};

/// Serialize-stage value: the operation input next to the request it is
/// being written onto.
#[derive(Debug)]
pub struct SerializeInput<I> {
    pub input: I,
    pub builder: HttpRequestBuilder,
}

struct InitializeTerminal<I, O> {
    next: Arc<dyn Handler<SerializeInput<I>, O>>,
}

#[async_trait]
impl<I, O> Handler<I, O> for InitializeTerminal<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn call(&self, context: &mut CallContext, input: I) -> Result<O> {
        let value = SerializeInput {
            input,
            builder: HttpRequestBuilder::new(),
        };
        self.next.call(context, value).await
    }
}

struct SerializeTerminal<I, O> {
    next: Arc<dyn Handler<HttpRequestBuilder, O>>,
    _input: PhantomData<fn(I)>,
}

#[async_trait]
impl<I, O> Handler<SerializeInput<I>, O> for SerializeTerminal<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn call(&self, context: &mut CallContext, value: SerializeInput<I>) -> Result<O> {
        self.next.call(context, value.builder).await
    }
}

struct BuildTerminal<O> {
    next: Arc<dyn Handler<HttpRequest, O>>,
}

#[async_trait]
impl<O> Handler<HttpRequestBuilder, O> for BuildTerminal<O>
where
    O: Send + 'static,
{
    async fn call(&self, context: &mut CallContext, builder: HttpRequestBuilder) -> Result<O> {
        let request = builder.build()?;
        self.next.call(context, request).await
    }
}

struct FinalizeTerminal<O> {
    next: Arc<dyn Handler<HttpRequest, O>>,
}

#[async_trait]
impl<O> Handler<HttpRequest, O> for FinalizeTerminal<O>
where
    O: Send + 'static,
{
    async fn call(&self, context: &mut CallContext, request: HttpRequest) -> Result<O> {
        self.next.call(context, request).await
    }
}

struct TransmitTerminal<O> {
    transport: Arc<dyn Transport>,
    deserializer: Arc<dyn ResponseDeserializer<O>>,
    clock: Arc<dyn Clock>,
    metrics: RuntimeMetrics,
}

#[async_trait]
impl<O> Handler<HttpRequest, O> for TransmitTerminal<O>
where
    O: Send + 'static,
{
    async fn call(&self, context: &mut CallContext, request: HttpRequest) -> Result<O> {
        context.remove::<LastResponse>();
        let response = self.transport.send(request).await?;
        if let Some(server_time) = parse_date_header(response.headers()) {
            context.set_estimated_skew(clock_skew_millis(server_time, self.clock.now_system()));
        }
        self.metrics.record_status(response.status().as_u16());
        context.insert(LastResponse {
            status: response.status(),
            request_id: response.request_id().map(str::to_owned),
        });
        match self.deserializer.deserialize(&response) {
            // date-form hints are resolved against the injected clock
            Err(Error::Service(mut error)) => {
                let now = self.clock.now_system();
                if let Some(retry_after) = parse_retry_after(response.headers(), now) {
                    error.retry_after = Some(retry_after);
                }
                Err(Error::Service(error))
            }
            outcome => outcome,
        }
    }
}

/// Assembles an [`Orchestrator`] for one operation.
pub struct OperationStackBuilder<I, O> {
    operation_name: String,
    service_name: Option<String>,
    initialize: Stage<I, O>,
    serialize: Stage<SerializeInput<I>, O>,
    build: Stage<HttpRequestBuilder, O>,
    finalize: Stage<HttpRequest, O>,
    deserialize: Stage<HttpRequest, O>,
    retry: Option<RetryMiddleware>,
    serializer: Option<Arc<dyn RequestSerializer<I>>>,
    signer: Option<Arc<dyn Signer>>,
    clock: Arc<dyn Clock>,
    observer: Option<Arc<dyn Observer>>,
    metrics: RuntimeMetrics,
}

impl<I, O> OperationStackBuilder<I, O> {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            service_name: None,
            initialize: Stage::new(StageName::Initialize),
            serialize: Stage::new(StageName::Serialize),
            build: Stage::new(StageName::Build),
            finalize: Stage::new(StageName::Finalize),
            deserialize: Stage::new(StageName::Deserialize),
            retry: None,
            serializer: None,
            signer: None,
            clock: Arc::new(SystemClock),
            observer: None,
            metrics: RuntimeMetrics::disabled(),
        }
    }

    pub fn service(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    pub fn initialize(
        mut self,
        middleware: impl Middleware<I, O> + 'static,
        position: Position,
    ) -> Self {
        self.initialize.register(middleware, position);
        self
    }

    pub fn serialize(
        mut self,
        middleware: impl Middleware<SerializeInput<I>, O> + 'static,
        position: Position,
    ) -> Self {
        self.serialize.register(middleware, position);
        self
    }

    pub fn build_step(
        mut self,
        middleware: impl Middleware<HttpRequestBuilder, O> + 'static,
        position: Position,
    ) -> Self {
        self.build.register(middleware, position);
        self
    }

    /// Finalize middlewares run once per attempt, inside the retry loop.
    pub fn finalize(
        mut self,
        middleware: impl Middleware<HttpRequest, O> + 'static,
        position: Position,
    ) -> Self {
        self.finalize.register(middleware, position);
        self
    }

    pub fn deserialize(
        mut self,
        middleware: impl Middleware<HttpRequest, O> + 'static,
        position: Position,
    ) -> Self {
        self.deserialize.register(middleware, position);
        self
    }

    /// Removes a registered middleware by id from one stage.
    pub fn remove(&mut self, stage: StageName, id: &str) -> bool {
        match stage {
            StageName::Initialize => self.initialize.remove(id),
            StageName::Serialize => self.serialize.remove(id),
            StageName::Build => self.build.remove(id),
            StageName::Finalize => self.finalize.remove(id),
            StageName::Deserialize => self.deserialize.remove(id),
        }
    }

    /// Installs the retry loop as the outermost Finalize middleware.
    pub fn with_retry(mut self, retry: RetryMiddleware) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Runs `serializer` as the innermost Serialize middleware.
    pub fn serializer(mut self, serializer: impl RequestSerializer<I> + 'static) -> Self {
        self.serializer = Some(Arc::new(serializer));
        self
    }

    /// Signs every attempt as the innermost Finalize middleware.
    pub fn signer(mut self, signer: impl Signer + 'static) -> Self {
        self.signer = Some(Arc::new(signer));
        self
    }

    pub fn shared_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Clock used to estimate server skew from response `Date` headers.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
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
}

impl<I, O> OperationStackBuilder<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn build(
        mut self,
        transport: Arc<dyn Transport>,
        deserializer: impl ResponseDeserializer<O> + 'static,
    ) -> Orchestrator<I, O> {
        if let Some(serializer) = self.serializer.take() {
            self.serialize
                .register(BodySerializeMiddleware::shared(serializer), Position::After);
        }
        if let Some(mut retry) = self.retry.take() {
            if self.metrics.is_enabled() {
                retry = retry.metrics(self.metrics.clone());
            }
            if let Some(observer) = &self.observer {
                retry = retry.observer(Arc::clone(observer));
            }
            self.finalize.register(retry, Position::Before);
        }
        if let Some(signer) = self.signer.take() {
            self.finalize
                .register(SigningMiddleware::shared(signer), Position::After);
        }

        let stages = vec![
            (StageName::Initialize, owned_ids(self.initialize.ids())),
            (StageName::Serialize, owned_ids(self.serialize.ids())),
            (StageName::Build, owned_ids(self.build.ids())),
            (StageName::Finalize, owned_ids(self.finalize.ids())),
            (StageName::Deserialize, owned_ids(self.deserialize.ids())),
        ];

        let transmit: Arc<dyn Handler<HttpRequest, O>> = Arc::new(TransmitTerminal {
            transport,
            deserializer: Arc::new(deserializer),
            clock: Arc::clone(&self.clock),
            metrics: self.metrics.clone(),
        });
        let deserialize = self.deserialize.compose(transmit);
        let finalize = self
            .finalize
            .compose(Arc::new(FinalizeTerminal { next: deserialize }));
        let build = self.build.compose(Arc::new(BuildTerminal { next: finalize }));
        let serialize = self.serialize.compose(Arc::new(SerializeTerminal {
            next: build,
            _input: PhantomData,
        }));
        let chain = self
            .initialize
            .compose(Arc::new(InitializeTerminal { next: serialize }));

        Orchestrator {
            operation_name: self.operation_name,
            service_name: self.service_name,
            chain,
            stages,
            observer: self.observer,
            metrics: self.metrics,
        }
    }
}

fn owned_ids(ids: Vec<&str>) -> Vec<String> {
    ids.into_iter().map(str::to_owned).collect()
}

/// An assembled operation. Cheap to clone and safe to share across tasks;
/// every call gets its own [`CallContext`].
pub struct Orchestrator<I, O> {
    operation_name: String,
    service_name: Option<String>,
    chain: Arc<dyn Handler<I, O>>,
    stages: Vec<(StageName, Vec<String>)>,
    observer: Option<Arc<dyn Observer>>,
    metrics: RuntimeMetrics,
}

impl<I, O> Clone for Orchestrator<I, O> {
    fn clone(&self) -> Self {
        Self {
            operation_name: self.operation_name.clone(),
            service_name: self.service_name.clone(),
            chain: Arc::clone(&self.chain),
            stages: self.stages.clone(),
            observer: self.observer.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<I, O> std::fmt::Debug for Orchestrator<I, O> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Orchestrator")
            .field("operation_name", &self.operation_name)
            .field("service_name", &self.service_name)
            .field("stages", &self.stages)
            .finish_non_exhaustive()
    }
}

impl<I, O> Orchestrator<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    /// Middleware ids per stage, outermost first.
    pub fn stages(&self) -> &[(StageName, Vec<String>)] {
        &self.stages
    }

    pub fn metrics_snapshot(&self) -> RuntimeMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn new_context(&self) -> CallContext {
        let context = CallContext::new(self.operation_name.clone());
        match &self.service_name {
            Some(service_name) => context.with_service_name(service_name.clone()),
            None => context,
        }
    }

    /// Runs one call with a fresh context.
    pub async fn call(&self, input: I) -> Result<O> {
        let mut context = self.new_context();
        self.handle(&mut context, input).await
    }

    pub async fn handle(&self, context: &mut CallContext, input: I) -> Result<O> {
        if let Some(service_name) = &self.service_name {
            context.set_service_name_if_absent(service_name);
        }
        self.metrics.record_operation_started();
        let _in_flight = self.metrics.enter_in_flight();
        if let Some(observer) = &self.observer {
            observer.on_operation_start(context);
        }

        let started = Instant::now();
        let span = info_span!(
            "opstack.operation",
            operation = %context.operation_name(),
            service = context.service_name().unwrap_or_default(),
            invocation_id = %context.invocation_id()
        );
        let result = self.chain.call(context, input).instrument(span).await;

        let elapsed = started.elapsed();
        self.metrics.record_operation_completed(&result, elapsed);
        if let Some(observer) = &self.observer {
            observer.on_operation_complete(context, result.as_ref().err(), elapsed);
        }
        result
    }
}

//! Middlewares shipped with the runtime. Generated operations register the
//! ones they need; none of them is mandatory.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use http::header::{CONTENT_LENGTH, HeaderValue, USER_AGENT};
use http::{HeaderMap, Method, StatusCode};
use tracing::debug;

use crate::Result;
use crate::context::CallContext;
use crate::error::Error;
use crate::request::{HttpRequest, HttpRequestBuilder};
use crate::stack::{Handler, Middleware, SerializeInput};
use crate::transport::{RequestSerializer, Signer};
use crate::util::parse_header_value;

type Validator<I> = dyn Fn(&I) -> std::result::Result<(), String> + Send + Sync;

/// Initialize-stage check that rejects bad input before anything is
/// serialized or sent.
pub struct InputValidationMiddleware<I> {
    validator: Arc<Validator<I>>,
}

impl<I> InputValidationMiddleware<I> {
    pub fn new<F>(validator: F) -> Self
    where
        F: Fn(&I) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        Self {
            validator: Arc::new(validator),
        }
    }
}

#[async_trait]
impl<I, O> Middleware<I, O> for InputValidationMiddleware<I>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn id(&self) -> &str {
        "input_validation"
    }

    async fn handle(
        &self,
        context: &mut CallContext,
        input: I,
        next: &dyn Handler<I, O>,
    ) -> Result<O> {
        (self.validator)(&input).map_err(|message| Error::InvalidInput {
            operation: context.operation_name().to_owned(),
            message,
        })?;
        next.call(context, input).await
    }
}

/// Writes the operation input onto the request through the protocol codec.
pub struct BodySerializeMiddleware<I> {
    serializer: Arc<dyn RequestSerializer<I>>,
}

impl<I> BodySerializeMiddleware<I> {
    pub fn new(serializer: impl RequestSerializer<I> + 'static) -> Self {
        Self {
            serializer: Arc::new(serializer),
        }
    }

    pub fn shared(serializer: Arc<dyn RequestSerializer<I>>) -> Self {
        Self { serializer }
    }
}

#[async_trait]
impl<I, O> Middleware<SerializeInput<I>, O> for BodySerializeMiddleware<I>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn id(&self) -> &str {
        "body_serialize"
    }

    async fn handle(
        &self,
        context: &mut CallContext,
        mut input: SerializeInput<I>,
        next: &dyn Handler<SerializeInput<I>, O>,
    ) -> Result<O> {
        self.serializer.serialize(&input.input, &mut input.builder)?;
        next.call(context, input).await
    }
}

/// Points requests without an explicit endpoint at the client's endpoint.
#[derive(Clone, Debug)]
pub struct EndpointMiddleware {
    endpoint: String,
}

impl EndpointMiddleware {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl<O> Middleware<HttpRequestBuilder, O> for EndpointMiddleware
where
    O: Send + 'static,
{
    fn id(&self) -> &str {
        "endpoint"
    }

    async fn handle(
        &self,
        context: &mut CallContext,
        mut builder: HttpRequestBuilder,
        next: &dyn Handler<HttpRequestBuilder, O>,
    ) -> Result<O> {
        if builder.current_endpoint().is_none() {
            builder.endpoint(self.endpoint.clone());
        }
        next.call(context, builder).await
    }
}

#[derive(Clone, Debug)]
pub struct UserAgentMiddleware {
    value: HeaderValue,
}

impl UserAgentMiddleware {
    /// `<sdk>/<version>`, optionally followed by `app/<app_id>`.
    pub fn new(sdk_name: &str, sdk_version: &str, app_id: Option<&str>) -> Result<Self> {
        let text = match app_id {
            Some(app_id) => format!("{sdk_name}/{sdk_version} app/{app_id}"),
            None => format!("{sdk_name}/{sdk_version}"),
        };
        Ok(Self {
            value: parse_header_value(USER_AGENT.as_str(), &text)?,
        })
    }

    pub fn value(&self) -> &HeaderValue {
        &self.value
    }
}

#[async_trait]
impl<O> Middleware<HttpRequestBuilder, O> for UserAgentMiddleware
where
    O: Send + 'static,
{
    fn id(&self) -> &str {
        "user_agent"
    }

    async fn handle(
        &self,
        context: &mut CallContext,
        mut builder: HttpRequestBuilder,
        next: &dyn Handler<HttpRequestBuilder, O>,
    ) -> Result<O> {
        if !builder.headers().contains_key(USER_AGENT) {
            builder.header(USER_AGENT, self.value.clone());
        }
        next.call(context, builder).await
    }
}

/// Sets `content-length` for requests that carry a body or whose method
/// expects one.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContentLengthMiddleware;

#[async_trait]
impl<O> Middleware<HttpRequestBuilder, O> for ContentLengthMiddleware
where
    O: Send + 'static,
{
    fn id(&self) -> &str {
        "content_length"
    }

    async fn handle(
        &self,
        context: &mut CallContext,
        mut builder: HttpRequestBuilder,
        next: &dyn Handler<HttpRequestBuilder, O>,
    ) -> Result<O> {
        let expects_body = matches!(
            *builder.current_method(),
            Method::POST | Method::PUT | Method::PATCH
        );
        if !builder.headers().contains_key(CONTENT_LENGTH)
            && (expects_body || !builder.current_body().is_empty())
        {
            let length = HeaderValue::from(builder.current_body().len());
            builder.header(CONTENT_LENGTH, length);
        }
        next.call(context, builder).await
    }
}

/// Adds headers the request does not already carry.
#[derive(Clone, Debug, Default)]
pub struct DefaultHeadersMiddleware {
    headers: HeaderMap,
}

impl DefaultHeadersMiddleware {
    pub fn new(headers: HeaderMap) -> Self {
        Self { headers }
    }

    pub fn try_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = crate::util::parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        self.headers.insert(name, value);
        Ok(self)
    }
}

#[async_trait]
impl<O> Middleware<HttpRequestBuilder, O> for DefaultHeadersMiddleware
where
    O: Send + 'static,
{
    fn id(&self) -> &str {
        "default_headers"
    }

    async fn handle(
        &self,
        context: &mut CallContext,
        mut builder: HttpRequestBuilder,
        next: &dyn Handler<HttpRequestBuilder, O>,
    ) -> Result<O> {
        for (name, value) in &self.headers {
            if !builder.headers().contains_key(name) {
                builder.header(name.clone(), value.clone());
            }
        }
        next.call(context, builder).await
    }
}

/// Signs each attempt right before it leaves the Finalize stage.
pub struct SigningMiddleware {
    signer: Arc<dyn Signer>,
}

impl SigningMiddleware {
    pub fn new(signer: impl Signer + 'static) -> Self {
        Self {
            signer: Arc::new(signer),
        }
    }

    pub fn shared(signer: Arc<dyn Signer>) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl<O> Middleware<HttpRequest, O> for SigningMiddleware
where
    O: Send + 'static,
{
    fn id(&self) -> &str {
        "signing"
    }

    async fn handle(
        &self,
        context: &mut CallContext,
        mut request: HttpRequest,
        next: &dyn Handler<HttpRequest, O>,
    ) -> Result<O> {
        self.signer.sign(context, &mut request).await?;
        next.call(context, request).await
    }
}

/// What the Deserialize terminal saw on the wire for the latest attempt.
/// Absent when that attempt failed before a response arrived.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LastResponse {
    pub status: StatusCode,
    pub request_id: Option<String>,
}

/// Logs every attempt that reaches the wire.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResponseLoggingMiddleware;

#[async_trait]
impl<O> Middleware<HttpRequest, O> for ResponseLoggingMiddleware
where
    O: Send + 'static,
{
    fn id(&self) -> &str {
        "response_logging"
    }

    async fn handle(
        &self,
        context: &mut CallContext,
        request: HttpRequest,
        next: &dyn Handler<HttpRequest, O>,
    ) -> Result<O> {
        let method = request.method().clone();
        let uri = request.uri().to_string();
        let started = Instant::now();
        debug!(method = %method, uri = %uri, attempt = context.attempt(), "sending request");

        let result = next.call(context, request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let last = context.get::<LastResponse>().cloned();
        let status = last.as_ref().map(|last| last.status.as_u16());
        let request_id = last.and_then(|last| last.request_id);
        let request_id = request_id.as_deref();
        match &result {
            Ok(_) => debug!(
                method = %method,
                uri = %uri,
                status,
                request_id,
                elapsed_ms,
                "request completed"
            ),
            Err(error) => debug!(
                method = %method,
                uri = %uri,
                status,
                request_id,
                elapsed_ms,
                error = %error,
                "request failed"
            ),
        }
        result
    }
}

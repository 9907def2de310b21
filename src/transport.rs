//! Seams to the collaborators the runtime drives but does not implement:
//! the transport engine, protocol codecs and request signing.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::Result;
use crate::context::CallContext;
use crate::extensions::{Clock, SystemClock};
use crate::request::{HttpRequest, HttpRequestBuilder};
use crate::response::HttpResponse;

/// Performs exactly one network exchange. Invoked once per attempt by the
/// Deserialize stage terminal.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Writes an operation input onto the request under construction.
pub trait RequestSerializer<I>: Send + Sync {
    fn serialize(&self, input: &I, builder: &mut HttpRequestBuilder) -> Result<()>;
}

impl<I, F> RequestSerializer<I> for F
where
    F: Fn(&I, &mut HttpRequestBuilder) -> Result<()> + Send + Sync,
{
    fn serialize(&self, input: &I, builder: &mut HttpRequestBuilder) -> Result<()> {
        self(input, builder)
    }
}

/// Turns a raw response into the operation output, or into a modeled
/// [`Error::Service`](crate::Error::Service) for error responses.
pub trait ResponseDeserializer<O>: Send + Sync {
    fn deserialize(&self, response: &HttpResponse) -> Result<O>;
}

impl<O, F> ResponseDeserializer<O> for F
where
    F: Fn(&HttpResponse) -> Result<O> + Send + Sync,
{
    fn deserialize(&self, response: &HttpResponse) -> Result<O> {
        self(response)
    }
}

/// Decodes 2xx bodies as JSON and maps every other status onto
/// [`HttpResponse::service_error`].
pub struct JsonDeserializer<O> {
    clock: Arc<dyn Clock>,
    _output: PhantomData<fn() -> O>,
}

impl<O> JsonDeserializer<O> {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Clock used to turn an HTTP-date `Retry-After` into a delay.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            _output: PhantomData,
        }
    }
}

impl<O> Default for JsonDeserializer<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O> std::fmt::Debug for JsonDeserializer<O> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str("JsonDeserializer")
    }
}

impl<O> ResponseDeserializer<O> for JsonDeserializer<O>
where
    O: DeserializeOwned,
{
    fn deserialize(&self, response: &HttpResponse) -> Result<O> {
        if response.is_success() {
            return response.json();
        }
        Err(response.service_error(self.clock.now_system()).into())
    }
}

/// Signs one attempt. Signatures are time-bound, so the Finalize stage calls
/// this again on every retry.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, context: &CallContext, request: &mut HttpRequest) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use http::header::RETRY_AFTER;
    use http::{HeaderMap, HeaderValue, StatusCode};
    use serde::Deserialize;

    use super::{JsonDeserializer, ResponseDeserializer};
    use crate::error::Fault;
    use crate::extensions::{Clock, ManualClock};
    use crate::response::HttpResponse;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: u32,
    }

    #[test]
    fn json_deserializer_splits_on_status() {
        let deserializer = JsonDeserializer::<Item>::new();
        let ok = HttpResponse::new(StatusCode::OK, HeaderMap::new(), r#"{"id":7}"#);
        assert_eq!(deserializer.deserialize(&ok).expect("decodes"), Item { id: 7 });

        let mut headers = HeaderMap::new();
        headers.insert("x-error-code", HeaderValue::from_static("ThrottlingException"));
        let throttled = HttpResponse::new(StatusCode::TOO_MANY_REQUESTS, headers, "");
        let error = deserializer
            .deserialize(&throttled)
            .expect_err("429 is an error");
        let service = error.as_service_error().expect("modeled error");
        assert_eq!(service.code.as_deref(), Some("ThrottlingException"));
        assert_eq!(service.fault, Fault::Client);
    }

    #[test]
    fn http_date_retry_after_uses_the_given_clock() {
        let clock = Arc::new(ManualClock::default());
        let retry_at = clock.now_system() + Duration::from_secs(30);
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::try_from(httpdate::fmt_http_date(retry_at)).expect("http date"),
        );
        let unavailable = HttpResponse::new(StatusCode::SERVICE_UNAVAILABLE, headers, "");

        let deserializer = JsonDeserializer::<Item>::with_clock(clock);
        let error = deserializer
            .deserialize(&unavailable)
            .expect_err("503 is an error");
        assert_eq!(
            error.as_service_error().and_then(|service| service.retry_after),
            Some(Duration::from_secs(30))
        );
    }
}

//! `opstack` is the per-operation runtime for generated API SDK clients: an
//! ordered middleware stack, a quota-bounded retry engine and acceptor-driven
//! waiters. The network engine, protocol codecs and request signing plug in
//! through the traits in [`transport`].
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use http::Method;
//! use opstack::prelude::{
//!     ClientConfig, HttpRequest, HttpRequestBuilder, HttpResponse, JsonDeserializer, Transport,
//! };
//! use serde::Deserialize;
//!
//! struct MyTransport;
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&self, _request: HttpRequest) -> opstack::Result<HttpResponse> {
//!         unimplemented!("hand the request to an HTTP engine")
//!     }
//! }
//!
//! #[derive(Debug, Deserialize)]
//! struct Table {
//!     status: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder("https://tables.example.com")
//!         .service_name("tables")
//!         .try_build()?;
//!
//!     let describe = config
//!         .operation::<String, Table>("DescribeTable")
//!         .serializer(
//!             |name: &String, builder: &mut HttpRequestBuilder| -> opstack::Result<()> {
//!                 builder.method(Method::GET).path(format!("/tables/{name}"));
//!                 Ok(())
//!             },
//!         )
//!         .build(Arc::new(MyTransport), JsonDeserializer::new());
//!
//!     let table = describe.call("orders".to_owned()).await?;
//!     println!("status={}", table.status);
//!     Ok(())
//! }
//! ```
//!
//! # Recommended Defaults
//!
//! - Build every operation of one client from one [`ClientConfig`] so they
//!   share retry quota partitions.
//! - Use `RetryStrategyOptions::standard()` unless the service documents
//!   otherwise.
//! - Put a [`CancellationToken`](tokio_util::sync::CancellationToken) on the
//!   [`CallContext`] for calls that may need to be abandoned mid-backoff.

pub mod config;
pub mod context;
pub mod error;
pub mod extensions;
mod metrics;
pub mod observe;
pub mod request;
pub mod response;
pub mod retry;
pub mod stack;
pub mod transport;
mod util;
pub mod waiter;

pub use crate::config::{ClientConfig, ClientConfigBuilder, ClientProfile, ProfileDefaults};
pub use crate::context::CallContext;
pub use crate::error::{Error, ErrorCode, Fault, ServiceError, TransportErrorKind};
pub use crate::metrics::{RuntimeMetrics, RuntimeMetricsSnapshot};
pub use crate::observe::Observer;
pub use crate::request::{HttpRequest, HttpRequestBuilder};
pub use crate::response::HttpResponse;
pub use crate::retry::{
    RetryMiddleware, RetryStrategy, RetryStrategyOptions, RetryToken, StandardRetryStrategy,
};
pub use crate::stack::{
    Handler, Middleware, OperationStackBuilder, Orchestrator, Position, SerializeInput, StageName,
};
pub use crate::transport::{
    JsonDeserializer, RequestSerializer, ResponseDeserializer, Signer, Transport,
};
pub use crate::util::parse_retry_after;
pub use crate::waiter::{
    Acceptor, AcceptorState, Matcher, Waiter, WaiterConfig, WaiterError, WaiterOptions,
    WaiterOutcome,
};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        Acceptor, AcceptorState, CallContext, ClientConfig, ClientProfile, Error, ErrorCode,
        Handler, HttpRequest, HttpRequestBuilder, HttpResponse, JsonDeserializer, Middleware,
        OperationStackBuilder, Orchestrator, Position, RequestSerializer, ResponseDeserializer,
        Result, RetryStrategyOptions, ServiceError, Signer, StageName, Transport, Waiter,
        WaiterConfig, WaiterError, WaiterOptions,
    };
}

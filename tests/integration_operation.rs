use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, Method, StatusCode};
use opstack::extensions::{FixedJitter, RecordingSleeper};
use opstack::prelude::{
    CallContext, ClientConfig, ErrorCode, Handler, HttpRequest, HttpRequestBuilder, HttpResponse,
    JsonDeserializer, Middleware, Position, Result, RetryStrategyOptions, StageName, Transport,
};
use opstack::retry::ExponentialBackoff;
use serde::{Deserialize, Serialize};

const ENDPOINT: &str = "https://items.example.com";

#[derive(Debug, Serialize)]
struct CreateItem {
    name: String,
}

#[derive(Debug, Deserialize, PartialEq)]
struct Item {
    id: u32,
    name: String,
}

/// Answers 500 to the first request for each path and echoes the JSON body
/// back with an id afterwards.
#[derive(Default)]
struct FlakyEcho {
    failed_once: Mutex<HashSet<String>>,
    sends: AtomicUsize,
    last_request: Mutex<Option<HttpRequest>>,
}

#[async_trait]
impl Transport for FlakyEcho {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let id = self.sends.fetch_add(1, Ordering::SeqCst) as u32 + 1;
        let path = request.uri().path().to_owned();
        let first = self
            .failed_once
            .lock()
            .expect("failed_once lock")
            .insert(path);
        *self.last_request.lock().expect("last_request lock") = Some(request.clone());
        if first {
            return Ok(HttpResponse::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                HeaderMap::new(),
                "",
            ));
        }

        let mut body: serde_json::Value =
            serde_json::from_slice(request.body()).expect("request body is json");
        body["id"] = serde_json::json!(id);
        Ok(HttpResponse::new(
            StatusCode::OK,
            HeaderMap::new(),
            body.to_string(),
        ))
    }
}

fn config(sleeper: Arc<RecordingSleeper>) -> ClientConfig {
    ClientConfig::builder(ENDPOINT)
        .service_name("items")
        .user_agent("items-sdk", "1.2.3")
        .app_id("inventory")
        .try_default_header("x-api-version", "2024-01-01")
        .expect("valid default header")
        .retry_options(
            RetryStrategyOptions::standard().backoff(
                ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(2))
                    .jitter_source(Arc::new(FixedJitter::max())),
            ),
        )
        .sleeper(sleeper)
        .metrics_enabled(true)
        .build()
}

fn create_item(input: &CreateItem, builder: &mut HttpRequestBuilder) -> Result<()> {
    builder
        .method(Method::POST)
        .path(format!("/items/{}", input.name))
        .json(input)?;
    Ok(())
}

#[tokio::test]
async fn json_operation_retries_and_decodes() {
    let sleeper = Arc::new(RecordingSleeper::new());
    let config = config(Arc::clone(&sleeper));
    let transport = Arc::new(FlakyEcho::default());
    let operation = config
        .operation::<CreateItem, Item>("CreateItem")
        .serializer(create_item)
        .build(Arc::clone(&transport) as Arc<dyn Transport>, JsonDeserializer::new());

    let item = operation
        .call(CreateItem {
            name: "widget".to_owned(),
        })
        .await
        .expect("second attempt succeeds");

    assert_eq!(
        item,
        Item {
            id: 2,
            name: "widget".to_owned()
        }
    );
    assert_eq!(sleeper.delays(), vec![Duration::from_millis(100)]);

    let request = transport
        .last_request
        .lock()
        .expect("last_request lock")
        .clone()
        .expect("a request was sent");
    let headers = request.headers();
    assert_eq!(
        headers.get(USER_AGENT).and_then(|value| value.to_str().ok()),
        Some("items-sdk/1.2.3 app/inventory")
    );
    assert_eq!(
        headers.get("x-api-version").and_then(|value| value.to_str().ok()),
        Some("2024-01-01")
    );
    assert_eq!(
        headers.get(CONTENT_TYPE).and_then(|value| value.to_str().ok()),
        Some("application/json")
    );
    assert_eq!(
        headers.get(CONTENT_LENGTH).and_then(|value| value.to_str().ok()),
        Some(request.body().len().to_string().as_str())
    );
    assert_eq!(request.uri().to_string(), format!("{ENDPOINT}/items/widget"));

    let snapshot = operation.metrics_snapshot();
    assert_eq!(snapshot.operations_started, 1);
    assert_eq!(snapshot.retries, 1);
    assert_eq!(snapshot.in_flight, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_return_all_borrowed_quota() {
    let sleeper = Arc::new(RecordingSleeper::new());
    let config = config(sleeper);
    let transport = Arc::new(FlakyEcho::default());
    let operation = config
        .operation::<CreateItem, Item>("CreateItem")
        .serializer(create_item)
        .build(Arc::clone(&transport) as Arc<dyn Transport>, JsonDeserializer::new());

    let mut tasks = Vec::new();
    for index in 0..32 {
        let operation = operation.clone();
        tasks.push(tokio::spawn(async move {
            operation
                .call(CreateItem {
                    name: format!("item-{index}"),
                })
                .await
        }));
    }
    for task in tasks {
        task.await
            .expect("task should not panic")
            .expect("every call succeeds on its second attempt");
    }

    assert_eq!(transport.sends.load(Ordering::SeqCst), 64);
    assert_eq!(
        config
            .quota_registry()
            .available_capacity("items.example.com"),
        Some(500)
    );
    let snapshot = config.metrics_snapshot();
    assert_eq!(snapshot.operations_succeeded, 32);
    assert_eq!(snapshot.attempts, 64);
}

#[tokio::test]
async fn operations_from_one_config_share_quota() {
    let sleeper = Arc::new(RecordingSleeper::new());
    let config = ClientConfig::builder(ENDPOINT)
        .retry_options(RetryStrategyOptions::standard().available_capacity(5))
        .sleeper(sleeper)
        .build();
    let transport = Arc::new(FlakyEcho::default());
    let first = config
        .operation::<CreateItem, Item>("CreateItem")
        .serializer(create_item)
        .build(Arc::clone(&transport) as Arc<dyn Transport>, JsonDeserializer::new());
    let second = config
        .operation::<CreateItem, Item>("UpdateItem")
        .serializer(create_item)
        .build(Arc::clone(&transport) as Arc<dyn Transport>, JsonDeserializer::new());

    // First call takes the only retry token and gives it back on success.
    first
        .call(CreateItem {
            name: "a".to_owned(),
        })
        .await
        .expect("retry granted");
    assert_eq!(
        config.quota_registry().available_capacity("items.example.com"),
        Some(5)
    );
    second
        .call(CreateItem {
            name: "b".to_owned(),
        })
        .await
        .expect("quota was refunded");
}

struct RequireHeader(&'static str);

#[async_trait]
impl Middleware<HttpRequest, Item> for RequireHeader {
    fn id(&self) -> &str {
        "require_header"
    }

    async fn handle(
        &self,
        context: &mut CallContext,
        request: HttpRequest,
        next: &dyn Handler<HttpRequest, Item>,
    ) -> Result<Item> {
        if !request.headers().contains_key(self.0) {
            return Err(opstack::Error::InvalidInput {
                operation: context.operation_name().to_owned(),
                message: format!("missing {} header", self.0),
            });
        }
        next.call(context, request).await
    }
}

#[tokio::test]
async fn custom_middleware_can_be_removed_by_id() {
    let sleeper = Arc::new(RecordingSleeper::new());
    let config = config(sleeper);
    let transport = Arc::new(FlakyEcho::default());
    let guarded = || {
        config
            .operation::<CreateItem, Item>("CreateItem")
            .serializer(create_item)
            .finalize(RequireHeader("x-tenant"), Position::After)
    };

    let blocked = guarded().build(
        Arc::clone(&transport) as Arc<dyn Transport>,
        JsonDeserializer::new(),
    );
    let error = blocked
        .call(CreateItem {
            name: "a".to_owned(),
        })
        .await
        .expect_err("header is missing");
    assert_eq!(error.code(), ErrorCode::InvalidInput);
    assert_eq!(transport.sends.load(Ordering::SeqCst), 0);

    let mut builder = guarded();
    assert!(builder.remove(StageName::Finalize, "require_header"));
    assert!(!builder.remove(StageName::Finalize, "require_header"));
    let allowed = builder.build(
        Arc::clone(&transport) as Arc<dyn Transport>,
        JsonDeserializer::new(),
    );
    allowed
        .call(CreateItem {
            name: "b".to_owned(),
        })
        .await
        .expect("check removed");
}

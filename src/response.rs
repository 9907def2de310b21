use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

use crate::Result;
use crate::error::{Error, ServiceError};
use crate::util::{parse_retry_after, truncate_body};

const REQUEST_ID_HEADERS: [&str; 3] = ["x-request-id", "x-amzn-requestid", "x-amz-request-id"];
const ERROR_CODE_HEADERS: [&str; 2] = ["x-error-code", "x-amzn-errortype"];

/// Raw response produced by a [`Transport`](crate::Transport).
#[derive(Clone, Debug)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn request_id(&self) -> Option<&str> {
        header_text(&self.headers, &REQUEST_ID_HEADERS)
    }

    pub fn json<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        serde_json::from_slice(&self.body)
            .map_err(|source| Error::deserialize(self.status.as_u16(), source))
    }

    /// Builds the protocol-agnostic part of a modeled error from a failed
    /// response: fault from the status, error code and request id from the
    /// usual headers, and any `Retry-After` hint. Protocol deserializers
    /// enrich the result with what they decode from the body.
    pub fn service_error(&self, now: std::time::SystemTime) -> ServiceError {
        let mut error = ServiceError::from_status(self.status.as_u16());
        if let Some(code) = header_text(&self.headers, &ERROR_CODE_HEADERS) {
            let code = code.split(':').next().unwrap_or(code);
            error = error.with_code(code);
        }
        if let Some(request_id) = self.request_id() {
            error = error.with_request_id(request_id);
        }
        if let Some(retry_after) = parse_retry_after(&self.headers, now) {
            error = error.with_retry_after(retry_after);
        }
        if !self.body.is_empty() {
            error = error.with_message(truncate_body(&self.body));
        }
        error
    }
}

fn header_text<'a>(headers: &'a HeaderMap, names: &[&str]) -> Option<&'a str> {
    names.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use http::header::{HeaderValue, RETRY_AFTER};
    use http::{HeaderMap, StatusCode};
    use serde::Deserialize;

    use super::HttpResponse;
    use crate::error::{ErrorCode, Fault};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Table {
        status: String,
    }

    #[test]
    fn json_decodes_body() {
        let response = HttpResponse::new(StatusCode::OK, HeaderMap::new(), r#"{"status":"ACTIVE"}"#);
        let table: Table = response.json().expect("body should decode");
        assert_eq!(table.status, "ACTIVE");
    }

    #[test]
    fn json_decode_error_keeps_status() {
        let response = HttpResponse::new(StatusCode::OK, HeaderMap::new(), "not-json");
        let error = response.json::<Table>().expect_err("garbage must fail");
        assert_eq!(error.code(), ErrorCode::Deserialize);
    }

    #[test]
    fn service_error_reads_standard_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-amzn-errortype",
            HeaderValue::from_static("ThrottlingException:http://internal/"),
        );
        headers.insert("x-request-id", HeaderValue::from_static("abc-123"));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        let response = HttpResponse::new(StatusCode::BAD_REQUEST, headers, "slow down");

        let error = response.service_error(SystemTime::now());
        assert_eq!(error.fault, Fault::Client);
        assert_eq!(error.status, Some(400));
        assert_eq!(error.code.as_deref(), Some("ThrottlingException"));
        assert_eq!(error.request_id.as_deref(), Some("abc-123"));
        assert_eq!(error.retry_after, Some(Duration::from_secs(3)));
        assert_eq!(error.message.as_deref(), Some("slow down"));
    }
}

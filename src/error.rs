use std::time::Duration;

use thiserror::Error;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Timeout,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Timeout => "timeout",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// Which side of the call a modeled service error blames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Fault {
    Client,
    Server,
}

impl std::fmt::Display for Fault {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(match self {
            Self::Client => "client",
            Self::Server => "server",
        })
    }
}

/// A modeled error returned by the service and decoded by a
/// [`ResponseDeserializer`](crate::ResponseDeserializer).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceError {
    pub fault: Fault,
    pub code: Option<String>,
    pub message: Option<String>,
    pub status: Option<u16>,
    pub retryable: bool,
    pub throttling: bool,
    pub retry_after: Option<Duration>,
    pub request_id: Option<String>,
}

impl ServiceError {
    pub fn new(fault: Fault) -> Self {
        Self {
            fault,
            code: None,
            message: None,
            status: None,
            retryable: false,
            throttling: false,
            retry_after: None,
            request_id: None,
        }
    }

    pub fn client() -> Self {
        Self::new(Fault::Client)
    }

    pub fn server() -> Self {
        Self::new(Fault::Server)
    }

    /// Derives the fault from an HTTP status: 5xx blames the server, anything
    /// else the client.
    pub fn from_status(status: u16) -> Self {
        let fault = if (500..600).contains(&status) {
            Fault::Server
        } else {
            Fault::Client
        };
        Self::new(fault).with_status(status)
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn throttling(mut self, throttling: bool) -> Self {
        self.throttling = throttling;
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{} fault", self.fault)?;
        if let Some(status) = self.status {
            write!(formatter, " (status {status})")?;
        }
        if let Some(code) = &self.code {
            write!(formatter, " {code}")?;
        }
        if let Some(message) = &self.message {
            write!(formatter, ": {message}")?;
        }
        if let Some(request_id) = &self.request_id {
            write!(formatter, " [request id {request_id}]")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidInput,
    InvalidUri,
    InvalidHeaderName,
    InvalidHeaderValue,
    RequestBuild,
    Serialize,
    Deserialize,
    Signing,
    Transport,
    Service,
    RetryQuotaExceeded,
    MaxAttemptsExceeded,
    DeadlineExceeded,
    WaiterConfiguration,
    Cancelled,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::InvalidUri => "invalid_uri",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::RequestBuild => "request_build",
            Self::Serialize => "serialize",
            Self::Deserialize => "deserialize",
            Self::Signing => "signing",
            Self::Transport => "transport",
            Self::Service => "service",
            Self::RetryQuotaExceeded => "retry_quota_exceeded",
            Self::MaxAttemptsExceeded => "max_attempts_exceeded",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::WaiterConfiguration => "waiter_configuration",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid input for {operation}: {message}")]
    InvalidInput { operation: String, message: String },
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("failed to serialize request: {source}")]
    Serialize {
        #[source]
        source: BoxError,
    },
    #[error("failed to deserialize response (status {status}): {source}")]
    Deserialize {
        status: u16,
        #[source]
        source: BoxError,
    },
    #[error("failed to sign request: {source}")]
    Signing {
        #[source]
        source: BoxError,
    },
    #[error("transport error ({kind}): {source}")]
    Transport {
        kind: TransportErrorKind,
        #[source]
        source: BoxError,
    },
    #[error("service error: {0}")]
    Service(ServiceError),
    #[error(
        "retry quota exceeded after {attempts} attempt(s) ({available_capacity} available, {required} required): {source}"
    )]
    RetryQuotaExceeded {
        attempts: usize,
        available_capacity: usize,
        required: usize,
        #[source]
        source: Box<Error>,
    },
    #[error(
        "max attempts exceeded ({attempts}/{max_attempts}, {available_capacity} quota available): {source}"
    )]
    MaxAttemptsExceeded {
        attempts: usize,
        max_attempts: usize,
        available_capacity: usize,
        #[source]
        source: Box<Error>,
    },
    #[error(
        "retry deadline exceeded after {attempts} attempt(s) ({elapsed_ms}ms elapsed, budget {budget_ms}ms): {source}"
    )]
    DeadlineExceeded {
        attempts: usize,
        elapsed_ms: u128,
        budget_ms: u128,
        #[source]
        source: Box<Error>,
    },
    #[error("invalid waiter configuration: {message}")]
    WaiterConfiguration { message: &'static str },
    #[error("call cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: usize },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidInput { .. } => ErrorCode::InvalidInput,
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::Serialize { .. } => ErrorCode::Serialize,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
            Self::Signing { .. } => ErrorCode::Signing,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Service(_) => ErrorCode::Service,
            Self::RetryQuotaExceeded { .. } => ErrorCode::RetryQuotaExceeded,
            Self::MaxAttemptsExceeded { .. } => ErrorCode::MaxAttemptsExceeded,
            Self::DeadlineExceeded { .. } => ErrorCode::DeadlineExceeded,
            Self::WaiterConfiguration { .. } => ErrorCode::WaiterConfiguration,
            Self::Cancelled { .. } => ErrorCode::Cancelled,
        }
    }

    pub fn transport(
        kind: TransportErrorKind,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Transport {
            kind,
            source: source.into(),
        }
    }

    pub fn serialize(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Serialize {
            source: source.into(),
        }
    }

    pub fn deserialize(
        status: u16,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Deserialize {
            status,
            source: source.into(),
        }
    }

    pub fn signing(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Signing {
            source: source.into(),
        }
    }

    /// The modeled service error, looking through retry annotations to the
    /// last attempt's error.
    pub fn as_service_error(&self) -> Option<&ServiceError> {
        match self.last_attempt_error() {
            Self::Service(error) => Some(error),
            _ => None,
        }
    }

    /// Modeled error code, if the last attempt failed with a service error
    /// that carried one.
    pub fn service_code(&self) -> Option<&str> {
        self.as_service_error()
            .and_then(|error| error.code.as_deref())
    }

    /// Strips retry-engine annotations and returns the error the last attempt
    /// actually failed with.
    pub fn last_attempt_error(&self) -> &Error {
        match self {
            Self::RetryQuotaExceeded { source, .. }
            | Self::MaxAttemptsExceeded { source, .. }
            | Self::DeadlineExceeded { source, .. } => source.last_attempt_error(),
            other => other,
        }
    }

    /// Attempts recorded by the retry engine, when this error came out of it.
    pub fn attempts(&self) -> Option<usize> {
        match self {
            Self::RetryQuotaExceeded { attempts, .. }
            | Self::MaxAttemptsExceeded { attempts, .. }
            | Self::DeadlineExceeded { attempts, .. }
            | Self::Cancelled { attempts } => Some(*attempts),
            _ => None,
        }
    }

    /// Whether the last attempt timed out in transport.
    pub fn is_transport_timeout(&self) -> bool {
        matches!(
            self.last_attempt_error(),
            Self::Transport {
                kind: TransportErrorKind::Timeout,
                ..
            }
        )
    }
}

impl From<ServiceError> for Error {
    fn from(error: ServiceError) -> Self {
        Self::Service(error)
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorCode, Fault, ServiceError, TransportErrorKind};

    #[test]
    fn last_attempt_error_unwraps_nested_annotations() {
        let inner = Error::Service(ServiceError::from_status(503).with_code("SlowDown"));
        let error = Error::MaxAttemptsExceeded {
            attempts: 3,
            max_attempts: 3,
            available_capacity: 490,
            source: Box::new(inner),
        };

        assert_eq!(error.code(), ErrorCode::MaxAttemptsExceeded);
        assert_eq!(error.attempts(), Some(3));
        assert_eq!(error.service_code(), Some("SlowDown"));
        assert_eq!(
            error.as_service_error().map(|service| service.fault),
            Some(Fault::Server)
        );
    }

    #[test]
    fn error_codes_are_stable_strings() {
        let error = Error::transport(TransportErrorKind::Connect, "refused");
        assert_eq!(error.code().as_str(), "transport");
        assert_eq!(
            Error::Cancelled { attempts: 1 }.code().as_str(),
            "cancelled"
        );
        assert!(Error::transport(TransportErrorKind::Timeout, "slow").is_transport_timeout());
    }

    #[test]
    fn service_error_display_includes_context() {
        let error = ServiceError::client()
            .with_status(404)
            .with_code("ResourceNotFound")
            .with_message("missing table")
            .with_request_id("req-1");
        assert_eq!(
            error.to_string(),
            "client fault (status 404) ResourceNotFound: missing table [request id req-1]"
        );
    }
}

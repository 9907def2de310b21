use std::time::Duration;

use crate::error::{Error, ServiceError, TransportErrorKind};

const THROTTLING_ERROR_CODES: [&str; 14] = [
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestThrottledException",
    "TooManyRequestsException",
    "ProvisionedThroughputExceededException",
    "TransactionInProgressException",
    "RequestLimitExceeded",
    "BandwidthLimitExceeded",
    "LimitExceededException",
    "RequestThrottled",
    "SlowDown",
    "PriorRequestNotComplete",
    "EC2ThrottledException",
];

const TRANSIENT_ERROR_CODES: [&str; 3] = ["RequestTimeout", "RequestTimeoutException", "InternalError"];

const TRANSIENT_STATUS_CODES: [u16; 4] = [500, 502, 503, 504];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RetryKind {
    /// Server-side or connection-level failure worth another attempt.
    ServerFault,
    /// The service asked the client to slow down.
    Throttling,
}

impl std::fmt::Display for RetryKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(match self {
            Self::ServerFault => "server_fault",
            Self::Throttling => "throttling",
        })
    }
}

/// What the classifier learned about a retryable failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryErrorInfo {
    pub kind: RetryKind,
    /// Server-supplied hint that replaces the computed backoff.
    pub retry_after: Option<Duration>,
    /// The attempt timed out in transport; such retries cost more quota.
    pub is_timeout: bool,
}

impl RetryErrorInfo {
    pub fn server_fault() -> Self {
        Self {
            kind: RetryKind::ServerFault,
            retry_after: None,
            is_timeout: false,
        }
    }

    pub fn throttling() -> Self {
        Self {
            kind: RetryKind::Throttling,
            retry_after: None,
            is_timeout: false,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn timeout(mut self, is_timeout: bool) -> Self {
        self.is_timeout = is_timeout;
        self
    }
}

pub trait RetryClassifier: Send + Sync {
    /// `None` means the error is not retryable.
    fn classify(&self, error: &Error) -> Option<RetryErrorInfo>;
}

#[derive(Debug, Default)]
pub struct StandardRetryClassifier;

impl RetryClassifier for StandardRetryClassifier {
    fn classify(&self, error: &Error) -> Option<RetryErrorInfo> {
        match error {
            Error::Service(service) => classify_service_error(service),
            Error::Transport { kind, .. } => match kind {
                TransportErrorKind::Dns
                | TransportErrorKind::Connect
                | TransportErrorKind::Read => Some(RetryErrorInfo::server_fault()),
                TransportErrorKind::Timeout => Some(RetryErrorInfo::server_fault().timeout(true)),
                TransportErrorKind::Tls | TransportErrorKind::Other => None,
            },
            _ => None,
        }
    }
}

fn classify_service_error(error: &ServiceError) -> Option<RetryErrorInfo> {
    let code = error.code.as_deref();
    let info = if error.throttling
        || error.status == Some(429)
        || code.is_some_and(|code| THROTTLING_ERROR_CODES.contains(&code))
    {
        RetryErrorInfo::throttling()
    } else if error.retryable
        || error
            .status
            .is_some_and(|status| TRANSIENT_STATUS_CODES.contains(&status))
        || code.is_some_and(|code| TRANSIENT_ERROR_CODES.contains(&code))
    {
        RetryErrorInfo::server_fault()
    } else {
        return None;
    };

    Some(info.with_retry_after(error.retry_after))
}

/// Wraps another classifier and refuses every throttling retry. Useful for
/// latency-sensitive callers that prefer to surface throttling immediately.
pub struct NoThrottlingRetries<C>(pub C);

impl<C: RetryClassifier> RetryClassifier for NoThrottlingRetries<C> {
    fn classify(&self, error: &Error) -> Option<RetryErrorInfo> {
        self.0
            .classify(error)
            .filter(|info| info.kind != RetryKind::Throttling)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{
        NoThrottlingRetries, RetryClassifier, RetryErrorInfo, RetryKind, StandardRetryClassifier,
    };
    use crate::error::{Error, ServiceError, TransportErrorKind};

    fn classify(error: Error) -> Option<RetryErrorInfo> {
        StandardRetryClassifier.classify(&error)
    }

    #[test]
    fn http_5xx_is_server_fault_retryable() {
        let info = classify(ServiceError::from_status(500).into()).expect("500 should retry");
        assert_eq!(info.kind, RetryKind::ServerFault);
        assert_eq!(info.retry_after, None);
        assert!(classify(ServiceError::from_status(503).into()).is_some());
        assert!(classify(ServiceError::from_status(501).into()).is_none());
    }

    #[test]
    fn explicit_flags_drive_classification() {
        let throttled = classify(ServiceError::client().throttling(true).into())
            .expect("throttling flag should retry");
        assert_eq!(throttled.kind, RetryKind::Throttling);

        let retryable = classify(ServiceError::server().retryable(true).into())
            .expect("retryable flag should retry");
        assert_eq!(retryable.kind, RetryKind::ServerFault);
    }

    #[test]
    fn client_fault_without_flag_is_not_retryable() {
        let error = ServiceError::from_status(400).with_code("ValidationException");
        assert_eq!(classify(error.into()), None);
    }

    #[test]
    fn throttling_codes_and_429_are_throttling() {
        let by_code = classify(
            ServiceError::from_status(400)
                .with_code("ThrottlingException")
                .into(),
        )
        .expect("throttling code should retry");
        assert_eq!(by_code.kind, RetryKind::Throttling);

        let by_status = classify(ServiceError::from_status(429).into()).expect("429 should retry");
        assert_eq!(by_status.kind, RetryKind::Throttling);
    }

    #[test]
    fn retry_after_hint_is_carried() {
        let info = classify(
            ServiceError::from_status(503)
                .with_retry_after(Duration::from_secs(4))
                .into(),
        )
        .expect("503 should retry");
        assert_eq!(info.retry_after, Some(Duration::from_secs(4)));
    }

    #[test]
    fn transport_errors_split_by_kind() {
        let connect = classify(Error::transport(TransportErrorKind::Connect, "refused"))
            .expect("connect errors retry");
        assert!(!connect.is_timeout);

        let timeout = classify(Error::transport(TransportErrorKind::Timeout, "slow"))
            .expect("timeouts retry");
        assert!(timeout.is_timeout);

        assert_eq!(classify(Error::transport(TransportErrorKind::Tls, "bad cert")), None);
    }

    #[test]
    fn terminal_errors_are_never_retried() {
        let quota = Error::RetryQuotaExceeded {
            attempts: 2,
            available_capacity: 0,
            required: 5,
            source: Box::new(ServiceError::from_status(500).into()),
        };
        assert_eq!(classify(quota), None);
        assert_eq!(classify(Error::Cancelled { attempts: 1 }), None);
    }

    #[test]
    fn throttling_filter_drops_only_throttling() {
        let classifier = NoThrottlingRetries(StandardRetryClassifier);
        assert!(
            classifier
                .classify(&ServiceError::from_status(429).into())
                .is_none()
        );
        assert!(
            classifier
                .classify(&ServiceError::from_status(500).into())
                .is_some()
        );
    }
}

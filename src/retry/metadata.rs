use std::time::{Duration, SystemTime};

use http::header::{HeaderName, HeaderValue};

use crate::Result;
use crate::request::HttpRequest;
use crate::util::{apply_skew, format_compact_utc, parse_header_value};

pub const INVOCATION_ID_HEADER: HeaderName = HeaderName::from_static("sdk-invocation-id");
pub const REQUEST_METADATA_HEADER: HeaderName = HeaderName::from_static("sdk-request");

/// Structured `attempt=<n>; max=<m>[; ttl=<yyyyMMdd'T'HHmmss'Z'>]` field
/// stamped on every outgoing attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestMetadata {
    pub attempt: usize,
    pub max_attempts: usize,
    pub ttl: Option<SystemTime>,
}

impl RequestMetadata {
    /// `ttl` is only stamped from the second attempt onward and is the local
    /// time corrected by the estimated skew plus the socket timeout.
    pub fn for_attempt(
        attempt: usize,
        max_attempts: usize,
        now: SystemTime,
        estimated_skew_ms: i64,
        socket_timeout: Duration,
    ) -> Self {
        let ttl = (attempt > 1).then(|| {
            let server_now = apply_skew(now, estimated_skew_ms);
            server_now.checked_add(socket_timeout).unwrap_or(server_now)
        });
        Self {
            attempt,
            max_attempts,
            ttl,
        }
    }
}

impl std::fmt::Display for RequestMetadata {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "attempt={}; max={}",
            self.attempt, self.max_attempts
        )?;
        if let Some(ttl) = self.ttl {
            write!(formatter, "; ttl={}", format_compact_utc(ttl))?;
        }
        Ok(())
    }
}

pub(crate) fn stamp_request_metadata(
    request: &mut HttpRequest,
    invocation_id: &str,
    metadata: &RequestMetadata,
) -> Result<()> {
    let invocation_id = parse_header_value(INVOCATION_ID_HEADER.as_str(), invocation_id)?;
    let metadata = HeaderValue::try_from(metadata.to_string()).map_err(|source| {
        crate::Error::InvalidHeaderValue {
            name: REQUEST_METADATA_HEADER.as_str().to_owned(),
            source,
        }
    })?;
    let headers = request.headers_mut();
    headers.insert(INVOCATION_ID_HEADER, invocation_id);
    headers.insert(REQUEST_METADATA_HEADER, metadata);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use bytes::Bytes;
    use http::{HeaderMap, Method};

    use super::{INVOCATION_ID_HEADER, REQUEST_METADATA_HEADER, RequestMetadata, stamp_request_metadata};
    use crate::request::HttpRequest;

    fn at(seconds: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(seconds)
    }

    #[test]
    fn first_attempt_has_no_ttl() {
        let metadata = RequestMetadata::for_attempt(1, 3, at(1_445_412_480), 0, Duration::from_secs(60));
        assert_eq!(metadata.to_string(), "attempt=1; max=3");
    }

    #[test]
    fn later_attempts_add_skew_and_socket_timeout() {
        let metadata = RequestMetadata::for_attempt(
            2,
            3,
            at(1_445_412_480),
            -30_000,
            Duration::from_secs(60),
        );
        assert_eq!(metadata.to_string(), "attempt=2; max=3; ttl=20151021T072830Z");
    }

    #[test]
    fn stamping_overwrites_previous_attempt() {
        let mut request = HttpRequest::new(
            Method::GET,
            "https://a.example.com/".parse().expect("uri should parse"),
            HeaderMap::new(),
            Bytes::new(),
        );
        let first = RequestMetadata::for_attempt(1, 2, at(0), 0, Duration::ZERO);
        stamp_request_metadata(&mut request, "inv-1", &first).expect("stamp should succeed");
        let second = RequestMetadata::for_attempt(2, 2, at(0), 0, Duration::ZERO);
        stamp_request_metadata(&mut request, "inv-1", &second).expect("stamp should succeed");

        let headers = request.headers();
        assert_eq!(headers.get_all(REQUEST_METADATA_HEADER).iter().count(), 1);
        assert_eq!(
            headers
                .get(REQUEST_METADATA_HEADER)
                .and_then(|value| value.to_str().ok()),
            Some("attempt=2; max=2; ttl=19700101T000000Z")
        );
        assert_eq!(
            headers
                .get(INVOCATION_ID_HEADER)
                .and_then(|value| value.to_str().ok()),
            Some("inv-1")
        );
    }
}

//! Shared helpers for the transport.

use std::time::Duration;

use br_domain::error::Error;

/// Convert a `reqwest::Error` into the domain [`Error`] type.
///
/// Timeouts map to [`Error::Timeout`]; everything else maps to
/// [`Error::Network`].
pub fn from_reqwest(e: reqwest::Error, method_id: &str, elapsed: Duration) -> Error {
    if e.is_timeout() {
        Error::Timeout {
            message: e.to_string(),
            method_id: Some(method_id.to_owned()),
            elapsed_secs: elapsed.as_secs_f64(),
            last_status: None,
        }
    } else {
        Error::Network {
            message: e.to_string(),
            method_id: Some(method_id.to_owned()),
        }
    }
}

/// Parse a numeric `Retry-After` header value (seconds).
///
/// HTTP-date values are ignored.
pub fn parse_retry_after(value: Option<&str>) -> Option<u64> {
    value.and_then(|v| v.trim().parse::<u64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_numeric_only() {
        assert_eq!(parse_retry_after(Some("30")), Some(30));
        assert_eq!(parse_retry_after(Some(" 5 ")), Some(5));
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT")), None);
        assert_eq!(parse_retry_after(None), None);
    }
}

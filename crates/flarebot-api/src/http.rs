//! Mapping of HTTP outcomes onto [`CoreError`].

use std::time::Duration;

use flarebot_core::CoreError;
use reqwest::header::{HeaderMap, RETRY_AFTER};

/// Wait used when a 429 response carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Reads `Retry-After` (delta-seconds form only).
pub(crate) fn retry_after(headers: &HeaderMap) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(parse_retry_after)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

pub(crate) fn parse_retry_after(value: &str) -> Duration {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

/// A request that never produced a response.
pub(crate) fn send_error(what: &str, e: &reqwest::Error) -> CoreError {
    CoreError::Transient(format!("{what} request failed: {e}"))
}

/// Classifies a non-success response.
pub(crate) fn status_error(status: u16, retry_after: Duration, body: String) -> CoreError {
    match status {
        429 => CoreError::RateLimited { retry_after },
        404 => CoreError::NotFound(body),
        _ => CoreError::Http { status, body },
    }
}

/// Turns a response into its body text, or an error for status >= 300.
pub(crate) async fn checked_text(what: &str, resp: reqwest::Response) -> Result<String, CoreError> {
    let status = resp.status().as_u16();
    let wait = retry_after(resp.headers());
    let body = resp
        .text()
        .await
        .map_err(|e| CoreError::Transient(format!("{what} body read failed: {e}")))?;
    if status >= 300 {
        return Err(status_error(status, wait, body));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use flarebot_core::Disposition;

    use super::*;

    #[test]
    fn test_should_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("30"), Duration::from_secs(30));
        assert_eq!(parse_retry_after(" 2 "), Duration::from_secs(2));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"),
            DEFAULT_RETRY_AFTER
        );
    }

    #[test]
    fn test_should_classify_status_codes() {
        let limited = status_error(429, Duration::from_secs(5), String::new());
        assert_eq!(
            limited.disposition(),
            Disposition::RateLimited(Duration::from_secs(5))
        );
        assert!(status_error(404, DEFAULT_RETRY_AFTER, "gone".into()).is_not_found());
        assert_eq!(
            status_error(502, DEFAULT_RETRY_AFTER, String::new()).disposition(),
            Disposition::Retry
        );
        assert_eq!(
            status_error(400, DEFAULT_RETRY_AFTER, String::new()).disposition(),
            Disposition::Fatal
        );
    }

    #[test]
    fn test_should_default_missing_retry_after_header() {
        assert_eq!(retry_after(&HeaderMap::new()), DEFAULT_RETRY_AFTER);
    }
}

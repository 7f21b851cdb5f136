//! Vendor HTTP plumbing shared by the collectors.
//!
//! Status mapping: 401/403 are authentication failures, 429 is `RateLimited` with the
//! vendor's `Retry-After` (60s when absent), 408 and 5xx are transient, any other
//! non-success status is permanent. Transient failures get exactly one immediate retry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tally_core::ProviderId;

use crate::error::CollectorError;
use crate::throttle::ProviderThrottle;

/// Delay assumed when a 429 carries no usable `Retry-After`.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Attempts per call: the first try plus one immediate retry.
const MAX_ATTEMPTS: u32 = 2;

/// Vendor quota headers, when the vendor sends them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaStatus {
    /// Remaining calls in the vendor's window.
    pub remaining: Option<u32>,
    /// When the vendor's window resets.
    pub reset_at: Option<DateTime<Utc>>,
}

/// A decoded vendor response.
#[derive(Debug)]
pub struct VendorResponse<T> {
    /// Decoded body.
    pub body: T,
    /// Calls issued, including the retry.
    pub api_calls: u32,
    /// Quota headers of the final response.
    pub quota: QuotaStatus,
}

/// HTTP client for one vendor API.
#[derive(Clone)]
pub struct VendorHttp {
    client: Client,
    base_url: String,
    provider: ProviderId,
    throttle: Option<Arc<ProviderThrottle>>,
}

impl VendorHttp {
    /// Create a client for a vendor API.
    ///
    /// # Errors
    ///
    /// Returns `CollectorError::Configuration` if the HTTP client cannot be built.
    pub fn new(
        provider: ProviderId,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CollectorError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollectorError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            provider,
            throttle: None,
        })
    }

    /// Make every call wait on the provider's bucket.
    #[must_use]
    pub fn with_throttle(mut self, throttle: Arc<ProviderThrottle>) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Absolute URL of a vendor path.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// The underlying HTTP client.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Send a request and decode its JSON body.
    ///
    /// `build` is invoked once per attempt.
    ///
    /// # Errors
    ///
    /// Returns the classified vendor error once the retry budget is spent.
    pub async fn send_json<T, F>(&self, build: F) -> Result<VendorResponse<T>, CollectorError>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.send_once(&build).await {
                Ok((body, quota)) => {
                    return Ok(VendorResponse {
                        body,
                        api_calls: attempt,
                        quota,
                    })
                }
                Err(CollectorError::Transient(message)) if attempt < MAX_ATTEMPTS => {
                    tracing::debug!(
                        provider = %self.provider,
                        attempt = attempt,
                        error = %message,
                        "Transient vendor error, retrying immediately"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once<T, F>(&self, build: &F) -> Result<(T, QuotaStatus), CollectorError>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        if let Some(throttle) = &self.throttle {
            throttle.acquire(&self.provider).await;
        }

        let response = build(&self.client).send().await.map_err(transport_error)?;
        let status = response.status();
        let quota = quota_status(response.headers());

        if !status.is_success() {
            let retry_after = retry_after(response.headers());
            return Err(classify_status(status, retry_after));
        }

        let bytes = response.bytes().await.map_err(transport_error)?;
        let body = serde_json::from_slice(&bytes)
            .map_err(|e| CollectorError::Permanent(format!("unreadable response body: {e}")))?;
        Ok((body, quota))
    }
}

/// Map a non-success status to the error taxonomy.
#[must_use]
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>) -> CollectorError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            CollectorError::AuthenticationFailure(format!("vendor answered {status}"))
        }
        StatusCode::TOO_MANY_REQUESTS => CollectorError::RateLimited {
            retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
        },
        StatusCode::REQUEST_TIMEOUT => CollectorError::Transient(format!("vendor answered {status}")),
        s if s.is_server_error() => CollectorError::Transient(format!("vendor answered {status}")),
        _ => CollectorError::Permanent(format!("vendor answered {status}")),
    }
}

fn transport_error(error: reqwest::Error) -> CollectorError {
    // Never echo the URL: it may carry account identifiers.
    let error = error.without_url();
    if error.is_timeout() {
        CollectorError::Transient("vendor call timed out".into())
    } else if error.is_builder() {
        CollectorError::Configuration(error.to_string())
    } else if error.is_decode() {
        CollectorError::Permanent(error.to_string())
    } else {
        CollectorError::Transient(error.to_string())
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_u64(headers, RETRY_AFTER.as_str()).map(Duration::from_secs)
}

fn quota_status(headers: &HeaderMap) -> QuotaStatus {
    QuotaStatus {
        remaining: header_u64(headers, "x-ratelimit-remaining")
            .and_then(|v| u32::try_from(v).ok()),
        reset_at: header_u64(headers, "x-ratelimit-reset")
            .and_then(|v| i64::try_from(v).ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None),
            CollectorError::AuthenticationFailure(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, None),
            CollectorError::AuthenticationFailure(_)
        ));
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(7))),
            CollectorError::RateLimited {
                retry_after: Duration::from_secs(7)
            }
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, None),
            CollectorError::RateLimited {
                retry_after: DEFAULT_RETRY_AFTER
            }
        );
        assert!(classify_status(StatusCode::BAD_GATEWAY, None).is_retryable());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, None).is_retryable());
        assert!(matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, None),
            CollectorError::Permanent(_)
        ));
    }

    #[test]
    fn url_joins_without_double_slash() {
        let http = VendorHttp::new(
            ProviderId::new("retell").unwrap(),
            "https://api.example.com/",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(http.url("/v2/list-calls"), "https://api.example.com/v2/list-calls");
    }

    #[test]
    fn quota_headers_are_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", "42".parse().unwrap());
        headers.insert("x-ratelimit-reset", "1772366400".parse().unwrap());
        let quota = quota_status(&headers);
        assert_eq!(quota.remaining, Some(42));
        assert_eq!(
            quota.reset_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap())
        );
    }
}

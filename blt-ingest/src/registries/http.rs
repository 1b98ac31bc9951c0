//! Shared HTTP client for registry adapters
//!
//! One reqwest client per process with a user agent, request timeout and a
//! minimum spacing between requests. Responses are classified here:
//! - 2xx: body parsed into the caller's typed schema
//! - 404: `Ok(None)`
//! - 429 and 5xx: transient
//! - other 4xx: permanent

use blt_common::config::RegistryConfig;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::error::{RegistryError, RegistryResult};

const USER_AGENT: &str = concat!("blt-ingest/", env!("CARGO_PKG_VERSION"));

/// Socrata header for application tokens
const APP_TOKEN_HEADER: &str = "X-App-Token";

/// Spaces consecutive requests by at least `min_interval`
pub struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    /// Wait if necessary to comply with the rate limit
    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// Map a non-success status to a registry error; `None` means not found
pub fn classify_status(status: StatusCode, body: &str) -> Option<RegistryError> {
    if status == StatusCode::NOT_FOUND {
        return None;
    }

    let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body, 200));

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Some(RegistryError::Transient(detail))
    } else {
        Some(RegistryError::Permanent(detail))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn classify_transport(err: reqwest::Error) -> RegistryError {
    if err.is_decode() {
        RegistryError::Malformed(err.to_string())
    } else {
        // Timeouts, refused connections and resets all clear up on their own
        RegistryError::Transient(err.to_string())
    }
}

/// Rate-limited JSON-over-HTTP client shared by registry adapters
#[derive(Clone)]
pub struct HttpRegistryClient {
    http_client: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
    app_token: Option<String>,
}

impl HttpRegistryClient {
    pub fn new(config: &RegistryConfig, app_token: Option<String>) -> RegistryResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| RegistryError::Permanent(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            http_client,
            rate_limiter: Arc::new(RateLimiter::new(config.min_request_interval_ms)),
            app_token,
        })
    }

    /// GET `url` with query parameters; `Ok(None)` on 404
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> RegistryResult<Option<T>> {
        self.rate_limiter.wait().await;

        let mut request = self.http_client.get(url).query(query);
        if let Some(token) = &self.app_token {
            request = request.header(APP_TOKEN_HEADER, token);
        }

        tracing::debug!(url, "Registry request");

        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return match classify_status(status, &body) {
                None => Ok(None),
                Some(err) => Err(err),
            };
        }

        let body = response.text().await.map_err(classify_transport)?;
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| RegistryError::Malformed(format!("{} ({})", e, url)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(StatusCode::NOT_FOUND, ""), None);
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            Some(RegistryError::Transient(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, ""),
            Some(RegistryError::Transient(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "bad query"),
            Some(RegistryError::Permanent(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, ""),
            Some(RegistryError::Permanent(_))
        ));
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_requests() {
        let limiter = RateLimiter::new(20);
        let start = Instant::now();
        limiter.wait().await;
        limiter.wait().await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}

//! HTTP client with rate limiting awareness.
//!
//! Wraps reqwest for the backend adapters: per-request timeouts, optional
//! static auth header, rate-limit tracking from `X-RateLimit-*` headers,
//! and classification of response statuses into the engine's error
//! taxonomy so pipelines can tell transient from permanent failures.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::{header, Client, Response, StatusCode};
use tracing::{debug, warn};

use crate::config::NetworkConfig;
use crate::error::{CaravelError, Result};

/// Rate limit state extracted from response headers.
#[derive(Debug, Clone, Default)]
pub struct RateLimitState {
    /// Remaining requests allowed.
    pub remaining: Option<u64>,
    /// Total request limit.
    pub limit: Option<u64>,
    /// Unix timestamp when the rate limit resets.
    pub reset: Option<u64>,
}

impl RateLimitState {
    /// Check if we should throttle requests.
    pub fn should_throttle(&self) -> bool {
        match (self.remaining, self.limit) {
            (Some(remaining), Some(limit)) if limit > 0 => {
                // Throttle when below 10% of limit
                let threshold = (limit as f64 * 0.1) as u64;
                remaining < threshold.max(1)
            }
            _ => false,
        }
    }

    /// Get time until rate limit resets.
    pub fn time_until_reset(&self) -> Option<Duration> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.reset.and_then(|reset| {
            if reset > now {
                Some(Duration::from_secs(reset - now))
            } else {
                None
            }
        })
    }
}

/// Longest a throttle pause is allowed to take, even when the reset
/// timestamp is further out.
const MAX_THROTTLE_SLEEP: Duration = Duration::from_secs(2);

/// HTTP client with rate limiting awareness.
pub struct HttpClient {
    client: Client,
    /// Rate limit state (shared for thread safety).
    rate_limit_remaining: AtomicI64,
    rate_limit_limit: AtomicU64,
    rate_limit_reset: AtomicU64,
    /// Default timeout for requests.
    default_timeout: Duration,
    /// Throttle delay when rate limited and no reset time is known.
    throttle_delay: Duration,
}

impl HttpClient {
    /// Create a new HTTP client with default configuration.
    pub fn new() -> Result<Self> {
        Self::with_timeout(NetworkConfig::REQUEST_TIMEOUT)
    }

    /// Create a new HTTP client with a custom default timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        Self::build(timeout, None)
    }

    /// Create a client that sends a static auth header with every request.
    ///
    /// The header name is vendor-specific (`Authorization`, `X-Api-Key`, ...),
    /// so the adapter supplies both name and value.
    pub fn with_auth(timeout: Duration, header_name: &str, header_value: &str) -> Result<Self> {
        Self::build(timeout, Some((header_name, header_value)))
    }

    fn build(timeout: Duration, auth: Option<(&str, &str)>) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        if let Some((name, value)) = auth {
            let name = header::HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                CaravelError::Config {
                    message: format!("Invalid auth header name: {}", e),
                }
            })?;
            let mut value =
                header::HeaderValue::from_str(value).map_err(|e| CaravelError::Config {
                    message: format!("Invalid auth header value: {}", e),
                })?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(NetworkConfig::USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| CaravelError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                cause: None,
            })?;

        Ok(Self {
            client,
            rate_limit_remaining: AtomicI64::new(-1),
            rate_limit_limit: AtomicU64::new(0),
            rate_limit_reset: AtomicU64::new(0),
            default_timeout: timeout,
            throttle_delay: Duration::from_millis(500),
        })
    }

    /// Get the current rate limit state.
    pub fn rate_limit_state(&self) -> RateLimitState {
        let remaining = self.rate_limit_remaining.load(Ordering::SeqCst);
        RateLimitState {
            remaining: if remaining >= 0 {
                Some(remaining as u64)
            } else {
                None
            },
            limit: {
                let limit = self.rate_limit_limit.load(Ordering::SeqCst);
                if limit > 0 {
                    Some(limit)
                } else {
                    None
                }
            },
            reset: {
                let reset = self.rate_limit_reset.load(Ordering::SeqCst);
                if reset > 0 {
                    Some(reset)
                } else {
                    None
                }
            },
        }
    }

    /// Make a GET request.
    pub async fn get(&self, url: &str) -> Result<Response> {
        self.request(self.client.get(url), url).await
    }

    /// Make a GET request with a longer, transfer-sized timeout.
    pub async fn get_download(&self, url: &str) -> Result<Response> {
        let builder = self
            .client
            .get(url)
            .timeout(NetworkConfig::DOWNLOAD_REQUEST_TIMEOUT);
        self.request(builder, url).await
    }

    /// Make a GET request and deserialize the JSON body.
    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.get(url).await?;
        Ok(response.json::<T>().await?)
    }

    /// Download a body into memory, streamed chunk by chunk.
    pub async fn get_bytes(&self, url: &str) -> Result<bytes::Bytes> {
        use futures::StreamExt;

        let response = self.get_download(url).await?;
        let capacity = response.content_length().unwrap_or(0) as usize;
        let mut buffer = Vec::with_capacity(capacity);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| CaravelError::Network {
                message: format!("Download of {} interrupted: {}", url, e),
                cause: Some(e.to_string()),
            })?;
            buffer.extend_from_slice(&chunk);
        }
        Ok(bytes::Bytes::from(buffer))
    }

    /// Make a POST request with a JSON body.
    pub async fn post_json<B: serde::Serialize>(&self, url: &str, body: &B) -> Result<Response> {
        self.request(self.client.post(url).json(body), url).await
    }

    /// POST a JSON body and deserialize the JSON response.
    pub async fn post_json_response<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T> {
        let response = self.post_json(url, body).await?;
        Ok(response.json::<T>().await?)
    }

    /// POST a raw byte payload (`application/octet-stream`).
    pub async fn post_bytes(&self, url: &str, body: bytes::Bytes) -> Result<Response> {
        let builder = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .timeout(NetworkConfig::DOWNLOAD_REQUEST_TIMEOUT)
            .body(body);
        self.request(builder, url).await
    }

    // Internal methods

    async fn request(&self, builder: reqwest::RequestBuilder, url: &str) -> Result<Response> {
        self.maybe_throttle().await;

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CaravelError::Timeout(self.default_timeout)
            } else {
                CaravelError::Network {
                    message: format!("Request to {} failed: {}", url, e),
                    cause: std::error::Error::source(&e).map(|s| s.to_string()),
                }
            }
        })?;

        self.update_rate_limits(&response);
        self.check_response_status(response, url)
    }

    async fn maybe_throttle(&self) {
        let state = self.rate_limit_state();
        if state.should_throttle() {
            let delay = state
                .time_until_reset()
                .map(|d| d.min(MAX_THROTTLE_SLEEP))
                .unwrap_or(self.throttle_delay);
            warn!(
                "Rate limit approaching (remaining: {:?}/{:?}), throttling for {:?}",
                state.remaining, state.limit, delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn update_rate_limits(&self, response: &Response) {
        let headers = response.headers();

        let parse = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<i64>().ok())
        };

        if let Some(num) = parse("X-RateLimit-Remaining") {
            self.rate_limit_remaining.store(num, Ordering::SeqCst);
        }
        if let Some(num) = parse("X-RateLimit-Limit") {
            if num >= 0 {
                self.rate_limit_limit.store(num as u64, Ordering::SeqCst);
            }
        }
        if let Some(num) = parse("X-RateLimit-Reset") {
            if num >= 0 {
                self.rate_limit_reset.store(num as u64, Ordering::SeqCst);
            }
        }

        let remaining = self.rate_limit_remaining.load(Ordering::SeqCst);
        let limit = self.rate_limit_limit.load(Ordering::SeqCst);
        if remaining >= 0 && limit > 0 {
            debug!("Rate limit: {}/{}", remaining, limit);
        }
    }

    /// Map non-success statuses onto the error taxonomy.
    ///
    /// 404 is a permanent not-found (the pipelines usually record it as a
    /// skip); 401/403 are permission errors; 429 carries the `Retry-After`
    /// hint; 5xx and 408 are transient.
    fn check_response_status(&self, response: Response, url: &str) -> Result<Response> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());

            return Err(CaravelError::RateLimited {
                service: extract_domain(url),
                retry_after_secs: retry_after,
            });
        }

        Err(match status {
            StatusCode::NOT_FOUND => CaravelError::NotFound {
                what: url.to_string(),
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CaravelError::PermissionDenied {
                what: url.to_string(),
            },
            StatusCode::REQUEST_TIMEOUT => CaravelError::Timeout(self.default_timeout),
            s if s.is_server_error() => CaravelError::Network {
                message: format!("{} returned {}", url, s),
                cause: None,
            },
            s => CaravelError::Other(format!("{} returned unexpected status {}", url, s)),
        })
    }
}

/// Extract domain from a URL.
pub fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.host_str().unwrap_or("unknown").to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_state_throttle() {
        let state = RateLimitState {
            remaining: Some(5),
            limit: Some(100),
            reset: None,
        };
        assert!(state.should_throttle()); // 5 < 10% of 100

        let state = RateLimitState {
            remaining: Some(50),
            limit: Some(100),
            reset: None,
        };
        assert!(!state.should_throttle());
    }

    #[test]
    fn test_rate_limit_state_no_throttle_without_data() {
        let state = RateLimitState::default();
        assert!(!state.should_throttle());
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            extract_domain("https://track.example.com/api/rest/v2/workspaces"),
            "track.example.com"
        );
        assert_eq!(extract_domain("invalid-url"), "unknown");
    }

    #[tokio::test]
    async fn test_client_creation() {
        let client = HttpClient::new().unwrap();
        assert_eq!(client.rate_limit_state().remaining, None);
    }

    #[tokio::test]
    async fn test_client_with_auth_header() {
        let client = HttpClient::with_auth(Duration::from_secs(5), "X-Api-Key", "secret");
        assert!(client.is_ok());
        assert!(HttpClient::with_auth(Duration::from_secs(5), "bad header\n", "v").is_err());
    }
}

//! Network plumbing shared by the backend adapters.
//!
//! - HTTP client wrapper with rate-limit awareness and status classification
//! - Retry logic with exponential backoff and jitter

mod client;
mod retry;

pub use client::{extract_domain, HttpClient, RateLimitState};
pub use retry::{retry_async, RetryConfig, RetryStats};

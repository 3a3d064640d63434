//! Connection management
//!
//! This module builds the shared HTTP client with the BTN identifying
//! headers and provides the retry logic used for every BTN request.

use crate::config::{BtnClientConfig, HttpConfig};
use crate::error::{BtnError, Result};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Client;
use std::time::{Duration, Instant};

/// Header carrying the application id
pub const APP_ID_HEADER: &str = "X-BTN-AppID";
/// Header carrying the application secret
pub const APP_SECRET_HEADER: &str = "X-BTN-AppSecret";

/// Build the shared, connection-pooled HTTP client
///
/// Every request sent through the client carries the app credentials and
/// `Accept: application/json`.
pub fn build_client(config: &BtnClientConfig) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        HeaderName::from_static("x-btn-appid"),
        header_value("app_id", &config.app_id, false)?,
    );
    headers.insert(
        HeaderName::from_static("x-btn-appsecret"),
        header_value("app_secret", &config.app_secret, true)?,
    );
    headers.insert(
        AUTHORIZATION,
        header_value(
            "app_secret",
            &format!("Bearer {}@{}", config.app_id, config.app_secret),
            true,
        )?,
    );

    let http = &config.http;
    let mut builder = Client::builder()
        .default_headers(headers)
        .user_agent(config.user_agent.as_str())
        .connect_timeout(Duration::from_secs(http.connect_timeout))
        .read_timeout(Duration::from_secs(http.read_timeout))
        .redirect(reqwest::redirect::Policy::limited(http.max_redirects))
        .danger_accept_invalid_certs(http.accept_invalid_certs)
        .pool_idle_timeout(Duration::from_secs(90))
        .gzip(true);

    if let Some(ref proxy_url) = http.proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| BtnError::invalid_input("proxy_url", format!("Invalid proxy URL: {}", e)))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| BtnError::Internal(format!("Failed to create HTTP client: {}", e)))
}

fn header_value(field: &'static str, value: &str, sensitive: bool) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(value)
        .map_err(|_| BtnError::invalid_input(field, "Contains characters not allowed in a header"))?;
    value.set_sensitive(sensitive);
    Ok(value)
}

/// Request statistics
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    /// Total successful requests (any HTTP status)
    pub successful_requests: u64,
    /// Total failed attempts (transport faults)
    pub failed_requests: u64,
    /// Total retried attempts
    pub retried_requests: u64,
    /// Average response time in milliseconds
    pub avg_response_time_ms: f64,
    /// Last error message
    pub last_error: Option<String>,
}

/// Thread-safe recorder for [`ConnectionStats`]
#[derive(Debug, Default)]
pub struct StatsRecorder {
    stats: Mutex<ConnectionStats>,
}

impl StatsRecorder {
    /// Record a successful request
    pub fn record_success(&self, response_time_ms: f64) {
        let mut stats = self.stats.lock();
        stats.successful_requests += 1;

        // Exponential moving average
        let alpha = 0.2;
        stats.avg_response_time_ms =
            alpha * response_time_ms + (1.0 - alpha) * stats.avg_response_time_ms;
    }

    /// Record a failed attempt
    pub fn record_failure(&self, error: &str) {
        let mut stats = self.stats.lock();
        stats.failed_requests += 1;
        stats.last_error = Some(error.to_string());
    }

    /// Record a retried attempt
    pub fn record_retry(&self) {
        self.stats.lock().retried_requests += 1;
    }

    /// Snapshot of the statistics
    pub fn snapshot(&self) -> ConnectionStats {
        self.stats.lock().clone()
    }
}

/// Retry policy with exponential backoff and jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            jitter_factor: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(max_attempts: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms,
            max_delay_ms,
            jitter_factor: 0.25,
        }
    }

    /// Create a retry policy from the HTTP config
    pub fn from_config(config: &HttpConfig) -> Self {
        Self::new(
            config.max_retries.min(u32::MAX as usize) as u32,
            config.retry_delay_ms,
            config.max_retry_delay_ms,
        )
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms.saturating_mul(2u64.pow(attempt.min(10)));
        let capped = base.min(self.max_delay_ms);

        // Jitter: +/- jitter_factor
        let jitter = (rand::random::<f64>() - 0.5) * 2.0 * self.jitter_factor;
        let with_jitter = (capped as f64 * (1.0 + jitter)) as u64;

        Duration::from_millis(with_jitter)
    }

    /// Check if another attempt should follow a failed one
    pub fn should_retry(&self, attempt: u32, error: &BtnError) -> bool {
        if attempt + 1 >= self.max_attempts {
            return false;
        }

        error.is_retryable()
    }
}

/// Execute an operation with retry logic
///
/// Only retryable errors (transport faults) trigger another attempt.
pub async fn with_retry<F, T, Fut>(
    stats: &StatsRecorder,
    policy: &RetryPolicy,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        let start = Instant::now();

        match operation().await {
            Ok(result) => {
                stats.record_success(start.elapsed().as_millis() as f64);
                return Ok(result);
            }
            Err(e) => {
                stats.record_failure(&e.to_string());

                if !policy.should_retry(attempt, &e) {
                    return Err(e);
                }

                stats.record_retry();
                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(
                    "Request failed (attempt {}), retrying in {:?}: {}",
                    attempt + 1,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

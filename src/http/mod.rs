//! BTN HTTP client
//!
//! This module carries every request the core sends to the BTN server:
//! - Identifying headers on every request
//! - Retryable GET with query parameters
//! - Gzip-compressed JSON POST
//! - The current server config and rule snapshots

pub mod connection;

pub use connection::{
    build_client, with_retry, ConnectionStats, RetryPolicy, StatsRecorder, APP_ID_HEADER,
    APP_SECRET_HEADER,
};

use crate::config::BtnClientConfig;
use crate::error::{BtnError, ProtocolErrorKind, Result};
use crate::protocol::{Ability, BtnConfig, BtnRule};

use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::RwLock;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// A fully read HTTP response
#[derive(Debug, Clone)]
pub struct BtnResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl BtnResponse {
    /// Body as text, lossily decoded
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Short description for logs: status and the start of the body
    pub fn describe(&self) -> String {
        const MAX_BODY: usize = 256;
        let text = self.text();
        let body: String = text.chars().take(MAX_BODY).collect();
        format!("{} - {}", self.status.as_u16(), body)
    }
}

/// Client for the BTN server
///
/// Holds the shared connection pool, the retry policy and the current
/// server config and rule. Snapshots are swapped as whole `Arc`s so
/// readers never see a half-updated value.
pub struct BtnClient {
    client: Client,
    app_id: String,
    retry_policy: RetryPolicy,
    stats: StatsRecorder,
    cache_file: PathBuf,
    config: RwLock<Arc<BtnConfig>>,
    rule: RwLock<Option<Arc<BtnRule>>>,
}

impl BtnClient {
    /// Create a new client from the local configuration
    pub fn new(config: &BtnClientConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config)?,
            app_id: config.app_id.clone(),
            retry_policy: RetryPolicy::from_config(&config.http),
            stats: StatsRecorder::default(),
            cache_file: config.get_cache_file(),
            config: RwLock::new(Arc::new(BtnConfig::default())),
            rule: RwLock::new(None),
        })
    }

    /// Replace the retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// The underlying HTTP client
    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Application id sent with every request
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Rule cache file
    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    /// Request statistics
    pub fn stats(&self) -> ConnectionStats {
        self.stats.snapshot()
    }

    /// Current server config
    pub fn config(&self) -> Arc<BtnConfig> {
        Arc::clone(&self.config.read())
    }

    /// Swap in a new server config
    pub fn set_config(&self, config: BtnConfig) {
        *self.config.write() = Arc::new(config);
    }

    /// Check whether the current server config advertises a capability
    pub fn has_ability(&self, ability: Ability) -> bool {
        self.config.read().has_ability(ability)
    }

    /// Current rule, if one is loaded
    pub fn rule(&self) -> Option<Arc<BtnRule>> {
        self.rule.read().clone()
    }

    /// Swap in a new rule
    pub fn set_rule(&self, rule: BtnRule) {
        *self.rule.write() = Some(Arc::new(rule));
    }

    /// Retryable GET with query parameters appended to `url`
    pub async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<BtnResponse> {
        let mut url = Url::parse(url)?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        self.retryable_send(|| self.client.get(url.clone())).await
    }

    /// Serialize `body` as JSON, gzip it and POST it to `url`
    pub async fn post_gzip_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<BtnResponse> {
        let url = Url::parse(url)?;
        let payload = gzip_json(body)?;
        self.retryable_send(|| {
            self.client
                .post(url.clone())
                .header(CONTENT_TYPE, "application/json")
                .header(CONTENT_ENCODING, "gzip")
                .body(payload.clone())
        })
        .await
    }

    /// Send a request, retrying transport faults with backoff
    ///
    /// `build` is called once per attempt. Any HTTP status is a response,
    /// not a fault, and is returned without retrying.
    pub async fn retryable_send<F>(&self, build: F) -> Result<BtnResponse>
    where
        F: Fn() -> RequestBuilder,
    {
        let build = &build;
        with_retry(&self.stats, &self.retry_policy, || async move {
            let response = build().send().await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok(BtnResponse {
                status,
                body: body.to_vec(),
            })
        })
        .await
    }
}

/// JSON-encode and gzip-compress a value
pub fn gzip_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(value).map_err(|e| {
        BtnError::protocol(ProtocolErrorKind::Encoding, format!("JSON encode: {}", e))
    })?;
    let mut encoder = GzEncoder::new(Vec::with_capacity(json.len() / 4), Compression::default());
    encoder
        .write_all(&json)
        .and_then(|_| encoder.finish())
        .map_err(|e| BtnError::protocol(ProtocolErrorKind::Encoding, format!("gzip: {}", e)))
}

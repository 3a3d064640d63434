//! Rule fetching
//!
//! Pulls the rule document with the currently loaded revision. The server
//! answers 204 when the revision is current and 200 with a new document
//! otherwise. New documents are mirrored to the cache file so the next
//! process start can present a real revision.

use crate::error::{BtnError, ProtocolErrorKind, Result, StorageErrorKind};
use crate::http::{BtnClient, BtnResponse};
use crate::protocol::{Ability, BtnEvent, BtnRule, INITIAL_REVISION};
use reqwest::StatusCode;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Outcome of one rule check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleUpdate {
    /// The server does not advertise the rule capability
    Disabled,
    /// The loaded revision is current
    NotModified,
    /// A new rule is in effect
    Updated { version: Option<String> },
    /// Another check is still running
    Busy,
    /// The check failed; the previous rule is kept
    Failed,
}

/// Fetches rule documents from the BTN server
pub struct RuleFetcher {
    client: Arc<BtnClient>,
    events: Option<broadcast::Sender<BtnEvent>>,
    /// Held for the whole check, including the cache write
    cycle: Mutex<()>,
}

impl RuleFetcher {
    /// Create a fetcher using the given client
    pub fn new(client: Arc<BtnClient>) -> Self {
        Self {
            client,
            events: None,
            cycle: Mutex::new(()),
        }
    }

    /// Publish rule updates on an event channel
    pub fn with_events(mut self, events: broadcast::Sender<BtnEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Check for a new rule document
    pub async fn update_rule(&self) -> RuleUpdate {
        let config = self.client.config();
        let endpoint = match config.rule() {
            Some(rule) => rule.endpoint.clone(),
            None => {
                if config.has_ability(Ability::Rule) {
                    tracing::warn!("BTN server advertises rules without a rule endpoint");
                }
                return RuleUpdate::Disabled;
            }
        };

        let Ok(_cycle) = self.cycle.try_lock() else {
            tracing::debug!("Previous BTN rule check still running, skipping this cycle");
            return RuleUpdate::Busy;
        };

        let current = self.client.rule();
        let revision = current
            .as_deref()
            .map(BtnRule::revision)
            .unwrap_or(INITIAL_REVISION);

        let response = match self.client.get(&endpoint, &[("rev", revision)]).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("BTN rule request failed: {}", e);
                return RuleUpdate::Failed;
            }
        };

        match self.apply(response).await {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!("BTN rule request failed: {}", e);
                RuleUpdate::Failed
            }
        }
    }

    async fn apply(&self, response: BtnResponse) -> Result<RuleUpdate> {
        match response.status {
            StatusCode::NO_CONTENT => Ok(RuleUpdate::NotModified),
            StatusCode::OK => {
                let body = String::from_utf8(response.body).map_err(|e| {
                    BtnError::protocol(
                        ProtocolErrorKind::InvalidResponse,
                        format!("Rule body is not UTF-8: {}", e),
                    )
                })?;
                let rule = BtnRule::parse(body)?;
                let version = rule.version().map(str::to_string);

                if let Err(e) = write_cache(self.client.cache_file(), rule.raw()).await {
                    tracing::warn!("Failed to write BTN rule cache: {}", e);
                }
                self.client.set_rule(rule);

                tracing::info!(
                    "BTN rules updated to version {}",
                    version.as_deref().unwrap_or(INITIAL_REVISION)
                );
                if let Some(ref events) = self.events {
                    let _ = events.send(BtnEvent::RuleUpdated {
                        version: version.clone(),
                    });
                }
                Ok(RuleUpdate::Updated { version })
            }
            status => Err(BtnError::protocol(
                ProtocolErrorKind::UnexpectedStatus(status.as_u16()),
                response.describe(),
            )),
        }
    }

    /// Load the cached rule document, if any, into memory
    ///
    /// Returns the cached version. A missing or unreadable cache is not an
    /// error; the next fetch simply presents the initial revision.
    pub async fn load_cache(&self) -> Option<String> {
        let path = self.client.cache_file();
        let body = match tokio::fs::read_to_string(path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No BTN rule cache at {:?}", path);
                return None;
            }
            Err(e) => {
                tracing::warn!("Failed to read BTN rule cache {:?}: {}", path, e);
                return None;
            }
        };

        match BtnRule::parse(body) {
            Ok(rule) => {
                let revision = rule.revision().to_string();
                tracing::info!("Loaded cached BTN rules, version {}", revision);
                self.client.set_rule(rule);
                Some(revision)
            }
            Err(e) => {
                tracing::warn!("Ignoring corrupt BTN rule cache {:?}: {}", path, e);
                None
            }
        }
    }
}

/// Write the cache file atomically: temp file in the same directory, then rename
async fn write_cache(path: &Path, body: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            BtnError::storage(
                StorageErrorKind::Io,
                parent,
                format!("Failed to create directory: {}", e),
            )
        })?;
    }

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body.as_bytes())
        .await
        .map_err(|e| BtnError::storage(StorageErrorKind::Io, &tmp, e.to_string()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| BtnError::storage(StorageErrorKind::Io, path, e.to_string()))?;
    Ok(())
}

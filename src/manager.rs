//! BTN Manager - Main coordinator
//!
//! The `BtnManager` is the primary entry point for the library. It owns the
//! server config refresh, drives the rule fetcher and the ping submitter on
//! independent timers, and emits events.

use crate::config::BtnClientConfig;
use crate::downloader::{BanCounter, Downloader};
use crate::error::{BtnError, ProtocolErrorKind, Result};
use crate::http::BtnClient;
use crate::ping::PingBuilder;
use crate::protocol::{BtnConfig, BtnEvent, BtnRule};
use crate::rule::{RuleFetcher, RuleUpdate};
use crate::submit::{PingSubmitter, SubmitOutcome};

use parking_lot::Mutex;
use reqwest::StatusCode;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Maximum number of events to buffer
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How long shutdown waits for each background loop
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// The BTN client manager
pub struct BtnManager {
    /// Weak self-reference for spawning background tasks from `&self` methods
    self_ref: Weak<Self>,

    /// Local configuration
    config: BtnClientConfig,

    /// Shared BTN client (connection pool, config and rule snapshots)
    client: Arc<BtnClient>,

    /// Rule fetcher
    rules: RuleFetcher,

    /// Ping submitter
    submitter: PingSubmitter,

    /// Managed downloaders
    downloaders: Vec<Arc<dyn Downloader>>,

    /// Ban counter source
    ban_counter: Arc<dyn BanCounter>,

    /// Event broadcaster
    event_tx: broadcast::Sender<BtnEvent>,

    /// Set by the first `start()`
    started: AtomicBool,

    /// Background loops started by `start()`
    tasks: Mutex<Vec<JoinHandle<()>>>,

    /// Shutdown signal
    shutdown: CancellationToken,
}

impl BtnManager {
    /// Create a new manager. Nothing is fetched until [`start`](Self::start).
    pub fn new(
        config: BtnClientConfig,
        downloaders: Vec<Arc<dyn Downloader>>,
        ban_counter: Arc<dyn BanCounter>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let client = Arc::new(BtnClient::new(&config)?);
        Self::with_client(config, client, downloaders, ban_counter)
    }

    /// Create a manager around an existing client
    pub fn with_client(
        config: BtnClientConfig,
        client: Arc<BtnClient>,
        downloaders: Vec<Arc<dyn Downloader>>,
        ban_counter: Arc<dyn BanCounter>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let rules = RuleFetcher::new(Arc::clone(&client)).with_events(event_tx.clone());
        let builder = PingBuilder::new(downloaders.clone(), Arc::clone(&ban_counter));
        let submitter = PingSubmitter::new(Arc::clone(&client), builder, config.submit)
            .with_events(event_tx.clone());

        Ok(Arc::new_cyclic(|weak| Self {
            self_ref: weak.clone(),
            config,
            client,
            rules,
            submitter,
            downloaders,
            ban_counter,
            event_tx,
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        }))
    }

    /// Obtain a strong `Arc<Self>` reference for spawning background tasks.
    fn arc(&self) -> Result<Arc<Self>> {
        self.self_ref.upgrade().ok_or(BtnError::Shutdown)
    }

    /// Load the rule cache, fetch the server config and start the timers
    pub async fn start(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(BtnError::Shutdown);
        }
        let this = self.arc()?;
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("BTN client already started");
            return Ok(());
        }

        self.rules.load_cache().await;
        if let Err(e) = self.refresh_config().await {
            tracing::warn!("Failed to fetch BTN config, retrying on next refresh: {}", e);
        }

        let refresh = Duration::from_secs(self.config.config_refresh_interval_secs);
        let rule = Duration::from_secs(self.config.rule_interval_secs);
        let submit = Duration::from_secs(self.config.submit_interval_secs);

        let mut tasks = self.tasks.lock();
        // The config was just fetched; skip the immediate tick.
        tasks.push(Self::spawn_loop(&this, refresh, true, |manager| async move {
            if let Err(e) = manager.refresh_config().await {
                tracing::warn!("Failed to refresh BTN config: {}", e);
            }
        }));
        tasks.push(Self::spawn_loop(&this, rule, false, |manager| async move {
            manager.update_rule().await;
        }));
        tasks.push(Self::spawn_loop(&this, submit, false, |manager| async move {
            manager.submit().await;
        }));

        tracing::info!("BTN client started as {}", self.client.app_id());
        Ok(())
    }

    /// Run `cycle` every `period` until shutdown
    ///
    /// Each cycle runs on its own task so a slow downloader never delays the
    /// timer, and a cycle still running at shutdown is cancelled with it.
    fn spawn_loop<F, Fut>(
        manager: &Arc<Self>,
        period: Duration,
        skip_first: bool,
        cycle: F,
    ) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shutdown = manager.shutdown.clone();
        let manager = Arc::downgrade(manager);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            if skip_first {
                interval.tick().await;
            }

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Some(manager) = manager.upgrade() else {
                            break;
                        };
                        let task = tokio::spawn(cycle(manager));
                        tokio::select! {
                            result = task => {
                                if let Err(e) = result {
                                    tracing::warn!("BTN task failed: {}", e);
                                }
                            }
                            _ = shutdown.cancelled() => break,
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }

    /// Refetch the server config from the bootstrap URL
    pub async fn refresh_config(&self) -> Result<Arc<BtnConfig>> {
        tracing::debug!("Fetching BTN config from {}", self.config.config_url);
        let response = tokio::select! {
            response = self.client.get(&self.config.config_url, &[]) => response?,
            _ = self.shutdown.cancelled() => return Err(BtnError::Shutdown),
        };
        if response.status != StatusCode::OK {
            return Err(BtnError::protocol(
                ProtocolErrorKind::UnexpectedStatus(response.status.as_u16()),
                response.describe(),
            ));
        }

        let config: BtnConfig = serde_json::from_slice(&response.body)?;
        tracing::info!("BTN config refreshed, abilities: {:?}", config.ability);
        let ability = config.ability.clone();
        self.client.set_config(config);
        let _ = self.event_tx.send(BtnEvent::ConfigRefreshed { ability });
        Ok(self.client.config())
    }

    /// Run one rule check now
    pub async fn update_rule(&self) -> RuleUpdate {
        tokio::select! {
            update = self.rules.update_rule() => update,
            _ = self.shutdown.cancelled() => RuleUpdate::Failed,
        }
    }

    /// Run one submission cycle now
    pub async fn submit(&self) -> SubmitOutcome {
        self.submitter.submit(&self.shutdown).await
    }

    /// Shared BTN client
    pub fn client(&self) -> &Arc<BtnClient> {
        &self.client
    }

    /// Current server config
    pub fn config(&self) -> Arc<BtnConfig> {
        self.client.config()
    }

    /// Local configuration
    pub fn client_config(&self) -> &BtnClientConfig {
        &self.config
    }

    /// Current rule, if one is loaded
    pub fn rule(&self) -> Option<Arc<BtnRule>> {
        self.client.rule()
    }

    /// Rule cache file
    pub fn cache_file(&self) -> &Path {
        self.client.cache_file()
    }

    /// Managed downloaders
    pub fn downloaders(&self) -> &[Arc<dyn Downloader>] {
        &self.downloaders
    }

    /// Ban counter source
    pub fn ban_counter(&self) -> &Arc<dyn BanCounter> {
        &self.ban_counter
    }

    /// Subscribe to BTN events
    pub fn subscribe(&self) -> broadcast::Receiver<BtnEvent> {
        self.event_tx.subscribe()
    }

    /// Graceful shutdown
    ///
    /// Interrupts pacing sleeps and in-flight requests; a partially
    /// submitted cycle is dropped.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await.is_err() {
                tracing::warn!("BTN background task did not stop within {:?}", SHUTDOWN_TIMEOUT);
            }
        }

        tracing::info!("BTN client stopped");
        Ok(())
    }
}

impl Drop for BtnManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

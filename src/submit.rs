//! Ping submission
//!
//! Builds the cycle's pings, splits them into batches of the server's
//! `perBatchSize`, and posts them one at a time with the server's
//! `batchPeriod` pause after each. Cancellation is honored while a ping is
//! in flight and during the pause; nothing is sent after it.

use crate::http::BtnClient;
use crate::ping::PingBuilder;
use crate::protocol::{Ability, BtnEvent, ClientPing};
use reqwest::StatusCode;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Summary of one submission cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReport {
    pub submit_id: Uuid,
    /// Pings built for the cycle
    pub pings: usize,
    /// Peer connections across all pings
    pub peers: usize,
    /// Number of batches
    pub batches: usize,
    /// Pings accepted by the server
    pub sent: usize,
    /// Pings rejected or lost in transport
    pub failed: usize,
}

/// Outcome of one `submit()` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Submission is disabled locally or not advertised by the server
    Disabled,
    /// Another cycle is still running
    Busy,
    /// Every ping was attempted
    Completed(SubmitReport),
    /// The cycle was cancelled part way
    Cancelled(SubmitReport),
}

/// Submits peer snapshots to the BTN server
pub struct PingSubmitter {
    client: Arc<BtnClient>,
    enabled: bool,
    builder: Mutex<PingBuilder>,
    events: Option<broadcast::Sender<BtnEvent>>,
}

impl PingSubmitter {
    /// Create a submitter; `enabled` is the local submission switch
    pub fn new(client: Arc<BtnClient>, builder: PingBuilder, enabled: bool) -> Self {
        Self {
            client,
            enabled,
            builder: Mutex::new(builder),
            events: None,
        }
    }

    /// Publish cycle summaries on an event channel
    pub fn with_events(mut self, events: broadcast::Sender<BtnEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Whether local submission is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Run one submission cycle
    pub async fn submit(&self, cancel: &CancellationToken) -> SubmitOutcome {
        if !self.enabled {
            return SubmitOutcome::Disabled;
        }

        let config = self.client.config();
        let ability = match config.submit() {
            Some(ability) => ability.clone(),
            None => {
                if config.has_ability(Ability::Submit) {
                    tracing::warn!("BTN server advertises submission without a submit endpoint");
                }
                return SubmitOutcome::Disabled;
            }
        };

        let Ok(mut builder) = self.builder.try_lock() else {
            tracing::debug!("Previous BTN submission still running, skipping this cycle");
            return SubmitOutcome::Busy;
        };

        let snapshot = builder.build_pings().await;
        let per_batch = if ability.per_batch_size == 0 {
            tracing::warn!("BTN server sent perBatchSize 0, using 1");
            1
        } else {
            ability.per_batch_size
        };
        let batch_size = snapshot.pings.len().div_ceil(per_batch);
        let period = ability.batch_period();

        let mut report = SubmitReport {
            submit_id: snapshot.submit_id,
            pings: snapshot.pings.len(),
            peers: snapshot.peer_count(),
            batches: batch_size,
            sent: 0,
            failed: 0,
        };
        tracing::info!(
            "Submitting {} peers to BTN in {} batches",
            report.peers,
            batch_size
        );

        let mut pings = snapshot.pings;
        let mut cancelled = false;

        'batches: for (batch_index, batch) in pings.chunks_mut(per_batch).enumerate() {
            for ping in batch.iter_mut() {
                ping.batch_index = batch_index;
                ping.batch_size = batch_size;

                if cancel.is_cancelled() {
                    cancelled = true;
                    break 'batches;
                }

                tokio::select! {
                    accepted = self.post(&ability.endpoint, ping) => {
                        if accepted {
                            report.sent += 1;
                        } else {
                            report.failed += 1;
                        }
                    }
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break 'batches;
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break 'batches;
                    }
                }
            }
        }
        drop(builder);

        if cancelled {
            tracing::info!(
                "BTN submission {} cancelled after {} of {} pings",
                report.submit_id,
                report.sent + report.failed,
                report.pings
            );
        }
        if let Some(ref events) = self.events {
            let _ = events.send(BtnEvent::SubmitFinished {
                submit_id: report.submit_id,
                sent: report.sent,
                failed: report.failed,
                cancelled,
            });
        }

        if cancelled {
            SubmitOutcome::Cancelled(report)
        } else {
            SubmitOutcome::Completed(report)
        }
    }

    /// POST one ping; returns whether the server accepted it
    async fn post(&self, endpoint: &str, ping: &ClientPing) -> bool {
        match self.client.post_gzip_json(endpoint, ping).await {
            Ok(response) if response.status == StatusCode::OK => true,
            Ok(response) => {
                tracing::warn!("BTN submission rejected: {}", response.describe());
                false
            }
            Err(e) => {
                tracing::warn!("BTN submission failed: {}", e);
                false
            }
        }
    }
}

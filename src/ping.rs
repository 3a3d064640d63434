//! Ping building
//!
//! Walks every managed downloader, its torrents and their peers, and
//! produces one [`ClientPing`] per downloader. A failing downloader or
//! torrent is skipped; the rest of the cycle proceeds.

use crate::downloader::{BanCounter, Downloader, Torrent};
use crate::error::Result;
use crate::projection::{peer_info, torrent_info};
use crate::protocol::{ClientPing, PeerConnection};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Pings produced by one build, plus the downloaders that were skipped
#[derive(Debug, Clone)]
pub struct PingSnapshot {
    pub submit_id: Uuid,
    pub pings: Vec<ClientPing>,
    /// Names of downloaders that failed and produced no ping
    pub skipped: Vec<String>,
}

impl PingSnapshot {
    /// Total number of peer connections across all pings
    pub fn peer_count(&self) -> usize {
        self.pings.iter().map(|p| p.peers.len()).sum()
    }
}

/// Builds peer snapshot pings
///
/// Keeps the ban counter value seen by the previous build, so each build
/// reports the bans recorded since then. Builds must not overlap; the
/// submitter holds the builder behind its cycle lock.
pub struct PingBuilder {
    downloaders: Vec<Arc<dyn Downloader>>,
    ban_counter: Arc<dyn BanCounter>,
    last_recorded_bans: u64,
}

impl PingBuilder {
    /// Create a builder over the given downloaders
    pub fn new(downloaders: Vec<Arc<dyn Downloader>>, ban_counter: Arc<dyn BanCounter>) -> Self {
        Self {
            downloaders,
            ban_counter,
            last_recorded_bans: 0,
        }
    }

    /// Managed downloaders, in registration order
    pub fn downloaders(&self) -> &[Arc<dyn Downloader>] {
        &self.downloaders
    }

    /// Ban counter source
    pub fn ban_counter(&self) -> &Arc<dyn BanCounter> {
        &self.ban_counter
    }

    /// Counter value recorded by the last build
    pub fn last_recorded_bans(&self) -> u64 {
        self.last_recorded_bans
    }

    /// Build one ping per reachable downloader
    pub async fn build_pings(&mut self) -> PingSnapshot {
        let now = self.ban_counter.peer_ban_counter();
        let bans = now.saturating_sub(self.last_recorded_bans);
        self.last_recorded_bans = now;

        let submit_id = Uuid::new_v4();
        let mut pings = Vec::with_capacity(self.downloaders.len());
        let mut skipped = Vec::new();

        for downloader in &self.downloaders {
            match collect_peers(downloader.as_ref()).await {
                Ok(peers) => pings.push(ClientPing {
                    submit_id,
                    populate_at: Utc::now().timestamp_millis(),
                    downloader: downloader.downloader_name().to_string(),
                    peers,
                    bans,
                    batch_index: 0,
                    batch_size: 0,
                }),
                Err(e) => {
                    tracing::warn!(
                        "Skipping downloader {} in BTN submission: {}",
                        downloader.name(),
                        e
                    );
                    skipped.push(downloader.name().to_string());
                }
            }
        }

        PingSnapshot {
            submit_id,
            pings,
            skipped,
        }
    }
}

async fn collect_peers(downloader: &dyn Downloader) -> Result<Vec<PeerConnection>> {
    downloader.login().await?;

    let mut connections = Vec::new();
    for torrent in downloader.torrents().await? {
        match torrent_connections(downloader, &torrent).await {
            Ok(peers) => connections.extend(peers),
            Err(e) => {
                tracing::debug!(
                    "Skipping torrent on downloader {}: {}",
                    downloader.name(),
                    e
                );
            }
        }
    }

    Ok(connections)
}

async fn torrent_connections(
    downloader: &dyn Downloader,
    torrent: &Torrent,
) -> Result<Vec<PeerConnection>> {
    let info = torrent_info(torrent);
    let peers = downloader.peers(torrent).await?;
    Ok(peers
        .iter()
        .map(|peer| PeerConnection {
            torrent: info.clone(),
            peer: peer_info(peer),
        })
        .collect())
}

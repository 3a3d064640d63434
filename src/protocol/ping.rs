//! Peer snapshot pings
//!
//! One `ClientPing` is produced per downloader per submission cycle.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// A peer snapshot for one downloader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPing {
    /// Shared by every ping of one submission cycle
    pub submit_id: Uuid,
    /// Wall-clock time the ping was built, in ms since the epoch
    pub populate_at: i64,
    /// Downloader display name
    pub downloader: String,
    /// Peers connected to the downloader, in enumeration order
    pub peers: Vec<PeerConnection>,
    /// Bans recorded since the previous cycle
    pub bans: u64,
    /// Index of the batch this ping belongs to
    pub batch_index: usize,
    /// Number of batches in the cycle
    pub batch_size: usize,
}

/// A peer seen on a given torrent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerConnection {
    pub torrent: TorrentInfo,
    pub peer: PeerInfo,
}

/// Pseudonymized torrent description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentInfo {
    /// Salted SHA-256 of the infohash, lowercase hex
    pub hash: String,
    /// Torrent size in bytes
    pub size: u64,
    /// Local progress (0.0 - 1.0)
    pub progress: f64,
}

/// Peer endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }
}

impl std::fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{}:{}", ip, self.port),
            IpAddr::V6(ip) => write!(f, "[{}]:{}", ip, self.port),
        }
    }
}

/// Peer state as reported by the downloader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub address: PeerAddress,
    pub peer_id: String,
    pub client_name: String,
    pub flag: crate::downloader::PeerFlag,
    /// Peer progress (0.0 - 1.0)
    pub progress: f64,
    /// Bytes downloaded from this peer
    pub downloaded: u64,
    /// Current download speed from this peer, bytes/sec
    pub rt_download_speed: u64,
    /// Bytes uploaded to this peer
    pub uploaded: u64,
    /// Current upload speed to this peer, bytes/sec
    pub rt_upload_speed: u64,
}

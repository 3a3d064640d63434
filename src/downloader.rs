//! Downloader and ban counter interfaces
//!
//! The BTN core never talks to a BitTorrent client directly. Drivers for
//! each managed client implement [`Downloader`]; the ban engine exposes its
//! cumulative counter through [`BanCounter`].

use crate::error::Result;
use crate::protocol::PeerAddress;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A torrent known to a downloader
#[derive(Debug, Clone, PartialEq)]
pub struct Torrent {
    /// Infohash, treated as an opaque string
    pub hash: String,
    /// Total size in bytes
    pub size: u64,
    /// Local progress (0.0 - 1.0)
    pub progress: f64,
}

/// A live peer connection reported by a downloader
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    pub address: PeerAddress,
    pub peer_id: String,
    pub client_name: String,
    pub flags: PeerFlag,
    /// Peer progress (0.0 - 1.0)
    pub progress: f64,
    pub downloaded: u64,
    pub download_speed: u64,
    pub uploaded: u64,
    pub upload_speed: u64,
}

/// Connection flags, in qBittorrent's single-letter notation
///
/// Serialized as the space separated flag string, e.g. `"D X E P"`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct PeerFlag {
    /// `D`: we are downloading from the peer
    pub interested_unchoked: bool,
    /// `d`: we are interested but the peer chokes us
    pub interested_choked: bool,
    /// `U`: we are uploading to the peer
    pub remote_interested_unchoked: bool,
    /// `u`: the peer is interested but we choke it
    pub remote_interested_choked: bool,
    /// `K`: the peer unchoked us but we are not interested
    pub not_interested_unchoked: bool,
    /// `?`: we unchoked the peer but it is not interested
    pub remote_not_interested_unchoked: bool,
    /// `O`: optimistic unchoke
    pub optimistic_unchoke: bool,
    /// `S`: peer snubbed
    pub snubbed: bool,
    /// `I`: incoming connection
    pub incoming: bool,
    /// `H`: peer from DHT
    pub from_dht: bool,
    /// `X`: peer from PEX
    pub from_pex: bool,
    /// `L`: peer from local peer discovery
    pub from_lsd: bool,
    /// `E`: encrypted traffic
    pub encrypted: bool,
    /// `e`: encrypted handshake only
    pub encrypted_handshake: bool,
    /// `P`: uTP transport
    pub utp: bool,
}

impl PeerFlag {
    const LETTERS: [char; 15] = [
        'D', 'd', 'U', 'u', 'K', '?', 'O', 'S', 'I', 'H', 'X', 'L', 'E', 'e', 'P',
    ];

    fn bits(&self) -> [bool; 15] {
        [
            self.interested_unchoked,
            self.interested_choked,
            self.remote_interested_unchoked,
            self.remote_interested_choked,
            self.not_interested_unchoked,
            self.remote_not_interested_unchoked,
            self.optimistic_unchoke,
            self.snubbed,
            self.incoming,
            self.from_dht,
            self.from_pex,
            self.from_lsd,
            self.encrypted,
            self.encrypted_handshake,
            self.utp,
        ]
    }

    /// Parse a flag string; unknown letters and whitespace are ignored
    pub fn parse(flags: &str) -> Self {
        let mut parsed = Self::default();
        for c in flags.chars() {
            match c {
                'D' => parsed.interested_unchoked = true,
                'd' => parsed.interested_choked = true,
                'U' => parsed.remote_interested_unchoked = true,
                'u' => parsed.remote_interested_choked = true,
                'K' => parsed.not_interested_unchoked = true,
                '?' => parsed.remote_not_interested_unchoked = true,
                'O' => parsed.optimistic_unchoke = true,
                'S' => parsed.snubbed = true,
                'I' => parsed.incoming = true,
                'H' => parsed.from_dht = true,
                'X' => parsed.from_pex = true,
                'L' => parsed.from_lsd = true,
                'E' => parsed.encrypted = true,
                'e' => parsed.encrypted_handshake = true,
                'P' => parsed.utp = true,
                _ => {}
            }
        }
        parsed
    }
}

impl std::fmt::Display for PeerFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let set: Vec<String> = Self::LETTERS
            .iter()
            .zip(self.bits())
            .filter(|(_, on)| *on)
            .map(|(letter, _)| letter.to_string())
            .collect();
        f.write_str(&set.join(" "))
    }
}

impl From<PeerFlag> for String {
    fn from(flag: PeerFlag) -> Self {
        flag.to_string()
    }
}

impl From<String> for PeerFlag {
    fn from(flags: String) -> Self {
        Self::parse(&flags)
    }
}

/// A managed BitTorrent client
///
/// Enumeration may block on the driver's own network I/O.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Internal identifier, used in logs
    fn name(&self) -> &str;

    /// Human readable name, reported to BTN
    fn downloader_name(&self) -> &str;

    /// Ensure an authenticated session with the client
    async fn login(&self) -> Result<()>;

    /// Torrents currently managed by the client
    async fn torrents(&self) -> Result<Vec<Torrent>>;

    /// Peers currently connected on a torrent
    async fn peers(&self, torrent: &Torrent) -> Result<Vec<Peer>>;
}

/// Source of the cumulative ban count
pub trait BanCounter: Send + Sync {
    /// Total bans since process start (monotonically non-decreasing)
    fn peer_ban_counter(&self) -> u64;
}

impl BanCounter for AtomicU64 {
    fn peer_ban_counter(&self) -> u64 {
        self.load(Ordering::Relaxed)
    }
}

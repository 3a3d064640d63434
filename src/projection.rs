//! Peer and torrent projection
//!
//! Maps the downloader view of a torrent and its peers onto the BTN wire
//! types. The infohash never leaves this module in plaintext: it is
//! replaced by `sha256(infohash || salt)` where the salt is the CRC-32 of
//! the infohash. The salt is deterministic so reports about one torrent
//! correlate across installations.

use crate::downloader::{Peer, Torrent};
use crate::protocol::{PeerInfo, TorrentInfo};
use sha2::{Digest, Sha256};

/// Salt derived from an infohash: its CRC-32 as lowercase hex
///
/// The checksum bytes are rendered least significant first, matching the
/// salt other BTN clients derive for the same torrent.
pub fn torrent_salt(info_hash: &str) -> String {
    hex::encode(crc32fast::hash(info_hash.as_bytes()).to_le_bytes())
}

/// Pseudonymized infohash, 64 lowercase hex characters
pub fn salted_hash(info_hash: &str) -> String {
    let salt = torrent_salt(info_hash);
    let mut hasher = Sha256::new();
    hasher.update(info_hash.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Project a torrent onto its wire form
pub fn torrent_info(torrent: &Torrent) -> TorrentInfo {
    TorrentInfo {
        hash: salted_hash(&torrent.hash),
        size: torrent.size,
        progress: torrent.progress,
    }
}

/// Project a live peer onto its wire form
pub fn peer_info(peer: &Peer) -> PeerInfo {
    PeerInfo {
        address: peer.address,
        peer_id: peer.peer_id.clone(),
        client_name: peer.client_name.clone(),
        flag: peer.flags,
        progress: peer.progress,
        downloaded: peer.downloaded,
        rt_download_speed: peer.download_speed,
        uploaded: peer.uploaded,
        rt_upload_speed: peer.upload_speed,
    }
}

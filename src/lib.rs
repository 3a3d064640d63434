//! # btn-core
//!
//! Client core for the BTN (Ban Threat Network) service used by BitTorrent
//! peer-banning helpers.
//!
//! ## Features
//!
//! - **Rule sync**: revision-checked rule pulls with an on-disk cache
//! - **Peer reporting**: anonymized per-downloader peer snapshots, batched,
//!   gzip-compressed and paced
//! - **Capability negotiation**: every operation is gated on what the server
//!   advertises
//! - **Async**: built on Tokio; shutdown cancels in-flight work
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use btn_core::{BtnClientConfig, BtnManager, Downloader};
//! use std::sync::atomic::AtomicU64;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BtnClientConfig::new()
//!         .credentials("app-id", "app-secret")
//!         .config_url("https://btn.example.com/ping/config");
//!
//!     let downloaders: Vec<Arc<dyn Downloader>> = Vec::new();
//!     let bans = Arc::new(AtomicU64::new(0));
//!     let manager = BtnManager::new(config, downloaders, bans)?;
//!     manager.start().await?;
//!
//!     let mut events = manager.subscribe();
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//!
//!     manager.shutdown().await?;
//!     Ok(())
//! }
//! ```

// Modules
pub mod config;
pub mod downloader;
pub mod error;
pub mod http;
pub mod manager;
pub mod ping;
pub mod projection;
pub mod protocol;
pub mod rule;
pub mod submit;

// Re-exports for convenience
pub use config::{BtnClientConfig, HttpConfig};
pub use downloader::{BanCounter, Downloader, Peer, PeerFlag, Torrent};
pub use error::{BtnError, NetworkErrorKind, ProtocolErrorKind, Result, StorageErrorKind};
pub use http::{BtnClient, BtnResponse, ConnectionStats, RetryPolicy};
pub use manager::BtnManager;
pub use ping::{PingBuilder, PingSnapshot};
pub use protocol::{
    Ability, AbilityRule, AbilitySubmit, BtnConfig, BtnEvent, BtnRule, ClientPing, PeerAddress,
    PeerConnection, PeerInfo, TorrentInfo,
};
pub use rule::{RuleFetcher, RuleUpdate};
pub use submit::{PingSubmitter, SubmitOutcome, SubmitReport};

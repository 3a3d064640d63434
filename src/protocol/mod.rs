//! BTN wire types
//!
//! This module contains every type that crosses the wire to or from the
//! BTN server:
//! - The server-advertised capability document
//! - The versioned rule document
//! - Peer snapshot pings
//! - Events emitted to the host
//!
//! Field names are wire-significant and serialized in camelCase.

mod config;
mod events;
mod ping;
mod rule;

pub use config::{Ability, AbilityRule, AbilitySubmit, BtnConfig};
pub use events::BtnEvent;
pub use ping::{ClientPing, PeerAddress, PeerConnection, PeerInfo, TorrentInfo};
pub use rule::{BtnRule, INITIAL_REVISION};

//! BTN events
//!
//! Events emitted to the host process.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events emitted by the BTN manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BtnEvent {
    /// Server capabilities were refetched
    ConfigRefreshed { ability: Vec<String> },
    /// A new rule document is in effect
    RuleUpdated { version: Option<String> },
    /// A submission cycle ended
    SubmitFinished {
        submit_id: Uuid,
        sent: usize,
        failed: usize,
        cancelled: bool,
    },
}

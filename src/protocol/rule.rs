//! Rule document
//!
//! The rule schema belongs to the ban engine. Only `version` is read here;
//! the body is kept verbatim for the cache file and for the consumer.

use crate::error::{BtnError, ProtocolErrorKind, Result};
use serde::Deserialize;
use std::sync::Arc;

/// Revision presented when no rule is loaded
pub const INITIAL_REVISION: &str = "0";

/// A versioned rule document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtnRule {
    version: Option<String>,
    raw: Arc<str>,
}

#[derive(Deserialize)]
struct RuleHeader {
    #[serde(default)]
    version: Option<String>,
}

impl BtnRule {
    /// Parse a rule body, reading only its version
    pub fn parse(body: impl Into<String>) -> Result<Self> {
        let body = body.into();
        let header: RuleHeader = serde_json::from_str(&body).map_err(|e| {
            BtnError::protocol(
                ProtocolErrorKind::InvalidResponse,
                format!("Malformed rule document: {}", e),
            )
        })?;
        Ok(Self {
            version: header.version,
            raw: Arc::from(body),
        })
    }

    /// Version advertised by the document, if any
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Revision to present on the next fetch
    pub fn revision(&self) -> &str {
        self.version.as_deref().unwrap_or(INITIAL_REVISION)
    }

    /// The document exactly as received
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Decode the full document for consumers with their own schema
    pub fn document(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.raw)?)
    }
}

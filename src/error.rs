//! Vault error taxonomy.
//!
//! Codec, store and index failures are returned as typed [`VaultError`]s
//! and never swallowed. Batch operations (integrity scans, chain
//! verification) do not use this type for individual failures; they return
//! reports that itemize every failure alongside the work that succeeded.

use context_vault_core::codec::ParseError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("object {id} is corrupt: content hashes to {actual}")]
    HashMismatch { id: String, actual: String },
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("signature error: {0}")]
    Signature(String),
    #[error("audit chain broken at event {index}: {reason}")]
    ChainBroken { index: u64, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VaultError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        VaultError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VaultError>;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::crypto::{MasterSecret, Share};

use super::VaultError;

/// The persisted form of a tenant's master secret
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEntry {
    pub tenant_id: String,
    /// hex-encoded master secret
    encoded_secret: String,
    pub device_id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub version: u32,
}

impl fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyEntry")
            .field("tenant_id", &self.tenant_id)
            .field("device_id", &self.device_id)
            .field("created_at", &self.created_at)
            .field("last_accessed_at", &self.last_accessed_at)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl Drop for KeyEntry {
    fn drop(&mut self) {
        self.encoded_secret.zeroize();
    }
}

impl KeyEntry {
    pub fn new(tenant_id: &str, secret: &MasterSecret, device_id: &str, version: u32) -> Self {
        let now = Utc::now();
        Self {
            tenant_id: tenant_id.to_string(),
            encoded_secret: secret.to_hex(),
            device_id: device_id.to_string(),
            created_at: now,
            last_accessed_at: now,
            version,
        }
    }

    pub fn secret(&self) -> Result<MasterSecret, VaultError> {
        MasterSecret::from_hex(&self.encoded_secret)
            .map_err(|e| VaultError::Malformed(format!("stored secret: {}", e)))
    }
}

/// The persisted form of one recovery share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareEntry {
    pub share_id: String,
    pub tenant_id: String,
    pub share: Share,
    pub share_index: u8,
    pub total_shares: u8,
    pub threshold: u8,
    pub created_at: DateTime<Utc>,
}

impl ShareEntry {
    pub fn new(tenant_id: &str, share: Share) -> Self {
        Self {
            share_id: Self::share_id(tenant_id, share.index()),
            tenant_id: tenant_id.to_string(),
            share_index: share.index(),
            total_shares: share.total(),
            threshold: share.threshold(),
            share,
            created_at: Utc::now(),
        }
    }

    pub fn share_id(tenant_id: &str, index: u8) -> String {
        format!("{}_share_{}", tenant_id, index)
    }
}

/// How durable the vault's storage turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageMode {
    /// Durable backend, persistence granted
    Persistent,
    /// Durable backend, but the host may evict it
    Ephemeral,
    /// In-memory only, lost when the process exits
    SessionOnly,
    /// Nothing to store into
    Unavailable,
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self {
            StorageMode::Persistent => "PERSISTENT",
            StorageMode::Ephemeral => "EPHEMERAL",
            StorageMode::SessionOnly => "SESSION_ONLY",
            StorageMode::Unavailable => "UNAVAILABLE",
        };
        f.write_str(mode)
    }
}

//! Sealed storage for master secrets, shares and the audit log
//!
//! A [`Vault`] wraps an optional durable [`VaultBackend`] and an in-memory
//! session store. Which one it writes to is decided once, when the vault is
//! opened, by walking down the storage ladder:
//!
//! 1. `Persistent` - durable backend present and persistence granted
//! 2. `Ephemeral` - durable backend present, persistence refused
//! 3. `SessionOnly` - no durable backend, or its probe failed
//! 4. `Unavailable` - no durable backend and session fallback disabled
//!
//! If the durable backend starts failing later on, individual operations fall
//! back to the session store with a warning. Reads consult the session store
//! first so anything written there stays visible.
//!
//! Every record is sealed before it reaches a backend. Reading a record whose
//! seal does not verify is an [`VaultError::IntegrityViolation`], never a
//! silent miss.

mod backend;
mod memory;
mod types;

pub use backend::VaultBackend;
pub use memory::{MemoryVaultBackend, MemoryVaultBackendError};
pub use types::{KeyEntry, ShareEntry, StorageMode};

use std::fmt::Display;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditReport};
use crate::crypto::{SealError, Sealer, Share};

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("storage unavailable")]
    StorageUnavailable,
    #[error("integrity violation: stored {0} failed verification")]
    IntegrityViolation(String),
    #[error("malformed record: {0}")]
    Malformed(String),
    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone)]
pub struct VaultOptions {
    /// Fall back to in-memory storage when no durable backend is usable
    pub session_fallback: bool,
}

impl Default for VaultOptions {
    fn default() -> Self {
        Self {
            session_fallback: true,
        }
    }
}

#[derive(Debug)]
pub struct Vault<B: VaultBackend = MemoryVaultBackend> {
    durable: Option<B>,
    session: MemoryVaultBackend,
    sealer: Sealer,
    mode: StorageMode,
    device_id: OnceCell<String>,
}

impl<B: VaultBackend> Vault<B> {
    /// Open a vault, settling on a storage mode
    pub async fn open(durable: Option<B>, sealer: Sealer, options: VaultOptions) -> Self {
        let fallback = if options.session_fallback {
            StorageMode::SessionOnly
        } else {
            StorageMode::Unavailable
        };

        let (durable, mode) = match durable {
            None => (None, fallback),
            Some(backend) => match backend.probe().await {
                Err(e) => {
                    tracing::warn!("durable vault backend failed its probe: {}", e);
                    (None, fallback)
                }
                Ok(()) => match backend.request_persistence().await {
                    Ok(true) => (Some(backend), StorageMode::Persistent),
                    Ok(false) => {
                        tracing::warn!("persistent storage denied, keys may be evicted");
                        (Some(backend), StorageMode::Ephemeral)
                    }
                    Err(e) => {
                        tracing::warn!("could not request persistent storage: {}", e);
                        (Some(backend), StorageMode::Ephemeral)
                    }
                },
            },
        };

        tracing::info!("vault opened in {} mode", mode);
        Self {
            durable,
            session: MemoryVaultBackend::new(),
            sealer,
            mode,
            device_id: OnceCell::new(),
        }
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.mode
    }

    pub fn sealer(&self) -> &Sealer {
        &self.sealer
    }

    #[cfg(test)]
    pub(crate) fn session(&self) -> &MemoryVaultBackend {
        &self.session
    }

    /// The stable identity of this device, generated on first use
    pub async fn get_device_id(&self) -> Result<String, VaultError> {
        self.available()?;
        let id = self
            .device_id
            .get_or_try_init(|| async {
                let candidate = Uuid::new_v4().to_string();
                if let Some(durable) = &self.durable {
                    match durable.get_or_insert_device_id(&candidate).await {
                        Ok(id) => return Ok(id),
                        Err(e) => degraded("get_device_id", &e),
                    }
                }
                self.session
                    .get_or_insert_device_id(&candidate)
                    .await
                    .map_err(session_error)
            })
            .await?;
        Ok(id.clone())
    }

    pub async fn store_key(&self, entry: &KeyEntry) -> Result<(), VaultError> {
        self.available()?;
        let sealed = self.seal_record(entry)?;
        self.write_key(&entry.tenant_id, sealed).await
    }

    /// Read a tenant's key, refreshing its `last_accessed_at`
    pub async fn get_key(&self, tenant_id: &str) -> Result<Option<KeyEntry>, VaultError> {
        self.available()?;
        let Some(raw) = self.read_key(tenant_id).await? else {
            return Ok(None);
        };

        let mut entry: KeyEntry = self.open_record(&raw, "key entry")?;
        if entry.tenant_id != tenant_id {
            tracing::error!(
                "integrity violation: key stored for {} belongs to {}",
                tenant_id,
                entry.tenant_id
            );
            return Err(VaultError::IntegrityViolation("key entry".to_string()));
        }

        entry.last_accessed_at = Utc::now();
        let sealed = self.seal_record(&entry)?;
        self.write_key(tenant_id, sealed).await?;
        Ok(Some(entry))
    }

    /// Whether a key record exists, without verifying or touching it
    pub async fn has_key(&self, tenant_id: &str) -> Result<bool, VaultError> {
        self.available()?;
        Ok(self.read_key(tenant_id).await?.is_some())
    }

    /// Remove a tenant's key and all of its shares
    pub async fn delete_key(&self, tenant_id: &str) -> Result<bool, VaultError> {
        self.available()?;
        let mut removed = self
            .session
            .delete_key_material(tenant_id)
            .await
            .map_err(session_error)?;
        if let Some(durable) = &self.durable {
            match durable.delete_key_material(tenant_id).await {
                Ok(durable_removed) => removed |= durable_removed,
                Err(e) => degraded("delete_key", &e),
            }
        }
        Ok(removed)
    }

    pub async fn store_shares(&self, tenant_id: &str, shares: &[Share]) -> Result<(), VaultError> {
        self.available()?;
        let sealed = self.seal_shares(tenant_id, shares)?;
        if let Some(durable) = &self.durable {
            match durable.put_shares(tenant_id, sealed.clone()).await {
                Ok(()) => {
                    self.session.evict_shares(tenant_id);
                    return Ok(());
                }
                Err(e) => degraded("store_shares", &e),
            }
        }
        self.session
            .put_shares(tenant_id, sealed)
            .await
            .map_err(session_error)
    }

    /// Shares held for a tenant, ordered by index
    pub async fn get_shares(&self, tenant_id: &str) -> Result<Vec<ShareEntry>, VaultError> {
        self.available()?;
        let mut raw = self
            .session
            .get_shares(tenant_id)
            .await
            .map_err(session_error)?;
        if raw.is_empty() {
            if let Some(durable) = &self.durable {
                match durable.get_shares(tenant_id).await {
                    Ok(shares) => raw = shares,
                    Err(e) => degraded("get_shares", &e),
                }
            }
        }

        let mut entries = raw
            .iter()
            .map(|raw| self.open_record::<ShareEntry>(raw, "share entry"))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(entry) = entries.iter().find(|e| e.tenant_id != tenant_id) {
            tracing::error!(
                "integrity violation: share {} stored under {}",
                entry.share_id,
                tenant_id
            );
            return Err(VaultError::IntegrityViolation("share entry".to_string()));
        }
        entries.sort_by_key(|e| e.share_index);
        Ok(entries)
    }

    /// Write a key and its shares as one unit
    pub async fn store_key_material(
        &self,
        entry: &KeyEntry,
        shares: &[Share],
    ) -> Result<(), VaultError> {
        self.available()?;
        let tenant_id = entry.tenant_id.as_str();
        let key = self.seal_record(entry)?;
        let shares = self.seal_shares(tenant_id, shares)?;

        if let Some(durable) = &self.durable {
            match durable
                .put_key_material(tenant_id, key.clone(), shares.clone())
                .await
            {
                Ok(()) => {
                    self.session.evict_key(tenant_id);
                    self.session.evict_shares(tenant_id);
                    return Ok(());
                }
                Err(e) => degraded("store_key_material", &e),
            }
        }
        self.session
            .put_key_material(tenant_id, key, shares)
            .await
            .map_err(session_error)
    }

    pub async fn append_audit(&self, record: &AuditRecord) -> Result<(), VaultError> {
        self.available()?;
        let sealed = self.seal_record(record)?;
        if let Some(durable) = &self.durable {
            match durable.append_audit(&record.tenant_id, sealed.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => degraded("append_audit", &e),
            }
        }
        self.session
            .append_audit(&record.tenant_id, sealed)
            .await
            .map_err(session_error)
    }

    /// Every audit record for a tenant that still verifies, oldest first
    pub async fn audit_records(&self, tenant_id: &str) -> Result<AuditReport, VaultError> {
        self.available()?;
        let mut raw = Vec::new();
        if let Some(durable) = &self.durable {
            match durable.audit_records(tenant_id).await {
                Ok(records) => raw = records,
                Err(e) => degraded("audit_records", &e),
            }
        }
        raw.extend(
            self.session
                .audit_records(tenant_id)
                .await
                .map_err(session_error)?,
        );

        let mut report = AuditReport::default();
        for raw in raw.iter() {
            match self.sealer.open_str::<AuditRecord>(raw) {
                Ok(record) if record.tenant_id == tenant_id => report.records.push(record),
                Ok(_) | Err(SealError::IntegrityViolation) => report.tampered += 1,
                Err(e) => {
                    tracing::warn!("unreadable audit record: {}", e);
                    report.tampered += 1;
                }
            }
        }
        report.records.sort_by_key(|r| r.timestamp);
        if !report.is_clean() {
            tracing::error!(
                "integrity violation: {} audit records for {} failed verification",
                report.tampered,
                tenant_id
            );
        }
        Ok(report)
    }

    async fn read_key(&self, tenant_id: &str) -> Result<Option<String>, VaultError> {
        if let Some(raw) = self
            .session
            .get_key(tenant_id)
            .await
            .map_err(session_error)?
        {
            return Ok(Some(raw));
        }
        if let Some(durable) = &self.durable {
            match durable.get_key(tenant_id).await {
                Ok(raw) => return Ok(raw),
                Err(e) => degraded("get_key", &e),
            }
        }
        Ok(None)
    }

    async fn write_key(&self, tenant_id: &str, sealed: String) -> Result<(), VaultError> {
        if let Some(durable) = &self.durable {
            match durable.put_key(tenant_id, sealed.clone()).await {
                Ok(()) => {
                    self.session.evict_key(tenant_id);
                    return Ok(());
                }
                Err(e) => degraded("put_key", &e),
            }
        }
        self.session
            .put_key(tenant_id, sealed)
            .await
            .map_err(session_error)
    }

    fn seal_shares(
        &self,
        tenant_id: &str,
        shares: &[Share],
    ) -> Result<Vec<(u8, String)>, VaultError> {
        shares
            .iter()
            .map(|share| {
                let entry = ShareEntry::new(tenant_id, share.clone());
                Ok((share.index(), self.seal_record(&entry)?))
            })
            .collect()
    }

    fn seal_record<T: Serialize>(&self, record: &T) -> Result<String, VaultError> {
        let envelope = self
            .sealer
            .seal(record)
            .map_err(|e| VaultError::Malformed(e.to_string()))?;
        serde_json::to_string(&envelope).map_err(|e| VaultError::Malformed(e.to_string()))
    }

    fn open_record<T: DeserializeOwned>(&self, raw: &str, what: &str) -> Result<T, VaultError> {
        self.sealer.open_str(raw).map_err(|e| match e {
            SealError::IntegrityViolation => {
                tracing::error!("integrity violation: stored {} was modified", what);
                VaultError::IntegrityViolation(what.to_string())
            }
            e => VaultError::Malformed(format!("{}: {}", what, e)),
        })
    }

    fn available(&self) -> Result<(), VaultError> {
        match self.mode {
            StorageMode::Unavailable => Err(VaultError::StorageUnavailable),
            _ => Ok(()),
        }
    }
}

impl Vault<MemoryVaultBackend> {
    /// A vault with no durable backend at all
    pub async fn session_only(sealer: Sealer) -> Self {
        Self::open(None, sealer, VaultOptions::default()).await
    }
}

fn degraded(operation: &str, error: &impl Display) {
    tracing::warn!(
        "durable vault backend failed during {}: {}, using session storage",
        operation,
        error
    );
}

fn session_error(error: MemoryVaultBackendError) -> VaultError {
    VaultError::Backend(error.to_string())
}

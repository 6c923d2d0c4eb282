use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::backend::VaultBackend;

/// In-memory vault backend using HashMaps
///
/// Doubles as the session-only fallback inside every [`Vault`](super::Vault),
/// and exposes a few knobs so tests can exercise the storage ladder.
#[derive(Debug, Clone)]
pub struct MemoryVaultBackend {
    inner: Arc<RwLock<MemoryVaultBackendInner>>,
}

#[derive(Debug)]
struct MemoryVaultBackendInner {
    /// tenant_id -> sealed KeyEntry
    keys: HashMap<String, String>,
    /// tenant_id -> share index -> sealed ShareEntry
    shares: HashMap<String, BTreeMap<u8, String>>,
    device_id: Option<String>,
    /// (tenant_id, sealed AuditRecord)
    audit: Vec<(String, String)>,
    persistence: bool,
    reachable: bool,
    failing: bool,
    rejecting_key_material: bool,
}

impl Default for MemoryVaultBackendInner {
    fn default() -> Self {
        Self {
            keys: HashMap::new(),
            shares: HashMap::new(),
            device_id: None,
            audit: Vec::new(),
            persistence: true,
            reachable: true,
            failing: false,
            rejecting_key_material: false,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryVaultBackendError {
    #[error("memory backend error: {0}")]
    Internal(String),
    #[error("memory backend is unavailable")]
    Unavailable,
}

impl MemoryVaultBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryVaultBackendInner::default())),
        }
    }

    /// A backend that refuses `request_persistence`
    pub fn without_persistence() -> Self {
        let backend = Self::new();
        backend.configure(|inner| inner.persistence = false);
        backend
    }

    /// A backend whose probe fails
    pub fn unreachable() -> Self {
        let backend = Self::new();
        backend.configure(|inner| inner.reachable = false);
        backend
    }

    /// Make every subsequent data operation fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.configure(|inner| inner.failing = failing);
    }

    /// Make `put_key_material` fail while every other operation keeps working
    pub fn set_rejecting_key_material(&self, rejecting: bool) {
        self.configure(|inner| inner.rejecting_key_material = rejecting);
    }

    /// The sealed key record exactly as stored
    pub fn raw_key(&self, tenant_id: &str) -> Option<String> {
        self.inner
            .read()
            .ok()
            .and_then(|inner| inner.keys.get(tenant_id).cloned())
    }

    /// Overwrite a stored key record, bypassing the seal
    pub fn set_raw_key(&self, tenant_id: &str, raw: String) {
        self.configure(|inner| {
            inner.keys.insert(tenant_id.to_string(), raw);
        });
    }

    /// Overwrite a stored share record, bypassing the seal
    pub fn set_raw_share(&self, tenant_id: &str, index: u8, raw: String) {
        self.configure(|inner| {
            inner
                .shares
                .entry(tenant_id.to_string())
                .or_default()
                .insert(index, raw);
        });
    }

    /// Overwrite the nth stored audit record, bypassing the seal
    pub fn set_raw_audit(&self, position: usize, raw: String) {
        self.configure(|inner| {
            if let Some(entry) = inner.audit.get_mut(position) {
                entry.1 = raw;
            }
        });
    }

    pub(crate) fn evict_key(&self, tenant_id: &str) {
        self.configure(|inner| {
            inner.keys.remove(tenant_id);
        });
    }

    pub(crate) fn evict_shares(&self, tenant_id: &str) {
        self.configure(|inner| {
            inner.shares.remove(tenant_id);
        });
    }

    fn configure(&self, f: impl FnOnce(&mut MemoryVaultBackendInner)) {
        // a poisoned lock only means a panicking test thread; keep going
        let mut inner = match self.inner.write() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut inner);
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryVaultBackendInner>, MemoryVaultBackendError> {
        let inner = self.inner.read().map_err(|e| {
            MemoryVaultBackendError::Internal(format!("failed to acquire read lock: {}", e))
        })?;
        if inner.failing {
            return Err(MemoryVaultBackendError::Unavailable);
        }
        Ok(inner)
    }

    fn write(
        &self,
    ) -> Result<RwLockWriteGuard<'_, MemoryVaultBackendInner>, MemoryVaultBackendError> {
        let inner = self.inner.write().map_err(|e| {
            MemoryVaultBackendError::Internal(format!("failed to acquire write lock: {}", e))
        })?;
        if inner.failing {
            return Err(MemoryVaultBackendError::Unavailable);
        }
        Ok(inner)
    }
}

impl Default for MemoryVaultBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VaultBackend for MemoryVaultBackend {
    type Error = MemoryVaultBackendError;

    async fn probe(&self) -> Result<(), Self::Error> {
        let inner = self.read()?;
        if !inner.reachable {
            return Err(MemoryVaultBackendError::Unavailable);
        }
        Ok(())
    }

    async fn request_persistence(&self) -> Result<bool, Self::Error> {
        Ok(self.read()?.persistence)
    }

    async fn get_key(&self, tenant_id: &str) -> Result<Option<String>, Self::Error> {
        Ok(self.read()?.keys.get(tenant_id).cloned())
    }

    async fn put_key(&self, tenant_id: &str, sealed: String) -> Result<(), Self::Error> {
        self.write()?.keys.insert(tenant_id.to_string(), sealed);
        Ok(())
    }

    async fn get_shares(&self, tenant_id: &str) -> Result<Vec<String>, Self::Error> {
        Ok(self
            .read()?
            .shares
            .get(tenant_id)
            .map(|shares| shares.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn put_shares(
        &self,
        tenant_id: &str,
        shares: Vec<(u8, String)>,
    ) -> Result<(), Self::Error> {
        self.write()?
            .shares
            .insert(tenant_id.to_string(), shares.into_iter().collect());
        Ok(())
    }

    async fn put_key_material(
        &self,
        tenant_id: &str,
        key: String,
        shares: Vec<(u8, String)>,
    ) -> Result<(), Self::Error> {
        // one write guard covers both maps
        let mut inner = self.write()?;
        if inner.rejecting_key_material {
            return Err(MemoryVaultBackendError::Internal(
                "key material write rejected".to_string(),
            ));
        }
        inner.keys.insert(tenant_id.to_string(), key);
        inner
            .shares
            .insert(tenant_id.to_string(), shares.into_iter().collect());
        Ok(())
    }

    async fn delete_key_material(&self, tenant_id: &str) -> Result<bool, Self::Error> {
        let mut inner = self.write()?;
        let key = inner.keys.remove(tenant_id).is_some();
        let shares = inner.shares.remove(tenant_id).is_some();
        Ok(key || shares)
    }

    async fn get_or_insert_device_id(&self, candidate: &str) -> Result<String, Self::Error> {
        let mut inner = self.write()?;
        Ok(inner
            .device_id
            .get_or_insert_with(|| candidate.to_string())
            .clone())
    }

    async fn append_audit(&self, tenant_id: &str, sealed: String) -> Result<(), Self::Error> {
        self.write()?.audit.push((tenant_id.to_string(), sealed));
        Ok(())
    }

    async fn audit_records(&self, tenant_id: &str) -> Result<Vec<String>, Self::Error> {
        Ok(self
            .read()?
            .audit
            .iter()
            .filter(|(tenant, _)| tenant == tenant_id)
            .map(|(_, sealed)| sealed.clone())
            .collect())
    }
}

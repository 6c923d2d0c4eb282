use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::record::CloudBackupRecord;

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Transport-level trouble; worth another attempt
    #[error("remote store unreachable: {0}")]
    Unreachable(String),
    /// The store understood and refused the request
    #[error("remote store rejected request: {0}")]
    Rejected(String),
    #[error("remote store error: {0}")]
    Default(#[from] anyhow::Error),
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Unreachable(_))
    }
}

/// A remote document store holding one backup record per `(user, tenant)`
#[async_trait]
pub trait RemoteShareStore: Send + Sync + Debug {
    async fn put(
        &self,
        user_id: &str,
        tenant_id: &str,
        record: &CloudBackupRecord,
    ) -> Result<(), RemoteError>;

    async fn get(
        &self,
        user_id: &str,
        tenant_id: &str,
    ) -> Result<Option<CloudBackupRecord>, RemoteError>;

    /// # Returns
    /// * `Ok(true)` - a record existed and was removed
    async fn delete(&self, user_id: &str, tenant_id: &str) -> Result<bool, RemoteError>;
}

/// In-memory remote store, with switches for simulating a bad network
#[derive(Debug, Clone, Default)]
pub struct MemoryRemoteStore {
    records: Arc<RwLock<HashMap<(String, String), CloudBackupRecord>>>,
    calls: Arc<AtomicU32>,
    failures_left: Arc<AtomicU32>,
    hanging: Arc<AtomicBool>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of calls received so far, successful or not
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fail the next `n` calls as unreachable
    pub fn fail_next(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Make every call hang until the switch is turned off again
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::SeqCst);
    }

    /// The record exactly as stored
    pub fn record(&self, user_id: &str, tenant_id: &str) -> Option<CloudBackupRecord> {
        self.records
            .read()
            .get(&(user_id.to_string(), tenant_id.to_string()))
            .cloned()
    }

    async fn call(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        while self.hanging.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RemoteError::Unreachable("simulated network failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteShareStore for MemoryRemoteStore {
    async fn put(
        &self,
        user_id: &str,
        tenant_id: &str,
        record: &CloudBackupRecord,
    ) -> Result<(), RemoteError> {
        self.call().await?;
        self.records
            .write()
            .insert((user_id.to_string(), tenant_id.to_string()), record.clone());
        Ok(())
    }

    async fn get(
        &self,
        user_id: &str,
        tenant_id: &str,
    ) -> Result<Option<CloudBackupRecord>, RemoteError> {
        self.call().await?;
        Ok(self.record(user_id, tenant_id))
    }

    async fn delete(&self, user_id: &str, tenant_id: &str) -> Result<bool, RemoteError> {
        self.call().await?;
        Ok(self
            .records
            .write()
            .remove(&(user_id.to_string(), tenant_id.to_string()))
            .is_some())
    }
}

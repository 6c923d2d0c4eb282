//! Partial cloud backup of recovery shares
//!
//! Only `CLOUD_SHARE_COUNT` shares, one fewer than the recovery threshold, are
//! ever sent to the remote store. Whoever controls the store can therefore
//! never rebuild a tenant's secret; recovering on a new device takes the cloud
//! shares plus at least one share the user kept locally.
//!
//! ```text
//!   local vault        remote store               recovery
//!  [1][2][3][4][5] --> [1][2]          [1][2] + [k] ---> combine
//! ```
//!
//! A backup without a configured remote store is not an error: writes report
//! `false`, reads report nothing, and callers fall back to local-only
//! recovery.

mod record;
mod retry;
mod store;

pub use record::{device_fingerprint, CloudBackupRecord};
pub use retry::RetryPolicy;
pub use store::{MemoryRemoteStore, RemoteError, RemoteShareStore};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::audit::{AuditAction, AuditRecord};
use crate::crypto::{Share, THRESHOLD};
use crate::vault::{MemoryVaultBackend, Vault, VaultBackend, VaultError};

/// Shares sent to the cloud, always below `THRESHOLD`
pub const CLOUD_SHARE_COUNT: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("insufficient shares for cloud backup: {supplied} supplied, {required} required")]
    InsufficientShares { supplied: usize, required: usize },
    #[error("recovery error: {0}")]
    Recovery(String),
    #[error("invalid cloud backup record: {0}")]
    InvalidRecord(String),
    #[error("network timeout: {0}")]
    NetworkTimeout(String),
    #[error("network failure: {0}")]
    NetworkFailure(String),
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),
}

/// Backup metadata, without the shares
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupInfo {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_fingerprint: Option<String>,
}

#[derive(Debug)]
pub struct CloudBackup<B: VaultBackend = MemoryVaultBackend> {
    vault: Arc<Vault<B>>,
    remote: Option<Arc<dyn RemoteShareStore>>,
    retry: RetryPolicy,
}

impl<B: VaultBackend> CloudBackup<B> {
    /// `remote` is `None` when no cloud store is configured
    pub fn new(vault: Arc<Vault<B>>, remote: Option<Arc<dyn RemoteShareStore>>) -> Self {
        Self {
            vault,
            remote,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.remote.is_some()
    }

    /// Send the first `CLOUD_SHARE_COUNT` shares to the remote store
    ///
    /// # Returns
    /// * `Ok(true)` - the backup was written
    /// * `Ok(false)` - no remote store is configured
    pub async fn backup_shares(
        &self,
        shares: &[Share],
        tenant_id: &str,
        user_id: &str,
    ) -> Result<bool, CloudError> {
        if shares.len() < CLOUD_SHARE_COUNT {
            return Err(CloudError::InsufficientShares {
                supplied: shares.len(),
                required: CLOUD_SHARE_COUNT,
            });
        }
        let Some(remote) = &self.remote else {
            tracing::warn!("cloud backup requested but no remote store is configured");
            return Ok(false);
        };

        let device_id = self.vault.get_device_id().await?;
        let record = CloudBackupRecord::new(
            tenant_id,
            user_id,
            shares[..CLOUD_SHARE_COUNT].to_vec(),
            device_fingerprint(&device_id),
        )?;

        let result = self
            .retry
            .run("cloud backup", || remote.put(user_id, tenant_id, &record))
            .await;

        match result {
            Ok(()) => {
                self.audit(
                    AuditRecord::new(AuditAction::CloudBackupCreated, tenant_id, &device_id)
                        .with_user(user_id)
                        .with_shares(CLOUD_SHARE_COUNT, THRESHOLD),
                )
                .await?;
                tracing::info!(
                    "backed up {} shares for tenant {} to the cloud",
                    CLOUD_SHARE_COUNT,
                    tenant_id
                );
                Ok(true)
            }
            Err(e) => {
                tracing::error!("cloud backup for tenant {} failed: {}", tenant_id, e);
                self.audit(
                    AuditRecord::new(AuditAction::CloudBackupFailed, tenant_id, &device_id)
                        .with_user(user_id)
                        .with_error(&e),
                )
                .await?;
                Err(e)
            }
        }
    }

    /// The cloud-held shares, or `None` if there is no backup (or no store)
    pub async fn get_cloud_shares(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Option<Vec<Share>>, CloudError> {
        let Some(record) = self.fetch(tenant_id, user_id).await? else {
            return Ok(None);
        };
        record.validate()?;

        let device_id = self.vault.get_device_id().await?;
        self.audit(
            AuditRecord::new(AuditAction::CloudSharesRetrieved, tenant_id, &device_id)
                .with_user(user_id)
                .with_shares(record.shares().len(), THRESHOLD),
        )
        .await?;
        Ok(Some(record.into_shares()))
    }

    pub async fn has_cloud_backup(&self, tenant_id: &str, user_id: &str) -> Result<bool, CloudError> {
        Ok(self.fetch(tenant_id, user_id).await?.is_some())
    }

    /// Remove the cloud backup, e.g. after rotation or on account deletion
    pub async fn delete_cloud_backup(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<bool, CloudError> {
        let Some(remote) = &self.remote else {
            return Ok(false);
        };

        let device_id = self.vault.get_device_id().await?;
        let deleted = self
            .retry
            .run("cloud delete", || remote.delete(user_id, tenant_id))
            .await?;
        if deleted {
            self.audit(
                AuditRecord::new(AuditAction::CloudBackupDeleted, tenant_id, &device_id)
                    .with_user(user_id),
            )
            .await?;
            tracing::info!("deleted cloud backup for tenant {}", tenant_id);
        }
        Ok(deleted)
    }

    pub async fn get_backup_info(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<BackupInfo, CloudError> {
        let record = self.fetch(tenant_id, user_id).await?;
        Ok(BackupInfo {
            exists: record.is_some(),
            created_at: record.as_ref().map(|r| r.created_at),
            updated_at: record.as_ref().map(|r| r.updated_at),
            version: record.as_ref().map(|r| r.version),
            device_fingerprint: record.map(|r| r.device_fingerprint),
        })
    }

    async fn fetch(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> Result<Option<CloudBackupRecord>, CloudError> {
        let Some(remote) = &self.remote else {
            return Ok(None);
        };
        self.retry
            .run("cloud fetch", || remote.get(user_id, tenant_id))
            .await
    }

    async fn audit(&self, record: AuditRecord) -> Result<(), CloudError> {
        Ok(self.vault.append_audit(&record).await?)
    }
}

/// Pick the shares for a cloud-assisted recovery
///
/// Returns exactly `THRESHOLD` shares: the first two cloud shares and the
/// first local share whose index differs from both.
pub fn combine_for_recovery(cloud: &[Share], local: &[Share]) -> Result<Vec<Share>, CloudError> {
    if cloud.len() < CLOUD_SHARE_COUNT {
        return Err(CloudError::Recovery(format!(
            "need at least {} cloud shares, got {}",
            CLOUD_SHARE_COUNT,
            cloud.len()
        )));
    }
    if local.is_empty() {
        return Err(CloudError::Recovery(
            "need at least 1 local share".to_string(),
        ));
    }

    let cloud = &cloud[..CLOUD_SHARE_COUNT];
    let local = local
        .iter()
        .find(|share| cloud.iter().all(|c| c.index() != share.index()))
        .ok_or_else(|| {
            CloudError::Recovery("every local share duplicates a cloud share".to_string())
        })?;

    let mut combined = cloud.to_vec();
    combined.push(local.clone());
    Ok(combined)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{combine, split, MasterSecret, Sealer, SealingKey};
    use crate::vault::VaultOptions;

    async fn vault() -> Arc<Vault> {
        let sealer = Sealer::new(SealingKey::from_bytes(&[8u8; 32]).unwrap());
        Arc::new(Vault::open(Some(MemoryVaultBackend::new()), sealer, VaultOptions::default()).await)
    }

    async fn backup(remote: &MemoryRemoteStore) -> CloudBackup {
        CloudBackup::new(vault().await, Some(Arc::new(remote.clone())))
    }

    fn shares() -> (MasterSecret, Vec<Share>) {
        let secret = MasterSecret::generate().unwrap();
        let shares = split(&secret, 5, 3).unwrap();
        (secret, shares)
    }

    #[tokio::test]
    async fn test_only_two_shares_leave_the_device() {
        let remote = MemoryRemoteStore::new();
        let backup = backup(&remote).await;
        let (_, shares) = shares();

        assert!(backup.backup_shares(&shares, "clinic", "user").await.unwrap());
        let record = remote.record("user", "clinic").unwrap();
        assert_eq!(record.shares(), &shares[..2]);
        assert_eq!(record.device_fingerprint.len(), 16);

        let fetched = backup.get_cloud_shares("clinic", "user").await.unwrap().unwrap();
        assert_eq!(fetched, shares[..2].to_vec());
        assert!(!combine(&fetched, THRESHOLD).unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_too_few_shares_never_hit_the_network() {
        let remote = MemoryRemoteStore::new();
        let backup = backup(&remote).await;
        let (_, shares) = shares();

        let result = backup.backup_shares(&shares[..1], "clinic", "user").await;
        assert!(matches!(
            result,
            Err(CloudError::InsufficientShares {
                supplied: 1,
                required: 2
            })
        ));
        assert_eq!(remote.calls(), 0);
    }

    #[tokio::test]
    async fn test_unconfigured_store() {
        let backup: CloudBackup = CloudBackup::new(vault().await, None);
        let (_, shares) = shares();
        assert!(!backup.is_configured());
        assert!(!backup.backup_shares(&shares, "clinic", "user").await.unwrap());
        assert_eq!(backup.get_cloud_shares("clinic", "user").await.unwrap(), None);
        assert!(!backup.has_cloud_backup("clinic", "user").await.unwrap());
        assert!(!backup.delete_cloud_backup("clinic", "user").await.unwrap());
        assert!(!backup.get_backup_info("clinic", "user").await.unwrap().exists);
    }

    #[tokio::test]
    async fn test_backup_info_and_delete() {
        let remote = MemoryRemoteStore::new();
        let backup = backup(&remote).await;
        let (_, shares) = shares();

        assert!(!backup.has_cloud_backup("clinic", "user").await.unwrap());
        backup.backup_shares(&shares, "clinic", "user").await.unwrap();
        assert!(backup.has_cloud_backup("clinic", "user").await.unwrap());

        let info = backup.get_backup_info("clinic", "user").await.unwrap();
        assert!(info.exists);
        assert_eq!(info.version, Some(1));
        assert!(info.created_at.is_some());

        assert!(backup.delete_cloud_backup("clinic", "user").await.unwrap());
        assert!(!backup.delete_cloud_backup("clinic", "user").await.unwrap());
        assert!(!backup.has_cloud_backup("clinic", "user").await.unwrap());

        let trail = backup.vault.audit_records("clinic").await.unwrap();
        assert_eq!(trail.count(AuditAction::CloudBackupCreated), 1);
        assert_eq!(trail.count(AuditAction::CloudBackupDeleted), 1);
        assert_eq!(trail.records[0].user_id.as_deref(), Some("user"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_backup_is_audited() {
        let remote = MemoryRemoteStore::new();
        let backup = backup(&remote).await;
        let (_, shares) = shares();

        remote.fail_next(3);
        let result = backup.backup_shares(&shares, "clinic", "user").await;
        assert!(matches!(result, Err(CloudError::NetworkFailure(_))));
        assert_eq!(remote.calls(), 3);

        let trail = backup.vault.audit_records("clinic").await.unwrap();
        assert_eq!(trail.count(AuditAction::CloudBackupFailed), 1);
        assert!(trail.records[0].error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_store_times_out() {
        let remote = MemoryRemoteStore::new();
        let backup = backup(&remote).await.with_retry_policy(RetryPolicy {
            max_attempts: 2,
            ..Default::default()
        });
        let (_, shares) = shares();

        remote.set_hanging(true);
        let result = backup.backup_shares(&shares, "clinic", "user").await;
        assert!(matches!(result, Err(CloudError::NetworkTimeout(_))));
    }

    #[test]
    fn test_combine_for_recovery() {
        let (secret, shares) = shares();
        let cloud = shares[..2].to_vec();

        let picked = combine_for_recovery(&cloud, &shares[4..]).unwrap();
        assert_eq!(picked.len(), THRESHOLD as usize);
        assert_eq!(
            combine(&picked, THRESHOLD).unwrap().into_secret().unwrap(),
            secret
        );

        // a local copy of a cloud share is skipped
        let picked = combine_for_recovery(&cloud, &shares).unwrap();
        assert_eq!(picked[2].index(), 3);

        assert!(matches!(
            combine_for_recovery(&cloud[..1], &shares[2..]),
            Err(CloudError::Recovery(_))
        ));
        assert!(matches!(
            combine_for_recovery(&cloud, &[]),
            Err(CloudError::Recovery(_))
        ));
        assert!(matches!(
            combine_for_recovery(&cloud, &cloud),
            Err(CloudError::Recovery(_))
        ));
    }
}

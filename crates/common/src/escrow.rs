//! Key lifecycle for tenant master secrets
//!
//! A tenant starts without a key. The first call to
//! [`KeyEscrow::get_or_create_master_secret`] mints a secret, splits it into
//! `SHARE_COUNT` shares and stores both through the vault; every later call
//! returns the stored secret. Rotation replaces the secret and its shares
//! wholesale. Recovery rebuilds the secret from `THRESHOLD` shares supplied by
//! a human.
//!
//! Every state-changing action is written to the sealed audit log *before*
//! the change it describes is made.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::audit::{AuditAction, AuditRecord, AuditReport};
use crate::crypto::{
    combine, split, Cipher, CipherError, MasterSecret, Plaintext, SealedCiphertext, Share,
    SHARE_COUNT, THRESHOLD,
};
use crate::vault::{KeyEntry, MemoryVaultBackend, StorageMode, Vault, VaultBackend, VaultError};

#[derive(Debug, thiserror::Error)]
pub enum EscrowError {
    #[error("key escrow failed for tenant {tenant_id}: {source}")]
    KeyEscrow {
        tenant_id: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("insufficient shares: {supplied} supplied, {required} required")]
    InsufficientShares { supplied: usize, required: u8 },
    #[error("no shares found for tenant {0}")]
    NoSharesFound(String),
    #[error("no master key exists for tenant {0}")]
    NoKey(String),
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),
}

impl EscrowError {
    fn escrow(tenant_id: &str, source: impl Into<anyhow::Error>) -> Self {
        EscrowError::KeyEscrow {
            tenant_id: tenant_id.to_string(),
            source: source.into(),
        }
    }
}

/// Key metadata, without the key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    pub storage_mode: StorageMode,
}

#[derive(Debug)]
pub struct KeyEscrow<B: VaultBackend = MemoryVaultBackend> {
    vault: Arc<Vault<B>>,
    cipher: Cipher,
    /// one async lock per tenant, so a tenant never gets two secrets
    locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl<B: VaultBackend> KeyEscrow<B> {
    pub fn new(vault: Arc<Vault<B>>) -> Self {
        let cipher = Cipher::new(vault.sealer().clone());
        Self::with_cipher(vault, cipher)
    }

    pub fn with_cipher(vault: Arc<Vault<B>>, cipher: Cipher) -> Self {
        Self {
            vault,
            cipher,
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn vault(&self) -> &Arc<Vault<B>> {
        &self.vault
    }

    pub fn cipher(&self) -> &Cipher {
        &self.cipher
    }

    /// Return the tenant's master secret, creating it on first use
    pub async fn get_or_create_master_secret(
        &self,
        tenant_id: &str,
    ) -> Result<MasterSecret, EscrowError> {
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.lock().await;
        let device_id = self.vault.get_device_id().await?;

        if let Some(entry) = self.vault.get_key(tenant_id).await? {
            self.audit(AuditRecord::new(AuditAction::KeyAccess, tenant_id, &device_id))
                .await?;
            return Ok(entry.secret()?);
        }

        self.create(tenant_id, &device_id, 1).await
    }

    /// The locally held shares, for export to paper, cloud or another device
    pub async fn get_backup_shares(&self, tenant_id: &str) -> Result<Vec<Share>, EscrowError> {
        let entries = self.vault.get_shares(tenant_id).await?;
        if entries.is_empty() {
            return Err(EscrowError::NoSharesFound(tenant_id.to_string()));
        }

        let device_id = self.vault.get_device_id().await?;
        self.audit(
            AuditRecord::new(AuditAction::SharesExported, tenant_id, &device_id)
                .with_shares(entries.len(), THRESHOLD),
        )
        .await?;
        tracing::info!("exported {} shares for tenant {}", entries.len(), tenant_id);

        Ok(entries.into_iter().map(|entry| entry.share.clone()).collect())
    }

    /// Rebuild the master secret from `THRESHOLD` or more shares and store it
    ///
    /// Only the first `THRESHOLD` shares are used. When the stored shares do
    /// not belong to the recovered secret, fresh ones are split and stored
    /// alongside it.
    pub async fn recover_from_shares(
        &self,
        tenant_id: &str,
        shares: &[Share],
    ) -> Result<MasterSecret, EscrowError> {
        if shares.len() < THRESHOLD as usize {
            return Err(EscrowError::InsufficientShares {
                supplied: shares.len(),
                required: THRESHOLD,
            });
        }

        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.lock().await;
        let device_id = self.vault.get_device_id().await?;

        match self.recover(tenant_id, &device_id, shares).await {
            Ok(secret) => {
                tracing::info!("recovered master key for tenant {}", tenant_id);
                Ok(secret)
            }
            Err(e) => {
                tracing::error!("key recovery failed for tenant {}: {}", tenant_id, e);
                self.audit(
                    AuditRecord::new(AuditAction::KeyRecoveryFailed, tenant_id, &device_id)
                        .with_error(&e),
                )
                .await?;
                Err(EscrowError::escrow(tenant_id, e))
            }
        }
    }

    /// Replace the tenant's secret and shares with fresh ones
    ///
    /// Data encrypted under the old secret must be re-encrypted by the caller.
    pub async fn rotate_key(&self, tenant_id: &str) -> Result<MasterSecret, EscrowError> {
        let lock = self.tenant_lock(tenant_id);
        let _guard = lock.lock().await;
        let device_id = self.vault.get_device_id().await?;

        let version = match self.vault.get_key(tenant_id).await {
            Ok(Some(entry)) => entry.version + 1,
            Ok(None) => 1,
            // a tampered key is exactly what rotation replaces
            Err(VaultError::IntegrityViolation(_)) => 1,
            Err(e) => return Err(e.into()),
        };

        self.audit(AuditRecord::new(AuditAction::KeyRotated, tenant_id, &device_id))
            .await?;
        match self.rotate(tenant_id, &device_id, version).await {
            Ok(secret) => {
                tracing::info!("rotated master key for tenant {} to version {}", tenant_id, version);
                Ok(secret)
            }
            Err(e) => {
                tracing::error!("key rotation failed for tenant {}: {}", tenant_id, e);
                self.audit(
                    AuditRecord::new(AuditAction::KeyRotationFailed, tenant_id, &device_id)
                        .with_error(&e),
                )
                .await?;
                Err(EscrowError::escrow(tenant_id, e))
            }
        }
    }

    pub async fn has_key(&self, tenant_id: &str) -> Result<bool, EscrowError> {
        Ok(self.vault.has_key(tenant_id).await?)
    }

    pub async fn get_key_info(&self, tenant_id: &str) -> Result<KeyInfo, EscrowError> {
        let entry = self.vault.get_key(tenant_id).await?;
        Ok(KeyInfo {
            exists: entry.is_some(),
            created_at: entry.as_ref().map(|e| e.created_at),
            last_accessed_at: entry.as_ref().map(|e| e.last_accessed_at),
            version: entry.as_ref().map(|e| e.version),
            storage_mode: self.vault.storage_mode(),
        })
    }

    pub async fn audit_trail(&self, tenant_id: &str) -> Result<AuditReport, EscrowError> {
        Ok(self.vault.audit_records(tenant_id).await?)
    }

    /// Record an audit event on behalf of a collaborator, e.g. the cloud backup
    pub async fn record(&self, record: AuditRecord) -> Result<(), EscrowError> {
        self.audit(record).await
    }

    /// Encrypt under the tenant's master secret, creating it if needed
    pub async fn encrypt_for(
        &self,
        tenant_id: &str,
        data: impl Into<Plaintext>,
    ) -> Result<SealedCiphertext, EscrowError> {
        let secret = self.get_or_create_master_secret(tenant_id).await?;
        Ok(self.cipher.encrypt(data, &secret).await?)
    }

    pub async fn decrypt_for(
        &self,
        tenant_id: &str,
        sealed: &SealedCiphertext,
    ) -> Result<Plaintext, EscrowError> {
        // check the seal before touching the key so tampering is reported as such
        self.cipher.sealer().verify(&sealed.envelope).map_err(CipherError::from)?;
        let secret = {
            let lock = self.tenant_lock(tenant_id);
            let _guard = lock.lock().await;
            let entry = self
                .vault
                .get_key(tenant_id)
                .await?
                .ok_or_else(|| EscrowError::NoKey(tenant_id.to_string()))?;
            let device_id = self.vault.get_device_id().await?;
            self.audit(AuditRecord::new(AuditAction::KeyAccess, tenant_id, &device_id))
                .await?;
            entry.secret()?
        };
        Ok(self.cipher.decrypt(sealed, &secret).await?)
    }

    /// Caller holds the tenant lock and has already logged the rotation
    async fn rotate(
        &self,
        tenant_id: &str,
        device_id: &str,
        version: u32,
    ) -> Result<MasterSecret, EscrowError> {
        self.vault.delete_key(tenant_id).await?;
        self.create(tenant_id, device_id, version).await
    }

    async fn create(
        &self,
        tenant_id: &str,
        device_id: &str,
        version: u32,
    ) -> Result<MasterSecret, EscrowError> {
        let secret = MasterSecret::generate().map_err(|e| EscrowError::escrow(tenant_id, e))?;
        let shares =
            split(&secret, SHARE_COUNT, THRESHOLD).map_err(|e| EscrowError::escrow(tenant_id, e))?;
        let entry = KeyEntry::new(tenant_id, &secret, device_id, version);

        self.audit(
            AuditRecord::new(AuditAction::KeyCreated, tenant_id, device_id)
                .with_shares(shares.len(), THRESHOLD),
        )
        .await?;
        self.vault.store_key_material(&entry, &shares).await?;

        tracing::info!("created master key for tenant {}", tenant_id);
        Ok(secret)
    }

    async fn recover(
        &self,
        tenant_id: &str,
        device_id: &str,
        shares: &[Share],
    ) -> anyhow::Result<MasterSecret> {
        let secret = combine(&shares[..THRESHOLD as usize], THRESHOLD)?.into_secret()?;

        self.audit(
            AuditRecord::new(AuditAction::KeyRecovered, tenant_id, device_id)
                .with_shares(THRESHOLD as usize, THRESHOLD),
        )
        .await?;

        // (version, whether the stored shares still belong to this secret)
        let (version, shares_match) = match self.vault.get_key(tenant_id).await {
            Ok(Some(existing)) => {
                let same = existing.secret()? == secret;
                if !same {
                    tracing::warn!(
                        "recovered key for tenant {} differs from the stored one, replacing it",
                        tenant_id
                    );
                }
                (existing.version, same)
            }
            Ok(None) | Err(VaultError::IntegrityViolation(_)) => (1, false),
            Err(e) => return Err(e.into()),
        };

        let entry = KeyEntry::new(tenant_id, &secret, device_id, version);
        if shares_match {
            self.vault.store_key(&entry).await?;
        } else {
            let shares = split(&secret, SHARE_COUNT, THRESHOLD)?;
            self.vault.store_key_material(&entry, &shares).await?;
        }
        Ok(secret)
    }

    async fn audit(&self, record: AuditRecord) -> Result<(), EscrowError> {
        tracing::debug!("audit {} for tenant {}", record.action, record.tenant_id);
        Ok(self.vault.append_audit(&record).await?)
    }

    fn tenant_lock(&self, tenant_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        // a count of one means only the map holds it: nobody owns or awaits it
        locks.retain(|tenant, lock| tenant == tenant_id || Arc::strong_count(lock) > 1);
        locks.entry(tenant_id.to_string()).or_default().clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{Sealer, SealingKey};
    use crate::vault::VaultOptions;

    async fn escrow() -> (KeyEscrow, MemoryVaultBackend) {
        let backend = MemoryVaultBackend::new();
        let sealer = Sealer::new(SealingKey::from_bytes(&[1u8; 32]).unwrap());
        let vault = Vault::open(Some(backend.clone()), sealer, VaultOptions::default()).await;
        (KeyEscrow::new(Arc::new(vault)), backend)
    }

    #[tokio::test]
    async fn test_get_or_create_is_stable() {
        let (escrow, _) = escrow().await;
        assert!(!escrow.has_key("clinic").await.unwrap());

        let first = escrow.get_or_create_master_secret("clinic").await.unwrap();
        let second = escrow.get_or_create_master_secret("clinic").await.unwrap();
        assert_eq!(first, second);
        assert!(escrow.has_key("clinic").await.unwrap());

        let other = escrow.get_or_create_master_secret("other").await.unwrap();
        assert_ne!(first, other);

        let trail = escrow.audit_trail("clinic").await.unwrap();
        assert_eq!(trail.count(AuditAction::KeyCreated), 1);
        assert_eq!(trail.count(AuditAction::KeyAccess), 1);
    }

    #[tokio::test]
    async fn test_backup_shares_reconstruct() {
        let (escrow, _) = escrow().await;
        let secret = escrow.get_or_create_master_secret("clinic").await.unwrap();
        let shares = escrow.get_backup_shares("clinic").await.unwrap();
        assert_eq!(shares.len(), SHARE_COUNT as usize);

        let recovered = combine(&shares[1..4], THRESHOLD).unwrap().into_secret().unwrap();
        assert_eq!(recovered, secret);

        let trail = escrow.audit_trail("clinic").await.unwrap();
        let exported = trail
            .records
            .iter()
            .find(|r| r.action == AuditAction::SharesExported)
            .unwrap();
        assert_eq!(exported.shares_count, Some(5));
    }

    #[tokio::test]
    async fn test_no_shares_found() {
        let (escrow, _) = escrow().await;
        assert!(matches!(
            escrow.get_backup_shares("nobody").await,
            Err(EscrowError::NoSharesFound(_))
        ));
    }

    #[tokio::test]
    async fn test_recover_needs_threshold() {
        let (escrow, _) = escrow().await;
        escrow.get_or_create_master_secret("clinic").await.unwrap();
        let shares = escrow.get_backup_shares("clinic").await.unwrap();

        let result = escrow.recover_from_shares("clinic", &shares[..2]).await;
        assert!(matches!(
            result,
            Err(EscrowError::InsufficientShares {
                supplied: 2,
                required: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_recover_after_loss() {
        let (escrow, _) = escrow().await;
        let secret = escrow.get_or_create_master_secret("clinic").await.unwrap();
        let shares = escrow.get_backup_shares("clinic").await.unwrap();

        escrow.vault().delete_key("clinic").await.unwrap();
        assert!(!escrow.has_key("clinic").await.unwrap());

        let picked = vec![shares[4].clone(), shares[0].clone(), shares[2].clone()];
        let recovered = escrow.recover_from_shares("clinic", &picked).await.unwrap();
        assert_eq!(recovered, secret);
        assert_eq!(
            escrow.get_or_create_master_secret("clinic").await.unwrap(),
            secret
        );

        let trail = escrow.audit_trail("clinic").await.unwrap();
        assert_eq!(trail.count(AuditAction::KeyRecovered), 1);
        assert_eq!(trail.count(AuditAction::KeyCreated), 1);
    }

    #[tokio::test]
    async fn test_failed_recovery_is_audited() {
        let (escrow, _) = escrow().await;
        escrow.get_or_create_master_secret("clinic").await.unwrap();
        let shares = escrow.get_backup_shares("clinic").await.unwrap();

        let duplicated = vec![shares[0].clone(), shares[0].clone(), shares[1].clone()];
        let result = escrow.recover_from_shares("clinic", &duplicated).await;
        assert!(matches!(result, Err(EscrowError::KeyEscrow { .. })));

        let trail = escrow.audit_trail("clinic").await.unwrap();
        let failure = trail
            .records
            .iter()
            .find(|r| r.action == AuditAction::KeyRecoveryFailed)
            .unwrap();
        assert!(failure.error.as_deref().unwrap().contains("duplicate"));
    }

    #[tokio::test]
    async fn test_rotate_replaces_key_and_shares() {
        let (escrow, _) = escrow().await;
        let old = escrow.get_or_create_master_secret("clinic").await.unwrap();
        let old_shares = escrow.get_backup_shares("clinic").await.unwrap();

        let new = escrow.rotate_key("clinic").await.unwrap();
        assert_ne!(old, new);
        assert_eq!(
            escrow.get_or_create_master_secret("clinic").await.unwrap(),
            new
        );

        let new_shares = escrow.get_backup_shares("clinic").await.unwrap();
        assert_ne!(new_shares, old_shares);
        let rebuilt = combine(&new_shares[..3], THRESHOLD).unwrap().into_secret().unwrap();
        assert_eq!(rebuilt, new);

        let info = escrow.get_key_info("clinic").await.unwrap();
        assert_eq!(info.version, Some(2));

        let trail = escrow.audit_trail("clinic").await.unwrap();
        assert_eq!(trail.count(AuditAction::KeyRotated), 1);
        assert_eq!(trail.count(AuditAction::KeyCreated), 2);
        // write-ahead: the rotation is logged before the new key is created
        let rotated = trail
            .records
            .iter()
            .position(|r| r.action == AuditAction::KeyRotated)
            .unwrap();
        let created = trail
            .records
            .iter()
            .rposition(|r| r.action == AuditAction::KeyCreated)
            .unwrap();
        assert!(rotated < created);
    }

    #[tokio::test]
    async fn test_failed_rotation_is_audited() {
        let sealer = Sealer::new(SealingKey::from_bytes(&[1u8; 32]).unwrap());
        let escrow = KeyEscrow::new(Arc::new(Vault::session_only(sealer).await));
        escrow.get_or_create_master_secret("clinic").await.unwrap();

        escrow.vault().session().set_rejecting_key_material(true);
        let result = escrow.rotate_key("clinic").await;
        assert!(matches!(
            result,
            Err(EscrowError::KeyEscrow { ref tenant_id, .. }) if tenant_id == "clinic"
        ));

        let trail = escrow.audit_trail("clinic").await.unwrap();
        let rotated = trail
            .records
            .iter()
            .position(|r| r.action == AuditAction::KeyRotated)
            .unwrap();
        let failed = trail
            .records
            .iter()
            .position(|r| r.action == AuditAction::KeyRotationFailed)
            .unwrap();
        assert!(rotated < failed);
        assert!(trail.records[failed]
            .error
            .as_deref()
            .unwrap()
            .contains("rejected"));

        escrow.vault().session().set_rejecting_key_material(false);
        escrow.rotate_key("clinic").await.unwrap();
        assert_eq!(
            escrow.audit_trail("clinic").await.unwrap().count(AuditAction::KeyRotationFailed),
            1
        );
    }

    #[tokio::test]
    async fn test_recovering_a_different_key_replaces_its_shares() {
        let (escrow, _) = escrow().await;
        let original = escrow.get_or_create_master_secret("clinic").await.unwrap();

        let replacement = MasterSecret::generate().unwrap();
        let handed_over = split(&replacement, SHARE_COUNT, THRESHOLD).unwrap();
        let recovered = escrow
            .recover_from_shares("clinic", &handed_over[2..])
            .await
            .unwrap();
        assert_eq!(recovered, replacement);
        assert_ne!(recovered, original);

        let exported = escrow.get_backup_shares("clinic").await.unwrap();
        assert_eq!(exported.len(), SHARE_COUNT as usize);
        let rebuilt = combine(&exported[..3], THRESHOLD).unwrap().into_secret().unwrap();
        assert_eq!(rebuilt, replacement);
        assert_eq!(escrow.get_key_info("clinic").await.unwrap().version, Some(1));
    }

    #[tokio::test]
    async fn test_recovering_the_same_key_keeps_its_shares() {
        let (escrow, _) = escrow().await;
        escrow.get_or_create_master_secret("clinic").await.unwrap();
        let before = escrow.get_backup_shares("clinic").await.unwrap();

        escrow.recover_from_shares("clinic", &before[1..4]).await.unwrap();
        assert_eq!(escrow.get_backup_shares("clinic").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_recovery_does_not_overwrite_an_unreadable_key() {
        let (escrow, backend) = escrow().await;
        escrow.get_or_create_master_secret("clinic").await.unwrap();
        let shares = escrow.get_backup_shares("clinic").await.unwrap();
        backend.set_raw_key("clinic", "not a sealed record".to_string());

        let result = escrow.recover_from_shares("clinic", &shares[..3]).await;
        assert!(matches!(result, Err(EscrowError::KeyEscrow { .. })));
        assert_eq!(
            backend.raw_key("clinic").as_deref(),
            Some("not a sealed record")
        );

        let trail = escrow.audit_trail("clinic").await.unwrap();
        let failure = trail
            .records
            .iter()
            .find(|r| r.action == AuditAction::KeyRecoveryFailed)
            .unwrap();
        assert!(failure.error.as_deref().unwrap().contains("malformed"));
    }

    #[tokio::test]
    async fn test_recovery_replaces_a_tampered_key() {
        let (escrow, backend) = escrow().await;
        let secret = escrow.get_or_create_master_secret("clinic").await.unwrap();
        let shares = escrow.get_backup_shares("clinic").await.unwrap();
        let raw = backend.raw_key("clinic").unwrap();
        backend.set_raw_key("clinic", raw.replace("\"version\":1", "\"version\":9"));

        let recovered = escrow.recover_from_shares("clinic", &shares[..3]).await.unwrap();
        assert_eq!(recovered, secret);
        assert_eq!(
            escrow.get_or_create_master_secret("clinic").await.unwrap(),
            secret
        );
    }

    #[tokio::test]
    async fn test_tenant_locks_are_pruned() {
        let (escrow, _) = escrow().await;
        for i in 0..32 {
            escrow
                .get_or_create_master_secret(&format!("tenant-{}", i))
                .await
                .unwrap();
        }
        assert_eq!(escrow.locks.lock().len(), 1);

        // a held lock survives pruning
        let held = escrow.tenant_lock("tenant-0");
        let _guard = held.lock().await;
        escrow.get_or_create_master_secret("tenant-1").await.unwrap();
        let locks = escrow.locks.lock();
        assert!(locks.contains_key("tenant-0"));
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_decrypt_waits_for_the_tenant_lock() {
        let (escrow, _) = escrow().await;
        let sealed = escrow.encrypt_for("clinic", "chart notes").await.unwrap();

        let held = escrow.tenant_lock("clinic");
        let guard = held.lock().await;
        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            escrow.decrypt_for("clinic", &sealed),
        )
        .await;
        assert!(blocked.is_err());
        drop(guard);

        let plaintext = escrow.decrypt_for("clinic", &sealed).await.unwrap();
        assert_eq!(plaintext, Plaintext::from("chart notes"));
    }

    #[tokio::test]
    async fn test_decrypt_never_mints_a_key() {
        let (escrow, _) = escrow().await;
        let sealed = escrow.encrypt_for("clinic", "chart notes").await.unwrap();

        assert!(matches!(
            escrow.decrypt_for("other", &sealed).await,
            Err(EscrowError::NoKey(_))
        ));
        assert!(!escrow.has_key("other").await.unwrap());
        let trail = escrow.audit_trail("other").await.unwrap();
        assert_eq!(trail.count(AuditAction::KeyCreated), 0);
        assert_eq!(trail.count(AuditAction::KeyAccess), 0);
    }

    #[tokio::test]
    async fn test_key_info() {
        let (escrow, _) = escrow().await;
        let info = escrow.get_key_info("clinic").await.unwrap();
        assert!(!info.exists);
        assert_eq!(info.created_at, None);
        assert_eq!(info.storage_mode, StorageMode::Persistent);

        escrow.get_or_create_master_secret("clinic").await.unwrap();
        let info = escrow.get_key_info("clinic").await.unwrap();
        assert!(info.exists);
        assert_eq!(info.version, Some(1));
        assert!(info.last_accessed_at >= info.created_at);
    }

    #[tokio::test]
    async fn test_tampered_key_surfaces_integrity_violation() {
        let (escrow, backend) = escrow().await;
        escrow.get_or_create_master_secret("clinic").await.unwrap();
        let raw = backend.raw_key("clinic").unwrap();
        backend.set_raw_key("clinic", raw.replace("\"version\":1", "\"version\":7"));

        assert!(matches!(
            escrow.get_or_create_master_secret("clinic").await,
            Err(EscrowError::Vault(VaultError::IntegrityViolation(_)))
        ));

        // rotation gets the tenant out of that state
        escrow.rotate_key("clinic").await.unwrap();
        escrow.get_or_create_master_secret("clinic").await.unwrap();
    }

    #[tokio::test]
    async fn test_encrypt_for_tenant() {
        let (escrow, _) = escrow().await;
        let sealed = escrow.encrypt_for("clinic", "chart notes").await.unwrap();
        let plaintext = escrow.decrypt_for("clinic", &sealed).await.unwrap();
        assert_eq!(plaintext, Plaintext::from("chart notes"));

        assert!(matches!(
            escrow.decrypt_for("other", &sealed).await,
            Err(EscrowError::NoKey(_))
        ));

        escrow.get_or_create_master_secret("other").await.unwrap();
        assert!(matches!(
            escrow.decrypt_for("other", &sealed).await,
            Err(EscrowError::Cipher(CipherError::Decrypt))
        ));

        let mut tampered = sealed;
        tampered.envelope.payload.nonce = "AAAAAAAAAAAAAAAA".to_string();
        assert!(matches!(
            escrow.decrypt_for("clinic", &tampered).await,
            Err(EscrowError::Cipher(CipherError::IntegrityViolation))
        ));
    }
}

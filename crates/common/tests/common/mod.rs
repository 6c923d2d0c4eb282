//! Shared test utilities for escrow integration tests
#![allow(dead_code)]

use std::sync::Arc;

use ::common::cloud::{CloudBackup, MemoryRemoteStore};
use ::common::crypto::{Sealer, SealingKey};
use ::common::escrow::KeyEscrow;
use ::common::vault::{MemoryVaultBackend, Vault, VaultOptions};

pub fn sealer() -> Sealer {
    Sealer::new(SealingKey::generate().unwrap())
}

/// A key escrow over a persistent in-memory vault, plus the raw backend
pub async fn setup_escrow() -> (KeyEscrow, MemoryVaultBackend) {
    let backend = MemoryVaultBackend::new();
    let vault = Vault::open(Some(backend.clone()), sealer(), VaultOptions::default()).await;
    (KeyEscrow::new(Arc::new(vault)), backend)
}

/// A second device: its own vault, sharing nothing with the first
pub async fn setup_device() -> KeyEscrow {
    setup_escrow().await.0
}

/// Cloud backup wired to the escrow's vault and a shared remote store
pub fn cloud_for(escrow: &KeyEscrow, remote: &MemoryRemoteStore) -> CloudBackup {
    CloudBackup::new(escrow.vault().clone(), Some(Arc::new(remote.clone())))
}

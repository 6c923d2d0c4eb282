//! Shared setup for on-disk vault tests
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use ::common::crypto::{Sealer, SealingKey};
use ::common::escrow::KeyEscrow;
use ::common::vault::{Vault, VaultOptions};
use sentinel_cli::Database;

/// An escrow over the SQLite file at `path`, sealed with `key`
pub async fn open_escrow(path: &Path, key: &SealingKey) -> KeyEscrow<Database> {
    let db = Database::connect(path).await.unwrap();
    let vault = Vault::open(Some(db), Sealer::new(key.clone()), VaultOptions::default()).await;
    KeyEscrow::new(Arc::new(vault))
}

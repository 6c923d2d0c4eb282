use std::sync::Arc;

use common::cloud::{CloudBackup, RemoteShareStore};
use common::crypto::{Cipher, EvidenceKey, SealError, Sealer};
use common::escrow::KeyEscrow;
use common::vault::{StorageMode, Vault};

use crate::database::Database;
use crate::remote::HttpRemoteStore;
use crate::state::{AppState, StateError};

/// Everything a command needs, wired from one state directory
#[derive(Debug)]
pub struct Sentinel {
    pub state: AppState,
    pub sealer: Sealer,
    pub escrow: KeyEscrow<Database>,
    pub cloud: CloudBackup<Database>,
}

impl Sentinel {
    pub async fn open(state: AppState) -> Result<Self, AppError> {
        let key = state.load_key()?;
        let sealer = Sealer::new(key.clone());
        let cipher = Cipher::new(sealer.clone()).with_evidence_key(EvidenceKey::derive(&key)?);

        // a broken database degrades the vault instead of failing the command
        let durable = match Database::connect(&state.db_path).await {
            Ok(db) => Some(db),
            Err(e) => {
                tracing::warn!("could not open vault database {:?}: {}", state.db_path, e);
                None
            }
        };
        let vault = Arc::new(
            Vault::open(durable, sealer.clone(), state.config.vault_options()).await,
        );

        let remote = match &state.config.remote_url {
            Some(url) => {
                let store = HttpRemoteStore::new(url).map_err(AppError::Remote)?;
                Some(Arc::new(store) as Arc<dyn RemoteShareStore>)
            }
            None => None,
        };

        let escrow = KeyEscrow::with_cipher(vault.clone(), cipher);
        let cloud = CloudBackup::new(vault, remote).with_retry_policy(state.config.retry_policy());

        Ok(Self {
            state,
            sealer,
            escrow,
            cloud,
        })
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.escrow.vault().storage_mode()
    }

    /// The explicit tenant, or the configured default
    pub fn tenant(&self, explicit: Option<&str>) -> String {
        explicit
            .map(str::to_string)
            .unwrap_or_else(|| self.state.config.default_tenant.clone())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error("sealing key error: {0}")]
    Seal(#[from] SealError),
    #[error("could not build the remote store client: {0}")]
    Remote(reqwest::Error),
}

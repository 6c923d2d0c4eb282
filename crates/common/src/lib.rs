/**
 * Sealed audit log records and the actions
 *  they describe.
 */
pub mod audit;
/**
 * Partial cloud backup of recovery shares.
 * Never holds enough shares to rebuild a
 *  secret on its own.
 */
pub mod cloud;
/**
 * Cryptographic types and operations.
 *  - Threshold secret sharing over GF(257)
 *  - Tamper-evident sealing envelopes
 *  - AES-256-GCM payload encryption
 */
pub mod crypto;
/**
 * Key lifecycle orchestration: get-or-create,
 *  export, recover and rotate.
 */
pub mod escrow;
/**
 * Sealed key, share and audit storage with
 *  a graceful degradation ladder.
 */
pub mod vault;

pub mod prelude {
    pub use crate::audit::{AuditAction, AuditRecord, AuditReport};
    pub use crate::cloud::{
        combine_for_recovery, CloudBackup, CloudError, RemoteShareStore, RetryPolicy,
    };
    pub use crate::crypto::{
        Cipher, CipherError, Envelope, MasterSecret, Plaintext, SealedCiphertext, Sealer,
        SealingKey, Share,
    };
    pub use crate::escrow::{EscrowError, KeyEscrow, KeyInfo};
    pub use crate::vault::{StorageMode, Vault, VaultBackend, VaultError, VaultOptions};
}

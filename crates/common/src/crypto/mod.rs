//! Cryptographic primitives for Sentinel
//!
//! - **Secret sharing**: a 32-byte `MasterSecret` split into `SHARE_COUNT`
//!   shares over GF(257), any `THRESHOLD` of which reconstruct it
//! - **Sealing**: keyed SHA-256 envelopes that make edits to persisted state
//!   detectable
//! - **Evidence locks**: HMAC-SHA256 locks under a separately held key
//! - **Encryption**: AES-256-GCM under a PBKDF2-stretched master secret, with
//!   the encrypted envelope itself sealed
//!
//! # Security Model
//!
//! The master secret is the only high-value value. It is generated on the
//! device, stored sealed in the vault, and leaves the device only as shares.
//! No single share, and no pair of shares, says anything about it.
//!
//! Seals detect tampering by someone who can edit stored data but cannot read
//! the sealing key. They are not a substitute for encryption.

mod cipher;
mod forensic;
mod seal;
mod secret;
mod shamir;

pub use cipher::{
    Cipher, CipherError, ContentType, EncryptedEnvelope, Plaintext, SealedCiphertext,
    FORMAT_VERSION, KDF_ITERATIONS, NONCE_SIZE, SALT_SIZE,
};
pub use forensic::{lock as lock_evidence, verify as verify_evidence, EvidenceKey, EvidenceLock};
pub use seal::{
    canonical_json, Envelope, Restored, SealError, Sealer, SealingKey, INTEGRITY_TAG,
    SEALING_KEY_SIZE,
};
pub use secret::{MasterSecret, SecretError, SECRET_SIZE};
pub use shamir::{
    combine, split, Reconstruction, ShamirError, Share, FIELD_PRIME, SHARE_COUNT,
    SHARE_WIRE_SIZE, THRESHOLD,
};

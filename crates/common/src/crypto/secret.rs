//! The per-tenant master secret
//!
//! A `MasterSecret` is the single high-value value this crate protects. It lives
//! in memory only for as long as a caller holds it and is wiped on drop. At rest
//! it only ever appears hex-encoded inside a sealed vault entry.

use std::fmt;
use std::ops::Deref;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a master secret in bytes (256 bits)
pub const SECRET_SIZE: usize = 32;

/// Errors that can occur while building a secret
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("invalid secret size, expected {expected}, got {actual}")]
    InvalidSize { expected: usize, actual: usize },
    #[error("invalid hex encoding")]
    Hex(#[from] hex::FromHexError),
}

/// A 256-bit master secret
///
/// `Debug` never prints the key material.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MasterSecret([u8; SECRET_SIZE]);

impl fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterSecret(..)")
    }
}

impl Deref for MasterSecret {
    type Target = [u8; SECRET_SIZE];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<[u8; SECRET_SIZE]> for MasterSecret {
    fn from(bytes: [u8; SECRET_SIZE]) -> Self {
        MasterSecret(bytes)
    }
}

impl MasterSecret {
    /// Generate a new random secret from the operating system RNG
    pub fn generate() -> Result<Self, SecretError> {
        let mut buff = [0; SECRET_SIZE];
        getrandom::getrandom(&mut buff)
            .map_err(|e| anyhow::anyhow!("failed to generate random bytes: {}", e))?;
        Ok(Self(buff))
    }

    /// Create a secret from a byte slice
    ///
    /// # Errors
    ///
    /// Returns an error if the slice length is not exactly `SECRET_SIZE` bytes.
    pub fn from_slice(data: &[u8]) -> Result<Self, SecretError> {
        if data.len() != SECRET_SIZE {
            return Err(SecretError::InvalidSize {
                expected: SECRET_SIZE,
                actual: data.len(),
            });
        }
        let mut buff = [0; SECRET_SIZE];
        buff.copy_from_slice(data);
        Ok(buff.into())
    }

    /// Parse a secret from a hexadecimal string
    ///
    /// Accepts both plain hex and "0x"-prefixed hex strings.
    pub fn from_hex(hex: &str) -> Result<Self, SecretError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let bytes = zeroize::Zeroizing::new(hex::decode(hex)?);
        Self::from_slice(&bytes)
    }

    /// Convert the secret to a lowercase hexadecimal string
    #[allow(clippy::wrong_self_convention)]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn bytes(&self) -> &[u8] {
        self.0.as_ref()
    }
}

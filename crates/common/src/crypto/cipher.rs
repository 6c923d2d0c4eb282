//! Payload encryption under a tenant master secret
//!
//! Every call draws a fresh salt and nonce, stretches the master secret into an
//! AES-256-GCM key with PBKDF2-HMAC-SHA256, and packs the result into an
//! [`EncryptedEnvelope`]. That envelope is then sealed, so edits to the stored
//! ciphertext are caught as integrity violations before any key derivation or
//! decryption is attempted.
//!
//! Key derivation is deliberately expensive and runs on tokio's blocking pool.

use std::fmt;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::forensic::{self, EvidenceKey, EvidenceLock};
use super::seal::{Envelope, SealError, Sealer};
use super::secret::MasterSecret;

/// PBKDF2 rounds used for new envelopes, also the minimum accepted on decrypt
pub const KDF_ITERATIONS: u32 = 100_000;
/// Size of the per-envelope PBKDF2 salt
pub const SALT_SIZE: usize = 16;
/// Size of the AES-GCM nonce (96 bits)
pub const NONCE_SIZE: usize = 12;
/// Size of the derived AES-256 key
const KEY_SIZE: usize = 32;
/// Current envelope format
pub const FORMAT_VERSION: &str = "v1_gcm";

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("cipher error: {0}")]
    Default(#[from] anyhow::Error),
    #[error("integrity violation: encrypted envelope was modified")]
    IntegrityViolation,
    #[error("decryption failed: wrong key or corrupted ciphertext")]
    Decrypt,
    #[error("weak parameters: {iterations} kdf iterations is below the minimum of {minimum}")]
    WeakParameters { iterations: u32, minimum: u32 },
    #[error("unsupported envelope format: {0}")]
    UnsupportedFormat(String),
    #[error("envelope carries an evidence lock but no evidence key is configured")]
    MissingEvidenceKey,
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("seal error: {0}")]
    Seal(SealError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<SealError> for CipherError {
    fn from(error: SealError) -> Self {
        match error {
            SealError::IntegrityViolation => CipherError::IntegrityViolation,
            e => CipherError::Seal(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Bytes,
    Text,
    Json,
}

/// What goes into, and comes back out of, the cipher
#[derive(Clone, PartialEq)]
pub enum Plaintext {
    Bytes(Vec<u8>),
    Text(String),
    Json(serde_json::Value),
}

impl fmt::Debug for Plaintext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plaintext::Bytes(b) => write!(f, "Plaintext::Bytes({} bytes)", b.len()),
            Plaintext::Text(t) => write!(f, "Plaintext::Text({} bytes)", t.len()),
            Plaintext::Json(_) => f.write_str("Plaintext::Json(..)"),
        }
    }
}

impl Plaintext {
    pub fn content_type(&self) -> ContentType {
        match self {
            Plaintext::Bytes(_) => ContentType::Bytes,
            Plaintext::Text(_) => ContentType::Text,
            Plaintext::Json(_) => ContentType::Json,
        }
    }

    fn to_bytes(&self) -> Result<Zeroizing<Vec<u8>>, CipherError> {
        Ok(Zeroizing::new(match self {
            Plaintext::Bytes(b) => b.clone(),
            Plaintext::Text(t) => t.as_bytes().to_vec(),
            Plaintext::Json(v) => serde_json::to_vec(v)?,
        }))
    }

    fn from_bytes(content_type: ContentType, bytes: Vec<u8>) -> Result<Self, CipherError> {
        Ok(match content_type {
            ContentType::Bytes => Plaintext::Bytes(bytes),
            ContentType::Text => Plaintext::Text(
                String::from_utf8(bytes).map_err(|e| CipherError::Encoding(e.to_string()))?,
            ),
            ContentType::Json => Plaintext::Json(serde_json::from_slice(&bytes)?),
        })
    }

    pub fn into_bytes(self) -> Result<Vec<u8>, CipherError> {
        Ok(match self {
            Plaintext::Bytes(b) => b,
            Plaintext::Text(t) => t.into_bytes(),
            Plaintext::Json(v) => serde_json::to_vec(&v)?,
        })
    }
}

impl From<Vec<u8>> for Plaintext {
    fn from(bytes: Vec<u8>) -> Self {
        Plaintext::Bytes(bytes)
    }
}

impl From<String> for Plaintext {
    fn from(text: String) -> Self {
        Plaintext::Text(text)
    }
}

impl From<&str> for Plaintext {
    fn from(text: &str) -> Self {
        Plaintext::Text(text.to_string())
    }
}

impl From<serde_json::Value> for Plaintext {
    fn from(value: serde_json::Value) -> Self {
        Plaintext::Json(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEnvelope {
    /// base64 AES-GCM ciphertext, tag included
    pub ciphertext: String,
    /// base64 96-bit nonce
    pub nonce: String,
    /// base64 PBKDF2 salt
    pub salt: String,
    pub format_version: String,
    pub content_type: ContentType,
    pub kdf_iterations: u32,
}

/// A sealed [`EncryptedEnvelope`], optionally with a forensic lock over it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedCiphertext {
    pub envelope: Envelope<EncryptedEnvelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forensic: Option<EvidenceLock>,
}

#[derive(Debug, Clone)]
pub struct Cipher {
    sealer: Sealer,
    evidence_key: Option<EvidenceKey>,
    iterations: u32,
}

impl Cipher {
    pub fn new(sealer: Sealer) -> Self {
        Self {
            sealer,
            evidence_key: None,
            iterations: KDF_ITERATIONS,
        }
    }

    pub fn with_evidence_key(mut self, key: EvidenceKey) -> Self {
        self.evidence_key = Some(key);
        self
    }

    /// Raise the KDF work factor for new envelopes
    pub fn with_iterations(mut self, iterations: u32) -> Result<Self, CipherError> {
        if iterations < KDF_ITERATIONS {
            return Err(CipherError::WeakParameters {
                iterations,
                minimum: KDF_ITERATIONS,
            });
        }
        self.iterations = iterations;
        Ok(self)
    }

    pub fn sealer(&self) -> &Sealer {
        &self.sealer
    }

    pub async fn encrypt(
        &self,
        data: impl Into<Plaintext>,
        master: &MasterSecret,
    ) -> Result<SealedCiphertext, CipherError> {
        let envelope = self.encrypt_envelope(data.into(), master).await?;
        Ok(SealedCiphertext {
            envelope: self.sealer.seal(envelope)?,
            forensic: None,
        })
    }

    /// Encrypt and attach an evidence lock over the encrypted envelope
    pub async fn encrypt_with_evidence(
        &self,
        data: impl Into<Plaintext>,
        master: &MasterSecret,
    ) -> Result<SealedCiphertext, CipherError> {
        let key = self
            .evidence_key
            .as_ref()
            .ok_or(CipherError::MissingEvidenceKey)?;
        let envelope = self.encrypt_envelope(data.into(), master).await?;
        let forensic = forensic::lock(key, &envelope)?;
        Ok(SealedCiphertext {
            envelope: self.sealer.seal(envelope)?,
            forensic: Some(forensic),
        })
    }

    pub async fn decrypt(
        &self,
        sealed: &SealedCiphertext,
        master: &MasterSecret,
    ) -> Result<Plaintext, CipherError> {
        // nothing is derived or decrypted until the seal checks out
        self.sealer.verify(&sealed.envelope)?;
        let envelope = &sealed.envelope.payload;

        if let Some(evidence) = &sealed.forensic {
            let key = self
                .evidence_key
                .as_ref()
                .ok_or(CipherError::MissingEvidenceKey)?;
            if !forensic::verify(key, envelope, evidence) {
                tracing::error!("integrity violation: evidence lock does not match envelope");
                return Err(CipherError::IntegrityViolation);
            }
        }

        if envelope.format_version != FORMAT_VERSION {
            return Err(CipherError::UnsupportedFormat(
                envelope.format_version.clone(),
            ));
        }
        if envelope.kdf_iterations < KDF_ITERATIONS {
            return Err(CipherError::WeakParameters {
                iterations: envelope.kdf_iterations,
                minimum: KDF_ITERATIONS,
            });
        }

        let salt: [u8; SALT_SIZE] = decode_fixed(&envelope.salt, "salt")?;
        let nonce_bytes: [u8; NONCE_SIZE] = decode_fixed(&envelope.nonce, "nonce")?;
        let ciphertext = STANDARD
            .decode(&envelope.ciphertext)
            .map_err(|e| CipherError::Encoding(format!("ciphertext: {}", e)))?;

        let key = derive_key(master, salt, envelope.kdf_iterations).await?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| CipherError::Decrypt)?;

        Plaintext::from_bytes(envelope.content_type, plaintext)
    }

    pub async fn encrypt_json<T: Serialize>(
        &self,
        value: &T,
        master: &MasterSecret,
    ) -> Result<SealedCiphertext, CipherError> {
        self.encrypt(Plaintext::Json(serde_json::to_value(value)?), master)
            .await
    }

    pub async fn decrypt_json<T: DeserializeOwned>(
        &self,
        sealed: &SealedCiphertext,
        master: &MasterSecret,
    ) -> Result<T, CipherError> {
        match self.decrypt(sealed, master).await? {
            Plaintext::Json(value) => Ok(serde_json::from_value(value)?),
            other => Ok(serde_json::from_slice(&other.into_bytes()?)?),
        }
    }

    async fn encrypt_envelope(
        &self,
        data: Plaintext,
        master: &MasterSecret,
    ) -> Result<EncryptedEnvelope, CipherError> {
        let mut salt = [0u8; SALT_SIZE];
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut salt)
            .map_err(|e| anyhow::anyhow!("failed to generate salt: {}", e))?;
        getrandom::getrandom(&mut nonce_bytes)
            .map_err(|e| anyhow::anyhow!("failed to generate nonce: {}", e))?;

        let key = derive_key(master, salt, self.iterations).await?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()));
        let plaintext = data.to_bytes()?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_ref())
            .map_err(|_| anyhow::anyhow!("encrypt error"))?;

        Ok(EncryptedEnvelope {
            ciphertext: STANDARD.encode(ciphertext),
            nonce: STANDARD.encode(nonce_bytes),
            salt: STANDARD.encode(salt),
            format_version: FORMAT_VERSION.to_string(),
            content_type: data.content_type(),
            kdf_iterations: self.iterations,
        })
    }
}

async fn derive_key(
    master: &MasterSecret,
    salt: [u8; SALT_SIZE],
    iterations: u32,
) -> Result<Zeroizing<[u8; KEY_SIZE]>, CipherError> {
    let secret = master.clone();
    tokio::task::spawn_blocking(move || {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        pbkdf2::pbkdf2_hmac::<Sha256>(secret.bytes(), &salt, iterations, key.as_mut_slice());
        key
    })
    .await
    .map_err(|e| CipherError::Default(anyhow::anyhow!("key derivation task failed: {}", e)))
}

fn decode_fixed<const N: usize>(encoded: &str, field: &str) -> Result<[u8; N], CipherError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| CipherError::Encoding(format!("{}: {}", field, e)))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        CipherError::Encoding(format!("{}: expected {} bytes, got {}", field, N, b.len()))
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::seal::SealingKey;
    use serde_json::json;

    fn cipher() -> Cipher {
        Cipher::new(Sealer::new(SealingKey::from_bytes(&[3u8; 32]).unwrap()))
    }

    #[tokio::test]
    async fn test_text_roundtrip() {
        let cipher = cipher();
        let master = MasterSecret::generate().unwrap();
        let sealed = cipher.encrypt("patient note", &master).await.unwrap();

        let envelope = &sealed.envelope.payload;
        assert_eq!(envelope.format_version, FORMAT_VERSION);
        assert_eq!(envelope.kdf_iterations, KDF_ITERATIONS);
        assert_eq!(envelope.content_type, ContentType::Text);
        assert_eq!(STANDARD.decode(&envelope.salt).unwrap().len(), SALT_SIZE);
        assert_eq!(STANDARD.decode(&envelope.nonce).unwrap().len(), NONCE_SIZE);

        let plaintext = cipher.decrypt(&sealed, &master).await.unwrap();
        assert_eq!(plaintext, Plaintext::Text("patient note".to_string()));
    }

    #[tokio::test]
    async fn test_bytes_and_json_roundtrip() {
        let cipher = cipher();
        let master = MasterSecret::generate().unwrap();

        let bytes = vec![0u8, 1, 2, 255];
        let sealed = cipher.encrypt(bytes.clone(), &master).await.unwrap();
        assert_eq!(
            cipher.decrypt(&sealed, &master).await.unwrap(),
            Plaintext::Bytes(bytes)
        );

        let value = json!({ "vitals": { "hr": 72 }, "tags": ["a", "b"] });
        let sealed = cipher.encrypt_json(&value, &master).await.unwrap();
        let decoded: serde_json::Value = cipher.decrypt_json(&sealed, &master).await.unwrap();
        assert_eq!(decoded, value);
    }

    #[tokio::test]
    async fn test_fresh_salt_and_nonce_per_call() {
        let cipher = cipher();
        let master = MasterSecret::generate().unwrap();
        let a = cipher.encrypt("same", &master).await.unwrap();
        let b = cipher.encrypt("same", &master).await.unwrap();
        assert_ne!(a.envelope.payload.salt, b.envelope.payload.salt);
        assert_ne!(a.envelope.payload.nonce, b.envelope.payload.nonce);
        assert_ne!(a.envelope.payload.ciphertext, b.envelope.payload.ciphertext);
    }

    #[tokio::test]
    async fn test_wrong_key_fails() {
        let cipher = cipher();
        let sealed = cipher
            .encrypt("secret", &MasterSecret::generate().unwrap())
            .await
            .unwrap();
        let result = cipher
            .decrypt(&sealed, &MasterSecret::generate().unwrap())
            .await;
        assert!(matches!(result, Err(CipherError::Decrypt)));
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_is_an_integrity_violation() {
        let cipher = cipher();
        let master = MasterSecret::generate().unwrap();
        let mut sealed = cipher.encrypt("secret", &master).await.unwrap();

        let mut raw = STANDARD.decode(&sealed.envelope.payload.ciphertext).unwrap();
        raw[0] ^= 0x01;
        sealed.envelope.payload.ciphertext = STANDARD.encode(raw);

        let result = cipher.decrypt(&sealed, &master).await;
        assert!(matches!(result, Err(CipherError::IntegrityViolation)));
    }

    #[tokio::test]
    async fn test_downgraded_iterations_are_caught_by_the_seal() {
        let cipher = cipher();
        let master = MasterSecret::generate().unwrap();
        let mut sealed = cipher.encrypt("secret", &master).await.unwrap();
        sealed.envelope.payload.kdf_iterations = 1;
        assert!(matches!(
            cipher.decrypt(&sealed, &master).await,
            Err(CipherError::IntegrityViolation)
        ));
    }

    #[tokio::test]
    async fn test_weak_iterations_are_refused() {
        let cipher = cipher();
        let master = MasterSecret::generate().unwrap();
        let mut sealed = cipher.encrypt("secret", &master).await.unwrap();

        // re-seal with a downgraded work factor, as a key holder could
        let mut envelope = sealed.envelope.payload.clone();
        envelope.kdf_iterations = 1_000;
        sealed.envelope = cipher.sealer().seal(envelope).unwrap();
        assert!(matches!(
            cipher.decrypt(&sealed, &master).await,
            Err(CipherError::WeakParameters {
                iterations: 1_000,
                ..
            })
        ));

        assert!(matches!(
            self::cipher().with_iterations(10),
            Err(CipherError::WeakParameters { .. })
        ));
    }

    #[tokio::test]
    async fn test_evidence_lock() {
        let sealing = SealingKey::from_bytes(&[3u8; 32]).unwrap();
        let evidence_key = EvidenceKey::derive(&sealing).unwrap();
        let cipher = Cipher::new(Sealer::new(sealing)).with_evidence_key(evidence_key);
        let master = MasterSecret::generate().unwrap();

        let sealed = cipher
            .encrypt_with_evidence("forensic", &master)
            .await
            .unwrap();
        assert!(sealed.forensic.is_some());
        assert_eq!(
            cipher.decrypt(&sealed, &master).await.unwrap(),
            Plaintext::from("forensic")
        );

        let mut forged = sealed.clone();
        if let Some(lock) = forged.forensic.as_mut() {
            lock.seal = "00".repeat(32);
        }
        assert!(matches!(
            cipher.decrypt(&forged, &master).await,
            Err(CipherError::IntegrityViolation)
        ));

        // a cipher without the evidence key cannot vouch for the lock
        assert!(matches!(
            self::cipher().decrypt(&sealed, &master).await,
            Err(CipherError::MissingEvidenceKey)
        ));
    }

    #[tokio::test]
    async fn test_sealed_ciphertext_json_roundtrip() {
        let cipher = cipher();
        let master = MasterSecret::generate().unwrap();
        let sealed = cipher.encrypt("on disk", &master).await.unwrap();
        let text = serde_json::to_string(&sealed).unwrap();
        assert!(!text.contains("forensic"));
        let parsed: SealedCiphertext = serde_json::from_str(&text).unwrap();
        assert_eq!(
            cipher.decrypt(&parsed, &master).await.unwrap(),
            Plaintext::from("on disk")
        );
    }
}

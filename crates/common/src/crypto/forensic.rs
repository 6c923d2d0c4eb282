//! HMAC evidence locks
//!
//! An [`EvidenceLock`] pins a payload to a key that is held apart from the
//! sealing key. It carries a plain SHA-256 of the canonical payload, useful for
//! matching records across systems, and an HMAC-SHA256 seal that only the
//! evidence key holder can produce.

use std::fmt;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::seal::{canonical_json, SealError, SealingKey};

type HmacSha256 = Hmac<Sha256>;

/// Domain separator for keys derived from a sealing key
const EVIDENCE_KEY_CONTEXT: &[u8] = b"sentinel/evidence-lock/v1";

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EvidenceKey(Vec<u8>);

impl fmt::Debug for EvidenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EvidenceKey(..)")
    }
}

impl EvidenceKey {
    pub fn generate() -> Result<Self, SealError> {
        let mut buff = vec![0u8; 32];
        getrandom::getrandom(&mut buff).map_err(|e| SealError::InvalidKey(e.to_string()))?;
        Ok(Self(buff))
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    /// Derive an evidence key bound to, but distinct from, a sealing key
    pub fn derive(sealing_key: &SealingKey) -> Result<Self, SealError> {
        let mut mac = new_mac(sealing_key.bytes())?;
        mac.update(EVIDENCE_KEY_CONTEXT);
        Ok(Self(mac.finalize().into_bytes().to_vec()))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceLock {
    /// hex SHA-256 of the canonical payload
    pub hash: String,
    /// hex HMAC-SHA256 of the canonical payload under the evidence key
    pub seal: String,
}

pub fn lock<T: Serialize + ?Sized>(key: &EvidenceKey, payload: &T) -> Result<EvidenceLock, SealError> {
    let canonical = canonical_json(payload)?;
    let hash = hex::encode(Sha256::digest(canonical.as_bytes()));
    let mut mac = new_mac(key.bytes())?;
    mac.update(canonical.as_bytes());
    Ok(EvidenceLock {
        hash,
        seal: hex::encode(mac.finalize().into_bytes()),
    })
}

pub fn verify<T: Serialize + ?Sized>(key: &EvidenceKey, payload: &T, lock: &EvidenceLock) -> bool {
    let Ok(canonical) = canonical_json(payload) else {
        return false;
    };
    if hex::encode(Sha256::digest(canonical.as_bytes())) != lock.hash {
        return false;
    }
    let Ok(expected) = hex::decode(&lock.seal) else {
        return false;
    };
    let Ok(mut mac) = new_mac(key.bytes()) else {
        return false;
    };
    mac.update(canonical.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

fn new_mac(key: &[u8]) -> Result<HmacSha256, SealError> {
    <HmacSha256 as Mac>::new_from_slice(key).map_err(|e| SealError::InvalidKey(e.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lock_verifies() {
        let key = EvidenceKey::generate().unwrap();
        let payload = json!({ "ciphertext": "abc", "nonce": "def" });
        let evidence = lock(&key, &payload).unwrap();
        assert_eq!(evidence.hash.len(), 64);
        assert_eq!(evidence.seal.len(), 64);
        assert!(verify(&key, &payload, &evidence));
    }

    #[test]
    fn test_edited_payload_fails() {
        let key = EvidenceKey::generate().unwrap();
        let evidence = lock(&key, &json!({ "n": 1 })).unwrap();
        assert!(!verify(&key, &json!({ "n": 2 }), &evidence));
    }

    #[test]
    fn test_forged_hash_fails() {
        let key = EvidenceKey::generate().unwrap();
        let payload = json!({ "n": 1 });
        let mut evidence = lock(&key, &payload).unwrap();
        evidence.hash = hex::encode(Sha256::digest(b"something else"));
        assert!(!verify(&key, &payload, &evidence));
    }

    #[test]
    fn test_wrong_key_fails() {
        let payload = json!("record");
        let evidence = lock(&EvidenceKey::generate().unwrap(), &payload).unwrap();
        assert!(!verify(&EvidenceKey::generate().unwrap(), &payload, &evidence));
    }

    #[test]
    fn test_restored_key_verifies_old_evidence() {
        let key = EvidenceKey::generate().unwrap();
        let payload = json!({ "ciphertext": "abc", "nonce": "def" });
        let evidence = lock(&key, &payload).unwrap();

        let restored = EvidenceKey::from_bytes(key.bytes());
        assert!(verify(&restored, &payload, &evidence));
        assert_eq!(lock(&restored, &payload).unwrap().seal, evidence.seal);

        let mut other = key.bytes().to_vec();
        other[0] ^= 1;
        assert!(!verify(&EvidenceKey::from_bytes(&other), &payload, &evidence));
    }

    #[test]
    fn test_derived_key_is_stable_and_distinct() {
        let sealing = SealingKey::from_bytes(&[9u8; 32]).unwrap();
        let a = EvidenceKey::derive(&sealing).unwrap();
        let b = EvidenceKey::derive(&sealing).unwrap();
        assert_eq!(a.bytes(), b.bytes());
        assert_ne!(a.bytes(), sealing.bytes());
    }
}

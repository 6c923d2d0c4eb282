//! Tamper-evident sealing of serializable state
//!
//! A sealed value travels as an [`Envelope`]: the payload itself, a keyed
//! SHA-256 digest over its canonical JSON form, and the time it was sealed.
//! Anyone holding the envelope can read the payload; only a holder of the
//! sealing key can produce a signature that [`Sealer::open`] will accept.
//!
//! ```text
//! signature = hex(SHA-256(canonical_json(payload) || key))
//! ```
//!
//! Canonical JSON is the payload round-tripped through `serde_json::Value`,
//! whose maps keep their keys sorted. Two payloads that differ only in field
//! order therefore share a signature.
//!
//! This guards against a user hand-editing persisted state. It is no defense
//! against anyone who can read the process memory or the key itself.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Marker written into every envelope
pub const INTEGRITY_TAG: &str = "sentinel_seal_01";
/// Size of a freshly generated sealing key
pub const SEALING_KEY_SIZE: usize = 32;
/// Keys shorter than this are refused
const MIN_SEALING_KEY_SIZE: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum SealError {
    #[error("integrity violation: signature does not match payload")]
    IntegrityViolation,
    #[error("malformed envelope: {0}")]
    Malformed(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid sealing key: {0}")]
    InvalidKey(String),
}

/// The secret behind every seal
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SealingKey(Vec<u8>);

impl fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SealingKey(..)")
    }
}

impl SealingKey {
    pub fn generate() -> Result<Self, SealError> {
        let mut buff = vec![0u8; SEALING_KEY_SIZE];
        getrandom::getrandom(&mut buff).map_err(|e| SealError::InvalidKey(e.to_string()))?;
        Ok(Self(buff))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SealError> {
        if bytes.len() < MIN_SEALING_KEY_SIZE {
            return Err(SealError::InvalidKey(format!(
                "key must be at least {} bytes, got {}",
                MIN_SEALING_KEY_SIZE,
                bytes.len()
            )));
        }
        Ok(Self(bytes.to_vec()))
    }

    pub fn from_hex(hex: &str) -> Result<Self, SealError> {
        let hex = hex.trim();
        let bytes = zeroize::Zeroizing::new(
            hex::decode(hex).map_err(|e| SealError::InvalidKey(e.to_string()))?,
        );
        Self::from_bytes(&bytes)
    }

    #[allow(clippy::wrong_self_convention)]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A payload plus the proof that it has not been edited since sealing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub payload: T,
    pub signature: String,
    /// Milliseconds since the unix epoch
    pub timestamp: i64,
    pub integrity_tag: String,
}

/// Outcome of [`Sealer::restore_or_reset`]
#[derive(Debug, Clone, PartialEq)]
pub enum Restored<T> {
    /// The stored state verified and was restored as-is
    Intact(T),
    /// The stored state failed verification and was replaced by the default
    Reset(T),
}

impl<T> Restored<T> {
    pub fn was_reset(&self) -> bool {
        matches!(self, Restored::Reset(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Restored::Intact(value) | Restored::Reset(value) => value,
        }
    }
}

struct SealerKeys {
    current: SealingKey,
    /// Keys retired by `rotate`, newest first, still accepted by `open`
    previous: Vec<SealingKey>,
}

/// Seals and opens envelopes under a (rotatable) key
///
/// Cheap to clone; clones share the same key set.
#[derive(Clone)]
pub struct Sealer {
    keys: Arc<RwLock<SealerKeys>>,
}

impl fmt::Debug for Sealer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sealer")
            .field("retired_keys", &self.keys.read().previous.len())
            .finish_non_exhaustive()
    }
}

impl Sealer {
    pub fn new(key: SealingKey) -> Self {
        Self {
            keys: Arc::new(RwLock::new(SealerKeys {
                current: key,
                previous: Vec::new(),
            })),
        }
    }

    /// A sealer under a random key that lives as long as the process
    pub fn ephemeral() -> Result<Self, SealError> {
        Ok(Self::new(SealingKey::generate()?))
    }

    /// Seal with `key` from now on, keep accepting the old one
    pub fn rotate(&self, key: SealingKey) {
        let mut keys = self.keys.write();
        let retired = std::mem::replace(&mut keys.current, key);
        keys.previous.insert(0, retired);
        tracing::info!(
            "sealing key rotated, {} retired keys retained",
            keys.previous.len()
        );
    }

    pub fn seal<T: Serialize>(&self, payload: T) -> Result<Envelope<T>, SealError> {
        let canonical = canonical_json(&payload)?;
        let signature = sign(&self.keys.read().current, &canonical);
        Ok(Envelope {
            payload,
            signature,
            timestamp: chrono::Utc::now().timestamp_millis(),
            integrity_tag: INTEGRITY_TAG.to_string(),
        })
    }

    /// Check an envelope's signature without consuming it
    pub fn verify<T: Serialize>(&self, envelope: &Envelope<T>) -> Result<(), SealError> {
        let canonical = canonical_json(&envelope.payload)?;
        self.check(&canonical, &envelope.signature)
    }

    /// Open a typed envelope, yielding the payload only if it verifies
    pub fn open<T: Serialize>(&self, envelope: Envelope<T>) -> Option<T> {
        match self.verify(&envelope) {
            Ok(()) => Some(envelope.payload),
            Err(e) => {
                report(&e);
                None
            }
        }
    }

    /// Open an envelope read as raw JSON, e.g. from disk
    pub fn open_value<T: DeserializeOwned>(&self, raw: serde_json::Value) -> Option<T> {
        match self.open_checked(raw) {
            Ok(payload) => Some(payload),
            Err(e) => {
                report(&e);
                None
            }
        }
    }

    /// Like [`Sealer::open_value`], but says why the envelope was refused
    pub fn open_checked<T: DeserializeOwned>(&self, raw: serde_json::Value) -> Result<T, SealError> {
        let serde_json::Value::Object(mut fields) = raw else {
            return Err(SealError::Malformed("envelope is not an object".to_string()));
        };
        let payload = fields
            .remove("payload")
            .ok_or_else(|| SealError::Malformed("missing payload".to_string()))?;
        let signature = match fields.remove("signature") {
            Some(serde_json::Value::String(signature)) => signature,
            _ => return Err(SealError::Malformed("missing signature".to_string())),
        };

        // the signature covers the bytes we were handed, not a re-typed copy
        let canonical = serde_json::to_string(&payload)?;
        self.check(&canonical, &signature)?;
        Ok(serde_json::from_value(payload)?)
    }

    /// Open an envelope from its JSON text
    pub fn open_str<T: DeserializeOwned>(&self, raw: &str) -> Result<T, SealError> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| SealError::Malformed(format!("not json: {}", e)))?;
        self.open_checked(value)
    }

    /// Restore persisted state, falling back to a clean slate if it was edited
    pub fn restore_or_reset<T: DeserializeOwned + Default>(
        &self,
        raw: serde_json::Value,
    ) -> Restored<T> {
        match self.open_checked(raw) {
            Ok(state) => Restored::Intact(state),
            Err(e) => {
                report(&e);
                tracing::warn!("stored state could not be verified, resetting to initial state");
                Restored::Reset(T::default())
            }
        }
    }

    fn check(&self, canonical: &str, signature: &str) -> Result<(), SealError> {
        let keys = self.keys.read();
        let matches = std::iter::once(&keys.current)
            .chain(keys.previous.iter())
            .any(|key| constant_time_eq(sign(key, canonical).as_bytes(), signature.as_bytes()));
        if matches {
            Ok(())
        } else {
            Err(SealError::IntegrityViolation)
        }
    }
}

/// Serialize `value` with sorted object keys
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    serde_json::to_string(&value)
}

fn sign(key: &SealingKey, canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hasher.update(key.bytes());
    hex::encode(hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn report(error: &SealError) {
    match error {
        SealError::IntegrityViolation => {
            tracing::error!("integrity violation: sealed payload failed signature check")
        }
        e => tracing::warn!("could not open sealed envelope: {}", e),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct ExamSession {
        current_case: u32,
        score: u32,
        answers: Vec<String>,
    }

    fn sealer() -> Sealer {
        Sealer::new(SealingKey::from_bytes(&[42u8; 32]).unwrap())
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let sealer = sealer();
        let state = ExamSession {
            current_case: 2,
            score: 40,
            answers: vec!["a".into(), "c".into()],
        };
        let envelope = sealer.seal(state.clone()).unwrap();
        assert_eq!(envelope.integrity_tag, INTEGRITY_TAG);
        assert_eq!(envelope.signature.len(), 64);
        assert_eq!(sealer.open(envelope), Some(state));
    }

    #[test]
    fn test_current_case_edit_is_detected() {
        let sealer = sealer();
        let envelope = sealer.seal(json!({ "currentCase": 2 })).unwrap();
        assert_eq!(
            sealer.open(envelope.clone()),
            Some(json!({ "currentCase": 2 }))
        );

        let mut tampered = envelope;
        tampered.payload["currentCase"] = json!(10);
        assert_eq!(sealer.open(tampered), None);
    }

    #[test]
    fn test_raw_json_edit_is_detected() {
        let sealer = sealer();
        let envelope = sealer
            .seal(ExamSession {
                current_case: 2,
                ..Default::default()
            })
            .unwrap();
        let text = serde_json::to_string(&envelope).unwrap();
        let edited = text.replace("\"currentCase\":2", "\"currentCase\":10");
        assert_ne!(text, edited);

        assert!(sealer.open_str::<ExamSession>(&text).is_ok());
        assert!(matches!(
            sealer.open_str::<ExamSession>(&edited),
            Err(SealError::IntegrityViolation)
        ));
    }

    #[test]
    fn test_field_order_does_not_matter() {
        let sealer = sealer();
        let envelope = sealer.seal(json!({ "a": 1, "b": [1, 2] })).unwrap();
        let raw = format!(
            r#"{{"signature":"{}","payload":{{"b":[1,2],"a":1}},"timestamp":0}}"#,
            envelope.signature
        );
        let opened: serde_json::Value = sealer.open_str(&raw).unwrap();
        assert_eq!(opened, json!({ "a": 1, "b": [1, 2] }));
    }

    #[test]
    fn test_missing_fields_do_not_open() {
        let sealer = sealer();
        assert_eq!(sealer.open_value::<u32>(json!({ "payload": 1 })), None);
        assert_eq!(sealer.open_value::<u32>(json!({ "signature": "00" })), None);
        assert_eq!(sealer.open_value::<u32>(json!([1, 2, 3])), None);
        assert!(matches!(
            sealer.open_checked::<u32>(json!({ "payload": 1 })),
            Err(SealError::Malformed(_))
        ));
    }

    #[test]
    fn test_other_key_does_not_open() {
        let envelope = sealer().seal("hello".to_string()).unwrap();
        let other = Sealer::ephemeral().unwrap();
        assert!(matches!(
            other.verify(&envelope),
            Err(SealError::IntegrityViolation)
        ));
        assert_eq!(other.open(envelope), None);
    }

    #[test]
    fn test_rotation_keeps_old_envelopes_readable() {
        let sealer = sealer();
        let before = sealer.seal(7u32).unwrap();

        sealer.rotate(SealingKey::generate().unwrap());
        let after = sealer.seal(7u32).unwrap();
        assert_ne!(before.signature, after.signature);

        assert_eq!(sealer.open(before), Some(7));
        assert_eq!(sealer.open(after.clone()), Some(7));

        // a sealer that never saw the new key refuses new envelopes
        assert_eq!(self::sealer().open(after), None);
    }

    #[test]
    fn test_restore_or_reset() {
        let sealer = sealer();
        let state = ExamSession {
            current_case: 3,
            score: 12,
            answers: vec![],
        };
        let raw = serde_json::to_value(sealer.seal(state.clone()).unwrap()).unwrap();
        let restored = sealer.restore_or_reset::<ExamSession>(raw.clone());
        assert_eq!(restored, Restored::Intact(state));

        let mut scummed = raw;
        scummed["payload"]["score"] = json!(100);
        let restored = sealer.restore_or_reset::<ExamSession>(scummed);
        assert!(restored.was_reset());
        assert_eq!(restored.into_inner(), ExamSession::default());
    }

    #[test]
    fn test_short_key_is_rejected() {
        assert!(matches!(
            SealingKey::from_bytes(&[1u8; 8]),
            Err(SealError::InvalidKey(_))
        ));
        let key = SealingKey::generate().unwrap();
        assert_eq!(SealingKey::from_hex(&key.to_hex()).unwrap().bytes(), key.bytes());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}

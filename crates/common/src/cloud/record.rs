use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::{Share, THRESHOLD};

use super::{CloudError, CLOUD_SHARE_COUNT};

/// What the remote store holds for one `(user, tenant)` pair
///
/// Always exactly `CLOUD_SHARE_COUNT` shares, fewer than `THRESHOLD`, so the
/// cloud copy alone can never rebuild the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudBackupRecord {
    pub tenant_id: String,
    pub user_id: String,
    shares: Vec<Share>,
    pub device_fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u32,
}

impl CloudBackupRecord {
    pub fn new(
        tenant_id: &str,
        user_id: &str,
        shares: Vec<Share>,
        device_fingerprint: String,
    ) -> Result<Self, CloudError> {
        let now = Utc::now();
        let record = Self {
            tenant_id: tenant_id.to_string(),
            user_id: user_id.to_string(),
            shares,
            device_fingerprint,
            created_at: now,
            updated_at: now,
            version: 1,
        };
        record.validate()?;
        Ok(record)
    }

    /// Check a record, e.g. one that came back from the network
    pub fn validate(&self) -> Result<(), CloudError> {
        if self.shares.len() >= THRESHOLD as usize {
            return Err(CloudError::InvalidRecord(format!(
                "{} shares would reach the recovery threshold of {}",
                self.shares.len(),
                THRESHOLD
            )));
        }
        if self.shares.len() != CLOUD_SHARE_COUNT {
            return Err(CloudError::InvalidRecord(format!(
                "record holds {} shares, expected {}",
                self.shares.len(),
                CLOUD_SHARE_COUNT
            )));
        }
        Ok(())
    }

    pub fn shares(&self) -> &[Share] {
        &self.shares
    }

    pub fn into_shares(self) -> Vec<Share> {
        self.shares
    }
}

/// A short, non-reversible tag identifying the device that made a backup
///
/// First 16 hex characters of SHA-256 over
/// `os|arch|family|lang|tz|device_id`.
pub fn device_fingerprint(device_id: &str) -> String {
    let lang = std::env::var("LANG").unwrap_or_default();
    let tz = std::env::var("TZ")
        .unwrap_or_else(|_| chrono::Local::now().offset().to_string());
    fingerprint_of(&[
        std::env::consts::OS,
        std::env::consts::ARCH,
        std::env::consts::FAMILY,
        &lang,
        &tz,
        device_id,
    ])
}

fn fingerprint_of(components: &[&str]) -> String {
    let digest = Sha256::digest(components.join("|").as_bytes());
    let mut fingerprint = hex::encode(digest);
    fingerprint.truncate(16);
    fingerprint
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::{split, MasterSecret};

    #[test]
    fn test_record_refuses_threshold_shares() {
        let shares = split(&MasterSecret::generate().unwrap(), 5, 3).unwrap();

        let record =
            CloudBackupRecord::new("clinic", "user", shares[..2].to_vec(), "ff".into()).unwrap();
        assert_eq!(record.shares().len(), 2);
        assert_eq!(record.version, 1);

        assert!(matches!(
            CloudBackupRecord::new("clinic", "user", shares[..3].to_vec(), "ff".into()),
            Err(CloudError::InvalidRecord(_))
        ));
        assert!(matches!(
            CloudBackupRecord::new("clinic", "user", vec![], "ff".into()),
            Err(CloudError::InvalidRecord(_))
        ));
        assert!(matches!(
            CloudBackupRecord::new("clinic", "user", shares[..1].to_vec(), "ff".into()),
            Err(CloudError::InvalidRecord(m)) if m.contains("expected 2")
        ));
    }

    #[test]
    fn test_fetched_record_with_one_share_is_invalid() {
        let shares = split(&MasterSecret::generate().unwrap(), 5, 3).unwrap();
        let record =
            CloudBackupRecord::new("clinic", "user", shares[..2].to_vec(), "ff".into()).unwrap();
        let mut json = serde_json::to_value(&record).unwrap();
        json["shares"] = serde_json::json!([shares[0].to_hex()]);

        let fetched: CloudBackupRecord = serde_json::from_value(json).unwrap();
        assert!(matches!(
            fetched.validate(),
            Err(CloudError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_record_json_shape() {
        let shares = split(&MasterSecret::generate().unwrap(), 5, 3).unwrap();
        let record =
            CloudBackupRecord::new("clinic", "user", shares[..2].to_vec(), "ab".into()).unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["tenantId"], "clinic");
        assert_eq!(json["userId"], "user");
        assert_eq!(json["deviceFingerprint"], "ab");
        assert_eq!(json["shares"][0], shares[0].to_hex());
    }

    #[test]
    fn test_fingerprint_shape() {
        let fingerprint = device_fingerprint("device-1");
        assert_eq!(fingerprint.len(), 16);
        assert!(fingerprint.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fingerprint, device_fingerprint("device-1"));
        assert_ne!(fingerprint, device_fingerprint("device-2"));

        let expected = hex::encode(Sha256::digest(b"a|b"));
        assert_eq!(fingerprint_of(&["a", "b"]), expected[..16]);
    }
}

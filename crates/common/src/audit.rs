use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every state-changing event the escrow and cloud layers record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    KeyAccess,
    KeyCreated,
    SharesExported,
    KeyRecovered,
    KeyRecoveryFailed,
    KeyRotated,
    KeyRotationFailed,
    CloudBackupCreated,
    CloudBackupFailed,
    CloudSharesRetrieved,
    CloudBackupDeleted,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            AuditAction::KeyAccess => "KEY_ACCESS",
            AuditAction::KeyCreated => "KEY_CREATED",
            AuditAction::SharesExported => "SHARES_EXPORTED",
            AuditAction::KeyRecovered => "KEY_RECOVERED",
            AuditAction::KeyRecoveryFailed => "KEY_RECOVERY_FAILED",
            AuditAction::KeyRotated => "KEY_ROTATED",
            AuditAction::KeyRotationFailed => "KEY_ROTATION_FAILED",
            AuditAction::CloudBackupCreated => "CLOUD_BACKUP_CREATED",
            AuditAction::CloudBackupFailed => "CLOUD_BACKUP_FAILED",
            AuditAction::CloudSharesRetrieved => "CLOUD_SHARES_RETRIEVED",
            AuditAction::CloudBackupDeleted => "CLOUD_BACKUP_DELETED",
        };
        f.write_str(tag)
    }
}

/// A single audit log entry, persisted sealed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub action: AuditAction,
    pub tenant_id: String,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shares_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    pub fn new(action: AuditAction, tenant_id: &str, device_id: &str) -> Self {
        Self {
            action,
            tenant_id: tenant_id.to_string(),
            device_id: device_id.to_string(),
            user_id: None,
            timestamp: Utc::now(),
            shares_count: None,
            threshold: None,
            error: None,
        }
    }

    pub fn with_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn with_shares(mut self, count: usize, threshold: u8) -> Self {
        self.shares_count = Some(count);
        self.threshold = Some(threshold);
        self
    }

    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// The verified audit trail of one tenant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    /// Records whose seal verified, oldest first
    pub records: Vec<AuditRecord>,
    /// Records that failed verification and were left out
    pub tampered: usize,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.tampered == 0
    }

    pub fn count(&self, action: AuditAction) -> usize {
        self.records.iter().filter(|r| r.action == action).count()
    }
}

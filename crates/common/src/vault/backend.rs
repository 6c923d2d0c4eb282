use std::fmt::{Debug, Display};

use async_trait::async_trait;

/// Raw storage behind a [`Vault`](super::Vault)
///
/// Backends only ever see sealed records as opaque strings; sealing, opening
/// and the fallback ladder all live in the vault itself. Shares are addressed
/// by `(tenant_id, index)`.
#[async_trait]
pub trait VaultBackend: Send + Sync + Debug + 'static {
    type Error: Display + Debug + Send + Sync;

    /// Check that the backend is reachable at all
    async fn probe(&self) -> Result<(), Self::Error>;

    /// Ask the backend to guarantee its data survives restarts
    ///
    /// # Returns
    /// * `Ok(true)` - data is durable
    /// * `Ok(false)` - data may be evicted by the host
    async fn request_persistence(&self) -> Result<bool, Self::Error>;

    async fn get_key(&self, tenant_id: &str) -> Result<Option<String>, Self::Error>;

    async fn put_key(&self, tenant_id: &str, sealed: String) -> Result<(), Self::Error>;

    /// Sealed shares for a tenant, ordered by index
    async fn get_shares(&self, tenant_id: &str) -> Result<Vec<String>, Self::Error>;

    /// Replace every share held for a tenant
    async fn put_shares(&self, tenant_id: &str, shares: Vec<(u8, String)>)
        -> Result<(), Self::Error>;

    /// Write a key and its shares together or not at all
    async fn put_key_material(
        &self,
        tenant_id: &str,
        key: String,
        shares: Vec<(u8, String)>,
    ) -> Result<(), Self::Error>;

    /// Remove a tenant's key and all of its shares
    ///
    /// # Returns
    /// * `Ok(true)` - something was removed
    async fn delete_key_material(&self, tenant_id: &str) -> Result<bool, Self::Error>;

    /// Store `candidate` as the device id unless one already exists, and
    ///  return whichever id is stored afterwards
    async fn get_or_insert_device_id(&self, candidate: &str) -> Result<String, Self::Error>;

    async fn append_audit(&self, tenant_id: &str, sealed: String) -> Result<(), Self::Error>;

    /// Sealed audit records for a tenant, in insertion order
    async fn audit_records(&self, tenant_id: &str) -> Result<Vec<String>, Self::Error>;
}

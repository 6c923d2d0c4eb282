use async_trait::async_trait;
use sqlx::Row;

use common::vault::VaultBackend;

use super::{Database, DatabaseError};

#[async_trait]
impl VaultBackend for Database {
    type Error = DatabaseError;

    async fn probe(&self) -> Result<(), Self::Error> {
        sqlx::query("SELECT 1").execute(&**self).await?;
        Ok(())
    }

    async fn request_persistence(&self) -> Result<bool, Self::Error> {
        Ok(self.durable)
    }

    async fn get_key(&self, tenant_id: &str) -> Result<Option<String>, Self::Error> {
        let row = sqlx::query(
            r#"
            SELECT sealed FROM key_entries WHERE tenant_id = ?
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&**self)
        .await?;

        Ok(row.map(|r| r.get("sealed")))
    }

    async fn put_key(&self, tenant_id: &str, sealed: String) -> Result<(), Self::Error> {
        upsert_key(&**self, tenant_id, &sealed).await
    }

    async fn get_shares(&self, tenant_id: &str) -> Result<Vec<String>, Self::Error> {
        let rows = sqlx::query(
            r#"
            SELECT sealed FROM share_entries
            WHERE tenant_id = ?
            ORDER BY share_index ASC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&**self)
        .await?;

        Ok(rows.iter().map(|r| r.get("sealed")).collect())
    }

    async fn put_shares(
        &self,
        tenant_id: &str,
        shares: Vec<(u8, String)>,
    ) -> Result<(), Self::Error> {
        let mut tx = self.begin().await?;
        replace_shares(&mut tx, tenant_id, &shares).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn put_key_material(
        &self,
        tenant_id: &str,
        key: String,
        shares: Vec<(u8, String)>,
    ) -> Result<(), Self::Error> {
        let mut tx = self.begin().await?;
        upsert_key(&mut *tx, tenant_id, &key).await?;
        replace_shares(&mut tx, tenant_id, &shares).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_key_material(&self, tenant_id: &str) -> Result<bool, Self::Error> {
        let mut tx = self.begin().await?;
        let keys = sqlx::query("DELETE FROM key_entries WHERE tenant_id = ?")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;
        let shares = sqlx::query("DELETE FROM share_entries WHERE tenant_id = ?")
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(keys.rows_affected() + shares.rows_affected() > 0)
    }

    async fn get_or_insert_device_id(&self, candidate: &str) -> Result<String, Self::Error> {
        sqlx::query(
            r#"
            INSERT INTO device (id, device_id) VALUES (1, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(candidate)
        .execute(&**self)
        .await?;

        let row = sqlx::query("SELECT device_id FROM device WHERE id = 1")
            .fetch_one(&**self)
            .await?;
        Ok(row.get("device_id"))
    }

    async fn append_audit(&self, tenant_id: &str, sealed: String) -> Result<(), Self::Error> {
        sqlx::query("INSERT INTO audit_log (tenant_id, sealed) VALUES (?, ?)")
            .bind(tenant_id)
            .bind(sealed)
            .execute(&**self)
            .await?;
        Ok(())
    }

    async fn audit_records(&self, tenant_id: &str) -> Result<Vec<String>, Self::Error> {
        let rows = sqlx::query(
            r#"
            SELECT sealed FROM audit_log
            WHERE tenant_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&**self)
        .await?;

        Ok(rows.iter().map(|r| r.get("sealed")).collect())
    }
}

async fn upsert_key<'e, E>(executor: E, tenant_id: &str, sealed: &str) -> Result<(), DatabaseError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO key_entries (tenant_id, sealed, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(tenant_id) DO UPDATE SET
            sealed = excluded.sealed,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(tenant_id)
    .bind(sealed)
    .bind(chrono::Utc::now().timestamp())
    .execute(executor)
    .await?;
    Ok(())
}

async fn replace_shares(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    tenant_id: &str,
    shares: &[(u8, String)],
) -> Result<(), DatabaseError> {
    sqlx::query("DELETE FROM share_entries WHERE tenant_id = ?")
        .bind(tenant_id)
        .execute(&mut **tx)
        .await?;

    for (index, sealed) in shares {
        sqlx::query(
            r#"
            INSERT INTO share_entries (tenant_id, share_index, sealed)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(tenant_id)
        .bind(i64::from(*index))
        .bind(sealed)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

use clap::Args;

use common::cloud::CLOUD_SHARE_COUNT;

use super::CloudOpError;

#[derive(Args, Debug, Clone)]
pub struct Backup {
    /// Account the backup belongs to
    #[arg(long)]
    pub user: String,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Backup {
    type Error = CloudOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (app, tenant) = ctx.open().await?;
        if !app.cloud.is_configured() {
            return Err(CloudOpError::NotConfigured);
        }

        let shares = app.escrow.get_backup_shares(&tenant).await?;
        app.cloud.backup_shares(&shares, &tenant, &self.user).await?;

        Ok(format!(
            "Backed up shares {} to the cloud for tenant {}\nKeep at least one other share yourself; the cloud copy alone cannot recover the key",
            shares[..CLOUD_SHARE_COUNT]
                .iter()
                .map(|s| s.index().to_string())
                .collect::<Vec<_>>()
                .join(" and "),
            tenant
        ))
    }
}

use clap::Args;

use super::CloudOpError;

#[derive(Args, Debug, Clone)]
pub struct Fetch {
    #[arg(long)]
    pub user: String,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Fetch {
    type Error = CloudOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (app, tenant) = ctx.open().await?;
        if !app.cloud.is_configured() {
            return Err(CloudOpError::NotConfigured);
        }

        let shares = app
            .cloud
            .get_cloud_shares(&tenant, &self.user)
            .await?
            .ok_or_else(|| CloudOpError::NoBackup {
                user: self.user.clone(),
                tenant: tenant.clone(),
            })?;

        Ok(shares
            .iter()
            .map(|share| format!("{}: {}", share.index(), share.to_hex()))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}

use clap::Args;

use common::cloud::combine_for_recovery;
use common::crypto::Share;

use super::CloudOpError;

#[derive(Args, Debug, Clone)]
pub struct Recover {
    #[arg(long)]
    pub user: String,

    /// A share kept outside the cloud, hex-encoded; may be repeated
    #[arg(long = "local-share", required = true)]
    pub local_shares: Vec<String>,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Recover {
    type Error = CloudOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let local = self
            .local_shares
            .iter()
            .map(|hex| {
                let hex = hex.rsplit(':').next().unwrap_or(hex);
                Share::from_hex(hex).map_err(|e| CloudOpError::InvalidShare(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (app, tenant) = ctx.open().await?;
        if !app.cloud.is_configured() {
            return Err(CloudOpError::NotConfigured);
        }

        let cloud = app
            .cloud
            .get_cloud_shares(&tenant, &self.user)
            .await?
            .ok_or_else(|| CloudOpError::NoBackup {
                user: self.user.clone(),
                tenant: tenant.clone(),
            })?;

        let shares = combine_for_recovery(&cloud, &local)?;
        app.escrow.recover_from_shares(&tenant, &shares).await?;

        Ok(format!(
            "Recovered master secret for tenant {} from {} cloud and 1 local share",
            tenant,
            shares.len() - 1
        ))
    }
}

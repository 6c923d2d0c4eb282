use clap::Args;

use super::CloudOpError;

#[derive(Args, Debug, Clone)]
pub struct Delete {
    #[arg(long)]
    pub user: String,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Delete {
    type Error = CloudOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (app, tenant) = ctx.open().await?;
        if !app.cloud.is_configured() {
            return Err(CloudOpError::NotConfigured);
        }

        if app.cloud.delete_cloud_backup(&tenant, &self.user).await? {
            Ok(format!("Deleted cloud backup for tenant {}", tenant))
        } else {
            Ok(format!("No cloud backup to delete for tenant {}", tenant))
        }
    }
}

use clap::Args;

use super::CloudOpError;

#[derive(Args, Debug, Clone)]
pub struct Status {
    #[arg(long)]
    pub user: String,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Status {
    type Error = CloudOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (app, tenant) = ctx.open().await?;
        if !app.cloud.is_configured() {
            return Ok("Cloud backup is not configured".to_string());
        }

        let info = app.cloud.get_backup_info(&tenant, &self.user).await?;
        if !info.exists {
            return Ok(format!(
                "No cloud backup for user {} and tenant {}",
                self.user, tenant
            ));
        }

        let mut lines = vec![format!("cloud backup for {} / {}", self.user, tenant)];
        if let Some(version) = info.version {
            lines.push(format!("version: {}", version));
        }
        if let Some(updated_at) = info.updated_at {
            lines.push(format!("updated: {}", updated_at.to_rfc3339()));
        }
        if let Some(fingerprint) = info.device_fingerprint {
            lines.push(format!("device:  {}", fingerprint));
        }
        Ok(lines.join("\n"))
    }
}

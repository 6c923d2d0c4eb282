use clap::Args;

use super::KeyError;

#[derive(Args, Debug, Clone)]
pub struct Info;

#[async_trait::async_trait]
impl crate::cli::op::Op for Info {
    type Error = KeyError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (app, tenant) = ctx.open().await?;
        let info = app.escrow.get_key_info(&tenant).await?;

        if !info.exists {
            return Ok(format!(
                "No master secret for tenant {} ({} storage)",
                tenant, info.storage_mode
            ));
        }

        let mut lines = vec![format!("tenant:        {}", tenant)];
        if let Some(version) = info.version {
            lines.push(format!("version:       {}", version));
        }
        if let Some(created_at) = info.created_at {
            lines.push(format!("created:       {}", created_at.to_rfc3339()));
        }
        if let Some(accessed) = info.last_accessed_at {
            lines.push(format!("last accessed: {}", accessed.to_rfc3339()));
        }
        lines.push(format!("storage:       {}", info.storage_mode));
        Ok(lines.join("\n"))
    }
}

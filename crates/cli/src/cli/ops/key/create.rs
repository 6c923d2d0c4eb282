use clap::Args;

use super::KeyError;

#[derive(Args, Debug, Clone)]
pub struct Create {
    /// Also print the master secret as hex
    #[arg(long)]
    pub reveal: bool,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Create {
    type Error = KeyError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (app, tenant) = ctx.open().await?;
        let existed = app.escrow.has_key(&tenant).await?;
        let secret = app.escrow.get_or_create_master_secret(&tenant).await?;

        let mut output = if existed {
            format!("Tenant {} already has a master secret", tenant)
        } else {
            format!(
                "Created master secret for tenant {} ({} storage)\nExport its recovery shares with 'sentinel key shares'",
                tenant,
                app.storage_mode()
            )
        };
        if self.reveal {
            output.push_str(&format!("\n{}", secret.to_hex()));
        }
        Ok(output)
    }
}

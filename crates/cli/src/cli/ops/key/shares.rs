use clap::Args;

use common::crypto::THRESHOLD;

use super::KeyError;

#[derive(Args, Debug, Clone)]
pub struct Shares;

#[async_trait::async_trait]
impl crate::cli::op::Op for Shares {
    type Error = KeyError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (app, tenant) = ctx.open().await?;
        let shares = app.escrow.get_backup_shares(&tenant).await?;

        let mut lines = vec![format!(
            "{} recovery shares for tenant {}; any {} of them rebuild the key",
            shares.len(),
            tenant,
            THRESHOLD
        )];
        lines.extend(
            shares
                .iter()
                .map(|share| format!("{}: {}", share.index(), share.to_hex())),
        );
        Ok(lines.join("\n"))
    }
}

use clap::Args;

use super::KeyError;

#[derive(Args, Debug, Clone)]
pub struct Rotate;

#[async_trait::async_trait]
impl crate::cli::op::Op for Rotate {
    type Error = KeyError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let (app, tenant) = ctx.open().await?;
        app.escrow.rotate_key(&tenant).await?;
        let info = app.escrow.get_key_info(&tenant).await?;

        Ok(format!(
            "Rotated master secret for tenant {} (now version {})\nPreviously exported shares and ciphertexts no longer match; export new shares",
            tenant,
            info.version.unwrap_or(1)
        ))
    }
}

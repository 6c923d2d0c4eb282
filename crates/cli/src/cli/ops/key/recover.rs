use clap::Args;

use common::crypto::Share;

use super::KeyError;

#[derive(Args, Debug, Clone)]
pub struct Recover {
    /// Hex-encoded recovery shares, at least as many as the threshold
    #[arg(required = true)]
    pub shares: Vec<String>,
}

impl Recover {
    fn parse(&self) -> Result<Vec<Share>, KeyError> {
        self.shares
            .iter()
            .enumerate()
            .map(|(position, hex)| {
                // accept the "index: hex" lines printed by `key shares`
                let hex = hex.rsplit(':').next().unwrap_or(hex);
                Share::from_hex(hex).map_err(|e| KeyError::InvalidShare {
                    position: position + 1,
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Recover {
    type Error = KeyError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let shares = self.parse()?;
        let (app, tenant) = ctx.open().await?;
        app.escrow.recover_from_shares(&tenant, &shares).await?;
        Ok(format!(
            "Recovered master secret for tenant {} from {} shares",
            tenant,
            shares.len()
        ))
    }
}

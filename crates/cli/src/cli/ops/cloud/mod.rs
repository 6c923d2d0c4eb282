use clap::{Args, Subcommand};

pub mod backup;
pub mod delete;
pub mod fetch;
pub mod recover;
pub mod status;

use crate::cli::op::Op;
use common::cloud::CloudError;
use common::escrow::EscrowError;
use sentinel_cli::AppError;

crate::command_enum! {
    (Backup, backup::Backup),
    (Fetch, fetch::Fetch),
    (Status, status::Status),
    (Delete, delete::Delete),
    (Recover, recover::Recover),
}

// Rename the generated Command to CloudCommand for clarity
pub type CloudCommand = Command;

#[derive(Args, Debug, Clone)]
pub struct Cloud {
    #[command(subcommand)]
    pub command: CloudCommand,
}

#[async_trait::async_trait]
impl Op for Cloud {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CloudOpError {
    #[error(transparent)]
    App(#[from] AppError),
    #[error(transparent)]
    Escrow(#[from] EscrowError),
    #[error(transparent)]
    Cloud(#[from] CloudError),
    #[error("no remote store configured; set remote_url in config.toml")]
    NotConfigured,
    #[error("no cloud backup found for user {user} and tenant {tenant}")]
    NoBackup { user: String, tenant: String },
    #[error("invalid local share: {0}")]
    InvalidShare(String),
}

use clap::{Args, Subcommand};

pub mod create;
pub mod info;
pub mod recover;
pub mod rotate;
pub mod shares;

use crate::cli::op::Op;
use common::escrow::EscrowError;
use sentinel_cli::AppError;

crate::command_enum! {
    (Create, create::Create),
    (Info, info::Info),
    (Shares, shares::Shares),
    (Recover, recover::Recover),
    (Rotate, rotate::Rotate),
}

// Rename the generated Command to KeyCommand for clarity
pub type KeyCommand = Command;

#[derive(Args, Debug, Clone)]
pub struct Key {
    #[command(subcommand)]
    pub command: KeyCommand,
}

#[async_trait::async_trait]
impl Op for Key {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error(transparent)]
    App(#[from] AppError),
    #[error(transparent)]
    Escrow(#[from] EscrowError),
    #[error("invalid share {position}: {reason}")]
    InvalidShare { position: usize, reason: String },
}

use std::path::PathBuf;

use clap::Args;

use common::crypto::SealError;
use sentinel_cli::{AppState, StateError};

#[derive(Args, Debug, Clone)]
pub struct Seal {
    /// JSON file to seal
    pub file: PathBuf,

    /// Write the envelope here instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct Open {
    /// Sealed envelope to verify and open
    pub file: PathBuf,

    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum SealOpError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Seal(#[from] SealError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} is not valid JSON: {1}")]
    NotJson(PathBuf, serde_json::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Sealing only needs the key, not the vault
fn sealer(ctx: &crate::cli::op::OpContext) -> Result<common::crypto::Sealer, SealOpError> {
    let state = AppState::load(ctx.config_path.clone())?;
    Ok(common::crypto::Sealer::new(state.load_key()?))
}

fn emit(output: &Option<PathBuf>, contents: String) -> Result<String, SealOpError> {
    match output {
        Some(path) => {
            std::fs::write(path, contents)?;
            Ok(format!("Wrote {}", path.display()))
        }
        None => Ok(contents),
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Seal {
    type Error = SealOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let raw = tokio::fs::read_to_string(&self.file).await?;
        let payload: serde_json::Value =
            serde_json::from_str(&raw).map_err(|e| SealOpError::NotJson(self.file.clone(), e))?;

        let envelope = sealer(ctx)?.seal(payload)?;
        emit(&self.output, serde_json::to_string_pretty(&envelope)?)
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Open {
    type Error = SealOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let raw = tokio::fs::read_to_string(&self.file).await?;
        let payload: serde_json::Value = sealer(ctx)?.open_str(&raw)?;
        emit(&self.output, serde_json::to_string_pretty(&payload)?)
    }
}

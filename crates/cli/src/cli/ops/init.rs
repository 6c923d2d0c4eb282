use clap::Args;
use url::Url;

use sentinel_cli::{AppConfig, AppState, Database, DatabaseSetupError, StateError};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Base URL of the remote share store, for cloud backups
    #[arg(long)]
    pub remote_url: Option<Url>,

    /// Tenant used when --tenant is not given
    #[arg(long)]
    pub default_tenant: Option<String>,

    /// Directory for a daily rolling log file
    #[arg(long)]
    pub log_dir: Option<std::path::PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Database(#[from] DatabaseSetupError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut config = AppConfig {
            remote_url: self.remote_url.clone(),
            log_dir: self.log_dir.clone(),
            ..Default::default()
        };
        if let Some(tenant) = &self.default_tenant {
            config.default_tenant = tenant.clone();
        }

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;
        // run the migrations now so a broken install shows up here
        Database::connect(&state.db_path).await?;

        let mut output = format!(
            "Initialized sentinel directory at {}",
            state.sentinel_dir.display()
        );
        if state.config.remote_url.is_none() {
            output.push_str("\nNo remote store configured; cloud backup is disabled");
        }
        Ok(output)
    }
}

pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sentinel")]
#[command(about = "Threshold key escrow with tamper-evident local storage")]
#[command(version)]
pub struct Args {
    /// Path to the sentinel state directory (defaults to ~/.sentinel)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    /// Tenant whose key to use (defaults to `default_tenant` in config.toml)
    #[arg(long, global = true, env = "SENTINEL_DEFAULT_TENANT")]
    pub tenant: Option<String>,

    #[command(subcommand)]
    pub command: crate::Command,
}

// CLI modules
mod cli;

use clap::{Parser, Subcommand};
use cli::{args::Args, op::Op, Audit, Cloud, Decrypt, Encrypt, Init, Key, Open, Seal, Version};
use sentinel_cli::{logging, AppConfig, AppState};

command_enum! {
    (Init, Init),
    (Key, Key),
    (Seal, Seal),
    (Open, Open),
    (Encrypt, Encrypt),
    (Decrypt, Decrypt),
    (Cloud, Cloud),
    (Audit, Audit),
    (Version, Version),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Log with the configured level when there is a config to read
    let config = AppState::load(args.config_path.clone())
        .map(|state| state.config)
        .unwrap_or_else(|_| AppConfig::default());
    let guards = logging::init_logging(&config);

    let ctx = cli::op::OpContext::new(args.config_path, args.tenant);

    // exit() skips destructors, so the log guards are flushed first
    let code = match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };
    drop(guards);
    std::process::exit(code);
}

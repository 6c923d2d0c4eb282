use std::error::Error;
use std::path::PathBuf;

use sentinel_cli::{AppError, AppState, Sentinel};

#[derive(Debug, Clone)]
pub struct OpContext {
    /// Optional custom state directory (defaults to ~/.sentinel)
    pub config_path: Option<PathBuf>,
    /// Tenant to act on, falling back to the configured default
    pub tenant: Option<String>,
}

impl OpContext {
    pub fn new(config_path: Option<PathBuf>, tenant: Option<String>) -> Self {
        Self {
            config_path,
            tenant,
        }
    }

    /// Load state and wire up the vault, escrow and cloud handles
    pub async fn open(&self) -> Result<(Sentinel, String), AppError> {
        let state = AppState::load(self.config_path.clone())?;
        let app = Sentinel::open(state).await?;
        let tenant = app.tenant(self.tenant.as_deref());
        Ok((app, tenant))
    }
}

#[async_trait::async_trait]
pub trait Op: Send + Sync {
    type Error: Error + Send + Sync + 'static;
    type Output;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

/// Build a `Command` subcommand enum from `(Variant, Op)` pairs
///
/// Alongside it come `OpOutput` and `OpError`, one variant per op, and an
/// `Op` impl on `Command` that dispatches to whichever op was parsed.
#[macro_export]
macro_rules! command_enum {
    ($(($name:ident, $op:ty)),* $(,)?) => {
        #[derive(Subcommand, Debug, Clone)]
        pub enum Command {
            $($name($op),)*
        }

        impl Command {
            /// Variant name of the parsed subcommand, used in logs
            pub fn name(&self) -> &'static str {
                match self {
                    $(Command::$name(_) => stringify!($name),)*
                }
            }
        }

        #[derive(Debug)]
        pub enum OpOutput {
            $($name(<$op as $crate::cli::op::Op>::Output),)*
        }

        impl std::fmt::Display for OpOutput {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(OpOutput::$name(inner) => std::fmt::Display::fmt(inner, f),)*
                }
            }
        }

        #[derive(Debug, thiserror::Error)]
        pub enum OpError {
            $(#[error(transparent)] $name(<$op as $crate::cli::op::Op>::Error),)*
        }

        #[async_trait::async_trait]
        impl $crate::cli::op::Op for Command {
            type Error = OpError;
            type Output = OpOutput;

            async fn execute(
                &self,
                ctx: &$crate::cli::op::OpContext,
            ) -> Result<OpOutput, OpError> {
                tracing::debug!(command = self.name(), "dispatching");
                let result = match self {
                    $(Command::$name(op) => match op.execute(ctx).await {
                        Ok(output) => Ok(OpOutput::$name(output)),
                        Err(e) => Err(OpError::$name(e)),
                    },)*
                };
                if let Err(e) = &result {
                    tracing::debug!(command = self.name(), "command failed: {}", e);
                }
                result
            }
        }
    };
}

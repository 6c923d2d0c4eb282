use std::{fs, path::PathBuf, time::Duration};

use common::cloud::RetryPolicy;
use common::crypto::SealingKey;
use common::vault::VaultOptions;
use serde::{Deserialize, Serialize};
use url::Url;

pub const APP_NAME: &str = "sentinel";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "db.sqlite";
pub const KEY_FILE_NAME: &str = "seal.key";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default log level, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Write a daily rolling log file here as well as to stderr
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Tenant used when `--tenant` is not given
    #[serde(default = "default_tenant")]
    pub default_tenant: String,
    /// Base URL of the remote share store; cloud backup is off without it
    #[serde(default)]
    pub remote_url: Option<Url>,
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,
    #[serde(default = "default_remote_max_attempts")]
    pub remote_max_attempts: u32,
    /// Keep working in memory if the database cannot be opened
    #[serde(default = "default_session_fallback")]
    pub session_fallback: bool,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_tenant() -> String {
    "default".to_string()
}

fn default_remote_timeout_secs() -> u64 {
    10
}

fn default_remote_max_attempts() -> u32 {
    3
}

fn default_session_fallback() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_dir: None,
            default_tenant: default_tenant(),
            remote_url: None,
            remote_timeout_secs: default_remote_timeout_secs(),
            remote_max_attempts: default_remote_max_attempts(),
            session_fallback: default_session_fallback(),
        }
    }
}

impl AppConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(self.remote_timeout_secs),
            max_attempts: self.remote_max_attempts,
            ..Default::default()
        }
    }

    pub fn vault_options(&self) -> VaultOptions {
        VaultOptions {
            session_fallback: self.session_fallback,
        }
    }

    pub fn log_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::WARN)
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the sentinel directory (~/.sentinel)
    pub sentinel_dir: PathBuf,
    /// Path to the SQLite vault
    pub db_path: PathBuf,
    /// Path to the hex-encoded sealing key
    pub key_path: PathBuf,
    pub config_path: PathBuf,
    pub config: AppConfig,
}

impl AppState {
    /// Get the sentinel directory path (custom or default ~/.sentinel)
    pub fn sentinel_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new sentinel state directory
    pub fn init(
        custom_path: Option<PathBuf>,
        config: Option<AppConfig>,
    ) -> Result<Self, StateError> {
        let sentinel_dir = Self::sentinel_dir(custom_path)?;

        if sentinel_dir.join(CONFIG_FILE_NAME).exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&sentinel_dir)?;

        let key = SealingKey::generate().map_err(|e| StateError::InvalidKey(e.to_string()))?;
        let key_path = sentinel_dir.join(KEY_FILE_NAME);
        write_private(&key_path, &key.to_hex())?;

        let config = config.unwrap_or_default();
        let config_path = sentinel_dir.join(CONFIG_FILE_NAME);
        let config_toml = toml::to_string_pretty(&config)?;
        fs::write(&config_path, config_toml)?;

        // schema is created by the migrations on first connect
        let db_path = sentinel_dir.join(DB_FILE_NAME);
        fs::write(&db_path, "")?;

        Ok(Self {
            sentinel_dir,
            db_path,
            key_path,
            config_path,
            config,
        })
    }

    /// Load existing state from the sentinel directory
    ///
    /// A missing database is not an error here; the vault decides what to
    /// do about it when it opens.
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let sentinel_dir = Self::sentinel_dir(custom_path)?;

        if !sentinel_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let db_path = sentinel_dir.join(DB_FILE_NAME);
        let key_path = sentinel_dir.join(KEY_FILE_NAME);
        let config_path = sentinel_dir.join(CONFIG_FILE_NAME);

        if !key_path.exists() {
            return Err(StateError::MissingFile(KEY_FILE_NAME.to_string()));
        }
        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }

        let config_toml = fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&config_toml)?;

        Ok(Self {
            sentinel_dir,
            db_path,
            key_path,
            config_path,
            config,
        })
    }

    /// Load the sealing key from the key file
    pub fn load_key(&self) -> Result<SealingKey, StateError> {
        let hex = fs::read_to_string(&self.key_path)?;
        SealingKey::from_hex(hex.trim()).map_err(|e| StateError::InvalidKey(e.to_string()))
    }
}

#[cfg(unix)]
fn write_private(path: &std::path::Path, contents: &str) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents.as_bytes())
}

#[cfg(not(unix))]
fn write_private(path: &std::path::Path, contents: &str) -> std::io::Result<()> {
    fs::write(path, contents)
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("sentinel directory not initialized. Run 'sentinel init' first")]
    NotInitialized,

    #[error("sentinel directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("invalid sealing key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

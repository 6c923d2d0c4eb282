// App state (configuration, paths)
pub mod state;

// Service wiring
pub mod app;
pub mod database;
pub mod logging;
pub mod remote;

pub use app::{AppError, Sentinel};
pub use database::{Database, DatabaseError, DatabaseSetupError};
pub use remote::HttpRemoteStore;
pub use state::{AppConfig, AppState, StateError};

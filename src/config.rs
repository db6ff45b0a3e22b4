//! Configuration module for the regtrace service.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Server settings (port, bind address)
//! - Database settings (path, pool size, bounded waits)
//! - Polling parameters shared by every worker
//! - Devices to monitor at startup

mod app;
mod validation;

pub use app::{AppConfig, DatabaseConfig, ServerConfig};
pub use validation::{ConfigError, expand_env_vars, parse_duration};

// Re-export constants
pub use app::{DEFAULT_DB_PATH, DEFAULT_POOL_SIZE, MIN_POLL_INTERVAL};

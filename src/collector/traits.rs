//! Core collector traits and types.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::{CollectionName, StorageError};

/// Standard Modbus TCP port.
pub const DEFAULT_PORT: u16 = 502;

/// Default poll interval between cycles.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Default bound on establishing a session.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on a single register read.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(3);

/// Largest register block a single Modbus read may request.
pub const MAX_REGISTER_COUNT: u16 = 125;

/// Errors that can occur while acquiring data from devices.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Session establishment failed; no worker was created.
    #[error("connection to {device} failed: {reason}")]
    Connection { device: String, reason: String },

    /// Storage backend failed or timed out.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Device identifier cannot be monitored.
    #[error("invalid device identifier: {0}")]
    InvalidDevice(String),

    /// Device already has a pending or live worker.
    #[error("device {0} is already monitored")]
    AlreadyMonitored(String),

    /// Another live device already writes into the derived collection.
    #[error("device {device} maps to collection {collection} already used by {existing}")]
    CollectionConflict {
        device: String,
        existing: String,
        collection: CollectionName,
    },

    /// Device is not registered.
    #[error("device {0} is not monitored")]
    NotMonitored(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Registry has shut down and accepts no more devices.
    #[error("registry is shut down")]
    ShuttingDown,
}

/// Failure reported by a protocol session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Device replied with a protocol exception.
    #[error("device exception: {0}")]
    Exception(String),

    /// Network I/O error or malformed frame.
    #[error("network error: {0}")]
    Transport(#[from] std::io::Error),

    /// Timeout elapsed.
    #[error("timeout elapsed")]
    Timeout,
}

/// Polling parameters supplied to each worker at spawn time.
///
/// Defaults reproduce the classic target: 10 holding registers from address
/// 0 on port 502, every 5 seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    /// Device TCP port.
    pub port: u16,
    /// Modbus unit identifier.
    pub unit_id: u8,
    /// First holding register to read.
    pub base_address: u16,
    /// Number of consecutive registers per cycle.
    pub register_count: u16,
    /// Pause between cycles.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Bound on opening a session.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Bound on each read.
    #[serde(with = "humantime_serde")]
    pub io_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            unit_id: 1,
            base_address: 0,
            register_count: 10,
            interval: DEFAULT_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

impl PollSettings {
    /// Set the device port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the register block to read.
    pub fn with_block(mut self, base_address: u16, register_count: u16) -> Self {
        self.base_address = base_address;
        self.register_count = register_count;
        self
    }

    /// Set the poll interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read timeout.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Validate the settings.
    ///
    /// # Errors
    /// Returns `CollectorError::Config` describing the first invalid field.
    pub fn validate(&self) -> Result<(), CollectorError> {
        if self.register_count == 0 || self.register_count > MAX_REGISTER_COUNT {
            return Err(CollectorError::Config(format!(
                "register_count must be within 1..={MAX_REGISTER_COUNT}, got {}",
                self.register_count
            )));
        }
        if u32::from(self.base_address) + u32::from(self.register_count) > 65_536 {
            return Err(CollectorError::Config(format!(
                "register block {}+{} exceeds the address space",
                self.base_address, self.register_count
            )));
        }
        if self.interval.is_zero() {
            return Err(CollectorError::Config("interval must be non-zero".to_string()));
        }
        if self.connect_timeout.is_zero() || self.io_timeout.is_zero() {
            return Err(CollectorError::Config("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// An open protocol session with one device.
///
/// Owned by exactly one worker; never shared.
#[async_trait::async_trait]
pub trait RegisterSession: Send + 'static {
    /// Read `count` holding registers starting at `address`.
    async fn read_holding_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, SessionError>;

    /// Release the session. Errors are logged, not returned.
    async fn close(&mut self);
}

/// Opens protocol sessions to devices.
#[async_trait::async_trait]
pub trait SessionConnector: Send + Sync + 'static {
    /// Connect to `device` using the port and unit id in `settings`.
    async fn connect(
        &self,
        device: &str,
        settings: &PollSettings,
    ) -> Result<Box<dyn RegisterSession>, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_settings_defaults() {
        let settings = PollSettings::default();
        assert_eq!(settings.port, 502);
        assert_eq!(settings.base_address, 0);
        assert_eq!(settings.register_count, 10);
        assert_eq!(settings.interval, Duration::from_secs(5));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_poll_settings_rejects_bad_block() {
        assert!(PollSettings::default().with_block(0, 0).validate().is_err());
        assert!(PollSettings::default().with_block(0, 126).validate().is_err());
        assert!(PollSettings::default().with_block(65_530, 10).validate().is_err());
        assert!(PollSettings::default().with_block(65_526, 10).validate().is_ok());
    }

    #[test]
    fn test_poll_settings_rejects_zero_durations() {
        let err = PollSettings::default()
            .with_interval(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("interval"));
        assert!(PollSettings::default()
            .with_io_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_poll_settings_yaml_humantime() {
        let settings: PollSettings =
            serde_yaml::from_str("interval: 250ms\nregister_count: 4\n").unwrap();
        assert_eq!(settings.interval, Duration::from_millis(250));
        assert_eq!(settings.register_count, 4);
        assert_eq!(settings.port, DEFAULT_PORT);
    }
}

//! regtrace - Modbus Register Acquisition
//!
//! Polls blocks of holding registers from Modbus TCP devices, one worker per
//! device, and appends every poll cycle to a per-device collection in SQLite.
//! Stored readings can be read back as a flat window or pivoted into a table
//! of timestamps by register address.
//!
//! # Architecture
//!
//! - **Collector**: protocol sessions, polling workers and the device registry
//! - **Storage**: SQLite persistence with bounded waits
//! - **Projector**: pivot of reading windows
//! - **Server**: JSON API over the registry and the store
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use regtrace::{DeviceRegistry, ModbusConnector, PollSettings, StorageBuilder, project};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let handles = StorageBuilder::new("data/regtrace.db").build().await?;
//! let registry = DeviceRegistry::new(
//!     Arc::new(ModbusConnector::new()),
//!     handles.store.clone(),
//!     PollSettings::default(),
//! )?;
//!
//! let worker = registry.add("192.168.0.10").await?;
//! let recent = handles.store.query_recent(worker.collection(), 100).await?;
//! let table = project(&recent);
//! println!("{} cycles over {} registers", table.rows.len(), table.columns.len());
//!
//! registry.shutdown().await;
//! handles.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod config;
pub mod projector;
pub mod server;
pub mod storage;

pub use collector::{
    CollectorError, DeviceEvent, DeviceEventKind, DeviceRegistry, DeviceStatus, ExitReason,
    ModbusConnector, PollSettings, PollingWorker, WorkerHandle, WorkerState,
};
pub use config::{AppConfig, ConfigError};
pub use projector::{CollisionPolicy, PivotRow, PivotTable, project, project_with};
pub use storage::{
    CollectionName, Reading, ReadingStore, StorageBuilder, StorageError, StorageHandles, sanitize,
};

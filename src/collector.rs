//! Collector Layer
//!
//! Acquisition of holding registers from Modbus TCP devices. Each monitored
//! device gets one polling worker running in its own Tokio task and writing
//! into its own collection.
//!
//! # Architecture
//!
//! - [`SessionConnector`] / [`RegisterSession`]: protocol seam, implemented by
//!   [`ModbusConnector`]
//! - [`PollingWorker`]: per-device state machine, observed via [`WorkerHandle`]
//! - [`DeviceRegistry`]: owns the device map and worker lifecycle
//! - [`DeviceEvent`]: broadcast notifications for connection and worker failures
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use regtrace::{DeviceRegistry, ModbusConnector, PollSettings, StorageBuilder};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let handles = StorageBuilder::new("/tmp/regtrace.db").build().await?;
//! let registry = DeviceRegistry::new(
//!     Arc::new(ModbusConnector::new()),
//!     handles.store.clone(),
//!     PollSettings::default(),
//! )?;
//! registry.add("192.168.0.10").await?;
//! # Ok(())
//! # }
//! ```

mod events;
#[cfg(test)]
pub(crate) mod mock;
mod modbus;
mod registry;
mod traits;
mod worker;

pub use events::{DEFAULT_EVENT_CAPACITY, DeviceEvent, DeviceEventKind, EventSender, EventSeverity};
pub use modbus::{ModbusConnector, ModbusSession};
pub use registry::{DEFAULT_SHUTDOWN_TIMEOUT, DeviceRegistry, DeviceStatus};
pub use traits::{
    CollectorError, DEFAULT_CONNECT_TIMEOUT, DEFAULT_INTERVAL, DEFAULT_IO_TIMEOUT, DEFAULT_PORT,
    MAX_REGISTER_COUNT, PollSettings, RegisterSession, SessionConnector, SessionError,
};
pub use worker::{ExitReason, PollingWorker, WorkerHandle, WorkerState};

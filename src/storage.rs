//! Storage Layer
//!
//! SQLite persistence for device readings with bounded waits:
//! - **Collections**: one logical collection per device, named by [`sanitize`]
//! - **Readings**: a single append-only table keyed by collection
//!
//! # Components
//!
//! - [`ReadingStore`]: ensure/append/query facade shared by workers and readers
//! - [`StorageBuilder`] / [`StorageHandles`]: initialization and lifecycle management
//! - [`sanitize`] / [`CollectionName`]: device identifier to collection mapping

mod builder;
pub mod collection;
pub mod db;
mod error;
mod readings;
mod schema;
mod types;

pub use builder::{StorageBuilder, StorageHandles};
pub use collection::{COLLECTION_PREFIX, CollectionName, sanitize};
pub use error::StorageError;
pub use readings::{DEFAULT_LIMIT, MAX_LIMIT, ReadingStore};
pub use types::{Reading, poll_cycle};

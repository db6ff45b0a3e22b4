//! Device registry for managing polling worker lifecycle.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collector::events::{DeviceEvent, EventSender};
use crate::collector::traits::{CollectorError, PollSettings, SessionConnector};
use crate::collector::worker::{ExitReason, PollingWorker, WorkerHandle, WorkerState};
use crate::storage::{CollectionName, ReadingStore, sanitize};

/// Default timeout for a worker to stop after cancellation (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot of one monitored device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    pub device: String,
    pub collection: CollectionName,
    pub state: WorkerState,
}

enum Slot {
    /// Connection in flight; the identifier and collection are reserved.
    Pending { collection: CollectionName },
    Active {
        handle: WorkerHandle,
        join: JoinHandle<WorkerState>,
    },
    /// Cancelled, waiting for the task to finish.
    Stopping { handle: WorkerHandle },
}

impl Slot {
    fn collection(&self) -> &CollectionName {
        match self {
            Self::Pending { collection } => collection,
            Self::Active { handle, .. } | Self::Stopping { handle } => handle.collection(),
        }
    }

    /// Pending, polling or stopping. A terminated worker is stale.
    fn is_live(&self) -> bool {
        match self {
            Self::Pending { .. } | Self::Stopping { .. } => true,
            Self::Active { handle, .. } => !handle.is_terminated(),
        }
    }

    fn handle(&self) -> Option<&WorkerHandle> {
        match self {
            Self::Pending { .. } => None,
            Self::Active { handle, .. } | Self::Stopping { handle } => Some(handle),
        }
    }
}

/// Registry of polling workers, one per device.
///
/// The only owner of the device map. Workers report back exclusively through
/// their watch channel and the event broadcast.
pub struct DeviceRegistry {
    connector: Arc<dyn SessionConnector>,
    store: ReadingStore,
    settings: PollSettings,
    devices: RwLock<HashMap<String, Slot>>,
    events: EventSender,
    shutdown_timeout: Duration,
    /// Cancelled by `shutdown`; no worker is spawned afterwards.
    closed: CancellationToken,
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field(
                "device_count",
                &self.devices.try_read().map(|d| d.len()).unwrap_or(0),
            )
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DeviceRegistry {
    /// Create an empty registry. Every worker it spawns uses `settings`.
    ///
    /// # Errors
    /// Returns `CollectorError::Config` if `settings` are invalid.
    pub fn new(
        connector: Arc<dyn SessionConnector>,
        store: ReadingStore,
        settings: PollSettings,
    ) -> Result<Self, CollectorError> {
        settings.validate()?;
        Ok(Self {
            connector,
            store,
            settings,
            devices: RwLock::new(HashMap::new()),
            events: EventSender::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            closed: CancellationToken::new(),
        })
    }

    /// Set how long `stop` and `shutdown` wait before aborting a worker.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Subscribe to device events.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Start monitoring a device.
    ///
    /// Connects synchronously; a worker exists only if this returns `Ok`.
    /// A device whose previous worker terminated may be added again.
    ///
    /// # Errors
    /// - `InvalidDevice` if the identifier is empty, contains whitespace or
    ///   control characters, or has no digit to name a collection with.
    /// - `AlreadyMonitored` if the device has a pending or live worker.
    /// - `CollectionConflict` if another live device writes the same collection.
    /// - `Connection` / `Storage` if connecting or collection setup fails.
    /// - `ShuttingDown` once `shutdown` has started, even if the connection
    ///   was already in flight.
    pub async fn add(&self, identifier: &str) -> Result<WorkerHandle, CollectorError> {
        let device = validate_identifier(identifier)?;
        let collection = sanitize(&device);

        let previous = {
            let mut devices = self.devices.write().await;
            if self.closed.is_cancelled() {
                return Err(CollectorError::ShuttingDown);
            }
            if devices.get(&device).is_some_and(Slot::is_live) {
                return Err(CollectorError::AlreadyMonitored(device));
            }
            if let Some((existing, _)) = devices
                .iter()
                .find(|(id, slot)| **id != device && slot.is_live() && *slot.collection() == collection)
            {
                return Err(CollectorError::CollectionConflict {
                    existing: existing.clone(),
                    device,
                    collection,
                });
            }
            devices.insert(
                device.clone(),
                Slot::Pending {
                    collection: collection.clone(),
                },
            )
        };

        let connected = PollingWorker::connect(
            &device,
            self.settings.clone(),
            self.connector.as_ref(),
            self.store.clone(),
            self.events.clone(),
        )
        .await;

        let mut devices = self.devices.write().await;
        match connected {
            Ok(worker) if self.closed.is_cancelled() => {
                drop(devices);
                tracing::info!(device = %device, "Registry shut down while connecting");
                worker.discard().await;
                Err(CollectorError::ShuttingDown)
            }
            Ok(worker) => {
                let (handle, join) = worker.spawn();
                devices.insert(
                    device.clone(),
                    Slot::Active {
                        handle: handle.clone(),
                        join,
                    },
                );
                tracing::info!(device = %device, collection = %collection, "Device added");
                Ok(handle)
            }
            Err(e) => {
                if !self.closed.is_cancelled() {
                    match previous {
                        Some(stale) => devices.insert(device, stale),
                        None => devices.remove(&device),
                    };
                }
                Err(e)
            }
        }
    }

    /// Identifiers of monitored devices, including terminated ones.
    pub async fn list(&self) -> BTreeSet<String> {
        self.devices
            .read()
            .await
            .iter()
            .filter(|(_, slot)| slot.handle().is_some())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Status of every monitored device, ordered by identifier.
    pub async fn statuses(&self) -> Vec<DeviceStatus> {
        let devices = self.devices.read().await;
        let mut statuses: Vec<DeviceStatus> = devices
            .iter()
            .filter_map(|(id, slot)| {
                slot.handle().map(|handle| DeviceStatus {
                    device: id.clone(),
                    collection: handle.collection().clone(),
                    state: handle.state(),
                })
            })
            .collect();
        statuses.sort_by(|a, b| a.device.cmp(&b.device));
        statuses
    }

    /// Status of one monitored device.
    pub async fn status(&self, device: &str) -> Option<DeviceStatus> {
        let devices = self.devices.read().await;
        let handle = devices.get(device)?.handle()?;
        Some(DeviceStatus {
            device: device.to_string(),
            collection: handle.collection().clone(),
            state: handle.state(),
        })
    }

    /// Collection a monitored device writes into.
    pub async fn collection_of(&self, device: &str) -> Option<CollectionName> {
        self.devices
            .read()
            .await
            .get(device)
            .and_then(Slot::handle)
            .map(|h| h.collection().clone())
    }

    /// Stop a device and forget it once its worker has finished.
    ///
    /// # Errors
    /// Returns `NotMonitored` if the device has no worker, or one that is
    /// still connecting or already stopping.
    pub async fn stop(&self, device: &str) -> Result<WorkerState, CollectorError> {
        let (handle, join) = {
            let mut devices = self.devices.write().await;
            match devices.remove(device) {
                Some(Slot::Active { handle, join }) => {
                    devices.insert(
                        device.to_string(),
                        Slot::Stopping {
                            handle: handle.clone(),
                        },
                    );
                    (handle, join)
                }
                Some(other) => {
                    devices.insert(device.to_string(), other);
                    return Err(CollectorError::NotMonitored(device.to_string()));
                }
                None => return Err(CollectorError::NotMonitored(device.to_string())),
            }
        };

        let state = self.join_worker(&handle, join).await;
        self.devices.write().await.remove(device);
        tracing::info!(device, state = %state, "Device removed");
        Ok(state)
    }

    /// Cancel every worker and wait for all of them.
    ///
    /// Later `add` calls fail, and connections still in flight are closed
    /// instead of being spawned.
    pub async fn shutdown(&self) {
        let workers: Vec<(WorkerHandle, JoinHandle<WorkerState>)> = {
            let mut devices = self.devices.write().await;
            self.closed.cancel();
            devices
                .drain()
                .filter_map(|(_, slot)| match slot {
                    Slot::Active { handle, join } => Some((handle, join)),
                    _ => None,
                })
                .collect()
        };
        let count = workers.len();

        for (handle, _) in &workers {
            handle.cancel();
        }
        for (handle, join) in workers {
            self.join_worker(&handle, join).await;
        }
        tracing::info!(workers = count, "Device registry shut down");
    }

    // --- Private helpers ---

    async fn join_worker(
        &self,
        handle: &WorkerHandle,
        mut join: JoinHandle<WorkerState>,
    ) -> WorkerState {
        handle.cancel();
        match tokio::time::timeout(self.shutdown_timeout, &mut join).await {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => {
                tracing::warn!(device = handle.device(), error = %e, "Worker task failed");
                handle.state()
            }
            Err(_) => {
                tracing::warn!(
                    device = handle.device(),
                    timeout = ?self.shutdown_timeout,
                    "Worker did not stop in time, aborting"
                );
                join.abort();
                WorkerState::Terminated(ExitReason::Cancelled)
            }
        }
    }
}

/// Normalize and check a device identifier.
fn validate_identifier(raw: &str) -> Result<String, CollectorError> {
    let device = raw.trim();
    if device.is_empty() {
        return Err(CollectorError::InvalidDevice(
            "device identifier is empty".to_string(),
        ));
    }
    if device.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(CollectorError::InvalidDevice(format!(
            "{device:?} contains whitespace or control characters"
        )));
    }
    if sanitize(device).is_bare() {
        return Err(CollectorError::InvalidDevice(format!(
            "{device:?} has no digits to derive a collection from"
        )));
    }
    Ok(device.to_string())
}

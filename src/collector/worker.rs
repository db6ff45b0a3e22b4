//! Per-device polling worker.
//!
//! A worker owns one protocol session and one collection. It moves through
//! `Created -> Connecting -> Polling -> Terminated(reason)`; `Terminated` is
//! absorbing and there is no reconnection. The current state is published on
//! a watch channel so readers never touch the worker itself.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collector::events::{DeviceEventKind, EventSender};
use crate::collector::traits::{
    CollectorError, PollSettings, RegisterSession, SessionConnector, SessionError,
};
use crate::storage::{CollectionName, ReadingStore, poll_cycle, sanitize};

/// Why a worker stopped polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExitReason {
    /// Device answered with a protocol exception.
    Protocol(String),
    /// Session dropped, stalled or returned a malformed frame.
    Transport(String),
    /// Stopped on request.
    Cancelled,
}

/// Lifecycle state of a polling worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkerState {
    Created,
    Connecting,
    Polling,
    Terminated(ExitReason),
}

impl WorkerState {
    /// Whether the worker has finished for good.
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated(_))
    }
}

/// A connected worker that has not been spawned yet.
pub struct PollingWorker {
    device: String,
    collection: CollectionName,
    settings: PollSettings,
    session: Box<dyn RegisterSession>,
    store: ReadingStore,
    events: EventSender,
    state_tx: watch::Sender<WorkerState>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for PollingWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingWorker")
            .field("device", &self.device)
            .field("collection", &self.collection)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl PollingWorker {
    /// Open a session to `device` and make sure its collection exists.
    ///
    /// Failures are returned to the caller and no worker exists afterwards.
    ///
    /// # Errors
    /// - `CollectorError::Connection` if the session cannot be opened within
    ///   `connect_timeout`.
    /// - `CollectorError::Storage` if the collection cannot be created; the
    ///   session is closed before returning.
    pub async fn connect(
        device: &str,
        settings: PollSettings,
        connector: &dyn SessionConnector,
        store: ReadingStore,
        events: EventSender,
    ) -> Result<Self, CollectorError> {
        let collection = sanitize(device);
        let (state_tx, _) = watch::channel(WorkerState::Created);
        state_tx.send_replace(WorkerState::Connecting);

        tracing::debug!(device, port = settings.port, "Connecting");
        let connected =
            tokio::time::timeout(settings.connect_timeout, connector.connect(device, &settings))
                .await
                .unwrap_or(Err(SessionError::Timeout));

        let mut session = match connected {
            Ok(session) => session,
            Err(e) => {
                let reason = match e {
                    SessionError::Timeout => {
                        format!("no session within {:?}", settings.connect_timeout)
                    }
                    other => other.to_string(),
                };
                tracing::warn!(device, reason = %reason, "Connection failed");
                events.emit(device, DeviceEventKind::ConnectionFailed, reason.clone());
                return Err(CollectorError::Connection {
                    device: device.to_string(),
                    reason,
                });
            }
        };

        if let Err(e) = store.ensure_collection(&collection).await {
            tracing::error!(device, collection = %collection, error = %e, "Collection setup failed");
            session.close().await;
            events.emit(device, DeviceEventKind::StorageFailed, e.to_string());
            return Err(e.into());
        }

        Ok(Self {
            device: device.to_string(),
            collection,
            settings,
            session,
            store,
            events,
            state_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Start polling on a new task.
    ///
    /// The worker is `Polling` when this returns. The join handle resolves to
    /// the terminal state.
    pub fn spawn(self) -> (WorkerHandle, JoinHandle<WorkerState>) {
        self.state_tx.send_replace(WorkerState::Polling);
        let handle = WorkerHandle {
            device: self.device.clone(),
            collection: self.collection.clone(),
            state: self.state_tx.subscribe(),
            cancel: self.cancel.clone(),
        };
        (handle, tokio::spawn(self.run()))
    }

    /// Close the session without ever polling.
    pub async fn discard(mut self) {
        tracing::debug!(device = %self.device, "Discarding unspawned worker");
        self.session.close().await;
        self.state_tx
            .send_replace(WorkerState::Terminated(ExitReason::Cancelled));
    }

    async fn run(mut self) -> WorkerState {
        tracing::info!(
            device = %self.device,
            collection = %self.collection,
            base_address = self.settings.base_address,
            register_count = self.settings.register_count,
            interval = ?self.settings.interval,
            "Worker polling"
        );
        self.events.emit(
            &self.device,
            DeviceEventKind::Connected,
            format!("polling into {}", self.collection),
        );

        let reason = self.poll_loop().await;
        self.session.close().await;

        let (kind, message) = match &reason {
            ExitReason::Protocol(msg) => {
                tracing::error!(device = %self.device, error = %msg, "Worker terminated by device exception");
                (DeviceEventKind::ProtocolFailed, msg.clone())
            }
            ExitReason::Transport(msg) => {
                tracing::error!(device = %self.device, error = %msg, "Worker terminated by transport failure");
                (DeviceEventKind::TransportFailed, msg.clone())
            }
            ExitReason::Cancelled => {
                tracing::info!(device = %self.device, "Worker stopped");
                (DeviceEventKind::Stopped, "stopped on request".to_string())
            }
        };
        self.events.emit(&self.device, kind, message);

        let state = WorkerState::Terminated(reason);
        self.state_tx.send_replace(state.clone());
        state
    }

    async fn poll_loop(&mut self) -> ExitReason {
        let base_address = self.settings.base_address;
        let register_count = self.settings.register_count;
        let interval = self.settings.interval;

        loop {
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return ExitReason::Cancelled,
                read = self.session.read_holding_registers(base_address, register_count) => read,
            };

            let values = match read {
                Ok(values) => values,
                Err(SessionError::Exception(msg)) => return ExitReason::Protocol(msg),
                Err(e) => return ExitReason::Transport(e.to_string()),
            };

            let cycle = poll_cycle(base_address, &values, Utc::now());
            match self.store.append_cycle(&self.collection, &cycle).await {
                Ok(()) => {
                    tracing::trace!(device = %self.device, readings = cycle.len(), "Cycle stored");
                }
                Err(e) => {
                    tracing::warn!(device = %self.device, error = %e, timeout = e.is_timeout(), "Cycle dropped");
                    self.events
                        .emit(&self.device, DeviceEventKind::StorageFailed, e.to_string());
                }
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return ExitReason::Cancelled,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

/// Observer and stop switch for a running worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    device: String,
    collection: CollectionName,
    state: watch::Receiver<WorkerState>,
    cancel: CancellationToken,
}

impl WorkerHandle {
    /// Device identifier.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Collection the worker writes into.
    pub fn collection(&self) -> &CollectionName {
        &self.collection
    }

    /// Latest published state.
    pub fn state(&self) -> WorkerState {
        self.state.borrow().clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.state.borrow().is_terminated()
    }

    /// Ask the worker to stop. Returns immediately.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait until the worker reaches a terminal state.
    ///
    /// If the task vanished without publishing one (aborted), the last
    /// published state is returned.
    pub async fn wait_terminated(&self) -> WorkerState {
        let mut rx = self.state.clone();
        let result = rx
            .wait_for(WorkerState::is_terminated)
            .await
            .map(|state| state.clone());
        result.unwrap_or_else(|_| rx.borrow().clone())
    }
}

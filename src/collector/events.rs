//! Device lifecycle notifications.
//!
//! Workers and the registry broadcast [`DeviceEvent`]s so an operator surface
//! can show connection results and worker failures as they happen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use tokio::sync::broadcast;

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// What happened to a device.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum DeviceEventKind {
    /// Session opened and polling started.
    Connected,
    /// Session could not be opened.
    ConnectionFailed,
    /// A cycle could not be stored; polling continues.
    StorageFailed,
    /// Device answered with an exception; worker terminated.
    ProtocolFailed,
    /// Session dropped or stalled; worker terminated.
    TransportFailed,
    /// Worker stopped on request.
    Stopped,
}

impl DeviceEventKind {
    /// Default severity for this kind of event.
    pub fn severity(self) -> EventSeverity {
        match self {
            Self::Connected | Self::Stopped => EventSeverity::Info,
            Self::StorageFailed => EventSeverity::Warn,
            Self::ConnectionFailed | Self::ProtocolFailed | Self::TransportFailed => {
                EventSeverity::Error
            }
        }
    }
}

/// Event severity classification.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EventSeverity {
    /// Verbose diagnostic information.
    Debug,
    /// Normal operational information.
    Info,
    /// Potential issue; acquisition continues.
    Warn,
    /// Failure that stopped something.
    Error,
    /// Severe failure requiring immediate action.
    Critical,
}

/// A notification about one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEvent {
    /// Event timestamp (UTC).
    pub ts: DateTime<Utc>,
    /// Device identifier the event refers to.
    pub device: String,
    /// Event kind.
    pub kind: DeviceEventKind,
    /// Delivery priority.
    pub severity: EventSeverity,
    /// Human-readable description.
    pub message: String,
}

impl DeviceEvent {
    /// Create an event stamped now, with the kind's default severity.
    pub fn new(device: impl Into<String>, kind: DeviceEventKind, message: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            device: device.into(),
            kind,
            severity: kind.severity(),
            message: message.into(),
        }
    }
}

/// Sending half shared by the registry and its workers.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: broadcast::Sender<DeviceEvent>,
}

impl EventSender {
    /// Create a sender with room for `capacity` undelivered events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, device: &str, kind: DeviceEventKind, message: impl Into<String>) {
        let _ = self.tx.send(DeviceEvent::new(device, kind, message));
    }
}

impl Default for EventSender {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

//! Scripted sessions for exercising workers without a network.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::collector::traits::{PollSettings, RegisterSession, SessionConnector, SessionError};

/// One scripted answer to a read.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Values(Vec<u16>),
    Exception(&'static str),
    /// Connection reset by the device.
    Drop,
    /// Read never completes.
    Stall,
}

/// Counters shared between a test and the sessions of one device.
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionProbe {
    pub connects: Arc<AtomicUsize>,
    pub reads: Arc<AtomicUsize>,
    pub closed: Arc<AtomicBool>,
}

/// Connector whose sessions replay a per-device script.
///
/// Once a script runs out its last step repeats. Devices without a script
/// answer with sevens.
#[derive(Debug, Default)]
pub(crate) struct ScriptedConnector {
    scripts: Mutex<HashMap<String, Vec<Step>>>,
    refused: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    probes: Mutex<HashMap<String, SessionProbe>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, device: &str, steps: Vec<Step>) {
        self.scripts.lock().unwrap().insert(device.to_string(), steps);
    }

    pub fn refuse(&self, device: &str) {
        self.refused.lock().unwrap().insert(device.to_string());
    }

    pub fn hang(&self, device: &str) {
        self.hanging.lock().unwrap().insert(device.to_string());
    }

    /// Open sessions to `device` only after `delay`.
    pub fn delay(&self, device: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(device.to_string(), delay);
    }

    pub fn probe(&self, device: &str) -> SessionProbe {
        self.probes
            .lock()
            .unwrap()
            .entry(device.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait::async_trait]
impl SessionConnector for ScriptedConnector {
    async fn connect(
        &self,
        device: &str,
        settings: &PollSettings,
    ) -> Result<Box<dyn RegisterSession>, SessionError> {
        if self.refused.lock().unwrap().contains(device) {
            return Err(SessionError::Transport(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        let hanging = self.hanging.lock().unwrap().contains(device);
        if hanging {
            std::future::pending::<()>().await;
        }
        let delay = self.delays.lock().unwrap().get(device).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let probe = self.probe(device);
        probe.connects.fetch_add(1, Ordering::SeqCst);
        probe.closed.store(false, Ordering::SeqCst);

        let steps = self
            .scripts
            .lock()
            .unwrap()
            .get(device)
            .cloned()
            .unwrap_or_else(|| vec![Step::Values(vec![7; usize::from(settings.register_count)])]);

        Ok(Box::new(ScriptedSession {
            last: steps.last().cloned().unwrap_or(Step::Stall),
            steps: steps.into(),
            probe,
        }))
    }
}

struct ScriptedSession {
    steps: VecDeque<Step>,
    last: Step,
    probe: SessionProbe,
}

#[async_trait::async_trait]
impl RegisterSession for ScriptedSession {
    async fn read_holding_registers(
        &mut self,
        _address: u16,
        _count: u16,
    ) -> Result<Vec<u16>, SessionError> {
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.pop_front().unwrap_or_else(|| self.last.clone());

        match step {
            Step::Values(values) => Ok(values),
            Step::Exception(code) => Err(SessionError::Exception(code.to_string())),
            Step::Drop => Err(SessionError::Transport(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ))),
            Step::Stall => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        self.probe.closed.store(true, Ordering::SeqCst);
    }
}

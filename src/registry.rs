use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::http_connection_context::{ConnectionId, OutboundHandle};
use crate::protocol::{Coordinates, RttReport, WorkerInfo};

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("{0} is already registered")]
    AlreadyRegistered(ConnectionId),

    #[error("{0} is not a registered worker")]
    NotRegistered(ConnectionId),

    #[error("report from {0} carries no rtt samples")]
    NoSamples(ConnectionId),
}

struct WorkerEntry {
    id: ConnectionId,
    handle: OutboundHandle,
    info: WorkerInfo,
    ip: Option<String>,
    avg_rtt: Option<f64>,
}

impl WorkerEntry {
    fn view(&self) -> WorkerView {
        WorkerView {
            id: self.id,
            location: self.info.location.clone(),
            coords: self.info.coords,
            ip: self.ip.clone(),
            avg_rtt: self.avg_rtt,
        }
    }
}

/// Read-only copy of one worker record.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerView {
    pub id: ConnectionId,
    pub location: String,
    pub coords: Coordinates,
    pub ip: Option<String>,
    pub avg_rtt: Option<f64>,
}

/// Registered workers, one record each, keyed by the connection that
/// registered them and kept in registration order.
///
/// Every public method takes the lock exactly once, so a reader sees each
/// record either before or after an update, never half of one.
#[derive(Default)]
pub struct WorkerRegistry {
    entries: Mutex<Vec<WorkerEntry>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ConnectionId, handle: OutboundHandle, info: WorkerInfo) -> Result<(), RegistryError> {
        let mut entries = self.lock();
        if entries.iter().any(|e| e.id == id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        debug!(%id, location = %info.location, "worker registered");
        entries.push(WorkerEntry { id, handle, info, ip: None, avg_rtt: None });
        Ok(())
    }

    /// Stores the report's IP and the mean of its samples on the worker
    /// registered by `id`, replacing any earlier average. Returns the mean.
    pub fn record_rtt(&self, id: ConnectionId, report: &RttReport) -> Result<f64, RegistryError> {
        let mut entries = self.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(RegistryError::NotRegistered(id))?;

        let mean = report.mean().ok_or(RegistryError::NoSamples(id))?;
        entry.ip = Some(report.ip.clone());
        entry.avg_rtt = Some(mean);
        Ok(mean)
    }

    /// Pushes `url` to every registered worker without waiting on any of
    /// them. Returns how many queues accepted the message.
    pub fn dispatch(&self, url: &str) -> usize {
        let message = Bytes::from(format!("{}\n", url));
        let entries = self.lock();

        let mut delivered = 0;
        for entry in entries.iter() {
            match entry.handle.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(id = %entry.id, location = %entry.info.location, "worker queue full, dispatch skipped")
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(id = %entry.id, "worker connection already closing")
                }
            }
        }
        delivered
    }

    pub fn snapshot(&self) -> Vec<WorkerView> {
        self.lock().iter().map(WorkerEntry::view).collect()
    }

    pub fn remove(&self, id: ConnectionId) -> Option<WorkerView> {
        let mut entries = self.lock();
        let index = entries.iter().position(|e| e.id == id)?;
        Some(entries.remove(index).view())
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().iter().any(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<WorkerEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Point-in-time copy of the server counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub total_connections: u64,
    pub active_connections: u64,
    pub num_requests: u64,
    pub num_errors: u64,
    pub total_time: Duration,
    pub max_time: Duration,
}

impl StatsSnapshot {
    pub fn avg_time(&self) -> Duration {
        if self.num_requests == 0 {
            Duration::ZERO
        } else {
            let nanos = self.total_time.as_nanos() / u128::from(self.num_requests);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        }
    }
}

/// Process-wide counters shared by every connection task.
///
/// Every method is one critical section, so concurrent connections never
/// observe a half-applied update.
#[derive(Debug, Default)]
pub struct Statistics {
    inner: Mutex<StatsSnapshot>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection_opened(&self) {
        let mut s = self.lock();
        s.total_connections += 1;
        s.active_connections += 1;
    }

    pub fn record_connection_closed(&self) {
        let mut s = self.lock();
        s.active_connections = s.active_connections.saturating_sub(1);
    }

    pub fn record_request(&self, duration: Duration) {
        let mut s = self.lock();
        s.num_requests += 1;
        s.total_time += duration;
        if duration > s.max_time {
            s.max_time = duration;
        }
    }

    pub fn record_error(&self) {
        self.lock().num_errors += 1;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.lock().clone()
    }

    // A panicking writer cannot leave the counters half-updated, so the
    // poisoned value is still usable.
    fn lock(&self) -> MutexGuard<'_, StatsSnapshot> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

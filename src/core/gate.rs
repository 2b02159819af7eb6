//! Optional global serialization gate.
//!
//! When enabled, at most one request is handled at a time across the whole
//! gateway. Tokio's mutex queues waiters in FIFO order, so requests are
//! admitted in arrival order.
use tokio::sync::{Mutex, MutexGuard};

use crate::metrics;

/// Admission gate that is either a pass-through or a fair global lock.
#[derive(Debug, Default)]
pub struct SerializationGate {
    lock: Option<Mutex<()>>,
}

/// Held for the whole handling of a request. `None` when the gate is disabled.
pub type GatePass<'a> = Option<MutexGuard<'a, ()>>;

impl SerializationGate {
    pub fn new(enabled: bool) -> Self {
        Self {
            lock: enabled.then(|| Mutex::new(())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.lock.is_some()
    }

    /// Wait for admission. The returned pass must be kept until the response
    /// is produced.
    pub async fn enter(&self) -> GatePass<'_> {
        let lock = self.lock.as_ref()?;
        let depth = metrics::adjust_gate_waiting(1);
        tracing::trace!(waiting = depth, "Waiting for serialization gate");
        let guard = lock.lock().await;
        metrics::adjust_gate_waiting(-1);
        Some(guard)
    }
}

//! Counting gate bounding how many jobs execute in the worker pool at once.
//!
//! Backed by a tokio [`Semaphore`], whose waiters are served in FIFO order.
//! Under sustained overload later submissions simply wait; there is no
//! priority and no starvation protection beyond that ordering.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::EngineError;

#[derive(Debug, Clone)]
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// One admission slot. Dropping it returns the slot.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionPermit {
    /// Return the slot explicitly.
    pub fn release(self) {}
}

impl AdmissionController {
    /// Create a gate with `max_concurrency` slots (at least one).
    pub fn new(max_concurrency: usize) -> Self {
        let capacity = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot. Cancel-safe: dropping the future gives up the
    /// place in line without consuming a slot.
    pub async fn acquire(&self) -> Result<AdmissionPermit, EngineError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| EngineError::AdmissionClosed)?;
        Ok(AdmissionPermit { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    /// Wake every waiter with `AdmissionClosed` and refuse new acquisitions.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

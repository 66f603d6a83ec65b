//! Scheduler and interrupt collaborators.
//!
//! The driver needs three things from the platform: a way to start named
//! workers, a park/unpark primitive for each worker, and a way to bind an
//! interrupt vector to a callback. [`IrqTable`] is a software vector table
//! usable by any platform that dispatches interrupts itself.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use crate::error::{IrqError, SpawnError};

#[cfg(any(test, feature = "std"))]
pub mod std_impl;

/// Blocking primitive a worker sleeps on.
///
/// Token semantics: an `unpark` that happens before `park` makes the next
/// `park` return immediately. `park` may also return spuriously.
pub trait Parker: Send + Sync {
    fn park(&self);
    fn unpark(&self);
}

/// Handle to a running worker.
pub trait Worker: Send {
    /// Wait for the worker body to return.
    fn join(self: Box<Self>);
}

/// Thread creation.
pub trait Scheduler: Send + Sync {
    /// Start `body` on a new worker named `name`.
    fn spawn(&self, name: &'static str, body: Box<dyn FnOnce() + Send>) -> Result<Box<dyn Worker>, SpawnError>;

    /// A fresh parker for one worker.
    fn parker(&self) -> Box<dyn Parker>;
}

/// Something an interrupt vector can be bound to.
pub trait IrqTarget: Send + Sync {
    /// Called from interrupt context. Must not block.
    fn fire(&self);
}

/// Interrupt controller registration.
pub trait IrqRegistrar {
    fn bind(&mut self, vector: u16, target: Arc<dyn IrqTarget>) -> Result<(), IrqError>;
    fn unbind(&mut self, vector: u16);
}

/// Software vector table: `raise(vector)` fires the bound target.
///
/// Cloning shares the table.
#[derive(Clone, Default)]
pub struct IrqTable {
    vectors: Arc<spin::Mutex<BTreeMap<u16, Arc<dyn IrqTarget>>>>,
    limit: Option<u16>,
}

impl IrqTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table accepting only vectors below `limit` (e.g. the MSI-X table size).
    pub fn with_limit(limit: u16) -> Self {
        Self {
            vectors: Arc::default(),
            limit: Some(limit),
        }
    }

    /// Dispatch `vector`. Returns `false` if nothing is bound.
    pub fn raise(&self, vector: u16) -> bool {
        // Clone out so the target runs without the table lock held.
        let target = self.vectors.lock().get(&vector).cloned();
        match target {
            Some(t) => {
                t.fire();
                true
            }
            None => false,
        }
    }

    pub fn is_bound(&self, vector: u16) -> bool {
        self.vectors.lock().contains_key(&vector)
    }

    pub fn bound_count(&self) -> usize {
        self.vectors.lock().len()
    }
}

impl IrqRegistrar for IrqTable {
    fn bind(&mut self, vector: u16, target: Arc<dyn IrqTarget>) -> Result<(), IrqError> {
        if self.limit.is_some_and(|limit| vector >= limit) {
            return Err(IrqError::InvalidVector(vector));
        }
        let mut vectors = self.vectors.lock();
        if vectors.contains_key(&vector) {
            return Err(IrqError::VectorInUse(vector));
        }
        vectors.insert(vector, target);
        Ok(())
    }

    fn unbind(&mut self, vector: u16) {
        self.vectors.lock().remove(&vector);
    }
}

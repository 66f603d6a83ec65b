//! Wake coordination between interrupts and ring workers.
//!
//! A worker calls [`WakeCoordinator::wait_until`] with a predicate over ring
//! state. The interrupt bound to that ring calls [`WakeCoordinator::notify`],
//! which unparks the worker so it re-checks the predicate. No polling: between
//! interrupts the worker sits in the platform [`Parker`].
//!
//! ```text
//!   irq vector ──notify()──> WakeCoordinator ──unpark──> worker
//!                                  ▲                       │
//!                                  └── wait_until(pred) ◄──┘
//! ```

use alloc::boxed::Box;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::platform::{IrqTarget, Parker};

/// Result of a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// Predicate held.
    Ready,
    /// Shutdown requested; the worker should return.
    Stopped,
}

/// Sleep-until-ring-has-work primitive, one per worker.
pub struct WakeCoordinator {
    name: &'static str,
    parker: Box<dyn Parker>,
    stop: AtomicBool,
    notifies: AtomicU64,
}

impl WakeCoordinator {
    pub fn new(name: &'static str, parker: Box<dyn Parker>) -> Self {
        Self {
            name,
            parker,
            stop: AtomicBool::new(false),
            notifies: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Block until `ready()` returns true or [`stop`](Self::stop) is called.
    ///
    /// The predicate is re-evaluated after every unpark (spurious or not), so
    /// one `Ready` may cover several notifications; callers drain in a loop.
    pub fn wait_until(&self, mut ready: impl FnMut() -> bool) -> Wake {
        loop {
            if self.stop.load(Ordering::Acquire) {
                return Wake::Stopped;
            }
            if ready() {
                return Wake::Ready;
            }
            self.parker.park();
            log::trace!("{}: woke", self.name);
        }
    }

    /// Interrupt path: the ring may have work.
    pub fn notify(&self) {
        self.notifies.fetch_add(1, Ordering::Relaxed);
        self.parker.unpark();
    }

    /// Ask the worker to leave its wait loop.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.parker.unpark();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Notifications received so far.
    pub fn notify_count(&self) -> u64 {
        self.notifies.load(Ordering::Relaxed)
    }
}

impl IrqTarget for WakeCoordinator {
    fn fire(&self) {
        self.notify();
    }
}

//! Virtqueue interface consumed by the pipelines.
//!
//! Slot allocation, avail/used index bookkeeping and the doorbell register
//! live behind this trait. The pipelines only need two predicates ("room for
//! N slots", "completions pending") plus post / retrieve / notify.

use alloc::boxed::Box;

use crate::dma::NetRequest;

/// One entry taken off the used ring.
pub struct Used {
    /// The request that was posted (the opaque tag).
    pub request: Box<NetRequest>,
    /// Bytes the device wrote into the chain (receive) or 0 (transmit).
    pub written: u32,
}

/// A single virtqueue as seen by the driver.
///
/// Implementations need not be internally synchronized: the driver serializes
/// every `&mut self` call per queue. `has_room` / `has_completions` may be
/// evaluated from a worker's wait predicate.
pub trait Virtqueue: Send {
    /// Queue index (0 = receive, 1 = transmit).
    fn index(&self) -> u16;

    /// Descriptor slot capacity.
    fn size(&self) -> u16;

    /// At least `slots` descriptors are free.
    fn has_room(&self, slots: u16) -> bool;

    /// At least one used entry has not been retrieved yet.
    fn has_completions(&self) -> bool;

    /// Add a descriptor chain built from `request.payload()`.
    ///
    /// The chain has `payload().len()` descriptors, of which
    /// `payload().writable_count()` are device-writable. On capacity failure
    /// the request is handed back untouched.
    fn post(&mut self, request: Box<NetRequest>) -> Result<(), Box<NetRequest>>;

    /// Pop the next used entry, in the order the device completed them.
    fn retrieve_completed(&mut self) -> Option<Used>;

    /// Ring the doorbell. Idempotent.
    fn notify(&mut self);
}

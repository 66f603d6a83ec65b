//! Driver error types

use alloc::boxed::Box;
use core::fmt;

use thiserror::Error;

use crate::client::TxFrame;

pub type Result<T> = core::result::Result<T, DriverError>;

/// Why a transmit was refused. All variants are non-fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TxError {
    /// Ring full and nothing to reclaim. Retry later or drop the frame.
    #[error("transmit ring has no free slot pair")]
    NoCapacity,
    /// Frame exceeds the configured maximum.
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
    #[error("empty frame")]
    EmptyFrame,
    /// Driver is shutting down.
    #[error("driver stopped")]
    Stopped,
}

/// A refused transmit, carrying the caller's frame back so it can be retried.
pub struct Rejected {
    pub error: TxError,
    pub frame: Box<dyn TxFrame>,
}

impl Rejected {
    pub(crate) fn new(error: TxError, frame: Box<dyn TxFrame>) -> Self {
        Self { error, frame }
    }

    /// Take the frame back, discarding the reason.
    pub fn into_frame(self) -> Box<dyn TxFrame> {
        self.frame
    }
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .field("frame_len", &self.frame.bytes().len())
            .finish()
    }
}

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl core::error::Error for Rejected {}

/// Worker could not be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("failed to spawn worker `{name}`")]
pub struct SpawnError {
    pub name: &'static str,
}

/// Interrupt vector could not be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IrqError {
    #[error("interrupt vector {0} is already bound")]
    VectorInUse(u16),
    #[error("interrupt vector {0} is out of range")]
    InvalidVector(u16),
}

/// Driver start-up failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// Vendor/device pair is not a virtio-net device.
    #[error("device {vendor:04x}:{device:04x} is not a virtio-net device")]
    UnsupportedDevice { vendor: u16, device: u16 },
    /// Transport did not hand out the requested queue.
    #[error("virtqueue {0} is not available")]
    QueueUnavailable(u16),
    /// Queue too small to hold a single request.
    #[error("virtqueue {index} has {size} slots, need at least {needed}")]
    QueueTooSmall { index: u16, size: u16, needed: u16 },
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error(transparent)]
    Irq(#[from] IrqError),
}

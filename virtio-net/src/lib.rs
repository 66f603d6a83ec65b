//! MorpheusX VirtIO-net driver core
//!
//! Moves Ethernet frames between the guest and a virtio network device
//! through two shared-memory rings: queue 0 (receive) and queue 1 (transmit).
//!
//! # Architecture
//!
//! ```text
//!            upper layer (NetClient / smoltcp adapter)
//!                 ▲ RxFrame               │ transmit(frame, flush)
//!                 │                       ▼
//!   ┌──────────────────────┐   ┌──────────────────────┐
//!   │    RxPipeline        │   │    TxPipeline        │
//!   │  fill / drain        │   │  submit / reclaim    │
//!   │  (rx worker)         │   │  (tx worker)         │
//!   └─────────┬────────────┘   └─────────┬────────────┘
//!             │ WakeCoordinator          │ WakeCoordinator
//!             ▼                          ▼
//!        Virtqueue 0                Virtqueue 1      (ring collaborator)
//! ```
//!
//! Everything below the `Virtqueue`, `Hal`, `VirtioTransport`, `Scheduler`
//! and `IrqRegistrar` traits is supplied by the platform.

#![no_std]

extern crate alloc;

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod client;
pub mod config;
pub mod diag;
pub mod dma;
pub mod driver;
pub mod error;
pub mod hal;
pub mod platform;
pub mod ring;
pub mod stack;
pub mod stats;
pub mod transport;
pub mod types;
pub mod wake;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use client::{NetClient, RxFrame, TxFrame};
pub use config::DriverConfig;
pub use driver::{FillReport, FillStop, NetContext, TxHandle, VirtioNet};
pub use error::{DriverError, Rejected, TxError};
pub use hal::{Hal, HeapHal};
pub use ring::{Used, Virtqueue};
pub use stats::{NetStats, StatsSnapshot};
pub use transport::{DeviceId, DriverInit, NetDeviceConfig, VirtioTransport};
pub use types::{MacAddress, VirtioNetHdr};
pub use wake::{Wake, WakeCoordinator};

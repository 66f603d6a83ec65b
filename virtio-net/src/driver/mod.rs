//! Driver core: receive and transmit pipelines and the device driver
//! that runs them.

pub mod net;
pub mod rx;
pub mod tx;

pub use net::{NetContext, TxHandle, VirtioNet, RX_WORKER, TX_WORKER};
pub use rx::{FillReport, FillStop, RxPipeline, RxService};
pub use tx::TxPipeline;

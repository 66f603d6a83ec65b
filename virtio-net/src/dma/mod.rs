//! DMA buffer and request management.
//!
//! Provides ownership-tracked request records for safe device communication.

pub mod ownership;
pub mod page;
pub mod request;
pub mod sglist;

pub use ownership::RequestState;
pub use page::DmaPage;
pub use request::{NetRequest, RequestBuffer, REQUEST_SLOTS};
pub use sglist::{Direction, Fragment, ScatterList, MAX_FRAGMENTS};

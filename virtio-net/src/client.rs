//! Upper-layer interface: where received frames go and where transmitted
//! frames come back.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use crate::dma::DmaPage;

/// A caller-owned frame handed to [`VirtioNet::transmit`](crate::VirtioNet::transmit).
///
/// The driver never copies it: the device reads the bytes in place. So
/// `bytes()` must return the same memory on every call, and that memory must
/// stay put while the frame is boxed (heap-backed buffers satisfy this).
/// The frame comes back through [`NetClient::tx_reclaimed`] once the device is
/// done with it.
pub trait TxFrame: Send + 'static {
    fn bytes(&self) -> &[u8];
}

impl TxFrame for Vec<u8> {
    fn bytes(&self) -> &[u8] {
        self.as_slice()
    }
}

impl TxFrame for Box<[u8]> {
    fn bytes(&self) -> &[u8] {
        self
    }
}

impl TxFrame for &'static [u8] {
    fn bytes(&self) -> &[u8] {
        self
    }
}

/// A received frame. Owns the page the device wrote it into.
///
/// Dropping the frame returns the page to the HAL.
pub struct RxFrame {
    page: DmaPage,
    len: usize,
}

impl RxFrame {
    pub(crate) fn new(page: DmaPage, len: usize) -> Self {
        debug_assert!(len <= page.capacity());
        Self { page, len }
    }

    /// Frame bytes, starting at the Ethernet header.
    pub fn as_slice(&self) -> &[u8] {
        &self.page.as_slice()[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.page.as_mut_slice()[..len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bus address of the first frame byte.
    pub fn bus_addr(&self) -> u64 {
        self.page.bus_addr()
    }

    /// Take the page back (e.g. to reuse it).
    pub fn into_page(self) -> DmaPage {
        self.page
    }
}

impl fmt::Debug for RxFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RxFrame")
            .field("bus_addr", &format_args!("{:#x}", self.page.bus_addr()))
            .field("len", &self.len)
            .finish()
    }
}

/// Received frames can be forwarded without copying.
impl TxFrame for RxFrame {
    fn bytes(&self) -> &[u8] {
        self.as_slice()
    }
}

/// Consumer of driver events. Called from the driver's workers, so
/// implementations must not block for long.
pub trait NetClient: Send + Sync {
    /// A frame arrived. Ownership (and the page) moves to the client.
    fn rx_frame(&self, frame: RxFrame);

    /// The device finished reading a transmitted frame.
    fn tx_reclaimed(&self, frame: Box<dyn TxFrame>) {
        drop(frame);
    }
}

/// Client that drops everything. Useful for early bring-up.
pub struct NullClient;

impl NetClient for NullClient {
    fn rx_frame(&self, _frame: RxFrame) {}
}

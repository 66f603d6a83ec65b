//! smoltcp integration layer.
//!
//! Bridges the driver to smoltcp's `phy::Device`:
//!
//! - [`QueueClient`] - bounded receive queue; install it as the driver's
//!   [`NetClient`] and frames pile up until smoltcp polls
//! - [`SmoltcpDevice`] - hands queued frames to smoltcp and sends its
//!   output through a [`TxHandle`]
//!
//! # Usage
//!
//! ```ignore
//! let queue = Arc::new(QueueClient::new(64));
//! let net = VirtioNet::start(transport, NetContext { client: queue.clone(), .. })?;
//! let mut device = SmoltcpDevice::new(queue, net.tx_handle());
//! let mut iface = Interface::new(config, &mut device, now);
//! loop {
//!     iface.poll(now, &mut device, &mut sockets);
//! }
//! ```

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec;
use core::sync::atomic::{AtomicU64, Ordering};

use smoltcp::phy::{Device, DeviceCapabilities, Medium, RxToken, TxToken};
use smoltcp::time::Instant;

use crate::client::{NetClient, RxFrame, TxFrame};
use crate::driver::TxHandle;
use crate::types::ETH_FRAME_MAX;

/// Receive queue between the driver's rx worker and a polling stack.
///
/// Frames arriving while the queue is full are dropped (and counted).
pub struct QueueClient {
    frames: spin::Mutex<VecDeque<RxFrame>>,
    depth: usize,
    drops: AtomicU64,
}

impl QueueClient {
    pub fn new(depth: usize) -> Self {
        Self {
            frames: spin::Mutex::new(VecDeque::with_capacity(depth)),
            depth,
            drops: AtomicU64::new(0),
        }
    }

    pub fn pop(&self) -> Option<RxFrame> {
        self.frames.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    /// Frames dropped because the queue was full.
    pub fn drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }
}

impl NetClient for QueueClient {
    fn rx_frame(&self, frame: RxFrame) {
        let mut frames = self.frames.lock();
        if frames.len() >= self.depth {
            drop(frames);
            self.drops.fetch_add(1, Ordering::Relaxed);
            log::debug!("stack: rx queue full, dropping {} byte frame", frame.len());
            return;
        }
        frames.push_back(frame);
    }
}

/// `phy::Device` over a [`QueueClient`] and a driver transmit handle.
pub struct SmoltcpDevice {
    rx: Arc<QueueClient>,
    tx: TxHandle,
    tx_errors: u64,
}

impl SmoltcpDevice {
    pub fn new(rx: Arc<QueueClient>, tx: TxHandle) -> Self {
        Self { rx, tx, tx_errors: 0 }
    }

    /// Frames smoltcp produced that the driver refused.
    pub fn tx_errors(&self) -> u64 {
        self.tx_errors
    }
}

impl Device for SmoltcpDevice {
    type RxToken<'a> = FrameRxToken where Self: 'a;
    type TxToken<'a> = HandleTxToken<'a> where Self: 'a;

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.max_transmission_unit = ETH_FRAME_MAX;
        caps.medium = Medium::Ethernet;
        caps
    }

    fn receive(&mut self, _timestamp: Instant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        // Only hand out tokens when a frame is actually queued.
        let frame = self.rx.pop()?;
        Some((
            FrameRxToken { frame },
            HandleTxToken {
                tx: &self.tx,
                errors: &mut self.tx_errors,
            },
        ))
    }

    fn transmit(&mut self, _timestamp: Instant) -> Option<Self::TxToken<'_>> {
        if !self.tx.can_transmit() {
            return None;
        }
        Some(HandleTxToken {
            tx: &self.tx,
            errors: &mut self.tx_errors,
        })
    }
}

/// Owns one received frame; smoltcp reads it in place.
pub struct FrameRxToken {
    frame: RxFrame,
}

impl RxToken for FrameRxToken {
    fn consume<R, F>(mut self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        f(self.frame.as_mut_slice())
    }
}

pub struct HandleTxToken<'a> {
    tx: &'a TxHandle,
    errors: &'a mut u64,
}

impl<'a> TxToken for HandleTxToken<'a> {
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let mut buffer = vec![0u8; len];
        let result = f(&mut buffer);

        // smoltcp expects `result` whether or not the frame went out.
        if let Err(rejected) = self.tx.transmit(Box::new(buffer) as Box<dyn TxFrame>, true) {
            *self.errors += 1;
            log::debug!("stack: transmit dropped: {}", rejected);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::TxPipeline;
    use crate::hal::Hal;
    use crate::stats::NetStats;
    use crate::testing::{heap_hal, CountingHal, SoftQueue};
    use crate::wake::WakeCoordinator;
    use crate::client::NullClient;
    use crate::dma::DmaPage;
    use crate::platform::std_impl::StdParker;

    fn tx_handle(size: u16) -> (TxHandle, crate::testing::SoftDevice) {
        let (queue, device) = SoftQueue::new(1, size);
        let hal: Arc<dyn Hal> = heap_hal(4);
        let wake = Arc::new(WakeCoordinator::new("tx", Box::new(StdParker::new())));
        let pipeline = TxPipeline::new(
            Box::new(queue),
            hal,
            Arc::new(NullClient),
            Arc::new(NetStats::new()),
            wake,
            ETH_FRAME_MAX,
            0,
        );
        (TxHandle::new(Arc::new(pipeline)), device)
    }

    fn frame(hal: &Arc<dyn Hal>, bytes: &[u8]) -> RxFrame {
        let mut page = DmaPage::alloc_zeroed(hal).unwrap();
        page.as_mut_slice()[..bytes.len()].copy_from_slice(bytes);
        RxFrame::new(page, bytes.len())
    }

    #[test]
    fn test_queue_client_drops_when_full() {
        let hal: Arc<dyn Hal> = CountingHal::with_pages(4);
        let queue = QueueClient::new(2);
        for i in 0..3u8 {
            queue.rx_frame(frame(&hal, &[i; 60]));
        }
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drops(), 1);
        assert_eq!(queue.pop().unwrap().as_slice()[0], 0);
    }

    #[test]
    fn test_receive_without_frames_yields_nothing() {
        let (tx, _device) = tx_handle(8);
        let mut dev = SmoltcpDevice::new(Arc::new(QueueClient::new(4)), tx);
        assert!(dev.receive(Instant::from_millis(0)).is_none());
    }

    #[test]
    fn test_rx_token_exposes_frame() {
        let hal: Arc<dyn Hal> = heap_hal(4);
        let (tx, _device) = tx_handle(8);
        let queue = Arc::new(QueueClient::new(4));
        queue.rx_frame(frame(&hal, &[0xAB; 64]));

        let mut dev = SmoltcpDevice::new(queue.clone(), tx);
        let (rx, _tx) = dev.receive(Instant::from_millis(0)).unwrap();
        let len = rx.consume(|buf| {
            assert!(buf.iter().all(|&b| b == 0xAB));
            buf.len()
        });
        assert_eq!(len, 64);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_tx_token_submits_and_flushes() {
        let (tx, device) = tx_handle(8);
        let mut dev = SmoltcpDevice::new(Arc::new(QueueClient::new(4)), tx);

        let token = dev.transmit(Instant::from_millis(0)).unwrap();
        token.consume(60, |buf| buf.fill(0x5A));

        assert_eq!(device.pending(), 1);
        assert_eq!(device.kicks(), 1);
        let sent = device.transmit_next().unwrap();
        assert_eq!(sent.len(), 60);
        assert!(sent.iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn test_transmit_unavailable_when_ring_full() {
        let (tx, device) = tx_handle(2);
        let mut dev = SmoltcpDevice::new(Arc::new(QueueClient::new(4)), tx);

        dev.transmit(Instant::from_millis(0)).unwrap().consume(60, |_| ());
        assert!(dev.transmit(Instant::from_millis(0)).is_none());

        // Completion frees the pair; can_transmit reclaims it.
        device.transmit_next().unwrap();
        assert!(dev.transmit(Instant::from_millis(0)).is_some());
    }

    #[test]
    fn test_capabilities() {
        let (tx, _device) = tx_handle(8);
        let dev = SmoltcpDevice::new(Arc::new(QueueClient::new(4)), tx);
        let caps = dev.capabilities();
        assert_eq!(caps.medium, Medium::Ethernet);
        assert_eq!(caps.max_transmission_unit, ETH_FRAME_MAX);
    }
}

//! VirtIO RX pipeline.
//!
//! Fill posts fresh pages to queue 0; drain hands completed pages to the
//! client and refills once the ring is at most half full. Both run on the
//! receive worker (the start-up fill aside), so the ring lock is uncontended.

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::client::{NetClient, RxFrame};
use crate::diag;
use crate::dma::{DmaPage, NetRequest, RequestBuffer, REQUEST_SLOTS};
use crate::hal::Hal;
use crate::ring::{Used, Virtqueue};
use crate::stats::NetStats;
use crate::wake::{Wake, WakeCoordinator};

/// Why a fill pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStop {
    /// No room for another request.
    RingFull,
    /// HAL out of pages.
    AllocFailed,
    /// Ring refused a post despite reporting room.
    Rejected,
}

/// Outcome of one fill pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillReport {
    pub posted: usize,
    pub stop: FillStop,
}

/// Outcome of one drain + refill pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxService {
    pub delivered: usize,
    /// Set when the drain left enough free slots to trigger a refill.
    pub refill: Option<FillReport>,
}

/// Receive side of one device.
pub struct RxPipeline {
    ring: spin::Mutex<Box<dyn Virtqueue>>,
    hal: Arc<dyn Hal>,
    client: Arc<dyn NetClient>,
    stats: Arc<NetStats>,
    wake: Arc<WakeCoordinator>,
    buffer_size: u32,
    refill_threshold: u16,
    instance: u32,
}

impl RxPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ring: Box<dyn Virtqueue>,
        hal: Arc<dyn Hal>,
        client: Arc<dyn NetClient>,
        stats: Arc<NetStats>,
        wake: Arc<WakeCoordinator>,
        buffer_size: u32,
        refill_threshold: u16,
        instance: u32,
    ) -> Self {
        Self {
            ring: spin::Mutex::new(ring),
            hal,
            client,
            stats,
            wake,
            buffer_size,
            refill_threshold,
            instance,
        }
    }

    /// Post fresh zeroed pages until the ring is full, a page cannot be
    /// allocated, or the ring refuses a post. Rings the doorbell once.
    ///
    /// # Contract
    /// - Never posts more requests than the ring has room for
    /// - A refused request is dropped here, releasing its page
    pub fn fill(&self) -> FillReport {
        let mut ring = self.ring.lock();
        let mut posted = 0;

        let stop = loop {
            if !ring.has_room(REQUEST_SLOTS) {
                break FillStop::RingFull;
            }

            let Some(page) = DmaPage::alloc_zeroed(&self.hal) else {
                NetStats::inc(&self.stats.rx_alloc_failures);
                log::warn!(
                    "virtio-net{}: rx page allocation failed after {} buffers",
                    self.instance,
                    posted
                );
                break FillStop::AllocFailed;
            };

            let mut req = NetRequest::rx(page, self.buffer_size, &*self.hal);
            // Mark posted BEFORE the device can see it
            req.mark_posted();

            if let Err(mut req) = ring.post(req) {
                req.mark_rejected();
                drop(req.discard());
                NetStats::inc(&self.stats.rx_post_rejects);
                log::warn!("virtio-net{}: rx ring refused a post", self.instance);
                break FillStop::Rejected;
            }

            posted += 1;
        };

        ring.notify();
        drop(ring);

        NetStats::add(&self.stats.rx_posted, posted as u64);
        log::debug!("virtio-net{}: fill posted {} ({:?})", self.instance, posted, stop);
        FillReport { posted, stop }
    }

    /// Hand every completed buffer to the client. Returns the count.
    ///
    /// Frames come out in the order the device completed them.
    pub fn drain(&self) -> usize {
        let mut delivered = 0;

        loop {
            // Lock per entry: the client runs without the ring held.
            let used = self.ring.lock().retrieve_completed();
            let Some(Used { mut request, written }) = used else {
                break;
            };

            request.mark_completed();
            let len = request.rx_frame_len(written);

            match request.reclaim() {
                RequestBuffer::Rx(page) => {
                    let frame = RxFrame::new(page, len);
                    diag::log_frame(self.instance, frame.as_slice());
                    NetStats::inc(&self.stats.rx_frames);
                    NetStats::add(&self.stats.rx_bytes, len as u64);
                    self.client.rx_frame(frame);
                    delivered += 1;
                }
                RequestBuffer::Tx(_) => {
                    log::error!("virtio-net{}: transmit request on the rx ring", self.instance);
                }
            }
        }

        delivered
    }

    /// Ring is at most `size / refill_divisor` occupied.
    pub fn needs_refill(&self) -> bool {
        self.ring.lock().has_room(self.refill_threshold)
    }

    pub fn has_completions(&self) -> bool {
        self.ring.lock().has_completions()
    }

    /// One drain pass followed by at most one refill pass.
    pub fn service(&self) -> RxService {
        let delivered = self.drain();
        let refill = if self.needs_refill() {
            log::debug!("virtio-net{}: ring is less than half full, refill", self.instance);
            NetStats::inc(&self.stats.rx_refills);
            Some(self.fill())
        } else {
            None
        };
        RxService { delivered, refill }
    }

    /// Receive worker body. Returns once the coordinator is stopped.
    pub fn run(&self) {
        log::debug!("virtio-net{}: rx worker started", self.instance);
        while self.wake.wait_until(|| self.has_completions()) == Wake::Ready {
            self.service();
        }
        log::debug!("virtio-net{}: rx worker stopped", self.instance);
    }

    pub fn wake(&self) -> &Arc<WakeCoordinator> {
        &self.wake
    }
}

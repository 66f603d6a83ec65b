//! VirtIO TX pipeline.
//!
//! Fire-and-forget transmit: submit posts the caller's frame and returns at
//! once. Completed requests are reclaimed by the transmit worker on every
//! wake-up, and opportunistically by submit when the ring is full.
//!
//! Every ring-1 operation runs under one `spin::Mutex`; frames are handed
//! back to the client only after the lock is released.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::client::{NetClient, RxFrame, TxFrame};
use crate::dma::{NetRequest, RequestBuffer, REQUEST_SLOTS};
use crate::error::{Rejected, TxError};
use crate::hal::Hal;
use crate::ring::Virtqueue;
use crate::stats::NetStats;
use crate::wake::{Wake, WakeCoordinator};

/// Transmit side of one device.
pub struct TxPipeline {
    ring: spin::Mutex<Box<dyn Virtqueue>>,
    hal: Arc<dyn Hal>,
    client: Arc<dyn NetClient>,
    stats: Arc<NetStats>,
    wake: Arc<WakeCoordinator>,
    max_frame: usize,
    instance: u32,
}

impl TxPipeline {
    pub fn new(
        ring: Box<dyn Virtqueue>,
        hal: Arc<dyn Hal>,
        client: Arc<dyn NetClient>,
        stats: Arc<NetStats>,
        wake: Arc<WakeCoordinator>,
        max_frame: usize,
        instance: u32,
    ) -> Self {
        Self {
            ring: spin::Mutex::new(ring),
            hal,
            client,
            stats,
            wake,
            max_frame,
            instance,
        }
    }

    /// Queue `frame` for transmission.
    ///
    /// # Contract
    /// - MUST return immediately (no completion wait)
    /// - On failure the frame comes back inside [`Rejected`]
    /// - Rings the doorbell only when `flush` is set
    pub fn submit(&self, frame: Box<dyn TxFrame>, flush: bool) -> Result<(), Rejected> {
        let len = frame.bytes().len();
        if len == 0 {
            return Err(Rejected::new(TxError::EmptyFrame, frame));
        }
        if len > self.max_frame {
            return Err(Rejected::new(
                TxError::FrameTooLarge { len, max: self.max_frame },
                frame,
            ));
        }

        let mut reclaimed = Vec::new();
        let mut ring = self.ring.lock();
        let result = self.post_locked(&mut **ring, frame, flush, &mut reclaimed);
        drop(ring);

        self.hand_back(reclaimed);

        match &result {
            Ok(()) => {
                NetStats::inc(&self.stats.tx_submitted);
                NetStats::add(&self.stats.tx_bytes, len as u64);
            }
            Err(rejected) => {
                if rejected.error == TxError::NoCapacity {
                    NetStats::inc(&self.stats.tx_no_room);
                }
                log::debug!("virtio-net{}: transmit refused: {}", self.instance, rejected.error);
            }
        }
        result
    }

    fn post_locked(
        &self,
        ring: &mut dyn Virtqueue,
        frame: Box<dyn TxFrame>,
        flush: bool,
        reclaimed: &mut Vec<Box<dyn TxFrame>>,
    ) -> Result<(), Rejected> {
        // Checked under the ring lock so nothing is posted once shutdown
        // has passed its fence.
        if self.wake.is_stopped() {
            return Err(Rejected::new(TxError::Stopped, frame));
        }
        if !ring.has_room(REQUEST_SLOTS) && ring.has_completions() {
            Self::collect(ring, reclaimed);
        }
        if !ring.has_room(REQUEST_SLOTS) {
            return Err(Rejected::new(TxError::NoCapacity, frame));
        }

        let mut req = NetRequest::tx(frame, &*self.hal);
        req.mark_posted();
        if let Err(mut req) = ring.post(req) {
            req.mark_rejected();
            return Err(self.refused(req.discard()));
        }

        if flush {
            ring.notify();
            NetStats::inc(&self.stats.tx_kicks);
        }
        Ok(())
    }

    fn refused(&self, buffer: RequestBuffer) -> Rejected {
        let frame: Box<dyn TxFrame> = match buffer {
            RequestBuffer::Tx(frame) => frame,
            RequestBuffer::Rx(page) => {
                log::error!("virtio-net{}: ring returned a receive request on tx", self.instance);
                Box::new(RxFrame::new(page, 0))
            }
        };
        Rejected::new(TxError::NoCapacity, frame)
    }

    /// Wait out any submit already holding the ring lock. After
    /// [`WakeCoordinator::stop`] this guarantees no further posts.
    pub fn fence(&self) {
        drop(self.ring.lock());
    }

    /// Reclaim every completed request and return the frames to the client.
    pub fn reclaim(&self) -> usize {
        let mut reclaimed = Vec::new();
        Self::collect(&mut **self.ring.lock(), &mut reclaimed);
        self.hand_back(reclaimed)
    }

    /// Ring the transmit doorbell.
    pub fn flush(&self) {
        self.ring.lock().notify();
        NetStats::inc(&self.stats.tx_kicks);
    }

    pub fn has_completions(&self) -> bool {
        self.ring.lock().has_completions()
    }

    /// Room for one more frame.
    pub fn has_room(&self) -> bool {
        self.ring.lock().has_room(REQUEST_SLOTS)
    }

    /// Transmit worker body. Returns once the coordinator is stopped.
    pub fn run(&self) {
        log::debug!("virtio-net{}: tx worker started", self.instance);
        while self.wake.wait_until(|| self.has_completions()) == Wake::Ready {
            let n = self.reclaim();
            log::trace!("virtio-net{}: reclaimed {} tx buffers", self.instance, n);
        }
        log::debug!("virtio-net{}: tx worker stopped", self.instance);
    }

    pub fn wake(&self) -> &Arc<WakeCoordinator> {
        &self.wake
    }

    /// Ring must be locked by the caller.
    fn collect(ring: &mut dyn Virtqueue, out: &mut Vec<Box<dyn TxFrame>>) {
        while let Some(used) = ring.retrieve_completed() {
            let mut request = used.request;
            request.mark_completed();
            match request.reclaim() {
                RequestBuffer::Tx(frame) => out.push(frame),
                RequestBuffer::Rx(_) => log::error!("virtio-net: receive request on the tx ring"),
            }
        }
    }

    fn hand_back(&self, frames: Vec<Box<dyn TxFrame>>) -> usize {
        let n = frames.len();
        if n > 0 {
            NetStats::add(&self.stats.tx_reclaimed, n as u64);
        }
        for frame in frames {
            self.client.tx_reclaimed(frame);
        }
        n
    }
}

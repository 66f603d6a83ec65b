//! In-memory doubles for driver tests.
//!
//! - [`SoftQueue`] / [`SoftDevice`]: a virtqueue and the device end of it.
//!   The device completes posted requests in any order and counts doorbells.
//! - [`CountingHal`]: wraps a HAL with an allocation budget and tracks which
//!   pages are live.
//! - [`SoftTransport`]: a virtio-net device handing out soft queues.
//! - [`heap_hal`]: a [`HeapHal`] over a leaked region.

use alloc::boxed::Box;
use alloc::collections::{BTreeSet, VecDeque};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};

use crate::config::{features, DeviceStatus, VIRTIO_NET_DEVICE_IDS, VIRTIO_VENDOR_ID};
use crate::dma::{NetRequest, RequestState};
use crate::hal::{Hal, HeapHal, PAGE_SIZE};
use crate::ring::{Used, Virtqueue};
use crate::transport::{DeviceId, NetDeviceConfig, VirtioTransport};
use crate::types::MacAddress;

/// [`HeapHal`] over a leaked, zeroed region of `pages` pages (plus slack
/// for alignment).
pub fn heap_hal(pages: usize) -> Arc<HeapHal> {
    let region = Box::leak(vec![0u8; (pages + 1) * PAGE_SIZE].into_boxed_slice());
    Arc::new(HeapHal::from_static(region))
}

// ═══════════════════════════════════════════════════════════════════════════
// SoftQueue
// ═══════════════════════════════════════════════════════════════════════════

struct SoftState {
    size: u16,
    slots_used: u16,
    /// Device-owned, in post order.
    pending: VecDeque<Box<NetRequest>>,
    /// Completed, not yet retrieved, in completion order.
    used: VecDeque<Used>,
    kicks: u64,
    reject_posts: usize,
    max_slots_used: u16,
}

impl SoftState {
    fn complete(&mut self, pos: usize, written: impl FnOnce(&mut NetRequest) -> u32) -> bool {
        let Some(mut request) = self.pending.remove(pos) else {
            return false;
        };
        let written = written(&mut *request);
        self.used.push_back(Used { request, written });
        true
    }
}

/// Driver end of an in-memory virtqueue.
pub struct SoftQueue {
    index: u16,
    state: Arc<spin::Mutex<SoftState>>,
}

/// Device end of a [`SoftQueue`]. Clones share the queue.
#[derive(Clone)]
pub struct SoftDevice {
    state: Arc<spin::Mutex<SoftState>>,
}

impl SoftQueue {
    pub fn new(index: u16, size: u16) -> (Self, SoftDevice) {
        let state = Arc::new(spin::Mutex::new(SoftState {
            size,
            slots_used: 0,
            pending: VecDeque::new(),
            used: VecDeque::new(),
            kicks: 0,
            reject_posts: 0,
            max_slots_used: 0,
        }));
        (
            Self {
                index,
                state: Arc::clone(&state),
            },
            SoftDevice { state },
        )
    }
}

impl Virtqueue for SoftQueue {
    fn index(&self) -> u16 {
        self.index
    }

    fn size(&self) -> u16 {
        self.state.lock().size
    }

    fn has_room(&self, slots: u16) -> bool {
        let st = self.state.lock();
        st.size - st.slots_used >= slots
    }

    fn has_completions(&self) -> bool {
        !self.state.lock().used.is_empty()
    }

    fn post(&mut self, request: Box<NetRequest>) -> Result<(), Box<NetRequest>> {
        let mut st = self.state.lock();
        let slots = request.payload().len() as u16;
        if st.reject_posts > 0 {
            st.reject_posts -= 1;
            return Err(request);
        }
        if st.size - st.slots_used < slots {
            return Err(request);
        }
        st.slots_used += slots;
        st.max_slots_used = st.max_slots_used.max(st.slots_used);
        st.pending.push_back(request);
        Ok(())
    }

    fn retrieve_completed(&mut self) -> Option<Used> {
        let mut st = self.state.lock();
        let used = st.used.pop_front()?;
        st.slots_used -= used.request.payload().len() as u16;
        Some(used)
    }

    fn notify(&mut self) {
        self.state.lock().kicks += 1;
    }
}

impl SoftDevice {
    /// Requests the device holds, not yet completed.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Completed requests the driver has not retrieved.
    pub fn used(&self) -> usize {
        self.state.lock().used.len()
    }

    pub fn free_slots(&self) -> u16 {
        let st = self.state.lock();
        st.size - st.slots_used
    }

    /// Highest slot occupancy ever reached.
    pub fn max_slots_used(&self) -> u16 {
        self.state.lock().max_slots_used
    }

    /// Doorbells rung so far.
    pub fn kicks(&self) -> u64 {
        self.state.lock().kicks
    }

    /// Refuse the next `n` posts regardless of room.
    pub fn reject_posts(&self, n: usize) {
        self.state.lock().reject_posts = n;
    }

    /// Data-fragment addresses of pending requests, in post order.
    pub fn pending_data_addrs(&self) -> Vec<u64> {
        self.state.lock().pending.iter().map(|r| r.data_addr()).collect()
    }

    pub fn pending_states(&self) -> Vec<RequestState> {
        self.state.lock().pending.iter().map(|r| r.state()).collect()
    }

    /// Complete the oldest pending request with `written` bytes.
    pub fn complete_next(&self, written: u32) -> bool {
        self.complete_at(0, written)
    }

    /// Complete the `pos`-th pending request (0 = oldest).
    pub fn complete_at(&self, pos: usize, written: u32) -> bool {
        self.state.lock().complete(pos, |_| written)
    }

    /// Receive `frame` into the oldest pending buffer.
    pub fn receive(&self, frame: &[u8]) -> bool {
        self.receive_at(0, frame)
    }

    /// Receive `frame` into the `pos`-th pending buffer.
    pub fn receive_at(&self, pos: usize, frame: &[u8]) -> bool {
        self.state.lock().complete(pos, |req| req.device_write(frame))
    }

    /// Complete the oldest pending transmit, returning the bytes the device
    /// read.
    pub fn transmit_next(&self) -> Option<Vec<u8>> {
        let mut st = self.state.lock();
        let bytes = st.pending.front()?.device_read()?.to_vec();
        st.complete(0, |req| req.payload().total_len() as u32);
        Some(bytes)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CountingHal
// ═══════════════════════════════════════════════════════════════════════════

/// HAL wrapper with an allocation budget and live-page tracking.
pub struct CountingHal {
    inner: Arc<dyn Hal>,
    budget: AtomicUsize,
    allocs: AtomicU64,
    frees: AtomicU64,
    live: spin::Mutex<BTreeSet<usize>>,
}

impl CountingHal {
    pub fn new(inner: Arc<dyn Hal>) -> Self {
        Self {
            inner,
            budget: AtomicUsize::new(usize::MAX),
            allocs: AtomicU64::new(0),
            frees: AtomicU64::new(0),
            live: spin::Mutex::new(BTreeSet::new()),
        }
    }

    /// Heap-backed counting HAL with room for `pages` pages.
    pub fn with_pages(pages: usize) -> Arc<Self> {
        Arc::new(Self::new(heap_hal(pages)))
    }

    /// Fail every allocation after the next `n`.
    pub fn set_budget(&self, n: usize) {
        self.budget.store(n, Ordering::SeqCst);
    }

    /// Pages allocated and not yet freed.
    pub fn live(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_live(&self, addr: u64) -> bool {
        self.live.lock().contains(&(addr as usize))
    }

    pub fn allocs(&self) -> u64 {
        self.allocs.load(Ordering::SeqCst)
    }

    pub fn frees(&self) -> u64 {
        self.frees.load(Ordering::SeqCst)
    }
}

impl Hal for CountingHal {
    fn page_alloc(&self) -> Option<NonNull<u8>> {
        let take = self
            .budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |b| b.checked_sub(1));
        if take.is_err() {
            return None;
        }
        let page = self.inner.page_alloc()?;
        let fresh = self.live.lock().insert(page.as_ptr() as usize);
        assert!(fresh, "page {:p} handed out twice", page.as_ptr());
        self.allocs.fetch_add(1, Ordering::SeqCst);
        Some(page)
    }

    unsafe fn page_free(&self, page: NonNull<u8>) {
        let was_live = self.live.lock().remove(&(page.as_ptr() as usize));
        assert!(was_live, "page {:p} freed twice", page.as_ptr());
        self.frees.fetch_add(1, Ordering::SeqCst);
        self.inner.page_free(page);
    }

    fn virt_to_phys(&self, vaddr: usize) -> u64 {
        self.inner.virt_to_phys(vaddr)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SoftTransport
// ═══════════════════════════════════════════════════════════════════════════

/// Device state observable after the transport moved into the driver.
#[derive(Default)]
pub struct TransportProbe {
    status: AtomicU8,
    resets: AtomicU64,
    link: AtomicU8,
}

impl TransportProbe {
    pub fn status(&self) -> DeviceStatus {
        DeviceStatus::from_bits_truncate(self.status.load(Ordering::SeqCst))
    }

    pub fn resets(&self) -> u64 {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn set_link_up(&self, up: bool) {
        self.link.store(up as u8, Ordering::SeqCst);
    }
}

/// A virtio-net device on a fake bus.
pub struct SoftTransport {
    id: DeviceId,
    mac: MacAddress,
    features: u32,
    queues: Vec<Option<Box<dyn Virtqueue>>>,
    probe: Arc<TransportProbe>,
}

impl SoftTransport {
    /// Modern virtio-net device with MAC and STATUS features and the given
    /// queues at indices 0, 1, ...
    pub fn new(mac: MacAddress, queues: Vec<SoftQueue>) -> Self {
        let probe = Arc::new(TransportProbe::default());
        probe.set_link_up(true);
        Self {
            id: DeviceId::new(VIRTIO_VENDOR_ID, VIRTIO_NET_DEVICE_IDS[1]),
            mac,
            features: (1 << features::VIRTIO_NET_F_MAC) | (1 << features::VIRTIO_NET_F_STATUS),
            queues: queues
                .into_iter()
                .map(|q| Some(Box::new(q) as Box<dyn Virtqueue>))
                .collect(),
            probe,
        }
    }

    /// Device with an rx and a tx queue of the given sizes.
    pub fn net(mac: MacAddress, rx_size: u16, tx_size: u16) -> (Self, SoftDevice, SoftDevice) {
        let (rxq, rx) = SoftQueue::new(0, rx_size);
        let (txq, tx) = SoftQueue::new(1, tx_size);
        (Self::new(mac, vec![rxq, txq]), rx, tx)
    }

    pub fn with_id(mut self, id: DeviceId) -> Self {
        self.id = id;
        self
    }

    pub fn with_features(mut self, features: u32) -> Self {
        self.features = features;
        self
    }

    pub fn probe(&self) -> Arc<TransportProbe> {
        Arc::clone(&self.probe)
    }
}

impl VirtioTransport for SoftTransport {
    fn device_id(&self) -> DeviceId {
        self.id
    }

    fn read_config(&self) -> NetDeviceConfig {
        NetDeviceConfig {
            mac: self.mac,
            status: self.probe.link.load(Ordering::SeqCst) as u16,
        }
    }

    fn has_feature(&self, bit: u32) -> bool {
        bit < 32 && self.features & (1 << bit) != 0
    }

    fn take_queue(&mut self, index: u16) -> Option<Box<dyn Virtqueue>> {
        self.queues.get_mut(index as usize)?.take()
    }

    fn add_status(&mut self, status: DeviceStatus) {
        self.probe.status.fetch_or(status.bits(), Ordering::SeqCst);
    }

    fn reset(&mut self) {
        self.probe.status.store(0, Ordering::SeqCst);
        self.probe.resets.fetch_add(1, Ordering::SeqCst);
    }
}

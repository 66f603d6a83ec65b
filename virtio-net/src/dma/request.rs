//! Request records: the unit of work posted to a virtqueue.

use alloc::boxed::Box;

use super::ownership::RequestState;
use super::page::DmaPage;
use super::sglist::{Direction, Fragment, ScatterList};
use crate::client::TxFrame;
use crate::hal::Hal;
use crate::types::VirtioNetHdr;

/// Descriptor slots one request occupies (header + data).
pub const REQUEST_SLOTS: u16 = 2;

/// The logical buffer a request describes.
pub enum RequestBuffer {
    /// Receive: driver-owned page the device writes into.
    Rx(DmaPage),
    /// Transmit: the caller's frame, held until the device is done reading.
    Tx(Box<dyn TxFrame>),
}

/// Header + scatter list + ownership record.
///
/// Always lives in a `Box`: the header fragment points into the box, so the
/// record must not move while it is posted. The ring holds the box by value
/// for that whole time, which keeps the driver from touching it.
pub struct NetRequest {
    hdr: VirtioNetHdr,
    payload: ScatterList,
    state: RequestState,
    buffer: RequestBuffer,
}

impl NetRequest {
    /// Build a receive request: header, then `buf_len` bytes of `page`.
    /// Both fragments are device-writable.
    ///
    /// `buf_len` is clamped to the page.
    pub fn rx(page: DmaPage, buf_len: u32, hal: &dyn Hal) -> Box<Self> {
        let buf_len = buf_len.min(page.capacity() as u32);
        let data = Fragment::new(page.bus_addr(), buf_len, Direction::DeviceWritable);
        let mut req = Self::alloc(RequestBuffer::Rx(page));
        let hdr = req.header_fragment(Direction::DeviceWritable, hal);
        req.payload.push(hdr);
        req.payload.push(data);
        req
    }

    /// Build a transmit request: the caller's frame, then the header.
    /// Both fragments are device-readable. The frame is not copied.
    pub fn tx(frame: Box<dyn TxFrame>, hal: &dyn Hal) -> Box<Self> {
        let bytes = frame.bytes();
        let data = Fragment::new(
            hal.virt_to_phys(bytes.as_ptr() as usize),
            bytes.len() as u32,
            Direction::DeviceReadable,
        );
        let mut req = Self::alloc(RequestBuffer::Tx(frame));
        let hdr = req.header_fragment(Direction::DeviceReadable, hal);
        req.payload.push(data);
        req.payload.push(hdr);
        req
    }

    fn alloc(buffer: RequestBuffer) -> Box<Self> {
        Box::new(Self {
            hdr: VirtioNetHdr::zeroed(),
            payload: ScatterList::new(),
            state: RequestState::Free,
            buffer,
        })
    }

    // Only valid once boxed: the header address is the box's.
    fn header_fragment(&self, dir: Direction, hal: &dyn Hal) -> Fragment {
        let addr = hal.virt_to_phys(&self.hdr as *const VirtioNetHdr as usize);
        Fragment::new(addr, VirtioNetHdr::SIZE as u32, dir)
    }

    /// Data fragment: after the header on rx, before it on tx.
    fn data_fragment(&self) -> Option<&Fragment> {
        let index = if self.is_rx() { 1 } else { 0 };
        self.payload.as_slice().get(index)
    }

    pub fn header(&self) -> &VirtioNetHdr {
        &self.hdr
    }

    /// The descriptor chain to post.
    pub fn payload(&self) -> &ScatterList {
        &self.payload
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn is_rx(&self) -> bool {
        matches!(self.buffer, RequestBuffer::Rx(_))
    }

    /// Address of the data fragment (page or frame).
    pub fn data_addr(&self) -> u64 {
        self.data_fragment().map_or(0, |f| f.addr)
    }

    fn transition(&mut self, next: RequestState) {
        debug_assert!(
            self.state.can_transition(next),
            "BUG: illegal request transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }

    /// Mark posted. Call immediately before handing the request to the ring.
    pub fn mark_posted(&mut self) {
        self.transition(RequestState::Posted);
    }

    /// Ring refused the post; the driver owns the request again.
    pub fn mark_rejected(&mut self) {
        self.transition(RequestState::Free);
    }

    /// Device returned the request through the used ring.
    pub fn mark_completed(&mut self) {
        self.transition(RequestState::Completed);
    }

    /// Release the record and hand its buffer to the caller.
    pub fn reclaim(mut self: Box<Self>) -> RequestBuffer {
        debug_assert!(
            self.state.can_access(),
            "BUG: reclaiming request the device still owns"
        );
        self.transition(RequestState::Reclaimed);
        let Self { buffer, .. } = *self;
        buffer
    }

    /// Take the buffer back from a request that never reached the device.
    pub fn discard(self: Box<Self>) -> RequestBuffer {
        debug_assert!(
            self.state == RequestState::Free,
            "BUG: discarding request in state {:?}",
            self.state
        );
        let Self { buffer, .. } = *self;
        buffer
    }

    /// Device side of a receive: store `frame` in the data fragment.
    /// Returns the used length a device would report (header included).
    #[cfg(any(test, feature = "test-support"))]
    pub(crate) fn device_write(&mut self, frame: &[u8]) -> u32 {
        let data_len = self.data_fragment().map_or(0, |f| f.len as usize);
        match &mut self.buffer {
            RequestBuffer::Rx(page) => {
                let n = frame.len().min(data_len);
                page.as_mut_slice()[..n].copy_from_slice(&frame[..n]);
                (VirtioNetHdr::SIZE + n) as u32
            }
            RequestBuffer::Tx(_) => 0,
        }
    }

    /// Device side of a transmit: the frame bytes it would read.
    #[cfg(any(test, feature = "test-support"))]
    pub(crate) fn device_read(&self) -> Option<&[u8]> {
        match &self.buffer {
            RequestBuffer::Tx(frame) => Some(frame.bytes()),
            RequestBuffer::Rx(_) => None,
        }
    }

    /// Frame length for a receive completion of `written` bytes
    /// (header excluded, clamped to the data fragment).
    pub fn rx_frame_len(&self, written: u32) -> usize {
        let data_len = self.data_fragment().map_or(0, |f| f.len as usize);
        (written as usize)
            .saturating_sub(VirtioNetHdr::SIZE)
            .min(data_len)
    }
}

//! Page-sized DMA buffer owned by the driver or the upper layer.

use alloc::sync::Arc;
use core::ptr::NonNull;

use crate::hal::{Hal, PAGE_SIZE};

/// One page of device-visible memory.
///
/// Tracks both CPU and bus addresses. The page goes back to the HAL that
/// allocated it when this handle is dropped, so a page can only be handed out
/// again once every owner (ring, request, frame) has let go of it.
pub struct DmaPage {
    /// CPU-accessible pointer to page data.
    cpu_ptr: NonNull<u8>,
    /// Device-visible bus address.
    bus_addr: u64,
    hal: Arc<dyn Hal>,
}

impl DmaPage {
    /// Allocate a page from `hal`.
    ///
    /// Returns `None` when the allocator is exhausted.
    pub fn alloc(hal: &Arc<dyn Hal>) -> Option<Self> {
        let cpu_ptr = hal.page_alloc()?;
        let bus_addr = hal.virt_to_phys(cpu_ptr.as_ptr() as usize);
        Some(Self {
            cpu_ptr,
            bus_addr,
            hal: Arc::clone(hal),
        })
    }

    /// Allocate and zero a page.
    pub fn alloc_zeroed(hal: &Arc<dyn Hal>) -> Option<Self> {
        let mut page = Self::alloc(hal)?;
        page.zero();
        Some(page)
    }

    pub fn zero(&mut self) {
        self.as_mut_slice().fill(0);
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the HAL hands out PAGE_SIZE bytes that stay valid until
        // page_free, which only Drop calls.
        unsafe { core::slice::from_raw_parts(self.cpu_ptr.as_ptr(), PAGE_SIZE) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above; &mut self guarantees exclusive access.
        unsafe { core::slice::from_raw_parts_mut(self.cpu_ptr.as_ptr(), PAGE_SIZE) }
    }

    /// Get the device-visible bus address.
    pub fn bus_addr(&self) -> u64 {
        self.bus_addr
    }

    pub fn capacity(&self) -> usize {
        PAGE_SIZE
    }
}

impl Drop for DmaPage {
    fn drop(&mut self) {
        // SAFETY: cpu_ptr came from this HAL's page_alloc and is freed once.
        unsafe { self.hal.page_free(self.cpu_ptr) }
    }
}

// The page is plain memory; ownership of the handle is ownership of the bytes.
unsafe impl Send for DmaPage {}
unsafe impl Sync for DmaPage {}

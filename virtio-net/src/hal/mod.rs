//! Hardware abstraction for DMA memory.
//!
//! The driver never allocates device-visible memory itself. It asks a [`Hal`]
//! for pages and for the bus address of anything it places in a descriptor
//! (request headers, caller frames).
//!
//! # Usage
//!
//! ```ignore
//! use morpheus_virtio_net::hal::{Hal, HeapHal};
//!
//! static mut DMA_REGION: [u8; 256 * 1024] = [0; 256 * 1024];
//! let hal: Arc<dyn Hal> = Arc::new(unsafe { HeapHal::new(DMA_REGION.as_mut_ptr(), DMA_REGION.len()) });
//! ```

use core::ptr::NonNull;

mod heap;

pub use heap::{HeapHal, HeapStats};

/// Page size (4KB).
pub const PAGE_SIZE: usize = 4096;

/// Memory allocator + address translation, supplied by the platform.
pub trait Hal: Send + Sync {
    /// Allocate one `PAGE_SIZE`, page-aligned page.
    ///
    /// Returns `None` when out of memory. Contents are unspecified.
    fn page_alloc(&self) -> Option<NonNull<u8>>;

    /// Return a page to the allocator.
    ///
    /// # Safety
    /// `page` must come from `page_alloc` on this HAL and must not be used
    /// afterwards.
    unsafe fn page_free(&self, page: NonNull<u8>);

    /// Translate a CPU virtual address to the device-visible bus address.
    fn virt_to_phys(&self, vaddr: usize) -> u64;
}

/// Align a value up to the given alignment.
#[inline]
pub const fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

//! Heap-backed page allocator.
//!
//! Uses linked_list_allocator over a caller-provided region to hand out
//! page-aligned DMA pages.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              DMA region (identity or offset mapped)         │
//! │                                                             │
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │         linked_list_allocator::Heap                 │   │
//! │  │   Free List: [hole] -> [hole] -> [hole] -> ...      │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//!      bus address = cpu address - cpu_base + bus_base
//! ```

use core::alloc::Layout;
use core::ptr::NonNull;

use linked_list_allocator::Heap;

use super::{align_up, Hal, PAGE_SIZE};

fn page_layout() -> Layout {
    // PAGE_SIZE is a non-zero power of two.
    Layout::from_size_align(PAGE_SIZE, PAGE_SIZE).unwrap_or(Layout::new::<u8>())
}

/// Page allocator over a fixed memory region.
pub struct HeapHal {
    inner: spin::Mutex<Heap>,
    cpu_base: usize,
    bus_base: u64,
    size: usize,
}

impl HeapHal {
    /// Identity-mapped region (`bus == cpu`).
    ///
    /// # Safety
    /// - `start..start + size` must be valid, writable memory used by nothing
    ///   else for the lifetime of the HAL
    /// - The region must be reachable by the device at the same address
    pub unsafe fn new(start: *mut u8, size: usize) -> Self {
        Self::with_bus_base(start, size, start as u64)
    }

    /// Region whose device-visible address starts at `bus_base`.
    ///
    /// # Safety
    /// Same as [`HeapHal::new`], and `bus_base` must map to `start`.
    pub unsafe fn with_bus_base(start: *mut u8, size: usize, bus_base: u64) -> Self {
        Self {
            inner: spin::Mutex::new(Heap::new(start, size)),
            cpu_base: start as usize,
            bus_base,
            size,
        }
    }

    /// Take ownership of a `'static` region.
    pub fn from_static(region: &'static mut [u8]) -> Self {
        // SAFETY: the exclusive 'static borrow is never given back.
        unsafe { Self::new(region.as_mut_ptr(), region.len()) }
    }

    /// Upper bound on pages this region can ever hold at once.
    pub fn max_pages(&self) -> usize {
        let first = align_up(self.cpu_base, PAGE_SIZE);
        (self.cpu_base + self.size).saturating_sub(first) / PAGE_SIZE
    }

    pub fn stats(&self) -> HeapStats {
        let heap = self.inner.lock();
        HeapStats {
            total_size: self.size,
            used: heap.used(),
            free: heap.free(),
        }
    }

    fn contains(&self, vaddr: usize) -> bool {
        vaddr >= self.cpu_base && vaddr < self.cpu_base + self.size
    }
}

impl Hal for HeapHal {
    fn page_alloc(&self) -> Option<NonNull<u8>> {
        self.inner.lock().allocate_first_fit(page_layout()).ok()
    }

    unsafe fn page_free(&self, page: NonNull<u8>) {
        debug_assert!(self.contains(page.as_ptr() as usize), "page not from this heap");
        self.inner.lock().deallocate(page, page_layout());
    }

    fn virt_to_phys(&self, vaddr: usize) -> u64 {
        if self.contains(vaddr) {
            self.bus_base + (vaddr - self.cpu_base) as u64
        } else {
            // Outside the DMA region (request headers on the global heap,
            // caller frames): the platform identity-maps those.
            vaddr as u64
        }
    }
}

/// Heap statistics
#[derive(Debug, Clone, Copy)]
pub struct HeapStats {
    pub total_size: usize,
    pub used: usize,
    pub free: usize,
}

//! Backing-memory origins
//!
//! An origin is whatever keeps a region alive. Views hold it behind an `Arc`
//! purely for lifetime; only the owning wrapper may release it.

use crate::error::{FfiError, Result};
use crate::logging::{log_allocation, log_deallocation};
use crate::platform::BUFFER_ALIGN;
use std::alloc::{self, Layout};
use std::sync::atomic::{AtomicBool, Ordering};

/// Lifetime anchor for a memory region
pub(crate) trait Origin: Send + Sync {
    /// False once the region has been released
    fn is_live(&self) -> bool {
        true
    }
}

/// Heap allocation behind an owned buffer
///
/// Over-allocates by `BUFFER_ALIGN - 1` bytes so the usable address can be
/// aligned up regardless of the allocator's own guarantees.
pub(crate) struct Allocation {
    base: *mut u8,
    layout: Layout,
    address: usize,
    size: usize,
    allocated: AtomicBool,
    autorelease: AtomicBool,
}

// SAFETY: the raw base pointer is only dereferenced by dealloc, which is
// guarded by the atomic `allocated` flag
unsafe impl Send for Allocation {}
unsafe impl Sync for Allocation {}

impl Allocation {
    pub(crate) fn new(size: usize, clear: bool) -> Result<Self> {
        let total = size
            .checked_add(BUFFER_ALIGN - 1)
            .ok_or(FfiError::OutOfMemory { requested: size })?;
        let layout =
            Layout::from_size_align(total, 1).map_err(|_| FfiError::OutOfMemory { requested: size })?;

        // SAFETY: layout has non-zero size
        let base = unsafe {
            if clear {
                alloc::alloc_zeroed(layout)
            } else {
                alloc::alloc(layout)
            }
        };
        if base.is_null() {
            return Err(FfiError::OutOfMemory { requested: size });
        }

        let address = crate::platform::align_up(base as usize, BUFFER_ALIGN);
        log_allocation(size, address as *const u8);

        Ok(Self {
            base,
            layout,
            address,
            size,
            allocated: AtomicBool::new(true),
            autorelease: AtomicBool::new(true),
        })
    }

    #[inline]
    pub(crate) fn address(&self) -> usize {
        self.address
    }

    #[inline]
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub(crate) fn is_allocated(&self) -> bool {
        self.allocated.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn is_autorelease(&self) -> bool {
        self.autorelease.load(Ordering::Acquire)
    }

    pub(crate) fn set_autorelease(&self, autorelease: bool) {
        self.autorelease.store(autorelease, Ordering::Release);
    }

    /// Release now; later calls are no-ops
    pub(crate) fn free(&self) {
        if self.allocated.swap(false, Ordering::AcqRel) {
            log_deallocation(self.address as *const u8);
            // SAFETY: base/layout come from the matching alloc call and the
            // swap above guarantees exactly one dealloc
            unsafe { alloc::dealloc(self.base, self.layout) };
        }
    }
}

impl Origin for Allocation {
    fn is_live(&self) -> bool {
        self.is_allocated()
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        if self.is_autorelease() {
            self.free();
        }
    }
}

//! Raw memory - bounds-checked views over native bytes
//!
//! Design: one `Memory` view type for every region, whatever owns it.
//!
//! Architecture:
//! - `access.rs` - typed primitive, array, byte and C-string accessors
//! - `ops.rs` - kind-indexed get/put operation table
//! - `pointer.rs` - bare addresses, offsets and slices
//! - `allocation.rs` - origins that keep backing memory alive
//! - `memory_pointer.rs` - malloc-backed owned buffers
//! - `buffer.rs` - managed-heap buffers
//! - `auto_pointer.rs` - foreign memory with a custom release function
//!
//! Every view may carry an origin. Derived views clone it, so the backing
//! region lives as long as any view does. Raw addresses built from integers
//! have no origin and are not validated beyond their declared size.

mod access;
mod allocation;
mod auto_pointer;
mod buffer;
mod memory_pointer;
mod ops;
mod pointer;

pub use auto_pointer::AutoPointer;
pub use buffer::{Buffer, Direction};
pub use memory_pointer::MemoryPointer;

pub(crate) use allocation::Origin;
pub(crate) use ops::op_for;

use crate::error::{FfiError, Result};
use crate::platform::{Endian, HOST_ENDIAN};
use bitflags::bitflags;
use std::fmt;
use std::sync::Arc;

/// Size reported by views over memory of unknown extent
pub const UNBOUNDED: usize = usize::MAX;

bitflags! {
    /// Access permitted through a view
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

/// View over a native memory region
#[derive(Clone)]
pub struct Memory {
    address: usize,
    size: usize,
    type_size: usize,
    access: Access,
    swapped: bool,
    origin: Option<Arc<dyn Origin>>,
}

// SAFETY: a view is an address plus metadata; synchronizing access to the bytes
// is the caller's responsibility, as for raw memory
unsafe impl Send for Memory {}
unsafe impl Sync for Memory {}

impl Memory {
    pub(crate) fn from_raw_parts(
        address: usize,
        size: usize,
        type_size: usize,
        origin: Option<Arc<dyn Origin>>,
    ) -> Self {
        Self {
            address,
            size,
            type_size: type_size.max(1),
            access: Access::READ_WRITE,
            swapped: false,
            origin,
        }
    }

    #[inline]
    pub fn address(&self) -> usize {
        self.address
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.address == 0
    }

    /// Byte length, `UNBOUNDED` for bare pointers
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn is_unbounded(&self) -> bool {
        self.size == UNBOUNDED
    }

    /// Element size used by `index`, defaults to one byte
    #[inline]
    pub fn type_size(&self) -> usize {
        self.type_size
    }

    #[inline]
    pub fn access(&self) -> Access {
        self.access
    }

    /// Same region with a restricted access mask
    pub fn with_access(&self, access: Access) -> Memory {
        Memory {
            access,
            ..self.clone()
        }
    }

    pub fn read_only(&self) -> Memory {
        self.with_access(Access::READ)
    }

    /// Byte order of multi-byte reads and writes
    pub fn endian(&self) -> Endian {
        match (self.swapped, HOST_ENDIAN) {
            (false, host) => host,
            (true, Endian::Little) => Endian::Big,
            (true, _) => Endian::Little,
        }
    }

    /// Same region read and written in the requested byte order
    pub fn order(&self, endian: Endian) -> Memory {
        Memory {
            swapped: endian.resolve() != HOST_ENDIAN,
            ..self.clone()
        }
    }

    #[inline]
    pub(crate) fn is_swapped(&self) -> bool {
        self.swapped
    }

    pub(crate) fn origin(&self) -> Option<&Arc<dyn Origin>> {
        self.origin.as_ref()
    }

    /// Validate an access of `width` bytes at `offset` and return its address
    ///
    /// Nothing is read or written before this succeeds.
    #[inline]
    pub(crate) fn check(&self, offset: usize, width: usize, access: Access) -> Result<*mut u8> {
        if self.address == 0 {
            return Err(FfiError::NullPointer { context: None });
        }
        if let Some(origin) = &self.origin {
            if !origin.is_live() {
                return Err(FfiError::runtime("memory freed"));
            }
        }
        if !self.access.contains(access) {
            return Err(FfiError::runtime(if access.contains(Access::WRITE) {
                "memory is not writable"
            } else {
                "memory is not readable"
            }));
        }
        match offset.checked_add(width) {
            Some(end) if end <= self.size => Ok(self.address.wrapping_add(offset) as *mut u8),
            _ => Err(FfiError::Bounds {
                offset: offset as i64,
                size: width,
                total: self.size,
            }),
        }
    }

    /// Zero-fill the whole view
    pub fn clear(&self) -> Result<()> {
        if self.is_unbounded() {
            return Err(FfiError::argument("cannot clear memory of unbounded size"));
        }
        let ptr = self.check(0, self.size, Access::WRITE)?;
        // SAFETY: the whole range was validated by check
        unsafe { std::ptr::write_bytes(ptr, 0, self.size) };
        Ok(())
    }

    /// Copy `len` bytes from `src` into this view at `offset`
    pub fn copy_from(&self, offset: usize, src: &Memory, len: usize) -> Result<()> {
        let from = src.check(0, len, Access::READ)?;
        let to = self.check(offset, len, Access::WRITE)?;
        // SAFETY: both ranges validated; regions may overlap
        unsafe { std::ptr::copy(from, to, len) };
        Ok(())
    }
}

impl PartialEq for Memory {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Memory {}

impl fmt::Debug for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unbounded() {
            write!(f, "Memory(address={:#x})", self.address)
        } else {
            write!(f, "Memory(address={:#x}, size={})", self.address, self.size)
        }
    }
}

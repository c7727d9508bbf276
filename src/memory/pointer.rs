//! Bare addresses and derived views

use super::{Memory, UNBOUNDED};
use crate::error::{FfiError, Result};

impl Memory {
    /// Wrap a native address of unknown extent
    ///
    /// Only the declared size is checked. Dereferencing an arbitrary address
    /// may crash the process.
    pub fn pointer(address: usize) -> Memory {
        Memory::from_raw_parts(address, UNBOUNDED, 1, None)
    }

    /// Wrap a native address with a known byte length
    pub fn sized(address: usize, size: usize) -> Memory {
        Memory::from_raw_parts(address, size, 1, None)
    }

    pub fn null() -> Memory {
        Memory::pointer(0)
    }

    /// Same address, new element size
    pub fn typed(&self, type_size: usize) -> Memory {
        Memory::from_raw_parts(self.address(), self.size(), type_size, self.origin().cloned())
            .with_access(self.access())
            .order(self.endian())
    }

    /// View starting `delta` bytes further on, sharing the origin
    pub fn offset(&self, delta: isize) -> Result<Memory> {
        if self.is_unbounded() {
            return Ok(self.derive(self.address().wrapping_add_signed(delta), UNBOUNDED));
        }
        let forward = usize::try_from(delta).map_err(|_| self.bounds(delta as i64, 0))?;
        if forward > self.size() {
            return Err(self.bounds(delta as i64, 0));
        }
        Ok(self.derive(self.address() + forward, self.size() - forward))
    }

    /// `size` bytes starting at `offset`, sharing the origin
    pub fn slice(&self, offset: usize, size: usize) -> Result<Memory> {
        match offset.checked_add(size) {
            Some(end) if end <= self.size() => Ok(self.derive(self.address() + offset, size)),
            _ => Err(self.bounds(offset as i64, size)),
        }
    }

    fn derive(&self, address: usize, size: usize) -> Memory {
        Memory::from_raw_parts(address, size, self.type_size(), self.origin().cloned())
            .with_access(self.access())
            .order(self.endian())
    }

    fn bounds(&self, offset: i64, size: usize) -> FfiError {
        FfiError::Bounds {
            offset,
            size,
            total: self.size(),
        }
    }
}

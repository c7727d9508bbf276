//! Owned native buffers

use super::allocation::{Allocation, Origin};
use super::Memory;
use crate::error::{FfiError, Result};
use std::ops::Deref;
use std::sync::Arc;

/// Heap buffer released when the last view of it is dropped
///
/// `free()` releases immediately and is idempotent. `set_autorelease(false)`
/// hands ownership elsewhere: nothing is released on drop.
#[derive(Clone)]
pub struct MemoryPointer {
    memory: Memory,
    allocation: Arc<Allocation>,
}

impl MemoryPointer {
    /// Allocate `type_size * count` bytes aligned to 8
    pub fn new(type_size: usize, count: usize, clear: bool) -> Result<Self> {
        let size = type_size
            .checked_mul(count)
            .ok_or(FfiError::OutOfMemory { requested: usize::MAX })?;
        let allocation = Arc::new(Allocation::new(size, clear)?);
        let origin: Arc<dyn Origin> = allocation.clone();
        let memory = Memory::from_raw_parts(allocation.address(), size, type_size, Some(origin));
        Ok(Self { memory, allocation })
    }

    /// Zero-filled buffer of `size` bytes
    pub fn zeroed(size: usize) -> Result<Self> {
        Self::new(1, size, true)
    }

    /// Copy of the string bytes plus one trailing NUL
    pub fn from_string(s: &str) -> Result<Self> {
        Self::from_bytes(s.as_bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let ptr = Self::new(1, bytes.len() + 1, false)?;
        ptr.memory.write_bytes(0, bytes)?;
        ptr.memory.write_uint8(bytes.len(), 0)?;
        Ok(ptr)
    }

    /// Release the allocation now; a second call is a no-op
    pub fn free(&self) {
        self.allocation.free();
    }

    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.allocation.is_allocated()
    }

    pub fn set_autorelease(&self, autorelease: bool) {
        self.allocation.set_autorelease(autorelease);
    }

    #[inline]
    pub fn is_autorelease(&self) -> bool {
        self.allocation.is_autorelease()
    }

    /// View of element `index`, sized to one element
    pub fn index(&self, index: usize) -> Result<Memory> {
        let type_size = self.memory.type_size();
        let offset = index
            .checked_mul(type_size)
            .ok_or(FfiError::Bounds {
                offset: i64::MAX,
                size: type_size,
                total: self.memory.size(),
            })?;
        self.memory.slice(offset, type_size)
    }

    #[inline]
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn into_memory(self) -> Memory {
        self.memory
    }

    /// Bytes requested at allocation time
    #[inline]
    pub fn allocated_size(&self) -> usize {
        self.allocation.size()
    }
}

impl Deref for MemoryPointer {
    type Target = Memory;

    fn deref(&self) -> &Memory {
        &self.memory
    }
}

impl From<MemoryPointer> for Memory {
    fn from(ptr: MemoryPointer) -> Self {
        ptr.memory
    }
}

impl From<MemoryPointer> for crate::value::Value {
    fn from(ptr: MemoryPointer) -> Self {
        crate::value::Value::Pointer(ptr.memory)
    }
}

impl std::fmt::Debug for MemoryPointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MemoryPointer(address={:#x}, size={}, allocated={})",
            self.memory.address(),
            self.memory.size(),
            self.is_allocated()
        )
    }
}

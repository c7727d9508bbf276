//! Managed-heap buffers for native in/out parameters

use super::allocation::Origin;
use super::Memory;
use crate::error::{FfiError, Result};
use crate::logging::{log_allocation, log_deallocation};
use std::ops::Deref;
use std::sync::Arc;

/// Which way data flows through a buffer parameter
///
/// Recorded for the caller's benefit only. Every direction allocates the same
/// zeroed storage and no copy-in or copy-out happens around a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
    InOut,
}

/// Word-aligned storage owned through a raw pointer so views may write to it
struct BufferStorage {
    words: *mut [u64],
}

// SAFETY: storage is only released in Drop, after every view is gone
unsafe impl Send for BufferStorage {}
unsafe impl Sync for BufferStorage {}

impl BufferStorage {
    fn new(size: usize) -> Result<Self> {
        let count = size.div_ceil(8);
        let mut words: Vec<u64> = Vec::new();
        words
            .try_reserve_exact(count)
            .map_err(|_| FfiError::OutOfMemory { requested: size })?;
        words.resize(count, 0);
        Ok(Self {
            words: Box::into_raw(words.into_boxed_slice()),
        })
    }

    fn address(&self) -> usize {
        self.words as *mut u64 as usize
    }
}

impl Origin for BufferStorage {}

impl Drop for BufferStorage {
    fn drop(&mut self) {
        log_deallocation(self.address() as *const u8);
        // SAFETY: produced by Box::into_raw in new and dropped exactly once
        drop(unsafe { Box::from_raw(self.words) });
    }
}

/// Zero-initialized buffer that is always released on drop
#[derive(Clone, Debug)]
pub struct Buffer {
    memory: Memory,
    direction: Direction,
}

impl Buffer {
    pub fn new(type_size: usize, count: usize, direction: Direction) -> Result<Self> {
        let size = type_size
            .checked_mul(count)
            .ok_or(FfiError::OutOfMemory { requested: usize::MAX })?;
        let storage = Arc::new(BufferStorage::new(size)?);
        log_allocation(size, storage.address() as *const u8);
        let address = storage.address();
        let origin: Arc<dyn Origin> = storage;
        Ok(Self {
            memory: Memory::from_raw_parts(address, size, type_size, Some(origin)),
            direction,
        })
    }

    pub fn alloc_in(type_size: usize, count: usize) -> Result<Self> {
        Self::new(type_size, count, Direction::In)
    }

    pub fn alloc_out(type_size: usize, count: usize) -> Result<Self> {
        Self::new(type_size, count, Direction::Out)
    }

    pub fn alloc_inout(type_size: usize, count: usize) -> Result<Self> {
        Self::new(type_size, count, Direction::InOut)
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[inline]
    pub fn memory(&self) -> &Memory {
        &self.memory
    }
}

impl Deref for Buffer {
    type Target = Memory;

    fn deref(&self) -> &Memory {
        &self.memory
    }
}

impl From<Buffer> for crate::value::Value {
    fn from(buffer: Buffer) -> Self {
        crate::value::Value::Pointer(buffer.memory)
    }
}

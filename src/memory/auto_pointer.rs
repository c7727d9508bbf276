//! Foreign memory released through a caller-supplied function

use super::allocation::Origin;
use super::Memory;
use crate::error::{FfiError, Result};
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type Releaser = Box<dyn FnOnce(usize) + Send>;

struct ReleaseHandle {
    address: usize,
    release: Mutex<Option<Releaser>>,
    released: AtomicBool,
    autorelease: AtomicBool,
}

impl ReleaseHandle {
    fn release(&self) {
        let release = self.release.lock().take();
        if let Some(release) = release {
            self.released.store(true, Ordering::Release);
            release(self.address);
        }
    }
}

impl Origin for ReleaseHandle {
    fn is_live(&self) -> bool {
        !self.released.load(Ordering::Acquire)
    }
}

impl Drop for ReleaseHandle {
    fn drop(&mut self) {
        if self.autorelease.load(Ordering::Acquire) {
            self.release();
        }
    }
}

/// Pointer whose release function runs exactly once
///
/// Runs on explicit `free()` or when the last view is dropped, unless
/// autorelease was switched off.
#[derive(Clone)]
pub struct AutoPointer {
    memory: Memory,
    handle: Arc<ReleaseHandle>,
}

impl AutoPointer {
    pub fn new<F>(pointer: &Memory, release: F) -> Result<Self>
    where
        F: FnOnce(usize) + Send + 'static,
    {
        if pointer.origin().is_some() {
            return Err(FfiError::type_mismatch(
                "foreign pointer",
                "memory that already has an owner",
            ));
        }
        let handle = Arc::new(ReleaseHandle {
            address: pointer.address(),
            release: Mutex::new(Some(Box::new(release))),
            released: AtomicBool::new(false),
            autorelease: AtomicBool::new(true),
        });
        let origin: Arc<dyn Origin> = handle.clone();
        let memory = Memory::from_raw_parts(
            pointer.address(),
            pointer.size(),
            pointer.type_size(),
            Some(origin),
        );
        Ok(Self { memory, handle })
    }

    /// Run the release function now; later calls are no-ops
    pub fn free(&self) {
        self.handle.release();
    }

    pub fn set_autorelease(&self, autorelease: bool) {
        self.handle.autorelease.store(autorelease, Ordering::Release);
    }

    pub fn is_autorelease(&self) -> bool {
        self.handle.autorelease.load(Ordering::Acquire)
    }

    pub fn is_released(&self) -> bool {
        !self.handle.is_live()
    }

    #[inline]
    pub fn memory(&self) -> &Memory {
        &self.memory
    }
}

impl Deref for AutoPointer {
    type Target = Memory;

    fn deref(&self) -> &Memory {
        &self.memory
    }
}

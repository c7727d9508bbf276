//! Native closures - trampolines that let native code call managed closures
//!
//! Design: fixed trampolines from a process-wide pool, never freed.
//!
//! Architecture:
//! - `mod.rs` - slot pool (batches of libffi closures, free list, live map)
//! - `dispatch.rs` - the single native entry point and parked callback errors
//! - `callback.rs` - `NativeCallback` handles and the per-proc cache
//!
//! libffi owns executable memory (`closure_alloc` handles W^X). A slot is
//! rebound only after its `Trampoline` is dropped, which happens only after
//! every `NativeCallback` using it is gone.

mod callback;
pub(crate) mod dispatch;

#[cfg(test)]
mod tests;

pub use callback::{make_callback, NativeCallback};

use crate::config;
use crate::error::{FfiError, Result};
use crate::interop::Signature;
use crate::logging::{log_pool_grow, log_trampoline_bind, log_trampoline_release, perf, warn};
use crate::platform::page_size;
use crate::value::ProcFn;
use dashmap::DashMap;
use libffi::low::{self, ffi_closure, CodePtr};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Closure and signature a slot currently dispatches to
pub(crate) struct Binding {
    pub(crate) signature: Signature,
    pub(crate) func: Arc<ProcFn>,
}

/// Heap context handed to the dispatcher as libffi user data
pub(crate) struct SlotContext {
    pub(crate) code: usize,
    pub(crate) binding: Mutex<Option<Arc<Binding>>>,
}

struct Slot {
    closure: *mut ffi_closure,
    code: CodePtr,
    context: Box<SlotContext>,
}

// SAFETY: the closure and code pointers are only written by prep_closure while
// the slot is checked out of the free list by a single owner
unsafe impl Send for Slot {}
unsafe impl Sync for Slot {}

type LiveKey = (u64, usize);

/// Process-wide trampoline pool
pub struct ClosurePool {
    free: Mutex<Vec<&'static Slot>>,
    live: DashMap<LiveKey, Weak<Trampoline>>,
    batch: usize,
    total: AtomicUsize,
}

static POOL: Lazy<ClosurePool> = Lazy::new(ClosurePool::from_config);

/// The global pool
pub fn pool() -> &'static ClosurePool {
    &POOL
}

/// Pool counters for monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total_slots: usize,
    pub free_slots: usize,
    pub live_trampolines: usize,
}

impl ClosurePool {
    fn from_config() -> Self {
        let settings = &config::get().trampolines;
        let batch = settings
            .slots_per_batch
            .unwrap_or_else(|| page_size() / std::mem::size_of::<ffi_closure>())
            .max(1);

        let pool = Self {
            free: Mutex::new(Vec::new()),
            live: DashMap::new(),
            batch,
            total: AtomicUsize::new(0),
        };
        for _ in 0..settings.prealloc_batches {
            if let Err(e) = pool.grow(&mut pool.free.lock()) {
                warn!(error = %e, "trampoline preallocation failed");
                break;
            }
        }
        pool
    }

    /// Slots allocated per growth step
    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total_slots: self.total.load(Ordering::Relaxed),
            free_slots: self.free.lock().len(),
            live_trampolines: self
                .live
                .iter()
                .filter(|entry| entry.value().strong_count() > 0)
                .count(),
        }
    }

    /// Allocate one batch of slots into `free`
    fn grow(&self, free: &mut Vec<&'static Slot>) -> Result<()> {
        let _timer = perf::track("trampoline_pool_grow");
        let mut added = 0;
        for _ in 0..self.batch {
            // SAFETY: closure_alloc has no preconditions
            let (closure, code) = unsafe { low::closure_alloc() };
            if closure.is_null() {
                break;
            }
            let context = Box::new(SlotContext {
                code: code.as_ptr() as usize,
                binding: Mutex::new(None),
            });
            free.push(Box::leak(Box::new(Slot {
                closure,
                code,
                context,
            })));
            added += 1;
        }
        if added == 0 {
            return Err(FfiError::OutOfMemory {
                requested: std::mem::size_of::<ffi_closure>(),
            });
        }
        let total = self.total.fetch_add(added, Ordering::Relaxed) + added;
        log_pool_grow(added, total);
        Ok(())
    }

    fn acquire(&self) -> Result<&'static Slot> {
        let mut free = self.free.lock();
        if free.is_empty() {
            self.grow(&mut free)?;
        }
        free.pop()
            .ok_or_else(|| FfiError::runtime("trampoline pool exhausted"))
    }

    fn release(&self, slot: &'static Slot) {
        self.free.lock().push(slot);
    }

    /// Live trampoline already bound for this closure and signature
    pub(crate) fn lookup(&self, proc_id: u64, signature: &Signature) -> Option<Arc<Trampoline>> {
        self.live
            .get(&(proc_id, signature.id()))
            .and_then(|weak| weak.upgrade())
    }

    /// Program a free slot to call `func` with `signature`
    pub(crate) fn bind(
        &'static self,
        signature: &Signature,
        func: Arc<ProcFn>,
        proc_id: u64,
    ) -> Result<Arc<Trampoline>> {
        let slot = self.acquire()?;
        *slot.context.binding.lock() = Some(Arc::new(Binding {
            signature: signature.clone(),
            func,
        }));

        // SAFETY: the CIF lives as long as the binding's signature, and the
        // context is leaked along with the slot
        let prepared = unsafe {
            low::prep_closure(
                slot.closure,
                signature.cif(),
                dispatch::entry,
                &*slot.context as *const SlotContext,
                slot.code,
            )
        };
        if let Err(e) = prepared {
            slot.context.binding.lock().take();
            self.release(slot);
            return Err(e.into());
        }

        let key = (proc_id, signature.id());
        let trampoline = Arc::new(Trampoline {
            pool: self,
            slot,
            key,
        });
        self.live.insert(key, Arc::downgrade(&trampoline));
        log_trampoline_bind(slot.context.code, signature.param_count());
        Ok(trampoline)
    }
}

/// A bound slot; dropping it returns the slot to the pool
pub struct Trampoline {
    pool: &'static ClosurePool,
    slot: &'static Slot,
    key: LiveKey,
}

impl Trampoline {
    /// Native entry address
    #[inline]
    pub fn code(&self) -> usize {
        self.slot.context.code
    }
}

impl Drop for Trampoline {
    fn drop(&mut self) {
        self.slot.context.binding.lock().take();
        self.pool
            .live
            .remove_if(&self.key, |_, weak| weak.strong_count() == 0);
        log_trampoline_release(self.code());
        self.pool.release(self.slot);
    }
}

impl std::fmt::Debug for Trampoline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Trampoline({:#x})", self.code())
    }
}

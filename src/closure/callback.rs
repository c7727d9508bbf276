//! Native callback handles

use super::{pool, Trampoline};
use crate::error::Result;
use crate::interop::Signature;
use crate::memory::{Memory, Origin, UNBOUNDED};
use crate::value::{Proc, ProcFn};
use std::fmt;
use std::sync::Arc;

/// Native code address that runs a managed closure
///
/// The trampoline stays bound while any clone of the handle is alive.
#[derive(Clone)]
pub struct NativeCallback(Arc<CallbackInner>);

struct CallbackInner {
    trampoline: Arc<Trampoline>,
    signature: Signature,
    _func: Arc<ProcFn>,
}

impl Origin for CallbackInner {}

impl NativeCallback {
    #[inline]
    pub fn address(&self) -> usize {
        self.0.trampoline.code()
    }

    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.0.signature
    }

    /// Unbounded view at the code address that keeps the callback bound
    pub fn to_memory(&self) -> Memory {
        let origin: Arc<dyn Origin> = self.0.clone();
        Memory::from_raw_parts(self.address(), UNBOUNDED, 1, Some(origin))
    }
}

impl fmt::Debug for NativeCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeCallback({:#x} {})", self.address(), self.signature())
    }
}

/// Compile `proc_` for `signature`, reusing an existing callback when possible
///
/// Looks in the proc's own cache first, then for a live trampoline bound to
/// the same closure and signature, and only then binds a fresh slot.
pub fn make_callback(signature: &Signature, proc_: &Proc) -> Result<NativeCallback> {
    if let Some(callback) = proc_.cached_callback(signature) {
        return Ok(callback);
    }

    let pool = pool();
    let trampoline = match pool.lookup(proc_.id(), signature) {
        Some(trampoline) => trampoline,
        None => pool.bind(signature, proc_.body(), proc_.id())?,
    };

    let callback = NativeCallback(Arc::new(CallbackInner {
        trampoline,
        signature: signature.clone(),
        _func: proc_.body(),
    }));
    proc_.cache_callback(callback.clone());
    Ok(callback)
}

impl Memory {
    /// Store a callback for `proc_` at `offset`
    ///
    /// The returned handle must be kept alive while native code may call it.
    pub fn put_callback(
        &self,
        offset: usize,
        proc_: &Proc,
        signature: &Signature,
    ) -> Result<NativeCallback> {
        let callback = make_callback(signature, proc_)?;
        self.write_address(offset, callback.address())?;
        Ok(callback)
    }
}

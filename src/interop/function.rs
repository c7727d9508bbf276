//! Native function objects

use super::call::call;
use super::signature::Signature;
use crate::closure::{make_callback, NativeCallback};
use crate::error::Result;
use crate::memory::{Memory, Origin, UNBOUNDED};
use crate::value::{Proc, Value};
use std::fmt;
use std::sync::Arc;

/// A native code address paired with the signature used to call it
///
/// Built from a managed closure it owns the callback that backs the address.
/// Looked up from a library it keeps the library loaded.
#[derive(Clone)]
pub struct Function(Arc<FunctionInner>);

struct FunctionInner {
    address: usize,
    signature: Signature,
    callback: Option<NativeCallback>,
    origin: Option<Arc<dyn Origin>>,
}

impl Function {
    pub fn new(address: usize, signature: Signature) -> Self {
        Self(Arc::new(FunctionInner {
            address,
            signature,
            callback: None,
            origin: None,
        }))
    }

    /// Native entry point that runs `proc_` when called
    pub fn from_proc(signature: &Signature, proc_: &Proc) -> Result<Self> {
        let callback = make_callback(signature, proc_)?;
        Ok(Self(Arc::new(FunctionInner {
            address: callback.address(),
            signature: signature.clone(),
            callback: Some(callback),
            origin: None,
        })))
    }

    pub(crate) fn with_origin(address: usize, signature: Signature, origin: Arc<dyn Origin>) -> Self {
        Self(Arc::new(FunctionInner {
            address,
            signature,
            callback: None,
            origin: Some(origin),
        }))
    }

    #[inline]
    pub fn address(&self) -> usize {
        self.0.address
    }

    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.0.signature
    }

    /// Owning callback, for functions built from a closure
    #[inline]
    pub fn callback(&self) -> Option<&NativeCallback> {
        self.0.callback.as_ref()
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        call(&self.0.signature, self.0.address, args, None)
    }

    pub fn call_with_block(&self, args: &[Value], block: &Proc) -> Result<Value> {
        call(&self.0.signature, self.0.address, args, Some(block))
    }

    /// Unbounded view at the code address, retaining this function's owner
    pub fn to_memory(&self) -> Memory {
        match &self.0.origin {
            Some(origin) => {
                Memory::from_raw_parts(self.0.address, UNBOUNDED, 1, Some(Arc::clone(origin)))
            }
            None => Memory::pointer(self.0.address),
        }
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({:#x} {})", self.address(), self.signature())
    }
}

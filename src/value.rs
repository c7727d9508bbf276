//! Managed value model
//!
//! `Value` is what the host language hands to the marshaller and what it gets
//! back. Strings are shared mutable byte buffers so native code writing into a
//! buffer parameter is visible to the managed side afterwards.

use crate::closure::NativeCallback;
use crate::error::{FfiError, Result};
use crate::interop::{Function, Signature};
use crate::layout::Struct;
use crate::memory::Memory;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Anything that can hand out a native address on request
///
/// The result must itself be pointer-like: a `Pointer`, a `Struct` or `Nil`.
pub trait ToPtr: Send + Sync {
    fn to_ptr(&self) -> Result<Value>;
}

/// Mutable managed string
#[derive(Clone, Default)]
pub struct RString(Arc<Mutex<Vec<u8>>>);

impl RString {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Arc::new(Mutex::new(bytes.into())))
    }

    /// Zero-filled string of `len` bytes, usable as an out buffer
    pub fn with_len(len: usize) -> Self {
        Self::new(vec![0u8; len])
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.lock().clone()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    pub fn replace(&self, bytes: impl Into<Vec<u8>>) {
        *self.0.lock() = bytes.into();
    }

    pub fn ptr_eq(&self, other: &RString) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the byte buffer with a NUL kept just past the end
    ///
    /// The address stays valid until the string is next resized.
    pub(crate) fn pin_terminated(&self) -> *mut u8 {
        let mut bytes = self.0.lock();
        bytes.reserve(1);
        if let Some(slot) = bytes.spare_capacity_mut().first_mut() {
            slot.write(0);
        }
        bytes.as_mut_ptr()
    }
}

impl fmt::Debug for RString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

/// Managed closure body
pub type ProcFn = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;

static NEXT_PROC_ID: AtomicU64 = AtomicU64::new(1);

/// Managed closure
///
/// Each proc caches the native callbacks compiled for it, one per signature.
/// The cache holds the callbacks, the callbacks hold only the body, so there is
/// no reference cycle.
#[derive(Clone)]
pub struct Proc(Arc<ProcInner>);

struct ProcInner {
    id: u64,
    func: Arc<ProcFn>,
    callbacks: Mutex<SmallVec<[NativeCallback; 1]>>,
}

impl Proc {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(ProcInner {
            id: NEXT_PROC_ID.fetch_add(1, Ordering::Relaxed),
            func: Arc::new(func),
            callbacks: Mutex::new(SmallVec::new()),
        }))
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.0.func)(args)
    }

    pub(crate) fn body(&self) -> Arc<ProcFn> {
        Arc::clone(&self.0.func)
    }

    pub(crate) fn cached_callback(&self, signature: &Signature) -> Option<NativeCallback> {
        self.0
            .callbacks
            .lock()
            .iter()
            .find(|cb| cb.signature().id() == signature.id())
            .cloned()
    }

    pub(crate) fn cache_callback(&self, callback: NativeCallback) {
        let mut callbacks = self.0.callbacks.lock();
        if !callbacks
            .iter()
            .any(|cb| cb.signature().id() == callback.signature().id())
        {
            callbacks.push(callback);
        }
    }

    /// Number of signatures this proc has been compiled for
    pub fn compiled_count(&self) -> usize {
        self.0.callbacks.lock().len()
    }
}

impl fmt::Debug for Proc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Proc#{}", self.0.id)
    }
}

/// Managed value crossing the boundary
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i128),
    Float(f64),
    Str(RString),
    Symbol(Arc<str>),
    Pointer(Memory),
    Struct(Struct),
    Function(Function),
    Proc(Proc),
    Array(Vec<Value>),
    Object(Arc<dyn ToPtr>),
}

impl Value {
    pub fn str(s: impl Into<Vec<u8>>) -> Self {
        Value::Str(RString::new(s))
    }

    pub fn sym(name: &str) -> Self {
        Value::Symbol(Arc::from(name))
    }

    /// Managed type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Pointer(_) => "pointer",
            Value::Struct(_) => "struct",
            Value::Function(_) => "function",
            Value::Proc(_) => "proc",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s.to_string_lossy()),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<&Memory> {
        match self {
            Value::Pointer(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Struct> {
        match self {
            Value::Struct(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Expect an integer, for callers unpacking callback arguments
    pub fn expect_int(&self) -> Result<i128> {
        self.as_int()
            .ok_or_else(|| FfiError::type_mismatch("integer", self.type_name()))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{:?}", v),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Symbol(s) => write!(f, ":{}", s),
            Value::Pointer(m) => write!(f, "{:?}", m),
            Value::Struct(s) => write!(f, "{:?}", s),
            Value::Function(func) => write!(f, "{:?}", func),
            Value::Proc(p) => write!(f, "{:?}", p),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            Value::Object(_) => write!(f, "#<object>"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a.ptr_eq(b) || a.to_bytes() == b.to_bytes(),
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Pointer(a), Value::Pointer(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) => a.address() == b.address(),
            (Value::Function(a), Value::Function(b)) => a.address() == b.address(),
            (Value::Proc(a), Value::Proc(b)) => a.id() == b.id(),
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

macro_rules! int_into_value {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                #[inline]
                fn from(v: $t) -> Self {
                    Value::Int(v as i128)
                }
            }
        )*
    };
}

int_into_value!(i8, u8, i16, u16, i32, u32, i64, u64, isize, usize, i128);

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::str(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::str(v)
    }
}

impl From<RString> for Value {
    fn from(v: RString) -> Self {
        Value::Str(v)
    }
}

impl From<Memory> for Value {
    fn from(v: Memory) -> Self {
        Value::Pointer(v)
    }
}

impl From<Struct> for Value {
    fn from(v: Struct) -> Self {
        Value::Struct(v)
    }
}

impl From<Function> for Value {
    fn from(v: Function) -> Self {
        Value::Function(v)
    }
}

impl From<Proc> for Value {
    fn from(v: Proc) -> Self {
        Value::Proc(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Nil, Into::into)
    }
}

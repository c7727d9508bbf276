//! Argument frames - converted arguments staged for one native call
//!
//! Everything an argument needs during the call (C strings, pinned managed
//! strings, views, structs, callbacks) is kept in the frame, so the frame must
//! outlive `ffi_call`.

use super::marshal::{checked_int, enum_value, to_address, to_bool, to_cstring, to_float};
use super::signature::Signature;
use crate::closure::{make_callback, NativeCallback};
use crate::error::{FfiError, Result};
use crate::interop::Function;
use crate::layout::Struct;
use crate::memory::{Access, Memory};
use crate::types::{NativeType, Type};
use crate::value::{RString, Value};
use smallvec::SmallVec;
use std::ffi::{c_void, CString};

/// Native storage for one scalar argument
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) union NativeSlot {
    pub i8: i8,
    pub u8: u8,
    pub i16: i16,
    pub u16: u16,
    pub i32: i32,
    pub u32: u32,
    pub i64: i64,
    pub u64: u64,
    pub f32: f32,
    pub f64: f64,
    pub address: usize,
}

impl Default for NativeSlot {
    #[inline]
    fn default() -> Self {
        Self { u64: 0 }
    }
}

/// Where libffi reads an argument from
#[derive(Clone, Copy)]
enum Target {
    Slot,
    /// Bytes already in native memory (struct by value)
    Direct(usize),
}

/// Values that must stay alive until the call returns
enum Keep {
    CString(CString),
    Pinned(RString),
    Memory(Memory),
    Struct(Struct),
    Function(Function),
    Callback(NativeCallback),
    Value(Value),
}

#[derive(Default)]
pub(crate) struct ArgFrame {
    slots: SmallVec<[NativeSlot; 8]>,
    targets: SmallVec<[Target; 8]>,
    keep: SmallVec<[Keep; 4]>,
}

impl ArgFrame {
    /// Convert `args` by the signature's parameter types
    ///
    /// Arity has already been checked. No native code runs here.
    pub(crate) fn build(signature: &Signature, args: &[Value]) -> Result<Self> {
        Self::build_typed(signature, signature.params().iter().zip(args))
    }

    pub(crate) fn build_typed<'a, I>(signature: &Signature, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a Type, &'a Value)>,
    {
        let mut frame = Self::default();
        for (index, (ty, value)) in args.into_iter().enumerate() {
            frame
                .push(signature, ty, value)
                .map_err(|e| annotate(e, index))?;
        }
        Ok(frame)
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Pointers to each argument, as `ffi_call` expects
    ///
    /// Valid until the frame is moved or dropped.
    pub(crate) fn arg_values(&mut self) -> SmallVec<[*mut c_void; 8]> {
        self.slots
            .iter_mut()
            .zip(&self.targets)
            .map(|(slot, target)| match target {
                Target::Slot => slot as *mut NativeSlot as *mut c_void,
                Target::Direct(address) => *address as *mut c_void,
            })
            .collect()
    }

    fn push_slot(&mut self, slot: NativeSlot) {
        self.slots.push(slot);
        self.targets.push(Target::Slot);
    }

    fn push_address(&mut self, address: usize) {
        self.push_slot(NativeSlot { address });
    }

    fn push(&mut self, signature: &Signature, ty: &Type, value: &Value) -> Result<()> {
        let kind = ty.kind();
        match kind {
            NativeType::Int8 => self.push_slot(NativeSlot {
                i8: checked_int(value, kind)? as i8,
            }),
            NativeType::UInt8 => self.push_slot(NativeSlot {
                u8: checked_int(value, kind)? as u8,
            }),
            NativeType::Int16 => self.push_slot(NativeSlot {
                i16: checked_int(value, kind)? as i16,
            }),
            NativeType::UInt16 => self.push_slot(NativeSlot {
                u16: checked_int(value, kind)? as u16,
            }),
            NativeType::Int32 => {
                let v = match value {
                    Value::Symbol(_) => enum_value(value, None, signature.enums())?,
                    other => checked_int(other, kind)? as i32,
                };
                self.push_slot(NativeSlot { i32: v })
            }
            NativeType::UInt32 => self.push_slot(NativeSlot {
                u32: checked_int(value, kind)? as u32,
            }),
            NativeType::Int64 => self.push_slot(NativeSlot {
                i64: checked_int(value, kind)? as i64,
            }),
            NativeType::UInt64 => self.push_slot(NativeSlot {
                u64: checked_int(value, kind)? as u64,
            }),
            NativeType::Float32 => self.push_slot(NativeSlot {
                f32: to_float(value)? as f32,
            }),
            NativeType::Float64 => self.push_slot(NativeSlot {
                f64: to_float(value)?,
            }),
            NativeType::Bool => self.push_slot(NativeSlot {
                i32: to_bool(value)? as i32,
            }),
            NativeType::Enum => {
                let own = ty.enum_table().map(|e| &**e);
                let v = enum_value(value, own, signature.enums())?;
                self.push_slot(NativeSlot { i32: v })
            }
            NativeType::String => {
                let address = match to_cstring(value)? {
                    Some(cstring) => {
                        let address = cstring.as_ptr() as usize;
                        self.keep.push(Keep::CString(cstring));
                        address
                    }
                    None => 0,
                };
                self.push_address(address)
            }
            NativeType::Pointer
            | NativeType::BufferIn
            | NativeType::BufferOut
            | NativeType::BufferInOut => {
                let address = self.pointer_arg(value, true)?;
                self.push_address(address)
            }
            NativeType::Callback => {
                let address = self.callback_arg(ty, value)?;
                self.push_address(address)
            }
            NativeType::Struct => {
                let address = self.struct_arg(ty, value)?;
                self.slots.push(NativeSlot::default());
                self.targets.push(Target::Direct(address));
            }
            NativeType::Void
            | NativeType::Varargs
            | NativeType::Array
            | NativeType::CharArray => {
                return Err(FfiError::argument(format!(
                    "{} cannot be passed as an argument",
                    kind
                )))
            }
        }
        Ok(())
    }

    /// Address for a pointer-like parameter; `to_ptr` is followed once
    fn pointer_arg(&mut self, value: &Value, follow: bool) -> Result<usize> {
        match value {
            Value::Str(s) => {
                let address = s.pin_terminated() as usize;
                self.keep.push(Keep::Pinned(s.clone()));
                Ok(address)
            }
            Value::Pointer(memory) => {
                ensure_live(memory)?;
                self.keep.push(Keep::Memory(memory.clone()));
                Ok(memory.address())
            }
            Value::Struct(s) => {
                ensure_live(s.memory())?;
                self.keep.push(Keep::Struct(s.clone()));
                Ok(s.address())
            }
            Value::Function(f) => {
                self.keep.push(Keep::Function(f.clone()));
                Ok(f.address())
            }
            Value::Object(obj) if follow => {
                let inner = obj.to_ptr()?;
                match inner {
                    Value::Nil | Value::Pointer(_) | Value::Struct(_) => {
                        let address = self.pointer_arg(&inner, false)?;
                        self.keep.push(Keep::Value(inner));
                        Ok(address)
                    }
                    other => Err(FfiError::type_mismatch(
                        "pointer from to_ptr",
                        other.type_name(),
                    )),
                }
            }
            Value::Nil | Value::Int(_) => to_address(value),
            other => Err(FfiError::type_mismatch("pointer", other.type_name())),
        }
    }

    fn callback_arg(&mut self, ty: &Type, value: &Value) -> Result<usize> {
        match value {
            Value::Nil => Ok(0),
            Value::Function(f) => {
                self.keep.push(Keep::Function(f.clone()));
                Ok(f.address())
            }
            Value::Pointer(memory) => {
                self.keep.push(Keep::Memory(memory.clone()));
                Ok(memory.address())
            }
            Value::Proc(proc_) => {
                let signature = ty
                    .signature()
                    .ok_or_else(|| FfiError::runtime("callback type without signature"))?;
                let callback = make_callback(signature, proc_)?;
                let address = callback.address();
                self.keep.push(Keep::Callback(callback));
                Ok(address)
            }
            other => Err(FfiError::type_mismatch("callback", other.type_name())),
        }
    }

    fn struct_arg(&mut self, ty: &Type, value: &Value) -> Result<usize> {
        let s = match value {
            Value::Struct(s) => s,
            other => return Err(FfiError::type_mismatch("struct", other.type_name())),
        };
        if s.size() != ty.size() || s.layout().alignment() != ty.alignment() {
            return Err(FfiError::type_mismatch(
                format!("struct of size {} align {}", ty.size(), ty.alignment()),
                format!(
                    "struct of size {} align {}",
                    s.size(),
                    s.layout().alignment()
                ),
            ));
        }
        let address = s.memory().check(0, s.size(), Access::READ)? as usize;
        self.keep.push(Keep::Struct(s.clone()));
        Ok(address)
    }
}

fn ensure_live(memory: &Memory) -> Result<()> {
    match memory.origin() {
        Some(origin) if !origin.is_live() => Err(FfiError::runtime("memory freed")),
        _ => Ok(()),
    }
}

/// Prefix argument errors with the argument position
fn annotate(error: FfiError, index: usize) -> FfiError {
    match error {
        FfiError::Argument(msg) => FfiError::Argument(format!("argument {}: {}", index, msg)),
        other => other,
    }
}

/// Zeroed, u64-aligned storage large enough for any return type
pub(crate) struct ReturnSlot(SmallVec<[u64; 4]>);

impl ReturnSlot {
    pub(crate) fn for_type(ty: &Type) -> Self {
        let words = ty.size().div_ceil(8).max(1);
        Self(smallvec::smallvec![0u64; words])
    }

    #[inline]
    pub(crate) fn as_mut_ptr(&mut self) -> *mut c_void {
        self.0.as_mut_ptr() as *mut c_void
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.0.as_ptr() as *const u8
    }
}

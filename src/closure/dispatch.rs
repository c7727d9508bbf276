//! The native entry point shared by every trampoline

use super::{Binding, SlotContext};
use crate::error::{FfiError, Result};
use crate::interop::marshal::{
    checked_int, enum_value, from_native, to_address, to_bool, to_float, FfiArg,
};
use crate::logging::log_callback_error;
use crate::types::{NativeType, Type};
use crate::value::Value;
use libffi::low::ffi_cif;
use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

thread_local! {
    /// First callback error raised during the innermost active call
    static PENDING: RefCell<Option<FfiError>> = const { RefCell::new(None) };
    static CALL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Marks a native call in progress on this thread
///
/// Errors parked by callbacks while the scope is open belong to it. An outer
/// call's parked error is set aside and restored when the scope closes.
pub(crate) struct CallScope {
    outer: Option<FfiError>,
}

impl CallScope {
    pub(crate) fn enter() -> Self {
        CALL_DEPTH.with(|d| d.set(d.get() + 1));
        Self {
            outer: PENDING.with(|p| p.borrow_mut().take()),
        }
    }

    /// Close the scope and return the error parked inside it
    pub(crate) fn finish(mut self) -> Option<FfiError> {
        let outer = self.outer.take();
        PENDING.with(|p| std::mem::replace(&mut *p.borrow_mut(), outer))
    }
}

impl Drop for CallScope {
    fn drop(&mut self) {
        CALL_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Keep the first error for the enclosing call
fn park(code: usize, error: FfiError) {
    log_callback_error(code, &error.to_string());
    if CALL_DEPTH.with(Cell::get) == 0 {
        return;
    }
    PENDING.with(|p| {
        let mut pending = p.borrow_mut();
        if pending.is_none() {
            *pending = Some(error);
        }
    });
}

/// Trampoline target
///
/// # Safety
/// Called by libffi with a CIF matching the slot's binding.
pub(crate) unsafe extern "C" fn entry(
    cif: &ffi_cif,
    result: &mut c_void,
    args: *const *const c_void,
    context: &SlotContext,
) {
    let result = result as *mut c_void as *mut u8;
    let binding = context.binding.lock().clone();

    let Some(binding) = binding else {
        zero_fill(result, raw_return_size(cif));
        park(context.code, FfiError::runtime("callback invoked after release"));
        return;
    };

    let ret = binding.signature.return_type();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| unsafe {
        let value = invoke(&binding, args)?;
        encode(&binding, ret, &value, result)
    }));

    let error = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(error)) => error,
        Err(payload) => {
            FfiError::runtime(format!("callback panicked: {}", panic_message(&*payload)))
        }
    };
    zero_fill(result, return_size(ret));
    park(context.code, error);
}

unsafe fn invoke(binding: &Binding, args: *const *const c_void) -> Result<Value> {
    let params = binding.signature.params();
    let mut values = Vec::with_capacity(params.len());
    for (i, ty) in params.iter().enumerate() {
        let arg = *args.add(i) as *const u8;
        values.push(from_native(ty, arg, false)?);
    }
    (binding.func)(&values)
}

/// Write a managed result into libffi's return storage
unsafe fn encode(binding: &Binding, ty: &Type, value: &Value, out: *mut u8) -> Result<()> {
    let kind = ty.kind();
    if kind == NativeType::Void {
        return Ok(());
    }
    if value.is_nil() {
        zero_fill(out, return_size(ty));
        return Ok(());
    }

    match kind {
        NativeType::Int32 if matches!(value, Value::Symbol(_)) => {
            let v = enum_value(value, None, binding.signature.enums())?;
            write_int(out, ty, v as i128);
        }
        NativeType::Enum => {
            let own = ty.enum_table().map(|e| &**e);
            let v = enum_value(value, own, binding.signature.enums())?;
            write_int(out, ty, v as i128);
        }
        k if k.is_integer() => write_int(out, ty, checked_int(value, k)?),
        NativeType::Bool => write_int(out, ty, to_bool(value)? as i128),
        NativeType::Float32 => ptr::write_unaligned(out as *mut f32, to_float(value)? as f32),
        NativeType::Float64 => ptr::write_unaligned(out as *mut f64, to_float(value)?),
        NativeType::String if matches!(value, Value::Str(_)) => {
            return Err(FfiError::type_mismatch(
                "nil or pointer for string return",
                "string",
            ))
        }
        NativeType::Pointer
        | NativeType::String
        | NativeType::BufferIn
        | NativeType::BufferOut
        | NativeType::BufferInOut => ptr::write_unaligned(out as *mut usize, to_address(value)?),
        NativeType::Callback => match value {
            Value::Function(f) => ptr::write_unaligned(out as *mut usize, f.address()),
            Value::Pointer(m) => ptr::write_unaligned(out as *mut usize, m.address()),
            other => {
                return Err(FfiError::type_mismatch(
                    "native function for callback return",
                    other.type_name(),
                ))
            }
        },
        NativeType::Struct => match value {
            Value::Struct(s) if s.size() == ty.size() => {
                let bytes = s.to_bytes()?;
                ptr::copy_nonoverlapping(bytes.as_ptr(), out, bytes.len());
            }
            other => {
                return Err(FfiError::type_mismatch(
                    format!("struct of {} bytes", ty.size()),
                    other.type_name(),
                ))
            }
        },
        other => {
            return Err(FfiError::argument(format!(
                "cannot return {} from a callback",
                other
            )))
        }
    }
    Ok(())
}

/// Integers narrower than a register are widened, as libffi expects
unsafe fn write_int(out: *mut u8, ty: &Type, v: i128) {
    if ty.size() < std::mem::size_of::<FfiArg>() {
        let widened = if ty.kind().is_signed() {
            v as i64 as isize as FfiArg
        } else {
            v as u64 as FfiArg
        };
        ptr::write_unaligned(out as *mut FfiArg, widened);
    } else if ty.size() == 8 {
        ptr::write_unaligned(out as *mut u64, v as u64);
    } else {
        ptr::write_unaligned(out as *mut u32, v as u32);
    }
}

fn return_size(ty: &Type) -> usize {
    match ty.kind() {
        NativeType::Void => 0,
        k if k.is_integer() || k == NativeType::Bool || k == NativeType::Enum => {
            ty.size().max(std::mem::size_of::<FfiArg>())
        }
        _ => ty.size(),
    }
}

unsafe fn raw_return_size(cif: &ffi_cif) -> usize {
    if cif.rtype.is_null() {
        0
    } else {
        (*cif.rtype).size
    }
}

unsafe fn zero_fill(out: *mut u8, len: usize) {
    if len > 0 {
        ptr::write_bytes(out, 0, len);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

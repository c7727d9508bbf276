//! Type marshaling - managed values ↔ native storage
//!
//! Design: every conversion is checked, none is a silent coercion. Integers are
//! range-checked against the native width through an `i128` intermediate.

use crate::enums::{Enum, Enums};
use crate::error::{FfiError, Result};
use crate::interop::function::Function;
use crate::layout::Struct;
use crate::memory::Memory;
use crate::types::{NativeType, Type};
use crate::value::Value;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

/// Full-register integer type libffi widens small integer returns to
pub(crate) type FfiArg = usize;

/// Integer checked against the range of `kind`
pub(crate) fn checked_int(value: &Value, kind: NativeType) -> Result<i128> {
    let v = match value {
        Value::Int(v) => *v,
        other => return Err(FfiError::type_mismatch("integer", other.type_name())),
    };
    let (min, max) = kind
        .int_range()
        .ok_or_else(|| FfiError::type_mismatch("integer type", kind.name()))?;
    if v < min || v > max {
        return Err(FfiError::Range {
            value: v,
            type_name: kind.name(),
            min,
            max,
        });
    }
    Ok(v)
}

/// Float, promoting integers
pub(crate) fn to_float(value: &Value) -> Result<f64> {
    match value {
        Value::Float(v) => Ok(*v),
        Value::Int(v) => Ok(*v as f64),
        other => Err(FfiError::type_mismatch("float", other.type_name())),
    }
}

pub(crate) fn to_bool(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(FfiError::type_mismatch("bool", other.type_name())),
    }
}

/// Address of a pointer-like value
///
/// Accepts nil, an integer address, a view, a struct, a native function, or a
/// `ToPtr` object whose result is itself pointer-like.
pub(crate) fn to_address(value: &Value) -> Result<usize> {
    match value {
        Value::Nil => Ok(0),
        Value::Int(v) => int_address(*v),
        Value::Pointer(memory) => Ok(memory.address()),
        Value::Struct(s) => Ok(s.address()),
        Value::Function(f) => Ok(f.address()),
        Value::Object(obj) => match obj.to_ptr()? {
            inner @ (Value::Nil | Value::Pointer(_) | Value::Struct(_)) => to_address(&inner),
            other => Err(FfiError::type_mismatch(
                "pointer from to_ptr",
                other.type_name(),
            )),
        },
        other => Err(FfiError::type_mismatch("pointer", other.type_name())),
    }
}

/// Integers reinterpret as addresses, negatives in two's complement
fn int_address(v: i128) -> Result<usize> {
    if v >= 0 && v <= usize::MAX as i128 {
        Ok(v as usize)
    } else if v < 0 && v >= isize::MIN as i128 {
        Ok(v as isize as usize)
    } else {
        Err(FfiError::Range {
            value: v,
            type_name: "pointer",
            min: isize::MIN as i128,
            max: usize::MAX as i128,
        })
    }
}

/// Int32 for an enum slot, resolving symbols through the slot's own table
/// and then the signature's table
pub(crate) fn enum_value(
    value: &Value,
    own: Option<&Enum>,
    table: Option<&Enums>,
) -> Result<i32> {
    match value {
        Value::Symbol(symbol) => own
            .and_then(|e| e.find(symbol))
            .or_else(|| table.and_then(|t| t.find_value(symbol)))
            .ok_or_else(|| FfiError::type_mismatch("known enum symbol", format!(":{}", symbol))),
        other => checked_int(other, NativeType::Int32).map(|v| v as i32),
    }
}

/// Symbol for a stored enum integer, `None` when unmapped
pub(crate) fn enum_symbol(value: i32, own: Option<&Enum>) -> Option<Value> {
    own.and_then(|e| e.symbol(value).cloned()).map(Value::Symbol)
}

/// NUL-terminated copy of a managed string, `None` for nil
pub(crate) fn to_cstring(value: &Value) -> Result<Option<CString>> {
    match value {
        Value::Nil => Ok(None),
        Value::Str(s) => CString::new(s.to_bytes())
            .map(Some)
            .map_err(|_| FfiError::argument("string contains an interior NUL byte")),
        other => Err(FfiError::type_mismatch("string", other.type_name())),
    }
}

/// Copy a C string out of native memory
///
/// # Safety
/// `address` must be null or point to a NUL-terminated string
pub(crate) unsafe fn read_cstring(address: usize) -> Value {
    if address == 0 {
        Value::Nil
    } else {
        Value::str(CStr::from_ptr(address as *const c_char).to_bytes())
    }
}

/// Read one native value of type `ty` from `storage`
///
/// `widened` storage holds small integers as a full `FfiArg`, as libffi does
/// for return values.
///
/// # Safety
/// `storage` must point to a readable value of `ty` (or an `FfiArg` when
/// widened and the type is a small integer)
pub(crate) unsafe fn from_native(ty: &Type, storage: *const u8, widened: bool) -> Result<Value> {
    macro_rules! int {
        ($t:ty) => {{
            let v: $t = if widened && std::mem::size_of::<$t>() < std::mem::size_of::<FfiArg>() {
                ptr::read_unaligned(storage as *const FfiArg) as $t
            } else {
                ptr::read_unaligned(storage as *const $t)
            };
            v
        }};
    }

    Ok(match ty.kind() {
        NativeType::Void => Value::Nil,
        NativeType::Int8 => Value::Int(int!(i8) as i128),
        NativeType::UInt8 => Value::Int(int!(u8) as i128),
        NativeType::Int16 => Value::Int(int!(i16) as i128),
        NativeType::UInt16 => Value::Int(int!(u16) as i128),
        NativeType::Int32 => Value::Int(int!(i32) as i128),
        NativeType::UInt32 => Value::Int(int!(u32) as i128),
        NativeType::Int64 => Value::Int(int!(i64) as i128),
        NativeType::UInt64 => Value::Int(int!(u64) as i128),
        NativeType::Float32 => Value::Float(ptr::read_unaligned(storage as *const f32) as f64),
        NativeType::Float64 => Value::Float(ptr::read_unaligned(storage as *const f64)),
        NativeType::Bool => Value::Bool(int!(i32) != 0),
        NativeType::Pointer
        | NativeType::BufferIn
        | NativeType::BufferOut
        | NativeType::BufferInOut => {
            Value::Pointer(Memory::pointer(ptr::read_unaligned(storage as *const usize)))
        }
        NativeType::String => read_cstring(ptr::read_unaligned(storage as *const usize)),
        NativeType::Enum => {
            let raw = int!(i32);
            let own = ty.enum_table().map(|e| &**e);
            match enum_symbol(raw, own) {
                Some(symbol) => symbol,
                None => Value::Int(raw as i128),
            }
        }
        NativeType::Struct => {
            let layout = ty
                .struct_layout()
                .ok_or_else(|| FfiError::runtime("struct type has no layout"))?;
            Value::Struct(Struct::copy_from_raw(layout.clone(), storage)?)
        }
        NativeType::Callback => {
            let address = ptr::read_unaligned(storage as *const usize);
            match (address, ty.signature()) {
                (0, _) => Value::Nil,
                (_, Some(signature)) => {
                    Value::Function(Function::new(address, signature.clone()))
                }
                (_, None) => Value::Pointer(Memory::pointer(address)),
            }
        }
        NativeType::Array | NativeType::CharArray | NativeType::Varargs => {
            return Err(FfiError::argument(format!(
                "cannot convert native {} by value",
                ty.kind()
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_strict_unsigned_range() {
        assert_eq!(
            checked_int(&Value::Int(0xffff_ffff), NativeType::UInt32).unwrap(),
            0xffff_ffff
        );
        let err = checked_int(&Value::Int(-1), NativeType::UInt32).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range);
        let err = checked_int(&Value::Int(0x1_0000_0000), NativeType::UInt32).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Range);
    }

    #[test]
    fn test_int_requires_integer() {
        let err = checked_int(&Value::Float(1.0), NativeType::Int32).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
        let err = checked_int(&Value::str("1"), NativeType::Int32).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
    }

    #[test]
    fn test_float_promotion() {
        assert_eq!(to_float(&Value::Int(2)).unwrap(), 2.0);
        assert!(to_float(&Value::Bool(true)).is_err());
    }

    #[test]
    fn test_addresses() {
        assert_eq!(to_address(&Value::Nil).unwrap(), 0);
        assert_eq!(to_address(&Value::Int(0x1000)).unwrap(), 0x1000);
        assert_eq!(to_address(&Value::Int(-1)).unwrap(), usize::MAX);
        assert_eq!(
            to_address(&Value::Pointer(Memory::pointer(0x2000))).unwrap(),
            0x2000
        );
        assert_eq!(
            to_address(&Value::str("x")).unwrap_err().kind(),
            ErrorKind::Type
        );
    }

    #[test]
    fn test_enum_resolution() {
        let own = Enum::new(None, [("red", 1)]).unwrap();
        let table = Enums::new().with(std::sync::Arc::new(
            Enum::new(None, [("blue", 3)]).unwrap(),
        ));
        assert_eq!(enum_value(&Value::sym("red"), Some(&own), Some(&table)).unwrap(), 1);
        assert_eq!(enum_value(&Value::sym("blue"), Some(&own), Some(&table)).unwrap(), 3);
        assert_eq!(enum_value(&Value::Int(9), Some(&own), None).unwrap(), 9);
        let err = enum_value(&Value::sym("mauve"), Some(&own), Some(&table)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Type);
    }

    #[test]
    fn test_cstring_rejects_interior_nul() {
        let err = to_cstring(&Value::str(b"a\0b".to_vec())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
        assert!(to_cstring(&Value::Nil).unwrap().is_none());
    }

    #[test]
    fn test_widened_small_int_return() {
        let storage: FfiArg = (-2i8) as u8 as FfiArg;
        let ty = crate::types::builtin(NativeType::Int8).unwrap();
        let v = unsafe { from_native(&ty, &storage as *const FfiArg as *const u8, true) };
        assert_eq!(v.unwrap(), Value::Int(-2));
    }
}

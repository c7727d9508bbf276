//! Kind-indexed get/put table
//!
//! One getter/putter pair per primitive kind. Composite kinds have no entry;
//! their accessors live with the struct layout.

use super::Memory;
use crate::error::{FfiError, Result};
use crate::interop::marshal::{checked_int, to_address, to_bool, to_float};
use crate::types::NativeType;
use crate::value::Value;
use once_cell::sync::Lazy;

pub(crate) type Getter = fn(&Memory, usize) -> Result<Value>;
pub(crate) type Putter = fn(&Memory, usize, &Value) -> Result<()>;

#[derive(Clone, Copy)]
pub(crate) struct MemoryOp {
    pub(crate) get: Getter,
    pub(crate) put: Putter,
}

macro_rules! int_op {
    ($get:ident, $put:ident, $t:ty, $kind:expr) => {
        fn $get(memory: &Memory, offset: usize) -> Result<Value> {
            memory.read_scalar::<$t>(offset).map(|v| Value::Int(v as i128))
        }

        fn $put(memory: &Memory, offset: usize, value: &Value) -> Result<()> {
            let v = checked_int(value, $kind)?;
            memory.write_scalar::<$t>(offset, v as $t)
        }
    };
}

int_op!(get_int8, put_int8, i8, NativeType::Int8);
int_op!(get_uint8, put_uint8, u8, NativeType::UInt8);
int_op!(get_int16, put_int16, i16, NativeType::Int16);
int_op!(get_uint16, put_uint16, u16, NativeType::UInt16);
int_op!(get_int32, put_int32, i32, NativeType::Int32);
int_op!(get_uint32, put_uint32, u32, NativeType::UInt32);
int_op!(get_int64, put_int64, i64, NativeType::Int64);
int_op!(get_uint64, put_uint64, u64, NativeType::UInt64);

fn get_float32(memory: &Memory, offset: usize) -> Result<Value> {
    memory.read_float32(offset).map(|v| Value::Float(v as f64))
}

fn put_float32(memory: &Memory, offset: usize, value: &Value) -> Result<()> {
    let v = to_float(value)?;
    memory.write_float32(offset, v as f32)
}

fn get_float64(memory: &Memory, offset: usize) -> Result<Value> {
    memory.read_float64(offset).map(Value::Float)
}

fn put_float64(memory: &Memory, offset: usize, value: &Value) -> Result<()> {
    let v = to_float(value)?;
    memory.write_float64(offset, v)
}

fn get_bool(memory: &Memory, offset: usize) -> Result<Value> {
    memory.read_int32(offset).map(|v| Value::Bool(v != 0))
}

fn put_bool(memory: &Memory, offset: usize, value: &Value) -> Result<()> {
    let v = to_bool(value)?;
    memory.write_int32(offset, v as i32)
}

fn get_pointer(memory: &Memory, offset: usize) -> Result<Value> {
    memory.read_pointer(offset).map(Value::Pointer)
}

fn put_pointer(memory: &Memory, offset: usize, value: &Value) -> Result<()> {
    memory.write_pointer(offset, value)
}

fn get_string(memory: &Memory, offset: usize) -> Result<Value> {
    match memory.read_address(offset)? {
        0 => Ok(Value::Nil),
        address => Memory::pointer(address)
            .read_string_bytes(0, None)
            .map(Value::str),
    }
}

/// Managed strings are never stored by reference; the bytes could move
fn put_string(memory: &Memory, offset: usize, value: &Value) -> Result<()> {
    if let Value::Str(_) = value {
        return Err(FfiError::type_mismatch("nil or pointer", "string"));
    }
    memory.write_address(offset, to_address(value)?)
}

fn op_for_kind(kind: NativeType) -> Option<MemoryOp> {
    let (get, put): (Getter, Putter) = match kind {
        NativeType::Int8 => (get_int8, put_int8),
        NativeType::UInt8 => (get_uint8, put_uint8),
        NativeType::Int16 => (get_int16, put_int16),
        NativeType::UInt16 => (get_uint16, put_uint16),
        NativeType::Int32 => (get_int32, put_int32),
        NativeType::UInt32 => (get_uint32, put_uint32),
        NativeType::Int64 => (get_int64, put_int64),
        NativeType::UInt64 => (get_uint64, put_uint64),
        NativeType::Float32 => (get_float32, put_float32),
        NativeType::Float64 => (get_float64, put_float64),
        NativeType::Bool => (get_bool, put_bool),
        NativeType::Pointer
        | NativeType::BufferIn
        | NativeType::BufferOut
        | NativeType::BufferInOut => (get_pointer, put_pointer),
        NativeType::String => (get_string, put_string),
        _ => return None,
    };
    Some(MemoryOp { get, put })
}

static OPS: Lazy<[Option<MemoryOp>; NativeType::COUNT]> =
    Lazy::new(|| NativeType::ALL.map(op_for_kind));

/// Accessor pair for a primitive kind
#[inline]
pub(crate) fn op_for(kind: NativeType) -> Option<&'static MemoryOp> {
    OPS[kind.index()].as_ref()
}

impl Memory {
    /// Read a value of any primitive kind
    pub fn get(&self, kind: NativeType, offset: usize) -> Result<Value> {
        let op = op_for(kind).ok_or_else(|| no_accessor(kind))?;
        (op.get)(self, offset)
    }

    /// Write a value of any primitive kind; conversion happens before any write
    pub fn put(&self, kind: NativeType, offset: usize, value: &Value) -> Result<()> {
        let op = op_for(kind).ok_or_else(|| no_accessor(kind))?;
        (op.put)(self, offset, value)
    }
}

fn no_accessor(kind: NativeType) -> FfiError {
    FfiError::argument(format!("no memory accessor for type {}", kind))
}

//! Field get/put by field kind

use super::array::StructArray;
use super::instance::Struct;
use super::{Field, FieldKind};
use crate::closure::{make_callback, NativeCallback};
use crate::error::{FfiError, Result};
use crate::interop::marshal::{enum_symbol, enum_value, read_cstring, to_address};
use crate::interop::Function;
use crate::memory::{Buffer, Direction, Memory};
use crate::value::Value;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Callbacks stored into function-pointer fields, keyed by field address
///
/// Shared by a struct and every nested view of it so a stored callback lives
/// as long as the outermost struct.
pub(crate) type Retained = Arc<Mutex<HashMap<usize, NativeCallback>>>;

impl Field {
    pub(crate) fn get(&self, memory: &Memory, retained: &Retained) -> Result<Value> {
        let offset = self.offset();
        match self.kind() {
            FieldKind::Primitive | FieldKind::Pointer => memory.get(self.ty().kind(), offset),
            FieldKind::String => {
                let address = memory.read_address(offset)?;
                // SAFETY: a string field holds null or a C string by contract
                Ok(unsafe { read_cstring(address) })
            }
            FieldKind::Array => {
                let array = self.array_view(memory, retained)?;
                if array.is_char_array() {
                    array.to_bytes_until_nul().map(Value::str)
                } else {
                    array.to_vec().map(Value::Array)
                }
            }
            FieldKind::InlineStruct => {
                let layout = self
                    .ty()
                    .struct_layout()
                    .ok_or_else(|| FfiError::runtime("inline struct field without layout"))?;
                let view = memory.slice(offset, self.size())?;
                Ok(Value::Struct(Struct::nested(
                    Arc::clone(layout),
                    view,
                    Arc::clone(retained),
                )))
            }
            FieldKind::Enum => {
                let raw = memory.read_int32(offset)?;
                let own = self.ty().enum_table().map(|e| &**e);
                enum_symbol(raw, own).ok_or_else(|| {
                    FfiError::argument(format!(
                        "invalid enum value {} in field '{}'",
                        raw,
                        self.name()
                    ))
                })
            }
            FieldKind::Function => {
                let address = memory.read_address(offset)?;
                let signature = self
                    .ty()
                    .signature()
                    .ok_or_else(|| FfiError::runtime("function field without signature"))?;
                Ok(match address {
                    0 => Value::Nil,
                    _ => Value::Function(Function::new(address, signature.clone())),
                })
            }
        }
    }

    pub(crate) fn put(&self, memory: &Memory, value: &Value, retained: &Retained) -> Result<()> {
        let offset = self.offset();
        match self.kind() {
            FieldKind::Primitive | FieldKind::Pointer => memory.put(self.ty().kind(), offset, value),
            FieldKind::String => match value {
                Value::Str(_) => Err(FfiError::type_mismatch(
                    "nil or pointer for string field",
                    "string",
                )),
                other => memory.write_address(offset, to_address(other)?),
            },
            FieldKind::Array => self.put_array(memory, value, retained),
            FieldKind::InlineStruct => match value {
                Value::Struct(src)
                    if src.size() == self.size()
                        && src.layout().alignment() == self.ty().alignment() =>
                {
                    memory.copy_from(offset, src.memory(), self.size())
                }
                Value::Struct(src) => Err(FfiError::type_mismatch(
                    format!("struct of size {} align {}", self.size(), self.ty().alignment()),
                    format!(
                        "struct of size {} align {}",
                        src.size(),
                        src.layout().alignment()
                    ),
                )),
                other => Err(FfiError::type_mismatch(
                    format!("struct of {} bytes", self.size()),
                    other.type_name(),
                )),
            },
            FieldKind::Enum => {
                let own = self.ty().enum_table().map(|e| &**e);
                let raw = enum_value(value, own, None)?;
                memory.write_int32(offset, raw)
            }
            FieldKind::Function => self.put_function(memory, value, retained),
        }
    }

    pub(crate) fn array_view(&self, memory: &Memory, retained: &Retained) -> Result<StructArray> {
        StructArray::new(memory.clone(), self, Arc::clone(retained))
    }

    /// Stage the whole array in scratch memory so a bad element writes nothing
    fn put_array(&self, memory: &Memory, value: &Value, retained: &Retained) -> Result<()> {
        let staged = Buffer::new(1, self.size(), Direction::InOut)?;
        staged.copy_from(0, &memory.slice(self.offset(), self.size())?, self.size())?;

        let staged_field = Field {
            name: self.name().to_string(),
            offset: 0,
            ty: self.ty().clone(),
            kind: FieldKind::Array,
        };
        let view = StructArray::new(staged.memory().clone(), &staged_field, Arc::clone(retained))?;

        match value {
            Value::Str(s) if view.is_char_array() => {
                let bytes = s.to_bytes();
                if bytes.len() > view.len() {
                    return Err(FfiError::argument(format!(
                        "string of {} bytes does not fit char[{}]",
                        bytes.len(),
                        view.len()
                    )));
                }
                staged.clear()?;
                staged.write_bytes(0, &bytes)?;
            }
            Value::Array(items) => {
                if items.len() > view.len() {
                    return Err(FfiError::argument(format!(
                        "{} elements do not fit array of {}",
                        items.len(),
                        view.len()
                    )));
                }
                for (i, item) in items.iter().enumerate() {
                    view.put(i, item)?;
                }
            }
            other => {
                return Err(FfiError::type_mismatch("array", other.type_name()));
            }
        }

        memory.copy_from(self.offset(), staged.memory(), self.size())
    }

    fn put_function(&self, memory: &Memory, value: &Value, retained: &Retained) -> Result<()> {
        let field_address = memory.address().wrapping_add(self.offset());
        let (address, keep) = match value {
            Value::Proc(proc_) => {
                let signature = self
                    .ty()
                    .signature()
                    .ok_or_else(|| FfiError::runtime("function field without signature"))?;
                let callback = make_callback(signature, proc_)?;
                (callback.address(), Some(callback))
            }
            Value::Function(func) => (func.address(), func.callback().cloned()),
            other => (to_address(other)?, None),
        };

        memory.write_address(self.offset(), address)?;
        let mut retained = retained.lock();
        match keep {
            Some(callback) => {
                retained.insert(field_address, callback);
            }
            None => {
                retained.remove(&field_address);
            }
        }
        Ok(())
    }
}

//! Inline array fields

use super::field::Retained;
use super::Field;
use crate::error::{FfiError, Result};
use crate::memory::Memory;
use crate::types::{NativeType, Type};
use crate::value::Value;

/// Live view of an inline array field
///
/// Element `i` lives at `field offset + i * component size`. The index is not
/// checked against the declared length, only against the underlying view.
#[derive(Clone)]
pub struct StructArray {
    memory: Memory,
    offset: usize,
    component: Type,
    length: usize,
    chars: bool,
    retained: Retained,
}

impl StructArray {
    pub(crate) fn new(memory: Memory, field: &Field, retained: Retained) -> Result<Self> {
        let (component, length) = field
            .ty()
            .array_parts()
            .ok_or_else(|| FfiError::runtime(format!("field '{}' is not an array", field.name())))?;
        Ok(Self {
            memory,
            offset: field.offset(),
            component: component.clone(),
            length,
            chars: field.ty().kind() == NativeType::CharArray,
            retained,
        })
    }

    /// Declared element count
    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[inline]
    pub fn component(&self) -> &Type {
        &self.component
    }

    #[inline]
    pub fn is_char_array(&self) -> bool {
        self.chars
    }

    fn element(&self, index: usize) -> Result<Field> {
        let offset = index
            .checked_mul(self.component.size())
            .and_then(|o| o.checked_add(self.offset))
            .ok_or(FfiError::Bounds {
                offset: i64::MAX,
                size: self.component.size(),
                total: self.memory.size(),
            })?;
        Field::new(format!("[{}]", index), offset, self.component.clone())
    }

    pub fn get(&self, index: usize) -> Result<Value> {
        self.element(index)?.get(&self.memory, &self.retained)
    }

    pub fn put(&self, index: usize, value: &Value) -> Result<()> {
        self.element(index)?.put(&self.memory, value, &self.retained)
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<Value>> + '_ {
        (0..self.length).map(move |i| self.get(i))
    }

    pub fn to_vec(&self) -> Result<Vec<Value>> {
        self.iter().collect()
    }

    /// Raw bytes of the whole array
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.memory
            .read_bytes(self.offset, self.component.size() * self.length)
    }

    pub(crate) fn to_bytes_until_nul(&self) -> Result<Vec<u8>> {
        self.memory.read_string_bytes(self.offset, Some(self.length))
    }

    /// Contents up to the first NUL, for `char[N]` arrays
    pub fn to_str(&self) -> Result<String> {
        if !self.chars {
            return Err(FfiError::type_mismatch("char array", self.component.kind().name()));
        }
        self.to_bytes_until_nul()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl std::fmt::Debug for StructArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "StructArray({}[{}] @{:#x})",
            self.component.kind(),
            self.length,
            self.memory.address().wrapping_add(self.offset)
        )
    }
}

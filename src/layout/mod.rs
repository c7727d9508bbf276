//! Struct layout engine
//!
//! Architecture:
//! - `mod.rs` - computed layouts and their fields
//! - `builder.rs` - offset/alignment computation
//! - `field.rs` - per-kind field get/put
//! - `instance.rs` - `Struct`, a layout bound to memory
//! - `array.rs` - `StructArray`, inline array fields

mod array;
mod builder;
mod field;
mod instance;

pub use array::StructArray;
pub use builder::{build_layout, StructLayoutBuilder};
pub use instance::Struct;

use crate::error::{FfiError, Result};
use crate::types::{FfiTypeRecord, NativeType, Type};
use indexmap::IndexMap;
use std::fmt;

/// Accessor selected for a field from its type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Primitive,
    Pointer,
    String,
    Array,
    InlineStruct,
    Enum,
    Function,
}

impl FieldKind {
    pub(crate) fn for_type(ty: &Type) -> Result<FieldKind> {
        Ok(match ty.kind() {
            NativeType::String => FieldKind::String,
            kind if kind.is_pointer_like() => FieldKind::Pointer,
            kind if kind.is_integer() || kind.is_float() || kind == NativeType::Bool => {
                FieldKind::Primitive
            }
            NativeType::Array | NativeType::CharArray => FieldKind::Array,
            NativeType::Struct => FieldKind::InlineStruct,
            NativeType::Enum => FieldKind::Enum,
            NativeType::Callback => FieldKind::Function,
            other => {
                return Err(FfiError::argument(format!(
                    "{} is not a valid field type",
                    other
                )))
            }
        })
    }
}

/// One named member of a layout
#[derive(Clone)]
pub struct Field {
    name: String,
    offset: usize,
    ty: Type,
    kind: FieldKind,
}

impl Field {
    pub(crate) fn new(name: impl Into<String>, offset: usize, ty: Type) -> Result<Self> {
        let kind = FieldKind::for_type(&ty)?;
        Ok(Self {
            name: name.into(),
            offset,
            ty,
            kind,
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn ty(&self) -> &Type {
        &self.ty
    }

    #[inline]
    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.ty.size()
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} @{} ({} bytes)",
            self.name,
            self.ty.kind(),
            self.offset,
            self.size()
        )
    }
}

/// Computed layout: ordered fields, size, alignment
///
/// `size` is at least the end of every field, rounded up to `alignment`.
pub struct StructLayout {
    fields: IndexMap<String, Field>,
    size: usize,
    alignment: usize,
    union: bool,
    ffi: FfiTypeRecord,
}

impl StructLayout {
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    #[inline]
    pub fn is_union(&self) -> bool {
        self.union
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    /// Field names in declaration order
    pub fn members(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    pub fn offset_of(&self, name: &str) -> Option<usize> {
        self.fields.get(name).map(Field::offset)
    }

    pub fn offsets(&self) -> Vec<(&str, usize)> {
        self.fields
            .values()
            .map(|f| (f.name(), f.offset()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[inline]
    pub(crate) fn ffi_type(&self) -> &FfiTypeRecord {
        &self.ffi
    }
}

impl fmt::Debug for StructLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(if self.union { "UnionLayout" } else { "StructLayout" })
            .field("size", &self.size)
            .field("alignment", &self.alignment)
            .field("fields", &self.fields.values().collect::<Vec<_>>())
            .finish()
    }
}

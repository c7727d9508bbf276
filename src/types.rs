//! Type registry - native kinds and their descriptors
//!
//! Primitive descriptors are interned once in a process-wide registry.
//! Composite descriptors (struct-by-value, inline array, enum, callback) are
//! built fresh and shared by `Arc`.

use crate::enums::Enum;
use crate::error::{FfiError, Result};
use crate::interop::Signature;
use crate::layout::StructLayout;
use crate::platform::{ADDRESS_SIZE, LONG_SIZE};
use indexmap::IndexMap;
use libffi::low::ffi_type;
use libffi::middle;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::mem::{align_of, size_of};
use std::sync::Arc;

/// Native kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NativeType {
    Void,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Pointer,
    Bool,
    String,
    BufferIn,
    BufferOut,
    BufferInOut,
    CharArray,
    Varargs,
    Struct,
    Array,
    Enum,
    Callback,
}

impl NativeType {
    pub const COUNT: usize = 23;

    pub const ALL: [NativeType; Self::COUNT] = [
        Self::Void,
        Self::Int8,
        Self::UInt8,
        Self::Int16,
        Self::UInt16,
        Self::Int32,
        Self::UInt32,
        Self::Int64,
        Self::UInt64,
        Self::Float32,
        Self::Float64,
        Self::Pointer,
        Self::Bool,
        Self::String,
        Self::BufferIn,
        Self::BufferOut,
        Self::BufferInOut,
        Self::CharArray,
        Self::Varargs,
        Self::Struct,
        Self::Array,
        Self::Enum,
        Self::Callback,
    ];

    /// Canonical registry name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Int8 => "int8",
            Self::UInt8 => "uint8",
            Self::Int16 => "int16",
            Self::UInt16 => "uint16",
            Self::Int32 => "int32",
            Self::UInt32 => "uint32",
            Self::Int64 => "int64",
            Self::UInt64 => "uint64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Pointer => "pointer",
            Self::Bool => "bool",
            Self::String => "string",
            Self::BufferIn => "buffer_in",
            Self::BufferOut => "buffer_out",
            Self::BufferInOut => "buffer_inout",
            Self::CharArray => "char_array",
            Self::Varargs => "varargs",
            Self::Struct => "struct",
            Self::Array => "array",
            Self::Enum => "enum",
            Self::Callback => "callback",
        }
    }

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Check if type is integral
    #[inline]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int8
                | Self::UInt8
                | Self::Int16
                | Self::UInt16
                | Self::Int32
                | Self::UInt32
                | Self::Int64
                | Self::UInt64
        )
    }

    /// Check if type is floating point
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// Kinds passed to native code as a plain address
    #[inline]
    pub const fn is_pointer_like(self) -> bool {
        matches!(
            self,
            Self::Pointer | Self::String | Self::BufferIn | Self::BufferOut | Self::BufferInOut
        )
    }

    /// Kinds that need no extra descriptor data
    #[inline]
    pub const fn is_builtin(self) -> bool {
        !matches!(
            self,
            Self::CharArray | Self::Struct | Self::Array | Self::Enum | Self::Callback
        )
    }

    /// Inclusive value range of an integer kind
    pub const fn int_range(self) -> Option<(i128, i128)> {
        match self {
            Self::Int8 => Some((i8::MIN as i128, i8::MAX as i128)),
            Self::UInt8 => Some((0, u8::MAX as i128)),
            Self::Int16 => Some((i16::MIN as i128, i16::MAX as i128)),
            Self::UInt16 => Some((0, u16::MAX as i128)),
            Self::Int32 | Self::Enum => Some((i32::MIN as i128, i32::MAX as i128)),
            Self::UInt32 => Some((0, u32::MAX as i128)),
            Self::Int64 => Some((i64::MIN as i128, i64::MAX as i128)),
            Self::UInt64 => Some((0, u64::MAX as i128)),
            _ => None,
        }
    }

    /// Whether an integer kind is signed
    #[inline]
    pub const fn is_signed(self) -> bool {
        matches!(
            self,
            Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 | Self::Enum
        )
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Owned libffi type record, immutable once built
pub(crate) struct FfiTypeRecord(middle::Type);

// SAFETY: the record is never mutated after construction; libffi only reads it
unsafe impl Send for FfiTypeRecord {}
unsafe impl Sync for FfiTypeRecord {}

impl FfiTypeRecord {
    pub(crate) fn new(ty: middle::Type) -> Self {
        Self(ty)
    }

    /// Structure record over the given element records
    pub(crate) fn structure<'a>(elements: impl IntoIterator<Item = &'a FfiTypeRecord>) -> Self {
        let fields: Vec<middle::Type> = elements.into_iter().map(|e| e.0.clone()).collect();
        Self(middle::Type::structure(fields))
    }

    /// Structure of `count` copies of one element record
    pub(crate) fn repeated(element: &FfiTypeRecord, count: usize) -> Self {
        let fields: Vec<middle::Type> = (0..count).map(|_| element.0.clone()).collect();
        Self(middle::Type::structure(fields))
    }

    /// Unsigned integer record of the given width, used to model raw layout bytes
    pub(crate) fn unsigned_of_width(width: usize) -> Self {
        Self(match width {
            1 => middle::Type::u8(),
            2 => middle::Type::u16(),
            4 => middle::Type::u32(),
            _ => middle::Type::u64(),
        })
    }

    /// `float` for 4 bytes, `double` otherwise
    pub(crate) fn float_of_width(width: usize) -> Self {
        Self(match width {
            4 => middle::Type::f32(),
            _ => middle::Type::f64(),
        })
    }

    #[inline]
    pub(crate) fn raw(&self) -> *mut ffi_type {
        self.0.as_raw_ptr()
    }
}

impl Clone for FfiTypeRecord {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

/// Extra descriptor data for composite kinds
#[derive(Clone)]
pub enum TypeDetail {
    Builtin,
    Struct(Arc<StructLayout>),
    Array { component: Type, length: usize },
    Enum(Arc<Enum>),
    Callback(Signature),
}

/// Type descriptor - immutable, cheap to clone
#[derive(Clone)]
pub struct Type(Arc<TypeInner>);

struct TypeInner {
    kind: NativeType,
    size: usize,
    alignment: usize,
    ffi: FfiTypeRecord,
    detail: TypeDetail,
}

impl Type {
    fn from_parts(
        kind: NativeType,
        size: usize,
        alignment: usize,
        ffi: FfiTypeRecord,
        detail: TypeDetail,
    ) -> Self {
        Self(Arc::new(TypeInner {
            kind,
            size,
            alignment,
            ffi,
            detail,
        }))
    }

    fn primitive(kind: NativeType) -> Self {
        let (size, alignment, ffi) = match kind {
            NativeType::Void | NativeType::Varargs => (0, 1, middle::Type::void()),
            NativeType::Int8 => (1, 1, middle::Type::i8()),
            NativeType::UInt8 => (1, 1, middle::Type::u8()),
            NativeType::Int16 => (2, align_of::<i16>(), middle::Type::i16()),
            NativeType::UInt16 => (2, align_of::<u16>(), middle::Type::u16()),
            NativeType::Int32 => (4, align_of::<i32>(), middle::Type::i32()),
            NativeType::UInt32 => (4, align_of::<u32>(), middle::Type::u32()),
            NativeType::Int64 => (8, align_of::<i64>(), middle::Type::i64()),
            NativeType::UInt64 => (8, align_of::<u64>(), middle::Type::u64()),
            NativeType::Float32 => (4, align_of::<f32>(), middle::Type::f32()),
            NativeType::Float64 => (8, align_of::<f64>(), middle::Type::f64()),
            // Native bool is a C int
            NativeType::Bool => (4, align_of::<i32>(), middle::Type::i32()),
            _ => (ADDRESS_SIZE, align_of::<usize>(), middle::Type::pointer()),
        };
        Self::from_parts(
            kind,
            size,
            alignment,
            FfiTypeRecord::new(ffi),
            TypeDetail::Builtin,
        )
    }

    /// Struct passed or returned by value
    pub fn struct_by_value(layout: Arc<StructLayout>) -> Self {
        let ffi = layout.ffi_type().clone();
        Self::from_parts(
            NativeType::Struct,
            layout.size(),
            layout.alignment(),
            ffi,
            TypeDetail::Struct(layout),
        )
    }

    /// Fixed-size inline array of `length` components
    pub fn array(component: Type, length: usize) -> Result<Self> {
        if matches!(component.kind(), NativeType::Void | NativeType::Varargs) {
            return Err(FfiError::argument(format!(
                "invalid array component type {}",
                component.kind()
            )));
        }
        let size = component
            .size()
            .checked_mul(length)
            .ok_or(FfiError::OutOfMemory { requested: usize::MAX })?;
        let ffi = FfiTypeRecord::repeated(component.ffi(), length);
        let alignment = component.alignment();
        Ok(Self::from_parts(
            NativeType::Array,
            size,
            alignment,
            ffi,
            TypeDetail::Array { component, length },
        ))
    }

    /// Inline `char[length]`
    pub fn char_array(length: usize) -> Self {
        let component = Self::primitive(NativeType::Int8);
        let ffi = FfiTypeRecord::repeated(component.ffi(), length);
        Self::from_parts(
            NativeType::CharArray,
            length,
            1,
            ffi,
            TypeDetail::Array { component, length },
        )
    }

    /// Int32-encoded enumeration
    pub fn enumeration(table: Arc<Enum>) -> Self {
        Self::from_parts(
            NativeType::Enum,
            4,
            align_of::<i32>(),
            FfiTypeRecord::new(middle::Type::i32()),
            TypeDetail::Enum(table),
        )
    }

    /// Function pointer with a known signature
    pub fn callback(signature: Signature) -> Self {
        Self::from_parts(
            NativeType::Callback,
            ADDRESS_SIZE,
            align_of::<usize>(),
            FfiTypeRecord::new(middle::Type::pointer()),
            TypeDetail::Callback(signature),
        )
    }

    #[inline]
    pub fn kind(&self) -> NativeType {
        self.0.kind
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.0.size
    }

    #[inline]
    pub fn alignment(&self) -> usize {
        self.0.alignment
    }

    #[inline]
    pub fn detail(&self) -> &TypeDetail {
        &self.0.detail
    }

    #[inline]
    pub(crate) fn ffi(&self) -> &FfiTypeRecord {
        &self.0.ffi
    }

    pub fn struct_layout(&self) -> Option<&Arc<StructLayout>> {
        match &self.0.detail {
            TypeDetail::Struct(layout) => Some(layout),
            _ => None,
        }
    }

    pub fn enum_table(&self) -> Option<&Arc<Enum>> {
        match &self.0.detail {
            TypeDetail::Enum(table) => Some(table),
            _ => None,
        }
    }

    pub fn signature(&self) -> Option<&Signature> {
        match &self.0.detail {
            TypeDetail::Callback(signature) => Some(signature),
            _ => None,
        }
    }

    /// Component type and length of an inline array
    pub fn array_parts(&self) -> Option<(&Type, usize)> {
        match &self.0.detail {
            TypeDetail::Array { component, length } => Some((component, *length)),
            _ => None,
        }
    }

    #[inline]
    pub fn ptr_eq(&self, other: &Type) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Type({}, size={}, align={})",
            self.kind(),
            self.size(),
            self.alignment()
        )
    }
}

// ============================================================================
// Builtin registry
// ============================================================================

struct Registry {
    by_kind: Vec<Option<Type>>,
    by_name: HashMap<&'static str, Type>,
}

impl Registry {
    fn build() -> Self {
        let by_kind: Vec<Option<Type>> = NativeType::ALL
            .iter()
            .map(|&kind| kind.is_builtin().then(|| Type::primitive(kind)))
            .collect();

        let mut by_name = HashMap::new();
        for ty in by_kind.iter().flatten() {
            by_name.insert(ty.kind().name(), ty.clone());
        }

        let get = |kind: NativeType| by_kind[kind.index()].clone();
        let (long, ulong) = if LONG_SIZE == 8 {
            (NativeType::Int64, NativeType::UInt64)
        } else {
            (NativeType::Int32, NativeType::UInt32)
        };
        let (ssize, usize_kind) = if size_of::<usize>() == 8 {
            (NativeType::Int64, NativeType::UInt64)
        } else {
            (NativeType::Int32, NativeType::UInt32)
        };

        let aliases: [(&'static str, NativeType); 19] = [
            ("char", NativeType::Int8),
            ("schar", NativeType::Int8),
            ("uchar", NativeType::UInt8),
            ("short", NativeType::Int16),
            ("ushort", NativeType::UInt16),
            ("int", NativeType::Int32),
            ("uint", NativeType::UInt32),
            ("long", long),
            ("ulong", ulong),
            ("long_long", NativeType::Int64),
            ("ulong_long", NativeType::UInt64),
            ("float", NativeType::Float32),
            ("double", NativeType::Float64),
            ("size_t", usize_kind),
            ("ssize_t", ssize),
            ("intptr_t", ssize),
            ("uintptr_t", usize_kind),
            ("void*", NativeType::Pointer),
            ("buffer", NativeType::BufferInOut),
        ];
        for (alias, kind) in aliases {
            if let Some(ty) = get(kind) {
                by_name.insert(alias, ty);
            }
        }

        Self { by_kind, by_name }
    }
}

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::build);

/// Interned descriptor for a builtin kind, `None` for composite kinds
#[inline]
pub fn builtin(kind: NativeType) -> Option<Type> {
    REGISTRY.by_kind[kind.index()].clone()
}

/// Look up a builtin descriptor by name or alias
pub fn find_type(name: &str) -> Result<Type> {
    REGISTRY
        .by_name
        .get(name)
        .cloned()
        .ok_or_else(|| FfiError::argument(format!("unknown type '{}'", name)))
}

/// Descriptor for the host C `long`
pub fn long_type() -> Type {
    let kind = if LONG_SIZE == 8 {
        NativeType::Int64
    } else {
        NativeType::Int32
    };
    builtin(kind).unwrap_or_else(|| Type::primitive(kind))
}

/// A type given either as a descriptor or by name
#[derive(Clone, Debug)]
pub enum TypeSpec {
    Type(Type),
    Name(String),
}

impl TypeSpec {
    /// Resolve through user typedefs first, then the builtin registry
    pub fn resolve(&self, typedefs: Option<&TypeMap>) -> Result<Type> {
        match self {
            TypeSpec::Type(ty) => Ok(ty.clone()),
            TypeSpec::Name(name) => match typedefs {
                Some(map) => map.find(name),
                None => find_type(name),
            },
        }
    }
}

impl From<Type> for TypeSpec {
    fn from(ty: Type) -> Self {
        TypeSpec::Type(ty)
    }
}

impl From<&Type> for TypeSpec {
    fn from(ty: &Type) -> Self {
        TypeSpec::Type(ty.clone())
    }
}

impl From<&str> for TypeSpec {
    fn from(name: &str) -> Self {
        TypeSpec::Name(name.to_string())
    }
}

impl From<String> for TypeSpec {
    fn from(name: String) -> Self {
        TypeSpec::Name(name)
    }
}

impl From<NativeType> for TypeSpec {
    fn from(kind: NativeType) -> Self {
        match builtin(kind) {
            Some(ty) => TypeSpec::Type(ty),
            None => TypeSpec::Name(kind.name().to_string()),
        }
    }
}

/// User typedefs layered over the builtin registry
#[derive(Clone, Default)]
pub struct TypeMap {
    typedefs: IndexMap<String, Type>,
}

impl TypeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` as an alias of `target`
    pub fn typedef(&mut self, target: impl Into<TypeSpec>, name: impl Into<String>) -> Result<Type> {
        let ty = target.into().resolve(Some(self))?;
        self.typedefs.insert(name.into(), ty.clone());
        Ok(ty)
    }

    pub fn find(&self, name: &str) -> Result<Type> {
        match self.typedefs.get(name) {
            Some(ty) => Ok(ty.clone()),
            None => find_type(name),
        }
    }

    pub fn len(&self) -> usize {
        self.typedefs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.typedefs.is_empty()
    }
}

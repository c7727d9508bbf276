//! Offset and alignment computation

use super::{Field, StructLayout};
use crate::error::{FfiError, Result};
use crate::interop::PlatformAbi;
use crate::platform::align_up;
use crate::types::{FfiTypeRecord, NativeType, Type, TypeMap, TypeSpec};
use indexmap::IndexMap;
use std::sync::Arc;

struct Declaration {
    name: String,
    ty: TypeSpec,
    offset: Option<usize>,
}

/// Builds a `StructLayout` from ordered field declarations
///
/// Non-union fields default to the next offset aligned for their type; union
/// fields all sit at offset 0.
#[derive(Default)]
pub struct StructLayoutBuilder {
    fields: Vec<Declaration>,
    union: bool,
    packed: Option<usize>,
    alignment: Option<usize>,
    typedefs: Option<TypeMap>,
}

impl StructLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn union(mut self, union: bool) -> Self {
        self.union = union;
        self
    }

    /// Cap every field alignment at `n` bytes
    pub fn packed(mut self, n: usize) -> Self {
        self.packed = Some(n.max(1));
        self
    }

    /// Raise the struct alignment to at least `n` bytes
    pub fn alignment(mut self, n: usize) -> Self {
        self.alignment = Some(n.max(1));
        self
    }

    /// Resolve field type names through these typedefs
    pub fn typedefs(mut self, typedefs: TypeMap) -> Self {
        self.typedefs = Some(typedefs);
        self
    }

    pub fn add(mut self, name: impl Into<String>, ty: impl Into<TypeSpec>) -> Self {
        self.fields.push(Declaration {
            name: name.into(),
            ty: ty.into(),
            offset: None,
        });
        self
    }

    /// Field at an explicit offset
    pub fn add_at(mut self, name: impl Into<String>, ty: impl Into<TypeSpec>, offset: usize) -> Self {
        self.fields.push(Declaration {
            name: name.into(),
            ty: ty.into(),
            offset: Some(offset),
        });
        self
    }

    pub fn build(self) -> Result<Arc<StructLayout>> {
        let mut fields: IndexMap<String, Field> = IndexMap::with_capacity(self.fields.len());
        let mut size = 0usize;
        let mut alignment = 1usize;
        let mut natural = self.packed.is_none();

        for decl in self.fields {
            let ty = decl.ty.resolve(self.typedefs.as_ref())?;
            if ty.size() == 0 {
                return Err(FfiError::runtime(format!(
                    "type of field '{}' has zero size",
                    decl.name
                )));
            }

            let field_align = match self.packed {
                Some(cap) => ty.alignment().min(cap),
                None => ty.alignment(),
            };
            let offset = if self.union {
                0
            } else {
                let computed = align_up(size, field_align);
                match decl.offset {
                    Some(explicit) => {
                        natural &= explicit == computed;
                        explicit
                    }
                    None => computed,
                }
            };

            size = size.max(offset + ty.size());
            alignment = alignment.max(field_align);

            if fields.contains_key(&decl.name) {
                return Err(FfiError::argument(format!(
                    "duplicate field name '{}'",
                    decl.name
                )));
            }
            let field = Field::new(decl.name.clone(), offset, ty)?;
            fields.insert(decl.name, field);
        }

        if let Some(min_align) = self.alignment {
            natural &= min_align <= alignment;
            alignment = alignment.max(min_align);
        }
        let size = align_up(size, alignment);
        if size == 0 {
            return Err(FfiError::runtime("struct size is zero"));
        }

        let ffi = if natural && !self.union {
            FfiTypeRecord::structure(fields.values().map(|f| f.ty().ffi()))
        } else {
            lower_by_chunks(&fields, size, alignment)
        };

        Ok(Arc::new(StructLayout {
            fields,
            size,
            alignment,
            union: self.union,
            ffi,
        }))
    }
}

/// What occupies one byte of a layout, as far as argument passing cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteClass {
    Padding,
    Integer,
    Float32,
    Float64,
    /// float32 and float64 members overlapping (unions)
    MixedFloat,
}

impl ByteClass {
    fn merge(self, other: ByteClass) -> ByteClass {
        use ByteClass::*;
        match (self, other) {
            (Padding, c) | (c, Padding) => c,
            (Integer, _) | (_, Integer) => Integer,
            (a, b) if a == b => a,
            _ => MixedFloat,
        }
    }
}

fn mark(bytes: &mut [ByteClass], offset: usize, ty: &Type) {
    if let Some(nested) = ty.struct_layout() {
        for field in nested.fields() {
            mark(bytes, offset + field.offset(), field.ty());
        }
        return;
    }
    if ty.kind() != NativeType::CharArray {
        if let Some((component, length)) = ty.array_parts() {
            for i in 0..length {
                mark(bytes, offset + i * component.size(), component);
            }
            return;
        }
    }

    // Misaligned floats travel as integers
    let class = match ty.kind() {
        NativeType::Float32 if offset % 4 == 0 => ByteClass::Float32,
        NativeType::Float64 if offset % 8 == 0 => ByteClass::Float64,
        _ => ByteClass::Integer,
    };
    let end = (offset + ty.size()).min(bytes.len());
    for byte in &mut bytes[offset.min(end)..end] {
        *byte = byte.merge(class);
    }
}

/// Record for unions and layouts whose offsets libffi cannot reproduce
///
/// The bytes are cut into chunks of the layout alignment (at most 8). A chunk
/// holding only float members becomes float elements, anything else an
/// unsigned integer of the chunk width, so register classification follows
/// what the C compiler does for the same bytes.
fn lower_by_chunks(fields: &IndexMap<String, Field>, size: usize, alignment: usize) -> FfiTypeRecord {
    let mut bytes = vec![ByteClass::Padding; size];
    for field in fields.values() {
        mark(&mut bytes, field.offset(), field.ty());
    }

    let mut width = alignment.min(8);
    if !width.is_power_of_two() {
        width = 1;
    }
    let abi = PlatformAbi::current();
    let mut elements = Vec::with_capacity(size / width + 1);
    for chunk in bytes.chunks(width) {
        let class = chunk.iter().fold(ByteClass::Padding, |acc, &b| acc.merge(b));
        let w = chunk.len();
        match class {
            ByteClass::Float32 if w % 4 == 0 => {
                elements.extend((0..w / 4).map(|_| FfiTypeRecord::float_of_width(4)));
            }
            ByteClass::Float64 if w == 8 => elements.push(FfiTypeRecord::float_of_width(8)),
            // Not a homogeneous aggregate on AArch64, so those go in integer registers
            ByteClass::MixedFloat if w == 8 && abi != PlatformAbi::Aarch64 => {
                elements.push(FfiTypeRecord::float_of_width(8))
            }
            _ => elements.push(FfiTypeRecord::unsigned_of_width(w)),
        }
    }
    FfiTypeRecord::structure(elements.iter())
}

/// Build a layout from `(name, type, offset)` triples
pub fn build_layout<I, N, T>(fields: I, union: bool) -> Result<Arc<StructLayout>>
where
    I: IntoIterator<Item = (N, T, Option<usize>)>,
    N: Into<String>,
    T: Into<TypeSpec>,
{
    fields
        .into_iter()
        .fold(StructLayoutBuilder::new().union(union), |b, (name, ty, offset)| {
            match offset {
                Some(offset) => b.add_at(name, ty, offset),
                None => b.add(name, ty),
            }
        })
        .build()
}

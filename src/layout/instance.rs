//! Struct instances - a layout bound to memory

use super::array::StructArray;
use super::field::Retained;
use super::{Field, StructLayout};
use crate::error::{FfiError, Result};
use crate::memory::{Memory, MemoryPointer};
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct Struct {
    layout: Arc<StructLayout>,
    memory: Memory,
    retained: Retained,
}

impl Struct {
    /// Fresh zero-filled instance in owned memory
    pub fn new(layout: Arc<StructLayout>) -> Result<Self> {
        let memory = MemoryPointer::new(1, layout.size(), true)?.into_memory();
        Ok(Self::nested(layout, memory, Retained::default()))
    }

    /// Overlay a layout on existing memory
    pub fn from_memory(layout: Arc<StructLayout>, memory: Memory) -> Result<Self> {
        if memory.is_null() {
            return Err(FfiError::NullPointer {
                context: Some("struct memory".into()),
            });
        }
        if memory.size() < layout.size() {
            return Err(FfiError::Bounds {
                offset: 0,
                size: layout.size(),
                total: memory.size(),
            });
        }
        Ok(Self::nested(layout, memory, Retained::default()))
    }

    pub(crate) fn nested(layout: Arc<StructLayout>, memory: Memory, retained: Retained) -> Self {
        Self {
            layout,
            memory,
            retained,
        }
    }

    /// Owned copy of `layout.size()` bytes at `src`
    pub(crate) fn copy_from_raw(layout: Arc<StructLayout>, src: *const u8) -> Result<Self> {
        let instance = Self::new(layout)?;
        let source = Memory::sized(src as usize, instance.size());
        instance.memory.copy_from(0, &source, instance.size())?;
        Ok(instance)
    }

    #[inline]
    pub fn layout(&self) -> &Arc<StructLayout> {
        &self.layout
    }

    #[inline]
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    #[inline]
    pub fn address(&self) -> usize {
        self.memory.address()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    fn field(&self, name: &str) -> Result<&Field> {
        self.layout
            .field(name)
            .ok_or_else(|| FfiError::argument(format!("no such field '{}'", name)))
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        self.field(name)?.get(&self.memory, &self.retained)
    }

    pub fn put(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.field(name)?.put(&self.memory, &value, &self.retained)
    }

    /// Live view of an inline array field
    pub fn array(&self, name: &str) -> Result<StructArray> {
        self.field(name)?.array_view(&self.memory, &self.retained)
    }

    pub fn members(&self) -> Vec<&str> {
        self.layout.members()
    }

    pub fn values(&self) -> Result<Vec<Value>> {
        self.layout
            .fields()
            .map(|f| f.get(&self.memory, &self.retained))
            .collect()
    }

    /// Zero the struct and drop the callbacks its own fields retain
    ///
    /// A nested view shares the retention map of the outermost struct, so only
    /// entries inside this struct's bytes are released.
    pub fn clear(&self) -> Result<()> {
        self.memory.slice(0, self.size())?.clear()?;
        let range = self.address()..self.address() + self.size();
        self.retained
            .lock()
            .retain(|field_address, _| !range.contains(field_address));
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.memory.read_bytes(0, self.size())
    }

    /// Callbacks currently kept alive by function-pointer fields
    pub fn retained_callbacks(&self) -> usize {
        self.retained.lock().len()
    }
}

impl fmt::Debug for Struct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Struct(address={:#x}, size={})",
            self.address(),
            self.size()
        )
    }
}

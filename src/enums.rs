//! Symbol to int32 enumerations
//!
//! `Enum` is one bidirectional table. `Enums` is the per-signature collection
//! that resolves a bare symbol by searching every table it holds.

use crate::error::{FfiError, Result};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Enum {
    tag: Option<String>,
    by_symbol: IndexMap<Arc<str>, i32>,
    by_value: HashMap<i32, Arc<str>>,
}

impl Enum {
    /// Build from `(symbol, value)` pairs
    ///
    /// A repeated symbol is an error. Several symbols may share one value; the
    /// first one declared wins on reverse lookup.
    pub fn new<I, S>(tag: Option<&str>, pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, i32)>,
        S: AsRef<str>,
    {
        let mut by_symbol = IndexMap::new();
        let mut by_value = HashMap::new();
        for (symbol, value) in pairs {
            let symbol: Arc<str> = Arc::from(symbol.as_ref());
            if by_symbol.insert(Arc::clone(&symbol), value).is_some() {
                return Err(FfiError::argument(format!(
                    "duplicate enum symbol :{}",
                    symbol
                )));
            }
            by_value.entry(value).or_insert(symbol);
        }
        Ok(Self {
            tag: tag.map(str::to_string),
            by_symbol,
            by_value,
        })
    }

    /// Sequential values starting at zero
    pub fn sequential<I, S>(tag: Option<&str>, symbols: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(tag, symbols.into_iter().zip(0..))
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Integer for a symbol
    pub fn find(&self, symbol: &str) -> Option<i32> {
        self.by_symbol.get(symbol).copied()
    }

    /// Symbol for an integer
    pub fn symbol(&self, value: i32) -> Option<&Arc<str>> {
        self.by_value.get(&value)
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.by_symbol.keys().map(|s| &**s)
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }
}

/// Enum table attached to a signature
#[derive(Debug, Clone, Default)]
pub struct Enums {
    all: Vec<Arc<Enum>>,
}

impl Enums {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, table: Arc<Enum>) {
        self.all.push(table);
    }

    pub fn with(mut self, table: Arc<Enum>) -> Self {
        self.push(table);
        self
    }

    /// Find a table by tag
    pub fn find(&self, tag: &str) -> Option<&Arc<Enum>> {
        self.all.iter().find(|e| e.tag() == Some(tag))
    }

    /// Resolve a symbol through every table, first match wins
    pub fn find_value(&self, symbol: &str) -> Option<i32> {
        self.all.iter().find_map(|e| e.find(symbol))
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

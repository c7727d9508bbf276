//! Error taxonomy for the marshalling layer
//!
//! Every failure is raised synchronously at the point of detection. Native
//! errno values are never turned into errors; see `interop::last_error`.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, FfiError>;

/// Coarse error class, mirrors the exception classes a host binding maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Type,
    Range,
    Argument,
    Bounds,
    OutOfMemory,
    Load,
    NullPointer,
    Runtime,
}

#[derive(Debug, Clone, Error)]
pub enum FfiError {
    /// Wrong managed type for a native slot
    #[error("type error: expected {expected}, got {found}")]
    Type { expected: String, found: String },

    /// Integer outside the native width's range
    #[error("value {value} outside {type_name} range ({min}..={max})")]
    Range {
        value: i128,
        type_name: &'static str,
        min: i128,
        max: i128,
    },

    /// Arity mismatch, invalid enum/type name, invalid layout field
    #[error("argument error: {0}")]
    Argument(String),

    #[error("memory access offset={offset} size={size} is out of bounds (total {total})")]
    Bounds {
        offset: i64,
        size: usize,
        total: usize,
    },

    #[error("failed to allocate memory size={requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("could not open library '{name}': {message}")]
    Load { name: String, message: String },

    #[error("null pointer access{}", .context.as_deref().map(|c| format!(" ({c})")).unwrap_or_default())]
    NullPointer { context: Option<String> },

    /// Invalid internal state: unset layout, zero-sized type, freed memory
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl FfiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Type { .. } => ErrorKind::Type,
            Self::Range { .. } => ErrorKind::Range,
            Self::Argument(_) => ErrorKind::Argument,
            Self::Bounds { .. } => ErrorKind::Bounds,
            Self::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            Self::Load { .. } => ErrorKind::Load,
            Self::NullPointer { .. } => ErrorKind::NullPointer,
            Self::Runtime(_) => ErrorKind::Runtime,
        }
    }

    pub(crate) fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::Type {
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub(crate) fn argument(message: impl Into<String>) -> Self {
        Self::Argument(message.into())
    }

    pub(crate) fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }

    pub(crate) fn arity(found: usize, expected: usize) -> Self {
        Self::Argument(format!(
            "wrong number of arguments ({} for {})",
            found, expected
        ))
    }
}

impl From<libffi::low::Error> for FfiError {
    fn from(err: libffi::low::Error) -> Self {
        match err {
            libffi::low::Error::Typedef => Self::argument("invalid argument type specified"),
            libffi::low::Error::Abi => Self::argument("invalid ABI specified"),
        }
    }
}

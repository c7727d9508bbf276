//! Dynamic library loading and symbol resolution
//!
//! Platform-agnostic wrapper around dlopen/LoadLibrary via libloading.

use super::function::Function;
use super::signature::Signature;
use crate::error::{FfiError, Result};
use crate::logging::{debug, log_library_open, perf};
use crate::memory::{Memory, Origin, UNBOUNDED};
use bitflags::bitflags;
use std::ffi::c_void;
use std::fmt;
use std::mem::ManuallyDrop;
use std::sync::Arc;

bitflags! {
    /// Open flags, translated to the platform's `RTLD_*` values
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LibraryFlags: u8 {
        const LAZY = 0b0001;
        const NOW = 0b0010;
        const GLOBAL = 0b0100;
        const LOCAL = 0b1000;
    }
}

impl Default for LibraryFlags {
    fn default() -> Self {
        Self::LAZY
    }
}

impl LibraryFlags {
    /// Native `dlopen` mode; empty flags mean `LAZY`
    pub fn to_native(self) -> i32 {
        let flags = if self.is_empty() { Self::LAZY } else { self };
        let mut mode = 0;
        if flags.contains(Self::LAZY) {
            mode |= native::LAZY;
        }
        if flags.contains(Self::NOW) {
            mode |= native::NOW;
        }
        if flags.contains(Self::GLOBAL) {
            mode |= native::GLOBAL;
        }
        if flags.contains(Self::LOCAL) {
            mode |= native::LOCAL;
        }
        mode
    }
}

#[cfg(unix)]
mod native {
    pub const LAZY: i32 = libc::RTLD_LAZY;
    pub const NOW: i32 = libc::RTLD_NOW;
    pub const GLOBAL: i32 = libc::RTLD_GLOBAL;
    pub const LOCAL: i32 = libc::RTLD_LOCAL;
}

#[cfg(not(unix))]
mod native {
    pub const LAZY: i32 = 1;
    pub const NOW: i32 = 2;
    pub const GLOBAL: i32 = 4;
    pub const LOCAL: i32 = 8;
}

/// Handle to a dynamically loaded library
///
/// Closed when the last handle, symbol or function from it is dropped. On
/// macOS it is never closed.
#[derive(Clone)]
pub struct Library(Arc<LibraryInner>);

struct LibraryInner {
    name: Option<String>,
    flags: LibraryFlags,
    handle: ManuallyDrop<libloading::Library>,
}

impl Origin for LibraryInner {}

impl Drop for LibraryInner {
    fn drop(&mut self) {
        #[cfg(not(target_os = "macos"))]
        // SAFETY: the handle is dropped exactly once, here
        unsafe {
            ManuallyDrop::drop(&mut self.handle)
        }
    }
}

impl Library {
    /// Open `name`, or the current process for `None`
    pub fn open(name: Option<&str>, flags: LibraryFlags) -> Result<Self> {
        let _timer = perf::track("library_open");
        let mode = flags.to_native();
        log_library_open(name.unwrap_or("[current process]"), mode);

        let handle = open_handle(name, mode).map_err(|e| FfiError::Load {
            name: name.unwrap_or("[current process]").to_string(),
            message: e.to_string(),
        })?;

        Ok(Self(Arc::new(LibraryInner {
            name: name.map(str::to_string),
            flags,
            handle: ManuallyDrop::new(handle),
        })))
    }

    /// Library path as given, `None` for the current process
    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    pub fn flags(&self) -> LibraryFlags {
        self.0.flags
    }

    fn address_of(&self, name: &str) -> Option<usize> {
        // SAFETY: the symbol is read as an untyped address only
        let symbol = unsafe { self.0.handle.get::<*mut c_void>(name.as_bytes()) };
        match symbol {
            Ok(symbol) if !(*symbol).is_null() => Some(*symbol as usize),
            Ok(_) => None,
            Err(e) => {
                debug!(symbol = name, error = %e, "symbol lookup failed");
                None
            }
        }
    }

    /// Look up an exported symbol
    pub fn find_symbol(&self, name: &str) -> Option<Symbol> {
        let address = self.address_of(name)?;
        Some(Symbol {
            library: self.clone(),
            name: name.to_string(),
            address,
        })
    }

    /// Look up an exported function and bind it to `signature`
    pub fn find_function(&self, name: &str, signature: &Signature) -> Option<Function> {
        self.find_symbol(name)
            .map(|symbol| symbol.to_function(signature))
    }
}

#[cfg(unix)]
fn open_handle(
    name: Option<&str>,
    mode: i32,
) -> std::result::Result<libloading::Library, libloading::Error> {
    use libloading::os::unix::Library as UnixLibrary;
    // SAFETY: running library initializers is the caller's contract
    let library = match name {
        Some(name) => unsafe { UnixLibrary::open(Some(name), mode)? },
        None => UnixLibrary::this(),
    };
    Ok(library.into())
}

#[cfg(windows)]
fn open_handle(
    name: Option<&str>,
    _mode: i32,
) -> std::result::Result<libloading::Library, libloading::Error> {
    use libloading::os::windows::Library as WindowsLibrary;
    // SAFETY: running DllMain is the caller's contract
    let library = match name {
        Some(name) => unsafe { WindowsLibrary::new(name)? },
        None => WindowsLibrary::this()?,
    };
    Ok(library.into())
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Library({}, {:?})",
            self.name().unwrap_or("[current process]"),
            self.flags()
        )
    }
}

/// Exported symbol; keeps its library open
#[derive(Clone)]
pub struct Symbol {
    library: Library,
    name: String,
    address: usize,
}

impl Symbol {
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn address(&self) -> usize {
        self.address
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    /// Unbounded view at the symbol that keeps the library open
    pub fn memory(&self) -> Memory {
        let origin: Arc<dyn Origin> = self.library.0.clone();
        Memory::from_raw_parts(self.address, UNBOUNDED, 1, Some(origin))
    }

    pub fn to_function(&self, signature: &Signature) -> Function {
        let origin: Arc<dyn Origin> = self.library.0.clone();
        Function::with_origin(self.address, signature.clone(), origin)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({} @ {:#x})", self.name, self.address)
    }
}

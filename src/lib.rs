//! Typthon FFI - dynamic foreign function calls for a managed runtime
//!
//! This crate lets a garbage-collected language call native functions whose
//! signatures are declared at runtime, and lets native code call back into
//! managed closures.
//!
//! Layers, leaves first:
//! - `types`, `enums` - native type descriptors and the builtin registry
//! - `memory` - bounds-checked views, owned buffers, auto pointers
//! - `layout` - struct and union layouts over memory
//! - `interop` - signatures, calls, libraries, errno
//! - `closure` - trampolines for callbacks

pub mod closure;
pub mod config;
pub mod enums;
pub mod error;
pub mod interop;
pub mod layout;
pub mod logging;
pub mod memory;
pub mod platform;
pub mod types;
pub mod value;

pub use closure::{make_callback, NativeCallback};
pub use enums::{Enum, Enums};
pub use error::{ErrorKind, FfiError, Result};
pub use interop::{
    call, call_interruptible, last_error, make_signature, set_last_error, CallingConvention,
    Function, Interrupt, Library, LibraryFlags, Signature, SignatureOptions, Symbol,
    VariadicInvoker,
};
pub use layout::{build_layout, Struct, StructArray, StructLayout, StructLayoutBuilder};
pub use memory::{AutoPointer, Buffer, Direction, Memory, MemoryPointer};
pub use platform::Endian;
pub use types::{find_type, NativeType, Type, TypeMap, TypeSpec};
pub use value::{Proc, RString, ToPtr, Value};

/// Environment variable naming a TOML configuration file
pub const CONFIG_ENV: &str = "TYPTHON_FFI_CONFIG";

/// Load configuration and start logging
///
/// Reads the file named by `TYPTHON_FFI_CONFIG` when set. Safe to call more
/// than once; only the first call installs anything.
pub fn init() -> Result<()> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        let loaded = config::FfiConfig::from_file(&path)?;
        // A configuration already in place wins
        let _ = config::install(loaded);
    }
    logging::init_with_config(config::get().log_config());
    logging::info!(version = env!("CARGO_PKG_VERSION"), "typthon-ffi initialized");
    Ok(())
}

//! Interoperability - call native functions with runtime-declared signatures
//!
//! Design: every argument is converted and validated before libffi runs the call
//!
//! Architecture:
//! - `signature.rs` - Signature, options, prepared CIF
//! - `marshal.rs` - managed value ↔ native value conversions
//! - `frame.rs` - per-call argument storage
//! - `call.rs` - dynamic function calling through `ffi_call`
//! - `function.rs` - native function objects
//! - `variadic.rs` - C variadic functions
//! - `blocking.rs` - calls on a helper thread with interrupts
//! - `abi.rs` - calling conventions and return classification
//! - `library.rs` - dynamic library loading (dlopen/LoadLibrary)
//! - `last_error.rs` - saved errno / GetLastError

mod abi;
mod blocking;
mod call;
mod frame;
pub(crate) mod function;
mod last_error;
mod library;
pub(crate) mod marshal;
mod signature;
mod variadic;

pub use abi::{classify_for, classify_return, CallingConvention, PlatformAbi, ReturnClass};
pub use blocking::Interrupt;
pub use call::{call, call_interruptible};
pub use function::Function;
pub use last_error::{last_error, set_last_error};
pub use library::{Library, LibraryFlags, Symbol};
pub use signature::{make_signature, Signature, SignatureOptions};
pub use variadic::VariadicInvoker;

#[cfg(test)]
mod tests;

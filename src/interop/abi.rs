//! ABI (Application Binary Interface) handling
//!
//! libffi performs the actual register assignment. This module names the
//! calling conventions a signature may declare and documents how aggregates
//! come back on the host platform.

use crate::layout::StructLayout;
use crate::types::{NativeType, Type};
use libffi::raw::ffi_abi;

/// Declared calling convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CallingConvention {
    /// C calling convention (platform default)
    #[default]
    Default,
    /// Win32 `__stdcall`; identical to `Default` everywhere else
    Stdcall,
}

impl CallingConvention {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "default" | "c" | "cdecl" => Some(Self::Default),
            "stdcall" => Some(Self::Stdcall),
            _ => None,
        }
    }

    pub(crate) fn ffi_abi(self) -> ffi_abi {
        match self {
            #[cfg(all(target_arch = "x86", target_os = "windows"))]
            Self::Stdcall => libffi::raw::ffi_abi_FFI_STDCALL,
            _ => libffi::raw::ffi_abi_FFI_DEFAULT_ABI,
        }
    }
}

/// Host platform ABI family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlatformAbi {
    /// System V AMD64 ABI (Unix x86-64)
    SysV,
    /// Microsoft x64 calling convention (Windows)
    Win64,
    /// ARM64 procedure call standard
    Aarch64,
    /// ARM AAPCS (ARM 32-bit)
    Aapcs,
    /// Anything else; aggregates assumed to return in memory
    Other,
}

impl PlatformAbi {
    /// Get platform default
    #[inline]
    pub const fn current() -> Self {
        #[cfg(all(target_arch = "x86_64", target_os = "windows"))]
        return Self::Win64;

        #[cfg(all(target_arch = "x86_64", not(target_os = "windows")))]
        return Self::SysV;

        #[cfg(target_arch = "aarch64")]
        return Self::Aarch64;

        #[cfg(target_arch = "arm")]
        return Self::Aapcs;

        #[cfg(not(any(
            target_arch = "x86_64",
            target_arch = "aarch64",
            target_arch = "arm"
        )))]
        return Self::Other;
    }
}

/// Where a return value comes back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnClass {
    Void,
    /// General-purpose register
    Integer,
    /// Floating-point register
    Float,
    /// Aggregate split across return registers
    Registers,
    /// Aggregate written through a caller-provided hidden pointer
    Memory,
}

/// Return classification for `ty` on the host ABI
///
/// - SysV x86-64: aggregates up to 16 bytes in RAX/RDX/XMM0/XMM1
/// - AArch64: up to 16 bytes, or a homogeneous float aggregate of at most
///   four members, in X0/X1 or V0-V3
/// - Win64: aggregates of exactly 1, 2, 4 or 8 bytes in RAX
/// - AAPCS: up to 4 bytes in R0
pub fn classify_return(ty: &Type) -> ReturnClass {
    classify_for(PlatformAbi::current(), ty)
}

pub fn classify_for(abi: PlatformAbi, ty: &Type) -> ReturnClass {
    match ty.kind() {
        NativeType::Void => ReturnClass::Void,
        kind if kind.is_float() => ReturnClass::Float,
        NativeType::Struct => {
            let size = ty.size();
            let in_registers = match abi {
                PlatformAbi::SysV => size <= 16,
                PlatformAbi::Aarch64 => {
                    size <= 16
                        || ty
                            .struct_layout()
                            .and_then(|l| homogeneous_float_members(l))
                            .is_some_and(|(_, count)| count <= 4)
                }
                PlatformAbi::Win64 => matches!(size, 1 | 2 | 4 | 8),
                PlatformAbi::Aapcs => size <= 4,
                PlatformAbi::Other => false,
            };
            if in_registers {
                ReturnClass::Registers
            } else {
                ReturnClass::Memory
            }
        }
        _ => ReturnClass::Integer,
    }
}

/// Float kind and member count when every leaf member is the same float kind
pub fn homogeneous_float_members(layout: &StructLayout) -> Option<(NativeType, usize)> {
    let mut leaves = Vec::new();
    collect_leaves(layout, &mut leaves);
    let first = *leaves.first()?;
    (first.is_float() && leaves.iter().all(|&k| k == first)).then_some((first, leaves.len()))
}

fn collect_leaves(layout: &StructLayout, out: &mut Vec<NativeType>) {
    for field in layout.fields() {
        collect_type(field.ty(), out);
    }
}

fn collect_type(ty: &Type, out: &mut Vec<NativeType>) {
    if let Some(nested) = ty.struct_layout() {
        collect_leaves(nested, out);
    } else if let Some((component, length)) = ty.array_parts() {
        for _ in 0..length {
            collect_type(component, out);
        }
    } else {
        out.push(ty.kind());
    }
}

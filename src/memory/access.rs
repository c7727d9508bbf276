//! Typed accessors
//!
//! Each accessor validates the whole range first, then touches memory once.
//! Multi-byte numbers are byte-swapped on views with a non-host order.

use super::{Access, Memory};
use crate::error::{FfiError, Result};
use crate::interop::marshal::to_address;
use crate::platform::LONG_SIZE;
use crate::value::Value;
use std::ffi::CStr;
use std::mem::size_of;
use std::os::raw::c_char;
use std::ptr;

/// Plain-old-data scalar that can be byte-swapped
pub(crate) trait Scalar: Copy + Default {
    fn swap(self) -> Self;
}

macro_rules! int_scalar {
    ($($t:ty),*) => {
        $(
            impl Scalar for $t {
                #[inline]
                fn swap(self) -> Self {
                    self.swap_bytes()
                }
            }
        )*
    };
}

int_scalar!(i8, u8, i16, u16, i32, u32, i64, u64, usize);

impl Scalar for f32 {
    #[inline]
    fn swap(self) -> Self {
        f32::from_bits(self.to_bits().swap_bytes())
    }
}

impl Scalar for f64 {
    #[inline]
    fn swap(self) -> Self {
        f64::from_bits(self.to_bits().swap_bytes())
    }
}

fn array_width<T>(count: usize) -> Result<usize> {
    count
        .checked_mul(size_of::<T>())
        .ok_or(FfiError::OutOfMemory { requested: usize::MAX })
}

impl Memory {
    #[inline]
    pub(crate) fn read_scalar<T: Scalar>(&self, offset: usize) -> Result<T> {
        let ptr = self.check(offset, size_of::<T>(), Access::READ)?;
        // SAFETY: range validated by check; unaligned reads are permitted
        let value = unsafe { ptr::read_unaligned(ptr as *const T) };
        Ok(if self.is_swapped() { value.swap() } else { value })
    }

    #[inline]
    pub(crate) fn write_scalar<T: Scalar>(&self, offset: usize, value: T) -> Result<()> {
        let ptr = self.check(offset, size_of::<T>(), Access::WRITE)?;
        let value = if self.is_swapped() { value.swap() } else { value };
        // SAFETY: range validated by check
        unsafe { ptr::write_unaligned(ptr as *mut T, value) };
        Ok(())
    }

    pub(crate) fn read_scalars<T: Scalar>(&self, offset: usize, count: usize) -> Result<Vec<T>> {
        let ptr = self.check(offset, array_width::<T>(count)?, Access::READ)? as *const T;
        let swapped = self.is_swapped();
        Ok((0..count)
            .map(|i| {
                // SAFETY: element i lies inside the validated range
                let v = unsafe { ptr::read_unaligned(ptr.add(i)) };
                if swapped {
                    v.swap()
                } else {
                    v
                }
            })
            .collect())
    }

    pub(crate) fn write_scalars<T: Scalar>(&self, offset: usize, values: &[T]) -> Result<()> {
        let ptr = self.check(offset, array_width::<T>(values.len())?, Access::WRITE)? as *mut T;
        let swapped = self.is_swapped();
        for (i, &v) in values.iter().enumerate() {
            let v = if swapped { v.swap() } else { v };
            // SAFETY: element i lies inside the validated range
            unsafe { ptr::write_unaligned(ptr.add(i), v) };
        }
        Ok(())
    }
}

macro_rules! typed_access {
    ($($t:ty => $read:ident, $write:ident, $read_array:ident, $write_array:ident;)*) => {
        impl Memory {
            $(
                #[inline]
                pub fn $read(&self, offset: usize) -> Result<$t> {
                    self.read_scalar(offset)
                }

                #[inline]
                pub fn $write(&self, offset: usize, value: $t) -> Result<()> {
                    self.write_scalar(offset, value)
                }

                pub fn $read_array(&self, offset: usize, count: usize) -> Result<Vec<$t>> {
                    self.read_scalars(offset, count)
                }

                pub fn $write_array(&self, offset: usize, values: &[$t]) -> Result<()> {
                    self.write_scalars(offset, values)
                }
            )*
        }
    };
}

typed_access! {
    i8 => read_int8, write_int8, read_array_of_int8, write_array_of_int8;
    u8 => read_uint8, write_uint8, read_array_of_uint8, write_array_of_uint8;
    i16 => read_int16, write_int16, read_array_of_int16, write_array_of_int16;
    u16 => read_uint16, write_uint16, read_array_of_uint16, write_array_of_uint16;
    i32 => read_int32, write_int32, read_array_of_int32, write_array_of_int32;
    u32 => read_uint32, write_uint32, read_array_of_uint32, write_array_of_uint32;
    i64 => read_int64, write_int64, read_array_of_int64, write_array_of_int64;
    u64 => read_uint64, write_uint64, read_array_of_uint64, write_array_of_uint64;
    f32 => read_float32, write_float32, read_array_of_float32, write_array_of_float32;
    f64 => read_float64, write_float64, read_array_of_float64, write_array_of_float64;
}

impl Memory {
    // ===== Platform long =====

    pub fn read_long(&self, offset: usize) -> Result<i64> {
        if LONG_SIZE == 8 {
            self.read_int64(offset)
        } else {
            self.read_int32(offset).map(i64::from)
        }
    }

    pub fn write_long(&self, offset: usize, value: i64) -> Result<()> {
        if LONG_SIZE == 8 {
            self.write_int64(offset, value)
        } else {
            let narrow = i32::try_from(value).map_err(|_| FfiError::Range {
                value: value as i128,
                type_name: "long",
                min: i32::MIN as i128,
                max: i32::MAX as i128,
            })?;
            self.write_int32(offset, narrow)
        }
    }

    pub fn read_ulong(&self, offset: usize) -> Result<u64> {
        if LONG_SIZE == 8 {
            self.read_uint64(offset)
        } else {
            self.read_uint32(offset).map(u64::from)
        }
    }

    pub fn write_ulong(&self, offset: usize, value: u64) -> Result<()> {
        if LONG_SIZE == 8 {
            self.write_uint64(offset, value)
        } else {
            let narrow = u32::try_from(value).map_err(|_| FfiError::Range {
                value: value as i128,
                type_name: "ulong",
                min: 0,
                max: u32::MAX as i128,
            })?;
            self.write_uint32(offset, narrow)
        }
    }

    // ===== Pointers =====

    #[inline]
    pub fn read_address(&self, offset: usize) -> Result<usize> {
        self.read_scalar(offset)
    }

    #[inline]
    pub fn write_address(&self, offset: usize, address: usize) -> Result<()> {
        self.write_scalar(offset, address)
    }

    /// Read a stored address as an unbounded view
    pub fn read_pointer(&self, offset: usize) -> Result<Memory> {
        self.read_address(offset).map(Memory::pointer)
    }

    /// Store anything pointer-like: nil, an integer address, a view, a struct,
    /// a function or a `ToPtr` object
    pub fn write_pointer(&self, offset: usize, value: &Value) -> Result<()> {
        let address = to_address(value)?;
        self.write_address(offset, address)
    }

    pub fn read_array_of_pointer(&self, offset: usize, count: usize) -> Result<Vec<Memory>> {
        Ok(self
            .read_scalars::<usize>(offset, count)?
            .into_iter()
            .map(Memory::pointer)
            .collect())
    }

    pub fn write_array_of_pointer(&self, offset: usize, values: &[Value]) -> Result<()> {
        let addresses = values.iter().map(to_address).collect::<Result<Vec<_>>>()?;
        self.write_scalars(offset, &addresses)
    }

    // ===== Bytes =====

    pub fn read_bytes(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let ptr = self.check(offset, len, Access::READ)?;
        // SAFETY: range validated by check
        Ok(unsafe { std::slice::from_raw_parts(ptr as *const u8, len) }.to_vec())
    }

    pub fn write_bytes(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        let ptr = self.check(offset, bytes.len(), Access::WRITE)?;
        // SAFETY: range validated by check; source is managed memory
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len()) };
        Ok(())
    }

    // ===== C strings =====

    /// Bytes up to the first NUL, scanning at most `max_len` bytes
    ///
    /// Without `max_len` a bounded view is scanned to its end and an unbounded
    /// one until a NUL is found.
    pub fn read_string_bytes(&self, offset: usize, max_len: Option<usize>) -> Result<Vec<u8>> {
        let limit = match max_len {
            Some(len) => Some(len),
            None if self.is_unbounded() => None,
            None => Some(self.size().saturating_sub(offset)),
        };
        match limit {
            Some(len) => {
                let ptr = self.check(offset, len, Access::READ)?;
                // SAFETY: range validated by check
                let bytes = unsafe { std::slice::from_raw_parts(ptr as *const u8, len) };
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(len);
                Ok(bytes[..end].to_vec())
            }
            None => {
                let ptr = self.check(offset, 0, Access::READ)?;
                // SAFETY: unbounded views are trusted to hold a terminated string
                Ok(unsafe { CStr::from_ptr(ptr as *const c_char) }.to_bytes().to_vec())
            }
        }
    }

    pub fn read_string(&self, offset: usize, max_len: Option<usize>) -> Result<String> {
        self.read_string_bytes(offset, max_len)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Write `s` plus a trailing NUL, needs `s.len() + 1` bytes
    pub fn write_string(&self, offset: usize, s: &str) -> Result<()> {
        self.write_string_bytes(offset, s.as_bytes())
    }

    pub fn write_string_bytes(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        let ptr = self.check(offset, bytes.len() + 1, Access::WRITE)?;
        // SAFETY: range of len + 1 validated by check
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
            *ptr.add(bytes.len()) = 0;
        }
        Ok(())
    }

    /// Read a `char*` array; stops at the first NULL entry when `count` is absent
    pub fn read_array_of_string(
        &self,
        offset: usize,
        count: Option<usize>,
    ) -> Result<Vec<Option<String>>> {
        let step = size_of::<usize>();
        let mut out = Vec::new();
        let mut index = 0usize;
        loop {
            if count.is_some_and(|n| index >= n) {
                break;
            }
            let address = self.read_address(offset + index * step)?;
            if address == 0 {
                if count.is_none() {
                    break;
                }
                out.push(None);
            } else {
                out.push(Some(Memory::pointer(address).read_string(0, None)?));
            }
            index += 1;
        }
        Ok(out)
    }
}

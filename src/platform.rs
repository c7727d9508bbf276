//! Host platform facts resolved once per process
//!
//! `long` width, pointer width, byte order and page size never change after
//! startup, so everything here is either a `const` or a lazily computed value.

use once_cell::sync::Lazy;
use std::os::raw::c_long;

/// Byte width of the host C `long`
pub const LONG_SIZE: usize = std::mem::size_of::<c_long>();

/// Byte width of a native address
pub const ADDRESS_SIZE: usize = std::mem::size_of::<usize>();

/// Alignment guaranteed for owned buffers
pub const BUFFER_ALIGN: usize = 8;

/// Explicit byte order for memory views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    Big,
    Little,
    Native,
}

impl Endian {
    /// Resolve `Native` to the host order
    #[inline]
    pub const fn resolve(self) -> Endian {
        match self {
            Endian::Native => HOST_ENDIAN,
            other => other,
        }
    }
}

#[cfg(target_endian = "little")]
pub const HOST_ENDIAN: Endian = Endian::Little;

#[cfg(target_endian = "big")]
pub const HOST_ENDIAN: Endian = Endian::Big;

static PAGE_SIZE: Lazy<usize> = Lazy::new(query_page_size);

/// Size of one virtual memory page
#[inline]
pub fn page_size() -> usize {
    *PAGE_SIZE
}

#[cfg(unix)]
fn query_page_size() -> usize {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

#[cfg(windows)]
fn query_page_size() -> usize {
    use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};

    // SAFETY: GetSystemInfo fills the whole struct
    let info = unsafe {
        let mut info: SYSTEM_INFO = std::mem::zeroed();
        GetSystemInfo(&mut info);
        info
    };
    match info.dwPageSize as usize {
        0 => 4096,
        n => n,
    }
}

#[cfg(not(any(unix, windows)))]
fn query_page_size() -> usize {
    4096
}

/// Round `value` up to a multiple of `align` (power of two or any non-zero)
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    if align <= 1 {
        value
    } else {
        (value + align - 1) / align * align
    }
}

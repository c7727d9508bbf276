//! Per-thread copy of the OS error code from the most recent native call

use std::cell::Cell;

thread_local! {
    static LAST_ERROR: Cell<i32> = const { Cell::new(0) };
}

/// Current OS error code of this thread
///
/// Must run directly after the native call returns.
#[inline]
pub(crate) fn capture() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[inline]
pub(crate) fn store(code: i32) {
    LAST_ERROR.with(|slot| slot.set(code));
}

/// OS error code saved after the last native call on this thread
#[inline]
pub fn last_error() -> i32 {
    LAST_ERROR.with(Cell::get)
}

/// Set both the saved code and the live OS error value
pub fn set_last_error(code: i32) {
    store(code);
    set_os_error(code);
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_os_error(code: i32) {
    // SAFETY: __errno_location returns this thread's errno slot
    unsafe { *libc::__errno_location() = code };
}

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly"
))]
fn set_os_error(code: i32) {
    // SAFETY: __error returns this thread's errno slot
    unsafe { *libc::__error() = code };
}

#[cfg(any(target_os = "netbsd", target_os = "openbsd"))]
fn set_os_error(code: i32) {
    // SAFETY: __errno returns this thread's errno slot
    unsafe { *libc::__errno() = code };
}

#[cfg(windows)]
fn set_os_error(code: i32) {
    // SAFETY: SetLastError only writes the calling thread's error value
    unsafe { winapi::um::errhandlingapi::SetLastError(code as u32) };
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "netbsd",
    target_os = "openbsd",
    windows
)))]
fn set_os_error(_code: i32) {}

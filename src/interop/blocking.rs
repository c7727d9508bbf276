//! Blocking calls on a helper thread
//!
//! The caller parks on a channel while the helper runs the native call. An
//! `Interrupt` lets another thread ask the caller to run an unblock function
//! (for example closing a descriptor the native call is waiting on).

use crate::config;
use crate::error::{FfiError, Result};
use crate::logging::{debug, warn};
use flume::RecvTimeoutError;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

type UnblockFn = Box<dyn Fn() + Send + Sync>;

/// Cancellation request for a blocking call
///
/// Cooperative only: the native call returns when the unblock function makes
/// it return.
#[derive(Clone, Default)]
pub struct Interrupt(Arc<InterruptInner>);

#[derive(Default)]
struct InterruptInner {
    requested: AtomicBool,
    unblock: Mutex<Option<UnblockFn>>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unblock<F>(unblock: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let interrupt = Self::new();
        *interrupt.0.unblock.lock() = Some(Box::new(unblock));
        interrupt
    }

    /// Ask the parked caller to run the unblock function
    pub fn request(&self) {
        self.0.requested.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_requested(&self) -> bool {
        self.0.requested.load(Ordering::Acquire)
    }

    fn unblock(&self) {
        if let Some(unblock) = self.0.unblock.lock().as_ref() {
            unblock();
        }
    }
}

/// Run `job` on a helper thread and wait for its result
pub(crate) fn run_blocking<F, T>(job: F, interrupt: Option<&Interrupt>) -> Result<T>
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    let poll = Duration::from_millis(config::get().calls.blocking_poll_ms.max(1));
    let (tx, rx) = flume::bounded(1);

    std::thread::scope(|scope| {
        scope.spawn(move || {
            // A panic drops the sender; the caller sees a disconnect
            if let Ok(out) = panic::catch_unwind(AssertUnwindSafe(job)) {
                let _ = tx.send(out);
            }
        });

        let mut unblocked = false;
        loop {
            match rx.recv_timeout(poll) {
                Ok(out) => return Ok(out),
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(interrupt) = interrupt {
                        if !unblocked && interrupt.is_requested() {
                            debug!("interrupt requested, running unblock function");
                            interrupt.unblock();
                            unblocked = true;
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("blocking call helper exited without a result");
                    return Err(FfiError::runtime("blocking call panicked"));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_result_is_returned() {
        assert_eq!(run_blocking(|| 7, None).unwrap(), 7);
    }

    #[test]
    fn test_panic_becomes_runtime_error() {
        let err = run_blocking(|| -> i32 { panic!("boom") }, None).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Runtime);
    }

    #[test]
    fn test_interrupt_runs_unblock_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let released = Arc::new(AtomicBool::new(false));

        let interrupt = {
            let calls = Arc::clone(&calls);
            let released = Arc::clone(&released);
            Interrupt::with_unblock(move || {
                calls.fetch_add(1, Ordering::SeqCst);
                released.store(true, Ordering::SeqCst);
            })
        };
        interrupt.request();

        let waiter = Arc::clone(&released);
        run_blocking(
            move || {
                while !waiter.load(Ordering::SeqCst) {
                    std::thread::sleep(Duration::from_millis(1));
                }
            },
            Some(&interrupt),
        )
        .unwrap();

        assert!(interrupt.is_requested());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

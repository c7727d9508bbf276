//! Dynamic function calls through a prepared CIF

use super::blocking::{run_blocking, Interrupt};
use super::frame::{ArgFrame, ReturnSlot};
use super::last_error;
use super::marshal::from_native;
use super::signature::Signature;
use crate::closure::dispatch::CallScope;
use crate::error::{FfiError, Result};
use crate::logging::{log_ffi_call, log_ffi_error, log_ffi_return};
use crate::value::{Proc, Value};
use std::borrow::Cow;

/// What the native side left behind, gathered on the thread that made the call
struct NativeOutcome {
    errno: Option<i32>,
    callback_error: Option<FfiError>,
}

/// Call the native function at `address`
///
/// With one callback parameter, `block` may stand in for it and `args` is then
/// one shorter than the parameter list.
pub fn call(
    signature: &Signature,
    address: usize,
    args: &[Value],
    block: Option<&Proc>,
) -> Result<Value> {
    invoke(signature, address, args, block, None)
}

/// Like `call`, always on a helper thread, watching `interrupt`
pub fn call_interruptible(
    signature: &Signature,
    address: usize,
    args: &[Value],
    block: Option<&Proc>,
    interrupt: &Interrupt,
) -> Result<Value> {
    invoke(signature, address, args, block, Some(interrupt))
}

fn invoke(
    signature: &Signature,
    address: usize,
    args: &[Value],
    block: Option<&Proc>,
    interrupt: Option<&Interrupt>,
) -> Result<Value> {
    if address == 0 {
        return Err(FfiError::NullPointer {
            context: Some("function address".into()),
        });
    }
    let args = bind_arguments(signature, args, block)?;
    let mut frame = ArgFrame::build(signature, &args)?;
    execute(signature, address, &mut frame, interrupt)
}

/// Substitute the block for the callback parameter when one argument is missing
fn bind_arguments<'a>(
    signature: &Signature,
    args: &'a [Value],
    block: Option<&Proc>,
) -> Result<Cow<'a, [Value]>> {
    let expected = signature.param_count();
    if args.len() == expected {
        return Ok(Cow::Borrowed(args));
    }
    match (signature.callback_param(), block) {
        (Some(index), Some(block)) if args.len() + 1 == expected => {
            let mut bound = args.to_vec();
            bound.insert(index, Value::Proc(block.clone()));
            Ok(Cow::Owned(bound))
        }
        _ => Err(FfiError::arity(args.len(), expected)),
    }
}

/// Run a converted frame and convert the return value
pub(crate) fn execute(
    signature: &Signature,
    address: usize,
    frame: &mut ArgFrame,
    interrupt: Option<&Interrupt>,
) -> Result<Value> {
    let mut ret = ReturnSlot::for_type(signature.return_type());
    log_ffi_call(address, frame.len());

    let outcome = if signature.is_blocking() || interrupt.is_some() {
        let ret = &mut ret;
        // SAFETY: the frame was built for this signature; address validity is
        // the caller's contract
        run_blocking(
            move || unsafe { raw_call(signature, address, frame, ret) },
            interrupt,
        )?
    } else {
        // SAFETY: as above
        unsafe { raw_call(signature, address, frame, &mut ret) }
    };

    if let Some(code) = outcome.errno {
        last_error::store(code);
    }
    log_ffi_return(address, outcome.errno);

    if let Some(error) = outcome.callback_error {
        log_ffi_error(address, &error.to_string());
        return Err(error);
    }
    // SAFETY: libffi wrote a value of the return type into the slot
    unsafe { from_native(signature.return_type(), ret.as_ptr(), true) }
}

/// # Safety
/// `address` must be a function matching `signature`.
unsafe fn raw_call(
    signature: &Signature,
    address: usize,
    frame: &mut ArgFrame,
    ret: &mut ReturnSlot,
) -> NativeOutcome {
    let scope = CallScope::enter();
    let mut values = frame.arg_values();
    let code: unsafe extern "C" fn() = std::mem::transmute(address);

    libffi::raw::ffi_call(signature.cif(), Some(code), ret.as_mut_ptr(), values.as_mut_ptr());

    let errno = signature.saves_errno().then(last_error::capture);
    NativeOutcome {
        errno,
        callback_error: scope.finish(),
    }
}

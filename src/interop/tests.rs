//! Test suite for the call marshaller

use super::*;
use crate::enums::{Enum, Enums};
use crate::error::ErrorKind;
use crate::layout::{Struct, StructLayoutBuilder};
use crate::memory::MemoryPointer;
use crate::types::{NativeType, Type, TypeSpec};
use crate::value::{Proc, RString, Value};
use std::os::raw::c_char;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// Test helpers
extern "C" fn add_i32(a: i32, b: i32) -> i32 {
    a + b
}

extern "C" fn mul_f64(a: f64, b: f64) -> f64 {
    a * b
}

extern "C" fn identity_ptr(ptr: *const core::ffi::c_void) -> *const core::ffi::c_void {
    ptr
}

extern "C" fn no_args() -> i32 {
    42
}

extern "C" fn negate_i8(v: i8) -> i8 {
    -v
}

extern "C" fn is_even(v: i32) -> i32 {
    (v % 2 == 0) as i32
}

extern "C" fn c_len(s: *const c_char) -> i32 {
    if s.is_null() {
        return -1;
    }
    unsafe { std::ffi::CStr::from_ptr(s) }.to_bytes().len() as i32
}

extern "C" fn fill(buf: *mut u8, len: usize) {
    for i in 0..len {
        unsafe { *buf.add(i) = b'a' + i as u8 };
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Point {
    x: i32,
    y: i32,
}

extern "C" fn make_point(x: i32, y: i32) -> Point {
    Point { x, y }
}

extern "C" fn sum_point(p: Point) -> i32 {
    p.x + p.y
}

#[repr(C)]
#[derive(Clone, Copy)]
union FloatPair {
    a: f32,
    b: f32,
}

extern "C" fn union_first(u: FloatPair) -> f32 {
    unsafe { u.a }
}

#[repr(C)]
#[derive(Clone, Copy)]
union Word {
    i: i32,
    f: f32,
}

extern "C" fn word_bits(w: Word) -> i32 {
    unsafe { w.i }
}

#[repr(C, align(8))]
#[derive(Clone, Copy)]
struct AlignedPair {
    a: f32,
    b: f32,
}

extern "C" fn aligned_sum(p: AlignedPair) -> f32 {
    p.a + p.b
}

extern "C" fn apply(cb: Option<extern "C" fn(i32) -> i32>, v: i32) -> i32 {
    match cb {
        Some(cb) => cb(v),
        None => -1,
    }
}

extern "C" fn wait_for(flag: *const AtomicBool) -> i32 {
    let flag = unsafe { &*flag };
    while !flag.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    7
}

#[cfg(any(target_os = "linux", target_os = "android"))]
extern "C" fn fail_with(code: i32) -> i32 {
    unsafe { *libc::__errno_location() = code };
    -1
}

fn sig<I>(ret: NativeType, params: I) -> Signature
where
    I: IntoIterator<Item = NativeType>,
{
    Signature::new(ret, params, SignatureOptions::default()).unwrap()
}

fn point_layout() -> Arc<crate::layout::StructLayout> {
    StructLayoutBuilder::new()
        .add("x", NativeType::Int32)
        .add("y", NativeType::Int32)
        .build()
        .unwrap()
}

#[test]
fn test_call_integers() {
    let s = sig(NativeType::Int32, [NativeType::Int32, NativeType::Int32]);
    let out = call(&s, add_i32 as usize, &[Value::Int(2), Value::Int(3)], None).unwrap();
    assert_eq!(out, Value::Int(5));
}

#[test]
fn test_call_by_type_names() {
    let s = make_signature("double", ["double", "double"], SignatureOptions::default()).unwrap();
    // Integers promote to float
    let out = call(&s, mul_f64 as usize, &[Value::Float(1.5), Value::Int(4)], None).unwrap();
    assert_eq!(out, Value::Float(6.0));

    let err = make_signature("int", ["no_such"], SignatureOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Argument);
}

#[test]
fn test_call_without_args() {
    let s = sig(NativeType::Int32, []);
    assert_eq!(call(&s, no_args as usize, &[], None).unwrap(), Value::Int(42));
}

#[test]
fn test_arity_message() {
    let s = sig(NativeType::Int32, [NativeType::Int32, NativeType::Int32]);
    let err = call(&s, add_i32 as usize, &[Value::Int(1)], None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Argument);
    assert!(err.to_string().ends_with("wrong number of arguments (1 for 2)"));
}

#[test]
fn test_conversion_errors_before_call() {
    let s = sig(NativeType::Int32, [NativeType::UInt8, NativeType::UInt32]);
    let err = call(&s, add_i32 as usize, &[Value::Int(256), Value::Int(0)], None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
    let err = call(&s, add_i32 as usize, &[Value::Int(0), Value::Int(-1)], None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
    let err = call(&s, add_i32 as usize, &[Value::Float(1.0), Value::Int(0)], None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
}

#[test]
fn test_null_function_address() {
    let s = sig(NativeType::Int32, []);
    let err = call(&s, 0, &[], None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NullPointer);
}

#[test]
fn test_invalid_signatures() {
    let opts = SignatureOptions::default;
    assert!(Signature::new(NativeType::Int32, [NativeType::Void], opts()).is_err());
    assert!(Signature::new(NativeType::Int32, [NativeType::Varargs], opts()).is_err());
    assert!(Signature::new(Type::char_array(4), [NativeType::Int32], opts()).is_err());
}

#[test]
fn test_small_int_and_bool_returns() {
    let s = sig(NativeType::Int8, [NativeType::Int8]);
    assert_eq!(call(&s, negate_i8 as usize, &[Value::Int(5)], None).unwrap(), Value::Int(-5));

    let s = sig(NativeType::Bool, [NativeType::Int32]);
    assert_eq!(call(&s, is_even as usize, &[Value::Int(4)], None).unwrap(), Value::Bool(true));
    assert_eq!(call(&s, is_even as usize, &[Value::Int(3)], None).unwrap(), Value::Bool(false));
}

#[test]
fn test_pointer_round_trip() {
    let s = sig(NativeType::Pointer, [NativeType::Pointer]);
    let out = call(&s, identity_ptr as usize, &[Value::Int(0x1234)], None).unwrap();
    assert_eq!(out.as_pointer().unwrap().address(), 0x1234);

    let out = call(&s, identity_ptr as usize, &[Value::Nil], None).unwrap();
    assert!(out.as_pointer().unwrap().is_null());

    let buf = MemoryPointer::new(1, 8, true).unwrap();
    let out = call(&s, identity_ptr as usize, &[buf.clone().into()], None).unwrap();
    assert_eq!(out.as_pointer().unwrap().address(), buf.address());

    let err = call(&s, identity_ptr as usize, &[Value::Bool(true)], None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
}

#[test]
fn test_freed_memory_argument_is_rejected() {
    let s = sig(NativeType::Pointer, [NativeType::Pointer]);
    let buf = MemoryPointer::new(1, 8, true).unwrap();
    buf.free();
    let err = call(&s, identity_ptr as usize, &[buf.into()], None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
}

#[test]
fn test_string_arguments() {
    let s = sig(NativeType::Int32, [NativeType::String]);
    assert_eq!(call(&s, c_len as usize, &[Value::str("hello")], None).unwrap(), Value::Int(5));
    assert_eq!(call(&s, c_len as usize, &[Value::Nil], None).unwrap(), Value::Int(-1));

    let err = call(&s, c_len as usize, &[Value::str(b"a\0b".to_vec())], None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Argument);
}

#[test]
fn test_managed_string_as_buffer() {
    let s = Signature::new(
        NativeType::Void,
        [TypeSpec::from(NativeType::BufferOut), TypeSpec::from("size_t")],
        SignatureOptions::default(),
    )
    .unwrap();
    let target = RString::with_len(4);
    let out = call(&s, fill as usize, &[Value::Str(target.clone()), Value::Int(4)], None).unwrap();
    assert_eq!(out, Value::Nil);
    assert_eq!(target.to_bytes(), b"abcd");
}

#[test]
fn test_struct_by_value() {
    let point = Type::struct_by_value(point_layout());
    let make = Signature::new(
        point.clone(),
        [NativeType::Int32, NativeType::Int32],
        SignatureOptions::default(),
    )
    .unwrap();
    let out = call(&make, make_point as usize, &[Value::Int(3), Value::Int(4)], None).unwrap();
    let p = out.as_struct().unwrap();
    assert_eq!(p.get("x").unwrap(), Value::Int(3));
    assert_eq!(p.get("y").unwrap(), Value::Int(4));

    let sum = Signature::new(NativeType::Int32, [point], SignatureOptions::default()).unwrap();
    let out = call(&sum, sum_point as usize, &[out.clone()], None).unwrap();
    assert_eq!(out, Value::Int(7));

    let other = StructLayoutBuilder::new()
        .add("a", NativeType::Int64)
        .build()
        .unwrap();
    let wrong = Struct::new(other).unwrap();
    let err = call(&sum, sum_point as usize, &[wrong.into()], None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
}

#[test]
fn test_float_union_by_value() {
    let layout = StructLayoutBuilder::new()
        .union(true)
        .add("a", NativeType::Float32)
        .add("b", NativeType::Float32)
        .build()
        .unwrap();
    let u = Struct::new(layout.clone()).unwrap();
    u.put("a", 2.5).unwrap();

    let s = Signature::new(
        NativeType::Float32,
        [Type::struct_by_value(layout)],
        SignatureOptions::default(),
    )
    .unwrap();
    let out = call(&s, union_first as usize, &[u.into()], None).unwrap();
    assert_eq!(out, Value::Float(2.5));
}

#[test]
fn test_mixed_union_by_value() {
    let layout = StructLayoutBuilder::new()
        .union(true)
        .add("i", NativeType::Int32)
        .add("f", NativeType::Float32)
        .build()
        .unwrap();
    let u = Struct::new(layout.clone()).unwrap();
    u.put("i", -77).unwrap();

    let s = Signature::new(
        NativeType::Int32,
        [Type::struct_by_value(layout)],
        SignatureOptions::default(),
    )
    .unwrap();
    assert_eq!(call(&s, word_bits as usize, &[u.into()], None).unwrap(), Value::Int(-77));
}

#[test]
fn test_over_aligned_float_struct_by_value() {
    let layout = StructLayoutBuilder::new()
        .alignment(8)
        .add("a", NativeType::Float32)
        .add("b", NativeType::Float32)
        .build()
        .unwrap();
    assert_eq!(layout.alignment(), 8);
    let p = Struct::new(layout.clone()).unwrap();
    p.put("a", 1.25).unwrap();
    p.put("b", 2.5).unwrap();

    let s = Signature::new(
        NativeType::Float32,
        [Type::struct_by_value(layout)],
        SignatureOptions::default(),
    )
    .unwrap();
    let out = call(&s, aligned_sum as usize, &[p.into()], None).unwrap();
    assert_eq!(out, Value::Float(3.75));
}

#[test]
fn test_return_class() {
    let point = Type::struct_by_value(point_layout());
    let s = Signature::new(point, [NativeType::Int32], SignatureOptions::default()).unwrap();
    assert_eq!(s.return_class(), classify_return(s.return_type()));
    assert_eq!(classify_for(PlatformAbi::SysV, s.return_type()), ReturnClass::Registers);
    assert_eq!(classify_for(PlatformAbi::Win64, s.return_type()), ReturnClass::Registers);
    assert_eq!(classify_for(PlatformAbi::Aapcs, s.return_type()), ReturnClass::Memory);
    assert_eq!(sig(NativeType::Float64, []).return_class(), ReturnClass::Float);
    assert_eq!(sig(NativeType::Void, []).return_class(), ReturnClass::Void);
}

#[test]
fn test_calling_convention_names() {
    assert_eq!(CallingConvention::from_name("stdcall"), Some(CallingConvention::Stdcall));
    assert_eq!(CallingConvention::from_name("C"), Some(CallingConvention::Default));
    assert_eq!(CallingConvention::from_name("fastcall"), None);
}

#[test]
fn test_enum_symbols_for_int_params() {
    let table = Arc::new(Enums::new().with(Arc::new(
        Enum::new(Some("level"), [("low", 1), ("high", 10)]).unwrap(),
    )));
    let s = Signature::new(
        NativeType::Int32,
        [NativeType::Int32, NativeType::Int32],
        SignatureOptions::default().enums(table),
    )
    .unwrap();

    let out = call(&s, add_i32 as usize, &[Value::sym("high"), Value::Int(1)], None).unwrap();
    assert_eq!(out, Value::Int(11));

    let err = call(&s, add_i32 as usize, &[Value::sym("mid"), Value::Int(1)], None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Type);
}

#[test]
fn test_enum_return_maps_to_symbol() {
    let status = Arc::new(Enum::new(Some("status"), [("ok", 5)]).unwrap());
    let s = Signature::new(
        Type::enumeration(status),
        [NativeType::Int32, NativeType::Int32],
        SignatureOptions::default(),
    )
    .unwrap();
    assert_eq!(
        call(&s, add_i32 as usize, &[Value::Int(2), Value::Int(3)], None).unwrap(),
        Value::sym("ok")
    );
    assert_eq!(
        call(&s, add_i32 as usize, &[Value::Int(2), Value::Int(2)], None).unwrap(),
        Value::Int(4)
    );
}

#[test]
fn test_callback_from_proc() {
    let cb = sig(NativeType::Int32, [NativeType::Int32]);
    let s = Signature::new(
        NativeType::Int32,
        [cb.to_type(), builtin_int32()],
        SignatureOptions::default(),
    )
    .unwrap();
    assert_eq!(s.callback_param(), Some(0));

    let triple = Proc::new(|args| Ok(Value::Int(args[0].expect_int()? * 3)));
    let out = call(&s, apply as usize, &[triple.clone().into(), Value::Int(5)], None).unwrap();
    assert_eq!(out, Value::Int(15));

    // Block stands in for the callback parameter
    let out = call(&s, apply as usize, &[Value::Int(6)], Some(&triple)).unwrap();
    assert_eq!(out, Value::Int(18));
    assert_eq!(triple.compiled_count(), 1);

    let out = call(&s, apply as usize, &[Value::Nil, Value::Int(6)], None).unwrap();
    assert_eq!(out, Value::Int(-1));
}

#[test]
fn test_function_objects() {
    let cb = sig(NativeType::Int32, [NativeType::Int32]);
    let negate = Proc::new(|args| Ok(Value::Int(-args[0].expect_int()?)));
    let f = Function::from_proc(&cb, &negate).unwrap();
    assert!(f.callback().is_some());
    assert_eq!(f.call(&[Value::Int(9)]).unwrap(), Value::Int(-9));

    let s = Signature::new(
        NativeType::Int32,
        [cb.to_type(), builtin_int32()],
        SignatureOptions::default(),
    )
    .unwrap();
    let out = call(&s, apply as usize, &[f.clone().into(), Value::Int(2)], None).unwrap();
    assert_eq!(out, Value::Int(-2));

    let native = Function::new(add_i32 as usize, sig(NativeType::Int32, [NativeType::Int32, NativeType::Int32]));
    assert_eq!(native.call(&[Value::Int(1), Value::Int(1)]).unwrap(), Value::Int(2));
}

#[test]
fn test_callback_error_is_reraised() {
    let cb = sig(NativeType::Int32, [NativeType::Int32]);
    let s = Signature::new(
        NativeType::Int32,
        [cb.to_type(), builtin_int32()],
        SignatureOptions::default(),
    )
    .unwrap();
    let failing = Proc::new(|_| Err(crate::error::FfiError::argument("boom")));
    let err = call(&s, apply as usize, &[Value::Int(1)], Some(&failing)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Argument);
    assert!(err.to_string().contains("boom"));

    // Nothing left behind for the next call
    let ok = Proc::new(|args| Ok(args[0].clone()));
    assert_eq!(call(&s, apply as usize, &[Value::Int(4)], Some(&ok)).unwrap(), Value::Int(4));
}

#[test]
fn test_callback_panic_is_contained() {
    let cb = sig(NativeType::Int32, [NativeType::Int32]);
    let s = Signature::new(
        NativeType::Int32,
        [cb.to_type(), builtin_int32()],
        SignatureOptions::default(),
    )
    .unwrap();
    let panicking = Proc::new(|_| panic!("inside callback"));
    let err = call(&s, apply as usize, &[Value::Int(1)], Some(&panicking)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
}

#[test]
fn test_blocking_call() {
    let s = Signature::new(
        NativeType::Int32,
        [NativeType::Int32, NativeType::Int32],
        SignatureOptions::default().blocking(true),
    )
    .unwrap();
    assert!(s.is_blocking());
    let out = call(&s, add_i32 as usize, &[Value::Int(20), Value::Int(22)], None).unwrap();
    assert_eq!(out, Value::Int(42));
}

#[test]
fn test_interruptible_call() {
    static RELEASE: AtomicBool = AtomicBool::new(false);
    let s = sig(NativeType::Int32, [NativeType::Pointer]);
    let interrupt = Interrupt::with_unblock(|| RELEASE.store(true, Ordering::SeqCst));

    let requester = {
        let interrupt = interrupt.clone();
        std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            interrupt.request();
        })
    };
    let flag = Value::Int(&RELEASE as *const AtomicBool as usize as i128);
    let out = call_interruptible(&s, wait_for as usize, &[flag], None, &interrupt).unwrap();
    requester.join().unwrap();
    assert_eq!(out, Value::Int(7));
}

#[cfg(any(target_os = "linux", target_os = "android"))]
#[test]
fn test_errno_saved_after_call() {
    let s = sig(NativeType::Int32, [NativeType::Int32]);
    set_last_error(0);
    assert_eq!(call(&s, fail_with as usize, &[Value::Int(42)], None).unwrap(), Value::Int(-1));
    assert_eq!(last_error(), 42);

    let quiet = Signature::new(
        NativeType::Int32,
        [NativeType::Int32],
        SignatureOptions::default().save_errno(false),
    )
    .unwrap();
    set_last_error(3);
    call(&quiet, fail_with as usize, &[Value::Int(17)], None).unwrap();
    assert_eq!(last_error(), 3);

    let blocking = Signature::new(
        NativeType::Int32,
        [NativeType::Int32],
        SignatureOptions::default().blocking(true),
    )
    .unwrap();
    call(&blocking, fail_with as usize, &[Value::Int(11)], None).unwrap();
    assert_eq!(last_error(), 11);
}

#[test]
fn test_set_last_error() {
    set_last_error(9);
    assert_eq!(last_error(), 9);
    std::thread::spawn(|| assert_eq!(last_error(), 0)).join().unwrap();
}

#[cfg(unix)]
#[test]
fn test_library_symbols() {
    let this = Library::open(None, LibraryFlags::empty()).unwrap();
    assert_eq!(this.name(), None);
    assert!(this.find_symbol("definitely_not_a_symbol_4711").is_none());

    let strlen_sig = Signature::new("size_t", ["string"], SignatureOptions::default()).unwrap();
    let strlen = this.find_function("strlen", &strlen_sig).unwrap();
    assert_eq!(strlen.call(&[Value::str("four")]).unwrap(), Value::Int(4));

    let symbol = this.find_symbol("strlen").unwrap();
    assert_eq!(symbol.address(), strlen.address());
    assert_eq!(symbol.memory().address(), symbol.address());
}

#[test]
fn test_library_load_error() {
    let err = Library::open(Some("/nonexistent/libtypthon_missing.so"), LibraryFlags::NOW).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Load);
    assert!(err.to_string().contains("libtypthon_missing"));
}

#[test]
fn test_library_flags() {
    assert_eq!(LibraryFlags::empty().to_native(), LibraryFlags::LAZY.to_native());
    #[cfg(unix)]
    assert_eq!(
        (LibraryFlags::NOW | LibraryFlags::GLOBAL).to_native(),
        libc::RTLD_NOW | libc::RTLD_GLOBAL
    );
}

#[cfg(unix)]
#[test]
fn test_variadic_snprintf() {
    let invoker = VariadicInvoker::new(
        libc::snprintf as usize,
        "int",
        ["pointer", "size_t", "string", "varargs"],
        SignatureOptions::default(),
    )
    .unwrap();
    assert_eq!(invoker.fixed_count(), 3);

    let buf = MemoryPointer::new(1, 64, true).unwrap();
    let fixed = [buf.clone().into(), Value::Int(64), Value::str("%d-%s-%.1f-%c")];
    let extra = [
        (TypeSpec::from("int"), Value::Int(7)),
        (TypeSpec::from("string"), Value::str("x")),
        (TypeSpec::from("float"), Value::Float(2.5)),
        (TypeSpec::from("char"), Value::Int(b'z' as i128)),
    ];
    let written = invoker.call(&fixed, &extra).unwrap();
    assert_eq!(written, Value::Int(9));
    assert_eq!(buf.read_string(0, None).unwrap(), "7-x-2.5-z");

    // Same extra types reuse the prepared CIF
    invoker.call(&fixed, &extra).unwrap();

    let err = invoker
        .call(&fixed, &[(TypeSpec::from("uchar"), Value::Int(300))])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
}

#[test]
fn test_signature_display() {
    let s = sig(NativeType::Int32, [NativeType::Pointer, NativeType::Float64]);
    assert_eq!(s.to_string(), "(pointer, float64) -> int32");
}

fn builtin_int32() -> Type {
    crate::types::builtin(NativeType::Int32).unwrap()
}

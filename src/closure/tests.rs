//! Test suite for trampolines and callback dispatch

use super::*;
use crate::enums::Enum;
use crate::error::ErrorKind;
use crate::interop::SignatureOptions;
use crate::layout::{Struct, StructLayout, StructLayoutBuilder};
use crate::memory::MemoryPointer;
use crate::types::{NativeType, Type};
use crate::value::{Proc, Value};
use std::sync::Arc;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Point {
    x: i32,
    y: i32,
}

extern "C" fn map_point(cb: extern "C" fn(Point) -> Point, p: Point) -> Point {
    cb(p)
}

fn point_layout() -> Arc<StructLayout> {
    StructLayoutBuilder::new()
        .add("x", NativeType::Int32)
        .add("y", NativeType::Int32)
        .build()
        .unwrap()
}

fn int_to_int() -> Signature {
    Signature::new(NativeType::Int32, [NativeType::Int32], SignatureOptions::default()).unwrap()
}

/// Call a trampoline directly, the way native code would
fn call_int(callback: &NativeCallback, v: i32) -> i32 {
    let f: extern "C" fn(i32) -> i32 = unsafe { std::mem::transmute(callback.address()) };
    f(v)
}

#[test]
fn test_callback_runs_closure() {
    let add_one = Proc::new(|args| Ok(Value::Int(args[0].expect_int()? + 1)));
    let callback = make_callback(&int_to_int(), &add_one).unwrap();
    assert_ne!(callback.address(), 0);
    assert_eq!(call_int(&callback, 41), 42);
    assert_eq!(call_int(&callback, -1), 0);
}

#[test]
fn test_callback_cached_per_proc() {
    let sig = int_to_int();
    let proc_ = Proc::new(|args| Ok(args[0].clone()));
    let first = make_callback(&sig, &proc_).unwrap();
    let second = make_callback(&sig, &proc_).unwrap();
    assert_eq!(first.address(), second.address());
    assert_eq!(proc_.compiled_count(), 1);

    let other = Signature::new(NativeType::Int64, [NativeType::Int64], SignatureOptions::default())
        .unwrap();
    let third = make_callback(&other, &proc_).unwrap();
    assert_ne!(third.address(), first.address());
    assert_eq!(proc_.compiled_count(), 2);
}

#[test]
fn test_live_lookup_and_release() {
    let sig = int_to_int();
    let proc_ = Proc::new(|_| Ok(Value::Int(5)));
    let id = proc_.id();

    let callback = make_callback(&sig, &proc_).unwrap();
    let trampoline = pool().lookup(id, &sig).unwrap();
    assert_eq!(trampoline.code(), callback.address());
    drop(trampoline);

    drop(callback);
    drop(proc_);
    assert!(pool().lookup(id, &sig).is_none());
}

#[test]
fn test_pool_grows_in_batches() {
    let stats = pool().stats();
    assert!(pool().batch_size() >= 1);
    assert!(stats.total_slots >= stats.free_slots);

    let sig = int_to_int();
    let procs: Vec<Proc> = (0..3).map(|i| Proc::new(move |_| Ok(Value::Int(i)))).collect();
    let callbacks: Vec<_> = procs
        .iter()
        .map(|p| make_callback(&sig, p).unwrap())
        .collect();
    for (i, cb) in callbacks.iter().enumerate() {
        assert_eq!(call_int(cb, 0), i as i32);
    }
    assert!(pool().stats().total_slots >= 3);
}

#[test]
fn test_nil_and_error_results_are_zero() {
    let sig = int_to_int();
    let nothing = make_callback(&sig, &Proc::new(|_| Ok(Value::Nil))).unwrap();
    assert_eq!(call_int(&nothing, 9), 0);

    // Outside any call the error is only logged
    let failing = Proc::new(|_| Err(crate::error::FfiError::runtime("no")));
    let failing = make_callback(&sig, &failing).unwrap();
    assert_eq!(call_int(&failing, 9), 0);

    let wrong = make_callback(&sig, &Proc::new(|_| Ok(Value::str("x")))).unwrap();
    assert_eq!(call_int(&wrong, 9), 0);
}

#[test]
fn test_panic_does_not_unwind_into_native() {
    let sig = int_to_int();
    let callback = make_callback(&sig, &Proc::new(|_| panic!("boom"))).unwrap();
    assert_eq!(call_int(&callback, 1), 0);
}

#[test]
fn test_parked_error_raised_by_scope() {
    let sig = int_to_int();
    let failing = Proc::new(|_| Err(crate::error::FfiError::argument("first")));
    let callback = make_callback(&sig, &failing).unwrap();

    let scope = dispatch::CallScope::enter();
    call_int(&callback, 1);
    call_int(&callback, 2);
    let err = scope.finish().unwrap();
    assert_eq!(err.kind(), ErrorKind::Argument);
    assert!(err.to_string().contains("first"));

    let scope = dispatch::CallScope::enter();
    assert!(scope.finish().is_none());
}

#[test]
fn test_float_and_pointer_returns() {
    let halve = Signature::new(NativeType::Float64, [NativeType::Float64], SignatureOptions::default())
        .unwrap();
    let half = Proc::new(|args| Ok(Value::Float(args[0].as_float().unwrap_or(0.0) / 2.0)));
    let callback = make_callback(&halve, &half).unwrap();
    let f: extern "C" fn(f64) -> f64 = unsafe { std::mem::transmute(callback.address()) };
    assert_eq!(f(5.0), 2.5);

    let echo = Signature::new(NativeType::Pointer, [NativeType::Pointer], SignatureOptions::default())
        .unwrap();
    let callback = make_callback(&echo, &Proc::new(|args| Ok(args[0].clone()))).unwrap();
    let f: extern "C" fn(usize) -> usize = unsafe { std::mem::transmute(callback.address()) };
    assert_eq!(f(0xdead0), 0xdead0);
}

#[test]
fn test_put_callback() {
    let cell = MemoryPointer::new(std::mem::size_of::<usize>(), 1, true).unwrap();
    let triple = Proc::new(|args| Ok(Value::Int(args[0].expect_int()? * 3)));
    let callback = cell.put_callback(0, &triple, &int_to_int()).unwrap();
    assert_eq!(cell.read_address(0).unwrap(), callback.address());
    assert_eq!(callback.to_memory().address(), callback.address());
    assert_eq!(call_int(&callback, 4), 12);
}

#[test]
fn test_struct_argument_and_return() {
    let layout = point_layout();
    let point = Type::struct_by_value(Arc::clone(&layout));
    let sig = Signature::new(point.clone(), [point], SignatureOptions::default()).unwrap();

    let swap = {
        let layout = Arc::clone(&layout);
        Proc::new(move |args| {
            let p = args[0].as_struct().unwrap();
            let out = Struct::new(Arc::clone(&layout))?;
            out.put("x", p.get("y")?)?;
            out.put("y", p.get("x")?)?;
            Ok(out.into())
        })
    };
    let callback = make_callback(&sig, &swap).unwrap();
    let f: extern "C" fn(Point) -> Point = unsafe { std::mem::transmute(callback.address()) };
    assert_eq!(map_point(f, Point { x: 3, y: -8 }), Point { x: -8, y: 3 });

    // A struct of another size comes back zeroed
    let short = Proc::new(|_| {
        let layout = StructLayoutBuilder::new().add("v", NativeType::Int32).build()?;
        Ok(Struct::new(layout)?.into())
    });
    let callback = make_callback(&sig, &short).unwrap();
    let f: extern "C" fn(Point) -> Point = unsafe { std::mem::transmute(callback.address()) };
    assert_eq!(map_point(f, Point { x: 1, y: 2 }), Point { x: 0, y: 0 });
}

#[test]
fn test_enum_and_bool_returns() {
    let colors = Arc::new(Enum::new(Some("color"), [("red", 1), ("green", 2)]).unwrap());
    let sig = Signature::new(
        Type::enumeration(colors),
        [NativeType::Int32],
        SignatureOptions::default(),
    )
    .unwrap();
    let pick = Proc::new(|args| {
        Ok(match args[0].expect_int()? {
            0 => Value::sym("red"),
            1 => Value::sym("green"),
            _ => Value::sym("blue"),
        })
    });
    let callback = make_callback(&sig, &pick).unwrap();
    assert_eq!(call_int(&callback, 0), 1);
    assert_eq!(call_int(&callback, 1), 2);
    // Unknown symbol
    assert_eq!(call_int(&callback, 2), 0);

    let sig = Signature::new(NativeType::Bool, [NativeType::Int32], SignatureOptions::default())
        .unwrap();
    let positive = Proc::new(|args| Ok(Value::Bool(args[0].expect_int()? > 0)));
    let callback = make_callback(&sig, &positive).unwrap();
    let f: extern "C" fn(i32) -> bool = unsafe { std::mem::transmute(callback.address()) };
    assert!(f(4));
    assert!(!f(-4));
}

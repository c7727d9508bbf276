use proptest::prelude::*;
use typthon_ffi::{ErrorKind, MemoryPointer, NativeType, Value};

fn buffer(size: usize) -> MemoryPointer {
    MemoryPointer::new(1, size, true).unwrap()
}

proptest! {
    #[test]
    fn test_int8_round_trip(v in any::<i8>()) {
        let buf = buffer(1);
        buf.write_int8(0, v).unwrap();
        prop_assert_eq!(buf.read_int8(0).unwrap(), v);
    }

    #[test]
    fn test_uint16_round_trip(v in any::<u16>(), slot in 0usize..4) {
        let buf = buffer(8);
        buf.write_uint16(slot * 2, v).unwrap();
        prop_assert_eq!(buf.read_uint16(slot * 2).unwrap(), v);
    }

    #[test]
    fn test_int32_round_trip(v in any::<i32>()) {
        let buf = buffer(4);
        buf.write_int32(0, v).unwrap();
        prop_assert_eq!(buf.read_int32(0).unwrap(), v);
    }

    #[test]
    fn test_uint64_round_trip(v in any::<u64>()) {
        let buf = buffer(8);
        buf.write_uint64(0, v).unwrap();
        prop_assert_eq!(buf.read_uint64(0).unwrap(), v);
    }

    #[test]
    fn test_float64_round_trip(v in any::<f64>().prop_filter("nan", |v| !v.is_nan())) {
        let buf = buffer(8);
        buf.write_float64(0, v).unwrap();
        prop_assert_eq!(buf.read_float64(0).unwrap(), v);
    }

    #[test]
    fn test_dynamic_put_get(v in any::<u32>()) {
        let buf = buffer(4);
        buf.put(NativeType::UInt32, 0, &Value::from(v)).unwrap();
        prop_assert_eq!(buf.get(NativeType::UInt32, 0).unwrap(), Value::from(v));
    }

    #[test]
    fn test_out_of_bounds_leaves_contents(offset in 0usize..16, len in 1usize..16, fill in any::<u8>()) {
        let buf = buffer(8);
        buf.write_bytes(0, &[fill; 8]).unwrap();
        if offset + len > 8 {
            let err = buf.write_bytes(offset, &vec![!fill; len]).unwrap_err();
            prop_assert_eq!(err.kind(), ErrorKind::Bounds);
            prop_assert!(buf.read_bytes(offset, len).is_err());
        }
        prop_assert_eq!(buf.read_bytes(0, 8).unwrap(), vec![fill; 8]);
    }

    #[test]
    fn test_cstring_round_trip(s in "[a-zA-Z0-9 ]{0,30}") {
        let buf = buffer(32);
        buf.write_string(0, &s).unwrap();
        prop_assert_eq!(buf.read_string(0, None).unwrap(), s.clone());
        prop_assert_eq!(buf.read_uint8(s.len()).unwrap(), 0);
    }
}

#[test]
fn test_hi_terminated() {
    let buf = buffer(4);
    buf.write_uint8(2, 0xff).unwrap();
    buf.write_string(0, "hi").unwrap();
    assert_eq!(buf.read_string(0, None).unwrap(), "hi");
    assert_eq!(buf.read_uint8(2).unwrap(), 0);
}

#[test]
fn test_uint32_boundary() {
    let buf = buffer(4);
    buf.put(NativeType::UInt32, 0, &Value::Int(0xFFFF_FFFF)).unwrap();
    assert_eq!(buf.read_uint32(0).unwrap(), u32::MAX);

    let err = buf.put(NativeType::UInt32, 0, &Value::Int(-1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Range);
    assert_eq!(buf.read_uint32(0).unwrap(), u32::MAX);
}

#[test]
fn test_double_free_and_use_after_free() {
    let buf = buffer(8);
    buf.free();
    buf.free();
    assert!(!buf.is_allocated());

    let err = buf.read_int32(0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
    let err = buf.write_int32(0, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Runtime);
}

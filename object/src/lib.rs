mod value;
mod header;
mod heap;
mod objects;
mod symbol;

pub use value::{FIXNUM_MAX, FIXNUM_MIN, Value, ValueKind};
pub use header::{Header, ObjectType};
pub use heap::Heap;
pub use objects::{Body, DataFields, DataFunction, HeapObject};
pub use symbol::{Symbol, Symbols};

#[cfg(test)]
mod tests {
    use super::*;

    // ── Value tagging ──────────────────────────────────────────────

    #[test]
    fn fixnum_round_trip() {
        for &n in &[0i64, 1, -1, 42, -42, FIXNUM_MAX, FIXNUM_MIN] {
            let v = Value::from_i64(n);
            assert!(v.is_fixnum());
            assert!(!v.is_ref());
            assert_eq!(v.as_i64(), Some(n));
            assert_eq!(v.kind(), Some(ValueKind::Fixnum(n)));
        }
    }

    #[test]
    fn fixnum_zero_is_zero_bits() {
        assert_eq!(Value::from_i64(0).raw(), 0);
    }

    #[test]
    fn ref_tagging() {
        let dummy: u64 = 0;
        let ptr = &dummy as *const u64;
        let v = Value::from_ptr(ptr);
        assert!(v.is_ref());
        assert!(!v.is_fixnum());
        assert_eq!(v.ref_bits(), ptr as u64);
        assert_eq!(v.kind(), Some(ValueKind::Reference));
    }

    #[test]
    fn immediates_are_distinct() {
        let all = [
            Value::nil(),
            Value::true_value(),
            Value::false_value(),
            Value::undef(),
            Value::from_symbol(Symbol::from_id(0)),
        ];
        for (i, a) in all.iter().enumerate() {
            assert!(!a.is_fixnum() && !a.is_ref());
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(Value::nil().kind(), Some(ValueKind::Nil));
        assert_eq!(Value::from_bool(true).kind(), Some(ValueKind::True));
        assert_eq!(Value::from_bool(false).kind(), Some(ValueKind::False));
        assert_eq!(Value::undef().kind(), Some(ValueKind::Undef));
    }

    #[test]
    fn symbol_round_trip() {
        let s = Symbol::from_id(12345);
        let v = Value::from(s);
        assert!(v.is_symbol());
        assert_eq!(v.as_symbol(), Some(s));
    }

    #[test]
    fn malformed_immediate_has_no_kind() {
        // special subtag with an out-of-range payload
        assert_eq!(Value::from_raw((9 << 4) | 0b0111).kind(), None);
        // unused subtags
        assert_eq!(Value::from_raw(0b1011).kind(), None);
        assert_eq!(Value::from_raw(0b1111).kind(), None);
    }

    // ── Header ─────────────────────────────────────────────────────

    #[test]
    fn header_object_type() {
        for ty in [
            ObjectType::Plain,
            ObjectType::Array,
            ObjectType::Str,
            ObjectType::Data,
        ] {
            assert_eq!(Header::new(ty).object_type(), ty);
        }
    }

    #[test]
    fn header_handle_slot_installs_once() {
        let h = Header::new(ObjectType::Array);
        assert_eq!(h.handle_slot(), 0);
        assert_eq!(h.install_handle(0x1000), Ok(()));
        assert_eq!(h.install_handle(0x2000), Err(0x1000));
        assert_eq!(h.clear_handle(), 0x1000);
        assert_eq!(h.handle_slot(), 0);
    }

    // ── Heap ───────────────────────────────────────────────────────

    #[test]
    fn heap_allocates_aligned_refs() {
        let heap = Heap::new();
        let a = heap.allocate_array(&[Value::from_i64(1)]);
        let s = heap.allocate_string(b"hi");
        assert!(a.is_ref() && s.is_ref());
        assert_eq!(a.ref_bits() % 8, 0);
        assert_eq!(heap.len(), 2);

        let obj = unsafe { heap.get(a) }.unwrap();
        assert_eq!(obj.object_type(), ObjectType::Array);
        assert_eq!(*obj.as_array().unwrap().read(), vec![Value::from_i64(1)]);
        assert!(obj.as_str().is_none());
    }

    #[test]
    fn heap_reclaim_runs_callback_once() {
        let heap = Heap::new();
        let v = heap.allocate_plain(Symbol::from_id(1));
        let obj = unsafe { heap.get(v) }.unwrap();
        obj.header.install_handle(0x40).unwrap();

        let mut seen = 0;
        assert!(heap.reclaim(v, |o| seen = o.header.handle_slot()));
        assert_eq!(seen, 0x40);
        assert!(!heap.is_live(v));
        assert!(!heap.reclaim(v, |_| panic!("reclaimed twice")));
    }

    #[test]
    fn data_free_runs_on_reclaim() {
        use std::ffi::c_void;
        use std::sync::atomic::{AtomicUsize, Ordering};

        static FREED: AtomicUsize = AtomicUsize::new(0);
        unsafe extern "C" fn free(data: *mut c_void) {
            FREED.store(data as usize, Ordering::SeqCst);
        }

        let heap = Heap::new();
        let v = heap.allocate_data(DataFields {
            data: 0xbeef as *mut c_void,
            mark: None,
            free: Some(free),
        });
        assert!(heap.reclaim(v, |_| {}));
        assert_eq!(FREED.load(Ordering::SeqCst), 0xbeef);
    }

    #[test]
    fn plain_ivars() {
        let heap = Heap::new();
        let class = Symbol::from_id(3);
        let v = heap.allocate_plain(class);
        let obj = unsafe { heap.get(v) }.unwrap();
        let name = Symbol::from_id(4);
        assert_eq!(obj.class(), Some(class));
        assert_eq!(obj.ivar(name), None);
        assert!(obj.set_ivar(name, Value::from_i64(7)));
        assert!(obj.set_ivar(name, Value::from_i64(8)));
        assert_eq!(obj.ivar(name), Some(Value::from_i64(8)));
    }

    // ── Symbols ────────────────────────────────────────────────────

    #[test]
    fn symbols_intern_is_stable() {
        let symbols = Symbols::new();
        let a = symbols.intern("each");
        let b = symbols.intern("map");
        assert_ne!(a, b);
        assert_eq!(symbols.intern("each"), a);
        assert_eq!(symbols.lookup("map"), Some(b));
        assert_eq!(symbols.lookup("nope"), None);
        assert_eq!(symbols.name(a).as_deref(), Some("each"));
        assert_eq!(symbols.len(), 2);
    }
}

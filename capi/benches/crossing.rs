//! Run with:
//!   cargo bench --bench crossing

use std::ffi::c_void;

use capi::{
    Arguments, BridgeCreateInfo, Environment, ForeignValue, NativeFunction, NativeMethod, VM,
    exports,
};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use object::Value;

unsafe extern "C-unwind" fn identity(_receiver: ForeignValue, value: ForeignValue) -> ForeignValue {
    value
}

unsafe extern "C-unwind" fn array_len(_receiver: ForeignValue, array: ForeignValue) -> ForeignValue {
    let raw = exports::capi_array_struct(array);
    ForeignValue::from_fixnum(unsafe { (*raw).len } as i64)
}

fn fixed1(name: &str, f: unsafe extern "C-unwind" fn(ForeignValue, ForeignValue) -> ForeignValue) -> NativeMethod {
    // SAFETY: `f` has the arity 1 signature
    let function = unsafe { NativeFunction::from_raw(f as *const c_void, 1) }
        .expect("arity 1 is a valid convention");
    NativeMethod::new(name, "crossing.rs", function)
}

/// Benchmark 1: crossing with an immediate argument.
/// Tests frame setup, exception point and teardown without handles.
fn bench_immediate_crossing(c: &mut Criterion) {
    let vm = VM::new(BridgeCreateInfo::default());
    let env = Environment::init_thread(&vm);
    let method = fixed1("identity", identity);
    let args = Arguments::new(Value::nil(), vec![Value::from_i64(7)], Value::nil());

    c.bench_function("crossing_immediate", |b| {
        b.iter(|| method.invoke(&env, None, black_box(&args)).expect("crossing failed"));
    });
}

/// Benchmark 2: crossing with a heap argument.
/// Tests handle minting, reference counting and release.
fn bench_handle_crossing(c: &mut Criterion) {
    let vm = VM::new(BridgeCreateInfo::default());
    let env = Environment::init_thread(&vm);
    let method = fixed1("identity", identity);
    let string = vm.shared().heap.allocate_string(b"payload");
    let args = Arguments::new(Value::nil(), vec![string], Value::nil());

    c.bench_function("crossing_handle", |b| {
        b.iter(|| method.invoke(&env, None, black_box(&args)).expect("crossing failed"));
    });
}

/// Benchmark 3: crossing that builds an array mirror.
fn bench_mirror_crossing(c: &mut Criterion) {
    let vm = VM::new(BridgeCreateInfo::default());
    let env = Environment::init_thread(&vm);
    let method = fixed1("array_len", array_len);
    let items: Vec<Value> = (0..64).map(Value::from_i64).collect();
    let array = vm.shared().heap.allocate_array(&items);
    let args = Arguments::new(Value::nil(), vec![array], Value::nil());

    c.bench_function("crossing_array_mirror_64", |b| {
        b.iter(|| method.invoke(&env, None, black_box(&args)).expect("crossing failed"));
    });
}

/// Benchmark 4: handle table lookups outside any crossing.
fn bench_handle_round_trip(c: &mut Criterion) {
    let vm = VM::new(BridgeCreateInfo::default());
    let shared = vm.shared();
    let array = shared.heap.allocate_array(&[]);

    c.bench_function("handle_round_trip", |b| {
        b.iter(|| {
            let handle = shared.handle_for(black_box(array)).expect("live object");
            shared.object_for(handle).expect("valid handle")
        });
    });
}

criterion_group!(
    benches,
    bench_immediate_crossing,
    bench_handle_crossing,
    bench_mirror_crossing,
    bench_handle_round_trip
);
criterion_main!(benches);

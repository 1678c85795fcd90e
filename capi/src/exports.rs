//! C-ABI entry points for extensions.
//!
//! Every function here must be called from a thread with an
//! [`Environment`]. Managed exceptions leave through
//! [`Environment::raise`], unwinding to the innermost exception point, so
//! the calling foreign code must tolerate unwinding (`-fexceptions`).

use std::ffi::{CStr, c_char, c_int, c_long, c_void};
use std::rc::Rc;

use object::{DataFields, DataFunction, Value};

use crate::arity::NativeFunction;
use crate::cache::{RArray, RData, RString};
use crate::env::Environment;
use crate::error::{Exception, FatalError};
use crate::native_method::NativeMethod;
use crate::value::ForeignValue;

fn current() -> Rc<Environment> {
    Environment::get().unwrap_or_else(|| FatalError::NoEnvironment.abort())
}

/// Run `f` against this thread's environment, raising its error.
fn with_env<R>(f: impl FnOnce(&Environment) -> Result<R, Exception>) -> R {
    let env = current();
    match f(&env) {
        Ok(value) => value,
        Err(exception) => env.raise(exception),
    }
}

/// # Safety
///
/// `ptr` must be null or a NUL-terminated string.
unsafe fn c_str(ptr: *const c_char) -> Result<String, Exception> {
    if ptr.is_null() {
        return Err(Exception::runtime("null string passed to the C API"));
    }
    // SAFETY: caller guarantees NUL termination
    Ok(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// Call `name` on `receiver` with `argc` arguments from `argv`.
///
/// # Safety
///
/// `name` must be NUL-terminated; `argv` must point to `argc` values.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn capi_funcall(
    receiver: ForeignValue,
    name: *const c_char,
    argc: c_int,
    argv: *const ForeignValue,
) -> ForeignValue {
    with_env(|env| {
        let name = unsafe { c_str(name)? };
        let receiver = env.get_object(receiver)?;
        let argv = match argc {
            n if n <= 0 || argv.is_null() => &[][..],
            // SAFETY: caller passes argc readable values
            n => unsafe { core::slice::from_raw_parts(argv, n as usize) },
        };
        let args = argv
            .iter()
            .map(|&v| env.get_object(v))
            .collect::<Result<Vec<_>, _>>()?;
        let name = env.vm().symbols.intern(&name);
        let result = env.send(receiver, name, &args, Value::nil())?;
        env.get_handle(result)
    })
}

/// Define `name` as a native method calling `function` with the convention
/// `arity` selects.
///
/// # Safety
///
/// `name` must be NUL-terminated; `function` must have the signature of
/// `arity`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn capi_define_method(
    name: *const c_char,
    function: *const c_void,
    arity: c_int,
) {
    with_env(|env| {
        let name = unsafe { c_str(name)? };
        let function = unsafe { NativeFunction::from_raw(function, arity)? };
        let file = env
            .current_call_frame()
            .and_then(|f| f.file().map(str::to_owned))
            .unwrap_or_else(|| "<native>".to_owned());
        let symbol = env.vm().symbols.intern(&name);
        env.vm()
            .methods
            .define_native(symbol, NativeMethod::new(name, file, function));
        Ok(())
    })
}

/// Raise a `RuntimeError` with `message`. Does not return.
///
/// # Safety
///
/// `message` must be NUL-terminated.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn capi_raise_runtime_error(message: *const c_char) -> ! {
    let env = current();
    let exception = match unsafe { c_str(message) } {
        Ok(message) => Exception::runtime(message),
        Err(e) => e,
    };
    env.raise(exception)
}

/// Raise an exception of class `class` with `message`. Does not return.
///
/// # Safety
///
/// Both strings must be NUL-terminated.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn capi_raise(class: *const c_char, message: *const c_char) -> ! {
    let env = current();
    let exception = unsafe { c_str(class) }.and_then(|class| {
        let message = unsafe { c_str(message)? };
        Ok(Exception::Raised {
            class,
            message,
            backtrace: env
                .current_call_frame()
                .map(|f| f.backtrace())
                .unwrap_or_default(),
        })
    });
    env.raise(exception.unwrap_or_else(|e| e))
}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn capi_block_given() -> c_int {
    (!current().block().is_nil()) as c_int
}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn capi_block() -> ForeignValue {
    with_env(|env| env.get_handle(env.block()))
}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn capi_array_struct(array: ForeignValue) -> *mut RArray {
    with_env(|env| env.array_mirror(array))
}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn capi_string_struct(string: ForeignValue) -> *mut RString {
    with_env(|env| env.string_mirror(string))
}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn capi_data_struct(data: ForeignValue) -> *mut RData {
    with_env(|env| env.data_mirror(data))
}

/// # Safety
///
/// `ptr` must point to `len` values, or be null with `len == 0`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn capi_array_new(len: c_long, ptr: *const ForeignValue) -> ForeignValue {
    with_env(|env| {
        let items = match len {
            n if n <= 0 || ptr.is_null() => &[][..],
            // SAFETY: caller passes len readable values
            n => unsafe { core::slice::from_raw_parts(ptr, n as usize) },
        };
        let items = items
            .iter()
            .map(|&v| env.get_object(v))
            .collect::<Result<Vec<_>, _>>()?;
        env.get_handle(env.vm().heap.allocate_array(&items))
    })
}

/// # Safety
///
/// `ptr` must point to `len` readable bytes, or be null with `len == 0`.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn capi_string_new(ptr: *const c_char, len: c_long) -> ForeignValue {
    with_env(|env| {
        let bytes = match len {
            n if n <= 0 || ptr.is_null() => &[][..],
            // SAFETY: caller passes len readable bytes
            n => unsafe { core::slice::from_raw_parts(ptr as *const u8, n as usize) },
        };
        env.get_handle(env.vm().heap.allocate_string(bytes))
    })
}

#[unsafe(no_mangle)]
pub extern "C-unwind" fn capi_data_new(
    data: *mut c_void,
    dmark: Option<DataFunction>,
    dfree: Option<DataFunction>,
) -> ForeignValue {
    with_env(|env| {
        let object = env.vm().heap.allocate_data(DataFields {
            data,
            mark: dmark,
            free: dfree,
        });
        env.get_handle(object)
    })
}

/// # Safety
///
/// `name` must be NUL-terminated.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn capi_intern(name: *const c_char) -> ForeignValue {
    with_env(|env| {
        let name = unsafe { c_str(name)? };
        Ok(ForeignValue::from_symbol(env.vm().symbols.intern(&name)))
    })
}

/// Every entry point above with its address. Referencing this table from a
/// binary keeps the symbols linked so loaded libraries can resolve them.
pub fn exported_symbols() -> [(&'static str, *const c_void); 13] {
    [
        ("capi_funcall", capi_funcall as *const c_void),
        ("capi_define_method", capi_define_method as *const c_void),
        ("capi_raise_runtime_error", capi_raise_runtime_error as *const c_void),
        ("capi_raise", capi_raise as *const c_void),
        ("capi_block_given", capi_block_given as *const c_void),
        ("capi_block", capi_block as *const c_void),
        ("capi_array_struct", capi_array_struct as *const c_void),
        ("capi_string_struct", capi_string_struct as *const c_void),
        ("capi_data_struct", capi_data_struct as *const c_void),
        ("capi_array_new", capi_array_new as *const c_void),
        ("capi_string_new", capi_string_new as *const c_void),
        ("capi_data_new", capi_data_new as *const c_void),
        ("capi_intern", capi_intern as *const c_void),
    ]
}

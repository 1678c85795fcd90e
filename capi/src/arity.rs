use std::ffi::{c_int, c_void};

use crate::error::Exception;
use crate::value::ForeignValue;

/// `VALUE f(VALUE args)`
pub const ARGS_AS_ARRAY: i32 = -3;
/// `VALUE f(VALUE receiver, VALUE args)`
pub const RECEIVER_PLUS_ARGS_ARRAY: i32 = -2;
/// `VALUE f(int argc, VALUE* argv, VALUE receiver)`
pub const ARGC_ARGV_RECEIVER: i32 = -1;
/// `void f(void)`, extension entry points only.
pub const INIT_FUNCTION: i32 = -99;

pub const MAX_FIXED_ARITY: i32 = 5;

type V = ForeignValue;

pub type ArgsAsArrayFn = unsafe extern "C-unwind" fn(V) -> V;
pub type ReceiverPlusArgsArrayFn = unsafe extern "C-unwind" fn(V, V) -> V;
pub type ArgcArgvFn = unsafe extern "C-unwind" fn(c_int, *const V, V) -> V;
pub type Fixed0Fn = unsafe extern "C-unwind" fn(V) -> V;
pub type Fixed1Fn = unsafe extern "C-unwind" fn(V, V) -> V;
pub type Fixed2Fn = unsafe extern "C-unwind" fn(V, V, V) -> V;
pub type Fixed3Fn = unsafe extern "C-unwind" fn(V, V, V, V) -> V;
pub type Fixed4Fn = unsafe extern "C-unwind" fn(V, V, V, V, V) -> V;
pub type Fixed5Fn = unsafe extern "C-unwind" fn(V, V, V, V, V, V) -> V;
pub type InitFn = unsafe extern "C-unwind" fn();

/// A foreign entry point together with the calling convention its arity
/// code selects.
#[derive(Debug, Clone, Copy)]
pub enum NativeFunction {
    ArgsAsArray(ArgsAsArrayFn),
    ReceiverPlusArgsArray(ReceiverPlusArgsArrayFn),
    ArgcArgv(ArgcArgvFn),
    Fixed0(Fixed0Fn),
    Fixed1(Fixed1Fn),
    Fixed2(Fixed2Fn),
    Fixed3(Fixed3Fn),
    Fixed4(Fixed4Fn),
    Fixed5(Fixed5Fn),
    Init(InitFn),
}

impl NativeFunction {
    /// Reinterpret a resolved symbol according to `arity`.
    ///
    /// # Safety
    ///
    /// `ptr` must be a function with the signature `arity` selects.
    pub unsafe fn from_raw(ptr: *const c_void, arity: i32) -> Result<Self, Exception> {
        use core::mem::transmute;

        if ptr.is_null() {
            return Err(Exception::runtime("native function pointer is null"));
        }
        // SAFETY: signature guaranteed by the caller
        let function = unsafe {
            match arity {
                ARGS_AS_ARRAY => Self::ArgsAsArray(transmute::<*const c_void, ArgsAsArrayFn>(ptr)),
                RECEIVER_PLUS_ARGS_ARRAY => Self::ReceiverPlusArgsArray(transmute::<
                    *const c_void,
                    ReceiverPlusArgsArrayFn,
                >(ptr)),
                ARGC_ARGV_RECEIVER => Self::ArgcArgv(transmute::<*const c_void, ArgcArgvFn>(ptr)),
                0 => Self::Fixed0(transmute::<*const c_void, Fixed0Fn>(ptr)),
                1 => Self::Fixed1(transmute::<*const c_void, Fixed1Fn>(ptr)),
                2 => Self::Fixed2(transmute::<*const c_void, Fixed2Fn>(ptr)),
                3 => Self::Fixed3(transmute::<*const c_void, Fixed3Fn>(ptr)),
                4 => Self::Fixed4(transmute::<*const c_void, Fixed4Fn>(ptr)),
                5 => Self::Fixed5(transmute::<*const c_void, Fixed5Fn>(ptr)),
                INIT_FUNCTION => Self::Init(transmute::<*const c_void, InitFn>(ptr)),
                other => {
                    return Err(Exception::runtime(format!(
                        "unrecognized arity {other} for native method"
                    )));
                }
            }
        };
        Ok(function)
    }

    pub fn arity(&self) -> i32 {
        match self {
            Self::ArgsAsArray(_) => ARGS_AS_ARRAY,
            Self::ReceiverPlusArgsArray(_) => RECEIVER_PLUS_ARGS_ARRAY,
            Self::ArgcArgv(_) => ARGC_ARGV_RECEIVER,
            Self::Fixed0(_) => 0,
            Self::Fixed1(_) => 1,
            Self::Fixed2(_) => 2,
            Self::Fixed3(_) => 3,
            Self::Fixed4(_) => 4,
            Self::Fixed5(_) => 5,
            Self::Init(_) => INIT_FUNCTION,
        }
    }

    /// Exact argument count for positional conventions.
    pub fn fixed_arity(&self) -> Option<usize> {
        let arity = self.arity();
        (0..=MAX_FIXED_ARITY)
            .contains(&arity)
            .then_some(arity as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C-unwind" fn two(_: V, a: V, _: V) -> V {
        a
    }

    #[test]
    fn arity_selects_shape() {
        let ptr = two as Fixed2Fn as *const c_void;
        let f = unsafe { NativeFunction::from_raw(ptr, 2) }.unwrap();
        assert!(matches!(f, NativeFunction::Fixed2(_)));
        assert_eq!(f.arity(), 2);
        assert_eq!(f.fixed_arity(), Some(2));

        for (code, fixed) in [
            (ARGS_AS_ARRAY, None),
            (RECEIVER_PLUS_ARGS_ARRAY, None),
            (ARGC_ARGV_RECEIVER, None),
            (INIT_FUNCTION, None),
            (0, Some(0)),
            (5, Some(5)),
        ] {
            let f = unsafe { NativeFunction::from_raw(ptr, code) }.unwrap();
            assert_eq!(f.arity(), code);
            assert_eq!(f.fixed_arity(), fixed);
        }
    }

    #[test]
    fn unrecognized_arity_rejected_at_registration() {
        let ptr = two as Fixed2Fn as *const c_void;
        for code in [-4, 6, 100, -98] {
            assert!(matches!(
                unsafe { NativeFunction::from_raw(ptr, code) },
                Err(Exception::Runtime { message }) if message.contains("unrecognized arity")
            ));
        }
    }

    #[test]
    fn null_pointer_rejected() {
        assert!(unsafe { NativeFunction::from_raw(core::ptr::null(), 0) }.is_err());
    }
}

//! Bridge between managed objects and native extensions.
//!
//! Extensions see managed objects only through [`ForeignValue`] words:
//! immediates are re-encoded, heap objects become handles owned by a
//! [`HandleTable`]. Each call into native code runs inside a
//! [`NativeFrame`] that keeps its handles alive and owns the
//! native-shaped mirrors extensions read and write.

mod arity;
pub mod cache;
mod dispatch;
mod env;
mod error;
mod exception_point;
pub mod exports;
mod frame;
mod handle;
mod library;
mod native_method;
mod profiler;
mod value;
mod vm;

pub use arity::{
    ARGC_ARGV_RECEIVER, ARGS_AS_ARRAY, INIT_FUNCTION, MAX_FIXED_ARITY, NativeFunction,
    RECEIVER_PLUS_ARGS_ARRAY,
};
pub use cache::{RArray, RData, RString};
pub use dispatch::{Arguments, CallFrame, Executable, ManagedFn, MethodTable, send};
pub use env::{Crossing, Environment, SavedState};
pub use error::{Exception, FatalError};
pub use exception_point::ExceptionPoint;
pub use frame::NativeFrame;
pub use handle::{Handle, HandleTable};
pub use library::NativeLibraries;
pub use native_method::{NativeMethod, default_init_name, load_extension};
pub use profiler::{CallCounter, MethodEntry, Profiler};
pub use value::{ForeignKind, ForeignValue, UnknownHandleType};
pub use vm::{BridgeCreateInfo, BridgeSettings, VM, VMShared};

use std::ffi::c_int;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use log::debug;
use object::Value;

use crate::arity::NativeFunction;
use crate::dispatch::{Arguments, CallFrame};
use crate::env::Environment;
use crate::error::Exception;
use crate::exception_point::ExceptionPoint;
use crate::library::NativeLibraries;
use crate::value::ForeignValue;

/// A foreign function exposed as a managed method.
#[derive(Debug, Clone)]
pub struct NativeMethod {
    name: Arc<str>,
    file: Arc<str>,
    function: NativeFunction,
}

impl NativeMethod {
    pub fn new(name: impl Into<Arc<str>>, file: impl Into<Arc<str>>, function: NativeFunction) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
            function,
        }
    }

    /// Resolve `name` in the library at `path` as an extension init function.
    pub fn load_extension_entry_point(
        libraries: &NativeLibraries,
        path: &Path,
        name: &str,
    ) -> Result<Self, Exception> {
        let ptr = libraries.resolve_entry_point(path, name)?;
        // SAFETY: init functions take and return nothing
        let function = unsafe { NativeFunction::from_raw(ptr, crate::arity::INIT_FUNCTION)? };
        Ok(Self::new(name, path.display().to_string(), function))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn arity(&self) -> i32 {
        self.function.arity()
    }

    /// Run one crossing: check arity, convert, call under an exception
    /// point, convert back, release everything the crossing minted.
    pub fn invoke(
        &self,
        env: &Environment,
        caller: Option<&Rc<CallFrame>>,
        args: &Arguments,
    ) -> Result<Value, Exception> {
        let call_frame = CallFrame::push(caller, self.name.clone(), Some(self.file.clone()));

        match self.function.fixed_arity() {
            Some(expected) if expected != args.len() => {
                return Err(Exception::Argument {
                    method: self.name.to_string(),
                    expected,
                    given: args.len(),
                    backtrace: call_frame.backtrace(),
                });
            }
            _ => {}
        }

        // the enclosing crossing's mirrors must be current before we run
        env.flush_cached_data()?;

        let crossing = env.enter(call_frame, args.block);
        let mut point = ExceptionPoint::place(env);
        let result = point.run(|| self.call(env, args));
        if point.jumped_to() {
            debug!("{} left by exception transfer", self.name);
        }
        let flushed = env.flush_cached_data();
        point.pop();
        drop(crossing);

        let updated = env.update_cached_data();
        let value = result?;
        flushed?;
        updated?;
        Ok(value)
    }

    fn call(&self, env: &Environment, args: &Arguments) -> Result<Value, Exception> {
        let vm = env.vm();
        let receiver = env.get_handle(args.receiver)?;
        let positional = |i: usize| env.get_handle(args.args[i]);

        let ret = match self.function {
            NativeFunction::ArgsAsArray(f) => {
                let array = env.get_handle(args.as_array(&vm.heap))?;
                let _entry = vm.profile(&self.name);
                unsafe { f(array) }
            }
            NativeFunction::ReceiverPlusArgsArray(f) => {
                let array = env.get_handle(args.as_array(&vm.heap))?;
                let _entry = vm.profile(&self.name);
                unsafe { f(receiver, array) }
            }
            NativeFunction::ArgcArgv(f) => {
                let argv = args
                    .args
                    .iter()
                    .map(|&v| env.get_handle(v))
                    .collect::<Result<Vec<ForeignValue>, _>>()?;
                let ret = {
                    let _entry = vm.profile(&self.name);
                    unsafe { f(argv.len() as c_int, argv.as_ptr(), receiver) }
                };
                drop(argv);
                ret
            }
            NativeFunction::Fixed0(f) => {
                let _entry = vm.profile(&self.name);
                unsafe { f(receiver) }
            }
            NativeFunction::Fixed1(f) => {
                let a1 = positional(0)?;
                let _entry = vm.profile(&self.name);
                unsafe { f(receiver, a1) }
            }
            NativeFunction::Fixed2(f) => {
                let (a1, a2) = (positional(0)?, positional(1)?);
                let _entry = vm.profile(&self.name);
                unsafe { f(receiver, a1, a2) }
            }
            NativeFunction::Fixed3(f) => {
                let (a1, a2, a3) = (positional(0)?, positional(1)?, positional(2)?);
                let _entry = vm.profile(&self.name);
                unsafe { f(receiver, a1, a2, a3) }
            }
            NativeFunction::Fixed4(f) => {
                let (a1, a2, a3, a4) = (
                    positional(0)?,
                    positional(1)?,
                    positional(2)?,
                    positional(3)?,
                );
                let _entry = vm.profile(&self.name);
                unsafe { f(receiver, a1, a2, a3, a4) }
            }
            NativeFunction::Fixed5(f) => {
                let (a1, a2, a3, a4, a5) = (
                    positional(0)?,
                    positional(1)?,
                    positional(2)?,
                    positional(3)?,
                    positional(4)?,
                );
                let _entry = vm.profile(&self.name);
                unsafe { f(receiver, a1, a2, a3, a4, a5) }
            }
            NativeFunction::Init(f) => {
                {
                    let _entry = vm.profile(&self.name);
                    unsafe { f() };
                }
                return Ok(Value::nil());
            }
        };
        env.get_object(ret)
    }
}

/// `Init_<name>` for a library file `[lib]<name>.<ext...>`.
pub fn default_init_name(path: &Path) -> Result<String, Exception> {
    let stem = path
        .file_name()
        .and_then(|s| s.to_str())
        .and_then(|s| s.split('.').next())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Exception::load(format!("no file stem in {}", path.display())))?;
    let stem = match stem.strip_prefix("lib") {
        Some(rest) if !rest.is_empty() => rest,
        _ => stem,
    };
    Ok(format!("Init_{stem}"))
}

/// Load the library at `path` and run its init function, `Init_<stem>`
/// unless `name` says otherwise.
pub fn load_extension(env: &Environment, path: &Path, name: Option<&str>) -> Result<(), Exception> {
    let name = match name {
        Some(name) => name.to_owned(),
        None => default_init_name(path)?,
    };
    let method = NativeMethod::load_extension_entry_point(&env.vm().libraries, path, &name)?;
    debug!("running {} from {}", method.name(), method.file());
    let root = env.current_call_frame();
    let args = Arguments::new(Value::nil(), Vec::new(), Value::nil());
    method.invoke(env, root.as_ref(), &args).map(|_| ())
}

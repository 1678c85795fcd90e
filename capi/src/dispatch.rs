use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use object::{Heap, Symbol, Value};
use parking_lot::RwLock;

use crate::env::Environment;
use crate::error::Exception;
use crate::native_method::NativeMethod;

/// One activation in the managed call chain.
#[derive(Debug)]
pub struct CallFrame {
    name: Arc<str>,
    file: Option<Arc<str>>,
    parent: Option<Rc<CallFrame>>,
}

impl CallFrame {
    pub fn root(name: impl Into<Arc<str>>) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            file: None,
            parent: None,
        })
    }

    pub fn push(parent: Option<&Rc<CallFrame>>, name: Arc<str>, file: Option<Arc<str>>) -> Rc<Self> {
        Rc::new(Self {
            name,
            file,
            parent: parent.cloned(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    pub fn parent(&self) -> Option<&Rc<CallFrame>> {
        self.parent.as_ref()
    }

    /// Innermost first.
    pub fn backtrace(&self) -> Vec<String> {
        let mut lines = Vec::new();
        let mut frame = Some(self);
        while let Some(f) = frame {
            lines.push(match &f.file {
                Some(file) => format!("{} at {}", f.name, file),
                None => f.name.to_string(),
            });
            frame = f.parent.as_deref();
        }
        lines
    }
}

/// Receiver, positional arguments and block of one call.
#[derive(Debug, Clone)]
pub struct Arguments {
    pub receiver: Value,
    pub args: Vec<Value>,
    pub block: Value,
}

impl Arguments {
    pub fn new(receiver: Value, args: Vec<Value>, block: Value) -> Self {
        Self {
            receiver,
            args,
            block,
        }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn as_array(&self, heap: &Heap) -> Value {
        heap.allocate_array(&self.args)
    }
}

pub type ManagedFn =
    dyn Fn(&Environment, &Rc<CallFrame>, &Arguments) -> Result<Value, Exception> + Send + Sync;

#[derive(Clone)]
pub enum Executable {
    Native(Arc<NativeMethod>),
    Managed(Arc<ManagedFn>),
}

/// Method names to executables. One flat namespace.
pub struct MethodTable {
    methods: RwLock<HashMap<Symbol, Executable, ahash::RandomState>>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self {
            methods: RwLock::new(HashMap::default()),
        }
    }

    pub fn define(&self, name: Symbol, executable: Executable) {
        self.methods.write().insert(name, executable);
    }

    pub fn define_native(&self, name: Symbol, method: NativeMethod) {
        self.define(name, Executable::Native(Arc::new(method)));
    }

    pub fn define_managed<F>(&self, name: Symbol, f: F)
    where
        F: Fn(&Environment, &Rc<CallFrame>, &Arguments) -> Result<Value, Exception>
            + Send
            + Sync
            + 'static,
    {
        self.define(name, Executable::Managed(Arc::new(f)));
    }

    pub fn lookup(&self, name: Symbol) -> Option<Executable> {
        self.methods.read().get(&name).cloned()
    }

    pub fn len(&self) -> usize {
        self.methods.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MethodTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Managed dispatch: look `name` up and run it.
pub fn send(
    env: &Environment,
    caller: Option<&Rc<CallFrame>>,
    name: Symbol,
    args: &Arguments,
) -> Result<Value, Exception> {
    let vm = env.vm();
    let Some(executable) = vm.methods.lookup(name) else {
        let name = vm
            .symbols
            .name(name)
            .map_or_else(|| format!("#{}", name.id()), |n| n.to_string());
        return Err(Exception::NoMethod { name });
    };
    match executable {
        Executable::Native(method) => method.invoke(env, caller, args),
        Executable::Managed(f) => {
            let label: Arc<str> = vm
                .symbols
                .name(name)
                .unwrap_or_else(|| Arc::from("<managed>"));
            let frame = CallFrame::push(caller, label, None);
            // native callees bracket themselves in `NativeMethod::invoke`
            env.flush_cached_data()?;
            let result = f(env, &frame, args);
            env.update_cached_data()?;
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{BridgeCreateInfo, VM};

    #[test]
    fn backtrace_is_innermost_first() {
        let root = CallFrame::root("main");
        let mid = CallFrame::push(Some(&root), "load".into(), Some("ext.so".into()));
        let top = CallFrame::push(Some(&mid), "call".into(), None);
        assert_eq!(top.backtrace(), vec!["call", "load at ext.so", "main"]);
        assert_eq!(top.parent().map(|p| p.name()), Some("load"));
    }

    #[test]
    fn send_runs_managed_method() {
        let vm = VM::new(BridgeCreateInfo::default());
        let env = Environment::init_thread(&vm);
        let shared = vm.shared();
        let add = shared.symbols.intern("add");
        shared.methods.define_managed(add, |_, frame, args| {
            assert_eq!(frame.name(), "add");
            let sum = args.args.iter().filter_map(|v| v.as_i64()).sum::<i64>();
            Ok(Value::from_i64(sum + args.receiver.as_i64().unwrap_or(0)))
        });

        let args = Arguments::new(
            Value::from_i64(1),
            vec![Value::from_i64(2), Value::from_i64(3)],
            Value::nil(),
        );
        assert_eq!(send(&env, None, add, &args), Ok(Value::from_i64(6)));
    }

    #[test]
    fn send_to_missing_method() {
        let vm = VM::new(BridgeCreateInfo::default());
        let env = Environment::init_thread(&vm);
        let missing = vm.shared().symbols.intern("missing");
        let args = Arguments::new(Value::nil(), Vec::new(), Value::nil());
        assert_eq!(
            send(&env, None, missing, &args),
            Err(Exception::NoMethod {
                name: "missing".into()
            })
        );
    }

    #[test]
    fn arguments_pack_into_array() {
        let heap = Heap::new();
        let args = Arguments::new(Value::nil(), vec![Value::from_i64(4)], Value::nil());
        let array = args.as_array(&heap);
        let obj = unsafe { heap.get(array) }.unwrap();
        assert_eq!(*obj.as_array().unwrap().read(), vec![Value::from_i64(4)]);
    }
}

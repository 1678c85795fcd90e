use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use object::{Heap, Symbols, Value};
use parking_lot::RwLock;

use crate::dispatch::MethodTable;
use crate::error::Exception;
use crate::handle::HandleTable;
use crate::library::NativeLibraries;
use crate::profiler::{MethodEntry, Profiler};
use crate::value::ForeignValue;

#[derive(Debug, Default, Clone)]
pub struct BridgeCreateInfo {
    pub handle_capacity: Option<usize>,
    // invalid handles left before a release triggers a sweep
    pub sweep_threshold: Option<usize>,
    pub profiling: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub handle_capacity: usize,
    pub sweep_threshold: usize,
    pub profiling: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            handle_capacity: 1024,
            sweep_threshold: 256,
            profiling: false,
        }
    }
}

/// State shared by every thread of one VM.
pub struct VMShared {
    pub settings: BridgeSettings,
    pub heap: Heap,
    pub symbols: Symbols,
    pub handles: HandleTable,
    pub methods: MethodTable,
    pub libraries: NativeLibraries,
    profiling: AtomicBool,
    profiler: RwLock<Option<Arc<dyn Profiler>>>,
}

pub struct VM {
    inner: Arc<VMShared>,
}

impl VM {
    pub fn new(info: BridgeCreateInfo) -> Self {
        let mut settings = BridgeSettings::default();
        info.handle_capacity
            .inspect(|&val| settings.handle_capacity = val);
        info.sweep_threshold
            .inspect(|&val| settings.sweep_threshold = val);
        info.profiling.inspect(|&val| settings.profiling = val);
        debug!("creating bridge with {settings:?}");

        let inner = VMShared {
            heap: Heap::new(),
            symbols: Symbols::new(),
            handles: HandleTable::new(settings.handle_capacity, settings.sweep_threshold),
            methods: MethodTable::new(),
            libraries: NativeLibraries::new(),
            profiling: AtomicBool::new(settings.profiling),
            profiler: RwLock::new(None),
            settings,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn shared(&self) -> &Arc<VMShared> {
        &self.inner
    }

    pub fn set_profiler(&self, profiler: Option<Arc<dyn Profiler>>) {
        *self.inner.profiler.write() = profiler;
    }

    pub fn set_profiling(&self, enabled: bool) {
        self.inner.profiling.store(enabled, Ordering::Relaxed);
    }

    /// Reclaim `value` as the collector would. Returns `false` if it was not
    /// a live heap object.
    pub fn collect(&self, value: Value) -> bool {
        self.inner.collect(value)
    }
}

impl VMShared {
    /// The foreign word for `value`, minting a handle for heap objects.
    /// Takes no reference; frames do that.
    pub fn handle_for(&self, value: Value) -> Result<ForeignValue, Exception> {
        if let Some(immediate) = ForeignValue::from_immediate(value) {
            return Ok(immediate);
        }
        // SAFETY: the object stays live while a frame references its handle;
        // minting itself does not outlive this call.
        let object = unsafe { self.heap.get(value) }
            .ok_or_else(|| Exception::runtime("handle requested for unknown object type"))?;
        Ok(self.handles.get_or_insert(object, value))
    }

    pub fn object_for(&self, value: ForeignValue) -> Result<Value, Exception> {
        self.handles.object_for(value)
    }

    pub fn collect(&self, value: Value) -> bool {
        self.heap.reclaim(value, |object| {
            let handle = object.header.clear_handle();
            if handle != 0 {
                self.handles.invalidate(handle);
            }
        })
    }

    pub fn is_profiling(&self) -> bool {
        self.profiling.load(Ordering::Relaxed)
    }

    /// Profiler scope for one foreign call, if profiling is on.
    pub fn profile<'a>(&self, name: &'a str) -> Option<MethodEntry<'a>> {
        if !self.is_profiling() {
            return None;
        }
        let profiler = self.profiler.read().clone()?;
        Some(MethodEntry::new(profiler, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_info_overrides_defaults() {
        let vm = VM::new(BridgeCreateInfo {
            sweep_threshold: Some(3),
            ..Default::default()
        });
        let settings = &vm.shared().settings;
        assert_eq!(settings.sweep_threshold, 3);
        assert_eq!(settings.handle_capacity, BridgeSettings::default().handle_capacity);
        assert!(!vm.shared().is_profiling());
    }

    #[test]
    fn collect_invalidates_unreferenced_handle() {
        let vm = VM::new(BridgeCreateInfo::default());
        let shared = vm.shared();
        let obj = shared.heap.allocate_array(&[]);
        let handle = shared.handle_for(obj).unwrap();
        assert_eq!(shared.object_for(handle), Ok(obj));

        assert!(vm.collect(obj));
        assert!(!vm.collect(obj));
        assert_eq!(shared.handles.len(), 0);
        assert_eq!(
            shared.handle_for(obj),
            Err(Exception::runtime("handle requested for unknown object type"))
        );
    }

    #[test]
    fn reclaimed_but_referenced_handle_survives_until_released() {
        let vm = VM::new(BridgeCreateInfo {
            sweep_threshold: Some(1),
            ..Default::default()
        });
        let shared = vm.shared();
        let obj = shared.heap.allocate_string(b"gone");
        let handle = shared.handle_for(obj).unwrap();
        shared.handles.reference(handle);

        assert!(vm.collect(obj));
        assert_eq!(shared.handles.is_valid(handle), Some(false));
        assert_eq!(shared.handles.pending(), 1);

        shared.handles.release(handle);
        assert_eq!(shared.handles.len(), 0);
        assert_eq!(shared.handles.pending(), 0);
    }
}

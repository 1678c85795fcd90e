use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use object::{HeapObject, Value};

use crate::cache::{ArrayMirror, Convert, DataMirror, RArray, RData, RString, StringMirror};
use crate::error::Exception;
use crate::value::ForeignValue;
use crate::vm::VMShared;

type HandleSet = HashSet<ForeignValue, ahash::RandomState>;
type Store<T> = Option<HashMap<ForeignValue, T, ahash::RandomState>>;

/// Scope of one native crossing.
///
/// Owns one reference on every handle it minted and the lazily created
/// mirror stores. Dropping the frame releases each handle exactly once and
/// discards the mirrors without flushing them.
pub struct NativeFrame {
    vm: Arc<VMShared>,
    handles: HandleSet,
    arrays: Store<ArrayMirror>,
    strings: Store<StringMirror>,
    data: Store<DataMirror>,
    updates: u64,
}

/// Split borrow of a frame used while its stores are being walked.
struct Minter<'a> {
    vm: &'a VMShared,
    handles: &'a mut HandleSet,
}

impl Minter<'_> {
    fn mint(&mut self, value: Value) -> Result<ForeignValue, Exception> {
        let handle = self.vm.handle_for(value)?;
        if handle.is_handle() && self.handles.insert(handle) {
            self.vm.handles.reference(handle);
        }
        Ok(handle)
    }
}

impl Convert for Minter<'_> {
    fn to_foreign(&mut self, value: Value) -> Result<ForeignValue, Exception> {
        self.mint(value)
    }

    fn to_managed(&self, value: ForeignValue) -> Result<Value, Exception> {
        self.vm.handles.object_for(value)
    }

    fn heap_object(&self, value: ForeignValue) -> Result<&HeapObject, Exception> {
        let object = self.to_managed(value)?;
        if !object.is_ref() {
            return Err(Exception::Type {
                expected: "heap object",
            });
        }
        // SAFETY: the handle is valid, so the collector has not reclaimed
        // the object.
        Ok(unsafe { object.as_ref::<HeapObject>() })
    }
}

impl NativeFrame {
    pub fn new(vm: Arc<VMShared>) -> Self {
        Self {
            vm,
            handles: HashSet::default(),
            arrays: None,
            strings: None,
            data: None,
            updates: 0,
        }
    }

    fn minter(&mut self) -> Minter<'_> {
        Minter {
            vm: &self.vm,
            handles: &mut self.handles,
        }
    }

    /// Convert a managed value, minting a handle for heap objects. The first
    /// mint of a handle in this frame takes a reference; later ones don't.
    pub fn get_handle(&mut self, value: Value) -> Result<ForeignValue, Exception> {
        self.minter().mint(value)
    }

    pub fn get_object(&self, value: ForeignValue) -> Result<Value, Exception> {
        self.vm.handles.object_for(value)
    }

    /// Distinct handles this frame holds a reference on.
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    pub fn owns(&self, handle: ForeignValue) -> bool {
        self.handles.contains(&handle)
    }

    pub fn array_mirror(&mut self, value: ForeignValue) -> Result<*mut RArray, Exception> {
        let mut cx = Minter {
            vm: &self.vm,
            handles: &mut self.handles,
        };
        let store = self.arrays.get_or_insert_with(HashMap::default);
        let mirror = match store.entry(value) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(ArrayMirror::new(value, &mut cx)?),
        };
        Ok(mirror.as_ptr())
    }

    pub fn string_mirror(&mut self, value: ForeignValue) -> Result<*mut RString, Exception> {
        let cx = Minter {
            vm: &self.vm,
            handles: &mut self.handles,
        };
        let store = self.strings.get_or_insert_with(HashMap::default);
        let mirror = match store.entry(value) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(StringMirror::new(value, &cx)?),
        };
        Ok(mirror.as_ptr())
    }

    pub fn data_mirror(&mut self, value: ForeignValue) -> Result<*mut RData, Exception> {
        let cx = Minter {
            vm: &self.vm,
            handles: &mut self.handles,
        };
        let store = self.data.get_or_insert_with(HashMap::default);
        let mirror = match store.entry(value) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(DataMirror::new(value, &cx)?),
        };
        Ok(mirror.as_ptr())
    }

    /// Push every mirror back into its managed object.
    pub fn flush(&mut self) -> Result<(), Exception> {
        let cx = Minter {
            vm: &self.vm,
            handles: &mut self.handles,
        };
        for mirror in self.arrays.iter().flat_map(HashMap::values) {
            mirror.flush(&cx)?;
        }
        for mirror in self.strings.iter().flat_map(HashMap::values) {
            mirror.flush(&cx)?;
        }
        for mirror in self.data.iter().flat_map(HashMap::values) {
            mirror.flush(&cx)?;
        }
        Ok(())
    }

    /// Refresh array and string mirrors from their managed objects.
    pub fn update(&mut self) -> Result<(), Exception> {
        if !self.has_mirrors() {
            return Ok(());
        }
        self.updates += 1;
        let mut cx = Minter {
            vm: &self.vm,
            handles: &mut self.handles,
        };
        for mirror in self.arrays.iter_mut().flat_map(HashMap::values_mut) {
            mirror.update(&mut cx)?;
        }
        for mirror in self.strings.iter_mut().flat_map(HashMap::values_mut) {
            mirror.update(&cx)?;
        }
        Ok(())
    }

    /// Number of updates that had mirrors to refresh.
    pub fn update_count(&self) -> u64 {
        self.updates
    }

    pub fn has_mirrors(&self) -> bool {
        [
            self.arrays.as_ref().map_or(0, HashMap::len),
            self.strings.as_ref().map_or(0, HashMap::len),
            self.data.as_ref().map_or(0, HashMap::len),
        ]
        .iter()
        .any(|&n| n > 0)
    }
}

impl Drop for NativeFrame {
    fn drop(&mut self) {
        for handle in self.handles.drain() {
            self.vm.handles.release(handle);
        }
    }
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use log::trace;
use object::{HeapObject, Value};
use parking_lot::RwLock;

use crate::error::{Exception, FatalError};
use crate::value::ForeignValue;

/// Foreign-side proxy for one managed heap object.
///
/// Its address is the [`ForeignValue`] handed to extensions, so it lives in
/// its own allocation and never moves while registered.
#[derive(Debug)]
#[repr(align(8))]
pub struct Handle {
    object: AtomicU64,
    references: AtomicUsize,
    valid: AtomicBool,
}

impl Handle {
    fn new(object: Value) -> Self {
        Self {
            object: AtomicU64::new(object.raw()),
            references: AtomicUsize::new(0),
            valid: AtomicBool::new(true),
        }
    }

    #[inline]
    pub fn as_foreign(&self) -> ForeignValue {
        ForeignValue::from_handle_address(self as *const Self as usize)
    }

    #[inline]
    pub fn object(&self) -> Value {
        Value::from_raw(self.object.load(Ordering::Acquire))
    }

    #[inline]
    pub fn references(&self) -> usize {
        self.references.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn is_garbage(&self) -> bool {
        !self.is_valid() && self.references() == 0
    }
}

/// Process-wide registry of [`Handle`]s, keyed by handle address.
///
/// Lookups go through the map rather than the raw address, so a stale or
/// forged word is detected instead of dereferenced.
pub struct HandleTable {
    entries: RwLock<HashMap<usize, Box<Handle>, ahash::RandomState>>,
    pending: AtomicUsize,
    sweep_threshold: usize,
}

impl HandleTable {
    pub fn new(capacity: usize, sweep_threshold: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::with_capacity_and_hasher(
                capacity,
                ahash::RandomState::new(),
            )),
            pending: AtomicUsize::new(0),
            sweep_threshold,
        }
    }

    /// The handle for `object`, minting one if absent. Takes no reference.
    pub fn get_or_insert(&self, object: &HeapObject, value: Value) -> ForeignValue {
        let slot = object.header.handle_slot();
        if slot != 0 {
            return ForeignValue::from_handle_address(slot);
        }

        let mut entries = self.entries.write();
        let slot = object.header.handle_slot();
        if slot != 0 {
            return ForeignValue::from_handle_address(slot);
        }
        let handle = Box::new(Handle::new(value));
        let foreign = handle.as_foreign();
        if let Err(existing) = object.header.install_handle(foreign.raw()) {
            return ForeignValue::from_handle_address(existing);
        }
        trace!("minted handle {foreign:?} for {value:?}");
        entries.insert(foreign.raw(), handle);
        foreign
    }

    /// Take one reference on behalf of a native frame.
    pub fn reference(&self, handle: ForeignValue) {
        if let Some(h) = self.entries.read().get(&handle.raw()) {
            h.references.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Drop one reference. An invalid handle reaching zero is left for
    /// [`HandleTable::sweep`].
    pub fn release(&self, handle: ForeignValue) {
        let garbage = {
            let entries = self.entries.read();
            let Some(h) = entries.get(&handle.raw()) else {
                return;
            };
            let previous = h.references.fetch_sub(1, Ordering::AcqRel);
            debug_assert!(previous > 0, "handle released more often than referenced");
            previous == 1 && !h.is_valid()
        };
        if garbage && self.pending() >= self.sweep_threshold {
            self.sweep();
        }
    }

    /// The collector reclaimed the object behind `handle`.
    pub fn invalidate(&self, handle: usize) {
        let mut entries = self.entries.write();
        let referenced = match entries.get(&handle) {
            Some(h) => {
                h.valid.store(false, Ordering::Release);
                h.references() > 0
            }
            None => return,
        };
        if !referenced {
            entries.remove(&handle);
            trace!("reclaimed handle 0x{handle:x}");
        } else {
            self.pending.fetch_add(1, Ordering::AcqRel);
            trace!("handle 0x{handle:x} invalidated while referenced");
        }
    }

    /// Reclaim every invalid, unreferenced entry. Returns how many went.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, h| !h.is_garbage());
        let swept = before - entries.len();
        self.pending.fetch_sub(swept, Ordering::AcqRel);
        if swept > 0 {
            trace!("swept {swept} handles");
        }
        swept
    }

    /// Dereference a handle word without aborting.
    pub fn try_object_for(&self, handle: usize) -> Result<Value, FatalError> {
        let entries = self.entries.read();
        let h = entries
            .get(&handle)
            .ok_or(FatalError::UnknownHandle(handle))?;
        if !h.is_valid() {
            return Err(FatalError::InvalidHandle(handle));
        }
        Ok(h.object())
    }

    /// Decode any foreign word into a managed value. Immediates need no
    /// table entry; a bad handle aborts the process.
    pub fn object_for(&self, value: ForeignValue) -> Result<Value, Exception> {
        if let Some(immediate) = value.decode()?.immediate() {
            return Ok(immediate);
        }
        match self.try_object_for(value.raw()) {
            Ok(object) => Ok(object),
            Err(fatal) => fatal.abort(),
        }
    }

    pub fn references(&self, handle: ForeignValue) -> Option<usize> {
        self.entries.read().get(&handle.raw()).map(|h| h.references())
    }

    pub fn is_valid(&self, handle: ForeignValue) -> Option<bool> {
        self.entries.read().get(&handle.raw()).map(|h| h.is_valid())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invalid entries still held by some frame.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ForeignKind;
    use object::Heap;
    use std::sync::Arc;

    fn alloc(heap: &Heap) -> (Value, &HeapObject) {
        let v = heap.allocate_array(&[]);
        (v, unsafe { heap.get(v) }.unwrap())
    }

    #[test]
    fn one_handle_per_object() {
        let heap = Heap::new();
        let table = HandleTable::new(16, 4);
        let (v, obj) = alloc(&heap);

        let a = table.get_or_insert(obj, v);
        let b = table.get_or_insert(obj, v);
        assert_eq!(a, b);
        assert_eq!(obj.header.handle_slot(), a.raw());
        assert_eq!(table.len(), 1);
        assert_eq!(table.try_object_for(a.raw()).unwrap(), v);
        assert_eq!(table.object_for(a).unwrap(), v);
    }

    #[test]
    fn handle_words_are_aligned() {
        let heap = Heap::new();
        let table = HandleTable::new(16, 4);
        for _ in 0..8 {
            let (v, obj) = alloc(&heap);
            let h = table.get_or_insert(obj, v);
            assert!(h.is_handle());
            assert_eq!(h.decode(), Ok(ForeignKind::Handle(h.raw())));
        }
    }

    #[test]
    fn immediates_bypass_table() {
        let table = HandleTable::new(0, 4);
        assert_eq!(
            table.object_for(ForeignValue::from_fixnum(-7)).unwrap(),
            Value::from_i64(-7)
        );
        assert_eq!(table.object_for(ForeignValue::NIL).unwrap(), Value::nil());
        assert!(table.is_empty());
    }

    #[test]
    fn unknown_word_is_runtime_error() {
        let table = HandleTable::new(0, 4);
        let err = table.object_for(ForeignValue::from_raw(0x04)).unwrap_err();
        assert!(matches!(err, Exception::Runtime { .. }));
    }

    #[test]
    fn unknown_and_invalid_handles_are_fatal() {
        let heap = Heap::new();
        let table = HandleTable::new(16, 4);
        assert!(matches!(
            table.try_object_for(0x1000),
            Err(FatalError::UnknownHandle(0x1000))
        ));

        let (v, obj) = alloc(&heap);
        let h = table.get_or_insert(obj, v);
        table.reference(h);
        table.invalidate(obj.header.clear_handle());
        assert!(matches!(
            table.try_object_for(h.raw()),
            Err(FatalError::InvalidHandle(_))
        ));
    }

    #[test]
    fn unreferenced_invalid_handle_goes_immediately() {
        let heap = Heap::new();
        let table = HandleTable::new(16, 4);
        let (v, obj) = alloc(&heap);
        let h = table.get_or_insert(obj, v);
        table.invalidate(h.raw());
        assert_eq!(table.len(), 0);
        assert_eq!(table.pending(), 0);
    }

    #[test]
    fn referenced_invalid_handle_waits_for_release_and_sweep() {
        let heap = Heap::new();
        let table = HandleTable::new(16, 100);
        let (v, obj) = alloc(&heap);
        let h = table.get_or_insert(obj, v);
        table.reference(h);
        table.invalidate(h.raw());
        assert_eq!(table.len(), 1);
        assert_eq!(table.pending(), 1);
        assert_eq!(table.sweep(), 0);

        table.release(h);
        assert_eq!(table.references(h), Some(0));
        assert_eq!(table.len(), 1);
        assert_eq!(table.sweep(), 1);
        assert_eq!(table.len(), 0);
        assert_eq!(table.pending(), 0);
    }

    #[test]
    fn release_sweeps_at_threshold() {
        let heap = Heap::new();
        let table = HandleTable::new(16, 2);
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let (v, obj) = alloc(&heap);
                let h = table.get_or_insert(obj, v);
                table.reference(h);
                table.invalidate(obj.header.clear_handle());
                h
            })
            .collect();
        assert_eq!(table.pending(), 3);

        // at or above the threshold each release sweeps
        table.release(handles[0]);
        assert_eq!(table.pending(), 2);
        table.release(handles[1]);
        assert_eq!(table.pending(), 1);

        // below it, cleanup is deferred
        table.release(handles[2]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.sweep(), 1);
        assert_eq!(table.pending(), 0);
    }

    #[test]
    fn concurrent_minting_yields_one_handle() {
        let heap = Arc::new(Heap::new());
        let table = Arc::new(HandleTable::new(16, 4));
        let v = heap.allocate_string(b"shared");

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let heap = heap.clone();
                let table = table.clone();
                std::thread::spawn(move || {
                    let obj = unsafe { heap.get(v) }.unwrap();
                    (0..100)
                        .map(|_| table.get_or_insert(obj, v))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let minted: Vec<ForeignValue> = threads
            .into_iter()
            .flat_map(|t| t.join().unwrap())
            .collect();
        assert!(minted.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(table.len(), 1);
    }
}

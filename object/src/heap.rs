use std::collections::HashSet;

use parking_lot::Mutex;

use crate::objects::{Body, DataFields, HeapObject};
use crate::{Symbol, Value};

/// Registry of live heap objects.
///
/// Objects are boxed individually so their addresses stay fixed for their
/// whole life. Collection policy is the embedder's business: the heap only
/// allocates on request and frees on [`Heap::reclaim`].
pub struct Heap {
    live: Mutex<HashSet<u64, ahash::RandomState>>,
}

impl Heap {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            live: Mutex::new(HashSet::with_capacity_and_hasher(
                capacity,
                ahash::RandomState::new(),
            )),
        }
    }

    pub fn allocate(&self, body: Body) -> Value {
        let object = Box::into_raw(Box::new(HeapObject::new(body)));
        let value = Value::from_ptr(object);
        self.live.lock().insert(value.ref_bits());
        value
    }

    pub fn allocate_array(&self, items: &[Value]) -> Value {
        self.allocate(Body::Array(items.to_vec().into()))
    }

    pub fn allocate_string(&self, bytes: &[u8]) -> Value {
        self.allocate(Body::Str(bytes.to_vec().into()))
    }

    pub fn allocate_data(&self, fields: DataFields) -> Value {
        self.allocate(Body::Data(fields.into()))
    }

    pub fn allocate_plain(&self, class: Symbol) -> Value {
        self.allocate(Body::Plain {
            class,
            ivars: Vec::new().into(),
        })
    }

    #[inline]
    pub fn is_live(&self, value: Value) -> bool {
        value.is_ref() && self.live.lock().contains(&value.ref_bits())
    }

    /// Borrow a live object.
    ///
    /// # Safety
    ///
    /// The caller must keep `value` from being reclaimed while the returned
    /// reference is in use.
    pub unsafe fn get<'a>(&self, value: Value) -> Option<&'a HeapObject> {
        // SAFETY: liveness checked above, lifetime upheld by the caller
        self.is_live(value)
            .then(|| unsafe { value.as_ref::<HeapObject>() })
    }

    /// Free a live object. `before_free` runs while the registry is locked and
    /// the object is still intact, so collectors can notify observers of the
    /// hidden handle slot. Returns `false` if `value` was not live.
    pub fn reclaim(&self, value: Value, before_free: impl FnOnce(&HeapObject)) -> bool {
        let mut live = self.live.lock();
        if !value.is_ref() || !live.remove(&value.ref_bits()) {
            return false;
        }
        let object = value.ref_bits() as *mut HeapObject;
        // SAFETY: the address came from Box::into_raw in `allocate` and was
        // just removed from the registry, so this is the only owner.
        let object = unsafe { Box::from_raw(object) };
        before_free(&object);
        drop(live);
        drop(object);
        true
    }

    pub fn len(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        for addr in self.live.get_mut().drain() {
            // SAFETY: every registered address is an owned Box allocation.
            drop(unsafe { Box::from_raw(addr as *mut HeapObject) });
        }
    }
}

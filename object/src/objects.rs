use std::ffi::c_void;

use parking_lot::{Mutex, RwLock};

use crate::header::{Header, ObjectType};
use crate::{Symbol, Value};

/// Mark or free callback attached to a [`DataFields`] object by foreign code.
pub type DataFunction = unsafe extern "C" fn(*mut c_void);

/// The native-facing fields of a data object.
#[derive(Debug, Clone, Copy)]
pub struct DataFields {
    pub data: *mut c_void,
    pub mark: Option<DataFunction>,
    pub free: Option<DataFunction>,
}

impl Default for DataFields {
    fn default() -> Self {
        Self {
            data: core::ptr::null_mut(),
            mark: None,
            free: None,
        }
    }
}

// SAFETY: the pointer is owned by the foreign library that created it; the
// object only stores it and hands it back.
unsafe impl Send for DataFields {}
unsafe impl Sync for DataFields {}

/// Body of a heap object, selected by its [`ObjectType`].
pub enum Body {
    /// Instance of a named class with instance variables.
    Plain {
        class: Symbol,
        ivars: RwLock<Vec<(Symbol, Value)>>,
    },
    Array(RwLock<Vec<Value>>),
    Str(RwLock<Vec<u8>>),
    Data(Mutex<DataFields>),
}

impl Body {
    pub fn object_type(&self) -> ObjectType {
        match self {
            Body::Plain { .. } => ObjectType::Plain,
            Body::Array(_) => ObjectType::Array,
            Body::Str(_) => ObjectType::Str,
            Body::Data(_) => ObjectType::Data,
        }
    }
}

// ── HeapObject ─────────────────────────────────────────────────────

/// Every managed heap object: header followed by its body.
///
/// ```text
/// [Header 16B] [Body ...]
/// ```
#[repr(C, align(8))]
pub struct HeapObject {
    pub header: Header,
    body: Body,
}

impl HeapObject {
    pub fn new(body: Body) -> Self {
        Self {
            header: Header::new(body.object_type()),
            body,
        }
    }

    #[inline(always)]
    pub fn object_type(&self) -> ObjectType {
        self.header.object_type()
    }

    #[inline(always)]
    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn as_array(&self) -> Option<&RwLock<Vec<Value>>> {
        match &self.body {
            Body::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&RwLock<Vec<u8>>> {
        match &self.body {
            Body::Str(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&Mutex<DataFields>> {
        match &self.body {
            Body::Data(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn class(&self) -> Option<Symbol> {
        match &self.body {
            Body::Plain { class, .. } => Some(*class),
            _ => None,
        }
    }

    pub fn ivar(&self, name: Symbol) -> Option<Value> {
        match &self.body {
            Body::Plain { ivars, .. } => ivars
                .read()
                .iter()
                .find(|(n, _)| *n == name)
                .map(|&(_, v)| v),
            _ => None,
        }
    }

    /// Returns `false` when the object has no instance variables.
    pub fn set_ivar(&self, name: Symbol, value: Value) -> bool {
        let Body::Plain { ivars, .. } = &self.body else {
            return false;
        };
        let mut ivars = ivars.write();
        match ivars.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => ivars.push((name, value)),
        }
        true
    }
}

impl Drop for HeapObject {
    fn drop(&mut self) {
        if let Body::Data(fields) = &self.body {
            let fields = *fields.lock();
            if let Some(free) = fields.free {
                // SAFETY: the free callback was registered for this pointer.
                unsafe { free(fields.data) };
            }
        }
    }
}

impl core::fmt::Debug for HeapObject {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HeapObject")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

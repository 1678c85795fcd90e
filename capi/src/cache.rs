//! Native-shaped mirrors of managed arrays, strings and data objects.
//!
//! Extensions get a stable pointer to a `#[repr(C)]` struct and may read
//! or write through it freely. The owning frame pushes those writes back
//! with `flush` and refreshes the mirror from the managed object with
//! `update`.

use std::ffi::{c_char, c_long, c_void};

use object::{DataFields, DataFunction, HeapObject, Value};

use crate::error::Exception;
use crate::value::ForeignValue;

/// Conversions a mirror needs from its owning frame.
pub(crate) trait Convert {
    fn to_foreign(&mut self, value: Value) -> Result<ForeignValue, Exception>;
    fn to_managed(&self, value: ForeignValue) -> Result<Value, Exception>;
    fn heap_object(&self, value: ForeignValue) -> Result<&HeapObject, Exception>;
}

#[repr(C)]
#[derive(Debug)]
pub struct RArray {
    pub len: c_long,
    pub capa: c_long,
    pub ptr: *mut ForeignValue,
}

#[repr(C)]
#[derive(Debug)]
pub struct RString {
    pub len: c_long,
    /// NUL-terminated.
    pub ptr: *mut c_char,
}

#[repr(C)]
#[derive(Debug)]
pub struct RData {
    pub dmark: Option<DataFunction>,
    pub dfree: Option<DataFunction>,
    pub data: *mut c_void,
}

// ── Array ──────────────────────────────────────────────────────────

pub(crate) struct ArrayMirror {
    handle: ForeignValue,
    raw: Box<RArray>,
    // fully initialized; its length is `raw.capa`
    storage: Vec<ForeignValue>,
}

impl ArrayMirror {
    pub fn new(handle: ForeignValue, cx: &mut impl Convert) -> Result<Self, Exception> {
        let mut storage = Vec::new();
        let mut mirror = Self {
            handle,
            raw: Box::new(RArray {
                len: 0,
                capa: 0,
                ptr: storage.as_mut_ptr(),
            }),
            storage,
        };
        mirror.update(cx)?;
        Ok(mirror)
    }

    pub fn as_ptr(&mut self) -> *mut RArray {
        &mut *self.raw
    }

    pub fn flush(&self, cx: &impl Convert) -> Result<(), Exception> {
        let len = (self.raw.len.max(0) as usize).min(self.storage.len());
        // SAFETY: ptr covers `storage`, which only the extension writes to
        // between update and flush.
        let written = unsafe { core::slice::from_raw_parts(self.raw.ptr, len) };
        let values = written
            .iter()
            .map(|&v| cx.to_managed(v))
            .collect::<Result<Vec<_>, _>>()?;
        let items = cx
            .heap_object(self.handle)?
            .as_array()
            .ok_or(Exception::Type { expected: "Array" })?;
        *items.write() = values;
        Ok(())
    }

    /// Refresh from the managed array. The buffer is rewritten in place and
    /// only replaced when the array outgrew `capa`.
    pub fn update(&mut self, cx: &mut impl Convert) -> Result<(), Exception> {
        let values = cx
            .heap_object(self.handle)?
            .as_array()
            .ok_or(Exception::Type { expected: "Array" })?
            .read()
            .clone();
        let elements = values
            .into_iter()
            .map(|v| cx.to_foreign(v))
            .collect::<Result<Vec<_>, _>>()?;
        let len = elements.len();
        if len > self.storage.len() {
            self.storage = elements;
        } else {
            // SAFETY: `storage` holds at least `len` slots. Writing through
            // the raw pointer keeps pointers foreign code already holds valid.
            unsafe {
                core::ptr::copy_nonoverlapping(elements.as_ptr(), self.storage.as_mut_ptr(), len);
            }
        }
        self.raw.len = len as c_long;
        self.raw.capa = self.storage.len() as c_long;
        self.raw.ptr = self.storage.as_mut_ptr();
        Ok(())
    }
}

// ── String ─────────────────────────────────────────────────────────

pub(crate) struct StringMirror {
    handle: ForeignValue,
    raw: Box<RString>,
    // fully initialized, always room for the NUL terminator
    storage: Vec<u8>,
}

impl StringMirror {
    pub fn new(handle: ForeignValue, cx: &impl Convert) -> Result<Self, Exception> {
        let mut storage = vec![0];
        let mut mirror = Self {
            handle,
            raw: Box::new(RString {
                len: 0,
                ptr: storage.as_mut_ptr() as *mut c_char,
            }),
            storage,
        };
        mirror.update(cx)?;
        Ok(mirror)
    }

    pub fn as_ptr(&mut self) -> *mut RString {
        &mut *self.raw
    }

    pub fn flush(&self, cx: &impl Convert) -> Result<(), Exception> {
        let len = (self.raw.len.max(0) as usize).min(self.storage.len() - 1);
        // SAFETY: ptr points into `storage`, which is at least len + 1 long.
        let written = unsafe { core::slice::from_raw_parts(self.raw.ptr as *const u8, len) };
        let bytes = cx
            .heap_object(self.handle)?
            .as_str()
            .ok_or(Exception::Type { expected: "String" })?;
        *bytes.write() = written.to_vec();
        Ok(())
    }

    /// Refresh from the managed string, in place unless it no longer fits.
    pub fn update(&mut self, cx: &impl Convert) -> Result<(), Exception> {
        let object = cx.heap_object(self.handle)?;
        let bytes = object
            .as_str()
            .ok_or(Exception::Type { expected: "String" })?
            .read();
        let len = bytes.len();
        if len + 1 > self.storage.len() {
            let mut storage = Vec::with_capacity(len + 1);
            storage.extend_from_slice(&bytes);
            storage.push(0);
            self.storage = storage;
        } else {
            // SAFETY: `storage` holds at least len + 1 bytes.
            unsafe {
                let base = self.storage.as_mut_ptr();
                core::ptr::copy_nonoverlapping(bytes.as_ptr(), base, len);
                base.add(len).write(0);
            }
        }
        self.raw.len = len as c_long;
        self.raw.ptr = self.storage.as_mut_ptr() as *mut c_char;
        Ok(())
    }
}

// ── Data ───────────────────────────────────────────────────────────

pub(crate) struct DataMirror {
    handle: ForeignValue,
    raw: Box<RData>,
}

impl DataMirror {
    pub fn new(handle: ForeignValue, cx: &impl Convert) -> Result<Self, Exception> {
        let fields = *cx
            .heap_object(handle)?
            .as_data()
            .ok_or(Exception::Type { expected: "Data" })?
            .lock();
        Ok(Self {
            handle,
            raw: Box::new(RData {
                dmark: fields.mark,
                dfree: fields.free,
                data: fields.data,
            }),
        })
    }

    pub fn as_ptr(&mut self) -> *mut RData {
        &mut *self.raw
    }

    pub fn flush(&self, cx: &impl Convert) -> Result<(), Exception> {
        let fields = cx
            .heap_object(self.handle)?
            .as_data()
            .ok_or(Exception::Type { expected: "Data" })?;
        *fields.lock() = DataFields {
            data: self.raw.data,
            mark: self.raw.dmark,
            free: self.raw.dfree,
        };
        Ok(())
    }
}

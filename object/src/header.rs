use std::sync::atomic::{AtomicUsize, Ordering};

/// Object kind tag stored in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectType {
    Plain = 0,
    Array,
    Str,
    Data,
}

impl ObjectType {
    pub const COUNT: usize = Self::Data as usize + 1;
}

/// The 16-byte header at the start of every heap object.
///
/// ```text
/// byte 0:     object_type
/// bytes 1‥7:  reserved (zero)
/// bytes 8‥15: hidden handle slot (atomic): address of the foreign handle, or 0
/// ```
///
/// The handle slot is invisible to managed code. It is written only by the
/// handle table, which uses it to find an object's existing handle.
#[repr(C)]
pub struct Header {
    object_type: ObjectType,
    _reserved: [u8; 7],
    handle: AtomicUsize,
}

const _: () = assert!(size_of::<Header>() == 16);

impl Header {
    pub fn new(object_type: ObjectType) -> Self {
        Self {
            object_type,
            _reserved: [0; 7],
            handle: AtomicUsize::new(0),
        }
    }

    #[inline(always)]
    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    // ── hidden handle slot ─────────────────────────────────────────

    #[inline(always)]
    pub fn handle_slot(&self) -> usize {
        self.handle.load(Ordering::Acquire)
    }

    /// Install `handle` if the slot is still empty.
    /// Returns `Err(existing)` when another handle won the race.
    #[inline(always)]
    pub fn install_handle(&self, handle: usize) -> Result<(), usize> {
        self.handle
            .compare_exchange(0, handle, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
    }

    #[inline(always)]
    pub fn clear_handle(&self) -> usize {
        self.handle.swap(0, Ordering::AcqRel)
    }
}

impl core::fmt::Debug for Header {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Header")
            .field("type", &self.object_type())
            .field("handle", &format_args!("0x{:x}", self.handle_slot()))
            .finish()
    }
}

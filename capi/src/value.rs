use object::{Symbol, Value, ValueKind};

/// Tag constants of the foreign calling convention. Bit-stable.
const FALSE_BITS: usize = 0x00;
const NIL_BITS: usize = 0x08;
const TRUE_BITS: usize = 0x14;
const UNDEF_BITS: usize = 0x34;

const FIXNUM_FLAG: usize = 0x01;
const SYMBOL_MASK: usize = 0xff;
const SYMBOL_FLAG: usize = 0x0c;
const SYMBOL_SHIFT: u32 = 8;
const HANDLE_MASK: usize = 0x07;

/// A word in the foreign extension calling convention.
///
/// - **false**:   `0x00`
/// - **nil**:     `0x08`
/// - **true**:    `0x14`
/// - **undef**:   `0x34`
/// - **Fixnum**:  `(n << 1) | 1` (63-bit signed)
/// - **Symbol**:  `(id << 8) | 0x0c`
/// - **Handle**:  8-aligned address of a [`Handle`](crate::Handle)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ForeignValue(usize);

/// Decoded class of a [`ForeignValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignKind {
    False,
    Nil,
    True,
    Undef,
    Fixnum(i64),
    Symbol(Symbol),
    Handle(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown handle type 0x{0:x}")]
pub struct UnknownHandleType(pub usize);

impl ForeignValue {
    pub const FALSE: Self = Self(FALSE_BITS);
    pub const NIL: Self = Self(NIL_BITS);
    pub const TRUE: Self = Self(TRUE_BITS);
    pub const UNDEF: Self = Self(UNDEF_BITS);

    #[inline(always)]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    #[inline(always)]
    pub const fn raw(self) -> usize {
        self.0
    }

    #[inline(always)]
    pub const fn from_fixnum(n: i64) -> Self {
        Self(((n << 1) as usize) | FIXNUM_FLAG)
    }

    #[inline(always)]
    pub const fn from_symbol(symbol: Symbol) -> Self {
        Self(((symbol.id() as usize) << SYMBOL_SHIFT) | SYMBOL_FLAG)
    }

    #[inline(always)]
    pub fn from_handle_address(addr: usize) -> Self {
        debug_assert!(addr & HANDLE_MASK == 0, "handle not aligned");
        debug_assert!(addr != FALSE_BITS && addr != NIL_BITS);
        Self(addr)
    }

    #[inline(always)]
    pub const fn is_handle(self) -> bool {
        self.0 & HANDLE_MASK == 0 && self.0 != FALSE_BITS && self.0 != NIL_BITS
    }

    /// Classify the word. Every pattern maps to exactly one class or is
    /// rejected.
    pub fn decode(self) -> Result<ForeignKind, UnknownHandleType> {
        match self.0 {
            FALSE_BITS => return Ok(ForeignKind::False),
            NIL_BITS => return Ok(ForeignKind::Nil),
            TRUE_BITS => return Ok(ForeignKind::True),
            UNDEF_BITS => return Ok(ForeignKind::Undef),
            _ => {}
        }
        if self.0 & FIXNUM_FLAG == FIXNUM_FLAG {
            return Ok(ForeignKind::Fixnum((self.0 as i64) >> 1));
        }
        if self.0 & SYMBOL_MASK == SYMBOL_FLAG {
            let id = u32::try_from(self.0 >> SYMBOL_SHIFT)
                .map_err(|_| UnknownHandleType(self.0))?;
            return Ok(ForeignKind::Symbol(Symbol::from_id(id)));
        }
        if self.is_handle() {
            return Ok(ForeignKind::Handle(self.0));
        }
        Err(UnknownHandleType(self.0))
    }

    /// Encode a managed immediate. `None` for heap references and malformed
    /// values, which need a handle or are rejected by the caller.
    pub fn from_immediate(value: Value) -> Option<Self> {
        match value.kind()? {
            ValueKind::Fixnum(n) => Some(Self::from_fixnum(n)),
            ValueKind::Symbol(s) => Some(Self::from_symbol(s)),
            ValueKind::Nil => Some(Self::NIL),
            ValueKind::True => Some(Self::TRUE),
            ValueKind::False => Some(Self::FALSE),
            ValueKind::Undef => Some(Self::UNDEF),
            ValueKind::Reference => None,
        }
    }
}

impl ForeignKind {
    /// The managed immediate for this class. `None` for handles.
    pub fn immediate(self) -> Option<Value> {
        match self {
            ForeignKind::False => Some(Value::false_value()),
            ForeignKind::Nil => Some(Value::nil()),
            ForeignKind::True => Some(Value::true_value()),
            ForeignKind::Undef => Some(Value::undef()),
            ForeignKind::Fixnum(n) => Some(Value::from_i64(n)),
            ForeignKind::Symbol(s) => Some(Value::from_symbol(s)),
            ForeignKind::Handle(_) => None,
        }
    }
}

impl core::fmt::Debug for ForeignValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.decode() {
            Ok(ForeignKind::Handle(addr)) => write!(f, "Handle(0x{addr:x})"),
            Ok(kind) => write!(f, "{kind:?}"),
            Err(UnknownHandleType(raw)) => write!(f, "Unknown(0x{raw:x})"),
        }
    }
}

use crate::Symbol;

/// Tag constants.
const FIXNUM_MASK: u64 = 0b1;
const TAG_MASK: u64 = 0b11;
const REF_TAG: u64 = 0b01;
const IMMEDIATE_TAG: u64 = 0b11;

const IMMEDIATE_KIND_MASK: u64 = 0b1100;
const SYMBOL_KIND: u64 = 0b0000;
const SPECIAL_KIND: u64 = 0b0100;
const IMMEDIATE_SHIFT: u32 = 4;

const NIL_BITS: u64 = (0 << IMMEDIATE_SHIFT) | SPECIAL_KIND | IMMEDIATE_TAG;
const TRUE_BITS: u64 = (1 << IMMEDIATE_SHIFT) | SPECIAL_KIND | IMMEDIATE_TAG;
const FALSE_BITS: u64 = (2 << IMMEDIATE_SHIFT) | SPECIAL_KIND | IMMEDIATE_TAG;
const UNDEF_BITS: u64 = (3 << IMMEDIATE_SHIFT) | SPECIAL_KIND | IMMEDIATE_TAG;

pub const FIXNUM_MIN: i64 = -(1i64 << 62);
pub const FIXNUM_MAX: i64 = (1i64 << 62) - 1;

/// A tagged 64-bit managed value.
///
/// Encoding:
/// - **Fixnum**:    `...XXXXX0`: 63-bit signed integer (low bit 0).
/// - **Reference**: `...XXXX01`: heap pointer (mask low 2 bits; requires 8-byte alignment).
/// - **Symbol**:    `...X0011`:  symbol id above bit 4.
/// - **Special**:   `...X0111`:  nil (0), true (1), false (2), undefined (3) above bit 4.
///
/// Any other `...11` pattern is malformed and [`Value::kind`] rejects it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(u64);

/// The decoded class of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Fixnum(i64),
    Reference,
    Symbol(Symbol),
    Nil,
    True,
    False,
    Undef,
}

impl Value {
    #[inline(always)]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    // ── Fixnum ─────────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_fixnum(self) -> bool {
        self.0 & FIXNUM_MASK == 0
    }

    #[inline(always)]
    pub fn from_i64(n: i64) -> Self {
        debug_assert!(
            (FIXNUM_MIN..=FIXNUM_MAX).contains(&n),
            "fixnum overflow: {n}"
        );
        Self((n << 1) as u64)
    }

    #[inline(always)]
    pub fn as_i64(self) -> Option<i64> {
        self.is_fixnum().then_some((self.0 as i64) >> 1)
    }

    // ── Reference ──────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_ref(self) -> bool {
        self.0 & TAG_MASK == REF_TAG
    }

    #[inline(always)]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        let addr = ptr as u64;
        debug_assert!(addr & TAG_MASK == 0, "pointer not aligned");
        Self(addr | REF_TAG)
    }

    #[inline(always)]
    pub const fn ref_bits(self) -> u64 {
        self.0 & !TAG_MASK
    }

    /// # Safety
    ///
    /// The value must be a reference to a valid, live `T`.
    #[inline(always)]
    pub unsafe fn as_ref<'a, T>(self) -> &'a T {
        debug_assert!(self.is_ref());
        // SAFETY: by contract this points to a live T
        unsafe { &*(self.ref_bits() as *const T) }
    }

    // ── Immediates ─────────────────────────────────────────────────

    #[inline(always)]
    pub const fn nil() -> Self {
        Self(NIL_BITS)
    }

    #[inline(always)]
    pub const fn true_value() -> Self {
        Self(TRUE_BITS)
    }

    #[inline(always)]
    pub const fn false_value() -> Self {
        Self(FALSE_BITS)
    }

    #[inline(always)]
    pub const fn undef() -> Self {
        Self(UNDEF_BITS)
    }

    #[inline(always)]
    pub const fn from_bool(b: bool) -> Self {
        if b { Self::true_value() } else { Self::false_value() }
    }

    #[inline(always)]
    pub const fn from_symbol(symbol: Symbol) -> Self {
        Self(((symbol.id() as u64) << IMMEDIATE_SHIFT) | SYMBOL_KIND | IMMEDIATE_TAG)
    }

    #[inline(always)]
    pub const fn is_symbol(self) -> bool {
        self.0 & (TAG_MASK | IMMEDIATE_KIND_MASK) == SYMBOL_KIND | IMMEDIATE_TAG
    }

    #[inline(always)]
    pub fn as_symbol(self) -> Option<Symbol> {
        self.is_symbol()
            .then(|| Symbol::from_id((self.0 >> IMMEDIATE_SHIFT) as u32))
    }

    #[inline(always)]
    pub const fn is_nil(self) -> bool {
        self.0 == NIL_BITS
    }

    #[inline(always)]
    pub const fn is_undef(self) -> bool {
        self.0 == UNDEF_BITS
    }

    /// Classify the bit pattern. `None` for malformed immediates.
    pub fn kind(self) -> Option<ValueKind> {
        if let Some(n) = self.as_i64() {
            return Some(ValueKind::Fixnum(n));
        }
        if self.is_ref() {
            return Some(ValueKind::Reference);
        }
        if let Some(symbol) = self.as_symbol() {
            return Some(ValueKind::Symbol(symbol));
        }
        match self.0 {
            NIL_BITS => Some(ValueKind::Nil),
            TRUE_BITS => Some(ValueKind::True),
            FALSE_BITS => Some(ValueKind::False),
            UNDEF_BITS => Some(ValueKind::Undef),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::from_i64(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::from_bool(value)
    }
}

impl From<Symbol> for Value {
    fn from(value: Symbol) -> Self {
        Value::from_symbol(value)
    }
}

impl core::fmt::Debug for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.kind() {
            Some(ValueKind::Fixnum(n)) => write!(f, "Fixnum({n})"),
            Some(ValueKind::Reference) => write!(f, "Ref(0x{:x})", self.ref_bits()),
            Some(ValueKind::Symbol(s)) => write!(f, "Symbol({})", s.id()),
            Some(ValueKind::Nil) => write!(f, "nil"),
            Some(ValueKind::True) => write!(f, "true"),
            Some(ValueKind::False) => write!(f, "false"),
            Some(ValueKind::Undef) => write!(f, "undef"),
            None => write!(f, "Malformed(0x{:016x})", self.0),
        }
    }
}

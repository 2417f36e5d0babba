//! 64-bit tagged-by-context value cells.
//!
//! A slot is a raw 64-bit cell holding an integer, double bits, a pointer,
//! or a string handle. The IL type at the use site is authoritative; slots
//! are never type-checked at runtime except by the conversion opcodes.

/// One register/parameter cell
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Slot(pub u64);

impl Slot {
    /// Zeroed cell
    pub const ZERO: Slot = Slot(0);

    /// Wrap an i64
    pub fn from_i64(v: i64) -> Slot {
        Slot(v as u64)
    }

    /// Read as i64
    pub fn as_i64(self) -> i64 {
        self.0 as i64
    }

    /// Wrap a double's bits
    pub fn from_f64(v: f64) -> Slot {
        Slot(v.to_bits())
    }

    /// Read as double
    pub fn as_f64(self) -> f64 {
        f64::from_bits(self.0)
    }

    /// Wrap a logical value
    pub fn from_bool(v: bool) -> Slot {
        Slot(u64::from(v))
    }

    /// Read as logical (low bit)
    pub fn as_bool(self) -> bool {
        self.0 & 1 != 0
    }

    /// Raw address or handle
    pub fn raw(self) -> u64 {
        self.0
    }
}

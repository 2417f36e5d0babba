//! IL values: SSA temporaries and constants

/// SSA temporary id, dense per function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempId(pub u32);

impl TempId {
    /// Raw index of this temp
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a global in its owning module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId(pub u32);

impl GlobalId {
    /// Raw index of this global
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a block within its owning function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl BlockId {
    /// Raw index of this block
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Tagged operand union.
///
/// Temporaries are SSA: each is defined at most once within its function.
/// `ConstStr` references a `str` global holding the literal; `GlobalAddr`
/// is the address of a global's storage.
#[derive(Debug, Clone, Copy)]
pub enum Value {
    /// SSA temporary
    Temp(TempId),
    /// 64-bit integer literal
    ConstInt(i64),
    /// Double literal
    ConstFloat(f64),
    /// String literal, by the global that owns its bytes
    ConstStr(GlobalId),
    /// Address of a global
    GlobalAddr(GlobalId),
    /// The null pointer
    NullPtr,
}

impl Value {
    /// True when the value is a compile-time constant (anything but a temp)
    pub fn is_const(&self) -> bool {
        !matches!(self, Value::Temp(_))
    }

    /// The temp id, when the value is a temporary
    pub fn as_temp(&self) -> Option<TempId> {
        match self {
            Value::Temp(t) => Some(*t),
            _ => None,
        }
    }

    /// The integer payload, when the value is an integer literal
    pub fn as_const_int(&self) -> Option<i64> {
        match self {
            Value::ConstInt(v) => Some(*v),
            _ => None,
        }
    }

    /// The float payload, when the value is a float literal
    pub fn as_const_float(&self) -> Option<f64> {
        match self {
            Value::ConstFloat(v) => Some(*v),
            _ => None,
        }
    }
}

// Float literals compare by bit pattern so that structural module equality
// is reflexive even around NaN.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Temp(a), Value::Temp(b)) => a == b,
            (Value::ConstInt(a), Value::ConstInt(b)) => a == b,
            (Value::ConstFloat(a), Value::ConstFloat(b)) => a.to_bits() == b.to_bits(),
            (Value::ConstStr(a), Value::ConstStr(b)) => a == b,
            (Value::GlobalAddr(a), Value::GlobalAddr(b)) => a == b,
            (Value::NullPtr, Value::NullPtr) => true,
            _ => false,
        }
    }
}

impl Eq for Value {}

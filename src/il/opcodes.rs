//! Opcode set and the static metadata table.
//!
//! The table is the single authority on operand/result categories,
//! terminator status, and side effects. The verifier, printer, parser, and
//! VM all consult it; a new opcode becomes verified by adding a row here.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::il::types::Type;

/// Every opcode understood by the toolchain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // Integer arithmetic
    /// Wrapping addition
    Add,
    /// Wrapping subtraction
    Sub,
    /// Wrapping multiplication
    Mul,
    /// Signed division; traps on zero divisor and `INT64_MIN / -1`
    SDiv,
    /// Unsigned division; traps on zero divisor
    UDiv,
    /// Signed remainder; traps like `sdiv`
    SRem,
    /// Unsigned remainder; traps on zero divisor
    URem,

    // Float arithmetic (IEEE-754 defaults, no exceptions)
    /// Float addition
    FAdd,
    /// Float subtraction
    FSub,
    /// Float multiplication
    FMul,
    /// Float division
    FDiv,

    // Bitwise / logical
    /// Bitwise and
    And,
    /// Bitwise or
    Or,
    /// Bitwise xor
    Xor,
    /// Logical negation of an `i1`
    Not,
    /// Shift left; the shift amount is masked to 0..=63
    Shl,
    /// Logical shift right; amount masked to 0..=63
    LShr,
    /// Arithmetic shift right; amount masked to 0..=63
    AShr,

    // Integer compares (result i1)
    /// Equality
    ICmpEq,
    /// Inequality
    ICmpNe,
    /// Signed less-than
    ICmpSlt,
    /// Signed less-or-equal
    ICmpSle,
    /// Signed greater-than
    ICmpSgt,
    /// Signed greater-or-equal
    ICmpSge,

    // Float compares (ordered; result i1, false on NaN except `ne`)
    /// Ordered equality
    FCmpEq,
    /// Unordered inequality
    FCmpNe,
    /// Ordered less-than
    FCmpLt,
    /// Ordered less-or-equal
    FCmpLe,
    /// Ordered greater-than
    FCmpGt,
    /// Ordered greater-or-equal
    FCmpGe,

    // Conversions
    /// Sign-extend `i1` to `i64` (true becomes -1)
    Sext,
    /// Zero-extend `i1` to `i64` (true becomes 1)
    Zext,
    /// Truncate `i64` to `i1` (keeps the low bit)
    Trunc,
    /// Signed integer to float
    Sitofp,
    /// Float to signed integer (round toward zero, saturating)
    Fptosi,
    /// Reinterpret bits between same-sized kinds
    Bitcast,

    // Memory
    /// Reserve frame stack space; operand is the byte size
    Alloca,
    /// Typed load through a pointer
    Load,
    /// Typed store through a pointer
    Store,

    /// Call a defined function or declared extern
    Call,

    // Terminators
    /// Unconditional branch
    Br,
    /// Conditional branch on an `i1`
    CBr,
    /// Return, with a value unless the function returns `void`
    Ret,
    /// Abort execution with a runtime fault
    Trap,
}

/// Count of opcodes, for table sizing
pub const OPCODE_COUNT: usize = 44;

/// All opcodes in table order
pub const ALL_OPCODES: [Opcode; OPCODE_COUNT] = [
    Opcode::Add,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::SDiv,
    Opcode::UDiv,
    Opcode::SRem,
    Opcode::URem,
    Opcode::FAdd,
    Opcode::FSub,
    Opcode::FMul,
    Opcode::FDiv,
    Opcode::And,
    Opcode::Or,
    Opcode::Xor,
    Opcode::Not,
    Opcode::Shl,
    Opcode::LShr,
    Opcode::AShr,
    Opcode::ICmpEq,
    Opcode::ICmpNe,
    Opcode::ICmpSlt,
    Opcode::ICmpSle,
    Opcode::ICmpSgt,
    Opcode::ICmpSge,
    Opcode::FCmpEq,
    Opcode::FCmpNe,
    Opcode::FCmpLt,
    Opcode::FCmpLe,
    Opcode::FCmpGt,
    Opcode::FCmpGe,
    Opcode::Sext,
    Opcode::Zext,
    Opcode::Trunc,
    Opcode::Sitofp,
    Opcode::Fptosi,
    Opcode::Bitcast,
    Opcode::Alloca,
    Opcode::Load,
    Opcode::Store,
    Opcode::Call,
    Opcode::Br,
    Opcode::CBr,
    Opcode::Ret,
    Opcode::Trap,
];

/// Operand/result type category. `Any` marks the polymorphic positions;
/// the verifier resolves those against the instruction's recorded type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    /// No value
    Void,
    /// 1-bit logical
    I1,
    /// 64-bit integer
    I64,
    /// Double
    F64,
    /// Raw pointer
    Ptr,
    /// String handle
    Str,
    /// Any non-void type (polymorphic position)
    Any,
}

impl TypeCategory {
    /// Whether a concrete type satisfies this category
    pub fn admits(self, ty: Type) -> bool {
        match self {
            TypeCategory::Void => ty == Type::Void,
            TypeCategory::I1 => ty == Type::I1,
            TypeCategory::I64 => ty == Type::I64,
            TypeCategory::F64 => ty == Type::F64,
            TypeCategory::Ptr => ty == Type::Ptr,
            TypeCategory::Str => ty == Type::Str,
            TypeCategory::Any => ty != Type::Void,
        }
    }

    /// Category corresponding to a concrete type
    pub fn of(ty: Type) -> TypeCategory {
        match ty {
            Type::Void => TypeCategory::Void,
            Type::I1 => TypeCategory::I1,
            Type::I64 => TypeCategory::I64,
            Type::F64 => TypeCategory::F64,
            Type::Ptr => TypeCategory::Ptr,
            Type::Str => TypeCategory::Str,
        }
    }
}

/// Static metadata for one opcode
#[derive(Debug)]
pub struct OpcodeInfo {
    /// The opcode this row describes
    pub opcode: Opcode,
    /// Textual mnemonic
    pub mnemonic: &'static str,
    /// Expected operand categories, in order
    pub operands: &'static [TypeCategory],
    /// Result category (`Void` when the opcode produces nothing)
    pub result: TypeCategory,
    /// True for block terminators
    pub terminator: bool,
    /// True when the instruction is observable beyond its result
    pub side_effects: bool,
    /// True when the operand list length is signature-driven (`call`)
    pub variadic: bool,
}

use TypeCategory::{Any, F64, I1, I64, Ptr, Void};

macro_rules! op_row {
    ($op:ident, $mn:literal, [$($cat:expr),*], $res:expr, term: $t:literal, fx: $fx:literal, var: $v:literal) => {
        OpcodeInfo {
            opcode: Opcode::$op,
            mnemonic: $mn,
            operands: &[$($cat),*],
            result: $res,
            terminator: $t,
            side_effects: $fx,
            variadic: $v,
        }
    };
}

/// The opcode metadata table, indexed by opcode discriminant
pub static OPCODE_TABLE: [OpcodeInfo; OPCODE_COUNT] = [
    op_row!(Add, "add", [I64, I64], I64, term: false, fx: false, var: false),
    op_row!(Sub, "sub", [I64, I64], I64, term: false, fx: false, var: false),
    op_row!(Mul, "mul", [I64, I64], I64, term: false, fx: false, var: false),
    op_row!(SDiv, "sdiv", [I64, I64], I64, term: false, fx: true, var: false),
    op_row!(UDiv, "udiv", [I64, I64], I64, term: false, fx: true, var: false),
    op_row!(SRem, "srem", [I64, I64], I64, term: false, fx: true, var: false),
    op_row!(URem, "urem", [I64, I64], I64, term: false, fx: true, var: false),
    op_row!(FAdd, "fadd", [F64, F64], F64, term: false, fx: false, var: false),
    op_row!(FSub, "fsub", [F64, F64], F64, term: false, fx: false, var: false),
    op_row!(FMul, "fmul", [F64, F64], F64, term: false, fx: false, var: false),
    op_row!(FDiv, "fdiv", [F64, F64], F64, term: false, fx: false, var: false),
    op_row!(And, "and", [I64, I64], I64, term: false, fx: false, var: false),
    op_row!(Or, "or", [I64, I64], I64, term: false, fx: false, var: false),
    op_row!(Xor, "xor", [I64, I64], I64, term: false, fx: false, var: false),
    op_row!(Not, "not", [I1], I1, term: false, fx: false, var: false),
    op_row!(Shl, "shl", [I64, I64], I64, term: false, fx: false, var: false),
    op_row!(LShr, "lshr", [I64, I64], I64, term: false, fx: false, var: false),
    op_row!(AShr, "ashr", [I64, I64], I64, term: false, fx: false, var: false),
    op_row!(ICmpEq, "icmp_eq", [I64, I64], I1, term: false, fx: false, var: false),
    op_row!(ICmpNe, "icmp_ne", [I64, I64], I1, term: false, fx: false, var: false),
    op_row!(ICmpSlt, "icmp_slt", [I64, I64], I1, term: false, fx: false, var: false),
    op_row!(ICmpSle, "icmp_sle", [I64, I64], I1, term: false, fx: false, var: false),
    op_row!(ICmpSgt, "icmp_sgt", [I64, I64], I1, term: false, fx: false, var: false),
    op_row!(ICmpSge, "icmp_sge", [I64, I64], I1, term: false, fx: false, var: false),
    op_row!(FCmpEq, "fcmp_eq", [F64, F64], I1, term: false, fx: false, var: false),
    op_row!(FCmpNe, "fcmp_ne", [F64, F64], I1, term: false, fx: false, var: false),
    op_row!(FCmpLt, "fcmp_lt", [F64, F64], I1, term: false, fx: false, var: false),
    op_row!(FCmpLe, "fcmp_le", [F64, F64], I1, term: false, fx: false, var: false),
    op_row!(FCmpGt, "fcmp_gt", [F64, F64], I1, term: false, fx: false, var: false),
    op_row!(FCmpGe, "fcmp_ge", [F64, F64], I1, term: false, fx: false, var: false),
    op_row!(Sext, "sext", [I1], I64, term: false, fx: false, var: false),
    op_row!(Zext, "zext", [I1], I64, term: false, fx: false, var: false),
    op_row!(Trunc, "trunc", [I64], I1, term: false, fx: false, var: false),
    op_row!(Sitofp, "sitofp", [I64], F64, term: false, fx: false, var: false),
    op_row!(Fptosi, "fptosi", [F64], I64, term: false, fx: false, var: false),
    op_row!(Bitcast, "bitcast", [Any], Any, term: false, fx: false, var: false),
    op_row!(Alloca, "alloca", [I64], Ptr, term: false, fx: false, var: false),
    op_row!(Load, "load", [Ptr], Any, term: false, fx: false, var: false),
    op_row!(Store, "store", [Ptr, Any], Void, term: false, fx: true, var: false),
    op_row!(Call, "call", [], Any, term: false, fx: true, var: true),
    op_row!(Br, "br", [], Void, term: true, fx: true, var: false),
    op_row!(CBr, "cbr", [I1], Void, term: true, fx: true, var: false),
    op_row!(Ret, "ret", [], Void, term: true, fx: true, var: false),
    op_row!(Trap, "trap", [], Void, term: true, fx: true, var: false),
];

lazy_static! {
    static ref MNEMONICS: HashMap<&'static str, Opcode> = {
        let mut map = HashMap::with_capacity(OPCODE_COUNT);
        for row in OPCODE_TABLE.iter() {
            map.insert(row.mnemonic, row.opcode);
        }
        map
    };
}

impl Opcode {
    /// Metadata row for this opcode
    pub fn info(self) -> &'static OpcodeInfo {
        &OPCODE_TABLE[self as usize]
    }

    /// Textual mnemonic
    pub fn mnemonic(self) -> &'static str {
        self.info().mnemonic
    }

    /// Resolve a mnemonic back to its opcode
    pub fn from_mnemonic(s: &str) -> Option<Opcode> {
        MNEMONICS.get(s).copied()
    }

    /// True for block terminators
    pub fn is_terminator(self) -> bool {
        self.info().terminator
    }

    /// Side-effect flag from the table. `call` side effects additionally
    /// depend on the callee's attributes; see `Instr::has_side_effects`.
    pub fn side_effects(self) -> bool {
        self.info().side_effects
    }

    /// True when the opcode produces a value (polymorphic results count)
    pub fn produces_value(self) -> bool {
        self.info().result != TypeCategory::Void
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_in_discriminant_order() {
        for op in ALL_OPCODES {
            assert_eq!(op.info().opcode, op, "table row out of order for {op:?}");
        }
    }

    #[test]
    fn test_mnemonic_roundtrip() {
        for op in ALL_OPCODES {
            assert_eq!(Opcode::from_mnemonic(op.mnemonic()), Some(op));
        }
        assert_eq!(Opcode::from_mnemonic("frobnicate"), None);
    }

    #[test]
    fn test_terminator_flags() {
        assert!(Opcode::Br.is_terminator());
        assert!(Opcode::CBr.is_terminator());
        assert!(Opcode::Ret.is_terminator());
        assert!(Opcode::Trap.is_terminator());
        assert!(!Opcode::Add.is_terminator());
        assert!(!Opcode::Call.is_terminator());
    }

    #[test]
    fn test_divides_keep_side_effects() {
        // Trap-generating operations must never be classified pure, or
        // folding and DCE would erase the trap.
        assert!(Opcode::SDiv.side_effects());
        assert!(Opcode::SRem.side_effects());
        assert!(Opcode::UDiv.side_effects());
        assert!(Opcode::URem.side_effects());
        assert!(!Opcode::Add.side_effects());
    }

    #[test]
    fn test_category_admission() {
        assert!(TypeCategory::Any.admits(Type::Str));
        assert!(!TypeCategory::Any.admits(Type::Void));
        assert!(TypeCategory::I1.admits(Type::I1));
        assert!(!TypeCategory::I1.admits(Type::I64));
    }
}

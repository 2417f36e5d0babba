//! IL instructions

use crate::il::opcodes::Opcode;
use crate::il::types::Type;
use crate::il::value::{TempId, Value};
use crate::support::interner::Symbol;
use crate::support::source::SourceLoc;

/// A non-terminator instruction.
///
/// `ty` is the result type for value-producing opcodes (the loaded type for
/// `load`), the stored value type for `store`, and `Void` otherwise. The
/// operand list is small, typically at most four entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    /// What the instruction does
    pub opcode: Opcode,
    /// Destination temp; present iff the instruction produces a value
    pub dest: Option<TempId>,
    /// Result type (or the access type for memory opcodes)
    pub ty: Type,
    /// Operands in positional order
    pub operands: Vec<Value>,
    /// Callee symbol, for `call` only
    pub callee: Option<Symbol>,
    /// Source position for diagnostics and debugging
    pub loc: SourceLoc,
}

impl Instr {
    /// Create an instruction with no source location
    pub fn new(opcode: Opcode, dest: Option<TempId>, ty: Type, operands: Vec<Value>) -> Self {
        Instr {
            opcode,
            dest,
            ty,
            operands,
            callee: None,
            loc: SourceLoc::UNKNOWN,
        }
    }

    /// Side-effect flag, derived from the opcode table. A `call` is
    /// additionally pure when its callee is a defined function marked
    /// `pure readonly`; the pass pipeline resolves that through the module.
    pub fn table_side_effects(&self) -> bool {
        self.opcode.side_effects()
    }

    /// Iterate over the temps this instruction reads
    pub fn used_temps(&self) -> impl Iterator<Item = TempId> + '_ {
        self.operands.iter().filter_map(|v| v.as_temp())
    }
}

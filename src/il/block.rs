//! Basic blocks, block parameters, and terminators

use crate::il::instr::Instr;
use crate::il::opcodes::Opcode;
use crate::il::value::{BlockId, TempId, Value};
use crate::support::interner::Symbol;
use crate::support::source::SourceLoc;

/// A formal incoming SSA value of a block. The parameter's type and name
/// live in the owning function's temp table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockParam {
    /// The temp defined by this parameter
    pub temp: TempId,
}

/// The final instruction of a block, determining outgoing control flow.
///
/// Successor edges supply actual arguments for the target's block
/// parameters in positional order. A call to a `noreturn` routine is
/// expressed as a regular `call` followed by `trap`.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    /// Unconditional branch
    Br {
        /// Target block
        target: BlockId,
        /// Arguments for the target's parameters
        args: Vec<Value>,
    },
    /// Two-way branch on an `i1` condition
    CBr {
        /// Branch condition
        cond: Value,
        /// Target when the condition is true
        then_target: BlockId,
        /// Arguments for the true target
        then_args: Vec<Value>,
        /// Target when the condition is false
        else_target: BlockId,
        /// Arguments for the false target
        else_args: Vec<Value>,
    },
    /// Return from the function
    Ret(Option<Value>),
    /// Abort with a runtime fault
    Trap,
}

impl Terminator {
    /// The opcode row describing this terminator
    pub fn opcode(&self) -> Opcode {
        match self {
            Terminator::Br { .. } => Opcode::Br,
            Terminator::CBr { .. } => Opcode::CBr,
            Terminator::Ret(_) => Opcode::Ret,
            Terminator::Trap => Opcode::Trap,
        }
    }

    /// Successor blocks with their argument vectors, in edge order
    pub fn successors(&self) -> Vec<(BlockId, &[Value])> {
        match self {
            Terminator::Br { target, args } => vec![(*target, args.as_slice())],
            Terminator::CBr {
                then_target,
                then_args,
                else_target,
                else_args,
                ..
            } => vec![
                (*then_target, then_args.as_slice()),
                (*else_target, else_args.as_slice()),
            ],
            Terminator::Ret(_) | Terminator::Trap => Vec::new(),
        }
    }

    /// Temps read by this terminator (condition, return value, branch args)
    pub fn used_temps(&self) -> Vec<TempId> {
        let mut used = Vec::new();
        let mut add = |v: &Value| {
            if let Some(t) = v.as_temp() {
                used.push(t);
            }
        };
        match self {
            Terminator::Br { args, .. } => args.iter().for_each(&mut add),
            Terminator::CBr {
                cond,
                then_args,
                else_args,
                ..
            } => {
                add(cond);
                then_args.iter().for_each(&mut add);
                else_args.iter().for_each(&mut add);
            }
            Terminator::Ret(Some(v)) => add(v),
            Terminator::Ret(None) | Terminator::Trap => {}
        }
        used
    }
}

/// A labeled linear run of instructions ending in exactly one terminator.
///
/// `term` is `None` only while under construction; the builder refuses to
/// append past a terminator and the verifier rejects unterminated blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    /// Label, unique within the function
    pub label: Symbol,
    /// Formal incoming values (entry block must have none)
    pub params: Vec<BlockParam>,
    /// Non-terminator instructions in execution order
    pub instrs: Vec<Instr>,
    /// The terminator, once set
    pub term: Option<Terminator>,
    /// Source position of the terminator
    pub term_loc: SourceLoc,
}

impl BasicBlock {
    /// Create an empty, unterminated block
    pub fn new(label: Symbol) -> Self {
        BasicBlock {
            label,
            params: Vec::new(),
            instrs: Vec::new(),
            term: None,
            term_loc: SourceLoc::UNKNOWN,
        }
    }

    /// True once a terminator has been set
    pub fn is_terminated(&self) -> bool {
        self.term.is_some()
    }

    /// Instruction count including the terminator slot
    pub fn len_with_term(&self) -> usize {
        self.instrs.len() + usize::from(self.term.is_some())
    }
}

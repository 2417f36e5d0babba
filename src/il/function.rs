//! IL functions and their temp tables

use crate::il::block::BasicBlock;
use crate::il::types::Type;
use crate::il::value::{BlockId, TempId, Value};
use crate::support::interner::Symbol;

/// Advisory function attributes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FunctionAttrs {
    /// No observable effects besides the returned value
    pub is_pure: bool,
    /// Reads but never writes memory
    pub readonly: bool,
    /// Never returns to the caller
    pub noreturn: bool,
}

impl FunctionAttrs {
    /// True when no attribute is set
    pub fn is_empty(&self) -> bool {
        !(self.is_pure || self.readonly || self.noreturn)
    }
}

/// A formal function parameter. Parameters occupy the first temp ids of the
/// function, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Param {
    /// Parameter name
    pub name: Symbol,
    /// Parameter type
    pub ty: Type,
    /// The temp bound to this parameter
    pub temp: TempId,
}

/// Per-temp bookkeeping: type plus the optional user-facing name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempInfo {
    /// SSA value type
    pub ty: Type,
    /// Interned name, when the temp carries one (`%x`); unnamed temps
    /// print as `%tN`
    pub name: Option<Symbol>,
}

/// An IL function: ordered parameters, a return type, and blocks in
/// declaration order with the entry block first.
#[derive(Debug, Clone)]
pub struct Function {
    /// Function name (referenced by calls via symbol, never by pointer)
    pub name: Symbol,
    /// Formal parameters
    pub params: Vec<Param>,
    /// Return type
    pub ret: Type,
    /// Blocks; index 0 is the entry
    pub blocks: Vec<BasicBlock>,
    /// Advisory attributes
    pub attrs: FunctionAttrs,
    temps: Vec<TempInfo>,
}

impl Function {
    /// Create a function with no params, blocks, or temps yet
    pub fn new(name: Symbol, ret: Type) -> Self {
        Function {
            name,
            params: Vec::new(),
            ret,
            blocks: Vec::new(),
            attrs: FunctionAttrs::default(),
            temps: Vec::new(),
        }
    }

    /// Allocate the next dense temp id
    pub fn new_temp(&mut self, ty: Type, name: Option<Symbol>) -> TempId {
        let id = TempId(self.temps.len() as u32);
        self.temps.push(TempInfo { ty, name });
        id
    }

    /// Number of temps defined so far
    pub fn temp_count(&self) -> usize {
        self.temps.len()
    }

    /// Type of a temp
    pub fn temp_type(&self, t: TempId) -> Type {
        self.temps[t.index()].ty
    }

    /// Name of a temp, when it has one
    pub fn temp_name(&self, t: TempId) -> Option<Symbol> {
        self.temps[t.index()].name
    }

    /// Rebind a temp's type (used by passes that retype promoted slots)
    pub fn set_temp_type(&mut self, t: TempId, ty: Type) {
        self.temps[t.index()].ty = ty;
    }

    /// Static type of any value in this function's context
    pub fn value_type(&self, v: Value) -> Type {
        match v {
            Value::Temp(t) => self.temp_type(t),
            Value::ConstInt(_) => Type::I64,
            Value::ConstFloat(_) => Type::F64,
            Value::ConstStr(_) => Type::Str,
            Value::GlobalAddr(_) => Type::Ptr,
            Value::NullPtr => Type::Ptr,
        }
    }

    /// The entry block
    pub fn entry(&self) -> &BasicBlock {
        &self.blocks[0]
    }

    /// Look up a block by label
    pub fn block_by_label(&self, label: Symbol) -> Option<BlockId> {
        self.blocks
            .iter()
            .position(|b| b.label == label)
            .map(|i| BlockId(i as u32))
    }

    /// Shared access to a block
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    /// Mutable access to a block
    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    /// Whether a temp name is already taken in this function
    pub fn name_in_use(&self, name: Symbol) -> bool {
        self.temps.iter().any(|t| t.name == Some(name))
    }
}

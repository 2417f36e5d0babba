//! The IL data model: types, values, instructions, blocks, functions, and
//! modules, plus the builder used to construct them safely.

pub mod block;
pub mod builder;
pub mod function;
pub mod instr;
pub mod module;
pub mod opcodes;
pub mod types;
pub mod value;

pub use block::{BasicBlock, BlockParam, Terminator};
pub use builder::Builder;
pub use function::{Function, FunctionAttrs, Param};
pub use instr::Instr;
pub use module::{Extern, Global, GlobalInit, Module, Visibility};
pub use opcodes::{Opcode, OpcodeInfo, TypeCategory, OPCODE_TABLE};
pub use types::Type;
pub use value::{BlockId, GlobalId, TempId, Value};

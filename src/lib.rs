//! # Basil
//!
//! A compiler toolchain for a small BASIC dialect, built around a typed,
//! SSA-oriented intermediate language (IL). The crate parses textual IL,
//! verifies it, runs optimization passes, and executes modules in a
//! stack/register interpreter VM with source-mapped debugging. BASIC front
//! ends are external collaborators that target the IL through the
//! [`frontend`] contract and the [`builtins`] signature registry.
//!
//! ## Architecture
//!
//! ```text
//! front end -> Builder -> Module -> verify -> passes -> verify -> VM
//!                            |                                    |
//!                         printer/parser (textual IL)          debugger
//! ```
//!
//! ## Quick start
//!
//! ```rust
//! use basil::debug::DebugController;
//! use basil::text::parse_module;
//! use basil::verify::verify_module;
//! use basil::vm::{ExitStatus, Vm, VmOptions};
//!
//! # fn main() -> basil::Result<()> {
//! let source = "\
//! func @main() -> i64 {
//! entry:
//!   %t0 = add 20, 22
//!   ret %t0
//! }
//! ";
//! let module = parse_module("demo.il", source)?;
//! assert!(verify_module(&module).is_ok());
//!
//! let mut vm = Vm::new(&module, VmOptions::default())?;
//! let mut debugger = DebugController::disabled();
//! match vm.run(&mut debugger)? {
//!     ExitStatus::Normal(value) => assert_eq!(value, 42),
//!     other => panic!("unexpected exit: {other:?}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Optimizing
//!
//! ```rust
//! use basil::opt::PassManager;
//! use basil::text::{parse_module, print_module};
//!
//! # fn main() -> basil::Result<()> {
//! let mut module = parse_module(
//!     "demo.il",
//!     "func @f() -> i64 {\nentry:\n  %a = add 1, 2\n  ret %a\n}\n",
//! )?;
//! PassManager::default_pipeline().run(&mut module)?;
//! assert!(print_module(&module).contains("ret 3"));
//! # Ok(())
//! # }
//! ```

/// Version of the toolchain
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod analysis;
pub mod builtins;
pub mod cli;
pub mod debug;
pub mod error;
pub mod frontend;
pub mod il;
pub mod opt;
pub mod support;
pub mod text;
pub mod verify;
pub mod vm;

pub use error::{Error, Result, TrapKind};
pub use il::{Builder, Function, Instr, Module, Opcode, Type, Value};
pub use support::{DiagnosticSink, Interner, SourceLoc, SourceManager, Symbol};

//! Textual IL: deterministic printer and strict parser.
//!
//! The textual form is the only serialization contract. For any module the
//! verifier accepts, `parse(print(m))` is structurally equal to `m` and a
//! second print is byte-identical.

mod lexer;
mod parser;
mod printer;

pub use parser::parse_module;
pub use printer::{op_body_text, print_module, temp_display_names, term_body_text, value_text};

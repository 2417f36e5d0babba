//! IL modules: externs, globals, functions, and the owning tables

use crate::il::function::Function;
use crate::il::types::Type;
use crate::il::value::GlobalId;
use crate::support::interner::{Interner, Symbol};
use crate::support::source::SourceManager;

/// A declared, host-implemented routine callable from IL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extern {
    /// Routine name, matched against the VM host table
    pub name: Symbol,
    /// Parameter types
    pub params: Vec<Type>,
    /// Return type
    pub ret: Type,
}

/// Linkage visibility of a global
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// Visible to other modules (default)
    #[default]
    Public,
    /// Private to the defining module
    Internal,
}

/// Initializer of a global
#[derive(Debug, Clone)]
pub enum GlobalInit {
    /// Integer initializer
    Int(i64),
    /// Float initializer
    Float(f64),
    /// String bytes; the module's string table is the set of these
    Str(String),
    /// Null pointer initializer
    Null,
}

/// A module-level storage location
#[derive(Debug, Clone)]
pub struct Global {
    /// Global name
    pub name: Symbol,
    /// Value type of the storage
    pub ty: Type,
    /// Initial value
    pub init: GlobalInit,
    /// Writes are rejected for const globals
    pub is_const: bool,
    /// Linkage visibility
    pub vis: Visibility,
}

/// A complete IL module.
///
/// The module exclusively owns its functions, globals, externs, the
/// interner used for labels/parameter/temp names, and the file table.
/// Cross-function references are by symbol, never raw pointers.
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Name interner for everything in this module
    pub interner: Interner,
    /// File table for source locations
    pub files: SourceManager,
    /// The file id of the `.il` text this module was parsed from, if any.
    /// Locations pointing there are synthetic and are not re-printed.
    pub self_file: Option<u32>,
    /// Declared host routines, in declaration order
    pub externs: Vec<Extern>,
    /// Globals, in declaration order
    pub globals: Vec<Global>,
    /// Functions, in declaration order
    pub functions: Vec<Function>,
}

impl Module {
    /// Create an empty module
    pub fn new() -> Self {
        Module::default()
    }

    /// Resolve a symbol to its string
    pub fn name(&self, sym: Symbol) -> &str {
        self.interner.resolve(sym)
    }

    /// Find a function index by name
    pub fn function_index(&self, name: &str) -> Option<usize> {
        let sym = self.interner.get(name)?;
        self.functions.iter().position(|f| f.name == sym)
    }

    /// Find a function by symbol
    pub fn function_by_symbol(&self, sym: Symbol) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == sym)
    }

    /// Find an extern by symbol
    pub fn extern_by_symbol(&self, sym: Symbol) -> Option<&Extern> {
        self.externs.iter().find(|e| e.name == sym)
    }

    /// Find a global id by symbol
    pub fn global_by_symbol(&self, sym: Symbol) -> Option<GlobalId> {
        self.globals
            .iter()
            .position(|g| g.name == sym)
            .map(|i| GlobalId(i as u32))
    }

    /// Shared access to a global
    pub fn global(&self, id: GlobalId) -> &Global {
        &self.globals[id.index()]
    }

    /// Intern a string literal as a fresh const `str` global, reusing an
    /// existing entry with the same bytes. Returns the global's id.
    pub fn intern_str_literal(&mut self, text: &str) -> GlobalId {
        for (i, g) in self.globals.iter().enumerate() {
            if g.ty == Type::Str && g.is_const {
                if let GlobalInit::Str(s) = &g.init {
                    if s == text {
                        return GlobalId(i as u32);
                    }
                }
            }
        }
        let name = self
            .interner
            .intern(&format!(".str{}", self.globals.len()));
        self.globals.push(Global {
            name,
            ty: Type::Str,
            init: GlobalInit::Str(text.to_string()),
            is_const: true,
            vis: Visibility::Internal,
        });
        GlobalId(self.globals.len() as u32 - 1)
    }

    /// Iterate over the string table: every const `str` global's bytes
    pub fn string_table(&self) -> impl Iterator<Item = (GlobalId, &str)> {
        self.globals.iter().enumerate().filter_map(|(i, g)| {
            if let GlobalInit::Str(s) = &g.init {
                Some((GlobalId(i as u32), s.as_str()))
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str_literal_dedup() {
        let mut m = Module::new();
        let a = m.intern_str_literal("HELLO");
        let b = m.intern_str_literal("WORLD");
        let c = m.intern_str_literal("HELLO");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(m.globals.len(), 2);
        assert_eq!(m.string_table().count(), 2);
    }
}

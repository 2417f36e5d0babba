//! Builtin signature registry.
//!
//! The single source of truth for every builtin a front end may offer:
//! canonical name, arity range, result kind, per-argument spec, and the
//! lowered extern. A front end's semantic analyzer consumes a [`BuiltinView`]
//! to check arity and types; its lowering stage consults the same entry to
//! select the emitted extern, so diagnostics and emitted calls cannot
//! drift apart. The VM host table is cross-checked against this registry
//! at startup.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::il::opcodes::TypeCategory;
use crate::il::types::Type;

/// Result kind of a builtin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinResult {
    /// Always the same type
    Fixed(Type),
    /// Polymorphic: the type of the given argument
    SameAsArg(usize),
}

/// One argument position
#[derive(Debug, Clone, Copy)]
pub struct ArgSpec {
    /// Accepted category (`Any` marks numeric-polymorphic positions)
    pub cat: TypeCategory,
    /// May be omitted by the caller
    pub optional: bool,
}

const fn arg(cat: TypeCategory) -> ArgSpec {
    ArgSpec {
        cat,
        optional: false,
    }
}

const fn opt(cat: TypeCategory) -> ArgSpec {
    ArgSpec {
        cat,
        optional: true,
    }
}

/// One builtin descriptor
#[derive(Debug)]
pub struct BuiltinDesc {
    /// Canonical (uppercase) name
    pub name: &'static str,
    /// Fewest arguments accepted
    pub min_arity: usize,
    /// Most arguments accepted
    pub max_arity: usize,
    /// Result kind
    pub result: BuiltinResult,
    /// Per-argument specs, one per possible position
    pub args: &'static [ArgSpec],
    /// Lowered extern per first-argument type. Monomorphic builtins carry
    /// one row whose key is the first argument type (or `I64` when there
    /// are no arguments).
    pub lowerings: &'static [(Type, &'static str)],
}

impl BuiltinDesc {
    /// The extern to emit for a call whose first argument has `first` type
    pub fn select_extern(&self, first: Type) -> Option<&'static str> {
        if self.lowerings.len() == 1 {
            return Some(self.lowerings[0].1);
        }
        self.lowerings
            .iter()
            .find(|(key, _)| *key == first)
            .map(|(_, name)| *name)
    }

    /// Concrete result type for a call keyed by its first argument type
    pub fn result_for(&self, first: Type) -> Type {
        match self.result {
            BuiltinResult::Fixed(t) => t,
            BuiltinResult::SameAsArg(_) => first,
        }
    }
}

use Type::{F64, I64, Str};
use TypeCategory as Cat;

static REGISTRY: &[BuiltinDesc] = &[
    BuiltinDesc {
        name: "LEN",
        min_arity: 1,
        max_arity: 1,
        result: BuiltinResult::Fixed(I64),
        args: &[arg(Cat::Str)],
        lowerings: &[(Str, "rt_len")],
    },
    BuiltinDesc {
        name: "MID$",
        min_arity: 2,
        max_arity: 3,
        result: BuiltinResult::Fixed(Str),
        args: &[arg(Cat::Str), arg(Cat::I64), opt(Cat::I64)],
        lowerings: &[(Str, "rt_substr")],
    },
    BuiltinDesc {
        name: "LEFT$",
        min_arity: 2,
        max_arity: 2,
        result: BuiltinResult::Fixed(Str),
        args: &[arg(Cat::Str), arg(Cat::I64)],
        lowerings: &[(Str, "rt_left")],
    },
    BuiltinDesc {
        name: "RIGHT$",
        min_arity: 2,
        max_arity: 2,
        result: BuiltinResult::Fixed(Str),
        args: &[arg(Cat::Str), arg(Cat::I64)],
        lowerings: &[(Str, "rt_right")],
    },
    BuiltinDesc {
        name: "STR$",
        min_arity: 1,
        max_arity: 1,
        result: BuiltinResult::Fixed(Str),
        args: &[arg(Cat::Any)],
        lowerings: &[(I64, "rt_i64_to_str"), (F64, "rt_f64_to_str")],
    },
    BuiltinDesc {
        name: "VAL",
        min_arity: 1,
        max_arity: 1,
        result: BuiltinResult::Fixed(F64),
        args: &[arg(Cat::Str)],
        lowerings: &[(Str, "rt_str_to_f64")],
    },
    BuiltinDesc {
        name: "ABS",
        min_arity: 1,
        max_arity: 1,
        result: BuiltinResult::SameAsArg(0),
        args: &[arg(Cat::Any)],
        lowerings: &[(I64, "rt_abs_i64"), (F64, "rt_abs_f64")],
    },
    BuiltinDesc {
        name: "SQR",
        min_arity: 1,
        max_arity: 1,
        result: BuiltinResult::Fixed(F64),
        args: &[arg(Cat::F64)],
        lowerings: &[(F64, "rt_sqrt")],
    },
    BuiltinDesc {
        name: "SIN",
        min_arity: 1,
        max_arity: 1,
        result: BuiltinResult::Fixed(F64),
        args: &[arg(Cat::F64)],
        lowerings: &[(F64, "rt_sin")],
    },
    BuiltinDesc {
        name: "COS",
        min_arity: 1,
        max_arity: 1,
        result: BuiltinResult::Fixed(F64),
        args: &[arg(Cat::F64)],
        lowerings: &[(F64, "rt_cos")],
    },
    BuiltinDesc {
        name: "INT",
        min_arity: 1,
        max_arity: 1,
        result: BuiltinResult::Fixed(F64),
        args: &[arg(Cat::F64)],
        lowerings: &[(F64, "rt_floor")],
    },
    BuiltinDesc {
        name: "RND",
        min_arity: 0,
        max_arity: 1,
        result: BuiltinResult::Fixed(F64),
        // The classic advisory argument; the lowering drops it.
        args: &[opt(Cat::I64)],
        lowerings: &[(I64, "rt_rand")],
    },
    BuiltinDesc {
        name: "CHR$",
        min_arity: 1,
        max_arity: 1,
        result: BuiltinResult::Fixed(Str),
        args: &[arg(Cat::I64)],
        lowerings: &[(I64, "rt_chr")],
    },
    BuiltinDesc {
        name: "ASC",
        min_arity: 1,
        max_arity: 1,
        result: BuiltinResult::Fixed(I64),
        args: &[arg(Cat::Str)],
        lowerings: &[(Str, "rt_asc")],
    },
    BuiltinDesc {
        name: "INSTR",
        min_arity: 2,
        max_arity: 3,
        result: BuiltinResult::Fixed(I64),
        args: &[arg(Cat::Str), arg(Cat::Str), opt(Cat::I64)],
        lowerings: &[(Str, "rt_str_index")],
    },
];

lazy_static! {
    static ref BY_NAME: HashMap<&'static str, &'static BuiltinDesc> =
        REGISTRY.iter().map(|d| (d.name, d)).collect();
}

/// Every registered builtin, in declaration order
pub fn all_builtins() -> &'static [BuiltinDesc] {
    REGISTRY
}

/// Look up a builtin by name (case-insensitive, canonical names are
/// uppercase)
pub fn lookup(name: &str) -> Option<BuiltinView> {
    let desc = BY_NAME
        .get(name)
        .copied()
        .or_else(|| BY_NAME.get(name.to_uppercase().as_str()).copied())?;
    Some(BuiltinView { desc })
}

/// Read-only view of one entry, consumed by front-end semantic analysis
#[derive(Debug, Clone, Copy)]
pub struct BuiltinView {
    desc: &'static BuiltinDesc,
}

impl BuiltinView {
    /// Canonical name
    pub fn name(&self) -> &'static str {
        self.desc.name
    }

    /// Whether a call with `n` arguments is well-formed
    pub fn accepts_arity(&self, n: usize) -> bool {
        (self.desc.min_arity..=self.desc.max_arity).contains(&n)
    }

    /// Whether argument `i` may have the given type
    pub fn accepts_arg(&self, i: usize, ty: Type) -> bool {
        self.desc.args.get(i).is_some_and(|spec| spec.cat.admits(ty))
    }

    /// Result type for a call keyed by its first argument type
    pub fn result_for(&self, first: Type) -> Type {
        self.desc.result_for(first)
    }

    /// The extern the lowering stage must emit
    pub fn select_extern(&self, first: Type) -> Option<&'static str> {
        self.desc.select_extern(first)
    }

    /// The underlying descriptor
    pub fn descriptor(&self) -> &'static BuiltinDesc {
        self.desc
    }
}

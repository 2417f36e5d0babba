//! The optimization pipeline: pass manager and passes.
//!
//! Every pass mutates the module in place and reports statistics. After any
//! pass the module must still verify, and the default pipeline is
//! idempotent at a fixed point: running it twice prints byte-identically.

pub mod constfold;
pub mod dce;
pub mod mem2reg;
pub mod peephole;
pub mod simplifycfg;

use std::collections::BTreeMap;
use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::il::function::Function;
use crate::il::instr::Instr;
use crate::il::module::Module;
use crate::il::opcodes::Opcode;
use crate::il::value::{TempId, Value};

/// Names of the default pipeline, in order
pub const DEFAULT_PIPELINE: [&str; 4] = ["mem2reg", "constfold", "peephole", "dce"];

/// Statistics reported by one pass run
#[derive(Debug, Clone, Serialize)]
pub struct PassStats {
    /// Pass name
    pub pass: String,
    /// Whether the pass changed the module
    pub changed: bool,
    /// Named counters (e.g. `promoted`, `loads_removed`)
    pub counters: BTreeMap<String, u64>,
}

impl PassStats {
    /// Fresh, all-zero statistics for a pass
    pub fn new(pass: &str) -> Self {
        PassStats {
            pass: pass.to_string(),
            changed: false,
            counters: BTreeMap::new(),
        }
    }

    /// Add to a counter, marking the pass as having changed the module
    pub fn bump(&mut self, key: &str, n: u64) {
        if n > 0 {
            self.changed = true;
        }
        *self.counters.entry(key.to_string()).or_insert(0) += n;
    }

    /// Read a counter
    pub fn get(&self, key: &str) -> u64 {
        self.counters.get(key).copied().unwrap_or(0)
    }
}

/// A module-to-module transformation
pub trait Pass {
    /// Pipeline name of the pass
    fn name(&self) -> &'static str;

    /// Transform the module in place
    fn run(&mut self, module: &mut Module) -> Result<PassStats>;
}

/// Instantiate a pass by pipeline name
pub fn create_pass(name: &str) -> Result<Box<dyn Pass>> {
    match name {
        "mem2reg" => Ok(Box::new(mem2reg::Mem2Reg)),
        "simplifycfg" => Ok(Box::new(simplifycfg::SimplifyCfg)),
        "constfold" => Ok(Box::new(constfold::ConstFold)),
        "peephole" => Ok(Box::new(peephole::Peephole)),
        "dce" => Ok(Box::new(dce::Dce)),
        other => Err(Error::build(format!("unknown pass '{other}'"))),
    }
}

/// Runs a named list of passes in order
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
    verify_each: bool,
}

impl PassManager {
    /// Build a manager from pass names
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<PassManager> {
        let mut passes = Vec::with_capacity(names.len());
        for n in names {
            passes.push(create_pass(n.as_ref())?);
        }
        Ok(PassManager {
            passes,
            verify_each: false,
        })
    }

    /// The default pipeline: `mem2reg, constfold, peephole, dce`
    pub fn default_pipeline() -> PassManager {
        Self::from_names(&DEFAULT_PIPELINE).expect("default pipeline is well-formed")
    }

    /// Verify the module after every pass, aborting on a violation
    pub fn with_verify_each(mut self, on: bool) -> PassManager {
        self.verify_each = on;
        self
    }

    /// Run all passes, collecting per-pass statistics
    pub fn run(&mut self, module: &mut Module) -> Result<Vec<PassStats>> {
        let mut all = Vec::with_capacity(self.passes.len());
        for pass in &mut self.passes {
            let stats = pass.run(module)?;
            debug!(pass = pass.name(), changed = stats.changed, "pass finished");
            if self.verify_each {
                let report = crate::verify::verify_module(module);
                if !report.is_ok() {
                    return Err(Error::internal(format!(
                        "module broken after pass '{}': {} verifier error(s)",
                        pass.name(),
                        report.errors.len()
                    )));
                }
            }
            all.push(stats);
        }
        Ok(all)
    }
}

// ---- shared rewriting helpers ----------------------------------------------

/// Resolve a value through a substitution map, following chains
pub(crate) fn resolve_value(subst: &HashMap<TempId, Value>, mut v: Value) -> Value {
    let mut hops = 0;
    while let Value::Temp(t) = v {
        match subst.get(&t) {
            Some(next) => {
                v = *next;
                hops += 1;
                // A substitution cycle would be a pass bug; stop following.
                if hops > subst.len() {
                    break;
                }
            }
            None => break,
        }
    }
    v
}

/// Apply a substitution to every operand, branch argument, condition, and
/// return value in a function.
pub(crate) fn apply_substitution(f: &mut Function, subst: &HashMap<TempId, Value>) {
    if subst.is_empty() {
        return;
    }
    for_each_value_mut(f, &mut |v| {
        *v = resolve_value(subst, *v);
    });
}

/// Visit every value position of a function mutably
pub(crate) fn for_each_value_mut(f: &mut Function, visit: &mut dyn FnMut(&mut Value)) {
    use crate::il::block::Terminator;
    for b in &mut f.blocks {
        for i in &mut b.instrs {
            for v in &mut i.operands {
                visit(v);
            }
        }
        match &mut b.term {
            Some(Terminator::Br { args, .. }) => {
                for v in args {
                    visit(v);
                }
            }
            Some(Terminator::CBr {
                cond,
                then_args,
                else_args,
                ..
            }) => {
                visit(cond);
                for v in then_args {
                    visit(v);
                }
                for v in else_args {
                    visit(v);
                }
            }
            Some(Terminator::Ret(Some(v))) => visit(v),
            _ => {}
        }
    }
}

/// Whether an instruction is observable: table flag, with `call` resolved
/// through the callee's advisory attributes (`pure readonly` defined
/// functions are eliminable).
pub(crate) fn instr_observable(m: &Module, i: &Instr) -> bool {
    if i.opcode != Opcode::Call {
        return i.opcode.side_effects();
    }
    match i.callee.and_then(|c| m.function_by_symbol(c)) {
        Some(callee) => !(callee.attrs.is_pure && callee.attrs.readonly),
        // Extern calls reach the host; always observable.
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_pass_rejected() {
        assert!(create_pass("loopvectorize").is_err());
        assert!(PassManager::from_names(&["mem2reg", "nope"]).is_err());
    }

    #[test]
    fn test_resolve_follows_chains() {
        let mut subst = HashMap::new();
        subst.insert(TempId(0), Value::Temp(TempId(1)));
        subst.insert(TempId(1), Value::ConstInt(7));
        assert_eq!(
            resolve_value(&subst, Value::Temp(TempId(0))),
            Value::ConstInt(7)
        );
        assert_eq!(
            resolve_value(&subst, Value::ConstInt(3)),
            Value::ConstInt(3)
        );
    }

    #[test]
    fn test_stats_counters() {
        let mut s = PassStats::new("dce");
        assert!(!s.changed);
        s.bump("instrs_removed", 0);
        assert!(!s.changed);
        s.bump("instrs_removed", 2);
        assert!(s.changed);
        assert_eq!(s.get("instrs_removed"), 2);
    }
}

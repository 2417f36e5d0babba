//! Block-parameter canonicalization.
//!
//! Drops every block parameter whose incoming arguments all carry the same
//! value (self-references excluded), replacing its uses with that value and
//! shrinking every incoming argument vector to match. Parameters keep their
//! insertion order, so structurally equivalent blocks converge on a single
//! signature and every surviving parameter has exactly one defining
//! incoming value per predecessor edge.

use std::collections::HashMap;

use crate::error::Result;
use crate::il::block::Terminator;
use crate::il::function::Function;
use crate::il::module::Module;
use crate::il::value::{BlockId, TempId, Value};
use crate::opt::{apply_substitution, Pass, PassStats};

/// The `simplifycfg` pass
pub struct SimplifyCfg;

impl Pass for SimplifyCfg {
    fn name(&self) -> &'static str {
        "simplifycfg"
    }

    fn run(&mut self, module: &mut Module) -> Result<PassStats> {
        let mut stats = PassStats::new(self.name());
        for f in &mut module.functions {
            canonicalize(f, &mut stats);
        }
        Ok(stats)
    }
}

fn canonicalize(f: &mut Function, stats: &mut PassStats) {
    // Each removal can make further parameters redundant; iterate until a
    // full sweep changes nothing.
    loop {
        let Some((block, index, replacement)) = find_redundant_param(f) else {
            break;
        };
        let param = f.block(block).params[index].temp;

        // Drop the parameter and the matching argument on every incoming
        // edge, then rewrite the parameter's uses.
        f.block_mut(block).params.remove(index);
        for b in &mut f.blocks {
            if let Some(term) = &mut b.term {
                strip_edge_arg(term, block, index);
            }
        }
        let mut subst: HashMap<TempId, Value> = HashMap::new();
        subst.insert(param, replacement);
        apply_substitution(f, &subst);
        stats.bump("params_removed", 1);
    }
}

/// Find one parameter whose every non-self incoming argument is the same
/// value, returning the value to replace it with.
fn find_redundant_param(f: &Function) -> Option<(BlockId, usize, Value)> {
    // Gather incoming argument vectors per block.
    let mut incoming: Vec<Vec<Vec<Value>>> = vec![Vec::new(); f.blocks.len()];
    for b in &f.blocks {
        if let Some(term) = &b.term {
            for (succ, args) in term.successors() {
                incoming[succ.index()].push(args.to_vec());
            }
        }
    }

    for (bi, b) in f.blocks.iter().enumerate() {
        if bi == 0 || incoming[bi].is_empty() {
            continue;
        }
        for (pi, p) in b.params.iter().enumerate() {
            let mut unique: Option<Value> = None;
            let mut consistent = true;
            for args in &incoming[bi] {
                let Some(arg) = args.get(pi) else {
                    consistent = false;
                    break;
                };
                // A parameter fed by itself on a back edge adds nothing.
                if *arg == Value::Temp(p.temp) {
                    continue;
                }
                match unique {
                    None => unique = Some(*arg),
                    Some(seen) if seen == *arg => {}
                    Some(_) => {
                        consistent = false;
                        break;
                    }
                }
            }
            if consistent {
                if let Some(v) = unique {
                    return Some((BlockId(bi as u32), pi, v));
                }
            }
        }
    }
    None
}

fn strip_edge_arg(term: &mut Terminator, target: BlockId, index: usize) {
    match term {
        Terminator::Br { target: t, args } => {
            if *t == target && index < args.len() {
                args.remove(index);
            }
        }
        Terminator::CBr {
            then_target,
            then_args,
            else_target,
            else_args,
            ..
        } => {
            if *then_target == target && index < then_args.len() {
                then_args.remove(index);
            }
            if *else_target == target && index < else_args.len() {
                else_args.remove(index);
            }
        }
        Terminator::Ret(_) | Terminator::Trap => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::{parse_module, print_module};
    use crate::verify::verify_module;

    fn run(src: &str) -> (Module, PassStats) {
        let mut m = parse_module("test.il", src).unwrap();
        assert!(verify_module(&m).is_ok());
        let mut pass = SimplifyCfg;
        let stats = pass.run(&mut m).unwrap();
        let report = verify_module(&m);
        assert!(report.is_ok(), "broken after simplifycfg: {:?}", report.errors);
        (m, stats)
    }

    #[test]
    fn test_identical_arguments_collapse_to_no_params() {
        let (m, stats) = run(
            "\
func @f(%c: i1) -> i64 {
entry:
  %a = add 1, 2
  %b = add 3, 4
  cbr %c, left, right
left:
  br join(%a, %b)
right:
  br join(%a, %b)
join(%x: i64, %y: i64):
  %s = add %x, %y
  ret %s
}
",
        );
        assert_eq!(stats.get("params_removed"), 2);
        let text = print_module(&m);
        assert!(text.contains("join:"), "got:\n{text}");
        assert!(text.contains("br join\n"), "got:\n{text}");
        assert!(text.contains("%s = add %a, %b"), "got:\n{text}");
    }

    #[test]
    fn test_distinct_arguments_survive() {
        let (m, stats) = run(
            "\
func @f(%c: i1) -> i64 {
entry:
  cbr %c, left, right
left:
  br join(1)
right:
  br join(2)
join(%x: i64):
  ret %x
}
",
        );
        assert_eq!(stats.get("params_removed"), 0);
        assert!(print_module(&m).contains("join(%x: i64):"));
    }

    #[test]
    fn test_self_feeding_loop_param_drops() {
        // %v never changes around the loop, so the parameter is redundant.
        let (m, stats) = run(
            "\
func @f(%n: i64) -> i64 {
entry:
  br head(%n, 0)
head(%v: i64, %i: i64):
  %c = icmp_slt %i, 10
  %i2 = add %i, 1
  cbr %c, head(%v, %i2), out
out:
  ret %v
}
",
        );
        assert_eq!(stats.get("params_removed"), 1);
        let text = print_module(&m);
        assert!(text.contains("head(%i: i64):"), "got:\n{text}");
        assert!(text.contains("ret %n"), "got:\n{text}");
    }

    #[test]
    fn test_single_predecessor_param_inlined() {
        let (m, stats) = run(
            "\
func @f() -> i64 {
entry:
  %a = add 20, 22
  br next(%a)
next(%v: i64):
  ret %v
}
",
        );
        assert_eq!(stats.get("params_removed"), 1);
        let text = print_module(&m);
        assert!(text.contains("next:"), "got:\n{text}");
        assert!(text.contains("ret %a"), "got:\n{text}");
    }
}

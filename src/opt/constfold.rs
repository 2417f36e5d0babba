//! Constant folding.
//!
//! Evaluates instructions whose operands are all constants: arithmetic,
//! comparisons, logical operations, and conversions. Trap-generating
//! operations are never folded away: a division or remainder with a
//! constant zero divisor (or `INT64_MIN / -1`) survives verbatim so the
//! trap still occurs if reached. Float evaluation is the platform's
//! IEEE-754 round-to-nearest-even, matching the VM exactly.

use std::collections::{HashMap, HashSet};

use crate::analysis::{Cfg, DomTree};
use crate::error::Result;
use crate::il::block::Terminator;
use crate::il::module::Module;
use crate::il::opcodes::Opcode;
use crate::il::value::{TempId, Value};
use crate::opt::{apply_substitution, resolve_value, Pass, PassStats};

/// The `constfold` pass
pub struct ConstFold;

impl Pass for ConstFold {
    fn name(&self) -> &'static str {
        "constfold"
    }

    fn run(&mut self, module: &mut Module) -> Result<PassStats> {
        let mut stats = PassStats::new(self.name());
        for f in &mut module.functions {
            fold_function(f, &mut stats);
        }
        Ok(stats)
    }
}

fn fold_function(f: &mut crate::il::function::Function, stats: &mut PassStats) {
    let cfg = Cfg::build(f);
    let dom = DomTree::build(&cfg);

    let mut subst: HashMap<TempId, Value> = HashMap::new();
    let mut deleted: HashSet<(usize, usize)> = HashSet::new();
    let mut folded = 0u64;

    // Walk reachable blocks in reverse postorder so operand substitutions
    // are always recorded before their uses are seen.
    for &bi in &dom.rpo {
        let b = f.block(bi);
        for (ii, i) in b.instrs.iter().enumerate() {
            let Some(dest) = i.dest else { continue };
            let ops: Vec<Value> = i
                .operands
                .iter()
                .map(|v| resolve_value(&subst, *v))
                .collect();
            if !ops.iter().all(|v| v.is_const()) {
                continue;
            }
            if let Some(result) = eval(i.opcode, i.ty, &ops) {
                subst.insert(dest, result);
                deleted.insert((bi.index(), ii));
                folded += 1;
            }
        }
    }

    // A conditional branch on a constant becomes unconditional.
    let mut branches_folded = 0u64;
    for b in &mut f.blocks {
        let Some(Terminator::CBr {
            cond,
            then_target,
            then_args,
            else_target,
            else_args,
        }) = &b.term
        else {
            continue;
        };
        let cond = resolve_value(&subst, *cond);
        if let Some(v) = cond.as_const_int() {
            let (target, args) = if v != 0 {
                (*then_target, then_args.clone())
            } else {
                (*else_target, else_args.clone())
            };
            b.term = Some(Terminator::Br { target, args });
            branches_folded += 1;
        }
    }

    apply_substitution(f, &subst);
    for (bi, b) in f.blocks.iter_mut().enumerate() {
        let mut ii = 0usize;
        b.instrs.retain(|_| {
            let keep = !deleted.contains(&(bi, ii));
            ii += 1;
            keep
        });
    }

    stats.bump("folded", folded);
    stats.bump("branches_folded", branches_folded);
}

/// Evaluate one opcode over constant operands. `None` means "do not fold"
/// (unfoldable opcode, or folding would erase a trap).
fn eval(op: Opcode, ty: crate::il::types::Type, ops: &[Value]) -> Option<Value> {
    use Opcode::*;

    let int = |v: &Value| v.as_const_int();
    let float = |v: &Value| v.as_const_float();

    match op {
        Add => Some(Value::ConstInt(int(&ops[0])?.wrapping_add(int(&ops[1])?))),
        Sub => Some(Value::ConstInt(int(&ops[0])?.wrapping_sub(int(&ops[1])?))),
        Mul => Some(Value::ConstInt(int(&ops[0])?.wrapping_mul(int(&ops[1])?))),
        SDiv | SRem => {
            let (a, b) = (int(&ops[0])?, int(&ops[1])?);
            if b == 0 || (a == i64::MIN && b == -1) {
                return None; // preserve the trap
            }
            Some(Value::ConstInt(if op == SDiv { a / b } else { a % b }))
        }
        UDiv | URem => {
            let (a, b) = (int(&ops[0])? as u64, int(&ops[1])? as u64);
            if b == 0 {
                return None; // preserve the trap
            }
            let r = if op == UDiv { a / b } else { a % b };
            Some(Value::ConstInt(r as i64))
        }
        And => Some(Value::ConstInt(int(&ops[0])? & int(&ops[1])?)),
        Or => Some(Value::ConstInt(int(&ops[0])? | int(&ops[1])?)),
        Xor => Some(Value::ConstInt(int(&ops[0])? ^ int(&ops[1])?)),
        Not => Some(Value::ConstInt(1 - (int(&ops[0])? & 1))),
        Shl => Some(Value::ConstInt(
            int(&ops[0])?.wrapping_shl((int(&ops[1])? & 63) as u32),
        )),
        LShr => Some(Value::ConstInt(
            ((int(&ops[0])? as u64).wrapping_shr((int(&ops[1])? & 63) as u32)) as i64,
        )),
        AShr => Some(Value::ConstInt(
            int(&ops[0])?.wrapping_shr((int(&ops[1])? & 63) as u32),
        )),

        ICmpEq => cmp_int(ops, |a, b| a == b),
        ICmpNe => cmp_int(ops, |a, b| a != b),
        ICmpSlt => cmp_int(ops, |a, b| a < b),
        ICmpSle => cmp_int(ops, |a, b| a <= b),
        ICmpSgt => cmp_int(ops, |a, b| a > b),
        ICmpSge => cmp_int(ops, |a, b| a >= b),

        FAdd => Some(Value::ConstFloat(float(&ops[0])? + float(&ops[1])?)),
        FSub => Some(Value::ConstFloat(float(&ops[0])? - float(&ops[1])?)),
        FMul => Some(Value::ConstFloat(float(&ops[0])? * float(&ops[1])?)),
        FDiv => Some(Value::ConstFloat(float(&ops[0])? / float(&ops[1])?)),

        FCmpEq => cmp_float(ops, |a, b| a == b),
        FCmpNe => cmp_float(ops, |a, b| a != b),
        FCmpLt => cmp_float(ops, |a, b| a < b),
        FCmpLe => cmp_float(ops, |a, b| a <= b),
        FCmpGt => cmp_float(ops, |a, b| a > b),
        FCmpGe => cmp_float(ops, |a, b| a >= b),

        Sext => Some(Value::ConstInt(if int(&ops[0])? & 1 != 0 { -1 } else { 0 })),
        Zext => Some(Value::ConstInt(int(&ops[0])? & 1)),
        Trunc => Some(Value::ConstInt(int(&ops[0])? & 1)),
        Sitofp => Some(Value::ConstFloat(int(&ops[0])? as f64)),
        Fptosi => Some(Value::ConstInt(float(&ops[0])? as i64)),
        Bitcast => match (ty, &ops[0]) {
            (crate::il::types::Type::F64, Value::ConstInt(v)) => {
                Some(Value::ConstFloat(f64::from_bits(*v as u64)))
            }
            (crate::il::types::Type::I64, Value::ConstFloat(v)) => {
                Some(Value::ConstInt(v.to_bits() as i64))
            }
            _ => None,
        },

        // Memory, calls, and terminators are never folded.
        Alloca | Load | Store | Call | Br | CBr | Ret | Trap => None,
    }
}

fn cmp_int(ops: &[Value], f: impl Fn(i64, i64) -> bool) -> Option<Value> {
    let (a, b) = (ops[0].as_const_int()?, ops[1].as_const_int()?);
    Some(Value::ConstInt(i64::from(f(a, b))))
}

fn cmp_float(ops: &[Value], f: impl Fn(f64, f64) -> bool) -> Option<Value> {
    let (a, b) = (ops[0].as_const_float()?, ops[1].as_const_float()?);
    Some(Value::ConstInt(i64::from(f(a, b))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::{parse_module, print_module};
    use crate::verify::verify_module;

    fn run(src: &str) -> (Module, PassStats) {
        let mut m = parse_module("test.il", src).unwrap();
        assert!(verify_module(&m).is_ok());
        let mut pass = ConstFold;
        let stats = pass.run(&mut m).unwrap();
        let report = verify_module(&m);
        assert!(report.is_ok(), "broken after constfold: {:?}", report.errors);
        (m, stats)
    }

    #[test]
    fn test_folds_arithmetic_chain() {
        let (m, stats) = run(
            "func @f() -> i64 {\nentry:\n  %a = add 1, 2\n  %b = mul %a, 3\n  ret %b\n}\n",
        );
        assert_eq!(stats.get("folded"), 2);
        assert!(print_module(&m).contains("ret 9"));
    }

    #[test]
    fn test_divide_by_zero_survives_verbatim() {
        let src = "func @f() -> i64 {\nentry:\n  %a = sdiv 5, 0\n  ret %a\n}\n";
        let (m, stats) = run(src);
        assert_eq!(stats.get("folded"), 0);
        assert_eq!(print_module(&m), src);
    }

    #[test]
    fn test_int_min_overflow_survives() {
        let src = format!(
            "func @f() -> i64 {{\nentry:\n  %a = sdiv {}, -1\n  ret %a\n}}\n",
            i64::MIN
        );
        let (m, stats) = run(&src);
        assert_eq!(stats.get("folded"), 0);
        assert!(print_module(&m).contains("sdiv"));
    }

    #[test]
    fn test_float_and_compare_folding() {
        let (m, _) = run(
            "\
func @f() -> i64 {
entry:
  %x = fadd 1.5, 2.5
  %c = fcmp_lt %x, 10.0
  %r = zext %c
  ret %r
}
",
        );
        assert!(print_module(&m).contains("ret 1"));
    }

    #[test]
    fn test_constant_cbr_becomes_br() {
        let (m, stats) = run(
            "\
func @f() -> i64 {
entry:
  %c = icmp_slt 1, 2
  cbr %c, yes, no
yes:
  ret 1
no:
  ret 0
}
",
        );
        assert_eq!(stats.get("branches_folded"), 1);
        assert!(print_module(&m).contains("br yes"));
    }

    #[test]
    fn test_division_by_nonzero_constant_folds() {
        let (m, stats) = run(
            "func @f() -> i64 {\nentry:\n  %a = sdiv 42, 6\n  ret %a\n}\n",
        );
        assert_eq!(stats.get("folded"), 1);
        assert!(print_module(&m).contains("ret 7"));
    }
}

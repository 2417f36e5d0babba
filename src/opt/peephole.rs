//! Local strength rewrites.
//!
//! The rule set: `x+0 -> x`, `x*1 -> x`, `x*0 -> 0`, `x-x -> 0`, double
//! `not` elimination, redundant extend/truncate pairs, `cbr c, L, L -> br
//! L`, and collapsing chains of unconditional branches through empty
//! forwarding blocks into a single edge (rewriting the forwarded block's
//! parameters into the argument vector).

use std::collections::{HashMap, HashSet};

use crate::analysis::{Cfg, DomTree};
use crate::error::Result;
use crate::il::block::Terminator;
use crate::il::function::Function;
use crate::il::module::Module;
use crate::il::opcodes::Opcode;
use crate::il::value::{BlockId, TempId, Value};
use crate::opt::{apply_substitution, resolve_value, Pass, PassStats};

/// The `peephole` pass
pub struct Peephole;

impl Pass for Peephole {
    fn name(&self) -> &'static str {
        "peephole"
    }

    fn run(&mut self, module: &mut Module) -> Result<PassStats> {
        let mut stats = PassStats::new(self.name());
        for f in &mut module.functions {
            rewrite_values(f, &mut stats);
            merge_same_target_cbrs(f, &mut stats);
            collapse_branch_chains(f, &mut stats);
        }
        Ok(stats)
    }
}

/// Algebraic identities on instruction results
fn rewrite_values(f: &mut Function, stats: &mut PassStats) {
    let cfg = Cfg::build(f);
    let dom = DomTree::build(&cfg);

    // Producing instruction of each temp, for chain rules.
    let mut producer: HashMap<TempId, (usize, usize)> = HashMap::new();
    for (bi, b) in f.blocks.iter().enumerate() {
        for (ii, i) in b.instrs.iter().enumerate() {
            if let Some(d) = i.dest {
                producer.insert(d, (bi, ii));
            }
        }
    }

    let mut subst: HashMap<TempId, Value> = HashMap::new();
    let mut deleted: HashSet<(usize, usize)> = HashSet::new();
    let mut rewrites = 0u64;

    for &bi in &dom.rpo {
        let b = f.block(bi);
        for (ii, i) in b.instrs.iter().enumerate() {
            let Some(dest) = i.dest else { continue };
            let ops: Vec<Value> = i
                .operands
                .iter()
                .map(|v| resolve_value(&subst, *v))
                .collect();

            let replacement: Option<Value> = match i.opcode {
                Opcode::Add => match (&ops[0], &ops[1]) {
                    (Value::ConstInt(0), x) | (x, Value::ConstInt(0)) => Some(*x),
                    _ => None,
                },
                Opcode::Sub => match (&ops[0], &ops[1]) {
                    (x, Value::ConstInt(0)) => Some(*x),
                    (Value::Temp(a), Value::Temp(b)) if a == b => Some(Value::ConstInt(0)),
                    _ => None,
                },
                Opcode::Mul => match (&ops[0], &ops[1]) {
                    (Value::ConstInt(1), x) | (x, Value::ConstInt(1)) => Some(*x),
                    (Value::ConstInt(0), _) | (_, Value::ConstInt(0)) => {
                        Some(Value::ConstInt(0))
                    }
                    _ => None,
                },
                Opcode::Not => inner_through(&producer, f, &ops[0], Opcode::Not)
                    .map(|v| resolve_value(&subst, v)),
                Opcode::Trunc => inner_through(&producer, f, &ops[0], Opcode::Sext)
                    .or_else(|| inner_through(&producer, f, &ops[0], Opcode::Zext))
                    .map(|v| resolve_value(&subst, v)),
                Opcode::Bitcast => {
                    // bitcast T (bitcast U x) -> x when x already has type T.
                    match bitcast_source(&producer, f, &ops[0]) {
                        Some(inner) if f.value_type(inner) == i.ty => {
                            Some(resolve_value(&subst, inner))
                        }
                        _ => None,
                    }
                }
                _ => None,
            };

            if let Some(v) = replacement {
                subst.insert(dest, v);
                deleted.insert((bi.index(), ii));
                rewrites += 1;
            }
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
    stats.bump("rewrites", rewrites);
}

/// The operand of `v`'s producer when that producer has opcode `op`
fn inner_through(
    producer: &HashMap<TempId, (usize, usize)>,
    f: &Function,
    v: &Value,
    op: Opcode,
) -> Option<Value> {
    let t = v.as_temp()?;
    let (bi, ii) = producer.get(&t)?;
    let instr = &f.blocks[*bi].instrs[*ii];
    (instr.opcode == op).then(|| instr.operands[0])
}

fn bitcast_source(
    producer: &HashMap<TempId, (usize, usize)>,
    f: &Function,
    v: &Value,
) -> Option<Value> {
    inner_through(producer, f, v, Opcode::Bitcast)
}

/// `cbr c, L(args), L(args) -> br L(args)`
fn merge_same_target_cbrs(f: &mut Function, stats: &mut PassStats) {
    let mut merged = 0u64;
    for b in &mut f.blocks {
        let Some(Terminator::CBr {
            then_target,
            then_args,
            else_target,
            else_args,
            ..
        }) = &b.term
        else {
            continue;
        };
        if then_target == else_target && then_args == else_args {
            b.term = Some(Terminator::Br {
                target: *then_target,
                args: then_args.clone(),
            });
            merged += 1;
        }
    }
    stats.bump("cbrs_merged", merged);
}

/// Retarget edges that pass through an empty forwarding block (no
/// instructions, unconditional terminator) directly to the final target,
/// substituting the forwarder's parameters into the argument vector.
fn collapse_branch_chains(f: &mut Function, stats: &mut PassStats) {
    let mut collapsed = 0u64;
    // Bounded sweeps so forwarding cycles cannot spin forever.
    for _ in 0..f.blocks.len() {
        let mut changed = false;

        // Snapshot of forwarders: block -> (params, final target, args).
        let forwarders: HashMap<BlockId, (Vec<TempId>, BlockId, Vec<Value>)> = f
            .blocks
            .iter()
            .enumerate()
            .filter_map(|(bi, b)| {
                if bi == 0 || !b.instrs.is_empty() {
                    return None;
                }
                let Some(Terminator::Br { target, args }) = &b.term else {
                    return None;
                };
                if target.index() == bi {
                    return None; // self-loop
                }
                let params = b.params.iter().map(|p| p.temp).collect();
                Some((BlockId(bi as u32), (params, *target, args.clone())))
            })
            .collect();

        if forwarders.is_empty() {
            break;
        }

        for b in &mut f.blocks {
            let Some(term) = &mut b.term else { continue };
            let mut edges: Vec<(&mut BlockId, &mut Vec<Value>)> = match term {
                Terminator::Br { target, args } => vec![(target, args)],
                Terminator::CBr {
                    then_target,
                    then_args,
                    else_target,
                    else_args,
                    ..
                } => vec![(then_target, then_args), (else_target, else_args)],
                _ => Vec::new(),
            };
            for (target, args) in edges.iter_mut() {
                let Some((params, final_target, final_args)) = forwarders.get(&**target) else {
                    continue;
                };
                // Map the forwarder's params to this edge's arguments.
                let map: HashMap<TempId, Value> =
                    params.iter().copied().zip(args.iter().copied()).collect();
                let new_args: Vec<Value> = final_args
                    .iter()
                    .map(|v| match v.as_temp().and_then(|t| map.get(&t)) {
                        Some(mapped) => *mapped,
                        None => *v,
                    })
                    .collect();
                **target = *final_target;
                **args = new_args;
                changed = true;
                collapsed += 1;
            }
        }

        if !changed {
            break;
        }
    }
    stats.bump("branches_collapsed", collapsed);
}

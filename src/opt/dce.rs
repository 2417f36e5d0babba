//! Dead code elimination.
//!
//! Removes instructions with no side effects whose result is unused, and
//! blocks unreachable from the entry. Side-effect classification comes from
//! the opcode table; a call to a function marked `pure readonly` with an
//! unused result is eliminable.

use std::collections::HashSet;

use crate::analysis::Cfg;
use crate::error::Result;
use crate::il::block::Terminator;
use crate::il::module::Module;
use crate::il::value::{BlockId, TempId};
use crate::opt::{instr_observable, Pass, PassStats};

/// The `dce` pass
pub struct Dce;

impl Pass for Dce {
    fn name(&self) -> &'static str {
        "dce"
    }

    fn run(&mut self, module: &mut Module) -> Result<PassStats> {
        let mut stats = PassStats::new(self.name());
        for fi in 0..module.functions.len() {
            let blocks_removed = remove_unreachable_blocks(&mut module.functions[fi]);
            let instrs_removed = remove_dead_instrs(module, fi);
            stats.bump("blocks_removed", blocks_removed);
            stats.bump("instrs_removed", instrs_removed);
        }
        Ok(stats)
    }
}

fn remove_unreachable_blocks(f: &mut crate::il::function::Function) -> u64 {
    let cfg = Cfg::build(f);
    let reachable = cfg.reachable();
    if reachable.iter().all(|r| *r) {
        return 0;
    }

    // Compact the block list and remap branch targets. No reachable block
    // can branch to a dropped one, so every remap hit is valid.
    let mut remap: Vec<Option<BlockId>> = vec![None; f.blocks.len()];
    let mut next = 0u32;
    for (i, r) in reachable.iter().enumerate() {
        if *r {
            remap[i] = Some(BlockId(next));
            next += 1;
        }
    }
    let removed = (f.blocks.len() - next as usize) as u64;

    let mut keep_iter = reachable.iter();
    f.blocks.retain(|_| *keep_iter.next().unwrap());
    for b in &mut f.blocks {
        match &mut b.term {
            Some(Terminator::Br { target, .. }) => {
                *target = remap[target.index()].expect("dangling branch target");
            }
            Some(Terminator::CBr {
                then_target,
                else_target,
                ..
            }) => {
                *then_target = remap[then_target.index()].expect("dangling branch target");
                *else_target = remap[else_target.index()].expect("dangling branch target");
            }
            _ => {}
        }
    }
    removed
}

fn remove_dead_instrs(module: &mut Module, fi: usize) -> u64 {
    let f = &module.functions[fi];

    // A temp is live when something observable consumes it, directly or
    // transitively. Terminator uses (branch args, conditions, returns) are
    // always live roots.
    let mut live: HashSet<TempId> = HashSet::new();
    for b in &f.blocks {
        if let Some(term) = &b.term {
            live.extend(term.used_temps());
        }
        for i in &b.instrs {
            if instr_observable(module, i) {
                live.extend(i.used_temps());
                if let Some(d) = i.dest {
                    live.insert(d);
                }
            }
        }
    }
    loop {
        let before = live.len();
        for b in &f.blocks {
            for i in &b.instrs {
                if i.dest.is_some_and(|d| live.contains(&d)) {
                    live.extend(i.used_temps());
                }
            }
        }
        if live.len() == before {
            break;
        }
    }

    let observable: Vec<Vec<bool>> = f
        .blocks
        .iter()
        .map(|b| b.instrs.iter().map(|i| instr_observable(module, i)).collect())
        .collect();

    let mut removed = 0u64;
    let f = &mut module.functions[fi];
    for (bi, b) in f.blocks.iter_mut().enumerate() {
        let before = b.instrs.len();
        let mut ii = 0usize;
        b.instrs.retain(|i| {
            let keep = observable[bi][ii] || i.dest.is_some_and(|d| live.contains(&d));
            ii += 1;
            keep
        });
        removed += (before - b.instrs.len()) as u64;
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::{parse_module, print_module};
    use crate::verify::verify_module;

    fn run(src: &str) -> (Module, PassStats) {
        let mut m = parse_module("test.il", src).unwrap();
        assert!(verify_module(&m).is_ok());
        let mut pass = Dce;
        let stats = pass.run(&mut m).unwrap();
        let report = verify_module(&m);
        assert!(report.is_ok(), "broken after dce: {:?}", report.errors);
        (m, stats)
    }

    #[test]
    fn test_unused_pure_instr_removed() {
        let (m, stats) = run(
            "\
func @f() -> i64 {
entry:
  %dead = add 1, 2
  %live = add 3, 4
  ret %live
}
",
        );
        assert_eq!(stats.get("instrs_removed"), 1);
        assert!(!print_module(&m).contains("%dead"));
    }

    #[test]
    fn test_transitively_dead_chain_removed() {
        let (m, stats) = run(
            "\
func @f() -> void {
entry:
  %a = add 1, 2
  %b = mul %a, 3
  %c = add %b, %a
  ret
}
",
        );
        assert_eq!(stats.get("instrs_removed"), 3);
        let _ = m;
    }

    #[test]
    fn test_stores_and_divides_survive() {
        let (m, stats) = run(
            "\
func @f() -> void {
entry:
  %p = alloca 8
  store i64, %p, 5
  %q = sdiv 1, 0
  ret
}
",
        );
        // The store is observable and the division can trap; only nothing
        // is removable here.
        assert_eq!(stats.get("instrs_removed"), 0);
        let text = print_module(&m);
        assert!(text.contains("store"));
        assert!(text.contains("sdiv"));
    }

    #[test]
    fn test_unreachable_block_removed() {
        let (m, stats) = run(
            "\
func @f() -> i64 {
entry:
  ret 1
island:
  %x = add 1, 2
  ret %x
}
",
        );
        assert_eq!(stats.get("blocks_removed"), 1);
        assert!(!print_module(&m).contains("island"));
    }

    #[test]
    fn test_pure_readonly_call_removed_when_unused() {
        let (m, stats) = run(
            "\
func @pick(%a: i64) -> i64 pure readonly {
entry:
  ret %a
}

func @main() -> i64 {
entry:
  %x = call @pick(7)
  ret 0
}
",
        );
        assert_eq!(stats.get("instrs_removed"), 1);
        assert!(!print_module(&m).contains("call @pick"));
    }

    #[test]
    fn test_extern_call_survives() {
        let (m, stats) = run(
            "\
extern @rt_print_i64(i64) -> void

func @main() -> void {
entry:
  call @rt_print_i64(9)
  ret
}
",
        );
        assert_eq!(stats.get("instrs_removed"), 0);
        assert!(print_module(&m).contains("call @rt_print_i64"));
    }
}

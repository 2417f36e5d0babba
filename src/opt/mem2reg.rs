//! Stack-slot promotion.
//!
//! Promotes `alloca` slots whose address never escapes (every use is a
//! direct `load` or the pointer operand of a `store`, all at one access
//! type) into SSA values. Merge points get fresh block parameters at the
//! iterated dominance frontier of the slot's defining blocks; loads become
//! uses of the reaching value, stores become redefinitions, and the slot
//! disappears.

use std::collections::{HashMap, HashSet};

use crate::analysis::{Cfg, DomTree};
use crate::error::Result;
use crate::il::block::{BlockParam, Terminator};
use crate::il::module::Module;
use crate::il::opcodes::Opcode;
use crate::il::types::Type;
use crate::il::value::{BlockId, TempId, Value};
use crate::opt::{apply_substitution, resolve_value, Pass, PassStats};
use crate::support::interner::Symbol;

/// The `mem2reg` pass
pub struct Mem2Reg;

impl Pass for Mem2Reg {
    fn name(&self) -> &'static str {
        "mem2reg"
    }

    fn run(&mut self, module: &mut Module) -> Result<PassStats> {
        let mut stats = PassStats::new(self.name());
        for fi in 0..module.functions.len() {
            promote_function(module, fi, &mut stats);
        }
        Ok(stats)
    }
}

struct SlotVar {
    ptr: TempId,
    ty: Type,
    name: Option<String>,
    alloca_site: (usize, usize),
    def_blocks: Vec<BlockId>,
}

fn promote_function(module: &mut Module, fi: usize, stats: &mut PassStats) {
    // ---- find promotable slots ---------------------------------------------
    let vars: Vec<SlotVar> = {
        let f = &module.functions[fi];
        let mut sites: HashMap<TempId, (usize, usize)> = HashMap::new();
        for (bi, b) in f.blocks.iter().enumerate() {
            for (ii, i) in b.instrs.iter().enumerate() {
                if i.opcode == Opcode::Alloca {
                    if let (Some(d), Some(size)) = (i.dest, i.operands[0].as_const_int()) {
                        if (1..=8).contains(&size) {
                            sites.insert(d, (bi, ii));
                        }
                    }
                }
            }
        }

        let mut access_ty: HashMap<TempId, Type> = HashMap::new();
        let mut defs: HashMap<TempId, HashSet<u32>> = HashMap::new();
        let mut escaped: HashSet<TempId> = HashSet::new();
        let mut record_ty = |escaped: &mut HashSet<TempId>, p: TempId, ty: Type| {
            match access_ty.get(&p) {
                Some(prev) if *prev != ty => {
                    escaped.insert(p);
                }
                Some(_) => {}
                None => {
                    access_ty.insert(p, ty);
                }
            }
        };
        for (bi, b) in f.blocks.iter().enumerate() {
            for i in &b.instrs {
                match i.opcode {
                    Opcode::Load => {
                        if let Some(p) = i.operands[0].as_temp() {
                            if sites.contains_key(&p) {
                                record_ty(&mut escaped, p, i.ty);
                            }
                        }
                    }
                    Opcode::Store => {
                        if let Some(p) = i.operands[0].as_temp() {
                            if sites.contains_key(&p) {
                                record_ty(&mut escaped, p, i.ty);
                                defs.entry(p).or_default().insert(bi as u32);
                            }
                        }
                        // The slot address stored as a value escapes.
                        if let Some(v) = i.operands[1].as_temp() {
                            if sites.contains_key(&v) {
                                escaped.insert(v);
                            }
                        }
                    }
                    Opcode::Alloca => {}
                    _ => {
                        for v in &i.operands {
                            if let Some(t) = v.as_temp() {
                                if sites.contains_key(&t) {
                                    escaped.insert(t);
                                }
                            }
                        }
                    }
                }
            }
            if let Some(term) = &b.term {
                for t in term.used_temps() {
                    if sites.contains_key(&t) {
                        escaped.insert(t);
                    }
                }
            }
        }

        let mut vars: Vec<SlotVar> = sites
            .iter()
            .filter(|(p, _)| !escaped.contains(p))
            .map(|(p, site)| {
                let mut def_blocks: Vec<BlockId> = defs
                    .get(p)
                    .map(|s| s.iter().map(|b| BlockId(*b)).collect())
                    .unwrap_or_default();
                def_blocks.push(BlockId(site.0 as u32));
                SlotVar {
                    ptr: *p,
                    ty: access_ty.get(p).copied().unwrap_or(Type::I64),
                    name: f.temp_name(*p).map(|s| module.name(s).to_string()),
                    alloca_site: *site,
                    def_blocks,
                }
            })
            .collect();
        vars.sort_by_key(|v| v.alloca_site);
        vars
    };

    if vars.is_empty() {
        return;
    }

    // An empty-string handle backs uninitialized `str` slots; intern it
    // before the function borrow below.
    let needs_empty_str = vars.iter().any(|v| v.ty == Type::Str);
    let empty_str = needs_empty_str.then(|| module.intern_str_literal(""));

    let zero_of = |ty: Type| -> Value {
        match ty {
            Type::I1 => Value::ConstInt(0),
            Type::I64 => Value::ConstInt(0),
            Type::F64 => Value::ConstFloat(0.0),
            Type::Ptr => Value::NullPtr,
            Type::Str => Value::ConstStr(empty_str.expect("empty string interned")),
            Type::Void => Value::ConstInt(0),
        }
    };

    // ---- place block parameters at the iterated dominance frontier ---------
    let (cfg, dom) = {
        let f = &module.functions[fi];
        let cfg = Cfg::build(f);
        let dom = DomTree::build(&cfg);
        (cfg, dom)
    };

    let block_count = module.functions[fi].blocks.len();
    let mut inserted: Vec<Vec<(usize, TempId)>> = vec![Vec::new(); block_count];
    for (vi, var) in vars.iter().enumerate() {
        for b in dom.iterated_frontier(&cfg, &var.def_blocks) {
            if b.index() == 0 {
                continue; // the entry never takes parameters
            }
            let name = var.name.as_deref().unwrap_or("promoted");
            let sym = unique_temp_name(module, fi, name);
            let temp = module.functions[fi].new_temp(var.ty, Some(sym));
            inserted[b.index()].push((vi, temp));
        }
    }

    // ---- rename along the dominator tree -----------------------------------
    let mut subst: HashMap<TempId, Value> = HashMap::new();
    let mut deleted: HashSet<(usize, usize)> = HashSet::new();
    let mut edge_extra: HashMap<(usize, usize), Vec<Value>> = HashMap::new();
    let mut loads_removed = 0u64;
    let mut stores_removed = 0u64;
    let var_of_ptr: HashMap<TempId, usize> =
        vars.iter().enumerate().map(|(i, v)| (v.ptr, i)).collect();

    {
        let f = &module.functions[fi];
        let children = dom.children();
        let init: Vec<Value> = vars.iter().map(|v| zero_of(v.ty)).collect();
        let mut work: Vec<(BlockId, Vec<Value>)> = vec![(BlockId(0), init)];

        while let Some((bi, mut cur)) = work.pop() {
            for (vi, temp) in &inserted[bi.index()] {
                cur[*vi] = Value::Temp(*temp);
            }
            let b = f.block(bi);
            for (ii, i) in b.instrs.iter().enumerate() {
                match i.opcode {
                    Opcode::Alloca => {
                        if let Some(d) = i.dest {
                            if var_of_ptr.contains_key(&d) {
                                deleted.insert((bi.index(), ii));
                            }
                        }
                    }
                    Opcode::Load => {
                        if let Some(vi) =
                            i.operands[0].as_temp().and_then(|p| var_of_ptr.get(&p))
                        {
                            subst.insert(i.dest.expect("load has a dest"), cur[*vi]);
                            deleted.insert((bi.index(), ii));
                            loads_removed += 1;
                        }
                    }
                    Opcode::Store => {
                        if let Some(vi) =
                            i.operands[0].as_temp().and_then(|p| var_of_ptr.get(&p))
                        {
                            cur[*vi] = resolve_value(&subst, i.operands[1]);
                            deleted.insert((bi.index(), ii));
                            stores_removed += 1;
                        }
                    }
                    _ => {}
                }
            }
            if let Some(term) = &b.term {
                for (ei, (succ, _)) in term.successors().iter().enumerate() {
                    let extras: Vec<Value> = inserted[succ.index()]
                        .iter()
                        .map(|(vi, _)| cur[*vi])
                        .collect();
                    if !extras.is_empty() {
                        edge_extra.insert((bi.index(), ei), extras);
                    }
                }
            }
            for child in &children[bi.index()] {
                work.push((*child, cur.clone()));
            }
        }
    }

    // Promoted-slot accesses in unreachable blocks still refer to the dying
    // alloca; drop them and give their loads the zero value. Their branches
    // into blocks that gained parameters also need padding arguments so the
    // module keeps verifying until DCE removes them.
    for (bi, b) in module.functions[fi].blocks.iter().enumerate() {
        if dom.is_reachable(BlockId(bi as u32)) {
            continue;
        }
        if let Some(term) = &b.term {
            for (ei, (succ, _)) in term.successors().iter().enumerate() {
                let extras: Vec<Value> = inserted[succ.index()]
                    .iter()
                    .map(|(vi, _)| zero_of(vars[*vi].ty))
                    .collect();
                if !extras.is_empty() {
                    edge_extra.insert((bi, ei), extras);
                }
            }
        }
        for (ii, i) in b.instrs.iter().enumerate() {
            match i.opcode {
                Opcode::Alloca => {
                    if let Some(d) = i.dest {
                        if var_of_ptr.contains_key(&d) {
                            deleted.insert((bi, ii));
                        }
                    }
                }
                Opcode::Load => {
                    if let Some(vi) = i.operands[0].as_temp().and_then(|p| var_of_ptr.get(&p)) {
                        subst.insert(i.dest.expect("load has a dest"), zero_of(vars[*vi].ty));
                        deleted.insert((bi, ii));
                        loads_removed += 1;
                    }
                }
                Opcode::Store => {
                    if i.operands[0]
                        .as_temp()
                        .is_some_and(|p| var_of_ptr.contains_key(&p))
                    {
                        deleted.insert((bi, ii));
                        stores_removed += 1;
                    }
                }
                _ => {}
            }
        }
    }

    // ---- rewrite the function ----------------------------------------------
    let f = &mut module.functions[fi];
    apply_substitution(f, &subst);
    for (bi, b) in f.blocks.iter_mut().enumerate() {
        for (_, temp) in &inserted[bi] {
            b.params.push(BlockParam { temp: *temp });
        }
        let mut ii = 0usize;
        b.instrs.retain(|_| {
            let keep = !deleted.contains(&(bi, ii));
            ii += 1;
            keep
        });
        if let Some(term) = &mut b.term {
            match term {
                Terminator::Br { args, .. } => {
                    if let Some(extra) = edge_extra.get(&(bi, 0)) {
                        args.extend(extra.iter().copied());
                    }
                }
                Terminator::CBr {
                    then_args,
                    else_args,
                    ..
                } => {
                    if let Some(extra) = edge_extra.get(&(bi, 0)) {
                        then_args.extend(extra.iter().copied());
                    }
                    if let Some(extra) = edge_extra.get(&(bi, 1)) {
                        else_args.extend(extra.iter().copied());
                    }
                }
                Terminator::Ret(_) | Terminator::Trap => {}
            }
        }
    }

    stats.bump("promoted", vars.len() as u64);
    stats.bump("loads_removed", loads_removed);
    stats.bump("stores_removed", stores_removed);
}

/// Pick a temp name not yet used in the function
fn unique_temp_name(module: &mut Module, fi: usize, base: &str) -> Symbol {
    let mut candidate = base.to_string();
    let mut n = 0u32;
    loop {
        let sym = module.interner.intern(&candidate);
        if !module.functions[fi].name_in_use(sym) {
            return sym;
        }
        n += 1;
        candidate = format!("{base}.{n}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::{parse_module, print_module};
    use crate::verify::verify_module;

    fn run_mem2reg(src: &str) -> (Module, PassStats) {
        let mut m = parse_module("test.il", src).unwrap();
        assert!(verify_module(&m).is_ok());
        let mut stats = PassStats::new("mem2reg");
        for fi in 0..m.functions.len() {
            promote_function(&mut m, fi, &mut stats);
        }
        let report = verify_module(&m);
        assert!(report.is_ok(), "broken after mem2reg: {:?}", report.errors);
        (m, stats)
    }

    #[test]
    fn test_straightline_promotion() {
        let (m, stats) = run_mem2reg(
            "\
func @f() -> i64 {
entry:
  %x = alloca 8
  store i64, %x, 41
  %v = load i64, %x
  %t0 = add %v, 1
  ret %t0
}
",
        );
        assert_eq!(stats.get("promoted"), 1);
        assert_eq!(stats.get("loads_removed"), 1);
        assert_eq!(stats.get("stores_removed"), 1);
        let text = print_module(&m);
        assert!(!text.contains("alloca"));
        assert!(!text.contains("load"));
        assert!(!text.contains("store"));
    }

    #[test]
    fn test_diamond_gets_block_param() {
        let (m, stats) = run_mem2reg(
            "\
func @f(%c: i1) -> i64 {
entry:
  %x = alloca 8
  store i64, %x, 0
  cbr %c, yes, no
yes:
  store i64, %x, 1
  br join
no:
  store i64, %x, 2
  br join
join:
  %v = load i64, %x
  ret %v
}
",
        );
        assert_eq!(stats.get("promoted"), 1);
        assert_eq!(stats.get("stores_removed"), 3);
        let text = print_module(&m);
        // The join block now carries the merged value as a parameter.
        assert!(text.contains("join(%x.1: i64):"), "got:\n{text}");
        assert!(text.contains("br join(1)"));
        assert!(text.contains("br join(2)"));
    }

    #[test]
    fn test_escaped_slot_not_promoted() {
        let (m, stats) = run_mem2reg(
            "\
extern @rt_peek(ptr) -> i64

func @f() -> i64 {
entry:
  %x = alloca 8
  store i64, %x, 7
  %v = call @rt_peek(%x)
  ret %v
}
",
        );
        assert_eq!(stats.get("promoted"), 0);
        assert!(print_module(&m).contains("alloca"));
    }

    #[test]
    fn test_uninitialized_load_gets_zero() {
        let (m, stats) = run_mem2reg(
            "\
func @f() -> i64 {
entry:
  %x = alloca 8
  %v = load i64, %x
  ret %v
}
",
        );
        assert_eq!(stats.get("promoted"), 1);
        assert!(print_module(&m).contains("ret 0"));
    }

    #[test]
    fn test_loop_carried_value() {
        let (m, stats) = run_mem2reg(
            "\
func @f(%n: i64) -> i64 {
entry:
  %acc = alloca 8
  store i64, %acc, 0
  br head(0)
head(%i: i64):
  %c = icmp_slt %i, %n
  cbr %c, body, done
body:
  %cur = load i64, %acc
  %next = add %cur, %i
  store i64, %acc, %next
  %i2 = add %i, 1
  br head(%i2)
done:
  %r = load i64, %acc
  ret %r
}
",
        );
        assert_eq!(stats.get("promoted"), 1);
        assert_eq!(stats.get("loads_removed"), 2);
        assert_eq!(stats.get("stores_removed"), 2);
        let text = print_module(&m);
        assert!(!text.contains("alloca"), "got:\n{text}");
        // The loop header merges the accumulator as a second parameter.
        assert!(text.contains("head(%i: i64, %acc.1: i64):"), "got:\n{text}");
    }
}

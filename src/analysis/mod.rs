//! Control-flow analysis: edges, reverse postorder, dominator tree, and
//! dominance frontiers.
//!
//! The dominator construction is the iterative Cooper-Harvey-Kennedy
//! algorithm over reverse postorder; it is shared by the verifier's SSA
//! checks and by `mem2reg`'s block-parameter placement.

use std::collections::HashSet;

use crate::il::function::Function;
use crate::il::value::BlockId;

/// Predecessor/successor lists for a function's blocks
#[derive(Debug, Clone)]
pub struct Cfg {
    /// Predecessors of each block, in edge order
    pub preds: Vec<Vec<BlockId>>,
    /// Successors of each block, in edge order
    pub succs: Vec<Vec<BlockId>>,
}

impl Cfg {
    /// Build the CFG from block terminators. Unterminated blocks (only
    /// possible mid-construction) contribute no edges.
    pub fn build(f: &Function) -> Cfg {
        let n = f.blocks.len();
        let mut preds = vec![Vec::new(); n];
        let mut succs = vec![Vec::new(); n];
        for (i, b) in f.blocks.iter().enumerate() {
            if let Some(term) = &b.term {
                for (succ, _) in term.successors() {
                    succs[i].push(succ);
                    preds[succ.index()].push(BlockId(i as u32));
                }
            }
        }
        Cfg { preds, succs }
    }

    /// Blocks reachable from the entry
    pub fn reachable(&self) -> Vec<bool> {
        let mut seen = vec![false; self.succs.len()];
        if seen.is_empty() {
            return seen;
        }
        let mut stack = vec![BlockId(0)];
        seen[0] = true;
        while let Some(b) = stack.pop() {
            for s in &self.succs[b.index()] {
                if !seen[s.index()] {
                    seen[s.index()] = true;
                    stack.push(*s);
                }
            }
        }
        seen
    }
}

/// Immediate-dominator tree over the reachable blocks
#[derive(Debug, Clone)]
pub struct DomTree {
    /// Immediate dominator of each block; `None` for the entry and for
    /// unreachable blocks
    pub idom: Vec<Option<BlockId>>,
    /// Reachable blocks in reverse postorder (entry first)
    pub rpo: Vec<BlockId>,
    rpo_number: Vec<usize>,
}

const UNREACHED: usize = usize::MAX;

impl DomTree {
    /// Compute dominators for a function's CFG
    pub fn build(cfg: &Cfg) -> DomTree {
        let n = cfg.succs.len();
        let mut rpo = Vec::with_capacity(n);
        let mut rpo_number = vec![UNREACHED; n];
        if n > 0 {
            // Iterative postorder DFS from the entry, then reverse.
            let mut state: Vec<(BlockId, usize)> = vec![(BlockId(0), 0)];
            let mut on_stack = vec![false; n];
            let mut post = Vec::with_capacity(n);
            on_stack[0] = true;
            while let Some((b, child)) = state.last_mut() {
                let succs = &cfg.succs[b.index()];
                if *child < succs.len() {
                    let next = succs[*child];
                    *child += 1;
                    if !on_stack[next.index()] {
                        on_stack[next.index()] = true;
                        state.push((next, 0));
                    }
                } else {
                    post.push(*b);
                    state.pop();
                }
            }
            rpo = post;
            rpo.reverse();
            for (i, b) in rpo.iter().enumerate() {
                rpo_number[b.index()] = i;
            }
        }

        let mut idom: Vec<Option<BlockId>> = vec![None; n];
        if !rpo.is_empty() {
            idom[0] = Some(BlockId(0));
            let mut changed = true;
            while changed {
                changed = false;
                for &b in rpo.iter().skip(1) {
                    let mut new_idom: Option<BlockId> = None;
                    for &p in &cfg.preds[b.index()] {
                        if rpo_number[p.index()] == UNREACHED || idom[p.index()].is_none() {
                            continue;
                        }
                        new_idom = Some(match new_idom {
                            None => p,
                            Some(cur) => intersect(&idom, &rpo_number, p, cur),
                        });
                    }
                    if let Some(nd) = new_idom {
                        if idom[b.index()] != Some(nd) {
                            idom[b.index()] = Some(nd);
                            changed = true;
                        }
                    }
                }
            }
            // The entry's self-idom is a construction convenience only.
            idom[0] = None;
        }

        DomTree {
            idom,
            rpo,
            rpo_number,
        }
    }

    /// True when the block was reached from the entry
    pub fn is_reachable(&self, b: BlockId) -> bool {
        self.rpo_number[b.index()] != UNREACHED
    }

    /// Does `a` dominate `b`? Every block dominates itself. False when
    /// either block is unreachable.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.idom[cur.index()] {
                Some(next) => cur = next,
                None => return false,
            }
        }
    }

    /// Dominance frontier of every block
    pub fn frontiers(&self, cfg: &Cfg) -> Vec<Vec<BlockId>> {
        let n = cfg.succs.len();
        let mut df: Vec<Vec<BlockId>> = vec![Vec::new(); n];
        for &b in &self.rpo {
            if cfg.preds[b.index()].len() < 2 {
                continue;
            }
            let Some(dom) = self.idom[b.index()] else {
                continue;
            };
            for &p in &cfg.preds[b.index()] {
                if !self.is_reachable(p) {
                    continue;
                }
                let mut runner = p;
                while runner != dom {
                    if !df[runner.index()].contains(&b) {
                        df[runner.index()].push(b);
                    }
                    match self.idom[runner.index()] {
                        Some(next) => runner = next,
                        None => break,
                    }
                }
            }
        }
        df
    }

    /// Iterated dominance frontier of a set of defining blocks
    pub fn iterated_frontier(&self, cfg: &Cfg, defs: &[BlockId]) -> Vec<BlockId> {
        let df = self.frontiers(cfg);
        let mut result: HashSet<BlockId> = HashSet::new();
        let mut work: Vec<BlockId> = defs
            .iter()
            .copied()
            .filter(|b| self.is_reachable(*b))
            .collect();
        while let Some(b) = work.pop() {
            for &d in &df[b.index()] {
                if result.insert(d) {
                    work.push(d);
                }
            }
        }
        let mut out: Vec<BlockId> = result.into_iter().collect();
        out.sort_by_key(|b| self.rpo_number[b.index()]);
        out
    }

    /// Dominator-tree children, for preorder walks
    pub fn children(&self) -> Vec<Vec<BlockId>> {
        let mut kids: Vec<Vec<BlockId>> = vec![Vec::new(); self.idom.len()];
        for &b in &self.rpo {
            if let Some(parent) = self.idom[b.index()] {
                kids[parent.index()].push(b);
            }
        }
        kids
    }
}

fn intersect(
    idom: &[Option<BlockId>],
    rpo_number: &[usize],
    mut a: BlockId,
    mut b: BlockId,
) -> BlockId {
    while a != b {
        while rpo_number[a.index()] > rpo_number[b.index()] {
            a = idom[a.index()].unwrap_or(BlockId(0));
        }
        while rpo_number[b.index()] > rpo_number[a.index()] {
            b = idom[b.index()].unwrap_or(BlockId(0));
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::builder::Builder;
    use crate::il::module::Module;
    use crate::il::types::Type;
    use crate::il::value::Value;

    /// Diamond: entry -> (left | right) -> join
    fn diamond() -> Module {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        b.create_function("f", &[("c", Type::I1)], Type::I64).unwrap();
        let entry = b.create_block("entry").unwrap();
        let left = b.create_block("left").unwrap();
        let right = b.create_block("right").unwrap();
        let join = b.create_block("join").unwrap();
        let v = b.add_block_param(join, "v", Type::I64).unwrap();
        b.switch_block(entry).unwrap();
        let c = b.param_values().unwrap()[0];
        b.cbr(c, left, &[], right, &[]).unwrap();
        b.switch_block(left).unwrap();
        b.br(join, &[Value::ConstInt(1)]).unwrap();
        b.switch_block(right).unwrap();
        b.br(join, &[Value::ConstInt(2)]).unwrap();
        b.switch_block(join).unwrap();
        b.ret(Some(v)).unwrap();
        m
    }

    #[test]
    fn test_diamond_dominators() {
        let m = diamond();
        let cfg = Cfg::build(&m.functions[0]);
        let dom = DomTree::build(&cfg);
        let (entry, left, right, join) = (BlockId(0), BlockId(1), BlockId(2), BlockId(3));
        assert_eq!(dom.idom[join.index()], Some(entry));
        assert_eq!(dom.idom[left.index()], Some(entry));
        assert!(dom.dominates(entry, join));
        assert!(!dom.dominates(left, join));
        assert!(dom.dominates(right, right));
    }

    #[test]
    fn test_diamond_frontiers() {
        let m = diamond();
        let cfg = Cfg::build(&m.functions[0]);
        let dom = DomTree::build(&cfg);
        let df = dom.frontiers(&cfg);
        let (left, right, join) = (BlockId(1), BlockId(2), BlockId(3));
        assert_eq!(df[left.index()], vec![join]);
        assert_eq!(df[right.index()], vec![join]);
        assert!(df[join.index()].is_empty());

        let idf = dom.iterated_frontier(&cfg, &[left]);
        assert_eq!(idf, vec![join]);
    }

    #[test]
    fn test_unreachable_block() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        b.create_function("f", &[], Type::Void).unwrap();
        let entry = b.create_block("entry").unwrap();
        let orphan = b.create_block("orphan").unwrap();
        b.switch_block(entry).unwrap();
        b.ret(None).unwrap();
        b.switch_block(orphan).unwrap();
        b.ret(None).unwrap();

        let cfg = Cfg::build(&m.functions[0]);
        let dom = DomTree::build(&cfg);
        assert!(dom.is_reachable(entry));
        assert!(!dom.is_reachable(orphan));
        assert!(!dom.dominates(entry, orphan));
        assert_eq!(cfg.reachable(), vec![true, false]);
    }
}

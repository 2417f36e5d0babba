//! Table-driven structural verifier.
//!
//! Checks are driven by the opcode metadata table; bespoke code is reserved
//! for semantics the category system cannot express (call signatures,
//! branch/parameter agreement, SSA dominance). The verifier accumulates
//! every diagnostic it finds in one pass rather than stopping at the first.

use serde::Serialize;

use crate::analysis::{Cfg, DomTree};
use crate::error::{Error, Result};
use crate::il::block::Terminator;
use crate::il::function::Function;
use crate::il::instr::Instr;
use crate::il::module::Module;
use crate::il::opcodes::{Opcode, TypeCategory};
use crate::il::types::Type;
use crate::il::value::{BlockId, TempId, Value};
use crate::support::source::SourceLoc;

/// One verifier finding
#[derive(Debug, Clone, Serialize)]
pub struct VerifyDiag {
    /// Function the finding is in, when applicable
    pub func: Option<String>,
    /// Block label, when applicable
    pub block: Option<String>,
    /// Instruction index within the block, when applicable
    pub ip: Option<usize>,
    /// What is wrong
    pub message: String,
    /// Source location, when known
    pub loc: SourceLoc,
}

impl std::fmt::Display for VerifyDiag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.func, &self.block, self.ip) {
            (Some(fun), Some(blk), Some(ip)) => {
                write!(f, "@{fun}/{blk}#{ip}: {}", self.message)
            }
            (Some(fun), Some(blk), None) => write!(f, "@{fun}/{blk}: {}", self.message),
            (Some(fun), None, None) => write!(f, "@{fun}: {}", self.message),
            _ => write!(f, "{}", self.message),
        }
    }
}

/// Read-only verification report tied to the module it was produced from
#[derive(Debug, Default, Clone, Serialize)]
pub struct VerifyReport {
    /// Violations that make the module unusable
    pub errors: Vec<VerifyDiag>,
    /// Suspicious but non-fatal findings
    pub warnings: Vec<VerifyDiag>,
}

impl VerifyReport {
    /// True when no errors were found
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Convert to a `Result`, keeping the report on the error path's side
    pub fn into_result(self) -> Result<VerifyReport> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(Error::Verify {
                count: self.errors.len(),
            })
        }
    }
}

/// Verify a whole module, accumulating every diagnostic
pub fn verify_module(m: &Module) -> VerifyReport {
    let mut v = Verifier {
        module: m,
        report: VerifyReport::default(),
    };
    v.run();
    v.report
}

struct Verifier<'m> {
    module: &'m Module,
    report: VerifyReport,
}

#[derive(Clone)]
struct DefSite {
    block: BlockId,
    /// Index within the block; params define at 0, instruction `i` defines
    /// at `i + 1`, so "defined before use" is a plain index compare.
    pos: usize,
}

impl<'m> Verifier<'m> {
    fn run(&mut self) {
        self.check_externs();
        for f in &self.module.functions {
            self.check_function(f);
        }
    }

    fn error(&mut self, f: Option<&Function>, block: Option<Symbol>, ip: Option<usize>, loc: SourceLoc, message: String) {
        self.report.errors.push(VerifyDiag {
            func: f.map(|f| self.module.name(f.name).to_string()),
            block: block.map(|b| self.module.name(b).to_string()),
            ip,
            message,
            loc,
        });
    }

    fn warn(&mut self, message: String) {
        self.report.warnings.push(VerifyDiag {
            func: None,
            block: None,
            ip: None,
            message,
            loc: SourceLoc::UNKNOWN,
        });
    }

    // Extern declarations must agree with the VM host table when the name
    // is a known host routine.
    fn check_externs(&mut self) {
        for e in &self.module.externs {
            let name = self.module.name(e.name).to_string();
            match crate::vm::host::host_signature(&name) {
                Some((params, ret)) => {
                    if params != e.params.as_slice() || ret != e.ret {
                        self.report.errors.push(VerifyDiag {
                            func: None,
                            block: None,
                            ip: None,
                            message: format!(
                                "extern @{name} does not match the host signature"
                            ),
                            loc: SourceLoc::UNKNOWN,
                        });
                    }
                }
                None => self.warn(format!("extern @{name} is not a known host routine")),
            }
        }
    }

    fn check_function(&mut self, f: &Function) {
        if f.blocks.is_empty() {
            self.error(Some(f), None, None, SourceLoc::UNKNOWN, "function has no entry block".into());
            return;
        }
        if !f.entry().params.is_empty() {
            self.error(
                Some(f),
                Some(f.entry().label),
                None,
                SourceLoc::UNKNOWN,
                "entry block must not declare parameters".into(),
            );
        }

        // Unique labels.
        for (i, b) in f.blocks.iter().enumerate() {
            for later in &f.blocks[i + 1..] {
                if later.label == b.label {
                    self.error(
                        Some(f),
                        Some(b.label),
                        None,
                        SourceLoc::UNKNOWN,
                        "duplicate block label".into(),
                    );
                }
            }
        }

        // Single definition per temp, and collect definition sites.
        // Function parameters dominate the whole body.
        let mut sites: Vec<Option<DefSite>> = vec![None; f.temp_count()];
        for p in &f.params {
            if p.temp.index() < f.temp_count() {
                sites[p.temp.index()] = Some(DefSite {
                    block: BlockId(0),
                    pos: 0,
                });
            }
        }
        for (bi, b) in f.blocks.iter().enumerate() {
            let block = BlockId(bi as u32);
            for p in &b.params {
                self.define_site(f, &mut sites, p.temp, block, 0, SourceLoc::UNKNOWN);
                if p.temp.index() < f.temp_count() && f.temp_type(p.temp) == Type::Void {
                    self.error(
                        Some(f),
                        Some(b.label),
                        None,
                        SourceLoc::UNKNOWN,
                        "block parameter cannot be void".into(),
                    );
                }
            }
            for (ii, instr) in b.instrs.iter().enumerate() {
                if let Some(d) = instr.dest {
                    self.define_site(f, &mut sites, d, block, ii + 1, instr.loc);
                }
            }
        }

        let cfg = Cfg::build(f);
        let dom = DomTree::build(&cfg);

        // Per-block structure, instructions, and terminators.
        for (bi, b) in f.blocks.iter().enumerate() {
            let block = BlockId(bi as u32);
            for (ii, instr) in b.instrs.iter().enumerate() {
                if instr.opcode.is_terminator() {
                    self.error(
                        Some(f),
                        Some(b.label),
                        Some(ii),
                        instr.loc,
                        "terminator in instruction position".into(),
                    );
                    continue;
                }
                self.check_instr(f, b.label, block, ii, instr, &sites, &dom);
            }
            match &b.term {
                None => self.error(
                    Some(f),
                    Some(b.label),
                    None,
                    SourceLoc::UNKNOWN,
                    "block has no terminator".into(),
                ),
                Some(term) => {
                    self.check_terminator(f, b.label, block, b.instrs.len(), term, b.term_loc, &sites, &dom)
                }
            }
        }
    }

    fn define_site(
        &mut self,
        f: &Function,
        sites: &mut [Option<DefSite>],
        temp: TempId,
        block: BlockId,
        pos: usize,
        loc: SourceLoc,
    ) {
        let label = f.block(block).label;
        if temp.index() >= sites.len() {
            self.error(
                Some(f),
                Some(label),
                None,
                loc,
                format!("definition of out-of-range temp {}", temp.0),
            );
            return;
        }
        if sites[temp.index()].is_some() {
            self.error(
                Some(f),
                Some(label),
                None,
                loc,
                format!("temp {} defined more than once", temp.0),
            );
        } else {
            sites[temp.index()] = Some(DefSite { block, pos });
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check_instr(
        &mut self,
        f: &Function,
        label: Symbol,
        block: BlockId,
        ip: usize,
        instr: &Instr,
        sites: &[Option<DefSite>],
        dom: &DomTree,
    ) {
        let info = instr.opcode.info();

        // Operand arity (the variadic `call` is signature-checked below).
        if !info.variadic && instr.operands.len() != info.operands.len() {
            self.error(
                Some(f),
                Some(label),
                Some(ip),
                instr.loc,
                format!(
                    "{} takes {} operand(s), found {}",
                    instr.opcode,
                    info.operands.len(),
                    instr.operands.len()
                ),
            );
            return;
        }

        // Operand categories. Polymorphic positions check against the
        // instruction's recorded type, except bitcast whose operand kind is
        // checked separately against the bit-preserving rule.
        if !info.variadic && instr.opcode != Opcode::Bitcast {
            for (i, (cat, v)) in info.operands.iter().zip(&instr.operands).enumerate() {
                let expected = match cat {
                    TypeCategory::Any => instr.ty,
                    other => concrete(*other),
                };
                self.check_operand(f, label, block, ip, instr.loc, *v, expected, i);
            }
        }

        // Destination discipline and result typing.
        match instr.opcode {
            Opcode::Call => self.check_call(f, label, block, ip, instr, sites, dom),
            _ => {
                let produces = info.result != TypeCategory::Void;
                match (produces, instr.dest) {
                    (true, None) => self.error(
                        Some(f),
                        Some(label),
                        Some(ip),
                        instr.loc,
                        format!("{} must bind a destination", instr.opcode),
                    ),
                    (false, Some(_)) => self.error(
                        Some(f),
                        Some(label),
                        Some(ip),
                        instr.loc,
                        format!("{} produces no value", instr.opcode),
                    ),
                    (true, Some(d)) => {
                        if !info.result.admits(instr.ty) || instr.ty == Type::Void {
                            self.error(
                                Some(f),
                                Some(label),
                                Some(ip),
                                instr.loc,
                                format!("result type {} not allowed for {}", instr.ty, instr.opcode),
                            );
                        }
                        if d.index() < f.temp_count() && f.temp_type(d) != instr.ty {
                            self.error(
                                Some(f),
                                Some(label),
                                Some(ip),
                                instr.loc,
                                "destination temp type disagrees with result type".into(),
                            );
                        }
                    }
                    (false, None) => {}
                }
                if instr.opcode == Opcode::Bitcast {
                    let from = f.value_type(instr.operands[0]);
                    let castable = |t: Type| matches!(t, Type::I64 | Type::F64 | Type::Ptr);
                    if !castable(from) || !castable(instr.ty) {
                        self.error(
                            Some(f),
                            Some(label),
                            Some(ip),
                            instr.loc,
                            format!("bitcast between {from} and {} is not bit-preserving", instr.ty),
                        );
                    }
                }
            }
        }

        // SSA: every used temp must exist and its definition must dominate
        // this use.
        for v in &instr.operands {
            self.check_dominance(f, label, block, ip + 1, *v, sites, dom, instr.loc);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check_call(
        &mut self,
        f: &Function,
        label: Symbol,
        block: BlockId,
        ip: usize,
        instr: &Instr,
        _sites: &[Option<DefSite>],
        _dom: &DomTree,
    ) {
        let Some(callee) = instr.callee else {
            self.error(
                Some(f),
                Some(label),
                Some(ip),
                instr.loc,
                "call without a callee".into(),
            );
            return;
        };
        let callee_name = self.module.name(callee).to_string();
        let (params, ret) = if let Some(cf) = self.module.function_by_symbol(callee) {
            (cf.params.iter().map(|p| p.ty).collect::<Vec<_>>(), cf.ret)
        } else if let Some(e) = self.module.extern_by_symbol(callee) {
            (e.params.clone(), e.ret)
        } else {
            self.error(
                Some(f),
                Some(label),
                Some(ip),
                instr.loc,
                format!("call to undefined symbol @{callee_name}"),
            );
            return;
        };
        if instr.operands.len() != params.len() {
            self.error(
                Some(f),
                Some(label),
                Some(ip),
                instr.loc,
                format!(
                    "@{callee_name} takes {} argument(s), found {}",
                    params.len(),
                    instr.operands.len()
                ),
            );
        } else {
            for (i, (ty, v)) in params.iter().zip(&instr.operands).enumerate() {
                self.check_operand(f, label, block, ip, instr.loc, *v, *ty, i);
            }
        }
        match (ret, instr.dest) {
            (Type::Void, Some(_)) => self.error(
                Some(f),
                Some(label),
                Some(ip),
                instr.loc,
                format!("@{callee_name} returns void; destination not allowed"),
            ),
            (Type::Void, None) => {}
            (_, None) => self.error(
                Some(f),
                Some(label),
                Some(ip),
                instr.loc,
                format!("result of non-void @{callee_name} must be bound"),
            ),
            (ty, Some(d)) => {
                if instr.ty != ty || (d.index() < f.temp_count() && f.temp_type(d) != ty) {
                    self.error(
                        Some(f),
                        Some(label),
                        Some(ip),
                        instr.loc,
                        format!("call result type disagrees with @{callee_name}"),
                    );
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check_terminator(
        &mut self,
        f: &Function,
        label: Symbol,
        block: BlockId,
        term_ip: usize,
        term: &Terminator,
        loc: SourceLoc,
        sites: &[Option<DefSite>],
        dom: &DomTree,
    ) {
        match term {
            Terminator::Br { target, args } => {
                self.check_edge(f, label, block, term_ip, *target, args, loc, sites, dom);
            }
            Terminator::CBr {
                cond,
                then_target,
                then_args,
                else_target,
                else_args,
            } => {
                self.check_operand(f, label, block, term_ip, loc, *cond, Type::I1, 0);
                self.check_dominance(f, label, block, term_ip + 1, *cond, sites, dom, loc);
                self.check_edge(f, label, block, term_ip, *then_target, then_args, loc, sites, dom);
                self.check_edge(f, label, block, term_ip, *else_target, else_args, loc, sites, dom);
            }
            Terminator::Ret(v) => match (f.ret, v) {
                (Type::Void, None) => {}
                (Type::Void, Some(_)) => self.error(
                    Some(f),
                    Some(label),
                    Some(term_ip),
                    loc,
                    "void function returns a value".into(),
                ),
                (ty, Some(v)) => {
                    self.check_operand(f, label, block, term_ip, loc, *v, ty, 0);
                    self.check_dominance(f, label, block, term_ip + 1, *v, sites, dom, loc);
                }
                (ty, None) => self.error(
                    Some(f),
                    Some(label),
                    Some(term_ip),
                    loc,
                    format!("function must return a {ty} value"),
                ),
            },
            Terminator::Trap => {}
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check_edge(
        &mut self,
        f: &Function,
        label: Symbol,
        block: BlockId,
        term_ip: usize,
        target: BlockId,
        args: &[Value],
        loc: SourceLoc,
        sites: &[Option<DefSite>],
        dom: &DomTree,
    ) {
        if target.index() >= f.blocks.len() {
            self.error(
                Some(f),
                Some(label),
                Some(term_ip),
                loc,
                "branch to a block outside this function".into(),
            );
            return;
        }
        if target.index() == 0 {
            self.error(
                Some(f),
                Some(label),
                Some(term_ip),
                loc,
                "entry block cannot be a branch target".into(),
            );
            return;
        }
        let params = &f.block(target).params;
        if params.len() != args.len() {
            self.error(
                Some(f),
                Some(label),
                Some(term_ip),
                loc,
                format!(
                    "branch to {} supplies {} argument(s), target takes {}",
                    self.module.name(f.block(target).label),
                    args.len(),
                    params.len()
                ),
            );
            return;
        }
        for (i, (p, v)) in params.iter().zip(args).enumerate() {
            let want = f.temp_type(p.temp);
            self.check_operand(f, label, block, term_ip, loc, *v, want, i);
            self.check_dominance(f, label, block, term_ip + 1, *v, sites, dom, loc);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check_operand(
        &mut self,
        f: &Function,
        label: Symbol,
        block: BlockId,
        ip: usize,
        loc: SourceLoc,
        v: Value,
        expected: Type,
        position: usize,
    ) {
        let _ = block;
        // Existence of referenced globals.
        match v {
            Value::ConstStr(g) => {
                if g.index() >= self.module.globals.len()
                    || self.module.global(g).ty != Type::Str
                {
                    self.error(
                        Some(f),
                        Some(label),
                        Some(ip),
                        loc,
                        "string literal references a non-string global".into(),
                    );
                    return;
                }
            }
            Value::GlobalAddr(g) => {
                if g.index() >= self.module.globals.len() {
                    self.error(
                        Some(f),
                        Some(label),
                        Some(ip),
                        loc,
                        "reference to nonexistent global".into(),
                    );
                    return;
                }
            }
            Value::Temp(t) => {
                if t.index() >= f.temp_count() {
                    self.error(
                        Some(f),
                        Some(label),
                        Some(ip),
                        loc,
                        format!("use of nonexistent temp {}", t.0),
                    );
                    return;
                }
            }
            _ => {}
        }

        let actual = f.value_type(v);
        let ok = match expected {
            Type::I1 => {
                actual == Type::I1 || matches!(v, Value::ConstInt(0) | Value::ConstInt(1))
            }
            other => actual == other,
        };
        if !ok {
            self.error(
                Some(f),
                Some(label),
                Some(ip),
                loc,
                format!("operand {position} has type {actual}, expected {expected}"),
            );
        }
    }

    /// `pos` is the using position in the block's def/use numbering
    /// (params at 0, instruction `i` at `i + 1`).
    #[allow(clippy::too_many_arguments)]
    fn check_dominance(
        &mut self,
        f: &Function,
        label: Symbol,
        block: BlockId,
        pos: usize,
        v: Value,
        sites: &[Option<DefSite>],
        dom: &DomTree,
        loc: SourceLoc,
    ) {
        let Some(temp) = v.as_temp() else {
            return;
        };
        if temp.index() >= sites.len() {
            return; // already reported
        }
        let Some(site) = &sites[temp.index()] else {
            self.error(
                Some(f),
                Some(label),
                Some(pos.saturating_sub(1)),
                loc,
                format!("temp {} is never defined", temp.0),
            );
            return;
        };
        // Dominance is a property of reachable code only.
        if !dom.is_reachable(block) {
            return;
        }
        let dominated = if site.block == block {
            site.pos < pos
        } else {
            dom.dominates(site.block, block)
        };
        if !dominated {
            self.error(
                Some(f),
                Some(label),
                Some(pos.saturating_sub(1)),
                loc,
                format!("use of temp {} is not dominated by its definition", temp.0),
            );
        }
    }
}

type Symbol = crate::support::interner::Symbol;

fn concrete(cat: TypeCategory) -> Type {
    match cat {
        TypeCategory::Void => Type::Void,
        TypeCategory::I1 => Type::I1,
        TypeCategory::I64 => Type::I64,
        TypeCategory::F64 => Type::F64,
        TypeCategory::Ptr => Type::Ptr,
        TypeCategory::Str => Type::Str,
        TypeCategory::Any => Type::Void,
    }
}

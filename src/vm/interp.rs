//! The interpreter: frames, dispatch loop, and traps.
//!
//! Execution is strictly sequential over the current frame's instructions;
//! the VM never spawns threads and host calls are synchronous. A debug halt
//! is the loop returning [`ExitStatus::Halted`] to the driver; there is no
//! hidden continuation.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::rc::Rc;
use std::time::Instant;

use tracing::debug as trace_log;

use crate::debug::{DebugAction, DebugController};
use crate::error::{Error, Result, TrapKind};
use crate::il::block::Terminator;
use crate::il::instr::Instr;
use crate::il::module::{GlobalInit, Module};
use crate::il::opcodes::Opcode;
use crate::il::types::Type;
use crate::il::value::Value;
use crate::support::source::SourceLoc;
use crate::text;
use crate::vm::host::{find_host, validate_host_table, HostCtx};
use crate::vm::mem::Memory;
use crate::vm::slot::Slot;
use crate::vm::strings::StringHeap;

/// VM sizing knobs
#[derive(Debug, Clone, Copy)]
pub struct VmOptions {
    /// Frame stack capacity in bytes
    pub stack_size: usize,
    /// Maximum call depth
    pub max_frames: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions {
            stack_size: 1 << 20,
            max_frames: 2048,
        }
    }
}

/// Where and why execution trapped
#[derive(Debug, Clone)]
pub struct TrapInfo {
    /// Fault kind
    pub kind: TrapKind,
    /// Function name (without `@`)
    pub func: String,
    /// Block label
    pub block: String,
    /// Instruction index within the block
    pub ip: usize,
    /// Source location when known
    pub loc: SourceLoc,
}

impl TrapInfo {
    /// Convert into the crate error carrying the same fields
    pub fn into_error(self) -> Error {
        Error::Trap {
            kind: self.kind,
            func: self.func,
            block: self.block,
            ip: self.ip,
            loc: self.loc,
        }
    }
}

/// How a run ended
#[derive(Debug)]
pub enum ExitStatus {
    /// `@main` returned; carries its return value (0 for void)
    Normal(i64),
    /// Halted at a breakpoint/step with no script continuation
    Halted,
    /// A runtime fault terminated execution
    Trapped(TrapInfo),
}

struct Frame {
    func: usize,
    block: usize,
    ip: usize,
    regs: Vec<Slot>,
    mark: usize,
}

/// The interpreter over one immutable module
pub struct Vm<'m> {
    module: &'m Module,
    mem: Memory,
    strings: StringHeap,
    /// Per-global string handle (0 for non-string globals)
    const_str: Vec<u64>,
    frames: Vec<Frame>,
    retired: u64,
    rng: u64,
    started: Instant,
    out: Box<dyn Write>,
    input: Box<dyn BufRead>,
    display_names: HashMap<usize, Rc<Vec<String>>>,
    max_frames: usize,
}

impl<'m> Vm<'m> {
    /// Create a VM: validates the host table, lays out the globals image,
    /// and interns every string-table entry.
    pub fn new(module: &'m Module, opts: VmOptions) -> Result<Vm<'m>> {
        validate_host_table()?;
        let mut mem = Memory::new(opts.stack_size, module.globals.len());
        let mut strings = StringHeap::new();
        let mut const_str = vec![0u64; module.globals.len()];
        for (i, g) in module.globals.iter().enumerate() {
            let addr = Memory::global_addr(i);
            let raw = match &g.init {
                GlobalInit::Int(v) => *v as u64,
                GlobalInit::Float(v) => v.to_bits(),
                GlobalInit::Str(s) => {
                    let handle = strings.alloc(s.clone());
                    const_str[i] = handle;
                    handle
                }
                GlobalInit::Null => 0,
            };
            mem.store(addr, 8, raw)
                .map_err(|_| Error::internal("globals image layout"))?;
        }
        Ok(Vm {
            module,
            mem,
            strings,
            const_str,
            frames: Vec::new(),
            retired: 0,
            rng: 0x9E37_79B9_7F4A_7C15,
            started: Instant::now(),
            out: Box::new(std::io::stdout()),
            input: Box::new(std::io::BufReader::new(std::io::stdin())),
            display_names: HashMap::new(),
            max_frames: opts.max_frames,
        })
    }

    /// Redirect program and debug-event output
    pub fn set_output(&mut self, out: Box<dyn Write>) {
        self.out = out;
    }

    /// Redirect program input
    pub fn set_input(&mut self, input: Box<dyn BufRead>) {
        self.input = input;
    }

    /// Instructions retired so far
    pub fn retired(&self) -> u64 {
        self.retired
    }

    /// Execute `@main` to completion, a halt, or a trap
    pub fn run(&mut self, debug: &mut DebugController) -> Result<ExitStatus> {
        let main = self
            .module
            .function_index("main")
            .ok_or_else(|| Error::Host("module has no @main".to_string()))?;
        if !self.module.functions[main].params.is_empty() {
            return Err(Error::Host("@main must take no parameters".to_string()));
        }
        trace_log!(function = "main", "vm run starting");
        self.frames.push(Frame {
            func: main,
            block: 0,
            ip: 0,
            regs: vec![Slot::ZERO; self.module.functions[main].temp_count()],
            mark: self.mem.mark(),
        });
        debug.on_block_entry();
        let status = self.exec_loop(debug);
        trace_log!(retired = self.retired, "vm run finished");
        status
    }

    fn names_for(&mut self, fi: usize) -> Rc<Vec<String>> {
        let module = self.module;
        self.display_names
            .entry(fi)
            .or_insert_with(|| Rc::new(text::temp_display_names(module, &module.functions[fi])))
            .clone()
    }

    fn exec_loop(&mut self, debug: &mut DebugController) -> Result<ExitStatus> {
        let module = self.module;
        loop {
            let (fi, bi, ip) = {
                let f = self.frames.last().expect("running with no frame");
                (f.func, f.block, f.ip)
            };
            let func = &module.functions[fi];
            let block = &func.blocks[bi];
            let func_name = module.name(func.name);
            let block_label = module.name(block.label);

            if ip < block.instrs.len() {
                let instr = &block.instrs[ip];
                if debug.before_instr(module, func_name, block_label, ip, instr.loc, &mut self.out)
                    == DebugAction::Halt
                {
                    return Ok(ExitStatus::Halted);
                }
                if debug.trace_il() {
                    let names = self.names_for(fi);
                    let mut body = text::op_body_text(module, &names, instr);
                    if let Some(d) = instr.dest {
                        body.push_str(&format!(" -> %{}", names[d.index()]));
                    }
                    debug.trace_il_line(func_name, block_label, ip, &body, &mut self.out);
                }
                if debug.trace_src() {
                    debug.trace_src_line(module, func_name, block_label, ip, instr.loc, &mut self.out);
                }

                match self.exec_instr(fi, bi, ip, instr, debug)? {
                    StepOutcome::Next => {
                        self.frames.last_mut().expect("frame").ip += 1;
                        self.retired += 1;
                        debug.after_instr();
                    }
                    StepOutcome::FramePushed => {
                        self.retired += 1;
                        debug.after_instr();
                        debug.on_block_entry();
                    }
                    StepOutcome::Trap(kind) => {
                        return Ok(ExitStatus::Trapped(TrapInfo {
                            kind,
                            func: func_name.to_string(),
                            block: block_label.to_string(),
                            ip,
                            loc: instr.loc,
                        }));
                    }
                }
            } else {
                let term = block
                    .term
                    .as_ref()
                    .ok_or_else(|| Error::internal("executing unterminated block"))?;
                if debug.before_instr(module, func_name, block_label, ip, block.term_loc, &mut self.out)
                    == DebugAction::Halt
                {
                    return Ok(ExitStatus::Halted);
                }
                if debug.trace_il() {
                    let names = self.names_for(fi);
                    let body = text::term_body_text(module, func, &names, term);
                    debug.trace_il_line(func_name, block_label, ip, &body, &mut self.out);
                }
                if debug.trace_src() {
                    debug.trace_src_line(module, func_name, block_label, ip, block.term_loc, &mut self.out);
                }

                self.retired += 1;
                debug.after_instr();
                match term {
                    Terminator::Br { target, args } => {
                        self.enter_block(fi, target.index(), args, debug);
                    }
                    Terminator::CBr {
                        cond,
                        then_target,
                        then_args,
                        else_target,
                        else_args,
                    } => {
                        let taken = self.eval(fi, *cond).as_bool();
                        let (target, args) = if taken {
                            (then_target, then_args)
                        } else {
                            (else_target, else_args)
                        };
                        self.enter_block(fi, target.index(), args, debug);
                    }
                    Terminator::Ret(v) => {
                        let val = (*v).map(|v| self.eval(fi, v));
                        let finished = self.frames.pop().expect("frame");
                        self.mem.release_to(finished.mark);
                        let Some(caller) = self.frames.last() else {
                            return Ok(ExitStatus::Normal(
                                val.map(Slot::as_i64).unwrap_or(0),
                            ));
                        };
                        // The caller is parked on its call instruction;
                        // bind the result and move past it.
                        let (cfi, cbi, cip) = (caller.func, caller.block, caller.ip);
                        let call = &module.functions[cfi].blocks[cbi].instrs[cip];
                        if let (Some(d), Some(slot)) = (call.dest, val) {
                            self.write_reg(cfi, cbi, cip, d, slot, debug);
                        }
                        self.frames.last_mut().expect("frame").ip += 1;
                    }
                    Terminator::Trap => {
                        return Ok(ExitStatus::Trapped(TrapInfo {
                            kind: TrapKind::Explicit,
                            func: func_name.to_string(),
                            block: block_label.to_string(),
                            ip,
                            loc: block.term_loc,
                        }));
                    }
                }
            }
        }
    }

    fn exec_instr(
        &mut self,
        fi: usize,
        bi: usize,
        ip: usize,
        instr: &Instr,
        debug: &mut DebugController,
    ) -> Result<StepOutcome> {
        let module = self.module;
        match instr.opcode {
            Opcode::Alloca => {
                let size = self.eval(fi, instr.operands[0]).as_i64();
                if size < 0 {
                    return Ok(StepOutcome::Trap(TrapKind::StackExhausted));
                }
                match self.mem.alloca(size as u64) {
                    Ok(addr) => {
                        self.write_reg(fi, bi, ip, instr.dest.expect("alloca dest"), Slot(addr), debug);
                        Ok(StepOutcome::Next)
                    }
                    Err(kind) => Ok(StepOutcome::Trap(kind)),
                }
            }
            Opcode::Load => {
                let addr = self.eval(fi, instr.operands[0]).raw();
                match self.mem.load(addr, instr.ty.mem_size()) {
                    Ok(raw) => {
                        let slot = match instr.ty {
                            Type::I1 => Slot(raw & 1),
                            _ => Slot(raw),
                        };
                        self.write_reg(fi, bi, ip, instr.dest.expect("load dest"), slot, debug);
                        Ok(StepOutcome::Next)
                    }
                    Err(kind) => Ok(StepOutcome::Trap(kind)),
                }
            }
            Opcode::Store => {
                let addr = self.eval(fi, instr.operands[0]).raw();
                let value = self.eval(fi, instr.operands[1]);
                let raw = match instr.ty {
                    Type::I1 => value.raw() & 1,
                    _ => value.raw(),
                };
                match self.mem.store(addr, instr.ty.mem_size(), raw) {
                    Ok(()) => Ok(StepOutcome::Next),
                    Err(kind) => Ok(StepOutcome::Trap(kind)),
                }
            }
            Opcode::Call => {
                let callee = instr.callee.expect("call without callee");
                let args: Vec<Slot> =
                    instr.operands.iter().map(|v| self.eval(fi, *v)).collect();
                if let Some(target) = module
                    .functions
                    .iter()
                    .position(|f| f.name == callee)
                {
                    if self.frames.len() >= self.max_frames {
                        return Ok(StepOutcome::Trap(TrapKind::StackExhausted));
                    }
                    let f = &module.functions[target];
                    let mut regs = vec![Slot::ZERO; f.temp_count()];
                    for (p, slot) in f.params.iter().zip(&args) {
                        regs[p.temp.index()] = *slot;
                    }
                    self.frames.push(Frame {
                        func: target,
                        block: 0,
                        ip: 0,
                        regs,
                        mark: self.mem.mark(),
                    });
                    // Report parameter binding to any watches.
                    for (p, slot) in f.params.iter().zip(&args) {
                        self.report_write(target, 0, 0, p.temp, *slot, debug);
                    }
                    Ok(StepOutcome::FramePushed)
                } else {
                    let name = module.name(callee);
                    let host = find_host(name).ok_or_else(|| {
                        Error::Host(format!("extern @{name} is not registered with the VM"))
                    })?;
                    let mut ctx = HostCtx {
                        strings: &mut self.strings,
                        rng: &mut self.rng,
                        out: &mut self.out,
                        input: &mut self.input,
                        start: self.started,
                    };
                    let result = host.call(&mut ctx, &args)?;
                    if let Some(d) = instr.dest {
                        self.write_reg(fi, bi, ip, d, result, debug);
                    }
                    Ok(StepOutcome::Next)
                }
            }
            op => {
                let ops: Vec<Slot> =
                    instr.operands.iter().map(|v| self.eval(fi, *v)).collect();
                match exec_pure(op, &ops) {
                    Ok(slot) => {
                        if let Some(d) = instr.dest {
                            self.write_reg(fi, bi, ip, d, slot, debug);
                        }
                        Ok(StepOutcome::Next)
                    }
                    Err(kind) => Ok(StepOutcome::Trap(kind)),
                }
            }
        }
    }

    /// Branch: evaluate every argument in the predecessor's context, then
    /// write the successor's parameter slots before its first instruction.
    fn enter_block(
        &mut self,
        fi: usize,
        target: usize,
        args: &[Value],
        debug: &mut DebugController,
    ) {
        let values: Vec<Slot> = args.iter().map(|v| self.eval(fi, *v)).collect();
        {
            let frame = self.frames.last_mut().expect("frame");
            frame.block = target;
            frame.ip = 0;
        }
        let params: Vec<crate::il::value::TempId> = self.module.functions[fi].blocks[target]
            .params
            .iter()
            .map(|p| p.temp)
            .collect();
        for (temp, slot) in params.iter().zip(values) {
            self.write_reg(fi, target, 0, *temp, slot, debug);
        }
        debug.on_block_entry();
    }

    /// Evaluate a value in the current (topmost) frame's context
    fn eval(&self, _fi: usize, v: Value) -> Slot {
        match v {
            Value::Temp(t) => self.frames.last().expect("frame").regs[t.index()],
            Value::ConstInt(i) => Slot::from_i64(i),
            Value::ConstFloat(x) => Slot::from_f64(x),
            Value::ConstStr(g) => Slot(self.const_str[g.index()]),
            Value::GlobalAddr(g) => Slot(Memory::global_addr(g.index())),
            Value::NullPtr => Slot(0),
        }
    }

    fn write_reg(
        &mut self,
        fi: usize,
        bi: usize,
        ip: usize,
        temp: crate::il::value::TempId,
        slot: Slot,
        debug: &mut DebugController,
    ) {
        self.frames.last_mut().expect("frame").regs[temp.index()] = slot;
        self.report_write(fi, bi, ip, temp, slot, debug);
    }

    fn report_write(
        &mut self,
        fi: usize,
        bi: usize,
        ip: usize,
        temp: crate::il::value::TempId,
        slot: Slot,
        debug: &mut DebugController,
    ) {
        let module = self.module;
        let func = &module.functions[fi];
        let Some(sym) = func.temp_name(temp) else {
            return;
        };
        let text = fmt_slot(func.temp_type(temp), slot, &self.strings);
        let func_name = module.name(func.name);
        let block_label = module.name(func.blocks[bi].label);
        debug.on_write(
            module.name(sym),
            &text,
            func_name,
            block_label,
            ip,
            &mut self.out,
        );
    }
}

enum StepOutcome {
    Next,
    FramePushed,
    Trap(TrapKind),
}

/// `<type>:<value>` text for watch events
fn fmt_slot(ty: Type, slot: Slot, strings: &StringHeap) -> String {
    match ty {
        Type::Void => "void".to_string(),
        Type::I1 => format!("i1:{}", u8::from(slot.as_bool())),
        Type::I64 => format!("i64:{}", slot.as_i64()),
        Type::F64 => format!("f64:{}", slot.as_f64()),
        Type::Ptr => format!("ptr:0x{:x}", slot.raw()),
        Type::Str => format!("str:{:?}", strings.get(slot.raw())),
    }
}

/// Register-only opcodes. Wrapping integer arithmetic, masked shifts,
/// IEEE-754 float defaults; division traps exactly like the fold rules
/// refuse to fold.
fn exec_pure(op: Opcode, ops: &[Slot]) -> std::result::Result<Slot, TrapKind> {
    use Opcode::*;
    let a = ops.first().copied().unwrap_or(Slot::ZERO);
    let b = ops.get(1).copied().unwrap_or(Slot::ZERO);
    let slot = match op {
        Add => Slot::from_i64(a.as_i64().wrapping_add(b.as_i64())),
        Sub => Slot::from_i64(a.as_i64().wrapping_sub(b.as_i64())),
        Mul => Slot::from_i64(a.as_i64().wrapping_mul(b.as_i64())),
        SDiv | SRem => {
            let (x, y) = (a.as_i64(), b.as_i64());
            if y == 0 {
                return Err(TrapKind::DivideByZero);
            }
            if x == i64::MIN && y == -1 {
                return Err(TrapKind::IntegerOverflow);
            }
            Slot::from_i64(if op == SDiv { x / y } else { x % y })
        }
        UDiv | URem => {
            let (x, y) = (a.raw(), b.raw());
            if y == 0 {
                return Err(TrapKind::DivideByZero);
            }
            Slot(if op == UDiv { x / y } else { x % y })
        }
        And => Slot(a.raw() & b.raw()),
        Or => Slot(a.raw() | b.raw()),
        Xor => Slot(a.raw() ^ b.raw()),
        Not => Slot::from_bool(!a.as_bool()),
        Shl => Slot::from_i64(a.as_i64().wrapping_shl((b.as_i64() & 63) as u32)),
        LShr => Slot(a.raw().wrapping_shr((b.as_i64() & 63) as u32)),
        AShr => Slot::from_i64(a.as_i64().wrapping_shr((b.as_i64() & 63) as u32)),
        ICmpEq => Slot::from_bool(a.as_i64() == b.as_i64()),
        ICmpNe => Slot::from_bool(a.as_i64() != b.as_i64()),
        ICmpSlt => Slot::from_bool(a.as_i64() < b.as_i64()),
        ICmpSle => Slot::from_bool(a.as_i64() <= b.as_i64()),
        ICmpSgt => Slot::from_bool(a.as_i64() > b.as_i64()),
        ICmpSge => Slot::from_bool(a.as_i64() >= b.as_i64()),
        FAdd => Slot::from_f64(a.as_f64() + b.as_f64()),
        FSub => Slot::from_f64(a.as_f64() - b.as_f64()),
        FMul => Slot::from_f64(a.as_f64() * b.as_f64()),
        FDiv => Slot::from_f64(a.as_f64() / b.as_f64()),
        FCmpEq => Slot::from_bool(a.as_f64() == b.as_f64()),
        FCmpNe => Slot::from_bool(a.as_f64() != b.as_f64()),
        FCmpLt => Slot::from_bool(a.as_f64() < b.as_f64()),
        FCmpLe => Slot::from_bool(a.as_f64() <= b.as_f64()),
        FCmpGt => Slot::from_bool(a.as_f64() > b.as_f64()),
        FCmpGe => Slot::from_bool(a.as_f64() >= b.as_f64()),
        Sext => Slot::from_i64(if a.as_bool() { -1 } else { 0 }),
        Zext => Slot(a.raw() & 1),
        Trunc => Slot(a.raw() & 1),
        Sitofp => Slot::from_f64(a.as_i64() as f64),
        Fptosi => Slot::from_i64(a.as_f64() as i64),
        Bitcast => a,
        Alloca | Load | Store | Call | Br | CBr | Ret | Trap => {
            unreachable!("handled by the dispatch loop")
        }
    };
    Ok(slot)
}


//! Safe construction of functions, blocks, and instructions.
//!
//! The builder auto-assigns dense temp ids, uniquifies temp names, refuses
//! to append past a terminator, and type-checks every operand against the
//! opcode table at append time so a successfully built module is already
//! structurally sound.

use crate::error::{Error, Result};
use crate::il::block::{BasicBlock, BlockParam, Terminator};
use crate::il::function::{Function, FunctionAttrs, Param};
use crate::il::instr::Instr;
use crate::il::module::{Extern, Module};
use crate::il::opcodes::{Opcode, TypeCategory};
use crate::il::types::Type;
use crate::il::value::{BlockId, TempId, Value};
use crate::support::interner::Symbol;
use crate::support::source::SourceLoc;

/// Instruction builder positioned inside a module
pub struct Builder<'a> {
    module: &'a mut Module,
    func: Option<usize>,
    block: Option<BlockId>,
    next_name: Option<String>,
    next_loc: SourceLoc,
}

impl<'a> Builder<'a> {
    /// Create a builder over a module, with no current function
    pub fn new(module: &'a mut Module) -> Self {
        Builder {
            module,
            func: None,
            block: None,
            next_name: None,
            next_loc: SourceLoc::UNKNOWN,
        }
    }

    /// The module under construction
    pub fn module(&mut self) -> &mut Module {
        self.module
    }

    /// Declare an extern routine
    pub fn declare_extern(&mut self, name: &str, params: &[Type], ret: Type) -> Result<()> {
        let sym = self.module.interner.intern(name);
        if self.module.extern_by_symbol(sym).is_some() {
            return Err(Error::build(format!("duplicate extern @{name}")));
        }
        self.module.externs.push(Extern {
            name: sym,
            params: params.to_vec(),
            ret,
        });
        Ok(())
    }

    /// Create a function and make it current. Parameters take the first
    /// temp ids in order.
    pub fn create_function(
        &mut self,
        name: &str,
        params: &[(&str, Type)],
        ret: Type,
    ) -> Result<usize> {
        let sym = self.module.interner.intern(name);
        if self.module.function_by_symbol(sym).is_some() {
            return Err(Error::build(format!("duplicate function @{name}")));
        }
        let mut func = Function::new(sym, ret);
        for (pname, pty) in params {
            if *pty == Type::Void {
                return Err(Error::build(format!(
                    "parameter {pname} of @{name} cannot be void"
                )));
            }
            let psym = self.module.interner.intern(pname);
            if func.params.iter().any(|p| p.name == psym) {
                return Err(Error::build(format!(
                    "duplicate parameter {pname} in @{name}"
                )));
            }
            let temp = func.new_temp(*pty, Some(psym));
            func.params.push(Param {
                name: psym,
                ty: *pty,
                temp,
            });
        }
        self.module.functions.push(func);
        let idx = self.module.functions.len() - 1;
        self.func = Some(idx);
        self.block = None;
        Ok(idx)
    }

    /// Set advisory attributes on the current function
    pub fn set_attrs(&mut self, attrs: FunctionAttrs) -> Result<()> {
        self.cur_func_mut()?.attrs = attrs;
        Ok(())
    }

    /// Switch the current function
    pub fn switch_function(&mut self, index: usize) -> Result<()> {
        if index >= self.module.functions.len() {
            return Err(Error::build(format!("no function at index {index}")));
        }
        self.func = Some(index);
        self.block = None;
        Ok(())
    }

    /// Parameter values of the current function, in order
    pub fn param_values(&self) -> Result<Vec<Value>> {
        Ok(self
            .cur_func()?
            .params
            .iter()
            .map(|p| Value::Temp(p.temp))
            .collect())
    }

    /// Create a block in the current function; the first one is the entry
    pub fn create_block(&mut self, label: &str) -> Result<BlockId> {
        let sym = self.module.interner.intern(label);
        let f = self.cur_func_mut()?;
        if f.block_by_label(sym).is_some() {
            return Err(Error::build(format!("duplicate block label {label}")));
        }
        f.blocks.push(BasicBlock::new(sym));
        Ok(BlockId(f.blocks.len() as u32 - 1))
    }

    /// Make a block the insertion point
    pub fn switch_block(&mut self, block: BlockId) -> Result<()> {
        if block.index() >= self.cur_func()?.blocks.len() {
            return Err(Error::build(format!("no block {}", block.0)));
        }
        self.block = Some(block);
        Ok(())
    }

    /// Append a formal parameter to a block. Rejected once the block has
    /// instructions, and always rejected for the entry block.
    pub fn add_block_param(&mut self, block: BlockId, name: &str, ty: Type) -> Result<Value> {
        if block.index() == 0 {
            return Err(Error::build("entry block cannot take parameters"));
        }
        if ty == Type::Void {
            return Err(Error::build("block parameter cannot be void"));
        }
        let sym = self.unique_name(name)?;
        let f = self.cur_func_mut()?;
        let b = &f.blocks[block.index()];
        if !b.instrs.is_empty() || b.is_terminated() {
            return Err(Error::build(
                "block parameters must be added before any instruction",
            ));
        }
        let temp = f.new_temp(ty, Some(sym));
        f.blocks[block.index()].params.push(BlockParam { temp });
        Ok(Value::Temp(temp))
    }

    /// Name the next defined temp (uniquified with `.N` when taken)
    pub fn set_next_name(&mut self, name: &str) {
        self.next_name = Some(name.to_string());
    }

    /// Attach a source location to the next appended instruction
    pub fn set_next_loc(&mut self, loc: SourceLoc) {
        self.next_loc = loc;
    }

    // ---- integer arithmetic -------------------------------------------------

    /// `add` two i64 values
    pub fn add(&mut self, a: Value, b: Value) -> Result<Value> {
        self.emit_binary(Opcode::Add, a, b)
    }

    /// `sub` two i64 values
    pub fn sub(&mut self, a: Value, b: Value) -> Result<Value> {
        self.emit_binary(Opcode::Sub, a, b)
    }

    /// `mul` two i64 values
    pub fn mul(&mut self, a: Value, b: Value) -> Result<Value> {
        self.emit_binary(Opcode::Mul, a, b)
    }

    /// `sdiv` two i64 values
    pub fn sdiv(&mut self, a: Value, b: Value) -> Result<Value> {
        self.emit_binary(Opcode::SDiv, a, b)
    }

    /// `udiv` two i64 values
    pub fn udiv(&mut self, a: Value, b: Value) -> Result<Value> {
        self.emit_binary(Opcode::UDiv, a, b)
    }

    /// `srem` two i64 values
    pub fn srem(&mut self, a: Value, b: Value) -> Result<Value> {
        self.emit_binary(Opcode::SRem, a, b)
    }

    /// `urem` two i64 values
    pub fn urem(&mut self, a: Value, b: Value) -> Result<Value> {
        self.emit_binary(Opcode::URem, a, b)
    }

    // ---- float arithmetic ---------------------------------------------------

    /// `fadd` two f64 values
    pub fn fadd(&mut self, a: Value, b: Value) -> Result<Value> {
        self.emit_binary(Opcode::FAdd, a, b)
    }

    /// `fsub` two f64 values
    pub fn fsub(&mut self, a: Value, b: Value) -> Result<Value> {
        self.emit_binary(Opcode::FSub, a, b)
    }

    /// `fmul` two f64 values
    pub fn fmul(&mut self, a: Value, b: Value) -> Result<Value> {
        self.emit_binary(Opcode::FMul, a, b)
    }

    /// `fdiv` two f64 values
    pub fn fdiv(&mut self, a: Value, b: Value) -> Result<Value> {
        self.emit_binary(Opcode::FDiv, a, b)
    }

    // ---- bitwise / logical --------------------------------------------------

    /// Bitwise `and`
    pub fn and(&mut self, a: Value, b: Value) -> Result<Value> {
        self.emit_binary(Opcode::And, a, b)
    }

    /// Bitwise `or`
    pub fn or(&mut self, a: Value, b: Value) -> Result<Value> {
        self.emit_binary(Opcode::Or, a, b)
    }

    /// Bitwise `xor`
    pub fn xor(&mut self, a: Value, b: Value) -> Result<Value> {
        self.emit_binary(Opcode::Xor, a, b)
    }

    /// Logical `not` of an i1
    pub fn not(&mut self, a: Value) -> Result<Value> {
        self.emit_unary(Opcode::Not, a)
    }

    /// Shift left
    pub fn shl(&mut self, a: Value, b: Value) -> Result<Value> {
        self.emit_binary(Opcode::Shl, a, b)
    }

    /// Logical shift right
    pub fn lshr(&mut self, a: Value, b: Value) -> Result<Value> {
        self.emit_binary(Opcode::LShr, a, b)
    }

    /// Arithmetic shift right
    pub fn ashr(&mut self, a: Value, b: Value) -> Result<Value> {
        self.emit_binary(Opcode::AShr, a, b)
    }

    // ---- compares -----------------------------------------------------------

    /// Integer compare, by opcode
    pub fn icmp(&mut self, op: Opcode, a: Value, b: Value) -> Result<Value> {
        match op {
            Opcode::ICmpEq
            | Opcode::ICmpNe
            | Opcode::ICmpSlt
            | Opcode::ICmpSle
            | Opcode::ICmpSgt
            | Opcode::ICmpSge => self.emit_binary(op, a, b),
            _ => Err(Error::build(format!("{op} is not an integer compare"))),
        }
    }

    /// Float compare, by opcode
    pub fn fcmp(&mut self, op: Opcode, a: Value, b: Value) -> Result<Value> {
        match op {
            Opcode::FCmpEq
            | Opcode::FCmpNe
            | Opcode::FCmpLt
            | Opcode::FCmpLe
            | Opcode::FCmpGt
            | Opcode::FCmpGe => self.emit_binary(op, a, b),
            _ => Err(Error::build(format!("{op} is not a float compare"))),
        }
    }

    // ---- conversions --------------------------------------------------------

    /// Sign-extend i1 to i64
    pub fn sext(&mut self, a: Value) -> Result<Value> {
        self.emit_unary(Opcode::Sext, a)
    }

    /// Zero-extend i1 to i64
    pub fn zext(&mut self, a: Value) -> Result<Value> {
        self.emit_unary(Opcode::Zext, a)
    }

    /// Truncate i64 to i1
    pub fn trunc(&mut self, a: Value) -> Result<Value> {
        self.emit_unary(Opcode::Trunc, a)
    }

    /// Signed integer to float
    pub fn sitofp(&mut self, a: Value) -> Result<Value> {
        self.emit_unary(Opcode::Sitofp, a)
    }

    /// Float to signed integer
    pub fn fptosi(&mut self, a: Value) -> Result<Value> {
        self.emit_unary(Opcode::Fptosi, a)
    }

    /// Reinterpret bits as another 8-byte kind
    pub fn bitcast(&mut self, to: Type, a: Value) -> Result<Value> {
        let from = self.cur_func()?.value_type(a);
        let castable = |t: Type| matches!(t, Type::I64 | Type::F64 | Type::Ptr);
        if !castable(from) || !castable(to) {
            return Err(Error::build(format!("cannot bitcast {from} to {to}")));
        }
        let dest = self.fresh_dest(to)?;
        self.append(Instr {
            opcode: Opcode::Bitcast,
            dest: Some(dest),
            ty: to,
            operands: vec![a],
            callee: None,
            loc: self.take_loc(),
        })?;
        Ok(Value::Temp(dest))
    }

    // ---- memory -------------------------------------------------------------

    /// Reserve `size` bytes of frame stack; yields the region's address
    pub fn alloca(&mut self, size: Value) -> Result<Value> {
        self.check_operand(TypeCategory::I64, size)?;
        let dest = self.fresh_dest(Type::Ptr)?;
        self.append(Instr {
            opcode: Opcode::Alloca,
            dest: Some(dest),
            ty: Type::Ptr,
            operands: vec![size],
            callee: None,
            loc: self.take_loc(),
        })?;
        Ok(Value::Temp(dest))
    }

    /// Typed load through a pointer
    pub fn load(&mut self, ty: Type, ptr: Value) -> Result<Value> {
        if ty == Type::Void {
            return Err(Error::build("cannot load void"));
        }
        self.check_operand(TypeCategory::Ptr, ptr)?;
        let dest = self.fresh_dest(ty)?;
        self.append(Instr {
            opcode: Opcode::Load,
            dest: Some(dest),
            ty,
            operands: vec![ptr],
            callee: None,
            loc: self.take_loc(),
        })?;
        Ok(Value::Temp(dest))
    }

    /// Typed store through a pointer
    pub fn store(&mut self, ty: Type, ptr: Value, value: Value) -> Result<()> {
        if ty == Type::Void {
            return Err(Error::build("cannot store void"));
        }
        self.check_operand(TypeCategory::Ptr, ptr)?;
        self.check_operand(TypeCategory::of(ty), value)?;
        self.append(Instr {
            opcode: Opcode::Store,
            dest: None,
            ty,
            operands: vec![ptr, value],
            callee: None,
            loc: self.take_loc(),
        })
    }

    // ---- calls --------------------------------------------------------------

    /// Call a defined function or declared extern. Returns the result value
    /// for non-void callees and `None` for void ones.
    pub fn call(&mut self, callee: &str, args: &[Value]) -> Result<Option<Value>> {
        let sym = self
            .module
            .interner
            .get(callee)
            .ok_or_else(|| Error::build(format!("unknown callee @{callee}")))?;
        let (param_tys, ret) = if let Some(f) = self.module.function_by_symbol(sym) {
            (f.params.iter().map(|p| p.ty).collect::<Vec<_>>(), f.ret)
        } else if let Some(e) = self.module.extern_by_symbol(sym) {
            (e.params.clone(), e.ret)
        } else {
            return Err(Error::build(format!("unknown callee @{callee}")));
        };
        if args.len() != param_tys.len() {
            return Err(Error::build(format!(
                "@{callee} expects {} argument(s), got {}",
                param_tys.len(),
                args.len()
            )));
        }
        for (arg, ty) in args.iter().zip(&param_tys) {
            self.check_operand(TypeCategory::of(*ty), *arg)?;
        }
        let dest = if ret == Type::Void {
            None
        } else {
            Some(self.fresh_dest(ret)?)
        };
        self.append(Instr {
            opcode: Opcode::Call,
            dest,
            ty: ret,
            operands: args.to_vec(),
            callee: Some(sym),
            loc: self.take_loc(),
        })?;
        Ok(dest.map(Value::Temp))
    }

    // ---- terminators --------------------------------------------------------

    /// Unconditional branch
    pub fn br(&mut self, target: BlockId, args: &[Value]) -> Result<()> {
        self.check_branch(target, args)?;
        self.terminate(Terminator::Br {
            target,
            args: args.to_vec(),
        })
    }

    /// Conditional branch
    pub fn cbr(
        &mut self,
        cond: Value,
        then_target: BlockId,
        then_args: &[Value],
        else_target: BlockId,
        else_args: &[Value],
    ) -> Result<()> {
        self.check_operand(TypeCategory::I1, cond)?;
        self.check_branch(then_target, then_args)?;
        self.check_branch(else_target, else_args)?;
        self.terminate(Terminator::CBr {
            cond,
            then_target,
            then_args: then_args.to_vec(),
            else_target,
            else_args: else_args.to_vec(),
        })
    }

    /// Return, with a value unless the function returns void
    pub fn ret(&mut self, value: Option<Value>) -> Result<()> {
        let ret_ty = self.cur_func()?.ret;
        match (ret_ty, value) {
            (Type::Void, None) => {}
            (Type::Void, Some(_)) => {
                return Err(Error::build("void function cannot return a value"))
            }
            (ty, Some(v)) => self.check_operand(TypeCategory::of(ty), v)?,
            (ty, None) => {
                return Err(Error::build(format!("function must return a {ty} value")))
            }
        }
        self.terminate(Terminator::Ret(value))
    }

    /// Explicit runtime fault
    pub fn trap(&mut self) -> Result<()> {
        self.terminate(Terminator::Trap)
    }

    // ---- internals ----------------------------------------------------------

    fn require_func(&self) -> Result<usize> {
        self.func
            .ok_or_else(|| Error::build("no current function"))
    }

    fn cur_func(&self) -> Result<&Function> {
        Ok(&self.module.functions[self.require_func()?])
    }

    fn cur_func_mut(&mut self) -> Result<&mut Function> {
        let idx = self.require_func()?;
        Ok(&mut self.module.functions[idx])
    }

    fn take_loc(&self) -> SourceLoc {
        self.next_loc
    }

    fn unique_name(&mut self, base: &str) -> Result<Symbol> {
        let f_idx = self.require_func()?;
        let mut candidate = base.to_string();
        let mut n = 0u32;
        loop {
            let sym = self.module.interner.intern(&candidate);
            if !self.module.functions[f_idx].name_in_use(sym) {
                return Ok(sym);
            }
            n += 1;
            candidate = format!("{base}.{n}");
        }
    }

    fn fresh_dest(&mut self, ty: Type) -> Result<TempId> {
        let name = match self.next_name.take() {
            Some(base) => Some(self.unique_name(&base)?),
            None => None,
        };
        Ok(self.cur_func_mut()?.new_temp(ty, name))
    }

    fn check_operand(&self, cat: TypeCategory, v: Value) -> Result<()> {
        let ty = self.cur_func()?.value_type(v);
        let ok = match cat {
            // An i1 position also accepts the literal 0/1.
            TypeCategory::I1 => {
                cat.admits(ty) || matches!(v, Value::ConstInt(0) | Value::ConstInt(1))
            }
            _ => cat.admits(ty),
        };
        if ok {
            Ok(())
        } else {
            Err(Error::build(format!(
                "operand of type {ty} does not satisfy {cat:?}"
            )))
        }
    }

    fn check_branch(&self, target: BlockId, args: &[Value]) -> Result<()> {
        let f = self.cur_func()?;
        let block = f
            .blocks
            .get(target.index())
            .ok_or_else(|| Error::build(format!("branch to unknown block {}", target.0)))?;
        if block.params.len() != args.len() {
            return Err(Error::build(format!(
                "branch supplies {} argument(s), target takes {}",
                args.len(),
                block.params.len()
            )));
        }
        for (param, arg) in block.params.iter().zip(args) {
            let want = f.temp_type(param.temp);
            self.check_operand(TypeCategory::of(want), *arg)?;
        }
        Ok(())
    }

    fn emit_binary(&mut self, op: Opcode, a: Value, b: Value) -> Result<Value> {
        let info = op.info();
        self.check_operand(info.operands[0], a)?;
        self.check_operand(info.operands[1], b)?;
        let ty = result_type(info.result);
        let dest = self.fresh_dest(ty)?;
        self.append(Instr {
            opcode: op,
            dest: Some(dest),
            ty,
            operands: vec![a, b],
            callee: None,
            loc: self.take_loc(),
        })?;
        Ok(Value::Temp(dest))
    }

    fn emit_unary(&mut self, op: Opcode, a: Value) -> Result<Value> {
        let info = op.info();
        self.check_operand(info.operands[0], a)?;
        let ty = result_type(info.result);
        let dest = self.fresh_dest(ty)?;
        self.append(Instr {
            opcode: op,
            dest: Some(dest),
            ty,
            operands: vec![a],
            callee: None,
            loc: self.take_loc(),
        })?;
        Ok(Value::Temp(dest))
    }

    fn append(&mut self, instr: Instr) -> Result<()> {
        self.next_loc = SourceLoc::UNKNOWN;
        let block = self
            .block
            .ok_or_else(|| Error::build("no current block"))?;
        let b = self.cur_func_mut()?.block_mut(block);
        if b.is_terminated() {
            return Err(Error::build("cannot append after a terminator"));
        }
        b.instrs.push(instr);
        Ok(())
    }

    fn terminate(&mut self, term: Terminator) -> Result<()> {
        let loc = self.next_loc;
        self.next_loc = SourceLoc::UNKNOWN;
        let block = self
            .block
            .ok_or_else(|| Error::build("no current block"))?;
        let b = self.cur_func_mut()?.block_mut(block);
        if b.is_terminated() {
            return Err(Error::build("block already has a terminator"));
        }
        b.term = Some(term);
        b.term_loc = loc;
        Ok(())
    }
}

fn result_type(cat: TypeCategory) -> Type {
    match cat {
        TypeCategory::Void => Type::Void,
        TypeCategory::I1 => Type::I1,
        TypeCategory::I64 => Type::I64,
        TypeCategory::F64 => Type::F64,
        TypeCategory::Ptr => Type::Ptr,
        TypeCategory::Str => Type::Str,
        // Polymorphic results are typed explicitly by their emit helpers.
        TypeCategory::Any => Type::Void,
    }
}

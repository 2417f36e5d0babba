//! Strict parser for textual IL.
//!
//! Any malformed input (unknown opcode, wrong arity, type mismatch,
//! dangling label, non-SSA redefinition) aborts with a diagnostic carrying
//! the offending token's position; no partial module is ever returned.
//!
//! Parsing is line-oriented: one statement per line. Each function body is
//! walked twice: a first pass collects block labels and every temp
//! definition (so forward references and out-of-order dominance are
//! resolvable), a second pass builds the instructions. Statements with no
//! explicit `@file:line` location are pinned to their own position in the
//! `.il` text, which is what lets source-line breakpoints address
//! hand-written IL.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::il::block::{BasicBlock, BlockParam, Terminator};
use crate::il::function::{Function, FunctionAttrs, Param};
use crate::il::instr::Instr;
use crate::il::module::{Extern, Global, GlobalInit, Module, Visibility};
use crate::il::opcodes::Opcode;
use crate::il::types::Type;
use crate::il::value::{BlockId, TempId, Value};
use crate::support::source::SourceLoc;
use crate::text::lexer::{Lexer, Token, TokenKind};

/// Parse a complete module from IL text. `file_name` names the input for
/// diagnostics and synthetic statement locations.
pub fn parse_module(file_name: &str, source: &str) -> Result<Module> {
    let tokens = Lexer::new(file_name, source).tokenize()?;
    let mut parser = Parser::new(file_name, &tokens);
    parser.prescan()?;
    parser.parse()
}

#[derive(Clone)]
struct FuncSig {
    params: Vec<Type>,
    ret: Type,
}

struct Parser<'t> {
    file: String,
    file_id: u32,
    toks: &'t [Token],
    pos: usize,
    module: Module,
    func_sigs: HashMap<String, FuncSig>,
    extern_sigs: HashMap<String, FuncSig>,
}

impl<'t> Parser<'t> {
    fn new(file_name: &str, toks: &'t [Token]) -> Self {
        let mut module = Module::new();
        let file_id = module.files.intern(file_name);
        module.self_file = Some(file_id);
        Parser {
            file: file_name.to_string(),
            file_id,
            toks,
            pos: 0,
            module,
            func_sigs: HashMap::new(),
            extern_sigs: HashMap::new(),
        }
    }

    // ---- token plumbing -----------------------------------------------------

    fn peek(&self) -> &Token {
        &self.toks[self.pos]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.toks.len() - 1);
        &self.toks[idx]
    }

    fn bump(&mut self) -> &'t Token {
        let t = &self.toks[self.pos];
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        t
    }

    fn err_here(&self, message: impl Into<String>) -> Error {
        let t = self.peek();
        Error::parse(&self.file, t.line, t.col, message)
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<()> {
        if &self.peek().kind == kind {
            self.bump();
            Ok(())
        } else {
            Err(self.err_here(format!("expected {what}")))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String> {
        match self.peek().kind.clone() {
            TokenKind::Ident(s) => {
                self.bump();
                Ok(s)
            }
            _ => Err(self.err_here(format!("expected {what}"))),
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<()> {
        match &self.peek().kind {
            TokenKind::Ident(s) if s == word => {
                self.bump();
                Ok(())
            }
            _ => Err(self.err_here(format!("expected '{word}'"))),
        }
    }

    fn at_keyword(&self, word: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(s) if s == word)
    }

    fn parse_type(&mut self) -> Result<Type> {
        let t = self.peek().clone();
        match &t.kind {
            TokenKind::Ident(s) => match Type::parse(s) {
                Some(ty) => {
                    self.bump();
                    Ok(ty)
                }
                None => Err(self.err_here(format!("unknown type '{s}'"))),
            },
            _ => Err(self.err_here("expected a type")),
        }
    }

    // ---- signature pre-scan -------------------------------------------------

    /// Skim the top level for extern and func signatures so calls can be
    /// typed regardless of declaration order. Malformed items are left for
    /// the main parse to report precisely.
    fn prescan(&mut self) -> Result<()> {
        let start = self.pos;
        let mut depth = 0usize;
        while self.peek().kind != TokenKind::Eof {
            match &self.peek().kind {
                TokenKind::LBrace => {
                    depth += 1;
                    self.bump();
                }
                TokenKind::RBrace => {
                    depth = depth.saturating_sub(1);
                    self.bump();
                }
                TokenKind::Ident(s) if depth == 0 && s == "extern" => {
                    let save = self.pos;
                    if let Ok((name, sig)) = self.scan_extern_sig() {
                        if self.extern_sigs.contains_key(&name)
                            || self.func_sigs.contains_key(&name)
                        {
                            self.pos = save;
                            self.bump();
                            return Err(self.err_here(format!("duplicate symbol @{name}")));
                        }
                        self.extern_sigs.insert(name, sig);
                    } else {
                        self.pos = save;
                        self.bump();
                    }
                }
                TokenKind::Ident(s) if depth == 0 && s == "func" => {
                    let save = self.pos;
                    if let Ok((name, sig)) = self.scan_func_sig() {
                        if self.extern_sigs.contains_key(&name)
                            || self.func_sigs.contains_key(&name)
                        {
                            self.pos = save;
                            self.bump();
                            return Err(self.err_here(format!("duplicate symbol @{name}")));
                        }
                        self.func_sigs.insert(name, sig);
                    }
                    self.pos = save;
                    self.bump();
                }
                _ => {
                    self.bump();
                }
            }
        }
        self.pos = start;
        Ok(())
    }

    fn scan_extern_sig(&mut self) -> Result<(String, FuncSig)> {
        self.expect_keyword("extern")?;
        self.expect(&TokenKind::At, "'@'")?;
        let name = self.expect_ident("extern name")?;
        self.expect(&TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if self.peek().kind != TokenKind::RParen {
            loop {
                params.push(self.parse_type()?);
                if self.peek().kind == TokenKind::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        self.expect(&TokenKind::Arrow, "'->'")?;
        let ret = self.parse_type()?;
        Ok((name, FuncSig { params, ret }))
    }

    fn scan_func_sig(&mut self) -> Result<(String, FuncSig)> {
        self.expect_keyword("func")?;
        self.expect(&TokenKind::At, "'@'")?;
        let name = self.expect_ident("function name")?;
        self.expect(&TokenKind::LParen, "'('")?;
        let mut params = Vec::new();
        if self.peek().kind != TokenKind::RParen {
            loop {
                self.expect(&TokenKind::Percent, "'%'")?;
                self.expect_ident("parameter name")?;
                self.expect(&TokenKind::Colon, "':'")?;
                params.push(self.parse_type()?);
                if self.peek().kind == TokenKind::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        self.expect(&TokenKind::Arrow, "'->'")?;
        let ret = self.parse_type()?;
        Ok((name, FuncSig { params, ret }))
    }

    // ---- top level ----------------------------------------------------------

    fn parse(mut self) -> Result<Module> {
        loop {
            match self.peek().kind.clone() {
                TokenKind::Eof => break,
                TokenKind::Ident(s) if s == "extern" => self.parse_extern()?,
                TokenKind::Ident(s) if s == "global" => self.parse_global()?,
                TokenKind::Ident(s) if s == "func" => self.parse_function()?,
                _ => return Err(self.err_here("expected 'extern', 'global', or 'func'")),
            }
        }
        Ok(self.module)
    }

    fn parse_extern(&mut self) -> Result<()> {
        let (name, sig) = self.scan_extern_sig()?;
        let sym = self.module.interner.intern(&name);
        if self.module.extern_by_symbol(sym).is_some() {
            return Err(self.err_here(format!("duplicate extern @{name}")));
        }
        self.module.externs.push(Extern {
            name: sym,
            params: sig.params,
            ret: sig.ret,
        });
        Ok(())
    }

    fn parse_global(&mut self) -> Result<()> {
        self.expect_keyword("global")?;
        let vis = if self.at_keyword("internal") {
            self.bump();
            Visibility::Internal
        } else {
            Visibility::Public
        };
        let is_const = if self.at_keyword("const") {
            self.bump();
            true
        } else {
            false
        };
        self.expect(&TokenKind::At, "'@'")?;
        let name = self.expect_ident("global name")?;
        self.expect(&TokenKind::Colon, "':'")?;
        let ty = self.parse_type()?;
        self.expect(&TokenKind::Equals, "'='")?;
        let init = self.parse_global_init(ty)?;

        let sym = self.module.interner.intern(&name);
        if self.module.global_by_symbol(sym).is_some() {
            return Err(self.err_here(format!("duplicate global @{name}")));
        }
        self.module.globals.push(Global {
            name: sym,
            ty,
            init,
            is_const,
            vis,
        });
        Ok(())
    }

    fn parse_global_init(&mut self, ty: Type) -> Result<GlobalInit> {
        let tok = self.peek().clone();
        match (ty, tok.kind) {
            (Type::I64, TokenKind::Int(v)) => {
                self.bump();
                Ok(GlobalInit::Int(v))
            }
            (Type::I1, TokenKind::Int(v @ 0..=1)) => {
                self.bump();
                Ok(GlobalInit::Int(v))
            }
            (Type::F64, TokenKind::Float(v)) => {
                self.bump();
                Ok(GlobalInit::Float(v))
            }
            (Type::F64, TokenKind::Ident(s)) if float_word(&s).is_some() => {
                self.bump();
                Ok(GlobalInit::Float(float_word(&s).unwrap()))
            }
            (Type::Str, TokenKind::Str(s)) => {
                self.bump();
                Ok(GlobalInit::Str(s))
            }
            (Type::Ptr, TokenKind::Ident(s)) if s == "null" => {
                self.bump();
                Ok(GlobalInit::Null)
            }
            (Type::Void, _) => Err(self.err_here("global cannot have void type")),
            _ => Err(self.err_here(format!("initializer does not match type {ty}"))),
        }
    }

    // ---- functions ----------------------------------------------------------

    fn parse_function(&mut self) -> Result<()> {
        self.expect_keyword("func")?;
        self.expect(&TokenKind::At, "'@'")?;
        let name = self.expect_ident("function name")?;
        let name_sym = self.module.interner.intern(&name);
        if self.module.function_by_symbol(name_sym).is_some() {
            return Err(self.err_here(format!("duplicate function @{name}")));
        }

        self.expect(&TokenKind::LParen, "'('")?;
        let mut params: Vec<(String, Type)> = Vec::new();
        if self.peek().kind != TokenKind::RParen {
            loop {
                self.expect(&TokenKind::Percent, "'%'")?;
                let pname = self.expect_ident("parameter name")?;
                self.expect(&TokenKind::Colon, "':'")?;
                let pty = self.parse_type()?;
                if pty == Type::Void {
                    return Err(self.err_here("parameter cannot be void"));
                }
                if params.iter().any(|(n, _)| n == &pname) {
                    return Err(self.err_here(format!("duplicate parameter %{pname}")));
                }
                params.push((pname, pty));
                if self.peek().kind == TokenKind::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        self.expect(&TokenKind::Arrow, "'->'")?;
        let ret = self.parse_type()?;

        let mut attrs = FunctionAttrs::default();
        loop {
            if self.at_keyword("pure") {
                self.bump();
                attrs.is_pure = true;
            } else if self.at_keyword("readonly") {
                self.bump();
                attrs.readonly = true;
            } else if self.at_keyword("noreturn") {
                self.bump();
                attrs.noreturn = true;
            } else {
                break;
            }
        }
        self.expect(&TokenKind::LBrace, "'{'")?;

        let mut func = Function::new(name_sym, ret);
        func.attrs = attrs;
        let mut defs: HashMap<String, TempId> = HashMap::new();
        for (pname, pty) in &params {
            let psym = self.module.interner.intern(pname);
            let temp = func.new_temp(*pty, Some(psym));
            func.params.push(Param {
                name: psym,
                ty: *pty,
                temp,
            });
            defs.insert(pname.clone(), temp);
        }

        let body_start = self.pos;
        self.collect_defs(&mut func, &mut defs)?;
        self.pos = body_start;
        self.parse_body(&mut func, &defs)?;

        self.module.functions.push(func);
        Ok(())
    }

    /// First body pass: create blocks, block params, and every destination
    /// temp in textual order, rejecting SSA redefinitions.
    fn collect_defs(&mut self, func: &mut Function, defs: &mut HashMap<String, TempId>) -> Result<()> {
        let mut saw_block = false;
        loop {
            match self.peek().kind.clone() {
                TokenKind::RBrace => {
                    self.bump();
                    if func.blocks.is_empty() {
                        return Err(self.err_here("function has no blocks"));
                    }
                    return Ok(());
                }
                TokenKind::Eof => return Err(self.err_here("unexpected end of input")),
                TokenKind::Ident(word) if self.is_block_header(&word) => {
                    self.collect_block_header(func, defs)?;
                    saw_block = true;
                }
                _ => {
                    if !saw_block {
                        return Err(self.err_here("instruction outside any block"));
                    }
                    self.collect_stmt_def(func, defs)?;
                }
            }
        }
    }

    /// A statement-initial ident is a block header when it is not an opcode
    /// and a `:` or `(` follows.
    fn is_block_header(&self, word: &str) -> bool {
        if Opcode::from_mnemonic(word).is_some() {
            return false;
        }
        matches!(
            self.peek_at(1).kind,
            TokenKind::Colon | TokenKind::LParen
        )
    }

    fn collect_block_header(
        &mut self,
        func: &mut Function,
        defs: &mut HashMap<String, TempId>,
    ) -> Result<()> {
        let label = self.expect_ident("block label")?;
        let label_sym = self.module.interner.intern(&label);
        if func.block_by_label(label_sym).is_some() {
            return Err(self.err_here(format!("duplicate block label {label}")));
        }
        let mut block = BasicBlock::new(label_sym);
        if self.peek().kind == TokenKind::LParen {
            if func.blocks.is_empty() {
                return Err(self.err_here("entry block cannot declare parameters"));
            }
            self.bump();
            if self.peek().kind != TokenKind::RParen {
                loop {
                    self.expect(&TokenKind::Percent, "'%'")?;
                    let pname = self.expect_ident("block parameter name")?;
                    self.expect(&TokenKind::Colon, "':'")?;
                    let pty = self.parse_type()?;
                    if pty == Type::Void {
                        return Err(self.err_here("block parameter cannot be void"));
                    }
                    let temp = self.define_temp(func, defs, &pname, pty)?;
                    block.params.push(BlockParam { temp });
                    if self.peek().kind == TokenKind::Comma {
                        self.bump();
                    } else {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::RParen, "')'")?;
        }
        self.expect(&TokenKind::Colon, "':'")?;
        func.blocks.push(block);
        Ok(())
    }

    fn define_temp(
        &mut self,
        func: &mut Function,
        defs: &mut HashMap<String, TempId>,
        name: &str,
        ty: Type,
    ) -> Result<TempId> {
        if defs.contains_key(name) {
            return Err(self.err_here(format!("redefinition of %{name} violates SSA")));
        }
        let sym = if is_positional_name(name) {
            None
        } else {
            Some(self.module.interner.intern(name))
        };
        let temp = func.new_temp(ty, sym);
        defs.insert(name.to_string(), temp);
        Ok(temp)
    }

    /// Skim one statement: register its destination (typed via the opcode
    /// table, the explicit type token, or the callee signature), then skip
    /// to the next line.
    fn collect_stmt_def(
        &mut self,
        func: &mut Function,
        defs: &mut HashMap<String, TempId>,
    ) -> Result<()> {
        let line = self.peek().line;
        if self.peek().kind == TokenKind::Percent {
            self.bump();
            let dname = self.expect_ident("destination name")?;
            self.expect(&TokenKind::Equals, "'='")?;
            let mn = self.expect_ident("opcode")?;
            let op = Opcode::from_mnemonic(&mn)
                .ok_or_else(|| self.err_here(format!("unknown opcode '{mn}'")))?;
            let ty = self.dest_type(op)?;
            if ty == Type::Void {
                return Err(self.err_here(format!("'{mn}' produces no value")));
            }
            self.define_temp(func, defs, &dname, ty)?;
        } else {
            let mn = self.expect_ident("opcode")?;
            let op = Opcode::from_mnemonic(&mn)
                .ok_or_else(|| self.err_here(format!("unknown opcode '{mn}'")))?;
            // A value-producing opcode must bind its destination; `call`
            // is checked against the callee's return type.
            if op == Opcode::Call {
                let (_, sig) = self.peek_callee()?;
                if sig.ret != Type::Void {
                    return Err(self.err_here("call to non-void callee must bind a destination"));
                }
            } else if op.produces_value() && !op.is_terminator() {
                return Err(self.err_here(format!("'{mn}' requires a destination")));
            }
        }
        self.skip_line(line);
        Ok(())
    }

    fn dest_type(&mut self, op: Opcode) -> Result<Type> {
        use crate::il::opcodes::TypeCategory as Cat;
        match op.info().result {
            Cat::Void => Ok(Type::Void),
            Cat::I1 => Ok(Type::I1),
            Cat::I64 => Ok(Type::I64),
            Cat::F64 => Ok(Type::F64),
            Cat::Ptr => Ok(Type::Ptr),
            Cat::Str => Ok(Type::Str),
            Cat::Any => match op {
                Opcode::Load | Opcode::Bitcast => {
                    // The access type is the token right after the mnemonic;
                    // clone-ahead so the main pass re-reads it.
                    let save = self.pos;
                    let ty = self.parse_type()?;
                    self.pos = save;
                    Ok(ty)
                }
                Opcode::Call => {
                    let (_, sig) = self.peek_callee()?;
                    Ok(sig.ret)
                }
                _ => Err(self.err_here(format!("cannot type result of '{}'", op.mnemonic()))),
            },
        }
    }

    /// Read the callee name after `call` without consuming it
    fn peek_callee(&mut self) -> Result<(String, FuncSig)> {
        let save = self.pos;
        let r = (|| -> Result<(String, FuncSig)> {
            self.expect(&TokenKind::At, "'@' after call")?;
            let name = self.expect_ident("callee name")?;
            let sig = self
                .func_sigs
                .get(&name)
                .or_else(|| self.extern_sigs.get(&name))
                .cloned();
            match sig {
                Some(sig) => Ok((name, sig)),
                None => {
                    self.pos = save;
                    self.bump();
                    Err(self.err_here(format!("unknown callee @{name}")))
                }
            }
        })();
        self.pos = save;
        r
    }

    fn skip_line(&mut self, line: u32) {
        while self.peek().kind != TokenKind::Eof && self.peek().line == line {
            if self.peek().kind == TokenKind::RBrace {
                break;
            }
            self.bump();
        }
    }

    // ---- second body pass ---------------------------------------------------

    fn parse_body(&mut self, func: &mut Function, defs: &HashMap<String, TempId>) -> Result<()> {
        let mut current: Option<BlockId> = None;
        let mut header_count = 0u32;
        loop {
            match self.peek().kind.clone() {
                TokenKind::RBrace => {
                    self.bump();
                    if let Some(cur) = current {
                        if !func.block(cur).is_terminated() {
                            return Err(self.err_here(format!(
                                "block {} lacks a terminator",
                                self.module.name(func.block(cur).label)
                            )));
                        }
                    }
                    return Ok(());
                }
                TokenKind::Ident(word) if self.is_block_header(&word) => {
                    if let Some(cur) = current {
                        if !func.block(cur).is_terminated() {
                            return Err(self.err_here(format!(
                                "block {} lacks a terminator",
                                self.module.name(func.block(cur).label)
                            )));
                        }
                    }
                    self.skip_block_header();
                    current = Some(BlockId(header_count));
                    header_count += 1;
                }
                _ => {
                    let block = current.expect("statement outside block survived pass one");
                    if func.block(block).is_terminated() {
                        return Err(self.err_here("instruction after terminator"));
                    }
                    self.parse_stmt(func, defs, block)?;
                }
            }
        }
    }

    fn skip_block_header(&mut self) {
        // Validated in the first pass: label, optional (...) param list, ':'.
        self.bump(); // label
        if self.peek().kind == TokenKind::LParen {
            while !matches!(self.peek().kind, TokenKind::RParen | TokenKind::Eof) {
                self.bump();
            }
            self.bump(); // ')'
        }
        if self.peek().kind == TokenKind::Colon {
            self.bump();
        }
    }

    fn parse_stmt(
        &mut self,
        func: &mut Function,
        defs: &HashMap<String, TempId>,
        block: BlockId,
    ) -> Result<()> {
        let start = self.peek().clone();
        let default_loc = SourceLoc::new(self.file_id, start.line, start.col);

        let dest: Option<TempId> = if start.kind == TokenKind::Percent {
            self.bump();
            let name = self.expect_ident("destination name")?;
            self.expect(&TokenKind::Equals, "'='")?;
            Some(defs[&name])
        } else {
            None
        };

        let mn = self.expect_ident("opcode")?;
        let op = Opcode::from_mnemonic(&mn)
            .ok_or_else(|| self.err_here(format!("unknown opcode '{mn}'")))?;

        if op.is_terminator() {
            if dest.is_some() {
                return Err(self.err_here("terminator cannot bind a destination"));
            }
            let term = self.parse_terminator(func, defs, op)?;
            let loc = self.parse_loc_suffix(start.line, default_loc)?;
            self.ensure_line_done(start.line)?;
            let b = func.block_mut(block);
            b.term = Some(term);
            b.term_loc = loc;
            return Ok(());
        }

        let instr = self.parse_instr(func, defs, op, dest)?;
        let loc = self.parse_loc_suffix(start.line, default_loc)?;
        let instr = Instr { loc, ..instr };
        self.ensure_line_done(start.line)?;
        func.block_mut(block).instrs.push(instr);
        Ok(())
    }

    fn parse_instr(
        &mut self,
        func: &Function,
        defs: &HashMap<String, TempId>,
        op: Opcode,
        dest: Option<TempId>,
    ) -> Result<Instr> {
        let info = op.info();
        match op {
            Opcode::Load => {
                let ty = self.parse_type()?;
                self.expect(&TokenKind::Comma, "','")?;
                let ptr = self.parse_operand(func, defs, Type::Ptr)?;
                Ok(Instr {
                    opcode: op,
                    dest,
                    ty,
                    operands: vec![ptr],
                    callee: None,
                    loc: SourceLoc::UNKNOWN,
                })
            }
            Opcode::Store => {
                if dest.is_some() {
                    return Err(self.err_here("store produces no value"));
                }
                let ty = self.parse_type()?;
                self.expect(&TokenKind::Comma, "','")?;
                let ptr = self.parse_operand(func, defs, Type::Ptr)?;
                self.expect(&TokenKind::Comma, "','")?;
                let value = self.parse_operand(func, defs, ty)?;
                Ok(Instr {
                    opcode: op,
                    dest: None,
                    ty,
                    operands: vec![ptr, value],
                    callee: None,
                    loc: SourceLoc::UNKNOWN,
                })
            }
            Opcode::Bitcast => {
                let ty = self.parse_type()?;
                self.expect(&TokenKind::Comma, "','")?;
                let (value, from) = self.parse_free_operand(func, defs)?;
                let castable = |t: Type| matches!(t, Type::I64 | Type::F64 | Type::Ptr);
                if !castable(from) || !castable(ty) {
                    return Err(self.err_here(format!("cannot bitcast {from} to {ty}")));
                }
                Ok(Instr {
                    opcode: op,
                    dest,
                    ty,
                    operands: vec![value],
                    callee: None,
                    loc: SourceLoc::UNKNOWN,
                })
            }
            Opcode::Call => {
                let (name, sig) = self.peek_callee()?;
                self.bump(); // '@'
                self.bump(); // name
                let callee = self.module.interner.intern(&name);
                self.expect(&TokenKind::LParen, "'('")?;
                let mut args = Vec::new();
                if self.peek().kind != TokenKind::RParen {
                    loop {
                        let idx = args.len();
                        let expected = *sig.params.get(idx).ok_or_else(|| {
                            self.err_here(format!(
                                "@{name} expects {} argument(s)",
                                sig.params.len()
                            ))
                        })?;
                        args.push(self.parse_operand(func, defs, expected)?);
                        if self.peek().kind == TokenKind::Comma {
                            self.bump();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&TokenKind::RParen, "')'")?;
                if args.len() != sig.params.len() {
                    return Err(self.err_here(format!(
                        "@{name} expects {} argument(s), got {}",
                        sig.params.len(),
                        args.len()
                    )));
                }
                Ok(Instr {
                    opcode: op,
                    dest,
                    ty: sig.ret,
                    operands: args,
                    callee: Some(callee),
                    loc: SourceLoc::UNKNOWN,
                })
            }
            _ => {
                // Fixed-category opcodes: operands are typed by the table.
                let mut operands = Vec::with_capacity(info.operands.len());
                for (i, cat) in info.operands.iter().enumerate() {
                    if i > 0 {
                        self.expect(&TokenKind::Comma, "','")?;
                    }
                    let expected = concrete_type(*cat)
                        .ok_or_else(|| self.err_here("opcode has untypeable operand"))?;
                    operands.push(self.parse_operand(func, defs, expected)?);
                }
                let ty = concrete_type(info.result).unwrap_or(Type::Void);
                Ok(Instr {
                    opcode: op,
                    dest,
                    ty,
                    operands,
                    callee: None,
                    loc: SourceLoc::UNKNOWN,
                })
            }
        }
    }

    fn parse_terminator(
        &mut self,
        func: &Function,
        defs: &HashMap<String, TempId>,
        op: Opcode,
    ) -> Result<Terminator> {
        match op {
            Opcode::Br => {
                let (target, args) = self.parse_edge(func, defs)?;
                Ok(Terminator::Br { target, args })
            }
            Opcode::CBr => {
                let cond = self.parse_operand(func, defs, Type::I1)?;
                self.expect(&TokenKind::Comma, "','")?;
                let (then_target, then_args) = self.parse_edge(func, defs)?;
                self.expect(&TokenKind::Comma, "','")?;
                let (else_target, else_args) = self.parse_edge(func, defs)?;
                Ok(Terminator::CBr {
                    cond,
                    then_target,
                    then_args,
                    else_target,
                    else_args,
                })
            }
            Opcode::Ret => {
                if func.ret == Type::Void {
                    Ok(Terminator::Ret(None))
                } else {
                    let v = self.parse_operand(func, defs, func.ret)?;
                    Ok(Terminator::Ret(Some(v)))
                }
            }
            Opcode::Trap => Ok(Terminator::Trap),
            _ => unreachable!("not a terminator"),
        }
    }

    fn parse_edge(
        &mut self,
        func: &Function,
        defs: &HashMap<String, TempId>,
    ) -> Result<(BlockId, Vec<Value>)> {
        let label = self.expect_ident("branch target label")?;
        let sym = self
            .module
            .interner
            .get(&label)
            .and_then(|s| func.block_by_label(s));
        let Some(target) = sym else {
            return Err(self.err_here(format!("branch to undefined label {label}")));
        };
        let param_temps: Vec<TempId> = func.block(target).params.iter().map(|p| p.temp).collect();
        let mut args = Vec::new();
        if self.peek().kind == TokenKind::LParen {
            self.bump();
            if self.peek().kind != TokenKind::RParen {
                loop {
                    let idx = args.len();
                    let expected = param_temps
                        .get(idx)
                        .map(|t| func.temp_type(*t))
                        .ok_or_else(|| {
                            self.err_here(format!(
                                "branch to {label} supplies too many arguments"
                            ))
                        })?;
                    args.push(self.parse_operand(func, defs, expected)?);
                    if self.peek().kind == TokenKind::Comma {
                        self.bump();
                    } else {
                        break;
                    }
                }
            }
            self.expect(&TokenKind::RParen, "')'")?;
        }
        if args.len() != param_temps.len() {
            return Err(self.err_here(format!(
                "branch to {} needs {} argument(s), got {}",
                label,
                param_temps.len(),
                args.len()
            )));
        }
        Ok((target, args))
    }

    fn parse_operand(
        &mut self,
        func: &Function,
        defs: &HashMap<String, TempId>,
        expected: Type,
    ) -> Result<Value> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Percent => {
                self.bump();
                let name = self.expect_ident("temp name")?;
                let Some(&temp) = defs.get(&name) else {
                    return Err(self.err_here(format!("use of undefined temp %{name}")));
                };
                let ty = func.temp_type(temp);
                if ty != expected {
                    return Err(self.err_here(format!(
                        "%{name} has type {ty}, expected {expected}"
                    )));
                }
                Ok(Value::Temp(temp))
            }
            TokenKind::Int(v) => {
                self.bump();
                match expected {
                    Type::I64 => Ok(Value::ConstInt(v)),
                    Type::I1 if v == 0 || v == 1 => Ok(Value::ConstInt(v)),
                    other => Err(self.err_here(format!(
                        "integer literal where {other} was expected"
                    ))),
                }
            }
            TokenKind::Float(v) => {
                self.bump();
                if expected == Type::F64 {
                    Ok(Value::ConstFloat(v))
                } else {
                    Err(self.err_here(format!("float literal where {expected} was expected")))
                }
            }
            TokenKind::Ident(ref s) if s == "null" => {
                self.bump();
                if expected == Type::Ptr {
                    Ok(Value::NullPtr)
                } else {
                    Err(self.err_here(format!("null where {expected} was expected")))
                }
            }
            TokenKind::Ident(ref s) if float_word(s).is_some() => {
                self.bump();
                if expected == Type::F64 {
                    Ok(Value::ConstFloat(float_word(s).unwrap()))
                } else {
                    Err(self.err_here(format!("float literal where {expected} was expected")))
                }
            }
            TokenKind::At => {
                self.bump();
                let name = self.expect_ident("global name")?;
                let sym = self.module.interner.get(&name);
                let Some(gid) = sym.and_then(|s| self.module.global_by_symbol(s)) else {
                    return Err(self.err_here(format!("unknown global @{name}")));
                };
                match expected {
                    Type::Str => {
                        if self.module.global(gid).ty != Type::Str {
                            return Err(
                                self.err_here(format!("@{name} is not a string global"))
                            );
                        }
                        Ok(Value::ConstStr(gid))
                    }
                    Type::Ptr => Ok(Value::GlobalAddr(gid)),
                    other => Err(self.err_here(format!(
                        "global reference where {other} was expected"
                    ))),
                }
            }
            _ => Err(self.err_here("expected an operand")),
        }
    }

    /// Operand with self-evident type, for `bitcast`
    fn parse_free_operand(
        &mut self,
        func: &Function,
        defs: &HashMap<String, TempId>,
    ) -> Result<(Value, Type)> {
        let tok = self.peek().clone();
        match tok.kind {
            TokenKind::Percent => {
                self.bump();
                let name = self.expect_ident("temp name")?;
                let Some(&temp) = defs.get(&name) else {
                    return Err(self.err_here(format!("use of undefined temp %{name}")));
                };
                Ok((Value::Temp(temp), func.temp_type(temp)))
            }
            TokenKind::Int(v) => {
                self.bump();
                Ok((Value::ConstInt(v), Type::I64))
            }
            TokenKind::Float(v) => {
                self.bump();
                Ok((Value::ConstFloat(v), Type::F64))
            }
            TokenKind::Ident(ref s) if s == "null" => {
                self.bump();
                Ok((Value::NullPtr, Type::Ptr))
            }
            _ => Err(self.err_here("expected a bitcast operand")),
        }
    }

    /// Optional explicit `@file:line[:col]` suffix; otherwise the
    /// statement's own position in this `.il` file.
    fn parse_loc_suffix(&mut self, stmt_line: u32, default_loc: SourceLoc) -> Result<SourceLoc> {
        if self.peek().kind != TokenKind::At || self.peek().line != stmt_line {
            return Ok(default_loc);
        }
        self.bump();
        let path = match self.peek().kind.clone() {
            TokenKind::Ident(s) => {
                self.bump();
                s
            }
            TokenKind::Str(s) => {
                self.bump();
                s
            }
            _ => return Err(self.err_here("expected a file name after '@'")),
        };
        self.expect(&TokenKind::Colon, "':'")?;
        let line = match self.peek().kind {
            TokenKind::Int(v) if v > 0 => {
                self.bump();
                v as u32
            }
            _ => return Err(self.err_here("expected a line number")),
        };
        let mut col = 0u32;
        if self.peek().kind == TokenKind::Colon && self.peek().line == stmt_line {
            self.bump();
            col = match self.peek().kind {
                TokenKind::Int(v) if v > 0 => {
                    self.bump();
                    v as u32
                }
                _ => return Err(self.err_here("expected a column number")),
            };
        }
        let file = self.module.files.intern(&path);
        Ok(SourceLoc::new(file, line, col))
    }

    fn ensure_line_done(&mut self, line: u32) -> Result<()> {
        let t = self.peek();
        if t.kind != TokenKind::Eof && t.kind != TokenKind::RBrace && t.line == line {
            return Err(self.err_here("unexpected token after statement"));
        }
        Ok(())
    }
}

fn is_positional_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next() == Some('t') && name.len() > 1 && chars.all(|c| c.is_ascii_digit())
}

fn float_word(s: &str) -> Option<f64> {
    match s {
        "inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ => None,
    }
}

fn concrete_type(cat: crate::il::opcodes::TypeCategory) -> Option<Type> {
    use crate::il::opcodes::TypeCategory as Cat;
    match cat {
        Cat::Void => Some(Type::Void),
        Cat::I1 => Some(Type::I1),
        Cat::I64 => Some(Type::I64),
        Cat::F64 => Some(Type::F64),
        Cat::Ptr => Some(Type::Ptr),
        Cat::Str => Some(Type::Str),
        Cat::Any => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::printer::print_module;

    #[test]
    fn test_parse_simple_function() {
        let src = "\
func @main() -> i64 {
entry:
  %t0 = add 1, 2
  %t1 = mul %t0, 3
  ret 0
}
";
        let m = parse_module("test.il", src).unwrap();
        assert_eq!(m.functions.len(), 1);
        let f = &m.functions[0];
        assert_eq!(f.blocks.len(), 1);
        assert_eq!(f.entry().instrs.len(), 2);
        assert_eq!(print_module(&m), src);
    }

    #[test]
    fn test_parse_full_surface_roundtrip() {
        let src = "\
extern @rt_print_i64(i64) -> void

global internal const @.str0: str = \"HI\\0A\"
global @counter: i64 = 0

func @main() -> i64 {
entry:
  %p = alloca 8
  store i64, %p, 41
  %v = load i64, %p
  %t0 = add %v, 1
  call @rt_print_i64(%t0)
  br done(%t0)
done(%r: i64):
  ret %r
}
";
        let m = parse_module("test.il", src).unwrap();
        assert_eq!(print_module(&m), src);
    }

    #[test]
    fn test_statements_carry_self_locations() {
        let src = "\
func @main() -> i64 {
entry:
  %t0 = add 1, 2
  ret %t0
}
";
        let m = parse_module("foo.il", src).unwrap();
        let f = &m.functions[0];
        let loc = f.entry().instrs[0].loc;
        assert_eq!(m.files.path(loc.file), Some("foo.il"));
        assert_eq!(loc.line, 3);
    }

    #[test]
    fn test_explicit_locations_survive_roundtrip() {
        let src = "\
func @main() -> i64 {
entry:
  %t0 = add 1, 2 @prog.bas:10:4
  ret %t0 @prog.bas:11
}
";
        let m = parse_module("test.il", src).unwrap();
        let f = &m.functions[0];
        assert_eq!(f.entry().instrs[0].loc.line, 10);
        assert_eq!(f.entry().instrs[0].loc.col, 4);
        assert_eq!(print_module(&m), src);
    }

    #[test]
    fn test_unknown_opcode_is_pinpointed() {
        let src = "func @f() -> void {\nentry:\n  frob 1\n}\n";
        let err = parse_module("bad.il", src).unwrap_err();
        match err {
            Error::Parse { line, col, message, .. } => {
                assert_eq!((line, col), (3, 3));
                assert!(message.contains("frob"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_ssa_redefinition_rejected() {
        let src = "\
func @f() -> void {
entry:
  %x = add 1, 2
  %x = add 3, 4
  ret
}
";
        let err = parse_module("bad.il", src).unwrap_err();
        assert!(err.to_string().contains("SSA"));
    }

    #[test]
    fn test_dangling_label_rejected() {
        let src = "func @f() -> void {\nentry:\n  br nowhere\n}\n";
        let err = parse_module("bad.il", src).unwrap_err();
        assert!(err.to_string().contains("undefined label"));
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let src = "func @f() -> void {\nentry:\n  %x = fadd 1, 2\n  ret\n}\n";
        assert!(parse_module("bad.il", src).is_err());
    }

    #[test]
    fn test_branch_arity_mismatch_rejected() {
        let src = "\
func @f() -> void {
entry:
  br next
next(%v: i64):
  ret
}
";
        let err = parse_module("bad.il", src).unwrap_err();
        assert!(err.to_string().contains("argument"));
    }

    #[test]
    fn test_forward_temp_reference_across_blocks() {
        // %v is defined in a later-printed block; pass one makes it visible.
        let src = "\
func @f(%c: i1) -> i64 {
entry:
  cbr %c, a, b
a:
  br b
b:
  %v = add 1, 2
  ret %v
}
";
        let m = parse_module("test.il", src).unwrap();
        assert_eq!(m.functions[0].blocks.len(), 3);
    }

    #[test]
    fn test_entry_params_rejected() {
        let src = "func @f() -> void {\nentry(%x: i64):\n  ret\n}\n";
        let err = parse_module("bad.il", src).unwrap_err();
        assert!(err.to_string().contains("entry block"));
    }

    #[test]
    fn test_call_requires_destination_when_nonvoid() {
        let src = "\
extern @rt_rand() -> f64

func @f() -> void {
entry:
  call @rt_rand()
  ret
}
";
        let err = parse_module("bad.il", src).unwrap_err();
        assert!(err.to_string().contains("destination"));
    }
}

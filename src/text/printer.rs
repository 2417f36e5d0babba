//! Deterministic printer for textual IL.
//!
//! Output order is the module's declaration order throughout, numeric
//! formats are canonical (decimal i64, shortest round-trip f64), and
//! unnamed temps are renumbered densely in textual definition order so the
//! printed form of a reparsed module is byte-stable.

use crate::il::block::Terminator;
use crate::il::function::Function;
use crate::il::instr::Instr;
use crate::il::module::{GlobalInit, Module, Visibility};
use crate::il::opcodes::Opcode;
use crate::il::types::Type;
use crate::il::value::Value;
use crate::support::source::SourceLoc;

/// Print a whole module in canonical form
pub fn print_module(m: &Module) -> String {
    let mut sections: Vec<String> = Vec::new();

    if !m.externs.is_empty() {
        let lines: Vec<String> = m
            .externs
            .iter()
            .map(|e| {
                let params: Vec<&str> = e.params.iter().map(|t| t.name()).collect();
                format!("extern @{}({}) -> {}", m.name(e.name), params.join(", "), e.ret)
            })
            .collect();
        sections.push(lines.join("\n"));
    }

    if !m.globals.is_empty() {
        let lines: Vec<String> = m
            .globals
            .iter()
            .map(|g| {
                let vis = match g.vis {
                    Visibility::Public => "",
                    Visibility::Internal => "internal ",
                };
                let konst = if g.is_const { "const " } else { "" };
                format!(
                    "global {}{}@{}: {} = {}",
                    vis,
                    konst,
                    m.name(g.name),
                    g.ty,
                    init_text(&g.init)
                )
            })
            .collect();
        sections.push(lines.join("\n"));
    }

    for f in &m.functions {
        sections.push(print_function(m, f));
    }

    let mut out = sections.join("\n\n");
    out.push('\n');
    out
}

fn init_text(init: &GlobalInit) -> String {
    match init {
        GlobalInit::Int(v) => v.to_string(),
        GlobalInit::Float(v) => format!("{v:?}"),
        GlobalInit::Str(s) => quote_str(s),
        GlobalInit::Null => "null".to_string(),
    }
}

/// Display names for every temp of a function, indexed by temp id.
/// Named temps keep their interned name; unnamed ones are numbered
/// `t0, t1, ...` in textual definition order.
pub fn temp_display_names(m: &Module, f: &Function) -> Vec<String> {
    let mut names = vec![String::new(); f.temp_count()];
    let mut next = 0usize;
    let mut assign = |names: &mut Vec<String>, temp: crate::il::value::TempId| {
        let text = match f.temp_name(temp) {
            Some(sym) => m.name(sym).to_string(),
            None => {
                let t = format!("t{next}");
                next += 1;
                t
            }
        };
        names[temp.index()] = text;
    };
    for p in &f.params {
        assign(&mut names, p.temp);
    }
    for b in &f.blocks {
        for p in &b.params {
            assign(&mut names, p.temp);
        }
        for i in &b.instrs {
            if let Some(d) = i.dest {
                assign(&mut names, d);
            }
        }
    }
    names
}

fn print_function(m: &Module, f: &Function) -> String {
    let names = temp_display_names(m, f);
    let mut out = String::new();

    let params: Vec<String> = f
        .params
        .iter()
        .map(|p| format!("%{}: {}", names[p.temp.index()], p.ty))
        .collect();
    let mut attrs = String::new();
    if f.attrs.is_pure {
        attrs.push_str(" pure");
    }
    if f.attrs.readonly {
        attrs.push_str(" readonly");
    }
    if f.attrs.noreturn {
        attrs.push_str(" noreturn");
    }
    out.push_str(&format!(
        "func @{}({}) -> {}{} {{\n",
        m.name(f.name),
        params.join(", "),
        f.ret,
        attrs
    ));

    for b in &f.blocks {
        if b.params.is_empty() {
            out.push_str(&format!("{}:\n", m.name(b.label)));
        } else {
            let ps: Vec<String> = b
                .params
                .iter()
                .map(|p| format!("%{}: {}", names[p.temp.index()], f.temp_type(p.temp)))
                .collect();
            out.push_str(&format!("{}({}):\n", m.name(b.label), ps.join(", ")));
        }
        for i in &b.instrs {
            out.push_str("  ");
            if let Some(d) = i.dest {
                out.push_str(&format!("%{} = ", names[d.index()]));
            }
            out.push_str(&op_body_text(m, &names, i));
            out.push_str(&loc_suffix(m, i.loc));
            out.push('\n');
        }
        if let Some(term) = &b.term {
            out.push_str("  ");
            out.push_str(&term_body_text(m, f, &names, term));
            out.push_str(&loc_suffix(m, b.term_loc));
            out.push('\n');
        }
    }
    out.push('}');
    out
}

/// Render one value in operand position
pub fn value_text(m: &Module, names: &[String], v: &Value) -> String {
    match v {
        Value::Temp(t) => format!("%{}", names[t.index()]),
        Value::ConstInt(i) => i.to_string(),
        Value::ConstFloat(x) => format!("{x:?}"),
        Value::ConstStr(g) | Value::GlobalAddr(g) => {
            format!("@{}", m.name(m.global(*g).name))
        }
        Value::NullPtr => "null".to_string(),
    }
}

/// Statement text after the optional `%dest = ` prefix, e.g. `add 1, 2`
/// or `load i64, %p`. Also used verbatim by `--trace=il`.
pub fn op_body_text(m: &Module, names: &[String], i: &Instr) -> String {
    let ops = |vals: &[Value]| -> String {
        vals.iter()
            .map(|v| value_text(m, names, v))
            .collect::<Vec<_>>()
            .join(", ")
    };
    match i.opcode {
        Opcode::Load | Opcode::Store | Opcode::Bitcast => {
            format!("{} {}, {}", i.opcode, i.ty, ops(&i.operands))
        }
        Opcode::Call => {
            let callee = i.callee.expect("call without callee");
            format!("call @{}({})", m.name(callee), ops(&i.operands))
        }
        _ if i.operands.is_empty() => i.opcode.to_string(),
        _ => format!("{} {}", i.opcode, ops(&i.operands)),
    }
}

/// Terminator text, e.g. `br loop(%t0)` or `ret 0`
pub fn term_body_text(m: &Module, f: &Function, names: &[String], term: &Terminator) -> String {
    let edge = |target: crate::il::value::BlockId, args: &[Value]| -> String {
        let label = m.name(f.block(target).label);
        if args.is_empty() {
            label.to_string()
        } else {
            let texts: Vec<String> = args.iter().map(|v| value_text(m, names, v)).collect();
            format!("{label}({})", texts.join(", "))
        }
    };
    match term {
        Terminator::Br { target, args } => format!("br {}", edge(*target, args)),
        Terminator::CBr {
            cond,
            then_target,
            then_args,
            else_target,
            else_args,
        } => format!(
            "cbr {}, {}, {}",
            value_text(m, names, cond),
            edge(*then_target, then_args),
            edge(*else_target, else_args)
        ),
        Terminator::Ret(Some(v)) => format!("ret {}", value_text(m, names, v)),
        Terminator::Ret(None) => "ret".to_string(),
        Terminator::Trap => "trap".to_string(),
    }
}

/// ` @file:line[:col]` when the location is known and not synthetic
/// (locations pointing into the module's own `.il` text are re-derived by
/// the parser and never re-printed).
fn loc_suffix(m: &Module, loc: SourceLoc) -> String {
    if !loc.is_known() || Some(loc.file) == m.self_file {
        return String::new();
    }
    let path = m.files.path(loc.file).unwrap_or("<unknown>");
    let path = if path_needs_quotes(path) {
        quote_str(path)
    } else {
        path.to_string()
    };
    if loc.col != 0 {
        format!(" @{}:{}:{}", path, loc.line, loc.col)
    } else {
        format!(" @{}:{}", path, loc.line)
    }
}

fn path_needs_quotes(path: &str) -> bool {
    let mut chars = path.chars();
    let Some(first) = chars.next() else {
        return true;
    };
    let ident_start =
        first.is_ascii_alphabetic() || matches!(first, '_' | '.' | '$' | '/' | '\\');
    let rest_ok = path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$' | '/' | '\\'));
    !(ident_start && rest_ok)
}

fn quote_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for b in s.bytes() {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7E => out.push(b as char),
            other => out.push_str(&format!("\\{other:02X}")),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::builder::Builder;

    #[test]
    fn test_print_simple_module() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        b.create_function("main", &[], Type::I64).unwrap();
        let entry = b.create_block("entry").unwrap();
        b.switch_block(entry).unwrap();
        let t0 = b.add(Value::ConstInt(1), Value::ConstInt(2)).unwrap();
        let _t1 = b.mul(t0, Value::ConstInt(3)).unwrap();
        b.ret(Some(Value::ConstInt(0))).unwrap();

        let text = print_module(&m);
        let expected = "\
func @main() -> i64 {
entry:
  %t0 = add 1, 2
  %t1 = mul %t0, 3
  ret 0
}
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_print_externs_globals_and_strings() {
        let mut m = Module::new();
        let greeting = m.intern_str_literal("HI\n");
        let mut b = Builder::new(&mut m);
        b.declare_extern("rt_print_str", &[Type::Str], Type::Void)
            .unwrap();
        b.create_function("main", &[], Type::Void).unwrap();
        let entry = b.create_block("entry").unwrap();
        b.switch_block(entry).unwrap();
        b.call("rt_print_str", &[Value::ConstStr(greeting)]).unwrap();
        b.ret(None).unwrap();

        let text = print_module(&m);
        let expected = "\
extern @rt_print_str(str) -> void

global internal const @.str0: str = \"HI\\0A\"

func @main() -> void {
entry:
  call @rt_print_str(@.str0)
  ret
}
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_float_formats_round_trip() {
        assert_eq!(format!("{:?}", 3.0_f64), "3.0");
        assert_eq!(format!("{:?}", 0.1_f64), "0.1");
        assert_eq!(format!("{:?}", f64::INFINITY), "inf");
        assert_eq!(format!("{:?}", f64::NAN), "NaN");
    }

    #[test]
    fn test_block_params_and_branches() {
        let mut m = Module::new();
        let mut b = Builder::new(&mut m);
        b.create_function("count", &[("n", Type::I64)], Type::I64)
            .unwrap();
        let entry = b.create_block("entry").unwrap();
        let loop_b = b.create_block("loop").unwrap();
        let done = b.create_block("done").unwrap();
        let i = b.add_block_param(loop_b, "i", Type::I64).unwrap();
        let r = b.add_block_param(done, "r", Type::I64).unwrap();
        b.switch_block(entry).unwrap();
        let n = b.param_values().unwrap()[0];
        b.br(loop_b, &[Value::ConstInt(0)]).unwrap();
        b.switch_block(loop_b).unwrap();
        let c = b.icmp(Opcode::ICmpSlt, i, n).unwrap();
        let next = b.add(i, Value::ConstInt(1)).unwrap();
        b.cbr(c, loop_b, &[next], done, &[i]).unwrap();
        b.switch_block(done).unwrap();
        b.ret(Some(r)).unwrap();

        let text = print_module(&m);
        let expected = "\
func @count(%n: i64) -> i64 {
entry:
  br loop(0)
loop(%i: i64):
  %t0 = icmp_slt %i, %n
  %t1 = add %i, 1
  cbr %t0, loop(%t1), done(%i)
done(%r: i64):
  ret %r
}
";
        assert_eq!(text, expected);
    }
}

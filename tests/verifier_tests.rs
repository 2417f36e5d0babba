//! Verifier acceptance and rejection over parsed modules.

use basil::il::{Opcode, Terminator, Value};
use basil::text::parse_module;
use basil::verify::verify_module;

#[test]
fn accepts_structured_control_flow() {
    let src = "\
func @max(%a: i64, %b: i64) -> i64 {
entry:
  %c = icmp_sge %a, %b
  cbr %c, bigger, smaller
bigger:
  ret %a
smaller:
  ret %b
}
";
    let m = parse_module("t.il", src).unwrap();
    assert!(verify_module(&m).is_ok());
}

#[test]
fn rejects_branch_to_entry_block() {
    let src = "\
func @f() -> void {
entry:
  br next
next:
  br entry
}
";
    let m = parse_module("t.il", src).unwrap();
    let report = verify_module(&m);
    assert!(report
        .errors
        .iter()
        .any(|e| e.message.contains("entry block")));
}

#[test]
fn every_accepted_use_is_dominated() {
    // Values defined in the loop header flow into both exits; the verifier
    // accepts exactly because header dominates them.
    let src = "\
func @f(%n: i64) -> i64 {
entry:
  br head(0)
head(%i: i64):
  %next = add %i, 1
  %c = icmp_slt %next, %n
  cbr %c, head(%next), out
out:
  ret %next
}
";
    let m = parse_module("t.il", src).unwrap();
    let report = verify_module(&m);
    assert!(report.is_ok(), "errors: {:?}", report.errors);
}

#[test]
fn accumulates_every_violation_in_one_pass() {
    // Build a function with several independent defects; the parser would
    // refuse this, so construct it directly.
    let mut m = basil::Module::new();
    let fname = m.interner.intern("broken");
    let entry = m.interner.intern("entry");
    let orphan = m.interner.intern("orphan");
    let mut f = basil::Function::new(fname, basil::Type::I64);

    let t0 = f.new_temp(basil::Type::I64, None);
    let t1 = f.new_temp(basil::Type::F64, None);

    let mut b0 = basil::il::BasicBlock::new(entry);
    // Defect 1: operand is a float temp where i64 is required.
    b0.instrs.push(basil::Instr::new(
        Opcode::Add,
        Some(t0),
        basil::Type::I64,
        vec![Value::Temp(t1), Value::ConstInt(1)],
    ));
    // Defect 2: %t1 is never defined anywhere.
    b0.term = Some(Terminator::Ret(Some(Value::Temp(t0))));
    f.blocks.push(b0);

    // Defect 3: second block has no terminator.
    let b1 = basil::il::BasicBlock::new(orphan);
    f.blocks.push(b1);

    m.functions.push(f);
    let report = verify_module(&m);
    assert!(report.errors.len() >= 3, "got: {:?}", report.errors);
}

#[test]
fn report_serializes_for_tooling() {
    let src = "func @f() -> void {\nentry:\n  ret\n}\n";
    let m = parse_module("t.il", src).unwrap();
    let report = verify_module(&m);
    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"errors\":[]"));
}

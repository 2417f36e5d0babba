//! Pass pipeline properties: statistics, verification after every pass,
//! idempotence, and trap preservation.

use basil::opt::{create_pass, PassManager, PassStats, DEFAULT_PIPELINE};
use basil::text::{parse_module, print_module};
use basil::verify::verify_module;

fn parsed(src: &str) -> basil::Module {
    let m = parse_module("test.il", src).unwrap();
    let report = verify_module(&m);
    assert!(report.is_ok(), "verify errors: {:?}", report.errors);
    m
}

fn run_pipeline(src: &str, names: &[&str]) -> (basil::Module, Vec<PassStats>) {
    let mut m = parsed(src);
    let stats = PassManager::from_names(names)
        .unwrap()
        .with_verify_each(true)
        .run(&mut m)
        .unwrap();
    (m, stats)
}

/// Two promotable slots, five loads, three stores
const TWO_SLOTS: &str = "\
func @main() -> i64 {
entry:
  %x = alloca 8
  %y = alloca 8
  store i64, %x, 10
  store i64, %y, 20
  %a = load i64, %x
  %b = load i64, %y
  %s = add %a, %b
  store i64, %x, %s
  %c = load i64, %x
  %d = load i64, %x
  %e = load i64, %y
  %t = add %c, %d
  %u = add %t, %e
  ret %u
}
";

#[test]
fn mem2reg_statistics_are_exact() {
    let (m, stats) = run_pipeline(TWO_SLOTS, &["mem2reg"]);
    let s = &stats[0];
    assert_eq!(s.get("promoted"), 2);
    assert_eq!(s.get("loads_removed"), 5);
    assert_eq!(s.get("stores_removed"), 3);

    let text = print_module(&m);
    assert!(!text.contains("alloca"), "got:\n{text}");
    assert!(!text.contains("load"), "got:\n{text}");
    assert!(!text.contains("store"), "got:\n{text}");
}

#[test]
fn mem2reg_result_computes_the_same_value() {
    use basil::debug::DebugController;
    use basil::vm::{ExitStatus, Vm, VmOptions};

    let (m, _) = run_pipeline(TWO_SLOTS, &["mem2reg", "constfold", "peephole", "dce"]);
    let mut vm = Vm::new(&m, VmOptions::default()).unwrap();
    vm.set_output(Box::new(std::io::sink()));
    match vm.run(&mut DebugController::disabled()).unwrap() {
        // 30 + 30 + 20
        ExitStatus::Normal(v) => assert_eq!(v, 80),
        other => panic!("unexpected exit {other:?}"),
    }
}

#[test]
fn simplifycfg_collapses_equivalent_signatures() {
    // Both edges into each of the two two-parameter blocks carry identical
    // argument vectors, so both signatures collapse to parameterless.
    let src = "\
func @main(%c: i1) -> i64 {
entry:
  %a = add 1, 2
  %b = add 3, 4
  cbr %c, first, second
first:
  br join(%a, %b)
second:
  br join(%a, %b)
join(%x: i64, %y: i64):
  cbr %c, left(%x, %y), right(%x, %y)
left(%p: i64, %q: i64):
  %s = add %p, %q
  ret %s
right(%r: i64, %w: i64):
  %t = sub %r, %w
  ret %t
}
";
    let (m, stats) = run_pipeline(src, &["simplifycfg"]);
    assert_eq!(stats[0].get("params_removed"), 6);
    let text = print_module(&m);
    assert!(text.contains("join:"), "got:\n{text}");
    assert!(text.contains("left:"), "got:\n{text}");
    assert!(text.contains("right:"), "got:\n{text}");
    assert!(text.contains("br join\n"), "got:\n{text}");
    assert!(text.contains("cbr %c, left, right"), "got:\n{text}");
    assert!(verify_module(&m).is_ok());
}

#[test]
fn default_pipeline_is_idempotent_byte_for_byte() {
    let sources = [
        TWO_SLOTS,
        "\
func @main(%n: i64) -> i64 {
entry:
  %v = alloca 8
  store i64, %v, 0
  br head(0)
head(%i: i64):
  %c = icmp_slt %i, %n
  cbr %c, body, done
body:
  %cur = load i64, %v
  %a = add %cur, %i
  %z = mul %a, 1
  store i64, %v, %z
  %i2 = add %i, 1
  br head(%i2)
done:
  %r = load i64, %v
  ret %r
}
",
    ];
    for src in sources {
        let (m1, _) = run_pipeline(src, &DEFAULT_PIPELINE);
        let once = print_module(&m1);
        let (m2, _) = run_pipeline(&once, &DEFAULT_PIPELINE);
        let twice = print_module(&m2);
        assert_eq!(once, twice, "pipeline not idempotent for:\n{src}");
    }
}

#[test]
fn constfold_peephole_dce_second_run_changes_nothing() {
    let src = "\
func @main() -> i64 {
entry:
  %a = add 2, 3
  %b = mul %a, 0
  %c = add %b, 7
  %dead = xor 1, 2
  ret %c
}
";
    let pipeline = ["constfold", "peephole", "dce"];
    let (m1, _) = run_pipeline(src, &pipeline);
    let once = print_module(&m1);
    assert!(once.contains("ret 7"), "got:\n{once}");

    let mut m2 = parse_module("again.il", &once).unwrap();
    let stats = PassManager::from_names(&pipeline)
        .unwrap()
        .run(&mut m2)
        .unwrap();
    assert!(
        stats.iter().all(|s| !s.changed),
        "second run reported changes: {stats:?}"
    );
    assert_eq!(print_module(&m2), once);
}

#[test]
fn every_default_pass_preserves_verification() {
    let src = TWO_SLOTS;
    let mut m = parsed(src);
    for name in DEFAULT_PIPELINE {
        let mut pass = create_pass(name).unwrap();
        pass.run(&mut m).unwrap();
        let report = verify_module(&m);
        assert!(
            report.is_ok(),
            "verifier rejects module after {name}: {:?}",
            report.errors
        );
    }
}

#[test]
fn constfold_keeps_literal_divide_by_zero() {
    let src = "\
func @main() -> i64 {
entry:
  %a = sdiv 5, 0
  ret %a
}
";
    let (m, _) = run_pipeline(src, &DEFAULT_PIPELINE);
    let text = print_module(&m);
    assert!(text.contains("%a = sdiv 5, 0"), "got:\n{text}");
}

#[test]
fn dce_runs_after_peephole_cleanup() {
    let src = "\
func @main(%c: i1) -> i64 {
entry:
  cbr %c, hop(5), end(6)
hop(%v: i64):
  br end(%v)
end(%r: i64):
  ret %r
}
";
    let (m, _) = run_pipeline(src, &["peephole", "dce"]);
    let text = print_module(&m);
    // The forwarding block is bypassed and then unreachable.
    assert!(!text.contains("hop"), "got:\n{text}");
    assert!(text.contains("cbr %c, end(5), end(6)"), "got:\n{text}");
}

#[test]
fn pass_stats_serialize_to_json() {
    let (_, stats) = run_pipeline(TWO_SLOTS, &DEFAULT_PIPELINE);
    let json = serde_json::to_string(&stats).unwrap();
    assert!(json.contains("\"mem2reg\""));
    assert!(json.contains("\"promoted\":2"));
}

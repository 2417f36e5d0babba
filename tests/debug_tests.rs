//! Breakpoints, stepping, watches, and exit behavior of the debug layer.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use basil::debug::script::parse_script;
use basil::debug::{DebugController, DebugOptions};
use basil::text::parse_module;
use basil::verify::verify_module;
use basil::vm::{ExitStatus, Vm, VmOptions};

#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn run_debug(file: &str, src: &str, opts: DebugOptions) -> (ExitStatus, String, DebugController) {
    let module = parse_module(file, src).unwrap();
    let report = verify_module(&module);
    assert!(report.is_ok(), "verify errors: {:?}", report.errors);
    let mut vm = Vm::new(&module, VmOptions::default()).unwrap();
    let buf = SharedBuf::default();
    vm.set_output(Box::new(buf.clone()));
    let mut debug = DebugController::new(opts);
    let status = vm.run(&mut debug).unwrap();
    (status, buf.contents(), debug)
}

/// Block `L3` begins at source line 3 of `foo.il`
const BREAK_MODULE: &str = "\
func @main() -> i64 {
L3:
  %t0 = add 1, 2
  ret %t0
}
";

#[test]
fn source_line_breakpoint_halts_with_code_ten() {
    let (status, out, debug) = run_debug(
        "foo.il",
        BREAK_MODULE,
        DebugOptions {
            breaks: vec!["foo.il:3".to_string()],
            ..Default::default()
        },
    );
    assert!(matches!(status, ExitStatus::Halted));
    assert!(debug.halted_at_break());
    assert_eq!(out, "[BREAK] src=foo.il:3 fn=@main blk=L3 ip=#0\n");
}

#[test]
fn basename_fallback_matches_other_directories() {
    let (status, out, _) = run_debug(
        "foo.il",
        BREAK_MODULE,
        DebugOptions {
            break_srcs: vec!["some/other/dir/foo.il:3".to_string()],
            ..Default::default()
        },
    );
    assert!(matches!(status, ExitStatus::Halted));
    assert!(out.contains("[BREAK] src=some/other/dir/foo.il:3 fn=@main blk=L3 ip=#0"));
}

#[test]
fn label_breakpoint_takes_precedence_over_source_line() {
    let (status, out, _) = run_debug(
        "foo.il",
        BREAK_MODULE,
        DebugOptions {
            breaks: vec!["L3".to_string(), "foo.il:3".to_string()],
            auto_continue: true,
            ..Default::default()
        },
    );
    assert!(matches!(status, ExitStatus::Normal(3)));
    let label_at = out.find("[BREAK] label=L3").expect("label event");
    let src_at = out.find("[BREAK] src=foo.il:3").expect("src event");
    assert!(label_at < src_at, "wrong precedence:\n{out}");
}

#[test]
fn source_breakpoint_fires_once_per_block_execution() {
    // Two instructions share source line 5; the loop body runs three times.
    let src = "\
func @main() -> i64 {
entry:
  br head(0)
head(%i: i64):
  %a = add %i, 1 @prog.bas:5:1
  %b = add %a, 0 @prog.bas:5:8
  %c = icmp_slt %b, 3
  cbr %c, head(%b), done
done:
  ret %i
}
";
    let (status, out, _) = run_debug(
        "loop.il",
        src,
        DebugOptions {
            breaks: vec!["prog.bas:5".to_string()],
            auto_continue: true,
            ..Default::default()
        },
    );
    assert!(matches!(status, ExitStatus::Normal(_)));
    // Three passes through the block, one event each.
    assert_eq!(out.matches("[BREAK]").count(), 3, "got:\n{out}");
}

#[test]
fn watch_reports_value_changes_with_positions() {
    let src = "\
func @main() -> i64 {
entry:
  %t0 = add 0, 0
  %x = add 1, 0
  %t1 = add 0, 0
  %x.1 = add 2, 0
  ret 0
}
";
    let (status, out, _) = run_debug(
        "watch.il",
        src,
        DebugOptions {
            watches: vec!["x".to_string()],
            ..Default::default()
        },
    );
    assert!(matches!(status, ExitStatus::Normal(0)));
    assert_eq!(
        out,
        "[WATCH] x=i64:1  (fn=@main blk=entry ip=#1)\n\
         [WATCH] x=i64:2  (fn=@main blk=entry ip=#3)\n"
    );
}

#[test]
fn watch_is_silent_while_value_is_unchanged() {
    let src = "\
func @main() -> i64 {
entry:
  %x = add 7, 0
  %x.1 = add 7, 0
  %x.2 = add 8, 0
  ret 0
}
";
    let (_, out, _) = run_debug(
        "watch.il",
        src,
        DebugOptions {
            watches: vec!["x".to_string()],
            ..Default::default()
        },
    );
    assert_eq!(out.matches("[WATCH]").count(), 2, "got:\n{out}");
}

#[test]
fn step_halts_after_one_instruction() {
    let (status, _, debug) = run_debug(
        "step.il",
        BREAK_MODULE,
        DebugOptions {
            step: true,
            ..Default::default()
        },
    );
    assert!(matches!(status, ExitStatus::Halted));
    assert!(debug.halted_at_break());
}

#[test]
fn scripted_steps_run_to_completion() {
    let script = parse_script("step\nstep 5\ncontinue\n");
    let (status, _, debug) = run_debug(
        "script.il",
        BREAK_MODULE,
        DebugOptions {
            step: true,
            script,
            ..Default::default()
        },
    );
    assert!(matches!(status, ExitStatus::Normal(3)));
    assert!(!debug.halted_at_break());
}

#[test]
fn unknown_script_commands_emit_debug_diagnostics() {
    let script = parse_script("sing\ncontinue\n");
    let (status, out, _) = run_debug(
        "script.il",
        BREAK_MODULE,
        DebugOptions {
            step: true,
            script,
            ..Default::default()
        },
    );
    assert!(matches!(status, ExitStatus::Normal(3)));
    assert!(out.contains("[DEBUG] ignoring unknown debug command: sing"));
}

#[test]
fn continue_flag_resumes_past_breakpoints() {
    let (status, out, debug) = run_debug(
        "foo.il",
        BREAK_MODULE,
        DebugOptions {
            breaks: vec!["L3".to_string()],
            auto_continue: true,
            ..Default::default()
        },
    );
    assert!(matches!(status, ExitStatus::Normal(3)));
    assert!(!debug.halted_at_break());
    assert!(out.contains("[BREAK] label=L3"));
}

#[test]
fn count_and_time_lines_appear_at_exit() {
    let (_, _, debug) = run_debug(
        "count.il",
        BREAK_MODULE,
        DebugOptions {
            count: true,
            time: true,
            ..Default::default()
        },
    );
    let mut out: Vec<u8> = Vec::new();
    debug.at_exit(3, &mut out);
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("[COUNT] instructions=3"));
    assert!(text.contains("[TIME] wall_ms="));
}

#[test]
fn traces_do_not_change_exit_codes() {
    use basil::debug::TraceMode;
    let plain = run_debug("t.il", BREAK_MODULE, DebugOptions::default());
    let traced = run_debug(
        "t.il",
        BREAK_MODULE,
        DebugOptions {
            trace: Some(TraceMode::Il),
            ..Default::default()
        },
    );
    match (plain.0, traced.0) {
        (ExitStatus::Normal(a), ExitStatus::Normal(b)) => assert_eq!(a, b),
        other => panic!("unexpected exits {other:?}"),
    }
}

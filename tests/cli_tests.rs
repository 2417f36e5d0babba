//! Driver-level tests: command parsing, exit codes, and emitted files.

use std::path::PathBuf;

use clap::Parser;
use tempfile::TempDir;

use basil::cli::{execute, Cli, EXIT_ERROR};

fn write_file(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

const GOOD: &str = "\
func @main() -> i64 {
entry:
  %p = alloca 8
  store i64, %p, 42
  %v = load i64, %p
  ret 0
}
";

const BROKEN: &str = "\
func @main() -> i64 {
entry:
  %v = frobnicate 1, 2
  ret 0
}
";

fn run_cli(args: &[&str]) -> u8 {
    execute(Cli::parse_from(args))
}

#[test]
fn il_verify_accepts_good_module() {
    let dir = TempDir::new().unwrap();
    let file = write_file(&dir, "good.il", GOOD);
    assert_eq!(run_cli(&["ilc", "il-verify", file.to_str().unwrap()]), 0);
}

#[test]
fn il_verify_rejects_parse_errors() {
    let dir = TempDir::new().unwrap();
    let file = write_file(&dir, "bad.il", BROKEN);
    assert_eq!(
        run_cli(&["ilc", "il-verify", file.to_str().unwrap()]),
        EXIT_ERROR
    );
}

#[test]
fn il_dis_round_trips_to_stdout() {
    let dir = TempDir::new().unwrap();
    let file = write_file(&dir, "good.il", GOOD);
    assert_eq!(run_cli(&["ilc", "il-dis", file.to_str().unwrap()]), 0);
}

#[test]
fn run_executes_module() {
    let dir = TempDir::new().unwrap();
    let file = write_file(&dir, "good.il", GOOD);
    assert_eq!(run_cli(&["ilc", "run", file.to_str().unwrap()]), 0);
}

#[test]
fn run_returns_main_value_as_exit_code() {
    let dir = TempDir::new().unwrap();
    let file = write_file(
        &dir,
        "seven.il",
        "func @main() -> i64 {\nentry:\n  ret 7\n}\n",
    );
    assert_eq!(run_cli(&["ilc", "run", file.to_str().unwrap()]), 7);
}

#[test]
fn run_reports_traps_with_error_exit() {
    let dir = TempDir::new().unwrap();
    let file = write_file(
        &dir,
        "trap.il",
        "func @main() -> i64 {\nentry:\n  %d = sdiv 1, 0\n  ret %d\n}\n",
    );
    assert_eq!(
        run_cli(&["ilc", "run", file.to_str().unwrap()]),
        EXIT_ERROR
    );
}

#[test]
fn il_opt_writes_optimized_output() {
    let dir = TempDir::new().unwrap();
    let input = write_file(&dir, "in.il", GOOD);
    let output = dir.path().join("out.il");
    let code = run_cli(&[
        "ilc",
        "il-opt",
        input.to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
        "--mem2reg-stats",
        "--verify-each",
    ]);
    assert_eq!(code, 0);
    let text = std::fs::read_to_string(&output).unwrap();
    assert!(!text.contains("alloca"), "got:\n{text}");
}

#[test]
fn il_opt_honors_pass_overrides() {
    let dir = TempDir::new().unwrap();
    let input = write_file(&dir, "in.il", GOOD);
    let output = dir.path().join("out.il");
    let code = run_cli(&[
        "ilc",
        "il-opt",
        input.to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
        "--passes",
        "constfold,dce",
    ]);
    assert_eq!(code, 0);
    // Without mem2reg the slot survives; dce keeps the observable store.
    let text = std::fs::read_to_string(&output).unwrap();
    assert!(text.contains("alloca"), "got:\n{text}");
}

#[test]
fn il_opt_no_mem2reg_drops_promotion() {
    let dir = TempDir::new().unwrap();
    let input = write_file(&dir, "in.il", GOOD);
    let output = dir.path().join("out.il");
    let code = run_cli(&[
        "ilc",
        "il-opt",
        input.to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
        "--no-mem2reg",
    ]);
    assert_eq!(code, 0);
    let text = std::fs::read_to_string(&output).unwrap();
    assert!(text.contains("alloca"), "got:\n{text}");
}

#[test]
fn il_opt_rejects_unknown_pass_names() {
    let dir = TempDir::new().unwrap();
    let input = write_file(&dir, "in.il", GOOD);
    let output = dir.path().join("out.il");
    let code = run_cli(&[
        "ilc",
        "il-opt",
        input.to_str().unwrap(),
        "-o",
        output.to_str().unwrap(),
        "--passes",
        "vectorize",
    ]);
    assert_eq!(code, EXIT_ERROR);
}

#[test]
fn front_without_linked_frontend_fails_cleanly() {
    let dir = TempDir::new().unwrap();
    let file = write_file(&dir, "prog.bas", "PRINT 1\n");
    let code = run_cli(&[
        "ilc",
        "front",
        "basic",
        "--run",
        file.to_str().unwrap(),
    ]);
    assert_eq!(code, EXIT_ERROR);
}

#[test]
fn run_with_breakpoint_exits_ten() {
    let dir = TempDir::new().unwrap();
    let file = write_file(&dir, "bp.il", GOOD);
    let code = run_cli(&[
        "ilc",
        "run",
        file.to_str().unwrap(),
        "--break",
        "entry",
    ]);
    assert_eq!(code, 10);
}

#[test]
fn debug_script_file_drives_resumption() {
    let dir = TempDir::new().unwrap();
    let file = write_file(&dir, "bp.il", GOOD);
    let script = write_file(&dir, "cmds.txt", "continue\n");
    let code = run_cli(&[
        "ilc",
        "run",
        file.to_str().unwrap(),
        "--break",
        "entry",
        "--debug-cmds",
        script.to_str().unwrap(),
    ]);
    assert_eq!(code, 0);
}

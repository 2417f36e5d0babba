//! Execution observation: breakpoints, stepping, watches, tracing, and
//! counters.
//!
//! The controller is driven by the VM's dispatch loop through small hooks
//! guarded by flags, so observation never alters program semantics or exit
//! codes. "Halted" is simply the interpreter loop returning to the driver;
//! the scripted command stream is the only driver of resumption.

pub mod script;

use std::collections::{HashMap, HashSet};
use std::collections::VecDeque;
use std::io::Write;
use std::time::Instant;

use crate::il::module::Module;
use crate::support::source::{basename, normalize_path, SourceLoc};
use script::DebugCmd;

/// What `--trace` prints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceMode {
    /// One line per retired IL instruction
    Il,
    /// One line per new source location
    Src,
}

/// Everything the driver configures before a run
#[derive(Debug, Default)]
pub struct DebugOptions {
    /// Trace mode, if any
    pub trace: Option<TraceMode>,
    /// `--break` specs: block label or `file:line`
    pub breaks: Vec<String>,
    /// `--break-src` specs: always `file:line`
    pub break_srcs: Vec<String>,
    /// Halt after one instruction
    pub step: bool,
    /// Auto-resume past halts instead of exiting with code 10
    pub auto_continue: bool,
    /// Scripted commands from `--debug-cmds`
    pub script: Vec<DebugCmd>,
    /// Watched scalar names
    pub watches: Vec<String>,
    /// Print the retired-instruction count at exit
    pub count: bool,
    /// Print wall-clock milliseconds at exit (advisory)
    pub time: bool,
}

/// Verdict of a pre-instruction hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugAction {
    /// Keep executing
    Continue,
    /// Return to the driver (exit code 10 without a continuation)
    Halt,
}

struct SrcBreakpoint {
    /// The spec as the user wrote it, echoed in the event
    spec: String,
    file_norm: String,
    file_base: String,
    line: u32,
}

struct Watch {
    name: String,
    last: Option<String>,
}

/// Breakpoint/step/watch/trace state for one VM run
pub struct DebugController {
    label_bps: Vec<String>,
    src_bps: Vec<SrcBreakpoint>,
    script: VecDeque<DebugCmd>,
    /// Remaining instructions before the next step halt
    step_budget: Option<u64>,
    ignore_breakpoints: bool,
    auto_continue: bool,
    watches: Vec<Watch>,
    trace: Option<TraceMode>,
    count: bool,
    time: bool,
    started: Instant,
    fired_this_block: HashSet<usize>,
    last_src: Option<SourceLoc>,
    src_lines: HashMap<u32, Option<Vec<String>>>,
    halted_at_break: bool,
}

impl DebugController {
    /// Build a controller from driver options
    pub fn new(opts: DebugOptions) -> DebugController {
        let mut label_bps = Vec::new();
        let mut src_bps = Vec::new();
        for spec in &opts.breaks {
            match parse_src_spec(spec) {
                Some(bp) => src_bps.push(bp),
                None => label_bps.push(spec.clone()),
            }
        }
        for spec in &opts.break_srcs {
            if let Some(bp) = parse_src_spec(spec) {
                src_bps.push(bp);
            }
        }
        DebugController {
            label_bps,
            src_bps,
            script: opts.script.into(),
            step_budget: opts.step.then_some(1),
            ignore_breakpoints: false,
            auto_continue: opts.auto_continue,
            watches: opts
                .watches
                .into_iter()
                .map(|name| Watch { name, last: None })
                .collect(),
            trace: opts.trace,
            count: opts.count,
            time: opts.time,
            started: Instant::now(),
            fired_this_block: HashSet::new(),
            last_src: None,
            src_lines: HashMap::new(),
            halted_at_break: false,
        }
    }

    /// A controller that observes nothing
    pub fn disabled() -> DebugController {
        Self::new(DebugOptions::default())
    }

    /// True when `--trace=il` is active
    pub fn trace_il(&self) -> bool {
        self.trace == Some(TraceMode::Il)
    }

    /// True when `--trace=src` is active
    pub fn trace_src(&self) -> bool {
        self.trace == Some(TraceMode::Src)
    }

    /// Whether the run ended halted with no continuation (exit code 10)
    pub fn halted_at_break(&self) -> bool {
        self.halted_at_break
    }

    /// Source-line breakpoints re-arm on every block entry
    pub fn on_block_entry(&mut self) {
        self.fired_this_block.clear();
    }

    /// Called before each instruction (and terminator). Fires breakpoints
    /// and step halts; label breakpoints take precedence over source-line
    /// ones at the same instruction.
    #[allow(clippy::too_many_arguments)]
    pub fn before_instr(
        &mut self,
        m: &Module,
        func: &str,
        block: &str,
        ip: usize,
        loc: SourceLoc,
        out: &mut dyn Write,
    ) -> DebugAction {
        let mut fired = false;
        if !self.ignore_breakpoints {
            if ip == 0 && self.label_bps.iter().any(|l| l == block) {
                let _ = writeln!(out, "[BREAK] label={block} fn=@{func} blk={block} ip=#0");
                fired = true;
            }
            if loc.is_known() {
                let path = m.files.path(loc.file).unwrap_or("");
                for (i, bp) in self.src_bps.iter().enumerate() {
                    if self.fired_this_block.contains(&i) || bp.line != loc.line {
                        continue;
                    }
                    if !src_matches(bp, path) {
                        continue;
                    }
                    let _ = writeln!(
                        out,
                        "[BREAK] src={} fn=@{func} blk={block} ip=#{ip}",
                        bp.spec
                    );
                    self.fired_this_block.insert(i);
                    fired = true;
                }
            }
        }
        let step_halt = self.step_budget == Some(0);
        if fired || step_halt {
            self.resolve_halt(out)
        } else {
            DebugAction::Continue
        }
    }

    /// A halt consumes the next scripted command, or returns control to
    /// the driver when the stream is exhausted.
    fn resolve_halt(&mut self, out: &mut dyn Write) -> DebugAction {
        loop {
            match self.script.pop_front() {
                Some(DebugCmd::Step(n)) => {
                    self.step_budget = Some(n);
                    return DebugAction::Continue;
                }
                Some(DebugCmd::Continue) => {
                    self.step_budget = None;
                    self.ignore_breakpoints = true;
                    return DebugAction::Continue;
                }
                Some(DebugCmd::Unknown(cmd)) => {
                    let _ = writeln!(out, "[DEBUG] ignoring unknown debug command: {cmd}");
                }
                None => {
                    if self.auto_continue {
                        self.step_budget = None;
                        return DebugAction::Continue;
                    }
                    self.halted_at_break = true;
                    return DebugAction::Halt;
                }
            }
        }
    }

    /// Called after each retired instruction
    pub fn after_instr(&mut self) {
        if let Some(budget) = self.step_budget.as_mut() {
            *budget = budget.saturating_sub(1);
        }
    }

    /// Emit an `[IL]` trace line (already formatted by the VM)
    pub fn trace_il_line(
        &self,
        func: &str,
        block: &str,
        ip: usize,
        body: &str,
        out: &mut dyn Write,
    ) {
        let _ = writeln!(out, "[IL] fn=@{func} blk={block} ip=#{ip} op={body}");
    }

    /// Emit a `[SRC]` trace line at each new source location
    #[allow(clippy::too_many_arguments)]
    pub fn trace_src_line(
        &mut self,
        m: &Module,
        func: &str,
        block: &str,
        ip: usize,
        loc: SourceLoc,
        out: &mut dyn Write,
    ) {
        if self.last_src == Some(loc) {
            return;
        }
        self.last_src = Some(loc);
        if !loc.is_known() {
            let _ = writeln!(out, "[SRC] <unknown> (fn=@{func} blk={block} ip=#{ip})");
            return;
        }
        let path = m.files.path(loc.file).unwrap_or("<unknown>").to_string();
        let text = self
            .source_line(loc.file, &path, loc.line)
            .unwrap_or_else(|| "<unknown>".to_string());
        let pos = if loc.col != 0 {
            format!("{path}:{}:{}", loc.line, loc.col)
        } else {
            format!("{path}:{}", loc.line)
        };
        let _ = writeln!(out, "[SRC] {pos} (fn=@{func} blk={block} ip=#{ip}) {text}");
    }

    fn source_line(&mut self, file_id: u32, path: &str, line: u32) -> Option<String> {
        let entry = self.src_lines.entry(file_id).or_insert_with(|| {
            std::fs::read_to_string(path)
                .ok()
                .map(|text| text.lines().map(str::to_string).collect())
        });
        entry
            .as_ref()?
            .get(line as usize - 1)
            .map(|s| s.trim().to_string())
    }

    /// Called when a named scalar is written. Fires the watch when the
    /// value differs from the last one seen under that name.
    #[allow(clippy::too_many_arguments)]
    pub fn on_write(
        &mut self,
        name: &str,
        value_text: &str,
        func: &str,
        block: &str,
        ip: usize,
        out: &mut dyn Write,
    ) {
        if self.watches.is_empty() {
            return;
        }
        let base = base_name(name);
        for w in &mut self.watches {
            if w.name != base {
                continue;
            }
            if w.last.as_deref() != Some(value_text) {
                w.last = Some(value_text.to_string());
                let _ = writeln!(
                    out,
                    "[WATCH] {base}={value_text}  (fn=@{func} blk={block} ip=#{ip})"
                );
            }
        }
    }

    /// Emit `[COUNT]`/`[TIME]` lines at exit
    pub fn at_exit(&self, retired: u64, out: &mut dyn Write) {
        if self.count {
            let _ = writeln!(out, "[COUNT] instructions={retired}");
        }
        if self.time {
            let _ = writeln!(out, "[TIME] wall_ms={}", self.started.elapsed().as_millis());
        }
    }
}

/// `file:line` when the suffix is a positive decimal, otherwise a label
fn parse_src_spec(spec: &str) -> Option<SrcBreakpoint> {
    let (file, line) = spec.rsplit_once(':')?;
    let line: u32 = line.parse().ok().filter(|n| *n > 0)?;
    if file.is_empty() {
        return None;
    }
    let file_norm = normalize_path(file);
    let file_base = basename(&file_norm).to_string();
    Some(SrcBreakpoint {
        spec: spec.to_string(),
        file_norm,
        file_base,
        line,
    })
}

/// Full-path comparison after normalization, then the basename fallback
fn src_matches(bp: &SrcBreakpoint, instr_path: &str) -> bool {
    let norm = normalize_path(instr_path);
    norm == bp.file_norm || basename(&norm) == bp.file_base
}

/// Strip a `.N` version suffix so `x.1` and `x.2` watch as `x`
fn base_name(name: &str) -> &str {
    match name.split_once('.') {
        Some((base, rest)) if !base.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) => {
            base
        }
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_break_spec_classification() {
        assert!(parse_src_spec("foo.il:3").is_some());
        assert!(parse_src_spec("dir\\foo.bas:12").is_some());
        assert!(parse_src_spec("loop_head").is_none());
        assert!(parse_src_spec("L3").is_none());
        assert!(parse_src_spec("foo.il:0").is_none());
    }

    #[test]
    fn test_src_matching_with_basename_fallback() {
        let bp = parse_src_spec("src/./prog.bas:7").unwrap();
        assert!(src_matches(&bp, "src/prog.bas"));
        assert!(src_matches(&bp, "other/dir/prog.bas"));
        assert!(!src_matches(&bp, "src/other.bas"));
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("x"), "x");
        assert_eq!(base_name("x.1"), "x");
        assert_eq!(base_name("x.12"), "x");
        assert_eq!(base_name("x.y"), "x.y");
        assert_eq!(base_name("left.over.3"), "left.over");
    }

    #[test]
    fn test_watch_fires_only_on_change() {
        let mut dbg = DebugController::new(DebugOptions {
            watches: vec!["x".to_string()],
            ..Default::default()
        });
        let mut out: Vec<u8> = Vec::new();
        dbg.on_write("x", "i64:1", "main", "entry", 1, &mut out);
        dbg.on_write("x.1", "i64:1", "main", "entry", 2, &mut out);
        dbg.on_write("x.2", "i64:2", "main", "entry", 3, &mut out);
        dbg.on_write("y", "i64:9", "main", "entry", 4, &mut out);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "[WATCH] x=i64:1  (fn=@main blk=entry ip=#1)\n[WATCH] x=i64:2  (fn=@main blk=entry ip=#3)\n"
        );
    }

    #[test]
    fn test_step_budget_halts_without_script() {
        let mut dbg = DebugController::new(DebugOptions {
            step: true,
            ..Default::default()
        });
        let m = Module::new();
        let mut out: Vec<u8> = Vec::new();
        // First instruction runs (budget 1), then the budget is spent.
        assert_eq!(
            dbg.before_instr(&m, "main", "entry", 0, SourceLoc::UNKNOWN, &mut out),
            DebugAction::Continue
        );
        dbg.after_instr();
        assert_eq!(
            dbg.before_instr(&m, "main", "entry", 1, SourceLoc::UNKNOWN, &mut out),
            DebugAction::Halt
        );
        assert!(dbg.halted_at_break());
    }

    #[test]
    fn test_script_drives_resumption() {
        let mut dbg = DebugController::new(DebugOptions {
            step: true,
            script: script::parse_script("warp 9\nstep 2\ncontinue\n"),
            ..Default::default()
        });
        let m = Module::new();
        let mut out: Vec<u8> = Vec::new();
        dbg.after_instr(); // budget 1 -> 0
        // Halt consumes `warp 9` (reported), then `step 2`.
        assert_eq!(
            dbg.before_instr(&m, "main", "entry", 1, SourceLoc::UNKNOWN, &mut out),
            DebugAction::Continue
        );
        assert!(String::from_utf8(out.clone())
            .unwrap()
            .contains("[DEBUG] ignoring unknown debug command: warp 9"));
        dbg.after_instr();
        dbg.after_instr(); // budget 2 -> 0
        // Next halt consumes `continue`; breakpoints are ignored after.
        assert_eq!(
            dbg.before_instr(&m, "main", "entry", 3, SourceLoc::UNKNOWN, &mut out),
            DebugAction::Continue
        );
        assert!(!dbg.halted_at_break());
    }

    #[test]
    fn test_label_breakpoint_fires_once_per_entry() {
        let mut dbg = DebugController::new(DebugOptions {
            breaks: vec!["loop".to_string()],
            auto_continue: true,
            ..Default::default()
        });
        let m = Module::new();
        let mut out: Vec<u8> = Vec::new();
        dbg.on_block_entry();
        dbg.before_instr(&m, "main", "loop", 0, SourceLoc::UNKNOWN, &mut out);
        dbg.before_instr(&m, "main", "loop", 1, SourceLoc::UNKNOWN, &mut out);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("[BREAK]").count(), 1);
    }
}

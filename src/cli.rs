//! The `ilc` driver: run, front, il-opt, il-verify, il-dis.
//!
//! Exit codes: 0 for normal completion, 10 for a debug halt with no script
//! continuation, any other nonzero for a trap or error.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::debug;

use crate::debug::script::parse_script;
use crate::debug::{DebugController, DebugOptions, TraceMode};
use crate::error::Error;
use crate::frontend::FrontendRegistry;
use crate::il::module::Module;
use crate::opt::{PassManager, DEFAULT_PIPELINE};
use crate::support::diag::DiagnosticSink;
use crate::text::{parse_module, print_module};
use crate::verify::verify_module;
use crate::vm::{ExitStatus, Vm, VmOptions};

/// Exit code for a debug halt with no continuation
pub const EXIT_DEBUG_HALT: u8 = 10;
/// Exit code for traps and errors
pub const EXIT_ERROR: u8 = 1;

/// Command-line interface of the `ilc` driver
#[derive(Parser)]
#[command(
    name = "ilc",
    version,
    about = "IL toolchain driver: run, optimize, verify, and print IL modules"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute an IL module
    Run {
        /// The `.il` module to execute
        file: PathBuf,
        #[command(flatten)]
        debug: DebugArgs,
    },
    /// Compile through a registered front end and run the result
    Front {
        /// Front-end name (front ends are registered at link time)
        frontend: String,
        /// Source file to compile and run
        #[arg(long, value_name = "FILE")]
        run: PathBuf,
        #[command(flatten)]
        debug: DebugArgs,
    },
    /// Run optimization passes over an IL module
    #[command(name = "il-opt")]
    IlOpt {
        /// Input module
        input: PathBuf,
        /// Output path for the optimized module
        #[arg(short = 'o', value_name = "FILE")]
        output: PathBuf,
        /// Comma-separated pass list overriding the default pipeline
        #[arg(long, value_delimiter = ',', value_name = "PASS,...")]
        passes: Option<Vec<String>>,
        /// Drop mem2reg from the default pipeline
        #[arg(long)]
        no_mem2reg: bool,
        /// Print mem2reg statistics
        #[arg(long)]
        mem2reg_stats: bool,
        /// Print per-pass statistics as JSON
        #[arg(long)]
        stats_json: bool,
        /// Verify the module after every pass
        #[arg(long)]
        verify_each: bool,
    },
    /// Verify an IL module; exits 0 on success
    #[command(name = "il-verify")]
    IlVerify {
        /// Module to verify
        file: PathBuf,
    },
    /// Parse and canonically reprint an IL module
    #[command(name = "il-dis")]
    IlDis {
        /// Module to reprint
        file: PathBuf,
    },
}

/// Flags shared by the executing commands
#[derive(Args)]
struct DebugArgs {
    /// Trace retired instructions (`il`) or source lines (`src`)
    #[arg(long, value_enum, value_name = "MODE")]
    trace: Option<TraceArg>,
    /// Breakpoint: block label or file:line (repeatable)
    #[arg(long = "break", value_name = "LABEL|FILE:LINE")]
    breaks: Vec<String>,
    /// Source-line breakpoint with normalization and basename fallback
    #[arg(long = "break-src", value_name = "FILE:LINE")]
    break_src: Vec<String>,
    /// Enter debug mode and halt after one instruction
    #[arg(long)]
    step: bool,
    /// Resume automatically past halts instead of exiting with code 10
    #[arg(long = "continue")]
    auto_continue: bool,
    /// Scripted debug commands, one per line
    #[arg(long, value_name = "FILE")]
    debug_cmds: Option<PathBuf>,
    /// Watch a scalar by name (repeatable)
    #[arg(long, value_name = "NAME")]
    watch: Vec<String>,
    /// Print the retired-instruction count at exit
    #[arg(long)]
    count: bool,
    /// Print wall-clock milliseconds at exit
    #[arg(long)]
    time: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TraceArg {
    /// One line per retired IL instruction
    Il,
    /// One line per new source location
    Src,
}

/// Dispatch a parsed command line, returning the process exit code
pub fn execute(cli: Cli) -> u8 {
    match cli.command {
        Command::Run { file, debug } => run_command(&file, debug),
        Command::Front {
            frontend,
            run,
            debug,
        } => front_command(&frontend, &run, debug),
        Command::IlOpt {
            input,
            output,
            passes,
            no_mem2reg,
            mem2reg_stats,
            stats_json,
            verify_each,
        } => il_opt_command(
            &input,
            &output,
            passes,
            no_mem2reg,
            mem2reg_stats,
            stats_json,
            verify_each,
        ),
        Command::IlVerify { file } => il_verify_command(&file),
        Command::IlDis { file } => il_dis_command(&file),
    }
}

fn report(err: &anyhow::Error) -> u8 {
    // Parse errors use the stable `severity: file:line:col: message` shape.
    if let Some(Error::Parse {
        file,
        line,
        col,
        message,
    }) = err.downcast_ref::<Error>()
    {
        eprintln!("error: {file}:{line}:{col}: {message}");
    } else {
        eprintln!("error: {err:#}");
    }
    EXIT_ERROR
}

fn load_module(path: &Path) -> anyhow::Result<Module> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let module = parse_module(&path.to_string_lossy(), &text)?;
    Ok(module)
}

/// Verify and report; true when the module is usable
fn verify_and_report(module: &Module) -> bool {
    let report = verify_module(module);
    for w in &report.warnings {
        eprintln!("warning: {w}");
    }
    for e in &report.errors {
        eprintln!("error: {e}");
    }
    report.is_ok()
}

fn build_controller(args: &DebugArgs) -> anyhow::Result<DebugController> {
    let script = match &args.debug_cmds {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            parse_script(&text)
        }
        None => Vec::new(),
    };
    Ok(DebugController::new(DebugOptions {
        trace: args.trace.map(|t| match t {
            TraceArg::Il => TraceMode::Il,
            TraceArg::Src => TraceMode::Src,
        }),
        breaks: args.breaks.clone(),
        break_srcs: args.break_src.clone(),
        step: args.step,
        auto_continue: args.auto_continue,
        script,
        watches: args.watch.clone(),
        count: args.count,
        time: args.time,
    }))
}

fn run_module(module: &Module, args: &DebugArgs) -> u8 {
    let mut controller = match build_controller(args) {
        Ok(c) => c,
        Err(e) => return report(&e),
    };
    let mut vm = match Vm::new(module, VmOptions::default()) {
        Ok(vm) => vm,
        Err(e) => return report(&anyhow::Error::new(e)),
    };
    let status = vm.run(&mut controller);
    let retired = vm.retired();
    drop(vm);
    controller.at_exit(retired, &mut std::io::stdout());
    match status {
        Ok(ExitStatus::Normal(value)) => (value & 0xff) as u8,
        Ok(ExitStatus::Halted) => EXIT_DEBUG_HALT,
        Ok(ExitStatus::Trapped(info)) => {
            let err = info.into_error();
            let rendered = match &err {
                Error::Trap { loc, .. } if loc.is_known() => {
                    let path = module.files.path(loc.file).unwrap_or("<unknown>");
                    format!("{err} at {path}:{}:{}", loc.line, loc.col)
                }
                _ => err.to_string(),
            };
            eprintln!("error: {rendered}");
            EXIT_ERROR
        }
        Err(e) => report(&anyhow::Error::new(e)),
    }
}

fn run_command(file: &Path, args: DebugArgs) -> u8 {
    let module = match load_module(file) {
        Ok(m) => m,
        Err(e) => return report(&e),
    };
    if !verify_and_report(&module) {
        return EXIT_ERROR;
    }
    run_module(&module, &args)
}

fn front_command(frontend: &str, file: &Path, args: DebugArgs) -> u8 {
    let registry = FrontendRegistry::new();
    let fe = match registry.get(frontend) {
        Ok(fe) => fe,
        Err(e) => return report(&anyhow::Error::new(e)),
    };
    let source = match std::fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) => return report(&anyhow::Error::new(Error::io(file.to_string_lossy(), &e))),
    };
    let mut sink = DiagnosticSink::new();
    let module = match fe.compile(&source, &file.to_string_lossy(), &mut sink) {
        Ok(m) => m,
        Err(e) => {
            for line in sink.flush(&crate::support::source::SourceManager::new()) {
                eprintln!("{line}");
            }
            return report(&anyhow::Error::new(e));
        }
    };
    // The core never trusts a front end's module unverified.
    if !verify_and_report(&module) {
        return EXIT_ERROR;
    }
    run_module(&module, &args)
}

#[allow(clippy::too_many_arguments)]
fn il_opt_command(
    input: &Path,
    output: &Path,
    passes: Option<Vec<String>>,
    no_mem2reg: bool,
    mem2reg_stats: bool,
    stats_json: bool,
    verify_each: bool,
) -> u8 {
    let mut module = match load_module(input) {
        Ok(m) => m,
        Err(e) => return report(&e),
    };
    if !verify_and_report(&module) {
        return EXIT_ERROR;
    }

    let names: Vec<String> = match passes {
        Some(list) => list,
        None => DEFAULT_PIPELINE
            .iter()
            .filter(|p| !(no_mem2reg && **p == "mem2reg"))
            .map(|p| p.to_string())
            .collect(),
    };
    debug!(pipeline = ?names, "running il-opt");

    let mut manager = match PassManager::from_names(&names) {
        Ok(m) => m,
        Err(e) => return report(&anyhow::Error::new(e)),
    };
    let stats = match manager.with_verify_each(verify_each).run(&mut module) {
        Ok(stats) => stats,
        Err(e) => return report(&anyhow::Error::new(e)),
    };

    if mem2reg_stats {
        if let Some(s) = stats.iter().find(|s| s.pass == "mem2reg") {
            println!(
                "mem2reg: promoted={}, loads_removed={}, stores_removed={}",
                s.get("promoted"),
                s.get("loads_removed"),
                s.get("stores_removed")
            );
        }
    }
    if stats_json {
        match serde_json::to_string_pretty(&stats) {
            Ok(json) => println!("{json}"),
            Err(e) => return report(&anyhow::Error::new(e).context("serializing pass stats")),
        }
    }

    if !verify_and_report(&module) {
        eprintln!("error: optimized module failed verification");
        return EXIT_ERROR;
    }
    if let Err(e) = std::fs::write(output, print_module(&module)) {
        return report(&anyhow::Error::new(Error::io(output.to_string_lossy(), &e)));
    }
    0
}

fn il_verify_command(file: &Path) -> u8 {
    let module = match load_module(file) {
        Ok(m) => m,
        Err(e) => return report(&e),
    };
    if verify_and_report(&module) {
        0
    } else {
        EXIT_ERROR
    }
}

fn il_dis_command(file: &Path) -> u8 {
    match load_module(file) {
        Ok(module) => {
            print!("{}", print_module(&module));
            0
        }
        Err(e) => report(&e),
    }
}

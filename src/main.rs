//! Command-line front end: assembles a MIPS source file and optionally runs it.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mips_ensemble::asm::{assemble, Program};
use mips_ensemble::ast::Reg;
use mips_ensemble::err::Problem;
use mips_ensemble::sim::debug::Breakpoint;
use mips_ensemble::sim::exec::Executor;
use mips_ensemble::sim::io::{ChannelIO, SyscallIO};
use mips_ensemble::sim::mem::{Addr, MachineInitStrategy};
use mips_ensemble::sim::{CpuState, ExecState, Fault, HaltReason, PauseReason, SimFlags, Simulator};

/// Exit status when the source has problems or cannot be read.
const EXIT_ASM: u8 = 1;
/// Exit status when the program faults.
const EXIT_FAULT: u8 = 2;
/// Exit status when `--max-steps` is reached before the program halts.
const EXIT_LIMIT: u8 = 3;

/// Largest `--stack-size`, since the whole stack is allocated when the program is loaded.
const MAX_STACK_SIZE: u32 = 64 << 20;

#[derive(Parser, Debug)]
#[command(
    name = "mips-ensemble",
    version,
    about = "Assembles and simulates MIPS assembly programs",
    long_about = "Assembles and simulates MIPS assembly programs.

Logging is controlled with the RUST_LOG environment variable (default: warn)
and is written to stderr."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Assemble a file and report every problem found.
    Check {
        /// The assembly source file.
        file: PathBuf,
        #[arg(
            long = "json",
            action = ArgAction::SetTrue,
            long_help = "Print problems as a JSON array of {message, line, rangeStart, rangeEnd} records."
        )]
        json: bool,
    },
    /// Assemble a file and execute it, using the console for syscall IO.
    Run(RunArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// The assembly source file.
    file: PathBuf,
    #[arg(
        long = "heap-size",
        value_name = "BYTES",
        long_help = "The largest size the heap can grow to through sbrk. Defaults to 4 MiB."
    )]
    heap_size: Option<u32>,
    #[arg(
        long = "stack-size",
        value_name = "BYTES",
        value_parser = clap::value_parser!(u32).range(..=i64::from(MAX_STACK_SIZE)),
        long_help = "The size of the stack segment, at most 64 MiB. Defaults to 1 MiB."
    )]
    stack_size: Option<u32>,
    #[arg(
        long = "delay-ms",
        value_name = "MS",
        long_help = "Wait this many milliseconds between instructions."
    )]
    delay_ms: Option<u64>,
    #[arg(
        long = "seed",
        value_name = "SEED",
        long_help = "Fill registers and uninitialized memory with random values generated from SEED instead of zero."
    )]
    seed: Option<u64>,
    #[arg(
        long = "no-overflow-traps",
        action = ArgAction::SetTrue,
        long_help = "Let add, addi, and sub wrap on signed overflow instead of faulting."
    )]
    no_overflow_traps: bool,
    #[arg(
        long = "max-steps",
        value_name = "N",
        long_help = "Stop after executing N instructions."
    )]
    max_steps: Option<u64>,
    #[arg(
        long = "step",
        action = ArgAction::SetTrue,
        long_help = "Execute one instruction at a time, printing each instruction and its source line to stderr."
    )]
    step: bool,
    #[arg(
        long = "break",
        value_name = "LABEL",
        long_help = "Print the registers whenever execution reaches LABEL. Can be repeated."
    )]
    breaks: Vec<String>,
}
impl RunArgs {
    fn flags(&self) -> SimFlags {
        let mut flags = SimFlags::default();
        if let Some(heap) = self.heap_size {
            flags.heap_budget = heap;
        }
        if let Some(stack) = self.stack_size {
            flags.stack_budget = stack;
        }
        if let Some(seed) = self.seed {
            flags.machine_init = MachineInitStrategy::Seeded { seed };
        }
        flags.trap_overflow = !self.no_overflow_traps;
        flags.step_delay = self.delay_ms.map(Duration::from_millis);
        flags
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Check { file, json } => check(&file, json),
        Command::Run(args) => run(&args),
    }
}

fn read_source(path: &Path) -> Result<String, ExitCode> {
    std::fs::read_to_string(path).map_err(|e| {
        eprintln!("error: cannot read {}: {e}", path.display());
        ExitCode::from(EXIT_ASM)
    })
}

fn report_problems(path: &Path, problems: &[Problem]) {
    for p in problems {
        eprintln!("{}: {p}", path.display());
        if let Some(help) = p.help() {
            eprintln!("    help: {help}");
        }
    }
}

fn check(path: &Path, json: bool) -> ExitCode {
    let src = match read_source(path) {
        Ok(src) => src,
        Err(code) => return code,
    };
    let asm = assemble(&src);

    if json {
        match serde_json::to_string_pretty(&asm.problems) {
            Ok(out) => println!("{out}"),
            Err(e) => {
                eprintln!("error: cannot serialize problems: {e}");
                return ExitCode::from(EXIT_ASM);
            }
        }
    } else {
        report_problems(path, &asm.problems);
    }

    match asm.is_ok() {
        true  => ExitCode::SUCCESS,
        false => ExitCode::from(EXIT_ASM),
    }
}

fn run(args: &RunArgs) -> ExitCode {
    let src = match read_source(&args.file) {
        Ok(src) => src,
        Err(code) => return code,
    };
    let program = match assemble(&src).into_result() {
        Ok(program) => program,
        Err(problems) => {
            report_problems(&args.file, &problems);
            return ExitCode::from(EXIT_ASM);
        }
    };

    let mut sim = Simulator::new(args.flags());
    sim.load_program(&program);
    for label in &args.breaks {
        match program.lookup_label(label) {
            Some(addr) => { sim.breakpoints.insert(Breakpoint::PC(addr)); },
            None => {
                eprintln!("error: no label named {label:?}");
                return ExitCode::from(EXIT_ASM);
            }
        }
    }

    let io: Arc<dyn SyscallIO> = Arc::new(ChannelIO::stdio());
    sim.open_shared_io(Arc::clone(&io));

    let end = match args.step || args.max_steps.is_some() {
        true  => run_inline(sim, &program, args),
        false => run_threaded(sim, &program),
    };
    io.flush();

    match end {
        ExecState::Halted(HaltReason::Exit { code }) => ExitCode::from(code as u8),
        ExecState::Halted(HaltReason::Stopped) => ExitCode::SUCCESS,
        ExecState::Faulted(fault) => {
            report_fault(&fault, &program);
            ExitCode::from(EXIT_FAULT)
        },
        ExecState::Paused(PauseReason::Tripwire) => {
            eprintln!("stopped after {} instructions", args.max_steps.unwrap_or_default());
            ExitCode::from(EXIT_LIMIT)
        },
        state => {
            eprintln!("execution ended while {state:?}");
            ExitCode::from(EXIT_FAULT)
        }
    }
}

/// Runs the program on an execution thread until it halts or faults.
fn run_threaded(sim: Simulator, program: &Program) -> ExecState {
    let exec = Executor::spawn(sim);
    exec.resume();
    loop {
        match exec.wait_until_finished() {
            ExecState::Paused(reason) => {
                report_pause(reason, exec.cpu(), program);
                exec.resume();
            },
            state => break state,
        }
    }
}

/// Runs the program on this thread, one instruction at a time if `--step` is set.
fn run_inline(mut sim: Simulator, program: &Program, args: &RunArgs) -> ExecState {
    loop {
        let remaining = args.max_steps.map(|max| max.saturating_sub(sim.instructions_run));
        if remaining == Some(0) {
            break ExecState::Paused(PauseReason::Tripwire);
        }

        let result = match args.step {
            true => {
                let pc = sim.prefetch_pc();
                let result = sim.step_in();
                print_trace(pc, program);
                result
            },
            false => match remaining {
                Some(n) => sim.run_with_limit(n),
                None => sim.run(),
            },
        };
        if let Err(fault) = result {
            break ExecState::Faulted(fault);
        }

        match sim.state().clone() {
            ExecState::Paused(PauseReason::Step | PauseReason::Tripwire) => {},
            ExecState::Paused(reason) => report_pause(reason, sim.cpu(), program),
            state if state.is_terminal() => break state,
            _ => {},
        }
    }
}

fn print_trace(pc: Addr, program: &Program) {
    let instr = program.instr_at(pc).map(|i| i.to_string()).unwrap_or_default();
    match program.line_of(pc).and_then(|l| Some((l, program.source_info().read_line(l.checked_sub(1)?)?))) {
        Some((line, text)) => eprintln!("{pc}  {instr:<24} # {line}: {text}"),
        None => eprintln!("{pc}  {instr}"),
    }
}

fn report_pause(reason: PauseReason, cpu: &CpuState, program: &Program) {
    let pc = cpu.pc();
    match program.rev_lookup_label(pc) {
        Some(label) => eprintln!("{reason} at {pc} ({label})"),
        None => eprintln!("{reason} at {pc}"),
    }
    let regs = cpu.regs();
    let cells: Vec<_> = (0..32u8)
        .filter_map(|n| Reg::try_from(n).ok())
        .map(|r| format!("{:>5} = 0x{:08X}", r.name(), regs[r]))
        .collect();
    for row in cells.chunks(4) {
        eprintln!("  {}", row.join("  "));
    }
    eprintln!("     hi = 0x{:08X}     lo = 0x{:08X}", regs.hi, regs.lo);
}

fn report_fault(fault: &Fault, program: &Program) {
    eprintln!("fault: {fault}");
    if let Some(text) = fault.line.and_then(|l| program.source_info().read_line(l.checked_sub(1)?)) {
        eprintln!("    {text}");
    }
    if let Some(help) = mips_ensemble::err::Error::help(fault) {
        eprintln!("    help: {help}");
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn run_args(args: &[&str]) -> Result<RunArgs, clap::Error> {
        let cli = Cli::try_parse_from(["mips-ensemble", "run", "prog.s"].iter().chain(args))?;
        match cli.command {
            Command::Run(args) => Ok(args),
            Command::Check { .. } => unreachable!(),
        }
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags() {
        let flags = run_args(&["--heap-size", "64", "--seed", "9", "--no-overflow-traps", "--delay-ms", "5"]).unwrap().flags();
        assert_eq!(flags.heap_budget, 64);
        assert_eq!(flags.machine_init, MachineInitStrategy::Seeded { seed: 9 });
        assert!(!flags.trap_overflow);
        assert_eq!(flags.step_delay, Some(Duration::from_millis(5)));
    }

    #[test]
    fn test_stack_size_is_capped() {
        let max = MAX_STACK_SIZE.to_string();
        assert_eq!(run_args(&["--stack-size", &max]).unwrap().flags().stack_budget, MAX_STACK_SIZE);
        assert!(run_args(&["--stack-size", "4294967295"]).is_err());
    }
}

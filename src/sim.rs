//! Simulating and execution for MIPS assembly.
//!
//! This module is focused on executing fully assembled code (i.e., [`Program`]).
//!
//! This module consists of:
//! - [`Simulator`]: The struct that simulates assembled code.
//! - [`mem`]: The module handling words, addresses, registers, and memory.
//! - [`io`]: The module handling the IO performed by syscalls.
//! - [`exec`]: The module running a simulator on its own thread, controlled by commands.
//! - [`debug`]: The module handling types of breakpoints for the simulator.
//! - [`frame`]: The module handling the frame stack and call frame management.
//! - [`observer`]: The module handling events sent to the simulator's subscribers.
//!
//! # Usage
//!
//! To simulate some code, you need to instantiate a Simulator and load a program into it:
//!
//! ```
//! use mips_ensemble::asm::assemble;
//! use mips_ensemble::sim::Simulator;
//!
//! let program = assemble("main: li $v0, 10\n syscall").into_result().unwrap();
//! let mut simulator = Simulator::new(Default::default());
//! simulator.load_program(&program);
//! simulator.run().unwrap();
//! ```
//!
//! ## Flags
//!
//! Here, we define `simulator` to have the default flags.
//! We could also configure the simulator by editing the flags. For example,
//! if we wish for `add` to wrap instead of faulting on overflow, we can edit the flags like so:
//!
//! ```
//! # use mips_ensemble::sim::{Simulator, SimFlags};
//! let mut simulator = Simulator::new(SimFlags { trap_overflow: false, ..Default::default() });
//! ```
//!
//! All of the available flags can be found in [`SimFlags`].
//!
//! ## Execution
//!
//! Beyond the basic [`Simulator::run`] (which runs until halting),
//! there are also:
//! - [`Simulator::step_in`], [`Simulator::step_out`], [`Simulator::step_over`]: manual step-by-step simulation
//! - [`Simulator::run_while`], [`Simulator::run_with_limit`]: more advanced programmatic execution
//!
//! ```
//! use mips_ensemble::asm::assemble;
//! use mips_ensemble::sim::Simulator;
//! use mips_ensemble::ast::reg_consts::T0;
//!
//! let src = "
//! main:
//!     li    $t0, 0
//!     addiu $t0, $t0, 1
//!     addiu $t0, $t0, 1
//!     addiu $t0, $t0, 1
//!     li    $v0, 10
//!     syscall
//! ";
//! let program = assemble(src).into_result().unwrap();
//!
//! let mut sim = Simulator::new(Default::default());
//! sim.load_program(&program);
//!
//! // Running step by step:
//! sim.step_in().unwrap();
//! assert_eq!(sim.cpu().reg(T0).get(), 0);
//! sim.step_in().unwrap();
//! assert_eq!(sim.cpu().reg(T0).get(), 1);
//! sim.step_in().unwrap();
//! assert_eq!(sim.cpu().reg(T0).get(), 2);
//! sim.step_in().unwrap();
//! assert_eq!(sim.cpu().reg(T0).get(), 3);
//! ```
//!
//! ## Querying State
//!
//! The registers, PC, and memory live in a [`CpuState`], which is shared behind an `Arc`.
//! Other threads can hold onto it (see [`Simulator::cpu`]) to read the machine's state
//! while it runs. Only the simulator can modify it.
//!
//! To run the simulator on its own thread, see [`exec::Executor`].

pub mod mem;
pub mod io;
pub mod exec;
pub mod debug;
pub mod frame;
pub mod observer;

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use crossbeam_channel as cbc;

use crate::asm::Program;
use crate::ast::reg_consts::{A0, A1, RA, V0};
use crate::ast::sim::{AluOp, HiLo, ImmOp, MemWidth, MulDivOp, ShiftOp, SimInstr};
use crate::ast::Reg;

use self::debug::Breakpoint;
use self::frame::FrameStack;
use self::io::{EmptyIO, IOStream, ReadErr, SyscallIO};
use self::mem::{Addr, HeapErr, MachineInitStrategy, Mem, MemConfig, MemErr, RegFile, RegSnapshot, Word, TEXT_START};
use self::observer::{EventBus, SimEvent};

/// Errors that can occur during simulation.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum SimErr {
    /// The word at the PC is not a supported instruction.
    IllegalInstruction(u32),
    /// A memory access failed (this includes failing to grow the heap).
    Mem(MemErr),
    /// A trapping arithmetic instruction (`add`, `addi`, `sub`) overflowed.
    IntegerOverflow,
    /// `div` or `divu` was executed with a divisor of zero.
    DivideByZero,
    /// A syscall was executed with an unknown code in `$v0`.
    InvalidSyscall(u32),
    /// Input read by a syscall was not an integer.
    MalformedInput(String),
    /// A syscall tried to read input, but there is no more input.
    InputClosed,
    /// The PC is outside of the program's instructions.
    PcOutOfText(Addr),
}
impl std::fmt::Display for SimErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimErr::IllegalInstruction(w) => write!(f, "illegal instruction 0x{w:08X}"),
            SimErr::Mem(e)            => e.fmt(f),
            SimErr::IntegerOverflow   => f.write_str("arithmetic overflow"),
            SimErr::DivideByZero      => f.write_str("division by zero"),
            SimErr::InvalidSyscall(c) => write!(f, "invalid syscall code {c}"),
            SimErr::MalformedInput(s) => write!(f, "could not read {s:?} as an integer"),
            SimErr::InputClosed       => f.write_str("tried to read input, but input is closed"),
            SimErr::PcOutOfText(pc)   => write!(f, "PC {pc} is outside of the program's instructions"),
        }
    }
}
impl std::error::Error for SimErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimErr::Mem(e) => Some(e),
            _ => None
        }
    }
}
impl crate::err::Error for SimErr {
    fn span(&self) -> Option<crate::err::ErrSpan> {
        None
    }

    fn help(&self) -> Option<Cow<str>> {
        match self {
            SimErr::IllegalInstruction(_) => Some("the program may have jumped somewhere that isn't code".into()),
            SimErr::Mem(e) => crate::err::Error::help(e),
            SimErr::IntegerOverflow => Some("use addu, addiu, or subu for arithmetic which wraps".into()),
            SimErr::DivideByZero => None,
            SimErr::InvalidSyscall(_) => Some("the syscall code is read from $v0".into()),
            SimErr::MalformedInput(_) => Some("enter a decimal integer".into()),
            SimErr::InputClosed => None,
            SimErr::PcOutOfText(_) => Some("use syscall 10 to exit the program instead of running past its end".into()),
        }
    }
}
impl From<MemErr> for SimErr {
    fn from(value: MemErr) -> Self {
        SimErr::Mem(value)
    }
}
impl From<HeapErr> for SimErr {
    fn from(value: HeapErr) -> Self {
        SimErr::Mem(MemErr::Heap(value))
    }
}

/// An error during simulation, along with where it occurred.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Fault {
    /// The address of the faulting instruction.
    pub pc: Addr,
    /// The source line (1-indexed) of the faulting instruction, if known.
    pub line: Option<usize>,
    /// The error.
    pub err: SimErr
}
impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{} (at {}, line {line})", self.err, self.pc),
            None => write!(f, "{} (at {})", self.err, self.pc),
        }
    }
}
impl std::error::Error for Fault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.err)
    }
}
impl crate::err::Error for Fault {
    fn span(&self) -> Option<crate::err::ErrSpan> {
        None
    }

    fn help(&self) -> Option<Cow<str>> {
        crate::err::Error::help(&self.err)
    }
}

/// Why execution halted.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum HaltReason {
    /// The program exited (through syscall 10 or 17).
    Exit {
        /// The exit code (0 for syscall 10).
        code: i32
    },
    /// Execution was stopped from outside the program.
    Stopped
}
impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HaltReason::Exit { code } => write!(f, "exited with code {code}"),
            HaltReason::Stopped => f.write_str("stopped"),
        }
    }
}

/// Why execution paused.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum PauseReason {
    /// A breakpoint was hit.
    Breakpoint,
    /// A `break` instruction was executed.
    BreakInstruction,
    /// A step finished.
    Step,
    /// The condition of [`Simulator::run_while`] failed.
    Tripwire,
    /// A pause was requested from outside the program.
    Requested,
    /// A syscall's read was cancelled. Resuming reruns the syscall.
    ReadCancelled,
}
impl std::fmt::Display for PauseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PauseReason::Breakpoint       => f.write_str("hit breakpoint"),
            PauseReason::BreakInstruction => f.write_str("executed break"),
            PauseReason::Step             => f.write_str("stepped"),
            PauseReason::Tripwire         => f.write_str("condition ended"),
            PauseReason::Requested        => f.write_str("paused"),
            PauseReason::ReadCancelled    => f.write_str("read cancelled"),
        }
    }
}

/// The state of execution.
///
/// `Halted` and `Faulted` are terminal.
/// Only loading a program again (or [`Simulator::reset`]) leaves them.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ExecState {
    /// A program was loaded and has not executed yet.
    Loaded,
    /// The program is executing.
    Running,
    /// Execution is paused between instructions.
    Paused(PauseReason),
    /// Execution finished.
    Halted(HaltReason),
    /// Execution stopped on an error.
    Faulted(Fault),
}
impl ExecState {
    /// Whether execution can no longer continue.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecState::Halted(_) | ExecState::Faulted(_))
    }
}

/// Anything that can cause a step to abruptly end.
enum StepBreak {
    /// The program halted.
    Halt(HaltReason),
    /// The program asked to pause.
    Pause(PauseReason),
    /// A read was cancelled. The instruction has to be executed again.
    Cancelled,
    /// An error occurred.
    Err(SimErr),
}
impl From<SimErr> for StepBreak {
    fn from(value: SimErr) -> Self {
        Self::Err(value)
    }
}
impl From<MemErr> for StepBreak {
    fn from(value: MemErr) -> Self {
        Self::Err(SimErr::Mem(value))
    }
}
impl From<ReadErr> for StepBreak {
    fn from(value: ReadErr) -> Self {
        match value {
            ReadErr::Cancelled => StepBreak::Cancelled,
            ReadErr::Closed => StepBreak::Err(SimErr::InputClosed),
            ReadErr::Malformed(s) => StepBreak::Err(SimErr::MalformedInput(s)),
        }
    }
}

/// Configuration flags for [`Simulator`].
///
/// These can be modified after the `Simulator` is created with [`Simulator::new`]
/// and their effects should still apply.
/// The memory flags apply on the next [`Simulator::load_program`] or [`Simulator::reset`].
///
/// Read the field descriptions for more details.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SimFlags {
    /// The creation strategy for uninitialized registers and memory.
    ///
    /// By default, this is `Known { value: 0 }`.
    pub machine_init: MachineInitStrategy,

    /// The largest size (in bytes) the heap can grow to.
    ///
    /// By default, this is 4 MiB.
    pub heap_budget: u32,

    /// The size (in bytes) of the stack.
    ///
    /// The whole stack is allocated when a program is loaded.
    /// By default, this is 1 MiB.
    pub stack_budget: u32,

    /// Whether `add`, `addi`, and `sub` fault on signed overflow.
    ///
    /// If false, they wrap like their unsigned variants.
    /// By default, this is true.
    pub trap_overflow: bool,

    /// The delay between instructions when running in an [`exec::Executor`].
    ///
    /// By default, this is `None` (no delay).
    pub step_delay: Option<Duration>,

    /// Whether to keep track of the information of each call frame.
    ///
    /// The depth of the frame stack is always tracked.
    /// By default, this is false.
    pub debug_frames: bool,
}
impl SimFlags {
    fn mem_config(&self) -> MemConfig {
        MemConfig { heap_budget: self.heap_budget, stack_budget: self.stack_budget }
    }
}
impl Default for SimFlags {
    fn default() -> Self {
        let MemConfig { heap_budget, stack_budget } = MemConfig::default();
        Self {
            machine_init: Default::default(),
            heap_budget,
            stack_budget,
            trap_overflow: true,
            step_delay: None,
            debug_frames: false,
        }
    }
}

/// The registers, PC, and memory of the machine.
///
/// This can be shared with other threads (see [`Simulator::cpu`]) to inspect
/// the machine while the simulator is running.
/// It can only be modified by the simulator.
#[derive(Debug)]
pub struct CpuState {
    reg_file: RegFile,
    pc: AtomicU32,
    mem: RwLock<Mem>,
}
impl CpuState {
    /// The program counter.
    pub fn pc(&self) -> Addr {
        Addr::new(self.pc.load(Ordering::Acquire))
    }
    fn set_pc(&self, addr: Addr) {
        self.pc.store(addr.get(), Ordering::Release);
    }

    /// Reads a register.
    pub fn reg(&self, reg: Reg) -> Word {
        self.reg_file.get(reg)
    }
    /// Reads the `hi` register.
    pub fn hi(&self) -> Word {
        self.reg_file.hi()
    }
    /// Reads the `lo` register.
    pub fn lo(&self) -> Word {
        self.reg_file.lo()
    }
    /// Copies the values of every register.
    pub fn regs(&self) -> RegSnapshot {
        self.reg_file.snapshot()
    }

    /// Accesses memory.
    ///
    /// The simulator waits for this guard to be dropped before writing memory,
    /// so this should not be held for long.
    pub fn mem(&self) -> RwLockReadGuard<'_, Mem> {
        self.mem.read().unwrap_or_else(PoisonError::into_inner)
    }
    fn mem_mut(&self) -> RwLockWriteGuard<'_, Mem> {
        self.mem.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Executes assembled code.
pub struct Simulator {
    cpu: Arc<CpuState>,
    program: Option<Program>,

    /// The number of instructions successfully run since this `Simulator` was last loaded or reset.
    pub instructions_run: u64,

    /// The address of the instruction being executed, if one is being executed.
    executing: Option<Addr>,

    state: ExecState,

    /// The frame stack.
    pub frame_stack: FrameStack,

    /// Configuration settings for the simulator.
    ///
    /// These are preserved between resets.
    ///
    /// See [`SimFlags`] for more details on what configuration
    /// settings are available.
    pub flags: SimFlags,

    /// Breakpoints for the simulator.
    pub breakpoints: HashSet<Breakpoint>,

    io: Arc<dyn SyscallIO>,
    events: EventBus,
}
impl Simulator where Simulator: Send + Sync {}
impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("cpu", &self.cpu)
            .field("instructions_run", &self.instructions_run)
            .field("state", &self.state)
            .field("frame_stack", &self.frame_stack)
            .field("flags", &self.flags)
            .field("breakpoints", &self.breakpoints)
            .finish_non_exhaustive()
    }
}

impl Simulator {
    /// Creates a new simulator with the provided flags, but without a loaded program.
    ///
    /// The simulator starts with no IO (see [`Simulator::open_io`]).
    pub fn new(flags: SimFlags) -> Self {
        let mut filler = flags.machine_init.generator();
        let cpu = CpuState {
            reg_file: RegFile::new(&mut filler),
            pc: AtomicU32::new(TEXT_START.get()),
            mem: RwLock::new(Mem::new(&[], &[], flags.mem_config(), flags.machine_init)),
        };

        Self {
            cpu: Arc::new(cpu),
            program: None,
            instructions_run: 0,
            executing: None,
            state: ExecState::Loaded,
            frame_stack: FrameStack::new(flags.debug_frames),
            flags,
            breakpoints: Default::default(),
            io: Arc::new(EmptyIO),
            events: EventBus::new(),
        }
    }

    /// Loads a program into the simulator, replacing any previous program.
    ///
    /// The program should come from a successful assembly
    /// (see [`Assembly::into_result`](crate::asm::Assembly::into_result)).
    pub fn load_program(&mut self, program: &Program) {
        self.program = Some(program.clone());
        self.reset();
    }

    /// Resets the simulator, reloading the current program.
    ///
    /// This resets the registers, memory, and PC, and puts the simulator in the `Loaded` state.
    /// The flags, breakpoints, IO, and subscribers are kept.
    pub fn reset(&mut self) {
        let mut filler = self.flags.machine_init.generator();
        let (mem, entry) = match &self.program {
            Some(program) => {
                let text: Vec<u32> = program.text().iter().map(SimInstr::encode).collect();
                let mem = Mem::new(&text, program.data(), self.flags.mem_config(), self.flags.machine_init);
                (mem, program.entry())
            },
            None => (Mem::new(&[], &[], self.flags.mem_config(), self.flags.machine_init), TEXT_START),
        };

        self.cpu.reg_file.reset(&mut filler);
        *self.cpu.mem_mut() = mem;
        self.cpu.set_pc(entry);

        self.instructions_run = 0;
        self.executing = None;
        self.frame_stack = FrameStack::new(self.flags.debug_frames);
        self.state = ExecState::Loaded;

        tracing::debug!(%entry, "loaded program");
        self.events.emit(SimEvent::Loaded { entry });
    }

    /// The machine's state.
    ///
    /// The returned handle can be kept (or sent to another thread) to read the machine's state
    /// while the simulator executes.
    pub fn cpu(&self) -> &Arc<CpuState> {
        &self.cpu
    }

    /// The loaded program (if any).
    pub fn program(&self) -> Option<&Program> {
        self.program.as_ref()
    }

    /// The state of execution.
    pub fn state(&self) -> &ExecState {
        &self.state
    }

    /// Writes a register.
    pub fn set_reg(&mut self, reg: Reg, value: Word) {
        self.cpu.reg_file.set(reg, value);
    }

    /// Sets the PC.
    pub fn set_pc(&mut self, addr: Addr) {
        self.cpu.set_pc(addr);
    }

    /// Writes a word to memory.
    pub fn write_word(&mut self, addr: Addr, value: Word) -> Result<(), MemErr> {
        self.cpu.mem_mut().write_word(addr, value)
    }

    /// Sets the IO used by syscalls.
    pub fn open_io<IO: SyscallIO + 'static>(&mut self, io: IO) {
        self.io = Arc::new(io);
    }

    /// Sets the IO used by syscalls, from a shared handle.
    pub fn open_shared_io(&mut self, io: Arc<dyn SyscallIO>) {
        self.io = io;
    }

    /// The IO used by syscalls.
    pub fn io(&self) -> &Arc<dyn SyscallIO> {
        &self.io
    }

    /// Subscribes to the events of this simulator.
    pub fn subscribe(&mut self) -> cbc::Receiver<SimEvent> {
        self.events.subscribe()
    }

    /// Subscribes to the events of this simulator, missing events if more than `cap` are unread.
    pub fn subscribe_bounded(&mut self, cap: usize) -> cbc::Receiver<SimEvent> {
        self.events.subscribe_bounded(cap)
    }

    /// Gets the address of the instruction being executed,
    /// or if no instruction is executing, the address of the next instruction to execute.
    pub fn prefetch_pc(&self) -> Addr {
        self.executing.unwrap_or_else(|| self.cpu.pc())
    }

    /// Whether execution last paused because of a breakpoint or `break` instruction.
    pub fn hit_breakpoint(&self) -> bool {
        matches!(self.state, ExecState::Paused(PauseReason::Breakpoint | PauseReason::BreakInstruction))
    }

    /// Whether the program halted.
    pub fn hit_halt(&self) -> bool {
        matches!(self.state, ExecState::Halted(_))
    }

    fn at_breakpoint(&self) -> bool {
        self.breakpoints.iter().any(|bp| bp.check(self))
    }

    /// Converts a step break into the state it leads to.
    fn break_state(&self, brk: StepBreak) -> ExecState {
        match brk {
            StepBreak::Halt(reason)  => ExecState::Halted(reason),
            StepBreak::Pause(reason) => ExecState::Paused(reason),
            StepBreak::Cancelled     => ExecState::Paused(PauseReason::ReadCancelled),
            StepBreak::Err(err) => {
                let pc = self.cpu.pc();
                let line = self.program.as_ref().and_then(|p| p.line_of(pc));
                ExecState::Faulted(Fault { pc, line, err })
            },
        }
    }

    /// Transitions to a new state, notifying subscribers.
    fn enter(&mut self, state: ExecState) -> Result<(), Fault> {
        let pc = self.cpu.pc();
        let event = match &state {
            ExecState::Loaded | ExecState::Running => None,
            ExecState::Paused(PauseReason::ReadCancelled) => {
                tracing::warn!(%pc, "read was cancelled, syscall will be retried");
                Some(SimEvent::ReadCancelled { pc })
            },
            &ExecState::Paused(reason) => {
                tracing::info!(%pc, %reason, "paused");
                Some(SimEvent::Paused { reason })
            },
            &ExecState::Halted(reason) => {
                tracing::info!(%pc, %reason, instructions = self.instructions_run, "halted");
                Some(SimEvent::Halted { reason })
            },
            ExecState::Faulted(fault) => {
                tracing::warn!(%fault, "faulted");
                Some(SimEvent::Faulted(fault.clone()))
            },
        };

        self.state = state;
        if let Some(event) = event {
            self.events.emit(event);
        }
        match &self.state {
            ExecState::Faulted(fault) => Err(fault.clone()),
            _ => Ok(())
        }
    }

    /// Checks whether execution can continue.
    ///
    /// This is `Ok(false)` if halted and an error if faulted.
    fn can_run(&self) -> Result<bool, Fault> {
        match &self.state {
            ExecState::Faulted(fault) => Err(fault.clone()),
            ExecState::Halted(_) => Ok(false),
            _ => Ok(true)
        }
    }

    /// Runs until the interrupt returns the state to stop in,
    /// the program halts or faults, or a breakpoint is hit.
    ///
    /// The interrupt is checked before every instruction.
    fn run_until(&mut self, mut interrupt: impl FnMut(&mut Simulator) -> Option<ExecState>) -> Result<(), Fault> {
        if !self.can_run()? {
            return Ok(());
        }
        self.state = ExecState::Running;

        let end = loop {
            if let Some(end) = interrupt(self) {
                break end;
            }
            if let Err(brk) = self.step() {
                break self.break_state(brk);
            }
            if self.at_breakpoint() {
                break ExecState::Paused(PauseReason::Breakpoint);
            }
        };

        self.enter(end)
    }

    /// Runs until the tripwire condition returns false (or any of the typical breaks occur).
    ///
    /// The typical break conditions are:
    /// - The program halts.
    /// - A fault occurs.
    /// - A breakpoint or `break` instruction is hit.
    /// - A read is cancelled.
    ///
    /// If the program has already halted, this does nothing.
    /// If it has faulted, this returns the fault again.
    pub fn run_while(&mut self, mut tripwire: impl FnMut(&mut Simulator) -> bool) -> Result<(), Fault> {
        self.run_until(|sim| (!tripwire(sim)).then_some(ExecState::Paused(PauseReason::Tripwire)))
    }

    /// Execute the program.
    ///
    /// This blocks until the program halts.
    /// If you wish to limit the number of instructions executed,
    /// use [`Simulator::run_with_limit`].
    pub fn run(&mut self) -> Result<(), Fault> {
        self.run_while(|_| true)
    }

    /// Execute the program with a limit on how many instructions to execute.
    ///
    /// This blocks until the program halts or until the specified number of instructions have been executed.
    pub fn run_with_limit(&mut self, max_steps: u64) -> Result<(), Fault> {
        let i = self.instructions_run;
        self.run_while(|sim| sim.instructions_run.wrapping_sub(i) < max_steps)
    }

    /// Simulate one step, executing one instruction.
    ///
    /// Breakpoints are not checked.
    pub fn step_in(&mut self) -> Result<(), Fault> {
        if !self.can_run()? {
            return Ok(());
        }
        let end = match self.step() {
            Ok(()) => ExecState::Paused(PauseReason::Step),
            Err(brk) => self.break_state(brk),
        };
        self.enter(end)
    }

    /// Simulate one step, executing one instruction and running through entire subroutines as a single step.
    pub fn step_over(&mut self) -> Result<(), Fault> {
        let curr_frame = self.frame_stack.len();
        let mut first = Some(()); // is Some if this is the first instruction executed in this call

        // condition: run until we have landed back in the same frame
        self.run_until(|sim| match first.take().is_some() || curr_frame < sim.frame_stack.len() {
            true  => None,
            false => Some(ExecState::Paused(PauseReason::Step)),
        })
    }

    /// Run through the simulator's execution until the subroutine is exited.
    pub fn step_out(&mut self) -> Result<(), Fault> {
        let curr_frame = self.frame_stack.len();
        let mut first = Some(()); // is Some if this is the first instruction executed in this call

        // condition: run until we've landed in a smaller frame
        if curr_frame != 0 {
            self.run_until(|sim| match first.take().is_some() || curr_frame <= sim.frame_stack.len() {
                true  => None,
                false => Some(ExecState::Paused(PauseReason::Step)),
            })?;
        }

        Ok(())
    }

    /// Stops execution. The simulator ends in the `Halted` state.
    ///
    /// If execution already finished, this does nothing.
    pub fn stop(&mut self) {
        if !self.state.is_terminal() {
            // entering Halted never fails
            let _ = self.enter(ExecState::Halted(HaltReason::Stopped));
        }
    }

    /// Fetches, decodes, and executes one instruction.
    ///
    /// If the instruction errors or its read is cancelled, the PC is left on the instruction.
    fn step(&mut self) -> Result<(), StepBreak> {
        let pc = self.cpu.pc();
        let word = self.cpu.mem().text_word(pc).ok_or(SimErr::PcOutOfText(pc))?;
        let instr = SimInstr::decode(word).ok_or(SimErr::IllegalInstruction(word))?;
        tracing::trace!(%pc, %instr, "executing");

        self.executing = Some(pc);
        self.cpu.set_pc(pc.offset(4));
        let result = self.execute(pc, instr);
        self.executing = None;

        match &result {
            Ok(()) | Err(StepBreak::Halt(_) | StepBreak::Pause(_)) => {
                self.instructions_run += 1;
                if self.events.is_observed() {
                    self.events.emit(SimEvent::InstructionExecuted { pc });
                }
            },
            Err(StepBreak::Cancelled | StepBreak::Err(_)) => self.cpu.set_pc(pc),
        }
        result
    }

    /// Computes the result of a trapping operation.
    fn trapping(&self, exact: Option<i32>, wrapped: Word) -> Result<Word, SimErr> {
        match exact {
            None if self.flags.trap_overflow => Err(SimErr::IntegerOverflow),
            _ => Ok(wrapped)
        }
    }

    /// Executes an instruction. The PC already points to the next instruction.
    fn execute(&mut self, pc: Addr, instr: SimInstr) -> Result<(), StepBreak> {
        let cpu = Arc::clone(&self.cpu);
        let regs = &cpu.reg_file;
        let next = pc.offset(4);

        match instr {
            SimInstr::Alu(op, rd, rs, rt) => {
                let (s, t) = (regs.get(rs), regs.get(rt));
                let amt = s.get() & 0x1F;
                let value = match op {
                    AluOp::Add  => self.trapping(s.get_signed().checked_add(t.get_signed()), s + t)?,
                    AluOp::Addu => s + t,
                    AluOp::Sub  => self.trapping(s.get_signed().checked_sub(t.get_signed()), s - t)?,
                    AluOp::Subu => s - t,
                    AluOp::And  => Word::new(s.get() & t.get()),
                    AluOp::Or   => Word::new(s.get() | t.get()),
                    AluOp::Xor  => Word::new(s.get() ^ t.get()),
                    AluOp::Nor  => Word::new(!(s.get() | t.get())),
                    AluOp::Slt  => Word::new(u32::from(s.get_signed() < t.get_signed())),
                    AluOp::Sltu => Word::new(u32::from(s.get() < t.get())),
                    AluOp::Sllv => Word::new(t.get() << amt),
                    AluOp::Srlv => Word::new(t.get() >> amt),
                    AluOp::Srav => Word::from_signed(t.get_signed() >> amt),
                    AluOp::Mul  => Word::from_signed(s.get_signed().wrapping_mul(t.get_signed())),
                };
                regs.set(rd, value);
            },
            SimInstr::Shift(op, rd, rt, sa) => {
                let t = regs.get(rt);
                let value = match op {
                    ShiftOp::Sll => Word::new(t.get() << sa.get()),
                    ShiftOp::Srl => Word::new(t.get() >> sa.get()),
                    ShiftOp::Sra => Word::from_signed(t.get_signed() >> sa.get()),
                };
                regs.set(rd, value);
            },
            SimInstr::Jr(rs) => {
                if rs == RA {
                    self.frame_stack.pop_frame();
                }
                cpu.set_pc(Addr::from(regs.get(rs)));
            },
            SimInstr::Jalr(rd, rs) => {
                let target = Addr::from(regs.get(rs));
                regs.set(rd, Word::from(next));
                self.frame_stack.push_frame(pc, target, regs);
                cpu.set_pc(target);
            },
            SimInstr::MulDiv(op, rs, rt) => {
                let (s, t) = (regs.get(rs), regs.get(rt));
                let (hi, lo) = match op {
                    MulDivOp::Mult => {
                        let p = i64::from(s.get_signed()) * i64::from(t.get_signed());
                        ((p >> 32) as u32, p as u32)
                    },
                    MulDivOp::Multu => {
                        let p = u64::from(s.get()) * u64::from(t.get());
                        ((p >> 32) as u32, p as u32)
                    },
                    MulDivOp::Div => {
                        let (n, d) = (s.get_signed(), t.get_signed());
                        if d == 0 { return Err(SimErr::DivideByZero.into()) }
                        (n.wrapping_rem(d) as u32, n.wrapping_div(d) as u32)
                    },
                    MulDivOp::Divu => {
                        let (n, d) = (s.get(), t.get());
                        if d == 0 { return Err(SimErr::DivideByZero.into()) }
                        (n % d, n / d)
                    },
                };
                regs.set_hi(Word::new(hi));
                regs.set_lo(Word::new(lo));
            },
            SimInstr::MoveFrom(HiLo::Hi, rd) => regs.set(rd, regs.hi()),
            SimInstr::MoveFrom(HiLo::Lo, rd) => regs.set(rd, regs.lo()),
            SimInstr::MoveTo(HiLo::Hi, rs) => regs.set_hi(regs.get(rs)),
            SimInstr::MoveTo(HiLo::Lo, rs) => regs.set_lo(regs.get(rs)),
            SimInstr::Syscall => self.syscall(pc, &cpu)?,
            SimInstr::Break => return Err(StepBreak::Pause(PauseReason::BreakInstruction)),
            SimInstr::AluImm(op, rt, rs, imm) => {
                let s = regs.get(rs);
                let i = SimInstr::extended_imm(op, imm);
                let value = match op {
                    ImmOp::Addi  => self.trapping(s.get_signed().checked_add(i as i32), s + Word::new(i))?,
                    ImmOp::Addiu => s + Word::new(i),
                    ImmOp::Slti  => Word::new(u32::from(s.get_signed() < i as i32)),
                    ImmOp::Sltiu => Word::new(u32::from(s.get() < i)),
                    ImmOp::Andi  => Word::new(s.get() & i),
                    ImmOp::Ori   => Word::new(s.get() | i),
                    ImmOp::Xori  => Word::new(s.get() ^ i),
                };
                regs.set(rt, value);
            },
            SimInstr::Lui(rt, imm) => regs.set(rt, Word::new(imm.get() << 16)),
            SimInstr::Branch(cond, rs, rt, off) => {
                if cond.test(regs.get(rs).get(), regs.get(rt).get()) {
                    cpu.set_pc(next.offset_signed(off.get() << 2));
                }
            },
            SimInstr::Load(width, rt, base, off) => {
                let addr = Addr::from(regs.get(base)).offset_signed(off.get());
                let mem = cpu.mem();
                let value = match width {
                    MemWidth::Byte  => Word::from_signed(i32::from(mem.read_byte(addr)? as i8)),
                    MemWidth::ByteU => Word::new(u32::from(mem.read_byte(addr)?)),
                    MemWidth::Half  => Word::from_signed(i32::from(mem.read_half(addr)? as i16)),
                    MemWidth::HalfU => Word::new(u32::from(mem.read_half(addr)?)),
                    MemWidth::Word  => mem.read_word(addr)?,
                };
                drop(mem);
                regs.set(rt, value);
            },
            SimInstr::Store(width, rt, base, off) => {
                let addr = Addr::from(regs.get(base)).offset_signed(off.get());
                let value = regs.get(rt);
                let mut mem = cpu.mem_mut();
                match width {
                    MemWidth::Byte | MemWidth::ByteU => mem.write_byte(addr, value.get() as u8)?,
                    MemWidth::Half | MemWidth::HalfU => mem.write_half(addr, value.get() as u16)?,
                    MemWidth::Word => mem.write_word(addr, value)?,
                }
            },
            SimInstr::J(index) => cpu.set_pc(jump_target(next, index)),
            SimInstr::Jal(index) => {
                let target = jump_target(next, index);
                regs.set(RA, Word::from(next));
                self.frame_stack.push_frame(pc, target, regs);
                cpu.set_pc(target);
            },
        }

        Ok(())
    }

    /// Executes the syscall selected by `$v0`.
    fn syscall(&mut self, pc: Addr, cpu: &CpuState) -> Result<(), StepBreak> {
        let code = cpu.reg(V0).get();
        let arg = cpu.reg(A0);
        tracing::trace!(%pc, code, "syscall");

        match code {
            // print_int
            1 => self.io.print_int(IOStream::Stdout, arg.get_signed()),
            // print_string
            4 => {
                let string = cpu.mem().read_c_str(Addr::from(arg))?;
                self.io.print_string(IOStream::Stdout, &string);
            },
            // read_int
            5 => {
                let value = self.io.read_int(IOStream::Stdin)?;
                cpu.reg_file.set(V0, Word::from(value));
            },
            // read_string
            8 => {
                let buf = Addr::from(arg);
                let Ok(len) = usize::try_from(cpu.reg(A1).get_signed()) else { return Ok(()) };
                let mut bytes = match len {
                    0 => return Ok(()),
                    1 => vec![],
                    _ => {
                        let mut line = self.io.read_line(IOStream::Stdin)?.into_bytes();
                        line.push(b'\n');
                        line.truncate(len - 1);
                        line
                    }
                };
                bytes.push(0);
                cpu.mem_mut().write_bytes(buf, &bytes)?;
            },
            // sbrk
            9 => {
                let requested = arg.get();
                // keep the break word-aligned
                let by = requested.checked_next_multiple_of(4).unwrap_or(requested);
                let mut mem = cpu.mem_mut();
                let old_break = mem.brk();
                let new_break = mem.grow_heap(by).map_err(SimErr::from)?;
                drop(mem);

                cpu.reg_file.set(V0, Word::from(old_break));
                self.events.emit(SimEvent::HeapGrew { old_break, new_break });
            },
            // exit
            10 => return Err(StepBreak::Halt(HaltReason::Exit { code: 0 })),
            // print_char
            11 => self.io.print_char(IOStream::Stdout, arg.get() as u8),
            // read_char
            12 => {
                let c = self.io.read_char(IOStream::Stdin)?;
                cpu.reg_file.set(V0, Word::new(u32::from(c)));
            },
            // exit2
            17 => return Err(StepBreak::Halt(HaltReason::Exit { code: arg.get_signed() })),
            _ => return Err(SimErr::InvalidSyscall(code).into()),
        }

        Ok(())
    }
}
impl Default for Simulator {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

/// Computes the target of `j`/`jal`, which stays in the 256 MiB region of the next instruction.
fn jump_target(next: Addr, index: u32) -> Addr {
    Addr::new((next.get() & 0xF000_0000) | (index << 2))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::asm::assemble;
    use crate::ast::reg_consts::{S0, S1, T0, T1, T2, T3, V0};

    use super::debug::Comparator;
    use super::io::BufferedIO;
    use super::mem::DATA_START;
    use super::*;

    fn load(src: &str, flags: SimFlags) -> Simulator {
        let program = assemble(src).into_result().unwrap();
        let mut sim = Simulator::new(flags);
        sim.load_program(&program);
        sim
    }
    fn load_with_input(src: &str, input: &str) -> (Simulator, BufferedIO) {
        let mut sim = load(src, Default::default());
        let io = BufferedIO::with_input(input);
        sim.open_io(io.clone());
        (sim, io)
    }
    fn reg(sim: &Simulator, r: Reg) -> u32 {
        sim.cpu().reg(r).get()
    }

    #[test]
    fn test_arith() {
        let mut sim = load("
            main:
                li    $t0, 7
                li    $t1, -3
                add   $t2, $t0, $t1
                sub   $t3, $t1, $t0
                slt   $s0, $t1, $t0
                sltu  $s1, $t1, $t0
                mult  $t0, $t1
                mflo  $s2
                mfhi  $s3
                div   $t0, $t1
                mflo  $s4
                mfhi  $s5
                mul   $s6, $t0, $t0
                sra   $s7, $t1, 1
                srl   $t4, $t1, 28
                sllv  $t5, $t0, $t0
                lui   $t6, 0x1234
                ori   $t6, $t6, 0x5678
                andi  $t7, $t1, 0xFF
                li    $v0, 10
                syscall
        ", Default::default());
        sim.run().unwrap();

        use crate::ast::reg_consts::{S2, S3, S4, S5, S6, S7, T4, T5, T6, T7};
        assert_eq!(reg(&sim, T2), 4);
        assert_eq!(reg(&sim, T3) as i32, -10);
        assert_eq!(reg(&sim, S0), 1);
        assert_eq!(reg(&sim, S1), 0);
        assert_eq!(reg(&sim, S2) as i32, -21);
        assert_eq!(reg(&sim, S3), u32::MAX);
        assert_eq!(reg(&sim, S4) as i32, -2);
        assert_eq!(reg(&sim, S5), 1);
        assert_eq!(reg(&sim, S6), 49);
        assert_eq!(reg(&sim, S7) as i32, -2);
        assert_eq!(reg(&sim, T4), 0xF);
        assert_eq!(reg(&sim, T5), 7 << 7);
        assert_eq!(reg(&sim, T6), 0x1234_5678);
        assert_eq!(reg(&sim, T7), 0xFD);
        assert_eq!(sim.state(), &ExecState::Halted(HaltReason::Exit { code: 0 }));
        assert!(sim.hit_halt());
    }

    #[test]
    fn test_memory() {
        let mut sim = load("
            .data
            val:  .word 0x80
            buf:  .space 8
            .text
            main:
                lw   $t0, val
                la   $t1, buf
                sb   $t0, 0($t1)
                lb   $t2, 0($t1)
                lbu  $t3, 0($t1)
                sh   $t0, 2($t1)
                lhu  $s0, 2($t1)
                sw   $t0, buf+4
                addiu $sp, $sp, -4
                sw   $t0, ($sp)
                lw   $s1, 0($sp)
                li   $v0, 10
                syscall
        ", Default::default());
        sim.run().unwrap();

        assert_eq!(reg(&sim, T0), 0x80);
        assert_eq!(reg(&sim, T2) as i32, -128);
        assert_eq!(reg(&sim, T3), 0x80);
        assert_eq!(reg(&sim, S0), 0x80);
        assert_eq!(reg(&sim, S1), 0x80);
        assert_eq!(sim.cpu().mem().read_word(DATA_START.offset(8)), Ok(Word::new(0x80)));
    }

    #[test]
    fn test_calls() {
        let mut sim = load("
            main:
                li   $a0, 5
                jal  double
                move $s0, $v0
                la   $t0, double
                jalr $t0
                move $s1, $v0
                li   $v0, 10
                syscall
            double:
                add  $v0, $a0, $a0
                move $a0, $v0
                jr   $ra
        ", Default::default());
        sim.run().unwrap();
        assert_eq!(reg(&sim, S0), 10);
        assert_eq!(reg(&sim, S1), 20);
        assert!(sim.frame_stack.is_empty());
    }

    #[test]
    fn test_overflow() {
        let src = "
            main:
                li   $t0, 0x7FFFFFFF
                addi $t0, $t0, 1
                li   $v0, 10
                syscall
        ";
        let mut sim = load(src, Default::default());
        let fault = sim.run().unwrap_err();
        assert_eq!(fault, Fault { pc: TEXT_START.offset(8), line: Some(4), err: SimErr::IntegerOverflow });
        assert_eq!(sim.state(), &ExecState::Faulted(fault.clone()));
        // the faulting instruction is not skipped
        assert_eq!(sim.cpu().pc(), TEXT_START.offset(8));
        assert_eq!(reg(&sim, T0), 0x7FFF_FFFF);
        // faults are terminal
        assert_eq!(sim.run(), Err(fault.clone()));
        assert_eq!(sim.step_in(), Err(fault));

        let mut sim = load(src, SimFlags { trap_overflow: false, ..Default::default() });
        sim.run().unwrap();
        assert_eq!(reg(&sim, T0), 0x8000_0000);
    }

    #[test]
    fn test_faults() {
        let run = |src: &str| load(src, Default::default()).run().unwrap_err().err;

        assert_eq!(run("main: li $t0, 1\n div $t0, $zero"), SimErr::DivideByZero);
        assert_eq!(run("main: li $t0, 1\n divu $t0, $zero"), SimErr::DivideByZero);
        assert_eq!(run("main: li $v0, 100\n syscall"), SimErr::InvalidSyscall(100));
        assert_eq!(run("main: nop"), SimErr::PcOutOfText(TEXT_START.offset(4)));
        assert_eq!(run("main: lw $t0, 0($zero)"), SimErr::Mem(MemErr::OutOfBounds { addr: Addr::new(0) }));
        assert_eq!(run("main: la $t0, main\n sw $t0, 0($t0)"), SimErr::Mem(MemErr::ReadOnly { addr: TEXT_START }));
        assert_eq!(run("main: addiu $sp, $sp, -2\n lw $t0, 0($sp)"), SimErr::Mem(MemErr::Misaligned { addr: Addr::new(0x7FFF_FFFA), align: 4 }));
        assert_eq!(run("main: li $v0, 5\n syscall"), SimErr::InputClosed);

        let mut sim = load("main: la $t0, main\n jr $t0", Default::default());
        sim.set_reg(T0, Word::new(0x1001_0000));
        sim.set_pc(TEXT_START.offset(8));
        assert_eq!(sim.run().unwrap_err().err, SimErr::PcOutOfText(DATA_START));
    }

    #[test]
    fn test_syscall_io() {
        let (mut sim, io) = load_with_input("
            .data
            prompt: .asciiz \"n = \"
            buf:    .space 8
            .text
            main:
                li   $v0, 4
                la   $a0, prompt
                syscall
                li   $v0, 5
                syscall
                add  $a0, $v0, $v0
                li   $v0, 1
                syscall
                li   $v0, 11
                li   $a0, '\\n'
                syscall
                li   $v0, 8
                la   $a0, buf
                li   $a1, 4
                syscall
                li   $v0, 4
                syscall
                li   $v0, 12
                syscall
                move $s0, $v0
                li   $v0, 17
                li   $a0, 3
                syscall
        ", " 21 \nhello\nx");
        sim.run().unwrap();

        assert_eq!(io.output_string(), "n = 42\nhel");
        assert_eq!(reg(&sim, S0), u32::from(b'x'));
        assert_eq!(sim.state(), &ExecState::Halted(HaltReason::Exit { code: 3 }));
    }

    #[test]
    fn test_read_string_keeps_newline() {
        let (mut sim, _) = load_with_input("
            .data
            buf: .space 8
            .text
            main:
                li   $v0, 8
                la   $a0, buf
                li   $a1, 8
                syscall
                li   $v0, 10
                syscall
        ", "ab\n");
        sim.run().unwrap();
        assert_eq!(sim.cpu().mem().read_c_str(DATA_START), Ok(b"ab\n".to_vec()));
    }

    #[test]
    fn test_malformed_input() {
        let (mut sim, _) = load_with_input("main: li $v0, 5\n syscall", "twelve\n");
        let fault = sim.run().unwrap_err();
        assert_eq!(fault.err, SimErr::MalformedInput("twelve".into()));
        assert_eq!(fault.line, Some(2));
    }

    #[test]
    fn test_sbrk() {
        let src = "
            main:
                li   $v0, 9
                li   $a0, 6
                syscall
                move $s0, $v0
                li   $t0, 99
                sw   $t0, 4($s0)
            loop:
                li   $v0, 9
                li   $a0, 8
                syscall
                j    loop
        ";
        let flags = SimFlags { heap_budget: 32, ..Default::default() };
        let mut sim = load(src, flags);
        let events = sim.subscribe_bounded(64);
        let heap_start = sim.cpu().mem().layout().heap_start;

        let fault = sim.run().unwrap_err();
        assert_eq!(reg(&sim, S0), heap_start.get());
        // 8 (6 rounded up) + 3 * 8 fills the budget
        let expected = HeapErr { requested: 8, brk: heap_start.offset(32), heap_size: 32 };
        assert_eq!(fault.err, SimErr::Mem(MemErr::Heap(expected)));
        assert_eq!(sim.cpu().mem().brk(), heap_start.offset(32));
        assert_eq!(sim.cpu().mem().read_word(heap_start.offset(4)), Ok(Word::new(99)));

        let grew: Vec<_> = events.try_iter()
            .filter_map(|e| match e {
                SimEvent::HeapGrew { old_break, new_break } => Some(new_break.get() - old_break.get()),
                _ => None
            })
            .collect();
        assert_eq!(grew, [8, 8, 8, 8]);
    }

    #[test]
    fn test_breakpoints() {
        let mut sim = load("
            main:
                li   $t0, 0
            loop:
                addiu $t0, $t0, 1
                li   $t1, 5
                blt  $t0, $t1, loop
                break
                li   $v0, 10
                syscall
        ", Default::default());
        sim.breakpoints.insert(Breakpoint::Reg { reg: T0, value: Comparator::Eq(3) });

        sim.run().unwrap();
        assert!(sim.hit_breakpoint());
        assert_eq!(sim.state(), &ExecState::Paused(PauseReason::Breakpoint));
        assert_eq!(reg(&sim, T0), 3);

        sim.breakpoints.clear();
        sim.run().unwrap();
        assert_eq!(sim.state(), &ExecState::Paused(PauseReason::BreakInstruction));
        assert_eq!(reg(&sim, T0), 5);

        sim.run().unwrap();
        assert!(sim.hit_halt());
        // halted simulators stay halted
        let count = sim.instructions_run;
        sim.run().unwrap();
        assert_eq!(sim.instructions_run, count);

        sim.reset();
        assert_eq!(sim.state(), &ExecState::Loaded);
        assert_eq!(sim.instructions_run, 0);
        sim.breakpoints.insert(Breakpoint::PC(TEXT_START.offset(4)));
        sim.run().unwrap();
        assert_eq!(sim.cpu().pc(), TEXT_START.offset(4));
        assert_eq!(reg(&sim, T0), 0);
    }

    #[test]
    fn test_run_with_limit() {
        let mut sim = load("main: j main", Default::default());
        sim.run_with_limit(10).unwrap();
        assert_eq!(sim.instructions_run, 10);
        assert_eq!(sim.state(), &ExecState::Paused(PauseReason::Tripwire));
        sim.run_with_limit(5).unwrap();
        assert_eq!(sim.instructions_run, 15);
    }

    #[test]
    fn test_step_over_out() {
        let src = "
            main:
                jal  f
                li   $v0, 10
                syscall
            f:
                move $s2, $ra
                addiu $s0, $s0, 1
                jal  g
                addiu $s0, $s0, 1
                move $ra, $s2
                jr   $ra
            g:
                addiu $s1, $s1, 1
                jr   $ra
        ";
        let mut sim = load(src, SimFlags { debug_frames: true, ..Default::default() });
        sim.step_over().unwrap();
        assert_eq!(sim.cpu().pc(), TEXT_START.offset(4));
        assert_eq!((reg(&sim, S0), reg(&sim, S1)), (2, 1));
        assert!(sim.frame_stack.is_empty());

        let mut sim = load(src, SimFlags { debug_frames: true, ..Default::default() });
        for _ in 0..4 {
            sim.step_in().unwrap();
        }
        assert_eq!(sim.frame_stack.len(), 2);
        let frames = sim.frame_stack.frames().unwrap();
        assert_eq!(frames[0].caller_addr, TEXT_START);
        assert_eq!(Some(frames[1].callee_addr), sim.program().unwrap().lookup_label("g"));

        sim.step_out().unwrap();
        assert_eq!(sim.frame_stack.len(), 1);
        assert_eq!(reg(&sim, S1), 1);
        assert_eq!(reg(&sim, S0), 1);
        sim.step_out().unwrap();
        assert!(sim.frame_stack.is_empty());
        assert_eq!(reg(&sim, S0), 2);

        // no frame to step out of
        let count = sim.instructions_run;
        sim.step_out().unwrap();
        assert_eq!(sim.instructions_run, count);
    }

    #[test]
    fn test_events() {
        let mut sim = Simulator::default();
        let events = sim.subscribe();
        let program = assemble("main: nop\n li $v0, 10\n syscall").into_result().unwrap();
        sim.load_program(&program);
        sim.run().unwrap();

        let events: Vec<_> = events.try_iter().collect();
        assert_eq!(events, [
            SimEvent::Loaded { entry: TEXT_START },
            SimEvent::InstructionExecuted { pc: TEXT_START },
            SimEvent::InstructionExecuted { pc: TEXT_START.offset(4) },
            SimEvent::InstructionExecuted { pc: TEXT_START.offset(8) },
            SimEvent::Halted { reason: HaltReason::Exit { code: 0 } },
        ]);
    }

    #[test]
    fn test_stop() {
        let mut sim = load("main: j main", Default::default());
        sim.run_with_limit(3).unwrap();
        sim.stop();
        assert_eq!(sim.state(), &ExecState::Halted(HaltReason::Stopped));
        sim.run().unwrap();
        assert_eq!(sim.instructions_run, 3);
    }

    #[test]
    fn test_cpu_handle_survives_reset() {
        let mut sim = load("main: li $t0, 4\n li $v0, 10\n syscall", Default::default());
        let cpu = Arc::clone(sim.cpu());
        sim.run().unwrap();
        assert_eq!(cpu.reg(T0), Word::new(4));
        sim.reset();
        assert_eq!(cpu.reg(T0), Word::new(0));
        assert_eq!(cpu.pc(), TEXT_START);
    }

    const SUM_SRC: &str = "
        .data
        squares: .space 64
        .text
        main:
            li   $v0, 5
            syscall
            move $t3, $v0
            la   $t0, squares
            li   $t1, 0
        loop:
            bge  $t1, $t3, done
            mul  $t2, $t1, $t1
            sw   $t2, 0($t0)
            addiu $t0, $t0, 4
            addiu $t1, $t1, 1
            li   $v0, 9
            li   $a0, 4
            syscall
            sw   $t2, 0($v0)
            b    loop
        done:
            li   $v0, 10
            syscall
    ";

    proptest! {
        #[test]
        fn prop_step_matches_run(n in 0u32..16, seed: u64) {
            let flags = SimFlags { machine_init: MachineInitStrategy::Seeded { seed }, ..Default::default() };
            let input = format!("{n}\n");

            let mut ran = load(SUM_SRC, flags);
            ran.open_io(BufferedIO::with_input(&input));
            ran.run().unwrap();

            let mut stepped = load(SUM_SRC, flags);
            stepped.open_io(BufferedIO::with_input(&input));
            while !stepped.state().is_terminal() {
                stepped.step_in().unwrap();
            }

            prop_assert_eq!(ran.state(), stepped.state());
            prop_assert_eq!(ran.instructions_run, stepped.instructions_run);
            prop_assert_eq!(ran.cpu().pc(), stepped.cpu().pc());
            prop_assert_eq!(ran.cpu().regs(), stepped.cpu().regs());
            prop_assert_eq!(ran.cpu().mem().snapshot(), stepped.cpu().mem().snapshot());
            prop_assert_eq!(ran.cpu().mem().brk().get() - ran.cpu().mem().layout().heap_start.get(), 4 * n);
        }
    }

    #[test]
    fn test_reg_snapshot() {
        let mut sim = load("main: li $t0, 1\n li $t1, 2\n li $v0, 10\n syscall", Default::default());
        sim.run().unwrap();
        let regs = sim.cpu().regs();
        assert_eq!((regs[T0], regs[T1], regs[V0]), (1, 2, 10));
        assert_eq!(regs[T2], 0);
        assert_eq!(regs[T3], 0);
    }
}

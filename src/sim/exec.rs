//! Running a simulator on its own thread.
//!
//! An [`Executor`] takes ownership of a [`Simulator`] and runs it on a dedicated thread.
//! Other threads control it with commands ([`Executor::resume`], [`Executor::pause`],
//! [`Executor::step`], [`Executor::stop`]) and can read the machine's state
//! through [`Executor::cpu`] while it runs.
//!
//! Commands are checked between instructions, so a paused machine is always
//! at an instruction boundary.
//! If the program is blocked reading input, pausing or stopping cancels the read
//! (see [`SyscallIO::cancel_read`]). The syscall is executed again once execution resumes.
//!
//! ```
//! use mips_ensemble::asm::assemble;
//! use mips_ensemble::sim::{ExecState, HaltReason, Simulator};
//! use mips_ensemble::sim::exec::Executor;
//! use mips_ensemble::ast::reg_consts::V0;
//!
//! let program = assemble("main: li $v0, 10\n syscall").into_result().unwrap();
//! let mut sim = Simulator::new(Default::default());
//! sim.load_program(&program);
//!
//! let exec = Executor::spawn(sim);
//! exec.resume();
//! assert_eq!(exec.wait_until_finished(), ExecState::Halted(HaltReason::Exit { code: 0 }));
//! assert_eq!(exec.cpu().reg(V0).get(), 10);
//!
//! let sim = exec.join().unwrap();
//! assert_eq!(sim.instructions_run, 2);
//! ```

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel as cbc;

use super::io::SyscallIO;
use super::{CpuState, HaltReason, PauseReason, Simulator};

pub use super::ExecState;

/// How often a blocked read is cancelled again while waiting for a pause or stop.
///
/// A cancel only applies to a read that has already started,
/// so one sent just before the read starts would be lost.
const CANCEL_INTERVAL: Duration = Duration::from_millis(10);

enum Command {
    Resume,
    Pause,
    Step,
    Stop,
    SetDelay(Option<Duration>),
    Shutdown,
}

struct Status {
    state: ExecState,
    /// The number of commands the execution thread has handled.
    processed: u64,
}

/// The status shared between the execution thread and its controllers.
struct Shared {
    status: Mutex<Status>,
    changed: Condvar,
}
impl Shared {
    fn lock(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, f: impl FnOnce(&mut Status)) {
        f(&mut self.lock());
        self.changed.notify_all();
    }
}

/// A [`Simulator`] running on its own thread.
///
/// The methods of this struct can be called from any thread.
/// Dropping an executor without calling [`Executor::join`] detaches its thread,
/// which exits once it is idle.
pub struct Executor {
    commands: Mutex<(u64, cbc::Sender<Command>)>,
    shared: Arc<Shared>,
    cpu: Arc<CpuState>,
    io: Arc<dyn SyscallIO>,
    handle: JoinHandle<Simulator>,
}
impl Executor {
    /// Moves the simulator onto a new thread.
    ///
    /// The simulator does not start executing until [`Executor::resume`] or [`Executor::step`] is called.
    pub fn spawn(sim: Simulator) -> Self {
        let (tx, rx) = cbc::unbounded();
        let shared = Arc::new(Shared {
            status: Mutex::new(Status { state: sim.state().clone(), processed: 0 }),
            changed: Condvar::new(),
        });
        let cpu = Arc::clone(sim.cpu());
        let io = Arc::clone(sim.io());

        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::spawn(move || execute(sim, rx, &worker_shared));

        Self {
            commands: Mutex::new((0, tx)),
            shared,
            cpu,
            io,
            handle,
        }
    }

    /// Sends a command, returning its sequence number.
    fn send(&self, cmd: Command) -> u64 {
        let mut commands = self.commands.lock().unwrap_or_else(PoisonError::into_inner);
        commands.0 += 1;
        // If the thread is gone, waiters see that from the handle.
        let _ = commands.1.send(cmd);
        commands.0
    }

    /// Blocks until command `id` has been handled and `done` holds,
    /// cancelling reads while waiting if `cancel` is set.
    fn wait_for(&self, id: u64, cancel: bool, done: impl Fn(&ExecState) -> bool) -> ExecState {
        let mut status = self.shared.lock();
        loop {
            if (status.processed >= id && done(&status.state)) || self.handle.is_finished() {
                return status.state.clone();
            }
            if cancel {
                drop(status);
                self.io.cancel_read();
                status = self.shared.lock();
            }
            status = self.shared.changed.wait_timeout(status, CANCEL_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Starts (or continues) running the program.
    ///
    /// This does not wait for the program to start.
    pub fn resume(&self) {
        self.send(Command::Resume);
    }

    /// Pauses execution at the next instruction boundary, returning the state it paused in.
    ///
    /// If the program is waiting for input, the read is cancelled.
    pub fn pause(&self) -> ExecState {
        let id = self.send(Command::Pause);
        self.wait_for(id, true, |s| s != &ExecState::Running)
    }

    /// Executes one instruction and returns the resulting state.
    ///
    /// If the instruction reads input, this waits for the input.
    pub fn step(&self) -> ExecState {
        let id = self.send(Command::Step);
        self.wait_for(id, false, |s| s != &ExecState::Running)
    }

    /// Stops execution. The program cannot be resumed afterwards.
    ///
    /// If the program is waiting for input, the read is cancelled.
    pub fn stop(&self) -> ExecState {
        let id = self.send(Command::Stop);
        self.wait_for(id, true, ExecState::is_terminal)
    }

    /// Changes the delay between instructions.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.send(Command::SetDelay(delay));
    }

    /// The current state of execution.
    pub fn state(&self) -> ExecState {
        self.shared.lock().state.clone()
    }

    /// Blocks until every command sent so far has been handled and the program is not running.
    pub fn wait_until_finished(&self) -> ExecState {
        let id = self.commands.lock().unwrap_or_else(PoisonError::into_inner).0;
        self.wait_for(id, false, |s| s != &ExecState::Running)
    }

    /// The machine's state, which can be read while the program runs.
    pub fn cpu(&self) -> &Arc<CpuState> {
        &self.cpu
    }

    /// The IO used by the simulator.
    pub fn io(&self) -> &Arc<dyn SyscallIO> {
        &self.io
    }

    /// Pauses execution, ends the thread, and gives back the simulator.
    ///
    /// This returns an error if the thread panicked.
    pub fn join(self) -> std::thread::Result<Simulator> {
        let id = self.send(Command::Shutdown);
        self.wait_for(id, true, |_| true);
        self.handle.join()
    }
}
impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// The loop of the execution thread.
fn execute(mut sim: Simulator, commands: cbc::Receiver<Command>, shared: &Shared) -> Simulator {
    tracing::debug!("execution thread started");

    while let Ok(cmd) = commands.recv() {
        let mut shutdown = false;
        match cmd {
            Command::Resume => {
                shared.publish(|s| {
                    s.processed += 1;
                    if !sim.state().is_terminal() {
                        s.state = ExecState::Running;
                    }
                });
                shutdown = run(&mut sim, &commands, shared);
                shared.publish(|s| s.state = sim.state().clone());
                if shutdown { break }
                continue;
            },
            Command::Step => {
                // the outcome is reflected in the state
                let _ = sim.step_in();
            },
            Command::Pause => {},
            Command::Stop => sim.stop(),
            Command::SetDelay(delay) => sim.flags.step_delay = delay,
            Command::Shutdown => shutdown = true,
        }

        shared.publish(|s| {
            s.processed += 1;
            s.state = sim.state().clone();
        });
        if shutdown { break }
    }

    tracing::debug!("execution thread stopped");
    sim
}

/// Runs the simulator until it halts, faults, or is interrupted by a command.
///
/// This returns whether the thread should shut down.
fn run(sim: &mut Simulator, commands: &cbc::Receiver<Command>, shared: &Shared) -> bool {
    let mut shutdown = false;

    loop {
        // the result is reflected in the state
        let _ = sim.run_until(|sim| {
            let mut delay = sim.flags.step_delay;
            loop {
                let received = match delay.take() {
                    Some(d) => commands.recv_timeout(d).map_err(|e| e.is_disconnected()),
                    None => commands.try_recv().map_err(|e| e.is_disconnected()),
                };
                let cmd = match received {
                    Ok(cmd) => cmd,
                    Err(false) => return None,
                    Err(true) => {
                        // every controller is gone
                        shutdown = true;
                        return Some(ExecState::Paused(PauseReason::Requested));
                    }
                };

                shared.publish(|s| s.processed += 1);
                match cmd {
                    Command::Pause => return Some(ExecState::Paused(PauseReason::Requested)),
                    Command::Stop => return Some(ExecState::Halted(HaltReason::Stopped)),
                    Command::Shutdown => {
                        shutdown = true;
                        return Some(ExecState::Paused(PauseReason::Requested));
                    },
                    Command::SetDelay(d) => sim.flags.step_delay = d,
                    Command::Resume | Command::Step => {},
                }
            }
        });

        // A cancelled read is retried unless a command interrupts it.
        match sim.state() {
            ExecState::Paused(PauseReason::ReadCancelled) if !shutdown => continue,
            _ => break shutdown,
        }
    }
}

//! A MIPS parser, assembler, and simulator.
//!
//! This is meant to be a general suite to use MIPS assembly in a teaching setting,
//! as a backend for editors and visual simulators.
//!
//! # Usage
//!
//! To convert MIPS source code into a program, it must be assembled:
//! ```
//! use mips_ensemble::asm::assemble;
//!
//! let code = "
//!     .data
//! msg: .asciiz \"hi\\n\"
//!     .text
//! main:
//!     la $a0, msg
//!     li $v0, 4
//!     syscall
//!     li $v0, 10
//!     syscall
//! ";
//! let asm = assemble(code);
//!
//! // Every problem in the source is reported, not just the first:
//! for problem in &asm.problems {
//!     eprintln!("{problem}");
//! }
//! let program = asm.into_result().unwrap();
//! ```
//!
//! Once a program has been assembled, it can be executed with the simulator:
//! ```
//! # // Assembling was shown in the previous example, so this doesn't need to be shown again.
//! # use mips_ensemble::asm::assemble;
//! # let program = assemble("main: li $v0, 10\n syscall").into_result().unwrap();
//! use mips_ensemble::sim::Simulator;
//! use mips_ensemble::sim::io::BufferedIO;
//!
//! let mut simulator = Simulator::new(Default::default());
//! simulator.load_program(&program);
//! simulator.open_io(BufferedIO::new());
//! simulator.run().unwrap(); // <-- Result can be handled accordingly
//! ```
//!
//! If more granularity is needed for simulation, there are also step-in and step-out functions,
//! as well as an [`Executor`] which runs the simulator on its own thread.
//! See the [`sim`] module for more details.
//!
//! [`Executor`]: sim::exec::Executor
#![warn(missing_docs)]

pub mod parse;
pub mod ast;
pub mod asm;
pub mod sim;
pub mod err;

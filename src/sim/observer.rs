//! Event notifications from the simulator.
//!
//! The simulator does not know who is watching it. Instead,
//! any number of subscribers can register with [`Simulator::subscribe`]
//! and receive [`SimEvent`]s over a channel as the simulator's state changes.
//!
//! ```
//! use mips_ensemble::asm::assemble;
//! use mips_ensemble::sim::Simulator;
//! use mips_ensemble::sim::observer::SimEvent;
//!
//! let program = assemble("main: li $v0, 10\n syscall").into_result().unwrap();
//! let mut sim = Simulator::new(Default::default());
//! let events = sim.subscribe();
//! sim.load_program(&program);
//! sim.run().unwrap();
//!
//! let events: Vec<_> = events.try_iter().collect();
//! assert!(matches!(events.first(), Some(SimEvent::Loaded { .. })));
//! assert!(matches!(events.last(), Some(SimEvent::Halted { .. })));
//! ```
//!
//! [`Simulator::subscribe`]: super::Simulator::subscribe

use crossbeam_channel as cbc;

use super::mem::Addr;
use super::{Fault, HaltReason, PauseReason};

/// A change in the simulator's state.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum SimEvent {
    /// A program was loaded (or reloaded) and is ready to execute.
    Loaded {
        /// The address execution starts at.
        entry: Addr
    },
    /// An instruction completed.
    InstructionExecuted {
        /// The address of the instruction.
        pc: Addr
    },
    /// The heap grew from an `sbrk` syscall.
    HeapGrew {
        /// The break before growing.
        old_break: Addr,
        /// The break after growing.
        new_break: Addr
    },
    /// Execution paused.
    Paused {
        #[allow(missing_docs)]
        reason: PauseReason
    },
    /// Execution finished.
    Halted {
        #[allow(missing_docs)]
        reason: HaltReason
    },
    /// Execution stopped on a fault.
    Faulted(Fault),
    /// A syscall's read was cancelled and the syscall will be executed again on resume.
    ReadCancelled {
        /// The address of the syscall.
        pc: Addr
    },
}

/// A sender for each subscriber of the simulator.
///
/// Subscribers whose receivers are dropped are removed on the next event.
/// Bounded subscribers which are full miss events instead of blocking the simulator.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<cbc::Sender<SimEvent>>
}
impl EventBus {
    /// Creates an event bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber which receives every event.
    pub fn subscribe(&mut self) -> cbc::Receiver<SimEvent> {
        let (tx, rx) = cbc::unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Adds a subscriber which holds at most `cap` unread events.
    pub fn subscribe_bounded(&mut self, cap: usize) -> cbc::Receiver<SimEvent> {
        let (tx, rx) = cbc::bounded(cap);
        self.subscribers.push(tx);
        rx
    }

    /// Whether anybody is subscribed.
    pub fn is_observed(&self) -> bool {
        !self.subscribers.is_empty()
    }

    /// Sends an event to every subscriber.
    pub fn emit(&mut self, event: SimEvent) {
        self.subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) | Err(cbc::TrySendError::Full(_)) => true,
            Err(cbc::TrySendError::Disconnected(_)) => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus() {
        let mut bus = EventBus::new();
        assert!(!bus.is_observed());
        bus.emit(SimEvent::InstructionExecuted { pc: Addr::new(0) });

        let all = bus.subscribe();
        let bounded = bus.subscribe_bounded(1);
        let dropped = bus.subscribe();
        drop(dropped);

        bus.emit(SimEvent::InstructionExecuted { pc: Addr::new(0) });
        bus.emit(SimEvent::InstructionExecuted { pc: Addr::new(4) });
        assert_eq!(bus.subscribers.len(), 2);

        assert_eq!(all.try_iter().count(), 2);
        assert_eq!(bounded.try_iter().collect::<Vec<_>>(), [SimEvent::InstructionExecuted { pc: Addr::new(0) }]);
    }
}

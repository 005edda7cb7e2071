//! The frame stack and call frame management.
//!
//! This module exposes:
//! - [`FrameStack`]: The frame stack used by the Simulator.
//! - [`Frame`]: All the data from a given frame.
//!
//! A frame is entered by `jal`/`jalr` and left by `jr $ra`.
//! The simulator uses the frame depth to implement
//! [`Simulator::step_over`] and [`Simulator::step_out`].
//!
//! [`Simulator::step_over`]: super::Simulator::step_over
//! [`Simulator::step_out`]: super::Simulator::step_out

use crate::ast::reg_consts::{A0, A1, A2, A3, SP};

use super::mem::{Addr, RegFile, Word};

/// A frame entry, which defines all the known information about a frame.
///
/// This information is only exposed by the Simulator if the `debug_frames` flag is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The memory location of the caller instruction.
    pub caller_addr: Addr,

    /// The memory location of the start of the callee subroutine.
    pub callee_addr: Addr,

    /// The value of `$sp` when the call occurred.
    pub stack_ptr: Word,

    /// The argument registers (`$a0`-`$a3`) when the call occurred.
    pub arguments: [Word; 4]
}

/// The stack of call frames.
///
/// This struct is used within the Simulator to keep track of the frames of subroutine calls.
/// The amount of information it keeps track of depends on the `debug_frames` flag of the Simulator.
/// - If the `debug_frames` flag is true, this keeps track of a Vec of [`Frame`]s.
/// - If the `debug_frames` flag is false, this only keeps track of the number of frames traversed.
#[derive(Debug)]
pub struct FrameStack {
    /// The number of frames traversed.
    ///
    /// At top level execution, `frame_no` == 0.
    /// Every call (`jal`, `jalr`) increments this value,
    /// and every return (`jr $ra`) decrements this value.
    frame_no: u64,

    /// The frames.
    ///
    /// If `None`, frames are not being tracked.
    frames: Option<Vec<Frame>>
}

impl FrameStack {
    /// Creates a new frame stack.
    pub(super) fn new(debug_frames: bool) -> Self {
        Self {
            frame_no: 0,
            frames: debug_frames.then(Vec::new)
        }
    }

    /// Gets the current number of frames entered.
    pub fn len(&self) -> u64 {
        self.frame_no
    }

    /// Tests whether the frame stack is at top level execution.
    pub fn is_empty(&self) -> bool {
        self.frame_no == 0
    }

    /// Gets the list of current frames (if debug frames are enabled).
    pub fn frames(&self) -> Option<&[Frame]> {
        self.frames.as_deref()
    }

    /// Pushes a new frame to the frame stack.
    ///
    /// This should be called at the instruction where a call occurs.
    pub(super) fn push_frame(&mut self, caller: Addr, callee: Addr, regs: &RegFile) {
        self.frame_no += 1;
        if let Some(frames) = self.frames.as_mut() {
            frames.push(Frame {
                caller_addr: caller,
                callee_addr: callee,
                stack_ptr: regs.get(SP),
                arguments: [A0, A1, A2, A3].map(|r| regs.get(r)),
            });
        }
    }

    /// Pops a frame from the frame stack.
    ///
    /// This should be called at the instruction where a return occurs.
    pub(super) fn pop_frame(&mut self) {
        self.frame_no = self.frame_no.saturating_sub(1);
        if let Some(frames) = self.frames.as_mut() {
            frames.pop();
        }
    }
}
impl Default for FrameStack {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames() {
        let regs = RegFile::new(&mut 0u32);
        regs.set(A0, Word::new(3));

        let mut untracked = FrameStack::new(false);
        untracked.push_frame(Addr::new(0x0040_0000), Addr::new(0x0040_0010), &regs);
        assert_eq!(untracked.len(), 1);
        assert_eq!(untracked.frames(), None);

        let mut tracked = FrameStack::new(true);
        tracked.push_frame(Addr::new(0x0040_0000), Addr::new(0x0040_0010), &regs);
        let frames = tracked.frames().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].arguments[0], Word::new(3));
        assert_eq!(frames[0].stack_ptr, super::super::mem::SP_INIT);

        tracked.pop_frame();
        tracked.pop_frame();
        assert!(tracked.is_empty());
        assert_eq!(tracked.frames(), Some(&[][..]));
    }
}

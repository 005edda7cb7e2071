//! Utilities to debug simulation.
//!
//! The key type here is [`Breakpoint`], which can be added to the [`Simulator`]'s
//! breakpoint field to cause the simulator to break.
use std::fmt::Write;

use crate::ast::Reg;

use super::mem::Addr;
use super::Simulator;

/// Common breakpoints.
#[derive(PartialEq, Eq, Hash, Clone)]
pub enum Breakpoint {
    /// Break when the PC is equal to the given value.
    PC(Addr),

    /// Break when the provided register is set to a given value.
    Reg {
        /// Register to check.
        reg: Reg,
        /// Predicate to break against.
        value: Comparator
    },
    /// Break when the word at the provided memory address holds a given value.
    Mem {
        /// Address to check.
        addr: Addr,
        /// Predicate to break against.
        value: Comparator
    },
    /// Break when the heap's break is a given value.
    HeapBreak(Comparator),
}

impl Breakpoint where Breakpoint: Send + Sync { /* assert Breakpoint is send/sync */ }

impl Breakpoint {
    /// Checks if a break should occur.
    pub fn check(&self, sim: &Simulator) -> bool {
        let cpu = sim.cpu();
        match self {
            Breakpoint::PC(expected) => *expected == cpu.pc(),
            Breakpoint::Reg { reg, value: cmp } => cmp.check(cpu.reg(*reg).get()),
            // unreadable addresses never break
            Breakpoint::Mem { addr, value: cmp } => cpu.mem().read_word(*addr).is_ok_and(|w| cmp.check(w.get())),
            Breakpoint::HeapBreak(cmp) => cmp.check(cpu.mem().brk().get()),
        }
    }

    fn fmt_bp(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::PC(expected) => write!(f, "PC == {expected}"),
            Self::Reg { reg, value } => {
                write!(f, "{reg} ")?;
                value.fmt_cmp(f)
            },
            Self::Mem { addr, value } => {
                write!(f, "mem[{addr}] ")?;
                value.fmt_cmp(f)
            },
            Self::HeapBreak(value) => {
                f.write_str("brk ")?;
                value.fmt_cmp(f)
            }
        }
    }
}
impl std::fmt::Debug for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Breakpoint(")?;
        self.fmt_bp(f)?;
        f.write_char(')')
    }
}
impl std::fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.fmt_bp(f)
    }
}

/// Predicate checking whether the current value matches some value.
///
/// Values are compared as unsigned words.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum Comparator {
    /// Never breaks.
    Never,
    /// Break if the desired value is less than the provided value.
    Lt(u32),
    /// Break if the desired value is equal to the provided value.
    Eq(u32),
    /// Break if the desired value is less than or equal to the provided value.
    Le(u32),
    /// Break if the desired value is greater than the provided value.
    Gt(u32),
    /// Break if the desired value is not equal to the provided value.
    Ne(u32),
    /// Break if the desired value is greater than or equal to the provided value.
    Ge(u32),
    /// Always breaks.
    Always
}
impl Comparator {
    /// Checks if the operand passes the comparator.
    pub fn check(&self, operand: u32) -> bool {
        match *self {
            Comparator::Never  => false,
            Comparator::Lt(r)  => operand < r,
            Comparator::Eq(r)  => operand == r,
            Comparator::Le(r)  => operand <= r,
            Comparator::Gt(r)  => operand > r,
            Comparator::Ne(r)  => operand != r,
            Comparator::Ge(r)  => operand >= r,
            Comparator::Always => true,
        }
    }

    fn fmt_cmp(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Comparator::Never  => f.write_str("never"),
            Comparator::Lt(r)  => write!(f, "< {r}"),
            Comparator::Eq(r)  => write!(f, "== {r}"),
            Comparator::Le(r)  => write!(f, "<= {r}"),
            Comparator::Gt(r)  => write!(f, "> {r}"),
            Comparator::Ne(r)  => write!(f, "!= {r}"),
            Comparator::Ge(r)  => write!(f, ">= {r}"),
            Comparator::Always => f.write_str("always"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::reg_consts::T0;

    use super::*;

    #[test]
    fn test_comparator() {
        assert!(Comparator::Lt(5).check(4));
        assert!(!Comparator::Lt(5).check(5));
        assert!(Comparator::Ge(5).check(5));
        assert!(Comparator::Ne(5).check(0));
        assert!(Comparator::Always.check(0));
        assert!(!Comparator::Never.check(0));
        // unsigned comparison
        assert!(Comparator::Gt(0).check(-1i32 as u32));
    }

    #[test]
    fn test_fmt() {
        let bp = Breakpoint::Reg { reg: T0, value: Comparator::Eq(3) };
        assert_eq!(bp.to_string(), "$t0 == 3");
        assert_eq!(format!("{:?}", Breakpoint::PC(Addr::new(0x0040_0008))), "Breakpoint(PC == 0x00400008)");
        assert_eq!(Breakpoint::HeapBreak(Comparator::Always).to_string(), "brk always");
    }
}

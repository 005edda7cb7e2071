//! Components relating to the abstract syntax trees (ASTs)
//! used in representing assembly instructions.
//!
//! These components together are used to construct...
//! - [`asm::AsmInstr`] (a data structure holding an assembly source code instruction, including pseudo-instructions),
//! - [`asm::Directive`] (a data structure holding an assembly source code directive),
//! - and [`sim::SimInstr`] (a data structure holding an executable machine instruction).

pub mod asm;
pub mod sim;

use std::num::TryFromIntError;

/// The names of each register, indexed by register number.
pub const REG_NAMES: [&str; 32] = [
    "$zero", "$at", "$v0", "$v1", "$a0", "$a1", "$a2", "$a3",
    "$t0",   "$t1", "$t2", "$t3", "$t4", "$t5", "$t6", "$t7",
    "$s0",   "$s1", "$s2", "$s3", "$s4", "$s5", "$s6", "$s7",
    "$t8",   "$t9", "$k0", "$k1", "$gp", "$sp", "$fp", "$ra",
];

/// A general purpose register. Must be between 0 and 31.
///
/// This `Reg` struct can either be constructed by selecting a register from [`reg_consts`],
/// by name with [`Reg::from_name`], or by number with [`Reg::try_from`].
///
/// ## Examples
///
/// ```text
/// addi $sp, $sp, -4
///      ~~~  ~~~
/// sw $ra, 0($sp)
///    ~~~    ~~~
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct Reg(pub(crate) u8);

/// Register constants!
///
/// Every register is named after its role in the MIPS calling convention.
#[allow(missing_docs)]
pub mod reg_consts {
    use super::Reg;

    /// Always reads as zero. Writes are discarded.
    pub const ZERO: Reg = Reg(0);
    /// Assembler temporary, used by pseudo-instruction expansions.
    pub const AT: Reg = Reg(1);
    pub const V0: Reg = Reg(2);
    pub const V1: Reg = Reg(3);
    pub const A0: Reg = Reg(4);
    pub const A1: Reg = Reg(5);
    pub const A2: Reg = Reg(6);
    pub const A3: Reg = Reg(7);
    pub const T0: Reg = Reg(8);
    pub const T1: Reg = Reg(9);
    pub const T2: Reg = Reg(10);
    pub const T3: Reg = Reg(11);
    pub const T4: Reg = Reg(12);
    pub const T5: Reg = Reg(13);
    pub const T6: Reg = Reg(14);
    pub const T7: Reg = Reg(15);
    pub const S0: Reg = Reg(16);
    pub const S1: Reg = Reg(17);
    pub const S2: Reg = Reg(18);
    pub const S3: Reg = Reg(19);
    pub const S4: Reg = Reg(20);
    pub const S5: Reg = Reg(21);
    pub const S6: Reg = Reg(22);
    pub const S7: Reg = Reg(23);
    pub const T8: Reg = Reg(24);
    pub const T9: Reg = Reg(25);
    pub const K0: Reg = Reg(26);
    pub const K1: Reg = Reg(27);
    /// Global pointer.
    pub const GP: Reg = Reg(28);
    /// Stack pointer.
    pub const SP: Reg = Reg(29);
    /// Frame pointer (also known as `$s8`).
    pub const FP: Reg = Reg(30);
    /// Return address, written by `jal` and `jalr`.
    pub const RA: Reg = Reg(31);
}
impl Reg {
    /// Gets the register number of this [`Reg`]. This is always between 0 and 31.
    pub fn reg_no(self) -> u8 {
        self.0
    }

    /// The conventional name of this register (e.g., `$sp`).
    pub fn name(self) -> &'static str {
        REG_NAMES[usize::from(self.0)]
    }

    /// Looks up a register by its name, with its leading `$`.
    ///
    /// Registers can either be named by number (`$0`-`$31`)
    /// or by their conventional name (`$t0`, `$sp`, `$s8`, etc.).
    ///
    /// # Example
    ///
    /// ```
    /// use mips_ensemble::ast::Reg;
    /// use mips_ensemble::ast::reg_consts::{FP, SP};
    ///
    /// assert_eq!(Reg::from_name("$sp"), Some(SP));
    /// assert_eq!(Reg::from_name("$29"), Some(SP));
    /// assert_eq!(Reg::from_name("$s8"), Some(FP));
    /// assert_eq!(Reg::from_name("$32"), None);
    /// assert_eq!(Reg::from_name("sp"), None);
    /// ```
    pub fn from_name(name: &str) -> Option<Reg> {
        let rest = name.strip_prefix('$')?;
        if rest.bytes().next().is_some_and(|b| b.is_ascii_digit()) {
            // Disallow leading zeroes so "$08" isn't accepted as $8.
            if rest.len() > 1 && rest.starts_with('0') { return None; }
            let n: u8 = rest.parse().ok()?;
            return Reg::try_from(n).ok();
        }

        if name == "$s8" { return Some(reg_consts::FP); }
        REG_NAMES.iter()
            .position(|&n| n == name)
            .map(|i| Reg(i as u8))
    }
}
impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
impl From<Reg> for usize {
    // Used for indexing the reg file in [`crate::sim::mem::RegFile`].
    fn from(value: Reg) -> Self {
        usize::from(value.0)
    }
}
impl TryFrom<u8> for Reg {
    type Error = TryFromIntError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0..=31 => Ok(Reg(value)),
            // There's no public constructor for this error, so make a conversion fail.
            _ => u8::try_from(256u16).map(|_| Reg(0)),
        }
    }
}

/// A value representing an immediate value or an offset.
///
/// The `IMM` type represents the backing type of this immediate.
/// The signedness of the immediate is dependent on the signedness of the `IMM` type:
/// - `Imm<i32, _>`: signed immediate (e.g., [`SImm16`])
/// - `Imm<u32, _>`: unsigned immediate (e.g., [`UImm16`], [`Shamt`])
///
/// `N` indicates the maximum bit size of this immediate value.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Imm<IMM, const N: u32>(IMM);

/// A signed 16-bit immediate (used for `addi`, `slti`, and memory offsets).
///
/// ## Examples
///
/// ```text
/// addi $t0, $t0, -1
///                ~~
/// lw $t1, 8($sp)
///         ~
/// ```
pub type SImm16 = Imm<i32, 16>;
/// An unsigned 16-bit immediate (used for `andi`, `ori`, `xori`, and `lui`).
///
/// ## Examples
///
/// ```text
/// ori $t0, $zero, 0xFFFF
///                 ~~~~~~
/// lui $t1, 0x1001
///          ~~~~~~
/// ```
pub type UImm16 = Imm<u32, 16>;
/// An unsigned 5-bit shift amount (used for `sll`, `srl`, `sra`).
pub type Shamt = Imm<u32, 5>;

impl<IMM: std::fmt::Display, const N: u32> std::fmt::Display for Imm<IMM, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The errors that can result from calling [`Imm::new`].
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum ImmNewErr {
    /// The provided value cannot fit an unsigned integer of the given bitsize.
    CannotFitUnsigned(u32),
    /// The provided value cannot fit a signed integer of the given bitsize.
    CannotFitSigned(u32)
}
impl std::fmt::Display for ImmNewErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImmNewErr::CannotFitUnsigned(n) => write!(f, "value is too big for unsigned {n}-bit integer"),
            ImmNewErr::CannotFitSigned(n) => write!(f, "value is too big for signed {n}-bit integer"),
        }
    }
}
impl std::error::Error for ImmNewErr {}
impl crate::err::Error for ImmNewErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        let range = match *self {
            ImmNewErr::CannotFitUnsigned(n) => format!("the range for an unsigned {n}-bit integer is [0, {}]", (1i64 << n) - 1),
            ImmNewErr::CannotFitSigned(n) => format!("the range for a signed {n}-bit integer is [{}, {}]", -(1i64 << (n - 1)), (1i64 << (n - 1)) - 1),
        };
        Some(range.into())
    }
}

mod imm_base {
    use super::ImmNewErr;

    /// Any type that could store a value for [`Imm`].
    ///
    /// [`Imm`]: super::Imm
    pub trait ImmBacking: Copy + Eq {
        /// How many bits are contained within this backing.
        const BITS: u32;

        /// Truncates the given value to the provided `bit_size`
        /// (sign-extending or zero-extending back to the full backing).
        fn truncate(self, bit_size: u32) -> Self;

        /// The error to raise if a given value doesn't fit in `bit_size` bits.
        fn does_not_fit_error(bit_size: u32) -> ImmNewErr;

        /// Lossless conversion from a 64-bit integer, if the value fits in the backing.
        fn try_from_i64(n: i64) -> Option<Self>;
    }

    macro_rules! impl_imm_backing {
        ($($Int:ty: $Err:ident),*) => {
            $(
                impl ImmBacking for $Int {
                    const BITS: u32 = Self::BITS;

                    fn truncate(self, bit_size: u32) -> Self {
                        match bit_size {
                            0 => 0,
                            n => (self << (Self::BITS - n)) >> (Self::BITS - n)
                        }
                    }

                    fn does_not_fit_error(bit_size: u32) -> ImmNewErr {
                        ImmNewErr::$Err(bit_size)
                    }

                    fn try_from_i64(n: i64) -> Option<Self> {
                        <$Int>::try_from(n).ok()
                    }
                }
            )*
        }
    }
    impl_imm_backing! {
        u32: CannotFitUnsigned,
        i32: CannotFitSigned
    }
}
pub(crate) use imm_base::ImmBacking;

impl<IMM: ImmBacking, const N: u32> Imm<IMM, N> {
    /// Creates a new immediate value.
    /// This must fit within `N` bits of the representation, otherwise an error is raised.
    ///
    /// # Examples
    ///
    /// ```
    /// # use mips_ensemble::ast::{SImm16, UImm16};
    /// #
    /// assert!(SImm16::new(-32768).is_ok());
    /// assert!(SImm16::new(32768).is_err());
    /// assert!(UImm16::new(0xFFFF).is_ok());
    /// assert!(UImm16::new(0x10000).is_err());
    /// ```
    pub fn new(n: IMM) -> Result<Self, ImmNewErr> {
        match n == n.truncate(N) {
            true  => Ok(Imm(n)),
            false => Err(IMM::does_not_fit_error(N)),
        }
    }

    /// Creates a new immediate from any integer, checking it fits in `N` bits.
    pub fn from_i64(n: i64) -> Result<Self, ImmNewErr> {
        IMM::try_from_i64(n)
            .ok_or(IMM::does_not_fit_error(N))
            .and_then(Self::new)
    }

    /// Creates a new immediate by extending the first N bits of the integer,
    /// and discarding the rest.
    ///
    /// The extension is sign-extended if the backing is signed,
    /// and zero-extended if the backing is unsigned.
    ///
    /// ```
    /// # use mips_ensemble::ast::SImm16;
    /// #
    /// assert_eq!(SImm16::new_trunc(0xFFFF).get(), -1);
    /// ```
    pub fn new_trunc(n: IMM) -> Self {
        Self(n.truncate(N))
    }

    /// Gets the value of the immediate.
    pub fn get(&self) -> IMM {
        self.0
    }
}
/// A label.
///
/// This struct stores the name of the label (accessible by the `name` field)
/// and the source code span indicating where the label is located in assembly source code.
///
/// # Examples
/// ```text
/// main:
/// ~~~~
///     li $t0, 5
/// loop:
/// ~~~~
///     addi $t0, $t0, -1
///     bnez $t0, loop
///               ~~~~
///     j end
///       ~~~
/// end:
/// ~~~
///     li $v0, 10
///     syscall
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct Label {
    /// The label's identifier
    pub name: String,

    /// The start of the label in assembly source code.
    /// The end is computed from the length of the name.
    start: usize
}
impl Label {
    /// Creates a new label.
    pub fn new(name: String, span: std::ops::Range<usize>) -> Self {
        debug_assert_eq!(span.start + name.len(), span.end, "span should have the same length as name");
        Label { name, start: span.start }
    }
    /// Returns the span of the label in assembly source code.
    pub fn span(&self) -> std::ops::Range<usize> {
        self.start .. (self.start + self.name.len())
    }
}
impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.name.fmt(f)
    }
}

/// A reference to an address, either by label (plus an optional byte offset)
/// or by an absolute numeric value.
///
/// This is used for jump and branch targets, `la` sources, `.word` values,
/// and label memory operands. The label is resolved during assembly.
///
/// ## Examples
/// ```text
/// j loop
///   ~~~~
/// la $a0, msg
///         ~~~
/// lw $t0, arr+8
///         ~~~~~
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum AddrRef {
    /// A label, offset by some number of bytes.
    Label(Label, i32),
    /// An absolute numeric value.
    Value(u32)
}
impl std::fmt::Display for AddrRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddrRef::Label(label, 0) => label.fmt(f),
            AddrRef::Label(label, off) if *off > 0 => write!(f, "{label}+{off}"),
            AddrRef::Label(label, off) => write!(f, "{label}{off}"),
            AddrRef::Value(v) => write!(f, "0x{v:X}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::reg_consts::{A0, FP, RA, T8, ZERO};
    use super::{Imm, ImmNewErr, Reg, SImm16, Shamt, UImm16};

    #[test]
    fn test_reg_names() {
        for n in 0..32u8 {
            let r = Reg::try_from(n).unwrap();
            assert_eq!(Reg::from_name(r.name()), Some(r));
            assert_eq!(Reg::from_name(&format!("${n}")), Some(r));
        }
        assert_eq!(ZERO.to_string(), "$zero");
        assert_eq!(A0.to_string(), "$a0");
        assert_eq!(T8.to_string(), "$t8");
        assert_eq!(RA.to_string(), "$ra");
        assert_eq!(Reg::from_name("$s8"), Some(FP));
        assert_eq!(Reg::from_name("$08"), None);
        assert_eq!(Reg::from_name("$t10"), None);
        assert!(Reg::try_from(32).is_err());
    }

    #[test]
    fn test_imm_bounds() {
        assert_eq!(SImm16::new(32767).map(|i| i.get()), Ok(32767));
        assert_eq!(SImm16::new(-32769), Err(ImmNewErr::CannotFitSigned(16)));
        assert_eq!(UImm16::new(65536), Err(ImmNewErr::CannotFitUnsigned(16)));
        assert_eq!(Shamt::new(31).map(|i| i.get()), Ok(31));
        assert_eq!(Shamt::new(32), Err(ImmNewErr::CannotFitUnsigned(5)));
    }

    #[test]
    fn test_imm_from_i64() {
        assert!(SImm16::from_i64(-1).is_ok());
        assert!(SImm16::from_i64(0xFFFF).is_err());
        assert!(UImm16::from_i64(-1).is_err());
        assert!(UImm16::from_i64(0xFFFF).is_ok());
        assert!(Imm::<u32, 16>::from_i64(1 << 40).is_err());
        assert!(Imm::<i32, 16>::from_i64(1 << 40).is_err());
    }
}

//! This module holds the statements that are found in a MIPS assembly source file.
//!
//! An assembly source file is parsed into a list of [`Stmt`]s,
//! each of which holds either an instruction ([`AsmInstr`]) or a directive ([`Directive`]),
//! along with the labels attached to it.
//!
//! Unlike [`SimInstr`], an [`AsmInstr`] may still reference labels,
//! and may be a pseudo-instruction which expands into several machine instructions.
//!
//! [`SimInstr`]: crate::ast::sim::SimInstr

use std::ops::Range;

use super::sim::{AluOp, BranchCond, HiLo, ImmOp, MemWidth, MulDivOp, ShiftOp};
use super::{AddrRef, Label, Reg, SImm16, Shamt, UImm16};

/// The target of a branch instruction.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum BranchTarget {
    /// A label, which is converted into an offset during assembly.
    Label(Label),
    /// A raw offset (in words, relative to the instruction after the branch).
    Offset(SImm16),
}

/// A memory operand of a load or store instruction.
///
/// ## Examples
/// ```text
/// lw $t0, 4($sp)
///         ~~~~~~
/// lw $t0, ($a0)
///         ~~~~~
/// lw $t0, counter
///         ~~~~~~~
/// sw $t0, arr+8
///         ~~~~~
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum MemOperand {
    /// A register plus a signed 16-bit offset (`off($reg)`).
    Base(SImm16, Reg),
    /// A direct address (`label`, `label+off`, or a number).
    ///
    /// This cannot be encoded in one instruction,
    /// so it expands into a `lui` into `$at` followed by the access.
    Direct(AddrRef),
}

/// Comparison pseudo-branches, which expand into an `slt` into `$at` followed by a branch.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[allow(missing_docs)]
pub enum CmpCond { Lt, Gt, Le, Ge }

/// An assembly instruction.
///
/// This includes both machine instructions and pseudo-instructions.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum AsmInstr {
    /// `op rd, rs, rt` (for variable shifts, `op rd, rt, rs`)
    Alu(AluOp, Reg, Reg, Reg),
    /// `op rd, rt, shamt`
    Shift(ShiftOp, Reg, Reg, Shamt),
    /// `jr rs`
    Jr(Reg),
    /// `jalr rd, rs` (`rd` defaults to `$ra`)
    Jalr(Reg, Reg),
    /// `op rs, rt`
    MulDiv(MulDivOp, Reg, Reg),
    /// `mfhi rd`/`mflo rd`
    MoveFrom(HiLo, Reg),
    /// `mthi rs`/`mtlo rs`
    MoveTo(HiLo, Reg),
    /// `syscall`
    Syscall,
    /// `break`
    Break,
    /// `op rt, rs, imm`
    ///
    /// The immediate holds the 16 bits as they are encoded.
    AluImm(ImmOp, Reg, Reg, UImm16),
    /// `lui rt, imm`
    Lui(Reg, UImm16),
    /// `op rs, rt, target` (`rt` is `$zero` for the unary conditions)
    Branch(BranchCond, Reg, Reg, BranchTarget),
    /// `op rt, mem`
    Load(MemWidth, Reg, MemOperand),
    /// `op rt, mem`
    Store(MemWidth, Reg, MemOperand),
    /// `j target`
    J(AddrRef),
    /// `jal target`
    Jal(AddrRef),

    /// `li rt, imm` (pseudo)
    Li(Reg, u32),
    /// `la rt, addr` (pseudo)
    La(Reg, AddrRef),
    /// `move rd, rs` (pseudo)
    Move(Reg, Reg),
    /// `nop` (pseudo)
    Nop,
    /// `b target` (pseudo)
    B(BranchTarget),
    /// `beqz rs, target` (pseudo)
    Beqz(Reg, BranchTarget),
    /// `bnez rs, target` (pseudo)
    Bnez(Reg, BranchTarget),
    /// `blt`/`bgt`/`ble`/`bge rs, rt, target` (pseudo)
    BranchCmp(CmpCond, Reg, Reg, BranchTarget),
    /// `neg rd, rs` (pseudo)
    Neg(Reg, Reg),
    /// `not rd, rs` (pseudo)
    Not(Reg, Reg),
}
impl AsmInstr {
    /// The number of machine words this instruction occupies once assembled.
    pub fn word_len(&self) -> u32 {
        match self {
            AsmInstr::Li(_, value) => match li_fits_one(*value) {
                true  => 1,
                false => 2,
            },
            AsmInstr::La(_, _) => 2,
            AsmInstr::Load(_, _, MemOperand::Direct(_)) => 2,
            AsmInstr::Store(_, _, MemOperand::Direct(_)) => 2,
            AsmInstr::BranchCmp(..) => 2,
            _ => 1
        }
    }
}

/// Whether the value of an `li` can be loaded in a single instruction
/// (with either `addiu` or `ori` from `$zero`).
pub(crate) fn li_fits_one(value: u32) -> bool {
    value <= 0xFFFF || i16::try_from(value as i32).is_ok()
}

/// An assembly directive.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum Directive {
    /// `.text`: Following statements are placed in the text segment.
    Text,
    /// `.data`: Following statements are placed in the data segment.
    Data,
    /// `.globl label`: Marks a label as global.
    Globl(Label),
    /// `.word v, ...`: 32-bit values (numbers or labels).
    Word(Vec<AddrRef>),
    /// `.half v, ...`: 16-bit values.
    Half(Vec<u16>),
    /// `.byte v, ...`: 8-bit values.
    Byte(Vec<u8>),
    /// `.ascii "s"`: The bytes of a string.
    Ascii(String),
    /// `.asciiz "s"`: The bytes of a string, followed by a NUL byte.
    Asciiz(String),
    /// `.space n`: `n` zero bytes.
    Space(u32),
    /// `.align n`: Pads to the next multiple of `2^n` bytes.
    Align(u32),
}
impl Directive {
    /// The number of bytes this directive emits (not including alignment padding).
    pub fn byte_len(&self) -> u32 {
        match self {
            Directive::Text | Directive::Data | Directive::Globl(_) | Directive::Align(_) => 0,
            Directive::Word(ws)  => 4 * ws.len() as u32,
            Directive::Half(hs)  => 2 * hs.len() as u32,
            Directive::Byte(bs)  => bs.len() as u32,
            Directive::Ascii(s)  => s.len() as u32,
            Directive::Asciiz(s) => s.len() as u32 + 1,
            Directive::Space(n)  => *n,
        }
    }

    /// The alignment (in bytes) the cursor has to be at before this directive is emitted.
    pub fn alignment(&self) -> u32 {
        match self {
            Directive::Word(_) => 4,
            Directive::Half(_) => 2,
            Directive::Align(n) => 1 << n,
            _ => 1
        }
    }

    /// Whether this directive emits data (and therefore cannot appear in the text segment).
    pub fn is_data(&self) -> bool {
        !matches!(self, Directive::Text | Directive::Data | Directive::Globl(_))
    }
}

/// Either an instruction or a directive.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum StmtKind {
    #[allow(missing_docs)]
    Instr(AsmInstr),
    #[allow(missing_docs)]
    Directive(Directive)
}

/// A "statement" in MIPS assembly.
///
/// While not a defined term in MIPS assembly,
/// a statement here refers to either an instruction or a directive,
/// along with the labels associated with it.
///
/// Labels on otherwise empty lines attach to the next statement.
/// Labels at the end of the file have no statement (`nucleus` is `None`)
/// and refer to the address after the last emitted item.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct Stmt {
    /// The labels.
    pub labels: Vec<Label>,
    /// The instruction or directive.
    pub nucleus: Option<StmtKind>,
    /// The span of the nucleus (or of the last label if there is no nucleus).
    pub span: Range<usize>
}

#[cfg(test)]
mod tests {
    use crate::ast::reg_consts::{T0, T1};
    use crate::ast::{AddrRef, Label};

    use super::*;

    #[test]
    fn test_word_len() {
        assert_eq!(AsmInstr::Li(T0, 5).word_len(), 1);
        assert_eq!(AsmInstr::Li(T0, 0xFFFF).word_len(), 1);
        assert_eq!(AsmInstr::Li(T0, (-5i32) as u32).word_len(), 1);
        assert_eq!(AsmInstr::Li(T0, 0x1_0000).word_len(), 2);
        assert_eq!(AsmInstr::Li(T0, 0x7FFF_FFFF).word_len(), 2);
        assert_eq!(AsmInstr::Li(T0, (-32769i32) as u32).word_len(), 2);
        assert_eq!(AsmInstr::La(T0, AddrRef::Value(0)).word_len(), 2);
        assert_eq!(AsmInstr::BranchCmp(CmpCond::Lt, T0, T1, BranchTarget::Offset(SImm16::new(0).unwrap())).word_len(), 2);
        assert_eq!(AsmInstr::Load(MemWidth::Word, T0, MemOperand::Base(SImm16::new(0).unwrap(), T1)).word_len(), 1);
        assert_eq!(AsmInstr::Load(MemWidth::Word, T0, MemOperand::Direct(AddrRef::Value(0))).word_len(), 2);
        assert_eq!(AsmInstr::Syscall.word_len(), 1);
    }

    #[test]
    fn test_directive_len() {
        assert_eq!(Directive::Asciiz("hi".into()).byte_len(), 3);
        assert_eq!(Directive::Ascii("hi".into()).byte_len(), 2);
        assert_eq!(Directive::Word(vec![AddrRef::Value(1), AddrRef::Label(Label::new("x".into(), 0..1), 0)]).byte_len(), 8);
        assert_eq!(Directive::Align(3).alignment(), 8);
        assert_eq!(Directive::Half(vec![1]).alignment(), 2);
        assert!(!Directive::Globl(Label::new("main".into(), 0..4)).is_data());
    }
}

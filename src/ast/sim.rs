//! This module is used for holding simulation instructions ([`SimInstr`]),
//! which are instructions that directly map to machine code words.
//!
//! For instructions that map to assembly code, refer to [`asm::AsmInstr`].
//!
//! [`asm::AsmInstr`]: crate::ast::asm::AsmInstr

use super::{Reg, SImm16, Shamt, UImm16};

const OP_SPECIAL: u32 = 0x00;
const OP_REGIMM: u32 = 0x01;
const OP_J: u32 = 0x02;
const OP_JAL: u32 = 0x03;
const OP_SPECIAL2: u32 = 0x1C;

const FUNCT_JR: u32 = 0x08;
const FUNCT_JALR: u32 = 0x09;
const FUNCT_SYSCALL: u32 = 0x0C;
const FUNCT_BREAK: u32 = 0x0D;
const FUNCT_MFHI: u32 = 0x10;
const FUNCT_MTHI: u32 = 0x11;
const FUNCT_MFLO: u32 = 0x12;
const FUNCT_MTLO: u32 = 0x13;
const FUNCT2_MUL: u32 = 0x02;

/// Three-register arithmetic/logic operations (`op rd, rs, rt`).
///
/// For the variable shifts, `rt` is the shifted value and `rs` holds the shift amount
/// (written `sllv rd, rt, rs` in assembly).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[allow(missing_docs)]
pub enum AluOp {
    Add, Addu, Sub, Subu, And, Or, Xor, Nor, Slt, Sltu, Sllv, Srlv, Srav, Mul
}
/// Constant shift operations (`op rd, rt, shamt`).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[allow(missing_docs)]
pub enum ShiftOp { Sll, Srl, Sra }
/// Operations writing the `hi`/`lo` registers (`op rs, rt`).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[allow(missing_docs)]
pub enum MulDivOp { Mult, Multu, Div, Divu }
/// Either of the `hi` and `lo` registers.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[allow(missing_docs)]
pub enum HiLo { Hi, Lo }
/// Immediate arithmetic/logic operations (`op rt, rs, imm`).
///
/// `andi`, `ori`, `xori` zero-extend their immediate. The rest sign-extend.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[allow(missing_docs)]
pub enum ImmOp { Addi, Addiu, Slti, Sltiu, Andi, Ori, Xori }
/// Branch conditions.
///
/// `Beq` and `Bne` compare two registers. The rest compare `rs` against zero.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[allow(missing_docs)]
pub enum BranchCond { Beq, Bne, Blez, Bgtz, Bltz, Bgez }
/// The width and signedness of a memory access.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[allow(missing_docs)]
pub enum MemWidth { Byte, ByteU, Half, HalfU, Word }

impl AluOp {
    fn funct(self) -> u32 {
        match self {
            AluOp::Sllv => 0x04,
            AluOp::Srlv => 0x06,
            AluOp::Srav => 0x07,
            AluOp::Add  => 0x20,
            AluOp::Addu => 0x21,
            AluOp::Sub  => 0x22,
            AluOp::Subu => 0x23,
            AluOp::And  => 0x24,
            AluOp::Or   => 0x25,
            AluOp::Xor  => 0x26,
            AluOp::Nor  => 0x27,
            AluOp::Slt  => 0x2A,
            AluOp::Sltu => 0x2B,
            AluOp::Mul  => FUNCT2_MUL,
        }
    }
    fn from_funct(funct: u32) -> Option<Self> {
        [AluOp::Sllv, AluOp::Srlv, AluOp::Srav, AluOp::Add, AluOp::Addu, AluOp::Sub, AluOp::Subu,
            AluOp::And, AluOp::Or, AluOp::Xor, AluOp::Nor, AluOp::Slt, AluOp::Sltu]
            .into_iter()
            .find(|op| op.funct() == funct)
    }
    /// The assembly mnemonic for this operation.
    pub fn mnemonic(self) -> &'static str {
        match self {
            AluOp::Add  => "add",
            AluOp::Addu => "addu",
            AluOp::Sub  => "sub",
            AluOp::Subu => "subu",
            AluOp::And  => "and",
            AluOp::Or   => "or",
            AluOp::Xor  => "xor",
            AluOp::Nor  => "nor",
            AluOp::Slt  => "slt",
            AluOp::Sltu => "sltu",
            AluOp::Sllv => "sllv",
            AluOp::Srlv => "srlv",
            AluOp::Srav => "srav",
            AluOp::Mul  => "mul",
        }
    }
    fn is_variable_shift(self) -> bool {
        matches!(self, AluOp::Sllv | AluOp::Srlv | AluOp::Srav)
    }
}
impl ShiftOp {
    fn funct(self) -> u32 {
        match self {
            ShiftOp::Sll => 0x00,
            ShiftOp::Srl => 0x02,
            ShiftOp::Sra => 0x03,
        }
    }
    /// The assembly mnemonic for this operation.
    pub fn mnemonic(self) -> &'static str {
        match self {
            ShiftOp::Sll => "sll",
            ShiftOp::Srl => "srl",
            ShiftOp::Sra => "sra",
        }
    }
}
impl MulDivOp {
    fn funct(self) -> u32 {
        match self {
            MulDivOp::Mult  => 0x18,
            MulDivOp::Multu => 0x19,
            MulDivOp::Div   => 0x1A,
            MulDivOp::Divu  => 0x1B,
        }
    }
    /// The assembly mnemonic for this operation.
    pub fn mnemonic(self) -> &'static str {
        match self {
            MulDivOp::Mult  => "mult",
            MulDivOp::Multu => "multu",
            MulDivOp::Div   => "div",
            MulDivOp::Divu  => "divu",
        }
    }
}
impl ImmOp {
    fn opcode(self) -> u32 {
        match self {
            ImmOp::Addi  => 0x08,
            ImmOp::Addiu => 0x09,
            ImmOp::Slti  => 0x0A,
            ImmOp::Sltiu => 0x0B,
            ImmOp::Andi  => 0x0C,
            ImmOp::Ori   => 0x0D,
            ImmOp::Xori  => 0x0E,
        }
    }
    /// Whether this operation zero-extends its immediate.
    pub fn zero_extends(self) -> bool {
        matches!(self, ImmOp::Andi | ImmOp::Ori | ImmOp::Xori)
    }
    /// The assembly mnemonic for this operation.
    pub fn mnemonic(self) -> &'static str {
        match self {
            ImmOp::Addi  => "addi",
            ImmOp::Addiu => "addiu",
            ImmOp::Slti  => "slti",
            ImmOp::Sltiu => "sltiu",
            ImmOp::Andi  => "andi",
            ImmOp::Ori   => "ori",
            ImmOp::Xori  => "xori",
        }
    }
}
impl BranchCond {
    /// The assembly mnemonic for this condition.
    pub fn mnemonic(self) -> &'static str {
        match self {
            BranchCond::Beq  => "beq",
            BranchCond::Bne  => "bne",
            BranchCond::Blez => "blez",
            BranchCond::Bgtz => "bgtz",
            BranchCond::Bltz => "bltz",
            BranchCond::Bgez => "bgez",
        }
    }
    /// Whether this branch compares two registers (rather than one against zero).
    pub fn is_binary(self) -> bool {
        matches!(self, BranchCond::Beq | BranchCond::Bne)
    }
    /// Tests this condition.
    pub fn test(self, rs: u32, rt: u32) -> bool {
        let s = rs as i32;
        match self {
            BranchCond::Beq  => rs == rt,
            BranchCond::Bne  => rs != rt,
            BranchCond::Blez => s <= 0,
            BranchCond::Bgtz => s > 0,
            BranchCond::Bltz => s < 0,
            BranchCond::Bgez => s >= 0,
        }
    }
}
impl MemWidth {
    fn load_opcode(self) -> u32 {
        match self {
            MemWidth::Byte  => 0x20,
            MemWidth::Half  => 0x21,
            MemWidth::Word  => 0x23,
            MemWidth::ByteU => 0x24,
            MemWidth::HalfU => 0x25,
        }
    }
    fn store_opcode(self) -> u32 {
        match self {
            MemWidth::Byte | MemWidth::ByteU => 0x28,
            MemWidth::Half | MemWidth::HalfU => 0x29,
            MemWidth::Word => 0x2B,
        }
    }
    fn load_mnemonic(self) -> &'static str {
        match self {
            MemWidth::Byte  => "lb",
            MemWidth::ByteU => "lbu",
            MemWidth::Half  => "lh",
            MemWidth::HalfU => "lhu",
            MemWidth::Word  => "lw",
        }
    }
    fn store_mnemonic(self) -> &'static str {
        match self {
            MemWidth::Byte | MemWidth::ByteU => "sb",
            MemWidth::Half | MemWidth::HalfU => "sh",
            MemWidth::Word => "sw",
        }
    }
}

/// An instruction that can be executed by the simulator.
///
/// Each variant maps to exactly one 32-bit machine word
/// (see [`SimInstr::encode`] and [`SimInstr::decode`]).
/// Branch offsets are in words, relative to the instruction after the branch.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum SimInstr {
    /// `op rd, rs, rt`
    Alu(AluOp, Reg, Reg, Reg),
    /// `op rd, rt, shamt`
    Shift(ShiftOp, Reg, Reg, Shamt),
    /// `jr rs`
    Jr(Reg),
    /// `jalr rd, rs`
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
    /// `op rt, rs, imm` (stored as the raw 16 bits)
    AluImm(ImmOp, Reg, Reg, UImm16),
    /// `lui rt, imm`
    Lui(Reg, UImm16),
    /// `op rs, rt, offset` (`rt` is `$zero` for the unary conditions)
    Branch(BranchCond, Reg, Reg, SImm16),
    /// `op rt, offset(base)`
    Load(MemWidth, Reg, Reg, SImm16),
    /// `op rt, offset(base)`
    Store(MemWidth, Reg, Reg, SImm16),
    /// `j target` (the 26-bit word index)
    J(u32),
    /// `jal target` (the 26-bit word index)
    Jal(u32),
}

fn r_type(rs: Reg, rt: Reg, rd: Reg, shamt: u32, funct: u32) -> u32 {
    (u32::from(rs.0) << 21) | (u32::from(rt.0) << 16) | (u32::from(rd.0) << 11) | ((shamt & 0x1F) << 6) | funct
}
fn i_type(op: u32, rs: Reg, rt: Reg, imm: u32) -> u32 {
    (op << 26) | (u32::from(rs.0) << 21) | (u32::from(rt.0) << 16) | (imm & 0xFFFF)
}

impl SimInstr {
    /// Encodes this instruction into its machine code word.
    pub fn encode(&self) -> u32 {
        use super::reg_consts::ZERO;

        match *self {
            SimInstr::Alu(AluOp::Mul, rd, rs, rt) => (OP_SPECIAL2 << 26) | r_type(rs, rt, rd, 0, FUNCT2_MUL),
            SimInstr::Alu(op, rd, rs, rt) => r_type(rs, rt, rd, 0, op.funct()),
            SimInstr::Shift(op, rd, rt, sa) => r_type(ZERO, rt, rd, sa.get(), op.funct()),
            SimInstr::Jr(rs) => r_type(rs, ZERO, ZERO, 0, FUNCT_JR),
            SimInstr::Jalr(rd, rs) => r_type(rs, ZERO, rd, 0, FUNCT_JALR),
            SimInstr::MulDiv(op, rs, rt) => r_type(rs, rt, ZERO, 0, op.funct()),
            SimInstr::MoveFrom(HiLo::Hi, rd) => r_type(ZERO, ZERO, rd, 0, FUNCT_MFHI),
            SimInstr::MoveFrom(HiLo::Lo, rd) => r_type(ZERO, ZERO, rd, 0, FUNCT_MFLO),
            SimInstr::MoveTo(HiLo::Hi, rs) => r_type(rs, ZERO, ZERO, 0, FUNCT_MTHI),
            SimInstr::MoveTo(HiLo::Lo, rs) => r_type(rs, ZERO, ZERO, 0, FUNCT_MTLO),
            SimInstr::Syscall => FUNCT_SYSCALL,
            SimInstr::Break => FUNCT_BREAK,
            SimInstr::AluImm(op, rt, rs, imm) => i_type(op.opcode(), rs, rt, imm.get()),
            SimInstr::Lui(rt, imm) => i_type(0x0F, ZERO, rt, imm.get()),
            SimInstr::Branch(cond, rs, rt, off) => {
                let off = off.get() as u32;
                match cond {
                    BranchCond::Beq  => i_type(0x04, rs, rt, off),
                    BranchCond::Bne  => i_type(0x05, rs, rt, off),
                    BranchCond::Blez => i_type(0x06, rs, ZERO, off),
                    BranchCond::Bgtz => i_type(0x07, rs, ZERO, off),
                    BranchCond::Bltz => i_type(OP_REGIMM, rs, Reg(0), off),
                    BranchCond::Bgez => i_type(OP_REGIMM, rs, Reg(1), off),
                }
            },
            SimInstr::Load(w, rt, base, off) => i_type(w.load_opcode(), base, rt, off.get() as u32),
            SimInstr::Store(w, rt, base, off) => i_type(w.store_opcode(), base, rt, off.get() as u32),
            SimInstr::J(index) => (OP_J << 26) | (index & 0x03FF_FFFF),
            SimInstr::Jal(index) => (OP_JAL << 26) | (index & 0x03FF_FFFF),
        }
    }

    /// Decodes a machine code word into an instruction.
    ///
    /// This returns `None` if the word is not a supported instruction.
    ///
    /// # Example
    ///
    /// ```
    /// use mips_ensemble::ast::sim::SimInstr;
    ///
    /// // syscall
    /// assert_eq!(SimInstr::decode(0x0000_000C), Some(SimInstr::Syscall));
    /// // undefined SPECIAL function
    /// assert_eq!(SimInstr::decode(0x0000_003F), None);
    /// ```
    pub fn decode(word: u32) -> Option<Self> {
        let op = word >> 26;
        let rs = Reg(((word >> 21) & 0x1F) as u8);
        let rt = Reg(((word >> 16) & 0x1F) as u8);
        let rd = Reg(((word >> 11) & 0x1F) as u8);
        let shamt = (word >> 6) & 0x1F;
        let funct = word & 0x3F;
        let simm = SImm16::new_trunc((word & 0xFFFF) as i32);
        let uimm = UImm16::new_trunc(word & 0xFFFF);

        let instr = match op {
            OP_SPECIAL => match funct {
                0x00 => SimInstr::Shift(ShiftOp::Sll, rd, rt, Shamt::new_trunc(shamt)),
                0x02 => SimInstr::Shift(ShiftOp::Srl, rd, rt, Shamt::new_trunc(shamt)),
                0x03 => SimInstr::Shift(ShiftOp::Sra, rd, rt, Shamt::new_trunc(shamt)),
                FUNCT_JR => SimInstr::Jr(rs),
                FUNCT_JALR => SimInstr::Jalr(rd, rs),
                FUNCT_SYSCALL => SimInstr::Syscall,
                FUNCT_BREAK => SimInstr::Break,
                FUNCT_MFHI => SimInstr::MoveFrom(HiLo::Hi, rd),
                FUNCT_MTHI => SimInstr::MoveTo(HiLo::Hi, rs),
                FUNCT_MFLO => SimInstr::MoveFrom(HiLo::Lo, rd),
                FUNCT_MTLO => SimInstr::MoveTo(HiLo::Lo, rs),
                0x18 => SimInstr::MulDiv(MulDivOp::Mult, rs, rt),
                0x19 => SimInstr::MulDiv(MulDivOp::Multu, rs, rt),
                0x1A => SimInstr::MulDiv(MulDivOp::Div, rs, rt),
                0x1B => SimInstr::MulDiv(MulDivOp::Divu, rs, rt),
                f => SimInstr::Alu(AluOp::from_funct(f)?, rd, rs, rt),
            },
            OP_SPECIAL2 if funct == FUNCT2_MUL => SimInstr::Alu(AluOp::Mul, rd, rs, rt),
            OP_REGIMM => match rt.0 {
                0 => SimInstr::Branch(BranchCond::Bltz, rs, Reg(0), simm),
                1 => SimInstr::Branch(BranchCond::Bgez, rs, Reg(0), simm),
                _ => return None,
            },
            OP_J => SimInstr::J(word & 0x03FF_FFFF),
            OP_JAL => SimInstr::Jal(word & 0x03FF_FFFF),
            0x04 => SimInstr::Branch(BranchCond::Beq, rs, rt, simm),
            0x05 => SimInstr::Branch(BranchCond::Bne, rs, rt, simm),
            0x06 => SimInstr::Branch(BranchCond::Blez, rs, Reg(0), simm),
            0x07 => SimInstr::Branch(BranchCond::Bgtz, rs, Reg(0), simm),
            0x08 => SimInstr::AluImm(ImmOp::Addi, rt, rs, uimm),
            0x09 => SimInstr::AluImm(ImmOp::Addiu, rt, rs, uimm),
            0x0A => SimInstr::AluImm(ImmOp::Slti, rt, rs, uimm),
            0x0B => SimInstr::AluImm(ImmOp::Sltiu, rt, rs, uimm),
            0x0C => SimInstr::AluImm(ImmOp::Andi, rt, rs, uimm),
            0x0D => SimInstr::AluImm(ImmOp::Ori, rt, rs, uimm),
            0x0E => SimInstr::AluImm(ImmOp::Xori, rt, rs, uimm),
            0x0F => SimInstr::Lui(rt, uimm),
            0x20 => SimInstr::Load(MemWidth::Byte, rt, rs, simm),
            0x21 => SimInstr::Load(MemWidth::Half, rt, rs, simm),
            0x23 => SimInstr::Load(MemWidth::Word, rt, rs, simm),
            0x24 => SimInstr::Load(MemWidth::ByteU, rt, rs, simm),
            0x25 => SimInstr::Load(MemWidth::HalfU, rt, rs, simm),
            0x28 => SimInstr::Store(MemWidth::Byte, rt, rs, simm),
            0x29 => SimInstr::Store(MemWidth::Half, rt, rs, simm),
            0x2B => SimInstr::Store(MemWidth::Word, rt, rs, simm),
            _ => return None
        };

        Some(instr)
    }

    /// The value of the immediate operand for `AluImm`, extended to 32 bits
    /// according to the operation.
    pub fn extended_imm(op: ImmOp, imm: UImm16) -> u32 {
        match op.zero_extends() {
            true  => imm.get(),
            false => i32::from(imm.get() as u16 as i16) as u32,
        }
    }
}

impl std::fmt::Display for SimInstr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            SimInstr::Alu(op, rd, rs, rt) if op.is_variable_shift() => write!(f, "{} {rd}, {rt}, {rs}", op.mnemonic()),
            SimInstr::Alu(op, rd, rs, rt) => write!(f, "{} {rd}, {rs}, {rt}", op.mnemonic()),
            SimInstr::Shift(op, rd, rt, sa) => write!(f, "{} {rd}, {rt}, {sa}", op.mnemonic()),
            SimInstr::Jr(rs) => write!(f, "jr {rs}"),
            SimInstr::Jalr(rd, rs) => write!(f, "jalr {rd}, {rs}"),
            SimInstr::MulDiv(op, rs, rt) => write!(f, "{} {rs}, {rt}", op.mnemonic()),
            SimInstr::MoveFrom(HiLo::Hi, rd) => write!(f, "mfhi {rd}"),
            SimInstr::MoveFrom(HiLo::Lo, rd) => write!(f, "mflo {rd}"),
            SimInstr::MoveTo(HiLo::Hi, rs) => write!(f, "mthi {rs}"),
            SimInstr::MoveTo(HiLo::Lo, rs) => write!(f, "mtlo {rs}"),
            SimInstr::Syscall => f.write_str("syscall"),
            SimInstr::Break => f.write_str("break"),
            SimInstr::AluImm(op, rt, rs, imm) => {
                write!(f, "{} {rt}, {rs}, ", op.mnemonic())?;
                match op.zero_extends() {
                    true  => write!(f, "0x{:X}", imm.get()),
                    false => write!(f, "{}", SimInstr::extended_imm(op, imm) as i32),
                }
            },
            SimInstr::Lui(rt, imm) => write!(f, "lui {rt}, 0x{:X}", imm.get()),
            SimInstr::Branch(cond, rs, rt, off) => {
                write!(f, "{} {rs}, ", cond.mnemonic())?;
                if cond.is_binary() {
                    write!(f, "{rt}, ")?;
                }
                write!(f, "{off}")
            },
            SimInstr::Load(w, rt, base, off) => write!(f, "{} {rt}, {off}({base})", w.load_mnemonic()),
            SimInstr::Store(w, rt, base, off) => write!(f, "{} {rt}, {off}({base})", w.store_mnemonic()),
            SimInstr::J(index) => write!(f, "j 0x{:08X}", index << 2),
            SimInstr::Jal(index) => write!(f, "jal 0x{:08X}", index << 2),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::reg_consts::{A0, RA, SP, T0, T1, T2, V0, ZERO};
    use crate::ast::{SImm16, Shamt, UImm16};

    use super::*;

    fn assert_encodes(instr: SimInstr, word: u32) {
        assert_eq!(instr.encode(), word, "{instr} should encode to 0x{word:08X}");
        assert_eq!(SimInstr::decode(word), Some(instr), "0x{word:08X} should decode to {instr}");
    }

    #[test]
    fn test_known_encodings() {
        // add $t2, $t0, $t1
        assert_encodes(SimInstr::Alu(AluOp::Add, T2, T0, T1), 0x0109_5020);
        // mul $t2, $t0, $t1
        assert_encodes(SimInstr::Alu(AluOp::Mul, T2, T0, T1), 0x7109_5002);
        // sll $t0, $t1, 2
        assert_encodes(SimInstr::Shift(ShiftOp::Sll, T0, T1, Shamt::new(2).unwrap()), 0x0009_4080);
        // jr $ra
        assert_encodes(SimInstr::Jr(RA), 0x03E0_0008);
        // addi $sp, $sp, -4
        assert_encodes(SimInstr::AluImm(ImmOp::Addi, SP, SP, UImm16::new(0xFFFC).unwrap()), 0x23BD_FFFC);
        // ori $v0, $zero, 10
        assert_encodes(SimInstr::AluImm(ImmOp::Ori, V0, ZERO, UImm16::new(10).unwrap()), 0x3402_000A);
        // lui $at, 0x1001
        assert_encodes(SimInstr::Lui(Reg(1), UImm16::new(0x1001).unwrap()), 0x3C01_1001);
        // lw $a0, 4($sp)
        assert_encodes(SimInstr::Load(MemWidth::Word, A0, SP, SImm16::new(4).unwrap()), 0x8FA4_0004);
        // sw $ra, 0($sp)
        assert_encodes(SimInstr::Store(MemWidth::Word, RA, SP, SImm16::new(0).unwrap()), 0xAFBF_0000);
        // beq $t0, $zero, -1
        assert_encodes(SimInstr::Branch(BranchCond::Beq, T0, ZERO, SImm16::new(-1).unwrap()), 0x1100_FFFF);
        // bgez $t0, 3
        assert_encodes(SimInstr::Branch(BranchCond::Bgez, T0, ZERO, SImm16::new(3).unwrap()), 0x0501_0003);
        // jal 0x00400000
        assert_encodes(SimInstr::Jal(0x0010_0000), 0x0C10_0000);
        assert_encodes(SimInstr::Syscall, 0x0000_000C);
    }

    #[test]
    fn test_decode_invalid() {
        // undefined opcode
        assert_eq!(SimInstr::decode(0xFC00_0000), None);
        // undefined SPECIAL function
        assert_eq!(SimInstr::decode(0x0000_0001), None);
        // undefined REGIMM rt
        assert_eq!(SimInstr::decode(0x0402_0000), None);
        // SPECIAL2 other than mul
        assert_eq!(SimInstr::decode(0x7000_0000), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(SimInstr::AluImm(ImmOp::Addi, SP, SP, UImm16::new(0xFFFC).unwrap()).to_string(), "addi $sp, $sp, -4");
        assert_eq!(SimInstr::Load(MemWidth::Word, A0, SP, SImm16::new(4).unwrap()).to_string(), "lw $a0, 4($sp)");
        assert_eq!(SimInstr::Alu(AluOp::Sllv, T0, T1, T2).to_string(), "sllv $t0, $t2, $t1");
        assert_eq!(SimInstr::Jal(0x0010_0000).to_string(), "jal 0x00400000");
    }

    #[test]
    fn test_extended_imm() {
        let imm = UImm16::new(0xFFFF).unwrap();
        assert_eq!(SimInstr::extended_imm(ImmOp::Addi, imm), 0xFFFF_FFFF);
        assert_eq!(SimInstr::extended_imm(ImmOp::Ori, imm), 0x0000_FFFF);
    }
}

//! Parsing assembly source code into an AST.
//!
//! This module is used to convert strings (which represent assembly source code)
//! into abstract syntax trees ([`Stmt`]s).
//!
//! The parser is line-oriented: each line holds zero or more labels
//! followed by at most one instruction or directive.
//! A line that fails to parse is reported and skipped,
//! so that every erroneous line in a file is reported at once.
//!
//! # Example
//!
//! ```
//! use mips_ensemble::parse::parse_ast;
//!
//! let src = "
//! main:
//!     li $v0, 10
//!     syscall
//! ";
//! let (stmts, errs) = parse_ast(src);
//! assert!(errs.is_empty());
//! assert_eq!(stmts.len(), 2);
//! assert_eq!(stmts[0].labels[0].name, "main");
//! ```
//!
//! [`Stmt`]: crate::ast::asm::Stmt

pub mod lex;

use std::borrow::Cow;
use std::ops::Range;

use logos::Logos;

use crate::ast::asm::{AsmInstr, BranchTarget, CmpCond, Directive, MemOperand, Stmt, StmtKind};
use crate::ast::reg_consts::{RA, ZERO};
use crate::ast::sim::{AluOp, BranchCond, HiLo, ImmOp, MemWidth, MulDivOp, ShiftOp};
use crate::ast::{AddrRef, ImmNewErr, Label, Reg, SImm16, Shamt, UImm16};
use crate::err::ErrSpan;

use self::lex::{LexErr, Token};

/// Kinds of errors that can occur while parsing.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ParseErrKind {
    /// A token could not be lexed.
    Lex(LexErr),
    /// A different token was expected.
    Expected {
        /// What the parser expected (e.g., "register").
        expected: Cow<'static, str>,
        /// What the parser found instead, or `None` if the line ended.
        found: Option<String>
    },
    /// The mnemonic is not a known instruction.
    UnknownInstruction(String),
    /// The directive is not known.
    UnknownDirective(String),
    /// An immediate value does not fit its operand.
    Imm(ImmNewErr),
    /// A directive operand is out of its allowed range.
    OutOfRange {
        /// The smallest allowed value.
        min: i64,
        /// The largest allowed value.
        max: i64
    },
}
impl std::fmt::Display for ParseErrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseErrKind::Lex(e) => e.fmt(f),
            ParseErrKind::Expected { expected, found: Some(found) } => write!(f, "expected {expected}, found {found}"),
            ParseErrKind::Expected { expected, found: None } => write!(f, "expected {expected}, found end of line"),
            ParseErrKind::UnknownInstruction(m) => write!(f, "unknown instruction '{m}'"),
            ParseErrKind::UnknownDirective(d) => write!(f, "unknown directive '.{d}'"),
            ParseErrKind::Imm(e) => e.fmt(f),
            ParseErrKind::OutOfRange { min, max } => write!(f, "value must be between {min} and {max}"),
        }
    }
}

/// Any error that occurs during parsing tokens.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ParseErr {
    /// The brief cause of this error.
    pub kind: ParseErrKind,
    /// The location of this error in source.
    pub span: Range<usize>
}
impl ParseErr {
    fn new(kind: ParseErrKind, span: Range<usize>) -> Self {
        Self { kind, span }
    }
}
impl std::fmt::Display for ParseErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind.fmt(f)
    }
}
impl std::error::Error for ParseErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ParseErrKind::Lex(e) => Some(e),
            ParseErrKind::Imm(e) => Some(e),
            _ => None
        }
    }
}
impl crate::err::Error for ParseErr {
    fn span(&self) -> Option<ErrSpan> {
        Some(ErrSpan::from(self.span.clone()))
    }

    fn help(&self) -> Option<Cow<str>> {
        use crate::err::Error as _;

        match &self.kind {
            ParseErrKind::Lex(e) => e.help(),
            ParseErrKind::Imm(e) => e.help(),
            ParseErrKind::UnknownInstruction(_) => Some("instructions are written in lowercase, such as 'add' or 'lw'".into()),
            ParseErrKind::UnknownDirective(_) => Some("supported directives are .text, .data, .globl, .word, .half, .byte, .ascii, .asciiz, .space, .align".into()),
            _ => None
        }
    }
}

/// Parses a source string into a list of statements.
///
/// Each line that has an error is skipped,
/// so all errors in the source are reported together.
/// The errors are returned in source order.
pub fn parse_ast(src: &str) -> (Vec<Stmt>, Vec<ParseErr>) {
    let mut stmts = vec![];
    let mut errs = vec![];
    let mut pending_labels: Vec<Label> = vec![];

    let mut lexer = Token::lexer(src).spanned().peekable();
    while lexer.peek().is_some() {
        // Collect one line of tokens.
        let mut line = vec![];
        let mut lex_err = None;
        for (tok, span) in lexer.by_ref() {
            match tok {
                Ok(Token::NewLine) => break,
                Ok(Token::Comment) => {},
                Ok(t) => line.push((t, span)),
                Err(e) => {
                    // Only the first lexer error of a line is reported.
                    if lex_err.is_none() {
                        errs.push(ParseErr::new(ParseErrKind::Lex(e), span));
                        lex_err = Some(line.len());
                    }
                }
            }
        }

        // Labels before an error are still defined, so references to them aren't reported too.
        let mut parser = LineParser::new(&line[..lex_err.unwrap_or(line.len())], src.len());
        pending_labels.extend(parser.parse_labels());
        if lex_err.is_some() { continue; }

        match parser.parse_nucleus() {
            Ok(Some((nucleus, span))) => {
                stmts.push(Stmt {
                    labels: std::mem::take(&mut pending_labels),
                    nucleus: Some(nucleus),
                    span
                });
            },
            Ok(None) => {},
            Err(e) => errs.push(e),
        }
    }

    if let Some(last) = pending_labels.last() {
        let span = last.span();
        stmts.push(Stmt { labels: pending_labels, nucleus: None, span });
    }

    (stmts, errs)
}

type Spanned = (Token, Range<usize>);

/// A cursor over the tokens of one line.
struct LineParser<'t> {
    tokens: &'t [Spanned],
    index: usize,
    /// Fallback location for errors at the end of input.
    src_end: usize,
}
impl<'t> LineParser<'t> {
    fn new(tokens: &'t [Spanned], src_end: usize) -> Self {
        Self { tokens, index: 0, src_end }
    }

    fn peek(&self) -> Option<&'t Spanned> {
        self.tokens.get(self.index)
    }
    fn advance(&mut self) -> Option<&'t Spanned> {
        let tok = self.tokens.get(self.index);
        self.index += usize::from(tok.is_some());
        tok
    }

    /// The span to blame when a token is missing.
    fn eol_span(&self) -> Range<usize> {
        match self.tokens.last() {
            Some((_, span)) => span.end..span.end,
            None => self.src_end..self.src_end,
        }
    }
    /// The span from the token at `start` to the last consumed token.
    fn span_from(&self, start: usize) -> Range<usize> {
        let first = self.tokens.get(start).map_or(self.src_end, |(_, s)| s.start);
        let last = self.index.checked_sub(1)
            .and_then(|i| self.tokens.get(i))
            .map_or(first, |(_, s)| s.end);
        first..last.max(first)
    }

    fn expected(&self, expected: impl Into<Cow<'static, str>>) -> ParseErr {
        let expected = expected.into();
        match self.peek() {
            Some((tok, span)) => ParseErr::new(ParseErrKind::Expected { expected, found: Some(tok.to_string()) }, span.clone()),
            None => ParseErr::new(ParseErrKind::Expected { expected, found: None }, self.eol_span()),
        }
    }

    /// Parses the labels at the start of the line.
    fn parse_labels(&mut self) -> Vec<Label> {
        let mut labels = vec![];
        while let [(Token::Ident(name), span), (Token::Colon, _), ..] = &self.tokens[self.index..] {
            labels.push(Label::new(name.clone(), span.clone()));
            self.index += 2;
        }
        labels
    }

    /// Parses the directive or instruction after the labels (if there is one).
    fn parse_nucleus(mut self) -> Result<Option<(StmtKind, Range<usize>)>, ParseErr> {
        let start = self.index;
        let nucleus = match self.advance() {
            None => None,
            Some((Token::Directive(d), span)) => Some(StmtKind::Directive(self.parse_directive(d, span.clone())?)),
            Some((Token::Ident(m), span)) => Some(StmtKind::Instr(self.parse_instr(m, span.clone())?)),
            Some(_) => {
                self.index -= 1;
                return Err(self.expected("instruction, directive, or label"));
            }
        };

        if self.peek().is_some() {
            return Err(self.expected("end of line"));
        }
        Ok(nucleus.map(|n| (n, self.span_from(start))))
    }

    fn reg(&mut self) -> Result<Reg, ParseErr> {
        match self.peek() {
            Some((Token::Reg(r), _)) => {
                self.index += 1;
                Ok(*r)
            },
            _ => Err(self.expected("register")),
        }
    }
    fn comma(&mut self) -> Result<(), ParseErr> {
        match self.peek() {
            Some((Token::Comma, _)) => {
                self.index += 1;
                Ok(())
            },
            _ => Err(self.expected("','")),
        }
    }
    fn reg_comma(&mut self) -> Result<Reg, ParseErr> {
        let r = self.reg()?;
        self.comma()?;
        Ok(r)
    }

    /// Parses an integer, returning it with its span.
    fn int(&mut self) -> Result<(i64, Range<usize>), ParseErr> {
        match self.peek() {
            Some((Token::Unsigned(n), span)) => {
                self.index += 1;
                Ok((i64::from(*n), span.clone()))
            },
            Some((Token::Signed(n), span)) => {
                self.index += 1;
                Ok((i64::from(*n), span.clone()))
            },
            _ => Err(self.expected("integer")),
        }
    }
    fn int_in(&mut self, min: i64, max: i64) -> Result<i64, ParseErr> {
        let (n, span) = self.int()?;
        match (min..=max).contains(&n) {
            true  => Ok(n),
            false => Err(ParseErr::new(ParseErrKind::OutOfRange { min, max }, span)),
        }
    }
    fn imm<IMM: crate::ast::ImmBacking, const N: u32>(&mut self) -> Result<crate::ast::Imm<IMM, N>, ParseErr> {
        let (n, span) = self.int()?;
        crate::ast::Imm::from_i64(n)
            .map_err(|e| ParseErr::new(ParseErrKind::Imm(e), span))
    }
    /// Parses an immediate for an `AluImm` instruction,
    /// signed or unsigned depending on the operation.
    fn alu_imm(&mut self, op: ImmOp) -> Result<UImm16, ParseErr> {
        match op.zero_extends() {
            true  => self.imm(),
            false => self.imm::<i32, 16>().map(|i| UImm16::new_trunc(i.get() as u32)),
        }
    }

    fn label(&mut self) -> Option<Label> {
        match self.peek() {
            Some((Token::Ident(name), span)) => {
                self.index += 1;
                Some(Label::new(name.clone(), span.clone()))
            },
            _ => None
        }
    }
    /// Parses a label (with optional `+off` or `-off`) or an absolute address.
    fn addr_ref(&mut self) -> Result<AddrRef, ParseErr> {
        if let Some(label) = self.label() {
            let offset = match self.peek() {
                Some((Token::Plus, _)) => {
                    self.index += 1;
                    self.int_in(i64::from(i32::MIN), i64::from(i32::MAX))? as i32
                },
                Some((Token::Signed(n), _)) => {
                    self.index += 1;
                    *n
                },
                _ => 0
            };
            return Ok(AddrRef::Label(label, offset));
        }

        match self.peek() {
            Some((Token::Unsigned(_) | Token::Signed(_), _)) => {
                let (n, _) = self.int()?;
                Ok(AddrRef::Value(n as u32))
            },
            _ => Err(self.expected("label or address")),
        }
    }
    fn branch_target(&mut self) -> Result<BranchTarget, ParseErr> {
        match self.label() {
            Some(label) => Ok(BranchTarget::Label(label)),
            None => match self.peek() {
                Some((Token::Unsigned(_) | Token::Signed(_), _)) => self.imm().map(BranchTarget::Offset),
                _ => Err(self.expected("label or offset")),
            }
        }
    }
    fn mem_operand(&mut self) -> Result<MemOperand, ParseErr> {
        match self.peek() {
            Some((Token::LParen, _)) => {
                let base = self.paren_reg()?;
                Ok(MemOperand::Base(SImm16::new_trunc(0), base))
            },
            Some((Token::Unsigned(_) | Token::Signed(_), _)) => {
                // Either off($reg) or an absolute address.
                let save = self.index;
                let (n, span) = self.int()?;
                match self.peek() {
                    Some((Token::LParen, _)) => {
                        let off = SImm16::from_i64(n).map_err(|e| ParseErr::new(ParseErrKind::Imm(e), span))?;
                        let base = self.paren_reg()?;
                        Ok(MemOperand::Base(off, base))
                    },
                    _ => {
                        self.index = save;
                        self.addr_ref().map(MemOperand::Direct)
                    }
                }
            },
            Some((Token::Ident(_), _)) => self.addr_ref().map(MemOperand::Direct),
            _ => Err(self.expected("memory operand")),
        }
    }
    fn paren_reg(&mut self) -> Result<Reg, ParseErr> {
        match self.peek() {
            Some((Token::LParen, _)) => self.index += 1,
            _ => return Err(self.expected("'('")),
        }
        let r = self.reg()?;
        match self.peek() {
            Some((Token::RParen, _)) => self.index += 1,
            _ => return Err(self.expected("')'")),
        }
        Ok(r)
    }
    /// A comma-separated list of at least one item.
    fn list<T>(&mut self, mut item: impl FnMut(&mut Self) -> Result<T, ParseErr>) -> Result<Vec<T>, ParseErr> {
        let mut items = vec![item(self)?];
        while let Some((Token::Comma, _)) = self.peek() {
            self.index += 1;
            items.push(item(self)?);
        }
        Ok(items)
    }
    fn string(&mut self) -> Result<String, ParseErr> {
        match self.peek() {
            Some((Token::String(s), _)) => {
                self.index += 1;
                Ok(s.clone())
            },
            _ => Err(self.expected("string literal")),
        }
    }

    fn parse_directive(&mut self, name: &str, span: Range<usize>) -> Result<Directive, ParseErr> {
        let directive = match name {
            "text"   => Directive::Text,
            "data"   => Directive::Data,
            "globl" | "global" => match self.label() {
                Some(label) => Directive::Globl(label),
                None => return Err(self.expected("label")),
            },
            "word"   => Directive::Word(self.list(Self::addr_ref)?),
            "half"   => Directive::Half(self.list(|p| p.int_in(i64::from(i16::MIN), i64::from(u16::MAX)).map(|n| n as u16))?),
            "byte"   => Directive::Byte(self.list(|p| p.int_in(i64::from(i8::MIN), i64::from(u8::MAX)).map(|n| n as u8))?),
            "ascii"  => Directive::Ascii(self.string()?),
            "asciiz" => Directive::Asciiz(self.string()?),
            "space"  => Directive::Space(self.int_in(0, i64::from(u32::MAX))? as u32),
            "align"  => Directive::Align(self.int_in(0, 16)? as u32),
            _ => return Err(ParseErr::new(ParseErrKind::UnknownDirective(name.to_string()), span)),
        };
        Ok(directive)
    }

    fn parse_instr(&mut self, mnemonic: &str, span: Range<usize>) -> Result<AsmInstr, ParseErr> {
        let m = mnemonic.to_ascii_lowercase();

        let alu = |op: &str| match op {
            "add" => Some(AluOp::Add), "addu" => Some(AluOp::Addu), "sub" => Some(AluOp::Sub), "subu" => Some(AluOp::Subu),
            "and" => Some(AluOp::And), "or" => Some(AluOp::Or), "xor" => Some(AluOp::Xor), "nor" => Some(AluOp::Nor),
            "slt" => Some(AluOp::Slt), "sltu" => Some(AluOp::Sltu), "mul" => Some(AluOp::Mul),
            _ => None
        };
        let var_shift = |op: &str| match op {
            "sllv" => Some(AluOp::Sllv), "srlv" => Some(AluOp::Srlv), "srav" => Some(AluOp::Srav),
            _ => None
        };
        let shift = |op: &str| match op {
            "sll" => Some(ShiftOp::Sll), "srl" => Some(ShiftOp::Srl), "sra" => Some(ShiftOp::Sra),
            _ => None
        };
        let muldiv = |op: &str| match op {
            "mult" => Some(MulDivOp::Mult), "multu" => Some(MulDivOp::Multu), "div" => Some(MulDivOp::Div), "divu" => Some(MulDivOp::Divu),
            _ => None
        };
        let imm_op = |op: &str| match op {
            "addi" => Some(ImmOp::Addi), "addiu" => Some(ImmOp::Addiu), "slti" => Some(ImmOp::Slti), "sltiu" => Some(ImmOp::Sltiu),
            "andi" => Some(ImmOp::Andi), "ori" => Some(ImmOp::Ori), "xori" => Some(ImmOp::Xori),
            _ => None
        };
        let branch2 = |op: &str| match op {
            "beq" => Some(BranchCond::Beq), "bne" => Some(BranchCond::Bne),
            _ => None
        };
        let branch1 = |op: &str| match op {
            "blez" => Some(BranchCond::Blez), "bgtz" => Some(BranchCond::Bgtz), "bltz" => Some(BranchCond::Bltz), "bgez" => Some(BranchCond::Bgez),
            _ => None
        };
        let load = |op: &str| match op {
            "lb" => Some(MemWidth::Byte), "lbu" => Some(MemWidth::ByteU), "lh" => Some(MemWidth::Half), "lhu" => Some(MemWidth::HalfU), "lw" => Some(MemWidth::Word),
            _ => None
        };
        let store = |op: &str| match op {
            "sb" => Some(MemWidth::Byte), "sh" => Some(MemWidth::Half), "sw" => Some(MemWidth::Word),
            _ => None
        };
        let cmp = |op: &str| match op {
            "blt" => Some(CmpCond::Lt), "bgt" => Some(CmpCond::Gt), "ble" => Some(CmpCond::Le), "bge" => Some(CmpCond::Ge),
            _ => None
        };

        let m = m.as_str();
        let instr = if let Some(op) = alu(m) {
            let rd = self.reg_comma()?;
            let rs = self.reg_comma()?;
            AsmInstr::Alu(op, rd, rs, self.reg()?)
        } else if let Some(op) = var_shift(m) {
            let rd = self.reg_comma()?;
            let rt = self.reg_comma()?;
            let rs = self.reg()?;
            AsmInstr::Alu(op, rd, rs, rt)
        } else if let Some(op) = shift(m) {
            let rd = self.reg_comma()?;
            let rt = self.reg_comma()?;
            let sa: Shamt = self.imm()?;
            AsmInstr::Shift(op, rd, rt, sa)
        } else if let Some(op) = muldiv(m) {
            let rs = self.reg_comma()?;
            AsmInstr::MulDiv(op, rs, self.reg()?)
        } else if let Some(op) = imm_op(m) {
            let rt = self.reg_comma()?;
            let rs = self.reg_comma()?;
            AsmInstr::AluImm(op, rt, rs, self.alu_imm(op)?)
        } else if let Some(cond) = branch2(m) {
            let rs = self.reg_comma()?;
            let rt = self.reg_comma()?;
            AsmInstr::Branch(cond, rs, rt, self.branch_target()?)
        } else if let Some(cond) = branch1(m) {
            let rs = self.reg_comma()?;
            AsmInstr::Branch(cond, rs, ZERO, self.branch_target()?)
        } else if let Some(w) = load(m) {
            let rt = self.reg_comma()?;
            AsmInstr::Load(w, rt, self.mem_operand()?)
        } else if let Some(w) = store(m) {
            let rt = self.reg_comma()?;
            AsmInstr::Store(w, rt, self.mem_operand()?)
        } else if let Some(cond) = cmp(m) {
            let rs = self.reg_comma()?;
            let rt = self.reg_comma()?;
            AsmInstr::BranchCmp(cond, rs, rt, self.branch_target()?)
        } else {
            match m {
                "jr" => AsmInstr::Jr(self.reg()?),
                "jalr" => {
                    let first = self.reg()?;
                    match self.peek() {
                        Some((Token::Comma, _)) => {
                            self.index += 1;
                            AsmInstr::Jalr(first, self.reg()?)
                        },
                        _ => AsmInstr::Jalr(RA, first),
                    }
                },
                "mfhi" => AsmInstr::MoveFrom(HiLo::Hi, self.reg()?),
                "mflo" => AsmInstr::MoveFrom(HiLo::Lo, self.reg()?),
                "mthi" => AsmInstr::MoveTo(HiLo::Hi, self.reg()?),
                "mtlo" => AsmInstr::MoveTo(HiLo::Lo, self.reg()?),
                "syscall" => AsmInstr::Syscall,
                "break" => AsmInstr::Break,
                "nop" => AsmInstr::Nop,
                "lui" => {
                    let rt = self.reg_comma()?;
                    AsmInstr::Lui(rt, self.imm()?)
                },
                "j" => AsmInstr::J(self.addr_ref()?),
                "jal" => AsmInstr::Jal(self.addr_ref()?),
                "li" => {
                    let rt = self.reg_comma()?;
                    AsmInstr::Li(rt, self.int_in(i64::from(i32::MIN), i64::from(u32::MAX))? as u32)
                },
                "la" => {
                    let rt = self.reg_comma()?;
                    AsmInstr::La(rt, self.addr_ref()?)
                },
                "move" => {
                    let rd = self.reg_comma()?;
                    AsmInstr::Move(rd, self.reg()?)
                },
                "b" => AsmInstr::B(self.branch_target()?),
                "beqz" => {
                    let rs = self.reg_comma()?;
                    AsmInstr::Beqz(rs, self.branch_target()?)
                },
                "bnez" => {
                    let rs = self.reg_comma()?;
                    AsmInstr::Bnez(rs, self.branch_target()?)
                },
                "neg" => {
                    let rd = self.reg_comma()?;
                    AsmInstr::Neg(rd, self.reg()?)
                },
                "not" => {
                    let rd = self.reg_comma()?;
                    AsmInstr::Not(rd, self.reg()?)
                },
                _ => return Err(ParseErr::new(ParseErrKind::UnknownInstruction(mnemonic.to_string()), span)),
            }
        };

        Ok(instr)
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::asm::{AsmInstr, BranchTarget, CmpCond, Directive, MemOperand, StmtKind};
    use crate::ast::reg_consts::{A0, AT, RA, SP, T0, T1, T2, V0, ZERO};
    use crate::ast::sim::{AluOp, BranchCond, ImmOp, MemWidth, ShiftOp};
    use crate::ast::{AddrRef, ImmNewErr, Label, SImm16, Shamt, UImm16};
    use crate::err::LexErr;

    use super::{parse_ast, ParseErrKind};

    fn parse_one(src: &str) -> AsmInstr {
        let (stmts, errs) = parse_ast(src);
        assert_eq!(errs, vec![], "{src:?} should parse without errors");
        assert_eq!(stmts.len(), 1);
        match stmts.into_iter().next().and_then(|s| s.nucleus) {
            Some(StmtKind::Instr(i)) => i,
            n => panic!("expected instruction, got {n:?}"),
        }
    }
    fn parse_err(src: &str) -> ParseErrKind {
        let (_, errs) = parse_ast(src);
        assert_eq!(errs.len(), 1, "{src:?} should have one error, got {errs:?}");
        errs[0].kind.clone()
    }
    fn label(name: &str, start: usize) -> Label {
        Label::new(name.to_string(), start..start + name.len())
    }

    #[test]
    fn test_instrs() {
        assert_eq!(parse_one("add $t2, $t0, $t1"), AsmInstr::Alu(AluOp::Add, T2, T0, T1));
        assert_eq!(parse_one("sllv $t2, $t0, $t1"), AsmInstr::Alu(AluOp::Sllv, T2, T1, T0));
        assert_eq!(parse_one("sll $t0, $t1, 4"), AsmInstr::Shift(ShiftOp::Sll, T0, T1, Shamt::new(4).unwrap()));
        assert_eq!(parse_one("addi $sp, $sp, -4"), AsmInstr::AluImm(ImmOp::Addi, SP, SP, UImm16::new(0xFFFC).unwrap()));
        assert_eq!(parse_one("ori $t0, $zero, 0xFFFF"), AsmInstr::AluImm(ImmOp::Ori, T0, ZERO, UImm16::new(0xFFFF).unwrap()));
        assert_eq!(parse_one("lw $a0, 4($sp)"), AsmInstr::Load(MemWidth::Word, A0, MemOperand::Base(SImm16::new(4).unwrap(), SP)));
        assert_eq!(parse_one("sb $a0, ($t0)"), AsmInstr::Store(MemWidth::Byte, A0, MemOperand::Base(SImm16::new(0).unwrap(), T0)));
        assert_eq!(parse_one("JR $ra"), AsmInstr::Jr(RA));
        assert_eq!(parse_one("jalr $t0"), AsmInstr::Jalr(RA, T0));
        assert_eq!(parse_one("syscall"), AsmInstr::Syscall);
        assert_eq!(parse_one("li $v0, -1"), AsmInstr::Li(V0, u32::MAX));
        assert_eq!(parse_one("li $v0, 0xFFFFFFFF"), AsmInstr::Li(V0, u32::MAX));
    }

    #[test]
    fn test_label_operands() {
        assert_eq!(parse_one("beq $t0, $t1, loop"), AsmInstr::Branch(BranchCond::Beq, T0, T1, BranchTarget::Label(label("loop", 14))));
        assert_eq!(parse_one("bgez $t0, -2"), AsmInstr::Branch(BranchCond::Bgez, T0, ZERO, BranchTarget::Offset(SImm16::new(-2).unwrap())));
        assert_eq!(parse_one("blt $t0, $t1, end"), AsmInstr::BranchCmp(CmpCond::Lt, T0, T1, BranchTarget::Label(label("end", 14))));
        assert_eq!(parse_one("la $a0, msg"), AsmInstr::La(A0, AddrRef::Label(label("msg", 8), 0)));
        assert_eq!(parse_one("lw $t0, arr+8"), AsmInstr::Load(MemWidth::Word, T0, MemOperand::Direct(AddrRef::Label(label("arr", 8), 8))));
        assert_eq!(parse_one("lw $t0, arr-4"), AsmInstr::Load(MemWidth::Word, T0, MemOperand::Direct(AddrRef::Label(label("arr", 8), -4))));
        assert_eq!(parse_one("sw $at, 0x10010000"), AsmInstr::Store(MemWidth::Word, AT, MemOperand::Direct(AddrRef::Value(0x1001_0000))));
        assert_eq!(parse_one("jal func"), AsmInstr::Jal(AddrRef::Label(label("func", 4), 0)));
    }

    #[test]
    fn test_directives() {
        let (stmts, errs) = parse_ast(".data\nnums: .word 1, -1, nums\nmsg: .asciiz \"hi\\n\"\n.align 2\n.byte 'a', 255, -128\n.half -1\n.space 8");
        assert_eq!(errs, vec![]);
        let directives: Vec<_> = stmts.into_iter()
            .filter_map(|s| match s.nucleus {
                Some(StmtKind::Directive(d)) => Some(d),
                _ => None
            })
            .collect();
        assert_eq!(directives, vec![
            Directive::Data,
            Directive::Word(vec![AddrRef::Value(1), AddrRef::Value(u32::MAX), AddrRef::Label(label("nums", 25), 0)]),
            Directive::Asciiz("hi\n".to_string()),
            Directive::Align(2),
            Directive::Byte(vec![b'a', 255, 128]),
            Directive::Half(vec![0xFFFF]),
            Directive::Space(8),
        ]);
    }

    #[test]
    fn test_labels_attach_to_next_stmt() {
        let (stmts, errs) = parse_ast("main:\nloop: # comment\n  nop\nend:");
        assert_eq!(errs, vec![]);
        assert_eq!(stmts.len(), 2);
        assert_eq!(stmts[0].labels, vec![label("main", 0), label("loop", 6)]);
        assert_eq!(stmts[0].nucleus, Some(StmtKind::Instr(AsmInstr::Nop)));
        assert_eq!(stmts[0].span, 24..27);
        assert_eq!(stmts[1].labels, vec![label("end", 28)]);
        assert_eq!(stmts[1].nucleus, None);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(parse_err("frob $t0"), ParseErrKind::UnknownInstruction(m) if m == "frob"));
        assert!(matches!(parse_err(".frob"), ParseErrKind::UnknownDirective(d) if d == "frob"));
        assert!(matches!(parse_err("add $t0, $t1"), ParseErrKind::Expected { found: None, .. }));
        assert!(matches!(parse_err("add $t0, $t1, 5"), ParseErrKind::Expected { found: Some(_), .. }));
        assert!(matches!(parse_err("nop nop"), ParseErrKind::Expected { .. }));
        assert_eq!(parse_err("addi $t0, $t0, 32768"), ParseErrKind::Imm(ImmNewErr::CannotFitSigned(16)));
        assert_eq!(parse_err("ori $t0, $t0, -1"), ParseErrKind::Imm(ImmNewErr::CannotFitUnsigned(16)));
        assert_eq!(parse_err("sll $t0, $t0, 32"), ParseErrKind::Imm(ImmNewErr::CannotFitUnsigned(5)));
        assert_eq!(parse_err(".byte 256"), ParseErrKind::OutOfRange { min: -128, max: 255 });
        assert_eq!(parse_err("add $t0, $t0, $t99"), ParseErrKind::Lex(LexErr::InvalidReg));
    }

    #[test]
    fn test_error_recovery() {
        let src = "add $t0\nnop\nfrob\n  li $t0, 1 @\nsyscall";
        let (stmts, errs) = parse_ast(src);
        assert_eq!(errs.len(), 3);
        assert_eq!(errs[0].span, 7..7);
        assert_eq!(errs[1].span, 12..16);
        assert_eq!(errs[2].span, 29..30);
        // Valid lines are still parsed.
        assert_eq!(stmts.len(), 2);
    }

    #[test]
    fn test_labels_survive_bad_line() {
        let (stmts, errs) = parse_ast("main:\nloop: add $t0\n  j loop\nend: @ nop\n");
        assert_eq!(errs.len(), 2);
        // `main` and `loop` attach to the next good statement, `end` trails.
        assert_eq!(stmts.len(), 2);
        let names: Vec<_> = stmts[0].labels.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["main", "loop"]);
        assert_eq!(stmts[1].labels[0].name, "end");
        assert!(stmts[1].nucleus.is_none());
    }
}

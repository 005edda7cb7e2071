//! Assembling assembly source code into programs.
//!
//! This module is used to convert source code (and its AST, `Vec<`[`Stmt`]`>`) into
//! [`Program`]s that can be loaded and executed by the simulator.
//!
//! The assembler module notably consists of:
//! - [`assemble`]: The main function which parses and assembles source code.
//! - [`SymbolTable`]: a struct holding the symbol table, which stores the address of each label after the first assembler pass
//! - [`Program`]: a struct holding the assembled program, which can be loaded into the simulator and executed
//! - [`Assembly`]: the result of assembling, a program together with every [`Problem`] found in the source
//!
//! Assembly never stops at the first error.
//! Each pass reports the errors it finds and continues with the next statement,
//! so every problem in a source file is reported in one go.
//!
//! [`Stmt`]: crate::ast::asm::Stmt

use std::collections::BTreeMap;
use std::ops::Range;

use crate::ast::asm::{AsmInstr, BranchTarget, CmpCond, Directive, MemOperand, Stmt, StmtKind};
use crate::ast::reg_consts::{AT, ZERO};
use crate::ast::sim::{AluOp, BranchCond, ImmOp, ShiftOp, SimInstr};
use crate::ast::{AddrRef, ImmNewErr, Label, SImm16, Shamt, UImm16};
use crate::err::{ErrSpan, Problem, ProblemLocation};
use crate::parse::parse_ast;
use crate::sim::mem::{Addr, DATA_START, TEXT_START};

/// The largest number of bytes the text or data segment can hold.
pub const SEGMENT_LIMIT: u32 = 0x0100_0000;

/// The label which marks the entry point of a program.
pub const ENTRY_LABEL: &str = "main";

/// Parses and assembles assembly source code.
///
/// Every problem found (during parsing and both assembler passes)
/// is collected into [`Assembly::problems`], in source order.
/// If there are any problems, the program should not be executed.
///
/// # Example
/// ```
/// use mips_ensemble::asm::assemble;
///
/// let src = "
///     .text
/// main:
///     li $v0, 10
///     syscall
/// ";
/// let asm = assemble(src);
/// assert!(asm.problems.is_empty());
///
/// let program = asm.into_result().unwrap();
/// assert_eq!(program.lookup_label("main"), Some(program.entry()));
/// ```
pub fn assemble(src: &str) -> Assembly {
    let src_info = SourceInfo::new(src);
    let (stmts, parse_errs) = parse_ast(src);

    let mut asm_errs = vec![];
    let sym = SymbolTable::new(&stmts, &mut asm_errs);
    let program = Program::new(stmts, sym, src_info, &mut asm_errs);

    let mut problems: Vec<_> = parse_errs.iter()
        .map(|e| Problem::from_error(e, &program.src_info))
        .chain(asm_errs.iter().map(|e| Problem::from_error(e, &program.src_info)))
        .collect();
    if program.text.is_empty() && problems.is_empty() {
        let problem = Problem::new("program has no instructions", ProblemLocation::None)
            .with_help("add instructions to the .text segment");
        problems.push(problem);
    }
    problems.sort_by_key(Problem::source_order);

    tracing::debug!(
        text_words = program.text.len(),
        data_bytes = program.data.len(),
        problems = problems.len(),
        "assembled program"
    );
    Assembly { program, problems }
}

/// The result of [`assemble`].
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Assembly {
    /// The assembled program.
    ///
    /// If there are any problems, this program is incomplete
    /// and should not be executed.
    pub program: Program,
    /// Every problem found in the source, in source order.
    pub problems: Vec<Problem>
}
impl Assembly {
    /// Whether the source assembled without any problems.
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }

    /// Gets the program if there were no problems,
    /// or the problems otherwise.
    pub fn into_result(self) -> Result<Program, Vec<Problem>> {
        match self.problems.is_empty() {
            true  => Ok(self.program),
            false => Err(self.problems),
        }
    }
}

/// Kinds of errors that can occur from assembling given assembly code.
///
/// See [`AsmErr`] for this error type with span information included.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum AsmErrKind {
    /// There were multiple labels of the same name (pass 1).
    OverlappingLabels,
    /// A data directive appeared in the text segment (pass 1).
    MisplacedDirective,
    /// An instruction appeared in the data segment (pass 1).
    MisplacedInstr,
    /// A segment grew larger than [`SEGMENT_LIMIT`] (pass 1).
    SegmentTooLarge,
    /// The entry label was defined outside of the text segment (pass 2).
    EntryNotInText,
    /// Label did not have an assigned address (pass 2).
    CouldNotFindLabel,
    /// Creating the offset to replace a label caused overflow (pass 2).
    OffsetNewErr(ImmNewErr),
    /// A branch or jump target is not word aligned (pass 2).
    MisalignedTarget,
    /// A jump target is not in the same 256 MiB region as the jump (pass 2).
    JumpOutOfRegion,
}
impl std::fmt::Display for AsmErrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OverlappingLabels  => f.write_str("label was defined multiple times"),
            Self::MisplacedDirective => f.write_str("data directive cannot be used in the .text segment"),
            Self::MisplacedInstr     => f.write_str("instruction cannot be used in the .data segment"),
            Self::SegmentTooLarge    => f.write_str("segment is too large"),
            Self::EntryNotInText     => write!(f, "'{ENTRY_LABEL}' must label an instruction"),
            Self::CouldNotFindLabel  => f.write_str("label was never defined"),
            Self::OffsetNewErr(e)    => write!(f, "branch target is too far away: {e}"),
            Self::MisalignedTarget   => f.write_str("branch or jump target is not word aligned"),
            Self::JumpOutOfRegion    => f.write_str("jump target is out of range"),
        }
    }
}

/// Error from assembling given assembly code.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct AsmErr {
    /// The value with a span.
    pub kind: AsmErrKind,
    /// The span in the source associated with this value.
    pub span: ErrSpan
}
impl AsmErr {
    /// Creates a new [`AsmErr`].
    pub fn new<E: Into<ErrSpan>>(kind: AsmErrKind, span: E) -> Self {
        AsmErr { kind, span: span.into() }
    }
}
impl std::fmt::Display for AsmErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind.fmt(f)
    }
}
impl std::error::Error for AsmErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            AsmErrKind::OffsetNewErr(e) => Some(e),
            _ => None
        }
    }
}
impl crate::err::Error for AsmErr {
    fn span(&self) -> Option<ErrSpan> {
        Some(self.span.clone())
    }

    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match &self.kind {
            AsmErrKind::OverlappingLabels  => Some("labels must be unique within a file, try renaming one of the labels".into()),
            AsmErrKind::MisplacedDirective => Some("try adding a .data directive before this line".into()),
            AsmErrKind::MisplacedInstr     => Some("try adding a .text directive before this line".into()),
            AsmErrKind::SegmentTooLarge    => Some(format!("a segment can hold at most {SEGMENT_LIMIT} bytes").into()),
            AsmErrKind::EntryNotInText     => Some("move this label into the .text segment".into()),
            AsmErrKind::CouldNotFindLabel  => Some("try adding this label before an instruction or directive".into()),
            AsmErrKind::OffsetNewErr(_)    => Some("use j to jump to far away labels".into()),
            AsmErrKind::MisalignedTarget   => Some("branches and jumps can only target instructions".into()),
            AsmErrKind::JumpOutOfRegion    => Some("use jr to jump to addresses in a different region".into()),
        }
    }
}

/// Struct holding the source string and contains helpers
/// to index lines and to query position information from a source string.
#[derive(PartialEq, Eq, Clone)]
pub struct SourceInfo {
    /// The source code.
    src: String,
    /// The index of each new line in source code (plus the end of the source).
    nl_indices: Vec<usize>
}
impl std::fmt::Debug for SourceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceInfo")
            .field("lines", &self.count_lines())
            .finish_non_exhaustive()
    }
}
impl SourceInfo {
    /// Computes the source info from a given string.
    pub fn new(src: &str) -> Self {
        let nl_indices = src
            .match_indices('\n')
            .map(|(i, _)| i)
            .chain([src.len()])
            .collect();

        Self { src: src.to_string(), nl_indices }
    }

    /// Returns the entire source.
    pub fn source(&self) -> &str {
        &self.src
    }

    /// Counts the number of lines in the source string.
    pub fn count_lines(&self) -> usize {
        self.nl_indices.len()
    }

    /// Gets the byte range of the provided line (0-indexed), including the newline character.
    fn raw_line_span(&self, line: usize) -> Option<Range<usize>> {
        let end = *self.nl_indices.get(line)?;
        let start = match line {
            0 => 0,
            _ => self.nl_indices[line - 1] + 1
        };
        Some(start..(end + 1).min(self.src.len()))
    }

    /// Gets the byte range of the provided line (0-indexed), excluding any surrounding whitespace.
    ///
    /// This returns None if line is not in the interval `[0, number of lines)`.
    pub fn line_span(&self, line: usize) -> Option<Range<usize>> {
        let span = self.raw_line_span(line)?;
        let text = &self.src[span.clone()];
        let start = span.start + (text.len() - text.trim_start().len());
        let end = span.end - (text.len() - text.trim_end().len());
        Some(start..end.max(start))
    }

    /// Reads a line (0-indexed) from source, excluding any surrounding whitespace.
    ///
    /// This returns None if line is not in the interval `[0, number of lines)`.
    pub fn read_line(&self, line: usize) -> Option<&str> {
        self.line_span(line).map(|r| &self.src[r])
    }

    /// Calculates the line and byte offset in that line (both 0-indexed) for a given byte index.
    ///
    /// If the index exceeds the length of the string,
    /// the position is computed relative to the last line.
    pub fn get_pos_pair(&self, index: usize) -> (usize, usize) {
        let lno = self.nl_indices.partition_point(|&nl| nl < index)
            .min(self.count_lines() - 1);
        let lstart = self.raw_line_span(lno).map_or(0, |r| r.start);
        (lno, index.saturating_sub(lstart))
    }

    /// Converts a byte index into a character index.
    pub fn char_index(&self, index: usize) -> usize {
        match self.src.get(..index) {
            Some(prefix) => prefix.chars().count(),
            None if index >= self.src.len() => self.src.chars().count() + (index - self.src.len()),
            // Not on a character boundary, so count the character it is in.
            None => self.src.char_indices().take_while(|&(i, _)| i < index).count() - 1,
        }
    }
}
impl From<&'_ str> for SourceInfo {
    fn from(value: &'_ str) -> Self {
        Self::new(value)
    }
}

/// The segment a statement is placed into.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Segment {
    Text,
    Data
}

/// The location counters of both segments, used while walking through the statements.
struct Cursor {
    segment: Segment,
    text: u32,
    data: u32,
}
impl Cursor {
    fn new() -> Self {
        Self { segment: Segment::Text, text: TEXT_START.get(), data: DATA_START.get() }
    }
    fn current(&self) -> u32 {
        match self.segment {
            Segment::Text => self.text,
            Segment::Data => self.data,
        }
    }
    fn current_mut(&mut self) -> &mut u32 {
        match self.segment {
            Segment::Text => &mut self.text,
            Segment::Data => &mut self.data,
        }
    }
    fn start(&self) -> u32 {
        match self.segment {
            Segment::Text => TEXT_START.get(),
            Segment::Data => DATA_START.get(),
        }
    }

    /// Applies segment switches and alignment of a statement,
    /// returning where the statement (and its labels) are placed.
    ///
    /// This returns `None` if the statement does not belong in the current segment.
    fn place(&mut self, nucleus: Option<&StmtKind>) -> Option<u32> {
        match nucleus {
            Some(StmtKind::Directive(Directive::Text)) => self.segment = Segment::Text,
            Some(StmtKind::Directive(Directive::Data)) => self.segment = Segment::Data,
            Some(StmtKind::Directive(d)) if d.is_data() => {
                if self.segment == Segment::Text { return None; }
                let align = d.alignment();
                self.data = self.data.checked_next_multiple_of(align)?;
            },
            Some(StmtKind::Instr(_)) if self.segment == Segment::Data => return None,
            _ => {}
        }
        Some(self.current())
    }

    /// Advances the current segment by `len` bytes.
    ///
    /// This returns `false` if the segment grows too large.
    fn shift(&mut self, len: u32) -> bool {
        let start = self.start();
        let cur = self.current_mut();
        match cur.checked_add(len) {
            Some(next) if next - start <= SEGMENT_LIMIT => {
                *cur = next;
                true
            },
            _ => false
        }
    }
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
struct SymbolData {
    addr: u32,
    src_start: usize,
}
impl SymbolData {
    /// Calculates the source range of this symbol, given the name of the label.
    fn span(&self, label: &str) -> Range<usize> {
        self.src_start .. (self.src_start + label.len())
    }
}

/// The symbol table created in the first assembler pass
/// that encodes source code mappings to memory addresses.
///
/// Labels are case-sensitive.
#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct SymbolTable {
    /// A mapping from label to address and span of the label.
    label_map: BTreeMap<String, SymbolData>,
    /// Labels marked with `.globl`.
    globals: Vec<Label>,
}

impl SymbolTable {
    /// Creates a new symbol table.
    ///
    /// This performs the first assembler pass, calculating the memory address of
    /// labels at each provided statement.
    /// Any errors found are appended to `errs`.
    ///
    /// ## Example
    /// ```
    /// use mips_ensemble::parse::parse_ast;
    /// use mips_ensemble::asm::SymbolTable;
    /// use mips_ensemble::sim::mem::Addr;
    ///
    /// let src = "
    ///     .data
    ///     nums: .word 1, 2
    ///     .text
    ///     main: nop
    ///     loop: j loop
    /// ";
    /// let (ast, _) = parse_ast(src);
    /// let mut errs = vec![];
    /// let sym = SymbolTable::new(&ast, &mut errs);
    /// assert!(errs.is_empty());
    /// assert_eq!(sym.lookup_label("nums"), Some(Addr::new(0x1001_0000)));
    /// assert_eq!(sym.lookup_label("main"), Some(Addr::new(0x0040_0000)));
    /// assert_eq!(sym.lookup_label("loop"), Some(Addr::new(0x0040_0004)));
    /// assert_eq!(sym.lookup_label("LOOP"), None);
    /// ```
    pub fn new(stmts: &[Stmt], errs: &mut Vec<AsmErr>) -> Self {
        let mut label_map: BTreeMap<String, SymbolData> = BTreeMap::new();
        let mut globals = vec![];
        let mut cursor = Cursor::new();
        let mut overflowed = false;

        for stmt in stmts {
            let placed = cursor.place(stmt.nucleus.as_ref());
            let addr = match placed {
                Some(addr) => addr,
                None => {
                    let kind = match stmt.nucleus {
                        Some(StmtKind::Instr(_)) => AsmErrKind::MisplacedInstr,
                        _ => AsmErrKind::MisplacedDirective,
                    };
                    errs.push(AsmErr::new(kind, stmt.span.clone()));
                    // Still define the labels, so they aren't reported as undefined later.
                    cursor.current()
                }
            };

            for label in &stmt.labels {
                match label_map.get(&label.name) {
                    Some(orig) => {
                        // Blame the redefinition, pointing back at the original.
                        errs.push(AsmErr::new(AsmErrKind::OverlappingLabels, [label.span(), orig.span(&label.name)]));
                    },
                    None => {
                        label_map.insert(label.name.clone(), SymbolData { addr, src_start: label.span().start });
                    }
                }
            }

            if placed.is_some() {
                let len = match &stmt.nucleus {
                    Some(StmtKind::Instr(i)) => 4 * i.word_len(),
                    Some(StmtKind::Directive(Directive::Globl(label))) => {
                        globals.push(label.clone());
                        0
                    },
                    Some(StmtKind::Directive(d)) => d.byte_len(),
                    None => 0
                };
                if !cursor.shift(len) && !overflowed {
                    // Only the first statement that overflows is reported.
                    overflowed = true;
                    errs.push(AsmErr::new(AsmErrKind::SegmentTooLarge, stmt.span.clone()));
                }
            }
        }

        Self { label_map, globals }
    }

    /// Gets the memory address of a given label (if it exists).
    pub fn lookup_label(&self, label: &str) -> Option<Addr> {
        self.label_map.get(label).map(|data| Addr::new(data.addr))
    }

    /// Gets the label at a given memory address (if it exists).
    ///
    /// If multiple labels are at the address, the first alphabetically is returned.
    pub fn rev_lookup_label(&self, addr: Addr) -> Option<&str> {
        self.label_map.iter()
            .find(|(_, data)| data.addr == addr.get())
            .map(|(label, _)| label.as_str())
    }

    /// Gets the source span of a given label (if it exists).
    pub fn get_label_source(&self, label: &str) -> Option<Range<usize>> {
        self.label_map.get(label).map(|data| data.span(label))
    }

    /// Gets an iterable of the labels and their addresses.
    pub fn label_iter(&self) -> impl Iterator<Item=(&str, Addr)> + '_ {
        self.label_map.iter()
            .map(|(label, data)| (label.as_str(), Addr::new(data.addr)))
    }

    /// The labels marked with `.globl`.
    pub fn globals(&self) -> &[Label] {
        &self.globals
    }

    fn resolve(&self, label: &Label) -> Result<u32, AsmErr> {
        self.label_map.get(&label.name)
            .map(|data| data.addr)
            .ok_or_else(|| AsmErr::new(AsmErrKind::CouldNotFindLabel, label.span()))
    }
    fn resolve_ref(&self, addr: &AddrRef) -> Result<u32, AsmErr> {
        match addr {
            AddrRef::Label(label, off) => self.resolve(label).map(|a| a.wrapping_add_signed(*off)),
            AddrRef::Value(v) => Ok(*v),
        }
    }
}

/// Computes the offset (in words) of a branch at `pc` to its target.
fn branch_offset(target: &BranchTarget, pc: u32, sym: &SymbolTable) -> Result<SImm16, AsmErr> {
    match target {
        BranchTarget::Offset(off) => Ok(*off),
        BranchTarget::Label(label) => {
            let addr = sym.resolve(label)?;
            if addr % 4 != 0 {
                return Err(AsmErr::new(AsmErrKind::MisalignedTarget, label.span()));
            }
            let words = (i64::from(addr) - i64::from(pc) - 4) / 4;
            SImm16::from_i64(words)
                .map_err(|e| AsmErr::new(AsmErrKind::OffsetNewErr(e), label.span()))
        }
    }
}
/// Computes the 26-bit index of a jump at `pc` to its target.
fn jump_index(target: &AddrRef, pc: u32, sym: &SymbolTable, span: Range<usize>) -> Result<u32, AsmErr> {
    let span = match target {
        AddrRef::Label(label, _) => label.span(),
        AddrRef::Value(_) => span,
    };
    let addr = sym.resolve_ref(target)?;
    if addr % 4 != 0 {
        return Err(AsmErr::new(AsmErrKind::MisalignedTarget, span));
    }
    if addr & 0xF000_0000 != pc.wrapping_add(4) & 0xF000_0000 {
        return Err(AsmErr::new(AsmErrKind::JumpOutOfRegion, span));
    }
    Ok((addr >> 2) & 0x03FF_FFFF)
}
/// Splits an address into the upper and lower halves used by a `lui` and a
/// sign-extended 16-bit offset.
fn split_hi_lo(addr: u32) -> (UImm16, SImm16) {
    let hi = addr.wrapping_add(0x8000) >> 16;
    (UImm16::new_trunc(hi), SImm16::new_trunc(addr as i32))
}

impl AsmInstr {
    /// Converts an ASM instruction into the simulator instructions it assembles to.
    ///
    /// The instruction is placed at `pc`. Labels are resolved with the symbol table.
    /// The number of instructions returned is always [`AsmInstr::word_len`].
    pub fn into_sim_instrs(self, pc: Addr, span: Range<usize>, sym: &SymbolTable) -> Result<Vec<SimInstr>, AsmErr> {
        let pc = pc.get();

        let instrs = match self {
            AsmInstr::Alu(op, rd, rs, rt)      => vec![SimInstr::Alu(op, rd, rs, rt)],
            AsmInstr::Shift(op, rd, rt, sa)    => vec![SimInstr::Shift(op, rd, rt, sa)],
            AsmInstr::Jr(rs)                   => vec![SimInstr::Jr(rs)],
            AsmInstr::Jalr(rd, rs)             => vec![SimInstr::Jalr(rd, rs)],
            AsmInstr::MulDiv(op, rs, rt)       => vec![SimInstr::MulDiv(op, rs, rt)],
            AsmInstr::MoveFrom(r, rd)          => vec![SimInstr::MoveFrom(r, rd)],
            AsmInstr::MoveTo(r, rs)            => vec![SimInstr::MoveTo(r, rs)],
            AsmInstr::Syscall                  => vec![SimInstr::Syscall],
            AsmInstr::Break                    => vec![SimInstr::Break],
            AsmInstr::AluImm(op, rt, rs, imm)  => vec![SimInstr::AluImm(op, rt, rs, imm)],
            AsmInstr::Lui(rt, imm)             => vec![SimInstr::Lui(rt, imm)],
            AsmInstr::Branch(c, rs, rt, t)     => vec![SimInstr::Branch(c, rs, rt, branch_offset(&t, pc, sym)?)],
            AsmInstr::Load(w, rt, MemOperand::Base(off, base))  => vec![SimInstr::Load(w, rt, base, off)],
            AsmInstr::Store(w, rt, MemOperand::Base(off, base)) => vec![SimInstr::Store(w, rt, base, off)],
            AsmInstr::Load(w, rt, MemOperand::Direct(addr)) => {
                let (hi, lo) = split_hi_lo(sym.resolve_ref(&addr)?);
                vec![SimInstr::Lui(AT, hi), SimInstr::Load(w, rt, AT, lo)]
            },
            AsmInstr::Store(w, rt, MemOperand::Direct(addr)) => {
                let (hi, lo) = split_hi_lo(sym.resolve_ref(&addr)?);
                vec![SimInstr::Lui(AT, hi), SimInstr::Store(w, rt, AT, lo)]
            },
            AsmInstr::J(t)   => vec![SimInstr::J(jump_index(&t, pc, sym, span)?)],
            AsmInstr::Jal(t) => vec![SimInstr::Jal(jump_index(&t, pc, sym, span)?)],
            AsmInstr::Li(rt, value) => {
                let lo = UImm16::new_trunc(value);
                match crate::ast::asm::li_fits_one(value) {
                    true if value <= 0xFFFF => vec![SimInstr::AluImm(ImmOp::Ori, rt, ZERO, lo)],
                    true => vec![SimInstr::AluImm(ImmOp::Addiu, rt, ZERO, lo)],
                    false => vec![
                        SimInstr::Lui(rt, UImm16::new_trunc(value >> 16)),
                        SimInstr::AluImm(ImmOp::Ori, rt, rt, lo)
                    ],
                }
            },
            AsmInstr::La(rt, addr) => {
                let addr = sym.resolve_ref(&addr)?;
                vec![
                    SimInstr::Lui(AT, UImm16::new_trunc(addr >> 16)),
                    SimInstr::AluImm(ImmOp::Ori, rt, AT, UImm16::new_trunc(addr))
                ]
            },
            AsmInstr::Move(rd, rs) => vec![SimInstr::Alu(AluOp::Addu, rd, rs, ZERO)],
            AsmInstr::Nop          => vec![SimInstr::Shift(ShiftOp::Sll, ZERO, ZERO, Shamt::new_trunc(0))],
            AsmInstr::B(t)         => vec![SimInstr::Branch(BranchCond::Beq, ZERO, ZERO, branch_offset(&t, pc, sym)?)],
            AsmInstr::Beqz(rs, t)  => vec![SimInstr::Branch(BranchCond::Beq, rs, ZERO, branch_offset(&t, pc, sym)?)],
            AsmInstr::Bnez(rs, t)  => vec![SimInstr::Branch(BranchCond::Bne, rs, ZERO, branch_offset(&t, pc, sym)?)],
            AsmInstr::BranchCmp(cond, rs, rt, t) => {
                // The branch is the second instruction.
                let off = branch_offset(&t, pc.wrapping_add(4), sym)?;
                let (a, b, taken_if_set) = match cond {
                    CmpCond::Lt => (rs, rt, true),
                    CmpCond::Gt => (rt, rs, true),
                    CmpCond::Le => (rt, rs, false),
                    CmpCond::Ge => (rs, rt, false),
                };
                let branch = match taken_if_set {
                    true  => BranchCond::Bne,
                    false => BranchCond::Beq,
                };
                vec![SimInstr::Alu(AluOp::Slt, AT, a, b), SimInstr::Branch(branch, AT, ZERO, off)]
            },
            AsmInstr::Neg(rd, rs) => vec![SimInstr::Alu(AluOp::Sub, rd, ZERO, rs)],
            AsmInstr::Not(rd, rs) => vec![SimInstr::Alu(AluOp::Nor, rd, rs, ZERO)],
        };

        Ok(instrs)
    }
}

impl Directive {
    /// Writes the bytes of this data directive (big-endian), resolving labels with the symbol table.
    fn write_data(&self, out: &mut Vec<u8>, sym: &SymbolTable) -> Result<(), AsmErr> {
        match self {
            Directive::Word(ws) => {
                // Resolve everything first so a failed label doesn't leave a partial write.
                let words = ws.iter()
                    .map(|w| sym.resolve_ref(w))
                    .collect::<Result<Vec<_>, _>>()?;
                out.extend(words.into_iter().flat_map(u32::to_be_bytes));
            },
            Directive::Half(hs) => out.extend(hs.iter().flat_map(|h| h.to_be_bytes())),
            Directive::Byte(bs) => out.extend_from_slice(bs),
            Directive::Ascii(s) => out.extend_from_slice(s.as_bytes()),
            Directive::Asciiz(s) => {
                out.extend_from_slice(s.as_bytes());
                out.push(0);
            },
            Directive::Space(n) => out.resize(out.len() + *n as usize, 0),
            Directive::Text | Directive::Data | Directive::Globl(_) | Directive::Align(_) => {},
        }
        Ok(())
    }
}

/// An assembled program, which can be loaded into the simulator.
///
/// A program consists of:
/// - the instructions of the text segment, each with the source line it came from,
/// - the initial image of the data segment,
/// - the symbol table,
/// - and the source code, for looking up lines during simulation.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Program {
    text: Vec<SimInstr>,
    /// The source line (1-indexed) of each instruction in `text`.
    lines: Vec<usize>,
    data: Vec<u8>,
    entry: Addr,
    sym: SymbolTable,
    src_info: SourceInfo,
}
impl Program {
    /// Creates a program from its statements and the symbol table.
    ///
    /// This is the second assembler pass. Any errors found are appended to `errs`.
    fn new(stmts: Vec<Stmt>, sym: SymbolTable, src_info: SourceInfo, errs: &mut Vec<AsmErr>) -> Self {
        let mut text = vec![];
        let mut lines = vec![];
        let mut data = vec![];
        let mut cursor = Cursor::new();
        let data_base = DATA_START.get();

        for stmt in stmts {
            let Some(addr) = cursor.place(stmt.nucleus.as_ref()) else { continue };
            let line = src_info.get_pos_pair(stmt.span.start).0 + 1;

            match stmt.nucleus {
                Some(StmtKind::Instr(instr)) => {
                    let len = instr.word_len();
                    let instrs = instr.into_sim_instrs(Addr::new(addr), stmt.span.clone(), &sym)
                        .unwrap_or_else(|e| {
                            errs.push(e);
                            // Fill its place so later addresses don't shift.
                            vec![SimInstr::Shift(ShiftOp::Sll, ZERO, ZERO, Shamt::new_trunc(0)); len as usize]
                        });
                    if !cursor.shift(4 * len) { continue; }
                    lines.extend(std::iter::repeat(line).take(instrs.len()));
                    text.extend(instrs);
                },
                Some(StmtKind::Directive(d)) if d.is_data() => {
                    if !cursor.shift(d.byte_len()) { continue; }
                    data.resize((addr - data_base) as usize, 0);
                    if let Err(e) = d.write_data(&mut data, &sym) {
                        errs.push(e);
                    }
                    data.resize((cursor.data - data_base) as usize, 0);
                },
                _ => {}
            }
        }

        let entry = match sym.label_map.get(ENTRY_LABEL) {
            Some(d) if (TEXT_START.get()..cursor.text).contains(&d.addr) => Addr::new(d.addr),
            Some(d) => {
                errs.push(AsmErr::new(AsmErrKind::EntryNotInText, d.span(ENTRY_LABEL)));
                TEXT_START
            },
            None => TEXT_START,
        };
        for global in sym.globals() {
            if let Err(e) = sym.resolve(global) {
                errs.push(e);
            }
        }

        Self { text, lines, data, entry, sym, src_info }
    }

    /// The address execution starts at.
    ///
    /// This is the address of `main` if it is defined, and the start of the text segment otherwise.
    pub fn entry(&self) -> Addr {
        self.entry
    }

    /// The instructions of the text segment.
    pub fn text(&self) -> &[SimInstr] {
        &self.text
    }

    /// The initial contents of the data segment (starting at [`DATA_START`]).
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The symbol table.
    pub fn symbol_table(&self) -> &SymbolTable {
        &self.sym
    }

    /// The source code information.
    pub fn source_info(&self) -> &SourceInfo {
        &self.src_info
    }

    /// Iterates over each instruction, with its address and source line (1-indexed).
    pub fn instructions(&self) -> impl Iterator<Item=(Addr, SimInstr, usize)> + '_ {
        self.text.iter()
            .zip(&self.lines)
            .enumerate()
            .map(|(i, (&instr, &line))| (TEXT_START.offset(4 * i as u32), instr, line))
    }

    /// Gets the instruction at the given address (if it is in the text segment).
    pub fn instr_at(&self, addr: Addr) -> Option<SimInstr> {
        self.text_index(addr).map(|i| self.text[i])
    }

    /// Gets the source line (1-indexed) of the instruction at the given address.
    pub fn line_of(&self, addr: Addr) -> Option<usize> {
        self.text_index(addr).map(|i| self.lines[i])
    }

    /// Gets the address of the first instruction on a given source line (1-indexed).
    pub fn addr_of_line(&self, line: usize) -> Option<Addr> {
        self.lines.iter()
            .position(|&l| l == line)
            .map(|i| TEXT_START.offset(4 * i as u32))
    }

    /// Gets the memory address of a given label (if it exists).
    pub fn lookup_label(&self, label: &str) -> Option<Addr> {
        self.sym.lookup_label(label)
    }

    /// Gets the label at a given memory address (if it exists).
    pub fn rev_lookup_label(&self, addr: Addr) -> Option<&str> {
        self.sym.rev_lookup_label(addr)
    }

    fn text_index(&self, addr: Addr) -> Option<usize> {
        let off = addr.get().checked_sub(TEXT_START.get())?;
        let i = (off % 4 == 0).then_some(off / 4)? as usize;
        (i < self.text.len()).then_some(i)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::ast::reg_consts::{AT, T0, T1, V0, ZERO};
    use crate::ast::sim::{AluOp, BranchCond, ImmOp, MemWidth, SimInstr};
    use crate::ast::{SImm16, UImm16};
    use crate::err::NO_LINE;
    use crate::sim::mem::Addr;

    use super::{assemble, AsmErrKind, SourceInfo};

    fn assemble_ok(src: &str) -> super::Program {
        let asm = assemble(src);
        assert_eq!(asm.problems, vec![], "source should assemble");
        asm.program
    }

    #[test]
    fn test_sym_basic() {
        let src = "
        .data
        a: .byte 1
        b: .word 2
        c: .asciiz \"hi\"
        d: .half 3
        .text
        main:
            li $t0, 0x12345678
        e:  nop
        f:
        ";
        let p = assemble_ok(src);
        assert_eq!(p.lookup_label("a"), Some(Addr::new(0x1001_0000)));
        // .word auto-aligns
        assert_eq!(p.lookup_label("b"), Some(Addr::new(0x1001_0004)));
        assert_eq!(p.lookup_label("c"), Some(Addr::new(0x1001_0008)));
        assert_eq!(p.lookup_label("d"), Some(Addr::new(0x1001_000C)));
        assert_eq!(p.lookup_label("main"), Some(Addr::new(0x0040_0000)));
        assert_eq!(p.lookup_label("e"), Some(Addr::new(0x0040_0008)));
        assert_eq!(p.lookup_label("f"), Some(Addr::new(0x0040_000C)));
        assert_eq!(p.rev_lookup_label(Addr::new(0x0040_0008)), Some("e"));

        assert_eq!(p.data(), &[1, 0, 0, 0, 0, 0, 0, 2, b'h', b'i', 0, 0, 0, 3]);
    }

    #[test]
    fn test_pseudo_expansion() {
        let p = assemble_ok("
        main:
            li $t0, 0x12345678
            la $t1, main
            blt $t0, $t1, main
            move $v0, $t0
        ");
        let text = p.text();
        assert_eq!(text[0], SimInstr::Lui(T0, UImm16::new(0x1234).unwrap()));
        assert_eq!(text[1], SimInstr::AluImm(ImmOp::Ori, T0, T0, UImm16::new(0x5678).unwrap()));
        assert_eq!(text[2], SimInstr::Lui(AT, UImm16::new(0x0040).unwrap()));
        assert_eq!(text[3], SimInstr::AluImm(ImmOp::Ori, T1, AT, UImm16::new(0).unwrap()));
        assert_eq!(text[4], SimInstr::Alu(AluOp::Slt, AT, T0, T1));
        // branch at 0x400014, target 0x400000: (0x400000 - 0x400018) / 4
        assert_eq!(text[5], SimInstr::Branch(BranchCond::Bne, AT, ZERO, SImm16::new(-6).unwrap()));
        assert_eq!(text[6], SimInstr::Alu(AluOp::Addu, V0, T0, ZERO));
    }

    #[test]
    fn test_direct_memory_operand() {
        let p = assemble_ok("
        .data
        pad: .space 0x8000
        x: .word 5
        .text
        main: lw $t0, x
        ");
        // x = 0x10018000, so the low half is negative and the upper half is rounded up.
        assert_eq!(p.text()[0], SimInstr::Lui(AT, UImm16::new(0x1002).unwrap()));
        assert_eq!(p.text()[1], SimInstr::Load(MemWidth::Word, T0, AT, SImm16::new(-0x8000).unwrap()));
    }

    #[test]
    fn test_lines() {
        let p = assemble_ok("main:\n  li $t0, 1\n\n  li $t0, 0x10000\n  syscall");
        let lines: Vec<_> = p.instructions().map(|(_, _, line)| line).collect();
        assert_eq!(lines, vec![2, 4, 4, 5]);
        assert_eq!(p.line_of(Addr::new(0x0040_0004)), Some(4));
        assert_eq!(p.line_of(Addr::new(0x0040_0010)), None);
        assert_eq!(p.addr_of_line(5), Some(Addr::new(0x0040_000C)));
    }

    #[test]
    fn test_two_undefined_labels() {
        let src = "main:\n  j nowhere\n  nop\n  beq $t0, $t1, elsewhere\n";
        let asm = assemble(src);
        assert_eq!(asm.problems.len(), 2);
        assert_eq!(asm.problems[0].line(), 2);
        assert_eq!((asm.problems[0].range_start(), asm.problems[0].range_end()), (10, 16));
        assert_eq!(asm.problems[1].line(), 4);
        assert!(asm.into_result().is_err());
    }

    #[test]
    fn test_errors_sorted_across_passes() {
        // The parse error (line 3) is found before the undefined label (line 2),
        // but problems are reported in source order.
        let src = "main:\n  j nowhere\n  add $t0\n";
        let asm = assemble(src);
        let lines: Vec<_> = asm.problems.iter().map(|p| p.line()).collect();
        assert_eq!(lines, vec![2, 3]);
    }

    #[test]
    fn test_duplicate_labels_blame_redefinitions() {
        let asm = assemble("a: nop\na: nop\na: nop\n");
        let locs: Vec<_> = asm.problems.iter()
            .map(|p| (p.line(), p.range_start(), p.range_end()))
            .collect();
        assert_eq!(locs, vec![(2, 7, 7), (3, 14, 14)]);
    }

    #[test]
    fn test_bad_line_keeps_its_labels() {
        let asm = assemble("main:\nloop: add $t0\n  j loop\n");
        assert_eq!(asm.problems.len(), 1);
        assert_eq!(asm.problems[0].line(), 2);
    }

    #[test]
    fn test_asm_errors() {
        fn kinds(src: &str) -> Vec<String> {
            assemble(src).problems.into_iter().map(|p| p.message().to_string()).collect()
        }

        assert_eq!(kinds("a: nop\na: nop"), vec![AsmErrKind::OverlappingLabels.to_string()]);
        assert_eq!(kinds(".text\n.word 4\nnop"), vec![AsmErrKind::MisplacedDirective.to_string()]);
        assert_eq!(kinds(".data\nnop\n.text\nnop"), vec![AsmErrKind::MisplacedInstr.to_string()]);
        assert_eq!(kinds(".data\nmain: .word 0\n.text\nnop"), vec![AsmErrKind::EntryNotInText.to_string()]);
        assert_eq!(kinds(".data\n.byte 0\nx: .byte 0\n.text\nj x"), vec![AsmErrKind::MisalignedTarget.to_string()]);
        assert_eq!(kinds("j 0x10000000"), vec![AsmErrKind::JumpOutOfRegion.to_string()]);
        assert_eq!(kinds(".data\n.space 0x2000000\n.text\nnop"), vec![AsmErrKind::SegmentTooLarge.to_string()]);
        assert_eq!(kinds(".globl start\nnop"), vec![AsmErrKind::CouldNotFindLabel.to_string()]);
    }

    #[test]
    fn test_branch_out_of_range() {
        let src = format!("main: b far\n{}far: nop", "nop\n".repeat(0x8000));
        let asm = assemble(&src);
        assert_eq!(asm.problems.len(), 1);
        assert_eq!(asm.problems[0].line(), 1);
    }

    #[test]
    fn test_no_instructions() {
        let asm = assemble(".data\nx: .word 1");
        assert_eq!(asm.problems.len(), 1);
        assert_eq!(asm.problems[0].line(), NO_LINE);
    }

    #[test]
    fn test_entry() {
        let p = assemble_ok("nop\nmain: nop");
        assert_eq!(p.entry(), Addr::new(0x0040_0004));
        let p = assemble_ok("nop\nnop");
        assert_eq!(p.entry(), Addr::new(0x0040_0000));
    }

    #[test]
    fn test_source_info() {
        let info = SourceInfo::new("  nop  \nmain:\n");
        assert_eq!(info.count_lines(), 3);
        assert_eq!(info.read_line(0), Some("nop"));
        assert_eq!(info.read_line(1), Some("main:"));
        assert_eq!(info.read_line(2), Some(""));
        assert_eq!(info.read_line(3), None);
        assert_eq!(info.get_pos_pair(9), (1, 1));
        assert_eq!(info.char_index(9), 9);
    }

    proptest! {
        #[test]
        fn prop_assembly_is_deterministic(src in "(main:|nop|li \\$t0, -?[0-9]{1,6}|j main|bnez \\$t1, main|\\.data|\\.text|\\.word [0-9]{1,3}|frob|\\$)(\n(main:|nop|li \\$t0, -?[0-9]{1,6}|j main|bnez \\$t1, main|\\.data|\\.text|\\.word [0-9]{1,3}|frob|\\$)){0,12}") {
            let a = assemble(&src);
            let b = assemble(&src);
            prop_assert_eq!(a, b);
        }
    }
}

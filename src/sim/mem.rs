//! Memory handling for the MIPS simulator.
//!
//! This module consists of:
//! - [`Word`] and [`Addr`]: 32-bit values and addresses.
//! - [`Mem`]: The segmented memory (text, static data, heap and stack).
//! - [`RegFile`]: The register file.
//! - [`MachineInitStrategy`]: How uninitialized memory and registers are filled.

use std::sync::atomic::{AtomicU32, Ordering};

use rand::rngs::StdRng;
use rand::Rng;

use crate::ast::reg_consts::{FP, GP, RA, SP, ZERO};
use crate::ast::Reg;

/// The start of the text segment.
pub const TEXT_START: Addr = Addr::new(0x0040_0000);
/// The start of the static data segment.
pub const DATA_START: Addr = Addr::new(0x1001_0000);
/// The address right above the stack segment.
pub const STACK_TOP: Addr = Addr::new(0x8000_0000);
/// The initial value of `$sp`.
pub const SP_INIT: Word = Word::new(0x7FFF_FFFC);
/// The initial value of `$gp`.
pub const GP_INIT: Word = Word::new(0x1000_8000);

/// A 32-bit value.
///
/// A word has two interpretations:
/// - its unsigned bit pattern ([`Word::get`])
/// - its signed two's complement value ([`Word::get_signed`])
///
/// Arithmetic on words is wrapping.
/// Bytes of a word are ordered big-endian when it is stored in memory.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub struct Word(u32);
impl Word {
    /// Creates a word from its unsigned representation.
    pub const fn new(data: u32) -> Self {
        Self(data)
    }
    /// Creates a word from its signed representation.
    pub const fn from_signed(data: i32) -> Self {
        Self(data as u32)
    }
    /// Reads the word, returning its unsigned representation.
    pub const fn get(self) -> u32 {
        self.0
    }
    /// Reads the word, returning its signed representation.
    pub const fn get_signed(self) -> i32 {
        self.0 as i32
    }
    /// The bytes of this word, in memory order.
    pub const fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
    /// Creates a word from its bytes, in memory order.
    pub const fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }
}
impl From<u32> for Word {
    fn from(value: u32) -> Self {
        Word::new(value)
    }
}
impl From<i32> for Word {
    fn from(value: i32) -> Self {
        Word::from_signed(value)
    }
}
impl std::ops::Add for Word {
    type Output = Word;

    /// Adds two words together (wrapping if overflow occurs).
    fn add(self, rhs: Self) -> Self::Output {
        Word(self.0.wrapping_add(rhs.0))
    }
}
impl std::ops::Sub for Word {
    type Output = Word;

    /// Subtracts two words (wrapping if overflow occurs).
    fn sub(self, rhs: Self) -> Self::Output {
        Word(self.0.wrapping_sub(rhs.0))
    }
}
impl std::fmt::Display for Word {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// An address in the simulated address space.
///
/// Addresses can be offset and compared,
/// but converting them to and from other integers is always explicit
/// ([`Addr::new`], [`Addr::get`]).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord, Default)]
pub struct Addr(u32);
impl Addr {
    /// Creates an address.
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }
    /// The numeric value of this address.
    pub const fn get(self) -> u32 {
        self.0
    }
    /// Offsets this address by a number of bytes (wrapping).
    pub const fn offset(self, bytes: u32) -> Self {
        Self(self.0.wrapping_add(bytes))
    }
    /// Offsets this address by a signed number of bytes (wrapping).
    pub const fn offset_signed(self, bytes: i32) -> Self {
        Self(self.0.wrapping_add_signed(bytes))
    }
    /// Offsets this address by a number of bytes, or `None` if the address space overflows.
    pub fn checked_offset(self, bytes: u32) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }
    /// Whether this address is a multiple of `align`.
    pub fn is_aligned(self, align: u32) -> bool {
        self.0 % align == 0
    }
}
impl From<Word> for Addr {
    fn from(value: Word) -> Self {
        Addr(value.get())
    }
}
impl From<Addr> for Word {
    fn from(value: Addr) -> Self {
        Word(value.get())
    }
}
impl std::fmt::Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Trait that describes types that can be used to create the data for uninitialized memory.
pub trait WordFiller {
    /// Generate the data.
    fn generate(&mut self) -> u32;
}
impl WordFiller for () {
    /// This creates unseeded, non-deterministic values.
    fn generate(&mut self) -> u32 {
        rand::random()
    }
}
impl WordFiller for u32 {
    /// Sets each word to the given value.
    fn generate(&mut self) -> u32 {
        *self
    }
}
impl WordFiller for StdRng {
    /// This creates values from the standard random number generator.
    ///
    /// This can be used to create deterministic, seeded values.
    fn generate(&mut self) -> u32 {
        self.gen()
    }
}

/// Strategy used to initialize the registers and memory of the [`Simulator`].
///
/// This decides the contents of registers without a fixed initial value,
/// the stack, and the heap as it grows.
///
/// [`Simulator`]: super::Simulator
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MachineInitStrategy {
    /// Initializes each word randomly and non-deterministically.
    Unseeded,

    /// Initializes each word randomly and deterministically.
    Seeded {
        /// The seed the RNG was initialized with.
        seed: u64
    },

    /// Initializes each word to a known value.
    Known {
        /// The value to initialize each value to.
        value: u32
    }
}
impl Default for MachineInitStrategy {
    fn default() -> Self {
        MachineInitStrategy::Known { value: 0 }
    }
}
impl MachineInitStrategy {
    pub(super) fn generator(&self) -> MachineFiller {
        use rand::SeedableRng;

        match self {
            MachineInitStrategy::Unseeded => MachineFiller::Unseeded,
            MachineInitStrategy::Seeded { seed } => MachineFiller::Seeded(Box::new(StdRng::seed_from_u64(*seed))),
            MachineInitStrategy::Known { value } => MachineFiller::Known(*value),
        }
    }
}

/// The [`WordFiller`] created from a [`MachineInitStrategy`].
#[derive(Debug)]
pub(super) enum MachineFiller {
    Unseeded,
    Seeded(Box<StdRng>),
    Known(u32)
}
impl WordFiller for MachineFiller {
    fn generate(&mut self) -> u32 {
        match self {
            MachineFiller::Unseeded  => ().generate(),
            MachineFiller::Seeded(r) => r.generate(),
            MachineFiller::Known(k)  => k.generate(),
        }
    }
}
impl MachineFiller {
    /// Fills a buffer of bytes, one generated word at a time.
    fn fill(&mut self, buf: &mut [u8]) {
        for chunk in buf.chunks_mut(4) {
            let word = self.generate().to_be_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }
}

/// Error from growing the heap.
///
/// This holds the state of the heap at the moment growth failed.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct HeapErr {
    /// The number of bytes the heap was requested to grow by.
    pub requested: u32,
    /// The break at the time of the request.
    pub brk: Addr,
    /// The size of the heap at the time of the request.
    pub heap_size: u32
}
impl std::fmt::Display for HeapErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "could not grow heap by {} bytes (break: {}, heap size: {} bytes)", self.requested, self.brk, self.heap_size)
    }
}
impl std::error::Error for HeapErr {}
impl crate::err::Error for HeapErr {
    fn span(&self) -> Option<crate::err::ErrSpan> {
        None
    }

    fn help(&self) -> Option<std::borrow::Cow<str>> {
        Some("the heap cannot grow into the stack or beyond the configured heap size".into())
    }
}

/// Errors from accessing memory.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum MemErr {
    /// The address is not in any memory region.
    OutOfBounds {
        /// The address accessed.
        addr: Addr
    },
    /// The address is not aligned for the size of the access.
    Misaligned {
        /// The address accessed.
        addr: Addr,
        /// The required alignment.
        align: u32
    },
    /// The address is in a region which cannot be written to.
    ReadOnly {
        /// The address accessed.
        addr: Addr
    },
    /// The heap could not be grown.
    Heap(HeapErr)
}
impl std::fmt::Display for MemErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemErr::OutOfBounds { addr } => write!(f, "address {addr} is out of bounds"),
            MemErr::Misaligned { addr, align } => write!(f, "address {addr} is not aligned to {align} bytes"),
            MemErr::ReadOnly { addr } => write!(f, "address {addr} is read-only"),
            MemErr::Heap(e) => e.fmt(f),
        }
    }
}
impl std::error::Error for MemErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MemErr::Heap(e) => Some(e),
            _ => None
        }
    }
}
impl crate::err::Error for MemErr {
    fn span(&self) -> Option<crate::err::ErrSpan> {
        None
    }

    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            MemErr::OutOfBounds { .. } => Some("valid addresses are in the data segment, below the heap's break, or in the stack".into()),
            MemErr::Misaligned { align, .. } => Some(format!("this access requires an address that is a multiple of {align}").into()),
            MemErr::ReadOnly { .. } => Some("the text segment cannot be written to".into()),
            MemErr::Heap(e) => crate::err::Error::help(e),
        }
    }
}
impl From<HeapErr> for MemErr {
    fn from(value: HeapErr) -> Self {
        MemErr::Heap(value)
    }
}

/// Sizes of the growable memory regions.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct MemConfig {
    /// The largest size the heap can grow to (in bytes).
    pub heap_budget: u32,
    /// The size of the stack (in bytes).
    pub stack_budget: u32
}
impl Default for MemConfig {
    fn default() -> Self {
        Self { heap_budget: 4 << 20, stack_budget: 1 << 20 }
    }
}

/// The bounds of each memory region.
///
/// Each range is half-open (`start..end`), and no two ranges overlap.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Layout {
    /// Start of the text segment.
    pub text_start: Addr,
    /// End of the text segment.
    pub text_end: Addr,
    /// Start of the static data segment.
    pub data_start: Addr,
    /// End of the static data segment (and start of the heap).
    pub heap_start: Addr,
    /// The highest address the break can move to.
    pub heap_ceiling: Addr,
    /// Lowest address of the stack.
    pub stack_floor: Addr,
    /// End of the stack.
    pub stack_top: Addr,
}

/// The memory region an address falls in.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Region {
    Text,
    Data,
    Heap,
    Stack
}

/// Memory.
///
/// This is a flat 32-bit address space consisting of four disjoint regions:
/// - the text segment, which holds the (read-only) encoded program
/// - the static data segment, initialized from the program's data
/// - the heap, which starts empty and grows upward with [`Mem::grow_heap`]
/// - the stack, which sits right below [`STACK_TOP`]
///
/// Any access outside of these regions fails with [`MemErr::OutOfBounds`].
/// This includes addresses in the heap that are above the break.
///
/// Accesses are checked before any memory is modified,
/// so a failed access never leaves memory partially written.
///
/// ```
/// use mips_ensemble::sim::mem::{Addr, Mem, MemConfig, MemErr, MachineInitStrategy, Word};
///
/// let mut mem = Mem::new(&[], &[0; 8], MemConfig::default(), MachineInitStrategy::default());
/// let addr = Addr::new(0x1001_0004);
/// mem.write_word(addr, Word::new(11)).unwrap();
/// assert_eq!(mem.read_word(addr), Ok(Word::new(11)));
///
/// assert!(matches!(mem.read_word(Addr::new(0x1001_0002)), Err(MemErr::Misaligned { .. })));
/// assert!(matches!(mem.read_word(Addr::new(0x0000_0000)), Err(MemErr::OutOfBounds { .. })));
/// ```
#[derive(Debug)]
pub struct Mem {
    text: Vec<u8>,
    data: Vec<u8>,
    heap: Vec<u8>,
    stack: Vec<u8>,
    layout: Layout,
    filler: MachineFiller,
}
impl Mem {
    /// Creates the memory for a program,
    /// with an encoded text segment and an initial image of the static data segment.
    ///
    /// The stack is shrunk if it would otherwise overlap the static data.
    pub fn new(text: &[u32], data: &[u8], config: MemConfig, init: MachineInitStrategy) -> Self {
        let mut filler = init.generator();

        let text: Vec<u8> = text.iter().flat_map(|w| w.to_be_bytes()).collect();
        let mut data = data.to_vec();
        data.resize(data.len().next_multiple_of(4), 0);

        let text_end = TEXT_START.offset(text.len() as u32);
        let heap_start = DATA_START.offset(data.len() as u32);
        let stack_budget = config.stack_budget.min(STACK_TOP.get() - heap_start.get());
        let stack_floor = Addr::new(STACK_TOP.get() - stack_budget);
        let heap_ceiling = heap_start.checked_offset(config.heap_budget)
            .map_or(stack_floor, |c| c.min(stack_floor));

        let mut stack = vec![0; stack_budget as usize];
        filler.fill(&mut stack);

        let layout = Layout {
            text_start: TEXT_START,
            text_end,
            data_start: DATA_START,
            heap_start,
            heap_ceiling,
            stack_floor,
            stack_top: STACK_TOP,
        };
        tracing::debug!(
            text_end = %layout.text_end,
            heap_start = %layout.heap_start,
            heap_ceiling = %layout.heap_ceiling,
            stack_floor = %layout.stack_floor,
            "laid out memory"
        );

        Self { text, data, heap: vec![], stack, layout, filler }
    }

    /// The bounds of each memory region.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// The current break (the address right above the heap).
    pub fn brk(&self) -> Addr {
        self.layout.heap_start.offset(self.heap.len() as u32)
    }

    /// The current size of the heap in bytes.
    pub fn heap_size(&self) -> u32 {
        self.heap.len() as u32
    }

    /// Moves the break upward by `by` bytes, returning the new break.
    ///
    /// This fails if the heap would exceed its budget or run into the stack.
    /// On failure, the break is not moved.
    pub fn grow_heap(&mut self, by: u32) -> Result<Addr, HeapErr> {
        let brk = self.brk();
        let err = HeapErr { requested: by, brk, heap_size: self.heap_size() };

        let new_brk = brk.checked_offset(by).ok_or(err)?;
        if new_brk > self.layout.heap_ceiling {
            return Err(err);
        }

        let old_len = self.heap.len();
        self.heap.resize(old_len + by as usize, 0);
        self.filler.fill(&mut self.heap[old_len..]);
        tracing::debug!(old_break = %brk, new_break = %new_brk, "grew heap");
        Ok(new_brk)
    }

    /// Finds the region and index of an access of `len` bytes.
    fn locate(&self, addr: Addr, len: u32) -> Result<(Region, usize), MemErr> {
        if !addr.is_aligned(len) {
            return Err(MemErr::Misaligned { addr, align: len });
        }
        let end = addr.checked_offset(len).ok_or(MemErr::OutOfBounds { addr })?;

        let l = &self.layout;
        let regions = [
            (Region::Text,  l.text_start,  l.text_end),
            (Region::Data,  l.data_start,  l.heap_start),
            (Region::Heap,  l.heap_start,  self.brk()),
            (Region::Stack, l.stack_floor, l.stack_top),
        ];
        regions.into_iter()
            .find(|&(_, start, stop)| start <= addr && end <= stop)
            .map(|(region, start, _)| (region, (addr.get() - start.get()) as usize))
            .ok_or(MemErr::OutOfBounds { addr })
    }

    fn region(&self, region: Region) -> &[u8] {
        match region {
            Region::Text  => &self.text,
            Region::Data  => &self.data,
            Region::Heap  => &self.heap,
            Region::Stack => &self.stack,
        }
    }

    /// Reads `N` bytes (aligned to `N`) from memory.
    fn read<const N: usize>(&self, addr: Addr) -> Result<[u8; N], MemErr> {
        let (region, i) = self.locate(addr, N as u32)?;
        let mut buf = [0; N];
        buf.copy_from_slice(&self.region(region)[i..i + N]);
        Ok(buf)
    }

    /// Writes `N` bytes (aligned to `N`) into memory.
    fn write<const N: usize>(&mut self, addr: Addr, bytes: [u8; N]) -> Result<(), MemErr> {
        let (region, i) = self.locate(addr, N as u32)?;
        let target = match region {
            Region::Text  => return Err(MemErr::ReadOnly { addr }),
            Region::Data  => &mut self.data,
            Region::Heap  => &mut self.heap,
            Region::Stack => &mut self.stack,
        };
        target[i..i + N].copy_from_slice(&bytes);
        Ok(())
    }

    /// Reads a byte.
    pub fn read_byte(&self, addr: Addr) -> Result<u8, MemErr> {
        self.read::<1>(addr).map(|[b]| b)
    }
    /// Reads a half-word (2-byte aligned).
    pub fn read_half(&self, addr: Addr) -> Result<u16, MemErr> {
        self.read(addr).map(u16::from_be_bytes)
    }
    /// Reads a word (4-byte aligned).
    pub fn read_word(&self, addr: Addr) -> Result<Word, MemErr> {
        self.read(addr).map(Word::from_bytes)
    }
    /// Writes a byte.
    pub fn write_byte(&mut self, addr: Addr, data: u8) -> Result<(), MemErr> {
        self.write(addr, [data])
    }
    /// Writes a half-word (2-byte aligned).
    pub fn write_half(&mut self, addr: Addr, data: u16) -> Result<(), MemErr> {
        self.write(addr, data.to_be_bytes())
    }
    /// Writes a word (4-byte aligned).
    pub fn write_word(&mut self, addr: Addr, data: Word) -> Result<(), MemErr> {
        self.write(addr, data.to_bytes())
    }

    /// Writes a sequence of bytes starting at `addr`.
    ///
    /// Every byte is checked before any byte is written.
    pub fn write_bytes(&mut self, addr: Addr, data: &[u8]) -> Result<(), MemErr> {
        for i in 0..data.len() as u32 {
            let a = addr.checked_offset(i).ok_or(MemErr::OutOfBounds { addr })?;
            if let (Region::Text, _) = self.locate(a, 1)? {
                return Err(MemErr::ReadOnly { addr: a });
            }
        }
        for (i, &b) in data.iter().enumerate() {
            self.write_byte(addr.offset(i as u32), b)?;
        }
        Ok(())
    }

    /// Reads a NUL-terminated string starting at `addr` (not including the NUL).
    pub fn read_c_str(&self, addr: Addr) -> Result<Vec<u8>, MemErr> {
        let mut out = vec![];
        let mut a = addr;
        loop {
            match self.read_byte(a)? {
                0 => break Ok(out),
                b => out.push(b),
            }
            a = a.checked_offset(1).ok_or(MemErr::OutOfBounds { addr: a })?;
        }
    }

    /// Gets the instruction word at the given address, if it is in the text segment.
    pub fn text_word(&self, addr: Addr) -> Option<u32> {
        match self.locate(addr, 4) {
            Ok((Region::Text, i)) => {
                let bytes = self.text.get(i..i + 4)?;
                Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            },
            _ => None
        }
    }

    /// Copies the writable contents of memory.
    pub fn snapshot(&self) -> MemSnapshot {
        MemSnapshot {
            data: self.data.clone(),
            heap: self.heap.clone(),
            stack: self.stack.clone(),
        }
    }
}

/// A copy of the writable regions of [`Mem`] at some point in time.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct MemSnapshot {
    /// The static data segment.
    pub data: Vec<u8>,
    /// The heap, up to the break.
    pub heap: Vec<u8>,
    /// The stack (from its floor).
    pub stack: Vec<u8>,
}

/// The register file.
///
/// This holds the 32 general purpose registers, as well as `hi` and `lo`.
/// Each register is its own atomic cell,
/// so registers can be read from other threads while the simulator runs
/// without ever observing a partially written value.
///
/// Writes to `$zero` are ignored.
///
/// # Example
///
/// ```
/// use mips_ensemble::sim::mem::{RegFile, Word};
/// use mips_ensemble::ast::reg_consts::{T0, ZERO};
///
/// let reg = RegFile::new(&mut 0u32);
/// reg.set(T0, Word::new(11));
/// assert_eq!(reg.get(T0), Word::new(11));
///
/// reg.set(ZERO, Word::new(11));
/// assert_eq!(reg.get(ZERO), Word::new(0));
/// ```
#[derive(Debug)]
pub struct RegFile {
    regs: [AtomicU32; 32],
    hi: AtomicU32,
    lo: AtomicU32
}
impl RegFile {
    /// Creates a register file, with registers initialized by the filler.
    ///
    /// `$sp`, `$fp`, `$gp` and `$ra` start with fixed values.
    pub fn new(filler: &mut impl WordFiller) -> Self {
        let reg_file = Self {
            regs: std::array::from_fn(|_| AtomicU32::new(0)),
            hi: AtomicU32::new(0),
            lo: AtomicU32::new(0),
        };
        reg_file.reset(filler);
        reg_file
    }

    /// Reinitializes every register in place, as [`RegFile::new`] would.
    ///
    /// Readers holding a reference to this register file observe the new values.
    pub fn reset(&self, filler: &mut impl WordFiller) {
        for (i, reg) in self.regs.iter().enumerate() {
            let value = if i == usize::from(ZERO) { 0 } else { filler.generate() };
            reg.store(value, Ordering::Release);
        }
        self.set_hi(Word::new(filler.generate()));
        self.set_lo(Word::new(filler.generate()));
        self.set(SP, SP_INIT);
        self.set(FP, SP_INIT);
        self.set(GP, GP_INIT);
        self.set(RA, Word::new(0));
    }

    /// Reads a register.
    pub fn get(&self, reg: Reg) -> Word {
        Word::new(self.regs[usize::from(reg)].load(Ordering::Acquire))
    }
    /// Writes a register.
    pub fn set(&self, reg: Reg, data: Word) {
        if reg != ZERO {
            self.regs[usize::from(reg)].store(data.get(), Ordering::Release);
        }
    }
    /// Reads the `hi` register.
    pub fn hi(&self) -> Word {
        Word::new(self.hi.load(Ordering::Acquire))
    }
    /// Reads the `lo` register.
    pub fn lo(&self) -> Word {
        Word::new(self.lo.load(Ordering::Acquire))
    }
    /// Writes the `hi` register.
    pub fn set_hi(&self, data: Word) {
        self.hi.store(data.get(), Ordering::Release);
    }
    /// Writes the `lo` register.
    pub fn set_lo(&self, data: Word) {
        self.lo.store(data.get(), Ordering::Release);
    }

    /// Copies the values of every register.
    pub fn snapshot(&self) -> RegSnapshot {
        RegSnapshot {
            regs: std::array::from_fn(|i| self.regs[i].load(Ordering::Acquire)),
            hi: self.hi().get(),
            lo: self.lo().get(),
        }
    }
}

/// A copy of the [`RegFile`] at some point in time.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct RegSnapshot {
    /// The general purpose registers.
    pub regs: [u32; 32],
    /// The `hi` register.
    pub hi: u32,
    /// The `lo` register.
    pub lo: u32,
}
impl std::ops::Index<Reg> for RegSnapshot {
    type Output = u32;

    fn index(&self, index: Reg) -> &Self::Output {
        &self.regs[usize::from(index)]
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::ast::reg_consts::{SP, T0};

    use super::*;

    fn mem(data_len: usize) -> Mem {
        let config = MemConfig { heap_budget: 0x100, stack_budget: 0x100 };
        Mem::new(&[0x2402_000A, 0x0000_000C], &vec![0; data_len], config, MachineInitStrategy::default())
    }

    #[test]
    fn test_layout() {
        let mem = mem(5);
        let l = mem.layout();
        assert_eq!(l.text_end, Addr::new(0x0040_0008));
        assert_eq!(l.heap_start, Addr::new(0x1001_0008));
        assert_eq!(l.heap_ceiling, Addr::new(0x1001_0108));
        assert_eq!(l.stack_floor, Addr::new(0x7FFF_FF00));
        assert_eq!(mem.brk(), l.heap_start);
    }

    #[test]
    fn test_regions() {
        let mut mem = mem(5);
        // the data segment is padded to a word
        assert_eq!(mem.read_word(Addr::new(0x1001_0004)), Ok(Word::new(0)));
        assert_eq!(mem.read_word(Addr::new(0x1001_0008)), Err(MemErr::OutOfBounds { addr: Addr::new(0x1001_0008) }));

        assert_eq!(mem.text_word(Addr::new(0x0040_0004)), Some(0x0000_000C));
        assert_eq!(mem.text_word(Addr::new(0x0040_0008)), None);
        assert_eq!(mem.read_half(Addr::new(0x0040_0000)), Ok(0x2402));
        assert_eq!(mem.write_byte(Addr::new(0x0040_0000), 1), Err(MemErr::ReadOnly { addr: Addr::new(0x0040_0000) }));

        mem.write_word(Addr::from(SP_INIT), Word::new(0xDEADBEEF)).unwrap();
        assert_eq!(mem.read_byte(Addr::new(0x7FFF_FFFC)), Ok(0xDE));
        assert_eq!(mem.read_byte(Addr::new(0x7FFF_FFFF)), Ok(0xEF));
        assert_eq!(mem.read_half(Addr::new(0x7FFF_FFFE)), Ok(0xBEEF));
        assert!(matches!(mem.read_word(Addr::new(0x7FFF_FFFE)), Err(MemErr::Misaligned { align: 4, .. })));
        assert!(mem.read_byte(Addr::new(0x8000_0000)).is_err());
        assert!(mem.read_byte(Addr::new(0x7FFF_FEFF)).is_err());
    }

    #[test]
    fn test_heap() {
        let mut mem = mem(0);
        let start = mem.brk();
        assert!(mem.read_byte(start).is_err());

        assert_eq!(mem.grow_heap(8), Ok(start.offset(8)));
        mem.write_word(start.offset(4), Word::new(5)).unwrap();
        assert_eq!(mem.read_word(start.offset(4)), Ok(Word::new(5)));

        let err = mem.grow_heap(0x100).unwrap_err();
        assert_eq!(err, HeapErr { requested: 0x100, brk: start.offset(8), heap_size: 8 });
        assert_eq!(mem.brk(), start.offset(8));

        assert_eq!(mem.grow_heap(0xF8), Ok(start.offset(0x100)));
        assert!(mem.grow_heap(1).is_err());
    }

    #[test]
    fn test_heap_stops_at_stack() {
        let config = MemConfig { heap_budget: u32::MAX, stack_budget: 0x100 };
        let mut mem = Mem::new(&[], &[], config, MachineInitStrategy::default());
        assert_eq!(mem.layout().heap_ceiling, mem.layout().stack_floor);
        assert!(mem.grow_heap(u32::MAX).is_err());
        assert_eq!(mem.heap_size(), 0);
    }

    #[test]
    fn test_c_str() {
        let mut mem = Mem::new(&[], b"hi\0there\0", MemConfig::default(), MachineInitStrategy::default());
        assert_eq!(mem.read_c_str(DATA_START), Ok(b"hi".to_vec()));
        assert_eq!(mem.read_c_str(DATA_START.offset(3)), Ok(b"there".to_vec()));

        // partially out of bounds writes write nothing
        let before = mem.snapshot();
        assert!(mem.write_bytes(DATA_START.offset(8), b"abcdef").is_err());
        assert_eq!(mem.snapshot(), before);

        mem.write_bytes(DATA_START.offset(8), b"ab").unwrap();
        assert_eq!(mem.read_c_str(DATA_START.offset(3)), Ok(b"thereab".to_vec()));

        // runs off the end of the data segment
        let unterminated = Mem::new(&[], b"abcd", MemConfig::default(), MachineInitStrategy::default());
        assert_eq!(unterminated.read_c_str(DATA_START), Err(MemErr::OutOfBounds { addr: DATA_START.offset(4) }));
    }

    #[test]
    fn test_init_strategy() {
        let config = MemConfig { heap_budget: 0x100, stack_budget: 0x100 };
        let known = Mem::new(&[], &[], config, MachineInitStrategy::Known { value: 0x01020304 });
        assert_eq!(known.read_word(Addr::new(0x7FFF_FF00)), Ok(Word::new(0x01020304)));

        let a = Mem::new(&[], &[], config, MachineInitStrategy::Seeded { seed: 7 });
        let b = Mem::new(&[], &[], config, MachineInitStrategy::Seeded { seed: 7 });
        assert_eq!(a.snapshot(), b.snapshot());

        let reg = RegFile::new(&mut 0xFFu32);
        assert_eq!(reg.get(T0), Word::new(0xFF));
        assert_eq!(reg.get(SP), SP_INIT);
        assert_eq!(reg.snapshot()[T0], 0xFF);

        reg.set(SP, Word::new(0));
        reg.reset(&mut 3u32);
        assert_eq!(reg.get(T0), Word::new(3));
        assert_eq!(reg.get(SP), SP_INIT);
        assert_eq!(reg.lo(), Word::new(3));
    }

    proptest! {
        #[test]
        fn prop_heap_growth_is_monotonic(reqs in proptest::collection::vec(0u32..0x80, 0..12)) {
            let mut mem = mem(0);
            let ceiling = mem.layout().heap_ceiling;
            for by in reqs {
                let before = mem.brk();
                match mem.grow_heap(by) {
                    Ok(new) => {
                        prop_assert_eq!(new, before.offset(by));
                        prop_assert_eq!(mem.brk(), new);
                    },
                    Err(e) => {
                        prop_assert!(before.offset(by) > ceiling);
                        prop_assert_eq!(e.brk, before);
                        prop_assert_eq!(mem.brk(), before);
                    }
                }
                prop_assert!(mem.brk() <= ceiling);
            }
        }

        #[test]
        fn prop_word_round_trip(i in 0u32..0x40, region in 0..3u8, value: u32) {
            let mut mem = mem(0x100);
            mem.grow_heap(0x100).unwrap();
            let base = match region {
                0 => mem.layout().data_start,
                1 => mem.layout().heap_start,
                _ => mem.layout().stack_floor,
            };
            let addr = base.offset(4 * i);
            mem.write_word(addr, Word::new(value)).unwrap();
            prop_assert_eq!(mem.read_word(addr), Ok(Word::new(value)));
        }

        #[test]
        fn prop_out_of_bounds_is_unchanged(addr: u32, value: u32) {
            let mut mem = mem(0x10);
            mem.grow_heap(0x10).unwrap();
            let addr = Addr::new(addr & !3);
            let l = mem.layout();
            let in_bounds = (l.text_start <= addr && addr < l.text_end)
                || (l.data_start <= addr && addr < mem.brk())
                || (l.stack_floor <= addr && addr < l.stack_top);
            prop_assume!(!in_bounds);

            let before = mem.snapshot();
            prop_assert_eq!(mem.read_word(addr), Err(MemErr::OutOfBounds { addr }));
            prop_assert_eq!(mem.write_word(addr, Word::new(value)), Err(MemErr::OutOfBounds { addr }));
            prop_assert_eq!(mem.snapshot(), before);
        }
    }
}

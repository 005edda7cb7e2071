//! Error interface for this crate.
//!
//! This module consists of:
//! - [`Error`]: The trait every diagnosable error of this crate implements.
//! - [`ErrSpan`]: Source locations an error can point to.
//! - [`Problem`]: The editor-facing record an assembly-time error is reported as.
//!
//! Errors are reported in two disjoint ways:
//! - Assembly-time errors (lexing, parsing, assembling) are collected into [`Problem`]s
//!   and never abort an assembly pass.
//! - Execution-time errors are faults (see [`crate::sim::Fault`]) and stop the simulator.

use std::borrow::Cow;
use std::ops::Range;

use serde::Serialize;

pub use crate::parse::lex::LexErr;
pub use crate::parse::{ParseErr, ParseErrKind};
pub use crate::asm::{AsmErr, AsmErrKind};
pub use crate::sim::SimErr;
pub use crate::sim::mem::{HeapErr, MemErr};

use crate::asm::SourceInfo;

/// Unified error interface for all errors in this crate.
///
/// Note that the [`Display`] implementation is used for a brief message,
/// where as [`Error::help`] is used for any clarifying messages.
///
/// [`Display`]: std::fmt::Display
pub trait Error: std::error::Error {
    /// The range where this error occurs in source.
    ///
    /// If this is not known, this can be set to `None`.
    fn span(&self) -> Option<ErrSpan> {
        None
    }

    /// A clarifying message to help aid someone in how to fix the message.
    ///
    /// If there is none to add, this can be set to `None`.
    fn help(&self) -> Option<Cow<str>>;
}

/// The source span of an error.
///
/// An error can point to one or several locations in source.
/// The first range is considered the primary location of the error.
#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub enum ErrSpan {
    /// One contiguous span.
    One(Range<usize>),
    /// Two contiguous spans.
    Two([Range<usize>; 2]),
    /// Three or more contiguous spans.
    ///
    /// This should always have at least 3 elements.
    Many(Vec<Range<usize>>)
}
impl ErrSpan {
    /// Gets the primary (first) range of this span.
    pub fn first(&self) -> Option<Range<usize>> {
        match self {
            ErrSpan::One(r) => Some(r.clone()),
            ErrSpan::Two([r, _]) => Some(r.clone()),
            ErrSpan::Many(rs) => rs.first().cloned(),
        }
    }

    /// Gets an iterator over all of the ranges of this span.
    pub fn iter(&self) -> impl Iterator<Item=&Range<usize>> {
        match self {
            ErrSpan::One(r) => std::slice::from_ref(r).iter(),
            ErrSpan::Two(r) => r.iter(),
            ErrSpan::Many(r) => r.iter(),
        }
    }
}
impl From<Range<usize>> for ErrSpan {
    fn from(value: Range<usize>) -> Self {
        ErrSpan::One(value)
    }
}
impl From<[Range<usize>; 2]> for ErrSpan {
    fn from(value: [Range<usize>; 2]) -> Self {
        ErrSpan::Two(value)
    }
}
impl From<Vec<Range<usize>>> for ErrSpan {
    fn from(mut value: Vec<Range<usize>>) -> Self {
        match value.len() {
            1 => ErrSpan::One(value.remove(0)),
            2 => {
                let second = value.remove(1);
                ErrSpan::Two([value.remove(0), second])
            },
            _ => ErrSpan::Many(value)
        }
    }
}

/// Sentinel value for a [`Problem`] which is not associated with any line.
pub const NO_LINE: i64 = -1;

/// Where a [`Problem`] is located in source.
///
/// A location is never partially populated:
/// a character range is only ever present together with its line.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum ProblemLocation {
    /// The problem is not associated with any part of the source.
    None,
    /// The problem is associated with a line (1-indexed).
    Line(usize),
    /// The problem is associated with a range of characters.
    ///
    /// `start` and `end` are absolute character offsets into the source (0-indexed),
    /// and are both inclusive.
    Range {
        /// The line (1-indexed) the range starts on.
        line: usize,
        /// First character of the range.
        start: usize,
        /// Last character of the range.
        end: usize
    }
}
impl ProblemLocation {
    /// Creates a range location.
    ///
    /// If `end` precedes `start`, the range collapses to the single point `start`.
    pub fn range(line: usize, start: usize, end: usize) -> Self {
        ProblemLocation::Range { line, start, end: end.max(start) }
    }

    /// The line of this location, or [`NO_LINE`] if there is none.
    pub fn line(&self) -> i64 {
        match *self {
            ProblemLocation::None => NO_LINE,
            ProblemLocation::Line(line) => line as i64,
            ProblemLocation::Range { line, .. } => line as i64,
        }
    }

    /// The inclusive character range of this location, or `(-1, -1)` if there is none.
    pub fn char_range(&self) -> (i64, i64) {
        match *self {
            ProblemLocation::Range { start, end, .. } => (start as i64, end as i64),
            _ => (-1, -1)
        }
    }
}

/// A problem found in assembly source code.
///
/// Problems are collected during assembly instead of aborting it,
/// so that every issue in a source file can be reported at once.
/// A problem consists of a human readable message and its location in source
/// (see [`ProblemLocation`]).
///
/// # Example
///
/// ```
/// use mips_ensemble::err::{Problem, ProblemLocation, NO_LINE};
///
/// let p = Problem::new("label was never defined", ProblemLocation::range(3, 21, 24));
/// assert_eq!(p.line(), 3);
/// assert_eq!(p.range_start(), 21);
/// assert_eq!(p.range_end(), 24);
///
/// let p = Problem::new("program has no instructions", ProblemLocation::None);
/// assert_eq!(p.line(), NO_LINE);
/// assert_eq!((p.range_start(), p.range_end()), (-1, -1));
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Serialize)]
#[serde(into = "ProblemRecord")]
pub struct Problem {
    message: String,
    help: Option<String>,
    location: ProblemLocation
}
impl Problem {
    /// Creates a new problem.
    pub fn new(message: impl Into<String>, location: ProblemLocation) -> Self {
        Self { message: message.into(), help: None, location }
    }

    /// Creates a problem spanning the provided byte range of the source.
    ///
    /// The line is computed from the start of the span.
    /// An empty span is collapsed into a single character.
    pub fn from_span(message: impl Into<String>, span: Range<usize>, src: &SourceInfo) -> Self {
        let (line, _) = src.get_pos_pair(span.start);
        let start = src.char_index(span.start);
        let end = match span.is_empty() {
            true  => start,
            false => src.char_index(span.end).saturating_sub(1),
        };

        Self::new(message, ProblemLocation::range(line + 1, start, end))
    }

    /// Creates a problem from one of this crate's errors.
    ///
    /// This uses the primary span of the error (if it exists) as the problem's location
    /// and attaches the error's help message.
    pub fn from_error<E: Error + ?Sized>(err: &E, src: &SourceInfo) -> Self {
        let mut problem = match err.span().and_then(|s| s.first()) {
            Some(span) => Self::from_span(err.to_string(), span, src),
            None => Self::new(err.to_string(), ProblemLocation::None),
        };
        problem.help = err.help().map(Cow::into_owned);
        problem
    }

    /// Attaches a help message to this problem.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    /// The human readable description of this problem.
    pub fn message(&self) -> &str {
        &self.message
    }
    /// A clarifying message, if one exists.
    pub fn help(&self) -> Option<&str> {
        self.help.as_deref()
    }
    /// The location of this problem.
    pub fn location(&self) -> ProblemLocation {
        self.location
    }
    /// The line (1-indexed) of this problem, or [`NO_LINE`].
    pub fn line(&self) -> i64 {
        self.location.line()
    }
    /// The first character of this problem's range, or -1.
    pub fn range_start(&self) -> i64 {
        self.location.char_range().0
    }
    /// The last character of this problem's range (inclusive), or -1.
    pub fn range_end(&self) -> i64 {
        self.location.char_range().1
    }

    /// Key used to order problems by where they appear in source.
    pub(crate) fn source_order(&self) -> (bool, i64, i64) {
        (self.line() == NO_LINE, self.line(), self.range_start())
    }
}
impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.location {
            ProblemLocation::None => {},
            ProblemLocation::Line(line) => write!(f, "line {line}: ")?,
            ProblemLocation::Range { line, start, end } => write!(f, "line {line} [{start}..={end}]: ")?,
        }
        f.write_str(&self.message)
    }
}

/// Serialized form of a [`Problem`], as consumed by editor tooling.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProblemRecord {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    help: Option<String>,
    line: i64,
    range_start: i64,
    range_end: i64
}
impl From<Problem> for ProblemRecord {
    fn from(value: Problem) -> Self {
        let (range_start, range_end) = value.location.char_range();
        ProblemRecord {
            line: value.location.line(),
            message: value.message,
            help: value.help,
            range_start,
            range_end,
        }
    }
}

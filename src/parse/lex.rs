//! Tokenizing MIPS assembly.
//!
//! This module holds the tokens that characterize MIPS assembly ([`Token`]).
//! This module is used by the parser to facilitate the conversion of
//! assembly source code into an AST.
//!
//! The module's key data structure is the [`Token`] enum,
//! which lists all of the tokens of MIPS assembly.

use std::num::IntErrorKind;

use logos::{Lexer, Logos};

use crate::ast::Reg;

/// A unit of information in MIPS source code.
#[derive(Debug, Logos, PartialEq, Eq, Clone)]
#[logos(skip r"[ \t\r]+", error = LexErr)]
pub enum Token {
    // Note, these regexes span over tokens that are technically invalid
    // (e.g., 23trst matches for unsigned even though it shouldn't).
    // This is intended.
    // These regexes collect what would be considered one discernable unit
    // and validates it using the validator function.

    /// An unsigned numeric value (e.g., `9`, `0x7F`, `'a'`, etc.)
    #[regex(r"\d\w*", lex_unsigned)]
    #[token("'", lex_char_literal)]
    Unsigned(u32),

    /// A signed numeric value (e.g., `-9`, `-0x7F`, etc.)
    #[regex(r"-\d\w*", lex_signed)]
    Signed(i32),

    /// A register (e.g., `$t0`, `$sp`, `$31`)
    #[regex(r"\$\w*", lex_reg)]
    Reg(Reg),

    /// An identifier.
    ///
    /// This can refer to either:
    /// - a label (e.g., `main`, `loop`, `end_if`)
    /// - an instruction (e.g. `add`, `lw`, `syscall`)
    #[regex(r"[A-Za-z_][\w.]*", |lx| lx.slice().to_string())]
    Ident(String),

    /// A directive (e.g., `.data`, `.word`).
    ///
    /// The directive is stored without its leading dot and in lowercase.
    #[regex(r"\.[A-Za-z_]\w*", |lx| lx.slice()[1..].to_lowercase())]
    Directive(String),

    /// A string literal (e.g., `"Hello!"`)
    #[token("\"", lex_str_literal)]
    String(String),

    /// A colon, which appears after labels
    #[token(":")]
    Colon,

    /// A comma, which delineate operands of an instruction
    #[token(",")]
    Comma,

    /// An open parenthesis, which starts the base register of a memory operand
    #[token("(")]
    LParen,

    /// A close parenthesis, which ends the base register of a memory operand
    #[token(")")]
    RParen,

    /// A plus sign, which can add an offset to a label
    #[token("+")]
    Plus,

    /// A comment, which starts with a hash and spans the remaining part of the line.
    #[regex(r"#.*")]
    Comment,

    /// A new line
    #[token("\n")]
    NewLine
}
impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Unsigned(n)  => write!(f, "integer {n}"),
            Token::Signed(n)    => write!(f, "integer {n}"),
            Token::Reg(r)       => write!(f, "register {r}"),
            Token::Ident(s)     => write!(f, "identifier {s}"),
            Token::Directive(d) => write!(f, "directive .{d}"),
            Token::String(_)    => f.write_str("string literal"),
            Token::Colon        => f.write_str("':'"),
            Token::Comma        => f.write_str("','"),
            Token::LParen       => f.write_str("'('"),
            Token::RParen       => f.write_str("')'"),
            Token::Plus         => f.write_str("'+'"),
            Token::Comment      => f.write_str("comment"),
            Token::NewLine      => f.write_str("end of line"),
        }
    }
}

/// Any errors raised in attempting to tokenize an input stream.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum LexErr {
    /// Numeric literal (unsigned dec or hex) cannot fit within the range of a u32
    DoesNotFitU32,
    /// Numeric literal (signed dec or hex) cannot fit within the range of a i32
    DoesNotFitI32,
    /// Hex literal (starting with 0x) has invalid hex digits
    InvalidHex,
    /// Numeric literal could not be parsed as a decimal literal because it has invalid digits (i.e., not 0-9)
    InvalidNumeric,
    /// Hex literal (starting with 0x) doesn't have digits after it.
    InvalidHexEmpty,
    /// Int parsing failed but the reason why is unknown
    UnknownIntErr,
    /// String literal is missing an end quotation mark.
    UnclosedStrLit,
    /// Character literal is not a single character surrounded by single quotes.
    InvalidCharLit,
    /// Token had the format $name, but name isn't a register.
    InvalidReg,
    /// A symbol was used which is not allowed in MIPS assembly files
    #[default]
    InvalidSymbol
}
impl std::fmt::Display for LexErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LexErr::DoesNotFitU32   => f.write_str("numeric token does not fit 32-bit unsigned integer"),
            LexErr::DoesNotFitI32   => f.write_str("numeric token does not fit 32-bit signed integer"),
            LexErr::InvalidHex      => f.write_str("invalid hex literal"),
            LexErr::InvalidNumeric  => f.write_str("invalid decimal literal"),
            LexErr::InvalidHexEmpty => f.write_str("invalid hex literal"),
            LexErr::UnknownIntErr   => f.write_str("could not parse integer"),
            LexErr::UnclosedStrLit  => f.write_str("unclosed string literal"),
            LexErr::InvalidCharLit  => f.write_str("invalid character literal"),
            LexErr::InvalidReg      => f.write_str("invalid register"),
            LexErr::InvalidSymbol   => f.write_str("unrecognized symbol"),
        }
    }
}
impl std::error::Error for LexErr {}
impl crate::err::Error for LexErr {
    fn help(&self) -> Option<std::borrow::Cow<str>> {
        match self {
            LexErr::DoesNotFitU32    => Some(format!("the range for a 32-bit unsigned integer is [{}, {}]", u32::MIN, u32::MAX).into()),
            LexErr::DoesNotFitI32    => Some(format!("the range for a 32-bit signed integer is [{}, {}]", i32::MIN, i32::MAX).into()),
            LexErr::InvalidHex       => Some("a hex literal starts with '0x' and consists of 0-9, A-F".into()),
            LexErr::InvalidNumeric   => Some("a decimal literal only consists of digits 0-9".into()),
            LexErr::InvalidHexEmpty  => Some("there should be hex digits (0-9, A-F) here".into()),
            LexErr::UnknownIntErr    => None,
            LexErr::UnclosedStrLit   => Some("add a quote to the end of the string literal".into()),
            LexErr::InvalidCharLit   => Some("a character literal holds exactly one character, such as 'a' or '\\n'".into()),
            LexErr::InvalidReg       => Some("registers are $0-$31 or named, such as $t0, $sp, $ra".into()),
            LexErr::InvalidSymbol    => Some("this char does not occur in any token in MIPS assembly".into()),
        }
    }
}
/// Helper that converts an int error kind to its corresponding LexErr, based on the provided inputs.
fn convert_int_error(
    e: &std::num::IntErrorKind,
    invalid_digits_err: LexErr,
    empty_err: LexErr,
    overflow_err: LexErr
) -> LexErr {
    match e {
        IntErrorKind::Empty        => empty_err,
        IntErrorKind::InvalidDigit => invalid_digits_err,
        IntErrorKind::PosOverflow  => overflow_err,
        IntErrorKind::NegOverflow  => overflow_err,
        _ => LexErr::UnknownIntErr,
    }
}
fn parse_unsigned(s: &str) -> Result<u32, LexErr> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16)
            .map_err(|e| convert_int_error(e.kind(), LexErr::InvalidHex, LexErr::InvalidHexEmpty, LexErr::DoesNotFitU32)),
        None => s.parse::<u32>()
            .map_err(|e| convert_int_error(e.kind(), LexErr::InvalidNumeric, LexErr::InvalidNumeric, LexErr::DoesNotFitU32)),
    }
}
fn lex_unsigned(lx: &Lexer<'_, Token>) -> Result<u32, LexErr> {
    parse_unsigned(lx.slice())
}
fn lex_signed(lx: &Lexer<'_, Token>) -> Result<i32, LexErr> {
    let Some(magnitude) = lx.slice().strip_prefix('-') else {
        unreachable!("Lexer slice should have started with -");
    };

    // Parse magnitude as u32 so -2147483648 can be represented.
    let n = parse_unsigned(magnitude).map_err(|e| match e {
        LexErr::DoesNotFitU32 => LexErr::DoesNotFitI32,
        e => e
    })?;
    match n <= i32::MIN.unsigned_abs() {
        true  => Ok((n as i32).wrapping_neg()),
        false => Err(LexErr::DoesNotFitI32),
    }
}
fn lex_reg(lx: &Lexer<'_, Token>) -> Result<Reg, LexErr> {
    Reg::from_name(lx.slice()).ok_or(LexErr::InvalidReg)
}

/// Computes the character an escape sequence (the character after the backslash) represents.
///
/// Unknown escapes are `None`.
fn unescape(c: char) -> Option<char> {
    match c {
        'n'  => Some('\n'),
        'r'  => Some('\r'),
        't'  => Some('\t'),
        '0'  => Some('\0'),
        '\\' => Some('\\'),
        '"'  => Some('"'),
        '\'' => Some('\''),
        _ => None
    }
}
fn lex_char_literal(lx: &mut Lexer<'_, Token>) -> Result<u32, LexErr> {
    let rem = lx.remainder();
    let mut chars = rem.chars();

    let (value, consumed) = match chars.next() {
        Some('\\') => {
            let esc = chars.next().ok_or(LexErr::InvalidCharLit)?;
            (unescape(esc).ok_or(LexErr::InvalidCharLit)?, 1 + esc.len_utf8())
        },
        Some('\n' | '\'') | None => return Err(LexErr::InvalidCharLit),
        Some(c) => (c, c.len_utf8()),
    };

    match rem[consumed..].starts_with('\'') {
        true => {
            lx.bump(consumed + 1);
            Ok(u32::from(value))
        },
        false => Err(LexErr::InvalidCharLit)
    }
}
fn lex_str_literal(lx: &mut Lexer<'_, Token>) -> Result<String, LexErr> {
    let rem = lx.remainder()
        .lines()
        .next()
        .unwrap_or("");

    // Find the unescaped end quote, unescaping the literal along the way.
    let mut buf = String::with_capacity(rem.len());
    let mut chars = rem.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => {
                lx.bump(i + 1);
                return Ok(buf);
            },
            '\\' => match chars.next() {
                Some((_, esc)) => match unescape(esc) {
                    Some(u) => buf.push(u),
                    None => {
                        buf.push('\\');
                        buf.push(esc);
                    }
                },
                None => buf.push('\\'),
            },
            c => buf.push(c)
        }
    }

    lx.bump(rem.len());
    Err(LexErr::UnclosedStrLit)
}

#[cfg(test)]
mod tests {
    use logos::Logos;

    use crate::ast::reg_consts::{A0, RA, SP, T0, T9, ZERO};
    use crate::ast::Reg;
    use crate::err::LexErr;
    use crate::parse::lex::Token;

    fn ident(s: &str) -> Token {
        Token::Ident(s.to_string())
    }
    fn directive(s: &str) -> Token {
        Token::Directive(s.to_string())
    }
    fn str_literal(s: &str) -> Token {
        Token::String(s.to_string())
    }

    #[test]
    fn test_numeric_dec_success() {
        let mut tokens = Token::lexer("0 123 456 4294967295");
        assert_eq!(tokens.next(), Some(Ok(Token::Unsigned(0))));
        assert_eq!(tokens.next(), Some(Ok(Token::Unsigned(123))));
        assert_eq!(tokens.next(), Some(Ok(Token::Unsigned(456))));
        assert_eq!(tokens.next(), Some(Ok(Token::Unsigned(u32::MAX))));
        assert_eq!(tokens.next(), None);

        let mut tokens = Token::lexer("-123 -2147483648");
        assert_eq!(tokens.next(), Some(Ok(Token::Signed(-123))));
        assert_eq!(tokens.next(), Some(Ok(Token::Signed(i32::MIN))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_numeric_hex_success() {
        let mut tokens = Token::lexer("0x10010000 0XFF 0xabcd -0x10");
        assert_eq!(tokens.next(), Some(Ok(Token::Unsigned(0x1001_0000))));
        assert_eq!(tokens.next(), Some(Ok(Token::Unsigned(0xFF))));
        assert_eq!(tokens.next(), Some(Ok(Token::Unsigned(0xABCD))));
        assert_eq!(tokens.next(), Some(Ok(Token::Signed(-0x10))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_numeric_invalid() {
        assert_eq!(Token::lexer("4294967296").next(), Some(Err(LexErr::DoesNotFitU32)));
        assert_eq!(Token::lexer("-2147483649").next(), Some(Err(LexErr::DoesNotFitI32)));
        assert_eq!(Token::lexer("0x123456789").next(), Some(Err(LexErr::DoesNotFitU32)));
        assert_eq!(Token::lexer("3Q").next(), Some(Err(LexErr::InvalidNumeric)));
        assert_eq!(Token::lexer("0xZZ").next(), Some(Err(LexErr::InvalidHex)));
        assert_eq!(Token::lexer("0x").next(), Some(Err(LexErr::InvalidHexEmpty)));
    }

    #[test]
    fn test_char_literal() {
        let mut tokens = Token::lexer(r"'a' '\n' ' '");
        assert_eq!(tokens.next(), Some(Ok(Token::Unsigned(u32::from(b'a')))));
        assert_eq!(tokens.next(), Some(Ok(Token::Unsigned(u32::from(b'\n')))));
        assert_eq!(tokens.next(), Some(Ok(Token::Unsigned(u32::from(b' ')))));
        assert_eq!(tokens.next(), None);

        assert_eq!(Token::lexer("'ab'").next(), Some(Err(LexErr::InvalidCharLit)));
        assert_eq!(Token::lexer("''").next(), Some(Err(LexErr::InvalidCharLit)));
    }

    #[test]
    fn test_regs() {
        let mut tokens = Token::lexer("$zero $t0 $8 $sp $ra $a0 $t9 $fp $s8");
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(ZERO))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(T0))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(T0))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(SP))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(RA))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(A0))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(T9))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(Reg::try_from(30).unwrap()))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(Reg::try_from(30).unwrap()))));
        assert_eq!(tokens.next(), None);

        assert_eq!(Token::lexer("$32").next(), Some(Err(LexErr::InvalidReg)));
        assert_eq!(Token::lexer("$t10").next(), Some(Err(LexErr::InvalidReg)));
        assert_eq!(Token::lexer("$").next(), Some(Err(LexErr::InvalidReg)));
    }

    #[test]
    fn test_str() {
        let mut tokens = Token::lexer(r#" "" "abc" "Hello, World!\n" "say \"hi\"" "#);
        assert_eq!(tokens.next(), Some(Ok(str_literal(""))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("abc"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("Hello, World!\n"))));
        assert_eq!(tokens.next(), Some(Ok(str_literal("say \"hi\""))));
        assert_eq!(tokens.next(), None);

        assert_eq!(Token::lexer(r#""\e""#).next(), Some(Ok(str_literal("\\e"))));
    }

    #[test]
    fn test_str_unclosed() {
        assert_eq!(Token::lexer(r#"""#).next(), Some(Err(LexErr::UnclosedStrLit)));

        // An unclosed string does not swallow the next line.
        let mut tokens = Token::lexer("\"abc\nnop");
        assert_eq!(tokens.next(), Some(Err(LexErr::UnclosedStrLit)));
        assert_eq!(tokens.next(), Some(Ok(Token::NewLine)));
        assert_eq!(tokens.next(), Some(Ok(ident("nop"))));
    }

    #[test]
    fn test_idents_directives() {
        let mut tokens = Token::lexer("main: addi .data .ASCIIZ loop.end");
        assert_eq!(tokens.next(), Some(Ok(ident("main"))));
        assert_eq!(tokens.next(), Some(Ok(Token::Colon)));
        assert_eq!(tokens.next(), Some(Ok(ident("addi"))));
        assert_eq!(tokens.next(), Some(Ok(directive("data"))));
        assert_eq!(tokens.next(), Some(Ok(directive("asciiz"))));
        assert_eq!(tokens.next(), Some(Ok(ident("loop.end"))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_punct() {
        let mut tokens = Token::lexer("lw $t0, 4($sp) # load\r\nx+4");
        assert_eq!(tokens.next(), Some(Ok(ident("lw"))));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(T0))));
        assert_eq!(tokens.next(), Some(Ok(Token::Comma)));
        assert_eq!(tokens.next(), Some(Ok(Token::Unsigned(4))));
        assert_eq!(tokens.next(), Some(Ok(Token::LParen)));
        assert_eq!(tokens.next(), Some(Ok(Token::Reg(SP))));
        assert_eq!(tokens.next(), Some(Ok(Token::RParen)));
        assert_eq!(tokens.next(), Some(Ok(Token::Comment)));
        assert_eq!(tokens.next(), Some(Ok(Token::NewLine)));
        assert_eq!(tokens.next(), Some(Ok(ident("x"))));
        assert_eq!(tokens.next(), Some(Ok(Token::Plus)));
        assert_eq!(tokens.next(), Some(Ok(Token::Unsigned(4))));
        assert_eq!(tokens.next(), None);
    }

    #[test]
    fn test_invalid_symbol() {
        for c in ['!', '%', '&', '*', '/', ';', '<', '=', '>', '?', '@', '[', ']', '^', '`', '{', '|', '}', '~'] {
            let string = c.to_string();
            assert_eq!(
                Token::lexer(&string).next(),
                Some(Err(LexErr::InvalidSymbol)),
                "Expected {string:?} to be an invalid symbol"
            );
        }
    }
}

//! Lexical analysis, the second compilation pass. Splits a validated
//! line into fields, classifies each by fixed precedence, and converts
//! literals into machine representation (two's-complement words,
//! minifloat bits). Field offsets are kept for editor highlighting.

use super::{
    is_address_field, is_decimal_field, is_floating_field, is_identifier_field,
    is_register_field, is_ws,
};
use crate::spec::arch::{ArchParams, RegId, Word};
use crate::vm::alu;
use crate::vm::float::Fpu;
use std::fmt::{self, Display};
use strum_macros::Display as StrumDisplay;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Separator,
    Decimal(Word),
    Floating(Word),
    Register(RegId),
    Address(u64),
    LabelDef(String),
    Name(String),
}

impl Token {
    pub fn kind(&self) -> TokenKind {
        match self {
            Token::Separator => TokenKind::Separator,
            Token::Decimal(_) => TokenKind::Decimal,
            Token::Floating(_) => TokenKind::Floating,
            Token::Register(_) => TokenKind::Register,
            Token::Address(_) => TokenKind::Address,
            Token::LabelDef(_) => TokenKind::Label,
            Token::Name(_) => TokenKind::Identifier,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
pub enum TokenKind {
    #[strum(serialize = "separator")]
    Separator,
    #[strum(serialize = "decimal")]
    Decimal,
    #[strum(serialize = "floating")]
    Floating,
    #[strum(serialize = "register")]
    Register,
    #[strum(serialize = "address")]
    Address,
    #[strum(serialize = "label")]
    Label,
    #[strum(serialize = "identifier")]
    Identifier,
    #[strum(serialize = "label identifier")]
    LabelId,
    #[strum(serialize = "comment")]
    Comment,
    #[strum(serialize = "whitespace")]
    Whitespace,
    #[strum(serialize = "unknown")]
    Error,
}

/// The extent and classification of one field, for highlighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub offset: usize,
    pub len: usize,
    pub kind: TokenKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    DecimalBelowMin { value: i128, min: i64 },
    DecimalAboveMax { value: i128, max: i64 },
    InvalidDecimal,
    FloatingNeedsExtensions,
    RegisterOutOfRange(u64),
    InvalidRegister,
    AddressAboveMax { value: u64, max: u64 },
    InvalidAddress,
    Unclassifiable(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DecimalBelowMin { value, min } => write!(
                f,
                "Architecture error: Constant {} below word minimum of {}",
                value, min
            ),
            Error::DecimalAboveMax { value, max } => write!(
                f,
                "Architecture error: Constant {} above word maximum of {}",
                value, max
            ),
            Error::InvalidDecimal => write!(f, "Syntax error: Invalid decimal. Not a number"),
            Error::FloatingNeedsExtensions => write!(
                f,
                "Architecture error: Floating point numbers need extensions enabled"
            ),
            Error::RegisterOutOfRange(n) => {
                write!(f, "Semantic error: Invalid register number {}", n)
            }
            Error::InvalidRegister => {
                write!(f, "Syntax error: Invalid register number. Not a number")
            }
            Error::AddressAboveMax { value, max } => write!(
                f,
                "Architecture error: Constant address {} above address maximum of {}",
                value, max
            ),
            Error::InvalidAddress => write!(f, "Syntax error: Invalid address. Not a number"),
            Error::Unclassifiable(field) => write!(
                f,
                "Syntax error: Cannot classify field {} as any of the known tokens",
                field
            ),
        }
    }
}

/// The classifier's verdict on one line. When any field is in error the
/// token stream is withheld; diagnostics take priority over partial
/// results. Spans are produced either way.
#[derive(Debug, Clone, PartialEq)]
pub struct LineAnalysis {
    pub tokens: Vec<Token>,
    pub spans: Vec<Span>,
    pub errors: Vec<Error>,
}

enum Field {
    Token(Token),
    Skip(TokenKind),
}

pub fn analyze(line: &str, arch: &ArchParams, fpu: &Fpu, extensions: bool) -> LineAnalysis {
    let mut tokens = Vec::new();
    let mut spans = Vec::new();
    let mut errors = Vec::new();

    for (offset, field) in split_fields(line) {
        let kind = match classify(field, arch, fpu, extensions) {
            Ok(Field::Token(token)) => {
                let kind = token.kind();
                tokens.push(token);
                kind
            }
            Ok(Field::Skip(kind)) => kind,
            Err(e) => {
                errors.push(e);
                TokenKind::Error
            }
        };
        spans.push(Span {
            offset,
            len: field.len(),
            kind,
        });
    }

    if !errors.is_empty() {
        tokens.clear();
    }
    LineAnalysis {
        tokens,
        spans,
        errors,
    }
}

/// Cut a line into fields: commas, whitespace runs, a trailing comment,
/// and everything in between.
fn split_fields(line: &str) -> Vec<(usize, &str)> {
    let mut fields = Vec::new();
    let mut offset = 0;
    let mut rest = line;

    while !rest.is_empty() {
        let len = if rest.starts_with(';') {
            rest.len()
        } else if rest.starts_with(',') {
            1
        } else if rest.starts_with(is_ws) {
            rest.find(|c: char| !is_ws(c)).unwrap_or_else(|| rest.len())
        } else {
            rest.find(|c: char| is_ws(c) || c == ',' || c == ';')
                .unwrap_or_else(|| rest.len())
        };

        fields.push((offset, &rest[..len]));
        offset += len;
        rest = &rest[len..];
    }

    fields
}

fn classify(field: &str, arch: &ArchParams, fpu: &Fpu, extensions: bool) -> Result<Field, Error> {
    if field == "," {
        Ok(Field::Token(Token::Separator))
    } else if is_decimal_field(field) {
        match field[1..].parse::<i128>() {
            Ok(v) if v < arch.int_min as i128 => Err(Error::DecimalBelowMin {
                value: v,
                min: arch.int_min,
            }),
            Ok(v) if v > arch.int_max as i128 => Err(Error::DecimalAboveMax {
                value: v,
                max: arch.int_max,
            }),
            Ok(v) => Ok(Field::Token(Token::Decimal(alu::from_signed(
                v as i64,
                arch.word_len,
            )))),
            Err(_) => Err(Error::InvalidDecimal),
        }
    } else if is_floating_field(field) {
        if !extensions {
            return Err(Error::FloatingNeedsExtensions);
        }
        match field[1..].parse::<f64>() {
            Ok(v) => Ok(Field::Token(Token::Floating(fpu.encode(v)))),
            Err(_) => Err(Error::Unclassifiable(field.to_owned())),
        }
    } else if is_register_field(field) {
        match field[1..].parse::<u64>() {
            Ok(n) if n <= 12 => Ok(Field::Token(Token::Register(n as RegId))),
            Ok(n) => Err(Error::RegisterOutOfRange(n)),
            Err(_) => Err(Error::InvalidRegister),
        }
    } else if is_address_field(field) {
        match field.parse::<u64>() {
            Ok(v) => match arch.addr_max {
                Some(max) if v > max => Err(Error::AddressAboveMax { value: v, max }),
                _ => Ok(Field::Token(Token::Address(v))),
            },
            Err(_) => Err(Error::InvalidAddress),
        }
    } else if field.ends_with(':') && is_identifier_field(&field[..field.len() - 1]) {
        Ok(Field::Token(Token::LabelDef(
            field[..field.len() - 1].to_owned(),
        )))
    } else if is_identifier_field(field) {
        Ok(Field::Token(Token::Name(field.to_owned())))
    } else if field.chars().all(is_ws) {
        Ok(Field::Skip(TokenKind::Whitespace))
    } else if field.starts_with(';') {
        Ok(Field::Skip(TokenKind::Comment))
    } else {
        Err(Error::Unclassifiable(field.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arch() -> ArchParams {
        ArchParams::new(1, 256).unwrap()
    }

    fn run(line: &str, arch: &ArchParams, extensions: bool) -> LineAnalysis {
        let fpu = Fpu::new(arch.bytes_per_word);
        analyze(line, arch, &fpu, extensions)
    }

    #[test]
    fn classifies_an_instruction_line() {
        let a = run("\tMOV R0, #5", &arch(), false);
        assert!(a.errors.is_empty());
        assert_eq!(
            a.tokens,
            vec![
                Token::Name("MOV".to_owned()),
                Token::Register(0),
                Token::Separator,
                Token::Decimal(5),
            ]
        );
    }

    #[test]
    fn negative_decimals_are_twos_complement() {
        let a = run("\tMOV R0, #-1", &arch(), false);
        assert_eq!(a.tokens[3], Token::Decimal(255));
    }

    #[test]
    fn decimal_range_is_signed() {
        let a = run("#200", &arch(), false);
        assert_eq!(
            a.errors,
            vec![Error::DecimalAboveMax {
                value: 200,
                max: 127
            }]
        );
        assert_eq!(
            a.errors[0].to_string(),
            "Architecture error: Constant 200 above word maximum of 127"
        );
        assert!(a.tokens.is_empty());

        let a = run("#-200", &arch(), false);
        assert_eq!(
            a.errors,
            vec![Error::DecimalBelowMin {
                value: -200,
                min: -128
            }]
        );
    }

    #[test]
    fn floats_require_extensions() {
        let a = run("#1.5", &arch(), false);
        assert_eq!(a.errors, vec![Error::FloatingNeedsExtensions]);
    }

    #[test]
    fn float_literals_encode_to_minifloat_bits() {
        let arch = ArchParams::new(2, 256).unwrap();
        let fpu = Fpu::new(2);

        let a = run("#1.5", &arch, true);
        assert_eq!(a.tokens, vec![Token::Floating(fpu.encode(1.5))]);

        let a = run("#-0.0", &arch, true);
        assert_eq!(a.tokens, vec![Token::Floating(fpu.neg_zero())]);

        let a = run("#nan", &arch, true);
        assert_eq!(a.tokens, vec![Token::Floating(fpu.nan())]);

        let a = run("#-inf", &arch, true);
        assert_eq!(a.tokens, vec![Token::Floating(fpu.neg_inf())]);
    }

    #[test]
    fn register_bounds() {
        let a = run("R12", &arch(), false);
        assert_eq!(a.tokens, vec![Token::Register(12)]);

        let a = run("R13", &arch(), false);
        assert_eq!(a.errors, vec![Error::RegisterOutOfRange(13)]);
        assert_eq!(
            a.errors[0].to_string(),
            "Semantic error: Invalid register number 13"
        );
    }

    #[test]
    fn addresses_are_unbounded_by_default() {
        let a = run("9999", &arch(), false);
        assert_eq!(a.tokens, vec![Token::Address(9999)]);

        let mut bounded = arch();
        bounded.addr_max = Some(255);
        let a = run("9999", &bounded, false);
        assert_eq!(
            a.errors,
            vec![Error::AddressAboveMax {
                value: 9999,
                max: 255
            }]
        );
    }

    #[test]
    fn labels_and_comments() {
        let a = run("loop:\tADD r0, r0, #1 ; bump", &arch(), false);
        assert!(a.errors.is_empty());
        assert_eq!(a.tokens[0], Token::LabelDef("loop".to_owned()));
        assert_eq!(a.tokens[1], Token::Name("ADD".to_owned()));
        // The comment shows up only as a span.
        assert!(a.spans.iter().any(|s| s.kind == TokenKind::Comment));
        assert!(!a.tokens.iter().any(|t| t.kind() == TokenKind::Comment));
    }

    #[test]
    fn spans_carry_field_offsets() {
        let a = run("\tMOV R0, #5", &arch(), false);
        let kinds: Vec<(usize, TokenKind)> =
            a.spans.iter().map(|s| (s.offset, s.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (0, TokenKind::Whitespace),
                (1, TokenKind::Identifier),
                (4, TokenKind::Whitespace),
                (5, TokenKind::Register),
                (7, TokenKind::Separator),
                (8, TokenKind::Whitespace),
                (9, TokenKind::Decimal),
            ]
        );
    }

    #[test]
    fn unclassifiable_field() {
        let a = run("#x", &arch(), false);
        assert_eq!(a.errors, vec![Error::Unclassifiable("#x".to_owned())]);
        assert_eq!(
            a.errors[0].to_string(),
            "Syntax error: Cannot classify field #x as any of the known tokens"
        );
    }

    #[test]
    fn errors_suppress_tokens() {
        let a = run("\tMOV R0, #500", &arch(), false);
        assert!(!a.errors.is_empty());
        assert!(a.tokens.is_empty());
        // Spans are still complete for highlighting.
        assert_eq!(a.spans.len(), 7);
    }
}

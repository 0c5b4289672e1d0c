//! Parsing, the final compilation pass: resolve labels, enforce the
//! opcode/operand structure, pick the matching overload, and build one
//! executable record per line.

use super::tokenize::{Token, TokenKind};
use crate::spec::isa::{self, Op, Operand, OperandKind};
use std::collections::HashMap;
use std::fmt::{self, Display};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    /// 1-based source line.
    pub line: usize,
    pub kind: ErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    DuplicateLabel(String),
    ExpectedOpcode,
    ExpectedOperand,
    ExpectedSeparator,
    UndeclaredOpcode(String),
    OperandCount { expected: usize, got: usize },
    OperandMismatch {
        expected: Vec<OperandKind>,
        got: TokenKind,
        pos: usize,
    },
    UndeclaredLabel(String),
    ExtensionsDisabled,
}

/// The diagnostic family a parse error is reported under; the
/// conductor uses it to pick the line-framing format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Syntax,
    Semantic,
    Architecture,
}

impl ErrorKind {
    pub fn class(&self) -> Class {
        match self {
            ErrorKind::ExpectedOpcode
            | ErrorKind::ExpectedOperand
            | ErrorKind::ExpectedSeparator => Class::Syntax,
            ErrorKind::ExtensionsDisabled => Class::Architecture,
            _ => Class::Semantic,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::DuplicateLabel(name) => write!(f, "Label '{}' already exists", name),
            ErrorKind::ExpectedOpcode => write!(f, "Expected opcode identifier"),
            ErrorKind::ExpectedOperand => write!(f, "Expected operand"),
            ErrorKind::ExpectedSeparator => write!(f, "Expected separator"),
            ErrorKind::UndeclaredOpcode(name) => {
                write!(f, "Attempt to parse undeclared opcode '{}'", name)
            }
            ErrorKind::OperandCount { expected, got } => {
                write!(f, "Expected {} operand(s), got {}", expected, got)
            }
            ErrorKind::OperandMismatch { expected, got, pos } => {
                let expected: Vec<String> =
                    expected.iter().map(OperandKind::to_string).collect();
                write!(
                    f,
                    "Expected a {}, got a {} in operand number {}",
                    expected.join(" or "),
                    got,
                    pos
                )
            }
            ErrorKind::UndeclaredLabel(name) => {
                write!(f, "Attempt to parse undeclared label '{}'", name)
            }
            ErrorKind::ExtensionsDisabled => {
                write!(f, "Attempt to use extension without language extensions enabled")
            }
        }
    }
}

pub fn parse(mut lines: Vec<Vec<Token>>, extensions: bool) -> Result<Vec<Option<Op>>, Error> {
    let labels = collect_labels(&mut lines)?;
    check_structure(&mut lines)?;

    let mut records = Vec::with_capacity(lines.len());
    for (l, tokens) in lines.iter().enumerate() {
        if tokens.is_empty() {
            records.push(None);
        } else {
            records.push(Some(build_record(l, tokens, &labels, extensions)?));
        }
    }
    Ok(records)
}

/// Register every `label:` line under its line index and strip the
/// label tokens; label-only lines become empty (no-op records).
fn collect_labels(lines: &mut [Vec<Token>]) -> Result<HashMap<String, usize>, Error> {
    let mut labels = HashMap::new();

    for (l, tokens) in lines.iter_mut().enumerate() {
        let name = match tokens.first() {
            Some(Token::LabelDef(name)) => name.clone(),
            _ => continue,
        };

        if labels.insert(name.clone(), l).is_some() {
            return Err(Error {
                line: l + 1,
                kind: ErrorKind::DuplicateLabel(name),
            });
        }
        tokens.remove(0);
    }

    Ok(labels)
}

/// Each non-empty line must be an opcode identifier followed by
/// operands at odd positions and separators at even ones; the
/// separators are stripped afterwards.
fn check_structure(lines: &mut [Vec<Token>]) -> Result<(), Error> {
    for (l, tokens) in lines.iter_mut().enumerate() {
        if tokens.is_empty() {
            continue;
        }

        let err = |kind| Error { line: l + 1, kind };

        if !matches!(tokens[0], Token::Name(_)) {
            return Err(err(ErrorKind::ExpectedOpcode));
        }
        for (t, token) in tokens.iter().enumerate().skip(1) {
            if t % 2 == 1 {
                if matches!(token, Token::Separator | Token::LabelDef(_)) {
                    return Err(err(ErrorKind::ExpectedOperand));
                }
            } else if !matches!(token, Token::Separator) {
                return Err(err(ErrorKind::ExpectedSeparator));
            }
        }

        let mut t = 0;
        tokens.retain(|_| {
            t += 1;
            t == 1 || t % 2 == 0
        });
    }

    Ok(())
}

fn build_record(
    l: usize,
    tokens: &[Token],
    labels: &HashMap<String, usize>,
    extensions: bool,
) -> Result<Op, Error> {
    let err = |kind| Error { line: l + 1, kind };

    let name = match &tokens[0] {
        Token::Name(name) => name.to_ascii_lowercase(),
        _ => unreachable!("structure pass admits only opcode-led lines"),
    };
    let def = match isa::lookup(&name) {
        Some(def) => def,
        None => return Err(err(ErrorKind::UndeclaredOpcode(name))),
    };

    let operands = &tokens[1..];
    if operands.len() != def.arity() {
        return Err(err(ErrorKind::OperandCount {
            expected: def.arity(),
            got: operands.len(),
        }));
    }

    let kinds: Vec<OperandKind> = operands.iter().map(operand_kind).collect();
    let overload = def.select(&kinds).map_err(|pos| {
        err(ErrorKind::OperandMismatch {
            expected: def.expected_at(pos),
            got: operands[pos].kind(),
            pos: pos + 1,
        })
    })?;

    if overload.is_ext() && !extensions {
        return Err(err(ErrorKind::ExtensionsDisabled));
    }

    let mut values = Vec::with_capacity(operands.len());
    for token in operands {
        values.push(match token {
            Token::Decimal(v) | Token::Floating(v) => Operand::Imm(*v),
            Token::Register(r) => Operand::Reg(*r),
            Token::Address(a) => Operand::Addr(*a),
            Token::Name(name) => match labels.get(name) {
                Some(&line) => Operand::Line(line),
                None => return Err(err(ErrorKind::UndeclaredLabel(name.clone()))),
            },
            Token::Separator | Token::LabelDef(_) => {
                unreachable!("structure pass strips separators and labels")
            }
        });
    }

    Ok(overload.build(&values))
}

fn operand_kind(token: &Token) -> OperandKind {
    match token {
        Token::Decimal(_) => OperandKind::Decimal,
        Token::Floating(_) => OperandKind::Floating,
        Token::Register(_) => OperandKind::Register,
        Token::Address(_) => OperandKind::Address,
        // A bare identifier in operand position can only be a label
        // reference.
        Token::Name(_) => OperandKind::LabelId,
        Token::Separator | Token::LabelDef(_) => {
            unreachable!("structure pass strips separators and labels")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::isa::{Cond, MemRef, Src, Target};

    fn name(s: &str) -> Token {
        Token::Name(s.to_owned())
    }

    fn label(s: &str) -> Token {
        Token::LabelDef(s.to_owned())
    }

    #[test]
    fn builds_simple_records() {
        let records = parse(
            vec![
                vec![name("MOV"), Token::Register(0), Token::Separator, Token::Decimal(5)],
                vec![],
                vec![name("HALT")],
            ],
            false,
        )
        .unwrap();
        assert_eq!(
            records,
            vec![
                Some(Op::Mov {
                    rd: 0,
                    op2: Src::Imm(5)
                }),
                None,
                Some(Op::Halt),
            ]
        );
    }

    #[test]
    fn resolves_labels_to_line_indices() {
        let records = parse(
            vec![
                vec![label("loop"), name("ADD"), Token::Register(0), Token::Separator,
                     Token::Register(0), Token::Separator, Token::Decimal(1)],
                vec![name("B"), name("loop")],
            ],
            false,
        )
        .unwrap();
        assert_eq!(
            records[1],
            Some(Op::Branch {
                cond: Cond::Always,
                target: Target::Line(0)
            })
        );
    }

    #[test]
    fn label_only_lines_are_noops() {
        let records = parse(vec![vec![label("here")], vec![name("HALT")]], false).unwrap();
        assert_eq!(records, vec![None, Some(Op::Halt)]);
    }

    #[test]
    fn duplicate_label() {
        let e = parse(vec![vec![label("x")], vec![label("x")]], false).unwrap_err();
        assert_eq!(e.line, 2);
        assert_eq!(e.kind, ErrorKind::DuplicateLabel("x".to_owned()));
        assert_eq!(e.kind.to_string(), "Label 'x' already exists");
    }

    #[test]
    fn undeclared_label() {
        let e = parse(vec![vec![name("B"), name("loop")]], false).unwrap_err();
        assert_eq!(e.line, 1);
        assert_eq!(e.kind, ErrorKind::UndeclaredLabel("loop".to_owned()));
        assert_eq!(
            e.kind.to_string(),
            "Attempt to parse undeclared label 'loop'"
        );
    }

    #[test]
    fn undeclared_opcode_is_lowercased() {
        let e = parse(vec![vec![name("FROB"), Token::Register(0)]], false).unwrap_err();
        assert_eq!(e.kind, ErrorKind::UndeclaredOpcode("frob".to_owned()));
        assert_eq!(
            e.kind.to_string(),
            "Attempt to parse undeclared opcode 'frob'"
        );
    }

    #[test]
    fn operand_count_mismatch() {
        let e = parse(vec![vec![name("MOV"), Token::Register(0)]], false).unwrap_err();
        assert_eq!(
            e.kind,
            ErrorKind::OperandCount {
                expected: 2,
                got: 1
            }
        );
        assert_eq!(e.kind.to_string(), "Expected 2 operand(s), got 1");
    }

    #[test]
    fn operand_kind_mismatch_names_position_and_kinds() {
        let e = parse(
            vec![vec![
                name("ADD"),
                Token::Register(0),
                Token::Separator,
                Token::Register(0),
                Token::Separator,
                Token::Floating(0),
            ]],
            true,
        )
        .unwrap_err();
        assert_eq!(
            e.kind.to_string(),
            "Expected a register or decimal, got a floating in operand number 3"
        );
    }

    #[test]
    fn branch_reports_label_or_register() {
        let e = parse(vec![vec![name("B"), Token::Decimal(1)]], true).unwrap_err();
        assert_eq!(
            e.kind.to_string(),
            "Expected a label identifier or register, got a decimal in operand number 1"
        );
    }

    #[test]
    fn separator_structure_is_enforced() {
        let e = parse(
            vec![vec![name("MOV"), Token::Register(0), Token::Register(1)]],
            false,
        )
        .unwrap_err();
        assert_eq!(e.kind, ErrorKind::ExpectedSeparator);

        let e = parse(
            vec![vec![name("MOV"), Token::Separator, Token::Register(1)]],
            false,
        )
        .unwrap_err();
        assert_eq!(e.kind, ErrorKind::ExpectedOperand);

        let e = parse(vec![vec![Token::Decimal(0)]], false).unwrap_err();
        assert_eq!(e.kind, ErrorKind::ExpectedOpcode);
    }

    #[test]
    fn extension_overloads_are_gated() {
        let mul = vec![
            name("MUL"),
            Token::Register(0),
            Token::Separator,
            Token::Register(1),
            Token::Separator,
            Token::Decimal(2),
        ];

        let e = parse(vec![mul.clone()], false).unwrap_err();
        assert_eq!(e.kind, ErrorKind::ExtensionsDisabled);
        assert_eq!(e.kind.class(), Class::Architecture);

        assert!(parse(vec![mul], true).is_ok());
    }

    #[test]
    fn ldr_builds_memory_operands() {
        let records = parse(
            vec![vec![name("LDR"), Token::Register(2), Token::Separator, Token::Address(40)]],
            false,
        )
        .unwrap();
        assert_eq!(
            records[0],
            Some(Op::Ldr {
                rd: 2,
                src: MemRef::Addr(40)
            })
        );
    }
}

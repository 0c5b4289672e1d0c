//! Per-line validation, the first compilation pass. A line must be one
//! of: blank, `label:`, or a tab-introduced instruction (optionally
//! label-prefixed) with comma-separated operands; a `;` comment may
//! trail any of these. Invalid lines are diagnosed by a fixed cascade
//! of narrower checks before falling back to a generic syntax error,
//! and that ordering is part of the observable behavior.

use super::{is_label_char, is_operand_field, is_ws};
use std::fmt::{self, Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    UnknownSymbol,
    MultipleLabels,
    PrecedingWhitespace,
    MissingTab,
    EmptyLabel,
    LabelCharacters,
    Invalid,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::UnknownSymbol => "Syntax error: Unknown symbol",
            Error::MultipleLabels => "Syntax error: More than 1 label",
            Error::PrecedingWhitespace => "Syntax error: Preceding whitespaces",
            Error::MissingTab => "Syntax error: No tab before code",
            Error::EmptyLabel => "Syntax error: Label with no identifier",
            Error::LabelCharacters => "Syntax error: Disallowed characters in label identifier",
            Error::Invalid => "Generic syntax error: Invalid syntax",
        };
        f.write_str(msg)
    }
}

pub fn validate(line: &str) -> Result<(), Error> {
    if line_matches(line) {
        return Ok(());
    }

    if !symbols_allowed(line) {
        Err(Error::UnknownSymbol)
    } else if line.matches(':').count() > 1 {
        Err(Error::MultipleLabels)
    } else if leading_ws_has_space(line) {
        Err(Error::PrecedingWhitespace)
    } else if !tab_follows_label(line) {
        Err(Error::MissingTab)
    } else if line.starts_with(':') {
        Err(Error::EmptyLabel)
    } else if label_has_bad_chars(line) {
        Err(Error::LabelCharacters)
    } else {
        Err(Error::Invalid)
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find(';') {
        Some(semi) => &line[..semi],
        None => line,
    }
}

/// Everything before a comment must come from the language's character
/// set; anything else is flagged as an unknown symbol.
fn symbols_allowed(line: &str) -> bool {
    strip_comment(line).chars().all(|c| {
        is_ws(c) || c.is_ascii_alphanumeric() || matches!(c, '#' | ',' | '.' | ':' | '_' | '-')
    })
}

/// True when the line's leading whitespace run contains a space. Tabs
/// alone are the legitimate way to introduce an instruction.
fn leading_ws_has_space(line: &str) -> bool {
    line.chars().take_while(|&c| is_ws(c)).any(|c| c == ' ')
}

/// An optional `label:` prefix followed immediately by a tab.
fn tab_follows_label(line: &str) -> bool {
    if line.starts_with('\t') {
        return true;
    }

    match line.find(':') {
        Some(colon) => {
            colon > 0
                && line[..colon].chars().all(is_label_char)
                && line[colon + 1..].starts_with('\t')
        }
        None => false,
    }
}

/// A label declaration whose identifier contains characters outside
/// the allowed set (whitespace, digits, `#`, `,`, `.`).
fn label_has_bad_chars(line: &str) -> bool {
    let colon = match line.find(':') {
        Some(colon) => colon,
        None => return false,
    };

    let bad = |c: char| is_ws(c) || c.is_ascii_digit() || matches!(c, '#' | ',' | '.');
    let prefix = &line[..colon];
    prefix.chars().all(|c| is_label_char(c) || bad(c)) && prefix.chars().any(bad)
}

/// The coarse grammar for a whole line, comment already stripped:
/// `[label:] [TAB+ opcode [WS operand (WS* , WS* operand)*]] WS*`.
fn line_matches(line: &str) -> bool {
    let code = strip_comment(line);
    let mut rest = code;

    if let Some(colon) = rest.find(':') {
        if colon > 0 && rest[..colon].chars().all(is_label_char) {
            rest = &rest[colon + 1..];
        }
    }

    if rest.starts_with('\t') {
        let body = rest.trim_start_matches('\t');
        if body.starts_with(|c: char| c.is_ascii_alphabetic()) {
            return instruction_matches(body);
        }
    }

    rest.chars().all(is_ws)
}

fn instruction_matches(body: &str) -> bool {
    let opcode_end = body
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or_else(|| body.len());
    let rest = &body[opcode_end..];

    if rest.chars().all(is_ws) {
        return true;
    }

    // At least one whitespace between the opcode and its operands.
    if !rest.starts_with(is_ws) {
        return false;
    }
    let rest = rest.trim_start_matches(is_ws);

    rest.split(',')
        .all(|seg| is_operand_field(seg.trim_matches(is_ws)))
}

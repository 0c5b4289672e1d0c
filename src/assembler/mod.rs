//! Source-to-records compilation: per-line validation and lexical
//! analysis followed by a whole-program parse. Any error aborts the
//! compilation; nothing is partially applied.

pub mod phases;

use crate::spec::arch::ArchParams;
use crate::spec::isa::Op;
use crate::vm::float::Fpu;
use phases::{parse, tokenize, validate};
use std::fmt::{self, Display};
use std::time::{Duration, Instant};

/// Wall-clock time spent in each pass, reported to drivers that
/// display compilation statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timings {
    pub validate: Duration,
    pub tokenize: Duration,
    pub parse: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    /// 1-based source line.
    pub line: usize,
    pub kind: ErrorKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    Validate(validate::Error),
    Tokenize(Vec<tokenize::Error>),
    Parse(parse::ErrorKind),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::Validate(e) => write!(f, "Error at line {}:\n{}", self.line, e),
            ErrorKind::Tokenize(errors) => {
                let heading = if errors.len() > 1 {
                    "Multiple errors"
                } else {
                    "Error"
                };
                writeln!(f, "{} at line {}:", heading, self.line)?;
                for e in errors {
                    writeln!(f, "{}", e)?;
                }
                Ok(())
            }
            ErrorKind::Parse(e) => match e.class() {
                parse::Class::Syntax => {
                    write!(f, "Syntax error at line {}:\n{}", self.line, e)
                }
                parse::Class::Semantic => {
                    write!(f, "Semantic error at line {}:\n{}", self.line, e)
                }
                parse::Class::Architecture => {
                    write!(f, "Architecture error at line {}: {}", self.line, e)
                }
            },
        }
    }
}

impl std::error::Error for Error {}

impl From<parse::Error> for Error {
    fn from(e: parse::Error) -> Error {
        Error {
            line: e.line,
            kind: ErrorKind::Parse(e.kind),
        }
    }
}

/// Compile source text into one executable record per line.
pub fn assemble(
    source: &str,
    arch: &ArchParams,
    extensions: bool,
) -> Result<(Vec<Option<Op>>, Timings), Error> {
    let fpu = Fpu::new(arch.bytes_per_word);
    let mut timings = Timings::default();
    let mut tokenized = Vec::new();

    for (l, line) in source.lines().enumerate() {
        let start = Instant::now();
        validate::validate(line).map_err(|e| Error {
            line: l + 1,
            kind: ErrorKind::Validate(e),
        })?;
        timings.validate += start.elapsed();

        let start = Instant::now();
        let analysis = tokenize::analyze(line, arch, &fpu, extensions);
        if !analysis.errors.is_empty() {
            return Err(Error {
                line: l + 1,
                kind: ErrorKind::Tokenize(analysis.errors),
            });
        }
        tokenized.push(analysis.tokens);
        timings.tokenize += start.elapsed();
    }

    let start = Instant::now();
    let records = parse::parse(tokenized, extensions)?;
    timings.parse = start.elapsed();

    Ok((records, timings))
}

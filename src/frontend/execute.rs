//! Headless driver: configure a machine, compile source onto it, and
//! run it to completion (or a step limit). This is the whole surface a
//! non-interactive embedder needs.

use crate::assembler;
use crate::spec::arch::{self, ArchParams};
use crate::vm::{LogLevel, State, Vm};
use derive_more::Constructor;
use std::fmt::{self, Display};
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub extensions: bool,
    pub bytes_per_word: u32,
    pub mem_words: u64,
    pub max_steps: Option<u64>,
    pub log: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            extensions: false,
            bytes_per_word: 1,
            mem_words: 256,
            max_steps: None,
            log: LogLevel::silent(),
        }
    }
}

#[derive(Debug, Clone, Copy, Constructor)]
pub struct Summary {
    pub state: State,
    pub timeout: bool,
    pub total_steps: u64,
    pub real_ns_elapsed: u128,
}

impl Summary {
    pub fn to_effective_freq_megahertz(&self) -> f64 {
        ((self.total_steps as f64) * 1000.0) / (self.real_ns_elapsed as f64)
    }
}

#[derive(Debug)]
pub enum Error {
    Arch(arch::Error),
    Compile(assembler::Error),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Arch(e) => write!(f, "{}", e),
            Error::Compile(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<arch::Error> for Error {
    fn from(e: arch::Error) -> Self {
        Error::Arch(e)
    }
}

impl From<assembler::Error> for Error {
    fn from(e: assembler::Error) -> Self {
        Error::Compile(e)
    }
}

/// Build a machine for `config`, compile `source` onto it, and run
/// until it settles or hits the step limit. The machine is returned
/// alongside the summary so callers can inspect final state.
pub fn execute(source: &str, config: &Config) -> Result<(Vm, Summary), Error> {
    let arch = ArchParams::new(config.bytes_per_word, config.mem_words)?;
    let mut vm = Vm::new(config.log, arch, config.extensions);
    vm.compile(source)?;

    let summary = run(&mut vm, config.max_steps);
    Ok((vm, summary))
}

/// Step an already-compiled machine until it halts, aborts, or exceeds
/// `max_steps`.
pub fn run(vm: &mut Vm, max_steps: Option<u64>) -> Summary {
    let start = Instant::now();
    let mut timeout = false;

    while vm.step() == State::Running {
        if max_steps.map_or(false, |max| vm.total_steps() >= max) {
            timeout = true;
            break;
        }
    }

    Summary::new(
        vm.state(),
        timeout,
        vm.total_steps(),
        start.elapsed().as_nanos(),
    )
}

use static_assertions::const_assert;
use std::fmt::{self, Display};

/// Machine words are kept in a `u64` regardless of the configured word
/// length; every value stored through the architecture is masked to
/// `word_len` bits first.
pub type Word = u64;
pub type Byte = u8;

/// A validated register number, 0..=12.
pub type RegId = u8;

pub const BYTE_WIDTH: u32 = 8;
pub const NUM_REGS: usize = 13;
pub const IRQ_SLOTS: usize = 128;
pub const IO_PORTS: usize = 128;

pub const MIN_BYTES_PER_WORD: u32 = 1;
pub const MAX_BYTES_PER_WORD: u32 = 4;

const_assert!(MAX_BYTES_PER_WORD * BYTE_WIDTH as u32 <= 64);
const_assert!(IRQ_SLOTS <= 1 << 8);

pub const fn mask(width: u32) -> Word {
    if width >= 64 {
        !0
    } else {
        (1 << width) - 1
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    InvalidWordLength(u32),
    UnaddressableMemory(u64, u32),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidWordLength(bytes) => {
                write!(f, "Unsupported word length of {} bytes", bytes)
            }
            Error::UnaddressableMemory(words, word_len) => write!(
                f,
                "Memory size {} cannot be greater than 2 ^ {}",
                words, word_len
            ),
        }
    }
}

/// The numeric parameters of one machine configuration, derived from
/// `bytes_per_word` at compile time and immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchParams {
    pub bytes_per_word: u32,
    pub word_len: u32,

    pub int_min: i64,
    pub int_max: i64,
    pub uint_max: Word,

    /// Upper bound on address literals, when the driver imposes one.
    /// `None` leaves address fields unbounded at compile time; runaway
    /// addresses then surface as page faults at runtime.
    pub addr_max: Option<u64>,

    pub mem_words: u64,
}

impl ArchParams {
    pub fn new(bytes_per_word: u32, mem_words: u64) -> Result<ArchParams, Error> {
        if bytes_per_word < MIN_BYTES_PER_WORD || bytes_per_word > MAX_BYTES_PER_WORD {
            return Err(Error::InvalidWordLength(bytes_per_word));
        }

        let word_len = bytes_per_word * BYTE_WIDTH;
        if mem_words > 1 << word_len {
            return Err(Error::UnaddressableMemory(mem_words, word_len));
        }

        Ok(ArchParams {
            bytes_per_word,
            word_len,
            int_min: -(1 << (word_len - 1)),
            int_max: (1 << (word_len - 1)) - 1,
            uint_max: mask(word_len),
            addr_max: None,
            mem_words,
        })
    }

    pub fn mem_bytes(&self) -> usize {
        (self.mem_words * self.bytes_per_word as u64) as usize
    }
}

//! Pure fixed-width two's-complement arithmetic. Every function takes
//! the architecture word length `n` explicitly and returns a value
//! masked to `n` bits; nothing here touches machine state.

use crate::spec::arch::{mask, Word};

pub fn add(a: Word, b: Word, n: u32) -> Word {
    a.wrapping_add(b) & mask(n)
}

pub fn sub(a: Word, b: Word, n: u32) -> Word {
    a.wrapping_sub(b) & mask(n)
}

pub fn mul(a: Word, b: Word, n: u32) -> Word {
    a.wrapping_mul(b) & mask(n)
}

/// Truncating signed division, `q * b + r == a`. `None` when `b` is
/// zero; the caller raises the division-by-zero fault.
pub fn div_rem(a: Word, b: Word, n: u32) -> Option<(Word, Word)> {
    let (sa, sb) = (to_signed(a, n), to_signed(b, n));
    if sb == 0 {
        return None;
    }

    Some((from_signed(sa / sb, n), from_signed(sa % sb, n)))
}

pub fn shift_left(a: Word, t: Word, n: u32) -> Word {
    if t >= 64 {
        return 0;
    }

    ((a & mask(n)) << t) & mask(n)
}

pub fn shift_right(a: Word, t: Word, n: u32) -> Word {
    if t >= 64 {
        return 0;
    }

    (a & mask(n)) >> t
}

pub fn negate(a: Word, n: u32) -> Word {
    (!a).wrapping_add(1) & mask(n)
}

pub fn and(a: Word, b: Word, n: u32) -> Word {
    (a & b) & mask(n)
}

pub fn or(a: Word, b: Word, n: u32) -> Word {
    (a | b) & mask(n)
}

pub fn xor(a: Word, b: Word, n: u32) -> Word {
    (a ^ b) & mask(n)
}

pub fn not(a: Word, n: u32) -> Word {
    !a & mask(n)
}

/// Sign-extend an n-bit word into an i64.
pub fn to_signed(a: Word, n: u32) -> i64 {
    let m = mask(n);
    let a = a & m;
    if n < 64 && (a >> (n - 1)) & 1 == 1 {
        (a | !m) as i64
    } else {
        a as i64
    }
}

/// Two's-complement encode a signed value into an n-bit word.
pub fn from_signed(v: i64, n: u32) -> Word {
    (v as Word) & mask(n)
}

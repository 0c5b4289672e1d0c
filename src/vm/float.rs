//! The architecture's custom minifloat unit. The layout scales with the
//! configured word size: 1 sign bit, `3*bytes_per_word` exponent bits,
//! `5*bytes_per_word - 1` fraction bits. Values are passed around as
//! raw bit patterns in machine words; nothing here is IEEE-754.
//!
//! Encoding truncates excess mantissa bits toward zero rather than
//! rounding to nearest. This is non-standard but part of the numeric
//! contract, as are the fixed iteration counts of `exp2` and `log2`.

use crate::spec::arch::{mask, Word};
use std::cmp::Ordering;

const FEXP_ITERS: u64 = 25;
const FLOG_ITERS: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fpu {
    width: u32,
    exp_len: u32,
    frac_len: u32,
    bias: i64,

    ln2: Word,
    inv_ln2: Word,
}

impl Fpu {
    pub fn new(bytes_per_word: u32) -> Fpu {
        let mut fpu = Fpu {
            width: 8 * bytes_per_word,
            exp_len: 3 * bytes_per_word,
            frac_len: 5 * bytes_per_word - 1,
            bias: (1 << (3 * bytes_per_word - 1)) - 1,
            ln2: 0,
            inv_ln2: 0,
        };
        fpu.ln2 = fpu.encode(std::f64::consts::LN_2);
        fpu.inv_ln2 = fpu.encode(std::f64::consts::LOG2_E);
        fpu
    }

    fn sign_mask(&self) -> Word {
        1 << (self.width - 1)
    }

    fn frac_mask(&self) -> Word {
        mask(self.frac_len)
    }

    fn raw_exp(&self, bits: Word) -> u64 {
        (bits >> self.frac_len) & mask(self.exp_len)
    }

    fn raw_frac(&self, bits: Word) -> u64 {
        bits & self.frac_mask()
    }

    pub fn sign_of(&self, bits: Word) -> bool {
        bits & self.sign_mask() != 0
    }

    fn assemble(&self, sign: bool, exp: u64, frac: u64) -> Word {
        ((sign as Word) << (self.width - 1)) | (exp << self.frac_len) | frac
    }

    fn zero(&self, sign: bool) -> Word {
        self.assemble(sign, 0, 0)
    }

    fn inf(&self, sign: bool) -> Word {
        self.assemble(sign, mask(self.exp_len), 0)
    }

    pub fn pos_zero(&self) -> Word {
        self.zero(false)
    }

    pub fn neg_zero(&self) -> Word {
        self.zero(true)
    }

    pub fn pos_inf(&self) -> Word {
        self.inf(false)
    }

    pub fn neg_inf(&self) -> Word {
        self.inf(true)
    }

    pub fn nan(&self) -> Word {
        mask(self.width)
    }

    pub fn one(&self) -> Word {
        self.assemble(false, self.bias as u64, 0)
    }

    pub fn ln2(&self) -> Word {
        self.ln2
    }

    pub fn is_nan(&self, bits: Word) -> bool {
        self.raw_exp(bits) == mask(self.exp_len) && self.raw_frac(bits) != 0
    }

    pub fn is_inf(&self, bits: Word) -> bool {
        self.raw_exp(bits) == mask(self.exp_len) && self.raw_frac(bits) == 0
    }

    pub fn is_zero(&self, bits: Word) -> bool {
        self.raw_exp(bits) == 0 && self.raw_frac(bits) == 0
    }

    pub fn is_denormal(&self, bits: Word) -> bool {
        self.raw_exp(bits) == 0 && self.raw_frac(bits) != 0
    }

    /// Smallest effective exponent (that of denormals).
    fn min_exp(&self) -> i64 {
        1 - self.bias
    }

    /// (sign, effective exponent, mantissa with implicit bit applied).
    fn unpack(&self, bits: Word) -> (bool, i64, u64) {
        let sign = self.sign_of(bits);
        let exp = self.raw_exp(bits);
        let frac = self.raw_frac(bits);
        if exp == 0 {
            (sign, self.min_exp(), frac)
        } else {
            (sign, exp as i64 - self.bias, frac | (1 << self.frac_len))
        }
    }

    /// The one normalization routine. Packs the value
    /// `mant * 2^(exp - frac_bits)` into the format: finds the leading
    /// one, truncates dropped fraction bits toward zero, saturates to
    /// ±∞ past the exponent range and denormalizes below it.
    fn pack(&self, sign: bool, exp: i64, mant: u128, frac_bits: u32) -> Word {
        if mant == 0 {
            return self.zero(sign);
        }

        let h = 127 - mant.leading_zeros() as i64;
        let e = exp + h - frac_bits as i64;

        if e > self.bias {
            return self.inf(sign);
        }

        if e >= self.min_exp() {
            let m = if h > self.frac_len as i64 {
                (mant >> (h - self.frac_len as i64)) as u64
            } else {
                (mant << (self.frac_len as i64 - h)) as u64
            };
            return self.assemble(sign, (e + self.bias) as u64, m & self.frac_mask());
        }

        let shift = frac_bits as i64 - self.frac_len as i64 + (self.min_exp() - exp);
        let m = if shift >= 128 {
            0
        } else if shift >= 0 {
            (mant >> shift) as u64
        } else {
            (mant << -shift) as u64
        };
        if m == 0 {
            return self.zero(sign);
        }
        self.assemble(sign, 0, m & self.frac_mask())
    }

    pub fn encode(&self, x: f64) -> Word {
        if x.is_nan() {
            return self.nan();
        }

        let sign = x.is_sign_negative();
        if x.is_infinite() {
            return self.inf(sign);
        }
        if x == 0.0 {
            return self.zero(sign);
        }

        let bits = x.abs().to_bits();
        let ieee_exp_raw = bits >> 52;
        let mant52 = bits & ((1u64 << 52) - 1);
        if ieee_exp_raw == 0 {
            // f64 denormals sit far below this format's range.
            return self.zero(sign);
        }

        let e = ieee_exp_raw as i64 - 1023;
        if e > self.bias {
            return self.inf(sign);
        }
        if e >= self.min_exp() {
            let frac = mant52 >> (52 - self.frac_len);
            return self.assemble(sign, (e + self.bias) as u64, frac);
        }

        let full = (1u64 << 52) | mant52;
        let shift = (52 - self.frac_len as i64) + (self.min_exp() - e);
        let frac = if shift >= 64 { 0 } else { full >> shift };
        if frac == 0 {
            return self.zero(sign);
        }
        self.assemble(sign, 0, frac)
    }

    /// Exact for values within f64 range; the 4-byte format exceeds it,
    /// so magnitudes past f64's ceiling come back as ±∞.
    pub fn decode(&self, bits: Word) -> f64 {
        if self.is_nan(bits) {
            return f64::NAN;
        }
        if self.is_inf(bits) {
            return if self.sign_of(bits) {
                f64::NEG_INFINITY
            } else {
                f64::INFINITY
            };
        }

        let (sign, e, m) = self.unpack(bits);
        let v = (m as f64) * 2f64.powi((e - self.frac_len as i64) as i32);
        if sign {
            -v
        } else {
            v
        }
    }

    pub fn neg(&self, a: Word) -> Word {
        a ^ self.sign_mask()
    }

    pub fn add(&self, a: Word, b: Word) -> Word {
        if self.is_nan(a) || self.is_nan(b) {
            return self.nan();
        }

        match (self.is_inf(a), self.is_inf(b)) {
            (true, true) => {
                return if self.sign_of(a) == self.sign_of(b) {
                    a
                } else {
                    self.nan()
                }
            }
            (true, false) => return a,
            (false, true) => return b,
            (false, false) => (),
        }

        if self.is_zero(a) && self.is_zero(b) {
            return if self.sign_of(a) == self.sign_of(b) {
                a
            } else {
                self.pos_zero()
            };
        }
        if self.is_zero(a) {
            return b;
        }
        if self.is_zero(b) {
            return a;
        }

        // 96 guard bits cover any alignment the format can produce; a
        // more distant addend only matters through the sticky bit.
        const GUARD: i64 = 96;

        let (sa, ea, ma) = self.unpack(a);
        let (sb, eb, mb) = self.unpack(b);
        let e = ea.max(eb);

        let align = |m: u64, me: i64| -> i128 {
            let diff = e - me;
            if diff <= GUARD {
                (m as i128) << (GUARD - diff)
            } else {
                (m != 0) as i128
            }
        };

        let va = if sa { -align(ma, ea) } else { align(ma, ea) };
        let vb = if sb { -align(mb, eb) } else { align(mb, eb) };

        let s = va + vb;
        if s == 0 {
            return self.pos_zero();
        }

        self.pack(s < 0, e, s.unsigned_abs(), self.frac_len + GUARD as u32)
    }

    pub fn sub(&self, a: Word, b: Word) -> Word {
        self.add(a, self.neg(b))
    }

    pub fn mul(&self, a: Word, b: Word) -> Word {
        if self.is_nan(a) || self.is_nan(b) {
            return self.nan();
        }

        let sign = self.sign_of(a) ^ self.sign_of(b);
        if (self.is_inf(a) && self.is_zero(b)) || (self.is_zero(a) && self.is_inf(b)) {
            return self.nan();
        }
        if self.is_inf(a) || self.is_inf(b) {
            return self.inf(sign);
        }
        if self.is_zero(a) || self.is_zero(b) {
            return self.zero(sign);
        }

        let (_, ea, ma) = self.unpack(a);
        let (_, eb, mb) = self.unpack(b);
        self.pack(sign, ea + eb, ma as u128 * mb as u128, 2 * self.frac_len)
    }

    pub fn div(&self, a: Word, b: Word) -> Word {
        if self.is_nan(a) || self.is_nan(b) {
            return self.nan();
        }

        let sign = self.sign_of(a) ^ self.sign_of(b);
        match (self.is_inf(a), self.is_inf(b)) {
            (true, true) => return self.nan(),
            (true, false) => return self.inf(sign),
            (false, true) => return self.zero(sign),
            (false, false) => (),
        }
        match (self.is_zero(a), self.is_zero(b)) {
            (true, true) => return self.nan(),
            (false, true) => return self.inf(sign),
            (true, false) => return self.zero(sign),
            (false, false) => (),
        }

        const SH: u32 = 64;
        let (_, ea, ma) = self.unpack(a);
        let (_, eb, mb) = self.unpack(b);
        let q = ((ma as u128) << SH) / mb as u128;
        self.pack(sign, ea - eb, q, SH)
    }

    pub fn truncate(&self, a: Word) -> Word {
        self.round_integral(a, RoundRule::Trunc)
    }

    pub fn round_away(&self, a: Word) -> Word {
        self.round_integral(a, RoundRule::Away)
    }

    /// Nearest integer, ties away from zero.
    pub fn round(&self, a: Word) -> Word {
        self.round_integral(a, RoundRule::TiesAway)
    }

    pub fn floor(&self, a: Word) -> Word {
        if self.sign_of(a) {
            self.round_away(a)
        } else {
            self.truncate(a)
        }
    }

    pub fn ceil(&self, a: Word) -> Word {
        if self.sign_of(a) {
            self.truncate(a)
        } else {
            self.round_away(a)
        }
    }

    fn round_integral(&self, a: Word, rule: RoundRule) -> Word {
        if self.is_nan(a) {
            return self.nan();
        }
        if self.is_inf(a) || self.is_zero(a) {
            return a;
        }

        let (sign, e, m) = self.unpack(a);
        if e >= self.frac_len as i64 {
            return a;
        }

        let below = (self.frac_len as i64 - e) as u32;
        let (int, rem, half) = if below >= 128 {
            (0u128, m != 0, false)
        } else {
            let int = (m as u128) >> below;
            let rem = (m as u128) & ((1u128 << below) - 1);
            (int, rem != 0, rem >> (below - 1) == 1)
        };

        let int = match rule {
            RoundRule::Trunc => int,
            RoundRule::Away => int + rem as u128,
            RoundRule::TiesAway => int + half as u128,
        };

        self.pack(sign, 0, int, 0)
    }

    /// Multiply by 2^n without going through a full multiply.
    fn scale(&self, a: Word, n: i64) -> Word {
        if self.is_nan(a) || self.is_inf(a) || self.is_zero(a) {
            return a;
        }

        let (sign, e, m) = self.unpack(a);
        self.pack(sign, e + n, m as u128, self.frac_len)
    }

    /// 2^a via e^(f·ln2) on the fractional part, a fixed 25-term
    /// Maclaurin series computed in this format's own arithmetic.
    pub fn exp2(&self, a: Word) -> Word {
        if self.is_nan(a) {
            return self.nan();
        }
        if self.is_inf(a) {
            return if self.sign_of(a) { self.pos_zero() } else { a };
        }
        if self.is_zero(a) {
            return self.one();
        }

        let i = self.floor(a);
        let f = self.sub(a, i);

        let n = self.decode(i);
        if n > (self.bias + 1) as f64 {
            return self.pos_inf();
        }
        if n < (self.min_exp() - self.frac_len as i64 - 1) as f64 {
            return self.pos_zero();
        }

        let x = self.mul(f, self.ln2);
        let mut term = self.one();
        let mut sum = self.one();
        for k in 1..FEXP_ITERS {
            term = self.div(self.mul(term, x), self.encode(k as f64));
            sum = self.add(sum, term);
        }

        self.scale(sum, n as i64)
    }

    /// log2 via the exponent plus ln(mantissa)/ln2, a fixed 50-term
    /// alternating Maclaurin series for ln(1 + x).
    pub fn log2(&self, a: Word) -> Word {
        if self.is_nan(a) {
            return self.nan();
        }
        if self.is_zero(a) {
            return self.neg_inf();
        }
        if self.sign_of(a) {
            return self.nan();
        }
        if self.is_inf(a) {
            return a;
        }

        let (_, e, m) = self.unpack(a);
        let h = 63 - m.leading_zeros() as i64;
        let e2 = e + h - self.frac_len as i64;
        let mant = self.pack(false, 0, m as u128, h as u32);

        let x = self.sub(mant, self.one());
        let mut pow = x;
        let mut sum = self.pos_zero();
        for k in 1..=FLOG_ITERS {
            let term = self.div(pow, self.encode(k as f64));
            sum = if k % 2 == 1 {
                self.add(sum, term)
            } else {
                self.sub(sum, term)
            };
            pow = self.mul(pow, x);
        }

        self.add(self.encode(e2 as f64), self.mul(sum, self.inv_ln2))
    }

    /// Total order over non-NaN values, ±0 comparing equal. `None` when
    /// either side is NaN; FCMP turns that into an invalid-arithmetic
    /// fault rather than setting flags.
    pub fn compare(&self, a: Word, b: Word) -> Option<Ordering> {
        if self.is_nan(a) || self.is_nan(b) {
            return None;
        }

        if self.is_zero(a) && self.is_zero(b) {
            return Some(Ordering::Equal);
        }

        let (sa, sb) = (self.sign_of(a), self.sign_of(b));
        if sa != sb {
            return Some(if sa { Ordering::Less } else { Ordering::Greater });
        }

        // Magnitude bits are monotone within the format.
        let ord = (a & !self.sign_mask()).cmp(&(b & !self.sign_mask()));
        Some(if sa { ord.reverse() } else { ord })
    }
}

enum RoundRule {
    Trunc,
    Away,
    TiesAway,
}

//! Fixed-point arbitrary precision for the Mandelbrot iteration.
//!
//! [`BigFixed`] is a signed fixed-point number with 4 integer bits and
//! `32·N − 4` fractional bits spread over N 32-bit limbs. The format is
//! sized for the Mandelbrot range: |c| < 4, and every intermediate of
//! z² + c stays below 16 as long as escape is tested before each multiply.
//! It is not a general-purpose big-number type.

use crate::EngineError;
use std::cmp::Ordering;

/// Number of integer bits in the top limb.
const INT_BITS: u32 = 4;

/// Smallest supported limb count (128 fractional-ish bits).
pub const MIN_LIMBS: usize = 4;
/// Largest supported limb count (~1200 decimal digits).
pub const MAX_LIMBS: usize = 128;

/// Signed fixed-point number: value = sign × limbs / 2^(32·N − 4).
///
/// Limbs are little-endian; the top limb's bits [28..32] hold the integer
/// part. Canonical zero has sign 0 and all-zero limbs, so derived
/// equality is value equality.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BigFixed {
    sign: i8,
    limbs: Vec<u32>,
}

impl BigFixed {
    /// Fractional bit count for an N-limb number.
    #[inline]
    fn frac_bits(limbs: usize) -> u32 {
        32 * limbs as u32 - INT_BITS
    }

    /// Canonical zero with the given limb count.
    pub fn zero(limbs: usize) -> Self {
        debug_assert!((MIN_LIMBS..=MAX_LIMBS).contains(&limbs));
        Self {
            sign: 0,
            limbs: vec![0; limbs],
        }
    }

    pub fn limb_count(&self) -> usize {
        self.limbs.len()
    }

    pub fn is_zero(&self) -> bool {
        self.sign == 0
    }

    pub fn is_negative(&self) -> bool {
        self.sign < 0
    }

    /// Pack a machine double into the fixed-point format.
    ///
    /// Values outside the representable range lose their high bits, the
    /// same silent wrap the multiplier has. Callers keep |x| < 8.
    pub fn from_f64(x: f64, limbs: usize) -> Self {
        debug_assert!((MIN_LIMBS..=MAX_LIMBS).contains(&limbs));
        if x == 0.0 || !x.is_finite() {
            return Self::zero(limbs);
        }
        let sign: i8 = if x < 0.0 { -1 } else { 1 };
        let (m, e) = libm::frexp(x.abs());
        // m in [0.5, 1): scale to a 53-bit integer mantissa
        let mant = (m * (1u64 << 53) as f64) as u64;
        let shift = e as i64 + Self::frac_bits(limbs) as i64 - 53;

        let mut out = vec![0u32; limbs];
        if shift <= -64 {
            return Self::zero(limbs);
        }
        if shift < 0 {
            let v = mant >> (-shift) as u32;
            out[0] = v as u32;
            out[1] = (v >> 32) as u32;
        } else {
            let limb_off = (shift / 32) as usize;
            let bit_off = (shift % 32) as u32;
            let wide = (mant as u128) << bit_off;
            for k in 0..3 {
                let idx = limb_off + k;
                if idx < limbs {
                    out[idx] |= (wide >> (32 * k)) as u32;
                }
            }
        }
        Self::normalized(sign, out)
    }

    /// Exact dyadic rational k · 2^exp2. Tile origins are dyadic, so
    /// deltas against a parsed center never round before the final
    /// subtraction.
    pub fn from_dyadic(k: i64, exp2: i32, limbs: usize) -> Self {
        debug_assert!((MIN_LIMBS..=MAX_LIMBS).contains(&limbs));
        if k == 0 {
            return Self::zero(limbs);
        }
        let sign: i8 = if k < 0 { -1 } else { 1 };
        let mag = k.unsigned_abs();
        let shift = exp2 as i64 + Self::frac_bits(limbs) as i64;
        let mut out = vec![0u32; limbs];
        if shift <= -64 {
            return Self::zero(limbs);
        }
        if shift < 0 {
            let v = mag >> (-shift) as u32;
            out[0] = v as u32;
            out[1] = (v >> 32) as u32;
        } else {
            let limb_off = (shift / 32) as usize;
            let bit_off = (shift % 32) as u32;
            let wide = (mag as u128) << bit_off;
            for k in 0..3 {
                let idx = limb_off + k;
                if idx < limbs {
                    out[idx] |= (wide >> (32 * k)) as u32;
                }
            }
        }
        Self::normalized(sign, out)
    }

    /// Convert the top limbs back to f64. Lossy past 53 bits.
    pub fn to_f64(&self) -> f64 {
        if self.sign == 0 {
            return 0.0;
        }
        let n = self.limbs.len();
        let top = match self.limbs.iter().rposition(|&l| l != 0) {
            Some(i) => i,
            None => return 0.0,
        };
        let lo = top.saturating_sub(2);
        let mut acc = 0.0f64;
        for i in (lo..=top).rev() {
            let exp = 32 * i as i32 - Self::frac_bits(n) as i32;
            acc += libm::ldexp(self.limbs[i] as f64, exp);
        }
        self.sign as f64 * acc
    }

    /// Parse `[-]digits[.digits]` into an N-limb fixed-point value.
    ///
    /// This is a true decimal-to-binary conversion: the fractional digit
    /// string is repeatedly multiplied by 2^32 and the integer carries
    /// become limbs, so coordinates with hundreds of digits survive
    /// without an f64 round-trip. Excess digits truncate toward zero.
    pub fn parse(s: &str, limbs: usize) -> Result<Self, EngineError> {
        debug_assert!((MIN_LIMBS..=MAX_LIMBS).contains(&limbs));
        let t = s.trim();
        let (neg, rest) = match t.strip_prefix('-') {
            Some(r) => (true, r),
            None => (false, t.strip_prefix('+').unwrap_or(t)),
        };
        let (int_str, frac_str) = match rest.split_once('.') {
            Some((a, b)) => (a, b),
            None => (rest, ""),
        };
        if int_str.is_empty() && frac_str.is_empty() {
            return Err(EngineError::config(format!("empty coordinate `{s}`")));
        }
        if !int_str.bytes().all(|b| b.is_ascii_digit())
            || !frac_str.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(EngineError::config(format!("malformed coordinate `{s}`")));
        }
        let int_part: u32 = if int_str.is_empty() {
            0
        } else {
            int_str
                .parse()
                .map_err(|_| EngineError::config(format!("integer part overflow in `{s}`")))?
        };
        if int_part >= 1 << INT_BITS {
            return Err(EngineError::config(format!(
                "`{s}` outside the Mandelbrot range (|value| < 16)"
            )));
        }

        let mut digits: Vec<u8> = frac_str.bytes().map(|b| b - b'0').collect();
        let mut out = vec![0u32; limbs];
        out[limbs - 1] = (int_part << 28) | mul_fraction_pow2(&mut digits, 28);
        for limb in out.iter_mut().rev().skip(1) {
            *limb = mul_fraction_pow2(&mut digits, 32);
        }

        Ok(Self::normalized(if neg { -1 } else { 1 }, out))
    }

    pub fn neg(&self) -> Self {
        Self {
            sign: -self.sign,
            limbs: self.limbs.clone(),
        }
    }

    /// Sum. Both operands must carry the same limb count.
    pub fn add(&self, other: &Self) -> Self {
        debug_assert_eq!(self.limbs.len(), other.limbs.len());
        if self.sign == 0 {
            return other.clone();
        }
        if other.sign == 0 {
            return self.clone();
        }
        if self.sign == other.sign {
            return Self {
                sign: self.sign,
                limbs: mag_add(&self.limbs, &other.limbs),
            };
        }
        match cmp_mag(&self.limbs, &other.limbs) {
            Ordering::Equal => Self::zero(self.limbs.len()),
            Ordering::Greater => Self {
                sign: self.sign,
                limbs: mag_sub(&self.limbs, &other.limbs),
            },
            Ordering::Less => Self {
                sign: other.sign,
                limbs: mag_sub(&other.limbs, &self.limbs),
            },
        }
    }

    pub fn sub(&self, other: &Self) -> Self {
        self.add(&other.neg())
    }

    /// Value doubled; cheaper than a full multiply for 2·x·y chains.
    pub fn twice(&self) -> Self {
        if self.sign == 0 {
            return self.clone();
        }
        Self {
            sign: self.sign,
            limbs: mag_shl1(&self.limbs),
        }
    }

    /// Schoolbook product, renormalized back to N limbs.
    ///
    /// The 2N-limb intermediate is shifted right by 32·N − 4 bits, i.e.
    /// the middle N limbs re-aligned by 4 bits. Overflow past the 4-bit
    /// integer field wraps silently; escape is tested before each
    /// multiply, so in-range callers never hit it.
    pub fn mul(&self, other: &Self) -> Self {
        debug_assert_eq!(self.limbs.len(), other.limbs.len());
        let n = self.limbs.len();
        if self.sign == 0 || other.sign == 0 {
            return Self::zero(n);
        }
        let prod = mag_mul(&self.limbs, &other.limbs);
        Self::normalized(self.sign * other.sign, extract_aligned(&prod, n))
    }

    /// Square; same alignment as [`Self::mul`] with each off-diagonal
    /// partial product doubled once.
    pub fn sqr(&self) -> Self {
        let n = self.limbs.len();
        if self.sign == 0 {
            return Self::zero(n);
        }
        let prod = mag_sqr(&self.limbs);
        Self::normalized(1, extract_aligned(&prod, n))
    }

    /// Fast |re|² + |im|² > threshold check using the top limbs only.
    pub fn escaped(re: &Self, im: &Self, threshold: f64) -> bool {
        let r = re.to_f64();
        let i = im.to_f64();
        r * r + i * i > threshold
    }

    pub fn cmp_abs(&self, other: &Self) -> Ordering {
        cmp_mag(&self.limbs, &other.limbs)
    }

    fn normalized(sign: i8, limbs: Vec<u32>) -> Self {
        if limbs.iter().all(|&l| l == 0) {
            Self { sign: 0, limbs }
        } else {
            Self { sign, limbs }
        }
    }
}

/// Multiply the decimal fraction 0.d₀d₁… in place by 2^bits and return
/// the integer part that spills above the decimal point.
fn mul_fraction_pow2(digits: &mut [u8], bits: u32) -> u32 {
    let m = 1u64 << bits;
    let mut carry = 0u64;
    for d in digits.iter_mut().rev() {
        let t = *d as u64 * m + carry;
        *d = (t % 10) as u8;
        carry = t / 10;
    }
    carry as u32
}

fn cmp_mag(a: &[u32], b: &[u32]) -> Ordering {
    for i in (0..a.len()).rev() {
        match a[i].cmp(&b[i]) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Ripple-carry magnitude addition in little-endian limb order.
fn mag_add(a: &[u32], b: &[u32]) -> Vec<u32> {
    let mut out = vec![0u32; a.len()];
    let mut carry = 0u64;
    for i in 0..a.len() {
        let t = a[i] as u64 + b[i] as u64 + carry;
        out[i] = t as u32;
        carry = t >> 32;
    }
    out
}

/// Magnitude subtraction, requires |a| >= |b|.
fn mag_sub(a: &[u32], b: &[u32]) -> Vec<u32> {
    let mut out = vec![0u32; a.len()];
    let mut borrow = 0i64;
    for i in 0..a.len() {
        let t = a[i] as i64 - b[i] as i64 - borrow;
        if t < 0 {
            out[i] = (t + (1i64 << 32)) as u32;
            borrow = 1;
        } else {
            out[i] = t as u32;
            borrow = 0;
        }
    }
    debug_assert_eq!(borrow, 0);
    out
}

fn mag_shl1(a: &[u32]) -> Vec<u32> {
    let mut out = vec![0u32; a.len()];
    let mut carry = 0u32;
    for i in 0..a.len() {
        out[i] = (a[i] << 1) | carry;
        carry = a[i] >> 31;
    }
    out
}

/// Schoolbook O(N²) product into a 2N-limb buffer.
fn mag_mul(a: &[u32], b: &[u32]) -> Vec<u32> {
    let n = a.len();
    let mut prod = vec![0u32; 2 * n];
    for i in 0..n {
        let ai = a[i] as u64;
        if ai == 0 {
            continue;
        }
        let mut carry = 0u64;
        for j in 0..n {
            let t = ai * b[j] as u64 + prod[i + j] as u64 + carry;
            prod[i + j] = t as u32;
            carry = t >> 32;
        }
        prod[i + n] = carry as u32;
    }
    prod
}

/// Squaring: off-diagonal partials accumulated once, doubled in one
/// shift pass, then the diagonal a[i]² terms added.
fn mag_sqr(a: &[u32]) -> Vec<u32> {
    let n = a.len();
    let mut prod = vec![0u32; 2 * n];
    for i in 0..n {
        let ai = a[i] as u64;
        if ai == 0 {
            continue;
        }
        let mut carry = 0u64;
        for j in (i + 1)..n {
            let t = ai * a[j] as u64 + prod[i + j] as u64 + carry;
            prod[i + j] = t as u32;
            carry = t >> 32;
        }
        if i + n < 2 * n {
            let t = prod[i + n] as u64 + carry;
            prod[i + n] = t as u32;
            if i + n + 1 < 2 * n {
                prod[i + n + 1] = prod[i + n + 1].wrapping_add((t >> 32) as u32);
            }
        }
    }
    let mut carry = 0u32;
    for limb in prod.iter_mut() {
        let t = ((*limb as u64) << 1) | carry as u64;
        *limb = t as u32;
        carry = (t >> 32) as u32;
    }
    let mut carry = 0u64;
    for i in 0..n {
        let d = a[i] as u64 * a[i] as u64;
        let t0 = prod[2 * i] as u64 + (d & 0xFFFF_FFFF) + carry;
        prod[2 * i] = t0 as u32;
        let t1 = prod[2 * i + 1] as u64 + (d >> 32) + (t0 >> 32);
        prod[2 * i + 1] = t1 as u32;
        carry = t1 >> 32;
    }
    prod
}

/// Pull the aligned N-limb window out of a 2N-limb product: a right
/// shift by 32·N − 4 bits, i.e. limb offset N−1 plus a 28-bit shift.
fn extract_aligned(prod: &[u32], n: usize) -> Vec<u32> {
    let mut out = vec![0u32; n];
    for i in 0..n {
        let lo = prod[i + n - 1] >> 28;
        let hi = prod[i + n] << 4;
        out[i] = lo | hi;
    }
    out
}

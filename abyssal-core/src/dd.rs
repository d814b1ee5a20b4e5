//! Double-double arithmetic: an unevaluated sum of two machine floats.
//!
//! `(hi, lo)` with |lo| ≤ ½ ulp(hi) gives ~32 decimal digits, the
//! intermediate tier between plain f64 and the fixed-point core. All
//! operations are built from the error-free transformations two_sum,
//! fast_two_sum and the Dekker two_product.

/// Dekker splitter for f64: 2²⁷ + 1 isolates the upper half of the
/// 53-bit mantissa.
pub const F64_SPLITTER: f64 = 134_217_729.0;

/// Dekker splitter for f32: 2¹² + 1. When double-double values cross a
/// boundary whose "hi" slot is f32 (GPU interpolants), this constant
/// must be used instead of the f64 one; mismatching it silently
/// collapses the result to f32 precision.
pub const F32_SPLITTER: f32 = 4097.0;

/// s = a + b with exact error term e.
#[inline]
pub fn two_sum(a: f64, b: f64) -> (f64, f64) {
    let s = a + b;
    let v = s - a;
    let e = (a - (s - v)) + (b - v);
    (s, e)
}

/// Like [`two_sum`] but requires |a| ≥ |b|.
#[inline]
pub fn fast_two_sum(a: f64, b: f64) -> (f64, f64) {
    let s = a + b;
    let e = b - (s - a);
    (s, e)
}

/// Split a into high and low mantissa halves.
#[inline]
fn split(a: f64) -> (f64, f64) {
    let t = F64_SPLITTER * a;
    let hi = t - (t - a);
    (hi, a - hi)
}

/// p = a · b with exact error term e.
#[inline]
pub fn two_product(a: f64, b: f64) -> (f64, f64) {
    let p = a * b;
    let (a_hi, a_lo) = split(a);
    let (b_hi, b_lo) = split(b);
    let e = ((a_hi * b_hi - p) + a_hi * b_lo + a_lo * b_hi) + a_lo * b_lo;
    (p, e)
}

#[inline]
fn two_square(a: f64) -> (f64, f64) {
    let p = a * a;
    let (hi, lo) = split(a);
    let e = ((hi * hi - p) + 2.0 * hi * lo) + lo * lo;
    (p, e)
}

/// Split an f64 into an (f32, f32) pair for GPU-resident consumers:
/// hi carries the f32 rounding of x, lo the f32 rounding of the rest.
#[inline]
pub fn split_to_f32_pair(x: f64) -> (f32, f32) {
    let hi = x as f32;
    let lo = (x - hi as f64) as f32;
    (hi, lo)
}

/// Unevaluated sum of two doubles. Derived comparison is lexicographic
/// on (hi, lo), which is value order under the renormalization
/// invariant.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd)]
pub struct DoubleDouble {
    pub hi: f64,
    pub lo: f64,
}

impl DoubleDouble {
    pub const ZERO: Self = Self { hi: 0.0, lo: 0.0 };

    #[inline]
    pub fn from_f64(x: f64) -> Self {
        Self { hi: x, lo: 0.0 }
    }

    /// Renormalize an arbitrary (hi, lo) pair into canonical form.
    #[inline]
    pub fn from_parts(hi: f64, lo: f64) -> Self {
        let (hi, lo) = two_sum(hi, lo);
        Self { hi, lo }
    }

    #[inline]
    pub fn to_f64(self) -> f64 {
        self.hi + self.lo
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.hi == 0.0
    }

    #[inline]
    pub fn neg(self) -> Self {
        Self {
            hi: -self.hi,
            lo: -self.lo,
        }
    }

    #[inline]
    pub fn abs(self) -> Self {
        if self.hi < 0.0 {
            self.neg()
        } else {
            self
        }
    }

    /// Accurate sum, robust for all magnitude mixes (two fast_two_sum
    /// renormalization passes).
    #[inline]
    pub fn add(self, other: Self) -> Self {
        let (s, e) = two_sum(self.hi, other.hi);
        let (t, f) = two_sum(self.lo, other.lo);
        let e = e + t;
        let (s, e) = fast_two_sum(s, e);
        let e = e + f;
        let (hi, lo) = fast_two_sum(s, e);
        Self { hi, lo }
    }

    #[inline]
    pub fn sub(self, other: Self) -> Self {
        self.add(other.neg())
    }

    #[inline]
    pub fn mul(self, other: Self) -> Self {
        let (p, e) = two_product(self.hi, other.hi);
        let e = e + (self.hi * other.lo + self.lo * other.hi);
        let (hi, lo) = fast_two_sum(p, e);
        Self { hi, lo }
    }

    #[inline]
    pub fn mul_f64(self, other: f64) -> Self {
        let (p, e) = two_product(self.hi, other);
        let e = e + self.lo * other;
        let (hi, lo) = fast_two_sum(p, e);
        Self { hi, lo }
    }

    #[inline]
    pub fn sqr(self) -> Self {
        let (p, e) = two_square(self.hi);
        let e = e + 2.0 * self.hi * self.lo;
        let (hi, lo) = fast_two_sum(p, e);
        Self { hi, lo }
    }

    /// Quotient with one Newton-style correction from q₁ = hi/hi.
    #[inline]
    pub fn div(self, other: Self) -> Self {
        let q1 = self.hi / other.hi;
        let r = self.sub(other.mul_f64(q1));
        let q2 = (r.hi + r.lo) / other.hi;
        let (hi, lo) = fast_two_sum(q1, q2);
        Self { hi, lo }
    }

    /// Square root: 4 Newton steps from √hi.
    pub fn sqrt(self) -> Self {
        if self.hi == 0.0 {
            return Self::ZERO;
        }
        if self.hi < 0.0 {
            return Self {
                hi: f64::NAN,
                lo: 0.0,
            };
        }
        let mut x = Self::from_f64(self.hi.sqrt());
        for _ in 0..4 {
            x = x.add(self.div(x)).mul_f64(0.5);
        }
        x
    }
}

/// Complex pair of double-doubles.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DdComplex {
    pub re: DoubleDouble,
    pub im: DoubleDouble,
}

impl DdComplex {
    pub const ZERO: Self = Self {
        re: DoubleDouble::ZERO,
        im: DoubleDouble::ZERO,
    };

    #[inline]
    pub fn new(re: DoubleDouble, im: DoubleDouble) -> Self {
        Self { re, im }
    }

    #[inline]
    pub fn from_f64(re: f64, im: f64) -> Self {
        Self {
            re: DoubleDouble::from_f64(re),
            im: DoubleDouble::from_f64(im),
        }
    }

    #[inline]
    pub fn add(self, other: Self) -> Self {
        Self {
            re: self.re.add(other.re),
            im: self.im.add(other.im),
        }
    }

    #[inline]
    pub fn sub(self, other: Self) -> Self {
        Self {
            re: self.re.sub(other.re),
            im: self.im.sub(other.im),
        }
    }

    #[inline]
    pub fn mul(self, other: Self) -> Self {
        Self {
            re: self.re.mul(other.re).sub(self.im.mul(other.im)),
            im: self.re.mul(other.im).add(self.im.mul(other.re)),
        }
    }

    /// (a + bi)² = (a² − b²) + 2ab·i
    #[inline]
    pub fn sqr(self) -> Self {
        Self {
            re: self.re.sqr().sub(self.im.sqr()),
            im: self.re.mul(self.im).mul_f64(2.0),
        }
    }

    #[inline]
    pub fn norm_sqr(self) -> DoubleDouble {
        self.re.sqr().add(self.im.sqr())
    }
}

//! Portable lane implementations
//!
//! Plain-Rust 4-wide lanes that work on any architecture. They serve as the
//! reference every SIMD backend is checked against and as the fallback when
//! no instruction-set backend is available.

use super::lane::{INT8_PACK, Int8Accumulator, LANES, VectorLane};

/// Four `f32` lanes stored as an array.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortableF32x4([f32; LANES]);

impl PortableF32x4 {
    #[inline(always)]
    fn map(self, f: impl Fn(f32) -> f32) -> Self {
        let [a, b, c, d] = self.0;
        Self([f(a), f(b), f(c), f(d)])
    }

    #[inline(always)]
    fn zip(self, rhs: Self, f: impl Fn(f32, f32) -> f32) -> Self {
        let [a, b, c, d] = self.0;
        let [x, y, z, w] = rhs.0;
        Self([f(a, x), f(b, y), f(c, z), f(d, w)])
    }
}

/// Emulates a hardware reciprocal-estimate instruction by keeping only the
/// leading 8 mantissa bits of the exact reciprocal.
#[inline(always)]
pub(crate) fn recip_estimate_scalar(x: f32) -> f32 {
    f32::from_bits((1.0 / x).to_bits() & 0xFFFF_8000)
}

impl VectorLane for PortableF32x4 {
    #[inline(always)]
    fn splat(v: f32) -> Self {
        Self([v; LANES])
    }

    #[inline(always)]
    fn load(src: &[f32]) -> Self {
        let src = &src[..LANES];
        Self([src[0], src[1], src[2], src[3]])
    }

    #[inline(always)]
    fn store(self, dst: &mut [f32]) {
        dst[..LANES].copy_from_slice(&self.0);
    }

    #[inline(always)]
    fn to_array(self) -> [f32; LANES] {
        self.0
    }

    #[inline(always)]
    fn max(self, rhs: Self) -> Self {
        self.zip(rhs, f32::max)
    }

    #[inline(always)]
    fn add(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a + b)
    }

    #[inline(always)]
    fn sub(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a - b)
    }

    #[inline(always)]
    fn mul(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a * b)
    }

    #[inline(always)]
    fn div(self, rhs: Self) -> Self {
        self.zip(rhs, |a, b| a / b)
    }

    #[inline(always)]
    fn exp(self) -> Self {
        self.map(f32::exp)
    }

    #[inline(always)]
    fn recip_estimate(self) -> Self {
        self.map(recip_estimate_scalar)
    }

    #[inline(always)]
    fn recip_step(self, estimate: Self) -> Self {
        self.zip(estimate, |x, e| 2.0 - x * e)
    }

    #[inline(always)]
    fn reduce_max(self) -> f32 {
        let [a, b, c, d] = self.0;
        a.max(b).max(c.max(d))
    }

    #[inline(always)]
    fn reduce_sum(self) -> f32 {
        let [a, b, c, d] = self.0;
        (a + b) + (c + d)
    }
}

/// Four `i32` lanes stored as an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortableI32x4([i32; LANES]);

impl Int8Accumulator for PortableI32x4 {
    #[inline(always)]
    fn zero() -> Self {
        Self([0; LANES])
    }

    #[inline(always)]
    fn madd_pack8(self, a: &[i8], b: &[i8]) -> Self {
        let (a, b) = (&a[..INT8_PACK], &b[..INT8_PACK]);
        let mut lanes = self.0;
        for (k, lane) in lanes.iter_mut().enumerate() {
            let p0 = i32::from(a[2 * k]) * i32::from(b[2 * k]);
            let p1 = i32::from(a[2 * k + 1]) * i32::from(b[2 * k + 1]);
            *lane = lane.wrapping_add(p0 + p1);
        }
        Self(lanes)
    }

    #[inline(always)]
    fn reduce_sum(self) -> i32 {
        self.0.iter().fold(0i32, |acc, &v| acc.wrapping_add(v))
    }
}

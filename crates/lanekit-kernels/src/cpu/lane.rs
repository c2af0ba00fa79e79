//! Lane-width capability interfaces.
//!
//! Every vector backend implements [`VectorLane`] for 4-wide `f32` lanes and
//! [`Int8Accumulator`] for widening int8 multiply-accumulate. The softmax and
//! convolution loops are written once against these traits and instantiated
//! per backend.

/// Number of `f32` lanes in a [`VectorLane`] value.
pub const LANES: usize = 4;

/// Number of int8 lanes consumed by one [`Int8Accumulator::madd_pack8`].
pub const INT8_PACK: usize = 8;

/// Four `f32` lanes processed as a unit.
///
/// `load` and `store` read or write the first [`LANES`] values of a slice
/// and panic if it is shorter.
pub trait VectorLane: Copy + Send + Sync + 'static {
    fn splat(v: f32) -> Self;
    fn load(src: &[f32]) -> Self;
    fn store(self, dst: &mut [f32]);
    fn to_array(self) -> [f32; LANES];

    fn max(self, rhs: Self) -> Self;
    fn add(self, rhs: Self) -> Self;
    fn sub(self, rhs: Self) -> Self;
    fn mul(self, rhs: Self) -> Self;
    fn div(self, rhs: Self) -> Self;

    /// Lane-wise `e^x`. NaN propagates, `+∞ → +∞`, `−∞ → 0`.
    fn exp(self) -> Self;

    /// Low-precision reciprocal estimate (8–12 significant bits).
    fn recip_estimate(self) -> Self;

    /// Newton–Raphson correction factor `2 − self·estimate`.
    fn recip_step(self, estimate: Self) -> Self;

    /// Horizontal maximum across the four lanes.
    fn reduce_max(self) -> f32;

    /// Horizontal sum across the four lanes.
    fn reduce_sum(self) -> f32;

    /// Reciprocal estimate refined by a single Newton–Raphson step.
    #[inline]
    fn fast_recip(self) -> Self {
        let estimate = self.recip_estimate();
        self.recip_step(estimate).mul(estimate)
    }
}

/// Four `i32` lanes accumulating widened int8 products.
pub trait Int8Accumulator: Copy + Send + Sync + 'static {
    fn zero() -> Self;

    /// Multiply the first 8 int8 lanes of `a` and `b` after widening to 16
    /// bits and add adjacent product pairs into the four 32-bit lanes:
    /// lane `k` gains `a[2k]·b[2k] + a[2k+1]·b[2k+1]`. Lane sums wrap.
    fn madd_pack8(self, a: &[i8], b: &[i8]) -> Self;

    /// Wrapping horizontal sum of the four lanes.
    fn reduce_sum(self) -> i32;
}

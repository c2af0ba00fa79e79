//! Vectorised run kernels shared by every backend.
//!
//! Two families of loops, both generic over a [`VectorLane`]:
//!
//! * **lanewise** kernels walk two equally long runs position by position,
//!   e.g. folding one slice of a reduced axis into an accumulator of the
//!   same length;
//! * **row** kernels reduce one contiguous run to a single scalar.
//!
//! Each processes full 4-lane vectors first and finishes with a scalar tail.

use super::lane::{LANES, VectorLane};

/// Scalar reciprocal with the same estimate-plus-refinement error profile
/// as the vector path.
#[inline]
pub fn fast_recip_scalar<L: VectorLane>(x: f32) -> f32 {
    L::splat(x).fast_recip().to_array()[0]
}

// ── Lanewise kernels ────────────────────────────────────────────────

/// `acc[i] = max(acc[i], src[i])`
pub fn max_lanes<L: VectorLane>(acc: &mut [f32], src: &[f32]) {
    debug_assert_eq!(acc.len(), src.len());
    let n = acc.len();
    let mut i = 0;
    while i + LANES <= n {
        L::load(&acc[i..]).max(L::load(&src[i..])).store(&mut acc[i..]);
        i += LANES;
    }
    for (a, &s) in acc[i..].iter_mut().zip(&src[i..]) {
        *a = a.max(s);
    }
}

/// `src[i] = exp(src[i] - max[i])` and `sum[i] += src[i]`
pub fn exp_lanes<L: VectorLane>(src: &mut [f32], max: &[f32], sum: &mut [f32]) {
    debug_assert_eq!(src.len(), max.len());
    debug_assert_eq!(src.len(), sum.len());
    let n = src.len();
    let mut i = 0;
    while i + LANES <= n {
        let e = L::load(&src[i..]).sub(L::load(&max[i..])).exp();
        e.store(&mut src[i..]);
        L::load(&sum[i..]).add(e).store(&mut sum[i..]);
        i += LANES;
    }
    for j in i..n {
        let e = (src[j] - max[j]).exp();
        src[j] = e;
        sum[j] += e;
    }
}

/// `src[i] /= sum[i]`
pub fn div_lanes<L: VectorLane>(src: &mut [f32], sum: &[f32]) {
    debug_assert_eq!(src.len(), sum.len());
    let n = src.len();
    let mut i = 0;
    while i + LANES <= n {
        L::load(&src[i..]).div(L::load(&sum[i..])).store(&mut src[i..]);
        i += LANES;
    }
    for (s, &d) in src[i..].iter_mut().zip(&sum[i..]) {
        *s /= d;
    }
}

/// `src[i] *= scale[i]`
pub fn mul_lanes<L: VectorLane>(src: &mut [f32], scale: &[f32]) {
    debug_assert_eq!(src.len(), scale.len());
    let n = src.len();
    let mut i = 0;
    while i + LANES <= n {
        L::load(&src[i..]).mul(L::load(&scale[i..])).store(&mut src[i..]);
        i += LANES;
    }
    for (s, &m) in src[i..].iter_mut().zip(&scale[i..]) {
        *s *= m;
    }
}

/// Replace every value with its fast reciprocal.
pub fn recip_lanes<L: VectorLane>(values: &mut [f32]) {
    let n = values.len();
    let mut i = 0;
    while i + LANES <= n {
        L::load(&values[i..]).fast_recip().store(&mut values[i..]);
        i += LANES;
    }
    for v in &mut values[i..] {
        *v = fast_recip_scalar::<L>(*v);
    }
}

/// Collapse every 4-lane group to its horizontal maximum, broadcast back
/// into all four lanes. `acc.len()` must be a multiple of [`LANES`].
pub fn fold_groups_max<L: VectorLane>(acc: &mut [f32]) {
    debug_assert!(acc.len().is_multiple_of(LANES));
    for group in acc.chunks_exact_mut(LANES) {
        let m = L::load(group).reduce_max();
        group.fill(m);
    }
}

/// Collapse every 4-lane group to its horizontal sum, broadcast back into
/// all four lanes. `acc.len()` must be a multiple of [`LANES`].
pub fn fold_groups_sum<L: VectorLane>(acc: &mut [f32]) {
    debug_assert!(acc.len().is_multiple_of(LANES));
    for group in acc.chunks_exact_mut(LANES) {
        let s = L::load(group).reduce_sum();
        group.fill(s);
    }
}

// ── Row kernels ─────────────────────────────────────────────────────

/// Maximum of a contiguous run, starting from `-f32::MAX`.
pub fn row_max<L: VectorLane>(row: &[f32]) -> f32 {
    let n = row.len();
    let mut i = 0;
    let mut m = -f32::MAX;
    if n >= LANES {
        let mut acc = L::splat(-f32::MAX);
        while i + LANES <= n {
            acc = acc.max(L::load(&row[i..]));
            i += LANES;
        }
        m = acc.reduce_max();
    }
    row[i..].iter().fold(m, |m, &v| m.max(v))
}

/// Exponentiate a contiguous run against `max` in place and return the sum.
pub fn row_exp_sum<L: VectorLane>(row: &mut [f32], max: f32) -> f32 {
    let n = row.len();
    let mut i = 0;
    let mut s = 0.0f32;
    if n >= LANES {
        let vmax = L::splat(max);
        let mut acc = L::splat(0.0);
        while i + LANES <= n {
            let e = L::load(&row[i..]).sub(vmax).exp();
            e.store(&mut row[i..]);
            acc = acc.add(e);
            i += LANES;
        }
        s = acc.reduce_sum();
    }
    for v in &mut row[i..] {
        *v = (*v - max).exp();
        s += *v;
    }
    s
}

/// Divide a contiguous run by `sum`.
pub fn row_div<L: VectorLane>(row: &mut [f32], sum: f32) {
    let n = row.len();
    let mut i = 0;
    let vsum = L::splat(sum);
    while i + LANES <= n {
        L::load(&row[i..]).div(vsum).store(&mut row[i..]);
        i += LANES;
    }
    for v in &mut row[i..] {
        *v /= sum;
    }
}

/// Multiply a contiguous run by `scale`.
pub fn row_scale<L: VectorLane>(row: &mut [f32], scale: f32) {
    let n = row.len();
    let mut i = 0;
    let vscale = L::splat(scale);
    while i + LANES <= n {
        L::load(&row[i..]).mul(vscale).store(&mut row[i..]);
        i += LANES;
    }
    for v in &mut row[i..] {
        *v *= scale;
    }
}

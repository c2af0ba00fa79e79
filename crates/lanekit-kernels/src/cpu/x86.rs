//! x86_64 lanes built on SSE2
//!
//! SSE2 is part of the x86_64 baseline, so these types need no runtime
//! feature check beyond the one [`Backend::Sse2`](crate::Backend) performs
//! when it is selected.
#![allow(unsafe_op_in_unsafe_fn, unused_unsafe)]

use super::lane::{INT8_PACK, Int8Accumulator, LANES, VectorLane};
#[allow(clippy::wildcard_imports)]
use std::arch::x86_64::*;

/// Four `f32` lanes in an `__m128` register.
#[derive(Clone, Copy)]
pub struct Sse2F32x4(__m128);

impl std::fmt::Debug for Sse2F32x4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Sse2F32x4").field(&self.to_array()).finish()
    }
}

/// Lane select without SSE4.1 `blendv`: `mask ? a : b`.
#[inline(always)]
unsafe fn select(mask: __m128, a: __m128, b: __m128) -> __m128 {
    _mm_or_ps(_mm_and_ps(mask, a), _mm_andnot_ps(mask, b))
}

/// Four-lane exp using Cody-Waite range reduction and a 6th-order Taylor
/// polynomial. Preserves NaN and ±∞ semantics.
#[inline(always)]
unsafe fn sse2_exp_ps(x: __m128) -> __m128 {
    let ln2_hi = _mm_set1_ps(6.931_457_5e-1);
    let ln2_lo = _mm_set1_ps(1.428_606_8e-6);
    let log2e = _mm_set1_ps(std::f32::consts::LOG2_E);
    let one = _mm_set1_ps(1.0);
    let half = _mm_set1_ps(0.5);
    let c3 = _mm_set1_ps(1.0 / 6.0);
    let c4 = _mm_set1_ps(1.0 / 24.0);
    let c5 = _mm_set1_ps(1.0 / 120.0);
    let c6 = _mm_set1_ps(1.0 / 720.0);
    // n must stay in [-126, 127] for normal f32 exponents
    let clamp_lo = _mm_set1_ps(-87.3);
    let clamp_hi = _mm_set1_ps(88.3);

    let nan_mask = _mm_cmpunord_ps(x, x);
    let pos_inf = _mm_set1_ps(f32::INFINITY);
    let inf_mask = _mm_cmpeq_ps(x, pos_inf);
    let ninf_mask = _mm_cmpeq_ps(x, _mm_set1_ps(f32::NEG_INFINITY));

    let xc = _mm_max_ps(_mm_min_ps(x, clamp_hi), clamp_lo);

    // x = n·ln2 + r, |r| ≤ ln2/2
    let n_i = _mm_cvtps_epi32(_mm_mul_ps(xc, log2e));
    let n_f = _mm_cvtepi32_ps(n_i);
    let r = _mm_sub_ps(_mm_sub_ps(xc, _mm_mul_ps(n_f, ln2_hi)), _mm_mul_ps(n_f, ln2_lo));

    let p = c6;
    let p = _mm_add_ps(_mm_mul_ps(p, r), c5);
    let p = _mm_add_ps(_mm_mul_ps(p, r), c4);
    let p = _mm_add_ps(_mm_mul_ps(p, r), c3);
    let p = _mm_add_ps(_mm_mul_ps(p, r), half);
    let p = _mm_add_ps(_mm_mul_ps(p, r), one);
    let p = _mm_add_ps(_mm_mul_ps(p, r), one);

    let pow2n = _mm_castsi128_ps(_mm_slli_epi32::<23>(_mm_add_epi32(n_i, _mm_set1_epi32(127))));
    let result = _mm_mul_ps(p, pow2n);

    let result = select(nan_mask, x, result);
    let result = select(inf_mask, pos_inf, result);
    _mm_andnot_ps(ninf_mask, result)
}

impl VectorLane for Sse2F32x4 {
    #[inline(always)]
    fn splat(v: f32) -> Self {
        Self(unsafe { _mm_set1_ps(v) })
    }

    #[inline(always)]
    fn load(src: &[f32]) -> Self {
        let src = &src[..LANES];
        // Safety: the slice above holds at least LANES values.
        Self(unsafe { _mm_loadu_ps(src.as_ptr()) })
    }

    #[inline(always)]
    fn store(self, dst: &mut [f32]) {
        let dst = &mut dst[..LANES];
        // Safety: the slice above holds at least LANES values.
        unsafe { _mm_storeu_ps(dst.as_mut_ptr(), self.0) }
    }

    #[inline(always)]
    fn to_array(self) -> [f32; LANES] {
        let mut out = [0.0f32; LANES];
        self.store(&mut out);
        out
    }

    #[inline(always)]
    fn max(self, rhs: Self) -> Self {
        Self(unsafe { _mm_max_ps(self.0, rhs.0) })
    }

    #[inline(always)]
    fn add(self, rhs: Self) -> Self {
        Self(unsafe { _mm_add_ps(self.0, rhs.0) })
    }

    #[inline(always)]
    fn sub(self, rhs: Self) -> Self {
        Self(unsafe { _mm_sub_ps(self.0, rhs.0) })
    }

    #[inline(always)]
    fn mul(self, rhs: Self) -> Self {
        Self(unsafe { _mm_mul_ps(self.0, rhs.0) })
    }

    #[inline(always)]
    fn div(self, rhs: Self) -> Self {
        Self(unsafe { _mm_div_ps(self.0, rhs.0) })
    }

    #[inline(always)]
    fn exp(self) -> Self {
        Self(unsafe { sse2_exp_ps(self.0) })
    }

    #[inline(always)]
    fn recip_estimate(self) -> Self {
        Self(unsafe { _mm_rcp_ps(self.0) })
    }

    #[inline(always)]
    fn recip_step(self, estimate: Self) -> Self {
        Self(unsafe { _mm_sub_ps(_mm_set1_ps(2.0), _mm_mul_ps(self.0, estimate.0)) })
    }

    #[inline(always)]
    fn reduce_max(self) -> f32 {
        unsafe {
            let hi = _mm_movehl_ps(self.0, self.0);
            let m2 = _mm_max_ps(self.0, hi);
            let m1 = _mm_shuffle_ps::<0x01>(m2, m2);
            _mm_cvtss_f32(_mm_max_ss(m2, m1))
        }
    }

    #[inline(always)]
    fn reduce_sum(self) -> f32 {
        unsafe {
            let hi = _mm_movehl_ps(self.0, self.0);
            let s2 = _mm_add_ps(self.0, hi);
            let s1 = _mm_shuffle_ps::<0x01>(s2, s2);
            _mm_cvtss_f32(_mm_add_ss(s2, s1))
        }
    }
}

/// Four `i32` lanes in an `__m128i` register.
#[derive(Clone, Copy)]
pub struct Sse2I32x4(__m128i);

impl std::fmt::Debug for Sse2I32x4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut lanes = [0i32; LANES];
        unsafe { _mm_storeu_si128(lanes.as_mut_ptr().cast(), self.0) };
        f.debug_tuple("Sse2I32x4").field(&lanes).finish()
    }
}

/// Load 8 int8 lanes and sign-extend them to 8 int16 lanes.
#[inline(always)]
unsafe fn load_i8x8_as_i16(src: &[i8]) -> __m128i {
    let src = &src[..INT8_PACK];
    let v = _mm_loadl_epi64(src.as_ptr().cast());
    let sign = _mm_cmplt_epi8(v, _mm_setzero_si128());
    _mm_unpacklo_epi8(v, sign)
}

impl Int8Accumulator for Sse2I32x4 {
    #[inline(always)]
    fn zero() -> Self {
        Self(unsafe { _mm_setzero_si128() })
    }

    #[inline(always)]
    fn madd_pack8(self, a: &[i8], b: &[i8]) -> Self {
        // Safety: load_i8x8_as_i16 bounds-checks both slices.
        unsafe {
            let a16 = load_i8x8_as_i16(a);
            let b16 = load_i8x8_as_i16(b);
            Self(_mm_add_epi32(self.0, _mm_madd_epi16(a16, b16)))
        }
    }

    #[inline(always)]
    fn reduce_sum(self) -> i32 {
        unsafe {
            let hi = _mm_unpackhi_epi64(self.0, self.0);
            let s2 = _mm_add_epi32(self.0, hi);
            let s1 = _mm_shuffle_epi32::<0x01>(s2);
            _mm_cvtsi128_si32(_mm_add_epi32(s2, s1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::fallback::{PortableF32x4, PortableI32x4};

    #[test]
    fn test_exp_matches_scalar() {
        let xs = [-87.0f32, -20.0, -3.5, -0.25, 0.0, 0.7, 5.0, 40.0];
        for chunk in xs.chunks(4) {
            let got = Sse2F32x4::load(chunk).exp().to_array();
            for (g, &x) in got.iter().zip(chunk) {
                let want = x.exp();
                assert!((g - want).abs() <= want * 1e-5, "exp({x}) = {g}, want {want}");
            }
        }
    }

    #[test]
    fn test_exp_special_values() {
        let v = Sse2F32x4::load(&[f32::NAN, f32::INFINITY, f32::NEG_INFINITY, -1000.0]);
        let r = v.exp().to_array();
        assert!(r[0].is_nan());
        assert_eq!(r[1], f32::INFINITY);
        assert_eq!(r[2], 0.0);
        assert!(r[3] < 1e-37);
    }

    #[test]
    fn test_reductions_match_portable() {
        let data = [3.0f32, -1.0, 8.5, 2.25];
        let s = Sse2F32x4::load(&data);
        let p = PortableF32x4::load(&data);
        assert_eq!(s.reduce_max(), p.reduce_max());
        assert_eq!(s.reduce_sum(), p.reduce_sum());
    }

    #[test]
    fn test_fast_recip_accuracy() {
        let r = Sse2F32x4::load(&[0.5, 3.0, 17.0, 1e6]).fast_recip().to_array();
        for (got, x) in r.iter().zip([0.5f32, 3.0, 17.0, 1e6]) {
            assert!(((got * x) - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_madd_matches_portable() {
        let a = [-128i8, 127, -1, 0, 55, -77, 3, 100];
        let b = [-128i8, -128, 127, 9, -33, -12, 2, 100];
        let s = Sse2I32x4::zero().madd_pack8(&a, &b).madd_pack8(&b, &a);
        let p = PortableI32x4::zero().madd_pack8(&a, &b).madd_pack8(&b, &a);
        assert_eq!(s.reduce_sum(), p.reduce_sum());
    }
}

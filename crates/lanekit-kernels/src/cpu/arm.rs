//! AArch64 lanes built on NEON
//!
//! NEON is mandatory on AArch64; the reciprocal path uses the hardware
//! `vrecpe`/`vrecps` pair and the int8 path widens with `vmull_s8`.
#![allow(unsafe_op_in_unsafe_fn, unused_unsafe)]

use super::lane::{INT8_PACK, Int8Accumulator, LANES, VectorLane};
use std::arch::aarch64::*;

/// Four `f32` lanes in a `float32x4_t` register.
#[derive(Clone, Copy)]
pub struct NeonF32x4(float32x4_t);

impl std::fmt::Debug for NeonF32x4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("NeonF32x4").field(&self.to_array()).finish()
    }
}

/// Four-lane exp using Cody-Waite range reduction and a 6th-order Taylor
/// polynomial. Preserves NaN and ±∞ semantics.
#[inline(always)]
unsafe fn neon_exp_ps(x: float32x4_t) -> float32x4_t {
    let ln2_hi = vdupq_n_f32(6.931_457_5e-1);
    let ln2_lo = vdupq_n_f32(1.428_606_8e-6);
    let log2e = vdupq_n_f32(std::f32::consts::LOG2_E);
    let one = vdupq_n_f32(1.0);
    let half = vdupq_n_f32(0.5);
    let c3 = vdupq_n_f32(1.0 / 6.0);
    let c4 = vdupq_n_f32(1.0 / 24.0);
    let c5 = vdupq_n_f32(1.0 / 120.0);
    let c6 = vdupq_n_f32(1.0 / 720.0);
    let clamp_lo = vdupq_n_f32(-87.3);
    let clamp_hi = vdupq_n_f32(88.3);

    let nan_mask = vmvnq_u32(vceqq_f32(x, x));
    let pos_inf = vdupq_n_f32(f32::INFINITY);
    let inf_mask = vceqq_f32(x, pos_inf);
    let ninf_mask = vceqq_f32(x, vdupq_n_f32(f32::NEG_INFINITY));

    let xc = vmaxq_f32(vminq_f32(x, clamp_hi), clamp_lo);

    let n_i = vcvtnq_s32_f32(vmulq_f32(xc, log2e));
    let n_f = vcvtq_f32_s32(n_i);
    let r = vsubq_f32(vsubq_f32(xc, vmulq_f32(n_f, ln2_hi)), vmulq_f32(n_f, ln2_lo));

    let p = c6;
    let p = vaddq_f32(vmulq_f32(p, r), c5);
    let p = vaddq_f32(vmulq_f32(p, r), c4);
    let p = vaddq_f32(vmulq_f32(p, r), c3);
    let p = vaddq_f32(vmulq_f32(p, r), half);
    let p = vaddq_f32(vmulq_f32(p, r), one);
    let p = vaddq_f32(vmulq_f32(p, r), one);

    let pow2n = vreinterpretq_f32_s32(vshlq_n_s32::<23>(vaddq_s32(n_i, vdupq_n_s32(127))));
    let result = vmulq_f32(p, pow2n);

    let result = vbslq_f32(nan_mask, x, result);
    let result = vbslq_f32(inf_mask, pos_inf, result);
    vbslq_f32(ninf_mask, vdupq_n_f32(0.0), result)
}

impl VectorLane for NeonF32x4 {
    #[inline(always)]
    fn splat(v: f32) -> Self {
        Self(unsafe { vdupq_n_f32(v) })
    }

    #[inline(always)]
    fn load(src: &[f32]) -> Self {
        let src = &src[..LANES];
        // Safety: the slice above holds at least LANES values.
        Self(unsafe { vld1q_f32(src.as_ptr()) })
    }

    #[inline(always)]
    fn store(self, dst: &mut [f32]) {
        let dst = &mut dst[..LANES];
        // Safety: the slice above holds at least LANES values.
        unsafe { vst1q_f32(dst.as_mut_ptr(), self.0) }
    }

    #[inline(always)]
    fn to_array(self) -> [f32; LANES] {
        let mut out = [0.0f32; LANES];
        self.store(&mut out);
        out
    }

    #[inline(always)]
    fn max(self, rhs: Self) -> Self {
        Self(unsafe { vmaxq_f32(self.0, rhs.0) })
    }

    #[inline(always)]
    fn add(self, rhs: Self) -> Self {
        Self(unsafe { vaddq_f32(self.0, rhs.0) })
    }

    #[inline(always)]
    fn sub(self, rhs: Self) -> Self {
        Self(unsafe { vsubq_f32(self.0, rhs.0) })
    }

    #[inline(always)]
    fn mul(self, rhs: Self) -> Self {
        Self(unsafe { vmulq_f32(self.0, rhs.0) })
    }

    #[inline(always)]
    fn div(self, rhs: Self) -> Self {
        Self(unsafe { vdivq_f32(self.0, rhs.0) })
    }

    #[inline(always)]
    fn exp(self) -> Self {
        Self(unsafe { neon_exp_ps(self.0) })
    }

    #[inline(always)]
    fn recip_estimate(self) -> Self {
        Self(unsafe { vrecpeq_f32(self.0) })
    }

    #[inline(always)]
    fn recip_step(self, estimate: Self) -> Self {
        Self(unsafe { vrecpsq_f32(self.0, estimate.0) })
    }

    #[inline(always)]
    fn reduce_max(self) -> f32 {
        unsafe { vmaxvq_f32(self.0) }
    }

    #[inline(always)]
    fn reduce_sum(self) -> f32 {
        unsafe { vaddvq_f32(self.0) }
    }
}

/// Four `i32` lanes in an `int32x4_t` register.
#[derive(Clone, Copy)]
pub struct NeonI32x4(int32x4_t);

impl std::fmt::Debug for NeonI32x4 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut lanes = [0i32; LANES];
        unsafe { vst1q_s32(lanes.as_mut_ptr(), self.0) };
        f.debug_tuple("NeonI32x4").field(&lanes).finish()
    }
}

impl Int8Accumulator for NeonI32x4 {
    #[inline(always)]
    fn zero() -> Self {
        Self(unsafe { vdupq_n_s32(0) })
    }

    #[inline(always)]
    fn madd_pack8(self, a: &[i8], b: &[i8]) -> Self {
        let (a, b) = (&a[..INT8_PACK], &b[..INT8_PACK]);
        // Safety: both slices hold at least INT8_PACK values.
        unsafe {
            let prod = vmull_s8(vld1_s8(a.as_ptr()), vld1_s8(b.as_ptr()));
            Self(vpadalq_s16(self.0, prod))
        }
    }

    #[inline(always)]
    fn reduce_sum(self) -> i32 {
        unsafe { vaddvq_s32(self.0) }
    }
}

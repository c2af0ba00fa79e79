//! Int8 convolution accumulation over pack-8 input channels.
//!
//! The input holds `c` channel groups of 8 int8 lanes each. Every output
//! channel `p` and pixel `(i, j)` sums, over all input groups `q` and kernel
//! taps `k`, the lane-wise products of the 8 input lanes at the tapped
//! pixel with the 8 matching weight lanes. Products are widened to 16 bits
//! and pair-added into 32-bit lanes, which are reduced into one `i32`
//! output per pixel. Output channels are independent and run in parallel.

use crate::cpu::{INT8_PACK, Int8Accumulator, PortableI32x4};
use crate::parallel::WorkerPool;
use crate::{Backend, KernelOptions};
use lanekit_common::{KernelError, PackedTensor, Result};

/// Kernel window, dilation and stride of a 2D convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub kernel_w: usize,
    pub kernel_h: usize,
    pub dilation_w: usize,
    pub dilation_h: usize,
    pub stride_w: usize,
    pub stride_h: usize,
}

impl ConvGeometry {
    /// A `kernel_w × kernel_h` window with unit dilation and stride.
    pub fn new(kernel_w: usize, kernel_h: usize) -> Self {
        Self { kernel_w, kernel_h, dilation_w: 1, dilation_h: 1, stride_w: 1, stride_h: 1 }
    }

    pub fn with_dilation(mut self, dilation_w: usize, dilation_h: usize) -> Self {
        self.dilation_w = dilation_w;
        self.dilation_h = dilation_h;
        self
    }

    pub fn with_stride(mut self, stride_w: usize, stride_h: usize) -> Self {
        self.stride_w = stride_w;
        self.stride_h = stride_h;
        self
    }

    /// Number of kernel taps (`kernel_w · kernel_h`).
    pub fn taps(&self) -> usize {
        self.kernel_w * self.kernel_h
    }

    /// Reject zero-sized kernels, dilations or strides.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("kernel_w", self.kernel_w),
            ("kernel_h", self.kernel_h),
            ("dilation_w", self.dilation_w),
            ("dilation_h", self.dilation_h),
            ("stride_w", self.stride_w),
            ("stride_h", self.stride_h),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, v)| *v == 0) {
            return Err(KernelError::invalid(format!("{name} must be >= 1")).into());
        }
        Ok(())
    }

    /// Output `(outw, outh)` for a `w × h` input, or `None` when the dilated
    /// kernel does not fit.
    pub fn output_extent(&self, w: usize, h: usize) -> Option<(usize, usize)> {
        if self.validate().is_err() {
            return None;
        }
        let extent_w = self.dilation_w * (self.kernel_w - 1) + 1;
        let extent_h = self.dilation_h * (self.kernel_h - 1) + 1;
        if w < extent_w || h < extent_h {
            return None;
        }
        Some(((w - extent_w) / self.stride_w + 1, (h - extent_h) / self.stride_h + 1))
    }

    /// Flat pixel offset of every kernel tap, in row-major tap order, for an
    /// input row of `w` pixels.
    pub fn space_offsets(&self, w: usize) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.taps());
        let mut ofs = 0;
        for _ in 0..self.kernel_h {
            for _ in 0..self.kernel_w {
                offsets.push(ofs);
                ofs += self.dilation_w;
            }
            // row gap `w·dilation_h − kernel_w·dilation_w` may be negative
            ofs = ofs + w * self.dilation_h - self.kernel_w * self.dilation_w;
        }
        offsets
    }
}

fn check_inputs(
    input: &PackedTensor<i8>,
    weights: &PackedTensor<i8>,
    geometry: &ConvGeometry,
) -> Result<(usize, usize)> {
    geometry.validate()?;
    if input.dims() != 3 || input.elempack() != INT8_PACK {
        return Err(KernelError::invalid(format!(
            "input must be rank 3 with elempack {INT8_PACK}, got rank {} elempack {}",
            input.dims(),
            input.elempack()
        ))
        .into());
    }
    if weights.dims() != 3
        || weights.elempack() != INT8_PACK
        || weights.w() != geometry.taps()
        || weights.h() != input.c()
    {
        return Err(KernelError::invalid(format!(
            "weights must be packed as (taps={}, groups={}, outch) with elempack {INT8_PACK}, \
             got ({}, {}, {}) elempack {}",
            geometry.taps(),
            input.c(),
            weights.w(),
            weights.h(),
            weights.c(),
            weights.elempack()
        ))
        .into());
    }
    geometry.output_extent(input.w(), input.h()).ok_or_else(|| {
        KernelError::invalid(format!(
            "input {}x{} is smaller than the dilated kernel {geometry:?}",
            input.w(),
            input.h()
        ))
        .into()
    })
}

/// Accumulate the int8 convolution of a pack-8 `input` with pack-8
/// `weights` into a fresh `i32` tensor of `weights.c()` channels.
///
/// `weights` must be laid out as produced by [`pack_weights`].
///
/// # Errors
///
/// [`KernelError::InvalidArguments`] when the geometry is zero-sized, the
/// input is too small for the dilated kernel, or a tensor has the wrong
/// rank, elempack or weight shape.
pub fn accumulate(
    input: &PackedTensor<i8>,
    weights: &PackedTensor<i8>,
    geometry: &ConvGeometry,
    options: &KernelOptions,
) -> Result<PackedTensor<i32>> {
    let (outw, outh) = check_inputs(input, weights, geometry)?;
    let outch = weights.c();
    let mut output = PackedTensor::<i32>::new_3d(outw, outh, outch, 1)?;
    if outch == 0 || input.c() == 0 {
        return Ok(output);
    }
    log::debug!(
        "conv int8 pack8: {}x{}x{} -> {outw}x{outh}x{outch} backend={} {geometry:?}",
        input.w(),
        input.h(),
        input.c() * INT8_PACK,
        options.backend
    );

    let space_ofs = geometry.space_offsets(input.w());
    let job = ConvJob { input, weights, geometry, space_ofs: &space_ofs };
    match options.backend {
        Backend::Portable => job.run::<PortableI32x4>(&mut output, &options.pool),
        #[cfg(target_arch = "x86_64")]
        Backend::Sse2 => job.run::<crate::cpu::Sse2I32x4>(&mut output, &options.pool),
        #[cfg(target_arch = "aarch64")]
        Backend::Neon => job.run::<crate::cpu::NeonI32x4>(&mut output, &options.pool),
        #[allow(unreachable_patterns)]
        other => return Err(other.unsupported().into()),
    }
    Ok(output)
}

struct ConvJob<'a> {
    input: &'a PackedTensor<i8>,
    weights: &'a PackedTensor<i8>,
    geometry: &'a ConvGeometry,
    space_ofs: &'a [usize],
}

impl ConvJob<'_> {
    fn run<A: Int8Accumulator>(&self, output: &mut PackedTensor<i32>, pool: &WorkerPool) {
        let (outw, outh) = (output.w(), output.h());
        let out_stride = output.cstep();
        pool.for_each_chunk_mut(output.as_mut_slice(), out_stride, |p, outptr| {
            let kernel = self.weights.channel(p);
            for i in 0..outh {
                for j in 0..outw {
                    outptr[i * outw + j] = self.pixel::<A>(kernel, i, j);
                }
            }
        });
    }

    #[inline]
    fn pixel<A: Int8Accumulator>(&self, kernel: &[i8], i: usize, j: usize) -> i32 {
        let w = self.input.w();
        let origin = i * self.geometry.stride_h * w + j * self.geometry.stride_w;
        let mut sum = A::zero();
        let mut kptr = kernel;
        for q in 0..self.input.c() {
            let channel = self.input.channel(q);
            for &ofs in self.space_ofs {
                let at = (origin + ofs) * INT8_PACK;
                sum = sum.madd_pack8(&channel[at..at + INT8_PACK], kptr);
                kptr = &kptr[INT8_PACK..];
            }
        }
        sum.reduce_sum()
    }
}

/// Convert `[outch][inch][kernel_h][kernel_w]` weights into the pack-8
/// layout [`accumulate`] reads: per output channel, `inch / 8` groups of
/// `kernel_w · kernel_h` taps of 8 lanes.
///
/// # Errors
///
/// [`KernelError::InvalidArguments`] when `inch` is not a multiple of 8 or
/// `raw` does not hold `outch · inch · kernel_w · kernel_h` values.
pub fn pack_weights(
    raw: &[i8],
    outch: usize,
    inch: usize,
    kernel_w: usize,
    kernel_h: usize,
) -> Result<PackedTensor<i8>> {
    if !inch.is_multiple_of(INT8_PACK) {
        return Err(KernelError::invalid(format!(
            "input channels {inch} must be a multiple of {INT8_PACK}"
        ))
        .into());
    }
    let maxk = kernel_w * kernel_h;
    if raw.len() != outch * inch * maxk {
        return Err(KernelError::invalid(format!(
            "raw weights hold {} values, expected {outch}x{inch}x{kernel_h}x{kernel_w}",
            raw.len()
        ))
        .into());
    }
    let groups = inch / INT8_PACK;
    let mut packed = PackedTensor::<i8>::new_3d(maxk, groups, outch, INT8_PACK)?;
    for p in 0..outch {
        let dst = packed.channel_mut(p);
        for g in 0..groups {
            for k in 0..maxk {
                for lane in 0..INT8_PACK {
                    let q = g * INT8_PACK + lane;
                    dst[(g * maxk + k) * INT8_PACK + lane] = raw[(p * inch + q) * maxk + k];
                }
            }
        }
    }
    Ok(packed)
}

/// Direct scalar convolution over unpacked `[inch][h][w]` input and
/// `[outch][inch][kernel_h][kernel_w]` weights, producing
/// `[outch][outh][outw]` with wrapping `i32` accumulation.
pub fn accumulate_reference(
    input: &[i8],
    w: usize,
    h: usize,
    inch: usize,
    weights: &[i8],
    outch: usize,
    geometry: &ConvGeometry,
) -> Result<Vec<i32>> {
    let (outw, outh) = geometry.output_extent(w, h).ok_or_else(|| {
        KernelError::invalid(format!("input {w}x{h} is smaller than the kernel {geometry:?}"))
    })?;
    let (kw, kh) = (geometry.kernel_w, geometry.kernel_h);
    if input.len() != inch * h * w || weights.len() != outch * inch * kw * kh {
        return Err(KernelError::invalid("reference input or weight length mismatch").into());
    }

    let mut out = vec![0i32; outch * outh * outw];
    for p in 0..outch {
        for i in 0..outh {
            for j in 0..outw {
                let mut acc = 0i32;
                for q in 0..inch {
                    for ky in 0..kh {
                        for kx in 0..kw {
                            let y = i * geometry.stride_h + ky * geometry.dilation_h;
                            let x = j * geometry.stride_w + kx * geometry.dilation_w;
                            let v = i32::from(input[(q * h + y) * w + x]);
                            let wt = i32::from(weights[((p * inch + q) * kh + ky) * kw + kx]);
                            acc = acc.wrapping_add(v * wt);
                        }
                    }
                }
                out[(p * outh + i) * outw + j] = acc;
            }
        }
    }
    Ok(out)
}

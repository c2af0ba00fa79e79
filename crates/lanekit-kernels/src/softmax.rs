//! Numerically stable softmax over one axis of a lane-packed tensor.
//!
//! Every (rank, axis, elempack) combination is described by an
//! [`AxisLayout`] and executed by the same three top-level passes:
//!
//! 1. **max**: per independent group, the maximum along the reduced axis;
//! 2. **exp**: each value becomes `exp(x - max)`, and the group sum is
//!    accumulated;
//! 3. **normalize**: each value is divided by its group sum, or multiplied
//!    by a refined reciprocal under [`PrecisionMode::Fast`].
//!
//! Passes never overlap. Inside a pass, work is split across disjoint
//! groups so no accumulator element has two writers. When the reduced axis
//! carries the lane pack, the 4-lane accumulators are folded horizontally
//! after the max and exp passes; otherwise the lanes are independent groups
//! and are never cross-reduced.

use crate::cpu::simd_math::{
    div_lanes, exp_lanes, fold_groups_max, fold_groups_sum, max_lanes, mul_lanes, recip_lanes,
    row_div, row_exp_sum, row_max, row_scale,
};
use crate::cpu::{PortableF32x4, VectorLane};
use crate::{Backend, KernelOptions};
use lanekit_common::{KernelError, PackedTensor, PrecisionMode, Result};

/// Pack factors the softmax kernel accepts.
pub const SOFTMAX_ELEMPACKS: [usize; 2] = [1, 4];

/// Softmax operator bound to a reduction axis.
///
/// Negative axes count from the last dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Softmax {
    pub axis: i32,
}

impl Softmax {
    pub fn new(axis: i32) -> Self {
        Self { axis }
    }

    pub fn forward_inplace(
        &self,
        tensor: &mut PackedTensor<f32>,
        options: &KernelOptions,
    ) -> Result<()> {
        forward_inplace(tensor, self.axis, options)
    }
}

/// How a reduction axis maps onto the flat scalar buffer.
///
/// The buffer is `groups` independent blocks `group_stride` scalars apart.
/// Inside a block, `batches` independent runs start `batch_stride` scalars
/// apart. Each run visits `extent` positions of the reduced axis, `step`
/// scalars apart, and at each position reads `inner` consecutive scalars
/// that are reduced lane-wise into an accumulator of the same length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisLayout {
    pub groups: usize,
    pub group_stride: usize,
    pub batches: usize,
    pub batch_stride: usize,
    pub extent: usize,
    pub step: usize,
    pub inner: usize,
    /// The reduced axis is the one holding the lane pack, so the lanes of
    /// each accumulator group belong to the same softmax.
    pub packed_axis: bool,
    /// Max and exp run on a single group; only normalize fans out, over
    /// the positions of the reduced axis.
    pub normalize_over_extent: bool,
}

impl AxisLayout {
    /// Describe the reduction of `axis` over `tensor`.
    ///
    /// # Errors
    ///
    /// [`KernelError::InvalidArguments`] for an out-of-range axis or an
    /// elempack other than 1 or 4.
    pub fn resolve(tensor: &PackedTensor<f32>, axis: i32) -> Result<Self> {
        let dims = tensor.dims();
        let ep = tensor.elempack();
        if !SOFTMAX_ELEMPACKS.contains(&ep) {
            return Err(KernelError::invalid(format!(
                "softmax supports elempack {SOFTMAX_ELEMPACKS:?}, got {ep}"
            ))
            .into());
        }
        let positive_axis = if axis < 0 { dims as i64 + i64::from(axis) } else { i64::from(axis) };
        if !(0..dims as i64).contains(&positive_axis) {
            return Err(KernelError::invalid(format!(
                "axis {axis} out of range for a rank-{dims} tensor"
            ))
            .into());
        }

        let (w, h, c) = (tensor.w(), tensor.h(), tensor.c());
        let channel = tensor.cstep() * ep;
        let packed = ep > 1;
        let layout = match (dims, positive_axis) {
            (1, _) => Self::single(w * ep, w, ep, ep, packed),
            (2, 0) => Self::single(w * h * ep, h, w * ep, w * ep, packed),
            (2, _) => Self::grouped(h, w * ep, 1, 0, w, ep, ep),
            (3, 0) => Self {
                normalize_over_extent: true,
                ..Self::single(channel * c, c, channel, w * h * ep, packed)
            },
            (3, 1) => Self::grouped(c, channel, 1, 0, h, w * ep, w * ep),
            (3, _) => Self::grouped(c, channel, h, w * ep, w, ep, ep),
            _ => {
                return Err(KernelError::invalid(format!("unsupported tensor rank {dims}")).into());
            }
        };
        Ok(layout)
    }

    fn single(len: usize, extent: usize, step: usize, inner: usize, packed_axis: bool) -> Self {
        Self {
            groups: 1,
            group_stride: len,
            batches: 1,
            batch_stride: 0,
            extent,
            step,
            inner,
            packed_axis,
            normalize_over_extent: false,
        }
    }

    fn grouped(
        groups: usize,
        group_stride: usize,
        batches: usize,
        batch_stride: usize,
        extent: usize,
        step: usize,
        inner: usize,
    ) -> Self {
        Self {
            groups,
            group_stride,
            batches,
            batch_stride,
            extent,
            step,
            inner,
            packed_axis: false,
            normalize_over_extent: false,
        }
    }

    /// Scalars of accumulator state per group.
    pub fn accumulator_len(&self) -> usize {
        self.batches * self.inner
    }

    /// Each run is one contiguous row reduced to a single scalar.
    fn is_row(&self) -> bool {
        self.inner == 1 && self.step == 1
    }

    fn is_degenerate(&self) -> bool {
        self.groups == 0 || self.batches == 0 || self.extent == 0 || self.inner == 0
    }

    fn run_offsets(&self, batch: usize) -> impl Iterator<Item = usize> + '_ {
        let base = batch * self.batch_stride;
        (0..self.extent).map(move |r| base + r * self.step)
    }

    fn max_group<L: VectorLane>(&self, src: &[f32], acc: &mut [f32]) {
        for (b, run_acc) in acc.chunks_exact_mut(self.inner).enumerate() {
            if self.is_row() {
                let base = b * self.batch_stride;
                run_acc[0] = row_max::<L>(&src[base..base + self.extent]);
            } else {
                for off in self.run_offsets(b) {
                    max_lanes::<L>(run_acc, &src[off..off + self.inner]);
                }
            }
        }
        if self.packed_axis {
            fold_groups_max::<L>(acc);
        }
    }

    fn exp_group<L: VectorLane>(&self, data: &mut [f32], max: &[f32], sum: &mut [f32]) {
        let runs = max.chunks_exact(self.inner).zip(sum.chunks_exact_mut(self.inner));
        for (b, (run_max, run_sum)) in runs.enumerate() {
            if self.is_row() {
                let base = b * self.batch_stride;
                run_sum[0] = row_exp_sum::<L>(&mut data[base..base + self.extent], run_max[0]);
            } else {
                for off in self.run_offsets(b) {
                    exp_lanes::<L>(&mut data[off..off + self.inner], run_max, run_sum);
                }
            }
        }
        if self.packed_axis {
            fold_groups_sum::<L>(sum);
        }
    }

    fn normalize_group<L: VectorLane>(&self, data: &mut [f32], sum: &[f32], precision: PrecisionMode) {
        for (b, run_sum) in sum.chunks_exact(self.inner).enumerate() {
            if self.is_row() {
                let base = b * self.batch_stride;
                let row = &mut data[base..base + self.extent];
                match precision {
                    PrecisionMode::Exact => row_div::<L>(row, run_sum[0]),
                    PrecisionMode::Fast => row_scale::<L>(row, run_sum[0]),
                }
            } else {
                for off in self.run_offsets(b) {
                    normalize_run::<L>(&mut data[off..off + self.inner], run_sum, precision);
                }
            }
        }
    }
}

/// Under `Fast`, `sum` already holds reciprocals.
fn normalize_run<L: VectorLane>(run: &mut [f32], sum: &[f32], precision: PrecisionMode) {
    match precision {
        PrecisionMode::Exact => div_lanes::<L>(run, sum),
        PrecisionMode::Fast => mul_lanes::<L>(run, sum),
    }
}

/// Rewrite `tensor` in place so that values along `axis` sum to one.
///
/// # Errors
///
/// - [`KernelError::InvalidArguments`] before any mutation when the axis is
///   out of range or the elempack is not 1 or 4;
/// - [`KernelError::ResourceExhausted`] when a scratch accumulator cannot be
///   allocated. Earlier passes may already have mutated the tensor, which
///   must then be discarded.
pub fn forward_inplace(
    tensor: &mut PackedTensor<f32>,
    axis: i32,
    options: &KernelOptions,
) -> Result<()> {
    let layout = AxisLayout::resolve(tensor, axis)?;
    if layout.is_degenerate() {
        return Ok(());
    }
    log::trace!(
        "softmax rank={} axis={axis} elempack={} backend={} layout={layout:?}",
        tensor.dims(),
        tensor.elempack(),
        options.backend
    );
    let data = tensor.as_mut_slice();
    match options.backend {
        Backend::Portable => run::<PortableF32x4>(data, &layout, options),
        #[cfg(target_arch = "x86_64")]
        Backend::Sse2 => run::<crate::cpu::Sse2F32x4>(data, &layout, options),
        #[cfg(target_arch = "aarch64")]
        Backend::Neon => run::<crate::cpu::NeonF32x4>(data, &layout, options),
        #[allow(unreachable_patterns)]
        other => Err(other.unsupported().into()),
    }
}

fn run<L: VectorLane>(data: &mut [f32], layout: &AxisLayout, options: &KernelOptions) -> Result<()> {
    let acc_len = layout.accumulator_len();
    let state_len = layout.groups * acc_len;
    let group_stride = layout.group_stride;
    let pool = &options.pool;

    let mut max = options.workspace.allocate_filled(state_len, -f32::MAX)?;
    let mut sum = options.workspace.allocate_f32(state_len)?;

    {
        let src: &[f32] = &*data;
        pool.for_each_chunk_mut(&mut max[..], acc_len, |g, acc| {
            layout.max_group::<L>(&src[g * group_stride..(g + 1) * group_stride], acc);
        });
    }
    log::trace!("softmax max pass done over {} groups", layout.groups);

    {
        let max: &[f32] = &max;
        pool.for_each_chunk_zip_mut(data, group_stride, &mut sum[..], acc_len, |g, chunk, s| {
            layout.exp_group::<L>(chunk, &max[g * acc_len..(g + 1) * acc_len], s);
        });
    }
    log::trace!("softmax exp pass done");

    let precision = options.precision;
    if precision == PrecisionMode::Fast {
        recip_lanes::<L>(&mut sum[..]);
    }
    let sum: &[f32] = &sum;
    if layout.normalize_over_extent {
        let inner = layout.inner;
        pool.for_each_chunk_mut(data, layout.step, |_, position| {
            normalize_run::<L>(&mut position[..inner], sum, precision);
        });
    } else {
        pool.for_each_chunk_mut(data, group_stride, |g, chunk| {
            layout.normalize_group::<L>(chunk, &sum[g * acc_len..(g + 1) * acc_len], precision);
        });
    }
    log::trace!("softmax normalize pass done ({precision})");
    Ok(())
}

/// Scalar softmax over dense row-major `values` of the given `shape`,
/// accumulated in `f64`.
///
/// # Panics
///
/// Panics if `axis >= shape.len()` or `values` does not match `shape`.
pub fn softmax_reference(values: &[f32], shape: &[usize], axis: usize) -> Vec<f32> {
    assert!(axis < shape.len(), "axis {axis} out of range for shape {shape:?}");
    assert_eq!(values.len(), shape.iter().product::<usize>(), "shape mismatch");

    let outer_size: usize = shape[..axis].iter().product();
    let axis_len = shape[axis];
    let inner_size: usize = shape[axis + 1..].iter().product();

    let mut out = vec![0.0f32; values.len()];
    for outer in 0..outer_size {
        for inner in 0..inner_size {
            let idx = |k: usize| outer * axis_len * inner_size + k * inner_size + inner;
            let max = (0..axis_len).map(|k| f64::from(values[idx(k)])).fold(f64::MIN, f64::max);
            let sum: f64 = (0..axis_len).map(|k| (f64::from(values[idx(k)]) - max).exp()).sum();
            for k in 0..axis_len {
                out[idx(k)] = ((f64::from(values[idx(k)]) - max).exp() / sum) as f32;
            }
        }
    }
    out
}

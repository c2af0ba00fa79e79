//! Property tests for the int8 pack-8 convolution accumulator.
//!
//! Invariants verified:
//! - Output matches a direct scalar convolution for random geometry
//! - Repeated calls are bit-identical regardless of thread count
//! - Every backend produces exactly the portable backend's output

use lanekit_common::PackedTensor;
use lanekit_kernels::conv_int8::{accumulate, accumulate_reference, pack_weights};
use lanekit_kernels::{Backend, ConvGeometry, KernelOptions};
use proptest::prelude::*;

#[derive(Debug, Clone)]
struct Problem {
    w: usize,
    h: usize,
    inch: usize,
    outch: usize,
    geometry: ConvGeometry,
    input: Vec<i8>,
    weights: Vec<i8>,
}

/// Deterministic int8 stream covering the full `[-128, 127]` range.
fn int8_stream(len: usize, seed: u64) -> Vec<i8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8 as i8
        })
        .collect()
}

fn problem_strategy() -> impl Strategy<Value = Problem> {
    (
        (1usize..4, 1usize..4),
        (1usize..3, 1usize..3),
        (1usize..3, 1usize..3),
        (0usize..4, 0usize..4),
        1usize..4,
        1usize..5,
        any::<u64>(),
    )
        .prop_map(|((kw, kh), (dw, dh), (sw, sh), (extra_w, extra_h), groups, outch, seed)| {
            let geometry = ConvGeometry::new(kw, kh).with_dilation(dw, dh).with_stride(sw, sh);
            let w = dw * (kw - 1) + 1 + extra_w;
            let h = dh * (kh - 1) + 1 + extra_h;
            let inch = groups * 8;
            Problem {
                w,
                h,
                inch,
                outch,
                geometry,
                input: int8_stream(inch * h * w, seed),
                weights: int8_stream(outch * inch * kw * kh, seed.rotate_left(17)),
            }
        })
}

fn packed(problem: &Problem) -> (PackedTensor<i8>, PackedTensor<i8>) {
    let input = PackedTensor::from_vec_3d(problem.input.clone(), problem.w, problem.h, problem.inch, 1)
        .unwrap()
        .to_elempack(8)
        .unwrap();
    let g = &problem.geometry;
    let weights =
        pack_weights(&problem.weights, problem.outch, problem.inch, g.kernel_w, g.kernel_h).unwrap();
    (input, weights)
}

fn options(threads: usize, backend: Backend) -> KernelOptions {
    KernelOptions::with_threads(threads).unwrap().with_backend(backend).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The packed accumulator equals the direct convolution on every backend.
    #[test]
    fn prop_matches_direct_convolution(problem in problem_strategy()) {
        let (input, weights) = packed(&problem);
        let want = accumulate_reference(
            &problem.input, problem.w, problem.h, problem.inch,
            &problem.weights, problem.outch, &problem.geometry,
        ).unwrap();

        for backend in Backend::available() {
            let out = accumulate(&input, &weights, &problem.geometry, &options(2, backend)).unwrap();
            let (outw, outh) = problem.geometry.output_extent(problem.w, problem.h).unwrap();
            prop_assert_eq!((out.w(), out.h(), out.c()), (outw, outh, problem.outch));
            prop_assert_eq!(out.to_logical_vec(), want.clone(), "backend {}", backend);
        }
    }

    /// Outputs are bit-identical across repeated calls and thread counts.
    #[test]
    fn prop_deterministic(problem in problem_strategy()) {
        let (input, weights) = packed(&problem);
        let backend = Backend::detect();
        let first = accumulate(&input, &weights, &problem.geometry, &options(1, backend)).unwrap();
        let again = accumulate(&input, &weights, &problem.geometry, &options(1, backend)).unwrap();
        let parallel = accumulate(&input, &weights, &problem.geometry, &options(4, backend)).unwrap();
        prop_assert_eq!(first.as_slice(), again.as_slice());
        prop_assert_eq!(first.as_slice(), parallel.as_slice());
    }
}

#[test]
fn backends_agree_exactly_on_saturating_inputs() {
    let geometry = ConvGeometry::new(3, 3);
    let (w, h, inch, outch) = (5, 4, 16, 2);
    let raw_in: Vec<i8> = (0..w * h * inch).map(|i| if i % 3 == 0 { -128 } else { 127 }).collect();
    let raw_w: Vec<i8> = (0..outch * inch * 9).map(|i| if i % 2 == 0 { -128 } else { -127 }).collect();
    let input = PackedTensor::from_vec_3d(raw_in.clone(), w, h, inch, 1)
        .unwrap()
        .to_elempack(8)
        .unwrap();
    let weights = pack_weights(&raw_w, outch, inch, 3, 3).unwrap();

    let want = accumulate(&input, &weights, &geometry, &options(2, Backend::Portable)).unwrap();
    let reference = accumulate_reference(&raw_in, w, h, inch, &raw_w, outch, &geometry).unwrap();
    assert_eq!(want.to_logical_vec(), reference);
    for backend in Backend::available() {
        let got = accumulate(&input, &weights, &geometry, &options(2, backend)).unwrap();
        assert_eq!(got.as_slice(), want.as_slice(), "backend {backend}");
    }
}

#[test]
fn one_by_one_kernel_is_a_channel_dot_product() {
    let (w, h, inch) = (3, 2, 8);
    let raw_in: Vec<i8> = (0..w * h * inch).map(|i| (i % 7) as i8 - 3).collect();
    let raw_w: Vec<i8> = (0..inch).map(|q| q as i8 + 1).collect();
    let input = PackedTensor::from_vec_3d(raw_in.clone(), w, h, inch, 1)
        .unwrap()
        .to_elempack(8)
        .unwrap();
    let weights = pack_weights(&raw_w, 1, inch, 1, 1).unwrap();
    let out = accumulate(&input, &weights, &ConvGeometry::new(1, 1), &options(1, Backend::Portable))
        .unwrap();

    for y in 0..h {
        for x in 0..w {
            let want: i32 = (0..inch)
                .map(|q| i32::from(raw_in[(q * h + y) * w + x]) * i32::from(raw_w[q]))
                .sum();
            assert_eq!(out.logical(&[0, y, x]), want);
        }
    }
}

#[test]
fn output_padding_stays_zero() {
    let geometry = ConvGeometry::new(2, 2);
    let input = PackedTensor::from_vec_3d(vec![1i8; 3 * 3 * 8], 3, 3, 1, 8).unwrap();
    let weights = pack_weights(&[1i8; 8 * 4], 1, 8, 2, 2).unwrap();
    let out = accumulate(&input, &weights, &geometry, &options(1, Backend::Portable)).unwrap();
    // a 2x2 i32 channel is exactly 16 bytes; a 3x1 channel carries one padded slot
    assert_eq!(out.as_slice(), &[32, 32, 32, 32]);

    let input = PackedTensor::from_vec_3d(vec![1i8; 4 * 2 * 8], 4, 2, 1, 8).unwrap();
    let out = accumulate(&input, &weights, &geometry, &options(1, Backend::Portable)).unwrap();
    assert_eq!((out.w(), out.h(), out.cstep()), (3, 1, 4));
    assert_eq!(out.as_slice(), &[32, 32, 32, 0]);
}

//! Edge cases for the packed-lane softmax: argument checking, workspace
//! exhaustion, extreme logits, thread-count independence, and workspace
//! reuse.

use lanekit_common::{
    KernelConfig, KernelError, LaneKitError, PackedTensor, PrecisionMode, STATUS_ALLOC_FAILED,
    WorkspacePool,
};
use lanekit_kernels::softmax::{AxisLayout, forward_inplace, softmax_reference};
use lanekit_kernels::{Backend, KernelOptions, Softmax};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn options(threads: usize) -> KernelOptions {
    KernelOptions::with_threads(threads).unwrap()
}

fn ramp(len: usize) -> Vec<f32> {
    (0..len).map(|i| (i as f32 * 0.37).sin() * 4.0).collect()
}

// ── Argument checking ───────────────────────────────────────────────────────

#[test]
fn out_of_range_axis_is_invalid_argument() {
    init_logging();
    let mut t = PackedTensor::from_vec_3d(ramp(24), 4, 3, 2, 1).unwrap();
    let before = t.clone();
    for axis in [3, 4, -4, i32::MIN, i32::MAX] {
        let err = forward_inplace(&mut t, axis, &options(2)).unwrap_err();
        assert!(
            matches!(err, LaneKitError::Kernel(KernelError::InvalidArguments { .. })),
            "axis {axis}: {err}"
        );
        assert_eq!(err.status_code(), -1);
    }
    assert_eq!(t, before, "rejected calls must not mutate the tensor");
}

#[test]
fn every_negative_axis_matches_its_positive_form() {
    let shape = [2usize, 3, 4];
    for axis in 0..3i32 {
        let mut a = PackedTensor::from_vec_3d(ramp(24), 4, 3, 2, 1).unwrap();
        let mut b = a.clone();
        forward_inplace(&mut a, axis, &options(2)).unwrap();
        forward_inplace(&mut b, axis - 3, &options(2)).unwrap();
        assert_eq!(a, b);
        let want = softmax_reference(&ramp(24), &shape, axis as usize);
        for (got, want) in a.to_logical_vec().iter().zip(&want) {
            assert!((got - want).abs() < 1e-5);
        }
    }
}

#[test]
fn elempack8_is_rejected_for_softmax() {
    let t = PackedTensor::<f32>::new_2d(3, 1, 8).unwrap();
    assert!(AxisLayout::resolve(&t, 0).is_err());
}

// ── Workspace ─────────────────────────────────────────────────────────────

#[test]
fn workspace_exhaustion_maps_to_alloc_status() {
    init_logging();
    let cfg = KernelConfig { num_threads: 2, workspace_limit_bytes: 64, ..Default::default() };
    let opts = KernelOptions::from_config(&cfg).unwrap();

    // rank-3 axis-0 needs two 4x4x4 = 64-float accumulators: far over budget
    let mut t = PackedTensor::from_vec_3d(ramp(64 * 2), 4, 4, 8, 1)
        .unwrap()
        .to_elempack(4)
        .unwrap();
    let err = forward_inplace(&mut t, 0, &opts).unwrap_err();
    assert!(err.is_resource_exhausted());
    assert_eq!(err.status_code(), STATUS_ALLOC_FAILED);
    assert_eq!(opts.workspace.stats().active_bytes, 0, "scratch must be released on failure");
}

#[test]
fn scratch_buffers_are_reused_across_calls() {
    let ws = WorkspacePool::new(1 << 20);
    let opts = options(2).with_workspace(ws.clone());
    for _ in 0..3 {
        let mut t = PackedTensor::from_vec_2d(ramp(40), 8, 5, 1).unwrap();
        Softmax::new(0).forward_inplace(&mut t, &opts).unwrap();
    }
    let stats = ws.stats();
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.hits, 4);
    assert_eq!(stats.active_bytes, 0);
}

// ── Numerics ──────────────────────────────────────────────────────────────

#[test]
fn huge_logits_do_not_overflow() {
    for backend in Backend::available() {
        let opts = options(1).with_backend(backend).unwrap();
        let mut t = PackedTensor::from_vec_1d(vec![1000.0, 1000.0, 0.0, -1000.0], 4, 1).unwrap();
        forward_inplace(&mut t, 0, &opts).unwrap();
        let out = t.as_slice();
        assert!(out.iter().all(|v| v.is_finite()), "{backend}: {out:?}");
        assert!((out[0] - 0.5).abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
        assert!(out[2] < 1e-30 && out[3] < 1e-30);
    }
}

#[test]
fn single_element_axis_is_one() {
    let mut t = PackedTensor::from_vec_2d(ramp(5), 5, 1, 1).unwrap();
    forward_inplace(&mut t, 0, &options(2)).unwrap();
    assert!(t.as_slice().iter().all(|&v| (v - 1.0).abs() < 1e-7));
}

#[test]
fn fast_precision_stays_within_loose_tolerance() {
    let values = ramp(4 * 16);
    let want = softmax_reference(&values, &[16, 4], 0);
    for backend in Backend::available() {
        let opts = options(2).with_backend(backend).unwrap().with_precision(PrecisionMode::Fast);
        let mut t = PackedTensor::from_vec_2d(values.clone(), 4, 16, 1)
            .unwrap()
            .to_elempack(4)
            .unwrap();
        forward_inplace(&mut t, 0, &opts).unwrap();
        for (got, want) in t.to_logical_vec().iter().zip(&want) {
            assert!((got - want).abs() < 1e-3, "{backend}: {got} vs {want}");
        }
    }
}

// ── Parallelism ───────────────────────────────────────────────────────────

#[test]
fn results_do_not_depend_on_thread_count() {
    let values = ramp(16 * 5 * 7);
    for axis in 0..3 {
        let run = |threads| {
            let mut t = PackedTensor::from_vec_3d(values.clone(), 7, 5, 16, 1)
                .unwrap()
                .to_elempack(4)
                .unwrap();
            forward_inplace(&mut t, axis, &options(threads)).unwrap();
            t.into_vec()
        };
        let single = run(1);
        let multi = run(4);
        assert!(
            single.iter().zip(&multi).all(|(a, b)| a.to_bits() == b.to_bits()),
            "axis {axis} differs between 1 and 4 threads"
        );
    }
}

#[test]
fn grouped_axes_run_on_the_worker_pool() {
    let opts = options(4);
    let before = opts.pool.metrics().sections_completed;
    let mut t = PackedTensor::from_vec_3d(ramp(3 * 4 * 4), 4, 4, 3, 1).unwrap();
    forward_inplace(&mut t, 2, &opts).unwrap();
    // max, exp and normalize each form one parallel section
    assert_eq!(opts.pool.metrics().sections_completed - before, 3);
}

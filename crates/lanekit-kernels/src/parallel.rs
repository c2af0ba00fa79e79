//! Worker pool for data-parallel kernel loops.
//!
//! Wraps [`rayon::ThreadPool`] with thread naming, a bounded worker count,
//! and live metrics. Kernels hand the pool disjoint mutable chunks of their
//! output, so each index is visited exactly once and no two workers ever
//! touch the same element.

use lanekit_common::{KernelError, Result};
use rayon::prelude::*;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// Configuration for [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads. Defaults to the number of available CPUs.
    pub num_threads: usize,
    /// Prefix for worker thread names (e.g. `"lanekit"`).
    pub name_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { num_threads: num_cpus::get().max(1), name_prefix: "lanekit".to_string() }
    }
}

/// Live metrics snapshot from the worker pool.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPoolMetrics {
    /// Parallel sections currently executing.
    pub active_sections: usize,
    /// Parallel sections completed since pool creation.
    pub sections_completed: u64,
    /// Chunks or indices processed since pool creation.
    pub items_processed: u64,
    /// Pool utilization ratio `[0.0, 1.0]` since creation.
    pub utilization: f64,
}

#[derive(Debug)]
struct MetricsInner {
    active: AtomicUsize,
    completed: AtomicU64,
    items: AtomicU64,
    busy_ns: AtomicU64,
    wall_start: Instant,
    num_threads: usize,
}

impl MetricsInner {
    fn new(num_threads: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            items: AtomicU64::new(0),
            busy_ns: AtomicU64::new(0),
            wall_start: Instant::now(),
            num_threads,
        }
    }

    fn snapshot(&self) -> WorkerPoolMetrics {
        let wall_ns = self.wall_start.elapsed().as_nanos().max(1) as f64;
        let busy = self.busy_ns.load(Ordering::Relaxed) as f64;
        let capacity = wall_ns * self.num_threads as f64;
        WorkerPoolMetrics {
            active_sections: self.active.load(Ordering::Relaxed),
            sections_completed: self.completed.load(Ordering::Relaxed),
            items_processed: self.items.load(Ordering::Relaxed),
            utilization: (busy / capacity).min(1.0),
        }
    }
}

/// RAII guard that records one parallel section in [`MetricsInner`].
struct SectionGuard<'a> {
    metrics: &'a MetricsInner,
    start: Instant,
}

impl<'a> SectionGuard<'a> {
    fn new(metrics: &'a MetricsInner, items: usize) -> Self {
        metrics.active.fetch_add(1, Ordering::Relaxed);
        metrics.items.fetch_add(items as u64, Ordering::Relaxed);
        Self { metrics, start: Instant::now() }
    }
}

impl Drop for SectionGuard<'_> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed().as_nanos() as u64;
        self.metrics.busy_ns.fetch_add(elapsed, Ordering::Relaxed);
        self.metrics.active.fetch_sub(1, Ordering::Relaxed);
        self.metrics.completed.fetch_add(1, Ordering::Relaxed);
    }
}

/// A bounded CPU worker pool shared by kernel invocations.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    metrics: Arc<MetricsInner>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    /// Create a pool from the given configuration.
    pub fn new(config: WorkerPoolConfig) -> Result<Self> {
        let threads = config.num_threads.max(1);
        let prefix = config.name_prefix.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |idx| format!("{prefix}-{idx}"))
            .build()
            .map_err(|e| KernelError::ExecutionFailed {
                reason: format!("failed to build worker pool: {e}"),
            })?;
        log::debug!("worker pool '{}' started with {threads} threads", config.name_prefix);
        let metrics = Arc::new(MetricsInner::new(threads));
        Ok(Self { pool, metrics, config: WorkerPoolConfig { num_threads: threads, ..config } })
    }

    /// Create a pool with `num_threads` workers and the default name prefix.
    pub fn with_threads(num_threads: usize) -> Result<Self> {
        Self::new(WorkerPoolConfig { num_threads, ..Default::default() })
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    pub fn num_threads(&self) -> usize {
        self.config.num_threads
    }

    pub fn metrics(&self) -> WorkerPoolMetrics {
        self.metrics.snapshot()
    }

    fn runs_inline(&self, items: usize) -> bool {
        self.config.num_threads == 1 || items <= 1
    }

    // ── Parallel primitives ─────────────────────────────────────────

    /// Apply `f` to every index in `range`, splitting the work into chunks
    /// of `chunk_size` distributed across the pool.
    pub fn parallel_for<F>(&self, range: Range<usize>, chunk_size: usize, f: F)
    where
        F: Fn(usize) + Send + Sync,
    {
        let _guard = SectionGuard::new(&self.metrics, range.len());
        if self.runs_inline(range.len()) {
            range.for_each(f);
            return;
        }
        let chunk = chunk_size.max(1);
        self.pool.install(|| {
            rayon::scope(|s| {
                let mut start = range.start;
                while start < range.end {
                    let end = (start + chunk).min(range.end);
                    let f_ref = &f;
                    let lo = start;
                    s.spawn(move |_| {
                        for i in lo..end {
                            f_ref(i);
                        }
                    });
                    start = end;
                }
            });
        });
    }

    /// Split `data` into consecutive chunks of `chunk_len` and call
    /// `f(index, chunk)` once per chunk. A trailing partial chunk is passed
    /// as-is.
    pub fn for_each_chunk_mut<T, F>(&self, data: &mut [T], chunk_len: usize, f: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Send + Sync,
    {
        let chunk_len = chunk_len.max(1);
        let chunks = data.len().div_ceil(chunk_len);
        let _guard = SectionGuard::new(&self.metrics, chunks);
        if self.runs_inline(chunks) {
            data.chunks_mut(chunk_len).enumerate().for_each(|(i, c)| f(i, c));
            return;
        }
        self.pool.install(|| {
            data.par_chunks_mut(chunk_len).enumerate().for_each(|(i, c)| f(i, c));
        });
    }

    /// Walk two buffers in lockstep: chunk `i` of `a` (length `a_len`) is
    /// paired with chunk `i` of `b` (length `b_len`). Iteration stops at the
    /// shorter chunk sequence.
    pub fn for_each_chunk_zip_mut<A, B, F>(
        &self,
        a: &mut [A],
        a_len: usize,
        b: &mut [B],
        b_len: usize,
        f: F,
    ) where
        A: Send,
        B: Send,
        F: Fn(usize, &mut [A], &mut [B]) + Send + Sync,
    {
        let (a_len, b_len) = (a_len.max(1), b_len.max(1));
        let chunks = a.len().div_ceil(a_len).min(b.len().div_ceil(b_len));
        let _guard = SectionGuard::new(&self.metrics, chunks);
        if self.runs_inline(chunks) {
            a.chunks_mut(a_len)
                .zip(b.chunks_mut(b_len))
                .enumerate()
                .for_each(|(i, (x, y))| f(i, x, y));
            return;
        }
        self.pool.install(|| {
            a.par_chunks_mut(a_len)
                .zip(b.par_chunks_mut(b_len))
                .enumerate()
                .for_each(|(i, (x, y))| f(i, x, y));
        });
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("num_threads", &self.config.num_threads)
            .field("name_prefix", &self.config.name_prefix)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn test_pool(threads: usize) -> WorkerPool {
        WorkerPool::new(WorkerPoolConfig { num_threads: threads, name_prefix: "test".to_string() })
            .expect("failed to build test pool")
    }

    #[test]
    fn test_default_config_uses_available_cpus() {
        let cfg = WorkerPoolConfig::default();
        assert!(cfg.num_threads >= 1);
        assert_eq!(cfg.name_prefix, "lanekit");
    }

    #[test]
    fn test_zero_threads_clamped_to_one() {
        let pool = test_pool(0);
        assert_eq!(pool.num_threads(), 1);
    }

    #[test]
    fn test_pool_debug_impl() {
        let dbg = format!("{:?}", test_pool(2));
        assert!(dbg.contains("WorkerPool"));
        assert!(dbg.contains("num_threads"));
    }

    #[test]
    fn test_parallel_for_visits_every_index_once() {
        let pool = test_pool(4);
        let results = Mutex::new(vec![0usize; 100]);
        pool.parallel_for(0..100, 7, |i| {
            results.lock().unwrap()[i] += 1;
        });
        assert!(results.into_inner().unwrap().iter().all(|&n| n == 1));
    }

    #[test]
    fn test_parallel_for_empty_range() {
        let pool = test_pool(2);
        let counter = AtomicUsize::new(0);
        pool.parallel_for(0..0, 1, |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_chunk_mut_writes_disjoint_chunks() {
        let pool = test_pool(4);
        let mut data = vec![0usize; 10];
        pool.for_each_chunk_mut(&mut data, 3, |i, chunk| chunk.fill(i + 1));
        assert_eq!(data, vec![1, 1, 1, 2, 2, 2, 3, 3, 3, 4]);
    }

    #[test]
    fn test_chunk_zip_pairs_by_index() {
        let pool = test_pool(3);
        let mut a = vec![1.0f32; 12];
        let mut b = vec![0.0f32; 4];
        pool.for_each_chunk_zip_mut(&mut a, 3, &mut b, 1, |i, xs, acc| {
            for x in xs.iter_mut() {
                *x *= i as f32;
            }
            acc[0] = xs.iter().sum();
        });
        assert_eq!(b, vec![0.0, 3.0, 6.0, 9.0]);
    }

    #[test]
    fn test_results_independent_of_thread_count() {
        let run = |threads| {
            let pool = test_pool(threads);
            let mut data: Vec<u64> = (0..1000).collect();
            pool.for_each_chunk_mut(&mut data, 17, |i, c| {
                for v in c.iter_mut() {
                    *v = v.wrapping_mul(31).wrapping_add(i as u64);
                }
            });
            data
        };
        assert_eq!(run(1), run(8));
    }

    #[test]
    fn test_metrics_track_sections() {
        let pool = test_pool(2);
        let mut data = vec![0u8; 8];
        pool.for_each_chunk_mut(&mut data, 2, |_, c| c.fill(1));
        pool.parallel_for(0..4, 1, |_| {});
        let m = pool.metrics();
        assert_eq!(m.sections_completed, 2);
        assert_eq!(m.items_processed, 8);
        assert_eq!(m.active_sections, 0);
        assert!((0.0..=1.0).contains(&m.utilization));
    }
}

//! Workspace allocator for per-call scratch buffers.
//!
//! Provides a thread-safe, size-bucketed pool that recycles `f32` buffers.
//! Requests are rounded up to the nearest power-of-two *size class*, which
//! limits fragmentation while maximising reuse across kernel calls. A pool
//! may carry a budget on live bytes; requests beyond it fail with
//! [`KernelError::ResourceExhausted`] instead of allocating.

use crate::error::{KernelError, Result};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const F32_BYTES: usize = std::mem::size_of::<f32>();
const MIN_BUCKET_ELEMS: usize = 16;

// ── Statistics ───────────────────────────────────────────────────────

/// Cumulative statistics for a [`WorkspacePool`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceStats {
    /// Number of times `allocate_f32` returned an existing buffer.
    pub hits: u64,
    /// Number of times `allocate_f32` had to create a new buffer.
    pub misses: u64,
    /// Number of requests refused by the budget or the system allocator.
    pub failed: u64,
    /// Bytes currently held *inside the pool* (not lent out).
    pub pooled_bytes: usize,
    /// Bytes currently lent out via live `ScratchBuffer` handles.
    pub active_bytes: usize,
}

impl WorkspaceStats {
    /// Total successful allocations (`hits + misses`).
    pub fn total_allocations(&self) -> u64 {
        self.hits + self.misses
    }
}

// ── Pool internals ──────────────────────────────────────────────────

struct PoolInner {
    max_cached_bytes: usize,
    max_active_bytes: Option<usize>,
    buckets: HashMap<usize, Vec<Vec<f32>>>,
    stats: WorkspaceStats,
}

// ── WorkspacePool ───────────────────────────────────────────────────

/// Thread-safe, size-bucketed scratch allocator.
///
/// Cloning is cheap; clones share the same buckets and statistics. When a
/// [`ScratchBuffer`] is dropped its memory returns to the matching bucket,
/// unless the pool already caches `max_cached_bytes`, in which case the
/// buffer is freed.
#[derive(Clone)]
pub struct WorkspacePool {
    inner: Arc<Mutex<PoolInner>>,
}

impl std::fmt::Debug for WorkspacePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspacePool").field("stats", &self.stats()).finish()
    }
}

impl Default for WorkspacePool {
    fn default() -> Self {
        Self::new(16 * 1024 * 1024)
    }
}

impl WorkspacePool {
    /// Create an unbounded pool that caches at most `max_cached_bytes` of
    /// idle memory.
    pub fn new(max_cached_bytes: usize) -> Self {
        Self::with_limit(max_cached_bytes, None)
    }

    /// Create a pool whose live (lent out) bytes may never exceed
    /// `max_active_bytes`.
    pub fn with_limit(max_cached_bytes: usize, max_active_bytes: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                max_cached_bytes,
                max_active_bytes,
                buckets: HashMap::new(),
                stats: WorkspaceStats::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a zeroed scratch buffer of exactly `len` `f32` values.
    ///
    /// # Errors
    ///
    /// Returns [`KernelError::ResourceExhausted`] when the request would push
    /// live bytes past the pool budget or the system allocator refuses it.
    pub fn allocate_f32(&self, len: usize) -> Result<ScratchBuffer> {
        let bucket_elems = bucket_for(len);
        let bucket_bytes = bucket_elems.saturating_mul(F32_BYTES);
        let mut inner = self.lock();

        if let Some(limit) = inner.max_active_bytes
            && inner.stats.active_bytes.saturating_add(bucket_bytes) > limit
        {
            inner.stats.failed += 1;
            log::warn!(
                "workspace budget exceeded: {} live + {} requested > {} bytes",
                inner.stats.active_bytes,
                bucket_bytes,
                limit
            );
            return Err(KernelError::ResourceExhausted {
                requested_bytes: bucket_bytes,
                reason: format!("workspace budget of {limit} bytes exceeded"),
            }
            .into());
        }

        let recycled = inner.buckets.get_mut(&bucket_elems).and_then(|b| b.pop());

        let buf = match recycled {
            Some(mut v) => {
                inner.stats.hits += 1;
                inner.stats.pooled_bytes -= bucket_bytes;
                v.fill(0.0);
                v
            }
            None => {
                let mut v = Vec::new();
                if let Err(e) = v.try_reserve_exact(bucket_elems) {
                    inner.stats.failed += 1;
                    log::warn!("workspace allocation of {bucket_bytes} bytes failed: {e}");
                    return Err(KernelError::ResourceExhausted {
                        requested_bytes: bucket_bytes,
                        reason: e.to_string(),
                    }
                    .into());
                }
                v.resize(bucket_elems, 0.0);
                inner.stats.misses += 1;
                v
            }
        };

        inner.stats.active_bytes += bucket_bytes;

        Ok(ScratchBuffer { buf: Some(buf), len, pool: Arc::clone(&self.inner) })
    }

    /// Allocate a scratch buffer of `len` values, each set to `value`.
    pub fn allocate_filled(&self, len: usize, value: f32) -> Result<ScratchBuffer> {
        let mut buf = self.allocate_f32(len)?;
        buf.fill(value);
        Ok(buf)
    }

    /// Snapshot of current pool statistics.
    pub fn stats(&self) -> WorkspaceStats {
        self.lock().stats.clone()
    }

    /// Drop all cached buffers, freeing idle memory immediately.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.buckets.clear();
        inner.stats.pooled_bytes = 0;
    }
}

/// Round `len` up to the next power of two, with a minimum of 16 elements.
fn bucket_for(len: usize) -> usize {
    if len <= MIN_BUCKET_ELEMS {
        return MIN_BUCKET_ELEMS;
    }
    len.checked_next_power_of_two().unwrap_or(len)
}

// ── ScratchBuffer ───────────────────────────────────────────────────

/// RAII `f32` buffer that returns its memory to a [`WorkspacePool`] on drop.
pub struct ScratchBuffer {
    buf: Option<Vec<f32>>,
    len: usize,
    pool: Arc<Mutex<PoolInner>>,
}

impl Deref for ScratchBuffer {
    type Target = [f32];
    fn deref(&self) -> &[f32] {
        match &self.buf {
            Some(v) => &v[..self.len],
            None => &[],
        }
    }
}

impl DerefMut for ScratchBuffer {
    fn deref_mut(&mut self) -> &mut [f32] {
        match &mut self.buf {
            Some(v) => &mut v[..self.len],
            None => &mut [],
        }
    }
}

impl Drop for ScratchBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            let bucket_elems = buf.len();
            let bucket_bytes = bucket_elems * F32_BYTES;
            let mut inner = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
            inner.stats.active_bytes = inner.stats.active_bytes.saturating_sub(bucket_bytes);

            if inner.stats.pooled_bytes + bucket_bytes <= inner.max_cached_bytes {
                inner.stats.pooled_bytes += bucket_bytes;
                inner.buckets.entry(bucket_elems).or_default().push(buf);
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn basic_alloc_dealloc() {
        let pool = WorkspacePool::new(4096);
        let buf = pool.allocate_f32(100).unwrap();
        assert_eq!(buf.len(), 100);
        drop(buf);
        let stats = pool.stats();
        assert_eq!(stats.total_allocations(), 1);
        assert_eq!(stats.active_bytes, 0);
        assert_eq!(stats.pooled_bytes, 128 * 4);
    }

    #[test]
    fn recycled_buffer_is_zeroed() {
        let pool = WorkspacePool::new(4096);
        let mut buf = pool.allocate_f32(32).unwrap();
        buf[0] = 7.5;
        drop(buf);

        let buf2 = pool.allocate_f32(32).unwrap();
        assert!(buf2.iter().all(|&v| v == 0.0));
        assert_eq!(pool.stats().hits, 1);
    }

    #[test]
    fn filled_allocation() {
        let pool = WorkspacePool::default();
        let buf = pool.allocate_filled(5, -f32::MAX).unwrap();
        assert!(buf.iter().all(|&v| v == -f32::MAX));
    }

    #[test]
    fn bucket_rounding() {
        assert_eq!(bucket_for(0), 16);
        assert_eq!(bucket_for(16), 16);
        assert_eq!(bucket_for(17), 32);
        assert_eq!(bucket_for(1000), 1024);
    }

    #[test]
    fn budget_is_enforced() {
        let pool = WorkspacePool::with_limit(0, Some(256));
        let a = pool.allocate_f32(32).unwrap(); // 128 bytes
        let b = pool.allocate_f32(32).unwrap(); // 256 bytes live
        let err = pool.allocate_f32(1).err().unwrap();
        assert!(err.is_resource_exhausted());
        assert_eq!(pool.stats().failed, 1);

        drop(a);
        drop(b);
        assert!(pool.allocate_f32(32).is_ok(), "budget frees up after drop");
    }

    #[test]
    fn cache_cap_frees_excess() {
        let pool = WorkspacePool::new(64);
        let a = pool.allocate_f32(16).unwrap();
        let b = pool.allocate_f32(16).unwrap();
        drop(a);
        drop(b);
        assert_eq!(pool.stats().pooled_bytes, 64);
    }

    #[test]
    fn clear_drops_cache() {
        let pool = WorkspacePool::new(4096);
        drop(pool.allocate_f32(64).unwrap());
        pool.clear();
        assert_eq!(pool.stats().pooled_bytes, 0);
        let _again = pool.allocate_f32(64).unwrap();
        assert_eq!(pool.stats().misses, 2);
    }

    #[test]
    fn concurrent_allocations() {
        let pool = WorkspacePool::new(1 << 20);
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        let mut buf = pool.allocate_f32(16 + (i + t) % 64).unwrap();
                        buf[0] = 1.0;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.total_allocations(), 200);
        assert_eq!(stats.active_bytes, 0);
    }
}

//! Packed-lane CPU kernels
//!
//! Softmax over lane-packed 1–3D tensors and the int8 pack-8 convolution
//! accumulator, each written once over the lane traits in [`cpu`] and
//! dispatched at runtime to the best vector [`Backend`].

use lanekit_common::{
    BackendPreference, ConfigError, KernelConfig, KernelError, PrecisionMode, Result,
    WorkspacePool,
};
use std::sync::Arc;

pub mod conv_int8;
pub mod cpu;
pub mod parallel;
pub mod softmax;

pub use conv_int8::ConvGeometry;
pub use parallel::{WorkerPool, WorkerPoolConfig, WorkerPoolMetrics};
pub use softmax::Softmax;

/// Vector backend a kernel call is instantiated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Plain-Rust 4-wide lanes.
    Portable,
    /// 128-bit SSE2 lanes.
    Sse2,
    /// 128-bit NEON lanes.
    Neon,
}

impl Backend {
    /// Every backend, best first.
    pub const ALL: [Backend; 3] = [Backend::Sse2, Backend::Neon, Backend::Portable];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Portable => "portable",
            Self::Sse2 => "sse2",
            Self::Neon => "neon",
        }
    }

    /// Whether the running CPU can execute this backend.
    pub fn is_available(&self) -> bool {
        match self {
            Self::Portable => true,
            Self::Sse2 => {
                #[cfg(target_arch = "x86_64")]
                {
                    is_x86_feature_detected!("sse2")
                }
                #[cfg(not(target_arch = "x86_64"))]
                {
                    false
                }
            }
            Self::Neon => {
                #[cfg(target_arch = "aarch64")]
                {
                    std::arch::is_aarch64_feature_detected!("neon")
                }
                #[cfg(not(target_arch = "aarch64"))]
                {
                    false
                }
            }
        }
    }

    /// All backends the running CPU supports, best first.
    pub fn available() -> Vec<Backend> {
        Self::ALL.into_iter().filter(Backend::is_available).collect()
    }

    /// Best backend the running CPU supports.
    pub fn detect() -> Backend {
        let backend = Self::ALL.into_iter().find(Backend::is_available).unwrap_or(Self::Portable);
        log::info!("Selected lane backend: {}", backend.name());
        backend
    }

    /// Resolve a configured preference to a concrete backend.
    ///
    /// # Errors
    ///
    /// [`KernelError::UnsupportedHardware`] when a specific backend is
    /// requested that this CPU cannot run.
    pub fn resolve(preference: BackendPreference) -> Result<Backend> {
        let requested = match preference {
            BackendPreference::Auto => return Ok(Self::detect()),
            BackendPreference::Portable => Self::Portable,
            BackendPreference::Sse2 => Self::Sse2,
            BackendPreference::Neon => Self::Neon,
        };
        requested.ensure_available()?;
        log::info!("Using configured lane backend: {}", requested.name());
        Ok(requested)
    }

    fn ensure_available(self) -> Result<()> {
        if self.is_available() {
            return Ok(());
        }
        Err(self.unsupported().into())
    }

    /// Error reported when a kernel is asked to run on this backend but the
    /// CPU (or the compiled target) cannot execute it.
    pub(crate) fn unsupported(self) -> KernelError {
        let available: Vec<&str> = Self::available().iter().map(Backend::name).collect();
        KernelError::UnsupportedHardware {
            required: self.name().to_string(),
            available: available.join(", "),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Shared execution context passed to every kernel call.
///
/// Cloning is cheap: the worker pool and workspace are shared.
#[derive(Debug, Clone)]
pub struct KernelOptions {
    pub pool: Arc<WorkerPool>,
    pub workspace: WorkspacePool,
    pub precision: PrecisionMode,
    pub backend: Backend,
}

impl KernelOptions {
    /// Build the worker pool and workspace described by `config` and
    /// resolve its backend preference.
    pub fn from_config(config: &KernelConfig) -> Result<Self> {
        config.validate()?;
        let backend = Backend::resolve(config.backend)?;
        let pool = WorkerPool::with_threads(config.effective_threads())?;

        let to_usize = |bytes: u64| {
            usize::try_from(bytes)
                .map_err(|_| ConfigError::Validation(format!("{bytes} bytes exceeds usize")))
        };
        let cache = to_usize(config.workspace_cache_bytes)?;
        let limit = to_usize(config.workspace_limit_bytes)?;
        let workspace = WorkspacePool::with_limit(cache, (limit > 0).then_some(limit));

        log::debug!(
            "kernel options: backend={backend}, threads={}, precision={}, workspace_limit={limit}",
            pool.num_threads(),
            config.precision
        );
        Ok(Self { pool: Arc::new(pool), workspace, precision: config.precision, backend })
    }

    /// Defaults: all CPUs, exact precision, auto-detected backend.
    pub fn new() -> Result<Self> {
        Self::from_config(&KernelConfig::default())
    }

    /// Defaults with a fixed worker count.
    pub fn with_threads(num_threads: usize) -> Result<Self> {
        Self::from_config(&KernelConfig { num_threads: num_threads.max(1), ..Default::default() })
    }

    pub fn with_precision(mut self, precision: PrecisionMode) -> Self {
        self.precision = precision;
        self
    }

    pub fn with_workspace(mut self, workspace: WorkspacePool) -> Self {
        self.workspace = workspace;
        self
    }

    /// Force a backend.
    ///
    /// # Errors
    ///
    /// [`KernelError::UnsupportedHardware`] if the CPU cannot run it.
    pub fn with_backend(mut self, backend: Backend) -> Result<Self> {
        backend.ensure_available()?;
        self.backend = backend;
        Ok(self)
    }
}

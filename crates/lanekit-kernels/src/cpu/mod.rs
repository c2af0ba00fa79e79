//! CPU lane backends and the run kernels built on them

pub mod fallback;
pub mod lane;
pub mod simd_math;

#[cfg(target_arch = "x86_64")]
pub mod x86;

#[cfg(target_arch = "aarch64")]
pub mod arm;

pub use fallback::{PortableF32x4, PortableI32x4};
pub use lane::{INT8_PACK, Int8Accumulator, LANES, VectorLane};

#[cfg(target_arch = "x86_64")]
pub use x86::{Sse2F32x4, Sse2I32x4};

#[cfg(target_arch = "aarch64")]
pub use arm::{NeonF32x4, NeonI32x4};

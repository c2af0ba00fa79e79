//! Common types for lanekit kernels
//!
//! This crate provides the foundational pieces shared by the kernel crate:
//! the lane-packed tensor container, the scratch workspace pool, kernel
//! configuration, and error handling.

pub mod config;
pub mod error;
pub mod tensor;
pub mod workspace;

pub use config::{BackendPreference, KernelConfig, PrecisionMode};
pub use error::*;
pub use tensor::{PackedTensor, SUPPORTED_ELEMPACKS};
pub use workspace::{ScratchBuffer, WorkspacePool, WorkspaceStats};

//! Error types shared by every lanekit crate.

use thiserror::Error;

/// Status code reported for a successful kernel call.
pub const STATUS_OK: i32 = 0;
/// Status code reported when a scratch allocation fails.
pub const STATUS_ALLOC_FAILED: i32 = -100;
/// Status code reported for every other failure.
pub const STATUS_FAILED: i32 = -1;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum LaneKitError {
    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl LaneKitError {
    /// Integer status convention used by graph executors that do not speak
    /// `Result`: `-100` for allocation failure, `-1` otherwise.
    pub fn status_code(&self) -> i32 {
        match self {
            Self::Kernel(KernelError::ResourceExhausted { .. }) => STATUS_ALLOC_FAILED,
            _ => STATUS_FAILED,
        }
    }

    /// Whether this error came from a failed workspace allocation.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, Self::Kernel(KernelError::ResourceExhausted { .. }))
    }
}

/// Errors raised by kernel entry points.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("Invalid kernel arguments: {reason}")]
    InvalidArguments { reason: String },

    #[error("Workspace allocation of {requested_bytes} bytes failed: {reason}")]
    ResourceExhausted { requested_bytes: usize, reason: String },

    #[error("Unsupported hardware: required {required}, available {available}")]
    UnsupportedHardware { required: String, available: String },

    #[error("Kernel execution failed: {reason}")]
    ExecutionFailed { reason: String },
}

impl KernelError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArguments { reason: reason.into() }
    }
}

/// Errors that can occur when loading or validating a
/// [`KernelConfig`](crate::KernelConfig).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid environment override {key}={value}: {reason}")]
    EnvOverride { key: String, value: String, reason: String },
}

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, LaneKitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_error_display() {
        let err = LaneKitError::Kernel(KernelError::invalid("axis 3 out of range"));
        assert_eq!(
            err.to_string(),
            "Kernel error: Invalid kernel arguments: axis 3 out of range"
        );
    }

    #[test]
    fn resource_exhausted_maps_to_alloc_status() {
        let err: LaneKitError = KernelError::ResourceExhausted {
            requested_bytes: 64,
            reason: "budget".into(),
        }
        .into();
        assert!(err.is_resource_exhausted());
        assert_eq!(err.status_code(), STATUS_ALLOC_FAILED);
    }

    #[test]
    fn other_errors_map_to_generic_status() {
        let err = LaneKitError::Validation("bad".into());
        assert!(!err.is_resource_exhausted());
        assert_eq!(err.status_code(), STATUS_FAILED);

        let err: LaneKitError = KernelError::UnsupportedHardware {
            required: "neon".into(),
            available: "sse2".into(),
        }
        .into();
        assert_eq!(err.status_code(), STATUS_FAILED);
    }
}

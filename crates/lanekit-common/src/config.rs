//! Kernel configuration file format.
//!
//! Loads [`KernelConfig`] from a TOML file (`lanekit.toml`) with environment
//! variable overrides via `LANEKIT_*` prefixed variables.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How the softmax normalize pass turns a sum into a divisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrecisionMode {
    /// True lane-wise division.
    #[default]
    Exact,
    /// Reciprocal estimate refined by one Newton–Raphson step, then multiply.
    Fast,
}

impl std::fmt::Display for PrecisionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Fast => write!(f, "fast"),
        }
    }
}

impl std::str::FromStr for PrecisionMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "fast" => Ok(Self::Fast),
            other => Err(format!("unknown precision mode: {other}")),
        }
    }
}

/// Requested vector backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Pick the best backend the running CPU supports.
    #[default]
    Auto,
    /// Plain-Rust 4-wide lanes, available everywhere.
    Portable,
    /// 128-bit SSE2 lanes (x86_64).
    Sse2,
    /// 128-bit NEON lanes (aarch64).
    Neon,
}

impl std::fmt::Display for BackendPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Portable => write!(f, "portable"),
            Self::Sse2 => write!(f, "sse2"),
            Self::Neon => write!(f, "neon"),
        }
    }
}

impl std::str::FromStr for BackendPreference {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "portable" | "scalar" => Ok(Self::Portable),
            "sse2" => Ok(Self::Sse2),
            "neon" => Ok(Self::Neon),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

/// Kernel configuration loaded from TOML with environment variable overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Worker threads for parallel loops (0 = number of CPUs).
    /// Override: `LANEKIT_NUM_THREADS`
    pub num_threads: usize,

    /// Normalize-pass precision.
    /// Override: `LANEKIT_PRECISION`
    pub precision: PrecisionMode,

    /// Vector backend to run.
    /// Override: `LANEKIT_BACKEND`
    pub backend: BackendPreference,

    /// Upper bound on live scratch bytes per workspace (0 = unlimited).
    /// Override: `LANEKIT_WORKSPACE_LIMIT`
    pub workspace_limit_bytes: u64,

    /// Idle scratch bytes the workspace keeps cached for reuse.
    pub workspace_cache_bytes: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            precision: PrecisionMode::Exact,
            backend: BackendPreference::Auto,
            workspace_limit_bytes: 0,
            workspace_cache_bytes: 16 * 1024 * 1024,
        }
    }
}

impl KernelConfig {
    /// Generate a default configuration TOML string.
    pub fn default_toml() -> String {
        let cfg = Self::default();
        toml::to_string_pretty(&cfg).expect("default config should serialize")
    }

    /// Load configuration from a TOML file, falling back to defaults for
    /// missing fields, then apply environment variable overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load from TOML string (useful for testing).
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut cfg: KernelConfig = toml::from_str(toml_str)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load only from environment variables, starting from defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Thread count with `0` resolved to the number of CPUs.
    pub fn effective_threads(&self) -> usize {
        if self.num_threads == 0 { num_cpus::get().max(1) } else { self.num_threads }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_threads > 1024 {
            return Err(ConfigError::Validation(format!(
                "num_threads must be <= 1024, got {}",
                self.num_threads
            )));
        }
        if self.workspace_limit_bytes != 0 && self.workspace_limit_bytes < 64 {
            return Err(ConfigError::Validation(format!(
                "workspace_limit_bytes must be 0 (unlimited) or >= 64, got {}",
                self.workspace_limit_bytes
            )));
        }
        if usize::try_from(self.workspace_limit_bytes).is_err()
            || usize::try_from(self.workspace_cache_bytes).is_err()
        {
            return Err(ConfigError::Validation(
                "workspace sizes exceed the address space".into(),
            ));
        }
        Ok(())
    }

    /// Apply `LANEKIT_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("LANEKIT_NUM_THREADS") {
            self.num_threads = val.parse::<usize>().map_err(|e| ConfigError::EnvOverride {
                key: "LANEKIT_NUM_THREADS".into(),
                value: val.clone(),
                reason: e.to_string(),
            })?;
        }

        if let Ok(val) = std::env::var("LANEKIT_PRECISION") {
            self.precision = val.parse::<PrecisionMode>().map_err(|reason| {
                ConfigError::EnvOverride { key: "LANEKIT_PRECISION".into(), value: val.clone(), reason }
            })?;
        }

        if let Ok(val) = std::env::var("LANEKIT_BACKEND") {
            self.backend = val.parse::<BackendPreference>().map_err(|reason| {
                ConfigError::EnvOverride { key: "LANEKIT_BACKEND".into(), value: val.clone(), reason }
            })?;
        }

        if let Ok(val) = std::env::var("LANEKIT_WORKSPACE_LIMIT") {
            self.workspace_limit_bytes =
                val.parse::<u64>().map_err(|e| ConfigError::EnvOverride {
                    key: "LANEKIT_WORKSPACE_LIMIT".into(),
                    value: val.clone(),
                    reason: e.to_string(),
                })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = KernelConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.effective_threads() >= 1);
    }

    #[test]
    #[serial]
    fn test_default_toml_round_trips() {
        let toml_str = KernelConfig::default_toml();
        let cfg: KernelConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(cfg, KernelConfig::default());
    }

    #[test]
    #[serial]
    fn test_from_toml_partial_uses_defaults() {
        let cfg = KernelConfig::from_toml("precision = \"fast\"\nnum_threads = 2\n").unwrap();
        assert_eq!(cfg.precision, PrecisionMode::Fast);
        assert_eq!(cfg.num_threads, 2);
        assert_eq!(cfg.backend, BackendPreference::Auto);
        assert_eq!(cfg.effective_threads(), 2);
    }

    #[test]
    #[serial]
    fn test_from_toml_rejects_unknown_backend() {
        let err = KernelConfig::from_toml("backend = \"avx9000\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_validate_rejects_tiny_workspace_limit() {
        let cfg = KernelConfig { workspace_limit_bytes: 8, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        temp_env::with_vars(
            [
                ("LANEKIT_NUM_THREADS", Some("3")),
                ("LANEKIT_PRECISION", Some("FAST")),
                ("LANEKIT_BACKEND", Some("portable")),
                ("LANEKIT_WORKSPACE_LIMIT", Some("4096")),
            ],
            || {
                let cfg = KernelConfig::from_env().unwrap();
                assert_eq!(cfg.num_threads, 3);
                assert_eq!(cfg.precision, PrecisionMode::Fast);
                assert_eq!(cfg.backend, BackendPreference::Portable);
                assert_eq!(cfg.workspace_limit_bytes, 4096);
            },
        );
    }

    #[test]
    #[serial]
    fn test_env_override_parse_error() {
        temp_env::with_var("LANEKIT_NUM_THREADS", Some("many"), || {
            let err = KernelConfig::from_env().unwrap_err();
            match err {
                ConfigError::EnvOverride { key, value, .. } => {
                    assert_eq!(key, "LANEKIT_NUM_THREADS");
                    assert_eq!(value, "many");
                }
                other => panic!("unexpected error: {other}"),
            }
        });
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("Exact".parse::<PrecisionMode>().unwrap(), PrecisionMode::Exact);
        assert_eq!("scalar".parse::<BackendPreference>().unwrap(), BackendPreference::Portable);
        assert!("gpu".parse::<BackendPreference>().is_err());
        assert_eq!(BackendPreference::Neon.to_string(), "neon");
    }
}

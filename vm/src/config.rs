//! Engine configuration
//!
//! A [`VmConfig`] is fixed when a [`crate::Vm`] is constructed. It can be
//! built in code, parsed from a TOML file, or read from the environment:
//!
//! ```toml
//! switch_mode = "dense"
//! max_steps = 1000000
//! max_call_depth = 512
//! trace = false
//! ```

use crate::switch::SwitchMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MAX_STEPS_ENV: &str = "VIPER_MAX_STEPS";
pub const MAX_CALL_DEPTH_ENV: &str = "VIPER_MAX_CALL_DEPTH";
pub const DEFAULT_MAX_CALL_DEPTH: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Dispatch backend policy for `switch.i32`
    pub switch_mode: SwitchMode,
    /// Abort after this many instructions (`None` = unlimited)
    pub max_steps: Option<u64>,
    pub max_call_depth: usize,
    /// Log every executed instruction at info level
    pub trace: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            switch_mode: SwitchMode::process_default(),
            max_steps: None,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            trace: false,
        }
    }
}

impl VmConfig {
    pub fn with_switch_mode(mut self, mode: SwitchMode) -> Self {
        self.switch_mode = mode;
        self
    }

    pub fn with_max_steps(mut self, limit: u64) -> Self {
        self.max_steps = Some(limit);
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Defaults overridden by `VIPER_MAX_STEPS` and `VIPER_MAX_CALL_DEPTH`.
    /// The switch mode always comes from [`SwitchMode::process_default`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(MAX_STEPS_ENV) {
            let limit = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: MAX_STEPS_ENV,
                value: raw.clone(),
            })?;
            config.max_steps = Some(limit);
        }
        if let Ok(raw) = std::env::var(MAX_CALL_DEPTH_ENV) {
            config.max_call_depth = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: MAX_CALL_DEPTH_ENV,
                value: raw.clone(),
            })?;
        }
        Ok(config)
    }
}

//! Driver parameters
//!
//! The values a module would take as load-time parameters. They seed the
//! process-wide [`Tunables`](crate::tunables::Tunables) and decide how many
//! devices [`Driver::load`](crate::driver::Driver::load) registers.

use std::path::Path;

use serde::Deserialize;

/// Default segment ("quantum") size in bytes
pub const DEFAULT_SEGMENT_SIZE: usize = 4000;
/// Default number of segment slots per segment-set
pub const DEFAULT_SET_SIZE: usize = 1000;
/// Default number of plain store devices
pub const DEFAULT_STORE_DEVICES: usize = 4;
/// Default number of pipe devices
pub const DEFAULT_PIPE_DEVICES: usize = 4;
/// Default pipe ring size in bytes
pub const DEFAULT_PIPE_BUFFER: usize = 4000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("`{0}` must be positive")]
    NotPositive(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverConfig {
    pub segment_size: usize,
    pub set_size: usize,
    pub store_devices: usize,
    pub pipe_devices: usize,
    pub pipe_buffer: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            set_size: DEFAULT_SET_SIZE,
            store_devices: DEFAULT_STORE_DEVICES,
            pipe_devices: DEFAULT_PIPE_DEVICES,
            pipe_buffer: DEFAULT_PIPE_BUFFER,
        }
    }
}

impl DriverConfig {
    /// Parse and validate a TOML document. Missing keys take their defaults.
    ///
    /// # Errors
    /// Returns an error on malformed TOML or invalid values
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or its content is invalid
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject sizes the store and the pipe cannot work with
    ///
    /// # Errors
    /// Returns `NotPositive` naming the first zero size
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.segment_size == 0 {
            return Err(ConfigError::NotPositive("segment_size"));
        }
        if self.set_size == 0 {
            return Err(ConfigError::NotPositive("set_size"));
        }
        // One slot is the sentinel, a ring needs at least one usable byte
        if self.pipe_buffer < 2 {
            return Err(ConfigError::NotPositive("pipe_buffer"));
        }
        Ok(())
    }
}

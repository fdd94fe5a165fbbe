//! Render and sampler state presets
//!
//! Uses RON (Rusty Object Notation) for human-readable state files.

use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use super::device::Device;
use super::error::Error;
use super::types::{RenderStates, SamplerStates, MAX_TEXTURE_SAMPLERS};

/// Error type for state loading
#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    ParseError(ron::error::SpannedError),
    SerializeError(ron::Error),
    /// More sampler tables than texture units
    TooManySamplers(usize),
    /// The device refused a table
    DeviceError(Error),
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::IoError(e)
    }
}

impl From<ron::error::SpannedError> for ConfigError {
    fn from(e: ron::error::SpannedError) -> Self {
        ConfigError::ParseError(e)
    }
}

impl From<ron::Error> for ConfigError {
    fn from(e: ron::Error) -> Self {
        ConfigError::SerializeError(e)
    }
}

impl From<Error> for ConfigError {
    fn from(e: Error) -> Self {
        ConfigError::DeviceError(e)
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Parse error: {}", e),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {}", e),
            ConfigError::TooManySamplers(n) => {
                write!(f, "{} sampler tables, at most {} texture units", n, MAX_TEXTURE_SAMPLERS)
            }
            ConfigError::DeviceError(e) => write!(f, "Device error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Render states plus the sampler states of the first `samplers.len()` units
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct States {
    pub render: RenderStates,
    pub samplers: Vec<SamplerStates>,
}

impl States {
    /// Snapshot a device's state tables
    pub fn from_device(device: &Device) -> Self {
        let samplers = (0..MAX_TEXTURE_SAMPLERS)
            .filter_map(|unit| device.sampler_states(unit).ok().copied())
            .collect();
        Self { render: device.render_states().clone(), samplers }
    }

    /// Install the tables on a device; units beyond `samplers` are untouched
    pub fn apply(&self, device: &mut Device) -> Result<(), ConfigError> {
        if self.samplers.len() > MAX_TEXTURE_SAMPLERS {
            return Err(ConfigError::TooManySamplers(self.samplers.len()));
        }
        for (unit, states) in self.samplers.iter().enumerate() {
            device.set_sampler_states(unit, *states)?;
        }
        device.set_render_states(self.render.clone());
        Ok(())
    }
}

/// Load state tables from a RON file
pub fn load_states<P: AsRef<Path>>(path: P) -> Result<States, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let states = load_states_from_str(&contents)?;
    info!("Loaded states from {}", path.display());
    Ok(states)
}

/// Save state tables to a RON file
pub fn save_states<P: AsRef<Path>>(states: &States, path: P) -> Result<(), ConfigError> {
    let config = ron::ser::PrettyConfig::new()
        .depth_limit(3)
        .indentor("  ".to_string());

    let contents = ron::ser::to_string_pretty(states, config)?;
    fs::write(path, contents)?;
    Ok(())
}

/// Load state tables from a RON string (for embedded presets or testing)
pub fn load_states_from_str(s: &str) -> Result<States, ConfigError> {
    let states: States = ron::from_str(s)?;
    if states.samplers.len() > MAX_TEXTURE_SAMPLERS {
        return Err(ConfigError::TooManySamplers(states.samplers.len()));
    }
    Ok(states)
}

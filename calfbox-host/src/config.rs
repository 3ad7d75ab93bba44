//! TOML engine configuration (§A.4): sample rate, polyphony, and the
//! directories the host scans for patches, loaded the way the teacher
//! loads its own settings file, with `directories` supplying the
//! platform config path when none is given on the command line.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub max_voices: usize,
    pub output_device: Option<String>,
    pub sample_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            max_voices: calfbox_core::constants::DEFAULT_MAX_VOICES,
            output_device: None,
            sample_dir: None,
        }
    }
}

impl EngineConfig {
    /// Load from an explicit path, falling back to the platform config
    /// directory (`~/.config/calfbox/calfbox.toml` on Linux) and finally to
    /// defaults if neither exists.
    pub fn load(explicit_path: Option<&Path>) -> anyhow::Result<Self> {
        if let Some(path) = explicit_path {
            let text = fs::read_to_string(path)?;
            return Ok(toml::from_str(&text)?);
        }

        if let Some(dirs) = directories::ProjectDirs::from("", "", "calfbox") {
            let default_path = dirs.config_dir().join("calfbox.toml");
            if default_path.exists() {
                let text = fs::read_to_string(&default_path)?;
                return Ok(toml::from_str(&text)?);
            }
        }

        Ok(Self::default())
    }
}
